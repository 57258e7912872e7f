use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use std::{fmt::Display, ops::Deref};

/// Stable identifier of an indexed document (the `voyager-id` frontmatter value).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct DocumentId(String);

impl Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(DocumentId(s.trim().to_string()))
    }
}

impl Deref for DocumentId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(fr: &str) -> Self {
        DocumentId(fr.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(fr: String) -> Self {
        DocumentId(fr)
    }
}

impl From<DocumentId> for String {
    fn from(fr: DocumentId) -> Self {
        fr.0
    }
}

impl DocumentId {
    /// Fresh id for a document that has never been indexed.
    #[inline]
    pub fn generate() -> DocumentId {
        DocumentId(rusty_ulid::generate_ulid_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = DocumentId::generate();
        let b = DocumentId::generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = DocumentId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: DocumentId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }
}
