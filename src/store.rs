//! Notes vault: a directory of markdown documents.
//!
//! A document's stable id lives in its YAML frontmatter under `voyager-id`.
//! Documents without one are "not indexed" and never queried.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::doc_id::DocumentId;
use crate::storage::{BackendLocal, StorageManager};

pub const ID_KEY: &str = "voyager-id";
const DOCUMENT_EXTENSION: &str = "md";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("document is not valid utf8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("failed to watch vault: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0:?} is outside the vault")]
    OutsideVault(PathBuf),
}

/// What the similarity pipeline needs from the host's document storage.
pub trait DocumentStore {
    /// The last `max_chars` characters of the document.
    fn read_window(&self, doc: &str, max_chars: usize) -> Result<String, StoreError>;

    /// `None` when the document has not been indexed yet.
    fn stable_id(&self, doc: &str) -> Result<Option<DocumentId>, StoreError>;
}

#[derive(Clone, Debug)]
pub struct Vault {
    storage: BackendLocal,
}

impl Vault {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().canonicalize()?;
        Ok(Self {
            storage: BackendLocal::new(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.storage.base_dir
    }

    /// Vault-relative name for a path given on the command line.
    pub fn relative(&self, path: impl AsRef<Path>) -> Result<String, StoreError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else if self.root().join(path).exists() {
            self.root().join(path)
        } else {
            std::env::current_dir()?.join(path)
        };

        let absolute = absolute.canonicalize()?;
        absolute
            .strip_prefix(self.root())
            .map(|rel| rel.to_string_lossy().to_string())
            .map_err(|_| StoreError::OutsideVault(absolute.clone()))
    }

    pub fn read(&self, doc: &str) -> Result<String, StoreError> {
        Ok(String::from_utf8(self.storage.read(doc)?)?)
    }

    pub fn documents(&self) -> Vec<String> {
        self.storage.list(DOCUMENT_EXTENSION)
    }

    pub fn title(&self, doc: &str) -> String {
        Path::new(doc)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| doc.to_string())
    }

    pub fn created_at(&self, doc: &str) -> Result<DateTime<Utc>, StoreError> {
        let meta = std::fs::metadata(self.storage.path_of(doc))?;
        let time = meta.created().or_else(|_| meta.modified())?;
        Ok(DateTime::<Utc>::from(time))
    }

    /// Returns the document's id, writing a fresh one into the frontmatter
    /// if it has none.
    pub fn ensure_id(&self, doc: &str) -> Result<DocumentId, StoreError> {
        let content = self.read(doc)?;
        if let Some(id) = frontmatter_id(&content) {
            return Ok(id);
        }

        let id = DocumentId::generate();
        let updated = insert_id(&content, &id);
        self.storage.write(doc, updated.as_bytes())?;
        log::info!("assigned {ID_KEY} {id} to {doc}");

        Ok(id)
    }

    /// Reports modified documents until the returned handle is dropped.
    pub fn watch(
        &self,
        on_modified: impl Fn(String) + Send + 'static,
    ) -> Result<WatchHandle, StoreError> {
        let root = self.root().to_path_buf();
        let handler_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for doc in modified_documents(&handler_root, &event) {
                    log::debug!("modified: {doc}");
                    on_modified(doc);
                }
            }
            Err(err) => log::warn!("vault watcher error: {err}"),
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok(WatchHandle { _watcher: watcher })
    }
}

/// Vault-relative documents touched by `event`. Hidden paths (including the
/// temp files of atomic writes) and metadata-only changes are skipped.
fn modified_documents(root: &Path, event: &Event) -> Vec<String> {
    match event.kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => return vec![],
        EventKind::Modify(_) | EventKind::Create(_) => {}
        _ => return vec![],
    }

    let mut docs: Vec<String> = event
        .paths
        .iter()
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(DOCUMENT_EXTENSION))
        .filter_map(|path| path.strip_prefix(root).ok())
        .filter(|rel| !rel.components().any(is_hidden_component))
        .map(|rel| rel.to_string_lossy().to_string())
        .collect();

    docs.dedup();
    docs
}

fn is_hidden_component(component: Component) -> bool {
    matches!(component, Component::Normal(name) if name.to_string_lossy().starts_with('.'))
}

impl DocumentStore for Vault {
    fn read_window(&self, doc: &str, max_chars: usize) -> Result<String, StoreError> {
        Ok(trailing_window(&self.read(doc)?, max_chars).to_string())
    }

    fn stable_id(&self, doc: &str) -> Result<Option<DocumentId>, StoreError> {
        Ok(frontmatter_id(&self.read(doc)?))
    }
}

/// Owns the watcher; dropping it unsubscribes.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
}

/// The last `max_chars` characters of `content`, on a char boundary.
pub fn trailing_window(content: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }

    match content.char_indices().rev().nth(max_chars - 1) {
        Some((start, _)) => &content[start..],
        None => content,
    }
}

/// Splits `---`-fenced YAML frontmatter from the body.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }

    None
}

/// The frontmatter as a mapping. Frontmatter that isn't valid YAML or isn't
/// a mapping is treated as body text.
fn frontmatter_mapping(yaml: &str) -> Option<serde_yml::Mapping> {
    match serde_yml::from_str::<serde_yml::Value>(yaml) {
        Ok(serde_yml::Value::Mapping(mapping)) => Some(mapping),
        Ok(other) => {
            log::warn!("ignoring frontmatter that is not a mapping: {other:?}");
            None
        }
        Err(err) => {
            log::warn!("ignoring malformed frontmatter: {err}");
            None
        }
    }
}

pub fn frontmatter_id(content: &str) -> Option<DocumentId> {
    let (yaml, _) = split_frontmatter(content)?;
    if yaml.trim().is_empty() {
        return None;
    }

    match frontmatter_mapping(yaml)?.get(ID_KEY) {
        Some(serde_yml::Value::String(s)) if !s.trim().is_empty() => Some(DocumentId::from(s.trim())),
        Some(serde_yml::Value::Number(n)) => Some(DocumentId::from(n.to_string())),
        _ => None,
    }
}

/// Adds the id as the first frontmatter key, creating the block if needed.
/// Leaves the rest of the file byte-for-byte intact. A block that can't hold
/// the key (not a mapping, or malformed) is left alone behind a fresh one.
fn insert_id(content: &str, id: &DocumentId) -> String {
    let line = format!("{ID_KEY}: {id}\n");

    let extendable = split_frontmatter(content)
        .is_some_and(|(yaml, _)| yaml.trim().is_empty() || frontmatter_mapping(yaml).is_some());

    if extendable {
        let (fence, rest) = if let Some(rest) = content.strip_prefix("---\r\n") {
            ("---\r\n", rest)
        } else {
            ("---\n", &content[4..])
        };
        format!("{fence}{line}{rest}")
    } else {
        format!("---\n{line}---\n{content}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_window_counts_chars() {
        assert_eq!(trailing_window("hello world", 5), "world");
        assert_eq!(trailing_window("héllo", 4), "éllo");
        assert_eq!(trailing_window("短い文章", 2), "文章");
        assert_eq!(trailing_window("abc", 10), "abc");
        assert_eq!(trailing_window("abc", 0), "");
    }

    #[test]
    fn test_frontmatter_id() {
        let doc = "---\ntags: [a]\nvoyager-id: 01abc\n---\n# Title\n";
        assert_eq!(frontmatter_id(doc), Some(DocumentId::from("01abc")));

        assert_eq!(frontmatter_id("# no frontmatter"), None);
        assert_eq!(frontmatter_id("---\ntags: [a]\n---\nbody"), None);
        assert_eq!(frontmatter_id("---\nvoyager-id: ''\n---\n"), None);
    }

    #[test]
    fn test_unterminated_frontmatter_is_body() {
        assert_eq!(frontmatter_id("---\nvoyager-id: x\nno closing fence"), None);
    }

    #[test]
    fn test_insert_id_preserves_content() {
        let id = DocumentId::from("xyz");

        let with_fm = "---\ntags: [a]\n---\nbody\n";
        let updated = insert_id(with_fm, &id);
        assert_eq!(updated, "---\nvoyager-id: xyz\ntags: [a]\n---\nbody\n");
        assert_eq!(frontmatter_id(&updated), Some(id.clone()));

        let bare = "just text";
        let updated = insert_id(bare, &id);
        assert!(updated.ends_with("---\njust text"));
        assert_eq!(frontmatter_id(&updated), Some(id));
    }

    #[test]
    fn test_vault_ensure_id_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "some text").unwrap();
        let vault = Vault::open(tmp.path()).unwrap();

        assert_eq!(vault.stable_id("note.md").unwrap(), None);
        let id = vault.ensure_id("note.md").unwrap();
        assert_eq!(vault.ensure_id("note.md").unwrap(), id);
        assert_eq!(vault.stable_id("note.md").unwrap(), Some(id));
        assert!(vault.read("note.md").unwrap().ends_with("some text"));
    }

    #[test]
    fn test_vault_read_window() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "0123456789").unwrap();
        let vault = Vault::open(tmp.path()).unwrap();

        assert_eq!(vault.read_window("note.md", 3).unwrap(), "789");
        assert_eq!(vault.title("note.md"), "note.md");
    }

    #[test]
    fn test_relative_rejects_outside_paths() {
        let vault_dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("x.md"), "").unwrap();
        let vault = Vault::open(vault_dir.path()).unwrap();

        assert!(matches!(
            vault.relative(other.path().join("x.md")),
            Err(StoreError::OutsideVault(_))
        ));
    }

    #[test]
    fn test_unusable_frontmatter_has_no_id() {
        assert_eq!(frontmatter_id("---\n- tag\n---\nbody\n"), None);
        assert_eq!(frontmatter_id("---\ntitle: [unclosed\n---\n"), None);
        assert_eq!(frontmatter_id("---\njust a sentence\n---\n"), None);
    }

    #[test]
    fn test_insert_id_ahead_of_unusable_frontmatter() {
        let id = DocumentId::from("xyz");
        let list = "---\n- tag\n---\nbody\n";

        let updated = insert_id(list, &id);
        assert_eq!(updated, format!("---\nvoyager-id: xyz\n---\n{list}"));
        assert_eq!(frontmatter_id(&updated), Some(id));
    }

    #[test]
    fn test_insert_id_into_empty_frontmatter() {
        let id = DocumentId::from("xyz");
        let updated = insert_id("---\n---\nbody", &id);
        assert_eq!(updated, "---\nvoyager-id: xyz\n---\nbody");
    }

    #[test]
    fn test_vault_ensure_id_with_malformed_frontmatter() {
        let tmp = tempfile::tempdir().unwrap();
        let broken = "---\ntitle: [unclosed\n---\ntext\n";
        std::fs::write(tmp.path().join("note.md"), broken).unwrap();
        let vault = Vault::open(tmp.path()).unwrap();

        assert_eq!(vault.stable_id("note.md").unwrap(), None);
        let id = vault.ensure_id("note.md").unwrap();
        assert_eq!(vault.ensure_id("note.md").unwrap(), id);
        assert_eq!(vault.stable_id("note.md").unwrap(), Some(id));
        assert!(vault.read("note.md").unwrap().ends_with(broken));
    }

    fn modify_event(paths: &[PathBuf]) -> Event {
        paths.iter().fold(
            Event::new(EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content))),
            |event, path| event.add_path(path.clone()),
        )
    }

    #[test]
    fn test_modified_documents_filters_events() {
        let root = PathBuf::from("/vault");
        let sep = std::path::MAIN_SEPARATOR;

        let event = modify_event(&[
            root.join("note.md"),
            root.join("sub/other.md"),
            root.join("image.png"),
            root.join(".obsidian/workspace.md"),
            root.join(".01tmp-note.md"),
            PathBuf::from("/elsewhere/x.md"),
        ]);
        assert_eq!(
            modified_documents(&root, &event),
            vec!["note.md".to_string(), format!("sub{sep}other.md")]
        );

        let created = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(root.join("new.md"));
        assert_eq!(modified_documents(&root, &created), vec!["new.md".to_string()]);

        let metadata = Event::new(EventKind::Modify(ModifyKind::Metadata(
            notify::event::MetadataKind::AccessTime,
        )))
        .add_path(root.join("note.md"));
        assert!(modified_documents(&root, &metadata).is_empty());

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(root.join("note.md"));
        assert!(modified_documents(&root, &removed).is_empty());
    }

    #[test]
    fn test_watch_reports_written_document() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "before").unwrap();
        let vault = Vault::open(tmp.path()).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let handle = vault
            .watch(move |doc| {
                let _ = tx.send(doc);
            })
            .unwrap();

        std::fs::write(vault.root().join("note.md"), "after").unwrap();
        let doc = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(doc, "note.md");
        drop(handle);
    }
}
