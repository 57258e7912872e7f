use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::doc_id::DocumentId;

pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
    /// Relative paths of every file under the base dir with the given extension.
    fn list(&self, extension: &str) -> Vec<String>;
}

#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    pub fn path_of(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path_of(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_of(ident))
    }

    /// Writes through a temp file in the same directory and renames it over
    /// the target, so readers never see a half-written file.
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.path_of(ident);
        let dir = path.parent().unwrap_or(&self.base_dir).to_path_buf();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp_path = dir.join(format!(".{}-{file_name}", DocumentId::generate()));

        std::fs::create_dir_all(&dir)?;
        std::fs::write(&temp_path, data)?;

        std::fs::rename(&temp_path, &path)
    }

    fn list(&self, extension: &str) -> Vec<String> {
        let mut found: Vec<String> = WalkDir::new(&self.base_dir)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    log::warn!("skipping unreadable entry under {:?}: {err}", self.base_dir);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some(extension))
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.base_dir)
                    .ok()
                    .map(|rel| rel.to_string_lossy().to_string())
            })
            .collect();

        found.sort();
        found
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path()).unwrap();

        store.write("notes/a.md", b"hello").unwrap();
        assert!(store.exists("notes/a.md"));
        assert_eq!(store.read("notes/a.md").unwrap(), b"hello");
    }

    #[test]
    fn test_list_filters_by_extension_and_skips_hidden() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path()).unwrap();

        store.write("a.md", b"").unwrap();
        store.write("sub/b.md", b"").unwrap();
        store.write("c.png", b"").unwrap();
        store.write(".obsidian/d.md", b"").unwrap();

        let listed = store.list("md");
        assert_eq!(listed, vec!["a.md".to_string(), format!("sub{}b.md", std::path::MAIN_SEPARATOR)]);
    }

    #[test]
    fn test_list_skips_nested_hidden_dirs_and_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path()).unwrap();

        store.write("deep/er/e.md", b"").unwrap();
        store.write("deep/.trash/f.md", b"").unwrap();
        store.write("deep/.01tmp-e.md", b"").unwrap();
        store.write("deep/notes.md.bak", b"").unwrap();

        let sep = std::path::MAIN_SEPARATOR;
        assert_eq!(store.list("md"), vec![format!("deep{sep}er{sep}e.md")]);
    }

    #[test]
    fn test_list_of_missing_base_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path().join("vault")).unwrap();
        std::fs::remove_dir(tmp.path().join("vault")).unwrap();

        assert!(store.list("md").is_empty());
    }
}
