//! JSON-file-backed [`Backend`] for the key/value store (C4), so settings
//! survive a process restart the way the original's NVS flash partition
//! survives a device reboot.
//!
//! Grounded on `greenhouse_core::store::MemoryBackend` (same `Backend`
//! contract) plus `horus_library`'s habit of flushing small state files to
//! disk with `serde_json` rather than a database.

use greenhouse_core::store::Backend;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One JSON document on disk holding every namespace/key pair the process
/// has ever written. Rewritten in full on every `set`/`erase_all`; the
/// store's own value size cap (`MAX_VALUE_BYTES`) and write-coalescing
/// (`Store::write`'s read-before-write check) keep this infrequent.
pub struct FileBackend {
    path: PathBuf,
    data: HashMap<(String, String), Vec<u8>>,
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct OnDisk {
    entries: Vec<Entry>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Entry {
    namespace: String,
    key: String,
    value: Vec<u8>,
}

impl FileBackend {
    /// Loads any existing file at `path`; a missing or unparsable file is
    /// treated as an empty store, matching the original's "new entry" NVS
    /// behavior on first boot.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<OnDisk>(&bytes).ok())
            .map(|on_disk| {
                on_disk
                    .entries
                    .into_iter()
                    .map(|e| ((e.namespace, e.key), e.value))
                    .collect()
            })
            .unwrap_or_default();
        Self { path, data }
    }

    fn flush(&self) {
        let entries = self
            .data
            .iter()
            .map(|((namespace, key), value)| Entry {
                namespace: namespace.clone(),
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        let on_disk = OnDisk { entries };
        match serde_json::to_vec_pretty(&on_disk) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    log::error!("(STORE) failed to flush {}: {e}", self.path.display());
                }
            }
            Err(e) => log::error!("(STORE) failed to serialize store contents: {e}"),
        }
    }
}

impl Backend for FileBackend {
    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.data.get(&(namespace.to_string(), key.to_string())).cloned()
    }

    fn set(&mut self, namespace: &str, key: &str, value: Vec<u8>) {
        self.data.insert((namespace.to_string(), key.to_string()), value);
        self.flush();
    }

    fn erase_all(&mut self, namespace: &str) {
        self.data.retain(|(ns, _), _| ns != namespace);
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_survive_reopening_the_same_path() {
        let dir = std::env::temp_dir().join(format!("greenhouse-store-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");
        let _ = std::fs::remove_file(&path);

        {
            let mut backend = FileBackend::open(&path);
            backend.set("settings", "tempSave", b"hello".to_vec());
        }
        let reopened = FileBackend::open(&path);
        assert_eq!(reopened.get("settings", "tempSave"), Some(b"hello".to_vec()));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_starts_empty() {
        let backend = FileBackend::open("/nonexistent/path/does/not/exist.json");
        assert_eq!(backend.get("settings", "tempSave"), None);
    }
}
