//! Key-value store persisting one file per `(namespace, key)` under a root directory.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::trace;

use crate::{KeyValueStore, StoreError};

const VALUE_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the file backing `(namespace, key)`.
    pub fn value_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root.join(slugify_component(namespace, 64)).join(format!(
            "{}.{VALUE_EXTENSION}",
            slugify_component(key, 96)
        ))
    }
}

impl KeyValueStore for FileStore {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.value_path(namespace, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!(
                    "failed creating store directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let temp_path = temp_path_for(&path);
        fs::write(&temp_path, value.as_bytes()).map_err(|err| {
            StoreError::Backend(format!(
                "failed writing temp value {}: {err}",
                temp_path.display()
            ))
        })?;

        if let Err(rename_err) = fs::rename(&temp_path, &path) {
            // Windows does not allow replacing existing files via rename.
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(StoreError::Backend(format!(
                        "failed replacing {} after rename error ({rename_err}): {err}",
                        path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                StoreError::Backend(format!(
                    "failed writing {} after temp write: {err}",
                    path.display()
                ))
            })?;
        }

        trace!(path = %path.display(), "persisted store value");
        Ok(())
    }

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, StoreError> {
        let path = self.value_path(namespace, key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(raw),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(err) => Err(StoreError::Backend(format!(
                "failed reading {}: {err}",
                path.display()
            ))),
        }
    }

    fn delete_value(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let path = self.value_path(namespace, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(err) => Err(StoreError::Backend(format!(
                "failed deleting {}: {err}",
                path.display()
            ))),
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("value.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

fn slugify_component(input: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_len));
    let mut last_was_sep = false;
    for ch in input.chars() {
        let next = if ch.is_ascii_alphanumeric() || ch == '-' {
            ch.to_ascii_lowercase()
        } else {
            '_'
        };

        if next == '_' {
            if last_was_sep {
                continue;
            }
            last_was_sep = true;
        } else {
            last_was_sep = false;
        }

        out.push(next);
        if out.len() >= max_len {
            break;
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "default".to_owned()
    } else {
        trimmed.to_owned()
    }
}
