//! 对象存储协作方 - 只在流水线入口 (fetch) 与出口 (store) 调用

use crate::core::error::{LabelError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// 对象存储接口，key 为 `/` 分隔的相对路径
pub trait Storage {
    /// 下载 `remote_key` 到 `local_dir`，返回本地路径
    fn fetch(&self, remote_key: &str, local_dir: &Path) -> Result<PathBuf>;

    /// 上传文件，或目录下的所有文件，到 `remote_key` 之下
    fn store(&self, local_path: &Path, remote_key: &str) -> Result<()>;

    fn list(&self) -> Result<Vec<String>>;
}

/// 视频来源与导出结果的去向
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum StorageMode {
    #[default]
    Local,
    Remote {
        source_key: String,
        destination_prefix: String,
    },
}

/// 本地目录充当 bucket
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| LabelError::Storage(format!("cannot create {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(LabelError::Storage(format!("invalid storage key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    fn store_file(&self, local: &Path, key: &str) -> Result<()> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &target).map_err(|e| {
            LabelError::Storage(format!("store {} -> {}: {}", local.display(), key, e))
        })?;
        debug!("Stored {} as {}", local.display(), key);
        Ok(())
    }
}

impl Storage for LocalStorage {
    fn fetch(&self, remote_key: &str, local_dir: &Path) -> Result<PathBuf> {
        let source = self.resolve(remote_key)?;
        if !source.is_file() {
            return Err(LabelError::Storage(format!("no such key '{}'", remote_key)));
        }
        let file_name = source
            .file_name()
            .ok_or_else(|| LabelError::Storage(format!("key '{}' has no file name", remote_key)))?;

        fs::create_dir_all(local_dir)?;
        let local = local_dir.join(file_name);
        fs::copy(&source, &local)
            .map_err(|e| LabelError::Storage(format!("fetch '{}': {}", remote_key, e)))?;
        info!("⬇️ Fetched {} -> {}", remote_key, local.display());
        Ok(local)
    }

    fn store(&self, local_path: &Path, remote_key: &str) -> Result<()> {
        if local_path.is_file() {
            return self.store_file(local_path, remote_key);
        }
        if !local_path.is_dir() {
            return Err(LabelError::Storage(format!(
                "nothing to store at {}",
                local_path.display()
            )));
        }

        let prefix = remote_key.trim_end_matches('/');
        let mut stored = 0usize;
        let mut pending = vec![local_path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(local_path)
                    .map_err(|e| LabelError::Storage(e.to_string()))?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                self.store_file(&path, &format!("{}/{}", prefix, key))?;
                stored += 1;
            }
        }
        info!("⬆️ Stored {} files under {}", stored, prefix);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    keys.push(
                        relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/"),
                    );
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_and_list() {
        let bucket = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        fs::create_dir_all(bucket.path().join("videos")).unwrap();
        fs::write(bucket.path().join("videos/a.mp4"), b"data").unwrap();

        let storage = LocalStorage::new(bucket.path()).unwrap();
        assert_eq!(storage.list().unwrap(), vec!["videos/a.mp4".to_string()]);

        let local = storage.fetch("videos/a.mp4", work.path()).unwrap();
        assert_eq!(local, work.path().join("a.mp4"));
        assert_eq!(fs::read(local).unwrap(), b"data");
    }

    #[test]
    fn test_missing_key_is_io_failure() {
        let bucket = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(bucket.path()).unwrap();
        let err = storage.fetch("nope.mp4", bucket.path()).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::IOFailure);
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let bucket = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(bucket.path()).unwrap();
        assert!(storage.fetch("../etc/passwd", bucket.path()).is_err());
        assert!(storage.fetch("", bucket.path()).is_err());
    }

    #[test]
    fn test_store_directory_recursively() {
        let bucket = tempfile::tempdir().unwrap();
        let export = tempfile::tempdir().unwrap();
        fs::create_dir_all(export.path().join("labels")).unwrap();
        fs::write(export.path().join("data.yaml"), "nc: 1\n").unwrap();
        fs::write(export.path().join("labels/x.txt"), "").unwrap();

        let storage = LocalStorage::new(bucket.path()).unwrap();
        storage.store(export.path(), "exports/run1/").unwrap();

        assert_eq!(
            storage.list().unwrap(),
            vec![
                "exports/run1/data.yaml".to_string(),
                "exports/run1/labels/x.txt".to_string()
            ]
        );
    }

    #[test]
    fn test_storage_mode_serde() {
        let mode: StorageMode = serde_json::from_str(
            r#"{"mode":"remote","source_key":"v/a.mp4","destination_prefix":"out"}"#,
        )
        .unwrap();
        assert_eq!(
            mode,
            StorageMode::Remote {
                source_key: "v/a.mp4".into(),
                destination_prefix: "out".into()
            }
        );
        assert_eq!(StorageMode::default(), StorageMode::Local);
    }
}
