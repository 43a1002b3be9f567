//! 类别目录 - 每次运行加载一次，只读

use crate::core::error::{LabelError, Result};
use log::{debug, info};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    classes: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: Option<u32>,
    name: String,
}

/// 类别 id ↔ 名称映射，同时作为检测结果的白名单
#[derive(Debug, Clone, PartialEq)]
pub struct ClassCatalog {
    by_id: BTreeMap<u32, String>,
    by_name: HashMap<String, u32>,
}

impl ClassCatalog {
    /// 由 `(id, name)` 构建，拒绝空目录与重复项
    pub fn new(entries: Vec<(u32, String)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(LabelError::config("class catalog is empty"));
        }

        let mut by_id = BTreeMap::new();
        let mut by_name = HashMap::new();

        for (id, name) in entries {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(LabelError::config(format!("class {} has an empty name", id)));
            }
            if by_id.insert(id, name.clone()).is_some() {
                return Err(LabelError::config(format!("duplicate class id {}", id)));
            }
            if by_name.insert(name.clone(), id).is_some() {
                return Err(LabelError::config(format!("duplicate class name '{}'", name)));
            }
        }

        Ok(Self { by_id, by_name })
    }

    /// 从 YAML (`.yaml`/`.yml`) 或 JSON5 (`.json`/`.json5`) 文件加载
    ///
    /// 未写 `id` 的条目使用其在列表中的位置
    pub fn load(path: &Path) -> Result<Self> {
        info!("📖 Loading class catalog: {}", path.display());

        let raw = std::fs::read_to_string(path).map_err(|e| {
            LabelError::config(format!("cannot read class catalog {}: {}", path.display(), e))
        })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let file: CatalogFile = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&raw)?,
            "json" | "json5" => json5::from_str(&raw)?,
            other => {
                return Err(LabelError::config(format!(
                    "unsupported class catalog extension '{}'",
                    other
                )))
            }
        };

        let entries = file
            .classes
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| (entry.id.unwrap_or(idx as u32), entry.name))
            .collect();

        let catalog = Self::new(entries)?;
        debug!("Class catalog: {:?}", catalog.names());
        info!("✅ Loaded {} classes", catalog.len());
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// 升序 id 列表
    pub fn ids(&self) -> Vec<u32> {
        self.by_id.keys().copied().collect()
    }

    /// Ids run `0..len` without gaps, so a positional name list lines up with them.
    pub fn is_dense(&self) -> bool {
        self.by_id.keys().enumerate().all(|(i, &id)| i as u32 == id)
    }

    /// 按 id 排序的名称
    pub fn names(&self) -> Vec<String> {
        self.by_id.values().cloned().collect()
    }
}
