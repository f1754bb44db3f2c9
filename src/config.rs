use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bucket::creator::DEFAULT_NUMBER_WORKERS;
use crate::bucket::{
    PackLevel, DEFAULT_BUCKET_SIZE, DEFAULT_GRACE_PERIOD, DEFAULT_MAX_BUCKET_COUNT,
    DEFAULT_MIN_BUCKET_SIZE,
};
use crate::error::{Result, TableError};
use crate::model::header::TableHeader;
use crate::storage::HistoryRetention;

pub const ENV_PREFIX: &str = "GOR_TABLE_";

/// 表级属性：表头优先，其次环境变量 `GOR_TABLE_<KEY>`，最后默认值
pub fn table_property(header: &TableHeader, key: &str, default: &str) -> String {
    if let Some(v) = header.property(key) {
        return v.to_string();
    }
    let env_key = if key.starts_with(ENV_PREFIX) {
        key.to_string()
    } else {
        format!("{}{}", ENV_PREFIX, key.to_ascii_uppercase())
    };
    std::env::var(env_key).unwrap_or_else(|_| default.to_string())
}

pub fn table_property_bool(header: &TableHeader, key: &str, default: bool) -> bool {
    table_property(header, key, if default { "true" } else { "false" })
        .trim()
        .eq_ignore_ascii_case("true")
}

pub fn table_property_i64(header: &TableHeader, key: &str, default: i64) -> i64 {
    table_property(header, key, &default.to_string())
        .trim()
        .parse()
        .unwrap_or(default)
}

/// bucketize 默认参数（配置文件 `[bucket]` 段）
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BucketDefaults {
    pub workers: usize,
    pub min_bucket_size: usize,
    pub bucket_size: usize,
    pub max_bucket_count: i64,
    pub pack_level: PackLevel,
    pub bucket_dirs: Vec<String>,
    pub grace_period_secs: u64,
}

impl Default for BucketDefaults {
    fn default() -> Self {
        Self {
            workers: DEFAULT_NUMBER_WORKERS,
            min_bucket_size: DEFAULT_MIN_BUCKET_SIZE,
            bucket_size: DEFAULT_BUCKET_SIZE,
            max_bucket_count: DEFAULT_MAX_BUCKET_COUNT,
            pack_level: PackLevel::Consolidate,
            bucket_dirs: Vec::new(),
            grace_period_secs: DEFAULT_GRACE_PERIOD.as_secs(),
        }
    }
}

impl BucketDefaults {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// 管理器配置（TOML）
///
/// ```toml
/// history_keep = 50
/// source_column = "PN"
///
/// [bucket]
/// workers = 8
/// bucket_size = 200
/// pack_level = "FULL_PACKING"
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// 保留的历史快照数；缺省保留全部
    pub history_keep: Option<usize>,
    pub source_column: String,
    /// TableCache 最多缓存的表数
    pub cache_capacity: usize,
    pub bucket: BucketDefaults,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            history_keep: None,
            source_column: "PN".to_string(),
            cache_capacity: 64,
            bucket: BucketDefaults::default(),
        }
    }
}

impl ManagerConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("gortable").join("config.toml"))
    }

    pub fn from_toml(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| {
            TableError::parse(format!("invalid config: {}", e), origin.display().to_string())
        })
    }

    /// 显式路径必须存在；默认路径不存在时使用内置默认值
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!("Loaded config {:?}", path);
                Self::from_toml(&text, &path)
            }
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(TableError::storage(&path, e)),
        }
    }

    pub fn retention(&self) -> HistoryRetention {
        HistoryRetention::from_keep(self.history_keep)
    }
}
