use std::fmt;
use std::path::PathBuf;

use crate::cache::CacheStats;
use crate::error::Result;
use crate::table::DictionaryTable;

/// 表概况（`info` 命令输出）
#[derive(Clone, Debug, Default)]
pub struct TableStats {
    pub path: PathBuf,
    /// dictionary / file / link
    pub kind: String,
    /// link 表指向的字典
    pub target: Option<PathBuf>,
    pub serial: u64,
    /// 活动条目
    pub entries: usize,
    /// 软删除（仍引用 bucket）条目
    pub deleted: usize,
    pub buckets: usize,
    pub unbucketized: usize,
    /// 文件表的数据行数
    pub rows: usize,
    pub catalog_bytes: u64,
    pub history_snapshots: usize,
    pub history_records: usize,
    pub cache: Option<CacheStats>,
}

impl TableStats {
    pub fn for_dictionary(table: &DictionaryTable) -> Result<Self> {
        let history = table.history();
        let all = table.all_entries();
        Ok(Self {
            path: table.path().to_path_buf(),
            kind: "dictionary".to_string(),
            target: None,
            serial: table.header().serial(),
            entries: all.iter().filter(|e| !e.is_deleted()).count(),
            deleted: all.iter().filter(|e| e.is_deleted()).count(),
            buckets: table.buckets().len(),
            unbucketized: table.needs_bucketizing().len(),
            rows: 0,
            catalog_bytes: table.format().len() as u64,
            history_snapshots: history.snapshots()?.len(),
            history_records: history.read_log()?.len(),
            cache: None,
        })
    }

    /// 已打包进 bucket 的活动条目比例
    pub fn bucketized_ratio(&self) -> f64 {
        if self.entries == 0 {
            return 1.0;
        }
        (self.entries - self.unbucketized.min(self.entries)) as f64 / self.entries as f64
    }
}

fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           gor-table Info                         ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║ table:  {}", self.path.display())?;
        writeln!(f, "║ kind:   {:<10}  serial: {:>10}           ║", self.kind, self.serial)?;
        if let Some(target) = &self.target {
            writeln!(f, "║ target: {}", target.display())?;
        }
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        if self.kind == "file" {
            writeln!(f, "║   rows:         {:>10}                       ║", self.rows)?;
        } else {
            writeln!(f, "║   entries:      {:>10}                       ║", self.entries)?;
            writeln!(f, "║   deleted:      {:>10}                       ║", self.deleted)?;
            writeln!(f, "║   buckets:      {:>10}                       ║", self.buckets)?;
            writeln!(
                f,
                "║   unbucketized: {:>10}  ({:>5.1}% packed)       ║",
                self.unbucketized,
                self.bucketized_ratio() * 100.0
            )?;
        }
        writeln!(
            f,
            "║   size:         {:>10}                       ║",
            human_bytes(self.catalog_bytes)
        )?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ History:                                         ║")?;
        writeln!(
            f,
            "║   snapshots:    {:>10}                       ║",
            self.history_snapshots
        )?;
        writeln!(
            f,
            "║   log records:  {:>10}                       ║",
            self.history_records
        )?;
        if let Some(c) = &self.cache {
            writeln!(f, "╠──────────────────────────────────────────────────╣")?;
            writeln!(f, "║ TableCache:                                      ║")?;
            writeln!(f, "║   entries:      {:>10}                       ║", c.entries)?;
            writeln!(
                f,
                "║   hits/misses:  {:>10}                       ║",
                format!("{}/{}", c.hits, c.misses)
            )?;
            writeln!(f, "║   reloads:      {:>10}                       ║", c.reloads)?;
        }
        write!(f, "╚══════════════════════════════════════════════════╝")
    }
}
