use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TableError};
use crate::storage::now_nanos;
use crate::storage::source::FileReader;

/// 快照保留策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HistoryRetention {
    #[default]
    KeepAll,
    /// 只保留最近 n 个快照（action log 不裁剪）
    KeepLast(usize),
}

impl HistoryRetention {
    /// 配置值：缺省/0 => KeepAll
    pub fn from_keep(keep: Option<usize>) -> Self {
        match keep {
            Some(n) if n > 0 => HistoryRetention::KeepLast(n),
            _ => HistoryRetention::KeepAll,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "ADDTOBUCKET")]
    AddToBucket,
    #[serde(rename = "REMOVEFROMBUCKET")]
    RemoveFromBucket,
    #[serde(rename = "LINK")]
    Link,
}

/// action log 一行（JSON lines）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp_ms: u64,
    pub serial: u64,
    pub action: HistoryAction,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bucket: String,
    pub line: String,
}

impl HistoryRecord {
    pub fn new(action: HistoryAction, bucket: &str, line: String) -> Self {
        Self {
            timestamp_ms: now_nanos() / 1_000_000,
            serial: 0,
            action,
            bucket: bucket.to_string(),
            line,
        }
    }
}

/// 历史存储（append-only）
///
/// - 快照：`<name>.snap-<id:016x>.<ext>`，id 单调递增（按 commit 顺序）
/// - action log：`<name>.log`
///
/// 只由 commit 写入；普通查询路径从不读取。
pub struct HistoryStore {
    dir: PathBuf,
    name: String,
    ext: String,
    retention: HistoryRetention,
    reader: Arc<dyn FileReader>,
}

impl HistoryStore {
    pub fn new(
        dir: PathBuf,
        name: &str,
        ext: &str,
        retention: HistoryRetention,
        reader: Arc<dyn FileReader>,
    ) -> Self {
        Self {
            dir,
            name: name.to_string(),
            ext: ext.to_string(),
            retention,
            reader,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.name))
    }

    /// 归档被替换的 catalog 内容，返回快照 id
    pub fn archive(&self, previous: &[u8]) -> Result<u64> {
        self.reader.create_dirs(&self.dir)?;
        let last = self.snapshots()?.last().map(|(id, _)| *id).unwrap_or(0);
        let id = now_nanos().max(last + 1);
        let path = self
            .dir
            .join(format!("{}.snap-{id:016x}.{}", self.name, self.ext));
        self.reader.write_durable(&path, previous)?;
        tracing::debug!("History snapshot {:?}", path);

        self.apply_retention()?;
        Ok(id)
    }

    pub fn append_log(&self, records: &[HistoryRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for r in records {
            let json = serde_json::to_string(r)
                .map_err(|e| TableError::Data(format!("history record: {}", e)))?;
            buf.push_str(&json);
            buf.push('\n');
        }
        self.reader.create_dirs(&self.dir)?;
        self.reader.append(&self.log_path(), buf.as_bytes())
    }

    pub fn read_log(&self) -> Result<Vec<HistoryRecord>> {
        let path = self.log_path();
        if !self.reader.exists(&path) {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for line in self.reader.read_lines(&path)? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(r) => out.push(r),
                // 截断的尾行：停止读取（与 WAL 回放一致的保守策略）
                Err(e) => {
                    tracing::warn!("History log {:?} has unreadable record: {}", path, e);
                    break;
                }
            }
        }
        Ok(out)
    }

    /// 快照列表（按 id 升序）
    pub fn snapshots(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut out: Vec<(u64, PathBuf)> = self
            .reader
            .list(&self.dir)?
            .into_iter()
            .filter_map(|p| parse_snapshot_id(&p, &self.name).map(|id| (id, p)))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        Ok(out)
    }

    /// 按保留策略删除最旧的快照，返回删除数
    pub fn apply_retention(&self) -> Result<usize> {
        let HistoryRetention::KeepLast(keep) = self.retention else {
            return Ok(0);
        };
        let snaps = self.snapshots()?;
        let excess = snaps.len().saturating_sub(keep);
        for (_, p) in snaps.iter().take(excess) {
            self.reader.delete(p)?;
        }
        Ok(excess)
    }
}

fn parse_snapshot_id(path: &Path, name: &str) -> Option<u64> {
    let file = path.file_name()?.to_str()?;
    let rest = file.strip_prefix(name)?.strip_prefix(".snap-")?;
    let hex = rest.split('.').next()?;
    u64::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::source::LocalFileReader;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("gor-table-history-{}-{}", tag, nanos))
    }

    #[test]
    fn snapshots_are_strictly_ordered() {
        let dir = unique_tmp_dir("order");
        let store = HistoryStore::new(
            dir.clone(),
            "t",
            "gord",
            HistoryRetention::KeepAll,
            LocalFileReader::shared(),
        );
        let a = store.archive(b"v1\n").unwrap();
        let b = store.archive(b"v2\n").unwrap();
        assert!(b > a);

        let snaps = store.snapshots().unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(std::fs::read_to_string(&snaps[1].1).unwrap(), "v2\n");
    }

    #[test]
    fn keep_last_prunes_oldest() {
        let dir = unique_tmp_dir("retention");
        let store = HistoryStore::new(
            dir,
            "t",
            "gord",
            HistoryRetention::KeepLast(2),
            LocalFileReader::shared(),
        );
        for i in 0..4 {
            store.archive(format!("v{}\n", i).as_bytes()).unwrap();
        }
        let snaps = store.snapshots().unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(std::fs::read_to_string(&snaps[0].1).unwrap(), "v2\n");
    }

    #[test]
    fn action_log_round_trips() {
        let dir = unique_tmp_dir("log");
        let store = HistoryStore::new(
            dir,
            "t",
            "gord",
            HistoryRetention::KeepAll,
            LocalFileReader::shared(),
        );
        let r1 = HistoryRecord::new(HistoryAction::Insert, "", "f1\tA".into());
        let r2 = HistoryRecord::new(HistoryAction::AddToBucket, "b.gor", "f1\tA".into());
        store.append_log(&[r1.clone()]).unwrap();
        store.append_log(&[r2.clone()]).unwrap();
        assert_eq!(store.read_log().unwrap(), vec![r1, r2]);

        let text = std::fs::read_to_string(store.log_path()).unwrap();
        assert!(text.contains("\"ADDTOBUCKET\""));
    }

    #[test]
    fn retention_from_config() {
        assert_eq!(HistoryRetention::from_keep(None), HistoryRetention::KeepAll);
        assert_eq!(HistoryRetention::from_keep(Some(0)), HistoryRetention::KeepAll);
        assert_eq!(HistoryRetention::from_keep(Some(3)), HistoryRetention::KeepLast(3));
    }
}
