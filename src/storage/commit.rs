use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, TableError};
use crate::storage::history::{HistoryRecord, HistoryRetention, HistoryStore};
use crate::storage::layout::TablePaths;
use crate::storage::random_suffix;
use crate::storage::source::FileReader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitState {
    Idle,
    Staged,
    Committed,
}

/// commit 结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// canonical 文件是否被替换/创建
    pub published: bool,
    /// 归档的历史快照 id
    pub snapshot: Option<u64>,
    /// 已发布但 history 归档/action log 写入失败
    pub history_error: Option<String>,
}

/// 两阶段提交支持
///
/// 状态机：Idle → Staged → Committed（下一次 staging 重新进入 Staged）
///
/// 1) staging：把新 catalog 写到事务目录中的临时主文件（随机后缀），fsync
/// 2) commit：rename(temp, canonical) 原子替换 → 删除事务目录
///    → 若无 staged 内容且 canonical 不存在，写只含表头的空表
///    → 归档被替换的旧内容到 history（可关闭）
///
/// 安全性：
/// - staging 失败时 canonical 不受影响
/// - rename 之前放弃（abort）没有任何可见效果
/// - rename 之后即持久，只能通过后续补偿性修改或 history 回滚撤销
pub struct CommitSupport {
    paths: TablePaths,
    reader: Arc<dyn FileReader>,
    use_history: bool,
    retention: HistoryRetention,
    state: CommitState,
    tx_dir: Option<PathBuf>,
    temp_main: Option<PathBuf>,
    pending_log: Vec<HistoryRecord>,
}

impl CommitSupport {
    pub fn new(paths: TablePaths, reader: Arc<dyn FileReader>) -> Self {
        Self {
            paths,
            reader,
            use_history: true,
            retention: HistoryRetention::KeepAll,
            state: CommitState::Idle,
            tx_dir: None,
            temp_main: None,
            pending_log: Vec::new(),
        }
    }

    pub fn paths(&self) -> &TablePaths {
        &self.paths
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    pub fn use_history(&self) -> bool {
        self.use_history
    }

    pub fn set_use_history(&mut self, use_history: bool) {
        self.use_history = use_history;
    }

    pub fn set_retention(&mut self, retention: HistoryRetention) {
        self.retention = retention;
    }

    pub fn history(&self) -> HistoryStore {
        HistoryStore::new(
            self.paths.history.clone(),
            &self.paths.name,
            &self.paths.ext,
            self.retention,
            self.reader.clone(),
        )
    }

    /// 记录一条待提交的 action（commit 时写入 action log）
    pub fn log(&mut self, record: HistoryRecord) {
        if self.use_history {
            self.pending_log.push(record);
        }
    }

    /// canonical 文件自加载后未被替换，否则 Stale
    pub fn verify_unchanged(&self, loaded_identity: Option<&str>) -> Result<()> {
        let current = self.reader.identity(&self.paths.main)?;
        if current.as_deref() != loaded_identity {
            return Err(TableError::Stale {
                path: self.paths.main.clone(),
            });
        }
        Ok(())
    }

    /// 事务 scratch 目录（惰性创建）
    pub fn transaction_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.tx_dir {
            return Ok(dir.clone());
        }
        let dir = self
            .paths
            .transactions
            .join(format!("{}_{}", self.paths.name, random_suffix()));
        self.reader.create_dirs(&dir)?;
        self.tx_dir = Some(dir.clone());
        Ok(dir)
    }

    /// 事务目录中的新临时文件路径
    pub fn new_temp_path(&mut self, prefix: &str, ext: &str) -> Result<PathBuf> {
        let dir = self.transaction_dir()?;
        Ok(dir.join(TablePaths::temp_name(prefix, &random_suffix(), ext)))
    }

    pub fn temp_main(&self) -> Option<&Path> {
        self.temp_main.as_deref()
    }

    /// 把提议的新 catalog 内容写入临时主文件
    pub fn stage_main(&mut self, content: &[u8]) -> Result<PathBuf> {
        let path = self.temp_main_path()?;
        self.reader.write_durable(&path, content)?;
        self.temp_main = Some(path.clone());
        self.state = CommitState::Staged;
        Ok(path)
    }

    /// 把事务内已物化的结果文件移动为临时主文件
    pub fn stage_main_from(&mut self, file: &Path) -> Result<PathBuf> {
        let path = self.temp_main_path()?;
        self.reader.replace(file, &path)?;
        self.temp_main = Some(path.clone());
        self.state = CommitState::Staged;
        Ok(path)
    }

    fn temp_main_path(&mut self) -> Result<PathBuf> {
        if let Some(p) = &self.temp_main {
            return Ok(p.clone());
        }
        let dir = self.transaction_dir()?;
        let file = if self.paths.ext.is_empty() {
            self.paths.name.clone()
        } else {
            format!("{}.{}", self.paths.name, self.paths.ext)
        };
        Ok(dir.join(file))
    }

    /// 发布 staged 内容；`empty_content` 用于首次创建空表
    pub fn commit(&mut self, empty_content: &[u8], serial: u64) -> Result<CommitOutcome> {
        let main = self.paths.main.clone();

        // 被替换的旧内容（仅 history 开启时读取）
        let previous = if self.use_history && self.reader.exists(&main) {
            Some(self.reader.read_lines(&main)?)
        } else {
            None
        };

        let mut outcome = CommitOutcome::default();
        match self.temp_main.take() {
            Some(temp) if self.reader.exists(&temp) => {
                self.reader.replace(&temp, &main)?;
                outcome.published = true;
            }
            _ if !self.reader.exists(&main) => {
                let temp = self.temp_main_path()?;
                self.reader.write_durable(&temp, empty_content)?;
                self.reader.replace(&temp, &main)?;
                outcome.published = true;
            }
            _ => {}
        }
        self.cleanup_transaction();

        // rename 之后修改已持久，history 失败只记录，不回报为提交失败
        if self.use_history {
            let previous = previous.filter(|_| outcome.published);
            match self.record_history(previous, serial) {
                Ok(snapshot) => outcome.snapshot = snapshot,
                Err(e) => {
                    tracing::warn!("History for {:?} not recorded: {}", main, e);
                    outcome.history_error = Some(e.to_string());
                }
            }
        }

        self.state = CommitState::Committed;
        if outcome.published {
            tracing::info!(
                "Committed {:?} (serial {}, snapshot {:?})",
                main,
                serial,
                outcome.snapshot
            );
        }
        Ok(outcome)
    }

    fn record_history(
        &mut self,
        previous: Option<Vec<String>>,
        serial: u64,
    ) -> Result<Option<u64>> {
        let history = self.history();
        let mut records = std::mem::take(&mut self.pending_log);
        for r in records.iter_mut() {
            r.serial = serial;
        }
        history.append_log(&records)?;
        let Some(lines) = previous else {
            return Ok(None);
        };
        let mut text = lines.join("\n");
        text.push('\n');
        history.archive(text.as_bytes()).map(Some)
    }

    /// 放弃 staged 内容：删除事务目录，canonical 不受影响
    pub fn abort(&mut self) {
        self.temp_main = None;
        self.pending_log.clear();
        self.cleanup_transaction();
        self.state = CommitState::Idle;
    }

    fn cleanup_transaction(&mut self) {
        if let Some(dir) = self.tx_dir.take() {
            if let Err(e) = self.reader.delete_dir(&dir) {
                tracing::warn!("Failed to remove transaction dir {:?}: {}", dir, e);
            }
        }
    }
}
