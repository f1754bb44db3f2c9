use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, TableError};
use crate::model::{is_uri, DictionaryEntry};
use crate::storage::{
    CommitOutcome, CommitSupport, FileReader, HistoryAction, HistoryRecord, TablePaths,
};
use crate::table::dictionary::DictionaryTable;
use crate::table::TableOps;

/// 链接表：`.link` 文件内容是指向某个字典表的单个 URI
///
/// 读操作委托给目标表；条目修改不支持，只能通过 `link` 整体替换目标。
pub struct LinkTable {
    paths: TablePaths,
    reader: Arc<dyn FileReader>,
    uri: String,
    target: DictionaryTable,
    replacement: Option<String>,
    identity: Option<String>,
    support: CommitSupport,
}

impl LinkTable {
    pub fn open(path: &Path, reader: Arc<dyn FileReader>) -> Result<Self> {
        let identity = reader.identity(path)?;
        if identity.is_none() {
            return Err(TableError::Data(format!(
                "Link file {:?} does not exist",
                path
            )));
        }
        let uri = read_link(path, reader.as_ref())?;
        let target = DictionaryTable::open(&resolve_link(path, &uri), reader.clone())?;
        let paths = TablePaths::from_main(path);
        Ok(Self {
            support: CommitSupport::new(paths.clone(), reader.clone()),
            paths,
            reader,
            uri,
            target,
            replacement: None,
            identity,
        })
    }

    /// 新建链接文件（原子写入）并打开
    pub fn create(path: &Path, uri: &str, reader: Arc<dyn FileReader>) -> Result<Self> {
        let paths = TablePaths::from_main(path);
        let mut support = CommitSupport::new(paths, reader.clone());
        support.log(HistoryRecord::new(HistoryAction::Link, "", uri.trim().to_string()));
        support.stage_main(format!("{}\n", uri.trim()).as_bytes())?;
        support.commit(b"", 0)?;
        Self::open(path, reader)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn target_path(&self) -> PathBuf {
        resolve_link(&self.paths.main, &self.uri)
    }

    pub fn target(&self) -> &DictionaryTable {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut DictionaryTable {
        &mut self.target
    }

    /// 暂存新的目标；commit 时生效
    pub fn link(&mut self, uri: &str) {
        self.replacement = Some(uri.trim().to_string());
    }

    fn reload(&mut self) -> Result<()> {
        self.identity = self.reader.identity(&self.paths.main)?;
        self.uri = read_link(&self.paths.main, self.reader.as_ref())?;
        self.target = DictionaryTable::open(&self.target_path(), self.reader.clone())?;
        Ok(())
    }
}

fn read_link(path: &Path, reader: &dyn FileReader) -> Result<String> {
    let uri = reader.read_lines(path)?.join("\n").trim().to_string();
    if uri.is_empty() {
        return Err(TableError::parse("Link file is empty", path.display().to_string()));
    }
    Ok(uri)
}

/// 相对 URI 基于链接文件所在目录解析
fn resolve_link(link: &Path, uri: &str) -> PathBuf {
    if is_uri(uri) || Path::new(uri).is_absolute() {
        return PathBuf::from(uri);
    }
    match link.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(uri),
        _ => PathBuf::from(uri),
    }
}

impl TableOps for LinkTable {
    type Entry = DictionaryEntry;

    fn paths(&self) -> &TablePaths {
        &self.paths
    }

    fn insert(&mut self, _entries: Vec<DictionaryEntry>) -> Result<usize> {
        Err(TableError::Unsupported(
            "Can not insert entries into a link table, use link(<new dictionary>)".to_string(),
        ))
    }

    fn delete(&mut self, _entries: &[DictionaryEntry]) -> Result<usize> {
        Err(TableError::Unsupported(
            "Can not delete entries from a link table, use link(<new dictionary>)".to_string(),
        ))
    }

    fn filter(&self, pred: &dyn Fn(&DictionaryEntry) -> bool) -> Result<Vec<DictionaryEntry>> {
        TableOps::filter(&self.target, pred)
    }

    fn commit_request(&mut self) -> Result<()> {
        self.support.verify_unchanged(self.identity.as_deref())?;
        match self.replacement.clone() {
            Some(uri) => {
                let new_target = resolve_link(&self.paths.main, &uri);
                if !is_uri(&uri) && !self.reader.exists(&new_target) {
                    return Err(TableError::Data(format!(
                        "Link target {:?} does not exist",
                        new_target
                    )));
                }
                self.support
                    .log(HistoryRecord::new(HistoryAction::Link, "", uri.clone()));
                self.support.stage_main(format!("{}\n", uri).as_bytes())?;
                Ok(())
            }
            None => self.target.commit_request(),
        }
    }

    fn commit(&mut self) -> Result<CommitOutcome> {
        if self.replacement.is_none() {
            return self.target.commit();
        }
        let old_target = self.target.paths().clone();
        let outcome = self.support.commit(b"", 0)?;
        self.replacement = None;
        self.reload()?;

        if old_target.main != self.target.paths().main {
            if let Err(e) = self.reader.delete_dir(&old_target.folder) {
                tracing::warn!("Failed to remove old link target folder {:?}: {}", old_target.folder, e);
            }
        }
        tracing::info!("Link {:?} now points to {}", self.paths.main, self.uri);
        Ok(outcome)
    }

    fn abort(&mut self) {
        self.replacement = None;
        self.support.abort();
        self.target.abort();
    }
}
