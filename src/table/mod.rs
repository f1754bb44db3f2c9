pub mod dictionary;
pub mod entries;
pub mod file_table;
pub mod link;

pub use dictionary::{DictionaryTable, TableSnapshot};
pub use entries::TableEntries;
pub use file_table::{FileTable, RowEntry};
pub use link::LinkTable;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, TableError};
use crate::model::DictionaryEntry;
use crate::storage::{CommitOutcome, FileReader, PipelineRunner, TablePaths};

pub const DICTIONARY_EXT: &str = "gord";
pub const LINK_EXT: &str = "link";

/// 表变体对应的行工厂：catalog 行 <-> 条目
pub trait EntryFactory: Send + Sync {
    type Entry: Clone;

    fn parse(&self, line: &str) -> Result<Self::Entry>;
    fn format(&self, entry: &Self::Entry) -> String;
}

/// 所有表变体共享的操作契约
///
/// 修改只作用于内存（或事务目录）；`commit_request` + `commit` 之后才对外可见。
pub trait TableOps {
    type Entry: Clone;

    fn paths(&self) -> &TablePaths;

    fn insert(&mut self, entries: Vec<Self::Entry>) -> Result<usize>;

    fn delete(&mut self, entries: &[Self::Entry]) -> Result<usize>;

    fn filter(&self, pred: &dyn Fn(&Self::Entry) -> bool) -> Result<Vec<Self::Entry>>;

    fn commit_request(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<CommitOutcome>;

    /// 放弃未提交的修改
    fn abort(&mut self);

    fn save(&mut self) -> Result<CommitOutcome> {
        if let Err(e) = self.commit_request() {
            self.abort();
            return Err(e);
        }
        self.commit()
    }
}

/// 表变体（封闭集合）
pub enum Table {
    Dictionary(DictionaryTable),
    File(FileTable),
    Link(LinkTable),
}

impl Table {
    /// 按扩展名选择变体：`.gord` / `.link` / 其他视为数据文件表
    pub fn open(
        path: &Path,
        reader: Arc<dyn FileReader>,
        pipeline: Arc<dyn PipelineRunner>,
    ) -> Result<Table> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(DICTIONARY_EXT) => Ok(Table::Dictionary(DictionaryTable::open(path, reader)?)),
            Some(LINK_EXT) => Ok(Table::Link(LinkTable::open(path, reader)?)),
            _ => Ok(Table::File(FileTable::open(path, reader, pipeline)?)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Table::Dictionary(_) => "dictionary",
            Table::File(_) => "file",
            Table::Link(_) => "link",
        }
    }

    pub fn paths(&self) -> &TablePaths {
        match self {
            Table::Dictionary(t) => t.paths(),
            Table::File(t) => t.paths(),
            Table::Link(t) => t.paths(),
        }
    }

    /// 以字典条目形式插入：字典表按条目 upsert，数据文件表合并条目指向的文件
    pub fn insert_entries(&mut self, entries: Vec<DictionaryEntry>) -> Result<usize> {
        match self {
            Table::Dictionary(t) => t.insert(entries),
            Table::File(t) => {
                let files: Vec<PathBuf> = entries
                    .iter()
                    .map(|e| crate::model::resolve(&t.paths().root, e.content()))
                    .collect();
                t.insert_files(&files)
            }
            Table::Link(t) => t.insert(entries),
        }
    }

    pub fn delete_entries(&mut self, entries: &[DictionaryEntry]) -> Result<usize> {
        match self {
            Table::Dictionary(t) => t.delete(entries),
            Table::Link(t) => t.delete(entries),
            Table::File(_) => Err(TableError::Unsupported(
                "delete by dictionary entry is not supported for file tables".to_string(),
            )),
        }
    }

    /// 当前内容的行（不含表头）
    pub fn lines(&self) -> Result<Vec<String>> {
        match self {
            Table::Dictionary(t) => Ok(t.all_entries().iter().map(|e| e.to_line()).collect()),
            Table::File(t) => t.rows().map(|rows| rows.into_iter().map(|r| r.into_line()).collect()),
            Table::Link(t) => Ok(t.target().all_entries().iter().map(|e| e.to_line()).collect()),
        }
    }

    pub fn commit_request(&mut self) -> Result<()> {
        match self {
            Table::Dictionary(t) => t.commit_request(),
            Table::File(t) => t.commit_request(),
            Table::Link(t) => t.commit_request(),
        }
    }

    pub fn commit(&mut self) -> Result<CommitOutcome> {
        match self {
            Table::Dictionary(t) => t.commit(),
            Table::File(t) => t.commit(),
            Table::Link(t) => t.commit(),
        }
    }

    pub fn save(&mut self) -> Result<CommitOutcome> {
        match self {
            Table::Dictionary(t) => t.save(),
            Table::File(t) => t.save(),
            Table::Link(t) => t.save(),
        }
    }

    pub fn set_use_history(&mut self, use_history: bool) {
        match self {
            Table::Dictionary(t) => t.set_use_history(use_history),
            Table::File(t) => t.set_use_history(use_history),
            Table::Link(t) => t.target_mut().set_use_history(use_history),
        }
    }

    pub fn as_dictionary(&self) -> Option<&DictionaryTable> {
        match self {
            Table::Dictionary(t) => Some(t),
            Table::Link(t) => Some(t.target()),
            Table::File(_) => None,
        }
    }
}
