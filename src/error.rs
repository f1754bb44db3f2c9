use std::path::{Path, PathBuf};

use thiserror::Error;

/// 表引擎错误分类
///
/// - 数据类（Parse / ArgumentCount / AmbiguousIdentity / Data）：在任何 staging 之前拒绝，重试无意义
/// - 资源类（Storage / Stale）：可由调用方重试
#[derive(Debug, Error)]
pub enum TableError {
    #[error("parse error: {message} (input: {input:?})")]
    Parse { message: String, input: String },

    #[error("argument count mismatch: length of {what} list must be the same as number of files ({expected}), got {actual}")]
    ArgumentCount {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("One or more entries containing the same tag(s) already exist ({count} matches for tags [{tags}])")]
    AmbiguousIdentity { tags: String, count: usize },

    #[error("data error: {0}")]
    Data(String),

    #[error("storage error on {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("table {path:?} changed on storage since it was loaded")]
    Stale { path: PathBuf },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("pipeline failed for {output:?}: {message}")]
    Pipeline { output: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, TableError>;

impl TableError {
    pub fn parse(message: impl Into<String>, input: impl Into<String>) -> Self {
        TableError::Parse {
            message: message.into(),
            input: input.into(),
        }
    }

    pub fn storage(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        TableError::Storage {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// 资源类错误可重试；数据类错误不可
    pub fn is_retryable(&self) -> bool {
        matches!(self, TableError::Storage { .. } | TableError::Stale { .. })
    }
}

/// io::Result -> TableError::Storage（附带路径）
pub trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| TableError::storage(path, e))
    }
}
