use std::path::{Path, PathBuf};

pub const HISTORY_DIR_NAME: &str = "history";
pub const TRANSACTIONS_DIR_NAME: &str = "transactions";

/// 表的物理布局
///
/// ```text
/// <root>/<name>.<ext>                 canonical 文件
/// <root>/.<name>/history/             历史快照 + action log
/// <root>/.<name>/transactions/<tx>/   事务 scratch 目录
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TablePaths {
    pub main: PathBuf,
    pub root: PathBuf,
    pub name: String,
    pub ext: String,
    pub folder: PathBuf,
    pub history: PathBuf,
    pub transactions: PathBuf,
}

impl TablePaths {
    pub fn from_main(main: &Path) -> Self {
        let root = main
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = main
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = main
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let folder = root.join(format!(".{}", name));
        Self {
            main: main.to_path_buf(),
            history: folder.join(HISTORY_DIR_NAME),
            transactions: folder.join(TRANSACTIONS_DIR_NAME),
            root,
            name,
            ext,
            folder,
        }
    }

    /// 事务内临时文件名：`<prefix>_<rand>[.<ext>]`
    pub fn temp_name(prefix: &str, suffix: &str, ext: &str) -> String {
        if ext.is_empty() {
            format!("{}_{}", prefix, suffix)
        } else {
            format!("{}_{}.{}", prefix, suffix, ext)
        }
    }

    /// 表 id：canonical 路径的 xxh3
    pub fn table_id(&self) -> String {
        format!(
            "{:016x}",
            xxhash_rust::xxh3::xxh3_64(self.main.to_string_lossy().as_bytes())
        )
    }
}
