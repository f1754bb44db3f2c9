pub mod entry;
pub mod filter;
pub mod header;
pub mod range;

pub use entry::{DictionaryEntry, EntryBuilder};
pub use filter::DictionaryFilter;
pub use header::TableHeader;
pub use range::GenomicRange;

use std::path::{Path, PathBuf};

/// 逻辑路径规范化：反斜杠统一为 `/`
pub fn normalize_logical(p: &str) -> String {
    p.trim().replace('\\', "/")
}

/// 带 scheme 的 URI（s3://、http:// 等）不参与 root 相对化
pub fn is_uri(p: &str) -> bool {
    p.contains("://")
}

/// 把路径转为相对 root 的逻辑路径；root 之外的绝对路径与 URI 原样保留
pub fn relativize(root: &Path, p: &str) -> String {
    let p = normalize_logical(p);
    if is_uri(&p) {
        return p;
    }
    let root_str = normalize_logical(&root.to_string_lossy());
    let root_str = root_str.trim_end_matches('/');
    if !root_str.is_empty() {
        if let Some(rest) = p.strip_prefix(root_str) {
            if let Some(rel) = rest.strip_prefix('/') {
                return rel.to_string();
            }
        }
    }
    p.strip_prefix("./").map(str::to_string).unwrap_or(p)
}

/// 逻辑路径 -> 物理路径（相对路径基于 root 解析）
pub fn resolve(root: &Path, p: &str) -> PathBuf {
    if is_uri(p) || Path::new(p).is_absolute() {
        PathBuf::from(p)
    } else {
        root.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relativize_strips_root_only() {
        let root = Path::new("/data/proj");
        assert_eq!(relativize(root, "/data/proj/a/f.gor"), "a/f.gor");
        assert_eq!(relativize(root, "/data/project/f.gor"), "/data/project/f.gor");
        assert_eq!(relativize(root, "./f.gor"), "f.gor");
        assert_eq!(relativize(root, "a\\b.gor"), "a/b.gor");
        assert_eq!(relativize(root, "s3://bucket/x.gor"), "s3://bucket/x.gor");
    }

    #[test]
    fn resolve_keeps_absolute_and_uri() {
        let root = Path::new("/data/proj");
        assert_eq!(resolve(root, "f.gor"), PathBuf::from("/data/proj/f.gor"));
        assert_eq!(resolve(root, "/abs/f.gor"), PathBuf::from("/abs/f.gor"));
        assert_eq!(resolve(root, "s3://b/f.gor"), PathBuf::from("s3://b/f.gor"));
    }
}
