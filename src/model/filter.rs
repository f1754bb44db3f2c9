use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::model::entry::{nfc, DictionaryEntry};
use crate::model::range::GenomicRange;
use crate::model::relativize;

/// 条目选择器：各条件之间取交集，同一条件内部取并集
///
/// - 无任何条件 => identity（全部未删除条目）
/// - 已删除条目默认排除；bucket 条件生效时保留（回收 bucket 需要看到全部引用）
/// - files / buckets 统一按 root 相对路径比较
#[derive(Clone, Debug)]
pub struct DictionaryFilter {
    root: PathBuf,
    files: Option<HashSet<String>>,
    aliases: Option<HashSet<String>>,
    tags: Option<Vec<String>>,
    buckets: Option<HashSet<String>>,
    range: Option<GenomicRange>,
    include_deleted: bool,
    match_all_tags: bool,
}

impl DictionaryFilter {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            files: None,
            aliases: None,
            tags: None,
            buckets: None,
            range: None,
            include_deleted: false,
            match_all_tags: false,
        }
    }

    pub fn files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = self.files.get_or_insert_with(HashSet::new);
        for f in files {
            set.insert(relativize(&self.root, f.as_ref()));
        }
        self
    }

    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = self.aliases.get_or_insert_with(HashSet::new);
        set.extend(aliases.into_iter().map(|a| nfc(a.as_ref())));
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = self.tags.get_or_insert_with(Vec::new);
        list.extend(
            tags.into_iter()
                .map(|t| nfc(t.as_ref()))
                .filter(|t| !t.is_empty()),
        );
        self
    }

    pub fn buckets<I, S>(mut self, buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = self.buckets.get_or_insert_with(HashSet::new);
        for b in buckets {
            set.insert(relativize(&self.root, b.as_ref()));
        }
        self
    }

    pub fn range(mut self, range: GenomicRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn match_all_tags(mut self) -> Self {
        self.match_all_tags = true;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_identity(&self) -> bool {
        self.files.is_none()
            && self.aliases.is_none()
            && self.tags.is_none()
            && self.buckets.is_none()
            && self.range.is_none()
    }

    /// 可走 tag 索引的 tag 列表（非空时）
    pub fn lookup_tags(&self) -> Option<&[String]> {
        self.tags.as_deref().filter(|t| !t.is_empty())
    }

    pub fn lookup_aliases(&self) -> Option<&HashSet<String>> {
        self.aliases.as_ref().filter(|a| !a.is_empty())
    }

    pub fn matches(&self, entry: &DictionaryEntry) -> bool {
        let include_line =
            !entry.is_deleted() || self.include_deleted || self.buckets.is_some();
        include_line
            && self.match_files(entry)
            && self.match_aliases(entry)
            && self.match_tags(entry)
            && self.match_buckets(entry)
            && self.match_range(entry)
    }

    fn match_files(&self, entry: &DictionaryEntry) -> bool {
        self.files
            .as_ref()
            .map_or(true, |files| files.contains(entry.content()))
    }

    fn match_aliases(&self, entry: &DictionaryEntry) -> bool {
        self.aliases.as_ref().map_or(true, |aliases| {
            entry.alias().map_or(false, |a| aliases.contains(a))
        })
    }

    fn match_tags(&self, entry: &DictionaryEntry) -> bool {
        let Some(tags) = &self.tags else {
            return true;
        };
        let own = entry.filter_tags();
        if tags.is_empty() {
            return own.is_empty();
        }
        if self.match_all_tags {
            tags.iter().all(|t| own.contains(t))
        } else {
            tags.iter().any(|t| own.contains(t))
        }
    }

    fn match_buckets(&self, entry: &DictionaryEntry) -> bool {
        self.buckets.as_ref().map_or(true, |buckets| match entry.bucket() {
            None => buckets.is_empty(),
            Some(b) => buckets.contains(b),
        })
    }

    fn match_range(&self, entry: &DictionaryEntry) -> bool {
        self.range
            .as_ref()
            .map_or(true, |r| r.to_tab_string() == entry.range().to_tab_string())
    }
}
