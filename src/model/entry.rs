use std::path::Path;

use unicode_normalization::UnicodeNormalization;

use crate::error::{Result, TableError};
use crate::model::range::GenomicRange;
use crate::model::{normalize_logical, relativize};

/// 字典条目：catalog 中的一行
///
/// 构造后不可变；任何修改都产生新值（`with_bucket` / `as_deleted` 等）。
/// `filter_tags` 与 `key` 在构造时计算一次。
#[derive(Clone, Debug, PartialEq)]
pub struct DictionaryEntry {
    content: String,
    alias: Option<String>,
    tags: Vec<String>,
    range: GenomicRange,
    bucket: Option<String>,
    deleted: bool,
    source_inserted: bool,
    filter_tags: Vec<String>,
    key: String,
}

impl DictionaryEntry {
    pub fn builder(content: &str, root: &Path) -> EntryBuilder {
        EntryBuilder::new(content, root)
    }

    /// 解析一行 catalog：
    /// `<path>[|[D|]<bucket>]\t<alias>\t<chr>\t<pos>\t<chr>\t<pos>\t<tags>`
    pub fn parse_line(line: &str, root: &Path) -> Result<Self> {
        let line = line.trim_end_matches(&['\n', '\r'][..]);
        let cols: Vec<&str> = line.split('\t').collect();

        let (content, deleted, bucket) = parse_first_column(cols[0]);
        if content.is_empty() {
            return Err(TableError::parse("Entry is missing content path", line));
        }

        let mut builder = EntryBuilder::new(content, root).deleted(deleted);
        if let Some(b) = bucket {
            builder = builder.bucket(b);
        }
        if let Some(alias) = cols.get(1) {
            builder = builder.alias(alias);
        }

        if cols.len() > 2 {
            if cols.len() < 6 {
                return Err(TableError::parse(
                    "Expected 4 columns for genomic range specification",
                    line,
                ));
            }
            builder = builder.range(GenomicRange::parse(&cols[2..6].join("\t"))?);
        }

        if cols.len() == 7 {
            builder = builder.tags(cols[6].split(','));
        } else if cols.len() > 7 {
            builder = builder.tags(cols[6..].iter().copied());
        }

        Ok(builder.build())
    }

    /// 序列化为 catalog 行；可选字段全部缺省时裁掉尾部空列
    pub fn to_line(&self) -> String {
        let mut line = self.content.clone();
        if let Some(bucket) = &self.bucket {
            if self.deleted {
                line.push_str("|D");
            }
            line.push('|');
            line.push_str(bucket);
        }

        let alias = self.alias.as_deref().unwrap_or("");
        if self.tags.is_empty() && self.range.is_empty() {
            if !alias.is_empty() {
                line.push('\t');
                line.push_str(alias);
            }
            return line;
        }

        line.push('\t');
        line.push_str(alias);
        line.push('\t');
        line.push_str(&self.range.to_tab_string());
        if !self.tags.is_empty() {
            line.push('\t');
            line.push_str(&self.tags.join(","));
        }
        line
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn range(&self) -> &GenomicRange {
        &self.range
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    pub fn has_bucket(&self) -> bool {
        self.bucket.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_source_inserted(&self) -> bool {
        self.source_inserted
    }

    /// 用于 tag 过滤的标签：tags 非空取 tags，否则取 alias
    pub fn filter_tags(&self) -> &[String] {
        &self.filter_tags
    }

    /// 去重 key：content + filter tags + range
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 去重判等：key 相同且删除状态相同；双方都已删除时 bucket 也必须相同
    /// （bucket 文件回收前，已删除行仍需指明其所属 bucket）
    pub fn same_identity(&self, other: &DictionaryEntry) -> bool {
        self.key == other.key
            && self.deleted == other.deleted
            && (!self.deleted || self.bucket == other.bucket)
    }

    /// 展示/匹配用的 tag 集合是否相同（顺序无关）
    pub fn same_tag_set(&self, other: &DictionaryEntry) -> bool {
        let mut a: Vec<&str> = self.filter_tags.iter().map(String::as_str).collect();
        let mut b: Vec<&str> = other.filter_tags.iter().map(String::as_str).collect();
        a.sort_unstable();
        a.dedup();
        b.sort_unstable();
        b.dedup();
        a == b
    }

    pub fn with_bucket(&self, bucket: &str) -> Self {
        self.rebuild(|b| b.bucket = Some(bucket.to_string()))
    }

    pub fn without_bucket(&self) -> Self {
        self.rebuild(|b| b.bucket = None)
    }

    pub fn as_deleted(&self) -> Self {
        self.rebuild(|b| b.deleted = true)
    }

    pub fn as_source_inserted(&self) -> Self {
        self.rebuild(|b| b.source_inserted = true)
    }

    /// tagskey upsert：保留 tags 与 range，仅替换 content 与 alias
    pub fn with_content_and_alias(&self, content: &str, alias: Option<&str>) -> Self {
        self.rebuild(|b| {
            b.content = content.to_string();
            b.alias = alias.map(str::to_string);
            b.bucket = None;
            b.deleted = false;
        })
    }

    fn rebuild(&self, f: impl FnOnce(&mut EntryBuilder)) -> Self {
        let mut b = EntryBuilder {
            content: self.content.clone(),
            alias: self.alias.clone(),
            tags: self.tags.clone(),
            range: self.range.clone(),
            bucket: self.bucket.clone(),
            deleted: self.deleted,
            source_inserted: self.source_inserted,
        };
        f(&mut b);
        b.build()
    }
}

fn parse_first_column(col: &str) -> (&str, bool, Option<&str>) {
    match col.split_once('|') {
        None => (col, false, None),
        Some((path, rest)) => match rest.strip_prefix("D|") {
            Some(bucket) => (path, true, Some(bucket)),
            None => (path, false, Some(rest)),
        },
    }
}

/// tag / alias 的规范形式：去首尾空白 + NFC
pub(crate) fn nfc(s: &str) -> String {
    s.trim().nfc().collect()
}

/// 条目构造器：路径规范化为 root 相对形式，tags 去空，alias/tags 做 NFC 规范化
#[derive(Clone, Debug)]
pub struct EntryBuilder {
    content: String,
    alias: Option<String>,
    tags: Vec<String>,
    range: GenomicRange,
    bucket: Option<String>,
    deleted: bool,
    source_inserted: bool,
}

impl EntryBuilder {
    pub fn new(content: &str, root: &Path) -> Self {
        Self {
            content: relativize(root, content),
            alias: None,
            tags: Vec::new(),
            range: GenomicRange::EMPTY,
            bucket: None,
            deleted: false,
            source_inserted: false,
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        let alias = nfc(alias);
        self.alias = if alias.is_empty() { None } else { Some(alias) };
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = tags
            .into_iter()
            .map(|t| nfc(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    pub fn range(mut self, range: GenomicRange) -> Self {
        self.range = range;
        self
    }

    pub fn bucket(mut self, bucket: &str) -> Self {
        let bucket = normalize_logical(bucket);
        self.bucket = if bucket.is_empty() { None } else { Some(bucket) };
        self
    }

    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn source_inserted(mut self, source_inserted: bool) -> Self {
        self.source_inserted = source_inserted;
        self
    }

    pub fn build(self) -> DictionaryEntry {
        let filter_tags = if !self.tags.is_empty() {
            self.tags.clone()
        } else if let Some(alias) = &self.alias {
            vec![alias.clone()]
        } else {
            Vec::new()
        };

        let mut key = self.content.clone();
        key.push('\t');
        key.push_str(&filter_tags.join(","));
        if !self.range.is_empty() {
            key.push('\t');
            key.push_str(&self.range.to_string());
        }

        DictionaryEntry {
            content: self.content,
            alias: self.alias,
            tags: self.tags,
            range: self.range,
            bucket: self.bucket,
            deleted: self.deleted,
            source_inserted: self.source_inserted,
            filter_tags,
            key,
        }
    }
}
