use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{table_property, table_property_bool};
use crate::error::{Result, TableError};
use crate::model::header::{
    DEFAULT_SOURCE_COLUMN, DICTIONARY_COLUMNS, HEADER_BUCKETIZE_KEY, HEADER_LINE_COUNT_KEY,
    HEADER_SOURCE_COLUMN_KEY, HEADER_UNIQUE_TAGS_KEY, HEADER_USE_HISTORY_KEY,
    HEADER_VALIDATE_FILES_KEY,
};
use crate::model::{is_uri, relativize, resolve, DictionaryEntry, DictionaryFilter, TableHeader};
use crate::storage::{
    CivilTime, CommitOutcome, CommitSupport, FileReader, HistoryAction, HistoryRecord,
    HistoryRetention, HistoryStore, TablePaths,
};
use crate::table::entries::TableEntries;
use crate::table::{EntryFactory, TableOps};

/// `.gord` 行 <-> DictionaryEntry
pub struct DictionaryEntryFactory {
    root: PathBuf,
}

impl DictionaryEntryFactory {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl EntryFactory for DictionaryEntryFactory {
    type Entry = DictionaryEntry;

    fn parse(&self, line: &str) -> Result<DictionaryEntry> {
        DictionaryEntry::parse_line(line, &self.root)
    }

    fn format(&self, entry: &DictionaryEntry) -> String {
        entry.to_line()
    }
}

/// 某一时刻加载的字典表内容（不可变，可跨线程共享）
#[derive(Clone, Debug)]
pub struct TableSnapshot {
    pub paths: TablePaths,
    pub header: TableHeader,
    pub entries: Arc<TableEntries>,
    /// 加载时的 identity 信号；文件不存在或读取期间被替换时为 None
    pub identity: Option<String>,
}

impl TableSnapshot {
    pub fn load(path: &Path, reader: &dyn FileReader) -> Result<Self> {
        let paths = TablePaths::from_main(path);
        let before = reader.identity(path)?;
        if before.is_none() {
            return Ok(Self {
                header: TableHeader::for_dictionary(&CivilTime::now().created_stamp()),
                entries: Arc::new(TableEntries::new()),
                identity: None,
                paths,
            });
        }

        let lines = reader.read_lines(path)?;
        let after = reader.identity(path)?;

        let factory = DictionaryEntryFactory::new(&paths.root);
        let mut header = TableHeader::new();
        let mut entries = TableEntries::new();
        for line in &lines {
            if line.trim().is_empty() || header.parse_line(line) {
                continue;
            }
            entries.upsert(factory.parse(line)?);
        }
        if !header.is_proper() {
            header.set_columns(DICTIONARY_COLUMNS.iter().map(|c| c.to_string()).collect());
        }

        // 读取期间被替换：内容与 identity 无法对应
        let identity = if before == after { before } else { None };
        tracing::debug!(
            "Loaded {:?}: {} entries, identity {:?}",
            path,
            entries.len(),
            identity
        );
        Ok(Self {
            paths,
            header,
            entries: Arc::new(entries),
            identity,
        })
    }

    pub fn exists(&self) -> bool {
        self.identity.is_some()
    }
}

enum InsertStep {
    Add(DictionaryEntry),
    Replace {
        old: DictionaryEntry,
        new: DictionaryEntry,
    },
}

impl InsertStep {
    fn new_entry(&self) -> &DictionaryEntry {
        match self {
            InsertStep::Add(e) => e,
            InsertStep::Replace { new, .. } => new,
        }
    }

    fn set_new_entry(&mut self, entry: DictionaryEntry) {
        match self {
            InsertStep::Add(e) => *e = entry,
            InsertStep::Replace { new, .. } => *new = entry,
        }
    }
}

/// 字典表（`.gord` catalog）
///
/// 条目存放在共享的 `Arc<TableEntries>` 中，修改时 copy-on-write，
/// 因此从 cache 快照构造的表不会影响其他读者。
pub struct DictionaryTable {
    paths: TablePaths,
    reader: Arc<dyn FileReader>,
    header: TableHeader,
    entries: Arc<TableEntries>,
    identity: Option<String>,
    // 加载时的状态，abort 时恢复
    base_header: TableHeader,
    base_entries: Arc<TableEntries>,
    support: CommitSupport,
    dirty: bool,
}

impl DictionaryTable {
    pub fn open(path: &Path, reader: Arc<dyn FileReader>) -> Result<Self> {
        let snap = TableSnapshot::load(path, reader.as_ref())?;
        Ok(Self::from_snapshot(&snap, reader))
    }

    pub fn from_snapshot(snap: &TableSnapshot, reader: Arc<dyn FileReader>) -> Self {
        let mut support = CommitSupport::new(snap.paths.clone(), reader.clone());
        support.set_use_history(table_property_bool(
            &snap.header,
            HEADER_USE_HISTORY_KEY,
            true,
        ));
        Self {
            paths: snap.paths.clone(),
            reader,
            header: snap.header.clone(),
            entries: snap.entries.clone(),
            identity: snap.identity.clone(),
            base_header: snap.header.clone(),
            base_entries: snap.entries.clone(),
            support,
            dirty: false,
        }
    }

    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            paths: self.paths.clone(),
            header: self.header.clone(),
            entries: self.entries.clone(),
            identity: self.identity.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.paths.main
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn name(&self) -> &str {
        &self.paths.name
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn reader(&self) -> &Arc<dyn FileReader> {
        &self.reader
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// 表属性（表头 -> 环境变量 -> 默认值）
    pub fn property(&self, key: &str, default: &str) -> String {
        table_property(&self.header, key, default)
    }

    pub fn set_property(&mut self, key: &str, value: &str) {
        if self.header.property(key) != Some(value) {
            self.header.set_property(key, value);
            self.dirty = true;
        }
    }

    pub fn unique_tags(&self) -> bool {
        table_property_bool(&self.header, HEADER_UNIQUE_TAGS_KEY, false)
    }

    pub fn set_unique_tags(&mut self, unique: bool) {
        self.set_property(HEADER_UNIQUE_TAGS_KEY, if unique { "true" } else { "false" });
    }

    pub fn validate_files(&self) -> bool {
        table_property_bool(&self.header, HEADER_VALIDATE_FILES_KEY, false)
    }

    pub fn set_validate_files(&mut self, validate: bool) {
        self.set_property(
            HEADER_VALIDATE_FILES_KEY,
            if validate { "true" } else { "false" },
        );
    }

    pub fn bucketize_enabled(&self) -> bool {
        table_property_bool(&self.header, HEADER_BUCKETIZE_KEY, true)
    }

    pub fn source_column(&self) -> String {
        self.property(HEADER_SOURCE_COLUMN_KEY, DEFAULT_SOURCE_COLUMN)
    }

    /// 只影响本进程内的提交，不写入表头
    pub fn set_use_history(&mut self, use_history: bool) {
        self.support.set_use_history(use_history);
    }

    pub fn use_history(&self) -> bool {
        self.support.use_history()
    }

    pub fn set_retention(&mut self, retention: HistoryRetention) {
        self.support.set_retention(retention);
    }

    pub fn history(&self) -> HistoryStore {
        self.support.history()
    }

    pub fn entries(&self) -> &TableEntries {
        &self.entries
    }

    /// 未删除条目数
    pub fn line_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_deleted()).count()
    }

    pub fn filter(&self) -> DictionaryFilter {
        DictionaryFilter::new(&self.paths.root)
    }

    /// 按 filter 选择，结果按 key 排序
    pub fn select(&self, filter: &DictionaryFilter) -> Vec<DictionaryEntry> {
        self.entries.select(filter).into_iter().cloned().collect()
    }

    /// 全部条目（含已删除），插入顺序
    pub fn all_entries(&self) -> Vec<DictionaryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// catalog 引用到的所有 bucket
    pub fn buckets(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter_map(|e| e.bucket().map(str::to_string))
            .collect()
    }

    /// 尚未进入任何 bucket 的条目
    pub fn needs_bucketizing(&self) -> Vec<DictionaryEntry> {
        self.entries
            .iter()
            .filter(|e| !e.is_deleted() && !e.has_bucket())
            .cloned()
            .collect()
    }

    fn plan_insert(&self, entries: Vec<DictionaryEntry>) -> Result<Vec<InsertStep>> {
        if self.validate_files() {
            for e in &entries {
                let file = resolve(&self.paths.root, e.content());
                if !is_uri(e.content()) && !self.reader.exists(&file) {
                    return Err(TableError::Data(format!(
                        "Entry file {:?} does not exist",
                        file
                    )));
                }
            }
        }

        if !self.unique_tags() {
            return Ok(entries.into_iter().map(InsertStep::Add).collect());
        }

        let mut plan: Vec<InsertStep> = Vec::with_capacity(entries.len());
        for e in entries {
            // 同一批次内 tag 集合相同：后者覆盖前者
            if let Some(step) = plan.iter_mut().find(|s| s.new_entry().same_tag_set(&e)) {
                let merged = step
                    .new_entry()
                    .with_content_and_alias(e.content(), e.alias());
                step.set_new_entry(merged);
                continue;
            }
            let matches = self.entries.with_same_tag_set(&e);
            match matches.as_slice() {
                [] => plan.push(InsertStep::Add(e)),
                [old] => plan.push(InsertStep::Replace {
                    old: (*old).clone(),
                    new: old.with_content_and_alias(e.content(), e.alias()),
                }),
                many => {
                    return Err(TableError::AmbiguousIdentity {
                        tags: e.filter_tags().join(","),
                        count: many.len(),
                    })
                }
            }
        }
        Ok(plan)
    }

    fn delete_one(&mut self, key: &str) -> bool {
        let Some(found) = self.entries.get(key).cloned() else {
            return false;
        };
        let entries = Arc::make_mut(&mut self.entries);
        if found.has_bucket() {
            // bucket 回收前需要保留引用
            entries.soft_delete(key);
        } else {
            entries.remove(key);
        }
        self.support.log(HistoryRecord::new(
            HistoryAction::Delete,
            found.bucket().unwrap_or(""),
            found.to_line(),
        ));
        true
    }

    /// 已删除行直接移除；活动行清除 bucket。返回受影响行数
    pub fn remove_from_bucket(&mut self, entries: &[DictionaryEntry]) -> usize {
        let mut n = 0;
        for e in entries {
            let found = match (e.is_deleted(), e.bucket()) {
                (true, Some(b)) => self.entries.get_deleted(e.key(), b),
                (true, None) => None,
                (false, _) => self.entries.get(e.key()),
            };
            let Some(found) = found.cloned() else {
                continue;
            };
            let Some(bucket) = found.bucket().map(str::to_string) else {
                continue;
            };
            let table = Arc::make_mut(&mut self.entries);
            if found.is_deleted() {
                if !found.same_identity(e) {
                    continue;
                }
                table.remove_deleted(e.key(), &bucket);
            } else {
                table.upsert(found.without_bucket());
            }
            self.support.log(HistoryRecord::new(
                HistoryAction::RemoveFromBucket,
                &bucket,
                found.to_line(),
            ));
            n += 1;
        }
        if n > 0 {
            self.dirty = true;
        }
        n
    }

    /// 把条目放入 bucket；已在其他 bucket 中的行报错（整批校验后再修改）
    pub fn add_to_bucket(&mut self, bucket: &str, entries: &[DictionaryEntry]) -> Result<()> {
        let bucket = relativize(&self.paths.root, bucket);
        for e in entries {
            if let Some(found) = self.entries.get(e.key()) {
                if let Some(b) = found.bucket() {
                    if b != bucket {
                        return Err(TableError::Data(format!(
                            "Line {} is already in bucket {}, can not add it to {}",
                            found.content(),
                            b,
                            bucket
                        )));
                    }
                }
            }
        }

        let table = Arc::make_mut(&mut self.entries);
        for e in entries {
            let updated = match table.get(e.key()) {
                Some(found) => found.with_bucket(&bucket),
                // 行已不在表中：保留一个已删除的引用
                None => e.as_deleted().with_bucket(&bucket),
            };
            self.support.log(HistoryRecord::new(
                HistoryAction::AddToBucket,
                &bucket,
                updated.to_line(),
            ));
            table.upsert(updated);
        }
        if !entries.is_empty() {
            self.dirty = true;
        }
        Ok(())
    }

    /// 当前内容的完整 catalog 文本
    pub fn format(&self) -> String {
        let factory = DictionaryEntryFactory::new(&self.paths.root);
        let mut out = self.header.format();
        for e in self.entries.iter() {
            out.push_str(&factory.format(e));
            out.push('\n');
        }
        out
    }

    /// 从存储重新加载（丢弃内存中的修改）
    pub fn reload(&mut self) -> Result<()> {
        let snap = TableSnapshot::load(&self.paths.main, self.reader.as_ref())?;
        self.header = snap.header.clone();
        self.entries = snap.entries.clone();
        self.identity = snap.identity;
        self.base_header = snap.header;
        self.base_entries = snap.entries;
        self.dirty = false;
        Ok(())
    }
}

impl TableOps for DictionaryTable {
    type Entry = DictionaryEntry;

    fn paths(&self) -> &TablePaths {
        &self.paths
    }

    /// upsert；unique tags 模式下按 tag 集合匹配已有条目
    fn insert(&mut self, entries: Vec<DictionaryEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let plan = self.plan_insert(entries)?;
        let n = plan.len();
        for step in plan {
            let new = match step {
                InsertStep::Add(e) => e,
                InsertStep::Replace { old, new } => {
                    if old.key() != new.key() {
                        self.delete_one(old.key());
                    }
                    new
                }
            };
            // 同 key 的行已在 bucket 中：桶内容已过时，保留软删除引用以便回收
            if self.entries.get(new.key()).is_some_and(DictionaryEntry::has_bucket) {
                self.delete_one(new.key());
            }
            self.support.log(HistoryRecord::new(
                HistoryAction::Insert,
                "",
                new.to_line(),
            ));
            Arc::make_mut(&mut self.entries).upsert(new.as_source_inserted());
        }
        self.dirty = true;
        Ok(n)
    }

    /// 无 bucket 的行移除；有 bucket 的行软删除
    fn delete(&mut self, entries: &[DictionaryEntry]) -> Result<usize> {
        let mut n = 0;
        for e in entries {
            // 软删除引用只能由 remove_from_bucket 移除
            if !e.is_deleted() && self.delete_one(e.key()) {
                n += 1;
            }
        }
        if n > 0 {
            self.dirty = true;
        }
        Ok(n)
    }

    fn filter(&self, pred: &dyn Fn(&DictionaryEntry) -> bool) -> Result<Vec<DictionaryEntry>> {
        Ok(self.entries.iter().filter(|e| pred(e)).cloned().collect())
    }

    fn commit_request(&mut self) -> Result<()> {
        self.support.verify_unchanged(self.identity.as_deref())?;
        if !self.dirty {
            return Ok(());
        }
        self.header.bump_serial();
        let lines = self.line_count().to_string();
        self.header.set_property(HEADER_LINE_COUNT_KEY, &lines);
        let content = self.format();
        self.support.stage_main(content.as_bytes())?;
        Ok(())
    }

    fn commit(&mut self) -> Result<CommitOutcome> {
        let empty = self.header.format();
        let outcome = self.support.commit(empty.as_bytes(), self.header.serial())?;
        self.reload()?;
        Ok(outcome)
    }

    fn abort(&mut self) {
        self.support.abort();
        self.header = self.base_header.clone();
        self.entries = self.base_entries.clone();
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::header::HEADER_SERIAL_KEY;
    use crate::storage::LocalFileReader;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("gor-table-dict-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn open(dir: &Path) -> DictionaryTable {
        DictionaryTable::open(&dir.join("t.gord"), LocalFileReader::shared()).unwrap()
    }

    fn entry(dir: &Path, content: &str, alias: &str, tags: &[&str]) -> DictionaryEntry {
        let mut b = DictionaryEntry::builder(content, dir);
        if !alias.is_empty() {
            b = b.alias(alias);
        }
        b.tags(tags.iter().copied()).build()
    }

    fn contents(entries: &[DictionaryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.content()).collect()
    }

    #[test]
    fn insert_save_reload() {
        let dir = unique_tmp_dir("save");
        let mut t = open(&dir);
        t.insert(vec![
            entry(&dir, "f1.gor", "A", &[]),
            entry(&dir, "f2.gor", "B", &[]),
        ])
        .unwrap();
        assert!(t.all_entries().iter().all(|e| e.is_source_inserted()));
        t.save().unwrap();

        let t = open(&dir);
        assert_eq!(t.line_count(), 2);
        assert_eq!(t.header().property(HEADER_SERIAL_KEY), Some("1"));
        assert_eq!(t.header().property(HEADER_LINE_COUNT_KEY), Some("2"));
        assert!(t.all_entries().iter().all(|e| !e.is_source_inserted()));
        let text = std::fs::read_to_string(dir.join("t.gord")).unwrap();
        assert!(text.contains("#File\tAlias\tChrStart"));
        assert!(text.ends_with("f1.gor\tA\nf2.gor\tB\n"));
    }

    #[test]
    fn filter_scenario() {
        let dir = unique_tmp_dir("filter");
        let mut t = open(&dir);
        t.insert(vec![
            entry(&dir, "f1.gor", "A", &[]),
            entry(&dir, "f2.gor", "B", &[]),
            entry(&dir, "f3.gor", "D", &[]),
        ])
        .unwrap();
        t.save().unwrap();

        let mut t = open(&dir);
        t.insert(vec![entry(&dir, "f4.gor", "D", &[])]).unwrap();
        let f = t.filter().tags(["B"]);
        let doomed = t.select(&f);
        assert_eq!(contents(&doomed), vec!["f2.gor"]);
        t.delete(&doomed).unwrap();
        t.save().unwrap();

        let t = open(&dir);
        let all = t.select(&t.filter());
        assert_eq!(contents(&all), vec!["f1.gor", "f3.gor", "f4.gor"]);
        let d = t.select(&t.filter().tags(["D"]));
        assert_eq!(contents(&d), vec!["f3.gor", "f4.gor"]);
        assert!(t.select(&t.filter().tags(["B"])).is_empty());
    }

    #[test]
    fn tagskey_upsert_is_idempotent() {
        let dir = unique_tmp_dir("tagskey");
        let mut t = open(&dir);
        t.set_unique_tags(true);
        t.insert(vec![entry(&dir, "v1.gor", "", &["s1", "s2"])]).unwrap();
        t.save().unwrap();

        let mut t = open(&dir);
        t.insert(vec![entry(&dir, "v2.gor", "", &["s2", "s1"])]).unwrap();
        t.save().unwrap();

        let t = open(&dir);
        let all = t.select(&t.filter());
        assert_eq!(contents(&all), vec!["v2.gor"]);
        // 原有 tag 顺序保留
        assert_eq!(all[0].tags(), &["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn tagskey_ambiguity_changes_nothing() {
        let dir = unique_tmp_dir("ambiguous");
        let mut t = open(&dir);
        t.insert(vec![
            entry(&dir, "a.gor", "", &["x"]),
            entry(&dir, "b.gor", "", &["x"]),
        ])
        .unwrap();
        t.save().unwrap();
        let before = std::fs::read_to_string(dir.join("t.gord")).unwrap();

        let mut t = open(&dir);
        t.set_unique_tags(true);
        let r = t.insert(vec![
            entry(&dir, "ok.gor", "", &["y"]),
            entry(&dir, "c.gor", "", &["x"]),
        ]);
        assert!(matches!(
            r,
            Err(TableError::AmbiguousIdentity { count: 2, .. })
        ));
        assert_eq!(t.line_count(), 2);
        assert_eq!(std::fs::read_to_string(dir.join("t.gord")).unwrap(), before);
    }

    #[test]
    fn delete_keeps_bucketed_lines_as_deleted() {
        let dir = unique_tmp_dir("softdelete");
        let mut t = open(&dir);
        let a = entry(&dir, "a.gor", "A", &[]);
        let b = entry(&dir, "b.gor", "B", &[]);
        t.insert(vec![a.clone(), b.clone()]).unwrap();
        t.add_to_bucket("bk.gor", &[a.clone()]).unwrap();
        t.delete(&[a.clone(), b.clone()]).unwrap();
        t.save().unwrap();

        let text = std::fs::read_to_string(dir.join("t.gord")).unwrap();
        assert!(text.contains("a.gor|D|bk.gor\tA\n"));
        assert!(!text.contains("b.gor"));

        let mut t = open(&dir);
        assert!(t.select(&t.filter()).is_empty());
        let in_bucket = t.select(&t.filter().buckets(["bk.gor"]));
        assert_eq!(in_bucket.len(), 1);
        assert!(in_bucket[0].is_deleted());

        assert_eq!(t.remove_from_bucket(&in_bucket), 1);
        assert!(t.all_entries().is_empty());
    }

    #[test]
    fn reinsert_keeps_bucket_reference() {
        let dir = unique_tmp_dir("reinsert");
        let mut t = open(&dir);
        let a = entry(&dir, "a.gor", "A", &[]);
        t.insert(vec![a.clone()]).unwrap();
        t.add_to_bucket("bk.gor", &[a.clone()]).unwrap();
        t.insert(vec![a.clone()]).unwrap();
        t.save().unwrap();

        let text = std::fs::read_to_string(dir.join("t.gord")).unwrap();
        assert!(text.contains("a.gor|D|bk.gor\tA\n"));
        assert!(text.contains("\na.gor\tA\n"));

        let t = open(&dir);
        assert_eq!(t.line_count(), 1);
        assert_eq!(contents(&t.needs_bucketizing()), vec!["a.gor"]);
        let refs = t.select(&t.filter().buckets(["bk.gor"]));
        assert_eq!(refs.len(), 1);
        assert!(refs[0].is_deleted());
    }

    #[test]
    fn reinsert_after_delete_keeps_deleted_reference() {
        let dir = unique_tmp_dir("reinsertdeleted");
        let mut t = open(&dir);
        let a = entry(&dir, "a.gor", "A", &[]);
        t.insert(vec![a.clone()]).unwrap();
        t.add_to_bucket("bk.gor", &[a.clone()]).unwrap();
        t.delete(&[a.clone()]).unwrap();
        t.insert(vec![a.clone()]).unwrap();
        t.save().unwrap();

        let mut t = open(&dir);
        let all = t.all_entries();
        assert_eq!(all.len(), 2);
        assert!(all
            .iter()
            .any(|e| e.is_deleted() && e.bucket() == Some("bk.gor")));
        assert!(all.iter().any(|e| !e.is_deleted() && !e.has_bucket()));

        // 选中软删除引用的 delete 不影响活动行
        let refs = t.select(&t.filter().buckets(["bk.gor"]));
        assert_eq!(t.delete(&refs).unwrap(), 0);
        assert_eq!(t.remove_from_bucket(&refs), 1);
        assert_eq!(t.line_count(), 1);
        assert!(t.buckets().is_empty());
    }

    #[test]
    fn add_to_bucket_rejects_other_bucket() {
        let dir = unique_tmp_dir("bucketclash");
        let mut t = open(&dir);
        let a = entry(&dir, "a.gor", "A", &[]);
        t.insert(vec![a.clone()]).unwrap();
        t.add_to_bucket("b1.gor", &[a.clone()]).unwrap();
        assert!(matches!(
            t.add_to_bucket("b2.gor", &[a.clone()]),
            Err(TableError::Data(_))
        ));

        // 不在表中的行：加入已删除引用
        let gone = entry(&dir, "gone.gor", "G", &[]);
        t.add_to_bucket("b1.gor", &[gone]).unwrap();
        let refs = t.select(&t.filter().buckets(["b1.gor"]));
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().any(|e| e.is_deleted() && e.content() == "gone.gor"));

        assert_eq!(t.remove_from_bucket(&refs), 2);
        assert_eq!(t.needs_bucketizing().len(), 1);
        assert!(t.buckets().is_empty());
    }

    #[test]
    fn stale_table_is_rejected() {
        let dir = unique_tmp_dir("stale");
        let mut first = open(&dir);
        first.insert(vec![entry(&dir, "a.gor", "A", &[])]).unwrap();
        first.save().unwrap();

        let mut t1 = open(&dir);
        let mut t2 = open(&dir);
        t2.insert(vec![entry(&dir, "b.gor", "B", &[])]).unwrap();
        t2.save().unwrap();

        t1.insert(vec![entry(&dir, "c.gor", "C", &[])]).unwrap();
        let err = t1.save().unwrap_err();
        assert!(matches!(err, TableError::Stale { .. }));
        assert!(err.is_retryable());
        // abort 恢复加载时状态
        assert_eq!(t1.line_count(), 1);
    }

    #[test]
    fn validate_files_rejects_missing() {
        let dir = unique_tmp_dir("validate");
        let mut t = open(&dir);
        t.set_validate_files(true);
        std::fs::write(dir.join("real.gor"), "#chrom\tpos\n").unwrap();
        t.insert(vec![entry(&dir, "real.gor", "R", &[])]).unwrap();
        assert!(matches!(
            t.insert(vec![entry(&dir, "missing.gor", "M", &[])]),
            Err(TableError::Data(_))
        ));
        assert_eq!(t.line_count(), 1);
    }

    #[test]
    fn empty_table_commit_writes_header() {
        let dir = unique_tmp_dir("empty");
        let mut t = open(&dir);
        t.save().unwrap();
        let text = std::fs::read_to_string(dir.join("t.gord")).unwrap();
        assert!(text.starts_with("## FILE_FORMAT = 1.0\n"));
        assert!(t.identity().is_some());
    }
}
