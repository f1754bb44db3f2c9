use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bucket::{
    BucketManager, BucketizeOptions, BucketizeReport, PackLevel, PipelineBucketCreator,
};
use crate::cache::TableCache;
use crate::config::ManagerConfig;
use crate::error::{Result, TableError};
use crate::model::header::HEADER_SOURCE_COLUMN_KEY;
use crate::model::{DictionaryEntry, DictionaryFilter, GenomicRange};
use crate::stats::TableStats;
use crate::storage::{
    CommitOutcome, FileReader, HistoryStore, LocalFileReader, LocalPipeline, PipelineRunner,
};
use crate::table::{DictionaryTable, LinkTable, Table, TableOps, DICTIONARY_EXT};

/// `insert` 参数：所有文件共享同一组 alias / tags / range
#[derive(Clone, Debug, Default)]
pub struct InsertArgs {
    pub alias: Option<String>,
    pub tags: Vec<String>,
    pub range: Option<String>,
    /// tag 过滤列名，写入表头 SOURCE_COLUMN
    pub source: Option<String>,
    /// tag 集合作为唯一键（upsert）
    pub tagskey: bool,
    pub nohistory: bool,
}

/// `multiinsert` 参数：与文件列表逐项对应；空列表表示不指定，空值允许
#[derive(Clone, Debug, Default)]
pub struct MultiInsertArgs {
    pub aliases: Vec<String>,
    pub tags: Vec<String>,
    pub ranges: Vec<String>,
    pub source: Option<String>,
    pub nohistory: bool,
}

/// `select` / `delete` 的选择条件
#[derive(Clone, Debug, Default)]
pub struct SelectionArgs {
    pub files: Vec<String>,
    pub aliases: Vec<String>,
    pub tags: Vec<String>,
    pub buckets: Vec<String>,
    pub range: Option<String>,
    pub include_deleted: bool,
}

impl SelectionArgs {
    /// aliases 与 tags 合并为同一个 tag 条件（按 filter tags 匹配）
    pub fn to_filter(&self, table: &DictionaryTable) -> Result<DictionaryFilter> {
        let mut filter = table.filter();
        if !self.files.is_empty() {
            filter = filter.files(&self.files);
        }
        let tags: Vec<&String> = self.aliases.iter().chain(&self.tags).collect();
        if !tags.is_empty() {
            filter = filter.tags(tags);
        }
        if !self.buckets.is_empty() {
            filter = filter.buckets(&self.buckets);
        }
        if let Some(range) = self.parsed_range()? {
            filter = filter.range(range);
        }
        if self.include_deleted {
            filter = filter.include_deleted();
        }
        Ok(filter)
    }

    fn parsed_range(&self) -> Result<Option<GenomicRange>> {
        match self.range.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => GenomicRange::parse(r).map(Some),
            _ => Ok(None),
        }
    }
}

/// `bucketize` 参数；未给出的值取表属性或配置文件
#[derive(Clone, Debug, Default)]
pub struct BucketizeArgs {
    pub workers: Option<usize>,
    pub min_bucket_size: Option<usize>,
    pub bucket_size: Option<usize>,
    pub pack_level: Option<PackLevel>,
    pub bucket_dirs: Vec<String>,
    pub max_bucket_count: Option<i64>,
    pub force_clean: bool,
}

/// 命令级操作：打开（或从缓存取得）表、修改、两阶段提交、发布到缓存
///
/// 同一进程内对同一个表的写操作通过 `TableCache::writer` 串行化。
pub struct TableManager {
    config: ManagerConfig,
    reader: Arc<dyn FileReader>,
    pipeline: Arc<dyn PipelineRunner>,
    cache: Arc<TableCache>,
}

impl TableManager {
    pub fn new(config: ManagerConfig) -> Self {
        let reader = LocalFileReader::shared();
        let pipeline = LocalPipeline::shared(reader.clone());
        Self::with_backends(config, reader, pipeline)
    }

    pub fn with_backends(
        config: ManagerConfig,
        reader: Arc<dyn FileReader>,
        pipeline: Arc<dyn PipelineRunner>,
    ) -> Self {
        let cache = Arc::new(TableCache::new(reader.clone(), config.cache_capacity));
        Self {
            config,
            reader,
            pipeline,
            cache,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TableCache> {
        &self.cache
    }

    /// 字典表经由缓存打开；其他变体直接打开
    pub fn open(&self, path: &Path) -> Result<Table> {
        let mut table = match path.extension().and_then(|e| e.to_str()) {
            Some(DICTIONARY_EXT) => Table::Dictionary(self.cache.open_table(path)?),
            _ => Table::open(path, self.reader.clone(), self.pipeline.clone())?,
        };
        match &mut table {
            Table::Dictionary(t) => t.set_retention(self.config.retention()),
            Table::Link(t) => t.target_mut().set_retention(self.config.retention()),
            Table::File(_) => {}
        }
        Ok(table)
    }

    pub fn insert(&self, path: &Path, files: &[String], args: &InsertArgs) -> Result<usize> {
        let range = parse_range(args.range.as_deref())?;
        let lock = self.cache.writer(path);
        let _guard = lock.lock();

        let mut table = self.open(path)?;
        if args.nohistory {
            table.set_use_history(false);
        }
        if let Table::Dictionary(t) = &mut table {
            self.apply_source_column(t, args.source.as_deref());
            if args.tagskey {
                t.set_unique_tags(true);
            }
        }

        let root = table.paths().root.clone();
        let entries: Vec<DictionaryEntry> = files
            .iter()
            .map(|f| {
                let mut b = DictionaryEntry::builder(f, &root)
                    .tags(&args.tags)
                    .range(range.clone());
                if let Some(alias) = &args.alias {
                    b = b.alias(alias);
                }
                b.build()
            })
            .collect();

        let n = table.insert_entries(entries)?;
        self.save(&mut table)?;
        tracing::info!("Inserted {} file(s) into {:?}", n, path);
        Ok(n)
    }

    /// 参数个数校验在任何修改之前完成
    pub fn multi_insert(
        &self,
        path: &Path,
        files: &[String],
        args: &MultiInsertArgs,
    ) -> Result<usize> {
        check_arity("tag", &args.tags, files.len())?;
        check_arity("alias", &args.aliases, files.len())?;
        check_arity("range", &args.ranges, files.len())?;
        let ranges = args
            .ranges
            .iter()
            .map(|r| parse_range(Some(r)))
            .collect::<Result<Vec<_>>>()?;

        let lock = self.cache.writer(path);
        let _guard = lock.lock();
        let mut table = self.open(path)?;
        if args.nohistory {
            table.set_use_history(false);
        }
        if let Table::Dictionary(t) = &mut table {
            self.apply_source_column(t, args.source.as_deref());
        }

        let root = table.paths().root.clone();
        let entries: Vec<DictionaryEntry> = files
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let mut b = DictionaryEntry::builder(f, &root);
                if let Some(alias) = args.aliases.get(i) {
                    b = b.alias(alias);
                }
                if let Some(tag) = args.tags.get(i) {
                    b = b.tags([tag]);
                }
                if let Some(range) = ranges.get(i) {
                    b = b.range(range.clone());
                }
                b.build()
            })
            .collect();

        let n = table.insert_entries(entries)?;
        self.save(&mut table)?;
        tracing::info!("Inserted {} file(s) into {:?}", n, path);
        Ok(n)
    }

    /// 字典表：删除匹配条目（有 bucket 的软删除）。数据文件表：删除区间内的行
    pub fn delete(&self, path: &Path, selection: &SelectionArgs) -> Result<usize> {
        let lock = self.cache.writer(path);
        let _guard = lock.lock();
        let mut table = self.open(path)?;

        let n = match &mut table {
            Table::File(t) => {
                let Some(range) = selection.parsed_range()? else {
                    return Err(TableError::Unsupported(
                        "file tables can only delete rows by --range".to_string(),
                    ));
                };
                let rows = t.select_range(&range)?;
                t.delete(&rows)?
            }
            other => {
                let Some(dict) = other.as_dictionary() else {
                    return Ok(0);
                };
                let filter = selection.to_filter(dict)?;
                if filter.is_identity() && !selection.include_deleted {
                    return Err(TableError::Data(
                        "No selection given, refusing to delete every entry".to_string(),
                    ));
                }
                let selected = dict.select(&filter);
                other.delete_entries(&selected)?
            }
        };
        self.save(&mut table)?;
        tracing::info!("Deleted {} entr(ies) from {:?}", n, path);
        Ok(n)
    }

    /// 匹配的行（catalog 行格式；数据文件表为原始行）
    pub fn select(&self, path: &Path, selection: &SelectionArgs) -> Result<Vec<String>> {
        match self.open(path)? {
            Table::File(t) => {
                let rows = match selection.parsed_range()? {
                    Some(range) => t.select_range(&range)?,
                    None => t.rows()?,
                };
                Ok(rows.into_iter().map(|r| r.into_line()).collect())
            }
            table => {
                let Some(dict) = table.as_dictionary() else {
                    return Ok(Vec::new());
                };
                let filter = selection.to_filter(dict)?;
                Ok(dict.select(&filter).iter().map(|e| e.to_line()).collect())
            }
        }
    }

    pub fn bucketize(&self, path: &Path, args: &BucketizeArgs) -> Result<BucketizeReport> {
        let lock = self.cache.writer(path);
        let _guard = lock.lock();
        let mut table = self.open(path)?;
        let defaults = &self.config.bucket;

        let report = {
            let dict = dictionary_mut(&mut table)?;
            let workers = args.workers.unwrap_or(defaults.workers);
            let creator = PipelineBucketCreator::new(self.pipeline.clone(), workers);
            let mut manager = BucketManager::with_defaults(dict, Box::new(creator), defaults);
            if let Some(size) = args.bucket_size {
                manager.set_bucket_size(size);
            }
            if let Some(min) = args.min_bucket_size {
                manager.set_min_bucket_size(min);
            }
            if !args.bucket_dirs.is_empty() {
                manager.set_bucket_dirs(&args.bucket_dirs);
            }
            let mut opts = BucketizeOptions::from(defaults);
            if let Some(level) = args.pack_level {
                opts.pack_level = level;
            }
            if let Some(max) = args.max_bucket_count {
                opts.max_bucket_count = max;
            }
            opts.force_clean = args.force_clean;
            manager.bucketize(&opts)?
        };
        self.publish(&table);
        Ok(report)
    }

    pub fn delete_buckets(&self, path: &Path, buckets: &[String], force: bool) -> Result<usize> {
        let lock = self.cache.writer(path);
        let _guard = lock.lock();
        let mut table = self.open(path)?;

        let n = {
            let dict = dictionary_mut(&mut table)?;
            let creator = PipelineBucketCreator::new(self.pipeline.clone(), 1);
            let mut manager =
                BucketManager::with_defaults(dict, Box::new(creator), &self.config.bucket);
            manager.delete_buckets(buckets, force)?
        };
        self.publish(&table);
        Ok(n)
    }

    /// 新建或重新指向链接表
    pub fn link(&self, link_path: &Path, uri: &str) -> Result<()> {
        let lock = self.cache.writer(link_path);
        let _guard = lock.lock();

        let link = if self.reader.exists(link_path) {
            let mut link = LinkTable::open(link_path, self.reader.clone())?;
            let old = link.target_path();
            link.link(uri);
            link.save()?;
            self.cache.invalidate(&old);
            link
        } else {
            LinkTable::create(link_path, uri, self.reader.clone())?
        };
        self.cache.publish(link.target());
        Ok(())
    }

    pub fn info(&self, path: &Path) -> Result<TableStats> {
        let mut stats = match self.open(path)? {
            Table::Dictionary(t) => TableStats::for_dictionary(&t)?,
            Table::Link(l) => {
                let mut s = TableStats::for_dictionary(l.target())?;
                s.path = path.to_path_buf();
                s.kind = "link".to_string();
                s.target = Some(l.target_path());
                s
            }
            Table::File(t) => {
                let rows = t.rows()?;
                let paths = t.paths();
                let history = HistoryStore::new(
                    paths.history.clone(),
                    &paths.name,
                    &paths.ext,
                    self.config.retention(),
                    self.reader.clone(),
                );
                TableStats {
                    path: path.to_path_buf(),
                    kind: "file".to_string(),
                    rows: rows.len(),
                    catalog_bytes: rows.iter().map(|r| r.line().len() as u64 + 1).sum(),
                    history_snapshots: history.snapshots()?.len(),
                    history_records: history.read_log()?.len(),
                    ..Default::default()
                }
            }
        };
        stats.cache = Some(self.cache.stats());
        Ok(stats)
    }

    fn apply_source_column(&self, table: &mut DictionaryTable, source: Option<&str>) {
        let source = source
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.config.source_column.as_str());
        if table.header().property(HEADER_SOURCE_COLUMN_KEY) != Some(source) {
            table.set_property(HEADER_SOURCE_COLUMN_KEY, source);
        }
    }

    fn save(&self, table: &mut Table) -> Result<CommitOutcome> {
        let outcome = table.save()?;
        self.publish(table);
        Ok(outcome)
    }

    fn publish(&self, table: &Table) {
        if let Some(dict) = table.as_dictionary() {
            self.cache.publish(dict);
        }
    }
}

fn dictionary_mut(table: &mut Table) -> Result<&mut DictionaryTable> {
    match table {
        Table::Dictionary(t) => Ok(t),
        Table::Link(l) => Ok(l.target_mut()),
        Table::File(_) => Err(TableError::Unsupported(
            "buckets are only supported for dictionary tables".to_string(),
        )),
    }
}

fn parse_range(range: Option<&str>) -> Result<GenomicRange> {
    match range.map(str::trim) {
        Some(r) if !r.is_empty() => GenomicRange::parse(r),
        _ => Ok(GenomicRange::EMPTY),
    }
}

fn check_arity(what: &'static str, values: &[String], files: usize) -> Result<()> {
    if !values.is_empty() && values.len() != files {
        return Err(TableError::ArgumentCount {
            what,
            expected: files,
            actual: values.len(),
        });
    }
    Ok(())
}

/// 当前目录下的相对路径转为绝对路径（CLI 使用）
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("gor-table-manager-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager() -> TableManager {
        TableManager::new(ManagerConfig::default())
    }

    fn alias(a: &str) -> InsertArgs {
        InsertArgs {
            alias: Some(a.to_string()),
            ..Default::default()
        }
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn all() -> SelectionArgs {
        SelectionArgs::default()
    }

    fn history_files(dir: &Path, name: &str) -> usize {
        std::fs::read_dir(dir.join(format!(".{}/history", name)))
            .map(|d| d.count())
            .unwrap_or(0)
    }

    #[test]
    fn filter_scenario_through_commands() {
        let dir = unique_tmp_dir("scenario");
        let gord = dir.join("t.gord");
        let tm = manager();
        tm.insert(&gord, &strings(&["f1.gor"]), &alias("A")).unwrap();
        tm.insert(&gord, &strings(&["f2.gor"]), &alias("B")).unwrap();
        tm.insert(&gord, &strings(&["f3.gor"]), &alias("D")).unwrap();
        tm.insert(&gord, &strings(&["f4.gor"]), &alias("D")).unwrap();

        let by_b = SelectionArgs {
            tags: strings(&["B"]),
            ..Default::default()
        };
        assert_eq!(tm.delete(&gord, &by_b).unwrap(), 1);
        assert!(tm.select(&gord, &by_b).unwrap().is_empty());
        assert_eq!(
            tm.select(&gord, &all()).unwrap(),
            strings(&["f1.gor\tA", "f3.gor\tD", "f4.gor\tD"])
        );

        // 空条件不删除
        assert!(matches!(tm.delete(&gord, &all()), Err(TableError::Data(_))));
    }

    #[test]
    fn tagskey_insert_is_idempotent() {
        let dir = unique_tmp_dir("tagskey");
        let gord = dir.join("t.gord");
        let tm = manager();
        let args = InsertArgs {
            tags: strings(&["x", "y"]),
            tagskey: true,
            ..Default::default()
        };
        tm.insert(&gord, &strings(&["a.gor"]), &args).unwrap();
        let args = InsertArgs {
            tags: strings(&["y", "x"]),
            ..args
        };
        tm.insert(&gord, &strings(&["b.gor"]), &args).unwrap();

        let lines = tm.select(&gord, &all()).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("b.gor\t"));
        let text = std::fs::read_to_string(&gord).unwrap();
        assert!(text.contains("## UNIQUE_TAGS = true"));
    }

    #[test]
    fn multi_insert_arity_mismatch_mutates_nothing() {
        let dir = unique_tmp_dir("arity");
        let gord = dir.join("t.gord");
        let tm = manager();
        let args = MultiInsertArgs {
            aliases: strings(&["A"]),
            ..Default::default()
        };
        let err = tm
            .multi_insert(&gord, &strings(&["file1.gor", "file2.gor"]), &args)
            .unwrap_err();
        assert!(matches!(
            err,
            TableError::ArgumentCount {
                what: "alias",
                expected: 2,
                actual: 1
            }
        ));
        assert!(!gord.exists());
        assert!(!dir.join(".t").exists());
    }

    #[test]
    fn multi_insert_pairs_values_with_files() {
        let dir = unique_tmp_dir("multi");
        let gord = dir.join("t.gord");
        let tm = manager();
        let args = MultiInsertArgs {
            aliases: strings(&["A", ""]),
            tags: strings(&["", "T2"]),
            ranges: strings(&["chr1:10-chr1:20", ""]),
            ..Default::default()
        };
        assert_eq!(
            tm.multi_insert(&gord, &strings(&["f1.gor", "f2.gor"]), &args)
                .unwrap(),
            2
        );
        let lines = tm.select(&gord, &all()).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("f1.gor\tA\tchr1\t10\tchr1\t20"));
        assert!(lines[1].starts_with("f2.gor\t"));
        assert!(lines[1].ends_with("T2"));

        // 空列表值可用于过滤
        let t2 = SelectionArgs {
            tags: strings(&["T2"]),
            ..Default::default()
        };
        assert_eq!(tm.select(&gord, &t2).unwrap().len(), 1);
    }

    #[test]
    fn history_is_gated_by_nohistory() {
        let dir = unique_tmp_dir("history");
        let tm = manager();

        let with = dir.join("with.gord");
        tm.insert(&with, &strings(&["a.gor"]), &alias("A")).unwrap();
        tm.insert(&with, &strings(&["b.gor"]), &alias("B")).unwrap();
        // 一个快照 + action log
        assert_eq!(history_files(&dir, "with"), 2);

        let without = dir.join("without.gord");
        let args = InsertArgs {
            nohistory: true,
            ..alias("A")
        };
        tm.insert(&without, &strings(&["a.gor"]), &args).unwrap();
        let args = InsertArgs {
            nohistory: true,
            ..alias("B")
        };
        tm.insert(&without, &strings(&["b.gor"]), &args).unwrap();
        assert!(!dir.join(".without/history").exists());
        assert_eq!(tm.select(&without, &all()).unwrap().len(), 2);
    }

    #[test]
    fn history_failure_still_publishes() {
        let dir = unique_tmp_dir("historyfail");
        let tm = manager();
        let gord = dir.join("h.gord");
        std::fs::create_dir_all(dir.join(".h")).unwrap();
        std::fs::write(dir.join(".h/history"), "").unwrap();

        tm.insert(&gord, &strings(&["a.gor"]), &alias("A")).unwrap();
        assert_eq!(tm.select(&gord, &all()).unwrap().len(), 1);
        tm.insert(&gord, &strings(&["b.gor"]), &alias("B")).unwrap();
        assert_eq!(tm.select(&gord, &all()).unwrap().len(), 2);
    }

    #[test]
    fn bucketize_then_delete_buckets() {
        let dir = unique_tmp_dir("buckets");
        let gord = dir.join("t.gord");
        let tm = manager();
        let files: Vec<String> = (0..5).map(|i| format!("f{}.gor", i)).collect();
        for (i, f) in files.iter().enumerate() {
            std::fs::write(dir.join(f), format!("#chrom\tpos\nchr1\t{}\n", i)).unwrap();
        }
        let args = MultiInsertArgs {
            aliases: (0..5).map(|i| format!("S{}", i)).collect(),
            ..Default::default()
        };
        tm.multi_insert(&gord, &files, &args).unwrap();

        let report = tm
            .bucketize(
                &gord,
                &BucketizeArgs {
                    workers: Some(2),
                    bucket_size: Some(2),
                    min_bucket_size: Some(1),
                    max_bucket_count: Some(10),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(report.created.len(), 3);
        let stats = tm.info(&gord).unwrap();
        assert_eq!((stats.entries, stats.unbucketized, stats.buckets), (5, 0, 3));

        let in_bucket = SelectionArgs {
            buckets: vec![report.created[0].clone()],
            ..Default::default()
        };
        assert_eq!(tm.select(&gord, &in_bucket).unwrap().len(), 2);

        tm.delete_buckets(&gord, &report.created, true).unwrap();
        let stats = tm.info(&gord).unwrap();
        assert_eq!((stats.unbucketized, stats.buckets), (5, 0));
        for b in &report.created {
            assert!(!dir.join(b).exists());
        }
    }

    #[test]
    fn link_is_created_and_repointed() {
        let dir = unique_tmp_dir("link");
        let tm = manager();
        tm.insert(&dir.join("v1.gord"), &strings(&["a.gor"]), &alias("A"))
            .unwrap();
        tm.insert(&dir.join("v2.gord"), &strings(&["b.gor"]), &alias("B"))
            .unwrap();

        let link = dir.join("current.link");
        tm.link(&link, "v1.gord").unwrap();
        assert_eq!(tm.select(&link, &all()).unwrap(), strings(&["a.gor\tA"]));
        assert!(matches!(
            tm.insert(&link, &strings(&["c.gor"]), &alias("C")),
            Err(TableError::Unsupported(_))
        ));

        tm.link(&link, "v2.gord").unwrap();
        assert_eq!(tm.select(&link, &all()).unwrap(), strings(&["b.gor\tB"]));
        let stats = tm.info(&link).unwrap();
        assert_eq!(stats.kind, "link");
        assert_eq!(stats.target, Some(dir.join("v2.gord")));
    }

    #[test]
    fn file_table_insert_and_range_delete() {
        let dir = unique_tmp_dir("filetable");
        std::fs::write(dir.join("a.tsv"), "#chrom\tpos\nchr1\t30\nchr2\t5\n").unwrap();
        std::fs::write(dir.join("b.tsv"), "#chrom\tpos\nchr1\t10\n").unwrap();
        let data = dir.join("data.gor");
        let tm = manager();

        tm.insert(&data, &strings(&["a.tsv", "b.tsv"]), &InsertArgs::default())
            .unwrap();
        assert_eq!(
            tm.select(&data, &all()).unwrap(),
            strings(&["chr1\t10", "chr1\t30", "chr2\t5"])
        );

        let chr1 = SelectionArgs {
            range: Some("chr1".to_string()),
            ..Default::default()
        };
        assert_eq!(tm.delete(&data, &chr1).unwrap(), 2);
        assert_eq!(tm.select(&data, &all()).unwrap(), strings(&["chr2\t5"]));
        assert_eq!(tm.info(&data).unwrap().rows, 1);
    }

    #[test]
    fn cache_serves_repeated_reads() {
        let dir = unique_tmp_dir("cache");
        let gord = dir.join("t.gord");
        let tm = manager();
        tm.insert(&gord, &strings(&["a.gor"]), &alias("A")).unwrap();
        tm.select(&gord, &all()).unwrap();
        tm.select(&gord, &all()).unwrap();
        let stats = tm.cache().stats();
        assert!(stats.hits >= 2);
        assert_eq!(stats.entries, 1);
    }
}
