pub mod creator;
pub mod plan;

pub use creator::{adaptive_workers, BucketCreator, PipelineBucketCreator};
pub use plan::PackLevel;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{Duration, SystemTime};

use regex::Regex;

use crate::config::{table_property, table_property_i64, BucketDefaults};
use crate::error::{Result, TableError};
use crate::model::{relativize, resolve, DictionaryEntry};
use crate::table::{DictionaryTable, TableOps};

use plan::{
    bucket_file_prefix, bucket_name_prefix, find_buckets_to_create, find_buckets_to_delete,
    logical_parent, DirPicker, BUCKET_FILE_EXT,
};

pub const HEADER_MIN_BUCKET_SIZE_KEY: &str = "GOR_TABLE_MIN_BUCKET_SIZE";
pub const HEADER_BUCKET_SIZE_KEY: &str = "GOR_TABLE_BUCKET_SIZE";
pub const HEADER_BUCKET_DIRS_KEY: &str = "GOR_TABLE_BUCKET_DIRS";
pub const HEADER_BUCKET_MAX_BUCKETS: &str = "GOR_TABLE_BUCKET_MAX_BUCKETS";

pub const DEFAULT_MIN_BUCKET_SIZE: usize = 20;
pub const DEFAULT_BUCKET_SIZE: usize = 100;
pub const DEFAULT_MAX_BUCKET_COUNT: i64 = 3;
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// 一次 bucketize 调用的参数
#[derive(Clone, Debug)]
pub struct BucketizeOptions {
    pub pack_level: PackLevel,
    /// ≤ 0：取表属性或默认值
    pub max_bucket_count: i64,
    /// 忽略删除宽限期
    pub force_clean: bool,
}

impl From<&BucketDefaults> for BucketizeOptions {
    fn from(d: &BucketDefaults) -> Self {
        Self {
            pack_level: d.pack_level,
            max_bucket_count: d.max_bucket_count,
            force_clean: false,
        }
    }
}

/// bucketize 结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketizeReport {
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub cleaned: Vec<String>,
}

/// 桶管理：把未入桶条目的数据文件合并为桶文件，并维护 catalog 中的桶引用
///
/// 流程：
/// 1) 清理遗留的 `bucketizing_*` 临时目录与未被引用的旧桶文件
/// 2) 规划：回收哪些桶（按 pack level），新建哪些桶（按 size / min size / max count）
/// 3) 按桶目录分组创建桶文件，更新 catalog（remove_from_bucket + add_to_bucket）并提交
/// 4) 删除被回收的桶（宽限期内的文件保留，留待下次清理）
pub struct BucketManager<'a> {
    table: &'a mut DictionaryTable,
    creator: Box<dyn BucketCreator>,
    bucket_size: usize,
    min_bucket_size: usize,
    bucket_dirs: Vec<String>,
    grace_period: Duration,
}

impl<'a> BucketManager<'a> {
    pub fn new(table: &'a mut DictionaryTable, creator: Box<dyn BucketCreator>) -> Self {
        Self::with_defaults(table, creator, &BucketDefaults::default())
    }

    /// 大小与目录先取表属性（表头 -> 环境变量），再取配置中的默认值
    pub fn with_defaults(
        table: &'a mut DictionaryTable,
        creator: Box<dyn BucketCreator>,
        defaults: &BucketDefaults,
    ) -> Self {
        let bucket_size = table_property_i64(
            table.header(),
            HEADER_BUCKET_SIZE_KEY,
            defaults.bucket_size as i64,
        )
        .max(1) as usize;
        let min_bucket_size = table_property_i64(
            table.header(),
            HEADER_MIN_BUCKET_SIZE_KEY,
            defaults.min_bucket_size as i64,
        )
        .max(1) as usize;
        let mut dirs: Vec<String> = table_property(table.header(), HEADER_BUCKET_DIRS_KEY, "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if dirs.is_empty() {
            dirs = defaults.bucket_dirs.clone();
        }

        let mut m = Self {
            table,
            creator,
            bucket_size,
            min_bucket_size,
            bucket_dirs: Vec::new(),
            grace_period: defaults.grace_period(),
        };
        m.set_bucket_dirs(&dirs);
        m
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    pub fn set_bucket_size(&mut self, size: usize) {
        self.bucket_size = size.max(1);
    }

    pub fn min_bucket_size(&self) -> usize {
        self.min_bucket_size
    }

    pub fn set_min_bucket_size(&mut self, size: usize) {
        self.min_bucket_size = size.max(1);
    }

    /// min 不超过 bucket size
    pub fn effective_min_bucket_size(&self) -> usize {
        self.min_bucket_size.min(self.bucket_size)
    }

    pub fn set_grace_period(&mut self, grace: Duration) {
        self.grace_period = grace;
    }

    /// 桶目录（root 相对或绝对）；为空时使用 `.<name>/buckets`
    pub fn set_bucket_dirs<S: AsRef<str>>(&mut self, dirs: &[S]) {
        let root = self.table.root().to_path_buf();
        self.bucket_dirs = dirs
            .iter()
            .map(|d| relativize(&root, d.as_ref()).trim_end_matches('/').to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if self.bucket_dirs.is_empty() {
            self.bucket_dirs.push(self.default_bucket_dir());
        }
    }

    pub fn bucket_dirs(&self) -> &[String] {
        &self.bucket_dirs
    }

    fn default_bucket_dir(&self) -> String {
        format!(".{}/buckets", self.table.name())
    }

    pub fn bucketize(&mut self, opts: &BucketizeOptions) -> Result<BucketizeReport> {
        if !self.table.bucketize_enabled() {
            tracing::info!(
                "Bucketize disabled for {:?} (BUCKETIZE=false)",
                self.table.path()
            );
            return Ok(BucketizeReport::default());
        }
        let max_count = if opts.max_bucket_count > 0 {
            opts.max_bucket_count
        } else {
            table_property_i64(
                self.table.header(),
                HEADER_BUCKET_MAX_BUCKETS,
                DEFAULT_MAX_BUCKET_COUNT,
            )
        };

        self.clean_temp_bucket_folders();
        let cleaned = self.clean_old_bucket_files(opts.force_clean)?;
        let mut report = self.do_bucketize(opts.pack_level, max_count)?;
        report.cleaned = cleaned;
        Ok(report)
    }

    fn do_bucketize(&mut self, pack_level: PackLevel, max_count: i64) -> Result<BucketizeReport> {
        let unbucketized = self.table.needs_bucketizing().len();
        let eff_min = self.effective_min_bucket_size();
        if pack_level == PackLevel::NoPacking && unbucketized < eff_min {
            tracing::debug!(
                "Bucketize - nothing to do, {} unbucketized but {} is minimum",
                unbucketized,
                eff_min
            );
            return Ok(BucketizeReport::default());
        }

        let all = self.table.all_entries();
        let to_delete = find_buckets_to_delete(&all, pack_level, unbucketized, self.bucket_size);
        let mut picker = DirPicker::new(&self.bucket_dirs, &all);
        let to_create = find_buckets_to_create(
            &all,
            &to_delete,
            self.bucket_size,
            eff_min,
            max_count,
            &bucket_name_prefix(self.table.name()),
            &mut picker,
        );
        tracing::debug!(
            "Bucketize - {} files into {} buckets, reclaiming {} buckets ({})",
            to_create.values().map(Vec::len).sum::<usize>(),
            to_create.len(),
            to_delete.len(),
            pack_level
        );

        for dir in self.bucket_dirs.clone() {
            let for_dir: BTreeMap<String, Vec<DictionaryEntry>> = to_create
                .iter()
                .filter(|(b, _)| logical_parent(b) == dir)
                .map(|(b, e)| (b.clone(), e.clone()))
                .collect();
            if for_dir.is_empty() {
                continue;
            }
            let abs_dir = resolve(self.table.root(), &dir);
            self.check_bucket_dir(&abs_dir, &dir)?;
            self.creator.create_buckets(self.table, &for_dir, &abs_dir)?;

            for (bucket, entries) in &for_dir {
                self.table.remove_from_bucket(entries);
                self.table.add_to_bucket(bucket, entries)?;
            }
            self.record_bucket_properties();
            self.table.save()?;
        }

        let deleted: Vec<String> = to_delete.into_iter().collect();
        if !deleted.is_empty() {
            self.delete_buckets(&deleted, false)?;
        }

        tracing::info!(
            "Bucketized {:?}: created {}, reclaimed {}",
            self.table.path(),
            to_create.len(),
            deleted.len()
        );
        Ok(BucketizeReport {
            created: to_create.into_keys().collect(),
            deleted,
            cleaned: Vec::new(),
        })
    }

    fn record_bucket_properties(&mut self) {
        let size = self.bucket_size.to_string();
        let min = self.min_bucket_size.to_string();
        let dirs = self.bucket_dirs.join(",");
        self.table.set_property(HEADER_BUCKET_SIZE_KEY, &size);
        self.table.set_property(HEADER_MIN_BUCKET_SIZE_KEY, &min);
        self.table.set_property(HEADER_BUCKET_DIRS_KEY, &dirs);
    }

    // 默认目录缺失时创建；自定义目录必须已存在
    fn check_bucket_dir(&self, abs_dir: &Path, logical: &str) -> Result<()> {
        let reader = self.table.reader();
        if reader.exists(abs_dir) {
            return Ok(());
        }
        if logical == self.default_bucket_dir() {
            return reader.create_dirs(abs_dir);
        }
        Err(TableError::Data(format!(
            "Bucket dirs must exist, directory {:?} is not found",
            abs_dir
        )))
    }

    /// 删除桶：宽限期外（或 force）的桶文件被删除，catalog 中的引用全部移除并提交。
    /// 原先在桶中的活动条目重新需要 bucketize。返回受影响的条目数
    pub fn delete_buckets<S: AsRef<str>>(&mut self, buckets: &[S], force: bool) -> Result<usize> {
        let buckets: Vec<String> = buckets
            .iter()
            .map(|b| relativize(self.table.root(), b.as_ref()))
            .collect();
        if buckets.is_empty() {
            return Ok(0);
        }
        self.delete_bucket_files(&buckets, force)?;

        let filter = self.table.filter().buckets(&buckets).include_deleted();
        let refs = self.table.select(&filter);
        let n = self.table.remove_from_bucket(&refs);
        self.table.save()?;
        tracing::info!("Removed {} bucket(s), {} entries affected", buckets.len(), n);
        Ok(n)
    }

    fn delete_bucket_files(&self, buckets: &[String], force: bool) -> Result<()> {
        let reader = self.table.reader();
        for bucket in buckets {
            let file = resolve(self.table.root(), bucket);
            if !reader.exists(&file) {
                continue;
            }
            if force || self.past_grace(&file)? {
                tracing::debug!("Deleting bucket file {:?}", file);
                reader.delete(&file)?;
            }
        }
        Ok(())
    }

    fn past_grace(&self, file: &Path) -> Result<bool> {
        let Some(last) = self.table.reader().last_used(file)? else {
            return Ok(true);
        };
        let age = SystemTime::now()
            .duration_since(last)
            .unwrap_or(Duration::ZERO);
        Ok(age > self.grace_period)
    }

    /// 删除遗留的 `bucketizing_<id>` 临时目录（尽力而为）
    fn clean_temp_bucket_folders(&self) {
        let prefix = creator::bucketizing_folder_prefix(self.table);
        let reader = self.table.reader();
        for dir in &self.bucket_dirs {
            let abs_dir = resolve(self.table.root(), dir);
            let listing = match reader.list(&abs_dir) {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("Could not list bucket dir {:?}: {}", abs_dir, e);
                    continue;
                }
            };
            for p in listing {
                let is_temp = p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(&prefix));
                if is_temp {
                    tracing::debug!("Deleting temp folder {:?}", p);
                    if let Err(e) = reader.delete_dir(&p) {
                        tracing::warn!("Failed to remove temp folder {:?}: {}", p, e);
                    }
                }
            }
        }
    }

    /// 清理桶目录中未被任何条目引用的本表桶文件（宽限期规则同上）
    fn clean_old_bucket_files(&mut self, force: bool) -> Result<Vec<String>> {
        let mut dirs: BTreeSet<String> = self.bucket_dirs.iter().cloned().collect();
        dirs.extend(
            self.table
                .buckets()
                .iter()
                .map(|b| logical_parent(b).to_string()),
        );

        let re = bucket_file_regex(self.table.name())?;
        let mut to_clean = Vec::new();
        for dir in dirs {
            let abs_dir = resolve(self.table.root(), &dir);
            for p in self.table.reader().list(&abs_dir)? {
                let Some(name) = p.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !re.is_match(name) || !(force || self.past_grace(&p)?) {
                    continue;
                }
                let logical = relativize(self.table.root(), &p.to_string_lossy());
                let filter = self.table.filter().buckets([&logical]);
                if self.table.select(&filter).is_empty() {
                    to_clean.push(logical);
                }
            }
        }

        if !to_clean.is_empty() {
            self.delete_buckets(&to_clean, force)?;
            for b in &to_clean {
                tracing::warn!("Bucket '{}' removed as it is not used", b);
            }
        }
        Ok(to_clean)
    }
}

fn bucket_file_regex(table_name: &str) -> Result<Regex> {
    let pattern = format!(
        r"^{}\d{{4}}_\d{{4}}_\d{{6}}_[a-z0-9]{{8}}_\d+\.{}$",
        regex::escape(&bucket_file_prefix(table_name)),
        BUCKET_FILE_EXT
    );
    Regex::new(&pattern).map_err(|e| TableError::Data(format!("Bad bucket name pattern: {}", e)))
}
