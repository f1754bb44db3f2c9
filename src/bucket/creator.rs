use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use sysinfo::System;

use crate::error::{Result, TableError};
use crate::model::{resolve, DictionaryEntry};
use crate::storage::{MergeInput, PipelineRequest, PipelineRunner};
use crate::table::{DictionaryTable, TableOps};

pub const DEFAULT_NUMBER_WORKERS: usize = 4;

/// 根据 CPU 数、负载与内存压力决定 worker 数
pub fn adaptive_workers() -> usize {
    let mut sys = System::new();
    sys.refresh_memory();

    let load = System::load_average().one;
    let cpu_count = num_cpus::get() as f64;
    let total_mem = sys.total_memory();
    let mem_pressure = if total_mem == 0 {
        0.0
    } else {
        1.0 - (sys.available_memory() as f64 / total_mem as f64)
    };

    let workers = if load < cpu_count * 0.3 && mem_pressure < 0.5 {
        // 空闲：I/O 密集，超额订阅
        (cpu_count * 2.0) as usize
    } else if load > cpu_count * 0.8 || mem_pressure > 0.8 {
        (cpu_count * 0.5) as usize
    } else {
        cpu_count as usize
    };
    tracing::debug!(
        "Adaptive bucket workers: {} (load: {:.2}, mem_pressure: {:.2})",
        workers,
        load,
        mem_pressure
    );
    workers.max(1)
}

/// 同一个表同一时刻只允许一个 bucketize 临时目录
pub fn bucketizing_folder_prefix(table: &DictionaryTable) -> String {
    format!("bucketizing_{}", table.paths().table_id())
}

/// 生成桶文件
pub trait BucketCreator: Send + Sync {
    /// `buckets`：桶逻辑路径（root 相对）-> 条目；全部位于 `abs_bucket_dir`
    fn create_buckets(
        &self,
        table: &DictionaryTable,
        buckets: &BTreeMap<String, Vec<DictionaryEntry>>,
        abs_bucket_dir: &Path,
    ) -> Result<()>;
}

/// 用数据管线合并条目文件生成桶；每个桶一个任务，在 rayon 池中并行执行
///
/// 1) 在桶目录下创建 `bucketizing_<table id>/` 临时目录
/// 2) 并行运行管线，全部完成后（barrier）再移动到最终位置
/// 3) 删除临时目录；任一任务失败时不移动任何文件
pub struct PipelineBucketCreator {
    pipeline: Arc<dyn PipelineRunner>,
    workers: usize,
}

impl PipelineBucketCreator {
    /// `workers == 0`：自适应
    pub fn new(pipeline: Arc<dyn PipelineRunner>, workers: usize) -> Self {
        Self { pipeline, workers }
    }

    pub fn workers(&self) -> usize {
        if self.workers == 0 {
            adaptive_workers()
        } else {
            self.workers
        }
    }

    fn run_one(
        &self,
        table: &DictionaryTable,
        entries: &[DictionaryEntry],
        output: &Path,
        source_column: &str,
        security_context: Option<&str>,
    ) -> Result<()> {
        let inputs = entries
            .iter()
            .map(|e| MergeInput {
                path: resolve(table.root(), e.content()),
                source: e
                    .alias()
                    .or_else(|| e.filter_tags().first().map(String::as_str))
                    .map(str::to_string),
            })
            .collect();
        let request = PipelineRequest::Merge {
            inputs,
            source_column: Some(source_column.to_string()),
        };
        self.pipeline.run(&request, output, security_context)
    }
}

impl BucketCreator for PipelineBucketCreator {
    fn create_buckets(
        &self,
        table: &DictionaryTable,
        buckets: &BTreeMap<String, Vec<DictionaryEntry>>,
        abs_bucket_dir: &Path,
    ) -> Result<()> {
        if buckets.is_empty() {
            return Ok(());
        }
        let reader = table.reader().clone();
        let work_dir = abs_bucket_dir.join(bucketizing_folder_prefix(table));
        if reader.exists(&work_dir) {
            return Err(TableError::Data(format!(
                "Bucketization already in progress ({:?} exists)",
                work_dir
            )));
        }
        reader.create_dirs(&work_dir)?;

        let source_column = table.source_column();
        let security_context = reader.security_context(table.path());
        let jobs: Vec<(&String, &Vec<DictionaryEntry>, PathBuf)> = buckets
            .iter()
            .map(|(bucket, entries)| {
                let file = Path::new(bucket)
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(bucket));
                (bucket, entries, work_dir.join(file))
            })
            .collect();

        let workers = self.workers();
        let result = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("gortable-bucket-{}", i))
            .build()
            .map_err(|e| TableError::Data(format!("Could not start bucket workers: {}", e)))
            .and_then(|pool| {
                pool.install(|| {
                    jobs.par_iter()
                        .map(|(_, entries, temp)| {
                            self.run_one(
                                table,
                                entries,
                                temp,
                                &source_column,
                                security_context.as_deref(),
                            )
                        })
                        .collect::<Result<Vec<()>>>()
                })
            })
            .and_then(|_| {
                for (bucket, _, temp) in &jobs {
                    reader.replace(temp, &resolve(table.root(), bucket))?;
                }
                Ok(())
            });

        if let Err(e) = reader.delete_dir(&work_dir) {
            tracing::warn!("Failed to remove bucketizing folder {:?}: {}", work_dir, e);
        }
        if result.is_ok() {
            tracing::info!(
                "Created {} bucket(s) in {:?} with {} worker(s)",
                jobs.len(),
                abs_bucket_dir,
                workers
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalFileReader, LocalPipeline};

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("gor-table-creator-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn adaptive_workers_is_positive() {
        assert!(adaptive_workers() >= 1);
    }

    #[test]
    fn buckets_are_merged_with_source_column() {
        let dir = unique_tmp_dir("merge");
        std::fs::write(dir.join("a.gor"), "#chrom\tpos\nchr1\t5\n").unwrap();
        std::fs::write(dir.join("b.gor"), "#chrom\tpos\nchr1\t3\n").unwrap();
        let reader = LocalFileReader::shared();
        let mut t = DictionaryTable::open(&dir.join("t.gord"), reader.clone()).unwrap();
        let a = DictionaryEntry::builder("a.gor", &dir).alias("A").build();
        let b = DictionaryEntry::builder("b.gor", &dir).alias("B").build();
        t.insert(vec![a.clone(), b.clone()]).unwrap();

        std::fs::create_dir_all(dir.join("bk")).unwrap();
        let mut buckets = BTreeMap::new();
        buckets.insert("bk/t_bucket_1.gor".to_string(), vec![a, b]);
        let creator = PipelineBucketCreator::new(LocalPipeline::shared(reader), 2);
        creator
            .create_buckets(&t, &buckets, &dir.join("bk"))
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.join("bk/t_bucket_1.gor")).unwrap(),
            "#chrom\tpos\tPN\nchr1\t3\tB\nchr1\t5\tA\n"
        );
        // 临时目录已清理
        let left: Vec<_> = std::fs::read_dir(dir.join("bk")).unwrap().collect();
        assert_eq!(left.len(), 1);
    }

    #[test]
    fn failed_job_moves_nothing() {
        let dir = unique_tmp_dir("fail");
        let reader = LocalFileReader::shared();
        let t = DictionaryTable::open(&dir.join("t.gord"), reader.clone()).unwrap();
        let missing = DictionaryEntry::builder("missing.gor", &dir).alias("M").build();
        std::fs::create_dir_all(dir.join("bk")).unwrap();
        let mut buckets = BTreeMap::new();
        buckets.insert("bk/t_bucket_1.gor".to_string(), vec![missing]);

        let creator = PipelineBucketCreator::new(LocalPipeline::shared(reader), 1);
        assert!(creator.create_buckets(&t, &buckets, &dir.join("bk")).is_err());
        assert!(!dir.join("bk/t_bucket_1.gor").exists());
        assert!(std::fs::read_dir(dir.join("bk")).unwrap().next().is_none());
    }
}
