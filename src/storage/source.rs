use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{IoContext, Result, TableError};

/// 存储后端抽象（本地文件 / 对象存储 / 远程驱动）
///
/// 表引擎只通过这组窄接口访问数据；identity 是后端给出的“内容身份”信号，
/// 文件内容被替换时必须变化。
pub trait FileReader: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn read_lines(&self, path: &Path) -> Result<Vec<String>>;

    fn open_output(&self, path: &Path) -> Result<Box<dyn Write + Send>>;

    /// 写入并落盘（staging 用）
    fn write_durable(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut out = self.open_output(path)?;
        out.write_all(content).at(path)?;
        out.flush().at(path)
    }

    /// 追加写（history action log）
    fn append(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut existing = if self.exists(path) {
            self.read_lines(path)?.join("\n")
        } else {
            String::new()
        };
        if !existing.is_empty() {
            existing.push('\n');
        }
        let mut bytes = existing.into_bytes();
        bytes.extend_from_slice(content);
        self.write_durable(path, &bytes)
    }

    /// 原子替换 `to`（rename 语义）
    fn replace(&self, from: &Path, to: &Path) -> Result<()>;

    fn identity(&self, path: &Path) -> Result<Option<String>>;

    fn delete(&self, path: &Path) -> Result<()>;

    fn delete_dir(&self, path: &Path) -> Result<()>;

    fn create_dirs(&self, path: &Path) -> Result<()>;

    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// 最近一次访问（或修改）时间，用于 bucket 删除宽限期
    fn last_used(&self, path: &Path) -> Result<Option<SystemTime>>;

    /// 逻辑路径 -> 安全上下文（本地后端没有）
    fn security_context(&self, _path: &Path) -> Option<String> {
        None
    }
}

/// 本地文件系统后端
#[derive(Clone, Debug, Default)]
pub struct LocalFileReader;

impl LocalFileReader {
    pub fn shared() -> Arc<dyn FileReader> {
        Arc::new(LocalFileReader)
    }
}

impl FileReader for LocalFileReader {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_lines(&self, path: &Path) -> Result<Vec<String>> {
        let f = File::open(path).at(path)?;
        BufReader::new(f)
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .at(path)
    }

    fn open_output(&self, path: &Path) -> Result<Box<dyn Write + Send>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).at(parent)?;
        }
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .at(path)?;
        Ok(Box::new(BufWriter::new(f)))
    }

    fn write_durable(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).at(parent)?;
        }
        let mut f = File::create(path).at(path)?;
        f.write_all(content).at(path)?;
        // fsync：确保 staging 内容落盘后才允许 commit
        f.sync_all().at(path)
    }

    fn append(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).at(parent)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .at(path)?;
        f.write_all(content).at(path)?;
        f.flush().at(path)
    }

    fn replace(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to).at(to)?;

        // fsync(dir)：确保目录项更新落盘（best-effort）
        if let Some(parent) = to.parent() {
            if let Ok(dir) = File::open(parent) {
                if let Err(e) = dir.sync_all() {
                    tracing::debug!("fsync dir {:?} failed: {}", parent, e);
                }
            }
        }
        Ok(())
    }

    fn identity(&self, path: &Path) -> Result<Option<String>> {
        let md = match std::fs::metadata(path) {
            Ok(md) => md,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TableError::storage(path, e)),
        };
        let mtime = md
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Some(format!("{}-{}-{}", inode(&md), md.len(), mtime)))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(TableError::storage(path, e)),
            _ => Ok(()),
        }
    }

    fn delete_dir(&self, path: &Path) -> Result<()> {
        match std::fs::remove_dir_all(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(TableError::storage(path, e)),
            _ => Ok(()),
        }
    }

    fn create_dirs(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).at(path)
    }

    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let rd = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(TableError::storage(dir, e)),
        };
        for ent in rd {
            let Ok(ent) = ent else { continue };
            out.push(ent.path());
        }
        out.sort();
        Ok(out)
    }

    fn last_used(&self, path: &Path) -> Result<Option<SystemTime>> {
        match std::fs::metadata(path) {
            Ok(md) => Ok(md.accessed().or_else(|_| md.modified()).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TableError::storage(path, e)),
        }
    }
}

#[cfg(unix)]
fn inode(md: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    md.ino()
}

#[cfg(not(unix))]
fn inode(_md: &std::fs::Metadata) -> u64 {
    0
}

/// 合并输入：文件 + 可选 source 列取值
#[derive(Clone, Debug)]
pub struct MergeInput {
    pub path: PathBuf,
    pub source: Option<String>,
}

/// 外部数据变换管线请求
#[derive(Clone, Debug)]
pub enum PipelineRequest {
    /// 合并多个 tab 分隔基因组文件，按 (chrom, pos) 排序；
    /// `source_column` 非空时追加来源列
    Merge {
        inputs: Vec<MergeInput>,
        source_column: Option<String>,
    },
}

/// 运行管线并把结果物化到 `output`
pub trait PipelineRunner: Send + Sync {
    fn run(
        &self,
        request: &PipelineRequest,
        output: &Path,
        security_context: Option<&str>,
    ) -> Result<()>;
}

/// 本地合并管线（只做行级 merge，不涉及压缩编解码）
pub struct LocalPipeline {
    reader: Arc<dyn FileReader>,
}

impl LocalPipeline {
    pub fn new(reader: Arc<dyn FileReader>) -> Self {
        Self { reader }
    }

    pub fn shared(reader: Arc<dyn FileReader>) -> Arc<dyn PipelineRunner> {
        Arc::new(Self::new(reader))
    }
}

impl PipelineRunner for LocalPipeline {
    fn run(
        &self,
        request: &PipelineRequest,
        output: &Path,
        _security_context: Option<&str>,
    ) -> Result<()> {
        let PipelineRequest::Merge {
            inputs,
            source_column,
        } = request;

        let mut header: Option<String> = None;
        let mut rows: Vec<String> = Vec::new();
        for input in inputs {
            for line in self.reader.read_lines(&input.path)? {
                if let Some(cols) = line.strip_prefix('#') {
                    let cols = cols.to_string();
                    match &header {
                        None => header = Some(cols),
                        Some(h) if column_count(h) != column_count(&cols) => {
                            return Err(TableError::Pipeline {
                                output: output.to_path_buf(),
                                message: format!(
                                    "column count of {:?} does not match ({} vs {})",
                                    input.path,
                                    column_count(&cols),
                                    column_count(h)
                                ),
                            });
                        }
                        Some(_) => {}
                    }
                    continue;
                }
                if line.is_empty() {
                    continue;
                }
                match (source_column, &input.source) {
                    (Some(_), Some(src)) => rows.push(format!("{}\t{}", line, src)),
                    (Some(_), None) => rows.push(format!("{}\t", line)),
                    _ => rows.push(line),
                }
            }
        }

        rows.sort_by(|a, b| genomic_key(a).cmp(&genomic_key(b)));

        let mut out = String::new();
        if let Some(h) = header {
            out.push('#');
            out.push_str(&h);
            if let Some(col) = source_column {
                out.push('\t');
                out.push_str(col);
            }
            out.push('\n');
        }
        for r in &rows {
            out.push_str(r);
            out.push('\n');
        }
        self.reader.write_durable(output, out.as_bytes())?;

        tracing::debug!(
            "Pipeline merge: {} inputs, {} rows -> {:?}",
            inputs.len(),
            rows.len(),
            output
        );
        Ok(())
    }
}

fn column_count(header: &str) -> usize {
    header.split('\t').count()
}

/// 排序键：(chrom, pos)；pos 非数字按 0 处理
pub fn genomic_key(row: &str) -> (&str, u64) {
    let mut cols = row.split('\t');
    let chrom = cols.next().unwrap_or("");
    let pos = cols.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (chrom, pos)
}
