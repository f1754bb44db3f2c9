use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, TableError};
use crate::model::{GenomicRange, TableHeader};
use crate::storage::source::genomic_key;
use crate::storage::{
    CommitOutcome, CommitSupport, FileReader, HistoryAction, HistoryRecord, MergeInput,
    PipelineRequest, PipelineRunner, TablePaths,
};
use crate::table::{EntryFactory, TableOps};

/// 数据文件中的一行（tab 分隔，前两列为 chrom / pos）
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RowEntry {
    line: String,
}

impl RowEntry {
    pub fn new(line: &str) -> Self {
        Self {
            line: line.trim_end_matches(&['\n', '\r'][..]).to_string(),
        }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn into_line(self) -> String {
        self.line
    }

    pub fn chrom(&self) -> &str {
        genomic_key(&self.line).0
    }

    pub fn pos(&self) -> u64 {
        genomic_key(&self.line).1
    }
}

pub struct RowFactory;

impl EntryFactory for RowFactory {
    type Entry = RowEntry;

    fn parse(&self, line: &str) -> Result<RowEntry> {
        if line.starts_with('#') {
            return Err(TableError::parse("Header line is not a data row", line));
        }
        Ok(RowEntry::new(line))
    }

    fn format(&self, entry: &RowEntry) -> String {
        entry.line.clone()
    }
}

/// 数据文件表（`.gor` 等 tab 分隔文件）
///
/// insert 通过管线把现有内容与新文件合并到事务目录中的结果文件；
/// delete 把剩余行写入新的结果文件。commit 时结果文件替换 canonical 文件。
pub struct FileTable {
    paths: TablePaths,
    reader: Arc<dyn FileReader>,
    pipeline: Arc<dyn PipelineRunner>,
    header: TableHeader,
    identity: Option<String>,
    support: CommitSupport,
    temp_out: Option<PathBuf>,
}

impl FileTable {
    pub fn open(
        path: &Path,
        reader: Arc<dyn FileReader>,
        pipeline: Arc<dyn PipelineRunner>,
    ) -> Result<Self> {
        let paths = TablePaths::from_main(path);
        let mut t = Self {
            support: CommitSupport::new(paths.clone(), reader.clone()),
            paths,
            reader,
            pipeline,
            header: TableHeader::new(),
            identity: None,
            temp_out: None,
        };
        t.reload()?;
        Ok(t)
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    pub fn set_use_history(&mut self, use_history: bool) {
        self.support.set_use_history(use_history);
    }

    /// 未提交的结果文件优先，否则 canonical 文件
    fn current_source(&self) -> Option<PathBuf> {
        match &self.temp_out {
            Some(p) => Some(p.clone()),
            None if self.reader.exists(&self.paths.main) => Some(self.paths.main.clone()),
            None => None,
        }
    }

    pub fn rows(&self) -> Result<Vec<RowEntry>> {
        let Some(src) = self.current_source() else {
            return Ok(Vec::new());
        };
        let factory = RowFactory;
        self.reader
            .read_lines(&src)?
            .iter()
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| factory.parse(l))
            .collect()
    }

    /// 落在区间内的行
    pub fn select_range(&self, range: &GenomicRange) -> Result<Vec<RowEntry>> {
        self.filter(&|r: &RowEntry| range.contains_position(r.chrom(), r.pos() as i64))
    }

    /// 把文件合并进表（按 chrom/pos 排序）
    pub fn insert_files(&mut self, files: &[PathBuf]) -> Result<usize> {
        if files.is_empty() {
            return Ok(0);
        }
        for f in files {
            if !self.reader.exists(f) {
                return Err(TableError::Data(format!("Input file {:?} does not exist", f)));
            }
        }

        let mut inputs: Vec<MergeInput> = Vec::with_capacity(files.len() + 1);
        if let Some(src) = self.current_source() {
            inputs.push(MergeInput {
                path: src,
                source: None,
            });
        }
        inputs.extend(files.iter().map(|f| MergeInput {
            path: f.clone(),
            source: None,
        }));

        let out = self
            .support
            .new_temp_path("result_temp", &self.paths.ext)?;
        let request = PipelineRequest::Merge {
            inputs,
            source_column: None,
        };
        let ctx = self.reader.security_context(&self.paths.main);
        self.pipeline.run(&request, &out, ctx.as_deref())?;
        self.replace_temp_out(out);

        for f in files {
            self.support.log(HistoryRecord::new(
                HistoryAction::Insert,
                "",
                f.to_string_lossy().into_owned(),
            ));
        }
        Ok(files.len())
    }

    fn replace_temp_out(&mut self, out: PathBuf) {
        if let Some(prev) = self.temp_out.replace(out) {
            if let Err(e) = self.reader.delete(&prev) {
                tracing::debug!("Failed to remove intermediate {:?}: {}", prev, e);
            }
        }
    }

    fn write_rows(&mut self, prefix: &str, rows: &[RowEntry]) -> Result<PathBuf> {
        let path = self.support.new_temp_path(prefix, &self.paths.ext)?;
        let mut text = self.header.format();
        for r in rows {
            text.push_str(r.line());
            text.push('\n');
        }
        self.reader.write_durable(&path, text.as_bytes())?;
        Ok(path)
    }

    pub fn reload(&mut self) -> Result<()> {
        self.identity = self.reader.identity(&self.paths.main)?;
        self.header = TableHeader::new();
        if self.identity.is_some() {
            for line in self.reader.read_lines(&self.paths.main)? {
                if !self.header.parse_line(&line) {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl TableOps for FileTable {
    type Entry = RowEntry;

    fn paths(&self) -> &TablePaths {
        &self.paths
    }

    fn insert(&mut self, entries: Vec<RowEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let input = self.write_rows("input_temp", &entries)?;
        self.insert_files(&[input.clone()])?;
        if let Err(e) = self.reader.delete(&input) {
            tracing::debug!("Failed to remove input {:?}: {}", input, e);
        }
        Ok(entries.len())
    }

    /// 过滤掉与给定行完全相同的行
    fn delete(&mut self, entries: &[RowEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let doomed: HashSet<&str> = entries.iter().map(RowEntry::line).collect();
        let rows = self.rows()?;
        let before = rows.len();
        let kept: Vec<RowEntry> = rows
            .into_iter()
            .filter(|r| !doomed.contains(r.line()))
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }
        let out = self.write_rows("result_temp", &kept)?;
        self.replace_temp_out(out);
        for e in entries {
            self.support
                .log(HistoryRecord::new(HistoryAction::Delete, "", e.line.clone()));
        }
        Ok(removed)
    }

    fn filter(&self, pred: &dyn Fn(&RowEntry) -> bool) -> Result<Vec<RowEntry>> {
        Ok(self.rows()?.into_iter().filter(|r| pred(r)).collect())
    }

    fn commit_request(&mut self) -> Result<()> {
        self.support.verify_unchanged(self.identity.as_deref())?;
        if let Some(out) = self.temp_out.take() {
            self.support.stage_main_from(&out)?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<CommitOutcome> {
        let empty = self.header.format();
        let outcome = self.support.commit(empty.as_bytes(), 0)?;
        self.reload()?;
        Ok(outcome)
    }

    fn abort(&mut self) {
        self.temp_out = None;
        self.support.abort();
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
        let dir = std::env::temp_dir().join(format!("gor-table-file-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn open(path: &Path) -> FileTable {
        let reader = LocalFileReader::shared();
        FileTable::open(path, reader.clone(), LocalPipeline::shared(reader)).unwrap()
    }

    #[test]
    fn insert_files_merges_sorted() {
        let dir = unique_tmp_dir("merge");
        let main = dir.join("data.gor");
        std::fs::write(&main, "#chrom\tpos\tval\nchr1\t10\ta\nchr2\t5\tb\n").unwrap();
        let extra = dir.join("extra.gor");
        std::fs::write(&extra, "#chrom\tpos\tval\nchr1\t20\tc\nchr1\t2\td\n").unwrap();

        let mut t = open(&main);
        assert_eq!(t.insert_files(&[extra]).unwrap(), 1);
        // 提交前 canonical 不变
        assert_eq!(
            std::fs::read_to_string(&main).unwrap(),
            "#chrom\tpos\tval\nchr1\t10\ta\nchr2\t5\tb\n"
        );
        t.save().unwrap();

        assert_eq!(
            std::fs::read_to_string(&main).unwrap(),
            "#chrom\tpos\tval\nchr1\t2\td\nchr1\t10\ta\nchr1\t20\tc\nchr2\t5\tb\n"
        );
        assert_eq!(t.header().columns(), &["chrom", "pos", "val"]);
    }

    #[test]
    fn delete_filters_raw_lines() {
        let dir = unique_tmp_dir("delete");
        let main = dir.join("data.gor");
        std::fs::write(&main, "#chrom\tpos\nchr1\t1\nchr1\t2\nchr1\t3\n").unwrap();

        let mut t = open(&main);
        let n = t
            .delete(&[RowEntry::new("chr1\t2"), RowEntry::new("chr9\t9")])
            .unwrap();
        assert_eq!(n, 1);
        t.save().unwrap();
        assert_eq!(
            std::fs::read_to_string(&main).unwrap(),
            "#chrom\tpos\nchr1\t1\nchr1\t3\n"
        );
    }

    #[test]
    fn insert_rows_and_select_range() {
        let dir = unique_tmp_dir("rows");
        let main = dir.join("data.gor");
        std::fs::write(&main, "#chrom\tpos\nchr1\t100\n").unwrap();

        let mut t = open(&main);
        t.insert(vec![RowEntry::new("chr1\t50"), RowEntry::new("chr2\t1")])
            .unwrap();
        let lines: Vec<String> = t.rows().unwrap().into_iter().map(RowEntry::into_line).collect();
        assert_eq!(lines, vec!["chr1\t50", "chr1\t100", "chr2\t1"]);

        let r = GenomicRange::parse("chr1:60-chr1:200").unwrap();
        let hits = t.select_range(&r).unwrap();
        assert_eq!(hits, vec![RowEntry::new("chr1\t100")]);
    }

    #[test]
    fn mismatched_columns_fail_before_commit() {
        let dir = unique_tmp_dir("columns");
        let main = dir.join("data.gor");
        std::fs::write(&main, "#chrom\tpos\nchr1\t1\n").unwrap();
        let bad = dir.join("bad.gor");
        std::fs::write(&bad, "#chrom\tpos\textra\nchr1\t2\tx\n").unwrap();

        let mut t = open(&main);
        assert!(matches!(
            t.insert_files(&[bad]),
            Err(TableError::Pipeline { .. })
        ));
        t.abort();
        assert_eq!(std::fs::read_to_string(&main).unwrap(), "#chrom\tpos\nchr1\t1\n");
    }
}
