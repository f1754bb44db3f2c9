use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Result, TableError};

pub const MIN_START_POS: i32 = 0;
pub const MAX_STOP_POS: i32 = i32::MAX;
pub const MAX_STOP_CHR: &str = "~";

/// 基因组区间 `(startChr, startPos, stopChr, stopPos)`
///
/// 每个字段独立可 unset（`None`）。规范化规则：
/// - stop chr 缺省 = start chr
/// - stop pos 缺省 = `MAX_STOP_POS`
/// - start pos 缺省 = `MIN_START_POS`
///
/// 全部 unset 即 `EMPTY`（全基因组，不做限制）。相等性按 tab 规范形式比较。
#[derive(Clone, Debug, Default)]
pub struct GenomicRange {
    start_chr: Option<String>,
    start_pos: Option<i32>,
    stop_chr: Option<String>,
    stop_pos: Option<i32>,
}

impl GenomicRange {
    pub const EMPTY: GenomicRange = GenomicRange {
        start_chr: None,
        start_pos: None,
        stop_chr: None,
        stop_pos: None,
    };

    pub fn new(
        start_chr: Option<&str>,
        start_pos: Option<i32>,
        stop_chr: Option<&str>,
        stop_pos: Option<i32>,
    ) -> Self {
        Self {
            start_chr: start_chr.filter(|s| !s.is_empty()).map(str::to_string),
            start_pos: start_pos.filter(|p| *p >= 0),
            stop_chr: stop_chr.filter(|s| !s.is_empty()).map(str::to_string),
            stop_pos: stop_pos.filter(|p| *p >= 0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start_chr.is_none()
            && self.start_pos.is_none()
            && self.stop_chr.is_none()
            && self.stop_pos.is_none()
    }

    pub fn start_chr(&self) -> &str {
        self.start_chr.as_deref().unwrap_or("")
    }

    pub fn start_pos(&self) -> i32 {
        self.start_pos.unwrap_or(MIN_START_POS)
    }

    pub fn stop_chr(&self) -> &str {
        self.stop_chr
            .as_deref()
            .or(self.start_chr.as_deref())
            .unwrap_or(MAX_STOP_CHR)
    }

    pub fn stop_pos(&self) -> i32 {
        self.stop_pos.unwrap_or(MAX_STOP_POS)
    }

    /// (chr, pos) 是否落在区间内；EMPTY 包含一切
    pub fn contains_position(&self, chr: &str, pos: i64) -> bool {
        if self.is_empty() {
            return true;
        }
        let start = (self.start_chr(), self.start_pos() as i64);
        let stop = (self.stop_chr(), self.stop_pos() as i64);
        start <= (chr, pos) && (chr, pos) <= stop
    }

    /// tab 规范形式（catalog 第 3-6 列）
    pub fn to_tab_string(&self) -> String {
        if self.is_empty() {
            return "\t\t\t".to_string();
        }
        format!(
            "{}\t{}\t{}\t{}",
            self.start_chr(),
            self.start_pos(),
            self.stop_chr(),
            self.stop_pos()
        )
    }

    /// 解析区间：tab 四列形式或 `chr:pos-chr:pos` 形式；空串 => EMPTY
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::EMPTY);
        }
        if input.contains('\t') {
            return Self::parse_tab(input);
        }

        let s = input.trim();
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() > 2 {
            return Err(TableError::parse("Could not parse genomic range", input));
        }

        let (start_chr, start_pos) = split_chr_pos(parts[0], input)?;
        let Some(start_chr) = start_chr else {
            return Err(TableError::parse(
                "Genomic range is missing start chromosome",
                input,
            ));
        };

        let (stop_chr, stop_pos) = match parts.get(1) {
            None => (None, None),
            Some(stop) if stop.contains(':') => {
                let (c, p) = split_chr_pos(stop, input)?;
                (c.or_else(|| Some(start_chr.clone())), p)
            }
            Some(stop) if stop.starts_with("chr") => (Some(stop.to_string()), None),
            Some(stop) => (Some(start_chr.clone()), parse_pos(stop, input)?),
        };

        Ok(Self {
            start_chr: Some(start_chr),
            start_pos,
            stop_chr,
            stop_pos,
        })
    }

    fn parse_tab(input: &str) -> Result<Self> {
        let cols: Vec<&str> = input.split('\t').collect();
        if cols.len() != 4 {
            return Err(TableError::parse(
                "Expected 4 columns for genomic range specification",
                input,
            ));
        }
        Ok(Self {
            start_chr: parse_chr(cols[0]),
            start_pos: parse_pos(cols[1], input)?,
            stop_chr: parse_chr(cols[2]),
            stop_pos: parse_pos(cols[3], input)?,
        })
    }
}

fn parse_chr(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() || s == "?" {
        None
    } else {
        Some(s.to_string())
    }
}

// 旧版 catalog 用 -1 表示 unset
fn parse_pos(s: &str, input: &str) -> Result<Option<i32>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    match s.parse::<i64>() {
        Ok(-1) => Ok(None),
        Ok(v) if (0..=MAX_STOP_POS as i64).contains(&v) => Ok(Some(v as i32)),
        _ => Err(TableError::parse("Invalid chromosome location", input)),
    }
}

fn split_chr_pos(part: &str, input: &str) -> Result<(Option<String>, Option<i32>)> {
    match part.split_once(':') {
        Some((chr, pos)) => Ok((parse_chr(chr), parse_pos(pos, input)?)),
        None => Ok((parse_chr(part), None)),
    }
}

impl fmt::Display for GenomicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        write!(
            f,
            "{}:{}-{}:{}",
            self.start_chr(),
            self.start_pos(),
            self.stop_chr(),
            self.stop_pos()
        )
    }
}

impl PartialEq for GenomicRange {
    fn eq(&self, other: &Self) -> bool {
        self.to_tab_string() == other.to_tab_string()
    }
}

impl Eq for GenomicRange {}

impl Hash for GenomicRange {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_tab_string().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_position_within_bounds() {
        let r = GenomicRange::parse("chr1:100-chr2:50").unwrap();
        assert!(r.contains_position("chr1", 100));
        assert!(r.contains_position("chr1", 9_999_999));
        assert!(r.contains_position("chr2", 50));
        assert!(!r.contains_position("chr2", 51));
        assert!(!r.contains_position("chr1", 99));
        assert!(GenomicRange::EMPTY.contains_position("chrX", 1));

        let whole_chr = GenomicRange::parse("chr3").unwrap();
        assert!(whole_chr.contains_position("chr3", 0));
        assert!(!whole_chr.contains_position("chr4", 0));
    }

    #[test]
    fn empty_range_formats_as_three_tabs() {
        assert!(GenomicRange::parse("").unwrap().is_empty());
        assert!(GenomicRange::parse("  ").unwrap().is_empty());
        assert_eq!(GenomicRange::EMPTY.to_tab_string(), "\t\t\t");
        assert_eq!(GenomicRange::EMPTY.to_string(), "");
    }

    #[test]
    fn defaults_apply_to_unset_fields() {
        let r = GenomicRange::parse("chr1").unwrap();
        assert_eq!(r.to_tab_string(), "chr1\t0\tchr1\t2147483647");
        assert_eq!(r.to_string(), "chr1:0-chr1:2147483647");
    }

    #[test]
    fn colon_form_variants() {
        let r = GenomicRange::parse("chr1:100-chr2:200").unwrap();
        assert_eq!(r.to_tab_string(), "chr1\t100\tchr2\t200");

        // 单个 stop 项：以 chr 开头为染色体，否则为位置
        let r = GenomicRange::parse("chr1:100-chr3").unwrap();
        assert_eq!(r.to_tab_string(), "chr1\t100\tchr3\t2147483647");
        let r = GenomicRange::parse("chr1:100-500").unwrap();
        assert_eq!(r.to_tab_string(), "chr1\t100\tchr1\t500");

        // 空 stop chr 取 start chr
        let r = GenomicRange::parse("chr2:5-:10").unwrap();
        assert_eq!(r.to_tab_string(), "chr2\t5\tchr2\t10");
    }

    #[test]
    fn tab_form_parses_and_accepts_legacy_unset() {
        let r = GenomicRange::parse("chr1\t-1\tchr1\t-1").unwrap();
        assert_eq!(r, GenomicRange::parse("chr1").unwrap());
        let r = GenomicRange::parse("chr1\t10\tchr2\t20").unwrap();
        assert_eq!(r.to_string(), "chr1:10-chr2:20");
        assert!(GenomicRange::parse("\t\t\t").unwrap().is_empty());
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        assert!(matches!(
            GenomicRange::parse("chr1:1-chr1:2-chr1:3"),
            Err(TableError::Parse { .. })
        ));
        assert!(GenomicRange::parse(":100").is_err());
        assert!(GenomicRange::parse("chr1:abc").is_err());
        assert!(GenomicRange::parse("chr1\t1\tchr1").is_err());
    }

    #[test]
    fn equality_uses_canonical_form() {
        let a = GenomicRange::new(Some("chr1"), None, None, None);
        let b = GenomicRange::new(Some("chr1"), Some(0), Some("chr1"), Some(MAX_STOP_POS));
        assert_eq!(a, b);
        assert_ne!(a, GenomicRange::EMPTY);
    }
}
