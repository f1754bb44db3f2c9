pub mod commit;
pub mod history;
pub mod layout;
pub mod source;

pub use commit::{CommitOutcome, CommitState, CommitSupport};
pub use history::{HistoryAction, HistoryRecord, HistoryRetention, HistoryStore};
pub use layout::TablePaths;
pub use source::{
    FileReader, LocalFileReader, LocalPipeline, MergeInput, PipelineRequest, PipelineRunner,
};

use std::sync::atomic::{AtomicU64, Ordering};

static SUFFIX_COUNTER: AtomicU64 = AtomicU64::new(0);

const ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub(crate) fn now_nanos() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// UTC 时间分解（表头 CREATED / bucket 文件名）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CivilTime {
    pub year: i64,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl CivilTime {
    pub fn now() -> Self {
        Self::from_unix_secs((now_nanos() / 1_000_000_000) as i64)
    }

    // days-from-civil 的逆运算（proleptic Gregorian）
    pub fn from_unix_secs(secs: i64) -> Self {
        let days = secs.div_euclid(86_400);
        let rem = secs.rem_euclid(86_400);
        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z.rem_euclid(146_097);
        let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
        let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
        let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
        Self {
            year,
            month,
            day,
            hour: (rem / 3_600) as u32,
            minute: (rem % 3_600 / 60) as u32,
            second: (rem % 60) as u32,
        }
    }

    /// `yyyy-MM-dd HH:mm`
    pub fn created_stamp(&self) -> String {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }

    /// `yyyy_MMdd_HHmmss`
    pub fn file_stamp(&self) -> String {
        format!(
            "{:04}_{:02}{:02}_{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// 8 位随机后缀（临时文件 / 事务目录 / bucket 文件名）
pub fn random_suffix() -> String {
    let seq = SUFFIX_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut seed = [0u8; 20];
    seed[0..8].copy_from_slice(&now_nanos().to_le_bytes());
    seed[8..16].copy_from_slice(&seq.to_le_bytes());
    seed[16..20].copy_from_slice(&std::process::id().to_le_bytes());
    let mut h = xxhash_rust::xxh3::xxh3_64(&seed);

    let mut out = String::with_capacity(8);
    for _ in 0..8 {
        out.push(ALPHABET[(h % 36) as usize] as char);
        h /= 36;
    }
    out
}
