use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::TableError;
use crate::model::DictionaryEntry;
use crate::storage::{random_suffix, CivilTime};

/// 重新打包策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum PackLevel {
    /// 只处理未入桶的条目（以及全部删除的桶）
    #[serde(rename = "NO_PACKING")]
    NoPacking,
    /// 用最小的未满桶填满新桶
    #[default]
    #[serde(rename = "CONSOLIDATE")]
    Consolidate,
    /// 所有未满桶全部重建
    #[serde(rename = "FULL_PACKING")]
    FullPacking,
}

impl FromStr for PackLevel {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NO_PACKING" => Ok(PackLevel::NoPacking),
            "CONSOLIDATE" => Ok(PackLevel::Consolidate),
            "FULL_PACKING" => Ok(PackLevel::FullPacking),
            _ => Err(TableError::parse(
                "Unknown pack level, expected NO_PACKING, CONSOLIDATE or FULL_PACKING",
                s,
            )),
        }
    }
}

impl fmt::Display for PackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackLevel::NoPacking => "NO_PACKING",
            PackLevel::Consolidate => "CONSOLIDATE",
            PackLevel::FullPacking => "FULL_PACKING",
        })
    }
}

pub const BUCKET_FILE_EXT: &str = "gor";

/// `<name>_bucket_`
pub fn bucket_file_prefix(table_name: &str) -> String {
    format!("{}_bucket_", table_name)
}

/// `<name>_bucket_<yyyy_MMdd_HHmmss>_<rand8>_`，后接序号与扩展名
pub fn bucket_name_prefix(table_name: &str) -> String {
    format!(
        "{}{}_{}_",
        bucket_file_prefix(table_name),
        CivilTime::now().file_stamp(),
        random_suffix()
    )
}

/// 逻辑路径的父目录（无目录部分时为空串）
pub fn logical_parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

pub fn logical_join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// 每个桶的活动（未删除）条目数
fn active_counts(entries: &[DictionaryEntry]) -> HashMap<&str, usize> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for e in entries {
        if let Some(b) = e.bucket() {
            *counts.entry(b).or_insert(0) += usize::from(!e.is_deleted());
        }
    }
    counts
}

/// 需要回收（重建）的桶
///
/// - 活动条目为 0 的桶总是回收
/// - FULL_PACKING：所有未满桶
/// - CONSOLIDATE：计算新建满桶后剩余的空位，从最小的未满桶开始填入
pub fn find_buckets_to_delete(
    entries: &[DictionaryEntry],
    pack_level: PackLevel,
    unbucketized: usize,
    bucket_size: usize,
) -> BTreeSet<String> {
    let counts = active_counts(entries);
    let mut out: BTreeSet<String> = counts
        .iter()
        .filter(|(_, &n)| n == 0)
        .map(|(b, _)| b.to_string())
        .collect();

    match pack_level {
        PackLevel::NoPacking => {}
        PackLevel::FullPacking => {
            out.extend(
                counts
                    .iter()
                    .filter(|(_, &n)| n < bucket_size)
                    .map(|(b, _)| b.to_string()),
            );
        }
        PackLevel::Consolidate => {
            let mut partial: Vec<(&str, usize)> = counts
                .iter()
                .filter(|(_, &n)| n < bucket_size)
                .map(|(b, &n)| (*b, n))
                .collect();
            partial.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

            let needing = unbucketized + partial.iter().map(|(_, n)| n).sum::<usize>();
            let new_buckets = needing / bucket_size.max(1);
            let mut space_left = (new_buckets * bucket_size) as i64 - unbucketized as i64;
            for (b, n) in partial {
                if space_left <= 0 {
                    break;
                }
                out.insert(b.to_string());
                space_left -= n as i64;
            }
        }
    }
    out
}

/// least-used 策略挑选桶目录：已被 catalog 引用次数最少者优先
#[derive(Debug)]
pub struct DirPicker {
    counts: Vec<(String, u64)>,
}

impl DirPicker {
    pub fn new(bucket_dirs: &[String], entries: &[DictionaryEntry]) -> Self {
        let counts = bucket_dirs
            .iter()
            .map(|d| {
                let used = entries
                    .iter()
                    .filter_map(DictionaryEntry::bucket)
                    .filter(|b| logical_parent(b) == d.trim_end_matches('/'))
                    .count() as u64;
                (d.clone(), used)
            })
            .collect();
        Self { counts }
    }

    pub fn pick(&mut self) -> Option<String> {
        let slot = self
            .counts
            .iter_mut()
            .enumerate()
            .min_by_key(|(i, (_, n))| (*n, *i))
            .map(|(_, s)| s)?;
        slot.1 += 1;
        Some(slot.0.clone())
    }
}

/// 需要新建的桶：未入桶的行 + 位于待回收桶中的活动行
///
/// 桶数 = ceil(n / size)，最后一个桶不足最小值时少建一个；`max_count > 0` 时封顶
pub fn find_buckets_to_create(
    entries: &[DictionaryEntry],
    to_delete: &BTreeSet<String>,
    bucket_size: usize,
    effective_min: usize,
    max_count: i64,
    name_prefix: &str,
    picker: &mut DirPicker,
) -> BTreeMap<String, Vec<DictionaryEntry>> {
    let lines: Vec<&DictionaryEntry> = entries
        .iter()
        .filter(|e| match e.bucket() {
            None => true,
            Some(b) => !e.is_deleted() && to_delete.contains(b),
        })
        .collect();

    let size = bucket_size.max(1);
    let mut count = lines.len().div_ceil(size);
    if count > 0 && lines.len() - (count - 1) * size < effective_min {
        count -= 1;
    }
    if max_count > 0 {
        count = count.min(max_count as usize);
    }

    let mut out = BTreeMap::new();
    for i in 1..=count {
        let Some(dir) = picker.pick() else {
            break;
        };
        let start = (i - 1) * size;
        let end = (start + size).min(lines.len());
        let name = format!("{}{}.{}", name_prefix, i, BUCKET_FILE_EXT);
        out.insert(
            logical_join(&dir, &name),
            lines[start..end].iter().map(|e| (*e).clone()).collect(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn root() -> &'static Path {
        Path::new("/data")
    }

    fn entry(content: &str, bucket: Option<&str>, deleted: bool) -> DictionaryEntry {
        let mut b = DictionaryEntry::builder(content, root())
            .alias(content)
            .deleted(deleted);
        if let Some(bk) = bucket {
            b = b.bucket(bk);
        }
        b.build()
    }

    fn bucketed(prefix: &str, bucket: &str, n: usize) -> Vec<DictionaryEntry> {
        (0..n)
            .map(|i| entry(&format!("{}{}.gor", prefix, i), Some(bucket), false))
            .collect()
    }

    fn unbucketed(n: usize) -> Vec<DictionaryEntry> {
        (0..n)
            .map(|i| entry(&format!("u{}.gor", i), None, false))
            .collect()
    }

    #[test]
    fn pack_level_parses_case_insensitive() {
        assert_eq!("full_packing".parse::<PackLevel>().unwrap(), PackLevel::FullPacking);
        assert_eq!(PackLevel::default(), PackLevel::Consolidate);
        assert_eq!(PackLevel::NoPacking.to_string(), "NO_PACKING");
        assert!("half".parse::<PackLevel>().is_err());
    }

    #[test]
    fn empty_buckets_always_deleted() {
        let mut all = bucketed("a", "b/a.gor", 10);
        all.push(entry("x.gor", Some("b/dead.gor"), true));
        let del = find_buckets_to_delete(&all, PackLevel::NoPacking, 0, 10);
        assert_eq!(del.into_iter().collect::<Vec<_>>(), vec!["b/dead.gor"]);
    }

    #[test]
    fn full_packing_takes_all_partial() {
        let mut all = bucketed("a", "b/a.gor", 10);
        all.extend(bucketed("p", "b/p.gor", 3));
        all.extend(bucketed("q", "b/q.gor", 7));
        let del = find_buckets_to_delete(&all, PackLevel::FullPacking, 0, 10);
        assert_eq!(del.len(), 2);
        assert!(!del.contains("b/a.gor"));
    }

    #[test]
    fn consolidate_fills_free_space_with_smallest() {
        // 5 未入桶 + 未满桶 2,3,8 => 18 / 10 = 1 个新桶, 空位 5
        let mut all = unbucketed(5);
        all.extend(bucketed("p", "b/p.gor", 2));
        all.extend(bucketed("q", "b/q.gor", 3));
        all.extend(bucketed("r", "b/r.gor", 8));
        let del = find_buckets_to_delete(&all, PackLevel::Consolidate, 5, 10);
        assert_eq!(
            del.into_iter().collect::<Vec<_>>(),
            vec!["b/p.gor", "b/q.gor"]
        );
    }

    #[test]
    fn create_count_skips_small_tail_and_caps() {
        let all = unbucketed(25);
        let mut picker = DirPicker::new(&["bk".to_string()], &all);
        let created =
            find_buckets_to_create(&all, &BTreeSet::new(), 10, 6, 0, "t_bucket_x_", &mut picker);
        // 25 => 3 个桶，尾部 5 < 6 => 2 个
        assert_eq!(created.len(), 2);
        assert_eq!(created["bk/t_bucket_x_1.gor"].len(), 10);
        assert_eq!(created["bk/t_bucket_x_2.gor"].len(), 10);

        let mut picker = DirPicker::new(&["bk".to_string()], &all);
        let created =
            find_buckets_to_create(&all, &BTreeSet::new(), 10, 5, 1, "t_bucket_x_", &mut picker);
        assert_eq!(created.len(), 1);
    }

    #[test]
    fn create_includes_active_lines_of_deleted_buckets() {
        let mut all = unbucketed(3);
        all.extend(bucketed("p", "bk/p.gor", 2));
        all.push(entry("gone.gor", Some("bk/p.gor"), true));
        let del: BTreeSet<String> = ["bk/p.gor".to_string()].into_iter().collect();
        let mut picker = DirPicker::new(&["bk".to_string()], &all);
        let created = find_buckets_to_create(&all, &del, 10, 1, 0, "t_", &mut picker);
        assert_eq!(created.len(), 1);
        let lines = created.values().next().unwrap();
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().all(|e| !e.is_deleted()));
    }

    #[test]
    fn picker_prefers_least_used_dir() {
        let all = bucketed("a", "d1/a.gor", 4);
        let mut picker = DirPicker::new(&["d1".to_string(), "d2".to_string()], &all);
        let picks: Vec<String> = (0..3).filter_map(|_| picker.pick()).collect();
        assert_eq!(picks, vec!["d2", "d2", "d2"]);
        assert_eq!(picker.pick().unwrap(), "d2");
        assert_eq!(picker.pick().unwrap(), "d1");
    }

    #[test]
    fn bucket_names() {
        let p = bucket_name_prefix("t");
        assert!(p.starts_with("t_bucket_"));
        assert!(p.ends_with('_'));
        assert_eq!(logical_parent("a/b/c.gor"), "a/b");
        assert_eq!(logical_parent("c.gor"), "");
        assert_eq!(logical_join("a/", "c.gor"), "a/c.gor");
    }
}
