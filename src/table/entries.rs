use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::model::{DictionaryEntry, DictionaryFilter};

type SlotId = u32;

/// 内存中的表条目
///
/// - slots：按插入顺序存放，删除留空洞（类似 tombstone），空洞过多时 compact
/// - key → slot：活动行的完整身份索引（content + tags + range）
/// - (key, bucket) → slot：软删除的 bucket 引用，可与同 key 的活动行并存
/// - filter tag / alias → RoaringBitmap posting：tag/alias 查询只扫描候选
#[derive(Clone, Debug, Default)]
pub struct TableEntries {
    slots: Vec<Option<DictionaryEntry>>,
    by_key: HashMap<String, SlotId>,
    by_deleted: HashMap<(String, String), SlotId>,
    by_tag: HashMap<String, RoaringBitmap>,
    by_alias: HashMap<String, RoaringBitmap>,
    live: usize,
}

fn deleted_key(key: &str, bucket: &str) -> (String, String) {
    (key.to_string(), bucket.to_string())
}

impl TableEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I: IntoIterator<Item = DictionaryEntry>>(entries: I) -> Self {
        let mut out = Self::new();
        for e in entries {
            out.upsert(e);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// 插入顺序遍历（含已删除条目）
    pub fn iter(&self) -> impl Iterator<Item = &DictionaryEntry> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// 活动行
    pub fn get(&self, key: &str) -> Option<&DictionaryEntry> {
        self.by_key.get(key).and_then(|&id| self.slot(id))
    }

    /// 指向 `bucket` 的软删除引用
    pub fn get_deleted(&self, key: &str, bucket: &str) -> Option<&DictionaryEntry> {
        self.by_deleted
            .get(&deleted_key(key, bucket))
            .and_then(|&id| self.slot(id))
    }

    fn slot(&self, id: SlotId) -> Option<&DictionaryEntry> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    fn slot_of(&self, entry: &DictionaryEntry) -> Option<SlotId> {
        if entry.is_deleted() {
            let bucket = entry.bucket().unwrap_or("");
            self.by_deleted.get(&deleted_key(entry.key(), bucket)).copied()
        } else {
            self.by_key.get(entry.key()).copied()
        }
    }

    /// 同一身份（活动行按 key，软删除行按 key + bucket）存在时原位替换，
    /// 否则追加；返回被替换的条目
    pub fn upsert(&mut self, entry: DictionaryEntry) -> Option<DictionaryEntry> {
        if let Some(id) = self.slot_of(&entry) {
            let old = self.slots[id as usize].take();
            if let Some(old) = &old {
                self.unindex(id, old);
            }
            self.index(id, &entry);
            self.slots[id as usize] = Some(entry);
            return old;
        }

        let id = self.slots.len() as SlotId;
        if entry.is_deleted() {
            let bucket = entry.bucket().unwrap_or("");
            self.by_deleted.insert(deleted_key(entry.key(), bucket), id);
        } else {
            self.by_key.insert(entry.key().to_string(), id);
        }
        self.index(id, &entry);
        self.slots.push(Some(entry));
        self.live += 1;
        None
    }

    /// 已入桶的活动行原位转为软删除引用；同一引用已存在时只移除活动行。
    /// 返回原活动行
    pub fn soft_delete(&mut self, key: &str) -> Option<DictionaryEntry> {
        let id = *self.by_key.get(key)?;
        let old = self.slot(id)?.clone();
        let bucket = old.bucket()?.to_string();
        self.by_key.remove(key);
        let dkey = deleted_key(key, &bucket);
        if self.by_deleted.contains_key(&dkey) {
            self.drop_slot(id);
            return Some(old);
        }
        self.by_deleted.insert(dkey, id);
        self.slots[id as usize] = Some(old.as_deleted());
        Some(old)
    }

    /// 移除活动行
    pub fn remove(&mut self, key: &str) -> Option<DictionaryEntry> {
        let id = self.by_key.remove(key)?;
        self.drop_slot(id)
    }

    /// 移除指向 `bucket` 的软删除引用
    pub fn remove_deleted(&mut self, key: &str, bucket: &str) -> Option<DictionaryEntry> {
        let id = self.by_deleted.remove(&deleted_key(key, bucket))?;
        self.drop_slot(id)
    }

    fn drop_slot(&mut self, id: SlotId) -> Option<DictionaryEntry> {
        let old = self.slots.get_mut(id as usize)?.take()?;
        self.unindex(id, &old);
        self.live -= 1;
        self.maybe_compact();
        Some(old)
    }

    /// 按 filter 选择，结果按 key 排序
    pub fn select(&self, filter: &DictionaryFilter) -> Vec<&DictionaryEntry> {
        let mut out: Vec<&DictionaryEntry> = match self.candidates(filter) {
            Some(bm) => bm
                .iter()
                .filter_map(|id| self.slots.get(id as usize).and_then(Option::as_ref))
                .filter(|e| filter.matches(e))
                .collect(),
            None => self.iter().filter(|e| filter.matches(e)).collect(),
        };
        out.sort_by(|a, b| a.key().cmp(b.key()));
        out
    }

    /// 与 `entry` 具有相同 filter tag 集合的未删除条目
    pub fn with_same_tag_set(&self, entry: &DictionaryEntry) -> Vec<&DictionaryEntry> {
        let candidates: Box<dyn Iterator<Item = &DictionaryEntry> + '_> =
            match entry.filter_tags().first() {
                Some(tag) => Box::new(
                    self.by_tag
                        .get(tag)
                        .into_iter()
                        .flat_map(|bm| bm.iter())
                        .filter_map(|id| self.slots.get(id as usize).and_then(Option::as_ref)),
                ),
                None => Box::new(self.iter()),
            };
        candidates
            .filter(|e| !e.is_deleted() && e.same_tag_set(entry))
            .collect()
    }

    /// tag/alias 候选集合；无可用索引条件返回 None（全扫描）
    fn candidates(&self, filter: &DictionaryFilter) -> Option<RoaringBitmap> {
        let by_tags = filter.lookup_tags().map(|tags| {
            let mut acc = RoaringBitmap::new();
            for t in tags {
                if let Some(bm) = self.by_tag.get(t) {
                    acc |= bm;
                }
            }
            acc
        });
        let by_aliases = filter.lookup_aliases().map(|aliases| {
            let mut acc = RoaringBitmap::new();
            for a in aliases {
                if let Some(bm) = self.by_alias.get(a) {
                    acc |= bm;
                }
            }
            acc
        });
        match (by_tags, by_aliases) {
            (Some(t), Some(a)) => Some(t & a),
            (Some(t), None) => Some(t),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    fn index(&mut self, id: SlotId, entry: &DictionaryEntry) {
        for t in entry.filter_tags() {
            self.by_tag.entry(t.clone()).or_default().insert(id);
        }
        if let Some(a) = entry.alias() {
            self.by_alias.entry(a.to_string()).or_default().insert(id);
        }
    }

    fn unindex(&mut self, id: SlotId, entry: &DictionaryEntry) {
        for t in entry.filter_tags() {
            if let Some(bm) = self.by_tag.get_mut(t) {
                bm.remove(id);
                if bm.is_empty() {
                    self.by_tag.remove(t);
                }
            }
        }
        if let Some(a) = entry.alias() {
            if let Some(bm) = self.by_alias.get_mut(a) {
                bm.remove(id);
                if bm.is_empty() {
                    self.by_alias.remove(a);
                }
            }
        }
    }

    // 空洞超过一半时重建（slot id 重新编号）
    fn maybe_compact(&mut self) {
        let holes = self.slots.len() - self.live;
        if holes < 64 || holes < self.live {
            return;
        }
        let slots = std::mem::take(&mut self.slots);
        *self = Self::from_entries(slots.into_iter().flatten());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn root() -> &'static Path {
        Path::new("/data")
    }

    fn entry(line: &str) -> DictionaryEntry {
        DictionaryEntry::parse_line(line, root()).unwrap()
    }

    fn sample() -> TableEntries {
        TableEntries::from_entries(vec![
            entry("f1.gor\tA"),
            entry("f2.gor\tB"),
            entry("f3.gor\t\t\t\t\t\tC,D"),
            entry("f4.gor"),
        ])
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut t = sample();
        assert_eq!(t.len(), 4);
        let e = entry("f1.gor\tA").with_bucket("b1.gor");
        let old = t.upsert(e).unwrap();
        assert!(!old.has_bucket());
        assert_eq!(t.len(), 4);
        assert_eq!(t.iter().next().unwrap().bucket(), Some("b1.gor"));
    }

    #[test]
    fn select_uses_tag_and_alias_postings() {
        let t = sample();
        let f = DictionaryFilter::new(root()).tags(["A", "D"]);
        let got: Vec<&str> = t.select(&f).iter().map(|e| e.content()).collect();
        assert_eq!(got, vec!["f1.gor", "f3.gor"]);

        let f = DictionaryFilter::new(root()).aliases(["B"]);
        let got: Vec<&str> = t.select(&f).iter().map(|e| e.content()).collect();
        assert_eq!(got, vec!["f2.gor"]);

        let f = DictionaryFilter::new(root()).aliases(["B"]).tags(["A"]);
        assert!(t.select(&f).is_empty());
    }

    #[test]
    fn remove_drops_postings() {
        let mut t = sample();
        let key = entry("f3.gor\t\t\t\t\t\tC,D").key().to_string();
        assert!(t.remove(&key).is_some());
        assert!(t.remove(&key).is_none());
        let f = DictionaryFilter::new(root()).tags(["C"]);
        assert!(t.select(&f).is_empty());
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn compaction_keeps_order_and_lookups() {
        let mut t = TableEntries::new();
        for i in 0..200 {
            t.upsert(entry(&format!("f{}.gor\tA{}", i, i)));
        }
        for i in 0..150 {
            let key = entry(&format!("f{}.gor\tA{}", i, i)).key().to_string();
            t.remove(&key);
        }
        assert_eq!(t.len(), 50);
        assert_eq!(t.iter().next().unwrap().content(), "f150.gor");
        let f = DictionaryFilter::new(root()).aliases(["A199"]);
        assert_eq!(t.select(&f).len(), 1);
        assert!(t.get(entry("f160.gor\tA160").key()).is_some());
    }

    #[test]
    fn same_tag_set_lookup() {
        let t = sample();
        let other = entry("other.gor\t\t\t\t\t\tD,C");
        let got = t.with_same_tag_set(&other);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].content(), "f3.gor");
    }

    #[test]
    fn deleted_reference_coexists_with_active_line() {
        let mut t = sample();
        t.upsert(entry("f1.gor|b1.gor\tA"));
        let key = entry("f1.gor\tA").key().to_string();
        let old = t.soft_delete(&key).unwrap();
        assert_eq!(old.bucket(), Some("b1.gor"));
        assert!(t.get(&key).is_none());
        assert!(t.get_deleted(&key, "b1.gor").is_some());

        // 同 key 的活动行重新加入，不覆盖软删除引用
        assert!(t.upsert(entry("f1.gor\tA")).is_none());
        assert_eq!(t.len(), 5);
        assert!(!t.get(&key).unwrap().has_bucket());
        assert!(t.get_deleted(&key, "b1.gor").unwrap().is_deleted());
        // alias posting 同时指向两行
        let f = DictionaryFilter::new(root()).aliases(["A"]).include_deleted();
        assert_eq!(t.select(&f).len(), 2);

        assert!(t.remove_deleted(&key, "b1.gor").is_some());
        assert!(t.get(&key).is_some());
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn soft_delete_requires_bucket() {
        let mut t = sample();
        let key = entry("f2.gor\tB").key().to_string();
        assert!(t.soft_delete(&key).is_none());
        assert!(t.get(&key).is_some());
    }
}
