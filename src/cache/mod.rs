use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::FileReader;
use crate::table::{DictionaryTable, TableSnapshot};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub reloads: u64,
}

/// 进程内表缓存：path -> 不可变 TableSnapshot
///
/// - 读：identity 信号与缓存一致即命中，否则重新加载并整体替换（ArcSwap store）
/// - 快照从不原地修改；写者通过 `writer(path)` 串行化
/// - 无 identity 的快照（文件不存在、读取期间被替换）不进入缓存
pub struct TableCache {
    reader: Arc<dyn FileReader>,
    slots: DashMap<PathBuf, ArcSwap<TableSnapshot>>,
    access_count: DashMap<PathBuf, u64>,
    writers: DashMap<PathBuf, Arc<Mutex<()>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    reloads: AtomicU64,
}

impl TableCache {
    pub fn new(reader: Arc<dyn FileReader>, capacity: usize) -> Self {
        Self {
            reader,
            slots: DashMap::with_capacity(capacity),
            access_count: DashMap::new(),
            writers: DashMap::new(),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
        }
    }

    pub fn reader(&self) -> &Arc<dyn FileReader> {
        &self.reader
    }

    pub fn get(&self, path: &Path) -> Result<Arc<TableSnapshot>> {
        let key = cache_key(path);
        let current = self.reader.identity(path)?;

        let Some(current) = current else {
            // 文件不存在：旧缓存失效
            self.invalidate(path);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::new(TableSnapshot::load(path, self.reader.as_ref())?));
        };

        if let Some(slot) = self.slots.get(&key) {
            let snap = slot.load_full();
            if snap.identity.as_deref() == Some(current.as_str()) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.touch(&key);
                return Ok(snap);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let fresh = Arc::new(TableSnapshot::load(path, self.reader.as_ref())?);
        if fresh.identity.is_none() {
            return Ok(fresh);
        }

        match self.slots.get(&key) {
            Some(slot) => {
                slot.store(fresh.clone());
                self.reloads.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Table cache reload {:?}", key);
            }
            None => {
                self.evict_if_full();
                self.slots.insert(key.clone(), ArcSwap::new(fresh.clone()));
            }
        }
        self.touch(&key);
        Ok(fresh)
    }

    /// 从缓存快照构造可修改的表（修改 copy-on-write，不影响缓存）
    pub fn open_table(&self, path: &Path) -> Result<DictionaryTable> {
        let snap = self.get(path)?;
        Ok(DictionaryTable::from_snapshot(&snap, self.reader.clone()))
    }

    /// 提交后发布新快照，后续读者无需重新解析
    pub fn publish(&self, table: &DictionaryTable) {
        let snap = table.snapshot();
        if snap.identity.is_none() {
            self.invalidate(table.path());
            return;
        }
        let key = cache_key(table.path());
        match self.slots.get(&key) {
            Some(slot) => slot.store(Arc::new(snap)),
            None => {
                self.evict_if_full();
                self.slots.insert(key.clone(), ArcSwap::from_pointee(snap));
            }
        }
        self.touch(&key);
    }

    pub fn invalidate(&self, path: &Path) {
        let key = cache_key(path);
        self.slots.remove(&key);
        self.access_count.remove(&key);
    }

    pub fn clear(&self) {
        self.slots.clear();
        self.access_count.clear();
    }

    /// 同一表的进程内写者互斥锁
    pub fn writer(&self, path: &Path) -> Arc<Mutex<()>> {
        self.writers
            .entry(cache_key(path))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.slots.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
        }
    }

    fn touch(&self, key: &Path) {
        *self.access_count.entry(key.to_path_buf()).or_insert(0) += 1;
    }

    // 访问次数最少者淘汰
    fn evict_if_full(&self) {
        if self.slots.len() < self.capacity {
            return;
        }
        let victim = self
            .access_count
            .iter()
            .min_by_key(|e| *e.value())
            .map(|e| e.key().clone())
            .or_else(|| self.slots.iter().next().map(|e| e.key().clone()));
        if let Some(key) = victim {
            self.slots.remove(&key);
            self.access_count.remove(&key);
        }
    }
}

fn cache_key(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
