//! 研究摘要的内存缓存
//!
//! 以廉价指纹为键，容量固定，按插入先后淘汰最早的条目。缓存只是优化，命中与否不影响结果。

use std::collections::{HashMap, VecDeque};

pub mod performance_monitor;
pub use performance_monitor::{CachePerformanceMonitor, CachePerformanceReport};

/// 摘要指纹
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryFingerprint {
    pub session_id: String,
    pub message_count: usize,
    pub insight_count: usize,
    pub search_count: usize,
    /// 输出规模档位：0 表示完整摘要，否则为 token 预算
    pub size_class: usize,
}

/// 摘要缓存
pub struct SummaryCache {
    capacity: usize,
    order: VecDeque<SummaryFingerprint>,
    entries: HashMap<SummaryFingerprint, String>,
    performance_monitor: CachePerformanceMonitor,
}

impl SummaryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
            performance_monitor: CachePerformanceMonitor::new(),
        }
    }

    pub fn get(&self, key: &SummaryFingerprint) -> Option<String> {
        match self.entries.get(key) {
            Some(summary) => {
                self.performance_monitor.record_cache_hit();
                Some(summary.clone())
            }
            None => {
                self.performance_monitor.record_cache_miss();
                None
            }
        }
    }

    /// 写入缓存；已存在的键只更新内容，不改变淘汰顺序
    pub fn insert(&mut self, key: SummaryFingerprint, summary: String) {
        self.performance_monitor.record_cache_write();
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = summary;
            return;
        }

        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    self.performance_monitor.record_eviction();
                }
                None => break,
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, summary);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn report(&self) -> CachePerformanceReport {
        self.performance_monitor.generate_report()
    }
}
