//! Single-line decode cache
//!
//! LC2 lines can only be decoded as a whole, so the last decoded line is
//! kept with a dirty flag. Switching to another line writes a dirty line
//! back first; that write-back is driven by the owner.

use serde::Serialize;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub write_backs: u64,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct LineCache {
    line: Option<usize>,
    buf: Vec<i32>,
    dirty: bool,
    stats: CacheStats,
}

impl LineCache {
    pub fn new(columns: usize) -> Self {
        LineCache {
            line: None,
            buf: vec![0; columns],
            dirty: false,
            stats: CacheStats::default(),
        }
    }

    /// Line currently held, if any
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    /// Check for `index`, counting the lookup
    pub fn lookup(&mut self, index: usize) -> bool {
        let hit = self.line == Some(index);
        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        hit
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The dirty line and its samples, if a write-back is due
    pub fn pending(&self) -> Option<(usize, &[i32])> {
        match self.line {
            Some(index) if self.dirty => Some((index, &self.buf)),
            _ => None,
        }
    }

    pub fn samples(&self) -> &[i32] {
        &self.buf
    }

    /// Buffer to decode into; the cache holds nothing until [`LineCache::fill`]
    pub fn staging(&mut self) -> &mut [i32] {
        debug_assert!(!self.dirty);
        self.line = None;
        &mut self.buf
    }

    /// Mark the staging buffer as holding `index`, unchanged from disk
    pub fn fill(&mut self, index: usize) {
        self.line = Some(index);
        self.dirty = false;
    }

    /// Samples of the held line for modification; marks it dirty
    pub fn modify(&mut self) -> &mut [i32] {
        debug_assert!(self.line.is_some());
        self.dirty = true;
        &mut self.buf
    }

    /// Take over `index` without reading it; every sample will be replaced
    pub fn replace(&mut self, index: usize) -> &mut [i32] {
        debug_assert!(!self.dirty || self.line == Some(index));
        self.line = Some(index);
        self.dirty = true;
        &mut self.buf
    }

    /// Written back successfully
    pub fn mark_clean(&mut self) {
        self.dirty = false;
        self.stats.write_backs += 1;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_counts() {
        let mut cache = LineCache::new(4);
        assert!(!cache.lookup(0));
        cache.staging().copy_from_slice(&[1, 2, 3, 4]);
        cache.fill(0);
        assert!(cache.lookup(0));
        assert!(!cache.lookup(1));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert!((stats.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_dirty_cycle() {
        let mut cache = LineCache::new(2);
        assert!(cache.pending().is_none());

        cache.replace(3).copy_from_slice(&[5, 6]);
        let (index, samples) = cache.pending().unwrap();
        assert_eq!(index, 3);
        assert_eq!(samples, &[5, 6]);

        cache.mark_clean();
        assert!(cache.pending().is_none());
        assert_eq!(cache.line(), Some(3));

        cache.modify()[0] = 9;
        assert!(cache.is_dirty());
        assert_eq!(cache.samples(), &[9, 6]);
    }

    #[test]
    fn test_staging_forgets_line() {
        let mut cache = LineCache::new(1);
        cache.staging()[0] = 1;
        cache.fill(2);
        cache.staging();
        assert_eq!(cache.line(), None);
    }
}
