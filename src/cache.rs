/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! The bounded cache of decoded frames, with recency-based eviction.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::rc::Rc;

use log::{debug, trace};

use crate::frame::DecodedImage;

struct CachedFrame {
    image: Rc<DecodedImage>,
    /// Monotonically increasing counter assigned when the entry lands in
    /// the cache. Sole eviction ordering key.
    recency: u64,
}

/// Bounded map from decode index to decoded frame.
///
/// Entries are evicted least-recent-first, oldest insertion first. Pinned
/// indices are never evicted and do not count against the ceiling; pin
/// marks are kept separately from the entries so a mark placed before the
/// frame is ever decoded (or kept across a re-decode) still applies.
pub struct FrameCache {
    entries: BTreeMap<usize, CachedFrame>,
    pinned: BTreeSet<usize>,
    next_recency: u64,
    max_cached_frames: usize,
    evicted_total: u64,
}

impl FrameCache {
    pub fn new(max_cached_frames: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            pinned: BTreeSet::new(),
            next_recency: 0,
            max_cached_frames,
            evicted_total: 0,
        }
    }

    /// Inserts a decoded frame, assigning it the next recency value. Any
    /// prior entry at the same index is released first; exactly one entry
    /// exists per index.
    pub fn insert(&mut self, index: usize, image: Rc<DecodedImage>) {
        let recency = self.next_recency;
        self.next_recency += 1;
        trace!("caching frame {index} with recency {recency}");
        self.entries.insert(index, CachedFrame { image, recency });
    }

    pub fn get(&self, index: usize) -> Option<Rc<DecodedImage>> {
        self.entries.get(&index).map(|e| e.image.clone())
    }

    pub fn has(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    /// Removes and releases the entry at `index`, if present.
    pub fn remove(&mut self, index: usize) -> bool {
        self.entries.remove(&index).is_some()
    }

    /// Bumps an entry's recency to the newest value, making it the last
    /// eviction candidate.
    pub fn touch(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(&index) {
            entry.recency = self.next_recency;
            self.next_recency += 1;
        }
    }

    /// Marks an index as never evictable. The mark is independent of the
    /// entry's lifetime and applies again when the frame is re-decoded.
    pub fn pin(&mut self, index: usize) {
        self.pinned.insert(index);
    }

    pub fn unpin(&mut self, index: usize) {
        self.pinned.remove(&index);
    }

    /// Number of cached entries, pinned included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cached entries that count against the ceiling.
    pub fn unpinned_len(&self) -> usize {
        self.entries
            .keys()
            .filter(|&i| !self.pinned.contains(i))
            .count()
    }

    /// Total entries evicted over the cache's lifetime.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    /// Evicts least-recent unpinned entries whose index lies outside
    /// `protected`, stopping once `floor` unpinned entries remain or no
    /// candidate is left.
    ///
    /// The pass only runs when the unpinned population, not counting the
    /// entry just inserted by the caller, exceeds the ceiling; so the
    /// population right after an insert-triggered pass never exceeds
    /// `max_cached_frames + 1`.
    pub fn evict(&mut self, protected: Range<usize>, floor: usize) {
        let unpinned = self.unpinned_len();
        if unpinned.saturating_sub(1) <= self.max_cached_frames {
            return;
        }

        // (recency, index) sorts oldest-first with a deterministic
        // index-ascending tie-break.
        let mut candidates: Vec<(u64, usize)> = self
            .entries
            .iter()
            .filter(|&(i, _)| !self.pinned.contains(i) && !protected.contains(i))
            .map(|(i, e)| (e.recency, *i))
            .collect();
        candidates.sort_unstable();

        let n_remove = candidates.len().min(unpinned.saturating_sub(floor));
        for (_, index) in candidates.into_iter().take(n_remove) {
            trace!("evicting frame {index}");
            self.entries.remove(&index);
            self.evicted_total += 1;
        }
        debug!(
            "eviction pass done, {} cached ({} pinned marks)",
            self.entries.len(),
            self.pinned.len()
        );
    }

    /// Releases and removes every entry. Pin marks survive.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
