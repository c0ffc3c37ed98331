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

use log::warn;
use serde::{Deserialize, Serialize};

/// Sizing knobs for the decoded-frame cache and the fetch pipeline.
///
/// The limits are soft: a fetch caches whole stretches of a GOP before the
/// eviction pass trims back down, so the live population can transiently
/// exceed `max_cached_frames`. Decoders own the memory behind each decoded
/// image and stall when too many stay live, which is why the ceiling should
/// stay small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Soft ceiling on cached decoded frames; crossing it triggers an
    /// eviction pass.
    pub max_cached_frames: usize,
    /// Eviction stops once this many unpinned entries remain.
    pub min_cached_frames: usize,
    /// How many frames past a requested index a fetch decodes ahead.
    pub prefetch_ahead: usize,
    /// Backpressure limit on decode calls submitted but not yet processed.
    pub max_decode_queue_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cached_frames: 5,
            min_cached_frames: 3,
            prefetch_ahead: 5,
            max_decode_queue_size: 10,
        }
    }
}

impl CacheConfig {
    /// Returns a copy with the knobs clamped into the supported ordering
    /// `min_cached_frames <= prefetch_ahead <= max_decode_queue_size`.
    pub fn normalized(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.min_cached_frames > cfg.prefetch_ahead {
            warn!(
                "min_cached_frames {} exceeds prefetch_ahead {}; clamping",
                cfg.min_cached_frames, cfg.prefetch_ahead
            );
            cfg.min_cached_frames = cfg.prefetch_ahead;
        }
        if cfg.max_decode_queue_size < cfg.min_cached_frames {
            warn!(
                "max_decode_queue_size {} below min_cached_frames {}; raising",
                cfg.max_decode_queue_size, cfg.min_cached_frames
            );
            cfg.max_decode_queue_size = cfg.min_cached_frames;
        }
        cfg
    }
}
