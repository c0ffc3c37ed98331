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

//! The per-stream engine: demuxer feed on one side, random frame access on
//! the other.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::cache::FrameCache;
use crate::config::CacheConfig;
use crate::decoder::{DecodeBackend, DecoderConfig, DecoderSession};
use crate::error::{FrameQError, Result};
use crate::fetch::FetchOrchestrator;
use crate::frame::{DecodedImage, Direction, FrameKind};
use crate::frame_log::FrameLog;
use crate::supersede::SupersedeController;

/// Lifetime counters shared across the engine's parts.
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    decoded: Cell<u64>,
    resets: Cell<u64>,
    superseded: Cell<u64>,
}

impl EngineCounters {
    pub fn bump_decoded(&self) {
        self.decoded.set(self.decoded.get() + 1);
    }

    pub fn bump_resets(&self) {
        self.resets.set(self.resets.get() + 1);
    }

    pub fn bump_superseded(&self) {
        self.superseded.set(self.superseded.get() + 1);
    }
}

/// Snapshot of the engine's lifetime statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    /// Decoded frames currently held in the cache.
    pub cached_frames: usize,
    /// Frames emitted by the decoder since the stream loaded.
    pub decoded_frames: u64,
    /// Cache entries released by eviction passes.
    pub evicted_frames: u64,
    /// Times the decoder was reset for a non-contiguous target.
    pub decoder_resets: u64,
    /// Operations cancelled because a newer one took over.
    pub superseded_operations: u64,
}

/// Random-access frame engine for one loaded stream.
///
/// The demuxer collaborator feeds it a codec configuration, encoded frames
/// in decode order, and an end-of-stream notification; the playback
/// collaborator asks for decoded frames by index. One decoder instance and
/// one bounded cache sit in between.
///
/// All operations share a single-threaded cooperative task set; construct
/// and use the engine inside a tokio current-thread runtime with a
/// [`tokio::task::LocalSet`].
pub struct FrameQ<B: DecodeBackend + 'static> {
    log: Rc<RefCell<FrameLog>>,
    cache: Rc<RefCell<FrameCache>>,
    session: Rc<DecoderSession<B>>,
    orchestrator: Rc<FetchOrchestrator<B>>,
    decoder_config: Rc<RefCell<Option<DecoderConfig>>>,
    supersede: SupersedeController,
    cache_notify: Rc<Notify>,
    counters: Rc<EngineCounters>,
    config: CacheConfig,
    closed: Cell<bool>,
}

impl<B: DecodeBackend + 'static> FrameQ<B> {
    pub fn new(backend: B, config: CacheConfig) -> Self {
        let config = config.normalized();
        info!(
            "frame engine: max_cached={} min_cached={} prefetch={} max_queue={}",
            config.max_cached_frames,
            config.min_cached_frames,
            config.prefetch_ahead,
            config.max_decode_queue_size
        );

        let log = Rc::new(RefCell::new(FrameLog::new()));
        let cache = Rc::new(RefCell::new(FrameCache::new(config.max_cached_frames)));
        let session = Rc::new(DecoderSession::new(backend));
        let decoder_config = Rc::new(RefCell::new(None));
        let cursor: Rc<Cell<Option<usize>>> = Rc::new(Cell::new(None));
        let cache_notify = Rc::new(Notify::new());
        let counters = Rc::new(EngineCounters::default());

        // Emitted images map back to indices through the running cursor;
        // the decoder's FIFO contract makes per-frame tagging unnecessary.
        let sink_cache = cache.clone();
        let sink_cursor = cursor.clone();
        let sink_notify = cache_notify.clone();
        let sink_counters = counters.clone();
        session.set_output_sink(Box::new(move |image: DecodedImage| {
            match sink_cursor.get() {
                Some(index) => {
                    sink_cursor.set(Some(index + 1));
                    sink_cache.borrow_mut().insert(index, Rc::new(image));
                    sink_counters.bump_decoded();
                    sink_notify.notify_waiters();
                }
                None => warn!("decoded image arrived with no cursor; dropping"),
            }
        }));

        let orchestrator = Rc::new(FetchOrchestrator::new(
            log.clone(),
            cache.clone(),
            session.clone(),
            config.clone(),
            decoder_config.clone(),
            cursor,
            counters.clone(),
        ));

        Self {
            log,
            cache,
            session,
            orchestrator,
            decoder_config,
            supersede: SupersedeController::new(),
            cache_notify,
            counters,
            config,
            closed: Cell::new(false),
        }
    }

    // --- Demuxer feed ---

    /// Applies the stream's codec parameters. Validated eagerly so an
    /// unsupported stream fails the load, once, instead of failing every
    /// fetch.
    pub fn set_codec_config(&self, config: DecoderConfig) -> Result<()> {
        self.session.configure(&config)?;
        *self.decoder_config.borrow_mut() = Some(config);
        Ok(())
    }

    /// Appends one encoded frame in decode order; returns its index.
    pub fn push_frame(
        &self,
        kind: FrameKind,
        data: Vec<u8>,
        timestamp_us: i64,
        duration_us: i64,
    ) -> usize {
        self.log
            .borrow_mut()
            .push(kind, data, timestamp_us, duration_us)
    }

    /// End-of-stream: finalizes keyframe back-links.
    pub fn finish_stream(&self) {
        self.log.borrow_mut().finish();
        debug!("stream finished with {} frames", self.log.borrow().len());
    }

    /// Advisory total frame count from stream metadata, used while the
    /// demux is still running.
    pub fn set_frame_count_hint(&self, count: usize) {
        self.log.borrow_mut().set_count_hint(count);
    }

    // --- Player surface ---

    /// Total frames: exact once the stream finished, else the metadata
    /// hint, else unknown.
    pub fn frame_count(&self) -> Option<usize> {
        self.log.borrow().frame_count()
    }

    /// Frames demuxed so far.
    pub fn known_frames(&self) -> usize {
        self.log.borrow().len()
    }

    /// Marks a frame as never evictable (e.g. a stop point the player
    /// returns to).
    pub fn pin(&self, index: usize) {
        self.cache.borrow_mut().pin(index);
    }

    pub fn unpin(&self, index: usize) {
        self.cache.borrow_mut().unpin(index);
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cached_frames: self.cache.borrow().len(),
            decoded_frames: self.counters.decoded.get(),
            evicted_frames: self.cache.borrow().evicted_total(),
            decoder_resets: self.counters.resets.get(),
            superseded_operations: self.counters.superseded.get(),
        }
    }

    /// Fetches the decoded frame at `index`, decoding on demand.
    ///
    /// Begins a new operation: any previous `get_frame` still waiting fails
    /// fast with [`FrameQError::Superseded`]. With `clamp` the index is
    /// clamped into the known range; otherwise an out-of-range index (and a
    /// target the stream ends before reaching) resolves as `Ok(None)`.
    /// Forward hits top up the look-ahead window in the background;
    /// backward requests skip prefetch and restart from the governing
    /// keyframe on a miss.
    pub async fn get_frame(
        &self,
        index: usize,
        direction: Direction,
        clamp: bool,
    ) -> Result<Option<Rc<DecodedImage>>> {
        if self.closed.get() {
            return Ok(None);
        }
        let token = self.supersede.begin();

        let len = self.log.borrow().len();
        let index = if index < len {
            index
        } else if clamp && len > 0 {
            len - 1
        } else {
            return Ok(None);
        };

        if let Some(image) = self.cache.borrow().get(index) {
            if direction == Direction::Forward {
                self.spawn_lookahead(index, &token);
            }
            return Ok(Some(image));
        }

        debug!("frame {index} not cached, fetching ({direction:?})");
        let (from, to, gc_from, gc_to) = match direction {
            Direction::Backward => {
                // No cheaper path backward: restart at the governing
                // keyframe and keep exactly that window.
                let parent = self.log.borrow().parent_keyframe(index).unwrap_or(index);
                (parent, index + 1, Some(parent), Some(index + 1))
            }
            Direction::Forward => (index, index + self.config.prefetch_ahead + 1, None, None),
        };

        let done = Rc::new(Cell::new(false));
        {
            let orchestrator = self.orchestrator.clone();
            let fetch_token = token.clone();
            let counters = self.counters.clone();
            let notify = self.cache_notify.clone();
            let done = done.clone();
            tokio::task::spawn_local(async move {
                match orchestrator
                    .fill_and_evict(from, to, gc_from, gc_to, &fetch_token)
                    .await
                {
                    Ok(_) => {}
                    Err(FrameQError::Superseded) => {
                        counters.bump_superseded();
                        debug!("fetch [{from}, {to}) superseded");
                    }
                    Err(e) => warn!("fetch [{from}, {to}) failed: {e}"),
                }
                done.set(true);
                notify.notify_waiters();
            });
        }

        // Wait for the frame, not the whole fetch: the fetch keeps
        // prefetching after we return. A fetch that finishes without
        // producing the frame hit end-of-stream (or a decode fault), which
        // resolves as "no frame available".
        loop {
            if token.check().is_err() {
                self.counters.bump_superseded();
                return Err(FrameQError::Superseded);
            }
            if self.cache.borrow().has(index) || done.get() {
                break;
            }
            tokio::select! {
                _ = self.cache_notify.notified() => {}
                _ = token.superseded() => {}
            }
        }
        Ok(self.cache.borrow().get(index))
    }

    /// Releases the decoder and every cached frame. The engine serves no
    /// further requests.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        info!("closing frame engine");
        self.supersede.cancel_all();
        self.session.close();
        self.cache.borrow_mut().clear();
    }

    /// Tops up the look-ahead window after a forward cache hit,
    /// fire-and-forget. Supersession here is routine, not an error.
    fn spawn_lookahead(&self, index: usize, token: &crate::supersede::OperationToken) {
        let first_missing = {
            let cache = self.cache.borrow();
            (index..=index + self.config.prefetch_ahead).find(|i| !cache.has(*i))
        };
        let Some(first_missing) = first_missing else {
            return;
        };

        let orchestrator = self.orchestrator.clone();
        let counters = self.counters.clone();
        let prefetch_token = token.clone();
        let to = index + self.config.prefetch_ahead + 1;
        tokio::task::spawn_local(async move {
            match orchestrator
                .fill_and_evict(first_missing, to, Some(index), None, &prefetch_token)
                .await
            {
                Ok(_) => {}
                Err(FrameQError::Superseded) => {
                    counters.bump_superseded();
                    debug!("look-ahead from {first_missing} superseded");
                }
                Err(e) => debug!("look-ahead from {first_missing} failed: {e}"),
            }
        });
    }
}

impl<B: DecodeBackend + 'static> Drop for FrameQ<B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{MockBackend, MockStats, VideoCodec};
    use tokio::task::LocalSet;

    /// Engine over a zero-latency mock with keyframes every
    /// `keyframe_interval` frames; payload byte = frame index.
    fn engine(
        total: usize,
        keyframe_interval: usize,
        config: CacheConfig,
    ) -> (Rc<FrameQ<MockBackend>>, Rc<MockStats>) {
        let backend = MockBackend::new(0);
        let stats = backend.stats();
        let engine = FrameQ::new(backend, config);
        engine
            .set_codec_config(DecoderConfig::new(VideoCodec::Mock, 64, 64))
            .unwrap();
        for i in 0..total {
            let kind = if i % keyframe_interval == 0 {
                FrameKind::Key
            } else {
                FrameKind::Delta
            };
            engine.push_frame(kind, vec![i as u8], i as i64 * 40_000, 40_000);
        }
        engine.finish_stream();
        (Rc::new(engine), stats)
    }

    fn scenario_config() -> CacheConfig {
        CacheConfig {
            max_cached_frames: 5,
            min_cached_frames: 3,
            prefetch_ahead: 3,
            max_decode_queue_size: 10,
        }
    }

    #[tokio::test]
    async fn sequential_forward_playback_resets_only_once() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, mock) = engine(100, 20, scenario_config());
                for i in 0..10 {
                    let image = engine
                        .get_frame(i, Direction::Forward, false)
                        .await
                        .unwrap()
                        .unwrap_or_else(|| panic!("frame {i} unavailable"));
                    assert_eq!(image.data, vec![i as u8]);
                }
                assert_eq!(
                    mock.resets.get(),
                    1,
                    "forward same-GOP playback must not reset after the first decode"
                );
            })
            .await;
    }

    #[tokio::test]
    async fn backward_jump_resets_once_and_evicts_outside_protected_range() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, mock) = engine(100, 20, scenario_config());

                // Warm the cache around frame 30.
                engine
                    .get_frame(30, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 30");
                let resets_before = mock.resets.get();
                assert!(engine.cache.borrow().has(30));

                let image = engine
                    .get_frame(0, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 0");
                assert_eq!(image.data, vec![0]);
                assert_eq!(
                    mock.resets.get(),
                    resets_before + 1,
                    "crossing from GOP@20 to GOP@0 is exactly one reset"
                );

                // Let the fetch finish its window and run its eviction pass.
                for _ in 0..64 {
                    tokio::task::yield_now().await;
                }

                // The eviction pass protected the fresh window and dropped
                // the frames the user jumped away from.
                let cache = engine.cache.borrow();
                for i in 30..35 {
                    assert!(!cache.has(i), "stale frame {i} survived eviction");
                }
                assert!(cache.has(0));
            })
            .await;
    }

    #[tokio::test]
    async fn out_of_range_request_is_unavailable_without_blocking() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, _mock) = engine(100, 20, scenario_config());
                let result = engine.get_frame(150, Direction::Forward, false).await;
                assert_eq!(result, Ok(None));
            })
            .await;
    }

    #[tokio::test]
    async fn clamped_request_returns_the_last_frame() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, _mock) = engine(100, 20, scenario_config());
                let image = engine
                    .get_frame(150, Direction::Forward, true)
                    .await
                    .unwrap()
                    .expect("clamped to frame 99");
                assert_eq!(image.data, vec![99]);
            })
            .await;
    }

    #[tokio::test]
    async fn newer_request_supersedes_pending_wait() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, _mock) = engine(100, 20, scenario_config());

                let waiting = {
                    let engine = engine.clone();
                    tokio::task::spawn_local(async move {
                        engine.get_frame(50, Direction::Forward, false).await
                    })
                };
                // Let the first request register its wait before taking over.
                tokio::task::yield_now().await;

                let image = engine
                    .get_frame(10, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 10");
                assert_eq!(image.data, vec![10]);

                let first = waiting.await.unwrap();
                assert_eq!(first, Err(FrameQError::Superseded));
                assert!(engine.stats().superseded_operations > 0);
            })
            .await;
    }

    #[tokio::test]
    async fn repeated_hit_returns_the_same_resource() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, mock) = engine(100, 20, scenario_config());
                engine
                    .get_frame(3, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 3");
                let decoded_after_first = mock.decoded.get();

                let a = engine
                    .get_frame(3, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 3 again");
                let b = engine
                    .get_frame(3, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 3 a third time");
                assert!(Rc::ptr_eq(&a, &b), "cache hits must share one resource");
                assert_eq!(
                    mock.decoded.get(),
                    decoded_after_first,
                    "no duplicate decode for a cached frame"
                );
            })
            .await;
    }

    #[tokio::test]
    async fn backward_seek_across_gop_boundary_resets_once() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, mock) = engine(100, 20, scenario_config());
                engine
                    .get_frame(45, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 45");
                let resets_before = mock.resets.get();

                let image = engine
                    .get_frame(30, Direction::Backward, false)
                    .await
                    .unwrap()
                    .expect("frame 30");
                assert_eq!(image.data, vec![30]);
                assert_eq!(mock.resets.get(), resets_before + 1);
            })
            .await;
    }

    #[tokio::test]
    async fn forward_hit_tops_up_the_lookahead_window() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, _mock) = engine(100, 20, scenario_config());
                engine
                    .get_frame(0, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 0");
                // Let the initial fetch settle so frames 0..=4 are cached.
                for _ in 0..64 {
                    tokio::task::yield_now().await;
                }
                assert!(engine.cache.borrow().has(2));

                // A hit on frame 2 finds frame 5 missing and prefetches it
                // in the background.
                engine
                    .get_frame(2, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 2");
                for _ in 0..64 {
                    tokio::task::yield_now().await;
                }
                assert!(
                    engine.cache.borrow().has(5),
                    "look-ahead did not reach frame 5"
                );
            })
            .await;
    }

    #[tokio::test]
    async fn unsupported_codec_fails_the_load() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let engine = FrameQ::new(MockBackend::new(0), CacheConfig::default());
                let err = engine
                    .set_codec_config(DecoderConfig::new(VideoCodec::Vp9, 64, 64))
                    .unwrap_err();
                assert!(matches!(err, FrameQError::UnsupportedCodec(_)));
            })
            .await;
    }

    #[tokio::test]
    async fn decode_fault_resolves_as_unavailable() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let backend = MockBackend::new(0).fail_on_index(2);
                let engine = FrameQ::new(backend, scenario_config());
                engine
                    .set_codec_config(DecoderConfig::new(VideoCodec::Mock, 64, 64))
                    .unwrap();
                for i in 0..10 {
                    engine.push_frame(
                        if i == 0 { FrameKind::Key } else { FrameKind::Delta },
                        vec![i as u8],
                        0,
                        40_000,
                    );
                }
                engine.finish_stream();

                let result = engine.get_frame(3, Direction::Forward, false).await;
                assert_eq!(result, Ok(None), "a decode fault is not an exception");
            })
            .await;
    }

    #[tokio::test]
    async fn pinned_frame_survives_distant_scrubbing() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, _mock) = engine(100, 20, scenario_config());
                engine
                    .get_frame(0, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 0");
                engine.pin(0);

                for target in [25, 50, 75] {
                    engine
                        .get_frame(target, Direction::Forward, false)
                        .await
                        .unwrap()
                        .unwrap_or_else(|| panic!("frame {target} unavailable"));
                    // Let each fetch finish and run its eviction pass.
                    for _ in 0..64 {
                        tokio::task::yield_now().await;
                    }
                }
                assert!(
                    engine.stats().evicted_frames > 0,
                    "scrubbing this far must evict something"
                );
                assert!(
                    engine.cache.borrow().has(0),
                    "pinned frame evicted by scrubbing"
                );
            })
            .await;
    }

    #[tokio::test]
    async fn frame_count_goes_hint_then_exact() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let engine = FrameQ::new(MockBackend::new(0), CacheConfig::default());
                assert_eq!(engine.frame_count(), None);

                engine.set_frame_count_hint(240);
                engine.push_frame(FrameKind::Key, vec![0], 0, 40_000);
                assert_eq!(engine.frame_count(), Some(240));
                assert_eq!(engine.known_frames(), 1);

                engine.finish_stream();
                assert_eq!(engine.frame_count(), Some(1));
            })
            .await;
    }

    #[tokio::test]
    async fn closed_engine_serves_nothing() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, _mock) = engine(100, 20, scenario_config());
                engine
                    .get_frame(0, Direction::Forward, false)
                    .await
                    .unwrap()
                    .expect("frame 0");
                engine.close();
                assert_eq!(
                    engine.get_frame(0, Direction::Forward, false).await,
                    Ok(None)
                );
                assert_eq!(engine.stats().cached_frames, 0);
            })
            .await;
    }

    #[tokio::test]
    async fn cache_stays_bounded_through_a_long_scrub() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (engine, _mock) = engine(100, 20, scenario_config());
                for i in (0..100).step_by(7) {
                    engine
                        .get_frame(i, Direction::Forward, false)
                        .await
                        .unwrap()
                        .unwrap_or_else(|| panic!("frame {i} unavailable"));
                    // Let in-flight prefetch and eviction settle before
                    // checking the bound.
                    for _ in 0..64 {
                        tokio::task::yield_now().await;
                    }
                    let cached = engine.cache.borrow().unpinned_len();
                    assert!(
                        cached <= scenario_config().max_cached_frames + 1,
                        "cache grew to {cached} entries at frame {i}"
                    );
                }
                assert!(engine.stats().evicted_frames > 0);
            })
            .await;
    }
}
