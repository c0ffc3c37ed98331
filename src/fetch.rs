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

//! The orchestrator that makes a target frame appear in the cache.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, trace};

use crate::cache::FrameCache;
use crate::config::CacheConfig;
use crate::decoder::{DecodeBackend, DecoderConfig, DecoderSession};
use crate::engine::EngineCounters;
use crate::error::{FrameQError, Result};
use crate::frame_log::FrameLog;
use crate::supersede::OperationToken;

/// What a fill pass accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FillOutcome {
    /// Decoding ran; the submit pointer advanced to the contained index.
    /// End-of-stream may have cut the range short.
    Filled(usize),
    /// The range was empty or entirely outside the log; nothing happened.
    Noop,
}

/// Drives the decoder cursor to satisfy one fetch range at a time.
///
/// The orchestrator owns the decode cursor (index the next emitted image
/// maps to, shared with the session's output sink) and the submit pointer.
/// Newer fetches supersede older ones cooperatively; decoded work is never
/// rolled back.
pub(crate) struct FetchOrchestrator<B: DecodeBackend + 'static> {
    log: Rc<RefCell<FrameLog>>,
    cache: Rc<RefCell<FrameCache>>,
    session: Rc<DecoderSession<B>>,
    config: CacheConfig,
    decoder_config: Rc<RefCell<Option<DecoderConfig>>>,
    /// Index the decoder's next emitted image corresponds to. `None` until
    /// the first fetch configures a restart point.
    cursor: Rc<Cell<Option<usize>>>,
    /// Next log index to submit for decoding.
    next_submit: Cell<usize>,
    counters: Rc<EngineCounters>,
}

impl<B: DecodeBackend + 'static> FetchOrchestrator<B> {
    pub fn new(
        log: Rc<RefCell<FrameLog>>,
        cache: Rc<RefCell<FrameCache>>,
        session: Rc<DecoderSession<B>>,
        config: CacheConfig,
        decoder_config: Rc<RefCell<Option<DecoderConfig>>>,
        cursor: Rc<Cell<Option<usize>>>,
        counters: Rc<EngineCounters>,
    ) -> Self {
        Self {
            log,
            cache,
            session,
            config,
            decoder_config,
            cursor,
            next_submit: Cell::new(0),
            counters,
        }
    }

    /// Decodes until every frame in `[from, to_excluded)` has been emitted
    /// into the cache, then runs an eviction pass protecting
    /// `[gc_from, gc_to)` (defaulting to the fetch range up to the final
    /// submit pointer).
    pub async fn fill_and_evict(
        &self,
        from: usize,
        to_excluded: usize,
        gc_from: Option<usize>,
        gc_to: Option<usize>,
        token: &OperationToken,
    ) -> Result<FillOutcome> {
        let outcome = self.fill(from, to_excluded, token).await?;
        if let FillOutcome::Filled(cursor_after) = outcome {
            let protect = gc_from.unwrap_or(from)..gc_to.unwrap_or(cursor_after);
            self.cache
                .borrow_mut()
                .evict(protect, self.config.min_cached_frames);
        }
        Ok(outcome)
    }

    /// The fill loop: continue from the current cursor when the target is
    /// forward-reachable within the same GOP, otherwise reset and restart
    /// from the target's governing keyframe; then submit decode work under
    /// backpressure until the sentinel frame (one past the range) lands in
    /// the cache or the stream ends.
    async fn fill(
        &self,
        from: usize,
        to_excluded: usize,
        token: &OperationToken,
    ) -> Result<FillOutcome> {
        let log_len = self.log.borrow().len();
        if from >= log_len {
            return Ok(FillOutcome::Noop);
        }
        let sentinel = to_excluded.min(log_len);
        if from >= sentinel {
            return Ok(FillOutcome::Noop);
        }

        // An error parked by a previous, abandoned fetch is not ours.
        if let Some(stale) = self.session.take_error() {
            debug!("discarding stale decode error: {stale}");
        }

        if self.can_continue_to(from) {
            trace!(
                "continuing decode toward {from} from submit pointer {}",
                self.next_submit.get()
            );
        } else {
            self.restart_from_keyframe(from)?;
        }

        // A stale entry at the sentinel is about to be re-decoded; release
        // it so the fill loop has an arrival to wait for.
        self.cache.borrow_mut().remove(sentinel);

        while !self.cache.borrow().has(sentinel) {
            token.check()?;
            if let Some(error) = self.session.take_error() {
                return Err(FrameQError::Decode(error));
            }

            if self.session.queue_depth() > self.config.max_decode_queue_size {
                trace!(
                    "decode queue at {}, waiting for drain",
                    self.session.queue_depth()
                );
                tokio::select! {
                    _ = self.session.wait_drain() => {}
                    _ = token.superseded() => return Err(FrameQError::Superseded),
                }
                continue;
            }

            let submit = self.next_submit.get();
            if submit >= self.log.borrow().len() {
                // End of stream: drain whatever the decoder still holds.
                // The sentinel is unreachable but every emitted frame
                // still lands in the cache.
                debug!("end of stream at {submit}, flushing decoder");
                tokio::select! {
                    flushed = self.session.flush() => flushed?,
                    _ = token.superseded() => return Err(FrameQError::Superseded),
                }
                return Ok(FillOutcome::Filled(self.next_submit.get()));
            }

            let frame = match self.log.borrow().frame(submit) {
                Some(frame) => frame,
                None => return Ok(FillOutcome::Filled(self.next_submit.get())),
            };
            self.session.decode(frame);
            self.next_submit.set(submit + 1);

            // Hand the session worker its turn before submitting more.
            tokio::task::yield_now().await;
        }

        Ok(FillOutcome::Filled(self.next_submit.get()))
    }

    /// Forward motion within the GOP the decoder is already working
    /// through needs no reset.
    fn can_continue_to(&self, from: usize) -> bool {
        let log = self.log.borrow();
        match self.cursor.get() {
            Some(cursor) if from >= cursor && cursor < log.len() => {
                log.parent_keyframe(from) == log.parent_keyframe(cursor)
            }
            _ => false,
        }
    }

    /// Mid-GOP decoder state cannot be rebuilt at an arbitrary offset:
    /// reset, reconfigure, and restart from the governing keyframe.
    fn restart_from_keyframe(&self, from: usize) -> Result<()> {
        let config = self
            .decoder_config
            .borrow()
            .clone()
            .ok_or(FrameQError::NotConfigured)?;
        debug!("resetting decoder to restart toward {from}");
        self.session.reset();
        self.session.configure(&config)?;
        self.counters.bump_resets();

        let start = self
            .log
            .borrow()
            .parent_keyframe(from)
            .unwrap_or(from);
        self.cursor.set(Some(start));
        self.next_submit.set(start);
        Ok(())
    }
}
