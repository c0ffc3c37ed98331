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

//! The session owning a single decoder instance for the lifetime of a
//! loaded stream.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use log::{debug, trace, warn};
use tokio::sync::{oneshot, Notify};

use super::{DecodeBackend, DecoderConfig};
use crate::error::{FrameQError, Result};
use crate::frame::{DecodedImage, EncodedFrame};

enum Job {
    Decode(Rc<EncodedFrame>),
    Flush(oneshot::Sender<()>),
}

struct SessionInner<B> {
    backend: RefCell<B>,
    jobs: RefCell<VecDeque<Job>>,
    /// Decode calls submitted but not yet processed.
    depth: Cell<usize>,
    configured: Cell<bool>,
    worker_started: Cell<bool>,
    shutdown: Cell<bool>,
    /// Wakes the worker when a job arrives or shutdown is requested.
    work_notify: Notify,
    /// Wakes backpressure waiters whenever the depth decreases.
    drain_notify: Notify,
    sink: RefCell<Option<Box<dyn Fn(DecodedImage)>>>,
    last_error: RefCell<Option<String>>,
}

/// Wraps one decoder backend behind an asynchronous submit/emit contract.
///
/// Decode calls are queued and processed by a worker task on the same
/// local task set; emitted images reach the installed output sink in exact
/// submission order since the last reset. The session never re-orders and
/// never retries: a decode fault parks in the error slot for the
/// orchestrator to pick up.
///
/// Must be used from within a tokio current-thread context with a
/// [`tokio::task::LocalSet`] (the worker is a `spawn_local` task).
pub struct DecoderSession<B: DecodeBackend + 'static> {
    inner: Rc<SessionInner<B>>,
}

impl<B: DecodeBackend + 'static> DecoderSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            inner: Rc::new(SessionInner {
                backend: RefCell::new(backend),
                jobs: RefCell::new(VecDeque::new()),
                depth: Cell::new(0),
                configured: Cell::new(false),
                worker_started: Cell::new(false),
                shutdown: Cell::new(false),
                work_notify: Notify::new(),
                drain_notify: Notify::new(),
                sink: RefCell::new(None),
                last_error: RefCell::new(None),
            }),
        }
    }

    /// Installs the callback that receives every emitted image. Wired once
    /// by the engine before any decode.
    pub fn set_output_sink(&self, sink: Box<dyn Fn(DecodedImage)>) {
        *self.inner.sink.borrow_mut() = Some(sink);
    }

    /// Applies codec parameters to the backend. Required once before the
    /// first decode and again after every [`DecoderSession::reset`].
    pub fn configure(&self, config: &DecoderConfig) -> Result<()> {
        self.inner.backend.borrow_mut().configure(config)?;
        self.inner.configured.set(true);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.inner.configured.get()
    }

    /// Enqueues one frame for decoding. Frames must arrive in decode order
    /// starting from a keyframe since the last reset.
    pub fn decode(&self, frame: Rc<EncodedFrame>) {
        debug_assert!(self.inner.configured.get(), "decode before configure");
        trace!("queueing frame {} for decode", frame.index);
        self.inner.depth.set(self.inner.depth.get() + 1);
        self.inner.jobs.borrow_mut().push_back(Job::Decode(frame));
        self.inner.work_notify.notify_one();
        self.ensure_worker();
    }

    /// Drains the queue and the backend's internal buffer, resolving once
    /// every previously submitted frame has produced output or been
    /// discarded. A reset while the flush is pending resolves it as
    /// superseded.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.jobs.borrow_mut().push_back(Job::Flush(tx));
        self.inner.work_notify.notify_one();
        self.ensure_worker();
        rx.await.map_err(|_| FrameQError::Superseded)
    }

    /// Discards all pending work and the backend's state. `configure` must
    /// run before decoding resumes.
    pub fn reset(&self) {
        debug!("resetting decoder session ({} jobs pending)", self.inner.jobs.borrow().len());
        self.inner.jobs.borrow_mut().clear();
        self.inner.depth.set(0);
        self.inner.backend.borrow_mut().reset();
        self.inner.configured.set(false);
        self.inner.last_error.borrow_mut().take();
        // Backpressure waiters must re-check; the queue they were waiting
        // on no longer exists.
        self.inner.drain_notify.notify_waiters();
    }

    /// Number of decode calls submitted but not yet processed.
    pub fn queue_depth(&self) -> usize {
        self.inner.depth.get()
    }

    /// Takes the sticky decode error, if one occurred since the last reset.
    pub fn take_error(&self) -> Option<String> {
        self.inner.last_error.borrow_mut().take()
    }

    /// Resolves the next time the queue depth decreases.
    pub async fn wait_drain(&self) {
        self.inner.drain_notify.notified().await;
    }

    /// Stops the worker task and drops pending work. The session cannot be
    /// used afterwards.
    pub fn close(&self) {
        self.inner.shutdown.set(true);
        self.inner.jobs.borrow_mut().clear();
        self.inner.depth.set(0);
        self.inner.work_notify.notify_one();
    }

    fn ensure_worker(&self) {
        if self.inner.worker_started.get() {
            return;
        }
        self.inner.worker_started.set(true);
        let inner = self.inner.clone();
        tokio::task::spawn_local(run_worker(inner));
    }
}

impl<B: DecodeBackend + 'static> Drop for DecoderSession<B> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_worker<B: DecodeBackend>(inner: Rc<SessionInner<B>>) {
    loop {
        let job = inner.jobs.borrow_mut().pop_front();
        match job {
            Some(Job::Decode(frame)) => {
                let result = inner.backend.borrow_mut().decode(&frame);
                match result {
                    Ok(images) => emit(&inner, images),
                    Err(e) => {
                        warn!("decode error on frame {}: {e}", frame.index);
                        *inner.last_error.borrow_mut() = Some(e.to_string());
                    }
                }
                inner.depth.set(inner.depth.get().saturating_sub(1));
                inner.drain_notify.notify_waiters();
                // Hand control back so waiters observe each emission.
                tokio::task::yield_now().await;
            }
            Some(Job::Flush(ack)) => {
                let result = inner.backend.borrow_mut().flush();
                match result {
                    Ok(images) => emit(&inner, images),
                    Err(e) => {
                        warn!("flush error: {e}");
                        *inner.last_error.borrow_mut() = Some(e.to_string());
                    }
                }
                let _ = ack.send(());
                tokio::task::yield_now().await;
            }
            None => {
                if inner.shutdown.get() {
                    debug!("decoder session worker shutting down");
                    break;
                }
                inner.work_notify.notified().await;
            }
        }
    }
}

fn emit<B>(inner: &SessionInner<B>, images: Vec<DecodedImage>) {
    let sink = inner.sink.borrow();
    if let Some(sink) = sink.as_ref() {
        for image in images {
            sink(image);
        }
    }
}
