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

//! The append-only record of encoded frames the demuxer feeds the engine.

use std::rc::Rc;

use log::warn;

use crate::frame::{EncodedFrame, FrameKind};

/// Ordered, append-only log of encoded frames with keyframe linkage.
///
/// The demuxer appends frames in decode order and calls [`FrameLog::finish`]
/// exactly once at end-of-stream. `parent_keyframe` is maintained
/// incrementally while appending; `next_keyframe` links are only known for
/// certain once the whole stream has been seen, so they are filled in by a
/// single backward pass in `finish`.
#[derive(Debug, Default)]
pub struct FrameLog {
    frames: Vec<Rc<EncodedFrame>>,
    last_keyframe: Option<usize>,
    complete: bool,
    count_hint: Option<usize>,
}

impl FrameLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one encoded frame and returns its decode index.
    pub fn push(
        &mut self,
        kind: FrameKind,
        data: Vec<u8>,
        timestamp_us: i64,
        duration_us: i64,
    ) -> usize {
        let index = self.frames.len();
        if kind == FrameKind::Key {
            self.last_keyframe = Some(index);
        }
        let parent_keyframe = match self.last_keyframe {
            Some(k) => k,
            None => {
                // A delta frame before any keyframe cannot be decoded; keep
                // it addressable but flag the stream as defective.
                warn!("frame {index} is a delta frame with no preceding keyframe");
                0
            }
        };
        self.frames.push(Rc::new(EncodedFrame {
            index,
            kind,
            data,
            timestamp_us,
            duration_us,
            parent_keyframe,
            next_keyframe: None,
        }));
        index
    }

    /// Marks the stream as fully demuxed and finalizes `next_keyframe`
    /// links, walking the log backwards once. The index one past the end
    /// serves as the "no later keyframe" sentinel.
    pub fn finish(&mut self) {
        let mut next_key = self.frames.len();
        for frame in self.frames.iter_mut().rev() {
            let f = Rc::make_mut(frame);
            f.next_keyframe = Some(next_key);
            if f.kind == FrameKind::Key {
                next_key = f.index;
            }
        }
        self.complete = true;
    }

    /// Number of frames demuxed so far.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether `finish` has run.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn frame(&self, index: usize) -> Option<Rc<EncodedFrame>> {
        self.frames.get(index).cloned()
    }

    /// Index of the keyframe governing `index`, if the frame exists.
    pub fn parent_keyframe(&self, index: usize) -> Option<usize> {
        self.frames.get(index).map(|f| f.parent_keyframe)
    }

    /// Advisory total frame count from stream metadata, useful while the
    /// demux is still running.
    pub fn set_count_hint(&mut self, count: usize) {
        self.count_hint = Some(count);
    }

    /// The total number of frames: exact once complete, otherwise the
    /// metadata hint if one was supplied.
    pub fn frame_count(&self) -> Option<usize> {
        if self.complete {
            Some(self.frames.len())
        } else {
            self.count_hint
        }
    }
}
