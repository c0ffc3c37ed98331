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

//! Fundamental data structures for encoded and decoded video frames.

use serde::{Deserialize, Serialize};

/// The type of an encoded frame, indicating its dependency on other frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// A keyframe (I-frame) can be decoded independently of any other frame.
    Key,
    /// A delta frame depends on every preceding frame back to its governing
    /// keyframe.
    Delta,
}

/// The direction of travel a reader reports alongside a frame request.
///
/// Backward access suppresses look-ahead prefetch so reversed scrubbing does
/// not thrash the cache with frames the user is moving away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// One encoded frame as handed over by the demuxer, annotated with its
/// position in decode order and its keyframe linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedFrame {
    /// Position in decode order.
    pub index: usize,
    /// Whether this frame is a keyframe or a delta frame.
    pub kind: FrameKind,
    /// The encoded payload.
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,
    /// Display duration in microseconds.
    pub duration_us: i64,
    /// Index of the most recent keyframe at or before this frame. Equals
    /// `index` for a keyframe.
    pub parent_keyframe: usize,
    /// Index of the first keyframe strictly after this frame. `None` until
    /// end-of-stream back-linking runs; `Some(log_len)` when no later
    /// keyframe exists.
    pub next_keyframe: Option<usize>,
}

impl EncodedFrame {
    pub fn is_keyframe(&self) -> bool {
        self.kind == FrameKind::Key
    }
}

/// A fully decoded frame, ready for rendering.
///
/// The cache holds the owning `Rc`; dropping the last reference releases the
/// pixel payload. Decoders limit the number of live output images, so the
/// engine keeps the population bounded through eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Raw image planes (e.g. I420 data for the libvpx backend).
    pub data: Vec<u8>,
    /// Presentation timestamp carried over from the encoded frame.
    pub timestamp_us: i64,
}
