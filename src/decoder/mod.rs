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

//! The common interface for codec backends, and the session driving them.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{FrameQError, Result};
use crate::frame::{DecodedImage, EncodedFrame};

mod session;
pub use session::DecoderSession;

#[cfg(feature = "vpx")]
mod vpx;
#[cfg(feature = "vpx")]
pub use vpx::VpxBackend;

/// An enumeration of the supported video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    /// VP8 codec, using libvpx.
    Vp8,
    /// VP9 codec, using libvpx.
    Vp9,
    /// A mock codec that round-trips payload bytes, for testing and
    /// simulation.
    Mock,
}

/// Codec parameters the demuxer extracts once per stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub codec: VideoCodec,
    pub coded_width: u32,
    pub coded_height: u32,
    /// Codec-specific initialization payload (e.g. an `avcC` box), when the
    /// container carries one.
    pub description: Option<Vec<u8>>,
    /// Ask the backend to emit frames as early as it can rather than batch.
    pub optimize_for_latency: bool,
}

impl DecoderConfig {
    pub fn new(codec: VideoCodec, coded_width: u32, coded_height: u32) -> Self {
        Self {
            codec,
            coded_width,
            coded_height,
            description: None,
            optimize_for_latency: true,
        }
    }
}

/// A stateful codec implementation the [`DecoderSession`] drives.
///
/// Frames must be submitted in decode order starting from a keyframe. A
/// backend may hold frames internally and emit them on a later call; the
/// session maps emissions back to indices by arrival order, so backends
/// must emit in submission order.
pub trait DecodeBackend {
    /// Applies codec parameters. Called once before the first decode and
    /// again after every [`DecodeBackend::reset`].
    fn configure(&mut self, config: &DecoderConfig) -> Result<()>;

    /// Decodes one frame, returning zero or more emitted images.
    fn decode(&mut self, frame: &EncodedFrame) -> Result<Vec<DecodedImage>>;

    /// Drains every image the backend still holds.
    fn flush(&mut self) -> Result<Vec<DecodedImage>>;

    /// Discards internal state. The backend is unconfigured afterwards.
    fn reset(&mut self);
}

/// Call counters a [`MockBackend`] shares with the test that created it.
#[derive(Debug, Default)]
pub struct MockStats {
    pub configures: Cell<usize>,
    pub resets: Cell<usize>,
    pub decoded: Cell<usize>,
    pub flushes: Cell<usize>,
}

/// A backend that "decodes" by copying the encoded payload into the image
/// buffer, optionally holding a few frames back to mimic codec latency.
pub struct MockBackend {
    latency: usize,
    held: VecDeque<DecodedImage>,
    configured: Option<DecoderConfig>,
    fail_on_index: Option<usize>,
    stats: Rc<MockStats>,
}

impl MockBackend {
    pub fn new(latency: usize) -> Self {
        Self {
            latency,
            held: VecDeque::new(),
            configured: None,
            fail_on_index: None,
            stats: Rc::new(MockStats::default()),
        }
    }

    /// Makes `decode` fail for the frame at `index`.
    pub fn fail_on_index(mut self, index: usize) -> Self {
        self.fail_on_index = Some(index);
        self
    }

    pub fn stats(&self) -> Rc<MockStats> {
        self.stats.clone()
    }
}

impl DecodeBackend for MockBackend {
    fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
        if config.codec != VideoCodec::Mock {
            return Err(FrameQError::UnsupportedCodec(format!(
                "{:?} is not supported by the mock backend",
                config.codec
            )));
        }
        self.stats.configures.set(self.stats.configures.get() + 1);
        self.configured = Some(config.clone());
        Ok(())
    }

    fn decode(&mut self, frame: &EncodedFrame) -> Result<Vec<DecodedImage>> {
        let config = self
            .configured
            .as_ref()
            .ok_or(FrameQError::NotConfigured)?;
        if self.fail_on_index == Some(frame.index) {
            return Err(FrameQError::Decode(format!(
                "mock failure on frame {}",
                frame.index
            )));
        }
        self.stats.decoded.set(self.stats.decoded.get() + 1);
        self.held.push_back(DecodedImage {
            width: config.coded_width,
            height: config.coded_height,
            data: frame.data.clone(),
            timestamp_us: frame.timestamp_us,
        });

        let mut emitted = Vec::new();
        while self.held.len() > self.latency {
            if let Some(image) = self.held.pop_front() {
                emitted.push(image);
            }
        }
        Ok(emitted)
    }

    fn flush(&mut self) -> Result<Vec<DecodedImage>> {
        self.stats.flushes.set(self.stats.flushes.get() + 1);
        Ok(self.held.drain(..).collect())
    }

    fn reset(&mut self) {
        self.stats.resets.set(self.stats.resets.get() + 1);
        self.held.clear();
        self.configured = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;

    fn test_frame(index: usize) -> EncodedFrame {
        EncodedFrame {
            index,
            kind: if index == 0 {
                FrameKind::Key
            } else {
                FrameKind::Delta
            },
            data: vec![index as u8],
            timestamp_us: index as i64 * 40_000,
            duration_us: 40_000,
            parent_keyframe: 0,
            next_keyframe: None,
        }
    }

    fn mock_config() -> DecoderConfig {
        DecoderConfig::new(VideoCodec::Mock, 320, 240)
    }

    #[test]
    fn rejects_non_mock_codecs() {
        let mut backend = MockBackend::new(0);
        let err = backend
            .configure(&DecoderConfig::new(VideoCodec::Vp9, 320, 240))
            .unwrap_err();
        assert!(matches!(err, FrameQError::UnsupportedCodec(_)));
    }

    #[test]
    fn zero_latency_emits_immediately() {
        let mut backend = MockBackend::new(0);
        backend.configure(&mock_config()).unwrap();
        let out = backend.decode(&test_frame(0)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, vec![0]);
        assert_eq!(out[0].width, 320);
    }

    #[test]
    fn latency_holds_frames_until_flush() {
        let mut backend = MockBackend::new(2);
        backend.configure(&mock_config()).unwrap();
        assert!(backend.decode(&test_frame(0)).unwrap().is_empty());
        assert!(backend.decode(&test_frame(1)).unwrap().is_empty());

        // The third submission pushes the first frame out.
        let out = backend.decode(&test_frame(2)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, vec![0]);

        let drained = backend.flush().unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].data, vec![1]);
        assert_eq!(drained[1].data, vec![2]);
    }

    #[test]
    fn reset_discards_held_frames_and_configuration() {
        let mut backend = MockBackend::new(5);
        backend.configure(&mock_config()).unwrap();
        backend.decode(&test_frame(0)).unwrap();
        backend.reset();

        assert!(backend.flush().unwrap().is_empty());
        assert!(matches!(
            backend.decode(&test_frame(1)),
            Err(FrameQError::NotConfigured)
        ));
        assert_eq!(backend.stats().resets.get(), 1);
    }

    #[test]
    fn failure_injection_targets_one_index() {
        let mut backend = MockBackend::new(0).fail_on_index(1);
        backend.configure(&mock_config()).unwrap();
        assert!(backend.decode(&test_frame(0)).is_ok());
        assert!(matches!(
            backend.decode(&test_frame(1)),
            Err(FrameQError::Decode(_))
        ));
    }
}
