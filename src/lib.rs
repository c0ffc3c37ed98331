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

//! Random-access frame cache and decode engine for scrubbable video
//! playback.
//!
//! Compressed video only decodes forward from keyframes, decoders emit in
//! strict submission order, and decoded frames are too large to keep
//! around freely. [`FrameQ`] reconciles that with a player that wants
//! "give me frame N" in any order: a bounded decoded-frame cache with
//! priority eviction, look-ahead prefetch, keyframe-aware decoder restarts,
//! and cancellable in-flight fetches.
//!
//! The engine runs on a single-threaded cooperative task set; construct
//! and drive it inside a tokio current-thread runtime with a
//! [`tokio::task::LocalSet`].

pub mod cache;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod frame;
pub mod frame_log;
pub mod stops;

mod fetch;
mod supersede;

pub use cache::FrameCache;
pub use config::CacheConfig;
pub use decoder::{DecodeBackend, DecoderConfig, DecoderSession, MockBackend, VideoCodec};
pub use engine::{EngineStats, FrameQ};
pub use error::{FrameQError, Result};
pub use frame::{DecodedImage, Direction, EncodedFrame, FrameKind};
pub use frame_log::FrameLog;
pub use stops::{StopList, StreamMetadata};

#[cfg(feature = "vpx")]
pub use decoder::VpxBackend;
