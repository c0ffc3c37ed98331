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

use thiserror::Error;

/// Result type for frameq operations
pub type Result<T> = std::result::Result<T, FrameQError>;

/// Errors that can occur while driving the frame engine.
///
/// Out-of-range and past-end-of-stream requests are not errors: they resolve
/// as a normal "no frame available" (`Ok(None)`) from the reader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameQError {
    /// The decoder backend rejected the codec parameters. Fatal for the
    /// stream load; there is no retry.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A fetch was attempted before any codec configuration was supplied.
    #[error("Decoder is not configured")]
    NotConfigured,

    /// The decoder failed on a specific frame. The in-flight fetch aborts;
    /// a later fetch may retry after a reset.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// A newer operation took over and cancelled this one's pending waits.
    /// Not a failure; callers that do not inspect the old operation can
    /// drop it silently.
    #[error("Superseded by a newer operation")]
    Superseded,
}
