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

//! Stop markers: the frames a presentation pauses on.
//!
//! The list is plain bookkeeping over frame indices; where the markers come
//! from (an embedded metadata comment, a user string, UI toggles) is the
//! caller's business. Stop frames are natural candidates for cache pinning.

use log::warn;
use serde::{Deserialize, Serialize};

/// Stream metadata document embedded by the authoring tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Frames the presentation stops on.
    pub stops: Option<Vec<usize>>,
    /// Shape of the rendered video, when present.
    #[serde(rename = "finalVideo")]
    pub final_video: Option<FinalVideoInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalVideoInfo {
    /// Total number of frames in the rendered video.
    pub length: Option<usize>,
}

impl StreamMetadata {
    /// Parses the JSON document recovered from the stream's metadata
    /// comment.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Sorted, deduplicated set of stop frames with next/previous queries and
/// page arithmetic (a "page" spans from one stop to the next).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopList {
    stops: Vec<usize>,
}

impl StopList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frames(frames: &[usize]) -> Self {
        let mut list = Self::new();
        list.set(frames);
        list
    }

    /// Parses a user-supplied list like `"24, 96, 240"`. Entries that are
    /// not numbers are skipped with a warning.
    pub fn from_string(input: &str) -> Self {
        let mut frames = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.parse::<usize>() {
                Ok(frame) => frames.push(frame),
                Err(_) => warn!("ignoring invalid stop entry {part:?}"),
            }
        }
        Self::from_frames(&frames)
    }

    /// Builds the list from stream metadata, if it carries stops.
    pub fn from_metadata(metadata: &StreamMetadata) -> Option<Self> {
        metadata.stops.as_deref().map(Self::from_frames)
    }

    pub fn set(&mut self, frames: &[usize]) {
        self.stops = frames.to_vec();
        self.stops.sort_unstable();
        self.stops.dedup();
    }

    pub fn add(&mut self, frame: usize) {
        if let Err(at) = self.stops.binary_search(&frame) {
            self.stops.insert(at, frame);
        }
    }

    pub fn remove(&mut self, frame: usize) {
        if let Ok(at) = self.stops.binary_search(&frame) {
            self.stops.remove(at);
        }
    }

    pub fn frames(&self) -> &[usize] {
        &self.stops
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// The first stop strictly after `frame`, or `None` when the
    /// presentation plays out to the end.
    pub fn next_after(&self, frame: usize) -> Option<usize> {
        self.stops.iter().copied().find(|&s| s > frame)
    }

    /// The last stop strictly before `frame`; frame 0 acts as an implicit
    /// stop.
    pub fn previous_before(&self, frame: usize) -> usize {
        self.stops
            .iter()
            .copied()
            .take_while(|&s| s < frame)
            .last()
            .unwrap_or(0)
    }

    /// Page boundaries: frame 0 plus every stop.
    pub fn page_starts(&self) -> Vec<usize> {
        let mut starts = Vec::with_capacity(self.stops.len() + 1);
        starts.push(0);
        for &s in &self.stops {
            if s != 0 {
                starts.push(s);
            }
        }
        starts
    }

    /// The page `frame` falls on.
    pub fn current_page(&self, frame: usize) -> usize {
        self.page_starts()
            .iter()
            .filter(|&&start| start <= frame)
            .count()
            .saturating_sub(1)
    }

    /// Total pages. The last frame closes the final page when the stream
    /// length is known.
    pub fn page_count(&self, frame_count: Option<usize>) -> usize {
        let mut starts = self.page_starts();
        if let Some(n) = frame_count {
            if n > 0 && !starts.contains(&(n - 1)) {
                starts.push(n - 1);
            }
        }
        starts.len()
    }

    /// First frame of `page`, clamped to `last_frame` for pages past the
    /// final stop.
    pub fn page_start(&self, page: usize, last_frame: usize) -> usize {
        let starts = self.page_starts();
        starts
            .get(page)
            .copied()
            .unwrap_or(last_frame)
            .min(last_frame)
    }
}
