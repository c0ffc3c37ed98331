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

//! Scrubs a synthetic GOP-structured stream through the engine and prints
//! what the cache does. Run with `RUST_LOG=debug` to watch the resets and
//! eviction passes.

use anyhow::Context;
use frameq::{CacheConfig, DecoderConfig, Direction, FrameKind, FrameQ, MockBackend, VideoCodec};

const TOTAL_FRAMES: usize = 240;
const KEYFRAME_INTERVAL: usize = 24;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(run()))
}

async fn run() -> anyhow::Result<()> {
    let engine = FrameQ::new(MockBackend::new(2), CacheConfig::default());
    engine
        .set_codec_config(DecoderConfig::new(VideoCodec::Mock, 640, 360))
        .context("configuring decoder")?;

    for i in 0..TOTAL_FRAMES {
        let kind = if i % KEYFRAME_INTERVAL == 0 {
            FrameKind::Key
        } else {
            FrameKind::Delta
        };
        engine.push_frame(kind, vec![i as u8], i as i64 * 41_667, 41_667);
    }
    engine.finish_stream();
    println!(
        "loaded {} synthetic frames, keyframe every {}",
        TOTAL_FRAMES, KEYFRAME_INTERVAL
    );

    // Play forward, jump back across a GOP, scrub to the end.
    for i in 0..12 {
        show(&engine, i, Direction::Forward).await;
    }
    show(&engine, 5, Direction::Backward).await;
    for i in [60, 61, 62, 180, 239] {
        show(&engine, i, Direction::Forward).await;
    }

    let stats = engine.stats();
    println!(
        "decoded {} frames, evicted {}, {} decoder resets, {} cached at exit",
        stats.decoded_frames, stats.evicted_frames, stats.decoder_resets, stats.cached_frames
    );
    engine.close();
    Ok(())
}

async fn show(engine: &FrameQ<MockBackend>, index: usize, direction: Direction) {
    match engine.get_frame(index, direction, false).await {
        Ok(Some(image)) => println!(
            "frame {index:3} ({direction:?}): {}x{} ts {}us",
            image.width, image.height, image.timestamp_us
        ),
        Ok(None) => println!("frame {index:3} ({direction:?}): unavailable"),
        Err(e) => println!("frame {index:3} ({direction:?}): {e}"),
    }
}
