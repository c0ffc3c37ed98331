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

//! VP8/VP9 decode backend using libvpx.

use std::ffi::c_void;
use std::ptr;

use vpx_sys::{
    vpx_codec_ctx_t, vpx_codec_dec_init_ver, vpx_codec_decode, vpx_codec_destroy,
    vpx_codec_get_frame, vpx_codec_vp8_dx, vpx_codec_vp9_dx, VPX_CODEC_OK,
    VPX_DECODER_ABI_VERSION,
};

use super::{DecodeBackend, DecoderConfig, VideoCodec};
use crate::error::{FrameQError, Result};
use crate::frame::{DecodedImage, EncodedFrame};

struct VpxContext {
    context: vpx_codec_ctx_t,
}

impl VpxContext {
    fn new(codec: VideoCodec) -> Result<Self> {
        let interface = match codec {
            VideoCodec::Vp8 => unsafe { vpx_codec_vp8_dx() },
            VideoCodec::Vp9 => unsafe { vpx_codec_vp9_dx() },
            VideoCodec::Mock => {
                return Err(FrameQError::UnsupportedCodec(
                    "mock codec has no libvpx interface".into(),
                ))
            }
        };
        let mut context = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            vpx_codec_dec_init_ver(
                &mut context,
                interface,
                ptr::null_mut(),
                0,
                VPX_DECODER_ABI_VERSION as i32,
            )
        };
        if ret != VPX_CODEC_OK {
            return Err(FrameQError::UnsupportedCodec(format!(
                "failed to initialize libvpx decoder: {ret:?}"
            )));
        }
        Ok(Self { context })
    }

    fn decode_bytes(&mut self, data: Option<&[u8]>) -> Result<()> {
        let (data_ptr, data_len) = match data {
            Some(bytes) => (bytes.as_ptr(), bytes.len() as u32),
            // A null payload signals end-of-stream so held frames drain.
            None => (ptr::null(), 0),
        };
        let ret = unsafe {
            vpx_codec_decode(&mut self.context, data_ptr, data_len, ptr::null_mut(), 0)
        };
        if ret != VPX_CODEC_OK {
            let message = unsafe {
                let error_cstr = vpx_sys::vpx_codec_err_to_string(ret);
                if error_cstr.is_null() {
                    "unknown codec error".to_string()
                } else {
                    std::ffi::CStr::from_ptr(error_cstr)
                        .to_string_lossy()
                        .into_owned()
                }
            };
            return Err(FrameQError::Decode(message));
        }
        Ok(())
    }

    /// Pulls every frame libvpx has ready, as I420 buffers.
    fn drain(&mut self, timestamp_us: i64) -> Vec<DecodedImage> {
        let mut images = Vec::new();
        let mut iter = ptr::null_mut::<c_void>();
        loop {
            let img = unsafe {
                vpx_codec_get_frame(
                    &mut self.context,
                    &mut iter as *mut _ as *mut *const c_void,
                )
            };
            if img.is_null() {
                break;
            }
            let (width, height, data) = unsafe {
                let width = (*img).d_w as usize;
                let height = (*img).d_h as usize;
                let uv_width = width / 2;
                let uv_height = height / 2;

                let mut buffer = Vec::with_capacity(width * height + 2 * uv_width * uv_height);
                copy_plane_to_buffer((*img).planes[0], (*img).stride[0], width, height, &mut buffer);
                copy_plane_to_buffer(
                    (*img).planes[1],
                    (*img).stride[1],
                    uv_width,
                    uv_height,
                    &mut buffer,
                );
                copy_plane_to_buffer(
                    (*img).planes[2],
                    (*img).stride[2],
                    uv_width,
                    uv_height,
                    &mut buffer,
                );
                (width as u32, height as u32, buffer)
            };
            images.push(DecodedImage {
                width,
                height,
                data,
                timestamp_us,
            });
        }
        images
    }
}

impl Drop for VpxContext {
    fn drop(&mut self) {
        unsafe {
            vpx_codec_destroy(&mut self.context);
        }
    }
}

/// Copies one plane out of a `vpx_image_t`, accounting for stride.
unsafe fn copy_plane_to_buffer(
    plane: *const u8,
    stride: i32,
    width: usize,
    height: usize,
    buffer: &mut Vec<u8>,
) {
    let mut current_ptr = plane;
    for _ in 0..height {
        buffer.extend_from_slice(std::slice::from_raw_parts(current_ptr, width));
        current_ptr = current_ptr.offset(stride as isize);
    }
}

/// libvpx-backed [`DecodeBackend`] for VP8 and VP9 streams.
///
/// Reset tears the codec context down and rebuilds it on the next
/// configure, which is the only way libvpx forgets reference frames.
pub struct VpxBackend {
    context: Option<VpxContext>,
}

impl VpxBackend {
    pub fn new() -> Self {
        Self { context: None }
    }
}

impl Default for VpxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeBackend for VpxBackend {
    fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
        self.context = Some(VpxContext::new(config.codec)?);
        Ok(())
    }

    fn decode(&mut self, frame: &EncodedFrame) -> Result<Vec<DecodedImage>> {
        let context = self.context.as_mut().ok_or(FrameQError::NotConfigured)?;
        context.decode_bytes(Some(&frame.data))?;
        Ok(context.drain(frame.timestamp_us))
    }

    fn flush(&mut self) -> Result<Vec<DecodedImage>> {
        let context = self.context.as_mut().ok_or(FrameQError::NotConfigured)?;
        context.decode_bytes(None)?;
        Ok(context.drain(0))
    }

    fn reset(&mut self) {
        self.context = None;
    }
}
