//! C operation table of decoding contexts.
//!
//! Clients get the table with [`exynos_mfc_decoder_ops`], create a context with its `init`
//! member, and destroy it with `finalize`. A decoder's input direction receives the bitstream
//! and its output direction returns decoded frames.
#![allow(non_camel_case_types)]

use std::os::raw::{c_int, c_uint, c_void};
use std::os::unix::io::{FromRawFd, OwnedFd};
use std::sync::Arc;

use log::{debug, error};

use exynos_mfc::decoder::{Decoder, DecoderConfig, FramePacking, DECODER_CAPS};
use exynos_mfc::device::V4l2Device;
use exynos_mfc::error::{VideoError, VideoResult};
use exynos_mfc::format::Geometry;
use exynos_mfc::ops::OpsInfo;
use exynos_mfc::pool::direction::{Input, Output};
use exynos_mfc::pool::BufferPool;

use crate::buffer::{self, context, CodecContext};
use crate::common::{
    memory_type, mfc_buffer, mfc_geometry, mfc_plane, result_code, MFC_DIRECTION_INPUT,
    MFC_DIRECTION_OUTPUT, MFC_ERROR_BADPARAM, MFC_ERROR_NONE,
};

/// A decoding context.
pub struct mfc_decoder {
    decoder: Decoder,
}

impl CodecContext for mfc_decoder {
    fn input(&self) -> &BufferPool<Input, V4l2Device> {
        self.decoder.input()
    }

    fn output(&self) -> &BufferPool<Output, V4l2Device> {
        self.decoder.output()
    }

    fn set_geometry(&self, direction: c_uint, geometry: &Geometry) -> VideoResult<()> {
        match direction {
            MFC_DIRECTION_INPUT => self.decoder.set_input_geometry(geometry),
            MFC_DIRECTION_OUTPUT => self.decoder.set_output_geometry(geometry),
            _ => Err(VideoError::BadParam("invalid direction")),
        }
    }

    fn get_geometry(&self, direction: c_uint) -> VideoResult<Geometry> {
        match direction {
            MFC_DIRECTION_INPUT => Ok(self.decoder.input().geometry()),
            MFC_DIRECTION_OUTPUT => self.decoder.get_output_geometry(),
            _ => Err(VideoError::BadParam("invalid direction")),
        }
    }
}

/// Stereo frame packing arrangement of the current frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct mfc_frame_packing {
    pub available: bool,
    pub arrangement_id: u32,
    pub arrangement_cancel: bool,
    pub arrangement_type: u8,
    pub quincunx_sampling: bool,
    pub content_interpretation_type: u8,
    pub spatial_flipping: bool,
    pub frame0_flipped: bool,
    pub field_views: bool,
    pub current_frame_is_frame0: bool,
    pub frame0_grid_pos_x: u8,
    pub frame0_grid_pos_y: u8,
    pub frame1_grid_pos_x: u8,
    pub frame1_grid_pos_y: u8,
}

impl From<&FramePacking> for mfc_frame_packing {
    fn from(fp: &FramePacking) -> Self {
        mfc_frame_packing {
            available: fp.available,
            arrangement_id: fp.arrangement_id,
            arrangement_cancel: fp.arrangement_cancel,
            arrangement_type: fp.arrangement_type,
            quincunx_sampling: fp.quincunx_sampling,
            content_interpretation_type: fp.content_interpretation_type,
            spatial_flipping: fp.spatial_flipping,
            frame0_flipped: fp.frame0_flipped,
            field_views: fp.field_views,
            current_frame_is_frame0: fp.current_frame_is_frame0,
            frame0_grid_pos_x: fp.frame0_grid_pos_x,
            frame0_grid_pos_y: fp.frame0_grid_pos_y,
            frame1_grid_pos_x: fp.frame1_grid_pos_x,
            frame1_grid_pos_y: fp.frame1_grid_pos_y,
        }
    }
}

fn new_decoder(memory: c_uint, release_fd: Option<OwnedFd>) -> anyhow::Result<Box<mfc_decoder>> {
    let config = DecoderConfig::from_env().memory(memory_type(memory)?);
    let decoder = match release_fd {
        None => Decoder::open(&config)?,
        Some(fd) => {
            let device = V4l2Device::open(&config.device)?;
            Decoder::with_release_fd(Arc::new(device), &config, fd)?
        }
    };
    debug!("Opened decoder {}", config.device.path.display());

    Ok(Box::new(mfc_decoder { decoder }))
}

fn into_handle(decoder: anyhow::Result<Box<mfc_decoder>>) -> *mut mfc_decoder {
    match decoder {
        Ok(decoder) => Box::into_raw(decoder),
        Err(e) => {
            error!("Failed to create decoder: {:#}", e);
            std::ptr::null_mut()
        }
    }
}

/// Open a decoder using `memory` (one of the `MFC_MEMORY_*` values) for client buffers. Returns
/// NULL on failure.
pub extern "C" fn mfc_decoder_init(memory: c_uint) -> *mut mfc_decoder {
    into_handle(new_decoder(memory, None))
}

/// Like `init`, but decoded picture buffers are released through the shared memory of
/// `release_fd`, which the decoder takes ownership of.
///
/// # Safety
/// `release_fd` must be a valid fd not owned by anything else.
pub unsafe extern "C" fn mfc_decoder_init_with_release_fd(
    memory: c_uint,
    release_fd: c_int,
) -> *mut mfc_decoder {
    if release_fd < 0 {
        error!("Invalid release table fd {}", release_fd);
        return std::ptr::null_mut();
    }
    into_handle(new_decoder(memory, Some(OwnedFd::from_raw_fd(release_fd))))
}

/// Stop both directions, free their buffers and close the device.
///
/// # Safety
/// `decoder` must be NULL or a context returned by `init` that has not been finalized yet.
pub unsafe extern "C" fn mfc_decoder_finalize(decoder: *mut mfc_decoder) -> c_int {
    if decoder.is_null() {
        return MFC_ERROR_BADPARAM;
    }
    drop(Box::from_raw(decoder));
    MFC_ERROR_NONE
}

macro_rules! decoder_op {
    ($name:ident, $method:ident) => {
        /// # Safety
        /// `decoder` must be a valid context.
        pub unsafe extern "C" fn $name(decoder: *mut mfc_decoder) -> c_int {
            result_code(
                stringify!($method),
                context(decoder).and_then(|ctx| ctx.decoder.$method()),
            )
        }
    };
}

decoder_op!(mfc_decoder_set_immediate_display, set_immediate_display);
decoder_op!(mfc_decoder_set_i_frame_decoding, set_i_frame_decoding);
decoder_op!(mfc_decoder_enable_packed_pb, enable_packed_pb);
decoder_op!(mfc_decoder_enable_loop_filter, enable_loop_filter);
decoder_op!(mfc_decoder_enable_slice_mode, enable_slice_mode);
decoder_op!(mfc_decoder_enable_sei_parsing, enable_sei_parsing);
decoder_op!(mfc_decoder_enable_dynamic_dpb, enable_dynamic_dpb);

/// # Safety
/// `decoder` must be a valid context.
pub unsafe extern "C" fn mfc_decoder_set_frame_tag(decoder: *mut mfc_decoder, tag: c_int) -> c_int {
    result_code(
        "set_frame_tag",
        context(decoder).and_then(|ctx| ctx.decoder.set_frame_tag(tag)),
    )
}

/// Tag of the last decoded frame, or -1.
///
/// # Safety
/// `decoder` must be a valid context.
pub unsafe extern "C" fn mfc_decoder_get_frame_tag(decoder: *mut mfc_decoder) -> c_int {
    context(decoder).map_or(-1, |ctx| ctx.decoder.get_frame_tag())
}

/// Minimum number of output buffers the stream requires, or a negative error code.
///
/// # Safety
/// `decoder` must be a valid context.
pub unsafe extern "C" fn mfc_decoder_get_actual_buffer_count(decoder: *mut mfc_decoder) -> c_int {
    match context(decoder).and_then(|ctx| ctx.decoder.get_actual_buffer_count()) {
        Ok(count) => count as c_int,
        Err(e) => result_code("get_actual_buffer_count", Err(e)),
    }
}

/// # Safety
/// `decoder` must be a valid context.
pub unsafe extern "C" fn mfc_decoder_set_display_delay(
    decoder: *mut mfc_decoder,
    delay: c_int,
) -> c_int {
    result_code(
        "set_display_delay",
        context(decoder).and_then(|ctx| ctx.decoder.set_display_delay(delay)),
    )
}

/// # Safety
/// `decoder` must be a valid context and `info` must point to writable memory.
pub unsafe extern "C" fn mfc_decoder_get_frame_packing_info(
    decoder: *mut mfc_decoder,
    info: *mut mfc_frame_packing,
) -> c_int {
    let Some(info) = info.as_mut() else {
        return MFC_ERROR_BADPARAM;
    };
    match context(decoder).and_then(|ctx| ctx.decoder.get_frame_packing_info()) {
        Ok(fp) => {
            *info = mfc_frame_packing::from(&fp);
            MFC_ERROR_NONE
        }
        Err(e) => result_code("get_frame_packing_info", Err(e)),
    }
}

/// Operations of decoding contexts.
#[repr(C)]
pub struct mfc_decoder_ops {
    /// Version of the table, at most `EXYNOS_MFC_OPS_VERSION`.
    pub version: u32,
    /// Set of `OpsCaps` bits.
    pub capabilities: u32,

    pub init: extern "C" fn(c_uint) -> *mut mfc_decoder,
    pub init_with_release_fd: unsafe extern "C" fn(c_uint, c_int) -> *mut mfc_decoder,
    pub finalize: unsafe extern "C" fn(*mut mfc_decoder) -> c_int,

    pub set_frame_tag: unsafe extern "C" fn(*mut mfc_decoder, c_int) -> c_int,
    pub get_frame_tag: unsafe extern "C" fn(*mut mfc_decoder) -> c_int,
    pub get_actual_buffer_count: unsafe extern "C" fn(*mut mfc_decoder) -> c_int,
    pub set_display_delay: unsafe extern "C" fn(*mut mfc_decoder, c_int) -> c_int,
    pub set_immediate_display: unsafe extern "C" fn(*mut mfc_decoder) -> c_int,
    pub set_i_frame_decoding: unsafe extern "C" fn(*mut mfc_decoder) -> c_int,
    pub enable_packed_pb: unsafe extern "C" fn(*mut mfc_decoder) -> c_int,
    pub enable_loop_filter: unsafe extern "C" fn(*mut mfc_decoder) -> c_int,
    pub enable_slice_mode: unsafe extern "C" fn(*mut mfc_decoder) -> c_int,
    pub enable_sei_parsing: unsafe extern "C" fn(*mut mfc_decoder) -> c_int,
    pub get_frame_packing_info:
        unsafe extern "C" fn(*mut mfc_decoder, *mut mfc_frame_packing) -> c_int,
    pub enable_dynamic_dpb: unsafe extern "C" fn(*mut mfc_decoder) -> c_int,

    pub enable_cacheable: unsafe extern "C" fn(*mut mfc_decoder, c_uint) -> c_int,
    pub set_shareable: unsafe extern "C" fn(*mut mfc_decoder, c_uint, bool) -> c_int,
    pub get_buffer: unsafe extern "C" fn(*mut mfc_decoder, c_uint, c_int, *mut mfc_buffer) -> c_int,
    pub set_geometry: unsafe extern "C" fn(*mut mfc_decoder, c_uint, *const mfc_geometry) -> c_int,
    pub get_geometry: unsafe extern "C" fn(*mut mfc_decoder, c_uint, *mut mfc_geometry) -> c_int,
    pub setup: unsafe extern "C" fn(*mut mfc_decoder, c_uint, c_uint) -> c_int,
    pub run: unsafe extern "C" fn(*mut mfc_decoder, c_uint) -> c_int,
    pub stop: unsafe extern "C" fn(*mut mfc_decoder, c_uint) -> c_int,
    pub wait: unsafe extern "C" fn(*mut mfc_decoder, c_uint) -> c_int,
    pub register:
        unsafe extern "C" fn(*mut mfc_decoder, c_uint, *const mfc_plane, c_uint) -> c_int,
    pub clear_registered: unsafe extern "C" fn(*mut mfc_decoder, c_uint) -> c_int,
    pub find: unsafe extern "C" fn(*mut mfc_decoder, c_uint, *const mfc_plane) -> c_int,
    pub enqueue: unsafe extern "C" fn(
        *mut mfc_decoder,
        c_uint,
        *const mfc_plane,
        c_uint,
        *mut c_void,
        c_uint,
    ) -> c_int,
    pub enqueue_all: unsafe extern "C" fn(*mut mfc_decoder, c_uint) -> c_int,
    pub dequeue: unsafe extern "C" fn(*mut mfc_decoder, c_uint, *mut mfc_buffer) -> c_int,
    pub extension_enqueue: unsafe extern "C" fn(
        *mut mfc_decoder,
        c_uint,
        *const mfc_plane,
        c_uint,
        *mut c_void,
    ) -> c_int,
    pub extension_dequeue: unsafe extern "C" fn(*mut mfc_decoder, c_uint, *mut mfc_buffer) -> c_int,
    pub clear_queue: unsafe extern "C" fn(*mut mfc_decoder, c_uint) -> c_int,
    pub cleanup: unsafe extern "C" fn(*mut mfc_decoder, c_uint) -> c_int,
}

impl mfc_decoder_ops {
    fn new(info: OpsInfo) -> Self {
        mfc_decoder_ops {
            version: info.version,
            capabilities: info.capabilities.bits(),

            init: mfc_decoder_init,
            init_with_release_fd: mfc_decoder_init_with_release_fd,
            finalize: mfc_decoder_finalize,

            set_frame_tag: mfc_decoder_set_frame_tag,
            get_frame_tag: mfc_decoder_get_frame_tag,
            get_actual_buffer_count: mfc_decoder_get_actual_buffer_count,
            set_display_delay: mfc_decoder_set_display_delay,
            set_immediate_display: mfc_decoder_set_immediate_display,
            set_i_frame_decoding: mfc_decoder_set_i_frame_decoding,
            enable_packed_pb: mfc_decoder_enable_packed_pb,
            enable_loop_filter: mfc_decoder_enable_loop_filter,
            enable_slice_mode: mfc_decoder_enable_slice_mode,
            enable_sei_parsing: mfc_decoder_enable_sei_parsing,
            get_frame_packing_info: mfc_decoder_get_frame_packing_info,
            enable_dynamic_dpb: mfc_decoder_enable_dynamic_dpb,

            enable_cacheable: buffer::mfc_enable_cacheable::<mfc_decoder>,
            set_shareable: buffer::mfc_set_shareable::<mfc_decoder>,
            get_buffer: buffer::mfc_get_buffer::<mfc_decoder>,
            set_geometry: buffer::mfc_set_geometry::<mfc_decoder>,
            get_geometry: buffer::mfc_get_geometry::<mfc_decoder>,
            setup: buffer::mfc_setup::<mfc_decoder>,
            run: buffer::mfc_run::<mfc_decoder>,
            stop: buffer::mfc_stop::<mfc_decoder>,
            wait: buffer::mfc_wait::<mfc_decoder>,
            register: buffer::mfc_register::<mfc_decoder>,
            clear_registered: buffer::mfc_clear_registered::<mfc_decoder>,
            find: buffer::mfc_find::<mfc_decoder>,
            enqueue: buffer::mfc_enqueue::<mfc_decoder>,
            enqueue_all: buffer::mfc_enqueue_all::<mfc_decoder>,
            dequeue: buffer::mfc_dequeue::<mfc_decoder>,
            extension_enqueue: buffer::mfc_extension_enqueue::<mfc_decoder>,
            extension_dequeue: buffer::mfc_extension_dequeue::<mfc_decoder>,
            clear_queue: buffer::mfc_clear_queue::<mfc_decoder>,
            cleanup: buffer::mfc_cleanup::<mfc_decoder>,
        }
    }
}

/// Fill `ops` with the decoder operations, for a client built against table `version`.
///
/// Returns `MFC_ERROR_BADPARAM` if `ops` is NULL or if `version` is not supported.
///
/// # Safety
/// `ops` must be NULL or point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn exynos_mfc_decoder_ops(version: u32, ops: *mut mfc_decoder_ops) -> c_int {
    let Some(ops) = ops.as_mut() else {
        return MFC_ERROR_BADPARAM;
    };
    let info = OpsInfo::new(DECODER_CAPS);
    if let Err(e) = info.check_version(version) {
        error!("Decoder operations version {}: {}", version, e);
        return e.code();
    }
    *ops = mfc_decoder_ops::new(info);

    MFC_ERROR_NONE
}

#[cfg(test)]
mod tests {
    use super::*;
    use exynos_mfc::ops::{OpsCaps, OPS_VERSION};
    use std::mem::MaybeUninit;

    #[test]
    fn ops_version_check() {
        let mut ops = MaybeUninit::<mfc_decoder_ops>::uninit();

        assert_eq!(
            unsafe { exynos_mfc_decoder_ops(OPS_VERSION + 1, ops.as_mut_ptr()) },
            MFC_ERROR_BADPARAM
        );
        assert_eq!(
            unsafe { exynos_mfc_decoder_ops(0, ops.as_mut_ptr()) },
            MFC_ERROR_BADPARAM
        );
        assert_eq!(
            unsafe { exynos_mfc_decoder_ops(OPS_VERSION, std::ptr::null_mut()) },
            MFC_ERROR_BADPARAM
        );

        assert_eq!(
            unsafe { exynos_mfc_decoder_ops(OPS_VERSION, ops.as_mut_ptr()) },
            MFC_ERROR_NONE
        );
        let ops = unsafe { ops.assume_init() };
        assert_eq!(ops.version, OPS_VERSION);
        let caps = OpsCaps::from_bits_truncate(ops.capabilities);
        assert!(caps.contains(OpsCaps::DYNAMIC_DPB | OpsCaps::EXTENSION_OUTPUT));
        assert!(!caps.contains(OpsCaps::ENC_PARAM));
    }

    #[test]
    fn null_context_is_rejected() {
        let mut ops = MaybeUninit::<mfc_decoder_ops>::uninit();
        unsafe { exynos_mfc_decoder_ops(OPS_VERSION, ops.as_mut_ptr()) };
        let ops = unsafe { ops.assume_init() };
        let null = std::ptr::null_mut();

        unsafe {
            assert_eq!((ops.finalize)(null), MFC_ERROR_BADPARAM);
            assert_eq!((ops.setup)(null, MFC_DIRECTION_OUTPUT, 0), MFC_ERROR_BADPARAM);
            assert_eq!((ops.enable_dynamic_dpb)(null), MFC_ERROR_BADPARAM);
            assert_eq!((ops.get_frame_tag)(null), -1);
            assert_eq!((ops.find)(null, MFC_DIRECTION_INPUT, std::ptr::null()), -1);
        }
        assert!((ops.init)(42).is_null());
    }

    #[test]
    fn frame_packing_conversion() {
        let fp = FramePacking::from_controls(1, 3, 1 << 15 | 3 << 1, 0x4321);
        let c_fp = mfc_frame_packing::from(&fp);
        assert!(c_fp.available);
        assert_eq!(c_fp.arrangement_id, 3);
        assert_eq!(c_fp.arrangement_type, 3);
        assert!(c_fp.spatial_flipping);
        assert_eq!(c_fp.frame0_grid_pos_x, 1);
        assert_eq!(c_fp.frame1_grid_pos_y, 4);
    }
}
