//! C operation table of encoding contexts.
//!
//! Clients get the table with [`exynos_mfc_encoder_ops`]. An encoder's input direction receives
//! raw frames and its output direction returns the bitstream.
#![allow(non_camel_case_types)]

use std::os::raw::{c_int, c_uint, c_void};

use log::{debug, error};

use exynos_mfc::device::V4l2Device;
use exynos_mfc::encoder::{
    CodecParam, EncCommonParam, EncParam, Encoder, EncoderConfig, ForceFrameType,
    FrameSkipMode, H263Param, H264Param, Mpeg4Param, SliceMode, ENCODER_CAPS,
};
use exynos_mfc::error::{VideoError, VideoResult};
use exynos_mfc::format::{CodingType, Geometry};
use exynos_mfc::ops::OpsInfo;
use exynos_mfc::pool::direction::{Input, Output};
use exynos_mfc::pool::BufferPool;

use crate::buffer::{self, context, CodecContext};
use crate::common::{
    coding_from_c, memory_type, mfc_buffer, mfc_geometry, mfc_plane, result_code,
    MFC_DIRECTION_INPUT, MFC_DIRECTION_OUTPUT, MFC_ERROR_BADPARAM, MFC_ERROR_NONE,
};

/// An encoding context.
pub struct mfc_encoder {
    encoder: Encoder,
}

impl CodecContext for mfc_encoder {
    fn input(&self) -> &BufferPool<Input, V4l2Device> {
        self.encoder.input()
    }

    fn output(&self) -> &BufferPool<Output, V4l2Device> {
        self.encoder.output()
    }

    fn set_geometry(&self, direction: c_uint, geometry: &Geometry) -> VideoResult<()> {
        match direction {
            MFC_DIRECTION_INPUT => self.encoder.set_input_geometry(geometry),
            MFC_DIRECTION_OUTPUT => self.encoder.set_output_geometry(geometry),
            _ => Err(VideoError::BadParam("invalid direction")),
        }
    }

    fn get_geometry(&self, direction: c_uint) -> VideoResult<Geometry> {
        match direction {
            MFC_DIRECTION_INPUT => self.encoder.get_input_geometry(),
            MFC_DIRECTION_OUTPUT => self.encoder.get_output_geometry(),
            _ => Err(VideoError::BadParam("invalid direction")),
        }
    }
}

pub const MFC_FRAME_SKIP_DISABLED: c_int = 0;
pub const MFC_FRAME_SKIP_LEVEL_LIMIT: c_int = 1;
pub const MFC_FRAME_SKIP_BUF_LIMIT: c_int = 2;

pub const MFC_SLICE_MODE_SINGLE: c_int = 0;
pub const MFC_SLICE_MODE_MAX_MB: c_int = 1;
pub const MFC_SLICE_MODE_MAX_BYTES: c_int = 3;

pub const MFC_FORCE_FRAME_DISABLED: c_int = 0;
pub const MFC_FORCE_FRAME_I: c_int = 1;
pub const MFC_FORCE_FRAME_NOT_CODED: c_int = 2;

fn frame_skip_from_c(mode: c_int) -> VideoResult<FrameSkipMode> {
    match mode {
        MFC_FRAME_SKIP_DISABLED => Ok(FrameSkipMode::Disabled),
        MFC_FRAME_SKIP_LEVEL_LIMIT => Ok(FrameSkipMode::LevelLimit),
        MFC_FRAME_SKIP_BUF_LIMIT => Ok(FrameSkipMode::BufLimit),
        _ => Err(VideoError::BadParam("invalid frame skip mode")),
    }
}

fn slice_mode_from_c(mode: c_int) -> VideoResult<SliceMode> {
    match mode {
        MFC_SLICE_MODE_SINGLE => Ok(SliceMode::Single),
        MFC_SLICE_MODE_MAX_MB => Ok(SliceMode::MaxMacroblocks),
        MFC_SLICE_MODE_MAX_BYTES => Ok(SliceMode::MaxBytes),
        _ => Err(VideoError::BadParam("invalid slice mode")),
    }
}

/// Parameters shared by all codecs.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct mfc_enc_common_param {
    pub idr_period: c_int,
    /// One of the `MFC_SLICE_MODE_*` values.
    pub slice_mode: c_int,
    pub random_intra_mb_refresh: c_int,
    pub pad_control_on: bool,
    pub luma_pad_val: c_int,
    pub cb_pad_val: c_int,
    pub cr_pad_val: c_int,
    pub enable_frame_rate_control: bool,
    pub enable_mb_rate_control: bool,
    pub bitrate: c_int,
    pub frame_qp: c_int,
    pub frame_qp_p: c_int,
    pub qs_code_max: c_int,
    pub qs_code_min: c_int,
    pub cbr_period_rf: c_int,
    /// One of the `MFC_FRAME_SKIP_*` values.
    pub frame_skip: c_int,
}

impl TryFrom<&mfc_enc_common_param> for EncCommonParam {
    type Error = VideoError;

    fn try_from(p: &mfc_enc_common_param) -> VideoResult<Self> {
        Ok(EncCommonParam {
            idr_period: p.idr_period,
            slice_mode: slice_mode_from_c(p.slice_mode)?,
            random_intra_mb_refresh: p.random_intra_mb_refresh,
            pad_control_on: p.pad_control_on,
            luma_pad_val: p.luma_pad_val,
            cb_pad_val: p.cb_pad_val,
            cr_pad_val: p.cr_pad_val,
            enable_frame_rate_control: p.enable_frame_rate_control,
            enable_mb_rate_control: p.enable_mb_rate_control,
            bitrate: p.bitrate,
            frame_qp: p.frame_qp,
            frame_qp_p: p.frame_qp_p,
            qs_code_max: p.qs_code_max,
            qs_code_min: p.qs_code_min,
            cbr_period_rf: p.cbr_period_rf,
            frame_skip: frame_skip_from_c(p.frame_skip)?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct mfc_enc_h264_param {
    pub profile_idc: c_int,
    pub level_idc: c_int,
    pub frame_qp_b: c_int,
    pub frame_rate: c_int,
    pub slice_argument: c_int,
    pub number_b_frames: c_int,
    pub number_ref_for_p_frames: c_int,
    pub loop_filter_disable: c_int,
    pub loop_filter_alpha_c0_offset: c_int,
    pub loop_filter_beta_offset: c_int,
    pub symbol_mode: c_int,
    pub picture_interlace: bool,
    pub transform_8x8_mode: bool,
    pub dark_disable: bool,
    pub smooth_disable: bool,
    pub static_disable: bool,
    pub activity_disable: bool,
}

impl From<&mfc_enc_h264_param> for H264Param {
    fn from(p: &mfc_enc_h264_param) -> Self {
        H264Param {
            profile_idc: p.profile_idc,
            level_idc: p.level_idc,
            frame_qp_b: p.frame_qp_b,
            frame_rate: p.frame_rate,
            slice_argument: p.slice_argument,
            number_b_frames: p.number_b_frames,
            number_ref_for_p_frames: p.number_ref_for_p_frames,
            loop_filter_disable: p.loop_filter_disable,
            loop_filter_alpha_c0_offset: p.loop_filter_alpha_c0_offset,
            loop_filter_beta_offset: p.loop_filter_beta_offset,
            symbol_mode: p.symbol_mode,
            picture_interlace: p.picture_interlace,
            transform_8x8_mode: p.transform_8x8_mode,
            dark_disable: p.dark_disable,
            smooth_disable: p.smooth_disable,
            static_disable: p.static_disable,
            activity_disable: p.activity_disable,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct mfc_enc_mpeg4_param {
    pub profile_idc: c_int,
    pub level_idc: c_int,
    pub frame_qp_b: c_int,
    pub time_increment_res: c_int,
    pub vop_time_increment: c_int,
    pub slice_argument: c_int,
    pub number_b_frames: c_int,
    pub disable_qpel_me: bool,
}

impl From<&mfc_enc_mpeg4_param> for Mpeg4Param {
    fn from(p: &mfc_enc_mpeg4_param) -> Self {
        Mpeg4Param {
            profile_idc: p.profile_idc,
            level_idc: p.level_idc,
            frame_qp_b: p.frame_qp_b,
            time_increment_res: p.time_increment_res,
            vop_time_increment: p.vop_time_increment,
            slice_argument: p.slice_argument,
            number_b_frames: p.number_b_frames,
            disable_qpel_me: p.disable_qpel_me,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct mfc_enc_h263_param {
    pub frame_rate: c_int,
}

/// Encoding parameters. Only the member matching `coding` is read.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct mfc_enc_param {
    /// `MFC_CODING_AVC`, `MFC_CODING_MPEG4` or `MFC_CODING_H263`.
    pub coding: c_int,
    pub common: mfc_enc_common_param,
    pub h264: mfc_enc_h264_param,
    pub mpeg4: mfc_enc_mpeg4_param,
    pub h263: mfc_enc_h263_param,
}

impl TryFrom<&mfc_enc_param> for EncParam {
    type Error = VideoError;

    fn try_from(p: &mfc_enc_param) -> VideoResult<Self> {
        let codec = match coding_from_c(p.coding) {
            CodingType::Avc => CodecParam::H264((&p.h264).into()),
            CodingType::Mpeg4 => CodecParam::Mpeg4((&p.mpeg4).into()),
            CodingType::H263 => CodecParam::H263(H263Param {
                frame_rate: p.h263.frame_rate,
            }),
            _ => return Err(VideoError::BadParam("unsupported coding type")),
        };

        Ok(EncParam {
            common: (&p.common).try_into()?,
            codec,
        })
    }
}

/// Open an encoder using `memory` (one of the `MFC_MEMORY_*` values) for client buffers. Returns
/// NULL on failure.
pub extern "C" fn mfc_encoder_init(memory: c_uint) -> *mut mfc_encoder {
    let encoder = memory_type(memory).and_then(|memory| {
        let config = EncoderConfig::from_env().memory(memory);
        let encoder = Encoder::open(&config)?;
        debug!("Opened encoder {}", config.device.path.display());
        Ok(encoder)
    });

    match encoder {
        Ok(encoder) => Box::into_raw(Box::new(mfc_encoder { encoder })),
        Err(e) => {
            error!("Failed to create encoder: {:#}", e);
            std::ptr::null_mut()
        }
    }
}

/// Stop both directions, free their buffers and close the device.
///
/// # Safety
/// `encoder` must be NULL or a context returned by `init` that has not been finalized yet.
pub unsafe extern "C" fn mfc_encoder_finalize(encoder: *mut mfc_encoder) -> c_int {
    if encoder.is_null() {
        return MFC_ERROR_BADPARAM;
    }
    drop(Box::from_raw(encoder));
    MFC_ERROR_NONE
}

/// Push all encoding parameters to the device at once.
///
/// # Safety
/// `encoder` must be a valid context and `param` must point to valid parameters.
pub unsafe extern "C" fn mfc_encoder_set_enc_param(
    encoder: *mut mfc_encoder,
    param: *const mfc_enc_param,
) -> c_int {
    let Some(param) = param.as_ref() else {
        return MFC_ERROR_BADPARAM;
    };
    result_code(
        "set_enc_param",
        context(encoder).and_then(|ctx| {
            let param = EncParam::try_from(param)?;
            ctx.encoder.set_enc_param(&param)
        }),
    )
}

macro_rules! encoder_int_op {
    ($name:ident, $method:ident) => {
        /// # Safety
        /// `encoder` must be a valid context.
        pub unsafe extern "C" fn $name(encoder: *mut mfc_encoder, value: c_int) -> c_int {
            result_code(
                stringify!($method),
                context(encoder).and_then(|ctx| ctx.encoder.$method(value)),
            )
        }
    };
}

encoder_int_op!(mfc_encoder_set_frame_tag, set_frame_tag);
encoder_int_op!(mfc_encoder_set_frame_rate, set_frame_rate);
encoder_int_op!(mfc_encoder_set_bit_rate, set_bit_rate);
encoder_int_op!(mfc_encoder_set_idr_period, set_idr_period);

/// Tag of the last encoded frame, or -1.
///
/// # Safety
/// `encoder` must be a valid context.
pub unsafe extern "C" fn mfc_encoder_get_frame_tag(encoder: *mut mfc_encoder) -> c_int {
    context(encoder).map_or(-1, |ctx| ctx.encoder.get_frame_tag())
}

/// Force the type of the next frame. `frame_type` is one of the `MFC_FORCE_FRAME_*` values.
///
/// # Safety
/// `encoder` must be a valid context.
pub unsafe extern "C" fn mfc_encoder_set_frame_type(
    encoder: *mut mfc_encoder,
    frame_type: c_int,
) -> c_int {
    let frame_type = match frame_type {
        MFC_FORCE_FRAME_DISABLED => ForceFrameType::Disabled,
        MFC_FORCE_FRAME_I => ForceFrameType::IFrame,
        MFC_FORCE_FRAME_NOT_CODED => ForceFrameType::NotCoded,
        _ => return MFC_ERROR_BADPARAM,
    };
    result_code(
        "set_frame_type",
        context(encoder).and_then(|ctx| ctx.encoder.set_frame_type(frame_type)),
    )
}

/// `mode` is one of the `MFC_FRAME_SKIP_*` values.
///
/// # Safety
/// `encoder` must be a valid context.
pub unsafe extern "C" fn mfc_encoder_set_frame_skip(encoder: *mut mfc_encoder, mode: c_int) -> c_int {
    result_code(
        "set_frame_skip",
        context(encoder).and_then(|ctx| ctx.encoder.set_frame_skip(frame_skip_from_c(mode)?)),
    )
}

/// # Safety
/// `encoder` must be a valid context.
pub unsafe extern "C" fn mfc_encoder_enable_prepend_sps_pps_to_idr(
    encoder: *mut mfc_encoder,
) -> c_int {
    result_code(
        "enable_prepend_sps_pps_to_idr",
        context(encoder).and_then(|ctx| ctx.encoder.enable_prepend_sps_pps_to_idr()),
    )
}

/// Operations of encoding contexts.
#[repr(C)]
pub struct mfc_encoder_ops {
    /// Version of the table, at most `EXYNOS_MFC_OPS_VERSION`.
    pub version: u32,
    /// Set of `OpsCaps` bits.
    pub capabilities: u32,

    pub init: extern "C" fn(c_uint) -> *mut mfc_encoder,
    pub finalize: unsafe extern "C" fn(*mut mfc_encoder) -> c_int,

    pub set_enc_param: unsafe extern "C" fn(*mut mfc_encoder, *const mfc_enc_param) -> c_int,
    pub set_frame_tag: unsafe extern "C" fn(*mut mfc_encoder, c_int) -> c_int,
    pub get_frame_tag: unsafe extern "C" fn(*mut mfc_encoder) -> c_int,
    pub set_frame_type: unsafe extern "C" fn(*mut mfc_encoder, c_int) -> c_int,
    pub set_frame_rate: unsafe extern "C" fn(*mut mfc_encoder, c_int) -> c_int,
    pub set_bit_rate: unsafe extern "C" fn(*mut mfc_encoder, c_int) -> c_int,
    pub set_frame_skip: unsafe extern "C" fn(*mut mfc_encoder, c_int) -> c_int,
    pub set_idr_period: unsafe extern "C" fn(*mut mfc_encoder, c_int) -> c_int,
    pub enable_prepend_sps_pps_to_idr: unsafe extern "C" fn(*mut mfc_encoder) -> c_int,

    pub enable_cacheable: unsafe extern "C" fn(*mut mfc_encoder, c_uint) -> c_int,
    pub set_shareable: unsafe extern "C" fn(*mut mfc_encoder, c_uint, bool) -> c_int,
    pub get_buffer: unsafe extern "C" fn(*mut mfc_encoder, c_uint, c_int, *mut mfc_buffer) -> c_int,
    pub set_geometry: unsafe extern "C" fn(*mut mfc_encoder, c_uint, *const mfc_geometry) -> c_int,
    pub get_geometry: unsafe extern "C" fn(*mut mfc_encoder, c_uint, *mut mfc_geometry) -> c_int,
    pub setup: unsafe extern "C" fn(*mut mfc_encoder, c_uint, c_uint) -> c_int,
    pub run: unsafe extern "C" fn(*mut mfc_encoder, c_uint) -> c_int,
    pub stop: unsafe extern "C" fn(*mut mfc_encoder, c_uint) -> c_int,
    pub wait: unsafe extern "C" fn(*mut mfc_encoder, c_uint) -> c_int,
    pub register:
        unsafe extern "C" fn(*mut mfc_encoder, c_uint, *const mfc_plane, c_uint) -> c_int,
    pub clear_registered: unsafe extern "C" fn(*mut mfc_encoder, c_uint) -> c_int,
    pub find: unsafe extern "C" fn(*mut mfc_encoder, c_uint, *const mfc_plane) -> c_int,
    pub enqueue: unsafe extern "C" fn(
        *mut mfc_encoder,
        c_uint,
        *const mfc_plane,
        c_uint,
        *mut c_void,
        c_uint,
    ) -> c_int,
    pub enqueue_all: unsafe extern "C" fn(*mut mfc_encoder, c_uint) -> c_int,
    pub dequeue: unsafe extern "C" fn(*mut mfc_encoder, c_uint, *mut mfc_buffer) -> c_int,
    pub extension_enqueue: unsafe extern "C" fn(
        *mut mfc_encoder,
        c_uint,
        *const mfc_plane,
        c_uint,
        *mut c_void,
    ) -> c_int,
    pub extension_dequeue: unsafe extern "C" fn(*mut mfc_encoder, c_uint, *mut mfc_buffer) -> c_int,
    pub clear_queue: unsafe extern "C" fn(*mut mfc_encoder, c_uint) -> c_int,
    pub cleanup: unsafe extern "C" fn(*mut mfc_encoder, c_uint) -> c_int,
}

impl mfc_encoder_ops {
    fn new(info: OpsInfo) -> Self {
        mfc_encoder_ops {
            version: info.version,
            capabilities: info.capabilities.bits(),

            init: mfc_encoder_init,
            finalize: mfc_encoder_finalize,

            set_enc_param: mfc_encoder_set_enc_param,
            set_frame_tag: mfc_encoder_set_frame_tag,
            get_frame_tag: mfc_encoder_get_frame_tag,
            set_frame_type: mfc_encoder_set_frame_type,
            set_frame_rate: mfc_encoder_set_frame_rate,
            set_bit_rate: mfc_encoder_set_bit_rate,
            set_frame_skip: mfc_encoder_set_frame_skip,
            set_idr_period: mfc_encoder_set_idr_period,
            enable_prepend_sps_pps_to_idr: mfc_encoder_enable_prepend_sps_pps_to_idr,

            enable_cacheable: buffer::mfc_enable_cacheable::<mfc_encoder>,
            set_shareable: buffer::mfc_set_shareable::<mfc_encoder>,
            get_buffer: buffer::mfc_get_buffer::<mfc_encoder>,
            set_geometry: buffer::mfc_set_geometry::<mfc_encoder>,
            get_geometry: buffer::mfc_get_geometry::<mfc_encoder>,
            setup: buffer::mfc_setup::<mfc_encoder>,
            run: buffer::mfc_run::<mfc_encoder>,
            stop: buffer::mfc_stop::<mfc_encoder>,
            wait: buffer::mfc_wait::<mfc_encoder>,
            register: buffer::mfc_register::<mfc_encoder>,
            clear_registered: buffer::mfc_clear_registered::<mfc_encoder>,
            find: buffer::mfc_find::<mfc_encoder>,
            enqueue: buffer::mfc_enqueue::<mfc_encoder>,
            enqueue_all: buffer::mfc_enqueue_all::<mfc_encoder>,
            dequeue: buffer::mfc_dequeue::<mfc_encoder>,
            extension_enqueue: buffer::mfc_extension_enqueue::<mfc_encoder>,
            extension_dequeue: buffer::mfc_extension_dequeue::<mfc_encoder>,
            clear_queue: buffer::mfc_clear_queue::<mfc_encoder>,
            cleanup: buffer::mfc_cleanup::<mfc_encoder>,
        }
    }
}

/// Fill `ops` with the encoder operations, for a client built against table `version`.
///
/// Returns `MFC_ERROR_BADPARAM` if `ops` is NULL or if `version` is not supported.
///
/// # Safety
/// `ops` must be NULL or point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn exynos_mfc_encoder_ops(version: u32, ops: *mut mfc_encoder_ops) -> c_int {
    let Some(ops) = ops.as_mut() else {
        return MFC_ERROR_BADPARAM;
    };
    let info = OpsInfo::new(ENCODER_CAPS);
    if let Err(e) = info.check_version(version) {
        error!("Encoder operations version {}: {}", version, e);
        return e.code();
    }
    *ops = mfc_encoder_ops::new(info);

    MFC_ERROR_NONE
}
