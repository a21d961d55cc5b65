//! Encoding context.
//!
//! An [`Encoder`] owns an opened MFC encoder node and its two buffer pools: the input pool
//! receives raw frames, the output pool returns the compressed bitstream.
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, warn};

use crate::bindings;
use crate::device::{DeviceConfig, MfcDevice, V4l2Device};
use crate::error::VideoResult;
use crate::format::Geometry;
use crate::ioctl::ExtControl;
use crate::memory::MemoryType;
use crate::ops::{CodecOps, OpsCaps, OpsInfo};
use crate::pool::direction::{Direction, Input, Output};
use crate::pool::{BufferPool, PoolConfig};
use crate::{Format, PlaneLayout};

pub const DEFAULT_ENCODER_DEVICE: &str = "/dev/video7";
/// Environment variable overriding the encoder node.
pub const ENCODER_DEVICE_ENV: &str = "EXYNOS_MFC_ENC_DEVICE";
/// Optional operations encoders support.
pub const ENCODER_CAPS: OpsCaps = OpsCaps::ENC_PARAM.union(OpsCaps::EXTENSION_INPUT);
const DEFAULT_POLL_TIMEOUT_MS: i32 = 1000;
/// Number of consecutive poll timeouts after which waiting for the bitstream is abandoned.
const MAX_OUTPUT_POLL_TIMEOUTS: u32 = 5;

const INPUT_PLANES: usize = 2;
const OUTPUT_PLANES: usize = 1;
const DEFAULT_INPUT_COUNT: u32 = 32;

/// Options of an encoding context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub device: DeviceConfig,
    /// Kind of memory clients provide to shared pools.
    pub memory: MemoryType,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            device: DeviceConfig::new(DEFAULT_ENCODER_DEVICE)
                .poll_timeout_ms(DEFAULT_POLL_TIMEOUT_MS),
            memory: MemoryType::UserPtr,
        }
    }
}

impl EncoderConfig {
    /// Default configuration, with the node taken from [`ENCODER_DEVICE_ENV`] if it is set.
    pub fn from_env() -> Self {
        let config = Self::default();
        EncoderConfig {
            device: config.device.path_from_env(ENCODER_DEVICE_ENV),
            ..config
        }
    }

    pub fn path<P: Into<PathBuf>>(self, path: P) -> Self {
        EncoderConfig {
            device: DeviceConfig {
                path: path.into(),
                ..self.device
            },
            ..self
        }
    }

    pub fn memory(self, memory: MemoryType) -> Self {
        EncoderConfig { memory, ..self }
    }

    pub fn poll_timeout_ms(self, timeout_ms: i32) -> Self {
        EncoderConfig {
            device: self.device.poll_timeout_ms(timeout_ms),
            ..self
        }
    }
}

/// Behavior of the rate control when the encoder runs out of budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameSkipMode {
    #[default]
    Disabled,
    /// Skip frames to stay within the limits of the level.
    LevelLimit,
    /// Skip frames to stay within the VBV buffer size.
    BufLimit,
}

impl From<FrameSkipMode> for i32 {
    fn from(mode: FrameSkipMode) -> Self {
        match mode {
            FrameSkipMode::Disabled => bindings::V4L2_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE_DISABLED,
            FrameSkipMode::LevelLimit => {
                bindings::V4L2_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE_LEVEL_LIMIT
            }
            FrameSkipMode::BufLimit => bindings::V4L2_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE_BUF_LIMIT,
        }
    }
}

/// Frame type to force on the next encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ForceFrameType {
    Disabled = 0,
    IFrame = 1,
    NotCoded = 2,
}

/// How frames are divided into slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceMode {
    #[default]
    Single,
    /// Slices of a fixed number of macroblocks.
    MaxMacroblocks,
    /// Slices of a fixed number of bytes.
    MaxBytes,
}

impl SliceMode {
    fn control_value(self) -> i32 {
        match self {
            SliceMode::Single => 0,
            SliceMode::MaxMacroblocks => 1,
            SliceMode::MaxBytes => 3,
        }
    }
}

/// Parameters shared by all codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncCommonParam {
    pub idr_period: i32,
    pub slice_mode: SliceMode,
    pub random_intra_mb_refresh: i32,
    pub pad_control_on: bool,
    pub luma_pad_val: i32,
    pub cb_pad_val: i32,
    pub cr_pad_val: i32,
    pub enable_frame_rate_control: bool,
    pub enable_mb_rate_control: bool,
    /// Target bitrate in bits per second.
    pub bitrate: i32,
    pub frame_qp: i32,
    pub frame_qp_p: i32,
    pub qs_code_max: i32,
    pub qs_code_min: i32,
    /// Reaction coefficient of the constant bitrate control.
    pub cbr_period_rf: i32,
    pub frame_skip: FrameSkipMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct H264Param {
    pub profile_idc: i32,
    pub level_idc: i32,
    pub frame_qp_b: i32,
    pub frame_rate: i32,
    /// Macroblocks or bytes per slice, depending on the slice mode.
    pub slice_argument: i32,
    pub number_b_frames: i32,
    pub number_ref_for_p_frames: i32,
    pub loop_filter_disable: i32,
    pub loop_filter_alpha_c0_offset: i32,
    pub loop_filter_beta_offset: i32,
    /// Entropy coding: 0 for CAVLC, 1 for CABAC.
    pub symbol_mode: i32,
    pub picture_interlace: bool,
    pub transform_8x8_mode: bool,
    pub dark_disable: bool,
    pub smooth_disable: bool,
    pub static_disable: bool,
    pub activity_disable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mpeg4Param {
    pub profile_idc: i32,
    pub level_idc: i32,
    pub frame_qp_b: i32,
    pub time_increment_res: i32,
    pub vop_time_increment: i32,
    pub slice_argument: i32,
    pub number_b_frames: i32,
    pub disable_qpel_me: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct H263Param {
    pub frame_rate: i32,
}

/// Codec-specific encoding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecParam {
    H264(H264Param),
    Mpeg4(Mpeg4Param),
    H263(H263Param),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncParam {
    pub common: EncCommonParam,
    pub codec: CodecParam,
}

impl EncParam {
    /// Controls configuring the encoder for these parameters, in the order they must be set.
    pub fn controls(&self) -> Vec<ExtControl> {
        let common = &self.common;
        let mut ctrls = vec![
            ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_GOP_SIZE, common.idr_period),
            ExtControl::new(
                bindings::V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MODE,
                common.slice_mode.control_value(),
            ),
            ExtControl::new(
                bindings::V4L2_CID_MPEG_VIDEO_CYCLIC_INTRA_REFRESH_MB,
                common.random_intra_mb_refresh,
            ),
            ExtControl::new(
                bindings::V4L2_CID_MPEG_MFC51_VIDEO_PADDING,
                common.pad_control_on as i32,
            ),
            ExtControl::new(
                bindings::V4L2_CID_MPEG_MFC51_VIDEO_PADDING_YUV,
                common.cr_pad_val | (common.cb_pad_val << 8) | (common.luma_pad_val << 16),
            ),
            ExtControl::new(
                bindings::V4L2_CID_MPEG_VIDEO_FRAME_RC_ENABLE,
                common.enable_frame_rate_control as i32,
            ),
            ExtControl::new(
                bindings::V4L2_CID_MPEG_VIDEO_MB_RC_ENABLE,
                common.enable_mb_rate_control as i32,
            ),
            // The firmware rejects a null bitrate.
            ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_BITRATE, common.bitrate.max(1)),
        ];

        match &self.codec {
            CodecParam::H264(h264) => {
                push_qp(
                    &mut ctrls,
                    common,
                    [
                        bindings::V4L2_CID_MPEG_VIDEO_H264_I_FRAME_QP,
                        bindings::V4L2_CID_MPEG_VIDEO_H264_P_FRAME_QP,
                        bindings::V4L2_CID_MPEG_VIDEO_H264_MAX_QP,
                        bindings::V4L2_CID_MPEG_VIDEO_H264_MIN_QP,
                    ],
                );
                push_slice_args(&mut ctrls, common.slice_mode, h264.slice_argument);
                ctrls.extend([
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_PROFILE, h264.profile_idc),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_LEVEL, h264.level_idc),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_H264_NUM_REF_PIC_FOR_P,
                        h264.number_ref_for_p_frames,
                    ),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_B_FRAMES, h264.number_b_frames),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_MODE,
                        h264.loop_filter_disable,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_ALPHA,
                        h264.loop_filter_alpha_c0_offset,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_BETA,
                        h264.loop_filter_beta_offset,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_H264_ENTROPY_MODE,
                        h264.symbol_mode,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_H264_INTERLACE,
                        h264.picture_interlace as i32,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_H264_8X8_TRANSFORM,
                        h264.transform_8x8_mode as i32,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_H264_RC_FRAME_RATE,
                        h264.frame_rate,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_H264_B_FRAME_QP,
                        h264.frame_qp_b,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_H264_ADAPTIVE_RC_DARK,
                        h264.dark_disable as i32,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_H264_ADAPTIVE_RC_SMOOTH,
                        h264.smooth_disable as i32,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_H264_ADAPTIVE_RC_STATIC,
                        h264.static_disable as i32,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_H264_ADAPTIVE_RC_ACTIVITY,
                        h264.activity_disable as i32,
                    ),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_GOP_CLOSURE, 1),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_I_PERIOD, 0),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_VBV_SIZE, 0),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_HEADER_MODE,
                        bindings::V4L2_MPEG_VIDEO_HEADER_MODE_SEPARATE,
                    ),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_VUI_SAR_ENABLE, 0),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE,
                        common.frame_skip.into(),
                    ),
                    // Not supported by the firmware.
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_HIERARCHICAL_CODING, 0),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_SEI_FRAME_PACKING, 0),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_FMO, 0),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_ASO, 0),
                ]);
            }
            CodecParam::Mpeg4(mpeg4) => {
                push_qp(
                    &mut ctrls,
                    common,
                    [
                        bindings::V4L2_CID_MPEG_VIDEO_MPEG4_I_FRAME_QP,
                        bindings::V4L2_CID_MPEG_VIDEO_MPEG4_P_FRAME_QP,
                        bindings::V4L2_CID_MPEG_VIDEO_MPEG4_MAX_QP,
                        bindings::V4L2_CID_MPEG_VIDEO_MPEG4_MIN_QP,
                    ],
                );
                push_slice_args(&mut ctrls, common.slice_mode, mpeg4.slice_argument);
                ctrls.extend([
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_MPEG4_PROFILE,
                        mpeg4.profile_idc,
                    ),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_MPEG4_LEVEL, mpeg4.level_idc),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_MPEG4_QPEL,
                        mpeg4.disable_qpel_me as i32,
                    ),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_B_FRAMES, mpeg4.number_b_frames),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_MPEG4_VOP_TIME_RES,
                        mpeg4.time_increment_res,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_MPEG4_VOP_FRM_DELTA,
                        mpeg4.vop_time_increment,
                    ),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_MPEG4_B_FRAME_QP,
                        mpeg4.frame_qp_b,
                    ),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_VBV_SIZE, 0),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_HEADER_MODE,
                        bindings::V4L2_MPEG_VIDEO_HEADER_MODE_SEPARATE,
                    ),
                    ExtControl::new(bindings::V4L2_CID_MPEG_MFC51_VIDEO_RC_FIXED_TARGET_BIT, 1),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE,
                        common.frame_skip.into(),
                    ),
                ]);
            }
            CodecParam::H263(h263) => {
                push_qp(
                    &mut ctrls,
                    common,
                    [
                        bindings::V4L2_CID_MPEG_VIDEO_H263_I_FRAME_QP,
                        bindings::V4L2_CID_MPEG_VIDEO_H263_P_FRAME_QP,
                        bindings::V4L2_CID_MPEG_VIDEO_H263_MAX_QP,
                        bindings::V4L2_CID_MPEG_VIDEO_H263_MIN_QP,
                    ],
                );
                ctrls.extend([
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_H263_RC_FRAME_RATE,
                        h263.frame_rate,
                    ),
                    ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_VBV_SIZE, 0),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_VIDEO_HEADER_MODE,
                        bindings::V4L2_MPEG_VIDEO_HEADER_MODE_SEPARATE,
                    ),
                    ExtControl::new(bindings::V4L2_CID_MPEG_MFC51_VIDEO_RC_FIXED_TARGET_BIT, 1),
                    ExtControl::new(
                        bindings::V4L2_CID_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE,
                        common.frame_skip.into(),
                    ),
                ]);
            }
        }

        ctrls
    }
}

/// QP controls, whose ids depend on the codec: I frame, P frame, max and min.
fn push_qp(ctrls: &mut Vec<ExtControl>, common: &EncCommonParam, ids: [u32; 4]) {
    let values = [
        common.frame_qp,
        common.frame_qp_p,
        common.qs_code_max,
        common.qs_code_min,
    ];
    ctrls.extend(ids.iter().zip(values).map(|(&id, v)| ExtControl::new(id, v)));
    ctrls.push(ExtControl::new(
        bindings::V4L2_CID_MPEG_MFC51_VIDEO_RC_REACTION_COEFF,
        common.cbr_period_rf,
    ));
}

const DEFAULT_SLICE_MAX_MB: i32 = 1;
const DEFAULT_SLICE_MAX_BYTES: i32 = 2800;

fn push_slice_args(ctrls: &mut Vec<ExtControl>, mode: SliceMode, argument: i32) {
    let (max_mb, max_bytes) = match mode {
        SliceMode::Single => (DEFAULT_SLICE_MAX_MB, DEFAULT_SLICE_MAX_BYTES),
        SliceMode::MaxMacroblocks => (argument, DEFAULT_SLICE_MAX_BYTES),
        SliceMode::MaxBytes => (DEFAULT_SLICE_MAX_MB, argument),
    };
    ctrls.push(ExtControl::new(
        bindings::V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_MB,
        max_mb,
    ));
    ctrls.push(ExtControl::new(
        bindings::V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_BYTES,
        max_bytes,
    ));
}

/// An encoding context.
pub struct Encoder<Dev: MfcDevice = V4l2Device> {
    device: Arc<Dev>,
    input: BufferPool<Input, Dev>,
    output: BufferPool<Output, Dev>,
}

impl Encoder<V4l2Device> {
    /// Open the encoder node described by `config`.
    pub fn open(config: &EncoderConfig) -> VideoResult<Self> {
        let device = V4l2Device::open(&config.device)?;
        Ok(Self::new(Arc::new(device), config))
    }
}

impl<Dev: MfcDevice> Encoder<Dev> {
    pub fn new(device: Arc<Dev>, config: &EncoderConfig) -> Self {
        let timeout = config.device.poll_timeout_ms;
        let input = BufferPool::new(
            Arc::clone(&device),
            PoolConfig::new(INPUT_PLANES, config.memory)
                .default_count(DEFAULT_INPUT_COUNT)
                .poll_timeout(timeout, None),
        );
        let output = BufferPool::new(
            Arc::clone(&device),
            PoolConfig::new(OUTPUT_PLANES, config.memory)
                .poll_timeout(timeout, Some(MAX_OUTPUT_POLL_TIMEOUTS)),
        );

        Encoder {
            device,
            input,
            output,
        }
    }

    pub fn device(&self) -> &Arc<Dev> {
        &self.device
    }

    /// Pool receiving the raw frames.
    pub fn input(&self) -> &BufferPool<Input, Dev> {
        &self.input
    }

    /// Pool returning the bitstream.
    pub fn output(&self) -> &BufferPool<Output, Dev> {
        &self.output
    }

    fn set_control(&self, id: u32, value: i32) -> VideoResult<()> {
        self.device.s_ctrl(id, value).map_err(|e| {
            error!("Failed to set control {:#x} to {}: {}", id, value, e);
            e
        })?;
        Ok(())
    }

    /// Configure the encoder in one go.
    pub fn set_enc_param(&self, param: &EncParam) -> VideoResult<()> {
        let mut ctrls = param.controls();
        debug!("Setting {} encoding controls", ctrls.len());
        self.device
            .s_ext_ctrls(bindings::V4L2_CTRL_CLASS_MPEG, &mut ctrls)
            .map_err(|e| {
                error!("Failed to set encoding parameters: {}", e);
                e
            })?;
        Ok(())
    }

    pub fn set_frame_tag(&self, tag: i32) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_MFC51_VIDEO_FRAME_TAG, tag)
    }

    /// Tag of the last encoded frame, or -1 if it cannot be read.
    pub fn get_frame_tag(&self) -> i32 {
        self.device
            .g_ctrl(bindings::V4L2_CID_MPEG_MFC51_VIDEO_FRAME_TAG)
            .unwrap_or_else(|e| {
                warn!("Cannot read frame tag: {}", e);
                -1
            })
    }

    pub fn set_frame_type(&self, frame_type: ForceFrameType) -> VideoResult<()> {
        self.set_control(
            bindings::V4L2_CID_MPEG_MFC51_VIDEO_FORCE_FRAME_TYPE,
            frame_type as i32,
        )
    }

    /// Change the frame rate while encoding.
    pub fn set_frame_rate(&self, frame_rate: i32) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_MFC51_VIDEO_FRAME_RATE_CH, frame_rate)
    }

    /// Change the bitrate while encoding.
    pub fn set_bit_rate(&self, bit_rate: i32) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_MFC51_VIDEO_BIT_RATE_CH, bit_rate)
    }

    pub fn set_frame_skip(&self, mode: FrameSkipMode) -> VideoResult<()> {
        self.set_control(
            bindings::V4L2_CID_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE,
            mode.into(),
        )
    }

    pub fn set_idr_period(&self, period: i32) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_VIDEO_H264_I_PERIOD, period)
    }

    pub fn enable_prepend_sps_pps_to_idr(&self) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_VIDEO_H264_PREPEND_SPSPPS_TO_IDR, 1)
    }

    /// Set the size and color format of the raw frames.
    pub fn set_input_geometry(&self, geometry: &Geometry) -> VideoResult<()> {
        let format = geometry.frame_format(INPUT_PLANES);
        self.device.s_fmt(Input::QUEUE, &format)?;
        self.input.set_geometry(*geometry);
        Ok(())
    }

    /// Size of the raw frames and of their first plane.
    pub fn get_input_geometry(&self) -> VideoResult<Geometry> {
        let format = self.device.g_fmt(Input::QUEUE)?;
        Ok(Geometry {
            width: format.width,
            height: format.height,
            stream_size: first_plane_size(&format),
            ..self.input.geometry()
        })
    }

    /// Set the coding and buffer size of the bitstream.
    pub fn set_output_geometry(&self, geometry: &Geometry) -> VideoResult<()> {
        let format = Format {
            pixelformat: geometry.coding.pixel_format(),
            plane_fmt: vec![PlaneLayout {
                sizeimage: geometry.stream_size,
                bytesperline: 0,
            }],
            ..Default::default()
        };
        self.device.s_fmt(Output::QUEUE, &format)?;
        self.output.set_geometry(*geometry);
        Ok(())
    }

    /// Buffer size of the bitstream.
    pub fn get_output_geometry(&self) -> VideoResult<Geometry> {
        let format = self.device.g_fmt(Output::QUEUE)?;
        Ok(Geometry {
            stream_size: first_plane_size(&format),
            ..self.output.geometry()
        })
    }
}

fn first_plane_size(format: &Format) -> u32 {
    format.plane_fmt.first().map_or(0, |p| p.sizeimage)
}

impl<Dev: MfcDevice> CodecOps for Encoder<Dev> {
    fn ops_info(&self) -> OpsInfo {
        OpsInfo::new(ENCODER_CAPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{Call, MockDevice};
    use crate::error::VideoError;
    use crate::format::{CodingType, ColorFormat};
    use crate::ioctl::BufferFlags;
    use crate::memory::PlaneSource;
    use crate::QueueType;
    use nix::errno::Errno;
    use nix::poll::PollFlags;

    fn encoder() -> (Arc<MockDevice>, Encoder<MockDevice>) {
        let device = Arc::new(MockDevice::new());
        let encoder = Encoder::new(Arc::clone(&device), &EncoderConfig::default());
        (device, encoder)
    }

    fn value_of(ctrls: &[ExtControl], id: u32) -> Option<i32> {
        ctrls.iter().find(|c| c.id == id).map(|c| c.value)
    }

    fn h264_param() -> EncParam {
        EncParam {
            common: EncCommonParam {
                idr_period: 30,
                slice_mode: SliceMode::MaxBytes,
                luma_pad_val: 0x10,
                cb_pad_val: 0x80,
                cr_pad_val: 0x7f,
                frame_qp: 20,
                frame_qp_p: 22,
                qs_code_max: 51,
                qs_code_min: 10,
                frame_skip: FrameSkipMode::BufLimit,
                ..Default::default()
            },
            codec: CodecParam::H264(H264Param {
                profile_idc: 2,
                slice_argument: 1500,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn default_config() {
        let config = EncoderConfig::default();
        assert_eq!(config.device.path, PathBuf::from("/dev/video7"));
        assert_eq!(config.device.poll_timeout_ms, 1000);
    }

    #[test]
    fn h264_controls() {
        let ctrls = h264_param().controls();
        assert_eq!(value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_GOP_SIZE), Some(30));
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MODE),
            Some(3)
        );
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_MFC51_VIDEO_PADDING_YUV),
            Some(0x7f | 0x80 << 8 | 0x10 << 16)
        );
        // A null bitrate is sent as 1.
        assert_eq!(value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_BITRATE), Some(1));
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_H264_I_FRAME_QP),
            Some(20)
        );
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_H264_MAX_QP),
            Some(51)
        );
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_MB),
            Some(1)
        );
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_BYTES),
            Some(1500)
        );
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE),
            Some(bindings::V4L2_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE_BUF_LIMIT)
        );
        assert_eq!(value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_H264_FMO), Some(0));
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_MPEG4_I_FRAME_QP),
            None
        );
        // Common controls come first.
        assert_eq!(ctrls[0].id, bindings::V4L2_CID_MPEG_VIDEO_GOP_SIZE);
    }

    #[test]
    fn slice_arguments() {
        let mut ctrls = Vec::new();
        push_slice_args(&mut ctrls, SliceMode::Single, 99);
        assert_eq!(
            ctrls.iter().map(|c| c.value).collect::<Vec<_>>(),
            vec![1, 2800]
        );

        ctrls.clear();
        push_slice_args(&mut ctrls, SliceMode::MaxMacroblocks, 99);
        assert_eq!(
            ctrls.iter().map(|c| c.value).collect::<Vec<_>>(),
            vec![99, 2800]
        );
    }

    #[test]
    fn mpeg4_and_h263_controls() {
        let mut param = h264_param();
        param.common.bitrate = 4_000_000;
        param.codec = CodecParam::Mpeg4(Mpeg4Param {
            time_increment_res: 30,
            vop_time_increment: 1,
            ..Default::default()
        });
        let ctrls = param.controls();
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_BITRATE),
            Some(4_000_000)
        );
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_MFC51_VIDEO_MPEG4_VOP_TIME_RES),
            Some(30)
        );
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_MPEG4_MIN_QP),
            Some(10)
        );

        param.codec = CodecParam::H263(H263Param { frame_rate: 15 });
        let ctrls = param.controls();
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_MFC51_VIDEO_H263_RC_FRAME_RATE),
            Some(15)
        );
        assert_eq!(
            value_of(&ctrls, bindings::V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_MB),
            None
        );
    }

    #[test]
    fn enc_param_is_set_at_once() {
        let (device, encoder) = encoder();
        encoder.set_enc_param(&h264_param()).unwrap();
        let ext_calls: Vec<_> = device
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SExtCtrls(class, ctrls) => Some((class, ctrls)),
                _ => None,
            })
            .collect();
        assert_eq!(ext_calls.len(), 1);
        assert_eq!(ext_calls[0].0, bindings::V4L2_CTRL_CLASS_MPEG);
        assert_eq!(ext_calls[0].1, h264_param().controls());
    }

    #[test]
    fn per_frame_controls() {
        let (device, encoder) = encoder();
        encoder.set_frame_type(ForceFrameType::IFrame).unwrap();
        encoder.set_frame_rate(25).unwrap();
        encoder.set_bit_rate(2_000_000).unwrap();
        encoder.set_frame_skip(FrameSkipMode::LevelLimit).unwrap();
        encoder.set_idr_period(60).unwrap();
        encoder.enable_prepend_sps_pps_to_idr().unwrap();

        assert_eq!(
            device.control(bindings::V4L2_CID_MPEG_MFC51_VIDEO_FORCE_FRAME_TYPE),
            Some(1)
        );
        assert_eq!(
            device.control(bindings::V4L2_CID_MPEG_MFC51_VIDEO_BIT_RATE_CH),
            Some(2_000_000)
        );
        assert_eq!(
            device.control(bindings::V4L2_CID_MPEG_VIDEO_H264_I_PERIOD),
            Some(60)
        );
        assert_eq!(encoder.get_frame_tag(), -1);
    }

    #[test]
    fn geometry() {
        let (device, encoder) = encoder();
        encoder
            .set_input_geometry(&Geometry {
                width: 1280,
                height: 720,
                color: ColorFormat::Nv21,
                ..Default::default()
            })
            .unwrap();
        let geometry = encoder.get_input_geometry().unwrap();
        assert_eq!((geometry.width, geometry.height), (1280, 720));
        assert_eq!(geometry.color, ColorFormat::Nv21);
        let format = device.calls().into_iter().find_map(|c| match c {
            Call::SFmt(QueueType::VideoOutputMplane, f) => Some(f),
            _ => None,
        });
        assert_eq!(format.unwrap().plane_fmt.len(), 2);

        encoder
            .set_output_geometry(&Geometry {
                coding: CodingType::H263,
                stream_size: 512 * 1024,
                ..Default::default()
            })
            .unwrap();
        let geometry = encoder.get_output_geometry().unwrap();
        assert_eq!(geometry.stream_size, 512 * 1024);
        assert_eq!(geometry.coding, CodingType::H263);
    }

    #[test]
    fn output_setup_requires_count() {
        let (_device, encoder) = encoder();
        assert!(matches!(
            encoder.output().setup(0),
            Err(VideoError::BadParam(_))
        ));
        encoder.input().setup(0).unwrap();
        assert_eq!(encoder.input().num_buffers(), 32);
    }

    #[test]
    fn output_dequeue_reports_bitstream_size() {
        let (device, encoder) = encoder();
        let output = encoder.output();
        output.setup(2).unwrap();
        output.run().unwrap();
        output.enqueue_all().unwrap();

        device.complete(QueueType::VideoCaptureMplane, 1, 1234, BufferFlags::KEYFRAME);
        let dequeued = output.dequeue().unwrap();
        assert_eq!(dequeued.index(), 1);
        assert_eq!(dequeued.buffer.planes[0].used_size, 1234);
    }

    #[test]
    fn output_wait_gives_up() {
        let (device, encoder) = encoder();
        for _ in 0..MAX_OUTPUT_POLL_TIMEOUTS {
            device.push_poll(Ok(PollFlags::empty()));
        }
        assert!(!encoder.output().wait().unwrap());
        assert_eq!(device.poll_count(), MAX_OUTPUT_POLL_TIMEOUTS as usize);

        device.push_poll(Err(Errno::EBADF));
        assert!(matches!(
            encoder.input().wait(),
            Err(VideoError::Poll(Errno::EBADF))
        ));
    }

    #[test]
    fn extension_input_reuses_any_free_slot() {
        let (device, encoder) = encoder();
        let input = encoder.input();
        input.set_shareable(true).unwrap();
        input.setup(2).unwrap();
        input.run().unwrap();

        let frame = |addr: usize| {
            [
                PlaneSource {
                    addr: Some(addr),
                    data_size: 1280 * 720,
                    alloc_size: 1280 * 720,
                    ..Default::default()
                },
                PlaneSource {
                    addr: Some(addr + 0x100000),
                    data_size: 1280 * 360,
                    alloc_size: 1280 * 360,
                    ..Default::default()
                },
            ]
        };
        assert_eq!(input.enqueue_extension(&frame(0x10000000), None).unwrap(), 0);
        assert_eq!(input.enqueue_extension(&frame(0x20000000), None).unwrap(), 1);
        assert!(matches!(
            input.enqueue_extension(&frame(0x30000000), None),
            Err(VideoError::NoBuffers)
        ));

        let dequeued = input.dequeue_extension().unwrap();
        assert_eq!(dequeued.index(), 0);
        assert_eq!(dequeued.release, None);
        assert_eq!(dequeued.buffer.planes[0].addr, Some(0x10000000));
        // Without reference tracking, the slot is free as soon as it is dequeued.
        assert_eq!(input.enqueue_extension(&frame(0x30000000), None).unwrap(), 0);
        assert_eq!(
            device.queued_indices(QueueType::VideoOutputMplane),
            vec![1, 0]
        );
    }
}
