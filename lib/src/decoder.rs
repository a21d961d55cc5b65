//! Decoding context.
//!
//! A [`Decoder`] owns an opened MFC decoder node and its two buffer pools: the input pool
//! receives compressed bitstream, the output pool returns decoded frames. The output pool can
//! run in dynamic DPB mode, in which decoded picture buffers are provided by the client with
//! extension enqueues and the driver reports through a shared [`ReleaseTable`] when it stops
//! referencing them.
use std::os::unix::io::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, warn};

use crate::bindings;
use crate::device::{DeviceConfig, MfcDevice, V4l2Device};
use crate::dpb::{ReleaseTable, VIDEO_BUFFER_MAX_NUM};
use crate::error::{VideoError, VideoResult};
use crate::format::Geometry;
use crate::ioctl::{DqBuffer, ExtControl};
use crate::memory::MemoryType;
use crate::ops::{CodecOps, OpsCaps, OpsInfo};
use crate::pool::buffer::{Buffer, DecodeStatus, FrameType};
use crate::pool::direction::{Direction, Input, Output};
use crate::pool::{BufferPool, PoolConfig};

pub const DEFAULT_DECODER_DEVICE: &str = "/dev/video6";
/// Environment variable overriding the decoder node.
pub const DECODER_DEVICE_ENV: &str = "EXYNOS_MFC_DEC_DEVICE";
/// Optional operations decoders support.
pub const DECODER_CAPS: OpsCaps = OpsCaps::DYNAMIC_DPB
    .union(OpsCaps::FRAME_PACKING)
    .union(OpsCaps::EXTENSION_OUTPUT);
const DEFAULT_POLL_TIMEOUT_MS: i32 = 25;

const INPUT_PLANES: usize = 1;
const OUTPUT_PLANES: usize = 2;

/// Options of a decoding context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub device: DeviceConfig,
    /// Kind of memory clients provide to shared pools.
    pub memory: MemoryType,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            device: DeviceConfig::new(DEFAULT_DECODER_DEVICE)
                .poll_timeout_ms(DEFAULT_POLL_TIMEOUT_MS),
            memory: MemoryType::DmaBuf,
        }
    }
}

impl DecoderConfig {
    /// Default configuration, with the node taken from [`DECODER_DEVICE_ENV`] if it is set.
    pub fn from_env() -> Self {
        let config = Self::default();
        DecoderConfig {
            device: config.device.path_from_env(DECODER_DEVICE_ENV),
            ..config
        }
    }

    pub fn path<P: Into<PathBuf>>(self, path: P) -> Self {
        DecoderConfig {
            device: DeviceConfig {
                path: path.into(),
                ..self.device
            },
            ..self
        }
    }

    pub fn memory(self, memory: MemoryType) -> Self {
        DecoderConfig { memory, ..self }
    }

    pub fn poll_timeout_ms(self, timeout_ms: i32) -> Self {
        DecoderConfig {
            device: self.device.poll_timeout_ms(timeout_ms),
            ..self
        }
    }

    pub fn non_blocking_dqbuf(self) -> Self {
        DecoderConfig {
            device: self.device.non_blocking_dqbuf(),
            ..self
        }
    }
}

/// Stereo frame packing arrangement reported by the stream's SEI messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramePacking {
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

impl FramePacking {
    /// Decode the values of the four SEI frame packing controls.
    pub fn from_controls(available: i32, arrangement_id: i32, info: i32, grid_pos: i32) -> Self {
        let bit = |n: u32| info & (1 << n) != 0;
        let nibble = |n: u32| ((grid_pos >> n) & 0xf) as u8;

        FramePacking {
            available: available != 0,
            arrangement_id: arrangement_id as u32,
            arrangement_cancel: bit(0),
            arrangement_type: ((info >> 1) & 0x3f) as u8,
            quincunx_sampling: bit(8),
            content_interpretation_type: ((info >> 9) & 0x3f) as u8,
            spatial_flipping: bit(15),
            frame0_flipped: bit(16),
            field_views: bit(17),
            current_frame_is_frame0: bit(18),
            frame0_grid_pos_x: nibble(0),
            frame0_grid_pos_y: nibble(4),
            frame1_grid_pos_x: nibble(8),
            frame1_grid_pos_y: nibble(12),
        }
    }
}

/// Interpret the display status reported for a dequeued frame. `check_state` is only queried
/// when the status is ambiguous.
fn display_status<F: FnOnce() -> Option<i32>>(status: i32, check_state: F) -> DecodeStatus {
    match status {
        0 => DecodeStatus::DecodingOnly,
        1 => DecodeStatus::DisplayDecoding,
        2 => DecodeStatus::DisplayOnly,
        3 => match check_state() {
            Some(bindings::MFCSTATE_DEC_RES_DETECT) => DecodeStatus::ResolutionChanged,
            _ => DecodeStatus::DecodingFinished,
        },
        _ => DecodeStatus::Unknown,
    }
}

fn check_state<Dev: MfcDevice + ?Sized>(device: &Dev) -> Option<i32> {
    device
        .g_ctrl(bindings::V4L2_CID_MPEG_MFC51_VIDEO_CHECK_STATE)
        .map_err(|e| warn!("Cannot read decoder state: {}", e))
        .ok()
}

fn on_output_dequeue<Dev: MfcDevice>(device: &Dev, buffer: &mut Buffer, dqbuf: &DqBuffer) {
    let status = match device.g_ctrl(bindings::V4L2_CID_MPEG_MFC51_VIDEO_DISPLAY_STATUS) {
        Ok(status) => display_status(status, || check_state(device)),
        Err(e) => {
            warn!("Cannot read display status of buffer {}: {}", dqbuf.index, e);
            DecodeStatus::Unknown
        }
    };
    buffer.set_status(status);
    buffer.set_frame_type(FrameType::from(dqbuf.flags));
}

fn on_output_qbuf_error<Dev: MfcDevice>(device: &Dev, err: VideoError) -> VideoError {
    match check_state(device) {
        Some(bindings::MFCSTATE_DEC_RES_DETECT) => {
            debug!("Resolution change detected, frame buffers must be reallocated");
            VideoError::WrongBufferSize
        }
        _ => err,
    }
}

/// A decoding context.
pub struct Decoder<Dev: MfcDevice = V4l2Device> {
    device: Arc<Dev>,
    input: BufferPool<Input, Dev>,
    output: BufferPool<Output, Dev>,
}

impl Decoder<V4l2Device> {
    /// Open the decoder node described by `config`.
    pub fn open(config: &DecoderConfig) -> VideoResult<Self> {
        let device = V4l2Device::open(&config.device)?;
        Self::new(Arc::new(device), config)
    }
}

impl<Dev: MfcDevice> Decoder<Dev> {
    /// Create a context over `device`, with a newly allocated release table.
    pub fn new(device: Arc<Dev>, config: &DecoderConfig) -> VideoResult<Self> {
        let table = ReleaseTable::new()?;
        Ok(Self::with_release_table(device, config, table))
    }

    /// Create a context over `device`, sharing release descriptors through the memory of `fd`.
    pub fn with_release_fd(
        device: Arc<Dev>,
        config: &DecoderConfig,
        fd: OwnedFd,
    ) -> VideoResult<Self> {
        let table = ReleaseTable::from_fd(fd).map_err(|e| {
            error!("Cannot map DPB release table: {}", e);
            VideoError::Init(format!("cannot map DPB release table: {}", e))
        })?;
        Ok(Self::with_release_table(device, config, table))
    }

    fn with_release_table(device: Arc<Dev>, config: &DecoderConfig, table: ReleaseTable) -> Self {
        let timeout = config.device.poll_timeout_ms;
        let input = BufferPool::new(
            Arc::clone(&device),
            PoolConfig::new(INPUT_PLANES, config.memory).poll_timeout(timeout, None),
        );
        let output = BufferPool::new(
            Arc::clone(&device),
            PoolConfig::new(OUTPUT_PLANES, config.memory)
                .default_count(VIDEO_BUFFER_MAX_NUM as u32)
                .track_references()
                .poll_timeout(timeout, None)
                .on_dequeue(on_output_dequeue::<Dev>)
                .on_extension_qbuf_error(on_output_qbuf_error::<Dev>),
        );
        output.attach_release_table(table);

        Decoder {
            device,
            input,
            output,
        }
    }

    pub fn device(&self) -> &Arc<Dev> {
        &self.device
    }

    /// Pool receiving the bitstream.
    pub fn input(&self) -> &BufferPool<Input, Dev> {
        &self.input
    }

    /// Pool returning the decoded frames.
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

    /// Tag the next frames submitted to the input pool.
    pub fn set_frame_tag(&self, tag: i32) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_MFC51_VIDEO_FRAME_TAG, tag)
    }

    /// Tag of the last decoded frame, or -1 if it cannot be read.
    pub fn get_frame_tag(&self) -> i32 {
        self.device
            .g_ctrl(bindings::V4L2_CID_MPEG_MFC51_VIDEO_FRAME_TAG)
            .unwrap_or_else(|e| {
                warn!("Cannot read frame tag: {}", e);
                -1
            })
    }

    /// Minimum number of output buffers the stream requires.
    pub fn get_actual_buffer_count(&self) -> VideoResult<u32> {
        let count = self.device.g_ctrl(bindings::V4L2_CID_MIN_BUFFERS_FOR_CAPTURE)?;
        Ok(count.max(0) as u32)
    }

    pub fn set_display_delay(&self, delay: i32) -> VideoResult<()> {
        self.set_control(
            bindings::V4L2_CID_MPEG_MFC51_VIDEO_DECODER_H264_DISPLAY_DELAY,
            delay,
        )
    }

    /// Return frames as soon as they are decoded, instead of in display order.
    pub fn set_immediate_display(&self) -> VideoResult<()> {
        self.set_display_delay(0)
    }

    /// Only decode I frames.
    pub fn set_i_frame_decoding(&self) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_MFC51_VIDEO_I_FRAME_DECODING, 1)
    }

    pub fn enable_packed_pb(&self) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_MFC51_VIDEO_PACKED_PB, 1)
    }

    /// Enable the MPEG4 deblocking filter.
    pub fn enable_loop_filter(&self) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_VIDEO_DECODER_MPEG4_DEBLOCK_FILTER, 1)
    }

    pub fn enable_slice_mode(&self) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_VIDEO_DECODER_SLICE_INTERFACE, 1)
    }

    /// Parse the frame packing SEI messages of H.264 streams.
    pub fn enable_sei_parsing(&self) -> VideoResult<()> {
        self.set_control(bindings::V4L2_CID_MPEG_VIDEO_H264_SEI_FRAME_PACKING, 1)
    }

    pub fn get_frame_packing_info(&self) -> VideoResult<FramePacking> {
        let mut ctrls = [
            ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_SEI_FP_AVAIL, 0),
            ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_SEI_FP_ARRGMENT_ID, 0),
            ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_SEI_FP_INFO, 0),
            ExtControl::new(bindings::V4L2_CID_MPEG_VIDEO_H264_SEI_FP_GRID_POS, 0),
        ];
        self.device
            .g_ext_ctrls(bindings::V4L2_CTRL_CLASS_MPEG, &mut ctrls)
            .map_err(|e| {
                error!("Cannot read frame packing information: {}", e);
                e
            })?;

        Ok(FramePacking::from_controls(
            ctrls[0].value,
            ctrls[1].value,
            ctrls[2].value,
            ctrls[3].value,
        ))
    }

    /// Let the client own the decoded picture buffers, and hand the release table to the
    /// driver.
    pub fn enable_dynamic_dpb(&self) -> VideoResult<()> {
        let fd = self
            .output
            .with_release_table(|table| table.as_raw_fd())
            .ok_or(VideoError::BadParam("no release table"))?;

        self.set_control(bindings::V4L2_CID_MPEG_MFC_SET_DYNAMIC_DPB_MODE, 1)?;
        self.set_control(bindings::V4L2_CID_MPEG_MFC_SET_USER_SHARED_HANDLE, fd)?;
        debug!("Dynamic DPB enabled, release table fd {}", fd);

        Ok(())
    }

    /// Set the coding and buffer size of the bitstream.
    pub fn set_input_geometry(&self, geometry: &Geometry) -> VideoResult<()> {
        self.device.s_fmt(Input::QUEUE, &geometry.bitstream_format())?;
        self.input.set_geometry(*geometry);
        Ok(())
    }

    /// Set the color format of the decoded frames.
    pub fn set_output_geometry(&self, geometry: &Geometry) -> VideoResult<()> {
        let format = crate::Format {
            pixelformat: geometry.color.pixel_format(),
            ..Default::default()
        };
        self.device.s_fmt(Output::QUEUE, &format)?;
        self.output.set_geometry(*geometry);
        Ok(())
    }

    /// Size and visible area of the decoded frames, as parsed from the stream by the driver.
    pub fn get_output_geometry(&self) -> VideoResult<Geometry> {
        let format = self.device.g_fmt(Output::QUEUE).map_err(|e| {
            error!("Cannot get frame format: {}", e);
            e
        })?;
        let crop = self.device.g_crop(Output::QUEUE)?;

        let geometry = Geometry {
            width: format.width,
            height: format.height,
            crop,
            num_planes: format.plane_fmt.len() as u32,
            ..self.output.geometry()
        };
        self.output.set_geometry(geometry);

        Ok(geometry)
    }
}

impl<Dev: MfcDevice> CodecOps for Decoder<Dev> {
    fn ops_info(&self) -> OpsInfo {
        OpsInfo::new(DECODER_CAPS)
    }
}
