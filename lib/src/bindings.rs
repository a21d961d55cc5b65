//! Subset of `linux/videodev2.h` and of the MFC vendor control IDs used by this crate.
//!
//! Only the structures exchanged with the MFC driver are described here. Their layout must match
//! the kernel ABI exactly since their size is encoded in the ioctl request numbers.
#![allow(dead_code)]
#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(clippy::all)]

use nix::libc::{c_ulong, c_void, timeval};

pub const VIDEO_MAX_PLANES: u32 = 8;

pub const v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE: u32 = 9;
pub const v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE: u32 = 10;

pub const v4l2_memory_V4L2_MEMORY_MMAP: u32 = 1;
pub const v4l2_memory_V4L2_MEMORY_USERPTR: u32 = 2;
pub const v4l2_memory_V4L2_MEMORY_DMABUF: u32 = 4;

pub const V4L2_CAP_VIDEO_CAPTURE_MPLANE: u32 = 0x00001000;
pub const V4L2_CAP_VIDEO_OUTPUT_MPLANE: u32 = 0x00002000;
pub const V4L2_CAP_VIDEO_M2M_MPLANE: u32 = 0x00004000;
pub const V4L2_CAP_STREAMING: u32 = 0x04000000;
pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x80000000;

pub const V4L2_BUF_FLAG_MAPPED: u32 = 0x00000001;
pub const V4L2_BUF_FLAG_QUEUED: u32 = 0x00000002;
pub const V4L2_BUF_FLAG_DONE: u32 = 0x00000004;
pub const V4L2_BUF_FLAG_KEYFRAME: u32 = 0x00000008;
pub const V4L2_BUF_FLAG_PFRAME: u32 = 0x00000010;
pub const V4L2_BUF_FLAG_BFRAME: u32 = 0x00000020;
pub const V4L2_BUF_FLAG_ERROR: u32 = 0x00000040;
pub const V4L2_BUF_FLAG_LAST: u32 = 0x00100000;

pub const V4L2_CTRL_CLASS_USER: u32 = 0x00980000;
pub const V4L2_CTRL_CLASS_MPEG: u32 = 0x00990000;

pub const V4L2_CID_BASE: u32 = V4L2_CTRL_CLASS_USER | 0x900;
pub const V4L2_CID_MIN_BUFFERS_FOR_CAPTURE: u32 = V4L2_CID_BASE + 39;
pub const V4L2_CID_CACHEABLE: u32 = V4L2_CID_BASE + 48;

pub const V4L2_CID_MPEG_BASE: u32 = V4L2_CTRL_CLASS_MPEG | 0x900;
pub const V4L2_CID_MPEG_VIDEO_B_FRAMES: u32 = V4L2_CID_MPEG_BASE + 202;
pub const V4L2_CID_MPEG_VIDEO_GOP_SIZE: u32 = V4L2_CID_MPEG_BASE + 203;
pub const V4L2_CID_MPEG_VIDEO_GOP_CLOSURE: u32 = V4L2_CID_MPEG_BASE + 204;
pub const V4L2_CID_MPEG_VIDEO_BITRATE: u32 = V4L2_CID_MPEG_BASE + 207;
pub const V4L2_CID_MPEG_VIDEO_DECODER_SLICE_INTERFACE: u32 = V4L2_CID_MPEG_BASE + 212;
pub const V4L2_CID_MPEG_VIDEO_DECODER_MPEG4_DEBLOCK_FILTER: u32 = V4L2_CID_MPEG_BASE + 213;
pub const V4L2_CID_MPEG_VIDEO_CYCLIC_INTRA_REFRESH_MB: u32 = V4L2_CID_MPEG_BASE + 214;
pub const V4L2_CID_MPEG_VIDEO_FRAME_RC_ENABLE: u32 = V4L2_CID_MPEG_BASE + 215;
pub const V4L2_CID_MPEG_VIDEO_HEADER_MODE: u32 = V4L2_CID_MPEG_BASE + 216;
pub const V4L2_CID_MPEG_VIDEO_MB_RC_ENABLE: u32 = V4L2_CID_MPEG_BASE + 218;
pub const V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_BYTES: u32 = V4L2_CID_MPEG_BASE + 219;
pub const V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MAX_MB: u32 = V4L2_CID_MPEG_BASE + 220;
pub const V4L2_CID_MPEG_VIDEO_MULTI_SLICE_MODE: u32 = V4L2_CID_MPEG_BASE + 221;
pub const V4L2_CID_MPEG_VIDEO_VBV_SIZE: u32 = V4L2_CID_MPEG_BASE + 222;
pub const V4L2_CID_MPEG_VIDEO_H263_I_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 300;
pub const V4L2_CID_MPEG_VIDEO_H263_P_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 301;
pub const V4L2_CID_MPEG_VIDEO_H263_MIN_QP: u32 = V4L2_CID_MPEG_BASE + 303;
pub const V4L2_CID_MPEG_VIDEO_H263_MAX_QP: u32 = V4L2_CID_MPEG_BASE + 304;
pub const V4L2_CID_MPEG_VIDEO_H264_I_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 350;
pub const V4L2_CID_MPEG_VIDEO_H264_P_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 351;
pub const V4L2_CID_MPEG_VIDEO_H264_B_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 352;
pub const V4L2_CID_MPEG_VIDEO_H264_MIN_QP: u32 = V4L2_CID_MPEG_BASE + 353;
pub const V4L2_CID_MPEG_VIDEO_H264_MAX_QP: u32 = V4L2_CID_MPEG_BASE + 354;
pub const V4L2_CID_MPEG_VIDEO_H264_8X8_TRANSFORM: u32 = V4L2_CID_MPEG_BASE + 355;
pub const V4L2_CID_MPEG_VIDEO_H264_ENTROPY_MODE: u32 = V4L2_CID_MPEG_BASE + 357;
pub const V4L2_CID_MPEG_VIDEO_H264_I_PERIOD: u32 = V4L2_CID_MPEG_BASE + 358;
pub const V4L2_CID_MPEG_VIDEO_H264_LEVEL: u32 = V4L2_CID_MPEG_BASE + 359;
pub const V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_ALPHA: u32 = V4L2_CID_MPEG_BASE + 360;
pub const V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_BETA: u32 = V4L2_CID_MPEG_BASE + 361;
pub const V4L2_CID_MPEG_VIDEO_H264_LOOP_FILTER_MODE: u32 = V4L2_CID_MPEG_BASE + 362;
pub const V4L2_CID_MPEG_VIDEO_H264_PROFILE: u32 = V4L2_CID_MPEG_BASE + 363;
pub const V4L2_CID_MPEG_VIDEO_H264_VUI_SAR_ENABLE: u32 = V4L2_CID_MPEG_BASE + 366;
pub const V4L2_CID_MPEG_VIDEO_H264_SEI_FRAME_PACKING: u32 = V4L2_CID_MPEG_BASE + 368;
pub const V4L2_CID_MPEG_VIDEO_H264_FMO: u32 = V4L2_CID_MPEG_BASE + 371;
pub const V4L2_CID_MPEG_VIDEO_H264_ASO: u32 = V4L2_CID_MPEG_BASE + 377;
pub const V4L2_CID_MPEG_VIDEO_H264_HIERARCHICAL_CODING: u32 = V4L2_CID_MPEG_BASE + 379;
pub const V4L2_CID_MPEG_VIDEO_MPEG4_I_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 400;
pub const V4L2_CID_MPEG_VIDEO_MPEG4_P_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 401;
pub const V4L2_CID_MPEG_VIDEO_MPEG4_B_FRAME_QP: u32 = V4L2_CID_MPEG_BASE + 402;
pub const V4L2_CID_MPEG_VIDEO_MPEG4_MIN_QP: u32 = V4L2_CID_MPEG_BASE + 403;
pub const V4L2_CID_MPEG_VIDEO_MPEG4_MAX_QP: u32 = V4L2_CID_MPEG_BASE + 404;
pub const V4L2_CID_MPEG_VIDEO_MPEG4_LEVEL: u32 = V4L2_CID_MPEG_BASE + 405;
pub const V4L2_CID_MPEG_VIDEO_MPEG4_PROFILE: u32 = V4L2_CID_MPEG_BASE + 406;
pub const V4L2_CID_MPEG_VIDEO_MPEG4_QPEL: u32 = V4L2_CID_MPEG_BASE + 407;

pub const V4L2_MPEG_VIDEO_HEADER_MODE_SEPARATE: i32 = 0;

pub const V4L2_CID_MPEG_MFC51_BASE: u32 = V4L2_CTRL_CLASS_MPEG | 0x1100;
pub const V4L2_CID_MPEG_MFC51_VIDEO_DECODER_H264_DISPLAY_DELAY: u32 = V4L2_CID_MPEG_MFC51_BASE;
pub const V4L2_CID_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE: u32 = V4L2_CID_MPEG_MFC51_BASE + 2;
pub const V4L2_CID_MPEG_MFC51_VIDEO_FORCE_FRAME_TYPE: u32 = V4L2_CID_MPEG_MFC51_BASE + 3;
pub const V4L2_CID_MPEG_MFC51_VIDEO_PADDING: u32 = V4L2_CID_MPEG_MFC51_BASE + 4;
pub const V4L2_CID_MPEG_MFC51_VIDEO_PADDING_YUV: u32 = V4L2_CID_MPEG_MFC51_BASE + 5;
pub const V4L2_CID_MPEG_MFC51_VIDEO_RC_FIXED_TARGET_BIT: u32 = V4L2_CID_MPEG_MFC51_BASE + 6;
pub const V4L2_CID_MPEG_MFC51_VIDEO_RC_REACTION_COEFF: u32 = V4L2_CID_MPEG_MFC51_BASE + 7;
pub const V4L2_CID_MPEG_MFC51_VIDEO_H264_ADAPTIVE_RC_ACTIVITY: u32 = V4L2_CID_MPEG_MFC51_BASE + 50;
pub const V4L2_CID_MPEG_MFC51_VIDEO_H264_ADAPTIVE_RC_DARK: u32 = V4L2_CID_MPEG_MFC51_BASE + 51;
pub const V4L2_CID_MPEG_MFC51_VIDEO_H264_ADAPTIVE_RC_SMOOTH: u32 = V4L2_CID_MPEG_MFC51_BASE + 52;
pub const V4L2_CID_MPEG_MFC51_VIDEO_H264_ADAPTIVE_RC_STATIC: u32 = V4L2_CID_MPEG_MFC51_BASE + 53;
pub const V4L2_CID_MPEG_MFC51_VIDEO_H264_NUM_REF_PIC_FOR_P: u32 = V4L2_CID_MPEG_MFC51_BASE + 54;

pub const V4L2_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE_DISABLED: i32 = 0;
pub const V4L2_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE_LEVEL_LIMIT: i32 = 1;
pub const V4L2_MPEG_MFC51_VIDEO_FRAME_SKIP_MODE_BUF_LIMIT: i32 = 2;

// Vendor controls exposed by the Exynos MFC driver only.
pub const V4L2_CID_MPEG_MFC_BASE: u32 = V4L2_CTRL_CLASS_MPEG | 0x2000;
pub const V4L2_CID_MPEG_VIDEO_H264_SEI_FP_AVAIL: u32 = V4L2_CID_MPEG_MFC_BASE + 1;
pub const V4L2_CID_MPEG_VIDEO_H264_SEI_FP_ARRGMENT_ID: u32 = V4L2_CID_MPEG_MFC_BASE + 2;
pub const V4L2_CID_MPEG_VIDEO_H264_SEI_FP_INFO: u32 = V4L2_CID_MPEG_MFC_BASE + 3;
pub const V4L2_CID_MPEG_VIDEO_H264_SEI_FP_GRID_POS: u32 = V4L2_CID_MPEG_MFC_BASE + 4;
pub const V4L2_CID_MPEG_MFC51_VIDEO_PACKED_PB: u32 = V4L2_CID_MPEG_MFC_BASE + 5;
pub const V4L2_CID_MPEG_MFC51_VIDEO_FRAME_TAG: u32 = V4L2_CID_MPEG_MFC_BASE + 6;
pub const V4L2_CID_MPEG_MFC51_VIDEO_CHECK_STATE: u32 = V4L2_CID_MPEG_MFC_BASE + 13;
pub const V4L2_CID_MPEG_MFC51_VIDEO_DISPLAY_STATUS: u32 = V4L2_CID_MPEG_MFC_BASE + 14;
pub const V4L2_CID_MPEG_MFC51_VIDEO_I_FRAME_DECODING: u32 = V4L2_CID_MPEG_MFC_BASE + 23;
pub const V4L2_CID_MPEG_MFC51_VIDEO_FRAME_RATE_CH: u32 = V4L2_CID_MPEG_MFC_BASE + 24;
pub const V4L2_CID_MPEG_MFC51_VIDEO_BIT_RATE_CH: u32 = V4L2_CID_MPEG_MFC_BASE + 25;
pub const V4L2_CID_MPEG_MFC51_VIDEO_H264_INTERLACE: u32 = V4L2_CID_MPEG_MFC_BASE + 26;
pub const V4L2_CID_MPEG_MFC51_VIDEO_H264_RC_FRAME_RATE: u32 = V4L2_CID_MPEG_MFC_BASE + 27;
pub const V4L2_CID_MPEG_MFC51_VIDEO_MPEG4_VOP_TIME_RES: u32 = V4L2_CID_MPEG_MFC_BASE + 28;
pub const V4L2_CID_MPEG_MFC51_VIDEO_MPEG4_VOP_FRM_DELTA: u32 = V4L2_CID_MPEG_MFC_BASE + 29;
pub const V4L2_CID_MPEG_MFC51_VIDEO_H263_RC_FRAME_RATE: u32 = V4L2_CID_MPEG_MFC_BASE + 30;
pub const V4L2_CID_MPEG_VIDEO_H264_PREPEND_SPSPPS_TO_IDR: u32 = V4L2_CID_MPEG_MFC_BASE + 32;
pub const V4L2_CID_MPEG_MFC_SET_DYNAMIC_DPB_MODE: u32 = V4L2_CID_MPEG_MFC_BASE + 33;
pub const V4L2_CID_MPEG_MFC_SET_USER_SHARED_HANDLE: u32 = V4L2_CID_MPEG_MFC_BASE + 34;

/// `CHECK_STATE` value reported while the stream resolution is changing.
pub const MFCSTATE_DEC_RES_DETECT: i32 = 1;

pub const fn v4l2_fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

impl Default for v4l2_capability {
    fn default() -> Self {
        // SAFETY: all-zero is a valid value for this plain-data struct.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_plane__bindgen_ty_1 {
    pub mem_offset: u32,
    pub userptr: c_ulong,
    pub fd: i32,
}

impl Default for v4l2_plane__bindgen_ty_1 {
    fn default() -> Self {
        Self { userptr: 0 }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct v4l2_plane {
    pub bytesused: u32,
    pub length: u32,
    pub m: v4l2_plane__bindgen_ty_1,
    pub data_offset: u32,
    pub reserved: [u32; 11],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_buffer__bindgen_ty_1 {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut v4l2_plane,
    pub fd: i32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_buffer__bindgen_ty_2 {
    pub request_fd: i32,
    pub reserved: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer__bindgen_ty_1,
    pub length: u32,
    pub reserved2: u32,
    pub __bindgen_anon_1: v4l2_buffer__bindgen_ty_2,
}

impl Default for v4l2_buffer {
    fn default() -> Self {
        // SAFETY: all-zero is a valid value for this plain-data struct, the `planes` pointer
        // included.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_plane_pix_format {
    pub sizeimage: u32,
    pub bytesperline: u32,
    pub reserved: [u16; 6],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_pix_format_mplane {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub colorspace: u32,
    pub plane_fmt: [v4l2_plane_pix_format; VIDEO_MAX_PLANES as usize],
    pub num_planes: u8,
    pub flags: u8,
    pub ycbcr_enc: u8,
    pub quantization: u8,
    pub xfer_func: u8,
    pub reserved: [u8; 7],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_format__bindgen_ty_1 {
    pub pix_mp: v4l2_pix_format_mplane,
    pub raw_data: [u8; 200],
    // The kernel union contains pointers, which makes it 8-byte aligned.
    pub _align: [u64; 25],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format__bindgen_ty_1,
}

impl Default for v4l2_format {
    fn default() -> Self {
        Self {
            type_: 0,
            fmt: v4l2_format__bindgen_ty_1 { raw_data: [0; 200] },
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_crop {
    pub type_: u32,
    pub c: v4l2_rect,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct v4l2_control {
    pub id: u32,
    pub value: i32,
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub union v4l2_ext_control__bindgen_ty_1 {
    pub value: i32,
    pub value64: i64,
    pub ptr: *mut c_void,
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct v4l2_ext_control {
    pub id: u32,
    pub size: u32,
    pub reserved2: [u32; 1],
    pub __bindgen_anon_1: v4l2_ext_control__bindgen_ty_1,
}

impl Default for v4l2_ext_control {
    fn default() -> Self {
        Self {
            id: 0,
            size: 0,
            reserved2: [0],
            __bindgen_anon_1: v4l2_ext_control__bindgen_ty_1 { value64: 0 },
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_ext_controls {
    pub which: u32,
    pub count: u32,
    pub error_idx: u32,
    pub request_fd: i32,
    pub reserved: [u32; 1],
    pub controls: *mut v4l2_ext_control,
}

impl Default for v4l2_ext_controls {
    fn default() -> Self {
        Self {
            which: 0,
            count: 0,
            error_idx: 0,
            request_fd: 0,
            reserved: [0],
            controls: std::ptr::null_mut(),
        }
    }
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn abi_sizes() {
        assert_eq!(size_of::<v4l2_capability>(), 104);
        assert_eq!(size_of::<v4l2_requestbuffers>(), 20);
        assert_eq!(size_of::<v4l2_plane>(), 64);
        assert_eq!(size_of::<v4l2_buffer>(), 88);
        assert_eq!(size_of::<v4l2_format>(), 208);
        assert_eq!(size_of::<v4l2_crop>(), 20);
        assert_eq!(size_of::<v4l2_control>(), 8);
        assert_eq!(size_of::<v4l2_ext_control>(), 20);
        assert_eq!(size_of::<v4l2_ext_controls>(), 32);
    }
}
