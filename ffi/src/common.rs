//! Types and constants shared by the decoder and encoder tables.
#![allow(non_camel_case_types)]

use std::os::raw::{c_int, c_uint, c_void};

use log::error;

use exynos_mfc::dpb::{ReleaseEntry, MAX_DPB_FD_ENTRIES, RELEASE_FD_PLANES};
use exynos_mfc::error::VideoResult;
use exynos_mfc::format::{CodingType, ColorFormat, Geometry};
use exynos_mfc::memory::{MemoryType, PlaneSource};
use exynos_mfc::pool::buffer::{BufferInfo, DecodeStatus, FrameType};
use exynos_mfc::pool::DequeuedBuffer;
use exynos_mfc::Rect;

/// Version of the operation tables this library provides.
pub const EXYNOS_MFC_OPS_VERSION: u32 = 1;

pub const MFC_ERROR_NONE: c_int = 0;
pub const MFC_ERROR_BADPARAM: c_int = -1;
pub const MFC_ERROR_INIT: c_int = -2;
pub const MFC_ERROR_NOMEM: c_int = -3;
pub const MFC_ERROR_APIFAIL: c_int = -4;
pub const MFC_ERROR_MAPFAIL: c_int = -5;
pub const MFC_ERROR_NOBUFFERS: c_int = -6;
pub const MFC_ERROR_POLL: c_int = -7;
pub const MFC_ERROR_WRONGBUFFERSIZE: c_int = -8;

/// Direction receiving the data to process: bitstream for decoders, frames for encoders.
pub const MFC_DIRECTION_INPUT: c_uint = 0;
/// Direction returning the processed data.
pub const MFC_DIRECTION_OUTPUT: c_uint = 1;

pub const MFC_MEMORY_MMAP: c_uint = 1;
pub const MFC_MEMORY_USERPTR: c_uint = 2;
pub const MFC_MEMORY_DMABUF: c_uint = 4;

/// Maximum number of planes of a buffer.
pub const MFC_MAX_PLANES: usize = 3;
pub const MFC_MAX_DPB_FD_ENTRIES: usize = MAX_DPB_FD_ENTRIES;
pub const MFC_RELEASE_FD_PLANES: usize = RELEASE_FD_PLANES;

/// Submit the buffer as the last one of the stream.
pub const MFC_BUFFER_FLAG_LAST: c_uint = 0x0010_0000;

pub const MFC_CODING_UNKNOWN: c_int = 0;
pub const MFC_CODING_AVC: c_int = 1;
pub const MFC_CODING_MPEG4: c_int = 2;
pub const MFC_CODING_H263: c_int = 3;
pub const MFC_CODING_MPEG2: c_int = 4;
pub const MFC_CODING_VC1: c_int = 5;
pub const MFC_CODING_VC1_RCV: c_int = 6;
pub const MFC_CODING_VP8: c_int = 7;

pub const MFC_COLOR_UNKNOWN: c_int = 0;
pub const MFC_COLOR_NV12: c_int = 1;
pub const MFC_COLOR_NV21: c_int = 2;
pub const MFC_COLOR_NV12_TILED: c_int = 3;

pub const MFC_FRAME_STATUS_UNKNOWN: c_int = 0;
pub const MFC_FRAME_STATUS_DECODING_ONLY: c_int = 1;
pub const MFC_FRAME_STATUS_DISPLAY_DECODING: c_int = 2;
pub const MFC_FRAME_STATUS_DISPLAY_ONLY: c_int = 3;
pub const MFC_FRAME_STATUS_DECODING_FINISHED: c_int = 4;
pub const MFC_FRAME_STATUS_CHANGE_RESOL: c_int = 5;

pub const MFC_FRAME_TYPE_OTHER: c_int = 0;
pub const MFC_FRAME_TYPE_I: c_int = 1;
pub const MFC_FRAME_TYPE_P: c_int = 2;
pub const MFC_FRAME_TYPE_B: c_int = 3;

/// Turn the result of an operation into its C code, logging failures.
pub(crate) fn result_code(op: &str, result: VideoResult<()>) -> c_int {
    match result {
        Ok(()) => MFC_ERROR_NONE,
        Err(e) => {
            error!("{} failed: {}", op, e);
            e.code()
        }
    }
}

pub(crate) fn memory_type(memory: c_uint) -> anyhow::Result<MemoryType> {
    MemoryType::n(memory).ok_or_else(|| anyhow::anyhow!("invalid memory type {}", memory))
}

pub(crate) fn coding_from_c(coding: c_int) -> CodingType {
    match coding {
        MFC_CODING_AVC => CodingType::Avc,
        MFC_CODING_MPEG4 => CodingType::Mpeg4,
        MFC_CODING_H263 => CodingType::H263,
        MFC_CODING_MPEG2 => CodingType::Mpeg2,
        MFC_CODING_VC1 => CodingType::Vc1,
        MFC_CODING_VC1_RCV => CodingType::Vc1Rcv,
        MFC_CODING_VP8 => CodingType::Vp8,
        _ => CodingType::Unknown,
    }
}

fn coding_to_c(coding: CodingType) -> c_int {
    match coding {
        CodingType::Unknown => MFC_CODING_UNKNOWN,
        CodingType::Avc => MFC_CODING_AVC,
        CodingType::Mpeg4 => MFC_CODING_MPEG4,
        CodingType::H263 => MFC_CODING_H263,
        CodingType::Mpeg2 => MFC_CODING_MPEG2,
        CodingType::Vc1 => MFC_CODING_VC1,
        CodingType::Vc1Rcv => MFC_CODING_VC1_RCV,
        CodingType::Vp8 => MFC_CODING_VP8,
    }
}

fn color_from_c(color: c_int) -> ColorFormat {
    match color {
        MFC_COLOR_NV12 => ColorFormat::Nv12,
        MFC_COLOR_NV21 => ColorFormat::Nv21,
        MFC_COLOR_NV12_TILED => ColorFormat::Nv12Tiled,
        _ => ColorFormat::Unknown,
    }
}

fn color_to_c(color: ColorFormat) -> c_int {
    match color {
        ColorFormat::Unknown => MFC_COLOR_UNKNOWN,
        ColorFormat::Nv12 => MFC_COLOR_NV12,
        ColorFormat::Nv21 => MFC_COLOR_NV21,
        ColorFormat::Nv12Tiled => MFC_COLOR_NV12_TILED,
    }
}

/// Geometry of one direction of a codec.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct mfc_geometry {
    pub width: u32,
    pub height: u32,
    /// Size of a bitstream buffer, or of the first plane of a frame.
    pub stream_size: u32,
    pub crop_left: i32,
    pub crop_top: i32,
    pub crop_width: u32,
    pub crop_height: u32,
    /// One of the `MFC_CODING_*` values.
    pub coding: c_int,
    /// One of the `MFC_COLOR_*` values.
    pub color: c_int,
    pub num_planes: u32,
}

impl From<&mfc_geometry> for Geometry {
    fn from(geometry: &mfc_geometry) -> Self {
        Geometry {
            width: geometry.width,
            height: geometry.height,
            stream_size: geometry.stream_size,
            crop: Rect::new(
                geometry.crop_left,
                geometry.crop_top,
                geometry.crop_width,
                geometry.crop_height,
            ),
            coding: coding_from_c(geometry.coding),
            color: color_from_c(geometry.color),
            num_planes: geometry.num_planes,
        }
    }
}

impl From<&Geometry> for mfc_geometry {
    fn from(geometry: &Geometry) -> Self {
        mfc_geometry {
            width: geometry.width,
            height: geometry.height,
            stream_size: geometry.stream_size,
            crop_left: geometry.crop.left,
            crop_top: geometry.crop.top,
            crop_width: geometry.crop.width,
            crop_height: geometry.crop.height,
            coding: coding_to_c(geometry.coding),
            color: color_to_c(geometry.color),
            num_planes: geometry.num_planes,
        }
    }
}

/// Memory backing one plane of a buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct mfc_plane {
    /// CPU address of the plane, or NULL.
    pub addr: *mut c_void,
    /// dma-buf fd of the plane, or -1.
    pub fd: c_int,
    /// Bytes of valid data.
    pub data_size: u32,
    /// Size of the memory.
    pub alloc_size: u32,
}

impl Default for mfc_plane {
    fn default() -> Self {
        mfc_plane {
            addr: std::ptr::null_mut(),
            fd: -1,
            data_size: 0,
            alloc_size: 0,
        }
    }
}

impl From<&mfc_plane> for PlaneSource {
    fn from(plane: &mfc_plane) -> Self {
        PlaneSource {
            addr: (!plane.addr.is_null()).then_some(plane.addr as usize),
            fd: (plane.fd >= 0).then_some(plane.fd),
            data_size: plane.data_size,
            alloc_size: plane.alloc_size,
        }
    }
}

/// Read `num_planes` planes from `planes`.
///
/// # Safety
/// `planes` must point to at least `num_planes` valid planes if `num_planes` is not 0.
pub(crate) unsafe fn planes_from_c(
    planes: *const mfc_plane,
    num_planes: c_uint,
) -> anyhow::Result<Vec<PlaneSource>> {
    let num_planes = num_planes as usize;
    anyhow::ensure!(
        num_planes <= MFC_MAX_PLANES,
        "too many planes: {}",
        num_planes
    );
    if num_planes == 0 {
        return Ok(Vec::new());
    }
    anyhow::ensure!(!planes.is_null(), "no planes given");

    Ok(std::slice::from_raw_parts(planes, num_planes)
        .iter()
        .map(PlaneSource::from)
        .collect())
}

/// Release descriptor of a dequeued decoded picture buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct mfc_release_entry {
    pub index: c_int,
    /// dma-buf fds of the frames released by the driver, terminated by a negative fd.
    pub fds: [[c_int; MFC_RELEASE_FD_PLANES]; MFC_MAX_DPB_FD_ENTRIES],
}

impl From<&ReleaseEntry> for mfc_release_entry {
    fn from(entry: &ReleaseEntry) -> Self {
        mfc_release_entry {
            index: entry.index,
            fds: entry.fds,
        }
    }
}

/// State of a buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct mfc_buffer {
    pub index: c_int,
    pub num_planes: u32,
    pub planes: [mfc_plane; MFC_MAX_PLANES],
    /// Value given when the buffer was queued.
    pub tag: *mut c_void,
    /// V4L2 flags of the buffer when it was dequeued.
    pub flags: u32,
    pub queued: bool,
    pub registered: bool,
    pub slot_in_use: bool,
    pub ref_count: u32,
    /// One of the `MFC_FRAME_STATUS_*` values.
    pub status: c_int,
    /// One of the `MFC_FRAME_TYPE_*` values.
    pub frame_type: c_int,
    /// Release descriptor, for extension dequeues of decoded picture buffers.
    pub release: mfc_release_entry,
}

impl From<&BufferInfo> for mfc_buffer {
    fn from(info: &BufferInfo) -> Self {
        let mut planes = [mfc_plane::default(); MFC_MAX_PLANES];
        for (plane, src) in planes.iter_mut().zip(info.planes.iter()) {
            *plane = mfc_plane {
                addr: src.addr.map_or(std::ptr::null_mut(), |a| a as *mut c_void),
                fd: src.fd.unwrap_or(-1),
                data_size: src.used_size,
                alloc_size: src.allocated_size,
            };
        }

        mfc_buffer {
            index: info.index as c_int,
            num_planes: info.planes.len().min(MFC_MAX_PLANES) as u32,
            planes,
            tag: info.tag.map_or(std::ptr::null_mut(), |t| t as *mut c_void),
            flags: 0,
            queued: info.queued,
            registered: info.registered,
            slot_in_use: info.slot_in_use,
            ref_count: info.ref_count,
            status: match info.status {
                DecodeStatus::Unknown => MFC_FRAME_STATUS_UNKNOWN,
                DecodeStatus::DecodingOnly => MFC_FRAME_STATUS_DECODING_ONLY,
                DecodeStatus::DisplayDecoding => MFC_FRAME_STATUS_DISPLAY_DECODING,
                DecodeStatus::DisplayOnly => MFC_FRAME_STATUS_DISPLAY_ONLY,
                DecodeStatus::DecodingFinished => MFC_FRAME_STATUS_DECODING_FINISHED,
                DecodeStatus::ResolutionChanged => MFC_FRAME_STATUS_CHANGE_RESOL,
            },
            frame_type: match info.frame_type {
                FrameType::Other => MFC_FRAME_TYPE_OTHER,
                FrameType::I => MFC_FRAME_TYPE_I,
                FrameType::P => MFC_FRAME_TYPE_P,
                FrameType::B => MFC_FRAME_TYPE_B,
            },
            release: mfc_release_entry::from(&ReleaseEntry::default()),
        }
    }
}

impl From<&DequeuedBuffer> for mfc_buffer {
    fn from(dequeued: &DequeuedBuffer) -> Self {
        let mut buffer = mfc_buffer::from(&dequeued.buffer);
        buffer.flags = dequeued.flags.bits();
        if let Some(release) = &dequeued.release {
            buffer.release = release.into();
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exynos_mfc::ioctl::BufferFlags;
    use exynos_mfc::pool::buffer::PlaneInfo;
    use exynos_mfc::VideoError;
    use nix::errno::Errno;

    #[test]
    fn error_codes_match() {
        assert_eq!(VideoError::BadParam("").code(), MFC_ERROR_BADPARAM);
        assert_eq!(VideoError::Init(String::new()).code(), MFC_ERROR_INIT);
        assert_eq!(
            VideoError::NoMem {
                requested: 1,
                granted: 0
            }
            .code(),
            MFC_ERROR_NOMEM
        );
        assert_eq!(VideoError::ApiFail(Errno::EIO).code(), MFC_ERROR_APIFAIL);
        assert_eq!(VideoError::MapFail(Errno::EIO).code(), MFC_ERROR_MAPFAIL);
        assert_eq!(VideoError::NoBuffers.code(), MFC_ERROR_NOBUFFERS);
        assert_eq!(VideoError::Poll(Errno::EIO).code(), MFC_ERROR_POLL);
        assert_eq!(
            VideoError::WrongBufferSize.code(),
            MFC_ERROR_WRONGBUFFERSIZE
        );
        assert_eq!(result_code("test", Ok(())), MFC_ERROR_NONE);
    }

    #[test]
    fn ops_version_matches_lib() {
        assert_eq!(EXYNOS_MFC_OPS_VERSION, exynos_mfc::ops::OPS_VERSION);
    }

    #[test]
    fn last_flag_matches_v4l2() {
        assert_eq!(MFC_BUFFER_FLAG_LAST, BufferFlags::LAST.bits());
    }

    #[test]
    fn memory_types() {
        assert_eq!(memory_type(MFC_MEMORY_DMABUF).unwrap(), MemoryType::DmaBuf);
        assert_eq!(memory_type(MFC_MEMORY_USERPTR).unwrap(), MemoryType::UserPtr);
        assert!(memory_type(3).is_err());
    }

    #[test]
    fn geometry_conversion() {
        let c_geometry = mfc_geometry {
            width: 1920,
            height: 1088,
            crop_width: 1920,
            crop_height: 1080,
            coding: MFC_CODING_VC1_RCV,
            color: MFC_COLOR_NV12_TILED,
            ..Default::default()
        };
        let geometry = Geometry::from(&c_geometry);
        assert_eq!(geometry.coding, CodingType::Vc1Rcv);
        assert_eq!(geometry.color, ColorFormat::Nv12Tiled);
        assert_eq!(geometry.crop, Rect::new(0, 0, 1920, 1080));
        assert_eq!(mfc_geometry::from(&geometry), c_geometry);

        let unknown = mfc_geometry {
            coding: 42,
            ..Default::default()
        };
        assert_eq!(Geometry::from(&unknown).coding, CodingType::Unknown);
    }

    #[test]
    fn planes_conversion() {
        let planes = [
            mfc_plane {
                fd: 12,
                data_size: 100,
                alloc_size: 4096,
                ..Default::default()
            },
            mfc_plane {
                addr: 0x1000 as *mut c_void,
                ..Default::default()
            },
        ];
        let sources = unsafe { planes_from_c(planes.as_ptr(), 2) }.unwrap();
        assert_eq!(sources[0].fd, Some(12));
        assert_eq!(sources[0].addr, None);
        assert_eq!(sources[0].data_size, 100);
        assert_eq!(sources[1].fd, None);
        assert_eq!(sources[1].addr, Some(0x1000));

        assert!(unsafe { planes_from_c(planes.as_ptr(), 4) }.is_err());
        assert!(unsafe { planes_from_c(std::ptr::null(), 1) }.is_err());
        assert!(unsafe { planes_from_c(std::ptr::null(), 0) }
            .unwrap()
            .is_empty());
    }

    #[test]
    fn buffer_conversion() {
        let info = BufferInfo {
            index: 3,
            planes: vec![PlaneInfo {
                addr: None,
                fd: Some(9),
                allocated_size: 4096,
                used_size: 10,
            }],
            queued: false,
            slot_in_use: true,
            ref_count: 1,
            tag: Some(0x42),
            status: DecodeStatus::ResolutionChanged,
            frame_type: FrameType::B,
            ..Default::default()
        };
        let dequeued = DequeuedBuffer {
            buffer: info,
            flags: BufferFlags::BFRAME,
            sequence: 0,
            release: Some(ReleaseEntry::new(3, &[9])),
        };

        let buffer = mfc_buffer::from(&dequeued);
        assert_eq!(buffer.index, 3);
        assert_eq!(buffer.num_planes, 1);
        assert_eq!(buffer.planes[0].fd, 9);
        assert_eq!(buffer.planes[1].fd, -1);
        assert_eq!(buffer.tag as usize, 0x42);
        assert_eq!(buffer.status, MFC_FRAME_STATUS_CHANGE_RESOL);
        assert_eq!(buffer.frame_type, MFC_FRAME_TYPE_B);
        assert_eq!(buffer.flags, BufferFlags::BFRAME.bits());
        assert_eq!(buffer.release.fds[0][0], 9);
        assert_eq!(buffer.release.fds[1][0], -1);
    }
}
