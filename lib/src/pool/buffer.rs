//! Bookkeeping records of the buffers of a pool.
use std::os::unix::io::RawFd;

use crate::ioctl::BufferFlags;
use crate::memory::{PlaneKey, PlaneMemory};

/// What the decoder did with a CAPTURE buffer, as reported when dequeuing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeStatus {
    #[default]
    Unknown,
    /// A frame was decoded into the buffer but must not be displayed yet.
    DecodingOnly,
    /// A frame was decoded into the buffer and can be displayed.
    DisplayDecoding,
    /// The buffer holds a previously decoded frame that is now to be displayed.
    DisplayOnly,
    /// The stream is over, nothing was decoded.
    DecodingFinished,
    /// The stream's resolution changed, buffers must be reallocated.
    ResolutionChanged,
}

/// Coding type of the frame held by a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    #[default]
    Other,
    I,
    P,
    B,
}

impl From<BufferFlags> for FrameType {
    fn from(flags: BufferFlags) -> Self {
        let kind = flags & (BufferFlags::KEYFRAME | BufferFlags::PFRAME | BufferFlags::BFRAME);
        if kind == BufferFlags::KEYFRAME {
            FrameType::I
        } else if kind == BufferFlags::PFRAME {
            FrameType::P
        } else if kind == BufferFlags::BFRAME {
            FrameType::B
        } else {
            FrameType::Other
        }
    }
}

/// One plane of a buffer.
#[derive(Debug, Default)]
pub struct Plane {
    pub memory: PlaneMemory,
    /// Size of the memory backing the plane. 0 if unknown.
    pub allocated_size: u32,
    /// Number of bytes of valid data.
    pub used_size: u32,
}

impl Plane {
    pub fn new(memory: PlaneMemory, allocated_size: u32) -> Self {
        Plane {
            memory,
            allocated_size,
            used_size: 0,
        }
    }

    /// Whether `size` bytes of data fit in the plane.
    pub fn fits(&self, size: u32) -> bool {
        self.allocated_size == 0 || size <= self.allocated_size
    }

    pub fn info(&self) -> PlaneInfo {
        PlaneInfo {
            addr: self.memory.address(),
            fd: self.memory.fd(),
            allocated_size: self.allocated_size,
            used_size: self.used_size,
        }
    }
}

/// Copy of the externally visible properties of a plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneInfo {
    pub addr: Option<usize>,
    pub fd: Option<RawFd>,
    pub allocated_size: u32,
    pub used_size: u32,
}

/// State of one slot of a pool.
#[derive(Debug, Default)]
pub struct Buffer {
    pub(crate) index: usize,
    pub(crate) planes: Vec<Plane>,
    /// Currently owned by the driver.
    pub(crate) queued: bool,
    /// Memory has been attached to the slot.
    pub(crate) registered: bool,
    /// The driver may still reference the frame held by the slot.
    pub(crate) slot_in_use: bool,
    /// Number of outstanding driver references to the frame held by the slot.
    pub(crate) ref_count: u32,
    /// Opaque client value attached when queuing.
    pub(crate) tag: Option<usize>,
    pub(crate) status: DecodeStatus,
    pub(crate) frame_type: FrameType,
}

impl Buffer {
    pub fn new(index: usize, planes: Vec<Plane>, registered: bool) -> Self {
        Buffer {
            index,
            planes,
            registered,
            ..Default::default()
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn planes_mut(&mut self) -> &mut [Plane] {
        &mut self.planes
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_slot_in_use(&self) -> bool {
        self.slot_in_use
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn tag(&self) -> Option<usize> {
        self.tag
    }

    pub fn set_status(&mut self, status: DecodeStatus) {
        self.status = status;
    }

    pub fn set_frame_type(&mut self, frame_type: FrameType) {
        self.frame_type = frame_type;
    }

    /// Key clients designate this buffer with.
    pub fn key(&self) -> Option<PlaneKey> {
        self.planes.first().and_then(|p| p.memory.key())
    }

    /// dma-buf fd of the first plane, used to match release descriptors.
    pub(crate) fn first_fd(&self) -> Option<RawFd> {
        self.planes.first().and_then(|p| p.memory.fd())
    }

    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            index: self.index,
            planes: self.planes.iter().map(Plane::info).collect(),
            queued: self.queued,
            registered: self.registered,
            slot_in_use: self.slot_in_use,
            ref_count: self.ref_count,
            tag: self.tag,
            status: self.status,
            frame_type: self.frame_type,
        }
    }
}

/// Copy of the state of a buffer, handed out to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: usize,
    pub planes: Vec<PlaneInfo>,
    pub queued: bool,
    pub registered: bool,
    pub slot_in_use: bool,
    pub ref_count: u32,
    pub tag: Option<usize>,
    pub status: DecodeStatus,
    pub frame_type: FrameType,
}
