//! Mapping of MMAP planes and shared memory into our address space.
use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};
use std::os::unix::io::AsFd;
use std::ptr::NonNull;

use log::error;
use nix::errno::Errno;
use nix::libc::{c_void, off_t};
use nix::sys::mman::{self, MapFlags, ProtFlags};
use thiserror::Error;

/// A read-write shared mapping, unmapped when dropped.
pub struct PlaneMapping {
    // Valid until munmap() is called in drop().
    data: &'static mut [u8],
}

impl PlaneMapping {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl Deref for PlaneMapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl DerefMut for PlaneMapping {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

impl Drop for PlaneMapping {
    fn drop(&mut self) {
        let len = self.data.len();
        let addr = NonNull::from(&mut *self.data).cast::<c_void>();
        // SAFETY: the address and length are those returned by mmap().
        if let Err(e) = unsafe { mman::munmap(addr, len) } {
            error!("Failed to unmap plane of {} bytes: {}", len, e);
        }
    }
}

#[derive(Debug, Error)]
pub enum MmapError {
    #[error("plane has a length of zero")]
    ZeroLength,
    #[error("ioctl error: {0}")]
    IoctlError(#[from] Errno),
}

impl From<MmapError> for Errno {
    fn from(err: MmapError) -> Self {
        match err {
            MmapError::ZeroLength => Errno::EINVAL,
            MmapError::IoctlError(e) => e,
        }
    }
}

/// Map `length` bytes of `fd` at `offset`. For device planes, `offset` is the `mem_offset`
/// reported by `VIDIOC_QUERYBUF`.
pub fn mmap(fd: &impl AsFd, offset: u32, length: u32) -> Result<PlaneMapping, MmapError> {
    let len = NonZeroUsize::new(length as usize).ok_or(MmapError::ZeroLength)?;
    // SAFETY: we map a fresh area chosen by the kernel, nothing else aliases it.
    let addr = unsafe {
        mman::mmap(
            None,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            offset as off_t,
        )
    }?;

    // SAFETY: `addr` points to `len` mapped bytes that live until the mapping is dropped.
    let data = unsafe { std::slice::from_raw_parts_mut(addr.cast::<u8>().as_ptr(), len.get()) };
    Ok(PlaneMapping { data })
}
