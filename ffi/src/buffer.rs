//! Buffer operations common to decoders and encoders.
//!
//! Each operation takes a direction (`MFC_DIRECTION_INPUT` or `MFC_DIRECTION_OUTPUT`) selecting
//! the pool it acts on. They are instantiated for each context type and exposed through the
//! operation tables rather than as standalone symbols.
use std::os::raw::{c_int, c_uint, c_void};

use exynos_mfc::device::V4l2Device;
use exynos_mfc::error::{VideoError, VideoResult};
use exynos_mfc::format::Geometry;
use exynos_mfc::ioctl::BufferFlags;
use exynos_mfc::memory::PlaneSource;
use exynos_mfc::pool::direction::{Input, Output};
use exynos_mfc::pool::BufferPool;

use crate::common::{
    mfc_buffer, mfc_geometry, mfc_plane, planes_from_c, result_code, MFC_ERROR_BADPARAM,
    MFC_ERROR_NONE,
};

/// A codec context whose buffers can be driven through the common operations.
pub trait CodecContext {
    fn input(&self) -> &BufferPool<Input, V4l2Device>;
    fn output(&self) -> &BufferPool<Output, V4l2Device>;
    fn set_geometry(&self, direction: c_uint, geometry: &Geometry) -> VideoResult<()>;
    fn get_geometry(&self, direction: c_uint) -> VideoResult<Geometry>;
}

/// Borrow the context behind `ctx`.
///
/// # Safety
/// `ctx` must be NULL or point to a live context.
pub(crate) unsafe fn context<'a, C>(ctx: *mut C) -> VideoResult<&'a C> {
    ctx.as_ref().ok_or(VideoError::BadParam("null context"))
}

unsafe fn planes(planes: *const mfc_plane, num_planes: c_uint) -> VideoResult<Vec<PlaneSource>> {
    planes_from_c(planes, num_planes).map_err(|e| {
        log::error!("Invalid planes: {:#}", e);
        VideoError::BadParam("invalid planes")
    })
}

fn tag_from_c(tag: *mut c_void) -> Option<usize> {
    (!tag.is_null()).then_some(tag as usize)
}

/// Make the buffers of `direction` cacheable by the CPU.
///
/// # Safety
/// `ctx` must be a valid context.
pub unsafe extern "C" fn mfc_enable_cacheable<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
) -> c_int {
    result_code(
        "enable_cacheable",
        context(ctx).and_then(|ctx| with_pool!(ctx, direction, |pool| pool.enable_cacheable())),
    )
}

/// Select whether the buffers of `direction` use client memory. Must be called before setup.
///
/// # Safety
/// `ctx` must be a valid context.
pub unsafe extern "C" fn mfc_set_shareable<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    shared: bool,
) -> c_int {
    result_code(
        "set_shareable",
        context(ctx).and_then(|ctx| with_pool!(ctx, direction, |pool| pool.set_shareable(shared))),
    )
}

/// Copy the state of buffer `index` of `direction` into `buffer`.
///
/// # Safety
/// `ctx` must be a valid context and `buffer` must point to writable memory.
pub unsafe extern "C" fn mfc_get_buffer<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    index: c_int,
    buffer: *mut mfc_buffer,
) -> c_int {
    let Some(buffer) = buffer.as_mut() else {
        return MFC_ERROR_BADPARAM;
    };
    let Ok(index) = usize::try_from(index) else {
        return MFC_ERROR_BADPARAM;
    };
    let info = context(ctx)
        .and_then(|ctx| with_pool!(ctx, direction, |pool| pool.get_buffer(index)));
    match info {
        Ok(info) => {
            *buffer = mfc_buffer::from(&info);
            MFC_ERROR_NONE
        }
        Err(e) => result_code("get_buffer", Err(e)),
    }
}

/// Set the format of `direction`.
///
/// # Safety
/// `ctx` must be a valid context and `geometry` must point to a valid geometry.
pub unsafe extern "C" fn mfc_set_geometry<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    geometry: *const mfc_geometry,
) -> c_int {
    let Some(geometry) = geometry.as_ref() else {
        return MFC_ERROR_BADPARAM;
    };
    result_code(
        "set_geometry",
        context(ctx).and_then(|ctx| ctx.set_geometry(direction, &Geometry::from(geometry))),
    )
}

/// Read back the format of `direction`.
///
/// # Safety
/// `ctx` must be a valid context and `geometry` must point to writable memory.
pub unsafe extern "C" fn mfc_get_geometry<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    geometry: *mut mfc_geometry,
) -> c_int {
    let Some(out) = geometry.as_mut() else {
        return MFC_ERROR_BADPARAM;
    };
    match context(ctx).and_then(|ctx| ctx.get_geometry(direction)) {
        Ok(geometry) => {
            *out = mfc_geometry::from(&geometry);
            MFC_ERROR_NONE
        }
        Err(e) => result_code("get_geometry", Err(e)),
    }
}

/// Allocate `count` buffers for `direction`. A count of 0 selects the default of the direction.
///
/// # Safety
/// `ctx` must be a valid context.
pub unsafe extern "C" fn mfc_setup<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    count: c_uint,
) -> c_int {
    result_code(
        "setup",
        context(ctx).and_then(|ctx| with_pool!(ctx, direction, |pool| pool.setup(count))),
    )
}

/// Start streaming `direction`.
///
/// # Safety
/// `ctx` must be a valid context.
pub unsafe extern "C" fn mfc_run<C: CodecContext>(ctx: *mut C, direction: c_uint) -> c_int {
    result_code(
        "run",
        context(ctx).and_then(|ctx| with_pool!(ctx, direction, |pool| pool.run())),
    )
}

/// Stop streaming `direction`. All its buffers are returned to the client.
///
/// # Safety
/// `ctx` must be a valid context.
pub unsafe extern "C" fn mfc_stop<C: CodecContext>(ctx: *mut C, direction: c_uint) -> c_int {
    result_code(
        "stop",
        context(ctx).and_then(|ctx| with_pool!(ctx, direction, |pool| pool.stop())),
    )
}

/// Block until a buffer of `direction` can be dequeued.
///
/// Also returns `MFC_ERROR_NONE` when the pool gives up waiting, in which case the next dequeue
/// reports `MFC_ERROR_NOBUFFERS`.
///
/// # Safety
/// `ctx` must be a valid context.
pub unsafe extern "C" fn mfc_wait<C: CodecContext>(ctx: *mut C, direction: c_uint) -> c_int {
    let ready = context(ctx).and_then(|ctx| with_pool!(ctx, direction, |pool| pool.wait()));
    if let Ok(false) = ready {
        log::warn!("Gave up waiting for a buffer");
    }
    result_code("wait", ready.map(|_| ()))
}

/// Attach the client memory described by `planes` to the next unregistered buffer of
/// `direction`.
///
/// # Safety
/// `ctx` must be a valid context and `planes` must point to `num_planes` planes.
pub unsafe extern "C" fn mfc_register<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    planes: *const mfc_plane,
    num_planes: c_uint,
) -> c_int {
    let result = context(ctx).and_then(|ctx| {
        let planes = self::planes(planes, num_planes)?;
        with_pool!(ctx, direction, |pool| pool.register(&planes))
    });
    result_code("register", result.map(|_| ()))
}

/// Detach all client memory from the buffers of `direction`.
///
/// # Safety
/// `ctx` must be a valid context.
pub unsafe extern "C" fn mfc_clear_registered<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
) -> c_int {
    result_code(
        "clear_registered",
        context(ctx).and_then(|ctx| with_pool!(ctx, direction, |pool| pool.clear_registered())),
    )
}

/// Index of the buffer of `direction` bound to `plane`, or -1.
///
/// # Safety
/// `ctx` must be a valid context and `plane` must point to a valid plane.
pub unsafe extern "C" fn mfc_find<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    plane: *const mfc_plane,
) -> c_int {
    let Some(plane) = plane.as_ref() else {
        return -1;
    };
    let source = PlaneSource::from(plane);
    context(ctx)
        .and_then(|ctx| with_pool!(ctx, direction, |pool| Ok(pool.find(&source))))
        .ok()
        .flatten()
        .map_or(-1, |index| index as c_int)
}

/// Queue the buffer of `direction` designated by `planes`. `flags` are V4L2 buffer flags, e.g.
/// `MFC_BUFFER_FLAG_LAST`.
///
/// # Safety
/// `ctx` must be a valid context and `planes` must point to `num_planes` planes.
pub unsafe extern "C" fn mfc_enqueue<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    planes: *const mfc_plane,
    num_planes: c_uint,
    tag: *mut c_void,
    flags: c_uint,
) -> c_int {
    let result = context(ctx).and_then(|ctx| {
        let planes = self::planes(planes, num_planes)?;
        let flags = BufferFlags::from_bits_truncate(flags);
        with_pool!(ctx, direction, |pool| pool.enqueue(
            &planes,
            tag_from_c(tag),
            flags
        ))
    });
    result_code("enqueue", result.map(|_| ()))
}

/// Queue every buffer of `direction` that is not queued yet.
///
/// # Safety
/// `ctx` must be a valid context.
pub unsafe extern "C" fn mfc_enqueue_all<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
) -> c_int {
    result_code(
        "enqueue_all",
        context(ctx).and_then(|ctx| with_pool!(ctx, direction, |pool| pool.enqueue_all())),
    )
}

/// Dequeue a buffer of `direction` into `buffer`. Returns `MFC_ERROR_NOBUFFERS` if none is
/// ready.
///
/// # Safety
/// `ctx` must be a valid context and `buffer` must point to writable memory.
pub unsafe extern "C" fn mfc_dequeue<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    buffer: *mut mfc_buffer,
) -> c_int {
    let Some(out) = buffer.as_mut() else {
        return MFC_ERROR_BADPARAM;
    };
    let dequeued = context(ctx).and_then(|ctx| {
        with_pool!(ctx, direction, |pool| pool
            .dequeue()
            .ok_or(VideoError::NoBuffers))
    });
    match dequeued {
        Ok(dequeued) => {
            *out = mfc_buffer::from(&dequeued);
            MFC_ERROR_NONE
        }
        Err(VideoError::NoBuffers) => VideoError::NoBuffers.code(),
        Err(e) => result_code("dequeue", Err(e)),
    }
}

/// Queue client memory on a shared pool of `direction`, picking the buffer it is bound to or any
/// free one.
///
/// # Safety
/// `ctx` must be a valid context and `planes` must point to `num_planes` planes.
pub unsafe extern "C" fn mfc_extension_enqueue<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    planes: *const mfc_plane,
    num_planes: c_uint,
    tag: *mut c_void,
) -> c_int {
    let result = context(ctx).and_then(|ctx| {
        let planes = self::planes(planes, num_planes)?;
        with_pool!(ctx, direction, |pool| pool
            .enqueue_extension(&planes, tag_from_c(tag)))
    });
    result_code("extension_enqueue", result.map(|_| ()))
}

/// Dequeue a buffer of a shared pool of `direction` into `buffer`, along with its release
/// descriptor if the pool tracks references.
///
/// # Safety
/// `ctx` must be a valid context and `buffer` must point to writable memory.
pub unsafe extern "C" fn mfc_extension_dequeue<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
    buffer: *mut mfc_buffer,
) -> c_int {
    let Some(out) = buffer.as_mut() else {
        return MFC_ERROR_BADPARAM;
    };
    let dequeued = context(ctx)
        .and_then(|ctx| with_pool!(ctx, direction, |pool| pool.dequeue_extension()));
    match dequeued {
        Ok(dequeued) => {
            *out = mfc_buffer::from(&dequeued);
            MFC_ERROR_NONE
        }
        Err(e) => result_code("extension_dequeue", Err(e)),
    }
}

/// Consider all buffers of `direction` as dequeued.
///
/// # Safety
/// `ctx` must be a valid context.
pub unsafe extern "C" fn mfc_clear_queue<C: CodecContext>(
    ctx: *mut C,
    direction: c_uint,
) -> c_int {
    result_code(
        "clear_queue",
        context(ctx).and_then(|ctx| {
            with_pool!(ctx, direction, |pool| {
                pool.clear_queue();
                Ok(())
            })
        }),
    )
}

/// Free the buffers of `direction`. The direction must not be streaming.
///
/// # Safety
/// `ctx` must be a valid context.
pub unsafe extern "C" fn mfc_cleanup<C: CodecContext>(ctx: *mut C, direction: c_uint) -> c_int {
    result_code(
        "cleanup",
        context(ctx).and_then(|ctx| with_pool!(ctx, direction, |pool| pool.cleanup())),
    )
}
