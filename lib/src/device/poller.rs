//! Waiting for a queue of the device to become ready.
use log::{debug, error, warn};
use nix::poll::PollFlags;

use super::MfcDevice;
use crate::error::{VideoError, VideoResult};
use crate::QueueDirection;

/// Events signaling that a queue of the given direction can make progress: a free slot on the
/// OUTPUT queue, or a processed buffer on the CAPTURE queue.
pub fn ready_events(direction: QueueDirection) -> PollFlags {
    match direction {
        QueueDirection::Output => PollFlags::POLLOUT,
        QueueDirection::Capture => PollFlags::POLLIN,
    }
}

/// Block until the queue of `direction` is ready.
///
/// The device is polled every `timeout_ms` milliseconds until it signals readiness. If
/// `max_timeouts` is set, gives up after that many consecutive timeouts and returns `false`.
pub fn wait_ready<D: MfcDevice + ?Sized>(
    device: &D,
    direction: QueueDirection,
    timeout_ms: i32,
    max_timeouts: Option<u32>,
) -> VideoResult<bool> {
    let wanted = ready_events(direction);
    let mut timeouts = 0u32;

    loop {
        let events = device
            .poll(wanted | PollFlags::POLLERR, timeout_ms)
            .map_err(|e| {
                error!("Polling the {:?} queue failed: {}", direction, e);
                VideoError::Poll(e)
            })?;

        if events.is_empty() {
            timeouts += 1;
            if let Some(max) = max_timeouts {
                if timeouts >= max {
                    warn!(
                        "{:?} queue still not ready after {} timeouts",
                        direction, timeouts
                    );
                    return Ok(false);
                }
            }
            debug!("Timeout while waiting on the {:?} queue", direction);
            continue;
        }

        if events.intersects(wanted) {
            return Ok(true);
        }

        error!("Unexpected poll events on the {:?} queue: {:?}", direction, events);
        return Err(VideoError::Poll(nix::errno::Errno::EIO));
    }
}
