//! Per-instance WebSocket registry plus a Redis pub/sub overlay that fans
//! order-update events out to every instance (service or gateway) holding a
//! socket for the target user.

mod bus;
mod message;
mod registry;

pub use bus::{RealtimeBus, CHANNEL};
pub use message::OrderUpdate;
pub use registry::{ConnectionRegistry, SubscriberId};

/// Seconds since the Unix epoch, as a float, matching the wire format's
/// `timestamp` field. Not wall-clock sensitive: only used for display and
/// rough client-side ordering, never compared across processes.
pub fn monotonic_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
