use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as fractional seconds since the unix epoch.
///
/// This is the representation stored in [`crate::Block::timestamp`].
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
