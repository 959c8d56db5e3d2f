//! Aggregate views computed from stored records.

use time::PrimitiveDateTime;

/// Per-device totals, computed fresh from the record table on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSummary {
    /// Device identifier.
    pub device_id: i64,
    /// Number of stored records for the device.
    pub record_count: u64,
    /// Id of the newest record.
    pub last_id: i64,
    /// Timestamp of the newest record.
    pub last_captured_at: PrimitiveDateTime,
}
