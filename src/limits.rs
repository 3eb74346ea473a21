use crate::model::Ms;

// Per-tenant caps
pub const MAX_PROFESSIONALS_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_PROFESSIONAL: usize = 100_000;
pub const MAX_TENANTS: usize = 10_000;

// Field sizes
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REF_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_ACTOR_LEN: usize = 256;

// Time
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0; // 1970-01-01
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_800_000; // 9999-12-31
pub const MAX_BOOKING_DURATION_MS: Ms = 24 * 3_600_000;

/// Minutes in a day. Work templates and slot durations never exceed it.
pub const MINUTES_PER_DAY: u32 = 1440;
/// Fixed stride between candidate slot starts.
pub const SLOT_STRIDE_MINUTES: u32 = 30;
pub const DEFAULT_SLOT_DURATION_MINUTES: u32 = 60;
