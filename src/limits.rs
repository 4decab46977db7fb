use crate::model::{DAY_MS, HOUR_MS, Ms};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// No single slot may be longer than a day.
pub const MAX_SLOT_DURATION_MS: Ms = DAY_MS;

pub const MAX_REASON_LEN: usize = 2_000;
pub const MAX_SLOTS_PER_PROFESSIONAL: usize = 100_000;

pub const DEFAULT_BUFFER_MINUTES: u32 = 0;
pub const MAX_BUFFER_MINUTES: u32 = 24 * 60;

pub const DEFAULT_PATIENT_LEAD_TIME_MS: Ms = 24 * HOUR_MS;

pub const DEFAULT_SUGGESTION_LIMIT: usize = 6;
pub const MAX_SUGGESTION_LIMIT: usize = 50;
pub const DEFAULT_SUGGESTION_WINDOW_MS: Ms = 7 * DAY_MS;

pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1_000;
