//! Hard ceilings that keep a single tenant from exhausting the process.

use crate::model::{DAY_MS, Ms};

pub const MAX_TENANTS: usize = 10_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_LOCATIONS_PER_TENANT: usize = 1_000;
pub const MAX_SECTIONS_PER_LOCATION: usize = 500;
pub const MAX_SEATS_PER_LOCATION: usize = 5_000;
pub const MAX_BLOCKED_PERIODS_PER_LOCATION: usize = 50_000;
pub const MAX_OCCUPANTS_PER_LOCATION: usize = 1_000_000;
pub const MAX_SPECIAL_EVENTS: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 64;
pub const MAX_REASON_LEN: usize = 1_024;

pub const MAX_PARTY_SIZE: u32 = 10_000;
pub const MAX_CAPACITY: u32 = 100_000;

/// Seats allocated or released in one request.
pub const MAX_BATCH_SIZE: usize = 1_000;
pub const MAX_IN_CLAUSE_IDS: usize = 1_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;
pub const MAX_RESERVATION_DURATION_MINUTES: u32 = 24 * 60;
pub const MIN_SLOT_INTERVAL_MINUTES: u32 = 5;
