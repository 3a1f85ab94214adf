//! Hard caps on what a single server will hold or accept.

pub const MAX_BUSINESSES: usize = 100_000;
pub const MAX_SERVICES_PER_BUSINESS: usize = 1_000;
/// Rows per business, cancelled ones included (until compaction drops them).
pub const MAX_APPOINTMENTS_PER_BUSINESS: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CUSTOMER_ID_LEN: usize = 128;

pub const DEFAULT_SLOT_STEP_MINUTES: u16 = 30;
pub const MIN_SLOT_STEP_MINUTES: u16 = 5;
pub const MAX_SLOT_STEP_MINUTES: u16 = 720;
pub const DEFAULT_SERVICE_DURATION_MINUTES: u16 = 30;
pub const MAX_SERVICE_DURATION_MINUTES: u16 = 1_440;

/// Widest date range a single occupancy/appointment query may cover.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 400;
/// How far ahead of today a reservation may be placed.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 366;

pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9_999;

pub const MAX_CONNECTIONS: usize = 256;
