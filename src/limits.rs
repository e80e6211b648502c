//! Hard engineering limits. These protect the engine from unbounded input;
//! they are not billing-plan ceilings (plan enforcement lives outside the core).

/// Max rentable item types per tenant.
pub const MAX_ITEMS_PER_TENANT: usize = 10_000;

/// Max booking lines retained on a single item (includes closed bookings
/// until compaction of the caller's history, so this is generous).
pub const MAX_LINES_PER_ITEM: usize = 100_000;

/// Max distinct item lines in one booking request.
pub const MAX_LINES_PER_BOOKING: usize = 100;

/// Max units on a single booking line.
pub const MAX_QUANTITY_PER_LINE: u32 = 1_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CUSTOMER_LEN: usize = 256;

/// Widest date range accepted for a booking or an availability query.
/// The day walk is O(days × lines); this bounds it.
pub const MAX_RANGE_DAYS: i64 = 3 * 366;

/// Calendar years the engine accepts. Anything outside is a validation error.
pub const MIN_BOOKING_YEAR: i32 = 2000;
pub const MAX_BOOKING_YEAR: i32 = 2200;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;
