//! Hard caps on untrusted input. Exceeding one is a `LimitExceeded` error.

pub const MAX_USERS: usize = 1_000_000;
pub const MAX_PROPERTIES: usize = 100_000;
pub const MAX_RENTALS_PER_PROPERTY: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ADDRESS_FIELD_LEN: usize = 256;

/// Largest nightly rate accepted, in cents.
pub const MAX_DAILY_RATE_CENTS: i64 = 100_000_000;
