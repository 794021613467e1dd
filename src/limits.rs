//! Deployment limits on top of the booking rules. A request outside them fails
//! with [`BookingError::Validation`](crate::BookingError::Validation) and
//! changes nothing.

/// Earliest year a rental or blackout window may touch.
pub const MIN_VALID_YEAR: i32 = 1970;

/// Latest year a rental or blackout window may touch.
pub const MAX_VALID_YEAR: i32 = 9999;

/// Longest rental, counted in days (both ends inclusive).
pub const MAX_RENTAL_DAYS: i64 = 366;

/// Widest window accepted by availability queries, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

pub const MAX_RENTALS_PER_VEHICLE: usize = 50_000;
pub const MAX_WINDOWS_PER_VEHICLE: usize = 10_000;

/// Max length of a blackout window reason.
pub const MAX_REASON_LEN: usize = 512;
