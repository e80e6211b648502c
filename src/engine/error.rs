use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Start date after end date.
    InvalidRange { start: NaiveDate, end: NaiveDate },
    /// Line quantity outside [1, MAX_QUANTITY_PER_LINE].
    InvalidQuantity(u32),
    /// The same item appears twice in one booking request.
    DuplicateLineItem(Ulid),
    /// Illegal status transition.
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// The booking is Returned or Cancelled and can no longer be edited.
    BookingClosed(Ulid),
    /// The item still has lines holding capacity.
    HasActiveBookings(Ulid),
    LimitExceeded(&'static str),
    /// An item changed between the optimistic check and the commit. Consumed
    /// internally by the admission retry; never escapes `admit_booking`.
    RaceLost(Ulid),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid date range: {start} > {end}")
            }
            EngineError::InvalidQuantity(q) => write!(f, "invalid quantity: {q}"),
            EngineError::DuplicateLineItem(id) => {
                write!(f, "item {id} appears more than once in the request")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "illegal status transition: {from} -> {to}")
            }
            EngineError::BookingClosed(id) => {
                write!(f, "booking {id} is closed and cannot be edited")
            }
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot delete item {id}: active bookings reserve it")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::RaceLost(id) => {
                write!(f, "item {id} changed during admission, retry")
            }
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
