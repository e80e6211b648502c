pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod tenant;
pub mod wal;

pub use engine::{Engine, EngineError};
pub use model::{
    Admission, BookingLineSpec, BookingStatus, CapacityRejection, DateRange, DayAvailability,
    normalize_utc,
};
