use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Normalize a wall-clock timestamp to the canonical calendar date.
///
/// Every date entering the engine must pass through this exactly once, at the
/// boundary. Internally the engine only ever compares `NaiveDate` values, so
/// time-of-day and timezone drift cannot reach the overlap test.
pub fn normalize_utc(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// Closed date interval `[start, end]`. Both endpoints are occupied days:
/// `start == end` is a one-day booking, not a zero-day one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Number of occupied days, endpoints inclusive.
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Closed-interval overlap test. This is the predicate that makes a
    /// single-day range overlap any range containing that day.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Walk every day in the range, ascending, both endpoints included.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }
}

/// Booking lifecycle. Only `Confirmed` and `Out` hold capacity; `Returned`
/// and `Cancelled` never reserve regardless of date overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Out,
    Returned,
    Cancelled,
}

impl BookingStatus {
    pub fn reserves(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Out)
    }

    /// Legal transitions: Confirmed → Out → Returned, and → Cancelled from
    /// either active state. Terminal states never transition.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Confirmed, BookingStatus::Out)
                | (BookingStatus::Out, BookingStatus::Returned)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
                | (BookingStatus::Out, BookingStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Out => "out",
            BookingStatus::Returned => "returned",
            BookingStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One requested reservation line: "N units of this item".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingLineSpec {
    pub item_id: Ulid,
    pub quantity: u32,
}

/// Per-item projection of a booking line — exactly the fields the reservation
/// ledger needs. Kept in the item state even after the booking closes; the
/// ledger filters by status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry {
    pub booking_id: Ulid,
    pub range: DateRange,
    pub status: BookingStatus,
    pub quantity: u32,
}

/// In-memory state of one rentable item type.
#[derive(Debug, Clone)]
pub struct ItemState {
    pub id: Ulid,
    pub name: String,
    /// Unit label shown next to quantities ("pcs", "sets", ...).
    pub unit: Option<String>,
    /// Capacity ceiling for every day. Fixed, not derived.
    pub total_quantity: u32,
    pub price: Option<Decimal>,
    /// Bumped on every mutation; backs optimistic admission.
    pub version: u64,
    /// Booking lines touching this item, sorted by `range.start`.
    pub lines: Vec<LineEntry>,
}

impl ItemState {
    pub fn new(
        id: Ulid,
        name: String,
        unit: Option<String>,
        total_quantity: u32,
        price: Option<Decimal>,
    ) -> Self {
        Self {
            id,
            name,
            unit,
            total_quantity,
            price,
            version: 0,
            lines: Vec::new(),
        }
    }

    /// Insert a line maintaining sort order by range start.
    pub fn insert_line(&mut self, entry: LineEntry) {
        let pos = self
            .lines
            .binary_search_by_key(&entry.range.start, |l| l.range.start)
            .unwrap_or_else(|e| e);
        self.lines.insert(pos, entry);
        self.version += 1;
    }

    /// Remove the line belonging to a booking, if present.
    pub fn remove_line(&mut self, booking_id: Ulid) -> Option<LineEntry> {
        let pos = self.lines.iter().position(|l| l.booking_id == booking_id)?;
        self.version += 1;
        Some(self.lines.remove(pos))
    }

    /// Update the status carried by a booking's line. Returns false if the
    /// booking has no line on this item.
    pub fn set_line_status(&mut self, booking_id: Ulid, status: BookingStatus) -> bool {
        match self.lines.iter_mut().find(|l| l.booking_id == booking_id) {
            Some(line) => {
                line.status = status;
                self.version += 1;
                true
            }
            None => false,
        }
    }

    /// Lines whose date range intersects the query range, minus the excluded
    /// booking. Status is NOT filtered here — the ledger decides what reserves.
    /// Binary search skips lines starting after `query.end`.
    pub fn overlapping<'a>(
        &'a self,
        query: &'a DateRange,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &'a LineEntry> {
        // Lines are sorted by start; everything past this point starts after
        // the query ends and cannot overlap a closed interval.
        let right_bound = self.lines.partition_point(|l| l.range.start <= query.end);
        self.lines[..right_bound]
            .iter()
            .filter(move |l| l.range.end >= query.start && Some(l.booking_id) != exclude)
    }
}

/// Booking metadata kept alongside the per-item projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRecord {
    pub customer: String,
    pub range: DateRange,
    pub status: BookingStatus,
    pub lines: Vec<BookingLineSpec>,
}

/// WAL record format — flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ItemCreated {
        id: Ulid,
        name: String,
        unit: Option<String>,
        total_quantity: u32,
        price: Option<Decimal>,
    },
    ItemUpdated {
        id: Ulid,
        name: String,
        unit: Option<String>,
        total_quantity: u32,
        price: Option<Decimal>,
    },
    ItemDeleted {
        id: Ulid,
    },
    BookingAdmitted {
        id: Ulid,
        customer: String,
        range: DateRange,
        lines: Vec<BookingLineSpec>,
    },
    BookingRescheduled {
        id: Ulid,
        range: DateRange,
        lines: Vec<BookingLineSpec>,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

/// One row of the availability day table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub reserved: u64,
    /// `total - reserved`. Negative when pre-existing bookings already
    /// oversubscribe the item; the engine reports that, it does not panic.
    pub available: i64,
    pub total: u32,
}

/// Structured shortfall data for a refused admission. A rejection is an
/// expected outcome, not an error — callers render it on the booking form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityRejection {
    pub item_id: Ulid,
    pub item_name: String,
    /// Earliest conflicting day found by the ascending walk.
    pub date: NaiveDate,
    pub requested: u32,
    pub reserved: u64,
    pub available: i64,
    pub total: u32,
}

/// Outcome of the admission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(CapacityRejection),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: Ulid,
    pub name: String,
    pub unit: Option<String>,
    pub total_quantity: u32,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub customer: String,
    pub range: DateRange,
    pub status: BookingStatus,
    pub lines: Vec<BookingLineSpec>,
}

/// Reject dates outside the supported window early, so arithmetic on day
/// walks stays well away from chrono's representable limits.
pub fn date_in_supported_window(date: NaiveDate) -> bool {
    (crate::limits::MIN_BOOKING_YEAR..=crate::limits::MAX_BOOKING_YEAR).contains(&date.year())
}
