use chrono::NaiveDate;

use crate::model::{DateRange, DayAvailability, LineEntry};

// ── Day-Granular Reservation Ledger ──────────────────────────────
//
// Two bookings that overlap only partially must not be treated as fully
// concurrent across their combined span, so reservation is summed per
// calendar day, not per range. The per-day walk is exact for any multiplicity
// of partially-overlapping intervals.

/// Units reserved on one calendar day: the sum of quantities over lines whose
/// status holds capacity and whose range contains the day. Lines with a
/// non-reserving status are ignored regardless of overlap.
pub fn reserved_on_day(lines: &[LineEntry], day: NaiveDate) -> u64 {
    lines
        .iter()
        .filter(|l| l.status.reserves() && l.range.contains(day))
        .map(|l| l.quantity as u64)
        .sum()
}

/// Per-day reservation/availability table over `range`, both endpoints
/// included. `available` goes negative when existing bookings already exceed
/// capacity — a state admission should have prevented, but the ledger reports
/// it rather than failing.
pub fn day_table(total: u32, lines: &[LineEntry], range: &DateRange) -> Vec<DayAvailability> {
    range
        .days()
        .map(|date| {
            let reserved = reserved_on_day(lines, date);
            DayAvailability {
                date,
                reserved,
                available: total as i64 - reserved as i64,
                total,
            }
        })
        .collect()
}

/// Shortfall on the first day that cannot take `requested` more units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub date: NaiveDate,
    pub reserved: u64,
    pub available: i64,
}

/// Walk `range` ascending and return the earliest day where
/// `reserved + requested > total`, or None if every day fits. The caller
/// reports this day; the walk is deterministic, so the reported conflict is
/// always the first one, not an arbitrary one.
pub fn first_shortfall(
    total: u32,
    lines: &[LineEntry],
    range: &DateRange,
    requested: u32,
) -> Option<Shortfall> {
    for date in range.days() {
        let reserved = reserved_on_day(lines, date);
        if reserved + requested as u64 > total as u64 {
            return Some(Shortfall {
                date,
                reserved,
                available: total as i64 - reserved as i64,
            });
        }
    }
    None
}
