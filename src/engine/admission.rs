use std::collections::HashSet;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::ledger;
use super::EngineError;

/// What the admission decision needs to know about one item, captured under a
/// lock. `lines` holds only the entries overlapping the requested range;
/// `version` lets the commit detect that the item changed after the snapshot.
#[derive(Debug, Clone)]
pub(crate) struct ItemSnapshot {
    pub id: Ulid,
    pub name: String,
    pub total_quantity: u32,
    pub version: u64,
    pub lines: Vec<LineEntry>,
}

impl ItemSnapshot {
    pub fn capture(item: &ItemState, range: &DateRange, exclude: Option<Ulid>) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            total_quantity: item.total_quantity,
            version: item.version,
            lines: item.overlapping(range, exclude).cloned().collect(),
        }
    }
}

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.start > range.end {
        return Err(EngineError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    if !date_in_supported_window(range.start) || !date_in_supported_window(range.end) {
        return Err(EngineError::LimitExceeded("date outside supported window"));
    }
    if range.num_days() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

pub(crate) fn validate_lines(lines: &[BookingLineSpec]) -> Result<(), EngineError> {
    if lines.is_empty() {
        return Err(EngineError::LimitExceeded("booking has no lines"));
    }
    if lines.len() > MAX_LINES_PER_BOOKING {
        return Err(EngineError::LimitExceeded("too many lines in booking"));
    }
    let mut seen = HashSet::with_capacity(lines.len());
    for line in lines {
        if line.quantity == 0 || line.quantity > MAX_QUANTITY_PER_LINE {
            return Err(EngineError::InvalidQuantity(line.quantity));
        }
        if !seen.insert(line.item_id) {
            return Err(EngineError::DuplicateLineItem(line.item_id));
        }
    }
    Ok(())
}

/// The admission decision proper. `snapshots` is parallel to `lines` (same
/// submitted order); each item is checked day-by-day ascending and the first
/// shortfall encountered ends the walk. Rejection is a value, not an error.
pub(crate) fn decide(
    snapshots: &[ItemSnapshot],
    lines: &[BookingLineSpec],
    range: &DateRange,
) -> Admission {
    debug_assert_eq!(snapshots.len(), lines.len());
    for (snapshot, line) in snapshots.iter().zip(lines) {
        if let Some(shortfall) =
            ledger::first_shortfall(snapshot.total_quantity, &snapshot.lines, range, line.quantity)
        {
            return Admission::Rejected(CapacityRejection {
                item_id: snapshot.id,
                item_name: snapshot.name.clone(),
                date: shortfall.date,
                requested: line.quantity,
                reserved: shortfall.reserved,
                available: shortfall.available,
                total: snapshot.total_quantity,
            });
        }
    }
    Admission::Accepted
}
