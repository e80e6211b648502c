use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, admission, ledger};

impl Engine {
    /// Day-by-day reservation/availability table for one item, both endpoints
    /// of `range` included. Pass the booking's own id in `exclude` when
    /// rendering an edit form, so the booking does not shadow itself.
    /// Read-only and idempotent.
    pub async fn check_availability(
        &self,
        item_id: Ulid,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Vec<DayAvailability>, EngineError> {
        admission::validate_range(&range)?;
        let item = self
            .item_state(&item_id)
            .ok_or(EngineError::NotFound(item_id))?;
        let guard = item.read().await;

        let lines: Vec<LineEntry> = guard.overlapping(&range, exclude).cloned().collect();
        metrics::counter!(crate::observability::AVAILABILITY_QUERIES_TOTAL).increment(1);
        Ok(ledger::day_table(guard.total_quantity, &lines, &range))
    }

    pub async fn get_item(&self, id: Ulid) -> Option<ItemInfo> {
        let item = self.item_state(&id)?;
        let guard = item.read().await;
        Some(ItemInfo {
            id: guard.id,
            name: guard.name.clone(),
            unit: guard.unit.clone(),
            total_quantity: guard.total_quantity,
            price: guard.price,
        })
    }

    /// Snapshot of every item. Waits out write locks rather than assuming an
    /// uncontended read; commits hold item locks across the WAL flush.
    pub async fn list_items(&self) -> Vec<ItemInfo> {
        let items: Vec<_> = self.items.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(items.len());
        for item in items {
            let guard = item.read().await;
            infos.push(ItemInfo {
                id: guard.id,
                name: guard.name.clone(),
                unit: guard.unit.clone(),
                total_quantity: guard.total_quantity,
                price: guard.price,
            });
        }
        infos
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<BookingInfo> {
        self.bookings.get(id).map(|record| BookingInfo {
            id: *id,
            customer: record.customer.clone(),
            range: record.range,
            status: record.status,
            lines: record.lines.clone(),
        })
    }

    /// Every booking line on an item, open and closed, in range-start order.
    pub async fn bookings_for_item(&self, item_id: Ulid) -> Result<Vec<LineEntry>, EngineError> {
        let item = self
            .item_state(&item_id)
            .ok_or(EngineError::NotFound(item_id))?;
        let guard = item.read().await;
        Ok(guard.lines.clone())
    }
}
