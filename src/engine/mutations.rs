use rust_decimal::Decimal;
use tokio::sync::{OwnedRwLockWriteGuard, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::admission::{self, ItemSnapshot};
use super::{Engine, EngineError, WalCommand};

/// How an accepted admission is committed.
enum AdmitKind<'a> {
    Create { customer: &'a str },
    Reschedule,
}

type ItemGuards = Vec<(Ulid, OwnedRwLockWriteGuard<ItemState>)>;

fn guard_mut(guards: &mut ItemGuards, id: Ulid) -> &mut ItemState {
    let (_, guard) = guards
        .iter_mut()
        .find(|(gid, _)| *gid == id)
        .expect("guard for locked item");
    guard
}

impl Engine {
    // ── Item CRUD ────────────────────────────────────────

    pub async fn create_item(
        &self,
        id: Ulid,
        name: String,
        unit: Option<String>,
        total_quantity: u32,
        price: Option<Decimal>,
    ) -> Result<(), EngineError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("item name length"));
        }
        if self.items.len() >= MAX_ITEMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many items"));
        }
        if self.items.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ItemCreated {
            id,
            name,
            unit,
            total_quantity,
            price,
        };
        self.wal_append(&event).await?;
        self.replay_apply(&event);
        info!("item {id} created (capacity {total_quantity})");
        Ok(())
    }

    /// Update item metadata and capacity. Lowering the capacity below what is
    /// already reserved is allowed — the ledger reports the negative
    /// availability and new admissions are refused until bookings drain.
    pub async fn update_item(
        &self,
        id: Ulid,
        name: String,
        unit: Option<String>,
        total_quantity: u32,
        price: Option<Decimal>,
    ) -> Result<(), EngineError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("item name length"));
        }
        let item = self.item_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = item.write().await;

        let event = Event::ItemUpdated {
            id,
            name: name.clone(),
            unit: unit.clone(),
            total_quantity,
            price,
        };
        self.wal_append(&event).await?;
        guard.name = name;
        guard.unit = unit;
        guard.total_quantity = total_quantity;
        guard.price = price;
        guard.version += 1;
        Ok(())
    }

    /// Delete an item. Refused while any booking line still reserves it;
    /// closed lines (returned/cancelled history) do not block deletion.
    pub async fn delete_item(&self, id: Ulid) -> Result<(), EngineError> {
        let item = self.item_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = item.write().await;
        if guard.lines.iter().any(|l| l.status.reserves()) {
            return Err(EngineError::HasActiveBookings(id));
        }

        let event = Event::ItemDeleted { id };
        self.wal_append(&event).await?;
        self.items.remove(&id);
        drop(guard);
        info!("item {id} deleted");
        Ok(())
    }

    // ── Admission gate ───────────────────────────────────

    /// Admit and persist a new booking in one atomic step. A capacity
    /// shortfall is an `Ok(Admission::Rejected(..))` outcome carrying the
    /// first conflicting day, never an error.
    pub async fn admit_booking(
        &self,
        id: Ulid,
        customer: String,
        range: DateRange,
        lines: Vec<BookingLineSpec>,
    ) -> Result<Admission, EngineError> {
        if customer.len() > MAX_CUSTOMER_LEN {
            return Err(EngineError::LimitExceeded("customer reference length"));
        }
        admission::validate_range(&range)?;
        admission::validate_lines(&lines)?;

        let serial = self.booking_lock(id);
        let _serial = serial.lock().await;
        if self.bookings.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let kind = AdmitKind::Create {
            customer: &customer,
        };
        self.admit(id, kind, range, &lines, None).await
    }

    /// Re-admit an existing booking with a new range and/or lines. The
    /// booking's own reservation is excluded from its overlap check so it
    /// cannot conflict with itself.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        range: DateRange,
        lines: Vec<BookingLineSpec>,
    ) -> Result<Admission, EngineError> {
        admission::validate_range(&range)?;
        admission::validate_lines(&lines)?;

        // Serialize against other mutations of this booking: the item lock
        // set is derived from the booking's current lines, which must not
        // move underneath us between here and the commit.
        let serial = self.booking_lock(id);
        let _serial = serial.lock().await;
        {
            let record = self.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
            if !record.status.reserves() {
                return Err(EngineError::BookingClosed(id));
            }
        }

        self.admit(id, AdmitKind::Reschedule, range, &lines, Some(id))
            .await
    }

    async fn admit(
        &self,
        id: Ulid,
        kind: AdmitKind<'_>,
        range: DateRange,
        lines: &[BookingLineSpec],
        exclude: Option<Ulid>,
    ) -> Result<Admission, EngineError> {
        let outcome = match self.admit_optimistic(id, &kind, range, lines, exclude).await {
            Err(EngineError::RaceLost(item)) => {
                // Lost the race between snapshot and commit exactly once is
                // tolerated: redo the whole check while holding the write
                // locks. Capacity consumed by the interleaved writer then
                // shows up in the ledger as an ordinary rejection.
                metrics::counter!(crate::observability::ADMISSION_RETRIES_TOTAL).increment(1);
                debug!("booking {id}: item {item} changed mid-admission, retrying locked");
                self.admit_locked(id, &kind, range, lines, exclude).await
            }
            other => other,
        }?;

        match &outcome {
            Admission::Accepted => {
                metrics::counter!(crate::observability::ADMISSIONS_TOTAL).increment(1);
            }
            Admission::Rejected(r) => {
                metrics::counter!(crate::observability::REJECTIONS_TOTAL).increment(1);
                debug!(
                    "booking {id} rejected: {} of {} needs {} more on {}",
                    r.reserved, r.total, r.requested, r.date
                );
            }
        }
        Ok(outcome)
    }

    /// Fast path: decide from read-locked snapshots, then commit under write
    /// locks if no snapshot went stale. Availability queries keep flowing
    /// while the ledger walk runs.
    async fn admit_optimistic(
        &self,
        id: Ulid,
        kind: &AdmitKind<'_>,
        range: DateRange,
        lines: &[BookingLineSpec],
        exclude: Option<Ulid>,
    ) -> Result<Admission, EngineError> {
        let mut snapshots = Vec::with_capacity(lines.len());
        for line in lines {
            let item = self
                .item_state(&line.item_id)
                .ok_or(EngineError::NotFound(line.item_id))?;
            let guard = item.read().await;
            if guard.lines.len() >= MAX_LINES_PER_ITEM {
                return Err(EngineError::LimitExceeded("too many lines on item"));
            }
            snapshots.push(ItemSnapshot::capture(&guard, &range, exclude));
        }

        if let Admission::Rejected(r) = admission::decide(&snapshots, lines, &range) {
            return Ok(Admission::Rejected(r));
        }

        let mut guards = self.lock_items(&self.touched_items(id, kind, lines)).await?;
        for snapshot in &snapshots {
            let current = guard_mut(&mut guards, snapshot.id);
            if current.version != snapshot.version {
                return Err(EngineError::RaceLost(snapshot.id));
            }
        }
        self.commit_admission(id, kind, range, lines, &mut guards)
            .await?;
        Ok(Admission::Accepted)
    }

    /// Slow path after a lost race: snapshot and decide while already holding
    /// every write lock, so nothing can move between check and commit.
    async fn admit_locked(
        &self,
        id: Ulid,
        kind: &AdmitKind<'_>,
        range: DateRange,
        lines: &[BookingLineSpec],
        exclude: Option<Ulid>,
    ) -> Result<Admission, EngineError> {
        let mut guards = self.lock_items(&self.touched_items(id, kind, lines)).await?;

        let mut snapshots = Vec::with_capacity(lines.len());
        for line in lines {
            let guard = guard_mut(&mut guards, line.item_id);
            if guard.lines.len() >= MAX_LINES_PER_ITEM {
                return Err(EngineError::LimitExceeded("too many lines on item"));
            }
            snapshots.push(ItemSnapshot::capture(guard, &range, exclude));
        }

        if let Admission::Rejected(r) = admission::decide(&snapshots, lines, &range) {
            return Ok(Admission::Rejected(r));
        }
        self.commit_admission(id, kind, range, lines, &mut guards)
            .await?;
        Ok(Admission::Accepted)
    }

    /// Items whose lock the commit needs: the requested lines, plus, when
    /// rescheduling, the items the booking currently sits on (their line
    /// entries get moved). An active booking pins its items against deletion,
    /// so the prior item ids are still resolvable.
    fn touched_items(&self, id: Ulid, kind: &AdmitKind<'_>, lines: &[BookingLineSpec]) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = lines.iter().map(|l| l.item_id).collect();
        if matches!(kind, AdmitKind::Reschedule)
            && let Some(record) = self.bookings.get(&id)
        {
            ids.extend(record.lines.iter().map(|l| l.item_id));
        }
        ids
    }

    async fn commit_admission(
        &self,
        id: Ulid,
        kind: &AdmitKind<'_>,
        range: DateRange,
        lines: &[BookingLineSpec],
        guards: &mut ItemGuards,
    ) -> Result<(), EngineError> {
        match kind {
            AdmitKind::Create { customer } => {
                let event = Event::BookingAdmitted {
                    id,
                    customer: (*customer).to_string(),
                    range,
                    lines: lines.to_vec(),
                };
                self.wal_append(&event).await?;
                self.bookings.insert(
                    id,
                    BookingRecord {
                        customer: (*customer).to_string(),
                        range,
                        status: BookingStatus::Confirmed,
                        lines: lines.to_vec(),
                    },
                );
                for line in lines {
                    guard_mut(guards, line.item_id).insert_line(LineEntry {
                        booking_id: id,
                        range,
                        status: BookingStatus::Confirmed,
                        quantity: line.quantity,
                    });
                }
            }
            AdmitKind::Reschedule => {
                // The caller holds this booking's mutex, so these are the same
                // lines the item lock set was computed from.
                let (status, prior_lines) = {
                    let record = self.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
                    (record.status, record.lines.clone())
                };

                let event = Event::BookingRescheduled {
                    id,
                    range,
                    lines: lines.to_vec(),
                };
                self.wal_append(&event).await?;

                for old in &prior_lines {
                    guard_mut(guards, old.item_id).remove_line(id);
                }
                for line in lines {
                    guard_mut(guards, line.item_id).insert_line(LineEntry {
                        booking_id: id,
                        range,
                        status,
                        quantity: line.quantity,
                    });
                }
                if let Some(mut record) = self.bookings.get_mut(&id) {
                    record.range = range;
                    record.lines = lines.to_vec();
                }
            }
        }
        Ok(())
    }

    // ── Booking lifecycle ────────────────────────────────

    /// Apply a status transition (Confirmed → Out → Returned, or → Cancelled
    /// from either active state). Returning or cancelling releases the
    /// booking's capacity on every item it touches.
    pub async fn change_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<(), EngineError> {
        // Serialized with reschedules, so the lines read here are the lines
        // the commit will touch.
        let serial = self.booking_lock(id);
        let _serial = serial.lock().await;

        let item_ids: Vec<Ulid> = {
            let record = self.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
            if !record.status.can_transition_to(status) {
                return Err(EngineError::InvalidTransition {
                    from: record.status,
                    to: status,
                });
            }
            record.lines.iter().map(|l| l.item_id).collect()
        };

        // Item entries for this booking may sit on since-deleted items; lock
        // only the ones still present.
        let live_ids: Vec<Ulid> = item_ids
            .iter()
            .copied()
            .filter(|iid| self.items.contains_key(iid))
            .collect();
        let mut guards = self.lock_items(&live_ids).await?;

        let event = Event::BookingStatusChanged { id, status };
        self.wal_append(&event).await?;
        if let Some(mut record) = self.bookings.get_mut(&id) {
            record.status = status;
        }
        for (_, guard) in guards.iter_mut() {
            guard.set_line_status(id, status);
        }
        debug!("booking {id} -> {status}");
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL with the minimal event set that recreates the current
    /// state: one create per item, one admission (plus a status event when
    /// not Confirmed) per booking.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let item_states: Vec<_> = self.items.iter().map(|e| e.value().clone()).collect();
        for item in item_states {
            let guard = item.read().await;
            events.push(Event::ItemCreated {
                id: guard.id,
                name: guard.name.clone(),
                unit: guard.unit.clone(),
                total_quantity: guard.total_quantity,
                price: guard.price,
            });
        }

        for entry in self.bookings.iter() {
            let id = *entry.key();
            let record = entry.value();
            events.push(Event::BookingAdmitted {
                id,
                customer: record.customer.clone(),
                range: record.range,
                lines: record.lines.clone(),
            });
            if record.status != BookingStatus::Confirmed {
                events.push(Event::BookingStatusChanged {
                    id,
                    status: record.status,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
