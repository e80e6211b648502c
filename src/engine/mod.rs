mod admission;
mod error;
mod ledger;
mod mutations;
mod queries;

pub use error::EngineError;
pub use ledger::{Shortfall, day_table, first_shortfall, reserved_on_day};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedItemState = Arc<RwLock<ItemState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task owning the WAL. Appends are batched: the first Append
/// blocks, everything immediately available is drained into the same batch,
/// one fsync covers the lot, and every sender gets the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel drained
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes don't
    // leak into the next batch (these callers are told the batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The overlap accounting engine for one tenant. Items and bookings live in
/// memory behind per-item locks; every mutation is WAL-logged before it is
/// applied, so a restart replays to the same state.
pub struct Engine {
    pub(crate) items: DashMap<Ulid, SharedItemState>,
    pub(crate) bookings: DashMap<Ulid, BookingRecord>,
    booking_locks: DashMap<Ulid, Arc<Mutex<()>>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            items: DashMap::new(),
            bookings: DashMap::new(),
            booking_locks: DashMap::new(),
            wal_tx,
        };

        // Replay: we are the sole owner of every Arc here, so try_write always
        // succeeds immediately. blocking_write is off the table because this
        // can run inside an async context (lazy tenant creation).
        for event in &events {
            engine.replay_apply(event);
        }

        Ok(engine)
    }

    fn replay_apply(&self, event: &Event) {
        match event {
            Event::ItemCreated {
                id,
                name,
                unit,
                total_quantity,
                price,
            } => {
                let state =
                    ItemState::new(*id, name.clone(), unit.clone(), *total_quantity, *price);
                self.items.insert(*id, Arc::new(RwLock::new(state)));
            }
            Event::ItemUpdated {
                id,
                name,
                unit,
                total_quantity,
                price,
            } => {
                if let Some(entry) = self.items.get(id) {
                    let item = entry.value().clone();
                    let mut guard = item.try_write().expect("replay: uncontended write");
                    guard.name = name.clone();
                    guard.unit = unit.clone();
                    guard.total_quantity = *total_quantity;
                    guard.price = *price;
                    guard.version += 1;
                }
            }
            Event::ItemDeleted { id } => {
                self.items.remove(id);
            }
            Event::BookingAdmitted {
                id,
                customer,
                range,
                lines,
            } => {
                self.bookings.insert(
                    *id,
                    BookingRecord {
                        customer: customer.clone(),
                        range: *range,
                        status: BookingStatus::Confirmed,
                        lines: lines.clone(),
                    },
                );
                for line in lines {
                    if let Some(entry) = self.items.get(&line.item_id) {
                        let item = entry.value().clone();
                        let mut guard = item.try_write().expect("replay: uncontended write");
                        guard.insert_line(LineEntry {
                            booking_id: *id,
                            range: *range,
                            status: BookingStatus::Confirmed,
                            quantity: line.quantity,
                        });
                    }
                }
            }
            Event::BookingRescheduled { id, range, lines } => {
                let Some(mut record) = self.bookings.get_mut(id) else {
                    return;
                };
                for old in &record.lines {
                    if let Some(entry) = self.items.get(&old.item_id) {
                        let item = entry.value().clone();
                        let mut guard = item.try_write().expect("replay: uncontended write");
                        guard.remove_line(*id);
                    }
                }
                let status = record.status;
                for line in lines {
                    if let Some(entry) = self.items.get(&line.item_id) {
                        let item = entry.value().clone();
                        let mut guard = item.try_write().expect("replay: uncontended write");
                        guard.insert_line(LineEntry {
                            booking_id: *id,
                            range: *range,
                            status,
                            quantity: line.quantity,
                        });
                    }
                }
                record.range = *range;
                record.lines = lines.clone();
            }
            Event::BookingStatusChanged { id, status } => {
                let Some(mut record) = self.bookings.get_mut(id) else {
                    return;
                };
                record.status = *status;
                for line in &record.lines {
                    if let Some(entry) = self.items.get(&line.item_id) {
                        let item = entry.value().clone();
                        let mut guard = item.try_write().expect("replay: uncontended write");
                        guard.set_line_status(*id, *status);
                    }
                }
            }
        }
    }

    /// Write an event via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(crate) fn item_state(&self, id: &Ulid) -> Option<SharedItemState> {
        self.items.get(id).map(|e| e.value().clone())
    }

    /// Acquire write locks on the given items in sorted id order. Every
    /// multi-item write path goes through this, which is what makes the
    /// lock acquisition deadlock-free.
    pub(super) async fn lock_items(
        &self,
        ids: &[Ulid],
    ) -> Result<Vec<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ItemState>)>, EngineError> {
        let mut sorted: Vec<Ulid> = ids.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            let item = self.item_state(&id).ok_or(EngineError::NotFound(id))?;
            guards.push((id, item.write_owned().await));
        }
        Ok(guards)
    }

    /// Mutex serializing mutations of one booking. Reschedules and status
    /// changes derive their item lock set from the booking's current lines;
    /// holding this for the whole mutation keeps that set from going stale
    /// under a concurrent mutation of the same booking. Always acquired
    /// before any item lock.
    pub(super) fn booking_lock(&self, id: Ulid) -> Arc<Mutex<()>> {
        self.booking_locks.entry(id).or_default().clone()
    }
}
