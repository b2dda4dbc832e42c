mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod status;
#[cfg(test)]
mod tests;

pub use availability::{suggest_alternatives, SlotGrid};
pub use error::EngineError;
pub use mutations::{BookingPatch, CreateBooking, FieldAttrs};
pub use queries::BookingFilter;
pub use status::resolve_status;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedFieldState = Arc<RwLock<FieldState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
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

    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    let result = match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    };

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

/// Per-tenant booking engine: every field's state lives in memory, every
/// mutation goes through the WAL before it is applied and broadcast.
pub struct Engine {
    pub state: DashMap<Ulid, SharedFieldState>,
    /// Operating-hours grid for alternative-slot suggestions.
    pub grid: SlotGrid,
    pub notify: Arc<NotifyHub>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → field id.
    pub(super) booking_index: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a FieldState (no locking — caller holds the lock).
fn apply_to_field(fs: &mut FieldState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated {
            id,
            field_id,
            title,
            date,
            slot,
            kind,
            booked_by,
            notes,
            recurrence,
        } => {
            fs.insert_booking(Booking {
                id: *id,
                field_id: *field_id,
                title: title.clone(),
                date: *date,
                slot: *slot,
                kind: *kind,
                status: BookingStatus::Confirmed,
                booked_by: booked_by.clone(),
                notes: notes.clone(),
                recurrence: *recurrence,
            });
            index.insert(*id, *field_id);
        }
        Event::BookingUpdated {
            id,
            title,
            date,
            slot,
            kind,
            status,
            notes,
            ..
        } => {
            // Remove + reinsert: date/start are part of the sort key.
            if let Some(mut b) = fs.remove_booking(*id) {
                b.title = title.clone();
                b.date = *date;
                b.slot = *slot;
                b.kind = *kind;
                b.status = *status;
                b.notes = notes.clone();
                fs.insert_booking(b);
            }
        }
        Event::BookingCancelled { id, reason, .. } => {
            if let Some(pos) = fs.bookings.iter().position(|b| b.id == *id) {
                let b = &mut fs.bookings[pos];
                b.status = BookingStatus::Cancelled;
                if let Some(r) = reason {
                    let suffix = format!("Cancelled: {r}");
                    b.notes = Some(match b.notes.take() {
                        Some(existing) => format!("{existing}\n{suffix}"),
                        None => suffix,
                    });
                }
            }
        }
        Event::FieldUpdated {
            name,
            capacity,
            indoor,
            maintenance_notes,
            ..
        } => {
            fs.name = name.clone();
            fs.capacity = *capacity;
            fs.indoor = *indoor;
            fs.maintenance_notes = maintenance_notes.clone();
        }
        Event::FieldDeactivated { .. } => {
            fs.active = false;
        }
        // FieldCreated is handled at the DashMap level, not here
        Event::FieldCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, grid: SlotGrid, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            grid,
            notify,
            wal_tx,
            booking_index: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::FieldCreated {
                    id,
                    name,
                    capacity,
                    indoor,
                    maintenance_notes,
                } => {
                    let fs = FieldState::new(
                        *id,
                        name.clone(),
                        *capacity,
                        *indoor,
                        maintenance_notes.clone(),
                    );
                    engine.state.insert(*id, Arc::new(RwLock::new(fs)));
                }
                other => {
                    if let Some(field_id) = event_field_id(other)
                        && let Some(entry) = engine.state.get(&field_id)
                    {
                        let fs_arc = entry.clone();
                        let mut guard = fs_arc.try_write().expect("replay: uncontended write");
                        apply_to_field(&mut guard, other, &engine.booking_index);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to the WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn get_field(&self, id: &Ulid) -> Option<SharedFieldState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn field_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        field_id: Ulid,
        fs: &mut FieldState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_field(fs, event, &self.booking_index);
        self.notify.send(field_id, event);
        Ok(())
    }

    /// Lookup booking → field, get field, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<FieldState>), EngineError> {
        let field_id = self
            .field_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let fs = self
            .get_field(&field_id)
            .ok_or(EngineError::NotFound(field_id))?;
        let guard = fs.write_owned().await;
        Ok((field_id, guard))
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let field_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in field_ids {
            let entry = match self.state.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let fs_arc = entry.value().clone();
            drop(entry);
            let guard = fs_arc.read().await;

            events.push(Event::FieldCreated {
                id: guard.id,
                name: guard.name.clone(),
                capacity: guard.capacity,
                indoor: guard.indoor,
                maintenance_notes: guard.maintenance_notes.clone(),
            });
            if !guard.active {
                events.push(Event::FieldDeactivated { id: guard.id });
            }

            for b in &guard.bookings {
                // BookingCreated carries the notes verbatim (including any
                // cancellation suffix); a follow-up event restores the status.
                events.push(Event::BookingCreated {
                    id: b.id,
                    field_id: b.field_id,
                    title: b.title.clone(),
                    date: b.date,
                    slot: b.slot,
                    kind: b.kind,
                    booked_by: b.booked_by.clone(),
                    notes: b.notes.clone(),
                    recurrence: b.recurrence,
                });
                match b.status {
                    BookingStatus::Confirmed | BookingStatus::Completed => {}
                    BookingStatus::Cancelled => events.push(Event::BookingCancelled {
                        id: b.id,
                        field_id: b.field_id,
                        reason: None,
                    }),
                    BookingStatus::Pending => events.push(Event::BookingUpdated {
                        id: b.id,
                        field_id: b.field_id,
                        title: b.title.clone(),
                        date: b.date,
                        slot: b.slot,
                        kind: b.kind,
                        status: BookingStatus::Pending,
                        notes: b.notes.clone(),
                    }),
                }
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

/// Extract the field_id from an event (for non-FieldCreated events).
fn event_field_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { field_id, .. }
        | Event::BookingUpdated { field_id, .. }
        | Event::BookingCancelled { field_id, .. } => Some(*field_id),
        Event::FieldUpdated { id, .. } | Event::FieldDeactivated { id } => Some(*id),
        Event::FieldCreated { .. } => None,
    }
}
