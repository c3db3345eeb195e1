mod allocation;
mod availability;
mod calendar;
mod conflict;
mod error;
mod mutations;
mod queries;
mod state;
pub mod transitions;

pub use availability::{blocked_seats, booked_seats, remaining_seats};
pub use calendar::{Calendar, date_of, day_of_week, midnight_ms, slot_starts, window_from_minutes};
pub use conflict::now_ms;
pub use error::EngineError;
pub use state::LocationState;
pub use transitions::Action;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedLocationState = Arc<RwLock<LocationState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        events: Vec<Event>,
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

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the shared outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (events, _) in batch {
        if let Err(e) = wal.append_buffered(events) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { events, response } => {
            let result = wal.append_buffered(&events).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// One restaurant's seating state.
///
/// Lock order: `commit_gate` (shared) → `registry` → `calendar` → location
/// locks in ascending id order. State is only touched after its WAL record is durable.
pub struct Engine {
    pub state: DashMap<Ulid, SharedLocationState>,
    pub(super) calendar: RwLock<Calendar>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: entity (section/seat/block/occupant/allocation) id → location id
    pub(super) entity_to_location: DashMap<Ulid, Ulid>,
    /// Held shared by every mutation and exclusively by compaction, so a
    /// snapshot never misses a record that is durable but not yet applied.
    pub(super) commit_gate: RwLock<()>,
    /// Serializes location creation/deletion and default-flag moves.
    pub(super) registry: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Rebuild into plain maps first; nothing else can see this state yet.
        let entity_to_location = DashMap::new();
        let mut calendar = Calendar::default();
        let mut locations: HashMap<Ulid, LocationState> = HashMap::new();
        for event in &events {
            match event {
                Event::LocationCreated { id, name, is_default, is_active } => {
                    let location = Location { id: *id, name: name.clone(), is_default: *is_default, is_active: *is_active };
                    locations.insert(*id, LocationState::new(location));
                }
                Event::LocationDeleted { id } => {
                    locations.remove(id);
                    entity_to_location.retain(|_, lid| *lid != *id);
                }
                other => match other.location_id() {
                    Some(lid) => {
                        if let Some(ls) = locations.get_mut(&lid) {
                            ls.apply(other, &entity_to_location);
                        }
                    }
                    None => calendar.apply(other),
                },
            }
        }

        let state = DashMap::new();
        for (id, ls) in locations {
            state.insert(id, Arc::new(RwLock::new(ls)));
        }

        Ok(Self {
            state,
            calendar: RwLock::new(calendar),
            wal_tx,
            entity_to_location,
            commit_gate: RwLock::new(()),
            registry: Mutex::new(()),
        })
    }

    /// Write one commit to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, events: &[Event]) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { events: events.to_vec(), response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) async fn commit_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    pub fn get_location(&self, id: &Ulid) -> Option<SharedLocationState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn location_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_location.get(entity_id).map(|e| *e.value())
    }

    pub(super) fn require_location(&self, id: &Ulid) -> Result<SharedLocationState, EngineError> {
        self.get_location(id).ok_or(EngineError::NotFound(*id))
    }

    /// WAL-append, then apply every event of the commit to the held location.
    pub(super) async fn persist_and_apply(&self, ls: &mut LocationState, events: Vec<Event>) -> Result<(), EngineError> {
        if events.is_empty() {
            return Ok(());
        }
        self.wal_append(&events).await?;
        for event in &events {
            ls.apply(event, &self.entity_to_location);
        }
        Ok(())
    }

    /// WAL-append, then apply restaurant-wide calendar events.
    pub(super) async fn persist_calendar(&self, calendar: &mut Calendar, events: Vec<Event>) -> Result<(), EngineError> {
        self.wal_append(&events).await?;
        for event in &events {
            calendar.apply(event);
        }
        Ok(())
    }

    /// Lookup entity → location, get location, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<LocationState>), EngineError> {
        let location_id = self
            .location_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ls = self.require_location(&location_id)?;
        let guard = ls.write_owned().await;
        Ok((location_id, guard))
    }
}

/// A location id is mandatory wherever one is asked for: no implicit default.
pub fn require_location_id(location_id: Option<Ulid>) -> Result<Ulid, EngineError> {
    location_id.ok_or(EngineError::TenantContextMissing("location_id"))
}
