mod error;
pub mod lifecycle;
mod overlap;
mod queries;
mod store;
mod workflows;

pub use error::{EngineError, Entity, ErrorKind};
pub use lifecycle::{Action, Cascade, Transition};
pub use store::{SharedPropertyState, Store};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::clock::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::model::*;
use crate::wal::Wal;

use store::event_property_id;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) struct WalAppend {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalAppend>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[WalAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for append in batch {
        if let Err(e) = wal.append_buffered(&append.event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<WalAppend>, result: &io::Result<()>) {
    for append in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = append.response.send(r);
    }
}

/// Minimal event list that recreates `users` and `properties` on replay.
fn snapshot_events(users: &[User], properties: &HashMap<Ulid, PropertyState>) -> Vec<Event> {
    let mut events: Vec<Event> = users
        .iter()
        .map(|u| Event::UserRegistered {
            id: u.id,
            name: u.name.clone(),
        })
        .collect();

    let mut ids: Vec<&Ulid> = properties.keys().collect();
    ids.sort();
    for ps in ids.into_iter().filter_map(|id| properties.get(id)) {
        let property = &ps.property;
        events.push(Event::PropertyListed {
            id: property.id,
            owner_id: property.owner_id,
            daily_rate: property.daily_rate,
            address: property.address.clone(),
        });

        let mut settled = Vec::new();
        for rental in &ps.rentals {
            events.push(Event::RentalRequested {
                id: rental.id,
                property_id: property.id,
                tenant_id: rental.tenant_id,
                stay: rental.stay,
                value: rental.value,
            });
            if rental.state != RentalState::Pending {
                settled.push(StateChange {
                    rental_id: rental.id,
                    from: RentalState::Pending,
                    to: rental.state,
                });
            }
        }
        if !settled.is_empty() {
            events.push(Event::RentalsTransitioned {
                property_id: property.id,
                changes: settled,
            });
        }
    }
    events
}

/// The rental lifecycle engine.
///
/// Every property's rentals sit behind their own `RwLock`. Workflows that
/// mutate a property hold its write lock from the first overlap check until
/// the resulting WAL record is durable and applied, so check-then-act on
/// one property is serialized while distinct properties proceed in parallel.
pub struct Engine {
    pub(super) store: Store,
    wal_tx: mpsc::Sender<WalAppend>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) ids: Arc<dyn IdGenerator>,
    replayed_events: usize,
}

impl Engine {
    /// Open with the system clock and ULID ids.
    pub fn open(wal_path: PathBuf, compact_threshold: usize) -> io::Result<Self> {
        Self::new(
            wal_path,
            Arc::new(SystemClock),
            Arc::new(UlidGenerator),
            compact_threshold,
        )
    }

    /// Replay the WAL at `wal_path` and start the group-commit writer.
    ///
    /// When at least `compact_threshold` records were replayed, the log is
    /// rewritten to a snapshot of the rebuilt state before the writer starts,
    /// so no append can race the rewrite. Must be called from within a tokio
    /// runtime.
    pub fn new(
        wal_path: PathBuf,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        compact_threshold: usize,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let store = Store::new();

        // Rebuild plain property states first; wrap them in locks once replay is done.
        let mut properties: HashMap<Ulid, PropertyState> = HashMap::new();
        for event in &events {
            match event {
                Event::UserRegistered { id, name } => {
                    store.insert_user(User {
                        id: *id,
                        name: name.clone(),
                    });
                }
                Event::PropertyListed {
                    id,
                    owner_id,
                    daily_rate,
                    address,
                } => {
                    properties.insert(
                        *id,
                        PropertyState::new(Property {
                            id: *id,
                            owner_id: *owner_id,
                            daily_rate: *daily_rate,
                            address: address.clone(),
                        }),
                    );
                }
                other => {
                    if let Some(ps) = event_property_id(other).and_then(|pid| properties.get_mut(&pid)) {
                        store.apply_event(ps, other);
                    }
                }
            }
        }

        if !events.is_empty() {
            info!(
                "replayed {} events: {} users, {} properties",
                events.len(),
                store.user_count(),
                properties.len()
            );
        }

        let mut wal = Wal::open(&wal_path)?;
        if !events.is_empty() && events.len() >= compact_threshold {
            let snapshot = snapshot_events(&store.users(), &properties);
            Wal::write_compact_file(wal.path(), &snapshot)?;
            wal.swap_compact_file()?;
            info!("compacted WAL from {} to {} events", events.len(), snapshot.len());
        }

        for (id, ps) in properties {
            store.insert_property(id, Arc::new(RwLock::new(ps)));
        }

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            store,
            wal_tx,
            clock,
            ids,
            replayed_events: events.len(),
        })
    }

    /// Number of WAL records read at startup.
    pub fn replayed_events(&self) -> usize {
        self.replayed_events
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalAppend {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably log `event`, then apply it to the locked property.
    /// Nothing is applied if the WAL write fails.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut PropertyState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(ps, event);
        if let Event::RentalsTransitioned { property_id, changes } = event {
            for change in changes {
                info!(
                    "rental {} on property {property_id}: {} -> {}",
                    change.rental_id, change.from, change.to
                );
                metrics::counter!(
                    crate::observability::TRANSITIONS_TOTAL,
                    "from" => change.from.as_str(),
                    "to" => change.to.as_str()
                )
                .increment(1);
            }
        }
        Ok(())
    }

    /// Durably log a store-level event (user or property registration).
    pub(super) async fn persist(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await
    }

    /// Lookup rental → property, acquire the property's write lock, and make
    /// sure the rental is still there once the lock is held.
    pub(super) async fn lock_rental_property(
        &self,
        rental_id: &Ulid,
    ) -> Result<(OwnedRwLockWriteGuard<PropertyState>, Rental), EngineError> {
        let property_id = self
            .store
            .get_property_for_rental(rental_id)
            .ok_or(EngineError::NotFound(Entity::Rental, *rental_id))?;
        let ps = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(Entity::Property, property_id))?;
        let guard = ps.write_owned().await;
        let rental = guard
            .rental(*rental_id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Rental, *rental_id))?;
        Ok((guard, rental))
    }

    pub fn today(&self) -> Day {
        self.clock.today()
    }
}
