use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

/// In-memory user, property and rental stores.
///
/// Rentals are owned by their property's state so that one property lock
/// covers every rental that can conflict with another.
pub struct Store {
    users: DashMap<Ulid, User>,
    properties: DashMap<Ulid, SharedPropertyState>,
    /// Reverse lookup: rental id → property id.
    rental_to_property: DashMap<Ulid, Ulid>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            properties: DashMap::new(),
            rental_to_property: DashMap::new(),
        }
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn contains_user(&self, id: &Ulid) -> bool {
        self.users.contains_key(id)
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn users(&self) -> Vec<User> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    // ── Properties ───────────────────────────────────────────

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn get_property(&self, id: &Ulid) -> Option<SharedPropertyState> {
        self.properties.get(id).map(|e| e.value().clone())
    }

    pub fn insert_property(&self, id: Ulid, state: SharedPropertyState) {
        self.properties.insert(id, state);
    }

    /// Snapshot of every property handle. Lock each one separately.
    pub fn property_handles(&self) -> Vec<SharedPropertyState> {
        self.properties.iter().map(|e| e.value().clone()).collect()
    }

    // ── Rental index ─────────────────────────────────────────

    pub fn get_property_for_rental(&self, rental_id: &Ulid) -> Option<Ulid> {
        self.rental_to_property.get(rental_id).map(|e| *e.value())
    }

    pub fn map_rental(&self, rental_id: Ulid, property_id: Ulid) {
        self.rental_to_property.insert(rental_id, property_id);
    }

    pub fn unmap_rental(&self, rental_id: &Ulid) {
        self.rental_to_property.remove(rental_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a property-scoped event. The caller holds the property's write lock.
    pub fn apply_event(&self, ps: &mut PropertyState, event: &Event) {
        match event {
            Event::RentalRequested {
                id,
                property_id,
                tenant_id,
                stay,
                value,
            } => {
                ps.insert_rental(Rental {
                    id: *id,
                    tenant_id: *tenant_id,
                    property_id: *property_id,
                    stay: *stay,
                    value: *value,
                    state: RentalState::Pending,
                });
                self.map_rental(*id, *property_id);
            }
            Event::RentalsTransitioned { changes, .. } => {
                for change in changes {
                    if let Some(rental) = ps.rental_mut(change.rental_id) {
                        rental.state = change.to;
                    }
                }
            }
            Event::RentalDeleted { id, .. } => {
                ps.remove_rental(*id);
                self.unmap_rental(id);
            }
            // Registered at the DashMap level, not inside a property
            Event::UserRegistered { .. } | Event::PropertyListed { .. } => {}
        }
    }
}

/// The property an event is scoped to, if any.
pub(crate) fn event_property_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RentalRequested { property_id, .. }
        | Event::RentalsTransitioned { property_id, .. }
        | Event::RentalDeleted { property_id, .. } => Some(*property_id),
        Event::PropertyListed { id, .. } => Some(*id),
        Event::UserRegistered { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn property() -> PropertyState {
        PropertyState::new(Property {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            daily_rate: Money(5_000),
            address: Address {
                number: "7".into(),
                street: "Beach Rd".into(),
                city: "Ubatuba".into(),
                state: "SP".into(),
                postal_code: "11680-000".into(),
            },
        })
    }

    fn stay() -> Stay {
        Stay::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 4).unwrap(),
        )
    }

    #[test]
    fn request_then_transition_then_delete() {
        let store = Store::new();
        let mut ps = property();
        let property_id = ps.id();
        let rental_id = Ulid::new();

        store.apply_event(
            &mut ps,
            &Event::RentalRequested {
                id: rental_id,
                property_id,
                tenant_id: Ulid::new(),
                stay: stay(),
                value: Money(15_000),
            },
        );
        assert_eq!(ps.rental(rental_id).unwrap().state, RentalState::Pending);
        assert_eq!(store.get_property_for_rental(&rental_id), Some(property_id));

        store.apply_event(
            &mut ps,
            &Event::RentalsTransitioned {
                property_id,
                changes: vec![StateChange {
                    rental_id,
                    from: RentalState::Pending,
                    to: RentalState::Confirmed,
                }],
            },
        );
        assert_eq!(ps.rental(rental_id).unwrap().state, RentalState::Confirmed);

        store.apply_event(
            &mut ps,
            &Event::RentalDeleted {
                id: rental_id,
                property_id,
            },
        );
        assert!(ps.rental(rental_id).is_none());
        assert_eq!(store.get_property_for_rental(&rental_id), None);
    }

    #[test]
    fn users_roundtrip() {
        let store = Store::new();
        let user = User {
            id: Ulid::new(),
            name: "Ana".into(),
        };
        store.insert_user(user.clone());
        assert!(store.contains_user(&user.id));
        assert_eq!(store.get_user(&user.id), Some(user));
        assert_eq!(store.user_count(), 1);
        assert!(store.get_user(&Ulid::new()).is_none());
    }
}
