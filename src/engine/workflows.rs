use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::lifecycle::{Action, Cascade, Transition};
use super::overlap::{find_overlapping, stay_value, validate_request};
use super::{Engine, EngineError, Entity};

/// The triggering change for `rental` followed by every sibling its cascade touches.
fn plan_changes(
    ps: &PropertyState,
    rental: &Rental,
    transition: Transition,
) -> Result<Vec<StateChange>, EngineError> {
    let mut changes = vec![StateChange {
        rental_id: rental.id,
        from: rental.state,
        to: transition.next,
    }];

    let (sibling_state, sibling_action) = match transition.cascade {
        Cascade::None => return Ok(changes),
        Cascade::RestrainPending => (RentalState::Pending, Action::Restrain),
        Cascade::ReleaseRestrained => (RentalState::Restrained, Action::Release),
    };
    for sibling in find_overlapping(ps, sibling_state, &rental.stay, Some(rental.id)) {
        let next = sibling_action.apply(sibling.state)?.next;
        changes.push(StateChange {
            rental_id: sibling.id,
            from: sibling.state,
            to: next,
        });
    }
    Ok(changes)
}

fn require_owner(ps: &PropertyState, actor: Ulid, rental: &Rental) -> Result<(), EngineError> {
    if ps.property.owner_id != actor {
        debug!("user {actor} is not the owner of rental {}", rental.id);
        return Err(EngineError::Forbidden {
            actor,
            rental: rental.id,
        });
    }
    Ok(())
}

impl Engine {
    // ── Collaborator registration ────────────────────────────

    pub async fn register_user(&self, name: String) -> Result<User, EngineError> {
        if self.store.user_count() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if name.trim().is_empty() {
            return Err(EngineError::validation("user name cannot be blank"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("user name too long"));
        }

        let id = self.ids.generate();
        let event = Event::UserRegistered {
            id,
            name: name.clone(),
        };
        self.persist(&event).await?;
        let user = User { id, name };
        self.store.insert_user(user.clone());
        info!("registered user {id}");
        Ok(user)
    }

    pub async fn list_property(
        &self,
        owner_id: Ulid,
        daily_rate: Money,
        address: Address,
    ) -> Result<Property, EngineError> {
        if !self.store.contains_user(&owner_id) {
            return Err(EngineError::Unauthenticated(owner_id));
        }
        if self.store.property_count() >= MAX_PROPERTIES {
            return Err(EngineError::LimitExceeded("too many properties"));
        }
        if daily_rate.is_negative() {
            return Err(EngineError::validation("daily rate cannot be negative"));
        }
        if daily_rate.cents() > MAX_DAILY_RATE_CENTS {
            return Err(EngineError::LimitExceeded("daily rate too high"));
        }
        for (field, value) in address.fields() {
            if value.trim().is_empty() {
                return Err(EngineError::validation(format!("address {field} cannot be blank")));
            }
            if value.len() > MAX_ADDRESS_FIELD_LEN {
                return Err(EngineError::LimitExceeded("address field too long"));
            }
        }

        let id = self.ids.generate();
        let event = Event::PropertyListed {
            id,
            owner_id,
            daily_rate,
            address: address.clone(),
        };
        self.persist(&event).await?;
        let property = Property {
            id,
            owner_id,
            daily_rate,
            address,
        };
        self.store
            .insert_property(id, Arc::new(RwLock::new(PropertyState::new(property.clone()))));
        info!("owner {owner_id} listed property {id}");
        Ok(property)
    }

    // ── Rental lifecycle ─────────────────────────────────────

    /// Request a stay. The new rental starts PENDING.
    pub async fn create_rental(
        &self,
        tenant_id: Ulid,
        property_id: Ulid,
        start: Day,
        end: Day,
    ) -> Result<RentalReceipt, EngineError> {
        if !self.store.contains_user(&tenant_id) {
            return Err(EngineError::Unauthenticated(tenant_id));
        }
        let stay = validate_request(start, end, self.clock.today())?;
        let ps = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(Entity::Property, property_id))?;
        let mut guard = ps.write().await;

        if let Some(booked) = find_overlapping(&guard, RentalState::Confirmed, &stay, None).first() {
            debug!("request on property {property_id} collides with confirmed rental {}", booked.id);
            return Err(EngineError::conflict(
                "property is already booked during the requested period",
            ));
        }
        if guard.rentals.len() >= MAX_RENTALS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many rentals on property"));
        }
        let value = stay_value(guard.property.daily_rate, &stay)?;

        let id = self.ids.generate();
        let event = Event::RentalRequested {
            id,
            property_id,
            tenant_id,
            stay,
            value,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(
            "tenant {tenant_id} requested rental {id} on property {property_id} for {} nights ({value})",
            stay.nights()
        );
        Ok(RentalReceipt {
            rental_id: id,
            tenant_id,
        })
    }

    /// Owner accepts a PENDING rental. Every overlapping PENDING sibling is
    /// restrained in the same commit.
    pub async fn confirm_rental(
        &self,
        owner_id: Ulid,
        rental_id: Ulid,
    ) -> Result<OwnerReceipt, EngineError> {
        let (mut guard, rental) = self.lock_rental_property(&rental_id).await?;
        require_owner(&guard, owner_id, &rental)?;
        let transition = Action::Confirm.apply(rental.state)?;

        let confirmed = find_overlapping(&guard, RentalState::Confirmed, &rental.stay, Some(rental_id));
        if let Some(other) = confirmed.first() {
            return Err(EngineError::conflict(format!(
                "rental {rental_id} conflicts with confirmed rental {}",
                other.id
            )));
        }

        let changes = plan_changes(&guard, &rental, transition)?;
        let event = Event::RentalsTransitioned {
            property_id: rental.property_id,
            changes,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(OwnerReceipt {
            owner_id,
            tenant_id: rental.tenant_id,
        })
    }

    /// Owner refuses a PENDING or RESTRAINED rental.
    pub async fn deny_rental(
        &self,
        owner_id: Ulid,
        rental_id: Ulid,
    ) -> Result<OwnerReceipt, EngineError> {
        let (mut guard, rental) = self.lock_rental_property(&rental_id).await?;
        require_owner(&guard, owner_id, &rental)?;
        let transition = Action::Deny.apply(rental.state)?;

        let changes = plan_changes(&guard, &rental, transition)?;
        let event = Event::RentalsTransitioned {
            property_id: rental.property_id,
            changes,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(OwnerReceipt {
            owner_id,
            tenant_id: rental.tenant_id,
        })
    }

    /// Owner cancels a CONFIRMED rental no later than its start day.
    /// `cancel_date` defaults to today. Restrained siblings are released.
    pub async fn owner_cancel_rental(
        &self,
        owner_id: Ulid,
        rental_id: Ulid,
        cancel_date: Option<Day>,
    ) -> Result<OwnerReceipt, EngineError> {
        let (mut guard, rental) = self.lock_rental_property(&rental_id).await?;
        require_owner(&guard, owner_id, &rental)?;

        let cancel_date = cancel_date.unwrap_or_else(|| self.clock.today());
        if cancel_date > rental.stay.start {
            return Err(EngineError::validation(format!(
                "rental {rental_id} already started on {}",
                rental.stay.start
            )));
        }
        let transition = Action::OwnerCancel.apply(rental.state)?;

        let changes = plan_changes(&guard, &rental, transition)?;
        let event = Event::RentalsTransitioned {
            property_id: rental.property_id,
            changes,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(OwnerReceipt {
            owner_id,
            tenant_id: rental.tenant_id,
        })
    }

    /// Tenant cancels their own CONFIRMED rental no later than its start day.
    /// Restrained siblings are released.
    pub async fn tenant_cancel_rental(
        &self,
        tenant_id: Ulid,
        rental_id: Ulid,
    ) -> Result<RentalReceipt, EngineError> {
        if !self.store.contains_user(&tenant_id) {
            return Err(EngineError::Unauthenticated(tenant_id));
        }
        let (mut guard, rental) = self.lock_rental_property(&rental_id).await?;
        if rental.tenant_id != tenant_id {
            return Err(EngineError::Forbidden {
                actor: tenant_id,
                rental: rental_id,
            });
        }
        if self.clock.today() > rental.stay.start {
            return Err(EngineError::validation(format!(
                "cannot modify rental {rental_id}: it started on {}",
                rental.stay.start
            )));
        }
        let transition = Action::TenantCancel.apply(rental.state)?;

        let changes = plan_changes(&guard, &rental, transition)?;
        let event = Event::RentalsTransitioned {
            property_id: rental.property_id,
            changes,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(RentalReceipt {
            rental_id,
            tenant_id,
        })
    }

    /// Owner lapses an unresolved (PENDING or RESTRAINED) request. Only ever
    /// triggered from outside; the engine schedules nothing itself.
    pub async fn expire_rental(
        &self,
        owner_id: Ulid,
        rental_id: Ulid,
    ) -> Result<RentalReceipt, EngineError> {
        if !self.store.contains_user(&owner_id) {
            return Err(EngineError::Unauthenticated(owner_id));
        }
        let (mut guard, rental) = self.lock_rental_property(&rental_id).await?;
        require_owner(&guard, owner_id, &rental)?;
        let transition = Action::Expire.apply(rental.state)?;

        let changes = plan_changes(&guard, &rental, transition)?;
        let event = Event::RentalsTransitioned {
            property_id: rental.property_id,
            changes,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(RentalReceipt {
            rental_id,
            tenant_id: rental.tenant_id,
        })
    }

    /// Remove a PENDING or DENIED rental that has not started yet.
    /// Either the tenant or the property owner may delete.
    pub async fn delete_rental(
        &self,
        actor_id: Ulid,
        rental_id: Ulid,
    ) -> Result<RentalReceipt, EngineError> {
        if !self.store.contains_user(&actor_id) {
            return Err(EngineError::Unauthenticated(actor_id));
        }
        let (mut guard, rental) = self.lock_rental_property(&rental_id).await?;
        if rental.tenant_id != actor_id && guard.property.owner_id != actor_id {
            return Err(EngineError::Forbidden {
                actor: actor_id,
                rental: rental_id,
            });
        }
        if !matches!(rental.state, RentalState::Pending | RentalState::Denied) {
            return Err(EngineError::validation(format!(
                "rental state must be PENDING or DENIED to delete, is {}",
                rental.state
            )));
        }
        if rental.stay.start <= self.clock.today() {
            return Err(EngineError::validation(
                "cannot delete rentals that have already started",
            ));
        }

        let event = Event::RentalDeleted {
            id: rental_id,
            property_id: rental.property_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("user {actor_id} deleted rental {rental_id}");
        Ok(RentalReceipt {
            rental_id,
            tenant_id: rental.tenant_id,
        })
    }
}
