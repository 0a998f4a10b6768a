use ulid::Ulid;

use crate::model::*;

use super::overlap::find_overlapping;
use super::{Engine, EngineError, Entity};

impl Engine {
    /// Read-only conflict detector over one property's rentals.
    pub async fn find_overlapping(
        &self,
        property_id: Ulid,
        state: RentalState,
        stay: Stay,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Rental>, EngineError> {
        let ps = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(Entity::Property, property_id))?;
        let guard = ps.read().await;
        Ok(find_overlapping(&guard, state, &stay, exclude))
    }

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.store.get_user(id)
    }

    pub fn list_users(&self) -> Vec<User> {
        self.store.users()
    }

    pub async fn get_property(&self, id: &Ulid) -> Option<Property> {
        let ps = self.store.get_property(id)?;
        let guard = ps.read().await;
        Some(guard.property.clone())
    }

    pub async fn list_properties(&self) -> Vec<Property> {
        self.collect_properties(|_| true).await
    }

    /// Properties whose address is in `city`.
    pub async fn properties_in_city(&self, city: &str) -> Result<Vec<Property>, EngineError> {
        if city.trim().is_empty() {
            return Err(EngineError::validation("location cannot be blank"));
        }
        Ok(self.collect_properties(|ps| ps.property.address.city == city).await)
    }

    /// Properties whose daily rate lies in `[min, max]`.
    pub async fn properties_in_price_range(
        &self,
        min: Money,
        max: Money,
    ) -> Result<Vec<Property>, EngineError> {
        if min.is_negative() || max.is_negative() {
            return Err(EngineError::validation("prices must be non-negative"));
        }
        if min > max {
            return Err(EngineError::validation(
                "minimum price cannot be greater than maximum price",
            ));
        }
        Ok(self
            .collect_properties(|ps| (min..=max).contains(&ps.property.daily_rate))
            .await)
    }

    /// Properties with no CONFIRMED rental overlapping `[start, end)`.
    pub async fn available_properties(
        &self,
        start: Day,
        end: Day,
    ) -> Result<Vec<Property>, EngineError> {
        if start >= end {
            return Err(EngineError::validation("start date must be before end date"));
        }
        let stay = Stay::new(start, end);
        Ok(self
            .collect_properties(|ps| {
                find_overlapping(ps, RentalState::Confirmed, &stay, None).is_empty()
            })
            .await)
    }

    async fn collect_properties(&self, keep: impl Fn(&PropertyState) -> bool) -> Vec<Property> {
        let mut out = Vec::new();
        for ps in self.store.property_handles() {
            let guard = ps.read().await;
            if keep(&guard) {
                out.push(guard.property.clone());
            }
        }
        out.sort_by_key(|p| p.id);
        out
    }

    pub async fn get_rental(&self, id: &Ulid) -> Option<Rental> {
        let property_id = self.store.get_property_for_rental(id)?;
        let ps = self.store.get_property(&property_id)?;
        let guard = ps.read().await;
        guard.rental(*id).cloned()
    }

    /// Owner of the property a rental belongs to.
    pub async fn owner_of_rental(&self, id: &Ulid) -> Option<Ulid> {
        let property_id = self.store.get_property_for_rental(id)?;
        let ps = self.store.get_property(&property_id)?;
        let owner = ps.read().await.property.owner_id;
        Some(owner)
    }

    /// Rental history of one property, ordered by start date.
    pub async fn rentals_for_property(&self, property_id: Ulid) -> Result<Vec<Rental>, EngineError> {
        let ps = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(Entity::Property, property_id))?;
        let guard = ps.read().await;
        Ok(guard.rentals.clone())
    }

    /// Rental history of one tenant across all properties, ordered by start date.
    pub async fn rentals_for_tenant(&self, tenant_id: Ulid) -> Vec<Rental> {
        let mut rentals = self
            .collect_rentals(|r| r.tenant_id == tenant_id)
            .await;
        rentals.sort_by_key(|r| (r.stay.start, r.id));
        rentals
    }

    pub async fn all_rentals(&self) -> Vec<Rental> {
        let mut rentals = self.collect_rentals(|_| true).await;
        rentals.sort_by_key(|r| (r.stay.start, r.id));
        rentals
    }

    async fn collect_rentals(&self, keep: impl Fn(&Rental) -> bool) -> Vec<Rental> {
        let mut out = Vec::new();
        for ps in self.store.property_handles() {
            let guard = ps.read().await;
            out.extend(guard.rentals.iter().filter(|r| keep(r)).cloned());
        }
        out
    }
}
