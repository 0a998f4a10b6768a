use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar date. The only time type.
pub type Day = NaiveDate;

/// Booked date range. A stay covers the nights `[start, end)`, but two stays
/// that merely touch on a boundary day are still treated as overlapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub start: Day,
    pub end: Day,
}

impl Stay {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start < end, "Stay start must be before end");
        Self { start, end }
    }

    pub fn nights(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days()
    }

    /// Inclusive on both ends: a checkout day equal to the next check-in day collides.
    pub fn overlaps(&self, other: &Stay) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Amount in minor currency units (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(pub i64);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_mul(&self, factor: i64) -> Option<Money> {
        self.0.checked_mul(factor).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = String;

    /// Parses `"700"`, `"700.5"` or `"700.50"` into cents.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() || frac.len() > 2 {
            return Err(format!("bad amount: {s}"));
        }
        let whole: i64 = whole.parse().map_err(|_| format!("bad amount: {s}"))?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| format!("bad amount: {s}"))? * 10,
            _ => frac.parse().map_err(|_| format!("bad amount: {s}"))?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac))
            .ok_or_else(|| format!("amount out of range: {s}"))?;
        Ok(Money(if negative { -cents } else { cents }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RentalState {
    Pending,
    Confirmed,
    Denied,
    Cancelled,
    Restrained,
    Expired,
}

impl RentalState {
    pub const ALL: [RentalState; 6] = [
        RentalState::Pending,
        RentalState::Confirmed,
        RentalState::Denied,
        RentalState::Cancelled,
        RentalState::Restrained,
        RentalState::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RentalState::Pending => "PENDING",
            RentalState::Confirmed => "CONFIRMED",
            RentalState::Denied => "DENIED",
            RentalState::Cancelled => "CANCELLED",
            RentalState::Restrained => "RESTRAINED",
            RentalState::Expired => "EXPIRED",
        }
    }

    /// No transition leaves these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RentalState::Denied | RentalState::Cancelled | RentalState::Expired
        )
    }
}

impl fmt::Display for RentalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RentalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RentalState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown rental state: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rental {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub property_id: Ulid,
    pub stay: Stay,
    pub value: Money,
    pub state: RentalState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub number: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Address {
    pub fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("number", &self.number),
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
        ]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}, {} - {} {}",
            self.number, self.street, self.city, self.state, self.postal_code
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub daily_rate: Money,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
}

/// A property together with every rental ever requested on it.
#[derive(Debug, Clone)]
pub struct PropertyState {
    pub property: Property,
    /// Sorted by `stay.start`.
    pub rentals: Vec<Rental>,
}

impl PropertyState {
    pub fn new(property: Property) -> Self {
        Self {
            property,
            rentals: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.property.id
    }

    /// Insert rental maintaining sort order by stay.start.
    pub fn insert_rental(&mut self, rental: Rental) {
        let pos = self
            .rentals
            .binary_search_by_key(&rental.stay.start, |r| r.stay.start)
            .unwrap_or_else(|e| e);
        self.rentals.insert(pos, rental);
    }

    pub fn remove_rental(&mut self, id: Ulid) -> Option<Rental> {
        let pos = self.rentals.iter().position(|r| r.id == id)?;
        Some(self.rentals.remove(pos))
    }

    pub fn rental(&self, id: Ulid) -> Option<&Rental> {
        self.rentals.iter().find(|r| r.id == id)
    }

    pub fn rental_mut(&mut self, id: Ulid) -> Option<&mut Rental> {
        self.rentals.iter_mut().find(|r| r.id == id)
    }

    /// Rentals whose stay overlaps the query, in any state.
    /// Binary search skips everything starting after `query.end`.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &Rental> {
        let right_bound = self
            .rentals
            .partition_point(|r| r.stay.start <= query.end);
        self.rentals[..right_bound]
            .iter()
            .filter(move |r| r.stay.end >= query.start)
    }
}

/// One rental's move between states inside a transition record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub rental_id: Ulid,
    pub from: RentalState,
    pub to: RentalState,
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        name: String,
    },
    PropertyListed {
        id: Ulid,
        owner_id: Ulid,
        daily_rate: Money,
        address: Address,
    },
    RentalRequested {
        id: Ulid,
        property_id: Ulid,
        tenant_id: Ulid,
        stay: Stay,
        value: Money,
    },
    /// A triggering transition plus its cascade, committed as one record.
    RentalsTransitioned {
        property_id: Ulid,
        changes: Vec<StateChange>,
    },
    RentalDeleted {
        id: Ulid,
        property_id: Ulid,
    },
}

// ── Workflow results ─────────────────────────────────────────────

/// Returned by creation and tenant cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RentalReceipt {
    pub rental_id: Ulid,
    pub tenant_id: Ulid,
}

/// Returned by the owner workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerReceipt {
    pub owner_id: Ulid,
    pub tenant_id: Ulid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> Day {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rental(start: Day, end: Day, state: RentalState) -> Rental {
        Rental {
            id: Ulid::new(),
            tenant_id: Ulid::new(),
            property_id: Ulid::new(),
            stay: Stay::new(start, end),
            value: Money(0),
            state,
        }
    }

    fn empty_property() -> PropertyState {
        PropertyState::new(Property {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            daily_rate: Money(10_000),
            address: Address {
                number: "12".into(),
                street: "Rua Augusta".into(),
                city: "Sao Paulo".into(),
                state: "SP".into(),
                postal_code: "01305-000".into(),
            },
        })
    }

    #[test]
    fn stay_nights() {
        let s = Stay::new(day(2025, 1, 1), day(2025, 1, 8));
        assert_eq!(s.nights(), 7);
        let one = Stay::new(day(2025, 2, 28), day(2025, 3, 1));
        assert_eq!(one.nights(), 1);
    }

    #[test]
    fn stay_overlap_is_inclusive() {
        let a = Stay::new(day(2025, 1, 1), day(2025, 1, 10));
        let b = Stay::new(day(2025, 1, 5), day(2025, 1, 8));
        let touching = Stay::new(day(2025, 1, 10), day(2025, 1, 12));
        let apart = Stay::new(day(2025, 1, 11), day(2025, 1, 12));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(a.overlaps(&touching));
        assert!(!a.overlaps(&apart));
    }

    #[test]
    fn money_display_and_parse() {
        assert_eq!(Money(70_000).to_string(), "700.00");
        assert_eq!(Money(-5).to_string(), "-0.05");
        assert_eq!("700".parse::<Money>().unwrap(), Money(70_000));
        assert_eq!("99.9".parse::<Money>().unwrap(), Money(9_990));
        assert_eq!("0.07".parse::<Money>().unwrap(), Money(7));
        assert!("1.234".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
    }

    #[test]
    fn money_checked_mul() {
        assert_eq!(Money(10_000).checked_mul(7), Some(Money(70_000)));
        assert_eq!(Money(i64::MAX).checked_mul(2), None);
    }

    #[test]
    fn state_parse_roundtrip() {
        for state in RentalState::ALL {
            assert_eq!(state.as_str().parse::<RentalState>().unwrap(), state);
        }
        assert_eq!("confirmed".parse::<RentalState>().unwrap(), RentalState::Confirmed);
        assert!("BOOKED".parse::<RentalState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(RentalState::Denied.is_terminal());
        assert!(RentalState::Cancelled.is_terminal());
        assert!(RentalState::Expired.is_terminal());
        assert!(!RentalState::Pending.is_terminal());
        assert!(!RentalState::Confirmed.is_terminal());
        assert!(!RentalState::Restrained.is_terminal());
    }

    #[test]
    fn rental_ordering() {
        let mut ps = empty_property();
        ps.insert_rental(rental(day(2025, 3, 1), day(2025, 3, 5), RentalState::Pending));
        ps.insert_rental(rental(day(2025, 1, 1), day(2025, 1, 5), RentalState::Pending));
        ps.insert_rental(rental(day(2025, 2, 1), day(2025, 2, 5), RentalState::Pending));
        assert_eq!(ps.rentals[0].stay.start, day(2025, 1, 1));
        assert_eq!(ps.rentals[1].stay.start, day(2025, 2, 1));
        assert_eq!(ps.rentals[2].stay.start, day(2025, 3, 1));
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut ps = empty_property();
        let rentals: Vec<Rental> = (1..=3)
            .map(|m| rental(day(2025, m, 1), day(2025, m, 5), RentalState::Pending))
            .collect();
        for r in &rentals {
            ps.insert_rental(r.clone());
        }
        let removed = ps.remove_rental(rentals[1].id).unwrap();
        assert_eq!(removed.id, rentals[1].id);
        assert_eq!(ps.rentals.len(), 2);
        assert_eq!(ps.rentals[0].id, rentals[0].id);
        assert_eq!(ps.rentals[1].id, rentals[2].id);
        assert!(ps.remove_rental(Ulid::new()).is_none());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut ps = empty_property();
        ps.insert_rental(rental(day(2025, 1, 1), day(2025, 1, 3), RentalState::Confirmed));
        ps.insert_rental(rental(day(2025, 1, 9), day(2025, 1, 15), RentalState::Pending));
        ps.insert_rental(rental(day(2025, 2, 1), day(2025, 2, 3), RentalState::Confirmed));

        let query = Stay::new(day(2025, 1, 10), day(2025, 1, 20));
        let hits: Vec<_> = ps.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].stay.start, day(2025, 1, 9));
    }

    #[test]
    fn overlapping_includes_boundary_touch() {
        let mut ps = empty_property();
        ps.insert_rental(rental(day(2025, 1, 1), day(2025, 1, 10), RentalState::Confirmed));
        let after = Stay::new(day(2025, 1, 10), day(2025, 1, 12));
        let before = Stay::new(day(2024, 12, 28), day(2025, 1, 1));
        assert_eq!(ps.overlapping(&after).count(), 1);
        assert_eq!(ps.overlapping(&before).count(), 1);
    }

    #[test]
    fn overlapping_long_stay_spanning_query() {
        let mut ps = empty_property();
        ps.insert_rental(rental(day(2025, 1, 1), day(2025, 12, 1), RentalState::Pending));
        let query = Stay::new(day(2025, 6, 1), day(2025, 6, 2));
        assert_eq!(ps.overlapping(&query).count(), 1);
    }

    #[test]
    fn overlapping_empty_property() {
        let ps = empty_property();
        let query = Stay::new(day(2025, 1, 1), day(2025, 1, 2));
        assert_eq!(ps.overlapping(&query).count(), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RentalRequested {
            id: Ulid::new(),
            property_id: Ulid::new(),
            tenant_id: Ulid::new(),
            stay: Stay::new(day(2025, 1, 1), day(2025, 1, 8)),
            value: Money(70_000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
