use chrono::Months;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Rentals on `ps` in `state` whose stay overlaps `stay`, skipping `exclude`.
pub(crate) fn find_overlapping(
    ps: &PropertyState,
    state: RentalState,
    stay: &Stay,
    exclude: Option<Ulid>,
) -> Vec<Rental> {
    ps.overlapping(stay)
        .filter(|r| r.state == state && Some(r.id) != exclude)
        .cloned()
        .collect()
}

/// Date rules for a new request, checked in order; the first broken rule wins.
pub(crate) fn validate_request(start: Day, end: Day, today: Day) -> Result<Stay, EngineError> {
    if start == end {
        return Err(EngineError::validation(
            "rental cannot start and end on the same date",
        ));
    }
    if start > end {
        return Err(EngineError::validation("start date must be before end date"));
    }
    if start < today {
        return Err(EngineError::validation("rental cannot start in the past"));
    }
    let latest_end = start.checked_add_months(Months::new(12));
    if latest_end.is_none_or(|latest| end > latest) {
        return Err(EngineError::validation("rental duration must be 1 year or less"));
    }
    Ok(Stay::new(start, end))
}

/// `daily_rate × nights`.
pub(crate) fn stay_value(daily_rate: Money, stay: &Stay) -> Result<Money, EngineError> {
    daily_rate
        .checked_mul(stay.nights())
        .ok_or(EngineError::LimitExceeded("rental value overflows"))
}
