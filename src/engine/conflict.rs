use std::time::{SystemTime, UNIX_EPOCH};

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;
use super::state::LocationState;

pub fn now_ms() -> Ms {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_instant(t: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::validation("end must be after start"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Span a new allocation for `occupant` starting at `start` would hold:
/// through the booked end when that is later, otherwise until released.
pub(crate) fn requested_span(occupant: &Occupant, start: Ms) -> Span {
    match occupant.reservation_span() {
        Some(s) if s.end > start => Span::new(start, s.end),
        _ => Span::open_ended(start),
    }
}

/// Reject the seat if any of its active allocations overlaps `span`.
pub(crate) fn check_seat_free(ls: &LocationState, seat_id: Ulid, span: &Span, now: Ms) -> Result<(), EngineError> {
    for alloc in ls.active_allocations_for_seat(&seat_id) {
        if ls.held_span(alloc, now).overlaps(span) {
            return Err(EngineError::Conflict { seat_id, allocation_id: alloc.id });
        }
    }
    Ok(())
}

/// Active block that keeps `seat_id` from being allocated for `span`: a
/// location-wide block or one on the seat's section. An open-ended span is
/// tested at its start only.
pub(crate) fn blocking_period<'a>(ls: &'a LocationState, seat_id: Ulid, span: &Span) -> Option<&'a BlockedPeriod> {
    let section = ls.seats.get(&seat_id).map(|s| s.section_id);
    let window = if span.end == Ms::MAX { Span::new(span.start, span.start + 1) } else { *span };
    ls.blocked_overlapping(&window)
        .find(|b| b.section_id.is_none() || b.section_id == section)
}
