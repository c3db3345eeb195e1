use std::collections::{BTreeMap, HashSet};

use tokio::sync::OwnedRwLockWriteGuard;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{blocking_period, check_seat_free, now_ms, requested_span, validate_instant};
use super::state::LocationState;
use super::transitions::{Action, next_status};
use super::{Engine, EngineError};

/// Events releasing every active allocation `occupant` holds.
fn release_events(ls: &LocationState, occupant_id: &Ulid, at: Ms) -> Vec<Event> {
    ls.active_allocations_for_occupant(occupant_id)
        .map(|a| Event::SeatReleased { id: a.id, location_id: ls.id(), at })
        .collect()
}

/// Status change for `action`, with the cascading seat release when the
/// action frees seats. Nothing is written.
pub(super) fn transition_events(
    ls: &LocationState,
    occupant: OccupantRef,
    action: Action,
    at: Ms,
) -> Result<(OccupantStatus, Vec<Event>), EngineError> {
    let current = ls.occupant(&occupant).ok_or(EngineError::NotFound(occupant.id))?;
    let to = next_status(occupant.kind, current.status, action).ok_or(EngineError::InvalidTransition {
        occupant,
        from: current.status,
        action,
    })?;
    let mut events = if action.releases_allocations() {
        release_events(ls, &occupant.id, at)
    } else {
        Vec::new()
    };
    if to != current.status {
        events.push(Event::OccupantStatusChanged { occupant, location_id: ls.id(), status: to, at });
    }
    Ok((to, events))
}

impl Engine {
    /// Allocate every listed seat to `occupant` from `start`, or none of them.
    ///
    /// Labels resolve inside the occupant's location. On success the occupant
    /// moves to `seated` or `reserved` in the same commit.
    pub async fn bulk_allocate(
        &self,
        occupant: OccupantRef,
        seats: Vec<SeatSelector>,
        start: Ms,
        intent: SeatingIntent,
    ) -> Result<Vec<SeatAllocation>, EngineError> {
        if seats.is_empty() {
            return Err(EngineError::validation("no seats requested"));
        }
        if seats.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        validate_instant(start)?;

        let _commit = self.commit_gate().await;
        let (location_id, mut guard) = self.resolve_entity_write(&occupant.id).await?;
        let ls = &*guard;
        let current = ls.occupant(&occupant).ok_or(EngineError::NotFound(occupant.id))?;

        let action = match intent {
            SeatingIntent::Seat => Action::Seat,
            SeatingIntent::Reserve => Action::Reserve,
        };
        let to = next_status(occupant.kind, current.status, action).ok_or(EngineError::InvalidTransition {
            occupant,
            from: current.status,
            action,
        })?;

        let mut seat_ids = Vec::with_capacity(seats.len());
        let mut seen = HashSet::new();
        for selector in &seats {
            let seat_id = match selector {
                SeatSelector::Id(id) => {
                    if !ls.seats.contains_key(id) {
                        return Err(EngineError::NotFound(*id));
                    }
                    *id
                }
                SeatSelector::Label(label) => {
                    ls.seat_by_label(label)
                        .ok_or_else(|| EngineError::UnknownSeatLabel(label.clone()))?
                        .id
                }
            };
            if !seen.insert(seat_id) {
                return Err(EngineError::validation(format!("seat {seat_id} listed twice")));
            }
            seat_ids.push(seat_id);
        }

        let span = requested_span(current, start);
        let now = now_ms();
        for seat_id in &seat_ids {
            if let Some(block) = blocking_period(ls, *seat_id, &span) {
                debug!(%occupant, %seat_id, block = %block.id, "allocation inside blocked period");
                return Err(EngineError::CapacityExceeded {
                    requested: current.party_size,
                    available: 0,
                    reason: "blocked".into(),
                });
            }
            if let Err(e) = check_seat_free(ls, *seat_id, &span, now) {
                metrics::counter!(crate::observability::ALLOCATION_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }
        }

        let mut events: Vec<Event> = seat_ids
            .iter()
            .map(|seat_id| Event::SeatAllocated {
                id: Ulid::new(),
                location_id,
                seat_id: *seat_id,
                occupant,
                start,
            })
            .collect();
        if to != current.status {
            events.push(Event::OccupantStatusChanged { occupant, location_id, status: to, at: now });
        }
        let allocation_ids: Vec<Ulid> = events
            .iter()
            .filter_map(|e| match e {
                Event::SeatAllocated { id, .. } => Some(*id),
                _ => None,
            })
            .collect();

        self.persist_and_apply(&mut guard, events).await?;

        let intent_label = match intent {
            SeatingIntent::Seat => "seat",
            SeatingIntent::Reserve => "reserve",
        };
        metrics::counter!(crate::observability::ALLOCATIONS_TOTAL, "intent" => intent_label)
            .increment(allocation_ids.len() as u64);
        debug!(%occupant, seats = allocation_ids.len(), "seats allocated");

        Ok(allocation_ids
            .iter()
            .filter_map(|id| guard.allocation(id).cloned())
            .collect())
    }

    /// Release active allocations by allocation id or by seat id, across
    /// locations. Already released allocations are skipped. Returns how many
    /// were released by this call.
    pub async fn bulk_release(&self, target: ReleaseTarget) -> Result<usize, EngineError> {
        let ids = match &target {
            ReleaseTarget::Allocations(ids) | ReleaseTarget::Seats(ids) => ids,
        };
        if ids.is_empty() {
            return Ok(0);
        }
        if ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let _commit = self.commit_gate().await;

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut by_location: BTreeMap<Ulid, Vec<Ulid>> = BTreeMap::new();
        for id in ids {
            let lid = self.location_for_entity(id).ok_or(EngineError::NotFound(*id))?;
            by_location.entry(lid).or_default().push(*id);
        }
        let mut guards: BTreeMap<Ulid, OwnedRwLockWriteGuard<LocationState>> = BTreeMap::new();
        for lid in by_location.keys() {
            let ls = self.require_location(lid)?;
            guards.insert(*lid, ls.write_owned().await);
        }

        let at = now_ms();
        let mut events = Vec::new();
        let mut released = HashSet::new();
        for (lid, ids) in &by_location {
            let ls = &guards[lid];
            for id in ids {
                let allocations: Vec<&SeatAllocation> = match target {
                    ReleaseTarget::Allocations(_) => {
                        vec![ls.allocation(id).ok_or(EngineError::NotFound(*id))?]
                    }
                    ReleaseTarget::Seats(_) => {
                        if !ls.seats.contains_key(id) {
                            return Err(EngineError::NotFound(*id));
                        }
                        ls.active_allocations_for_seat(id).collect()
                    }
                };
                for alloc in allocations {
                    if alloc.is_active() && released.insert(alloc.id) {
                        events.push(Event::SeatReleased { id: alloc.id, location_id: *lid, at });
                    }
                }
            }
        }

        if events.is_empty() {
            return Ok(0);
        }
        self.wal_append(&events).await?;
        for event in &events {
            if let Some(guard) = event.location_id().and_then(|lid| guards.get_mut(&lid)) {
                guard.apply(event, &self.entity_to_location);
            }
        }
        debug!(released = events.len(), "allocations released");
        Ok(events.len())
    }

    /// Release one allocation. When it was the occupant's last active seat,
    /// the occupant departs in the same commit. Releasing twice is a no-op.
    pub async fn release_allocation(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.commit_gate().await;
        let (location_id, mut guard) = self.resolve_entity_write(&id).await?;
        let ls = &*guard;
        let alloc = ls.allocation(&id).ok_or(EngineError::NotFound(id))?;
        if !alloc.is_active() {
            return Ok(());
        }

        let at = now_ms();
        let mut events = vec![Event::SeatReleased { id, location_id, at }];
        let others_active = ls
            .active_allocations_for_occupant(&alloc.occupant.id)
            .any(|a| a.id != id);
        if !others_active
            && let Some(occupant) = ls.occupant(&alloc.occupant)
            && let Some(to) = next_status(occupant.kind(), occupant.status, Action::Finish)
        {
            events.push(Event::OccupantStatusChanged { occupant: alloc.occupant, location_id, status: to, at });
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => Action::Finish.as_str())
                .increment(1);
        }
        self.persist_and_apply(&mut guard, events).await
    }

    /// Apply a lifecycle action. Cancel, no-show and finish release the
    /// occupant's seats in the same commit.
    pub async fn transition(&self, occupant: OccupantRef, action: Action) -> Result<OccupantStatus, EngineError> {
        if matches!(action, Action::Seat | Action::Reserve) {
            return Err(EngineError::validation(format!("{action} requires seats")));
        }
        let _commit = self.commit_gate().await;
        let (_, mut guard) = self.resolve_entity_write(&occupant.id).await?;
        let (to, events) = transition_events(&guard, occupant, action, now_ms())?;
        self.persist_and_apply(&mut guard, events).await?;
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => action.as_str()).increment(1);
        debug!(%occupant, %action, status = %to, "occupant transitioned");
        Ok(to)
    }

    pub async fn arrive(&self, occupant: OccupantRef) -> Result<OccupantStatus, EngineError> {
        self.transition(occupant, Action::Arrive).await
    }

    pub async fn cancel(&self, occupant: OccupantRef) -> Result<OccupantStatus, EngineError> {
        self.transition(occupant, Action::Cancel).await
    }

    pub async fn no_show(&self, occupant: OccupantRef) -> Result<OccupantStatus, EngineError> {
        self.transition(occupant, Action::NoShow).await
    }

    pub async fn finish(&self, occupant: OccupantRef) -> Result<OccupantStatus, EngineError> {
        self.transition(occupant, Action::Finish).await
    }

    /// Allocation history with occupant summaries, ordered by start time.
    pub async fn list_allocations(&self, filter: &AllocationFilter) -> Result<Vec<AllocationInfo>, EngineError> {
        let location_ids: Vec<Ulid> = match filter.location_id {
            Some(lid) => {
                self.require_location(&lid)?;
                vec![lid]
            }
            None => self.state.iter().map(|e| *e.key()).collect(),
        };

        let mut out = Vec::new();
        for lid in location_ids {
            let Some(ls) = self.get_location(&lid) else { continue };
            let guard = ls.read().await;
            for alloc in &guard.allocations {
                if !allocation_matches(alloc, filter) {
                    continue;
                }
                let occupant = guard.occupant(&alloc.occupant);
                out.push(AllocationInfo {
                    id: alloc.id,
                    location_id: lid,
                    seat_id: alloc.seat_id,
                    seat_label: guard
                        .seats
                        .get(&alloc.seat_id)
                        .map(|s| s.label.clone())
                        .unwrap_or_default(),
                    start: alloc.start,
                    released_at: alloc.released_at,
                    occupant: alloc.occupant,
                    occupant_name: occupant.and_then(|o| o.name.clone()),
                    occupant_party_size: occupant.map(|o| o.party_size).unwrap_or(0),
                    occupant_status: occupant.map(|o| o.status).unwrap_or(alloc.occupant.kind.initial_status()),
                });
            }
        }
        out.sort_by_key(|a| (a.start, a.id));
        Ok(out)
    }
}

fn allocation_matches(alloc: &SeatAllocation, filter: &AllocationFilter) -> bool {
    if filter.active.is_some_and(|active| active != alloc.is_active()) {
        return false;
    }
    if filter.range.is_some_and(|r| !r.contains_instant(alloc.start)) {
        return false;
    }
    if filter.seat_id.is_some_and(|s| s != alloc.seat_id) {
        return false;
    }
    let occupant = alloc.occupant;
    if filter
        .reservation_id
        .is_some_and(|id| occupant != OccupantRef::reservation(id))
    {
        return false;
    }
    if filter
        .waitlist_entry_id
        .is_some_and(|id| occupant != OccupantRef::waitlist(id))
    {
        return false;
    }
    true
}
