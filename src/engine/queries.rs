use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability;
use super::conflict::{now_ms, validate_instant};
use super::{Engine, EngineError};

impl Engine {
    /// Slots for `date` at the configured interval, location-wide or for one
    /// section of the location.
    pub async fn availability(
        &self,
        location_id: Ulid,
        date: NaiveDate,
        party_size: u32,
        section_id: Option<Ulid>,
    ) -> Result<AvailabilityReport, EngineError> {
        if party_size == 0 {
            return Err(EngineError::validation("party_size must be positive"));
        }
        let cal = self.calendar.read().await;
        let ls = self.require_location(&location_id)?;
        let guard = ls.read().await;
        if let Some(sid) = section_id
            && !guard.sections.contains_key(&sid)
        {
            return Err(EngineError::NotFound(sid));
        }
        Ok(availability::report(&cal, &guard, date, party_size, section_id))
    }

    /// Largest party admissible at instant `at`, with the reason when
    /// `party_size` does not fit.
    pub async fn capacity_check(&self, location_id: Ulid, at: Ms, party_size: u32) -> Result<CapacityCheck, EngineError> {
        if party_size == 0 {
            return Err(EngineError::validation("party_size must be positive"));
        }
        validate_instant(at)?;
        let cal = self.calendar.read().await;
        let ls = self.require_location(&location_id)?;
        let guard = ls.read().await;
        Ok(availability::check(&cal, &guard, at, party_size))
    }

    /// Seats left at instant `t`: the configured total minus the party size
    /// of every live occupant whose booked window or active allocation spans
    /// `t`. Each occupant counts once.
    pub async fn available_capacity_at(&self, location_id: Ulid, t: Ms) -> Result<i64, EngineError> {
        let profile = self.ensure_capacity_profile(location_id).await?;
        let ls = self.require_location(&location_id)?;
        let guard = ls.read().await;
        let now = now_ms();
        let held: i64 = guard
            .occupants
            .values()
            .filter(|o| !o.status.is_terminal())
            .filter(|o| {
                o.reservation_span().is_some_and(|s| s.contains_instant(t))
                    || guard
                        .active_allocations_for_occupant(&o.id)
                        .any(|a| guard.held_span(a, now).contains_instant(t))
            })
            .map(|o| o.party_size as i64)
            .sum();
        Ok(profile.total_capacity as i64 - held)
    }

    pub async fn capacity_info(&self, location_id: Ulid, at: Option<Ms>) -> Result<CapacityInfo, EngineError> {
        let profile = self.ensure_capacity_profile(location_id).await?;
        let available_capacity = match at {
            Some(t) => Some(self.available_capacity_at(location_id, t).await?),
            None => None,
        };
        Ok(CapacityInfo {
            location_id,
            total_capacity: profile.total_capacity,
            default_table_capacity: profile.default_table_capacity,
            available_capacity,
        })
    }

    // ── Registries ───────────────────────────────────────────

    pub async fn list_locations(&self) -> Vec<Location> {
        let all: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(all.len());
        for ls in all {
            out.push(ls.read().await.location.clone());
        }
        out.sort_by_key(|l| l.id);
        out
    }

    pub async fn default_location(&self) -> Option<Location> {
        self.list_locations().await.into_iter().find(|l| l.is_default)
    }

    /// Location ids to scan: the given one (which must exist), else all.
    fn scope(&self, location_id: Option<Ulid>) -> Result<Vec<Ulid>, EngineError> {
        match location_id {
            Some(lid) => {
                self.require_location(&lid)?;
                Ok(vec![lid])
            }
            None => {
                let mut ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
                ids.sort();
                Ok(ids)
            }
        }
    }

    pub async fn list_sections(&self, location_id: Option<Ulid>) -> Result<Vec<SectionInfo>, EngineError> {
        let mut out = Vec::new();
        for lid in self.scope(location_id)? {
            let Some(ls) = self.get_location(&lid) else { continue };
            let guard = ls.read().await;
            out.extend(guard.sections.values().map(|s| SectionInfo {
                id: s.id,
                location_id: lid,
                name: s.name.clone(),
                floor_number: s.floor_number,
                capacity: guard.section_capacity(s.id),
                seat_count: guard.seats_in_section(s.id).count(),
            }));
        }
        Ok(out)
    }

    /// Seats with their status derived at `at` (default: now).
    pub async fn list_seats(
        &self,
        location_id: Option<Ulid>,
        section_id: Option<Ulid>,
        at: Option<Ms>,
    ) -> Result<Vec<SeatInfo>, EngineError> {
        let now = now_ms();
        let at = at.unwrap_or(now);
        let mut out = Vec::new();
        for lid in self.scope(location_id)? {
            let Some(ls) = self.get_location(&lid) else { continue };
            let guard = ls.read().await;
            for seat in guard.seats.values() {
                if section_id.is_some_and(|sid| sid != seat.section_id) {
                    continue;
                }
                let occupant = guard
                    .active_allocations_for_seat(&seat.id)
                    .find(|a| guard.held_span(a, now).contains_instant(at))
                    .map(|a| a.occupant);
                out.push(SeatInfo {
                    id: seat.id,
                    location_id: lid,
                    section_id: seat.section_id,
                    label: seat.label.clone(),
                    min_capacity: seat.min_capacity,
                    max_capacity: seat.max_capacity,
                    category: seat.category,
                    status: if occupant.is_some() { SeatStatus::Occupied } else { SeatStatus::Free },
                    occupant,
                });
            }
        }
        Ok(out)
    }

    pub async fn list_blocked_periods(
        &self,
        location_id: Option<Ulid>,
        active_only: bool,
    ) -> Result<Vec<BlockedPeriod>, EngineError> {
        let mut out = Vec::new();
        for lid in self.scope(location_id)? {
            let Some(ls) = self.get_location(&lid) else { continue };
            let guard = ls.read().await;
            out.extend(guard.blocked.iter().filter(|b| !active_only || b.is_active()).cloned());
        }
        Ok(out)
    }

    pub async fn list_occupants(
        &self,
        kind: OccupantKind,
        location_id: Option<Ulid>,
    ) -> Result<Vec<Occupant>, EngineError> {
        let mut out = Vec::new();
        for lid in self.scope(location_id)? {
            let Some(ls) = self.get_location(&lid) else { continue };
            let guard = ls.read().await;
            out.extend(guard.occupants.values().filter(|o| o.kind() == kind).cloned());
        }
        out.sort_by_key(|o| o.id);
        Ok(out)
    }

    pub async fn get_occupant(&self, occupant: OccupantRef) -> Option<Occupant> {
        let lid = self.location_for_entity(&occupant.id)?;
        let ls = self.get_location(&lid)?;
        let guard = ls.read().await;
        guard.occupant(&occupant).cloned()
    }

    // ── Calendar ─────────────────────────────────────────────

    /// Configured weekly rows, Sunday first.
    pub async fn operating_hours(&self) -> Vec<OperatingHours> {
        self.calendar.read().await.hours.iter().flatten().copied().collect()
    }

    pub async fn special_events(&self) -> Vec<SpecialEvent> {
        self.calendar.read().await.special_events.values().cloned().collect()
    }

    pub async fn settings(&self) -> RestaurantSettings {
        self.calendar.read().await.settings
    }
}
