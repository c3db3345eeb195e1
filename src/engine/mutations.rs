use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{blocked_seats, booked_seats, effective_capacity, exclusive_day_taken, remaining_seats};
use super::calendar::date_of;
use super::conflict::{now_ms, validate_instant, validate_span};
use super::state::LocationState;
use super::transitions::Action;
use super::{Engine, EngineError, WalCommand};

type LocationGuards = BTreeMap<Ulid, OwnedRwLockWriteGuard<LocationState>>;

fn check_name(name: &Option<String>, what: &'static str) -> Result<(), EngineError> {
    if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_minute(minute: u32) -> Result<(), EngineError> {
    if minute >= 24 * 60 {
        return Err(EngineError::validation(format!("minute of day {minute} out of range")));
    }
    Ok(())
}

fn check_party_size(party_size: u32) -> Result<(), EngineError> {
    if party_size == 0 {
        return Err(EngineError::validation("party_size must be positive"));
    }
    if party_size > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    Ok(())
}

fn refused(requested: u32, available: i64, reason: &str) -> EngineError {
    metrics::counter!(crate::observability::ADMISSIONS_REFUSED_TOTAL).increment(1);
    EngineError::CapacityExceeded { requested, available, reason: reason.to_string() }
}

impl Engine {
    // ── Location registry ────────────────────────────────────

    /// Lock locations in ascending id order.
    async fn lock_locations(&self, ids: impl IntoIterator<Item = Ulid>) -> Result<LocationGuards, EngineError> {
        let mut sorted: Vec<Ulid> = ids.into_iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut guards = BTreeMap::new();
        for id in sorted {
            let ls = self.require_location(&id)?;
            guards.insert(id, ls.write_owned().await);
        }
        Ok(guards)
    }

    /// WAL-append a registry commit, then apply it: creations and deletions
    /// at the map level, everything else to the held location.
    async fn persist_registry(&self, guards: &mut LocationGuards, events: Vec<Event>) -> Result<(), EngineError> {
        self.wal_append(&events).await?;
        for event in &events {
            match event {
                Event::LocationCreated { id, name, is_default, is_active } => {
                    let location = Location { id: *id, name: name.clone(), is_default: *is_default, is_active: *is_active };
                    self.state.insert(*id, Arc::new(RwLock::new(LocationState::new(location))));
                }
                Event::LocationDeleted { id } => {
                    self.state.remove(id);
                    self.entity_to_location.retain(|_, lid| *lid != *id);
                }
                other => {
                    if let Some(guard) = other.location_id().and_then(|lid| guards.get_mut(&lid)) {
                        guard.apply(other, &self.entity_to_location);
                    }
                }
            }
        }
        Ok(())
    }

    async fn current_defaults(&self) -> Vec<Ulid> {
        let locations: Vec<_> = self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        let mut defaults = Vec::new();
        for (id, ls) in locations {
            if ls.read().await.location.is_default {
                defaults.push(id);
            }
        }
        defaults
    }

    pub async fn create_location(
        &self,
        id: Ulid,
        name: Option<String>,
        is_default: bool,
        is_active: bool,
    ) -> Result<Location, EngineError> {
        check_name(&name, "location name too long")?;
        let _commit = self.commit_gate().await;
        let _registry = self.registry.lock().await;
        if self.state.len() >= MAX_LOCATIONS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many locations"));
        }
        if self.state.contains_key(&id) || self.entity_to_location.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let first = self.state.is_empty();
        let is_default = is_default || first;
        let mut events = Vec::new();
        let mut guards = if is_default {
            self.lock_locations(self.current_defaults().await).await?
        } else {
            BTreeMap::new()
        };
        for (lid, guard) in &guards {
            events.push(Event::LocationUpdated {
                id: *lid,
                name: guard.location.name.clone(),
                is_default: false,
                is_active: guard.location.is_active,
            });
        }
        events.push(Event::LocationCreated { id, name: name.clone(), is_default, is_active });
        self.persist_registry(&mut guards, events).await?;
        info!(location = %id, is_default, "location created");
        Ok(Location { id, name, is_default, is_active })
    }

    /// `None` leaves a field unchanged. Clearing the default flag hands it to
    /// the oldest other location; the last location cannot give it up.
    pub async fn update_location(
        &self,
        id: Ulid,
        name: Option<String>,
        is_default: Option<bool>,
        is_active: Option<bool>,
    ) -> Result<Location, EngineError> {
        check_name(&name, "location name too long")?;
        let _commit = self.commit_gate().await;
        let _registry = self.registry.lock().await;
        self.require_location(&id)?;

        let defaults = self.current_defaults().await;
        let was_default = defaults.contains(&id);
        let mut affected = vec![id];
        match is_default {
            Some(true) if !was_default => affected.extend(defaults),
            Some(false) if was_default => {
                let heir = self
                    .state
                    .iter()
                    .map(|e| *e.key())
                    .filter(|lid| *lid != id)
                    .min()
                    .ok_or_else(|| EngineError::validation("the only location must stay the default"))?;
                affected.push(heir);
            }
            _ => {}
        }
        let mut guards = self.lock_locations(affected).await?;

        let mut events = Vec::new();
        for (lid, guard) in &guards {
            let loc = &guard.location;
            let event = if *lid == id {
                Event::LocationUpdated {
                    id,
                    name: name.clone().or_else(|| loc.name.clone()),
                    is_default: is_default.unwrap_or(loc.is_default),
                    is_active: is_active.unwrap_or(loc.is_active),
                }
            } else {
                // Other defaults lose the flag; an heir gains it.
                Event::LocationUpdated {
                    id: *lid,
                    name: loc.name.clone(),
                    is_default: !loc.is_default,
                    is_active: loc.is_active,
                }
            };
            events.push(event);
        }
        self.persist_registry(&mut guards, events).await?;
        Ok(guards[&id].location.clone())
    }

    /// Only empty locations can be deleted. Deleting the default promotes the
    /// oldest remaining location.
    pub async fn delete_location(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.commit_gate().await;
        let _registry = self.registry.lock().await;
        self.require_location(&id)?;
        let heir = self.state.iter().map(|e| *e.key()).filter(|lid| *lid != id).min();
        let mut guards = self.lock_locations([id].into_iter().chain(heir)).await?;

        let target = &guards[&id];
        if !target.sections.is_empty() || !target.occupants.is_empty() {
            return Err(EngineError::HasChildren(id));
        }
        let mut events = Vec::new();
        if target.location.is_default
            && let Some(heir) = heir
        {
            let loc = &guards[&heir].location;
            events.push(Event::LocationUpdated {
                id: heir,
                name: loc.name.clone(),
                is_default: true,
                is_active: loc.is_active,
            });
        }
        events.push(Event::LocationDeleted { id });
        self.persist_registry(&mut guards, events).await?;
        info!(location = %id, "location deleted");
        Ok(())
    }

    // ── Capacity profile ─────────────────────────────────────

    pub async fn configure_capacity(
        &self,
        location_id: Ulid,
        total_capacity: u32,
        default_table_capacity: Option<u32>,
    ) -> Result<CapacityProfile, EngineError> {
        if total_capacity == 0 || default_table_capacity == Some(0) {
            return Err(EngineError::validation("capacity must be positive"));
        }
        if total_capacity > MAX_CAPACITY || default_table_capacity.is_some_and(|c| c > MAX_CAPACITY) {
            return Err(EngineError::LimitExceeded("capacity too large"));
        }
        let _commit = self.commit_gate().await;
        let ls = self.require_location(&location_id)?;
        let mut guard = ls.write().await;
        let default_table_capacity =
            default_table_capacity.unwrap_or(guard.capacity_profile().default_table_capacity);
        let event = Event::CapacityConfigured { location_id, total_capacity, default_table_capacity };
        self.persist_and_apply(&mut guard, vec![event]).await?;
        Ok(guard.capacity_profile())
    }

    /// Profile of the location, persisting the defaults on first read.
    pub async fn ensure_capacity_profile(&self, location_id: Ulid) -> Result<CapacityProfile, EngineError> {
        let ls = self.require_location(&location_id)?;
        if let Some(profile) = ls.read().await.capacity {
            return Ok(profile);
        }
        let _commit = self.commit_gate().await;
        let mut guard = ls.write().await;
        if let Some(profile) = guard.capacity {
            return Ok(profile);
        }
        let profile = CapacityProfile::default();
        let event = Event::CapacityConfigured {
            location_id,
            total_capacity: profile.total_capacity,
            default_table_capacity: profile.default_table_capacity,
        };
        self.persist_and_apply(&mut guard, vec![event]).await?;
        Ok(profile)
    }

    // ── Sections & seats ─────────────────────────────────────

    pub async fn create_section(
        &self,
        id: Ulid,
        location_id: Ulid,
        name: Option<String>,
        floor_number: i32,
    ) -> Result<(), EngineError> {
        check_name(&name, "section name too long")?;
        let _commit = self.commit_gate().await;
        let ls = self.require_location(&location_id)?;
        let mut guard = ls.write().await;
        if guard.sections.len() >= MAX_SECTIONS_PER_LOCATION {
            return Err(EngineError::LimitExceeded("too many sections"));
        }
        if self.entity_to_location.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::SectionCreated { id, location_id, name, floor_number };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    pub async fn delete_section(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.commit_gate().await;
        let (location_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.sections.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if guard.seats_in_section(id).next().is_some() || guard.blocked.iter().any(|b| b.section_id == Some(id)) {
            return Err(EngineError::HasChildren(id));
        }
        self.persist_and_apply(&mut guard, vec![Event::SectionDeleted { id, location_id }]).await
    }

    /// Seats live in a section; the location is the section's.
    pub async fn create_seat(
        &self,
        id: Ulid,
        section_id: Ulid,
        label: String,
        min_capacity: u32,
        max_capacity: u32,
        category: SeatCategory,
    ) -> Result<(), EngineError> {
        if label.is_empty() {
            return Err(EngineError::validation("seat label must not be empty"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(EngineError::LimitExceeded("seat label too long"));
        }
        if max_capacity == 0 || min_capacity > max_capacity {
            return Err(EngineError::validation("seat capacity must satisfy 0 < min <= max"));
        }
        if max_capacity > MAX_CAPACITY {
            return Err(EngineError::LimitExceeded("seat capacity too large"));
        }
        let _commit = self.commit_gate().await;
        let (location_id, mut guard) = self.resolve_entity_write(&section_id).await?;
        if !guard.sections.contains_key(&section_id) {
            return Err(EngineError::NotFound(section_id));
        }
        if guard.seats.len() >= MAX_SEATS_PER_LOCATION {
            return Err(EngineError::LimitExceeded("too many seats"));
        }
        if self.entity_to_location.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.seat_by_label(&label).is_some() {
            return Err(EngineError::validation(format!("seat label {label:?} already used at this location")));
        }
        let event = Event::SeatCreated { id, location_id, section_id, label, min_capacity, max_capacity, category };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    /// A seat still holding guests cannot be removed; its history stays.
    pub async fn delete_seat(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.commit_gate().await;
        let (location_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.seats.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if guard.active_allocations_for_seat(&id).next().is_some() {
            return Err(EngineError::HasChildren(id));
        }
        self.persist_and_apply(&mut guard, vec![Event::SeatDeleted { id, location_id }]).await
    }

    // ── Blocked periods ──────────────────────────────────────

    pub async fn add_blocked_period(
        &self,
        id: Ulid,
        location_id: Ulid,
        section_id: Option<Ulid>,
        span: Span,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let _commit = self.commit_gate().await;
        let ls = self.require_location(&location_id)?;
        let mut guard = ls.write().await;
        if let Some(sid) = section_id
            && !guard.sections.contains_key(&sid)
        {
            return Err(EngineError::NotFound(sid));
        }
        if guard.blocked.len() >= MAX_BLOCKED_PERIODS_PER_LOCATION {
            return Err(EngineError::LimitExceeded("too many blocked periods"));
        }
        if self.entity_to_location.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::BlockedPeriodAdded { id, location_id, section_id, span, reason };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    /// `None` leaves a field unchanged.
    pub async fn update_blocked_period(
        &self,
        id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
        reason: Option<String>,
        status: Option<BlockStatus>,
    ) -> Result<BlockedPeriod, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let _commit = self.commit_gate().await;
        let (location_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.blocked_period(&id).ok_or(EngineError::NotFound(id))?;
        let span = Span {
            start: start.unwrap_or(current.span.start),
            end: end.unwrap_or(current.span.end),
        };
        validate_span(&span)?;
        let event = Event::BlockedPeriodUpdated {
            id,
            location_id,
            span,
            reason: reason.or_else(|| current.reason.clone()),
            status: status.unwrap_or(current.status),
        };
        self.persist_and_apply(&mut guard, vec![event]).await?;
        guard.blocked_period(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn cancel_blocked_period(&self, id: Ulid) -> Result<BlockedPeriod, EngineError> {
        self.update_blocked_period(id, None, None, None, Some(BlockStatus::Cancelled)).await
    }

    pub async fn remove_blocked_period(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.commit_gate().await;
        let (location_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.blocked_period(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut guard, vec![Event::BlockedPeriodRemoved { id, location_id }]).await
    }

    // ── Restaurant calendar ──────────────────────────────────

    pub async fn set_operating_hours(
        &self,
        day_of_week: u8,
        open_minute: u32,
        close_minute: u32,
        closed: bool,
    ) -> Result<OperatingHours, EngineError> {
        if day_of_week > 6 {
            return Err(EngineError::validation("day_of_week must be 0 (Sunday) to 6"));
        }
        check_minute(open_minute)?;
        check_minute(close_minute)?;
        let _commit = self.commit_gate().await;
        let mut cal = self.calendar.write().await;
        let event = Event::OperatingHoursSet { day_of_week, open_minute, close_minute, closed };
        self.persist_calendar(&mut cal, vec![event]).await?;
        Ok(OperatingHours { day_of_week, open_minute, close_minute, closed })
    }

    /// Upsert by date: an event already on that date is replaced.
    pub async fn set_special_event(&self, event: SpecialEvent) -> Result<(), EngineError> {
        for minute in [event.start_minute, event.end_minute].into_iter().flatten() {
            check_minute(minute)?;
        }
        if event.max_capacity.is_some_and(|c| c > MAX_CAPACITY) {
            return Err(EngineError::LimitExceeded("capacity too large"));
        }
        check_name(&event.description, "description too long")?;
        let _commit = self.commit_gate().await;
        let mut cal = self.calendar.write().await;
        if cal.special_events.len() >= MAX_SPECIAL_EVENTS && cal.special_event(event.date).is_none() {
            return Err(EngineError::LimitExceeded("too many special events"));
        }
        let e = Event::SpecialEventSet {
            id: event.id,
            date: event.date,
            closed: event.closed,
            exclusive_booking: event.exclusive_booking,
            max_capacity: event.max_capacity,
            start_minute: event.start_minute,
            end_minute: event.end_minute,
            description: event.description,
        };
        self.persist_calendar(&mut cal, vec![e]).await
    }

    pub async fn remove_special_event(&self, id: Ulid) -> Result<NaiveDate, EngineError> {
        let _commit = self.commit_gate().await;
        let mut cal = self.calendar.write().await;
        let date = cal.special_event_by_id(id).ok_or(EngineError::NotFound(id))?.date;
        self.persist_calendar(&mut cal, vec![Event::SpecialEventRemoved { id }]).await?;
        Ok(date)
    }

    /// `None` leaves a setting unchanged; `Some(None)` clears the party ceiling.
    pub async fn update_settings(
        &self,
        slot_interval_minutes: Option<u32>,
        max_party_size: Option<Option<u32>>,
        reservation_duration_minutes: Option<u32>,
    ) -> Result<RestaurantSettings, EngineError> {
        if slot_interval_minutes.is_some_and(|m| !(MIN_SLOT_INTERVAL_MINUTES..24 * 60).contains(&m)) {
            return Err(EngineError::validation("slot_interval_minutes out of range"));
        }
        if reservation_duration_minutes.is_some_and(|m| m == 0 || m > MAX_RESERVATION_DURATION_MINUTES) {
            return Err(EngineError::validation("reservation_duration_minutes out of range"));
        }
        if let Some(Some(m)) = max_party_size {
            check_party_size(m)?;
        }
        let _commit = self.commit_gate().await;
        let mut cal = self.calendar.write().await;
        let current = cal.settings;
        let next = RestaurantSettings {
            slot_interval_minutes: slot_interval_minutes.unwrap_or(current.slot_interval_minutes),
            max_party_size: max_party_size.unwrap_or(current.max_party_size),
            reservation_duration_minutes: reservation_duration_minutes.unwrap_or(current.reservation_duration_minutes),
        };
        let event = Event::SettingsUpdated {
            slot_interval_minutes: next.slot_interval_minutes,
            max_party_size: next.max_party_size,
            reservation_duration_minutes: next.reservation_duration_minutes,
        };
        self.persist_calendar(&mut cal, vec![event]).await?;
        Ok(next)
    }

    // ── Occupants ────────────────────────────────────────────

    /// Book a table through the public path: the start must fall inside the
    /// opening hours and the party must fit the seats left over its window.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        location_id: Ulid,
        name: Option<String>,
        party_size: u32,
        start: Ms,
        duration_minutes: Option<u32>,
    ) -> Result<Occupant, EngineError> {
        check_party_size(party_size)?;
        check_name(&name, "guest name too long")?;
        if duration_minutes.is_some_and(|m| m == 0 || m > MAX_RESERVATION_DURATION_MINUTES) {
            return Err(EngineError::validation("duration_minutes out of range"));
        }
        validate_instant(start)?;

        let _commit = self.commit_gate().await;
        let cal = self.calendar.read().await;
        let ls = self.require_location(&location_id)?;
        let mut guard = ls.write().await;
        if guard.occupants.len() >= MAX_OCCUPANTS_PER_LOCATION {
            return Err(EngineError::LimitExceeded("too many occupants"));
        }
        if self.entity_to_location.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let minutes = duration_minutes.unwrap_or(cal.settings.reservation_duration_minutes);
        let span = Span::new(start, start + minutes as Ms * MINUTE_MS);
        validate_span(&span)?;

        if !cal.is_open_at(start) {
            return Err(refused(party_size, 0, "closed"));
        }
        if date_of(start).is_some_and(|d| exclusive_day_taken(&cal, &guard, d)) {
            return Err(refused(party_size, 0, "exclusive booking"));
        }
        let event_max = date_of(start)
            .and_then(|d| cal.special_event(d))
            .and_then(|e| e.max_capacity);
        let total = effective_capacity(guard.capacity_profile().total_capacity, cal.settings.max_party_size, event_max);
        let booked = booked_seats(&guard, &span, None);
        let blocked = blocked_seats(&guard, &span, None, total);
        let available = remaining_seats(total, booked, blocked);
        if (party_size as i64) > available {
            let reason = if cal.settings.max_party_size.is_some_and(|m| party_size > m) {
                "exceeds maximum party size"
            } else if blocked > 0 && booked < total {
                "blocked"
            } else {
                "insufficient capacity"
            };
            return Err(refused(party_size, available, reason));
        }
        drop(cal);

        let at = now_ms();
        let event = Event::ReservationCreated { id, location_id, name, party_size, span, at };
        self.persist_and_apply(&mut guard, vec![event]).await?;
        guard.occupants.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Walk-in registration. No capacity check: the party waits for a seat.
    pub async fn create_waitlist_entry(
        &self,
        id: Ulid,
        location_id: Ulid,
        name: Option<String>,
        party_size: u32,
        check_in: Option<Ms>,
    ) -> Result<Occupant, EngineError> {
        check_party_size(party_size)?;
        check_name(&name, "guest name too long")?;
        let check_in = check_in.unwrap_or_else(now_ms);
        validate_instant(check_in)?;

        let _commit = self.commit_gate().await;
        let ls = self.require_location(&location_id)?;
        let mut guard = ls.write().await;
        if guard.occupants.len() >= MAX_OCCUPANTS_PER_LOCATION {
            return Err(EngineError::LimitExceeded("too many occupants"));
        }
        if self.entity_to_location.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::WaitlistEntryCreated { id, location_id, name, party_size, check_in };
        self.persist_and_apply(&mut guard, vec![event]).await?;
        guard.occupants.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Occupants sitting in `reserved` since before `cutoff`.
    pub fn collect_expired_reserved(&self, cutoff: Ms) -> Vec<OccupantRef> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let Ok(guard) = entry.value().try_read() else {
                debug!(location = %entry.key(), "location busy, expiry sweep skipped until next tick");
                continue;
            };
            expired.extend(
                guard
                    .occupants
                    .values()
                    .filter(|o| o.status == OccupantStatus::Reserved && o.status_changed_at <= cutoff)
                    .map(|o| o.reference()),
            );
        }
        expired
    }

    pub async fn expire_reserved(&self, occupant: OccupantRef) -> Result<OccupantStatus, EngineError> {
        self.transition(occupant, Action::Expire).await
    }

    /// Rewrite the WAL as the minimal event set recreating current state.
    /// Released allocations are kept: they are the seating history.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let mut events = Vec::new();

        {
            let cal = self.calendar.read().await;
            events.extend(cal.hours.iter().flatten().map(|h| Event::OperatingHoursSet {
                day_of_week: h.day_of_week,
                open_minute: h.open_minute,
                close_minute: h.close_minute,
                closed: h.closed,
            }));
            events.extend(cal.special_events.values().map(|e| Event::SpecialEventSet {
                id: e.id,
                date: e.date,
                closed: e.closed,
                exclusive_booking: e.exclusive_booking,
                max_capacity: e.max_capacity,
                start_minute: e.start_minute,
                end_minute: e.end_minute,
                description: e.description.clone(),
            }));
            if cal.settings != RestaurantSettings::default() {
                events.push(Event::SettingsUpdated {
                    slot_interval_minutes: cal.settings.slot_interval_minutes,
                    max_party_size: cal.settings.max_party_size,
                    reservation_duration_minutes: cal.settings.reservation_duration_minutes,
                });
            }
        }

        let mut location_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        location_ids.sort();
        for lid in location_ids {
            let Some(ls) = self.get_location(&lid) else { continue };
            let guard = ls.read().await;
            emit_location(&guard, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn emit_location(ls: &LocationState, events: &mut Vec<Event>) {
    let location_id = ls.id();
    let loc = &ls.location;
    events.push(Event::LocationCreated {
        id: location_id,
        name: loc.name.clone(),
        is_default: loc.is_default,
        is_active: loc.is_active,
    });
    if let Some(p) = ls.capacity {
        events.push(Event::CapacityConfigured {
            location_id,
            total_capacity: p.total_capacity,
            default_table_capacity: p.default_table_capacity,
        });
    }
    for s in ls.sections.values() {
        events.push(Event::SectionCreated {
            id: s.id,
            location_id,
            name: s.name.clone(),
            floor_number: s.floor_number,
        });
    }
    for s in ls.seats.values() {
        events.push(Event::SeatCreated {
            id: s.id,
            location_id,
            section_id: s.section_id,
            label: s.label.clone(),
            min_capacity: s.min_capacity,
            max_capacity: s.max_capacity,
            category: s.category,
        });
    }
    for b in &ls.blocked {
        events.push(Event::BlockedPeriodAdded {
            id: b.id,
            location_id,
            section_id: b.section_id,
            span: b.span,
            reason: b.reason.clone(),
        });
        if b.status != BlockStatus::Active {
            events.push(Event::BlockedPeriodUpdated {
                id: b.id,
                location_id,
                span: b.span,
                reason: b.reason.clone(),
                status: b.status,
            });
        }
    }

    let mut occupants: Vec<&Occupant> = ls.occupants.values().collect();
    occupants.sort_by_key(|o| o.id);
    for o in occupants {
        events.push(match o.timing {
            OccupantTiming::Reservation { span } => Event::ReservationCreated {
                id: o.id,
                location_id,
                name: o.name.clone(),
                party_size: o.party_size,
                span,
                at: o.status_changed_at,
            },
            OccupantTiming::Waitlist { check_in } => Event::WaitlistEntryCreated {
                id: o.id,
                location_id,
                name: o.name.clone(),
                party_size: o.party_size,
                check_in,
            },
        });
        let created_at = match o.timing {
            OccupantTiming::Reservation { .. } => o.status_changed_at,
            OccupantTiming::Waitlist { check_in } => check_in,
        };
        if o.status != o.kind().initial_status() || o.status_changed_at != created_at {
            events.push(Event::OccupantStatusChanged {
                occupant: o.reference(),
                location_id,
                status: o.status,
                at: o.status_changed_at,
            });
        }
    }

    for a in &ls.allocations {
        events.push(Event::SeatAllocated {
            id: a.id,
            location_id,
            seat_id: a.seat_id,
            occupant: a.occupant,
            start: a.start,
        });
        if let Some(at) = a.released_at {
            events.push(Event::SeatReleased { id: a.id, location_id, at });
        }
    }
}
