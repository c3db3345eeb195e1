use std::collections::{BTreeMap, HashMap};

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Everything that belongs to one location. Guarded as a unit: holding the
/// write lock is what serializes allocation decisions for its seats.
#[derive(Debug, Clone)]
pub struct LocationState {
    pub location: Location,
    /// `None` until first configured or first read.
    pub capacity: Option<CapacityProfile>,
    pub sections: BTreeMap<Ulid, SeatSection>,
    pub seats: BTreeMap<Ulid, Seat>,
    /// Sorted by `span.start`.
    pub blocked: Vec<BlockedPeriod>,
    pub occupants: HashMap<Ulid, Occupant>,
    /// Arena: allocations are appended and never removed, only released.
    pub allocations: Vec<SeatAllocation>,
    allocation_index: HashMap<Ulid, usize>,
    /// Seat id → arena positions of its active allocations.
    active_by_seat: HashMap<Ulid, Vec<usize>>,
    /// Occupant id → arena positions of every allocation it ever held.
    by_occupant: HashMap<Ulid, Vec<usize>>,
}

impl LocationState {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            capacity: None,
            sections: BTreeMap::new(),
            seats: BTreeMap::new(),
            blocked: Vec::new(),
            occupants: HashMap::new(),
            allocations: Vec::new(),
            allocation_index: HashMap::new(),
            active_by_seat: HashMap::new(),
            by_occupant: HashMap::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.location.id
    }

    pub fn capacity_profile(&self) -> CapacityProfile {
        self.capacity.unwrap_or_default()
    }

    pub fn seat_by_label(&self, label: &str) -> Option<&Seat> {
        self.seats.values().find(|s| s.label == label)
    }

    pub fn seats_in_section(&self, section_id: Ulid) -> impl Iterator<Item = &Seat> {
        self.seats.values().filter(move |s| s.section_id == section_id)
    }

    /// Aggregate of the section's seat maxima.
    pub fn section_capacity(&self, section_id: Ulid) -> u32 {
        self.seats_in_section(section_id).map(|s| s.max_capacity).sum()
    }

    /// Occupant by tagged reference; a kind mismatch is treated as absent.
    pub fn occupant(&self, r: &OccupantRef) -> Option<&Occupant> {
        self.occupants.get(&r.id).filter(|o| o.kind() == r.kind)
    }

    pub fn allocation(&self, id: &Ulid) -> Option<&SeatAllocation> {
        self.allocation_index.get(id).map(|&i| &self.allocations[i])
    }

    pub fn active_allocations_for_seat(&self, seat_id: &Ulid) -> impl Iterator<Item = &SeatAllocation> {
        self.active_by_seat
            .get(seat_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.allocations[i])
    }

    pub fn allocations_for_occupant(&self, occupant_id: &Ulid) -> impl Iterator<Item = &SeatAllocation> {
        self.by_occupant
            .get(occupant_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.allocations[i])
    }

    pub fn active_allocations_for_occupant(&self, occupant_id: &Ulid) -> impl Iterator<Item = &SeatAllocation> {
        self.allocations_for_occupant(occupant_id).filter(|a| a.is_active())
    }

    /// How long an active allocation holds its seat: until the occupant's
    /// booked end while that is still ahead, otherwise until released.
    pub fn held_span(&self, alloc: &SeatAllocation, now: Ms) -> Span {
        if let Some(released) = alloc.released_at {
            return Span { start: alloc.start, end: released.max(alloc.start) };
        }
        let booked_end = self
            .occupant(&alloc.occupant)
            .and_then(|o| o.reservation_span())
            .map(|s| s.end);
        match booked_end {
            Some(end) if end > now && end > alloc.start => Span::new(alloc.start, end),
            _ => Span::open_ended(alloc.start),
        }
    }

    /// Active blocked periods overlapping `query`.
    /// Uses binary search to skip blocks starting at or after `query.end`.
    pub fn blocked_overlapping(&self, query: &Span) -> impl Iterator<Item = &BlockedPeriod> {
        let right_bound = self.blocked.partition_point(|b| b.span.start < query.end);
        self.blocked[..right_bound]
            .iter()
            .filter(move |b| b.is_active() && b.span.end > query.start)
    }

    pub fn blocked_period(&self, id: &Ulid) -> Option<&BlockedPeriod> {
        self.blocked.iter().find(|b| b.id == *id)
    }

    fn insert_blocked(&mut self, period: BlockedPeriod) {
        let pos = self
            .blocked
            .binary_search_by_key(&period.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.blocked.insert(pos, period);
    }

    fn remove_blocked(&mut self, id: &Ulid) -> Option<BlockedPeriod> {
        let pos = self.blocked.iter().position(|b| b.id == *id)?;
        Some(self.blocked.remove(pos))
    }

    /// Apply a location-scoped event (caller holds the lock).
    /// `entity_map` tracks which location owns every child id.
    pub fn apply(&mut self, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
        let location_id = self.id();
        match event {
            Event::LocationUpdated { name, is_default, is_active, .. } => {
                self.location.name = name.clone();
                self.location.is_default = *is_default;
                self.location.is_active = *is_active;
            }
            Event::CapacityConfigured { total_capacity, default_table_capacity, .. } => {
                self.capacity = Some(CapacityProfile {
                    total_capacity: *total_capacity,
                    default_table_capacity: *default_table_capacity,
                });
            }
            Event::SectionCreated { id, name, floor_number, .. } => {
                self.sections.insert(
                    *id,
                    SeatSection { id: *id, location_id, name: name.clone(), floor_number: *floor_number },
                );
                entity_map.insert(*id, location_id);
            }
            Event::SectionDeleted { id, .. } => {
                self.sections.remove(id);
                entity_map.remove(id);
            }
            Event::SeatCreated { id, section_id, label, min_capacity, max_capacity, category, .. } => {
                self.seats.insert(
                    *id,
                    Seat {
                        id: *id,
                        section_id: *section_id,
                        label: label.clone(),
                        min_capacity: *min_capacity,
                        max_capacity: *max_capacity,
                        category: *category,
                    },
                );
                entity_map.insert(*id, location_id);
            }
            Event::SeatDeleted { id, .. } => {
                self.seats.remove(id);
                self.active_by_seat.remove(id);
                entity_map.remove(id);
            }
            Event::BlockedPeriodAdded { id, section_id, span, reason, .. } => {
                self.insert_blocked(BlockedPeriod {
                    id: *id,
                    location_id,
                    section_id: *section_id,
                    span: *span,
                    reason: reason.clone(),
                    status: BlockStatus::Active,
                });
                entity_map.insert(*id, location_id);
            }
            Event::BlockedPeriodUpdated { id, span, reason, status, .. } => {
                if let Some(mut period) = self.remove_blocked(id) {
                    period.span = *span;
                    period.reason = reason.clone();
                    period.status = *status;
                    self.insert_blocked(period);
                }
            }
            Event::BlockedPeriodRemoved { id, .. } => {
                self.remove_blocked(id);
                entity_map.remove(id);
            }
            Event::ReservationCreated { id, name, party_size, span, at, .. } => {
                self.occupants.insert(
                    *id,
                    Occupant {
                        id: *id,
                        location_id,
                        name: name.clone(),
                        party_size: *party_size,
                        status: OccupantStatus::Booked,
                        timing: OccupantTiming::Reservation { span: *span },
                        status_changed_at: *at,
                    },
                );
                entity_map.insert(*id, location_id);
            }
            Event::WaitlistEntryCreated { id, name, party_size, check_in, .. } => {
                self.occupants.insert(
                    *id,
                    Occupant {
                        id: *id,
                        location_id,
                        name: name.clone(),
                        party_size: *party_size,
                        status: OccupantStatus::Waiting,
                        timing: OccupantTiming::Waitlist { check_in: *check_in },
                        status_changed_at: *check_in,
                    },
                );
                entity_map.insert(*id, location_id);
            }
            Event::OccupantStatusChanged { occupant, status, at, .. } => {
                if let Some(o) = self.occupants.get_mut(&occupant.id) {
                    o.status = *status;
                    o.status_changed_at = *at;
                }
            }
            Event::SeatAllocated { id, seat_id, occupant, start, .. } => {
                let pos = self.allocations.len();
                self.allocations.push(SeatAllocation {
                    id: *id,
                    seat_id: *seat_id,
                    occupant: *occupant,
                    start: *start,
                    released_at: None,
                });
                self.allocation_index.insert(*id, pos);
                self.active_by_seat.entry(*seat_id).or_default().push(pos);
                self.by_occupant.entry(occupant.id).or_default().push(pos);
                entity_map.insert(*id, location_id);
            }
            Event::SeatReleased { id, at, .. } => {
                let Some(&pos) = self.allocation_index.get(id) else { return };
                let alloc = &mut self.allocations[pos];
                if alloc.released_at.is_some() {
                    return;
                }
                alloc.released_at = Some(*at);
                let seat_id = alloc.seat_id;
                if let Some(active) = self.active_by_seat.get_mut(&seat_id) {
                    active.retain(|&i| i != pos);
                    if active.is_empty() {
                        self.active_by_seat.remove(&seat_id);
                    }
                }
            }
            // LocationCreated/Deleted are handled at the DashMap level;
            // calendar events never reach a location.
            Event::LocationCreated { .. }
            | Event::LocationDeleted { .. }
            | Event::OperatingHoursSet { .. }
            | Event::SpecialEventSet { .. }
            | Event::SpecialEventRemoved { .. }
            | Event::SettingsUpdated { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> LocationState {
        LocationState::new(Location {
            id: Ulid::new(),
            name: Some("Main".into()),
            is_default: true,
            is_active: true,
        })
    }

    fn add_seat(ls: &mut LocationState, map: &DashMap<Ulid, Ulid>, section: Ulid, label: &str, max: u32) -> Ulid {
        let id = Ulid::new();
        ls.apply(
            &Event::SeatCreated {
                id,
                location_id: ls.id(),
                section_id: section,
                label: label.into(),
                min_capacity: 1,
                max_capacity: max,
                category: SeatCategory::Standard,
            },
            map,
        );
        id
    }

    #[test]
    fn blocked_periods_kept_sorted() {
        let map = DashMap::new();
        let mut ls = location();
        for start in [300, 100, 200] {
            ls.apply(
                &Event::BlockedPeriodAdded {
                    id: Ulid::new(),
                    location_id: ls.id(),
                    section_id: None,
                    span: Span::new(start, start + 50),
                    reason: None,
                },
                &map,
            );
        }
        let starts: Vec<_> = ls.blocked.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn cancelled_block_not_overlapping() {
        let map = DashMap::new();
        let mut ls = location();
        let id = Ulid::new();
        ls.apply(
            &Event::BlockedPeriodAdded {
                id,
                location_id: ls.id(),
                section_id: None,
                span: Span::new(100, 200),
                reason: Some("private party".into()),
            },
            &map,
        );
        assert_eq!(ls.blocked_overlapping(&Span::new(150, 160)).count(), 1);
        ls.apply(
            &Event::BlockedPeriodUpdated {
                id,
                location_id: ls.id(),
                span: Span::new(100, 200),
                reason: None,
                status: BlockStatus::Cancelled,
            },
            &map,
        );
        assert_eq!(ls.blocked_overlapping(&Span::new(150, 160)).count(), 0);
        assert!(ls.blocked_period(&id).is_some());
    }

    #[test]
    fn blocked_adjacent_not_overlapping() {
        let map = DashMap::new();
        let mut ls = location();
        ls.apply(
            &Event::BlockedPeriodAdded {
                id: Ulid::new(),
                location_id: ls.id(),
                section_id: None,
                span: Span::new(100, 200),
                reason: None,
            },
            &map,
        );
        assert_eq!(ls.blocked_overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(ls.blocked_overlapping(&Span::new(0, 100)).count(), 0);
    }

    #[test]
    fn section_capacity_is_sum_of_seat_maxima() {
        let map = DashMap::new();
        let mut ls = location();
        let section = Ulid::new();
        let other = Ulid::new();
        add_seat(&mut ls, &map, section, "T1", 4);
        add_seat(&mut ls, &map, section, "T2", 2);
        add_seat(&mut ls, &map, other, "B1", 6);
        assert_eq!(ls.section_capacity(section), 6);
        assert_eq!(ls.section_capacity(other), 6);
        assert_eq!(ls.seat_by_label("T2").map(|s| s.max_capacity), Some(2));
    }

    #[test]
    fn release_keeps_history_and_clears_seat() {
        let map = DashMap::new();
        let mut ls = location();
        let seat = add_seat(&mut ls, &map, Ulid::new(), "T1", 4);
        let alloc = Ulid::new();
        let occupant = OccupantRef::waitlist(Ulid::new());
        ls.apply(
            &Event::SeatAllocated { id: alloc, location_id: ls.id(), seat_id: seat, occupant, start: 10 },
            &map,
        );
        assert_eq!(ls.active_allocations_for_seat(&seat).count(), 1);

        let release = Event::SeatReleased { id: alloc, location_id: ls.id(), at: 50 };
        ls.apply(&release, &map);
        ls.apply(&Event::SeatReleased { id: alloc, location_id: ls.id(), at: 99 }, &map);

        assert_eq!(ls.active_allocations_for_seat(&seat).count(), 0);
        assert_eq!(ls.allocations.len(), 1);
        assert_eq!(ls.allocation(&alloc).unwrap().released_at, Some(50));
        assert_eq!(ls.allocations_for_occupant(&occupant.id).count(), 1);
        assert_eq!(map.get(&alloc).map(|e| *e.value()), Some(ls.id()));
    }

    #[test]
    fn held_span_follows_booked_end_then_stays_open() {
        let map = DashMap::new();
        let mut ls = location();
        let seat = add_seat(&mut ls, &map, Ulid::new(), "T1", 4);
        let rid = Ulid::new();
        ls.apply(
            &Event::ReservationCreated {
                id: rid,
                location_id: ls.id(),
                name: None,
                party_size: 2,
                span: Span::new(1_000, 2_000),
                at: 0,
            },
            &map,
        );
        ls.apply(
            &Event::SeatAllocated {
                id: Ulid::new(),
                location_id: ls.id(),
                seat_id: seat,
                occupant: OccupantRef::reservation(rid),
                start: 1_000,
            },
            &map,
        );
        let alloc = ls.allocations[0].clone();
        assert_eq!(ls.held_span(&alloc, 500), Span::new(1_000, 2_000));
        // Party overstays: the seat stays held until released.
        assert_eq!(ls.held_span(&alloc, 2_500), Span::open_ended(1_000));
    }

    #[test]
    fn occupant_lookup_checks_kind() {
        let map = DashMap::new();
        let mut ls = location();
        let wid = Ulid::new();
        ls.apply(
            &Event::WaitlistEntryCreated { id: wid, location_id: ls.id(), name: None, party_size: 3, check_in: 5 },
            &map,
        );
        assert!(ls.occupant(&OccupantRef::waitlist(wid)).is_some());
        assert!(ls.occupant(&OccupantRef::reservation(wid)).is_none());
    }
}
