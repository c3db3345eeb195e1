//! Seat arithmetic for time windows. Nothing here locks or writes: callers
//! hand in the calendar and a location snapshot they already hold.

use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::calendar::{Calendar, date_of, midnight_ms, slot_starts};
use super::state::LocationState;

/// Physical seat count: the location profile, or a section's seat aggregate.
pub fn physical_capacity(ls: &LocationState, section_id: Option<Ulid>) -> u32 {
    match section_id {
        Some(sid) => ls.section_capacity(sid),
        None => ls.capacity_profile().total_capacity,
    }
}

/// Smallest of the physical count, the administrator's party ceiling and the
/// day's special-event ceiling.
pub fn effective_capacity(physical: u32, admin_max: Option<u32>, event_max: Option<u32>) -> u32 {
    [Some(physical), admin_max, event_max].into_iter().flatten().min().unwrap_or(physical)
}

/// Party sizes of live reservations whose booked window overlaps `window`.
/// With a section, only reservations holding a seat in it count.
pub fn booked_seats(ls: &LocationState, window: &Span, section_id: Option<Ulid>) -> u32 {
    ls.occupants
        .values()
        .filter(|o| !o.status.is_terminal())
        .filter(|o| o.reservation_span().is_some_and(|s| s.overlaps(window)))
        .filter(|o| match section_id {
            None => true,
            Some(sid) => ls
                .active_allocations_for_occupant(&o.id)
                .any(|a| ls.seats.get(&a.seat_id).is_some_and(|s| s.section_id == sid)),
        })
        .map(|o| o.party_size)
        .sum()
}

/// Seats removed by active blocks overlapping `window`: everything for a
/// location-wide block, the section's seats for a section block. Never more
/// than `capacity`.
pub fn blocked_seats(ls: &LocationState, window: &Span, section_id: Option<Ulid>, capacity: u32) -> u32 {
    let mut sections = HashSet::new();
    let mut blocked = 0u32;
    for b in ls.blocked_overlapping(window) {
        match b.section_id {
            None => return capacity,
            Some(sid) if section_id.is_none_or(|q| q == sid) => {
                if sections.insert(sid) {
                    blocked = blocked.saturating_add(ls.section_capacity(sid));
                }
            }
            Some(_) => {}
        }
    }
    blocked.min(capacity)
}

/// `total − booked − blocked`, where the blocked amount only eats into what
/// bookings left over. Negative only when bookings alone exceed the total.
pub fn remaining_seats(total: u32, booked: u32, blocked: u32) -> i64 {
    let remaining = total as i64 - booked as i64;
    remaining - (blocked as i64).min(remaining.max(0))
}

/// Whether a live reservation already claims the exclusive day at this location.
pub fn exclusive_claimed(ls: &LocationState, service: &Span) -> bool {
    ls.occupants.values().any(|o| {
        !matches!(o.status, OccupantStatus::Canceled | OccupantStatus::NoShow)
            && o.reservation_span().is_some_and(|s| s.overlaps(service))
    })
}

pub fn exclusive_day_taken(cal: &Calendar, ls: &LocationState, date: NaiveDate) -> bool {
    let exclusive = cal.special_event(date).is_some_and(|e| e.exclusive_booking);
    exclusive && cal.service_window(date).is_some_and(|w| exclusive_claimed(ls, &w))
}

/// Per-slot availability for one date, location-wide or for one section.
pub fn report(
    cal: &Calendar,
    ls: &LocationState,
    date: NaiveDate,
    party_size: u32,
    section_id: Option<Ulid>,
) -> AvailabilityReport {
    let settings = cal.settings;
    let physical = physical_capacity(ls, section_id);
    let event_max = cal.special_event(date).and_then(|e| e.max_capacity);
    let effective = effective_capacity(physical, settings.max_party_size, event_max);

    let mut report = AvailabilityReport {
        slots: Vec::new(),
        max_available_seats: 0,
        actual_capacity: physical,
        admin_max_party_size: settings.max_party_size,
        effective_max_party_size: effective,
    };
    let Some(service) = cal.service_window(date) else {
        return report;
    };

    let exclusive_taken = exclusive_day_taken(cal, ls, date);
    let duration = settings.reservation_duration_minutes.max(1) as Ms * MINUTE_MS;
    let midnight = midnight_ms(date);

    for start in slot_starts(&service, settings.slot_interval_minutes) {
        let window = Span::new(start, start + duration);
        let booked = booked_seats(ls, &window, section_id);
        let blocked = blocked_seats(ls, &window, section_id, effective);
        let available = remaining_seats(effective, booked, blocked);
        report.slots.push(SlotAvailability {
            start,
            minute_of_day: ((start - midnight) / MINUTE_MS) as u32,
            available_seats: available,
            bookable: !exclusive_taken && available >= party_size as i64,
        });
    }
    report.max_available_seats = report.slots.iter().map(|s| s.available_seats).max().unwrap_or(0);
    report
}

/// Can a party of `party_size` be admitted at instant `at`?
pub fn check(cal: &Calendar, ls: &LocationState, at: Ms, party_size: u32) -> CapacityCheck {
    let settings = cal.settings;
    let physical = physical_capacity(ls, None);
    let date = date_of(at);
    let event_max = date.and_then(|d| cal.special_event(d)).and_then(|e| e.max_capacity);
    let effective = effective_capacity(physical, settings.max_party_size, event_max);
    let instant = Span::new(at, at + 1);
    let booked = booked_seats(ls, &instant, None);

    let refuse = |reason: &str| CapacityCheck {
        max_party_size: 0,
        available: false,
        total_capacity: effective,
        booked_seats: booked,
        reason: Some(reason.to_string()),
    };
    if !cal.is_open_at(at) {
        return refuse("closed");
    }
    if date.is_some_and(|d| exclusive_day_taken(cal, ls, d)) {
        return refuse("exclusive booking");
    }

    let blocked = blocked_seats(ls, &instant, None, effective);
    let available_seats = remaining_seats(effective, booked, blocked);
    let max_party_size = available_seats.max(0) as u32;
    let available = party_size <= max_party_size;
    let reason = if available {
        None
    } else if settings.max_party_size.is_some_and(|m| party_size > m) {
        Some("exceeds maximum party size")
    } else if blocked > 0 && booked < effective {
        Some("blocked")
    } else {
        Some("insufficient capacity")
    };
    CapacityCheck {
        max_party_size,
        available,
        total_capacity: effective,
        booked_seats: booked,
        reason: reason.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use dashmap::DashMap;

    use super::*;

    // Monday 2030-06-03
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 6, 3).unwrap()
    }

    fn at(hour: i64, minute: i64) -> Ms {
        midnight_ms(monday()) + hour * HOUR_MS + minute * MINUTE_MS
    }

    struct Fixture {
        cal: Calendar,
        ls: LocationState,
        map: DashMap<Ulid, Ulid>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut cal = Calendar::default();
            cal.apply(&Event::OperatingHoursSet {
                day_of_week: 1,
                open_minute: 11 * 60,
                close_minute: 22 * 60,
                closed: false,
            });
            let ls = LocationState::new(Location { id: Ulid::new(), name: None, is_default: true, is_active: true });
            Self { cal, ls, map: DashMap::new() }
        }

        fn event(&mut self, e: Event) {
            match e.location_id() {
                Some(_) => self.ls.apply(&e, &self.map),
                None => self.cal.apply(&e),
            }
        }

        fn reserve(&mut self, party_size: u32, span: Span) -> Ulid {
            let id = Ulid::new();
            self.event(Event::ReservationCreated { id, location_id: self.ls.id(), name: None, party_size, span, at: 0 });
            id
        }

        fn set_status(&mut self, id: Ulid, status: OccupantStatus) {
            self.event(Event::OccupantStatusChanged {
                occupant: OccupantRef::reservation(id),
                location_id: self.ls.id(),
                status,
                at: 0,
            });
        }

        fn block(&mut self, section_id: Option<Ulid>, span: Span) -> Ulid {
            let id = Ulid::new();
            self.event(Event::BlockedPeriodAdded { id, location_id: self.ls.id(), section_id, span, reason: None });
            id
        }

        fn section_with_seats(&mut self, maxima: &[u32]) -> (Ulid, Vec<Ulid>) {
            let sid = Ulid::new();
            self.event(Event::SectionCreated { id: sid, location_id: self.ls.id(), name: None, floor_number: 0 });
            let seats = maxima
                .iter()
                .enumerate()
                .map(|(i, &max)| {
                    let id = Ulid::new();
                    self.event(Event::SeatCreated {
                        id,
                        location_id: self.ls.id(),
                        section_id: sid,
                        label: format!("{sid}-{i}"),
                        min_capacity: 1,
                        max_capacity: max,
                        category: SeatCategory::Standard,
                    });
                    id
                })
                .collect();
            (sid, seats)
        }

        fn special(&mut self, exclusive: bool, max_capacity: Option<u32>) {
            self.event(Event::SpecialEventSet {
                id: Ulid::new(),
                date: monday(),
                closed: false,
                exclusive_booking: exclusive,
                max_capacity,
                start_minute: None,
                end_minute: None,
                description: None,
            });
        }

        fn slot(&self, party_size: u32, hour: i64, minute: i64) -> SlotAvailability {
            let r = report(&self.cal, &self.ls, monday(), party_size, None);
            r.slots.into_iter().find(|s| s.start == at(hour, minute)).unwrap()
        }
    }

    #[test]
    fn remaining_seats_caps_blocked_at_leftover() {
        assert_eq!(remaining_seats(26, 6, 0), 20);
        assert_eq!(remaining_seats(26, 6, 26), 0);
        assert_eq!(remaining_seats(26, 6, 10), 10);
        assert_eq!(remaining_seats(10, 12, 10), -2);
    }

    #[test]
    fn effective_capacity_takes_the_minimum() {
        assert_eq!(effective_capacity(26, None, None), 26);
        assert_eq!(effective_capacity(26, Some(20), None), 20);
        assert_eq!(effective_capacity(26, Some(20), Some(12)), 12);
        assert_eq!(effective_capacity(10, Some(20), None), 10);
    }

    #[test]
    fn slots_cover_the_service_window() {
        let f = Fixture::new();
        let r = report(&f.cal, &f.ls, monday(), 2, None);
        // 11:00 .. 21:30 every 30 minutes
        assert_eq!(r.slots.len(), 22);
        assert_eq!(r.slots[0].minute_of_day, 11 * 60);
        assert!(r.slots.iter().all(|s| s.available_seats == 26 && s.bookable));
        assert_eq!(r.max_available_seats, 26);
        assert_eq!(r.actual_capacity, 26);
    }

    #[test]
    fn closed_day_has_no_slots() {
        let f = Fixture::new();
        let sunday = NaiveDate::from_ymd_opt(2030, 6, 2).unwrap();
        let r = report(&f.cal, &f.ls, sunday, 2, None);
        assert!(r.slots.is_empty());
        assert_eq!(r.max_available_seats, 0);
    }

    #[test]
    fn overlapping_reservations_reduce_availability() {
        let mut f = Fixture::new();
        f.reserve(6, Span::new(at(19, 0), at(20, 0)));
        assert_eq!(f.slot(4, 19, 0).available_seats, 20);
        assert_eq!(f.slot(4, 18, 30).available_seats, 20); // 18:30-19:30 overlaps
        assert_eq!(f.slot(4, 18, 0).available_seats, 26); // adjacent
        assert_eq!(f.slot(4, 20, 0).available_seats, 26);
    }

    #[test]
    fn terminal_reservations_do_not_count() {
        let mut f = Fixture::new();
        let r = f.reserve(6, Span::new(at(19, 0), at(20, 0)));
        f.set_status(r, OccupantStatus::Canceled);
        assert_eq!(f.slot(4, 19, 0).available_seats, 26);
    }

    #[test]
    fn admin_max_party_size_caps_total() {
        let mut f = Fixture::new();
        f.event(Event::SettingsUpdated { slot_interval_minutes: 30, max_party_size: Some(20), reservation_duration_minutes: 60 });
        f.reserve(6, Span::new(at(19, 0), at(20, 0)));
        let slot = f.slot(25, 19, 0);
        assert_eq!(slot.available_seats, 14);
        assert!(!slot.bookable);
        let r = report(&f.cal, &f.ls, monday(), 25, None);
        assert_eq!(r.actual_capacity, 26);
        assert_eq!(r.admin_max_party_size, Some(20));
        assert_eq!(r.effective_max_party_size, 20);
    }

    #[test]
    fn special_event_capacity_ceiling() {
        let mut f = Fixture::new();
        f.special(false, Some(12));
        assert_eq!(f.slot(2, 12, 0).available_seats, 12);
    }

    #[test]
    fn location_block_removes_everything() {
        let mut f = Fixture::new();
        f.block(None, Span::new(at(18, 0), at(21, 0)));
        let slot = f.slot(2, 19, 0);
        assert_eq!(slot.available_seats, 0);
        assert!(!slot.bookable);
        assert_eq!(f.slot(2, 12, 0).available_seats, 26);
    }

    #[test]
    fn section_block_removes_section_seats() {
        let mut f = Fixture::new();
        let (patio, _) = f.section_with_seats(&[4, 4, 2]);
        f.block(Some(patio), Span::new(at(18, 0), at(21, 0)));
        assert_eq!(f.slot(2, 19, 0).available_seats, 16);

        let scoped = report(&f.cal, &f.ls, monday(), 2, Some(patio));
        let slot = scoped.slots.iter().find(|s| s.start == at(19, 0)).unwrap();
        assert_eq!(slot.available_seats, 0);
        assert_eq!(scoped.actual_capacity, 10);
    }

    #[test]
    fn other_section_block_ignored_for_section_scope() {
        let mut f = Fixture::new();
        let (patio, _) = f.section_with_seats(&[4, 4]);
        let (bar, _) = f.section_with_seats(&[2, 2]);
        f.block(Some(bar), Span::new(at(18, 0), at(21, 0)));
        let r = report(&f.cal, &f.ls, monday(), 2, Some(patio));
        let slot = r.slots.iter().find(|s| s.start == at(19, 0)).unwrap();
        assert_eq!(slot.available_seats, 8);
    }

    #[test]
    fn cancelled_block_restores_capacity() {
        let mut f = Fixture::new();
        let id = f.block(None, Span::new(at(18, 0), at(21, 0)));
        f.event(Event::BlockedPeriodUpdated {
            id,
            location_id: f.ls.id(),
            span: Span::new(at(18, 0), at(21, 0)),
            reason: None,
            status: BlockStatus::Cancelled,
        });
        assert_eq!(f.slot(2, 19, 0).available_seats, 26);
    }

    #[test]
    fn section_scope_counts_only_seated_reservations_in_section() {
        let mut f = Fixture::new();
        let (patio, seats) = f.section_with_seats(&[4, 4]);
        let r = f.reserve(3, Span::new(at(19, 0), at(20, 0)));
        f.reserve(5, Span::new(at(19, 0), at(20, 0)));
        f.event(Event::SeatAllocated {
            id: Ulid::new(),
            location_id: f.ls.id(),
            seat_id: seats[0],
            occupant: OccupantRef::reservation(r),
            start: at(19, 0),
        });
        let window = Span::new(at(19, 0), at(20, 0));
        assert_eq!(booked_seats(&f.ls, &window, Some(patio)), 3);
        assert_eq!(booked_seats(&f.ls, &window, None), 8);
    }

    #[test]
    fn exclusive_day_claimed_by_any_live_reservation() {
        let mut f = Fixture::new();
        f.special(true, None);
        assert!(f.slot(2, 19, 0).bookable);

        let r = f.reserve(2, Span::new(at(12, 0), at(13, 0)));
        assert!(report(&f.cal, &f.ls, monday(), 1, None).slots.iter().all(|s| !s.bookable));

        f.set_status(r, OccupantStatus::Canceled);
        assert!(f.slot(2, 19, 0).bookable);
    }

    #[test]
    fn capacity_check_reports_remaining_seats() {
        let mut f = Fixture::new();
        f.event(Event::SettingsUpdated { slot_interval_minutes: 30, max_party_size: Some(20), reservation_duration_minutes: 60 });
        f.reserve(6, Span::new(at(19, 0), at(20, 0)));
        let c = check(&f.cal, &f.ls, at(19, 0), 25);
        assert!(!c.available);
        assert_eq!(c.max_party_size, 14);
        assert_eq!(c.total_capacity, 20);
        assert_eq!(c.booked_seats, 6);
        assert_eq!(c.reason.as_deref(), Some("exceeds maximum party size"));

        let c = check(&f.cal, &f.ls, at(19, 0), 10);
        assert!(c.available);
        assert_eq!(c.reason, None);
    }

    #[test]
    fn capacity_check_reasons() {
        let mut f = Fixture::new();
        assert_eq!(check(&f.cal, &f.ls, at(8, 0), 2).reason.as_deref(), Some("closed"));

        f.block(None, Span::new(at(18, 0), at(21, 0)));
        let c = check(&f.cal, &f.ls, at(19, 0), 2);
        assert_eq!((c.available, c.reason.as_deref()), (false, Some("blocked")));

        f.reserve(26, Span::new(at(12, 0), at(13, 0)));
        let c = check(&f.cal, &f.ls, at(12, 30), 1);
        assert_eq!(c.reason.as_deref(), Some("insufficient capacity"));
    }

    #[test]
    fn capacity_check_exclusive_day() {
        let mut f = Fixture::new();
        f.special(true, None);
        f.reserve(2, Span::new(at(12, 0), at(13, 0)));
        let c = check(&f.cal, &f.ls, at(19, 0), 2);
        assert_eq!(c.reason.as_deref(), Some("exclusive booking"));
        assert_eq!(c.max_party_size, 0);
    }

    #[test]
    fn conservation_holds_for_every_slot() {
        let mut f = Fixture::new();
        let (patio, _) = f.section_with_seats(&[4, 6]);
        f.reserve(7, Span::new(at(12, 0), at(14, 0)));
        f.reserve(9, Span::new(at(13, 0), at(15, 0)));
        f.block(Some(patio), Span::new(at(13, 30), at(16, 0)));
        let r = report(&f.cal, &f.ls, monday(), 2, None);
        for slot in &r.slots {
            let window = Span::new(slot.start, slot.start + HOUR_MS);
            let booked = booked_seats(&f.ls, &window, None) as i64;
            let blocked = blocked_seats(&f.ls, &window, None, 26) as i64;
            let blocked_effective = blocked.min((26 - booked).max(0));
            assert_eq!(slot.available_seats, 26 - booked - blocked_effective);
            assert!(slot.available_seats >= 0);
        }
    }
}
