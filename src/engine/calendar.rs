use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

/// Restaurant-wide schedule: weekly hours, dated overrides, and booking settings.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    /// Indexed by day of week, 0 = Sunday. `None` = never configured (closed).
    pub hours: [Option<OperatingHours>; 7],
    pub special_events: BTreeMap<NaiveDate, SpecialEvent>,
    pub settings: RestaurantSettings,
}

impl Calendar {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::OperatingHoursSet {
                day_of_week,
                open_minute,
                close_minute,
                closed,
            } => {
                if let Some(slot) = self.hours.get_mut(*day_of_week as usize) {
                    *slot = Some(OperatingHours {
                        day_of_week: *day_of_week,
                        open_minute: *open_minute,
                        close_minute: *close_minute,
                        closed: *closed,
                    });
                }
            }
            Event::SpecialEventSet {
                id,
                date,
                closed,
                exclusive_booking,
                max_capacity,
                start_minute,
                end_minute,
                description,
            } => {
                // One event per date: a new id for an existing date replaces it.
                self.special_events.retain(|_, e| e.id != *id);
                self.special_events.insert(
                    *date,
                    SpecialEvent {
                        id: *id,
                        date: *date,
                        closed: *closed,
                        exclusive_booking: *exclusive_booking,
                        max_capacity: *max_capacity,
                        start_minute: *start_minute,
                        end_minute: *end_minute,
                        description: description.clone(),
                    },
                );
            }
            Event::SpecialEventRemoved { id } => {
                self.special_events.retain(|_, e| e.id != *id);
            }
            Event::SettingsUpdated {
                slot_interval_minutes,
                max_party_size,
                reservation_duration_minutes,
            } => {
                self.settings = RestaurantSettings {
                    slot_interval_minutes: *slot_interval_minutes,
                    max_party_size: *max_party_size,
                    reservation_duration_minutes: *reservation_duration_minutes,
                };
            }
            _ => {}
        }
    }

    pub fn special_event(&self, date: NaiveDate) -> Option<&SpecialEvent> {
        self.special_events.get(&date)
    }

    pub fn special_event_by_id(&self, id: Ulid) -> Option<&SpecialEvent> {
        self.special_events.values().find(|e| e.id == id)
    }

    /// Effective service window for `date`, or `None` when the restaurant is
    /// closed that day.
    ///
    /// A closed special event wins. Otherwise each bound comes from the
    /// event's override if present, else from the weekly row.
    pub fn service_window(&self, date: NaiveDate) -> Option<Span> {
        let event = self.special_event(date);
        if event.is_some_and(|e| e.closed) {
            return None;
        }
        let weekly = self.hours[day_of_week(date) as usize].filter(|h| !h.closed);
        let open = event
            .and_then(|e| e.start_minute)
            .or(weekly.map(|h| h.open_minute))?;
        let close = event
            .and_then(|e| e.end_minute)
            .or(weekly.map(|h| h.close_minute))?;
        Some(window_from_minutes(date, open, close))
    }

    /// Whether `at` falls inside the service of its own date or the
    /// past-midnight tail of the previous date.
    pub fn is_open_at(&self, at: Ms) -> bool {
        let Some(date) = date_of(at) else { return false };
        let today = self.service_window(date);
        let yesterday = date.pred_opt().and_then(|d| self.service_window(d));
        [today, yesterday]
            .into_iter()
            .flatten()
            .any(|w| w.contains_instant(at))
    }
}

/// 0 = Sunday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn midnight_ms(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

pub fn date_of(at: Ms) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(at).map(|dt| dt.date_naive())
}

/// Minutes after midnight → concrete span on `date`. A close at or before
/// the open rolls over into the next day.
pub fn window_from_minutes(date: NaiveDate, open_minute: u32, close_minute: u32) -> Span {
    let midnight = midnight_ms(date);
    let start = midnight + open_minute as Ms * MINUTE_MS;
    let mut end = midnight + close_minute as Ms * MINUTE_MS;
    if end <= start {
        end += DAY_MS;
    }
    Span::new(start, end)
}

/// Slot start times every `interval_minutes` from the window's open while
/// the slot still starts before close.
pub fn slot_starts(window: &Span, interval_minutes: u32) -> Vec<Ms> {
    let step = interval_minutes.max(1) as Ms * MINUTE_MS;
    let mut starts = Vec::new();
    let mut t = window.start;
    while t < window.end {
        starts.push(t);
        t += step;
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weekly(day: u8, open: u32, close: u32) -> Event {
        Event::OperatingHoursSet {
            day_of_week: day,
            open_minute: open,
            close_minute: close,
            closed: false,
        }
    }

    fn special(date: NaiveDate) -> SpecialEvent {
        SpecialEvent {
            id: Ulid::new(),
            date,
            closed: false,
            exclusive_booking: false,
            max_capacity: None,
            start_minute: None,
            end_minute: None,
            description: None,
        }
    }

    fn set(cal: &mut Calendar, e: SpecialEvent) {
        cal.apply(&Event::SpecialEventSet {
            id: e.id,
            date: e.date,
            closed: e.closed,
            exclusive_booking: e.exclusive_booking,
            max_capacity: e.max_capacity,
            start_minute: e.start_minute,
            end_minute: e.end_minute,
            description: e.description,
        });
    }

    #[test]
    fn day_of_week_starts_on_sunday() {
        assert_eq!(day_of_week(date(2030, 6, 2)), 0); // Sunday
        assert_eq!(day_of_week(date(2030, 6, 3)), 1);
        assert_eq!(day_of_week(date(2030, 6, 8)), 6);
    }

    #[test]
    fn weekly_hours_define_the_window() {
        let d = date(2030, 6, 3); // Monday
        let mut cal = Calendar::default();
        cal.apply(&weekly(1, 11 * 60, 22 * 60));
        let w = cal.service_window(d).unwrap();
        assert_eq!(w.start, midnight_ms(d) + 11 * HOUR_MS);
        assert_eq!(w.end, midnight_ms(d) + 22 * HOUR_MS);
    }

    #[test]
    fn unconfigured_day_is_closed() {
        let cal = Calendar::default();
        assert_eq!(cal.service_window(date(2030, 6, 3)), None);
    }

    #[test]
    fn closed_weekly_row() {
        let mut cal = Calendar::default();
        cal.apply(&Event::OperatingHoursSet {
            day_of_week: 1,
            open_minute: 600,
            close_minute: 1200,
            closed: true,
        });
        assert_eq!(cal.service_window(date(2030, 6, 3)), None);
    }

    #[test]
    fn closed_special_event_overrides_weekly() {
        let d = date(2030, 6, 3);
        let mut cal = Calendar::default();
        cal.apply(&weekly(1, 600, 1200));
        set(&mut cal, SpecialEvent { closed: true, ..special(d) });
        assert_eq!(cal.service_window(d), None);
    }

    #[test]
    fn special_event_narrows_one_bound() {
        let d = date(2030, 6, 3);
        let mut cal = Calendar::default();
        cal.apply(&weekly(1, 11 * 60, 22 * 60));
        set(&mut cal, SpecialEvent { end_minute: Some(15 * 60), ..special(d) });
        let w = cal.service_window(d).unwrap();
        assert_eq!(w.start, midnight_ms(d) + 11 * HOUR_MS);
        assert_eq!(w.end, midnight_ms(d) + 15 * HOUR_MS);
    }

    #[test]
    fn special_event_can_open_a_closed_day() {
        let d = date(2030, 6, 2); // Sunday, never configured
        let mut cal = Calendar::default();
        set(
            &mut cal,
            SpecialEvent {
                start_minute: Some(18 * 60),
                end_minute: Some(23 * 60),
                ..special(d)
            },
        );
        assert!(cal.service_window(d).is_some());

        // A single bound is not enough without a weekly row.
        let d2 = date(2030, 6, 9);
        set(&mut cal, SpecialEvent { start_minute: Some(18 * 60), ..special(d2) });
        assert_eq!(cal.service_window(d2), None);
    }

    #[test]
    fn replacing_event_for_same_date() {
        let d = date(2030, 6, 3);
        let mut cal = Calendar::default();
        set(&mut cal, SpecialEvent { closed: true, ..special(d) });
        set(&mut cal, special(d));
        assert_eq!(cal.special_events.len(), 1);
        assert!(!cal.special_event(d).unwrap().closed);
    }

    #[test]
    fn past_midnight_service() {
        let d = date(2030, 6, 7); // Friday
        let mut cal = Calendar::default();
        cal.apply(&weekly(5, 18 * 60, 2 * 60));
        let w = cal.service_window(d).unwrap();
        assert_eq!(w.duration_ms(), 8 * HOUR_MS);
        // 01:00 Saturday is still Friday's service.
        assert!(cal.is_open_at(midnight_ms(d) + DAY_MS + HOUR_MS));
        assert!(!cal.is_open_at(midnight_ms(d) + DAY_MS + 3 * HOUR_MS));
    }

    #[test]
    fn slots_stop_before_close() {
        let w = Span::new(0, 2 * HOUR_MS);
        let starts = slot_starts(&w, 30);
        assert_eq!(starts, vec![0, 30 * MINUTE_MS, HOUR_MS, 90 * MINUTE_MS]);
    }

    #[test]
    fn uneven_interval_keeps_last_partial_slot() {
        let w = Span::new(0, 100 * MINUTE_MS);
        assert_eq!(slot_starts(&w, 45).len(), 3); // 0, 45, 90
    }
}
