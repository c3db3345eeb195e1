use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type. Local restaurant time is stored
/// as if it were UTC.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// A span that stays open until something closes it.
    pub fn open_ended(start: Ms) -> Self {
        Self { start, end: Ms::MAX }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Occupants ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OccupantKind {
    Reservation,
    Waitlist,
}

impl OccupantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccupantKind::Reservation => "reservation",
            OccupantKind::Waitlist => "waitlist_entry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reservation" | "reservations" => Some(OccupantKind::Reservation),
            "waitlist" | "waitlist_entry" | "waitlist_entries" => Some(OccupantKind::Waitlist),
            _ => None,
        }
    }

    pub fn initial_status(&self) -> OccupantStatus {
        match self {
            OccupantKind::Reservation => OccupantStatus::Booked,
            OccupantKind::Waitlist => OccupantStatus::Waiting,
        }
    }

    /// Terminal status reached by a normal departure.
    pub fn departed_status(&self) -> OccupantStatus {
        match self {
            OccupantKind::Reservation => OccupantStatus::Finished,
            OccupantKind::Waitlist => OccupantStatus::Removed,
        }
    }
}

/// Tagged reference to a reservation or a waitlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccupantRef {
    pub kind: OccupantKind,
    pub id: Ulid,
}

impl OccupantRef {
    pub fn reservation(id: Ulid) -> Self {
        Self { kind: OccupantKind::Reservation, id }
    }

    pub fn waitlist(id: Ulid) -> Self {
        Self { kind: OccupantKind::Waitlist, id }
    }
}

impl fmt::Display for OccupantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OccupantStatus {
    Booked,
    Waiting,
    Reserved,
    Seated,
    Finished,
    Canceled,
    NoShow,
    Removed,
}

impl OccupantStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OccupantStatus::Finished
                | OccupantStatus::Canceled
                | OccupantStatus::NoShow
                | OccupantStatus::Removed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OccupantStatus::Booked => "booked",
            OccupantStatus::Waiting => "waiting",
            OccupantStatus::Reserved => "reserved",
            OccupantStatus::Seated => "seated",
            OccupantStatus::Finished => "finished",
            OccupantStatus::Canceled => "canceled",
            OccupantStatus::NoShow => "no_show",
            OccupantStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "booked" => Some(OccupantStatus::Booked),
            "waiting" => Some(OccupantStatus::Waiting),
            "reserved" => Some(OccupantStatus::Reserved),
            "seated" => Some(OccupantStatus::Seated),
            "finished" => Some(OccupantStatus::Finished),
            "canceled" | "cancelled" => Some(OccupantStatus::Canceled),
            "no_show" => Some(OccupantStatus::NoShow),
            "removed" => Some(OccupantStatus::Removed),
            _ => None,
        }
    }
}

impl fmt::Display for OccupantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccupantTiming {
    Reservation { span: Span },
    Waitlist { check_in: Ms },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    pub id: Ulid,
    pub location_id: Ulid,
    pub name: Option<String>,
    pub party_size: u32,
    pub status: OccupantStatus,
    pub timing: OccupantTiming,
    /// When `status` last changed.
    pub status_changed_at: Ms,
}

impl Occupant {
    pub fn kind(&self) -> OccupantKind {
        match self.timing {
            OccupantTiming::Reservation { .. } => OccupantKind::Reservation,
            OccupantTiming::Waitlist { .. } => OccupantKind::Waitlist,
        }
    }

    pub fn reference(&self) -> OccupantRef {
        OccupantRef { kind: self.kind(), id: self.id }
    }

    /// Booked window for reservations; waitlist entries have none.
    pub fn reservation_span(&self) -> Option<Span> {
        match self.timing {
            OccupantTiming::Reservation { span } => Some(span),
            OccupantTiming::Waitlist { .. } => None,
        }
    }
}

// ── Physical inventory ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeatCategory {
    Standard,
    Booth,
    Outdoor,
    Bar,
    Private,
    HighTop,
}

impl SeatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatCategory::Standard => "standard",
            SeatCategory::Booth => "booth",
            SeatCategory::Outdoor => "outdoor",
            SeatCategory::Bar => "bar",
            SeatCategory::Private => "private",
            SeatCategory::HighTop => "high_top",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Some(SeatCategory::Standard),
            "booth" => Some(SeatCategory::Booth),
            "outdoor" => Some(SeatCategory::Outdoor),
            "bar" => Some(SeatCategory::Bar),
            "private" => Some(SeatCategory::Private),
            "high_top" => Some(SeatCategory::HighTop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub id: Ulid,
    pub name: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
}

pub const DEFAULT_TOTAL_CAPACITY: u32 = 26;
pub const DEFAULT_TABLE_CAPACITY: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityProfile {
    pub total_capacity: u32,
    pub default_table_capacity: u32,
}

impl Default for CapacityProfile {
    fn default() -> Self {
        Self {
            total_capacity: DEFAULT_TOTAL_CAPACITY,
            default_table_capacity: DEFAULT_TABLE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatSection {
    pub id: Ulid,
    pub location_id: Ulid,
    pub name: Option<String>,
    pub floor_number: i32,
}

/// A seat has no status of its own; occupancy is read off active allocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub id: Ulid,
    pub section_id: Ulid,
    pub label: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub category: SeatCategory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatAllocation {
    pub id: Ulid,
    pub seat_id: Ulid,
    pub occupant: OccupantRef,
    pub start: Ms,
    /// `None` while the seat is held.
    pub released_at: Option<Ms>,
}

impl SeatAllocation {
    pub fn is_active(&self) -> bool {
        self.released_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStatus {
    Active,
    Cancelled,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStatus::Active => "active",
            BlockStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(BlockStatus::Active),
            "cancelled" | "canceled" => Some(BlockStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedPeriod {
    pub id: Ulid,
    pub location_id: Ulid,
    /// `None` blocks the whole location.
    pub section_id: Option<Ulid>,
    pub span: Span,
    pub reason: Option<String>,
    pub status: BlockStatus,
}

impl BlockedPeriod {
    pub fn is_active(&self) -> bool {
        self.status == BlockStatus::Active
    }
}

// ── Restaurant calendar ──────────────────────────────────────────

/// Weekly opening row. Minutes are minutes after local midnight;
/// `close_minute <= open_minute` means service runs past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    /// 0 = Sunday.
    pub day_of_week: u8,
    pub open_minute: u32,
    pub close_minute: u32,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialEvent {
    pub id: Ulid,
    pub date: NaiveDate,
    pub closed: bool,
    pub exclusive_booking: bool,
    pub max_capacity: Option<u32>,
    pub start_minute: Option<u32>,
    pub end_minute: Option<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestaurantSettings {
    pub slot_interval_minutes: u32,
    /// Administrator ceiling on party size; tracked apart from seat count.
    pub max_party_size: Option<u32>,
    pub reservation_duration_minutes: u32,
}

impl Default for RestaurantSettings {
    fn default() -> Self {
        Self {
            slot_interval_minutes: 30,
            max_party_size: None,
            reservation_duration_minutes: 60,
        }
    }
}

/// The event types, flat with no nesting. This is the WAL record vocabulary;
/// one WAL record carries every event of one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LocationCreated {
        id: Ulid,
        name: Option<String>,
        is_default: bool,
        is_active: bool,
    },
    LocationUpdated {
        id: Ulid,
        name: Option<String>,
        is_default: bool,
        is_active: bool,
    },
    LocationDeleted {
        id: Ulid,
    },
    CapacityConfigured {
        location_id: Ulid,
        total_capacity: u32,
        default_table_capacity: u32,
    },
    SectionCreated {
        id: Ulid,
        location_id: Ulid,
        name: Option<String>,
        floor_number: i32,
    },
    SectionDeleted {
        id: Ulid,
        location_id: Ulid,
    },
    SeatCreated {
        id: Ulid,
        location_id: Ulid,
        section_id: Ulid,
        label: String,
        min_capacity: u32,
        max_capacity: u32,
        category: SeatCategory,
    },
    SeatDeleted {
        id: Ulid,
        location_id: Ulid,
    },
    BlockedPeriodAdded {
        id: Ulid,
        location_id: Ulid,
        section_id: Option<Ulid>,
        span: Span,
        reason: Option<String>,
    },
    BlockedPeriodUpdated {
        id: Ulid,
        location_id: Ulid,
        span: Span,
        reason: Option<String>,
        status: BlockStatus,
    },
    BlockedPeriodRemoved {
        id: Ulid,
        location_id: Ulid,
    },
    OperatingHoursSet {
        day_of_week: u8,
        open_minute: u32,
        close_minute: u32,
        closed: bool,
    },
    SpecialEventSet {
        id: Ulid,
        date: NaiveDate,
        closed: bool,
        exclusive_booking: bool,
        max_capacity: Option<u32>,
        start_minute: Option<u32>,
        end_minute: Option<u32>,
        description: Option<String>,
    },
    SpecialEventRemoved {
        id: Ulid,
    },
    SettingsUpdated {
        slot_interval_minutes: u32,
        max_party_size: Option<u32>,
        reservation_duration_minutes: u32,
    },
    ReservationCreated {
        id: Ulid,
        location_id: Ulid,
        name: Option<String>,
        party_size: u32,
        span: Span,
        at: Ms,
    },
    WaitlistEntryCreated {
        id: Ulid,
        location_id: Ulid,
        name: Option<String>,
        party_size: u32,
        check_in: Ms,
    },
    OccupantStatusChanged {
        occupant: OccupantRef,
        location_id: Ulid,
        status: OccupantStatus,
        at: Ms,
    },
    SeatAllocated {
        id: Ulid,
        location_id: Ulid,
        seat_id: Ulid,
        occupant: OccupantRef,
        start: Ms,
    },
    SeatReleased {
        id: Ulid,
        location_id: Ulid,
        at: Ms,
    },
}

impl Event {
    /// Location the event belongs to; `None` for restaurant-wide calendar events.
    pub fn location_id(&self) -> Option<Ulid> {
        match self {
            Event::LocationCreated { id, .. }
            | Event::LocationUpdated { id, .. }
            | Event::LocationDeleted { id } => Some(*id),
            Event::CapacityConfigured { location_id, .. }
            | Event::SectionCreated { location_id, .. }
            | Event::SectionDeleted { location_id, .. }
            | Event::SeatCreated { location_id, .. }
            | Event::SeatDeleted { location_id, .. }
            | Event::BlockedPeriodAdded { location_id, .. }
            | Event::BlockedPeriodUpdated { location_id, .. }
            | Event::BlockedPeriodRemoved { location_id, .. }
            | Event::ReservationCreated { location_id, .. }
            | Event::WaitlistEntryCreated { location_id, .. }
            | Event::OccupantStatusChanged { location_id, .. }
            | Event::SeatAllocated { location_id, .. }
            | Event::SeatReleased { location_id, .. } => Some(*location_id),
            Event::OperatingHoursSet { .. }
            | Event::SpecialEventSet { .. }
            | Event::SpecialEventRemoved { .. }
            | Event::SettingsUpdated { .. } => None,
        }
    }
}

// ── Request types ────────────────────────────────────────────────

/// How a caller names a seat: by id, or by its label within the location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeatSelector {
    Id(Ulid),
    Label(String),
}

/// Which status a successful allocation drives the occupant into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatingIntent {
    /// Guests are physically at the seats.
    Seat,
    /// Seats are held ahead of arrival.
    Reserve,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseTarget {
    Allocations(Vec<Ulid>),
    Seats(Vec<Ulid>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationFilter {
    pub location_id: Option<Ulid>,
    /// `Some(true)` keeps only allocations without a release timestamp.
    pub active: Option<bool>,
    /// Keeps allocations whose start falls inside the span.
    pub range: Option<Span>,
    pub seat_id: Option<Ulid>,
    pub reservation_id: Option<Ulid>,
    pub waitlist_entry_id: Option<Ulid>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatStatus {
    Free,
    Occupied,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Free => "free",
            SeatStatus::Occupied => "occupied",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatInfo {
    pub id: Ulid,
    pub location_id: Ulid,
    pub section_id: Ulid,
    pub label: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub category: SeatCategory,
    pub status: SeatStatus,
    pub occupant: Option<OccupantRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub id: Ulid,
    pub location_id: Ulid,
    pub name: Option<String>,
    pub floor_number: i32,
    pub capacity: u32,
    pub seat_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationInfo {
    pub id: Ulid,
    pub location_id: Ulid,
    pub seat_id: Ulid,
    pub seat_label: String,
    pub start: Ms,
    pub released_at: Option<Ms>,
    pub occupant: OccupantRef,
    pub occupant_name: Option<String>,
    pub occupant_party_size: u32,
    pub occupant_status: OccupantStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAvailability {
    pub start: Ms,
    /// Minutes after local midnight of the queried date (may exceed 1440
    /// for service past midnight).
    pub minute_of_day: u32,
    pub available_seats: i64,
    pub bookable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityReport {
    pub slots: Vec<SlotAvailability>,
    pub max_available_seats: i64,
    /// Physical seat count (location profile or section aggregate).
    pub actual_capacity: u32,
    pub admin_max_party_size: Option<u32>,
    pub effective_max_party_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityCheck {
    pub max_party_size: u32,
    pub available: bool,
    pub total_capacity: u32,
    pub booked_seats: u32,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityInfo {
    pub location_id: Ulid,
    pub total_capacity: u32,
    pub default_table_capacity: u32,
    pub available_capacity: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn open_ended_span_overlaps_everything_after_start() {
        let held = Span::open_ended(1_000);
        assert!(held.overlaps(&Span::new(5_000_000, 5_000_001)));
        assert!(!held.overlaps(&Span::new(0, 1_000)));
        assert!(held.contains_instant(i64::MAX - 1));
    }

    #[test]
    fn terminal_statuses() {
        for s in [
            OccupantStatus::Finished,
            OccupantStatus::Canceled,
            OccupantStatus::NoShow,
            OccupantStatus::Removed,
        ] {
            assert!(s.is_terminal(), "{s} should be terminal");
        }
        for s in [
            OccupantStatus::Booked,
            OccupantStatus::Waiting,
            OccupantStatus::Reserved,
            OccupantStatus::Seated,
        ] {
            assert!(!s.is_terminal(), "{s} should not be terminal");
        }
    }

    #[test]
    fn status_parse_accepts_both_spellings_of_cancelled() {
        assert_eq!(OccupantStatus::parse("canceled"), Some(OccupantStatus::Canceled));
        assert_eq!(OccupantStatus::parse("CANCELLED"), Some(OccupantStatus::Canceled));
        assert_eq!(OccupantStatus::parse("no_show"), Some(OccupantStatus::NoShow));
        assert_eq!(OccupantStatus::parse("gone"), None);
    }

    #[test]
    fn occupant_kind_vocabulary() {
        assert_eq!(OccupantKind::parse("waitlist"), Some(OccupantKind::Waitlist));
        assert_eq!(OccupantKind::parse("Reservation"), Some(OccupantKind::Reservation));
        assert_eq!(OccupantKind::Reservation.initial_status(), OccupantStatus::Booked);
        assert_eq!(OccupantKind::Waitlist.initial_status(), OccupantStatus::Waiting);
        assert_eq!(OccupantKind::Reservation.departed_status(), OccupantStatus::Finished);
        assert_eq!(OccupantKind::Waitlist.departed_status(), OccupantStatus::Removed);
    }

    #[test]
    fn capacity_profile_defaults() {
        let p = CapacityProfile::default();
        assert_eq!(p.total_capacity, 26);
        assert_eq!(p.default_table_capacity, 4);
    }

    #[test]
    fn calendar_events_have_no_location() {
        let e = Event::OperatingHoursSet {
            day_of_week: 1,
            open_minute: 600,
            close_minute: 1320,
            closed: false,
        };
        assert_eq!(e.location_id(), None);
        let lid = Ulid::new();
        let e = Event::SeatReleased { id: Ulid::new(), location_id: lid, at: 0 };
        assert_eq!(e.location_id(), Some(lid));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let events = vec![
            Event::SpecialEventSet {
                id: Ulid::new(),
                date: NaiveDate::from_ymd_opt(2030, 12, 31).unwrap(),
                closed: false,
                exclusive_booking: true,
                max_capacity: Some(40),
                start_minute: Some(18 * 60),
                end_minute: None,
                description: Some("New Year's Eve".into()),
            },
            Event::SeatAllocated {
                id: Ulid::new(),
                location_id: Ulid::new(),
                seat_id: Ulid::new(),
                occupant: OccupantRef::waitlist(Ulid::new()),
                start: 1_000,
            },
        ];
        let bytes = bincode::serialize(&events).unwrap();
        let decoded: Vec<Event> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(events, decoded);
    }
}
