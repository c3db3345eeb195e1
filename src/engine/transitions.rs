//! Occupant lifecycle. Every legal move is a row in [`TABLE`]; anything not
//! listed is rejected.

use std::fmt;

use crate::model::{OccupantKind, OccupantStatus};

use OccupantStatus::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Seats held ahead of arrival (allocation with reserve intent).
    Reserve,
    /// Seats allocated to guests who are present.
    Seat,
    /// Guests show up; their held seats (if any) become occupied.
    Arrive,
    Cancel,
    NoShow,
    /// Guests leave (`finished`) or are taken off the waitlist (`removed`).
    Finish,
    /// A reserved hold lapsed; the occupant goes back to its initial status.
    Expire,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Reserve,
        Action::Seat,
        Action::Arrive,
        Action::Cancel,
        Action::NoShow,
        Action::Finish,
        Action::Expire,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Reserve => "reserve",
            Action::Seat => "seat",
            Action::Arrive => "arrive",
            Action::Cancel => "cancel",
            Action::NoShow => "no_show",
            Action::Finish => "finish",
            Action::Expire => "expire",
        }
    }

    /// Whether the occupant's active allocations are released with the move.
    pub fn releases_allocations(&self) -> bool {
        matches!(
            self,
            Action::Cancel | Action::NoShow | Action::Finish | Action::Expire
        )
    }

    /// Action that would leave an occupant of `kind` in `status`, as used by
    /// status-assignment requests.
    pub fn for_requested_status(kind: OccupantKind, status: OccupantStatus) -> Option<Action> {
        match status {
            Seated => Some(Action::Arrive),
            Canceled => Some(Action::Cancel),
            NoShow => Some(Action::NoShow),
            s if s == kind.departed_status() => Some(Action::Finish),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    To(OccupantStatus),
    /// `booked` for reservations, `waiting` for waitlist entries.
    Initial,
    /// `finished` for reservations, `removed` for waitlist entries.
    Departed,
}

#[derive(Debug)]
pub struct Transition {
    pub action: Action,
    pub from: &'static [OccupantStatus],
    pub to: Target,
}

pub const TABLE: &[Transition] = &[
    Transition { action: Action::Reserve, from: &[Booked, Waiting], to: Target::To(Reserved) },
    Transition { action: Action::Seat, from: &[Booked, Waiting, Reserved, Seated], to: Target::To(Seated) },
    Transition { action: Action::Arrive, from: &[Booked, Waiting, Reserved], to: Target::To(Seated) },
    Transition { action: Action::Cancel, from: &[Booked, Waiting, Reserved], to: Target::To(Canceled) },
    Transition { action: Action::NoShow, from: &[Booked, Waiting, Reserved], to: Target::To(NoShow) },
    Transition { action: Action::Finish, from: &[Booked, Waiting, Reserved, Seated], to: Target::Departed },
    Transition { action: Action::Expire, from: &[Reserved], to: Target::Initial },
];

/// Status reached by applying `action` to an occupant of `kind` in `from`,
/// or `None` if the table has no such move.
pub fn next_status(kind: OccupantKind, from: OccupantStatus, action: Action) -> Option<OccupantStatus> {
    let row = TABLE.iter().find(|t| t.action == action)?;
    if !row.from.contains(&from) {
        return None;
    }
    Some(match row.to {
        Target::To(status) => status,
        Target::Initial => kind.initial_status(),
        Target::Departed => kind.departed_status(),
    })
}
