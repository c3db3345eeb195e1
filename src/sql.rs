use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{Parser, ParserError};
use thiserror::Error;
use ulid::Ulid;

use crate::engine::midnight_ms;
use crate::limits::MAX_IN_CLAUSE_IDS;
use crate::model::*;

/// Parsed command from SQL input.
///
/// Location-scoped commands carry `location_id` as an `Option`: a statement
/// without one is rejected when executed, never defaulted.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertLocation {
        id: Ulid,
        name: Option<String>,
        is_default: bool,
        is_active: bool,
    },
    UpdateLocation {
        id: Ulid,
        name: Option<String>,
        is_default: Option<bool>,
        is_active: Option<bool>,
    },
    DeleteLocation {
        id: Ulid,
    },
    SelectLocations,
    UpsertCapacity {
        location_id: Option<Ulid>,
        total_capacity: u32,
        default_table_capacity: Option<u32>,
    },
    SelectCapacity {
        location_id: Option<Ulid>,
        at: Option<Ms>,
    },
    InsertSection {
        id: Ulid,
        location_id: Option<Ulid>,
        name: Option<String>,
        floor_number: i32,
    },
    DeleteSection {
        id: Ulid,
    },
    SelectSections {
        location_id: Option<Ulid>,
    },
    InsertSeat {
        id: Ulid,
        section_id: Ulid,
        label: String,
        min_capacity: u32,
        max_capacity: u32,
        category: SeatCategory,
    },
    DeleteSeat {
        id: Ulid,
    },
    SelectSeats {
        location_id: Option<Ulid>,
        section_id: Option<Ulid>,
        at: Option<Ms>,
    },
    InsertBlockedPeriod {
        id: Ulid,
        location_id: Option<Ulid>,
        section_id: Option<Ulid>,
        start: Ms,
        end: Ms,
        reason: Option<String>,
    },
    UpdateBlockedPeriod {
        id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
        reason: Option<String>,
        status: Option<BlockStatus>,
    },
    DeleteBlockedPeriod {
        id: Ulid,
    },
    SelectBlockedPeriods {
        location_id: Option<Ulid>,
        active_only: bool,
    },
    UpsertOperatingHours {
        day_of_week: u8,
        open_minute: u32,
        close_minute: u32,
        closed: bool,
    },
    SelectOperatingHours,
    InsertSpecialEvent {
        event: SpecialEvent,
    },
    DeleteSpecialEvent {
        id: Ulid,
    },
    SelectSpecialEvents,
    UpdateSettings {
        slot_interval_minutes: Option<u32>,
        /// `Some(None)` clears the ceiling.
        max_party_size: Option<Option<u32>>,
        reservation_duration_minutes: Option<u32>,
    },
    SelectSettings,
    InsertReservation {
        id: Ulid,
        location_id: Option<Ulid>,
        name: Option<String>,
        party_size: u32,
        start: Ms,
        duration_minutes: Option<u32>,
    },
    InsertWaitlistEntry {
        id: Ulid,
        location_id: Option<Ulid>,
        name: Option<String>,
        party_size: u32,
        check_in: Option<Ms>,
    },
    UpdateOccupantStatus {
        occupant: OccupantRef,
        status: OccupantStatus,
    },
    SelectOccupants {
        kind: OccupantKind,
        location_id: Option<Ulid>,
        id: Option<Ulid>,
    },
    InsertAllocations {
        occupant: OccupantRef,
        seats: Vec<SeatSelector>,
        start: Ms,
        intent: SeatingIntent,
    },
    /// Single release by id; may finish the occupant.
    DeleteAllocation {
        id: Ulid,
    },
    ReleaseAllocations {
        target: ReleaseTarget,
    },
    SelectAllocations {
        filter: AllocationFilter,
    },
    SelectAvailability {
        location_id: Option<Ulid>,
        date: NaiveDate,
        party_size: u32,
        section_id: Option<Ulid>,
    },
    SelectCapacityCheck {
        location_id: Option<Ulid>,
        at: Ms,
        party_size: u32,
    },
}

/// Parse a single statement (extended protocol).
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let mut commands = parse_batch(sql)?;
    if commands.len() > 1 {
        return Err(SqlError::Unsupported("more than one statement".into()));
    }
    commands.pop().ok_or(SqlError::Empty)
}

/// Parse every `;`-separated statement. Nothing runs unless all parse.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(parse_err)?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update { .. } => parse_update(&stmt.to_string()),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, for describing result columns before
/// parameters are bound.
pub fn select_table(sql: &str) -> Option<String> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = insert_rows(insert, &table)?;
    if table == "seat_allocations" {
        return parse_insert_allocations(&rows);
    }
    let [row] = rows.as_slice() else {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    };

    match table.as_str() {
        "locations" => {
            row.allow(&["id", "name", "is_default", "is_active"])?;
            Ok(Command::InsertLocation {
                id: ulid_of(row.req("id")?)?,
                name: opt(row.get("name"), text)?,
                is_default: opt(row.get("is_default"), boolean)?.unwrap_or(false),
                is_active: opt(row.get("is_active"), boolean)?.unwrap_or(true),
            })
        }
        "location_capacities" => {
            row.allow(&["location_id", "total_capacity", "default_table_capacity"])?;
            Ok(Command::UpsertCapacity {
                location_id: opt(row.get("location_id"), ulid_of)?,
                total_capacity: num(row.req("total_capacity")?)?,
                default_table_capacity: opt(row.get("default_table_capacity"), num)?,
            })
        }
        "seat_sections" => {
            row.allow(&["id", "location_id", "name", "floor_number"])?;
            Ok(Command::InsertSection {
                id: ulid_of(row.req("id")?)?,
                location_id: opt(row.get("location_id"), ulid_of)?,
                name: opt(row.get("name"), text)?,
                floor_number: opt(row.get("floor_number"), num)?.unwrap_or(0),
            })
        }
        "seats" => {
            row.allow(&["id", "section_id", "label", "min_capacity", "max_capacity", "category"])?;
            let category = match row.get("category") {
                Some(e) => {
                    let s = text(e)?;
                    SeatCategory::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown seat category {s:?}")))?
                }
                None => SeatCategory::Standard,
            };
            Ok(Command::InsertSeat {
                id: ulid_of(row.req("id")?)?,
                section_id: ulid_of(row.req("section_id")?)?,
                label: text(row.req("label")?)?,
                min_capacity: opt(row.get("min_capacity"), num)?.unwrap_or(1),
                max_capacity: opt(row.get("max_capacity"), num)?.unwrap_or(DEFAULT_TABLE_CAPACITY),
                category,
            })
        }
        "blocked_periods" => {
            row.allow(&["id", "location_id", "section_id", "start_time", "end_time", "reason"])?;
            Ok(Command::InsertBlockedPeriod {
                id: ulid_of(row.req("id")?)?,
                location_id: opt(row.get("location_id"), ulid_of)?,
                section_id: opt(row.get("section_id"), ulid_of)?,
                start: instant(row.req("start_time")?)?,
                end: instant(row.req("end_time")?)?,
                reason: opt(row.get("reason"), text)?,
            })
        }
        "operating_hours" => {
            row.allow(&["day_of_week", "open_time", "close_time", "closed"])?;
            let closed = opt(row.get("closed"), boolean)?.unwrap_or(false);
            let (open_minute, close_minute) = if closed {
                (
                    opt(row.get("open_time"), minute_of_day)?.unwrap_or(0),
                    opt(row.get("close_time"), minute_of_day)?.unwrap_or(0),
                )
            } else {
                (minute_of_day(row.req("open_time")?)?, minute_of_day(row.req("close_time")?)?)
            };
            Ok(Command::UpsertOperatingHours {
                day_of_week: num(row.req("day_of_week")?)?,
                open_minute,
                close_minute,
                closed,
            })
        }
        "special_events" => {
            row.allow(&[
                "id",
                "event_date",
                "closed",
                "exclusive_booking",
                "max_capacity",
                "start_time",
                "end_time",
                "description",
            ])?;
            Ok(Command::InsertSpecialEvent {
                event: SpecialEvent {
                    id: ulid_of(row.req("id")?)?,
                    date: date(row.req("event_date")?)?,
                    closed: opt(row.get("closed"), boolean)?.unwrap_or(false),
                    exclusive_booking: opt(row.get("exclusive_booking"), boolean)?.unwrap_or(false),
                    max_capacity: opt(row.get("max_capacity"), num)?,
                    start_minute: opt(row.get("start_time"), minute_of_day)?,
                    end_minute: opt(row.get("end_time"), minute_of_day)?,
                    description: opt(row.get("description"), text)?,
                },
            })
        }
        "reservations" => {
            row.allow(&["id", "location_id", "name", "party_size", "start_time", "duration_minutes"])?;
            Ok(Command::InsertReservation {
                id: ulid_of(row.req("id")?)?,
                location_id: opt(row.get("location_id"), ulid_of)?,
                name: opt(row.get("name"), text)?,
                party_size: num(row.req("party_size")?)?,
                start: instant(row.req("start_time")?)?,
                duration_minutes: opt(row.get("duration_minutes"), num)?,
            })
        }
        "waitlist_entries" => {
            row.allow(&["id", "location_id", "name", "party_size", "check_in_time"])?;
            Ok(Command::InsertWaitlistEntry {
                id: ulid_of(row.req("id")?)?,
                location_id: opt(row.get("location_id"), ulid_of)?,
                name: opt(row.get("name"), text)?,
                party_size: num(row.req("party_size")?)?,
                check_in: opt(row.get("check_in_time"), instant)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Every row names one seat; occupant, start and intent are shared.
fn parse_insert_allocations(rows: &[Row]) -> Result<Command, SqlError> {
    let mut shared: Option<(OccupantRef, Ms, SeatingIntent)> = None;
    let mut seats = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        row.allow(&[
            "occupant_type",
            "occupant_id",
            "reservation_id",
            "waitlist_entry_id",
            "seat_id",
            "seat_label",
            "start_time",
            "intent",
        ])?;
        let occupant = occupant_of(row)?;
        let start = instant(row.req("start_time")?)?;
        let intent = match row.get("intent") {
            None => SeatingIntent::Seat,
            Some(e) => match text(e)?.to_ascii_lowercase().as_str() {
                "seat" | "seated" => SeatingIntent::Seat,
                "reserve" | "reserved" => SeatingIntent::Reserve,
                other => return Err(SqlError::Parse(format!("unknown intent {other:?}"))),
            },
        };
        match shared {
            None => shared = Some((occupant, start, intent)),
            Some(first) if first != (occupant, start, intent) => {
                return Err(SqlError::Parse(format!(
                    "row {i}: all rows must share occupant, start_time and intent"
                )));
            }
            Some(_) => {}
        }
        let seat = match (row.get("seat_id"), row.get("seat_label")) {
            (Some(id), None) => SeatSelector::Id(ulid_of(id)?),
            (None, Some(label)) => SeatSelector::Label(text(label)?),
            (None, None) => return Err(SqlError::MissingColumn("seat_id")),
            (Some(_), Some(_)) => {
                return Err(SqlError::Parse(format!("row {i}: give seat_id or seat_label, not both")));
            }
        };
        seats.push(seat);
    }
    let (occupant, start, intent) = shared.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?;
    Ok(Command::InsertAllocations { occupant, seats, start, intent })
}

fn occupant_of(row: &Row) -> Result<OccupantRef, SqlError> {
    if let Some(kind) = row.get("occupant_type") {
        let k = text(kind)?;
        let kind = OccupantKind::parse(&k).ok_or_else(|| SqlError::Parse(format!("unknown occupant_type {k:?}")))?;
        return Ok(OccupantRef { kind, id: ulid_of(row.req("occupant_id")?)? });
    }
    if let Some(id) = row.get("reservation_id") {
        return Ok(OccupantRef::reservation(ulid_of(id)?));
    }
    if let Some(id) = row.get("waitlist_entry_id") {
        return Ok(OccupantRef::waitlist(ulid_of(id)?));
    }
    Err(SqlError::MissingColumn("occupant_id"))
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql).map_err(parse_err)?;
    if !parser.parse_keyword(Keyword::UPDATE) {
        return Err(SqlError::Parse("expected UPDATE".into()));
    }
    let table = parser.parse_object_name(false).map_err(parse_err)?;
    let table = object_name_last(&table).ok_or_else(|| SqlError::Parse("empty table name".into()))?;
    if !parser.parse_keyword(Keyword::SET) {
        return Err(SqlError::Parse("expected SET".into()));
    }
    let assignments = parser.parse_comma_separated(Parser::parse_assignment).map_err(parse_err)?;
    let filters = if parser.parse_keyword(Keyword::WHERE) {
        let selection = parser.parse_expr().map_err(parse_err)?;
        Filters::from_selection(Some(&selection))?
    } else {
        Filters::default()
    };

    let mut cols = HashMap::new();
    for assignment in assignments {
        let AssignmentTarget::ColumnName(name) = &assignment.target else {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        };
        let col = object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?;
        cols.insert(col, assignment.value);
    }
    let set = Row { table: table.clone(), cols };

    match table.as_str() {
        "locations" => {
            set.allow(&["name", "is_default", "is_active"])?;
            Ok(Command::UpdateLocation {
                id: filters.id()?,
                name: opt(set.get("name"), text)?,
                is_default: opt(set.get("is_default"), boolean)?,
                is_active: opt(set.get("is_active"), boolean)?,
            })
        }
        "location_capacities" => {
            set.allow(&["total_capacity", "default_table_capacity"])?;
            Ok(Command::UpsertCapacity {
                location_id: opt(filters.eq("location_id"), ulid_of)?,
                total_capacity: num(set.req("total_capacity")?)?,
                default_table_capacity: opt(set.get("default_table_capacity"), num)?,
            })
        }
        "blocked_periods" => {
            set.allow(&["start_time", "end_time", "reason", "status"])?;
            let status = match set.get("status") {
                Some(e) => {
                    let s = text(e)?;
                    Some(BlockStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown block status {s:?}")))?)
                }
                None => None,
            };
            Ok(Command::UpdateBlockedPeriod {
                id: filters.id()?,
                start: opt(set.get("start_time"), instant)?,
                end: opt(set.get("end_time"), instant)?,
                reason: opt(set.get("reason"), text)?,
                status,
            })
        }
        "settings" => {
            set.allow(&["slot_interval_minutes", "max_party_size", "reservation_duration_minutes"])?;
            let max_party_size = if set.has("max_party_size") {
                Some(opt(set.get("max_party_size"), num)?)
            } else {
                None
            };
            Ok(Command::UpdateSettings {
                slot_interval_minutes: opt(set.get("slot_interval_minutes"), num)?,
                max_party_size,
                reservation_duration_minutes: opt(set.get("reservation_duration_minutes"), num)?,
            })
        }
        "reservations" | "waitlist_entries" => {
            set.allow(&["status"])?;
            let kind = occupant_table_kind(&table);
            let s = text(set.req("status")?)?;
            let status = OccupantStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown status {s:?}")))?;
            Ok(Command::UpdateOccupantStatus {
                occupant: OccupantRef { kind, id: filters.id()? },
                status,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "locations" => Ok(Command::DeleteLocation { id: filters.id()? }),
        "seat_sections" => Ok(Command::DeleteSection { id: filters.id()? }),
        "seats" => Ok(Command::DeleteSeat { id: filters.id()? }),
        "blocked_periods" => Ok(Command::DeleteBlockedPeriod { id: filters.id()? }),
        "special_events" => Ok(Command::DeleteSpecialEvent { id: filters.id()? }),
        "seat_allocations" => {
            if let Some(id) = filters.eq("id") {
                return Ok(Command::DeleteAllocation { id: ulid_of(id)? });
            }
            if let Some(ids) = filters.ids("id")? {
                return Ok(Command::ReleaseAllocations { target: ReleaseTarget::Allocations(ids) });
            }
            if let Some(ids) = filters.ids("seat_id")? {
                return Ok(Command::ReleaseAllocations { target: ReleaseTarget::Seats(ids) });
            }
            Err(SqlError::MissingFilter("id or seat_id"))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let f = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "locations" => Ok(Command::SelectLocations),
        "location_capacities" => Ok(Command::SelectCapacity {
            location_id: opt(f.eq("location_id"), ulid_of)?,
            at: opt(f.eq("at"), instant)?,
        }),
        "seat_sections" => Ok(Command::SelectSections {
            location_id: opt(f.eq("location_id"), ulid_of)?,
        }),
        "seats" => Ok(Command::SelectSeats {
            location_id: opt(f.eq("location_id"), ulid_of)?,
            section_id: opt(f.eq("section_id"), ulid_of)?,
            at: opt(f.eq("at"), instant)?,
        }),
        "blocked_periods" => Ok(Command::SelectBlockedPeriods {
            location_id: opt(f.eq("location_id"), ulid_of)?,
            active_only: opt(f.eq("active"), boolean)?.unwrap_or(false),
        }),
        "operating_hours" => Ok(Command::SelectOperatingHours),
        "special_events" => Ok(Command::SelectSpecialEvents),
        "settings" => Ok(Command::SelectSettings),
        "reservations" | "waitlist_entries" => Ok(Command::SelectOccupants {
            kind: occupant_table_kind(&table),
            location_id: opt(f.eq("location_id"), ulid_of)?,
            id: opt(f.eq("id"), ulid_of)?,
        }),
        "seat_allocations" => Ok(Command::SelectAllocations {
            filter: allocation_filter(&f)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            location_id: opt(f.eq("location_id"), ulid_of)?,
            date: date(f.eq("date").ok_or(SqlError::MissingFilter("date"))?)?,
            party_size: num(f.eq("party_size").ok_or(SqlError::MissingFilter("party_size"))?)?,
            section_id: opt(f.eq("section_id"), ulid_of)?,
        }),
        "capacity_check" => {
            let at = match f.eq("at") {
                Some(at) => instant(at)?,
                None => {
                    let day = date(f.eq("date").ok_or(SqlError::MissingFilter("date"))?)?;
                    let minute = minute_of_day(f.eq("time").ok_or(SqlError::MissingFilter("time"))?)?;
                    midnight_ms(day) + minute as Ms * MINUTE_MS
                }
            };
            Ok(Command::SelectCapacityCheck {
                location_id: opt(f.eq("location_id"), ulid_of)?,
                at,
                party_size: num(f.eq("party_size").ok_or(SqlError::MissingFilter("party_size"))?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn allocation_filter(f: &Filters) -> Result<AllocationFilter, SqlError> {
    let mut lo: Option<Ms> = None;
    let mut hi: Option<Ms> = None;
    if let Some(d) = f.eq("date") {
        let midnight = midnight_ms(date(d)?);
        lo = Some(midnight);
        hi = Some(midnight + DAY_MS);
    }
    for col in ["start_time", "start"] {
        if let Some((e, inclusive)) = f.lower.get(col) {
            let v = instant(e)? + if *inclusive { 0 } else { 1 };
            lo = Some(lo.map_or(v, |l| l.max(v)));
        }
        if let Some((e, inclusive)) = f.upper.get(col) {
            let v = instant(e)? + if *inclusive { 1 } else { 0 };
            hi = Some(hi.map_or(v, |h| h.min(v)));
        }
    }
    if let Some((e, inclusive)) = f.upper.get("end") {
        let v = instant(e)? + if *inclusive { 1 } else { 0 };
        hi = Some(hi.map_or(v, |h| h.min(v)));
    }
    let range = match (lo, hi) {
        (None, None) => None,
        (lo, hi) => Some(Span {
            start: lo.unwrap_or(Ms::MIN),
            end: hi.unwrap_or(Ms::MAX),
        }),
    };
    Ok(AllocationFilter {
        location_id: opt(f.eq("location_id"), ulid_of)?,
        active: opt(f.eq("active"), boolean)?,
        range,
        seat_id: opt(f.eq("seat_id"), ulid_of)?,
        reservation_id: opt(f.eq("reservation_id"), ulid_of)?,
        waitlist_entry_id: opt(f.eq("waitlist_entry_id"), ulid_of)?,
    })
}

fn occupant_table_kind(table: &str) -> OccupantKind {
    if table == "reservations" {
        OccupantKind::Reservation
    } else {
        OccupantKind::Waitlist
    }
}

// ── Rows & filters ────────────────────────────────────────────

/// One VALUES row or SET list, keyed by lowercase column name.
struct Row {
    table: String,
    cols: HashMap<String, Expr>,
}

impl Row {
    fn allow(&self, known: &[&str]) -> Result<(), SqlError> {
        match self.cols.keys().find(|c| !known.contains(&c.as_str())) {
            Some(col) => Err(SqlError::UnknownColumn { table: self.table.clone(), column: col.clone() }),
            None => Ok(()),
        }
    }

    fn has(&self, col: &str) -> bool {
        self.cols.contains_key(col)
    }

    /// Column value; NULL reads as absent.
    fn get(&self, col: &str) -> Option<&Expr> {
        self.cols.get(col).filter(|e| !is_null(e))
    }

    fn req(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(col))
    }
}

/// WHERE clause flattened into conjunctive column predicates.
#[derive(Default)]
struct Filters {
    eq: HashMap<String, Expr>,
    /// `col > v` / `col >= v` (inclusive flag).
    lower: HashMap<String, (Expr, bool)>,
    /// `col < v` / `col <= v` (inclusive flag).
    upper: HashMap<String, (Expr, bool)>,
    in_lists: HashMap<String, Vec<Expr>>,
}

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut f = Filters::default();
        if let Some(expr) = selection {
            f.collect(expr)?;
        }
        Ok(f)
    }

    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => {
                if *op == ast::BinaryOperator::And {
                    self.collect(left)?;
                    return self.collect(right);
                }
                let col = expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("WHERE {expr}")))?;
                let value = right.as_ref().clone();
                match op {
                    ast::BinaryOperator::Eq => {
                        self.eq.insert(col, value);
                    }
                    ast::BinaryOperator::GtEq => {
                        self.lower.insert(col, (value, true));
                    }
                    ast::BinaryOperator::Gt => {
                        self.lower.insert(col, (value, false));
                    }
                    ast::BinaryOperator::LtEq => {
                        self.upper.insert(col, (value, true));
                    }
                    ast::BinaryOperator::Lt => {
                        self.upper.insert(col, (value, false));
                    }
                    _ => return Err(SqlError::Unsupported(format!("WHERE {expr}"))),
                }
                Ok(())
            }
            Expr::InList { expr: column, list, negated: false } => {
                let col = expr_column_name(column).ok_or_else(|| SqlError::Unsupported(format!("WHERE {expr}")))?;
                if list.len() > MAX_IN_CLAUSE_IDS {
                    return Err(SqlError::TooManyIds);
                }
                self.in_lists.insert(col, list.clone());
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("WHERE {expr}"))),
        }
    }

    fn eq(&self, col: &str) -> Option<&Expr> {
        self.eq.get(col).filter(|e| !is_null(e))
    }

    fn id(&self) -> Result<Ulid, SqlError> {
        ulid_of(self.eq("id").ok_or(SqlError::MissingFilter("id"))?)
    }

    /// `col IN (..)` or `col = ..` as a list of ids.
    fn ids(&self, col: &str) -> Result<Option<Vec<Ulid>>, SqlError> {
        if let Some(list) = self.in_lists.get(col) {
            return list.iter().map(ulid_of).collect::<Result<Vec<_>, _>>().map(Some);
        }
        opt(self.eq(col), ulid_of).map(|id| id.map(|id| vec![id]))
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn parse_err(e: ParserError) -> SqlError {
    SqlError::Parse(e.to_string())
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

/// Lowercase, unquoted last segment of a printed column reference.
fn column_key(printed: &str) -> String {
    let last = printed.rsplit('.').next().unwrap_or(printed);
    last.trim_matches('"').to_lowercase()
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn insert_rows(insert: &ast::Insert, table: &str) -> Result<Vec<Row>, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse(format!("INSERT INTO {table} needs a column list")));
    }
    let columns: Vec<String> = insert.columns.iter().map(|c| column_key(&c.to_string())).collect();
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    let SetExpr::Values(values) = body.body.as_ref() else {
        return Err(SqlError::Parse("expected VALUES".into()));
    };
    if values.rows.is_empty() {
        return Err(SqlError::Parse("empty VALUES".into()));
    }
    values
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() != columns.len() {
                return Err(SqlError::Parse(format!(
                    "row {i}: {} columns but {} values",
                    columns.len(),
                    row.len()
                )));
            }
            Ok(Row {
                table: table.to_string(),
                cols: columns.iter().cloned().zip(row.iter().cloned()).collect(),
            })
        })
        .collect()
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn opt<T>(expr: Option<&Expr>, parse: impl Fn(&Expr) -> Result<T, SqlError>) -> Result<Option<T>, SqlError> {
    expr.map(parse).transpose()
}

/// String or numeric literal as text. Bound parameters always arrive quoted.
fn literal(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s),
        Some(other) => Err(SqlError::Parse(format!("expected literal, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn text(expr: &Expr) -> Result<String, SqlError> {
    literal(expr).map(str::to_string)
}

fn ulid_of(expr: &Expr) -> Result<Ulid, SqlError> {
    Ulid::from_string(literal(expr)?).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn int(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        return Ok(-int(expr)?);
    }
    let s = literal(expr)?;
    s.trim().parse().map_err(|_| SqlError::Parse(format!("expected integer, got {s:?}")))
}

fn num<T: TryFrom<i64>>(expr: &Expr) -> Result<T, SqlError> {
    let v = int(expr)?;
    T::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn boolean(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(Value::Boolean(b)) = extract_value(expr) {
        return Ok(*b);
    }
    let s = literal(expr)?;
    match s.to_lowercase().as_str() {
        "true" | "t" | "1" => Ok(true),
        "false" | "f" | "0" => Ok(false),
        _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
    }
}

const DATETIME_FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Epoch milliseconds, or local wall-clock text stored as UTC.
fn instant(expr: &Expr) -> Result<Ms, SqlError> {
    if let Ok(ms) = int(expr) {
        return Ok(ms);
    }
    let s = literal(expr)?.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| SqlError::DateTime(s.to_string()))
}

fn date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal(expr)?.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| SqlError::DateTime(s.to_string()))
}

/// `'HH:MM[:SS]'` or a plain minute count.
fn minute_of_day(expr: &Expr) -> Result<u32, SqlError> {
    if let Ok(minutes) = num::<u32>(expr) {
        return Ok(minutes);
    }
    let s = literal(expr)?.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map(|t| t.hour() * 60 + t.minute())
        .map_err(|_| SqlError::DateTime(s.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column {column} for {table}")]
    UnknownColumn { table: String, column: String },
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid date/time literal {0:?}")]
    DateTime(String),
    #[error("too many ids in IN list")]
    TooManyIds,
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::DateTime(_) => "22007",
            SqlError::TooManyIds => "54000",
            _ => "42601",
        }
    }
}
