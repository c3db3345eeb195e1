use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::SeatdAuthSource;
use crate::engine::{Action, Engine, EngineError, require_location_id};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct SeatdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SeatdQueryParser>,
}

impl SeatdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SeatdQueryParser),
        }
    }

    /// The connection's database name selects the restaurant.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client.metadata().get("database").map(String::as_str);
        self.tenant_manager.get_or_create(db).map_err(engine_err)
    }

    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let command = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => command, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => command).record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(command, error = %e, "query failed");
        }
        result.map_err(engine_err)
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> Result<Response, EngineError> {
        match cmd {
            // ── Locations ──────────────────────────────────────
            Command::InsertLocation { id, name, is_default, is_active } => {
                engine.create_location(id, name, is_default, is_active).await?;
                Ok(tag("INSERT", 1))
            }
            Command::UpdateLocation { id, name, is_default, is_active } => {
                engine.update_location(id, name, is_default, is_active).await?;
                Ok(tag("UPDATE", 1))
            }
            Command::DeleteLocation { id } => {
                engine.delete_location(id).await?;
                Ok(tag("DELETE", 1))
            }
            Command::SelectLocations => {
                let locations = engine.list_locations().await;
                Ok(rows("locations", locations, |enc, l| {
                    enc.encode_field(&l.id.to_string())?;
                    enc.encode_field(&l.name)?;
                    enc.encode_field(&l.is_default)?;
                    enc.encode_field(&l.is_active)
                }))
            }

            // ── Capacity ───────────────────────────────────────
            Command::UpsertCapacity { location_id, total_capacity, default_table_capacity } => {
                let lid = require_location_id(location_id)?;
                engine.configure_capacity(lid, total_capacity, default_table_capacity).await?;
                Ok(tag("INSERT", 1))
            }
            Command::SelectCapacity { location_id, at } => {
                let info = engine.capacity_info(require_location_id(location_id)?, at).await?;
                Ok(rows("location_capacities", [info], |enc, c| {
                    enc.encode_field(&c.location_id.to_string())?;
                    enc.encode_field(&(c.total_capacity as i64))?;
                    enc.encode_field(&(c.default_table_capacity as i64))?;
                    enc.encode_field(&c.available_capacity)
                }))
            }

            // ── Sections & seats ───────────────────────────────
            Command::InsertSection { id, location_id, name, floor_number } => {
                engine.create_section(id, require_location_id(location_id)?, name, floor_number).await?;
                Ok(tag("INSERT", 1))
            }
            Command::DeleteSection { id } => {
                engine.delete_section(id).await?;
                Ok(tag("DELETE", 1))
            }
            Command::SelectSections { location_id } => {
                let sections = engine.list_sections(location_id).await?;
                Ok(rows("seat_sections", sections, |enc, s| {
                    enc.encode_field(&s.id.to_string())?;
                    enc.encode_field(&s.location_id.to_string())?;
                    enc.encode_field(&s.name)?;
                    enc.encode_field(&(s.floor_number as i64))?;
                    enc.encode_field(&(s.capacity as i64))?;
                    enc.encode_field(&(s.seat_count as i64))
                }))
            }
            Command::InsertSeat { id, section_id, label, min_capacity, max_capacity, category } => {
                engine.create_seat(id, section_id, label, min_capacity, max_capacity, category).await?;
                Ok(tag("INSERT", 1))
            }
            Command::DeleteSeat { id } => {
                engine.delete_seat(id).await?;
                Ok(tag("DELETE", 1))
            }
            Command::SelectSeats { location_id, section_id, at } => {
                let seats = engine.list_seats(location_id, section_id, at).await?;
                Ok(rows("seats", seats, |enc, s| {
                    enc.encode_field(&s.id.to_string())?;
                    enc.encode_field(&s.location_id.to_string())?;
                    enc.encode_field(&s.section_id.to_string())?;
                    enc.encode_field(&s.label)?;
                    enc.encode_field(&(s.min_capacity as i64))?;
                    enc.encode_field(&(s.max_capacity as i64))?;
                    enc.encode_field(&s.category.as_str())?;
                    enc.encode_field(&s.status.as_str())?;
                    enc.encode_field(&s.occupant.map(|o| o.kind.as_str()))?;
                    enc.encode_field(&s.occupant.map(|o| o.id.to_string()))
                }))
            }

            // ── Blocked periods ────────────────────────────────
            Command::InsertBlockedPeriod { id, location_id, section_id, start, end, reason } => {
                let lid = require_location_id(location_id)?;
                engine.add_blocked_period(id, lid, section_id, Span { start, end }, reason).await?;
                Ok(tag("INSERT", 1))
            }
            Command::UpdateBlockedPeriod { id, start, end, reason, status } => {
                engine.update_blocked_period(id, start, end, reason, status).await?;
                Ok(tag("UPDATE", 1))
            }
            Command::DeleteBlockedPeriod { id } => {
                engine.remove_blocked_period(id).await?;
                Ok(tag("DELETE", 1))
            }
            Command::SelectBlockedPeriods { location_id, active_only } => {
                let blocks = engine.list_blocked_periods(location_id, active_only).await?;
                Ok(rows("blocked_periods", blocks, |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.location_id.to_string())?;
                    enc.encode_field(&b.section_id.map(|s| s.to_string()))?;
                    enc.encode_field(&b.span.start)?;
                    enc.encode_field(&b.span.end)?;
                    enc.encode_field(&b.reason)?;
                    enc.encode_field(&b.status.as_str())
                }))
            }

            // ── Calendar ───────────────────────────────────────
            Command::UpsertOperatingHours { day_of_week, open_minute, close_minute, closed } => {
                engine.set_operating_hours(day_of_week, open_minute, close_minute, closed).await?;
                Ok(tag("INSERT", 1))
            }
            Command::SelectOperatingHours => {
                let hours = engine.operating_hours().await;
                Ok(rows("operating_hours", hours, |enc, h| {
                    enc.encode_field(&(h.day_of_week as i64))?;
                    enc.encode_field(&clock(h.open_minute))?;
                    enc.encode_field(&clock(h.close_minute))?;
                    enc.encode_field(&h.closed)
                }))
            }
            Command::InsertSpecialEvent { event } => {
                engine.set_special_event(event).await?;
                Ok(tag("INSERT", 1))
            }
            Command::DeleteSpecialEvent { id } => {
                engine.remove_special_event(id).await?;
                Ok(tag("DELETE", 1))
            }
            Command::SelectSpecialEvents => {
                let mut events = engine.special_events().await;
                events.sort_by_key(|e| e.date);
                Ok(rows("special_events", events, |enc, e| {
                    enc.encode_field(&e.id.to_string())?;
                    enc.encode_field(&e.date.to_string())?;
                    enc.encode_field(&e.closed)?;
                    enc.encode_field(&e.exclusive_booking)?;
                    enc.encode_field(&e.max_capacity.map(i64::from))?;
                    enc.encode_field(&e.start_minute.map(clock))?;
                    enc.encode_field(&e.end_minute.map(clock))?;
                    enc.encode_field(&e.description)
                }))
            }
            Command::UpdateSettings { slot_interval_minutes, max_party_size, reservation_duration_minutes } => {
                engine
                    .update_settings(slot_interval_minutes, max_party_size, reservation_duration_minutes)
                    .await?;
                Ok(tag("UPDATE", 1))
            }
            Command::SelectSettings => {
                let s = engine.settings().await;
                Ok(rows("settings", [s], |enc, s| {
                    enc.encode_field(&(s.slot_interval_minutes as i64))?;
                    enc.encode_field(&s.max_party_size.map(i64::from))?;
                    enc.encode_field(&(s.reservation_duration_minutes as i64))
                }))
            }

            // ── Occupants ──────────────────────────────────────
            Command::InsertReservation { id, location_id, name, party_size, start, duration_minutes } => {
                let lid = require_location_id(location_id)?;
                engine.create_reservation(id, lid, name, party_size, start, duration_minutes).await?;
                Ok(tag("INSERT", 1))
            }
            Command::InsertWaitlistEntry { id, location_id, name, party_size, check_in } => {
                let lid = require_location_id(location_id)?;
                engine.create_waitlist_entry(id, lid, name, party_size, check_in).await?;
                Ok(tag("INSERT", 1))
            }
            Command::UpdateOccupantStatus { occupant, status } => {
                let action = Action::for_requested_status(occupant.kind, status).ok_or_else(|| {
                    EngineError::validation(format!("status {status} is reached by allocating seats, not by update"))
                })?;
                engine.transition(occupant, action).await?;
                Ok(tag("UPDATE", 1))
            }
            Command::SelectOccupants { kind, location_id, id } => {
                let occupants = match id {
                    Some(id) => engine
                        .get_occupant(OccupantRef { kind, id })
                        .await
                        .filter(|o| location_id.is_none_or(|lid| lid == o.location_id))
                        .into_iter()
                        .collect(),
                    None => engine.list_occupants(kind, location_id).await?,
                };
                Ok(match kind {
                    OccupantKind::Reservation => rows("reservations", occupants, |enc, o| {
                        let span = o.reservation_span();
                        encode_occupant_head(enc, &o)?;
                        enc.encode_field(&span.map(|s| s.start))?;
                        enc.encode_field(&span.map(|s| s.end))?;
                        enc.encode_field(&o.status_changed_at)
                    }),
                    OccupantKind::Waitlist => rows("waitlist_entries", occupants, |enc, o| {
                        let check_in = match o.timing {
                            OccupantTiming::Waitlist { check_in } => Some(check_in),
                            OccupantTiming::Reservation { .. } => None,
                        };
                        encode_occupant_head(enc, &o)?;
                        enc.encode_field(&check_in)?;
                        enc.encode_field(&o.status_changed_at)
                    }),
                })
            }

            // ── Allocations ────────────────────────────────────
            Command::InsertAllocations { occupant, seats, start, intent } => {
                let allocated = engine.bulk_allocate(occupant, seats, start, intent).await?;
                Ok(tag("INSERT", allocated.len()))
            }
            Command::DeleteAllocation { id } => {
                engine.release_allocation(id).await?;
                Ok(tag("DELETE", 1))
            }
            Command::ReleaseAllocations { target } => {
                let released = engine.bulk_release(target).await?;
                Ok(tag("DELETE", released))
            }
            Command::SelectAllocations { filter } => {
                let allocations = engine.list_allocations(&filter).await?;
                Ok(rows("seat_allocations", allocations, |enc, a| {
                    enc.encode_field(&a.id.to_string())?;
                    enc.encode_field(&a.location_id.to_string())?;
                    enc.encode_field(&a.seat_id.to_string())?;
                    enc.encode_field(&a.seat_label)?;
                    enc.encode_field(&a.occupant.kind.as_str())?;
                    enc.encode_field(&a.occupant.id.to_string())?;
                    enc.encode_field(&a.occupant_name)?;
                    enc.encode_field(&(a.occupant_party_size as i64))?;
                    enc.encode_field(&a.occupant_status.as_str())?;
                    enc.encode_field(&a.start)?;
                    enc.encode_field(&a.released_at)
                }))
            }

            // ── Admission queries ──────────────────────────────
            Command::SelectAvailability { location_id, date, party_size, section_id } => {
                let lid = require_location_id(location_id)?;
                let report = engine.availability(lid, date, party_size, section_id).await?;
                let max_available = report.max_available_seats;
                let actual = report.actual_capacity as i64;
                let admin_max = report.admin_max_party_size.map(i64::from);
                let effective_max = report.effective_max_party_size as i64;
                Ok(rows("availability", report.slots, |enc, slot| {
                    enc.encode_field(&slot.start)?;
                    enc.encode_field(&clock(slot.minute_of_day))?;
                    enc.encode_field(&slot.available_seats)?;
                    enc.encode_field(&slot.bookable)?;
                    enc.encode_field(&max_available)?;
                    enc.encode_field(&actual)?;
                    enc.encode_field(&admin_max)?;
                    enc.encode_field(&effective_max)
                }))
            }
            Command::SelectCapacityCheck { location_id, at, party_size } => {
                let check = engine.capacity_check(require_location_id(location_id)?, at, party_size).await?;
                Ok(rows("capacity_check", [check], |enc, c| {
                    enc.encode_field(&(c.max_party_size as i64))?;
                    enc.encode_field(&c.available)?;
                    enc.encode_field(&(c.total_capacity as i64))?;
                    enc.encode_field(&(c.booked_seats as i64))?;
                    enc.encode_field(&c.reason)
                }))
            }
        }
    }
}

fn encode_occupant_head(enc: &mut DataRowEncoder, o: &Occupant) -> PgWireResult<()> {
    enc.encode_field(&o.id.to_string())?;
    enc.encode_field(&o.location_id.to_string())?;
    enc.encode_field(&o.name)?;
    enc.encode_field(&(o.party_size as i64))?;
    enc.encode_field(&o.status.as_str())
}

fn tag(command: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(command).with_rows(rows))
}

/// Minutes after midnight as `HH:MM`; service past midnight wraps.
fn clock(minute: u32) -> String {
    format!("{:02}:{:02}", (minute / 60) % 24, minute % 60)
}

fn rows<T>(
    table: &str,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(result_schema(table));
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn text_col(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_col(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bool_col(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

/// Columns returned by `SELECT` on each virtual table. Instants are epoch
/// milliseconds; times of day are `HH:MM` text.
pub fn result_schema(table: &str) -> Vec<FieldInfo> {
    match table {
        "locations" => vec![text_col("id"), text_col("name"), bool_col("is_default"), bool_col("is_active")],
        "location_capacities" => vec![
            text_col("location_id"),
            int_col("total_capacity"),
            int_col("default_table_capacity"),
            int_col("available_capacity"),
        ],
        "seat_sections" => vec![
            text_col("id"),
            text_col("location_id"),
            text_col("name"),
            int_col("floor_number"),
            int_col("capacity"),
            int_col("seat_count"),
        ],
        "seats" => vec![
            text_col("id"),
            text_col("location_id"),
            text_col("section_id"),
            text_col("label"),
            int_col("min_capacity"),
            int_col("max_capacity"),
            text_col("category"),
            text_col("status"),
            text_col("occupant_type"),
            text_col("occupant_id"),
        ],
        "blocked_periods" => vec![
            text_col("id"),
            text_col("location_id"),
            text_col("section_id"),
            int_col("start_time"),
            int_col("end_time"),
            text_col("reason"),
            text_col("status"),
        ],
        "operating_hours" => vec![
            int_col("day_of_week"),
            text_col("open_time"),
            text_col("close_time"),
            bool_col("closed"),
        ],
        "special_events" => vec![
            text_col("id"),
            text_col("event_date"),
            bool_col("closed"),
            bool_col("exclusive_booking"),
            int_col("max_capacity"),
            text_col("start_time"),
            text_col("end_time"),
            text_col("description"),
        ],
        "settings" => vec![
            int_col("slot_interval_minutes"),
            int_col("max_party_size"),
            int_col("reservation_duration_minutes"),
        ],
        "reservations" => vec![
            text_col("id"),
            text_col("location_id"),
            text_col("name"),
            int_col("party_size"),
            text_col("status"),
            int_col("start_time"),
            int_col("end_time"),
            int_col("status_changed_at"),
        ],
        "waitlist_entries" => vec![
            text_col("id"),
            text_col("location_id"),
            text_col("name"),
            int_col("party_size"),
            text_col("status"),
            int_col("check_in_time"),
            int_col("status_changed_at"),
        ],
        "seat_allocations" => vec![
            text_col("id"),
            text_col("location_id"),
            text_col("seat_id"),
            text_col("seat_label"),
            text_col("occupant_type"),
            text_col("occupant_id"),
            text_col("occupant_name"),
            int_col("party_size"),
            text_col("occupant_status"),
            int_col("start_time"),
            int_col("released_at"),
        ],
        "availability" => vec![
            int_col("start_time"),
            text_col("time"),
            int_col("available_seats"),
            bool_col("bookable"),
            int_col("max_available_seats"),
            int_col("actual_capacity"),
            int_col("max_party_size"),
            int_col("effective_max_party_size"),
        ],
        "capacity_check" => vec![
            int_col("max_party_size"),
            bool_col("available"),
            int_col("total_capacity"),
            int_col("booked_seats"),
            text_col("reason"),
        ],
        _ => vec![],
    }
}

fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    sql::select_table(sql).map(|t| result_schema(&t)).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for SeatdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let commands = sql::parse_batch(query).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(commands.len());
        for cmd in commands {
            responses.push(self.run(&engine, cmd).await?);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SeatdQueryParser;

#[async_trait]
impl QueryParser for SeatdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SeatdHandler {
    type Statement = String;
    type QueryParser = SeatdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(&self, client: &mut C, portal: &Portal<Self::Statement>, _max_rows: usize) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(&engine, cmd).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, statement_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(&target.statement.statement)))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... with bound parameter values (text format), highest
/// index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        result = result.replace(&format!("${}", i + 1), &quote_param(param.as_deref()));
    }
    result
}

fn quote_param(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
        None => "NULL".to_string(),
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SeatdFactory {
    handler: Arc<SeatdHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SeatdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SeatdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SeatdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SeatdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SeatdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SeatdFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), e.sqlstate().into(), e.to_string())))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), e.sqlstate().into(), e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_takes_highest_index() {
        assert_eq!(count_params("SELECT * FROM seats"), 0);
        assert_eq!(count_params("SELECT * FROM seats WHERE location_id = $1 AND at = $2"), 2);
        assert_eq!(count_params("INSERT INTO seats (id, label) VALUES ($10, $2)"), 10);
    }

    #[test]
    fn quote_param_escapes_and_nulls() {
        assert_eq!(quote_param(Some(&b"O'Brien"[..])), "'O''Brien'");
        assert_eq!(quote_param(None), "NULL");
    }

    #[test]
    fn clock_wraps_past_midnight() {
        assert_eq!(clock(17 * 60 + 5), "17:05");
        assert_eq!(clock(24 * 60 + 30), "00:30");
    }

    #[test]
    fn every_selectable_table_has_columns() {
        for table in [
            "locations",
            "location_capacities",
            "seat_sections",
            "seats",
            "blocked_periods",
            "operating_hours",
            "special_events",
            "settings",
            "reservations",
            "waitlist_entries",
            "seat_allocations",
            "availability",
            "capacity_check",
        ] {
            assert!(!result_schema(table).is_empty(), "{table}");
        }
        assert!(result_schema("menus").is_empty());
    }

    #[test]
    fn describe_uses_from_table() {
        let schema = statement_schema("SELECT * FROM capacity_check WHERE location_id = $1 AND at = $2 AND party_size = $3");
        assert_eq!(schema.len(), 5);
        assert!(statement_schema("DELETE FROM seats WHERE id = $1").is_empty());
    }
}
