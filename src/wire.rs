use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
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
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SlotbookAuthSource;
use crate::clock::Clock;
use crate::engine::{Engine, EngineError, Rejection, ReserveRequest};
use crate::limits::MAX_BOOKING_HORIZON_DAYS;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct SlotbookHandler {
    engine: Arc<Engine>,
    clock: Arc<dyn Clock>,
    query_parser: Arc<SlotbookQueryParser>,
}

impl SlotbookHandler {
    pub fn new(engine: Arc<Engine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            clock,
            query_parser: Arc::new(SlotbookQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "parse", "status" => "error").increment(1);
            sql_err(e)
        })?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertBusiness { id, name, slot_step } => {
                engine.create_business(id, name, slot_step).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteBusiness { id } => {
                engine.delete_business(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertSchedules { business_id, days } => {
                let count = days.len();
                engine.set_schedules(business_id, days).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::InsertService {
                id,
                business_id,
                name,
                duration,
            } => {
                engine
                    .add_service(id, business_id, name, duration)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteService { id } => {
                engine.remove_service(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertAppointment {
                id,
                business_id,
                service_id,
                date,
                time,
                customer_id,
            } => {
                let req = ReserveRequest {
                    id,
                    business_id,
                    service_id,
                    date,
                    time,
                    customer_id,
                };
                engine.reserve(req, self.clock.now()).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::ConfirmAppointment { id } => {
                engine.confirm_appointment(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::CancelAppointment { id } => {
                engine.cancel_appointment(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBusinesses { id } => {
                let businesses = match id {
                    Some(id) => vec![engine.get_business(id).await.map_err(engine_err)?],
                    None => engine.list_businesses().await,
                };
                let schema = Arc::new(business_schema());
                let rows: Vec<PgWireResult<DataRow>> = businesses
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.name)?;
                        encoder.encode_field(&i64::from(b.slot_step))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectSchedules { business_id } => {
                let week = engine.weekly_schedule(business_id).await.map_err(engine_err)?;
                let schema = Arc::new(schedule_schema());
                let bid = business_id.to_string();
                let rows: Vec<PgWireResult<DataRow>> = week
                    .iter()
                    .map(|(weekday, day)| {
                        let hours = |t: TimeOfDay| day.is_open.then(|| t.to_string());
                        let lunch = day.lunch.filter(|_| day.is_open);
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&bid)?;
                        encoder.encode_field(&(weekday.index() as i64))?;
                        encoder.encode_field(&format!("{weekday:?}"))?;
                        encoder.encode_field(&day.is_open)?;
                        encoder.encode_field(&hours(day.open_time))?;
                        encoder.encode_field(&hours(day.close_time))?;
                        encoder.encode_field(&lunch.map(|l| l.start.to_string()))?;
                        encoder.encode_field(&lunch.map(|l| l.end.to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectServices { business_id } => {
                let services = engine.list_services(business_id).await.map_err(engine_err)?;
                let schema = Arc::new(service_schema());
                let rows: Vec<PgWireResult<DataRow>> = services
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.business_id.to_string())?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&i64::from(s.duration_minutes))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectAppointment { id } => {
                let appointment = engine.get_appointment(id).await.map_err(engine_err)?;
                Ok(appointment_response(vec![appointment]))
            }
            Command::SelectAppointments {
                business_id,
                start,
                end,
            } => {
                let start = start.unwrap_or_else(|| self.clock.now().date());
                let end = end.unwrap_or_else(|| default_window_end(start));
                let appointments = engine
                    .list_appointments(business_id, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(appointment_response(appointments))
            }
            Command::SelectCalendar {
                business_id,
                year,
                month,
            } => {
                let cells = engine
                    .month_view(business_id, year, month, self.clock.now())
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(calendar_schema());
                let rows: Vec<PgWireResult<DataRow>> = cells
                    .into_iter()
                    .map(|cell| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&cell.date.to_string())?;
                        encoder.encode_field(&format!("{:?}", cell.weekday))?;
                        encoder.encode_field(&cell.in_current_month)?;
                        encoder.encode_field(&cell.is_past)?;
                        encoder.encode_field(&cell.is_open_day)?;
                        encoder.encode_field(&(cell.free_slots() as i64))?;
                        encoder.encode_field(&slots_json(&cell.slots))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectSlots { business_id, date } => {
                let cell = engine
                    .day_slots(business_id, date, self.clock.now())
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slot_schema());
                let day = cell.date.to_string();
                let rows: Vec<PgWireResult<DataRow>> = cell
                    .slots
                    .iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&day)?;
                        encoder.encode_field(&slot.time.to_string())?;
                        encoder.encode_field(&slot.state.as_str().to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectOccupancy {
                business_id,
                start,
                end,
            } => {
                let occupancy = engine
                    .occupancy(business_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(occupancy_schema());
                let rows: Vec<PgWireResult<DataRow>> = occupancy
                    .iter()
                    .map(|(date, time)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&date.to_string())?;
                        encoder.encode_field(&time.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
        }
    }
}

fn query_response(
    schema: Arc<Vec<FieldInfo>>,
    rows: Vec<PgWireResult<DataRow>>,
) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn appointment_response(appointments: Vec<Appointment>) -> Response {
    let schema = Arc::new(appointment_schema());
    let rows: Vec<PgWireResult<DataRow>> = appointments
        .into_iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.business_id.to_string())?;
            encoder.encode_field(&a.service_id.to_string())?;
            encoder.encode_field(&a.date.to_string())?;
            encoder.encode_field(&a.time.to_string())?;
            encoder.encode_field(&a.customer_id)?;
            encoder.encode_field(&a.status.to_string())?;
            encoder.encode_field(&a.created_at.format("%Y-%m-%d %H:%M:%S").to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

/// Listing window when only a start (or nothing) is given.
fn default_window_end(start: NaiveDate) -> NaiveDate {
    start
        .checked_add_days(Days::new(MAX_BOOKING_HORIZON_DAYS as u64))
        .unwrap_or(NaiveDate::MAX)
}

fn slots_json(slots: &[TimeSlot]) -> String {
    let slots: Vec<_> = slots
        .iter()
        .map(|s| serde_json::json!({ "time": s.time.to_string(), "state": s.state.as_str() }))
        .collect();
    serde_json::Value::Array(slots).to_string()
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn business_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("name"), int("slot_step")]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        text("business_id"),
        int("weekday"),
        text("weekday_name"),
        boolean("is_open"),
        text("open_time"),
        text("close_time"),
        text("break_start"),
        text("break_end"),
    ]
}

fn service_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("business_id"), text("name"), int("duration")]
}

fn appointment_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("business_id"),
        text("service_id"),
        text("date"),
        text("time"),
        text("customer_id"),
        text("status"),
        text("created_at"),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        text("date"),
        text("weekday"),
        boolean("in_current_month"),
        boolean("is_past"),
        boolean("is_open_day"),
        int("free_slots"),
        text("slots"),
    ]
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![text("date"), text("time"), text("state")]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![text("date"), text("time")]
}

/// Row shape of a statement before its parameters are bound. Only the
/// `FROM` table matters, so a cheap token scan is enough.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut tokens = lower.split(|c: char| c.is_whitespace() || c == ';');
    if tokens.next() != Some("select") {
        return vec![];
    }
    let table = tokens
        .skip_while(|t| *t != "from")
        .nth(1)
        .map(|t| t.trim_matches('"').rsplit('.').next().unwrap_or(t).to_string());
    match table.as_deref() {
        Some("businesses") => business_schema(),
        Some("schedules") => schedule_schema(),
        Some("services") => service_schema(),
        Some("appointments") => appointment_schema(),
        Some("calendar") => calendar_schema(),
        Some("slots") => slot_schema(),
        Some("occupancy") => occupancy_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotbookHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotbookQueryParser;

#[async_trait]
impl QueryParser for SlotbookQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotbookHandler {
    type Statement = String;
    type QueryParser = SlotbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Placeholders above this are not parameters. The Bind message carries
/// an `i16` count, so no client can supply more.
const MAX_BIND_PARAMS: usize = i16::MAX as usize;

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split `sql` into literal text and `$N` placeholders. Text inside single
/// or double quotes is never a placeholder.
fn segments(sql: &str) -> Vec<Segment<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut quote: Option<u8> = None;
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // a doubled quote closes and reopens, which leaves us inside
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let index = sql[i + 1..end]
                    .parse::<usize>()
                    .ok()
                    .filter(|n| (1..=MAX_BIND_PARAMS).contains(n));
                if let Some(n) = index {
                    out.push(Segment::Text(&sql[text_start..i]));
                    out.push(Segment::Param(n));
                    text_start = end;
                    i = end;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    out.push(Segment::Text(&sql[text_start..]));
    out
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    segments(sql)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Param(n) => Some(n),
            Segment::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Inline bound text parameters as quoted literals in one pass, so a value
/// that itself contains `$N` is never substituted again.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut bound = String::with_capacity(sql.len());
    for segment in segments(sql) {
        match segment {
            Segment::Text(text) => bound.push_str(text),
            Segment::Param(n) => match params.get(n - 1) {
                Some(Some(value)) => {
                    bound.push('\'');
                    bound.push_str(&String::from_utf8_lossy(value.as_ref()).replace('\'', "''"));
                    bound.push('\'');
                }
                Some(None) => bound.push_str("NULL"),
                None => bound.push_str(&format!("${n}")),
            },
        }
    }
    bound
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotbookFactory {
    handler: Arc<SlotbookHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SlotbookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotbookFactory {
    pub fn new(engine: Arc<Engine>, clock: Arc<dyn Clock>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotbookHandler::new(engine, clock)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SlotbookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotbookFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    clock: Arc<dyn Clock>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SlotbookFactory::new(engine, clock, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE for an engine error. Rejections get their own codes so clients
/// can branch without parsing messages.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Rejected(Rejection::SlotAlreadyTaken) => "23505",
        EngineError::Rejected(Rejection::SlotInPast) => "SB001",
        EngineError::Rejected(Rejection::OutsideBusinessHours) => "SB002",
        EngineError::Rejected(Rejection::InvalidSlotAlignment) => "SB003",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidInput(_) | EngineError::InvalidSchedule(_) | EngineError::InvalidTransition { .. } => {
            "22023"
        }
        EngineError::HasActiveAppointments(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), "42601".into(), e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM slots"), 0);
        assert_eq!(count_params("SELECT * FROM slots WHERE business_id = $1 AND date = $2"), 2);
        assert_eq!(count_params("INSERT INTO x VALUES ($3, $1, $12)"), 12);
        assert_eq!(count_params("SELECT '$'"), 0);
        assert_eq!(count_params("SELECT * FROM services WHERE name = '$4'"), 0);
        // beyond anything a Bind message can carry
        assert_eq!(count_params("SELECT $18446744073709551615"), 0);
        assert_eq!(count_params("SELECT $99999999999999999999999"), 0);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "INSERT INTO appointments (id, customer_id) VALUES ($1, $2)";
        let params = [Some(b"vip$2".to_vec()), Some(b"vip$1".to_vec())];
        assert_eq!(
            bind_params(sql, &params),
            "INSERT INTO appointments (id, customer_id) VALUES ('vip$2', 'vip$1')"
        );
    }

    #[test]
    fn binding_quotes_values_and_skips_literals() {
        let params = [Some(b"O'Hara".to_vec()), None];
        assert_eq!(
            bind_params("SELECT $1, $2, '$1', \"$2\", $3", &params),
            "SELECT 'O''Hara', NULL, '$1', \"$2\", $3"
        );
        // $10 is one placeholder, not $1 followed by 0
        let ten: Vec<Option<Vec<u8>>> = (1..=10).map(|n| Some(n.to_string().into_bytes())).collect();
        assert_eq!(bind_params("VALUES ($10, $1)", &ten), "VALUES ('10', '1')");
    }

    #[test]
    fn rejections_have_distinct_sqlstates() {
        let codes: Vec<_> = [
            Rejection::SlotAlreadyTaken,
            Rejection::SlotInPast,
            Rejection::OutsideBusinessHours,
            Rejection::InvalidSlotAlignment,
        ]
        .into_iter()
        .map(|r| sqlstate(&EngineError::Rejected(r)))
        .collect();
        assert_eq!(codes, vec!["23505", "SB001", "SB002", "SB003"]);
        assert_eq!(sqlstate(&EngineError::NotFound(Ulid::new())), "P0002");
        assert_eq!(sqlstate(&EngineError::LimitExceeded("x")), "54000");
    }

    #[test]
    fn schema_follows_from_table() {
        let names = |sql: &str| -> Vec<String> { result_schema(sql).iter().map(|f| f.name().to_string()).collect() };
        assert_eq!(names("SELECT * FROM businesses"), vec!["id", "name", "slot_step"]);
        assert_eq!(
            names("select * from occupancy where business_id = $1 and \"date\" >= $2 and \"date\" <= $3"),
            vec!["date", "time"]
        );
        assert_eq!(names("SELECT * FROM calendar WHERE business_id = $1").len(), 7);
        assert!(names("INSERT INTO businesses VALUES ($1, $2)").is_empty());
        assert!(names("SELECT * FROM nowhere").is_empty());
    }

    #[test]
    fn slots_render_as_json() {
        let slots = vec![
            TimeSlot {
                time: TimeOfDay::hm(9, 0).unwrap(),
                state: SlotState::Free,
            },
            TimeSlot {
                time: TimeOfDay::hm(9, 30).unwrap(),
                state: SlotState::Occupied,
            },
        ];
        let parsed: serde_json::Value = serde_json::from_str(&slots_json(&slots)).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([
                { "time": "09:00", "state": "free" },
                { "time": "09:30", "state": "occupied" },
            ])
        );
    }
}
