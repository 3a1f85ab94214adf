use chrono::NaiveDate;
use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::{DEFAULT_SERVICE_DURATION_MINUTES, DEFAULT_SLOT_STEP_MINUTES};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBusiness {
        id: Ulid,
        name: String,
        slot_step: u16,
    },
    DeleteBusiness {
        id: Ulid,
    },
    /// One row per weekday, all for the same business.
    InsertSchedules {
        business_id: Ulid,
        days: Vec<(Weekday, WeekdaySchedule)>,
    },
    InsertService {
        id: Ulid,
        business_id: Ulid,
        name: String,
        duration: u16,
    },
    DeleteService {
        id: Ulid,
    },
    InsertAppointment {
        id: Ulid,
        business_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        time: TimeOfDay,
        customer_id: String,
    },
    ConfirmAppointment {
        id: Ulid,
    },
    CancelAppointment {
        id: Ulid,
    },
    SelectBusinesses {
        id: Option<Ulid>,
    },
    SelectSchedules {
        business_id: Ulid,
    },
    SelectServices {
        business_id: Ulid,
    },
    SelectAppointment {
        id: Ulid,
    },
    SelectAppointments {
        business_id: Ulid,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    SelectCalendar {
        business_id: Ulid,
        year: i32,
        month: u32,
    },
    SelectSlots {
        business_id: Ulid,
        date: NaiveDate,
    },
    SelectOccupancy {
        business_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("{table}: unknown column {column}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

const BUSINESS_COLUMNS: &[&str] = &["id", "name", "slot_step"];
const SCHEDULE_COLUMNS: &[&str] = &[
    "business_id",
    "weekday",
    "is_open",
    "open_time",
    "close_time",
    "break_start",
    "break_end",
];
const SERVICE_COLUMNS: &[&str] = &["id", "business_id", "name", "duration"];
const APPOINTMENT_COLUMNS: &[&str] = &["id", "business_id", "service_id", "date", "time", "customer_id"];
const CONFIRMATION_COLUMNS: &[&str] = &["appointment_id"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row addressed by column name. Without an explicit column list
/// the values are taken in the table's declared order.
struct Row<'a> {
    table: &'static str,
    names: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(table: &'static str, known: &[&str], declared: &[String], values: &'a [Expr]) -> Result<Self, SqlError> {
        let names: Vec<String> = if declared.is_empty() {
            if values.len() > known.len() {
                return Err(SqlError::WrongArity(table, known.len(), values.len()));
            }
            known.iter().take(values.len()).map(|c| c.to_string()).collect()
        } else {
            declared.to_vec()
        };
        if names.len() != values.len() {
            return Err(SqlError::WrongArity(table, names.len(), values.len()));
        }
        if let Some(column) = names.iter().find(|n| !known.contains(&n.as_str())) {
            return Err(SqlError::UnknownColumn {
                table,
                column: column.clone(),
            });
        }
        Ok(Self { table, names, values })
    }

    /// `None` when the column is absent or NULL.
    fn get(&self, column: &str) -> Option<&'a Expr> {
        let i = self.names.iter().position(|n| n == column)?;
        let expr = &self.values[i];
        (!is_null(expr)).then_some(expr)
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }

    fn context(&self, e: SqlError) -> SqlError {
        match e {
            SqlError::Parse(msg) => SqlError::Parse(format!("{}: {msg}", self.table)),
            other => other,
        }
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let declared: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "businesses" => {
            let row = Row::new("businesses", BUSINESS_COLUMNS, &declared, single_row(&rows, "businesses")?)?;
            let build = || -> Result<Command, SqlError> {
                Ok(Command::InsertBusiness {
                    id: parse_ulid(row.required("id")?)?,
                    name: parse_string(row.required("name")?)?,
                    slot_step: row.get("slot_step").map(parse_u16).transpose()?.unwrap_or(DEFAULT_SLOT_STEP_MINUTES),
                })
            };
            build().map_err(|e| row.context(e))
        }
        "schedules" => parse_schedule_rows(&declared, &rows),
        "services" => {
            let row = Row::new("services", SERVICE_COLUMNS, &declared, single_row(&rows, "services")?)?;
            let build = || -> Result<Command, SqlError> {
                Ok(Command::InsertService {
                    id: parse_ulid(row.required("id")?)?,
                    business_id: parse_ulid(row.required("business_id")?)?,
                    name: parse_string(row.required("name")?)?,
                    duration: row
                        .get("duration")
                        .map(parse_u16)
                        .transpose()?
                        .unwrap_or(DEFAULT_SERVICE_DURATION_MINUTES),
                })
            };
            build().map_err(|e| row.context(e))
        }
        "appointments" => {
            let row = Row::new("appointments", APPOINTMENT_COLUMNS, &declared, single_row(&rows, "appointments")?)?;
            let build = || -> Result<Command, SqlError> {
                Ok(Command::InsertAppointment {
                    id: parse_ulid(row.required("id")?)?,
                    business_id: parse_ulid(row.required("business_id")?)?,
                    service_id: parse_ulid(row.required("service_id")?)?,
                    date: parse_date(row.required("date")?)?,
                    time: parse_time(row.required("time")?)?,
                    customer_id: parse_string(row.required("customer_id")?)?,
                })
            };
            build().map_err(|e| row.context(e))
        }
        "confirmations" => {
            let row = Row::new("confirmations", CONFIRMATION_COLUMNS, &declared, single_row(&rows, "confirmations")?)?;
            Ok(Command::ConfirmAppointment {
                id: parse_ulid(row.required("appointment_id")?).map_err(|e| row.context(e))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn single_row<'a>(rows: &'a [Vec<Expr>], table: &str) -> Result<&'a [Expr], SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!("multi-row INSERT into {table}"))),
    }
}

fn parse_schedule_rows(declared: &[String], rows: &[Vec<Expr>]) -> Result<Command, SqlError> {
    let mut business_id = None;
    let mut days = Vec::with_capacity(rows.len());
    for (i, values) in rows.iter().enumerate() {
        let row = Row::new("schedules", SCHEDULE_COLUMNS, declared, values)?;
        let (bid, weekday, schedule) = parse_schedule_row(&row).map_err(|e| match e {
            SqlError::Parse(msg) => SqlError::Parse(format!("schedules row {i}: {msg}")),
            other => other,
        })?;
        match business_id {
            None => business_id = Some(bid),
            Some(existing) if existing != bid => {
                return Err(SqlError::Unsupported("schedule rows for more than one business".into()));
            }
            Some(_) => {}
        }
        days.push((weekday, schedule));
    }
    Ok(Command::InsertSchedules {
        business_id: business_id.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?,
        days,
    })
}

fn parse_schedule_row(row: &Row<'_>) -> Result<(Ulid, Weekday, WeekdaySchedule), SqlError> {
    let business_id = parse_ulid(row.required("business_id")?)?;
    let weekday = parse_weekday(row.required("weekday")?)?;
    let is_open = row.get("is_open").map(parse_bool).transpose()?.unwrap_or(true);
    if !is_open {
        return Ok((business_id, weekday, WeekdaySchedule::closed()));
    }

    let mut schedule = WeekdaySchedule::open(
        parse_time(row.required("open_time")?)?,
        parse_time(row.required("close_time")?)?,
    );
    match (row.get("break_start"), row.get("break_end")) {
        (None, None) => {}
        (Some(start), Some(end)) => schedule = schedule.with_lunch(parse_time(start)?, parse_time(end)?),
        _ => return Err(SqlError::Parse("break_start and break_end go together".into())),
    }
    Ok((business_id, weekday, schedule))
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::collect(delete.selection.as_ref())?;
    let id = parse_ulid(filters.required("id", Cmp::Eq)?)?;

    match table.as_str() {
        "businesses" => Ok(Command::DeleteBusiness { id }),
        "services" => Ok(Command::DeleteService { id }),
        "appointments" => Ok(Command::CancelAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::collect(select.selection.as_ref())?;
    let business_id = || parse_ulid(filters.required("business_id", Cmp::Eq)?);

    match table.as_str() {
        "businesses" => Ok(Command::SelectBusinesses {
            id: filters.get("id", Cmp::Eq).map(parse_ulid).transpose()?,
        }),
        "schedules" => Ok(Command::SelectSchedules {
            business_id: business_id()?,
        }),
        "services" => Ok(Command::SelectServices {
            business_id: business_id()?,
        }),
        "appointments" => {
            if let Some(id) = filters.get("id", Cmp::Eq) {
                return Ok(Command::SelectAppointment { id: parse_ulid(id)? });
            }
            let (start, end) = match filters.get("date", Cmp::Eq) {
                Some(day) => {
                    let day = parse_date(day)?;
                    (Some(day), Some(day))
                }
                None => (
                    filters.get("date", Cmp::GtEq).map(parse_date).transpose()?,
                    filters.get("date", Cmp::LtEq).map(parse_date).transpose()?,
                ),
            };
            Ok(Command::SelectAppointments {
                business_id: business_id()?,
                start,
                end,
            })
        }
        "calendar" => {
            let (year, month) = parse_month(filters.required("month", Cmp::Eq)?)?;
            Ok(Command::SelectCalendar {
                business_id: business_id()?,
                year,
                month,
            })
        }
        "slots" => Ok(Command::SelectSlots {
            business_id: business_id()?,
            date: parse_date(filters.required("date", Cmp::Eq)?)?,
        }),
        "occupancy" => Ok(Command::SelectOccupancy {
            business_id: business_id()?,
            start: parse_date(filters.required("date", Cmp::GtEq)?)?,
            end: parse_date(filters.required("date", Cmp::LtEq)?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Eq,
    GtEq,
    LtEq,
}

/// `column op value` terms of a WHERE clause made only of ANDs.
struct Filters<'a> {
    terms: Vec<(String, Cmp, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Self { terms: Vec::new() };
        if let Some(expr) = selection {
            filters.walk(expr)?;
        }
        Ok(filters)
    }

    fn walk(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.walk(inner),
            Expr::BinaryOp { left, op, right } => {
                let cmp = match op {
                    BinaryOperator::And => {
                        self.walk(left)?;
                        return self.walk(right);
                    }
                    BinaryOperator::Eq => Cmp::Eq,
                    BinaryOperator::GtEq => Cmp::GtEq,
                    BinaryOperator::LtEq => Cmp::LtEq,
                    other => return Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
                };
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("WHERE term {expr}")))?;
                self.terms.push((column, cmp, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("WHERE term {other}"))),
        }
    }

    fn get(&self, column: &str, cmp: Cmp) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, op, _)| c == column && *op == cmp)
            .map(|(_, _, e)| *e)
    }

    fn required(&self, column: &'static str, cmp: Cmp) -> Result<&'a Expr, SqlError> {
        self.get(column, cmp).ok_or(SqlError::MissingFilter(column))
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(values.rows.clone()),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
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

/// Quoted strings and bare numbers, as text.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.as_str()),
        Some(value) => Err(SqlError::Parse(format!("expected literal, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::Parse(format!("expected string, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = literal_text(expr)?;
    s.parse().map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        _ => Err(SqlError::Parse(format!("expected bool, got {expr}"))),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal_text(expr)?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_time(expr: &Expr) -> Result<TimeOfDay, SqlError> {
    literal_text(expr)?
        .parse()
        .map_err(|e: TimeParseError| SqlError::Parse(e.to_string()))
}

/// `0`–`6` from Sunday, or an English day name (full or three-letter).
fn parse_weekday(expr: &Expr) -> Result<Weekday, SqlError> {
    let s = literal_text(expr)?;
    if let Ok(n) = s.parse::<u8>() {
        return Weekday::from_index(n).ok_or_else(|| SqlError::Parse(format!("weekday {n} out of range 0..=6")));
    }
    let lower = s.to_lowercase();
    Weekday::ALL
        .into_iter()
        .find(|w| {
            let name = format!("{w:?}").to_lowercase();
            name == lower || name[..3] == lower
        })
        .ok_or_else(|| SqlError::Parse(format!("bad weekday {s:?}")))
}

/// `'YYYY-MM'`.
fn parse_month(expr: &Expr) -> Result<(i32, u32), SqlError> {
    let s = literal_text(expr)?;
    let bad = || SqlError::Parse(format!("bad month {s:?} (expected YYYY-MM)"));
    let (year, month) = s.split_once('-').ok_or_else(bad)?;
    let year: i32 = year.parse().map_err(|_| bad())?;
    let month: u32 = month.parse().map_err(|_| bad())?;
    if !(1..=12).contains(&month) {
        return Err(bad());
    }
    Ok((year, month))
}
