use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        name: String,
    },
    InsertProperty {
        daily_rate: Money,
        address: Address,
    },
    InsertRental {
        property_id: Ulid,
        start: Day,
        end: Day,
    },
    /// `UPDATE rentals SET state = ...`. Which workflow runs depends on the
    /// target state and, for cancellation, on who is asking.
    UpdateRental {
        id: Ulid,
        state: RentalState,
        cancel_date: Option<Day>,
    },
    DeleteRental {
        id: Ulid,
    },
    SelectRentals {
        filter: RentalFilter,
    },
    SelectProperties {
        filter: PropertyFilter,
    },
    SelectUsers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RentalFilter {
    All,
    Id(Ulid),
    Property(Ulid),
    Tenant(Ulid),
}

/// `SELECT * FROM properties WHERE ...` searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyFilter {
    All,
    /// `city = '...'`
    City(String),
    /// `daily_rate BETWEEN min AND max`, both inclusive.
    DailyRate { min: Money, max: Money },
    /// `available BETWEEN 'start' AND 'end'`: no confirmed booking in the period.
    Available { start: Day, end: Day },
}

const PROPERTY_COLUMNS: [&str; 6] = ["daily_rate", "number", "street", "city", "state", "postal_code"];
const RENTAL_COLUMNS: [&str; 3] = ["property_id", "start_date", "end_date"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "users" => {
            let row = order_row("users", &columns, values, &["name"])?;
            Ok(Command::InsertUser {
                name: parse_string(&row[0])?,
            })
        }
        "properties" => {
            let row = order_row("properties", &columns, values, &PROPERTY_COLUMNS)?;
            Ok(Command::InsertProperty {
                daily_rate: parse_money(&row[0])?,
                address: Address {
                    number: parse_string(&row[1])?,
                    street: parse_string(&row[2])?,
                    city: parse_string(&row[3])?,
                    state: parse_string(&row[4])?,
                    postal_code: parse_string(&row[5])?,
                },
            })
        }
        "rentals" => {
            let row = order_row("rentals", &columns, values, &RENTAL_COLUMNS)?;
            Ok(Command::InsertRental {
                property_id: parse_ulid(&row[0])?,
                start: parse_day(&row[1])?,
                end: parse_day(&row[2])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Arrange VALUES in `expected` column order. Without a column list the
/// values are taken positionally.
fn order_row(
    table: &'static str,
    columns: &[String],
    values: Vec<Expr>,
    expected: &[&'static str],
) -> Result<Vec<Expr>, SqlError> {
    if values.len() != expected.len() {
        return Err(SqlError::WrongArity(table, expected.len(), values.len()));
    }
    if columns.is_empty() {
        return Ok(values);
    }
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity(table, columns.len(), values.len()));
    }
    expected
        .iter()
        .map(|want| {
            columns
                .iter()
                .position(|c| c == want)
                .map(|i| values[i].clone())
                .ok_or(SqlError::MissingColumn(*want))
        })
        .collect()
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "rentals" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let mut state = None;
    let mut cancel_date = None;
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        };
        match column.as_deref() {
            Some("state") => {
                let raw = parse_string(&assignment.value)?;
                state = Some(raw.parse::<RentalState>().map_err(SqlError::Parse)?);
            }
            Some("cancel_date") => cancel_date = parse_day_or_null(&assignment.value)?,
            Some(other) => return Err(SqlError::Unsupported(format!("SET {other}"))),
            None => return Err(SqlError::Unsupported("SET target".into())),
        }
    }

    let state = state.ok_or(SqlError::MissingColumn("state"))?;
    match state {
        RentalState::Confirmed
        | RentalState::Denied
        | RentalState::Cancelled
        | RentalState::Expired => {}
        RentalState::Pending | RentalState::Restrained => {
            return Err(SqlError::Unsupported(format!("SET state = '{state}'")));
        }
    }
    if cancel_date.is_some() && state != RentalState::Cancelled {
        return Err(SqlError::Unsupported(
            "cancel_date only applies to CANCELLED".into(),
        ));
    }
    Ok(Command::UpdateRental {
        id,
        state,
        cancel_date,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rentals" => Ok(Command::DeleteRental { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    match table.as_str() {
        "rentals" => {
            let filter = match &select.selection {
                None => RentalFilter::All,
                Some(selection) => parse_rental_filter(selection)?,
            };
            Ok(Command::SelectRentals { filter })
        }
        "properties" => {
            let filter = match &select.selection {
                None => PropertyFilter::All,
                Some(selection) => parse_property_filter(selection)?,
            };
            Ok(Command::SelectProperties { filter })
        }
        "users" => Ok(Command::SelectUsers),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_rental_filter(expr: &Expr) -> Result<RentalFilter, SqlError> {
    let Expr::BinaryOp {
        left,
        op: ast::BinaryOperator::Eq,
        right,
    } = expr
    else {
        return Err(SqlError::Unsupported(format!("WHERE {expr}")));
    };
    match expr_column_name(left).as_deref() {
        Some("id") => Ok(RentalFilter::Id(parse_ulid(right)?)),
        Some("property_id") => Ok(RentalFilter::Property(parse_ulid(right)?)),
        Some("tenant_id") => Ok(RentalFilter::Tenant(parse_ulid(right)?)),
        _ => Err(SqlError::Unsupported(format!("WHERE {expr}"))),
    }
}

fn parse_property_filter(expr: &Expr) -> Result<PropertyFilter, SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("city") => {
            Ok(PropertyFilter::City(parse_string(right)?))
        }
        Expr::Between {
            expr: column,
            negated: false,
            low,
            high,
        } => match expr_column_name(column).as_deref() {
            Some("daily_rate") => Ok(PropertyFilter::DailyRate {
                min: parse_money(low)?,
                max: parse_money(high)?,
            }),
            Some("available") => Ok(PropertyFilter::Available {
                start: parse_day(low)?,
                end: parse_day(high)?,
            }),
            _ => Err(SqlError::Unsupported(format!("WHERE {expr}"))),
        },
        _ => Err(SqlError::Unsupported(format!("WHERE {expr}"))),
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
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
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
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// The single VALUES row of an INSERT.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_day(expr: &Expr) -> Result<Day, SqlError> {
    let raw = parse_string(expr)?;
    raw.parse::<Day>()
        .map_err(|e| SqlError::Parse(format!("bad date {raw:?}: {e}")))
}

fn parse_day_or_null(expr: &Expr) -> Result<Option<Day>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_day(expr)?)),
    }
}

fn parse_money(expr: &Expr) -> Result<Money, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            s.parse().map_err(SqlError::Parse)
        }
        Some(value) => Err(SqlError::Parse(format!("expected amount, got {value:?}"))),
        None => match expr {
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => parse_money(expr).map(|m| Money(-m.cents())),
            _ => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
        },
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
