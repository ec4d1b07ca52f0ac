use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// One row of an `INSERT INTO bookings` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRow {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub room_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub adults: u32,
    pub children: u32,
    pub status: BookingStatus,
    pub source: Option<String>,
    pub notes: Option<String>,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoomType {
        room_type: RoomType,
    },
    DeleteRoomType {
        id: Ulid,
    },
    InsertRoom {
        id: Ulid,
        number: String,
        room_type_id: Ulid,
    },
    DeleteRoom {
        id: Ulid,
    },
    /// `UPDATE rooms SET status = 'Maintenance' | 'Available'`.
    SetRoomMaintenance {
        id: Ulid,
        on: bool,
    },
    InsertGuest {
        guest: Guest,
    },
    /// Partial update: outer `None` means the column was not assigned,
    /// inner `None` means it was explicitly set to NULL.
    UpdateGuest {
        id: Ulid,
        name: Option<String>,
        email: Option<Option<String>>,
        phone: Option<Option<String>>,
    },
    DeleteGuest {
        id: Ulid,
    },
    InsertBooking(BookingRow),
    BatchInsertBookings(Vec<BookingRow>),
    /// `UPDATE bookings SET status = '...' WHERE id = '...' [AND seq = N]`.
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
        expected_seq: Option<u64>,
    },
    SelectAvailability {
        room_type_id: Ulid,
        start: Ms,
        end: Ms,
        exclude_booking: Option<Ulid>,
    },
    SelectCalendar {
        room_id: Ulid,
        start: Ms,
        end: Ms,
    },
    SelectBookings(BookingFilter),
    SelectRooms,
    SelectRoomTypes,
    SelectGuests,
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "room_types" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("room_types", 3, values.len()));
            }
            Ok(Command::InsertRoomType {
                room_type: RoomType {
                    id: parse_ulid(&values[0])?,
                    name: parse_string(&values[1])?,
                    base_rate: parse_i64(&values[2])?,
                    max_adults: if values.len() >= 4 { parse_u32(&values[3])? } else { 2 },
                    max_children: if values.len() >= 5 { parse_u32(&values[4])? } else { 0 },
                    bed_type: if values.len() >= 6 {
                        parse_string_or_null(&values[5])?
                    } else {
                        None
                    },
                },
            })
        }
        "rooms" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("rooms", 3, values.len()));
            }
            Ok(Command::InsertRoom {
                id: parse_ulid(&values[0])?,
                number: parse_string(&values[1])?,
                room_type_id: parse_ulid(&values[2])?,
            })
        }
        "guests" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("guests", 2, values.len()));
            }
            Ok(Command::InsertGuest {
                guest: Guest {
                    id: parse_ulid(&values[0])?,
                    name: parse_string(&values[1])?,
                    email: if values.len() >= 3 {
                        parse_string_or_null(&values[2])?
                    } else {
                        None
                    },
                    phone: if values.len() >= 4 {
                        parse_string_or_null(&values[3])?
                    } else {
                        None
                    },
                },
            })
        }
        "bookings" => {
            let all_rows = extract_all_insert_rows(insert)?;
            let mut rows = Vec::with_capacity(all_rows.len());
            for (i, row) in all_rows.iter().enumerate() {
                rows.push(
                    parse_booking_row(row)
                        .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                );
            }
            if rows.len() == 1 {
                Ok(Command::InsertBooking(rows.pop().expect("one row")))
            } else {
                Ok(Command::BatchInsertBookings(rows))
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Positional booking columns:
/// `(id, guest_id, room_id, start, "end" [, adults, children, status, source, notes])`
fn parse_booking_row(values: &[Expr]) -> Result<BookingRow, SqlError> {
    if values.len() < 5 {
        return Err(SqlError::WrongArity("bookings", 5, values.len()));
    }
    let status = if values.len() >= 8 {
        parse_booking_status(&values[7])?
    } else {
        BookingStatus::Pending
    };
    Ok(BookingRow {
        id: parse_ulid(&values[0])?,
        guest_id: parse_ulid(&values[1])?,
        room_id: parse_ulid(&values[2])?,
        start: parse_i64(&values[3])?,
        end: parse_i64(&values[4])?,
        adults: if values.len() >= 6 { parse_u32(&values[5])? } else { 1 },
        children: if values.len() >= 7 { parse_u32(&values[6])? } else { 0 },
        status,
        source: if values.len() >= 9 { parse_string_or_null(&values[8])? } else { None },
        notes: if values.len() >= 10 { parse_string_or_null(&values[9])? } else { None },
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    match table.as_str() {
        "bookings" => {
            let status = assignment_value(assignments, "status")
                .ok_or(SqlError::MissingFilter("status"))?;
            let status = parse_booking_status(status)?;
            let filters = collect_eq_filters(selection)?;
            let id = filters
                .iter()
                .find(|(c, _)| c == "id")
                .ok_or(SqlError::MissingFilter("id"))?;
            let id = parse_ulid_expr(id.1)?;
            let expected_seq = match filters.iter().find(|(c, _)| c == "seq") {
                Some((_, e)) => Some(parse_u64_expr(e)?),
                None => None,
            };
            Ok(Command::UpdateBookingStatus { id, status, expected_seq })
        }
        "rooms" => {
            let status = assignment_value(assignments, "status")
                .ok_or(SqlError::MissingFilter("status"))?;
            let on = match parse_string(status)?.as_str() {
                "Maintenance" => true,
                "Available" => false,
                other => {
                    return Err(SqlError::Unsupported(format!(
                        "room status '{other}' is derived, not settable"
                    )))
                }
            };
            let id = extract_where_id(selection)?;
            Ok(Command::SetRoomMaintenance { id, on })
        }
        "guests" => {
            let id = extract_where_id(selection)?;
            let name = match assignment_value(assignments, "name") {
                Some(e) => Some(parse_string(e)?),
                None => None,
            };
            let email = match assignment_value(assignments, "email") {
                Some(e) => Some(parse_string_or_null(e)?),
                None => None,
            };
            let phone = match assignment_value(assignments, "phone") {
                Some(e) => Some(parse_string_or_null(e)?),
                None => None,
            };
            if name.is_none() && email.is_none() && phone.is_none() {
                return Err(SqlError::Unsupported("no updatable guest column".into()));
            }
            Ok(Command::UpdateGuest { id, name, email, phone })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table == "bookings" {
        // Bookings are cancelled (UPDATE status), never hard-deleted.
        return Err(SqlError::Unsupported("DELETE FROM bookings".into()));
    }
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "room_types" => Ok(Command::DeleteRoomType { id }),
        "guests" => Ok(Command::DeleteGuest { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "availability" => {
            let (mut room_type_id, mut start, mut end, mut exclude) = (None, None, None, None);
            if let Some(selection) = &select.selection {
                extract_window_filters(selection, &mut start, &mut end, &mut |col, e| {
                    match col {
                        "room_type_id" => room_type_id = Some(parse_ulid_expr(e)?),
                        "exclude_booking" => exclude = Some(parse_ulid_expr(e)?),
                        _ => {}
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectAvailability {
                room_type_id: room_type_id.ok_or(SqlError::MissingFilter("room_type_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
                exclude_booking: exclude,
            })
        }
        "calendar" => {
            let (mut room_id, mut start, mut end) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_window_filters(selection, &mut start, &mut end, &mut |col, e| {
                    if col == "room_id" {
                        room_id = Some(parse_ulid_expr(e)?);
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectCalendar {
                room_id: room_id.ok_or(SqlError::MissingFilter("room_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
            })
        }
        "bookings" => {
            let mut filter = BookingFilter::default();
            for (col, expr) in collect_eq_filters(&select.selection)? {
                match col.as_str() {
                    "id" => filter.id = Some(parse_ulid_expr(expr)?),
                    "room_id" => filter.room_id = Some(parse_ulid_expr(expr)?),
                    "guest_id" => filter.guest_id = Some(parse_ulid_expr(expr)?),
                    "archived" => filter.include_archived = parse_bool_expr(expr)?,
                    other => {
                        return Err(SqlError::Unsupported(format!("booking filter: {other}")))
                    }
                }
            }
            Ok(Command::SelectBookings(filter))
        }
        "rooms" => Ok(Command::SelectRooms),
        "room_types" => Ok(Command::SelectRoomTypes),
        "guests" => Ok(Command::SelectGuests),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Walk a WHERE clause of ANDed comparisons: `start >= n` and `"end" <= n`
/// feed the window, every `col = value` goes to `on_eq`.
fn extract_window_filters(
    expr: &Expr,
    start: &mut Option<Ms>,
    end: &mut Option<Ms>,
    on_eq: &mut impl FnMut(&str, &Expr) -> Result<(), SqlError>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_window_filters(left, start, end, on_eq)?;
                extract_window_filters(right, start, end, on_eq)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    on_eq(&col, right)?;
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start = Some(parse_i64_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    *end = Some(parse_i64_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Flatten `a = x AND b = y AND ...` into (column, value-expr) pairs.
fn collect_eq_filters(selection: &Option<Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    fn walk<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
        match expr {
            Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
                walk(left, out)?;
                walk(right, out)
            }
            Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
                if let Some(col) = expr_column_name(left) {
                    out.push((col, right));
                }
                Ok(())
            }
            _ => Err(SqlError::Unsupported("non-equality WHERE clause".into())),
        }
    }
    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk(expr, &mut out)?;
    }
    Ok(out)
}

fn assignment_value<'a>(assignments: &'a [ast::Assignment], column: &str) -> Option<&'a Expr> {
    assignments.iter().find_map(|a| match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            if object_name_last(name).as_deref() == Some(column) {
                Some(&a.value)
            } else {
                None
            }
        }
        _ => None,
    })
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let mut rows = extract_all_insert_rows(insert)?;
    Ok(rows.swap_remove(0))
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let filters = collect_eq_filters(selection)?;
    let (_, expr) = filters
        .iter()
        .find(|(c, _)| c == "id")
        .ok_or(SqlError::MissingFilter("id"))?;
    parse_ulid_expr(expr)
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u64_expr(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64_expr(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u64 range")))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        parse_string(expr).map(Some)
    }
}

fn parse_booking_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string(expr)?;
    BookingStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown status: {s}")))
}

fn parse_bool_expr(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
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
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const U: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_room_type() {
        let sql = format!(
            "INSERT INTO room_types (id, name, base_rate, max_adults, max_children, bed_type) \
             VALUES ('{U}', 'Deluxe', 25000, 3, 2, 'King')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertRoomType { room_type } => {
                assert_eq!(room_type.name, "Deluxe");
                assert_eq!(room_type.base_rate, 25000);
                assert_eq!(room_type.max_adults, 3);
                assert_eq!(room_type.bed_type.as_deref(), Some("King"));
            }
            _ => panic!("expected InsertRoomType, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room_type_defaults() {
        let sql = format!("INSERT INTO room_types (id, name, base_rate) VALUES ('{U}', 'Standard', 10000)");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertRoomType { room_type } => {
                assert_eq!(room_type.max_adults, 2);
                assert_eq!(room_type.max_children, 0);
                assert_eq!(room_type.bed_type, None);
            }
            _ => panic!("expected InsertRoomType, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room() {
        let sql = format!("INSERT INTO rooms (id, number, room_type_id) VALUES ('{U}', '204', '{U}')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertRoom { number, .. } => assert_eq!(number, "204"),
            _ => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_guest_with_null_email() {
        let sql = format!("INSERT INTO guests (id, name, email, phone) VALUES ('{U}', 'Ada Lovelace', NULL, '+44 1234')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertGuest { guest } => {
                assert_eq!(guest.name, "Ada Lovelace");
                assert_eq!(guest.email, None);
                assert_eq!(guest.phone.as_deref(), Some("+44 1234"));
            }
            _ => panic!("expected InsertGuest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_minimal() {
        let sql = format!(
            r#"INSERT INTO bookings (id, guest_id, room_id, start, "end") VALUES ('{U}', '{U}', '{U}', 1000, 2000)"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking(row) => {
                assert_eq!(row.start, 1000);
                assert_eq!(row.end, 2000);
                assert_eq!(row.adults, 1);
                assert_eq!(row.status, BookingStatus::Pending);
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_full() {
        let sql = format!(
            r#"INSERT INTO bookings (id, guest_id, room_id, start, "end", adults, children, status, source, notes) VALUES ('{U}', '{U}', '{U}', 1000, 2000, 2, 1, 'Confirmed', 'web', 'late arrival')"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking(row) => {
                assert_eq!(row.adults, 2);
                assert_eq!(row.children, 1);
                assert_eq!(row.status, BookingStatus::Confirmed);
                assert_eq!(row.source.as_deref(), Some("web"));
                assert_eq!(row.notes.as_deref(), Some("late arrival"));
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_batch_insert_bookings() {
        let sql = format!(
            r#"INSERT INTO bookings (id, guest_id, room_id, start, "end") VALUES ('{U}', '{U}', '{U}', 1000, 2000), ('{U}', '{U}', '{U}', 3000, 4000)"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::BatchInsertBookings(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].start, 1000);
                assert_eq!(rows[1].start, 3000);
            }
            _ => panic!("expected BatchInsertBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_status() {
        let sql = format!("UPDATE bookings SET status = 'Confirmed' WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateBookingStatus { status, expected_seq, .. } => {
                assert_eq!(status, BookingStatus::Confirmed);
                assert_eq!(expected_seq, None);
            }
            _ => panic!("expected UpdateBookingStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_status_with_cas() {
        let sql = format!("UPDATE bookings SET status = 'Cancelled' WHERE id = '{U}' AND seq = 2");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateBookingStatus { status, expected_seq, .. } => {
                assert_eq!(status, BookingStatus::Cancelled);
                assert_eq!(expected_seq, Some(2));
            }
            _ => panic!("expected UpdateBookingStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_unknown_status_errors() {
        let sql = format!("UPDATE bookings SET status = 'checked_out' WHERE id = '{U}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_update_room_maintenance() {
        let sql = format!("UPDATE rooms SET status = 'Maintenance' WHERE id = '{U}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SetRoomMaintenance { on: true, .. }
        ));

        let sql = format!("UPDATE rooms SET status = 'Available' WHERE id = '{U}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SetRoomMaintenance { on: false, .. }
        ));

        // Occupied is derived from check-ins, not settable.
        let sql = format!("UPDATE rooms SET status = 'Occupied' WHERE id = '{U}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_update_guest_partial() {
        let sql = format!("UPDATE guests SET email = NULL, name = 'Ada King' WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateGuest { name, email, phone, .. } => {
                assert_eq!(name.as_deref(), Some("Ada King"));
                assert_eq!(email, Some(None));
                assert_eq!(phone, None);
            }
            _ => panic!("expected UpdateGuest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_room() {
        let sql = format!("DELETE FROM rooms WHERE id = '{U}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteRoom { .. }));
    }

    #[test]
    fn parse_delete_bookings_unsupported() {
        let sql = format!("DELETE FROM bookings WHERE id = '{U}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE room_type_id = '{U}' AND start >= 1000 AND \"end\" <= 2000"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability { room_type_id, start, end, exclude_booking } => {
                assert_eq!(room_type_id.to_string(), U);
                assert_eq!(start, 1000);
                assert_eq!(end, 2000);
                assert_eq!(exclude_booking, None);
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_with_exclusion() {
        let sql = format!(
            "SELECT * FROM availability WHERE room_type_id = '{U}' AND start >= 1000 AND \"end\" <= 2000 AND exclude_booking = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability { exclude_booking, .. } => {
                assert_eq!(exclude_booking.map(|u| u.to_string()), Some(U.to_string()));
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_filter_errors() {
        let sql = format!("SELECT * FROM availability WHERE room_type_id = '{U}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter(_))));
    }

    #[test]
    fn parse_select_calendar() {
        let sql = format!(
            "SELECT * FROM calendar WHERE room_id = '{U}' AND start >= 0 AND \"end\" <= 5000"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectCalendar { start, end, .. } => {
                assert_eq!(start, 0);
                assert_eq!(end, 5000);
            }
            _ => panic!("expected SelectCalendar, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_bookings_filters() {
        let cmd = parse_sql("SELECT * FROM bookings").unwrap();
        assert_eq!(cmd, Command::SelectBookings(BookingFilter::default()));

        let sql = format!("SELECT * FROM bookings WHERE guest_id = '{U}' AND archived = true");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectBookings(f) => {
                assert!(f.include_archived);
                assert!(f.guest_id.is_some());
                assert!(f.room_id.is_none());
            }
            _ => panic!("expected SelectBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_rooms_and_listen() {
        assert!(matches!(parse_sql("SELECT * FROM rooms"), Ok(Command::SelectRooms)));
        assert!(matches!(parse_sql("SELECT * FROM room_types"), Ok(Command::SelectRoomTypes)));
        assert!(matches!(parse_sql("SELECT * FROM guests"), Ok(Command::SelectGuests)));

        let cmd = parse_sql(&format!("LISTEN room_{U}")).unwrap();
        match cmd {
            Command::Listen { channel } => assert_eq!(channel, format!("room_{U}")),
            _ => panic!("expected Listen, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{U}')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
