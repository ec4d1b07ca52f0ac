use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::FrontDeskAuthSource;
use crate::engine::{Engine, ReserveRequest};
use crate::model::*;
use crate::observability;
use crate::property::PropertyManager;
use crate::sql::{self, BookingRow, Command};

pub struct FrontDeskHandler {
    properties: Arc<PropertyManager>,
    query_parser: Arc<FrontDeskQueryParser>,
}

impl FrontDeskHandler {
    pub fn new(properties: Arc<PropertyManager>) -> Self {
        Self {
            properties,
            query_parser: Arc::new(FrontDeskQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.properties.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("property error: {e}"),
            )))
        })
    }

    /// The connecting user is recorded as the actor on lifecycle events.
    fn resolve_actor<C: ClientInfo>(client: &C) -> String {
        client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_else(|| "frontdesk".to_string())
    }

    async fn run_command(
        &self,
        engine: &Engine,
        cmd: Command,
        actor: &str,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd, actor).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
        actor: &str,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertRoomType { room_type } => {
                engine.create_room_type(room_type).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRoomType { id } => {
                engine.delete_room_type(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertRoom { id, number, room_type_id } => {
                engine
                    .create_room(id, number, room_type_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SetRoomMaintenance { id, on } => {
                engine
                    .set_room_maintenance(id, on, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::InsertGuest { guest } => {
                engine.create_guest(guest).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateGuest { id, name, email, phone } => {
                let mut guest = engine
                    .get_guest(id)
                    .ok_or_else(|| engine_err(crate::engine::EngineError::NotFound(id)))?;
                if let Some(name) = name {
                    guest.name = name;
                }
                if let Some(email) = email {
                    guest.email = email;
                }
                if let Some(phone) = phone {
                    guest.phone = phone;
                }
                engine.update_guest(guest).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteGuest { id } => {
                engine.delete_guest(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking(row) => {
                engine
                    .reserve(reserve_request(row))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::BatchInsertBookings(rows) => {
                let count = rows.len();
                let requests: Vec<ReserveRequest> = rows.into_iter().map(reserve_request).collect();
                engine.reserve_many(requests).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::UpdateBookingStatus { id, status, expected_seq } => {
                engine
                    .transition_booking(id, status, actor, expected_seq)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectAvailability { room_type_id, start, end, exclude_booking } => {
                let rooms = engine
                    .find_available_rooms(room_type_id, start, end, exclude_booking)
                    .await
                    .map_err(engine_err)?;
                room_rows(rooms, availability_schema())
            }
            Command::SelectCalendar { room_id, start, end } => {
                let spans = engine
                    .room_calendar(room_id, start, end)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(calendar_schema());
                let rid_str = room_id.to_string();
                let rows: Vec<PgWireResult<_>> = spans
                    .into_iter()
                    .map(|span| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rid_str)?;
                        encoder.encode_field(&span.start)?;
                        encoder.encode_field(&span.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings(filter) => {
                let bookings = engine.list_bookings(&filter).await;

                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.reference)?;
                        encoder.encode_field(&b.guest_id.to_string())?;
                        encoder.encode_field(&b.guest_name)?;
                        encoder.encode_field(&b.guest_email)?;
                        encoder.encode_field(&b.guest_phone)?;
                        encoder.encode_field(&b.room_id.to_string())?;
                        encoder.encode_field(&b.room_number)?;
                        encoder.encode_field(&b.room_type_id.to_string())?;
                        encoder.encode_field(&b.room_type_name)?;
                        encoder.encode_field(&b.span.start)?;
                        encoder.encode_field(&b.span.end)?;
                        encoder.encode_field(&(b.nights as i32))?;
                        encoder.encode_field(&(b.adults as i32))?;
                        encoder.encode_field(&(b.children as i32))?;
                        encoder.encode_field(&b.total_amount)?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.payment_status.as_str())?;
                        encoder.encode_field(&(b.seq as i64))?;
                        encoder.encode_field(&b.source)?;
                        encoder.encode_field(&b.notes)?;
                        encoder.encode_field(&b.archived)?;
                        encoder.encode_field(&b.created_at)?;
                        encoder.encode_field(&b.updated_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectRooms => {
                let rooms = engine.list_rooms().await;
                room_rows(rooms, rooms_schema())
            }
            Command::SelectRoomTypes => {
                let types = engine.list_room_types();

                let schema = Arc::new(room_types_schema());
                let rows: Vec<PgWireResult<_>> = types
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&t.id.to_string())?;
                        encoder.encode_field(&t.name)?;
                        encoder.encode_field(&t.base_rate)?;
                        encoder.encode_field(&(t.max_adults as i32))?;
                        encoder.encode_field(&(t.max_children as i32))?;
                        encoder.encode_field(&t.bed_type)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectGuests => {
                let guests = engine.list_guests();

                let schema = Arc::new(guests_schema());
                let rows: Vec<PgWireResult<_>> = guests
                    .into_iter()
                    .map(|g| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&g.id.to_string())?;
                        encoder.encode_field(&g.name)?;
                        encoder.encode_field(&g.email)?;
                        encoder.encode_field(&g.phone)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                validate_channel(&channel)?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

/// Channels are `bookings` (everything on the property) or `room_{ulid}`.
fn validate_channel(channel: &str) -> PgWireResult<()> {
    if channel == "bookings" {
        return Ok(());
    }
    let room_id_str = channel.strip_prefix("room_").ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected bookings or room_{{id}})"),
        )))
    })?;
    Ulid::from_string(room_id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })?;
    Ok(())
}

fn reserve_request(row: BookingRow) -> ReserveRequest {
    ReserveRequest {
        id: row.id,
        guest_id: row.guest_id,
        room_id: row.room_id,
        start: row.start,
        end: row.end,
        adults: row.adults,
        children: row.children,
        status: row.status,
        source: row.source,
        notes: row.notes,
    }
}

fn room_rows(rooms: Vec<RoomInfo>, schema: Vec<FieldInfo>) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = rooms
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.number)?;
            encoder.encode_field(&r.room_type_id.to_string())?;
            encoder.encode_field(&r.status.as_str())?;
            Ok(encoder.take_row())
        })
        .collect();

    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn int4_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT4, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("number"),
        text_field("room_type_id"),
        text_field("status"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    // Same shape as a rooms listing, filtered to the free ones
    rooms_schema()
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id"),
        int8_field("start"),
        int8_field("end"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("reference"),
        text_field("guest_id"),
        text_field("guest_name"),
        text_field("guest_email"),
        text_field("guest_phone"),
        text_field("room_id"),
        text_field("room_number"),
        text_field("room_type_id"),
        text_field("room_type_name"),
        int8_field("start"),
        int8_field("end"),
        int4_field("nights"),
        int4_field("adults"),
        int4_field("children"),
        int8_field("total_amount"),
        text_field("status"),
        text_field("payment_status"),
        int8_field("seq"),
        text_field("source"),
        text_field("notes"),
        FieldInfo::new("archived".into(), None, None, Type::BOOL, FieldFormat::Text),
        int8_field("created_at"),
        int8_field("updated_at"),
    ]
}

fn room_types_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        int8_field("base_rate"),
        int4_field("max_adults"),
        int4_field("max_children"),
        text_field("bed_type"),
    ]
}

fn guests_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("email"),
        text_field("phone"),
    ]
}

/// Result schema for a SQL string, used by both describe paths.
fn result_schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("CALENDAR") {
        calendar_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("ROOM_TYPES") {
        room_types_schema()
    } else if upper.contains("ROOMS") {
        rooms_schema()
    } else if upper.contains("GUESTS") {
        guests_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for FrontDeskHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = Self::resolve_actor(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, cmd, &actor).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct FrontDeskQueryParser;

#[async_trait]
impl QueryParser for FrontDeskQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for FrontDeskHandler {
    type Statement = String;
    type QueryParser = FrontDeskQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = Self::resolve_actor(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_command(&engine, cmd, &actor).await?;
        Ok(responses.remove(0))
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema_for(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct FrontDeskFactory {
    handler: Arc<FrontDeskHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<FrontDeskAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl FrontDeskFactory {
    pub fn new(properties: Arc<PropertyManager>, password: String) -> Self {
        let auth_source = FrontDeskAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(FrontDeskHandler::new(properties)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for FrontDeskFactory {
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

/// Serve one client connection end to end.
pub async fn process_connection(
    socket: TcpStream,
    properties: Arc<PropertyManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = FrontDeskFactory::new(properties, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
