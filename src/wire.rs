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
use tracing::debug;
use ulid::Ulid;

use crate::auth::RentwiseAuthSource;
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability::{self, command_label};
use crate::sql::{self, Command, PropertyFilter, RentalFilter};

pub struct RentwiseHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RentwiseQueryParser>,
}

impl RentwiseHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RentwiseQueryParser),
        }
    }

    /// Parse, run and meter one statement on behalf of the session user.
    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let actor = session_user(client);

        let start = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().label(),
        };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        if let Err(e) = &result {
            if e.kind() == ErrorKind::Unauthenticated {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            }
            debug!("{label} rejected: {e}");
        }
        result.map_err(engine_err)
    }

    async fn execute_command(
        &self,
        actor: Result<Ulid, EngineError>,
        cmd: Command,
    ) -> Result<Vec<Response>, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUser { name } => {
                let user = engine.register_user(name).await?;
                Ok(vec![id_response(user.id)])
            }
            Command::InsertProperty {
                daily_rate,
                address,
            } => {
                let property = engine.list_property(actor?, daily_rate, address).await?;
                Ok(vec![id_response(property.id)])
            }
            Command::InsertRental {
                property_id,
                start,
                end,
            } => {
                let receipt = engine
                    .create_rental(actor?, property_id, start, end)
                    .await?;
                Ok(vec![receipt_response(receipt.rental_id, receipt.tenant_id)])
            }
            Command::UpdateRental {
                id,
                state,
                cancel_date,
            } => {
                let actor = actor?;
                match state {
                    RentalState::Confirmed => {
                        engine.confirm_rental(actor, id).await?;
                    }
                    RentalState::Denied => {
                        engine.deny_rental(actor, id).await?;
                    }
                    RentalState::Cancelled => {
                        if engine.owner_of_rental(&id).await == Some(actor) {
                            engine.owner_cancel_rental(actor, id, cancel_date).await?;
                        } else {
                            engine.tenant_cancel_rental(actor, id).await?;
                        }
                    }
                    RentalState::Expired => {
                        engine.expire_rental(actor, id).await?;
                    }
                    RentalState::Pending | RentalState::Restrained => {
                        return Err(EngineError::Validation(format!(
                            "rentals cannot be moved to {state} directly"
                        )));
                    }
                }
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteRental { id } => {
                engine.delete_rental(actor?, id).await?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectRentals { filter } => {
                let rentals = match filter {
                    RentalFilter::All => engine.all_rentals().await,
                    RentalFilter::Id(id) => engine.get_rental(&id).await.into_iter().collect(),
                    RentalFilter::Property(pid) => engine.rentals_for_property(pid).await?,
                    RentalFilter::Tenant(tid) => engine.rentals_for_tenant(tid).await,
                };
                let schema = Arc::new(rental_schema());
                let rows: Vec<PgWireResult<_>> = rentals
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.property_id.to_string())?;
                        encoder.encode_field(&r.tenant_id.to_string())?;
                        encoder.encode_field(&r.stay.start.to_string())?;
                        encoder.encode_field(&r.stay.end.to_string())?;
                        encoder.encode_field(&r.value.cents())?;
                        encoder.encode_field(&r.state.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectProperties { filter } => {
                let properties = match filter {
                    PropertyFilter::All => engine.list_properties().await,
                    PropertyFilter::City(city) => engine.properties_in_city(&city).await?,
                    PropertyFilter::DailyRate { min, max } => {
                        engine.properties_in_price_range(min, max).await?
                    }
                    PropertyFilter::Available { start, end } => {
                        engine.available_properties(start, end).await?
                    }
                };
                let schema = Arc::new(property_schema());
                let rows: Vec<PgWireResult<_>> = properties
                    .iter()
                    .map(|p| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&p.id.to_string())?;
                        encoder.encode_field(&p.owner_id.to_string())?;
                        encoder.encode_field(&p.daily_rate.cents())?;
                        for (_, value) in p.address.fields() {
                            encoder.encode_field(&value)?;
                        }
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectUsers => {
                let mut users = engine.list_users();
                users.sort_by_key(|u| u.id);
                let schema = Arc::new(user_schema());
                let rows: Vec<PgWireResult<_>> = users
                    .iter()
                    .map(|u| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&u.id.to_string())?;
                        encoder.encode_field(&u.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

/// The session user name is the acting user's id.
fn session_user<C: ClientInfo>(client: &C) -> Result<Ulid, EngineError> {
    let name = client.metadata().get("user").cloned().unwrap_or_default();
    Ulid::from_string(&name)
        .map_err(|_| EngineError::Validation(format!("session user {name:?} is not a user id")))
}

fn id_response(id: Ulid) -> Response {
    let schema = Arc::new(id_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    let row = encoder
        .encode_field(&id.to_string())
        .map(|_| encoder.take_row());
    Response::Query(QueryResponse::new(schema, stream::iter(vec![row])))
}

fn receipt_response(rental_id: Ulid, tenant_id: Ulid) -> Response {
    let schema = Arc::new(receipt_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    let row = encoder
        .encode_field(&rental_id.to_string())
        .and_then(|_| encoder.encode_field(&tenant_id.to_string()))
        .map(|_| encoder.take_row());
    Response::Query(QueryResponse::new(schema, stream::iter(vec![row])))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn id_schema() -> Vec<FieldInfo> {
    vec![text_field("id")]
}

fn receipt_schema() -> Vec<FieldInfo> {
    vec![text_field("rental_id"), text_field("tenant_id")]
}

fn rental_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("property_id"),
        text_field("tenant_id"),
        text_field("start_date"),
        text_field("end_date"),
        int_field("value_cents"),
        text_field("state"),
    ]
}

fn property_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("owner_id"),
        int_field("daily_rate_cents"),
        text_field("number"),
        text_field("street"),
        text_field("city"),
        text_field("state"),
        text_field("postal_code"),
    ]
}

fn user_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("name")]
}

/// Row shape of a statement, judged from its verb and target table so it
/// works before parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let words: Vec<&str> = upper.split_whitespace().collect();
    let verb = words.first().copied().unwrap_or_default();
    let table = words
        .iter()
        .position(|w| *w == "FROM" || *w == "INTO")
        .and_then(|i| words.get(i + 1))
        .map(|t| t.split(['(', ';']).next().unwrap_or_default())
        .unwrap_or_default();

    match (verb, table) {
        ("SELECT", "RENTALS") => rental_schema(),
        ("SELECT", "PROPERTIES") => property_schema(),
        ("SELECT", "USERS") => user_schema(),
        ("INSERT", "USERS") | ("INSERT", "PROPERTIES") => id_schema(),
        ("INSERT", "RENTALS") => receipt_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for RentwiseHandler {
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
        self.run(&*client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RentwiseQueryParser;

#[async_trait]
impl QueryParser for RentwiseQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RentwiseHandler {
    type Statement = String;
    type QueryParser = RentwiseQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self.run(&*client, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
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
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass: bound values are copied out and never rescanned,
/// and `$N` inside a quoted literal is left alone.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;

    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            continue;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }
        let digits_start = i + 1;
        let mut digits_end = digits_start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits_end = j + 1;
            chars.next();
        }
        let bound = sql[digits_start..digits_end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        match bound {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&sql[i..digits_end]),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RentwiseFactory {
    handler: Arc<RentwiseHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RentwiseAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RentwiseFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = RentwiseAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RentwiseHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RentwiseFactory {
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
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = RentwiseFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE for each engine error kind.
fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "02000",
        ErrorKind::Unauthenticated => "28000",
        ErrorKind::Forbidden => "42501",
        ErrorKind::Validation => "22023",
        ErrorKind::StateConflict => "40001",
        ErrorKind::LimitExceeded => "54000",
        ErrorKind::Storage => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(e.kind()).into(),
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
