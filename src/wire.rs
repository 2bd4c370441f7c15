use std::fmt::Debug;
use std::io;
use std::path::PathBuf;
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

use crate::audit::AuditEntry;
pub use crate::auth::SharedPassword;
use crate::engine::{Engine, EngineError, ErrorClass};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, Filter, Mutation, SqlError};
use crate::transfer::{self, TransferError};

// ── Result sets ─────────────────────────────────────────────────

/// One output value. The variant matches the column type in the schema.
enum Cell {
    Text(Option<String>),
    Int(Option<i64>),
    Bool(Option<bool>),
}

fn text(v: impl ToString) -> Cell {
    Cell::Text(Some(v.to_string()))
}

fn opt_text<T: ToString>(v: &Option<T>) -> Cell {
    Cell::Text(v.as_ref().map(ToString::to_string))
}

fn int(v: impl Into<i64>) -> Cell {
    Cell::Int(Some(v.into()))
}

fn opt_int<T: Copy + Into<i64>>(v: Option<T>) -> Cell {
    Cell::Int(v.map(Into::into))
}

fn flag(v: bool) -> Cell {
    Cell::Bool(Some(v))
}

const V: Type = Type::VARCHAR;
const I: Type = Type::INT8;
const B: Type = Type::BOOL;

const LOCATION_COLUMNS: &[(&str, Type)] = &[("id", V), ("name", V), ("door_number", V), ("description", V)];

const RACK_COLUMNS: &[(&str, Type)] = &[
    ("id", V),
    ("name", V),
    ("location_id", V),
    ("description", V),
    ("total_units", I),
    ("orientation", V),
];

const PC_COLUMNS: &[(&str, Type)] = &[
    ("id", V),
    ("name", V),
    ("ip_address", V),
    ("username", V),
    ("in_domain", B),
    ("operating_system", V),
    ("model", V),
    ("office", V),
    ("description", V),
    ("multi_port", B),
    ("type", V),
    ("usage", V),
    ("rack_id", V),
    ("start_unit", I),
    ("units_occupied", I),
];

const PATCH_PANEL_COLUMNS: &[(&str, Type)] = &[
    ("id", V),
    ("name", V),
    ("location_id", V),
    ("rack_id", V),
    ("start_unit", I),
    ("units_occupied", I),
    ("total_ports", I),
    ("description", V),
];

const SWITCH_COLUMNS: &[(&str, Type)] = &[
    ("id", V),
    ("name", V),
    ("ip_address", V),
    ("location_id", V),
    ("rack_id", V),
    ("start_unit", I),
    ("units_occupied", I),
    ("total_ports", I),
    ("source_port", V),
    ("model", V),
    ("description", V),
    ("usage", V),
];

const CONNECTION_COLUMNS: &[(&str, Type)] = &[
    ("id", V),
    ("pc_id", V),
    ("switch_id", V),
    ("switch_port", V),
    ("is_switch_port_up", B),
    ("cable_color", V),
    ("cable_label", V),
    ("hops", V),
];

const HOP_COLUMNS: &[(&str, Type)] = &[
    ("connection_id", V),
    ("sequence", I),
    ("patch_panel_id", V),
    ("patch_panel_port", V),
    ("is_port_up", B),
    ("cable_color", V),
    ("cable_label", V),
];

const PORT_COLUMNS: &[(&str, Type)] = &[
    ("port", V),
    ("connection_id", V),
    ("connected_by_pc", V),
    ("is_up", B),
];

const RACK_UNIT_COLUMNS: &[(&str, Type)] = &[
    ("unit", I),
    ("device_kind", V),
    ("device_id", V),
    ("device_name", V),
];

const PDF_TEMPLATE_COLUMNS: &[(&str, Type)] = &[
    ("id", V),
    ("original_filename", V),
    ("stored_filename", V),
    ("uploaded_at", I),
];

const SETTINGS_COLUMNS: &[(&str, Type)] = &[("default_pdf_id", V)];

const AUDIT_COLUMNS: &[(&str, Type)] = &[
    ("seq", I),
    ("at", I),
    ("action", V),
    ("table_name", V),
    ("entity_id", V),
    ("before", V),
    ("after", V),
];

const IMPORT_COLUMNS: &[(&str, Type)] = &[("success_count", I), ("error_count", I), ("errors", V)];

fn columns(table: Table) -> &'static [(&'static str, Type)] {
    match table {
        Table::Locations => LOCATION_COLUMNS,
        Table::Racks => RACK_COLUMNS,
        Table::Pcs | Table::AvailablePcs => PC_COLUMNS,
        Table::PatchPanels => PATCH_PANEL_COLUMNS,
        Table::Switches => SWITCH_COLUMNS,
        Table::Connections => CONNECTION_COLUMNS,
        Table::ConnectionHops => HOP_COLUMNS,
        Table::SwitchPorts | Table::PatchPanelPorts => PORT_COLUMNS,
        Table::RackUnits => RACK_UNIT_COLUMNS,
        Table::PdfTemplates => PDF_TEMPLATE_COLUMNS,
        Table::Settings => SETTINGS_COLUMNS,
        Table::AuditLog => AUDIT_COLUMNS,
    }
}

fn schema(cols: &[(&str, Type)]) -> Vec<FieldInfo> {
    cols.iter()
        .map(|(name, ty)| FieldInfo::new((*name).into(), None, None, ty.clone(), FieldFormat::Text))
        .collect()
}

fn location_row(l: &Location) -> Vec<Cell> {
    vec![text(l.id), text(&l.name), opt_text(&l.door_number), opt_text(&l.description)]
}

fn rack_row(r: &Rack) -> Vec<Cell> {
    vec![
        text(r.id),
        text(&r.name),
        text(r.location_id),
        opt_text(&r.description),
        int(r.total_units),
        text(&r.orientation),
    ]
}

fn pc_row(pc: &Pc) -> Vec<Cell> {
    vec![
        text(pc.id),
        text(&pc.name),
        opt_text(&pc.ip_address),
        opt_text(&pc.username),
        flag(pc.in_domain),
        opt_text(&pc.operating_system),
        opt_text(&pc.model),
        opt_text(&pc.office),
        opt_text(&pc.description),
        flag(pc.multi_port),
        text(&pc.pc_type),
        opt_text(&pc.usage),
        opt_text(&pc.rack_id),
        opt_int(pc.start_unit),
        int(pc.units_occupied),
    ]
}

fn patch_panel_row(pp: &PatchPanel) -> Vec<Cell> {
    vec![
        text(pp.id),
        text(&pp.name),
        opt_text(&pp.location_id),
        opt_text(&pp.rack_id),
        opt_int(pp.start_unit),
        int(pp.units_occupied),
        int(pp.total_ports),
        opt_text(&pp.description),
    ]
}

fn switch_row(s: &Switch) -> Vec<Cell> {
    vec![
        text(s.id),
        text(&s.name),
        opt_text(&s.ip_address),
        opt_text(&s.location_id),
        opt_text(&s.rack_id),
        opt_int(s.start_unit),
        int(s.units_occupied),
        int(s.total_ports),
        opt_text(&s.source_port),
        opt_text(&s.model),
        opt_text(&s.description),
        opt_text(&s.usage),
    ]
}

fn connection_row(c: &Connection) -> Vec<Cell> {
    vec![
        text(c.id),
        text(c.pc_id),
        text(c.switch_id),
        text(&c.switch_port),
        flag(c.is_switch_port_up),
        opt_text(&c.cable_color),
        opt_text(&c.cable_label),
        Cell::Text(serde_json::to_string(&c.hops).ok()),
    ]
}

fn hop_row(connection_id: Ulid, seq: usize, h: &Hop) -> Vec<Cell> {
    vec![
        text(connection_id),
        Cell::Int(i64::try_from(seq).ok()),
        text(h.patch_panel_id),
        text(&h.patch_panel_port),
        flag(h.is_port_up),
        opt_text(&h.cable_color),
        opt_text(&h.cable_label),
    ]
}

fn port_row(p: &PortStatus) -> Vec<Cell> {
    vec![
        text(&p.port),
        opt_text(&p.connection_id),
        opt_text(&p.connected_by_pc),
        Cell::Bool(p.is_up),
    ]
}

fn rack_unit_row(s: &RackSlot) -> Vec<Cell> {
    vec![
        int(s.unit),
        Cell::Text(s.kind.map(|k| k.label().to_string())),
        opt_text(&s.device_id),
        opt_text(&s.device_name),
    ]
}

fn pdf_template_row(t: &PdfTemplate) -> Vec<Cell> {
    vec![text(t.id), text(&t.original_filename), text(&t.stored_filename), int(t.uploaded_at)]
}

fn audit_row(e: &AuditEntry) -> Vec<Cell> {
    vec![
        Cell::Int(i64::try_from(e.seq).ok()),
        int(e.at),
        text(e.action.as_str()),
        text(e.table),
        text(e.entity_id),
        opt_text(&e.before),
        opt_text(&e.after),
    ]
}

fn query_response(cols: &[(&str, Type)], rows: Vec<Vec<Cell>>) -> Response {
    let schema = Arc::new(schema(cols));
    let rows: Vec<PgWireResult<_>> = rows
        .into_iter()
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            for cell in row {
                match cell {
                    Cell::Text(v) => encoder.encode_field(&v)?,
                    Cell::Int(v) => encoder.encode_field(&v)?,
                    Cell::Bool(v) => encoder.encode_field(&v)?,
                }
            }
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Keep rows whose `column` holds `id`.
fn filter_rows(cols: &[(&str, Type)], rows: Vec<Vec<Cell>>, filter: &Filter) -> PgWireResult<Vec<Vec<Cell>>> {
    let idx = cols
        .iter()
        .position(|(name, _)| *name == filter.column)
        .ok_or_else(|| user_error("42703", format!("unknown column: {}", filter.column)))?;
    let wanted = filter.id.to_string();
    Ok(rows
        .into_iter()
        .filter(|row| matches!(&row[idx], Cell::Text(Some(v)) if *v == wanted))
        .collect())
}

// ── Handler ─────────────────────────────────────────────────────

pub struct NetdocHandler {
    engine: Arc<Engine>,
    transfer_dir: PathBuf,
    query_parser: Arc<NetdocQueryParser>,
}

impl NetdocHandler {
    pub fn new(engine: Arc<Engine>, transfer_dir: PathBuf) -> Self {
        Self {
            engine,
            transfer_dir,
            query_parser: Arc::new(NetdocQueryParser),
        }
    }

    /// Parse and run one statement.
    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(parse_failed)?;
        self.run_command(cmd).await
    }

    /// Run every statement in order, stopping at the first failure.
    async fn run_batch(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmds = sql::parse_batch(query).map_err(parse_failed)?;
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            responses.push(self.run_command(cmd).await?);
        }
        Ok(responses)
    }

    async fn run_command(&self, cmd: Command) -> PgWireResult<Response> {
        let started = Instant::now();
        let label = observability::command_label(&cmd);
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::Insert(m) => {
                self.apply(m, true).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::Update(m) => {
                self.apply(m, false).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::Delete { table, id } => {
                match table {
                    Table::Locations => engine.delete_location(id).await,
                    Table::Racks => engine.delete_rack(id).await,
                    Table::Pcs => engine.delete_pc(id).await,
                    Table::PatchPanels => engine.delete_patch_panel(id).await,
                    Table::Switches => engine.delete_switch(id).await,
                    Table::Connections => engine.delete_connection(id).await,
                    Table::PdfTemplates => engine.remove_pdf_template(id).await,
                    other => return Err(sql_err(SqlError::Unsupported(format!("DELETE from {other}")))),
                }
                .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::Select { table, filter } => self.select(table, filter).await,
            Command::Import { table, file } => {
                let path = transfer::resolve_path(&self.transfer_dir, &file).map_err(transfer_err)?;
                let bytes = tokio::fs::read(&path).await.map_err(|e| transfer_err(e.into()))?;
                let report = transfer::import_csv(engine, table, bytes.as_slice())
                    .await
                    .map_err(transfer_err)?;
                let errors = serde_json::to_string(&report.errors).ok();
                let row = vec![
                    Cell::Int(i64::try_from(report.success_count).ok()),
                    Cell::Int(i64::try_from(report.error_count).ok()),
                    Cell::Text(errors),
                ];
                Ok(query_response(IMPORT_COLUMNS, vec![row]))
            }
            Command::Export { table, file } => {
                let path = transfer::resolve_path(&self.transfer_dir, &file).map_err(transfer_err)?;
                let mut out = Vec::new();
                let rows = transfer::export_csv(engine, table, &mut out).await.map_err(transfer_err)?;
                tokio::fs::write(&path, out).await.map_err(|e| transfer_err(e.into()))?;
                Ok(Response::Execution(Tag::new("COPY").with_rows(rows)))
            }
        }
    }

    async fn apply(&self, m: Mutation, insert: bool) -> Result<(), EngineError> {
        let engine = &self.engine;
        match (m, insert) {
            (Mutation::Location(id, p), true) => engine.create_location(id, p).await.map(drop),
            (Mutation::Location(id, p), false) => engine.update_location(id, p).await.map(drop),
            (Mutation::Rack(id, p), true) => engine.create_rack(id, p).await.map(drop),
            (Mutation::Rack(id, p), false) => engine.update_rack(id, p).await.map(drop),
            (Mutation::Pc(id, p), true) => engine.create_pc(id, p).await.map(drop),
            (Mutation::Pc(id, p), false) => engine.update_pc(id, p).await.map(drop),
            (Mutation::PatchPanel(id, p), true) => engine.create_patch_panel(id, p).await.map(drop),
            (Mutation::PatchPanel(id, p), false) => engine.update_patch_panel(id, p).await.map(drop),
            (Mutation::Switch(id, p), true) => engine.create_switch(id, p).await.map(drop),
            (Mutation::Switch(id, p), false) => engine.update_switch(id, p).await.map(drop),
            (Mutation::Connection(id, p), true) => engine.create_connection(id, p).await.map(drop),
            (Mutation::Connection(id, p), false) => engine.update_connection(id, p).await.map(drop),
            (Mutation::PdfTemplate { id, original_filename }, _) => {
                engine.add_pdf_template(id, &original_filename).await.map(drop)
            }
            (Mutation::Settings { default_pdf_id }, _) => engine.set_default_pdf(default_pdf_id).await.map(drop),
        }
    }

    async fn select(&self, table: Table, filter: Option<Filter>) -> PgWireResult<Response> {
        let engine = &self.engine;
        let cols = columns(table);
        // Views take their owner from the filter; tables are filtered afterwards.
        let owner = filter.as_ref().map(|f| f.id);
        let rows: Vec<Vec<Cell>> = match table {
            Table::Locations => engine.list_locations().await.iter().map(location_row).collect(),
            Table::Racks => engine.list_racks().await.iter().map(rack_row).collect(),
            Table::Pcs => engine.list_pcs().await.iter().map(pc_row).collect(),
            Table::AvailablePcs => engine.available_pcs().await.iter().map(pc_row).collect(),
            Table::PatchPanels => engine.list_patch_panels().await.iter().map(patch_panel_row).collect(),
            Table::Switches => engine.list_switches().await.iter().map(switch_row).collect(),
            Table::Connections => engine.list_connections().await.iter().map(connection_row).collect(),
            Table::PdfTemplates => engine.list_pdf_templates().await.iter().map(pdf_template_row).collect(),
            Table::Settings => vec![vec![opt_text(&engine.settings().await.default_pdf_id)]],
            Table::AuditLog => engine.audit.recent().iter().map(audit_row).collect(),
            Table::ConnectionHops => {
                let id = required_owner(owner, "connection_id")?;
                let hops = engine.connection_hops(id).await.map_err(engine_err)?;
                hops.iter().enumerate().map(|(seq, h)| hop_row(id, seq, h)).collect()
            }
            Table::SwitchPorts => {
                let id = required_owner(owner, "switch_id")?;
                let ports = engine.switch_port_status(id).await.map_err(engine_err)?;
                ports.iter().map(port_row).collect()
            }
            Table::PatchPanelPorts => {
                let id = required_owner(owner, "patch_panel_id")?;
                let ports = engine.patch_panel_port_status(id).await.map_err(engine_err)?;
                ports.iter().map(port_row).collect()
            }
            Table::RackUnits => {
                let id = required_owner(owner, "rack_id")?;
                let slots = engine.rack_layout(id).await.map_err(engine_err)?;
                slots.iter().map(rack_unit_row).collect()
            }
        };
        let rows = match (&filter, table.is_view()) {
            (Some(f), false) => filter_rows(cols, rows, f)?,
            _ => rows,
        };
        Ok(query_response(cols, rows))
    }
}

fn required_owner(owner: Option<Ulid>, column: &'static str) -> PgWireResult<Ulid> {
    owner.ok_or_else(|| sql_err(SqlError::MissingFilter(column)))
}

#[async_trait]
impl SimpleQueryHandler for NetdocHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run_batch(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct NetdocQueryParser;

/// Columns a statement will return; empty for anything but a known SELECT.
fn describe(sql: &str) -> Vec<FieldInfo> {
    sql::select_table(sql).map(|t| schema(columns(t))).unwrap_or_default()
}

#[async_trait]
impl QueryParser for NetdocQueryParser {
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
        Ok(describe(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for NetdocHandler {
    type Statement = String;
    type QueryParser = NetdocQueryParser;

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
        self.run(&substitute_params(portal)).await
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
        Ok(DescribeStatementResponse::new(param_types, describe(&target.statement)))
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
        Ok(DescribePortalResponse::new(describe(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    sql.split('$')
        .skip(1)
        .filter_map(|rest| {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            rest[..digits].parse::<usize>().ok()
        })
        .max()
        .unwrap_or(0)
}

/// Inline bound text parameters as SQL literals, highest index first so `$1`
/// never clobbers `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct NetdocFactory {
    handler: Arc<NetdocHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SharedPassword, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl NetdocFactory {
    pub fn new(engine: Arc<Engine>, transfer_dir: PathBuf, auth: SharedPassword) -> Self {
        Self {
            handler: Arc::new(NetdocHandler::new(engine, transfer_dir)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth,
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for NetdocFactory {
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
    transfer_dir: PathBuf,
    auth: SharedPassword,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(NetdocFactory::new(engine, transfer_dir, auth));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn parse_failed(e: SqlError) -> PgWireError {
    metrics::counter!(observability::QUERIES_TOTAL, "command" => "unknown", "status" => "error").increment(1);
    sql_err(e)
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sqlstate(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Validation => "22023",
        ErrorClass::NotFound => "P0002",
        ErrorClass::Conflict => "23P01",
        ErrorClass::Duplicate => "23505",
        ErrorClass::Referenced => "23503",
        ErrorClass::Limit => "54000",
        ErrorClass::Storage => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(e.class()), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match &e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(..) => "42703",
        SqlError::Unsupported(_) => "0A000",
        _ => "42601",
    };
    user_error(code, e.to_string())
}

fn transfer_err(e: TransferError) -> PgWireError {
    let code = match &e {
        TransferError::BadPath(_) => "22023",
        TransferError::UnsupportedTable(_) => "0A000",
        TransferError::Io(io) if io.kind() == io::ErrorKind::NotFound => "58P01",
        TransferError::Io(_) => "58030",
        TransferError::Csv(_) => "22P04",
    };
    user_error(code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM racks"), 0);
        assert_eq!(count_params("UPDATE racks SET total_units = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("INSERT INTO t VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)"), 10);
    }

    #[test]
    fn engine_errors_map_to_sqlstate() {
        let id = Ulid::new();
        let cases = [
            (EngineError::invalid("name", "is required"), "22023"),
            (EngineError::NotFound { kind: "rack", id }, "P0002"),
            (EngineError::RackUnitsOccupied { holder: "Switch SW1 (occupies units 1-2)".into() }, "23P01"),
            (EngineError::Duplicate { kind: "switch", name: "SW1".into() }, "23505"),
            (EngineError::InUse { kind: "rack", id, by: "Switch SW1".into() }, "23503"),
            (EngineError::LimitExceeded("too many hops in one connection"), "54000"),
            (EngineError::WalError("disk full".into()), "58030"),
        ];
        for (err, code) in cases {
            assert_eq!(sqlstate(err.class()), code, "{err}");
        }
    }

    #[test]
    fn table_filter_matches_on_named_column() {
        let a = Ulid::new();
        let b = Ulid::new();
        let rows = vec![
            vec![text(a), text("R1"), text(b), Cell::Text(None), int(42u32), text("bottom-up")],
            vec![text(b), text("R2"), text(a), Cell::Text(None), int(42u32), text("bottom-up")],
        ];
        let kept = filter_rows(RACK_COLUMNS, rows, &Filter { column: "location_id".into(), id: b }).unwrap();
        assert_eq!(kept.len(), 1);
        assert!(matches!(&kept[0][1], Cell::Text(Some(n)) if n == "R1"));
    }

    #[test]
    fn unknown_filter_column_is_rejected() {
        let filter = Filter { column: "colour".into(), id: Ulid::new() };
        assert!(filter_rows(LOCATION_COLUMNS, vec![], &filter).is_err());
    }

    #[test]
    fn every_table_describes_its_columns() {
        assert_eq!(describe("SELECT * FROM switch_ports WHERE switch_id = $1").len(), PORT_COLUMNS.len());
        assert_eq!(describe("SELECT * FROM audit_log").len(), AUDIT_COLUMNS.len());
        assert!(describe("DELETE FROM racks WHERE id = $1").is_empty());
    }
}
