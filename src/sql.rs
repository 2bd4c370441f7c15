use sqlparser::ast::{
    self, AssignmentTarget, CopySource, CopyTarget, Expr, FromTable, ObjectNamePart, SetExpr,
    Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// One row's worth of changes for a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Location(Ulid, LocationPatch),
    Rack(Ulid, RackPatch),
    Pc(Ulid, PcPatch),
    PatchPanel(Ulid, PatchPanelPatch),
    Switch(Ulid, SwitchPatch),
    Connection(Ulid, ConnectionPatch),
    PdfTemplate { id: Ulid, original_filename: String },
    Settings { default_pdf_id: Option<Ulid> },
}

/// `WHERE <column> = '<ulid>'` on a SELECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub id: Ulid,
}

/// Parsed command from SQL input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Insert(Mutation),
    Update(Mutation),
    Delete { table: Table, id: Ulid },
    Select { table: Table, filter: Option<Filter> },
    /// `COPY <table> FROM '<file>'`
    Import { table: Table, file: String },
    /// `COPY <table> TO '<file>'`
    Export { table: Table, file: String },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    parse_statement(stmt)
}

/// Every statement of a simple-query string, in order.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection.as_ref())
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Copy { source, to, target, .. } => parse_copy(source, *to, target),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, without evaluating its filters. Used to describe
/// result columns for statements that still carry `$n` placeholders.
pub fn select_table(sql: &str) -> Option<Table> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Statement::Query(query) = stmts.first()? else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    let name = table_factor_name(&select.from.first()?.relation).ok()?;
    Table::from_name(&name)
}

fn table_by_name(name: String) -> Result<Table, SqlError> {
    Table::from_name(&name).ok_or(SqlError::UnknownTable(name))
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = table_by_name(insert_table_name(insert)?)?;
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    if columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    if columns.len() != values.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            columns.len(),
            values.len()
        )));
    }

    let mut fields: Vec<(String, &Expr)> = columns.into_iter().zip(values.iter()).collect();
    let id_pos = fields
        .iter()
        .position(|(c, _)| c == "id")
        .ok_or(SqlError::MissingColumn("id"))?;
    let (_, id_expr) = fields.remove(id_pos);
    let id = parse_ulid_expr(id_expr)?;

    let mutation = match table {
        Table::PdfTemplates => {
            let mut original_filename = None;
            for (col, expr) in &fields {
                match col.as_str() {
                    "original_filename" => original_filename = Some(text(expr)?),
                    _ => return Err(SqlError::UnknownColumn(table, col.clone())),
                }
            }
            Mutation::PdfTemplate {
                id,
                original_filename: original_filename.ok_or(SqlError::MissingColumn("original_filename"))?,
            }
        }
        _ => entity_mutation(table, id, &fields)?,
    };
    Ok(Command::Insert(mutation))
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_by_name(table_factor_name(&table.relation)?)?;
    let mut fields = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        if col == "id" {
            return Err(SqlError::Unsupported("changing id".into()));
        }
        fields.push((col, &a.value));
    }

    let mutation = match table {
        Table::Settings => {
            let mut default_pdf_id = None;
            for (col, expr) in &fields {
                match col.as_str() {
                    "default_pdf_id" => default_pdf_id = Some(parse_ulid_or_null(expr)?),
                    _ => return Err(SqlError::UnknownColumn(table, col.clone())),
                }
            }
            Mutation::Settings {
                default_pdf_id: default_pdf_id.ok_or(SqlError::MissingColumn("default_pdf_id"))?,
            }
        }
        _ => {
            let id = extract_where_id(selection)?;
            entity_mutation(table, id, &fields)?
        }
    };
    Ok(Command::Update(mutation))
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = table_by_name(delete_table_name(delete)?)?;
    let id = extract_where_id(delete.selection.as_ref())?;
    match table {
        Table::Locations
        | Table::Racks
        | Table::Pcs
        | Table::PatchPanels
        | Table::Switches
        | Table::Connections
        | Table::PdfTemplates => Ok(Command::Delete { table, id }),
        _ => Err(SqlError::Unsupported(format!("DELETE from {table}"))),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let first = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_by_name(table_factor_name(&first.relation)?)?;

    let filter = match &select.selection {
        None => None,
        Some(Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right }) => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported("filter must be <column> = <value>".into()))?;
            Some(Filter { column, id: parse_ulid_expr(right)? })
        }
        Some(_) => return Err(SqlError::Unsupported("filter must be <column> = <value>".into())),
    };

    if let Some(required) = required_filter(table)
        && filter.as_ref().is_none_or(|f| f.column != required)
    {
        return Err(SqlError::MissingFilter(required));
    }
    Ok(Command::Select { table, filter })
}

/// Views that only make sense for one parent row.
fn required_filter(table: Table) -> Option<&'static str> {
    match table {
        Table::SwitchPorts => Some("switch_id"),
        Table::PatchPanelPorts => Some("patch_panel_id"),
        Table::RackUnits => Some("rack_id"),
        Table::ConnectionHops => Some("connection_id"),
        _ => None,
    }
}

fn parse_copy(source: &CopySource, to: bool, target: &CopyTarget) -> Result<Command, SqlError> {
    let name = match source {
        CopySource::Table { table_name, .. } => {
            object_name_last(table_name).ok_or_else(|| SqlError::Parse("empty table name".into()))?
        }
        CopySource::Query(_) => return Err(SqlError::Unsupported("COPY (query)".into())),
    };
    let table = table_by_name(name)?;
    if !table.is_transferable() {
        return Err(SqlError::Unsupported(format!("COPY {table}")));
    }
    let file = match target {
        CopyTarget::File { filename } => filename.clone(),
        _ => return Err(SqlError::Unsupported("COPY supports server-side files only".into())),
    };
    Ok(if to {
        Command::Export { table, file }
    } else {
        Command::Import { table, file }
    })
}

// ── Column mapping ────────────────────────────────────────────

fn entity_mutation(table: Table, id: Ulid, fields: &[(String, &Expr)]) -> Result<Mutation, SqlError> {
    let unknown = |col: &str| SqlError::UnknownColumn(table, col.to_string());
    match table {
        Table::Locations => {
            let mut p = LocationPatch::default();
            for (col, e) in fields {
                match col.as_str() {
                    "name" => p.name = Some(text(e)?),
                    "door_number" => p.door_number = Some(opt_text(e)?),
                    "description" => p.description = Some(opt_text(e)?),
                    _ => return Err(unknown(col)),
                }
            }
            Ok(Mutation::Location(id, p))
        }
        Table::Racks => {
            let mut p = RackPatch::default();
            for (col, e) in fields {
                match col.as_str() {
                    "name" => p.name = Some(text(e)?),
                    "location_id" => p.location_id = Some(parse_ulid_expr(e)?),
                    "description" => p.description = Some(opt_text(e)?),
                    "total_units" => p.total_units = Some(parse_i64_expr(e)?),
                    "orientation" => p.orientation = Some(text(e)?),
                    _ => return Err(unknown(col)),
                }
            }
            Ok(Mutation::Rack(id, p))
        }
        Table::Pcs => {
            let mut p = PcPatch::default();
            for (col, e) in fields {
                match col.as_str() {
                    "name" => p.name = Some(text(e)?),
                    "ip_address" => p.ip_address = Some(opt_text(e)?),
                    "username" => p.username = Some(opt_text(e)?),
                    "in_domain" => p.in_domain = Some(parse_bool(e)?),
                    "operating_system" => p.operating_system = Some(opt_text(e)?),
                    "model" => p.model = Some(opt_text(e)?),
                    "office" => p.office = Some(opt_text(e)?),
                    "description" => p.description = Some(opt_text(e)?),
                    "multi_port" => p.multi_port = Some(parse_bool(e)?),
                    "type" | "pc_type" => p.pc_type = Some(text(e)?),
                    "usage" => p.usage = Some(opt_text(e)?),
                    "rack_id" => p.rack_id = Some(parse_ulid_or_null(e)?),
                    "start_unit" | "row_in_rack" => p.start_unit = Some(parse_i64_or_null(e)?),
                    "units_occupied" => p.units_occupied = Some(parse_i64_expr(e)?),
                    _ => return Err(unknown(col)),
                }
            }
            Ok(Mutation::Pc(id, p))
        }
        Table::PatchPanels => {
            let mut p = PatchPanelPatch::default();
            for (col, e) in fields {
                match col.as_str() {
                    "name" => p.name = Some(text(e)?),
                    "location_id" => p.location_id = Some(parse_ulid_or_null(e)?),
                    "rack_id" => p.rack_id = Some(parse_ulid_or_null(e)?),
                    "start_unit" | "row_in_rack" => p.start_unit = Some(parse_i64_or_null(e)?),
                    "units_occupied" => p.units_occupied = Some(parse_i64_expr(e)?),
                    "total_ports" => p.total_ports = Some(parse_i64_expr(e)?),
                    "description" => p.description = Some(opt_text(e)?),
                    _ => return Err(unknown(col)),
                }
            }
            Ok(Mutation::PatchPanel(id, p))
        }
        Table::Switches => {
            let mut p = SwitchPatch::default();
            for (col, e) in fields {
                match col.as_str() {
                    "name" => p.name = Some(text(e)?),
                    "ip_address" => p.ip_address = Some(opt_text(e)?),
                    "location_id" => p.location_id = Some(parse_ulid_or_null(e)?),
                    "rack_id" => p.rack_id = Some(parse_ulid_or_null(e)?),
                    "start_unit" | "row_in_rack" => p.start_unit = Some(parse_i64_or_null(e)?),
                    "units_occupied" => p.units_occupied = Some(parse_i64_expr(e)?),
                    "total_ports" => p.total_ports = Some(parse_i64_expr(e)?),
                    "source_port" => p.source_port = Some(opt_text(e)?),
                    "model" => p.model = Some(opt_text(e)?),
                    "description" => p.description = Some(opt_text(e)?),
                    "usage" => p.usage = Some(opt_text(e)?),
                    _ => return Err(unknown(col)),
                }
            }
            Ok(Mutation::Switch(id, p))
        }
        Table::Connections => {
            let mut p = ConnectionPatch::default();
            for (col, e) in fields {
                match col.as_str() {
                    "pc_id" => p.pc_id = Some(parse_ulid_expr(e)?),
                    "switch_id" => p.switch_id = Some(parse_ulid_expr(e)?),
                    "switch_port" => p.switch_port = Some(text(e)?),
                    "is_switch_port_up" => p.is_switch_port_up = Some(parse_bool(e)?),
                    "cable_color" => p.cable_color = Some(opt_text(e)?),
                    "cable_label" => p.cable_label = Some(opt_text(e)?),
                    "hops" => p.hops = Some(parse_hops(e)?),
                    _ => return Err(unknown(col)),
                }
            }
            Ok(Mutation::Connection(id, p))
        }
        _ => Err(SqlError::Unsupported(format!("writing to {table}"))),
    }
}

/// Hops travel as a JSON array: `[{"patch_panel_id": "...", "patch_panel_port": "12"}]`.
fn parse_hops(expr: &Expr) -> Result<Vec<Hop>, SqlError> {
    match opt_text(expr)? {
        None => Ok(Vec::new()),
        Some(json) => serde_json::from_str(&json).map_err(|e| SqlError::Parse(format!("bad hops JSON: {e}"))),
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
    let first = tables_with_joins
        .first()
        .ok_or_else(|| SqlError::Parse("DELETE without table".into()))?;
    table_factor_name(&first.relation)
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.as_slice()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right })
            if expr_column_name(left).as_deref() == Some("id") =>
        {
            parse_ulid_expr(right)
        }
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

fn opt_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn text(expr: &Expr) -> Result<String, SqlError> {
    opt_text(expr)?.ok_or_else(|| SqlError::Parse("NULL not allowed here".into()))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid_expr(expr).map(Some),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        return Ok(-parse_i64_expr(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(other) => Err(SqlError::Parse(format!("expected number, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64_expr(expr).map(Some),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(Table, String),
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
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} for {t}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
