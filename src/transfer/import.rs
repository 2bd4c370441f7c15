use std::collections::HashMap;
use std::io;

use ulid::Ulid;

use crate::engine::Engine;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::TransferError;

/// Outcome of one import. `errors` also carries warnings for links that were
/// skipped on rows that otherwise succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
}

/// One CSV record keyed by header.
struct Row<'a> {
    fields: HashMap<&'a str, &'a str>,
}

impl<'a> Row<'a> {
    fn new(headers: &'a [String], record: &'a csv::StringRecord) -> Self {
        Self { fields: headers.iter().map(String::as_str).zip(record.iter()).collect() }
    }

    /// Trimmed value; empty cells read as absent.
    fn get(&self, col: &str) -> Option<&'a str> {
        self.fields.get(col).copied().map(str::trim).filter(|v| !v.is_empty())
    }

    fn text(&self, col: &str) -> Option<Option<String>> {
        self.get(col).map(|v| Some(v.to_string()))
    }

    fn flag(&self, col: &str) -> Option<bool> {
        self.get(col).map(|v| v.eq_ignore_ascii_case("true"))
    }

    fn int(&self, col: &str) -> Result<Option<i64>, String> {
        self.get(col)
            .map(|v| v.parse().map_err(|_| format!("Invalid '{col}': {v}")))
            .transpose()
    }
}

/// Import `table` rows from CSV. Rows are committed one at a time; a failing
/// row is reported and skipped.
pub async fn import_csv<R: io::Read>(engine: &Engine, table: Table, reader: R) -> Result<ImportReport, TransferError> {
    if !table.is_transferable() {
        return Err(TransferError::UnsupportedTable(table));
    }
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

    let mut report = ImportReport::default();
    for (i, record) in rdr.records().enumerate() {
        let line = i + 2;
        if i >= MAX_IMPORT_ROWS {
            report.error_count += 1;
            report.errors.push(format!("Row {line}: import stopped after {MAX_IMPORT_ROWS} rows"));
            break;
        }
        let outcome = match record {
            Ok(record) if record.iter().all(|f| f.trim().is_empty()) => continue,
            Ok(record) => {
                let row = Row::new(&headers, &record);
                import_row(engine, table, &row, line, &mut report.errors).await
            }
            Err(e) => Err(e.to_string()),
        };
        match outcome {
            Ok(()) => {
                report.success_count += 1;
                metrics::counter!(observability::IMPORT_ROWS_TOTAL, "table" => table.as_str(), "outcome" => "ok")
                    .increment(1);
            }
            Err(reason) => {
                report.error_count += 1;
                report.errors.push(format!("Row {line}: {reason}"));
                metrics::counter!(observability::IMPORT_ROWS_TOTAL, "table" => table.as_str(), "outcome" => "error")
                    .increment(1);
            }
        }
    }
    tracing::info!(
        table = %table,
        ok = report.success_count,
        failed = report.error_count,
        "csv import"
    );
    Ok(report)
}

async fn import_row(
    engine: &Engine,
    table: Table,
    row: &Row<'_>,
    line: usize,
    warnings: &mut Vec<String>,
) -> Result<(), String> {
    match table {
        Table::Locations => import_location(engine, row).await,
        Table::Racks => import_rack(engine, row).await,
        Table::Pcs => import_pc(engine, row, line, warnings).await,
        Table::PatchPanels => import_patch_panel(engine, row, line, warnings).await,
        Table::Switches => import_switch(engine, row, line, warnings).await,
        Table::Connections => import_connection(engine, row, line, warnings).await,
        other => Err(format!("{other} cannot be imported")),
    }
}

async fn import_location(engine: &Engine, row: &Row<'_>) -> Result<(), String> {
    let name = row.get("name").ok_or("Missing 'name' field.")?;
    let patch = LocationPatch {
        name: Some(name.to_string()),
        door_number: row.text("door_number"),
        description: row.text("description"),
    };
    engine.create_location(Ulid::new(), patch).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn import_rack(engine: &Engine, row: &Row<'_>) -> Result<(), String> {
    let (Some(name), Some(location_name)) = (row.get("name"), row.get("location_name")) else {
        return Err("Missing 'name' or 'location_name' field.".into());
    };
    let location = engine
        .find_location(location_name)
        .await
        .ok_or_else(|| format!("Location '{location_name}' not found for Rack '{name}'."))?;
    let patch = RackPatch {
        name: Some(name.to_string()),
        location_id: Some(location.id),
        description: row.text("description"),
        total_units: Some(row.int("total_units")?.unwrap_or(DEFAULT_RACK_UNITS as i64)),
        orientation: Some(row.get("orientation").unwrap_or(DEFAULT_ORIENTATION).to_string()),
    };
    engine.create_rack(Ulid::new(), patch).await.map_err(|e| e.to_string())?;
    Ok(())
}

/// `row_in_rack` and `units_occupied` for a device that resolved its rack.
fn placement(row: &Row<'_>, what: &str) -> Result<(i64, i64), String> {
    let invalid = || format!("Invalid 'row_in_rack' or 'units_occupied'. Must be positive integers for {what}.");
    let start = row.int("row_in_rack").map_err(|_| invalid())?.ok_or_else(invalid)?;
    let units = row.int("units_occupied").map_err(|_| invalid())?.unwrap_or(1);
    if start < 1 || units < 1 {
        return Err(invalid());
    }
    Ok((start, units))
}

/// Resolve `rack_name`, if given. A missing rack only skips the link.
async fn resolve_rack(
    engine: &Engine,
    row: &Row<'_>,
    line: usize,
    device: &str,
    warnings: &mut Vec<String>,
) -> Option<Ulid> {
    let rack_name = row.get("rack_name")?;
    match engine.find_rack(rack_name, None).await {
        Some(rack) => Some(rack.id),
        None => {
            warnings.push(format!("Row {line}: Rack '{rack_name}' not found for {device}. Rack link skipped."));
            None
        }
    }
}

async fn import_pc(engine: &Engine, row: &Row<'_>, line: usize, warnings: &mut Vec<String>) -> Result<(), String> {
    let name = row.get("name").ok_or("Missing 'name' field.")?;
    let pc_type = row.get("type").unwrap_or(DEFAULT_PC_TYPE);

    let mut rack_id = None;
    let mut start_unit = None;
    let mut units = 1;
    if pc_type == SERVER_PC_TYPE
        && let Some(id) = resolve_rack(engine, row, line, &format!("PC '{name}'"), warnings).await
    {
        let (start, count) = placement(row, "Server PCs")?;
        rack_id = Some(id);
        start_unit = Some(start);
        units = count;
    }

    let mut patch = PcPatch {
        ip_address: row.text("ip_address"),
        username: row.text("username"),
        in_domain: row.flag("in_domain"),
        operating_system: row.text("operating_system"),
        model: row.text("model"),
        office: row.text("office"),
        description: row.text("description"),
        multi_port: row.flag("multi_port"),
        pc_type: Some(pc_type.to_string()),
        usage: row.text("usage"),
        rack_id: Some(rack_id),
        start_unit: Some(start_unit),
        units_occupied: Some(units),
        ..Default::default()
    };
    let result = match engine.find_pc(name).await {
        Some(existing) => engine.update_pc(existing.id, patch).await,
        None => {
            patch.name = Some(name.to_string());
            engine.create_pc(Ulid::new(), patch).await
        }
    };
    result.map(drop).map_err(|e| e.to_string())
}

async fn import_patch_panel(
    engine: &Engine,
    row: &Row<'_>,
    line: usize,
    warnings: &mut Vec<String>,
) -> Result<(), String> {
    let (Some(name), Some(location_name)) = (row.get("name"), row.get("location_name")) else {
        return Err("Missing 'name' or 'location_name' field.".into());
    };
    let location = engine
        .find_location(location_name)
        .await
        .ok_or_else(|| format!("Location '{location_name}' not found for Patch Panel '{name}'."))?;

    let mut patch = PatchPanelPatch {
        name: Some(name.to_string()),
        location_id: Some(Some(location.id)),
        total_ports: Some(row.int("total_ports")?.unwrap_or(1)),
        description: row.text("description"),
        ..Default::default()
    };
    if let Some(rack_id) = resolve_rack(engine, row, line, &format!("Patch Panel '{name}'"), warnings).await {
        let (start, units) = placement(row, "rack-mounted Patch Panel")?;
        patch.rack_id = Some(Some(rack_id));
        patch.start_unit = Some(Some(start));
        patch.units_occupied = Some(units);
    }
    engine.create_patch_panel(Ulid::new(), patch).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn import_switch(engine: &Engine, row: &Row<'_>, line: usize, warnings: &mut Vec<String>) -> Result<(), String> {
    let (Some(name), Some(location_name)) = (row.get("name"), row.get("location_name")) else {
        return Err("Missing 'name' or 'location_name' field.".into());
    };
    let location = engine
        .find_location(location_name)
        .await
        .ok_or_else(|| format!("Location '{location_name}' not found for Switch '{name}'."))?;

    let mut patch = SwitchPatch {
        name: Some(name.to_string()),
        ip_address: row.text("ip_address"),
        location_id: Some(Some(location.id)),
        total_ports: Some(row.int("total_ports")?.unwrap_or(1)),
        source_port: row.text("source_port"),
        model: row.text("model"),
        description: row.text("description"),
        usage: row.text("usage"),
        ..Default::default()
    };
    if let Some(rack_id) = resolve_rack(engine, row, line, &format!("Switch '{name}'"), warnings).await {
        let (start, units) = placement(row, "rack-mounted Switch")?;
        patch.rack_id = Some(Some(rack_id));
        patch.start_unit = Some(Some(start));
        patch.units_occupied = Some(units);
    }
    engine.create_switch(Ulid::new(), patch).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn import_connection(
    engine: &Engine,
    row: &Row<'_>,
    line: usize,
    warnings: &mut Vec<String>,
) -> Result<(), String> {
    let (Some(pc_name), Some(switch_name), Some(switch_port)) =
        (row.get("pc_name"), row.get("switch_name"), row.get("switch_port"))
    else {
        return Err("Missing 'pc_name', 'switch_name', or 'switch_port'.".into());
    };
    let pc = engine
        .find_pc(pc_name)
        .await
        .ok_or_else(|| format!("PC '{pc_name}' not found."))?;
    let switch = engine
        .find_switch(switch_name)
        .await
        .ok_or_else(|| format!("Switch '{switch_name}' not found."))?;
    if engine.find_connection(pc.id, switch.id, switch_port).await.is_some() {
        return Err(format!(
            "Connection between PC '{pc_name}', Switch '{switch_name}' port '{switch_port}' already exists."
        ));
    }

    let mut hops = Vec::new();
    for n in 1..=MAX_HOPS {
        let (Some(pp_name), Some(pp_port)) = (
            row.get(&format!("hop{n}_patch_panel_name")),
            row.get(&format!("hop{n}_patch_panel_port")),
        ) else {
            continue;
        };
        let Some(panel) = engine.find_patch_panel(pp_name).await else {
            warnings.push(format!("Row {line}, Hop {n}: Patch Panel '{pp_name}' not found. Skipping this hop."));
            continue;
        };
        hops.push(Hop {
            patch_panel_id: panel.id,
            patch_panel_port: pp_port.to_string(),
            is_port_up: row.flag(&format!("hop{n}_is_port_up")).unwrap_or(true),
            cable_color: row.get(&format!("hop{n}_cable_color")).map(str::to_string),
            cable_label: row.get(&format!("hop{n}_cable_label")).map(str::to_string),
        });
    }

    let patch = ConnectionPatch {
        pc_id: Some(pc.id),
        switch_id: Some(switch.id),
        switch_port: Some(switch_port.to_string()),
        is_switch_port_up: Some(row.flag("is_switch_port_up").unwrap_or(true)),
        cable_color: row.text("cable_color"),
        cable_label: row.text("cable_label"),
        hops: Some(hops),
    };
    engine.create_connection(Ulid::new(), patch).await.map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::audit::AuditLog;
    use crate::transfer::export_csv;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("netdoc_test_transfer");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{name}.wal"));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(name: &str) -> Engine {
        Engine::new(test_wal_path(name), Arc::new(AuditLog::new(64))).unwrap()
    }

    async fn import(engine: &Engine, table: Table, csv: &str) -> ImportReport {
        import_csv(engine, table, csv.as_bytes()).await.unwrap()
    }

    async fn seed_site(engine: &Engine) {
        import(engine, Table::Locations, "name,door_number\nServer Room,B12\n").await;
        import(engine, Table::Racks, "name,location_name,total_units\nR1,Server Room,10\n").await;
    }

    #[tokio::test]
    async fn failing_connection_row_does_not_stop_the_batch() {
        let e = engine("connection_batch");
        seed_site(&e).await;
        let switches = import(&e, Table::Switches, "name,location_name,total_ports\nSW1,Server Room,48\n").await;
        assert_eq!(switches.success_count, 1);
        let pcs = import(&e, Table::Pcs, "name\nPC1\nPC2\nPC3\nPC4\nPC5\n").await;
        assert_eq!(pcs.success_count, 5);

        let csv = "pc_name,switch_name,switch_port\n\
                   PC1,SW1,1\n\
                   PC2,SW1,2\n\
                   PC3,SW9,3\n\
                   PC4,SW1,4\n\
                   PC5,SW1,5\n";
        let report = import(&e, Table::Connections, csv).await;

        assert_eq!(report.success_count, 4);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.errors, vec!["Row 4: Switch 'SW9' not found.".to_string()]);
        assert_eq!(e.list_connections().await.len(), 4);
    }

    #[tokio::test]
    async fn missing_rack_is_a_warning_not_a_failure() {
        let e = engine("missing_rack");
        seed_site(&e).await;
        let csv = "name,location_name,rack_name,row_in_rack,units_occupied\nSW1,Server Room,R404,1,1\n";
        let report = import(&e, Table::Switches, csv).await;

        assert_eq!(report.success_count, 1);
        assert_eq!(report.error_count, 0);
        assert_eq!(
            report.errors,
            vec!["Row 2: Rack 'R404' not found for Switch 'SW1'. Rack link skipped.".to_string()]
        );
        let sw = e.find_switch("SW1").await.unwrap();
        assert_eq!(sw.rack_id, None);
    }

    #[tokio::test]
    async fn rack_placement_goes_through_the_occupancy_check() {
        let e = engine("rack_placement");
        seed_site(&e).await;
        let csv = "name,location_name,rack_name,row_in_rack,units_occupied\n\
                   SW1,Server Room,R1,1,2\n\
                   SW2,Server Room,R1,2,2\n\
                   SW3,Server Room,R1,,1\n";
        let report = import(&e, Table::Switches, csv).await;

        assert_eq!(report.success_count, 1);
        assert_eq!(report.error_count, 2);
        assert_eq!(
            report.errors[0],
            "Row 3: Rack unit(s) is already occupied by Switch SW1 (occupies units 1-2)"
        );
        assert!(report.errors[1].starts_with("Row 4: Invalid 'row_in_rack'"));
    }

    #[tokio::test]
    async fn pcs_upsert_by_name() {
        let e = engine("pc_upsert");
        import(&e, Table::Pcs, "name,office,multi_port\nWS-1,A1,false\n").await;
        let report = import(&e, Table::Pcs, "name,office\nWS-1,B7\n").await;

        assert_eq!(report.success_count, 1);
        let pcs = e.list_pcs().await;
        assert_eq!(pcs.len(), 1);
        assert_eq!(pcs[0].office.as_deref(), Some("B7"));
    }

    #[tokio::test]
    async fn duplicate_names_and_connections_are_row_errors() {
        let e = engine("duplicates");
        let report = import(&e, Table::Locations, "name\nLab\nLab\n").await;
        assert_eq!((report.success_count, report.error_count), (1, 1));
        assert!(report.errors[0].starts_with("Row 3:"));

        import(&e, Table::Switches, "name,location_name\nSW1,Lab\n").await;
        import(&e, Table::Pcs, "name,multi_port\nSRV,true\n").await;
        let csv = "pc_name,switch_name,switch_port\nSRV,SW1,1\nSRV,SW1,1\n";
        let report = import(&e, Table::Connections, csv).await;
        assert_eq!((report.success_count, report.error_count), (1, 1));
        assert_eq!(
            report.errors[0],
            "Row 3: Connection between PC 'SRV', Switch 'SW1' port '1' already exists."
        );
    }

    #[tokio::test]
    async fn unknown_hop_panel_is_skipped() {
        let e = engine("hop_skip");
        seed_site(&e).await;
        import(&e, Table::Switches, "name,location_name,total_ports\nSW1,Server Room,24\n").await;
        import(&e, Table::PatchPanels, "name,location_name,total_ports\nPP1,Server Room,24\n").await;
        import(&e, Table::Pcs, "name\nWS\n").await;

        let csv = "pc_name,switch_name,switch_port,hop1_patch_panel_name,hop1_patch_panel_port,\
                   hop2_patch_panel_name,hop2_patch_panel_port\n\
                   WS,SW1,3,PP1,12,PP9,4\n";
        let report = import(&e, Table::Connections, csv).await;

        assert_eq!(report.success_count, 1);
        assert_eq!(
            report.errors,
            vec!["Row 2, Hop 2: Patch Panel 'PP9' not found. Skipping this hop.".to_string()]
        );
        let conn = &e.list_connections().await[0];
        assert_eq!(conn.hops.len(), 1);
        assert_eq!(conn.hops[0].patch_panel_port, "12");
    }

    #[tokio::test]
    async fn exported_connections_import_into_a_fresh_inventory() {
        let src = engine("export_src");
        seed_site(&src).await;
        import(&src, Table::Switches, "name,location_name,total_ports\nSW1,Server Room,24\n").await;
        import(&src, Table::PatchPanels, "name,location_name,total_ports\nPP1,Server Room,24\n").await;
        import(&src, Table::Pcs, "name\nWS\n").await;
        import(
            &src,
            Table::Connections,
            "pc_name,switch_name,switch_port,hop1_patch_panel_name,hop1_patch_panel_port\nWS,SW1,3,PP1,12\n",
        )
        .await;

        let mut out = Vec::new();
        assert_eq!(export_csv(&src, Table::Connections, &mut out).await.unwrap(), 1);

        let dst = engine("export_dst");
        seed_site(&dst).await;
        import(&dst, Table::Switches, "name,location_name,total_ports\nSW1,Server Room,24\n").await;
        import(&dst, Table::PatchPanels, "name,location_name,total_ports\nPP1,Server Room,24\n").await;
        import(&dst, Table::Pcs, "name\nWS\n").await;
        let report = import_csv(&dst, Table::Connections, out.as_slice()).await.unwrap();

        assert_eq!(report, ImportReport { success_count: 1, error_count: 0, errors: vec![] });
        let conn = &dst.list_connections().await[0];
        assert_eq!(conn.switch_port, "3");
        assert_eq!(conn.hops.len(), 1);
    }

    #[tokio::test]
    async fn views_cannot_be_imported() {
        let e = engine("view_import");
        let err = import_csv(&e, Table::RackUnits, "rack_id\n".as_bytes()).await.unwrap_err();
        assert!(matches!(err, TransferError::UnsupportedTable(Table::RackUnits)));
    }
}
