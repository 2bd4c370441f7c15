use std::io;

use ulid::Ulid;

use crate::engine::{Engine, Inventory};
use crate::limits::MAX_HOPS;
use crate::model::*;

use super::TransferError;

const LOCATION_HEADERS: &[&str] = &["id", "name", "door_number", "description"];

const RACK_HEADERS: &[&str] = &[
    "id",
    "name",
    "location_id",
    "location_name",
    "location_door_number",
    "description",
    "total_units",
    "orientation",
];

const PC_HEADERS: &[&str] = &[
    "id",
    "name",
    "ip_address",
    "username",
    "in_domain",
    "operating_system",
    "model",
    "office",
    "description",
    "multi_port",
    "type",
    "usage",
    "row_in_rack",
    "units_occupied",
    "rack_id",
    "rack_name",
];

const PATCH_PANEL_HEADERS: &[&str] = &[
    "id",
    "name",
    "location_id",
    "location_name",
    "location_door_number",
    "row_in_rack",
    "units_occupied",
    "rack_id",
    "rack_name",
    "total_ports",
    "description",
];

const SWITCH_HEADERS: &[&str] = &[
    "id",
    "name",
    "ip_address",
    "location_id",
    "location_name",
    "location_door_number",
    "row_in_rack",
    "units_occupied",
    "rack_id",
    "rack_name",
    "total_ports",
    "source_port",
    "model",
    "description",
    "usage",
];

const CONNECTION_HEADERS: &[&str] = &[
    "connection_id",
    "pc_id",
    "pc_name",
    "pc_ip_address",
    "cable_color",
    "cable_label",
    "switch_id",
    "switch_name",
    "switch_ip_address",
    "switch_port",
    "is_switch_port_up",
];

/// Per-hop column suffixes, repeated as `hop1_…` through `hop{MAX_HOPS}_…`.
const HOP_FIELDS: &[&str] = &[
    "patch_panel_id",
    "patch_panel_name",
    "patch_panel_location_name",
    "patch_panel_location_door_number",
    "patch_panel_row_in_rack",
    "patch_panel_rack_id",
    "patch_panel_rack_name",
    "patch_panel_port",
    "is_port_up",
    "cable_color",
    "cable_label",
];

type Rows = (Vec<String>, Vec<Vec<String>>);

/// Write `table` as CSV to `writer`. Returns the number of data rows.
pub async fn export_csv<W: io::Write>(engine: &Engine, table: Table, writer: W) -> Result<usize, TransferError> {
    let (headers, rows) = engine.read(|inv| rows_for(inv, table)).await?;
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&headers)?;
    for row in &rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    tracing::info!(table = %table, rows = rows.len(), "csv export");
    Ok(rows.len())
}

fn rows_for(inv: &Inventory, table: Table) -> Result<Rows, TransferError> {
    let plain = |h: &[&str]| h.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let rows = match table {
        Table::Locations => (
            plain(LOCATION_HEADERS),
            inv.locations
                .values()
                .map(|l| vec![l.id.to_string(), l.name.clone(), opt(&l.door_number), opt(&l.description)])
                .collect(),
        ),
        Table::Racks => (
            plain(RACK_HEADERS),
            inv.racks
                .values()
                .map(|r| {
                    let (loc_name, loc_door) = location_cols(inv, Some(r.location_id));
                    vec![
                        r.id.to_string(),
                        r.name.clone(),
                        r.location_id.to_string(),
                        loc_name,
                        loc_door,
                        opt(&r.description),
                        r.total_units.to_string(),
                        r.orientation.clone(),
                    ]
                })
                .collect(),
        ),
        Table::Pcs => (
            plain(PC_HEADERS),
            inv.pcs
                .values()
                .map(|pc| {
                    vec![
                        pc.id.to_string(),
                        pc.name.clone(),
                        opt(&pc.ip_address),
                        opt(&pc.username),
                        pc.in_domain.to_string(),
                        opt(&pc.operating_system),
                        opt(&pc.model),
                        opt(&pc.office),
                        opt(&pc.description),
                        pc.multi_port.to_string(),
                        pc.pc_type.clone(),
                        opt(&pc.usage),
                        opt(&pc.start_unit),
                        pc.units_occupied.to_string(),
                        opt(&pc.rack_id),
                        rack_name(inv, pc.rack_id),
                    ]
                })
                .collect(),
        ),
        Table::PatchPanels => (
            plain(PATCH_PANEL_HEADERS),
            inv.patch_panels
                .values()
                .map(|pp| {
                    let (loc_name, loc_door) = location_cols(inv, pp.location_id);
                    vec![
                        pp.id.to_string(),
                        pp.name.clone(),
                        opt(&pp.location_id),
                        loc_name,
                        loc_door,
                        opt(&pp.start_unit),
                        pp.units_occupied.to_string(),
                        opt(&pp.rack_id),
                        rack_name(inv, pp.rack_id),
                        pp.total_ports.to_string(),
                        opt(&pp.description),
                    ]
                })
                .collect(),
        ),
        Table::Switches => (
            plain(SWITCH_HEADERS),
            inv.switches
                .values()
                .map(|s| {
                    let (loc_name, loc_door) = location_cols(inv, s.location_id);
                    vec![
                        s.id.to_string(),
                        s.name.clone(),
                        opt(&s.ip_address),
                        opt(&s.location_id),
                        loc_name,
                        loc_door,
                        opt(&s.start_unit),
                        s.units_occupied.to_string(),
                        opt(&s.rack_id),
                        rack_name(inv, s.rack_id),
                        s.total_ports.to_string(),
                        opt(&s.source_port),
                        opt(&s.model),
                        opt(&s.description),
                        opt(&s.usage),
                    ]
                })
                .collect(),
        ),
        Table::Connections => (connection_headers(), inv.connections.values().map(|c| connection_row(inv, c)).collect()),
        other => return Err(TransferError::UnsupportedTable(other)),
    };
    Ok(rows)
}

pub(super) fn connection_headers() -> Vec<String> {
    let mut headers: Vec<String> = CONNECTION_HEADERS.iter().map(|s| s.to_string()).collect();
    for n in 1..=MAX_HOPS {
        headers.extend(HOP_FIELDS.iter().map(|f| format!("hop{n}_{f}")));
    }
    headers
}

fn connection_row(inv: &Inventory, c: &Connection) -> Vec<String> {
    let pc = inv.pcs.get(&c.pc_id);
    let switch = inv.switches.get(&c.switch_id);
    let mut row = vec![
        c.id.to_string(),
        c.pc_id.to_string(),
        pc.map(|p| p.name.clone()).unwrap_or_default(),
        pc.and_then(|p| p.ip_address.clone()).unwrap_or_default(),
        opt(&c.cable_color),
        opt(&c.cable_label),
        c.switch_id.to_string(),
        switch.map(|s| s.name.clone()).unwrap_or_default(),
        switch.and_then(|s| s.ip_address.clone()).unwrap_or_default(),
        c.switch_port.clone(),
        c.is_switch_port_up.to_string(),
    ];
    for n in 0..MAX_HOPS {
        match c.hops.get(n) {
            Some(hop) => {
                let pp = inv.patch_panels.get(&hop.patch_panel_id);
                let (loc_name, loc_door) = location_cols(inv, pp.and_then(|p| p.location_id));
                row.extend([
                    hop.patch_panel_id.to_string(),
                    pp.map(|p| p.name.clone()).unwrap_or_default(),
                    loc_name,
                    loc_door,
                    pp.map(|p| opt(&p.start_unit)).unwrap_or_default(),
                    pp.map(|p| opt(&p.rack_id)).unwrap_or_default(),
                    rack_name(inv, pp.and_then(|p| p.rack_id)),
                    hop.patch_panel_port.clone(),
                    hop.is_port_up.to_string(),
                    opt(&hop.cable_color),
                    opt(&hop.cable_label),
                ]);
            }
            None => row.extend(std::iter::repeat_n(String::new(), HOP_FIELDS.len())),
        }
    }
    row
}

fn opt<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn location_cols(inv: &Inventory, id: Option<Ulid>) -> (String, String) {
    match id.and_then(|id| inv.locations.get(&id)) {
        Some(l) => (l.name.clone(), opt(&l.door_number)),
        None => (String::new(), String::new()),
    }
}

fn rack_name(inv: &Inventory, id: Option<Ulid>) -> String {
    id.and_then(|id| inv.racks.get(&id)).map(|r| r.name.clone()).unwrap_or_default()
}
