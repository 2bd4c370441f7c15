use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::DEFAULT_RACK_UNITS;

/// Unix milliseconds.
pub type Ms = i64;

/// One rack unit index, 1-based.
pub type Unit = u32;

/// The only `pc_type` that claims rack space.
pub const SERVER_PC_TYPE: &str = "Server";
pub const DEFAULT_PC_TYPE: &str = "Workstation";
pub const DEFAULT_ORIENTATION: &str = "bottom-up";

/// Closed interval of rack units `[start, start + count - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpan {
    pub start: Unit,
    pub count: Unit,
}

impl UnitSpan {
    pub fn new(start: Unit, count: Unit) -> Self {
        debug_assert!(start >= 1 && count >= 1, "UnitSpan must start at 1 and cover a unit");
        Self { start, count }
    }

    /// Highest unit covered.
    pub fn end(&self) -> Unit {
        self.start.saturating_add(self.count).saturating_sub(1)
    }

    pub fn overlaps(&self, other: &UnitSpan) -> bool {
        self.start.max(other.start) <= self.end().min(other.end())
    }

    pub fn fits_within(&self, total_units: Unit) -> bool {
        self.end() <= total_units
    }

    pub fn contains(&self, unit: Unit) -> bool {
        self.start <= unit && unit <= self.end()
    }
}

impl fmt::Display for UnitSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 1 {
            write!(f, "unit {}", self.start)
        } else {
            write!(f, "units {}-{}", self.start, self.end())
        }
    }
}

/// The three populations that can be mounted in a rack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Switch,
    PatchPanel,
    Pc,
}

impl DeviceKind {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::Switch => "Switch",
            DeviceKind::PatchPanel => "Patch Panel",
            DeviceKind::Pc => "Server PC",
        }
    }
}

/// Devices whose ports can be claimed by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortOwner {
    Switch,
    PatchPanel,
}

impl PortOwner {
    pub fn label(&self) -> &'static str {
        match self {
            PortOwner::Switch => "Switch",
            PortOwner::PatchPanel => "Patch Panel",
        }
    }
}

/// Anything that may claim a contiguous run of units in a rack.
pub trait RackMounted {
    const KIND: DeviceKind;

    fn id(&self) -> Ulid;
    fn name(&self) -> &str;
    /// The rack and units claimed, or `None` when the device holds no rack space.
    fn placement(&self) -> Option<(Ulid, UnitSpan)>;
}

fn placement_of(rack_id: Option<Ulid>, start_unit: Option<Unit>, units: Unit) -> Option<(Ulid, UnitSpan)> {
    match (rack_id, start_unit) {
        (Some(rack_id), Some(start)) if start >= 1 && units >= 1 => {
            Some((rack_id, UnitSpan::new(start, units)))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: Ulid,
    pub name: String,
    pub door_number: Option<String>,
    pub description: Option<String>,
}

impl Location {
    pub fn new(id: Ulid, name: String) -> Self {
        Self { id, name, door_number: None, description: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rack {
    pub id: Ulid,
    pub name: String,
    pub location_id: Ulid,
    pub description: Option<String>,
    pub total_units: Unit,
    /// Display only.
    pub orientation: String,
}

impl Rack {
    pub fn new(id: Ulid, name: String, location_id: Ulid) -> Self {
        Self {
            id,
            name,
            location_id,
            description: None,
            total_units: DEFAULT_RACK_UNITS,
            orientation: DEFAULT_ORIENTATION.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pc {
    pub id: Ulid,
    pub name: String,
    pub ip_address: Option<String>,
    pub username: Option<String>,
    pub in_domain: bool,
    pub operating_system: Option<String>,
    pub model: Option<String>,
    pub office: Option<String>,
    pub description: Option<String>,
    pub multi_port: bool,
    #[serde(rename = "type")]
    pub pc_type: String,
    pub usage: Option<String>,
    pub rack_id: Option<Ulid>,
    pub start_unit: Option<Unit>,
    pub units_occupied: Unit,
}

impl Pc {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            ip_address: None,
            username: None,
            in_domain: false,
            operating_system: None,
            model: None,
            office: None,
            description: None,
            multi_port: false,
            pc_type: DEFAULT_PC_TYPE.into(),
            usage: None,
            rack_id: None,
            start_unit: None,
            units_occupied: 1,
        }
    }

    pub fn is_server(&self) -> bool {
        self.pc_type == SERVER_PC_TYPE
    }
}

impl RackMounted for Pc {
    const KIND: DeviceKind = DeviceKind::Pc;

    fn id(&self) -> Ulid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn placement(&self) -> Option<(Ulid, UnitSpan)> {
        if !self.is_server() {
            return None;
        }
        placement_of(self.rack_id, self.start_unit, self.units_occupied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchPanel {
    pub id: Ulid,
    pub name: String,
    pub location_id: Option<Ulid>,
    pub rack_id: Option<Ulid>,
    pub start_unit: Option<Unit>,
    pub units_occupied: Unit,
    pub total_ports: u32,
    pub description: Option<String>,
}

impl PatchPanel {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            location_id: None,
            rack_id: None,
            start_unit: None,
            units_occupied: 1,
            total_ports: 1,
            description: None,
        }
    }
}

impl RackMounted for PatchPanel {
    const KIND: DeviceKind = DeviceKind::PatchPanel;

    fn id(&self) -> Ulid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn placement(&self) -> Option<(Ulid, UnitSpan)> {
        placement_of(self.rack_id, self.start_unit, self.units_occupied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    pub id: Ulid,
    pub name: String,
    pub ip_address: Option<String>,
    pub location_id: Option<Ulid>,
    pub rack_id: Option<Ulid>,
    pub start_unit: Option<Unit>,
    pub units_occupied: Unit,
    pub total_ports: u32,
    pub source_port: Option<String>,
    pub model: Option<String>,
    pub description: Option<String>,
    pub usage: Option<String>,
}

impl Switch {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            ip_address: None,
            location_id: None,
            rack_id: None,
            start_unit: None,
            units_occupied: 1,
            total_ports: 1,
            source_port: None,
            model: None,
            description: None,
            usage: None,
        }
    }
}

impl RackMounted for Switch {
    const KIND: DeviceKind = DeviceKind::Switch;

    fn id(&self) -> Ulid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn placement(&self) -> Option<(Ulid, UnitSpan)> {
        placement_of(self.rack_id, self.start_unit, self.units_occupied)
    }
}

fn default_true() -> bool {
    true
}

/// One patch-panel port traversed by a connection. Order in `Connection::hops` is the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub patch_panel_id: Ulid,
    pub patch_panel_port: String,
    #[serde(default = "default_true")]
    pub is_port_up: bool,
    #[serde(default)]
    pub cable_color: Option<String>,
    #[serde(default)]
    pub cable_label: Option<String>,
}

impl Hop {
    pub fn new(patch_panel_id: Ulid, patch_panel_port: impl Into<String>) -> Self {
        Self {
            patch_panel_id,
            patch_panel_port: patch_panel_port.into(),
            is_port_up: true,
            cable_color: None,
            cable_label: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: Ulid,
    pub pc_id: Ulid,
    pub switch_id: Ulid,
    pub switch_port: String,
    pub is_switch_port_up: bool,
    pub cable_color: Option<String>,
    pub cable_label: Option<String>,
    pub hops: Vec<Hop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfTemplate {
    pub id: Ulid,
    pub original_filename: String,
    pub stored_filename: String,
    pub uploaded_at: Ms,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub default_pdf_id: Option<Ulid>,
}

// ── Partial updates ──────────────────────────────────────────
//
// `None` keeps the stored value, `Some(None)` clears a nullable column.
// Numeric fields arrive unvalidated; the engine range-checks them.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationPatch {
    pub name: Option<String>,
    pub door_number: Option<Option<String>>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RackPatch {
    pub name: Option<String>,
    pub location_id: Option<Ulid>,
    pub description: Option<Option<String>>,
    pub total_units: Option<i64>,
    pub orientation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PcPatch {
    pub name: Option<String>,
    pub ip_address: Option<Option<String>>,
    pub username: Option<Option<String>>,
    pub in_domain: Option<bool>,
    pub operating_system: Option<Option<String>>,
    pub model: Option<Option<String>>,
    pub office: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub multi_port: Option<bool>,
    pub pc_type: Option<String>,
    pub usage: Option<Option<String>>,
    pub rack_id: Option<Option<Ulid>>,
    pub start_unit: Option<Option<i64>>,
    pub units_occupied: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchPanelPatch {
    pub name: Option<String>,
    pub location_id: Option<Option<Ulid>>,
    pub rack_id: Option<Option<Ulid>>,
    pub start_unit: Option<Option<i64>>,
    pub units_occupied: Option<i64>,
    pub total_ports: Option<i64>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwitchPatch {
    pub name: Option<String>,
    pub ip_address: Option<Option<String>>,
    pub location_id: Option<Option<Ulid>>,
    pub rack_id: Option<Option<Ulid>>,
    pub start_unit: Option<Option<i64>>,
    pub units_occupied: Option<i64>,
    pub total_ports: Option<i64>,
    pub source_port: Option<Option<String>>,
    pub model: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub usage: Option<Option<String>>,
}

/// `hops: Some(list)` replaces the whole ordered hop list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionPatch {
    pub pc_id: Option<Ulid>,
    pub switch_id: Option<Ulid>,
    pub switch_port: Option<String>,
    pub is_switch_port_up: Option<bool>,
    pub cable_color: Option<Option<String>>,
    pub cable_label: Option<Option<String>>,
    pub hops: Option<Vec<Hop>>,
}

// ── Read-side views ──────────────────────────────────────────

/// State of one port on a switch or patch panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortStatus {
    pub port: String,
    pub connection_id: Option<Ulid>,
    pub connected_by_pc: Option<String>,
    pub is_up: Option<bool>,
}

/// One unit of a rack and whatever is mounted across it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RackSlot {
    pub unit: Unit,
    pub kind: Option<DeviceKind>,
    pub device_id: Option<Ulid>,
    pub device_name: Option<String>,
}

/// The event types, flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LocationSaved(Location),
    LocationDeleted { id: Ulid },
    RackSaved(Rack),
    RackDeleted { id: Ulid },
    PcSaved(Pc),
    PcDeleted { id: Ulid },
    PatchPanelSaved(PatchPanel),
    PatchPanelDeleted { id: Ulid },
    SwitchSaved(Switch),
    SwitchDeleted { id: Ulid },
    ConnectionSaved(Connection),
    ConnectionDeleted { id: Ulid },
    PdfTemplateAdded(PdfTemplate),
    PdfTemplateRemoved { id: Ulid },
    DefaultPdfSet { id: Option<Ulid> },
}

/// Every table reachable from SQL, CSV transfer or the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Locations,
    Racks,
    Pcs,
    PatchPanels,
    Switches,
    Connections,
    ConnectionHops,
    SwitchPorts,
    PatchPanelPorts,
    RackUnits,
    AvailablePcs,
    PdfTemplates,
    Settings,
    AuditLog,
}

impl Table {
    pub fn from_name(name: &str) -> Option<Table> {
        Some(match name {
            "locations" => Table::Locations,
            "racks" => Table::Racks,
            "pcs" => Table::Pcs,
            "patch_panels" => Table::PatchPanels,
            "switches" => Table::Switches,
            "connections" => Table::Connections,
            "connection_hops" => Table::ConnectionHops,
            "switch_ports" => Table::SwitchPorts,
            "patch_panel_ports" => Table::PatchPanelPorts,
            "rack_units" => Table::RackUnits,
            "available_pcs" => Table::AvailablePcs,
            "pdf_templates" => Table::PdfTemplates,
            "settings" => Table::Settings,
            "audit_log" => Table::AuditLog,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Locations => "locations",
            Table::Racks => "racks",
            Table::Pcs => "pcs",
            Table::PatchPanels => "patch_panels",
            Table::Switches => "switches",
            Table::Connections => "connections",
            Table::ConnectionHops => "connection_hops",
            Table::SwitchPorts => "switch_ports",
            Table::PatchPanelPorts => "patch_panel_ports",
            Table::RackUnits => "rack_units",
            Table::AvailablePcs => "available_pcs",
            Table::PdfTemplates => "pdf_templates",
            Table::Settings => "settings",
            Table::AuditLog => "audit_log",
        }
    }

    /// Derived per-owner views; they need a filter naming the owner.
    pub fn is_view(&self) -> bool {
        matches!(
            self,
            Table::ConnectionHops | Table::SwitchPorts | Table::PatchPanelPorts | Table::RackUnits
        )
    }

    /// Tables that can be moved in and out as CSV.
    pub fn is_transferable(&self) -> bool {
        matches!(
            self,
            Table::Locations
                | Table::Racks
                | Table::Pcs
                | Table::PatchPanels
                | Table::Switches
                | Table::Connections
        )
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_span_end_is_inclusive() {
        let s = UnitSpan::new(5, 2);
        assert_eq!(s.end(), 6);
        assert!(s.contains(5));
        assert!(s.contains(6));
        assert!(!s.contains(7));
    }

    #[test]
    fn unit_span_overlap_is_closed() {
        let a = UnitSpan::new(1, 2); // 1-2
        let b = UnitSpan::new(2, 2); // 2-3
        let c = UnitSpan::new(3, 1); // 3
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent units do not collide
        assert!(b.overlaps(&c));
    }

    #[test]
    fn unit_span_fits_within() {
        let s = UnitSpan::new(5, 2);
        assert!(s.fits_within(6));
        assert!(!s.fits_within(5));
    }

    #[test]
    fn unit_span_display() {
        assert_eq!(UnitSpan::new(1, 2).to_string(), "units 1-2");
        assert_eq!(UnitSpan::new(7, 1).to_string(), "unit 7");
    }

    #[test]
    fn workstation_never_claims_rack_space() {
        let mut pc = Pc::new(Ulid::new(), "ws-1".into());
        pc.rack_id = Some(Ulid::new());
        pc.start_unit = Some(3);
        assert_eq!(pc.placement(), None);

        pc.pc_type = SERVER_PC_TYPE.into();
        assert_eq!(pc.placement().map(|(_, s)| s), Some(UnitSpan::new(3, 1)));
    }

    #[test]
    fn unmounted_switch_has_no_placement() {
        let mut sw = Switch::new(Ulid::new(), "sw".into());
        sw.rack_id = Some(Ulid::new());
        assert_eq!(sw.placement(), None);
        sw.start_unit = Some(1);
        assert!(sw.placement().is_some());
    }

    #[test]
    fn hop_json_defaults() {
        let id = Ulid::new();
        let json = format!(r#"{{"patch_panel_id":"{id}","patch_panel_port":"12"}}"#);
        let hop: Hop = serde_json::from_str(&json).unwrap();
        assert_eq!(hop, Hop::new(id, "12"));
    }

    #[test]
    fn pc_serializes_type_column() {
        let pc = Pc::new(Ulid::new(), "ws".into());
        let v = serde_json::to_value(&pc).unwrap();
        assert_eq!(v["type"], "Workstation");
    }

    #[test]
    fn table_names_round_trip() {
        for t in [Table::Switches, Table::PatchPanelPorts, Table::AuditLog] {
            assert_eq!(Table::from_name(t.as_str()), Some(t));
        }
        assert_eq!(Table::from_name("bookings"), None);
    }
}
