use std::collections::HashSet;

use ulid::Ulid;

use crate::audit::image;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{is_port_occupied, is_rack_range_occupied, now_ms, would_shrink_conflict, Occupancy};
use super::store::Inventory;
use super::{validate, Engine, EngineError};

/// Count an occupancy rejection on its way out.
fn rejected(err: EngineError) -> EngineError {
    if let Some(kind) = err.conflict_kind() {
        metrics::counter!(observability::OCCUPANCY_CONFLICTS_TOTAL, "kind" => kind).increment(1);
        tracing::debug!("rejected: {err}");
    }
    err
}

fn required<T>(field: &'static str, value: Option<T>) -> Result<T, EngineError> {
    value.ok_or_else(|| EngineError::invalid(field, "is required"))
}

fn require_location(inv: &Inventory, id: Ulid) -> Result<(), EngineError> {
    if inv.locations.contains_key(&id) {
        Ok(())
    } else {
        Err(EngineError::invalid("location_id", format!("location {id} does not exist")))
    }
}

fn unique_name<'a>(
    kind: &'static str,
    name: &str,
    id: Ulid,
    mut others: impl Iterator<Item = (Ulid, &'a str)>,
) -> Result<(), EngineError> {
    if others.any(|(other, n)| other != id && n == name) {
        Err(EngineError::Duplicate { kind, name: name.to_string() })
    } else {
        Ok(())
    }
}

/// Rack coordinates as stored on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mount {
    rack_id: Option<Ulid>,
    start_unit: Option<Unit>,
    units: Unit,
}

impl Mount {
    fn of_switch(s: &Switch) -> Self {
        Self { rack_id: s.rack_id, start_unit: s.start_unit, units: s.units_occupied }
    }

    fn of_panel(p: &PatchPanel) -> Self {
        Self { rack_id: p.rack_id, start_unit: p.start_unit, units: p.units_occupied }
    }

    fn of_pc(p: &Pc) -> Self {
        Self { rack_id: p.rack_id, start_unit: p.start_unit, units: p.units_occupied }
    }
}

/// The rack must exist. When the placement changed, the span must fit the rack
/// and must not overlap any other mounted device.
fn check_mount(
    inv: &Inventory,
    kind: DeviceKind,
    device_id: Ulid,
    mount: Mount,
    changed: bool,
) -> Result<(), EngineError> {
    let Some(rack_id) = mount.rack_id else {
        return Ok(());
    };
    let rack = inv
        .racks
        .get(&rack_id)
        .ok_or_else(|| EngineError::invalid("rack_id", format!("rack {rack_id} does not exist")))?;
    if !changed {
        return Ok(());
    }
    if let Some(start) = mount.start_unit {
        let span = UnitSpan::new(start, mount.units);
        if !span.fits_within(rack.total_units) {
            return Err(EngineError::invalid(
                "start_unit",
                format!("{span} out of range for rack '{}' ({}U)", rack.name, rack.total_units),
            ));
        }
    }
    match is_rack_range_occupied(inv, Some(rack_id), mount.start_unit, Some(mount.units), kind, Some(device_id)) {
        Occupancy::Free => Ok(()),
        Occupancy::Occupied(holder) => Err(rejected(EngineError::RackUnitsOccupied { holder })),
    }
}

/// Everything a connection must satisfy before commit. `previous` is the stored
/// version on update; unchanged endpoints are not re-probed. `hops_replaced`
/// forces every hop to be re-validated against the rest of the system.
fn check_connection(
    inv: &Inventory,
    conn: &Connection,
    previous: Option<&Connection>,
    hops_replaced: bool,
) -> Result<(), EngineError> {
    validate::port_label("switch_port", &conn.switch_port)?;
    if conn.hops.len() > MAX_HOPS {
        return Err(EngineError::LimitExceeded("too many hops in one connection"));
    }
    let pc = inv
        .pcs
        .get(&conn.pc_id)
        .ok_or_else(|| EngineError::invalid("pc_id", format!("PC {} does not exist", conn.pc_id)))?;
    let switch = inv.switches.get(&conn.switch_id).ok_or_else(|| {
        EngineError::invalid("switch_id", format!("switch {} does not exist", conn.switch_id))
    })?;
    let mut seen = HashSet::new();
    for (seq, hop) in conn.hops.iter().enumerate() {
        validate::port_label("patch_panel_port", &hop.patch_panel_port)?;
        if !inv.patch_panels.contains_key(&hop.patch_panel_id) {
            return Err(EngineError::invalid(
                "hops",
                format!("hop {}: patch panel {} does not exist", seq + 1, hop.patch_panel_id),
            ));
        }
        if !seen.insert((hop.patch_panel_id, hop.patch_panel_port.as_str())) {
            return Err(EngineError::invalid(
                "hops",
                format!("hop {}: port '{}' is listed twice", seq + 1, hop.patch_panel_port),
            ));
        }
    }

    let pc_changed = previous.is_none_or(|p| p.pc_id != conn.pc_id);
    if pc_changed && !pc.multi_port && inv.connections_of_pc(pc.id).any(|c| c.id != conn.id) {
        return Err(rejected(EngineError::PcAlreadyConnected { pc_name: pc.name.clone() }));
    }

    let port_changed = previous
        .is_none_or(|p| p.switch_id != conn.switch_id || p.switch_port != conn.switch_port);
    if port_changed
        && let Occupancy::Occupied(pc_name) =
            is_port_occupied(inv, PortOwner::Switch, switch.id, &conn.switch_port, Some(conn.id))
    {
        return Err(rejected(EngineError::PortOccupied {
            owner: PortOwner::Switch,
            device: switch.name.clone(),
            port: conn.switch_port.clone(),
            pc_name,
        }));
    }

    if previous.is_none() || hops_replaced {
        for hop in &conn.hops {
            let occupancy = is_port_occupied(
                inv,
                PortOwner::PatchPanel,
                hop.patch_panel_id,
                &hop.patch_panel_port,
                Some(conn.id),
            );
            if let Occupancy::Occupied(pc_name) = occupancy {
                let device = inv
                    .patch_panels
                    .get(&hop.patch_panel_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                return Err(rejected(EngineError::PortOccupied {
                    owner: PortOwner::PatchPanel,
                    device,
                    port: hop.patch_panel_port.clone(),
                    pc_name,
                }));
            }
        }
    }
    Ok(())
}

impl Engine {
    // ── Locations ────────────────────────────────────────────

    pub async fn create_location(&self, id: Ulid, patch: LocationPatch) -> Result<Location, EngineError> {
        let mut inv = self.inventory.write().await;
        if inv.locations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut loc = Location::new(id, String::new());
        patch.apply_to(&mut loc);
        loc.name = validate::name("name", &loc.name)?;
        unique_name("location", &loc.name, id, inv.locations.values().map(|l| (l.id, l.name.as_str())))?;

        self.commit(&mut inv, Event::LocationSaved(loc.clone()), None).await?;
        Ok(loc)
    }

    pub async fn update_location(&self, id: Ulid, patch: LocationPatch) -> Result<Location, EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv
            .locations
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound { kind: "location", id })?;
        let mut next = current.clone();
        patch.apply_to(&mut next);
        next.name = validate::name("name", &next.name)?;
        unique_name("location", &next.name, id, inv.locations.values().map(|l| (l.id, l.name.as_str())))?;

        self.commit(&mut inv, Event::LocationSaved(next.clone()), Some(image(&current))).await?;
        Ok(next)
    }

    pub async fn delete_location(&self, id: Ulid) -> Result<(), EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv.locations.get(&id).ok_or(EngineError::NotFound { kind: "location", id })?;
        let before = image(current);
        let dependents = inv.location_dependents(id);
        if !dependents.is_empty() {
            return Err(EngineError::InUse { kind: "location", id, by: dependents.join(", ") });
        }
        self.commit(&mut inv, Event::LocationDeleted { id }, Some(before)).await
    }

    // ── Racks ────────────────────────────────────────────────

    pub async fn create_rack(&self, id: Ulid, mut patch: RackPatch) -> Result<Rack, EngineError> {
        let mut inv = self.inventory.write().await;
        if inv.racks.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let location_id = required("location_id", patch.location_id.take())?;
        let mut rack = Rack::new(id, String::new(), location_id);
        patch.apply_to(&mut rack)?;
        rack.name = validate::name("name", &rack.name)?;
        require_location(&inv, location_id)?;
        unique_rack_name(&inv, &rack)?;

        self.commit(&mut inv, Event::RackSaved(rack.clone()), None).await?;
        Ok(rack)
    }

    /// Lowering `total_units` is refused while any mounted device reaches past the new top.
    pub async fn update_rack(&self, id: Ulid, patch: RackPatch) -> Result<Rack, EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv.racks.get(&id).cloned().ok_or(EngineError::NotFound { kind: "rack", id })?;
        let mut next = current.clone();
        patch.apply_to(&mut next)?;
        next.name = validate::name("name", &next.name)?;
        if next.location_id != current.location_id {
            require_location(&inv, next.location_id)?;
        }
        unique_rack_name(&inv, &next)?;
        if next.total_units < current.total_units
            && let Occupancy::Occupied(holder) = would_shrink_conflict(&inv, id, next.total_units)
        {
            return Err(rejected(EngineError::RackShrinkConflict { total_units: next.total_units, holder }));
        }

        self.commit(&mut inv, Event::RackSaved(next.clone()), Some(image(&current))).await?;
        Ok(next)
    }

    pub async fn delete_rack(&self, id: Ulid) -> Result<(), EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv.racks.get(&id).ok_or(EngineError::NotFound { kind: "rack", id })?;
        let before = image(current);
        let dependents = inv.rack_dependents(id);
        if !dependents.is_empty() {
            return Err(EngineError::InUse { kind: "rack", id, by: dependents.join(", ") });
        }
        self.commit(&mut inv, Event::RackDeleted { id }, Some(before)).await
    }

    // ── PCs ──────────────────────────────────────────────────

    pub async fn create_pc(&self, id: Ulid, patch: PcPatch) -> Result<Pc, EngineError> {
        let mut inv = self.inventory.write().await;
        if inv.pcs.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut pc = Pc::new(id, String::new());
        patch.apply_to(&mut pc)?;
        pc.name = validate::name("name", &pc.name)?;
        unique_name("PC", &pc.name, id, inv.pcs.values().map(|p| (p.id, p.name.as_str())))?;
        if pc.is_server() {
            check_mount(&inv, DeviceKind::Pc, id, Mount::of_pc(&pc), true)?;
        }

        self.commit(&mut inv, Event::PcSaved(pc.clone()), None).await?;
        Ok(pc)
    }

    /// A PC becoming a server always re-validates its placement; a PC leaving
    /// server type drops its rack fields without any check.
    pub async fn update_pc(&self, id: Ulid, patch: PcPatch) -> Result<Pc, EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv.pcs.get(&id).cloned().ok_or(EngineError::NotFound { kind: "PC", id })?;
        let mut next = current.clone();
        patch.apply_to(&mut next)?;
        next.name = validate::name("name", &next.name)?;
        unique_name("PC", &next.name, id, inv.pcs.values().map(|p| (p.id, p.name.as_str())))?;
        if next.is_server() {
            let changed = !current.is_server() || Mount::of_pc(&current) != Mount::of_pc(&next);
            check_mount(&inv, DeviceKind::Pc, id, Mount::of_pc(&next), changed)?;
        }
        if current.multi_port && !next.multi_port && inv.connections_of_pc(id).count() > 1 {
            return Err(rejected(EngineError::PcAlreadyConnected { pc_name: next.name.clone() }));
        }

        self.commit(&mut inv, Event::PcSaved(next.clone()), Some(image(&current))).await?;
        Ok(next)
    }

    pub async fn delete_pc(&self, id: Ulid) -> Result<(), EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv.pcs.get(&id).ok_or(EngineError::NotFound { kind: "PC", id })?;
        let before = image(current);
        let connections = inv.connections_of_pc(id).count();
        if connections > 0 {
            return Err(EngineError::InUse { kind: "PC", id, by: format!("{connections} connection(s)") });
        }
        self.commit(&mut inv, Event::PcDeleted { id }, Some(before)).await
    }

    // ── Patch panels ─────────────────────────────────────────

    pub async fn create_patch_panel(&self, id: Ulid, patch: PatchPanelPatch) -> Result<PatchPanel, EngineError> {
        let mut inv = self.inventory.write().await;
        if inv.patch_panels.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut pp = PatchPanel::new(id, String::new());
        patch.apply_to(&mut pp)?;
        pp.name = validate::name("name", &pp.name)?;
        unique_name("patch panel", &pp.name, id, inv.patch_panels.values().map(|p| (p.id, p.name.as_str())))?;
        if let Some(location_id) = pp.location_id {
            require_location(&inv, location_id)?;
        }
        check_mount(&inv, DeviceKind::PatchPanel, id, Mount::of_panel(&pp), true)?;

        self.commit(&mut inv, Event::PatchPanelSaved(pp.clone()), None).await?;
        Ok(pp)
    }

    pub async fn update_patch_panel(&self, id: Ulid, patch: PatchPanelPatch) -> Result<PatchPanel, EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv
            .patch_panels
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound { kind: "patch panel", id })?;
        let mut next = current.clone();
        patch.apply_to(&mut next)?;
        next.name = validate::name("name", &next.name)?;
        unique_name("patch panel", &next.name, id, inv.patch_panels.values().map(|p| (p.id, p.name.as_str())))?;
        if let Some(location_id) = next.location_id
            && next.location_id != current.location_id
        {
            require_location(&inv, location_id)?;
        }
        let changed = Mount::of_panel(&current) != Mount::of_panel(&next);
        check_mount(&inv, DeviceKind::PatchPanel, id, Mount::of_panel(&next), changed)?;

        self.commit(&mut inv, Event::PatchPanelSaved(next.clone()), Some(image(&current))).await?;
        Ok(next)
    }

    pub async fn delete_patch_panel(&self, id: Ulid) -> Result<(), EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv.patch_panels.get(&id).ok_or(EngineError::NotFound { kind: "patch panel", id })?;
        let before = image(current);
        let hops = inv.hops().filter(|(_, _, h)| h.patch_panel_id == id).count();
        if hops > 0 {
            return Err(EngineError::InUse { kind: "patch panel", id, by: format!("{hops} connection hop(s)") });
        }
        self.commit(&mut inv, Event::PatchPanelDeleted { id }, Some(before)).await
    }

    // ── Switches ─────────────────────────────────────────────

    pub async fn create_switch(&self, id: Ulid, patch: SwitchPatch) -> Result<Switch, EngineError> {
        let mut inv = self.inventory.write().await;
        if inv.switches.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut sw = Switch::new(id, String::new());
        patch.apply_to(&mut sw)?;
        sw.name = validate::name("name", &sw.name)?;
        unique_name("switch", &sw.name, id, inv.switches.values().map(|s| (s.id, s.name.as_str())))?;
        if let Some(location_id) = sw.location_id {
            require_location(&inv, location_id)?;
        }
        check_mount(&inv, DeviceKind::Switch, id, Mount::of_switch(&sw), true)?;

        self.commit(&mut inv, Event::SwitchSaved(sw.clone()), None).await?;
        Ok(sw)
    }

    pub async fn update_switch(&self, id: Ulid, patch: SwitchPatch) -> Result<Switch, EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv.switches.get(&id).cloned().ok_or(EngineError::NotFound { kind: "switch", id })?;
        let mut next = current.clone();
        patch.apply_to(&mut next)?;
        next.name = validate::name("name", &next.name)?;
        unique_name("switch", &next.name, id, inv.switches.values().map(|s| (s.id, s.name.as_str())))?;
        if let Some(location_id) = next.location_id
            && next.location_id != current.location_id
        {
            require_location(&inv, location_id)?;
        }
        let changed = Mount::of_switch(&current) != Mount::of_switch(&next);
        check_mount(&inv, DeviceKind::Switch, id, Mount::of_switch(&next), changed)?;

        self.commit(&mut inv, Event::SwitchSaved(next.clone()), Some(image(&current))).await?;
        Ok(next)
    }

    pub async fn delete_switch(&self, id: Ulid) -> Result<(), EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv.switches.get(&id).ok_or(EngineError::NotFound { kind: "switch", id })?;
        let before = image(current);
        let connections = inv.connections.values().filter(|c| c.switch_id == id).count();
        if connections > 0 {
            return Err(EngineError::InUse { kind: "switch", id, by: format!("{connections} connection(s)") });
        }
        self.commit(&mut inv, Event::SwitchDeleted { id }, Some(before)).await
    }

    // ── Connections ──────────────────────────────────────────

    /// The connection and all of its hops commit as one event, or not at all.
    pub async fn create_connection(&self, id: Ulid, patch: ConnectionPatch) -> Result<Connection, EngineError> {
        let mut inv = self.inventory.write().await;
        if inv.connections.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let conn = Connection {
            id,
            pc_id: required("pc_id", patch.pc_id)?,
            switch_id: required("switch_id", patch.switch_id)?,
            switch_port: required("switch_port", patch.switch_port)?,
            is_switch_port_up: patch.is_switch_port_up.unwrap_or(true),
            cable_color: patch.cable_color.flatten(),
            cable_label: patch.cable_label.flatten(),
            hops: patch.hops.unwrap_or_default(),
        };
        check_connection(&inv, &conn, None, true)?;

        self.commit(&mut inv, Event::ConnectionSaved(conn.clone()), None).await?;
        Ok(conn)
    }

    /// A supplied hop list replaces the stored one wholesale.
    pub async fn update_connection(&self, id: Ulid, patch: ConnectionPatch) -> Result<Connection, EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv
            .connections
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound { kind: "connection", id })?;
        let mut next = current.clone();
        if let Some(v) = patch.pc_id {
            next.pc_id = v;
        }
        if let Some(v) = patch.switch_id {
            next.switch_id = v;
        }
        if let Some(v) = patch.switch_port {
            next.switch_port = v;
        }
        if let Some(v) = patch.is_switch_port_up {
            next.is_switch_port_up = v;
        }
        if let Some(v) = patch.cable_color {
            next.cable_color = v;
        }
        if let Some(v) = patch.cable_label {
            next.cable_label = v;
        }
        let hops_replaced = patch.hops.is_some();
        if let Some(hops) = patch.hops {
            next.hops = hops;
        }
        check_connection(&inv, &next, Some(&current), hops_replaced)?;

        self.commit(&mut inv, Event::ConnectionSaved(next.clone()), Some(image(&current))).await?;
        Ok(next)
    }

    pub async fn delete_connection(&self, id: Ulid) -> Result<(), EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv.connections.get(&id).ok_or(EngineError::NotFound { kind: "connection", id })?;
        let before = image(current);
        self.commit(&mut inv, Event::ConnectionDeleted { id }, Some(before)).await
    }

    // ── PDF templates & settings ─────────────────────────────

    /// Register an uploaded template. Storage of the file itself happens elsewhere
    /// under `stored_filename`.
    pub async fn add_pdf_template(&self, id: Ulid, original_filename: &str) -> Result<PdfTemplate, EngineError> {
        let mut inv = self.inventory.write().await;
        if inv.pdf_templates.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let original_filename = validate::name("original_filename", original_filename)?;
        let is_pdf = original_filename
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            return Err(EngineError::invalid("original_filename", "only .pdf files are allowed"));
        }
        if inv.pdf_templates.len() >= MAX_PDF_TEMPLATES {
            return Err(EngineError::LimitExceeded("too many PDF templates"));
        }
        let template = PdfTemplate {
            id,
            original_filename,
            stored_filename: format!("{}.pdf", id.to_string().to_lowercase()),
            uploaded_at: now_ms(),
        };

        self.commit(&mut inv, Event::PdfTemplateAdded(template.clone()), None).await?;
        Ok(template)
    }

    pub async fn remove_pdf_template(&self, id: Ulid) -> Result<(), EngineError> {
        let mut inv = self.inventory.write().await;
        let current = inv.pdf_templates.get(&id).ok_or(EngineError::NotFound { kind: "PDF template", id })?;
        let before = image(current);
        if inv.settings.default_pdf_id == Some(id) {
            return Err(EngineError::DefaultTemplate(id));
        }
        self.commit(&mut inv, Event::PdfTemplateRemoved { id }, Some(before)).await
    }

    pub async fn set_default_pdf(&self, id: Option<Ulid>) -> Result<Settings, EngineError> {
        let mut inv = self.inventory.write().await;
        if let Some(id) = id
            && !inv.pdf_templates.contains_key(&id)
        {
            return Err(EngineError::invalid(
                "default_pdf_id",
                format!("PDF template {id} does not exist"),
            ));
        }
        let before = image(&inv.settings);
        self.commit(&mut inv, Event::DefaultPdfSet { id }, Some(before)).await?;
        Ok(inv.settings.clone())
    }
}

fn unique_rack_name(inv: &Inventory, rack: &Rack) -> Result<(), EngineError> {
    let taken = inv
        .racks
        .values()
        .any(|r| r.id != rack.id && r.location_id == rack.location_id && r.name == rack.name);
    if taken {
        Err(EngineError::Duplicate { kind: "rack", name: rack.name.clone() })
    } else {
        Ok(())
    }
}
