use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::store::Inventory;
use super::{Engine, EngineError};

/// Ports `1..=total_ports` with whatever claims each label.
fn port_rows<'a>(
    inv: &'a Inventory,
    total_ports: u32,
    claims: impl Iterator<Item = (&'a str, &'a Connection, bool)>,
) -> Vec<PortStatus> {
    let claimed: HashMap<&str, (&Connection, bool)> =
        claims.map(|(port, conn, up)| (port, (conn, up))).collect();
    (1..=total_ports)
        .map(|n| {
            let port = n.to_string();
            match claimed.get(port.as_str()) {
                Some((conn, up)) => PortStatus {
                    connection_id: Some(conn.id),
                    connected_by_pc: Some(inv.pc_name(conn.pc_id).to_string()),
                    is_up: Some(*up),
                    port,
                },
                None => PortStatus { port, connection_id: None, connected_by_pc: None, is_up: None },
            }
        })
        .collect()
}

impl Engine {
    /// Run `f` against a consistent view of the inventory.
    pub async fn read<R>(&self, f: impl FnOnce(&Inventory) -> R) -> R {
        let inv = self.inventory.read().await;
        f(&inv)
    }

    pub async fn list_locations(&self) -> Vec<Location> {
        self.read(|inv| inv.locations.values().cloned().collect()).await
    }

    pub async fn list_racks(&self) -> Vec<Rack> {
        self.read(|inv| inv.racks.values().cloned().collect()).await
    }

    pub async fn list_pcs(&self) -> Vec<Pc> {
        self.read(|inv| inv.pcs.values().cloned().collect()).await
    }

    pub async fn list_patch_panels(&self) -> Vec<PatchPanel> {
        self.read(|inv| inv.patch_panels.values().cloned().collect()).await
    }

    pub async fn list_switches(&self) -> Vec<Switch> {
        self.read(|inv| inv.switches.values().cloned().collect()).await
    }

    pub async fn list_connections(&self) -> Vec<Connection> {
        self.read(|inv| inv.connections.values().cloned().collect()).await
    }

    pub async fn list_pdf_templates(&self) -> Vec<PdfTemplate> {
        self.read(|inv| inv.pdf_templates.values().cloned().collect()).await
    }

    pub async fn settings(&self) -> Settings {
        self.read(|inv| inv.settings.clone()).await
    }

    pub async fn get_location(&self, id: Ulid) -> Result<Location, EngineError> {
        self.read(|inv| inv.locations.get(&id).cloned())
            .await
            .ok_or(EngineError::NotFound { kind: "location", id })
    }

    pub async fn get_rack(&self, id: Ulid) -> Result<Rack, EngineError> {
        self.read(|inv| inv.racks.get(&id).cloned())
            .await
            .ok_or(EngineError::NotFound { kind: "rack", id })
    }

    pub async fn get_pc(&self, id: Ulid) -> Result<Pc, EngineError> {
        self.read(|inv| inv.pcs.get(&id).cloned())
            .await
            .ok_or(EngineError::NotFound { kind: "PC", id })
    }

    pub async fn get_patch_panel(&self, id: Ulid) -> Result<PatchPanel, EngineError> {
        self.read(|inv| inv.patch_panels.get(&id).cloned())
            .await
            .ok_or(EngineError::NotFound { kind: "patch panel", id })
    }

    pub async fn get_switch(&self, id: Ulid) -> Result<Switch, EngineError> {
        self.read(|inv| inv.switches.get(&id).cloned())
            .await
            .ok_or(EngineError::NotFound { kind: "switch", id })
    }

    pub async fn get_connection(&self, id: Ulid) -> Result<Connection, EngineError> {
        self.read(|inv| inv.connections.get(&id).cloned())
            .await
            .ok_or(EngineError::NotFound { kind: "connection", id })
    }

    pub async fn connection_hops(&self, id: Ulid) -> Result<Vec<Hop>, EngineError> {
        Ok(self.get_connection(id).await?.hops)
    }

    pub async fn switch_port_status(&self, switch_id: Ulid) -> Result<Vec<PortStatus>, EngineError> {
        self.read(|inv| {
            let switch = inv
                .switches
                .get(&switch_id)
                .ok_or(EngineError::NotFound { kind: "switch", id: switch_id })?;
            let claims = inv
                .connections
                .values()
                .filter(|c| c.switch_id == switch_id)
                .map(|c| (c.switch_port.as_str(), c, c.is_switch_port_up));
            Ok(port_rows(inv, switch.total_ports, claims))
        })
        .await
    }

    pub async fn patch_panel_port_status(&self, patch_panel_id: Ulid) -> Result<Vec<PortStatus>, EngineError> {
        self.read(|inv| {
            let panel = inv
                .patch_panels
                .get(&patch_panel_id)
                .ok_or(EngineError::NotFound { kind: "patch panel", id: patch_panel_id })?;
            let claims = inv
                .hops()
                .filter(|(_, _, h)| h.patch_panel_id == patch_panel_id)
                .map(|(c, _, h)| (h.patch_panel_port.as_str(), c, h.is_port_up));
            Ok(port_rows(inv, panel.total_ports, claims))
        })
        .await
    }

    /// PCs that can take another connection: multi-port ones, or those with none yet.
    pub async fn available_pcs(&self) -> Vec<Pc> {
        self.read(|inv| {
            inv.pcs
                .values()
                .filter(|pc| pc.multi_port || inv.connections_of_pc(pc.id).next().is_none())
                .cloned()
                .collect()
        })
        .await
    }

    /// One row per unit, `1..=total_units`.
    pub async fn rack_layout(&self, rack_id: Ulid) -> Result<Vec<RackSlot>, EngineError> {
        self.read(|inv| {
            let rack = inv.racks.get(&rack_id).ok_or(EngineError::NotFound { kind: "rack", id: rack_id })?;
            let occupants: Vec<_> = inv.occupants(rack_id).collect();
            Ok((1..=rack.total_units)
                .map(|unit| match occupants.iter().find(|o| o.span.contains(unit)) {
                    Some(o) => RackSlot {
                        unit,
                        kind: Some(o.kind),
                        device_id: Some(o.id),
                        device_name: Some(o.name.to_string()),
                    },
                    None => RackSlot { unit, kind: None, device_id: None, device_name: None },
                })
                .collect())
        })
        .await
    }

    // ── Name lookups (CSV import) ────────────────────────────

    pub async fn find_location(&self, name: &str) -> Option<Location> {
        self.read(|inv| inv.locations.values().find(|l| l.name == name).cloned()).await
    }

    /// First rack with this name, optionally restricted to one location.
    pub async fn find_rack(&self, name: &str, location_id: Option<Ulid>) -> Option<Rack> {
        self.read(|inv| {
            inv.racks
                .values()
                .find(|r| r.name == name && location_id.is_none_or(|l| r.location_id == l))
                .cloned()
        })
        .await
    }

    pub async fn find_pc(&self, name: &str) -> Option<Pc> {
        self.read(|inv| inv.pcs.values().find(|p| p.name == name).cloned()).await
    }

    pub async fn find_patch_panel(&self, name: &str) -> Option<PatchPanel> {
        self.read(|inv| inv.patch_panels.values().find(|p| p.name == name).cloned()).await
    }

    pub async fn find_switch(&self, name: &str) -> Option<Switch> {
        self.read(|inv| inv.switches.values().find(|s| s.name == name).cloned()).await
    }

    pub async fn find_connection(&self, pc_id: Ulid, switch_id: Ulid, switch_port: &str) -> Option<Ulid> {
        self.read(|inv| {
            inv.connections
                .values()
                .find(|c| c.pc_id == pc_id && c.switch_id == switch_id && c.switch_port == switch_port)
                .map(|c| c.id)
        })
        .await
    }
}
