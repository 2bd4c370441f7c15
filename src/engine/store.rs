use std::collections::BTreeMap;

use ulid::Ulid;

use crate::model::*;

/// Placeholder shown when a connection points at a PC that no longer exists.
pub const UNKNOWN_PC: &str = "Unknown PC";

/// A device holding units in a rack, seen through [`RackMounted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupant<'a> {
    pub kind: DeviceKind,
    pub id: Ulid,
    pub name: &'a str,
    pub span: UnitSpan,
}

impl std::fmt::Display for Occupant<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} (occupies {})", self.kind.label(), self.name, self.span)
    }
}

fn mounted_in<T: RackMounted>(
    devices: &BTreeMap<Ulid, T>,
    rack_id: Ulid,
) -> impl Iterator<Item = Occupant<'_>> {
    devices.values().filter_map(move |d| match d.placement() {
        Some((rid, span)) if rid == rack_id => Some(Occupant {
            kind: T::KIND,
            id: d.id(),
            name: d.name(),
            span,
        }),
        _ => None,
    })
}

/// Committed inventory state. Maps are ordered by id, so iteration and
/// "first found" are deterministic.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub locations: BTreeMap<Ulid, Location>,
    pub racks: BTreeMap<Ulid, Rack>,
    pub pcs: BTreeMap<Ulid, Pc>,
    pub patch_panels: BTreeMap<Ulid, PatchPanel>,
    pub switches: BTreeMap<Ulid, Switch>,
    pub connections: BTreeMap<Ulid, Connection>,
    pub pdf_templates: BTreeMap<Ulid, PdfTemplate>,
    pub settings: Settings,
}

impl Inventory {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::LocationSaved(l) => {
                self.locations.insert(l.id, l.clone());
            }
            Event::LocationDeleted { id } => {
                self.locations.remove(id);
            }
            Event::RackSaved(r) => {
                self.racks.insert(r.id, r.clone());
            }
            Event::RackDeleted { id } => {
                self.racks.remove(id);
            }
            Event::PcSaved(pc) => {
                self.pcs.insert(pc.id, pc.clone());
            }
            Event::PcDeleted { id } => {
                self.pcs.remove(id);
            }
            Event::PatchPanelSaved(pp) => {
                self.patch_panels.insert(pp.id, pp.clone());
            }
            Event::PatchPanelDeleted { id } => {
                self.patch_panels.remove(id);
            }
            Event::SwitchSaved(s) => {
                self.switches.insert(s.id, s.clone());
            }
            Event::SwitchDeleted { id } => {
                self.switches.remove(id);
            }
            Event::ConnectionSaved(c) => {
                self.connections.insert(c.id, c.clone());
            }
            Event::ConnectionDeleted { id } => {
                self.connections.remove(id);
            }
            Event::PdfTemplateAdded(t) => {
                self.pdf_templates.insert(t.id, t.clone());
            }
            Event::PdfTemplateRemoved { id } => {
                self.pdf_templates.remove(id);
                if self.settings.default_pdf_id == Some(*id) {
                    self.settings.default_pdf_id = None;
                }
            }
            Event::DefaultPdfSet { id } => {
                self.settings.default_pdf_id = *id;
            }
        }
    }

    /// Devices mounted in `rack_id`: switches, then patch panels, then server PCs.
    pub fn occupants(&self, rack_id: Ulid) -> impl Iterator<Item = Occupant<'_>> {
        mounted_in(&self.switches, rack_id)
            .chain(mounted_in(&self.patch_panels, rack_id))
            .chain(mounted_in(&self.pcs, rack_id))
    }

    pub fn pc_name(&self, id: Ulid) -> &str {
        self.pcs.get(&id).map_or(UNKNOWN_PC, |pc| pc.name.as_str())
    }

    pub fn connections_of_pc(&self, pc_id: Ulid) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.pc_id == pc_id)
    }

    /// Every hop in the system with its owning connection and 0-based sequence.
    pub fn hops(&self) -> impl Iterator<Item = (&Connection, usize, &Hop)> {
        self.connections
            .values()
            .flat_map(|c| c.hops.iter().enumerate().map(move |(seq, hop)| (c, seq, hop)))
    }

    /// Names of devices that still point at `rack_id`, mounted or not.
    pub fn rack_dependents(&self, rack_id: Ulid) -> Vec<String> {
        let switches = self.switches.values().filter(|s| s.rack_id == Some(rack_id)).map(|s| &s.name);
        let panels = self.patch_panels.values().filter(|p| p.rack_id == Some(rack_id)).map(|p| &p.name);
        let pcs = self.pcs.values().filter(|p| p.rack_id == Some(rack_id)).map(|p| &p.name);
        switches.chain(panels).chain(pcs).cloned().collect()
    }

    pub fn location_dependents(&self, location_id: Ulid) -> Vec<String> {
        let racks = self.racks.values().filter(|r| r.location_id == location_id).map(|r| &r.name);
        let switches = self
            .switches
            .values()
            .filter(|s| s.location_id == Some(location_id))
            .map(|s| &s.name);
        let panels = self
            .patch_panels
            .values()
            .filter(|p| p.location_id == Some(location_id))
            .map(|p| &p.name);
        racks.chain(switches).chain(panels).cloned().collect()
    }

    /// Events that rebuild this exact state, referenced entities first.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::new();
        events.extend(self.locations.values().cloned().map(Event::LocationSaved));
        events.extend(self.racks.values().cloned().map(Event::RackSaved));
        events.extend(self.pcs.values().cloned().map(Event::PcSaved));
        events.extend(self.patch_panels.values().cloned().map(Event::PatchPanelSaved));
        events.extend(self.switches.values().cloned().map(Event::SwitchSaved));
        events.extend(self.connections.values().cloned().map(Event::ConnectionSaved));
        events.extend(self.pdf_templates.values().cloned().map(Event::PdfTemplateAdded));
        if self.settings.default_pdf_id.is_some() {
            events.push(Event::DefaultPdfSet { id: self.settings.default_pdf_id });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted_switch(name: &str, rack_id: Ulid, start: Unit, units: Unit) -> Switch {
        let mut s = Switch::new(Ulid::new(), name.into());
        s.rack_id = Some(rack_id);
        s.start_unit = Some(start);
        s.units_occupied = units;
        s
    }

    #[test]
    fn occupants_scan_switches_then_panels_then_servers() {
        let rack = Ulid::new();
        let mut inv = Inventory::default();

        let mut server = Pc::new(Ulid::new(), "srv".into());
        server.pc_type = SERVER_PC_TYPE.into();
        server.rack_id = Some(rack);
        server.start_unit = Some(10);
        inv.apply(&Event::PcSaved(server));

        let mut panel = PatchPanel::new(Ulid::new(), "pp".into());
        panel.rack_id = Some(rack);
        panel.start_unit = Some(5);
        inv.apply(&Event::PatchPanelSaved(panel));

        inv.apply(&Event::SwitchSaved(mounted_switch("sw", rack, 1, 2)));
        inv.apply(&Event::SwitchSaved(mounted_switch("elsewhere", Ulid::new(), 1, 2)));

        let kinds: Vec<_> = inv.occupants(rack).map(|o| o.kind).collect();
        assert_eq!(kinds, vec![DeviceKind::Switch, DeviceKind::PatchPanel, DeviceKind::Pc]);
    }

    #[test]
    fn occupant_display_names_span() {
        let rack = Ulid::new();
        let mut inv = Inventory::default();
        inv.apply(&Event::SwitchSaved(mounted_switch("SW1", rack, 1, 2)));
        let o = inv.occupants(rack).next().unwrap();
        assert_eq!(o.to_string(), "Switch SW1 (occupies units 1-2)");
    }

    #[test]
    fn removing_default_template_clears_setting() {
        let mut inv = Inventory::default();
        let t = PdfTemplate {
            id: Ulid::new(),
            original_filename: "a.pdf".into(),
            stored_filename: "x.pdf".into(),
            uploaded_at: 0,
        };
        inv.apply(&Event::PdfTemplateAdded(t.clone()));
        inv.apply(&Event::DefaultPdfSet { id: Some(t.id) });
        inv.apply(&Event::PdfTemplateRemoved { id: t.id });
        assert_eq!(inv.settings.default_pdf_id, None);
    }

    #[test]
    fn snapshot_rebuilds_state() {
        let rack_loc = Location::new(Ulid::new(), "Lab".into());
        let rack = Rack::new(Ulid::new(), "R1".into(), rack_loc.id);
        let mut inv = Inventory::default();
        inv.apply(&Event::LocationSaved(rack_loc));
        inv.apply(&Event::RackSaved(rack.clone()));
        inv.apply(&Event::SwitchSaved(mounted_switch("sw", rack.id, 3, 1)));

        let mut rebuilt = Inventory::default();
        for e in inv.snapshot() {
            rebuilt.apply(&e);
        }
        assert_eq!(rebuilt.racks, inv.racks);
        assert_eq!(rebuilt.switches, inv.switches);
        assert_eq!(rebuilt.locations, inv.locations);
    }
}
