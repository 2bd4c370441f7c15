use ulid::Ulid;

use crate::model::*;

use super::store::Inventory;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Result of an occupancy probe. `Occupied` carries a human-readable holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupancy {
    Free,
    Occupied(String),
}

impl Occupancy {
    pub fn is_occupied(&self) -> bool {
        matches!(self, Occupancy::Occupied(_))
    }

    pub fn holder(&self) -> Option<&str> {
        match self {
            Occupancy::Free => None,
            Occupancy::Occupied(h) => Some(h),
        }
    }
}

/// Is `port` on the given switch or patch panel claimed by a connection other than
/// `exclude_connection`? The holder is the claiming connection's PC name.
///
/// Labels compare as exact strings: "1" and "01" are different ports.
pub fn is_port_occupied(
    inv: &Inventory,
    owner: PortOwner,
    device_id: Ulid,
    port: &str,
    exclude_connection: Option<Ulid>,
) -> Occupancy {
    let holder = match owner {
        PortOwner::Switch => inv
            .connections
            .values()
            .filter(|c| Some(c.id) != exclude_connection)
            .find(|c| c.switch_id == device_id && c.switch_port == port),
        PortOwner::PatchPanel => inv
            .hops()
            .filter(|(c, _, _)| Some(c.id) != exclude_connection)
            .find(|(_, _, h)| h.patch_panel_id == device_id && h.patch_panel_port == port)
            .map(|(c, _, _)| c),
    };
    match holder {
        Some(c) => Occupancy::Occupied(inv.pc_name(c.pc_id).to_string()),
        None => Occupancy::Free,
    }
}

/// Does `[start_unit, start_unit + units_occupied - 1]` in `rack_id` intersect any
/// mounted device? The device `exclude_device` of population `kind` is skipped.
///
/// Any missing coordinate means the candidate is not mounted and never conflicts.
pub fn is_rack_range_occupied(
    inv: &Inventory,
    rack_id: Option<Ulid>,
    start_unit: Option<Unit>,
    units_occupied: Option<Unit>,
    kind: DeviceKind,
    exclude_device: Option<Ulid>,
) -> Occupancy {
    let (Some(rack_id), Some(start), Some(units)) = (rack_id, start_unit, units_occupied) else {
        return Occupancy::Free;
    };
    if start == 0 || units == 0 {
        return Occupancy::Free;
    }
    let candidate = UnitSpan::new(start, units);
    inv.occupants(rack_id)
        .filter(|o| !(o.kind == kind && Some(o.id) == exclude_device))
        .find(|o| o.span.overlaps(&candidate))
        .map_or(Occupancy::Free, |o| Occupancy::Occupied(o.to_string()))
}

/// Would any device mounted in `rack_id` reach past `new_total_units`?
pub fn would_shrink_conflict(inv: &Inventory, rack_id: Ulid, new_total_units: Unit) -> Occupancy {
    inv.occupants(rack_id)
        .find(|o| !o.span.fits_within(new_total_units))
        .map_or(Occupancy::Free, |o| Occupancy::Occupied(o.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        inv: Inventory,
        rack: Ulid,
    }

    impl Fixture {
        fn new() -> Self {
            Self { inv: Inventory::default(), rack: Ulid::new() }
        }

        fn switch(&mut self, name: &str, start: Unit, units: Unit) -> Ulid {
            let mut s = Switch::new(Ulid::new(), name.into());
            s.rack_id = Some(self.rack);
            s.start_unit = Some(start);
            s.units_occupied = units;
            let id = s.id;
            self.inv.apply(&Event::SwitchSaved(s));
            id
        }

        fn panel(&mut self, name: &str, start: Unit, units: Unit) -> Ulid {
            let mut p = PatchPanel::new(Ulid::new(), name.into());
            p.rack_id = Some(self.rack);
            p.start_unit = Some(start);
            p.units_occupied = units;
            p.total_ports = 24;
            let id = p.id;
            self.inv.apply(&Event::PatchPanelSaved(p));
            id
        }

        fn pc(&mut self, name: &str, pc_type: &str, start: Unit) -> Ulid {
            let mut pc = Pc::new(Ulid::new(), name.into());
            pc.pc_type = pc_type.into();
            pc.rack_id = Some(self.rack);
            pc.start_unit = Some(start);
            let id = pc.id;
            self.inv.apply(&Event::PcSaved(pc));
            id
        }

        fn probe(&self, start: Unit, units: Unit, kind: DeviceKind, exclude: Option<Ulid>) -> Occupancy {
            is_rack_range_occupied(&self.inv, Some(self.rack), Some(start), Some(units), kind, exclude)
        }

        fn connect(&mut self, pc: Ulid, switch: Ulid, port: &str, hops: Vec<Hop>) -> Ulid {
            let c = Connection {
                id: Ulid::new(),
                pc_id: pc,
                switch_id: switch,
                switch_port: port.into(),
                is_switch_port_up: true,
                cable_color: None,
                cable_label: None,
                hops,
            };
            let id = c.id;
            self.inv.apply(&Event::ConnectionSaved(c));
            id
        }
    }

    #[test]
    fn partial_overlap_reports_holder() {
        let mut f = Fixture::new();
        f.switch("SW1", 1, 2);
        let r = f.probe(2, 2, DeviceKind::Switch, None);
        assert_eq!(r, Occupancy::Occupied("Switch SW1 (occupies units 1-2)".into()));
    }

    #[test]
    fn adjacent_ranges_are_free() {
        let mut f = Fixture::new();
        f.switch("SW1", 1, 2);
        assert_eq!(f.probe(3, 1, DeviceKind::PatchPanel, None), Occupancy::Free);
    }

    #[test]
    fn enclosing_range_conflicts() {
        let mut f = Fixture::new();
        f.panel("PP1", 5, 1);
        assert!(f.probe(3, 5, DeviceKind::Switch, None).is_occupied());
    }

    #[test]
    fn missing_coordinates_never_conflict() {
        let mut f = Fixture::new();
        f.switch("SW1", 1, 10);
        let inv = &f.inv;
        assert_eq!(
            is_rack_range_occupied(inv, None, Some(1), Some(1), DeviceKind::Switch, None),
            Occupancy::Free
        );
        assert_eq!(
            is_rack_range_occupied(inv, Some(f.rack), None, Some(1), DeviceKind::Switch, None),
            Occupancy::Free
        );
        assert_eq!(
            is_rack_range_occupied(inv, Some(f.rack), Some(1), None, DeviceKind::Switch, None),
            Occupancy::Free
        );
    }

    #[test]
    fn self_exclusion_is_per_population() {
        let mut f = Fixture::new();
        let sw = f.switch("SW1", 1, 2);
        assert_eq!(f.probe(1, 2, DeviceKind::Switch, Some(sw)), Occupancy::Free);
        // The same id under another kind does not exclude the switch.
        assert!(f.probe(1, 2, DeviceKind::PatchPanel, Some(sw)).is_occupied());
    }

    #[test]
    fn workstations_do_not_hold_units() {
        let mut f = Fixture::new();
        f.pc("desk", "Workstation", 4);
        assert_eq!(f.probe(4, 1, DeviceKind::Switch, None), Occupancy::Free);
        f.pc("srv", SERVER_PC_TYPE, 4);
        assert_eq!(
            f.probe(4, 1, DeviceKind::Switch, None),
            Occupancy::Occupied("Server PC srv (occupies unit 4)".into())
        );
    }

    #[test]
    fn switches_reported_before_panels() {
        let mut f = Fixture::new();
        f.panel("PP1", 2, 1);
        f.switch("SW1", 3, 1);
        let r = f.probe(1, 5, DeviceKind::Pc, None);
        assert_eq!(r.holder(), Some("Switch SW1 (occupies unit 3)"));
    }

    #[test]
    fn shrink_guard_checks_span_end() {
        let mut f = Fixture::new();
        f.switch("SW1", 5, 2);
        assert_eq!(would_shrink_conflict(&f.inv, f.rack, 6), Occupancy::Free);
        assert_eq!(
            would_shrink_conflict(&f.inv, f.rack, 5),
            Occupancy::Occupied("Switch SW1 (occupies units 5-6)".into())
        );
    }

    #[test]
    fn switch_port_lookup_and_exclusion() {
        let mut f = Fixture::new();
        let sw = f.switch("SW1", 1, 1);
        let pc = f.pc("Workstation-A", "Workstation", 1);
        let conn = f.connect(pc, sw, "12", vec![]);

        assert_eq!(
            is_port_occupied(&f.inv, PortOwner::Switch, sw, "12", None),
            Occupancy::Occupied("Workstation-A".into())
        );
        assert_eq!(is_port_occupied(&f.inv, PortOwner::Switch, sw, "12", Some(conn)), Occupancy::Free);
        assert_eq!(is_port_occupied(&f.inv, PortOwner::Switch, sw, "012", None), Occupancy::Free);
    }

    #[test]
    fn patch_panel_port_lookup() {
        let mut f = Fixture::new();
        let sw = f.switch("SW1", 1, 1);
        let pp = f.panel("PP1", 2, 1);
        let pc = f.pc("ws", "Workstation", 1);
        let conn = f.connect(pc, sw, "1", vec![Hop::new(pp, "12")]);

        assert!(is_port_occupied(&f.inv, PortOwner::PatchPanel, pp, "12", None).is_occupied());
        assert_eq!(is_port_occupied(&f.inv, PortOwner::PatchPanel, pp, "12", Some(conn)), Occupancy::Free);
        assert_eq!(is_port_occupied(&f.inv, PortOwner::PatchPanel, pp, "13", None), Occupancy::Free);
    }

    #[test]
    fn dangling_pc_reference_reports_unknown() {
        let mut f = Fixture::new();
        let sw = f.switch("SW1", 1, 1);
        f.connect(Ulid::new(), sw, "1", vec![]);
        assert_eq!(
            is_port_occupied(&f.inv, PortOwner::Switch, sw, "1", None).holder(),
            Some(super::super::store::UNKNOWN_PC)
        );
    }
}
