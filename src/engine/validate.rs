//! Input normalization. Everything here runs before any occupancy check.

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(super) fn name(field: &'static str, value: &str) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::invalid(field, "must not be empty"));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(EngineError::invalid(field, format!("longer than {MAX_NAME_LEN} bytes")));
    }
    Ok(trimmed.to_string())
}

/// Port labels are compared verbatim, so only emptiness and length are checked.
pub(super) fn port_label(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.is_empty() {
        return Err(EngineError::invalid(field, "must not be empty"));
    }
    if value.len() > MAX_PORT_LABEL_LEN {
        return Err(EngineError::invalid(field, format!("longer than {MAX_PORT_LABEL_LEN} bytes")));
    }
    Ok(())
}

pub(super) fn at_least_one(field: &'static str, value: i64) -> Result<u32, EngineError> {
    if value < 1 {
        return Err(EngineError::invalid(field, format!("must be at least 1, got {value}")));
    }
    u32::try_from(value).map_err(|_| EngineError::invalid(field, format!("{value} is too large")))
}

pub(super) fn rack_units(value: i64) -> Result<Unit, EngineError> {
    let units = at_least_one("total_units", value)?;
    if units > MAX_RACK_UNITS {
        return Err(EngineError::invalid(
            "total_units",
            format!("must be between 1 and {MAX_RACK_UNITS}, got {value}"),
        ));
    }
    Ok(units)
}

pub(super) fn port_count(value: i64) -> Result<u32, EngineError> {
    let ports = at_least_one("total_ports", value)?;
    if ports > MAX_PORTS {
        return Err(EngineError::invalid("total_ports", format!("at most {MAX_PORTS}, got {value}")));
    }
    Ok(ports)
}

fn start_unit(value: Option<i64>) -> Result<Option<Unit>, EngineError> {
    value.map(|v| at_least_one("start_unit", v)).transpose()
}

// ── Patch application ────────────────────────────────────
//
// Names are re-validated by the caller once the patch is applied.

impl LocationPatch {
    pub(super) fn apply_to(self, l: &mut Location) {
        if let Some(v) = self.name {
            l.name = v;
        }
        if let Some(v) = self.door_number {
            l.door_number = v;
        }
        if let Some(v) = self.description {
            l.description = v;
        }
    }
}

impl RackPatch {
    pub(super) fn apply_to(self, r: &mut Rack) -> Result<(), EngineError> {
        if let Some(v) = self.name {
            r.name = v;
        }
        if let Some(v) = self.location_id {
            r.location_id = v;
        }
        if let Some(v) = self.description {
            r.description = v;
        }
        if let Some(v) = self.total_units {
            r.total_units = rack_units(v)?;
        }
        if let Some(v) = self.orientation {
            r.orientation = v;
        }
        Ok(())
    }
}

impl PcPatch {
    pub(super) fn apply_to(self, pc: &mut Pc) -> Result<(), EngineError> {
        if let Some(v) = self.name {
            pc.name = v;
        }
        if let Some(v) = self.ip_address {
            pc.ip_address = v;
        }
        if let Some(v) = self.username {
            pc.username = v;
        }
        if let Some(v) = self.in_domain {
            pc.in_domain = v;
        }
        if let Some(v) = self.operating_system {
            pc.operating_system = v;
        }
        if let Some(v) = self.model {
            pc.model = v;
        }
        if let Some(v) = self.office {
            pc.office = v;
        }
        if let Some(v) = self.description {
            pc.description = v;
        }
        if let Some(v) = self.multi_port {
            pc.multi_port = v;
        }
        if let Some(v) = self.pc_type {
            pc.pc_type = v;
        }
        if let Some(v) = self.usage {
            pc.usage = v;
        }
        if let Some(v) = self.rack_id {
            pc.rack_id = v;
        }
        if let Some(v) = self.start_unit {
            pc.start_unit = start_unit(v)?;
        }
        if let Some(v) = self.units_occupied {
            pc.units_occupied = at_least_one("units_occupied", v)?;
        }
        if !pc.is_server() {
            // Only servers are racked; anything else vacates its units.
            pc.rack_id = None;
            pc.start_unit = None;
            pc.units_occupied = 1;
        }
        Ok(())
    }
}

impl PatchPanelPatch {
    pub(super) fn apply_to(self, pp: &mut PatchPanel) -> Result<(), EngineError> {
        if let Some(v) = self.name {
            pp.name = v;
        }
        if let Some(v) = self.location_id {
            pp.location_id = v;
        }
        if let Some(v) = self.rack_id {
            pp.rack_id = v;
        }
        if let Some(v) = self.start_unit {
            pp.start_unit = start_unit(v)?;
        }
        if let Some(v) = self.units_occupied {
            pp.units_occupied = at_least_one("units_occupied", v)?;
        }
        if let Some(v) = self.total_ports {
            pp.total_ports = port_count(v)?;
        }
        if let Some(v) = self.description {
            pp.description = v;
        }
        Ok(())
    }
}

impl SwitchPatch {
    pub(super) fn apply_to(self, s: &mut Switch) -> Result<(), EngineError> {
        if let Some(v) = self.name {
            s.name = v;
        }
        if let Some(v) = self.ip_address {
            s.ip_address = v;
        }
        if let Some(v) = self.location_id {
            s.location_id = v;
        }
        if let Some(v) = self.rack_id {
            s.rack_id = v;
        }
        if let Some(v) = self.start_unit {
            s.start_unit = start_unit(v)?;
        }
        if let Some(v) = self.units_occupied {
            s.units_occupied = at_least_one("units_occupied", v)?;
        }
        if let Some(v) = self.total_ports {
            s.total_ports = port_count(v)?;
        }
        if let Some(v) = self.source_port {
            s.source_port = v;
        }
        if let Some(v) = self.model {
            s.model = v;
        }
        if let Some(v) = self.description {
            s.description = v;
        }
        if let Some(v) = self.usage {
            s.usage = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn names_are_trimmed_and_required() {
        assert_eq!(name("name", "  SW1 ").unwrap(), "SW1");
        assert!(matches!(name("name", "   "), Err(EngineError::Invalid { field: "name", .. })));
    }

    #[test]
    fn numeric_bounds() {
        assert_eq!(at_least_one("units_occupied", 2).unwrap(), 2);
        assert!(at_least_one("units_occupied", 0).is_err());
        assert!(at_least_one("start_unit", -3).is_err());
        assert!(rack_units(51).is_err());
        assert_eq!(rack_units(50).unwrap(), 50);
        assert!(port_count(0).is_err());
    }

    #[test]
    fn leaving_server_type_clears_rack_fields() {
        let mut pc = Pc::new(Ulid::new(), "srv".into());
        PcPatch {
            pc_type: Some(SERVER_PC_TYPE.into()),
            rack_id: Some(Some(Ulid::new())),
            start_unit: Some(Some(4)),
            units_occupied: Some(2),
            ..Default::default()
        }
        .apply_to(&mut pc)
        .unwrap();
        assert!(pc.placement().is_some());

        PcPatch { pc_type: Some("Workstation".into()), ..Default::default() }
            .apply_to(&mut pc)
            .unwrap();
        assert_eq!((pc.rack_id, pc.start_unit, pc.units_occupied), (None, None, 1));
    }

    #[test]
    fn stray_rack_fields_on_workstation_are_dropped() {
        let mut pc = Pc::new(Ulid::new(), "desk".into());
        PcPatch {
            rack_id: Some(Some(Ulid::new())),
            start_unit: Some(Some(1)),
            ..Default::default()
        }
        .apply_to(&mut pc)
        .unwrap();
        assert_eq!(pc.rack_id, None);
    }

    #[test]
    fn patch_keeps_omitted_fields() {
        let mut sw = Switch::new(Ulid::new(), "SW1".into());
        sw.model = Some("C9300".into());
        SwitchPatch { total_ports: Some(48), ..Default::default() }.apply_to(&mut sw).unwrap();
        assert_eq!(sw.model.as_deref(), Some("C9300"));
        assert_eq!(sw.total_ports, 48);

        SwitchPatch { model: Some(None), ..Default::default() }.apply_to(&mut sw).unwrap();
        assert_eq!(sw.model, None);
    }
}
