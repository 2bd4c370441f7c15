/// Largest rack a location can hold.
pub const MAX_RACK_UNITS: u32 = 50;
pub const DEFAULT_RACK_UNITS: u32 = 42;

/// Patch panels a single connection may route through.
pub const MAX_HOPS: usize = 5;

pub const MAX_PDF_TEMPLATES: usize = 5;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_PORT_LABEL_LEN: usize = 64;

/// Upper bound for `total_ports` on a switch or patch panel.
pub const MAX_PORTS: u32 = 1024;

pub const MAX_IMPORT_ROWS: usize = 100_000;
