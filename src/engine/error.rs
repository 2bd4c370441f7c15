use ulid::Ulid;

use crate::model::PortOwner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or missing input; nothing was checked against current state.
    Invalid { field: &'static str, reason: String },
    NotFound { kind: &'static str, id: Ulid },
    AlreadyExists(Ulid),
    /// A name that must be unique is taken.
    Duplicate { kind: &'static str, name: String },
    /// The requested rack units overlap another mounted device.
    RackUnitsOccupied { holder: String },
    PortOccupied {
        owner: PortOwner,
        device: String,
        port: String,
        pc_name: String,
    },
    /// A single-port PC already terminates a connection.
    PcAlreadyConnected { pc_name: String },
    RackShrinkConflict { total_units: u32, holder: String },
    /// The entity is still referenced and cannot be removed.
    InUse { kind: &'static str, id: Ulid, by: String },
    DefaultTemplate(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

/// Coarse outcome class, used to pick a status code at the protocol edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Conflict,
    Duplicate,
    Referenced,
    Limit,
    Storage,
}

impl EngineError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Invalid { field, reason: reason.into() }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Invalid { .. } => ErrorClass::Validation,
            EngineError::NotFound { .. } => ErrorClass::NotFound,
            EngineError::RackUnitsOccupied { .. }
            | EngineError::PortOccupied { .. }
            | EngineError::PcAlreadyConnected { .. }
            | EngineError::RackShrinkConflict { .. } => ErrorClass::Conflict,
            EngineError::Duplicate { .. } | EngineError::AlreadyExists(_) => ErrorClass::Duplicate,
            EngineError::InUse { .. } | EngineError::DefaultTemplate(_) => ErrorClass::Referenced,
            EngineError::LimitExceeded(_) => ErrorClass::Limit,
            EngineError::WalError(_) => ErrorClass::Storage,
        }
    }

    /// Label for the conflicts counter; `None` for non-occupancy errors.
    pub fn conflict_kind(&self) -> Option<&'static str> {
        match self {
            EngineError::RackUnitsOccupied { .. } => Some("rack_units"),
            EngineError::PortOccupied { owner: PortOwner::Switch, .. } => Some("switch_port"),
            EngineError::PortOccupied { owner: PortOwner::PatchPanel, .. } => Some("patch_panel_port"),
            EngineError::PcAlreadyConnected { .. } => Some("single_port_pc"),
            EngineError::RackShrinkConflict { .. } => Some("rack_shrink"),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
            EngineError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Duplicate { kind, name } => {
                write!(f, "{kind} '{name}' already exists")
            }
            EngineError::RackUnitsOccupied { holder } => {
                write!(f, "Rack unit(s) is already occupied by {holder}")
            }
            EngineError::PortOccupied { owner, device, port, pc_name } => write!(
                f,
                "{} '{device}' port '{port}' is already in use by PC: {pc_name}",
                owner.label()
            ),
            EngineError::PcAlreadyConnected { pc_name } => write!(
                f,
                "PC '{pc_name}' is a single-port PC and already has a connection"
            ),
            EngineError::RackShrinkConflict { total_units, holder } => write!(
                f,
                "Cannot decrease total units to {total_units}U. {holder} would be out of bounds"
            ),
            EngineError::InUse { kind, id, by } => {
                write!(f, "{kind} {id} is still referenced by {by}")
            }
            EngineError::DefaultTemplate(id) => write!(
                f,
                "PDF template {id} is the default template; choose another default first"
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
