//! CSV import and export, one table per file.
//!
//! Files live in a single transfer directory; `COPY` statements name them by
//! bare file name only.

mod export;
mod import;

pub use export::export_csv;
pub use import::{import_csv, ImportReport};

use std::io;
use std::path::{Path, PathBuf};

use crate::model::Table;

#[derive(Debug)]
pub enum TransferError {
    Csv(csv::Error),
    Io(io::Error),
    UnsupportedTable(Table),
    BadPath(String),
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Csv(e) => write!(f, "CSV error: {e}"),
            TransferError::Io(e) => write!(f, "I/O error: {e}"),
            TransferError::UnsupportedTable(t) => write!(f, "{t} cannot be imported or exported"),
            TransferError::BadPath(p) => write!(f, "invalid transfer file name: {p:?}"),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<csv::Error> for TransferError {
    fn from(e: csv::Error) -> Self {
        TransferError::Csv(e)
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        TransferError::Io(e)
    }
}

/// Map a client-supplied file name to a path inside `dir`. Only plain
/// `*.csv` names made of alphanumerics, `_`, `-` and `.` are accepted.
pub fn resolve_path(dir: &Path, name: &str) -> Result<PathBuf, TransferError> {
    let valid = name.len() > ".csv".len()
        && name.ends_with(".csv")
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.');
    if !valid {
        return Err(TransferError::BadPath(name.to_string()));
    }
    Ok(dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_accepts_plain_csv_names() {
        let dir = Path::new("/srv/transfer");
        assert_eq!(
            resolve_path(dir, "switches-2024.csv").unwrap(),
            PathBuf::from("/srv/transfer/switches-2024.csv")
        );
    }

    #[test]
    fn resolve_rejects_traversal_and_other_extensions() {
        let dir = Path::new("/srv/transfer");
        for bad in ["../etc/passwd.csv", "/tmp/x.csv", "a/b.csv", "notes.txt", ".csv", ".hidden.csv", ""] {
            assert!(
                matches!(resolve_path(dir, bad), Err(TransferError::BadPath(_))),
                "{bad} should be rejected"
            );
        }
    }
}
