use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `NETDOC_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// Where `COPY ... FROM/TO '<file>.csv'` reads and writes.
    pub transfer_dir: PathBuf,
    /// Only this user may log in when set.
    pub user: Option<String>,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub audit_capacity: usize,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = PathBuf::from(lookup("NETDOC_DATA_DIR").unwrap_or_else(|| "./data".into()));
        Self {
            port: parsed(&lookup, "NETDOC_PORT").unwrap_or(5433),
            bind: lookup("NETDOC_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            transfer_dir: lookup("NETDOC_TRANSFER_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("transfer")),
            data_dir,
            user: lookup("NETDOC_USER"),
            password: lookup("NETDOC_PASSWORD").unwrap_or_else(|| "netdoc".into()),
            max_connections: parsed(&lookup, "NETDOC_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "NETDOC_COMPACT_THRESHOLD").unwrap_or(1000),
            audit_capacity: parsed(&lookup, "NETDOC_AUDIT_CAPACITY").unwrap_or(1024),
            tls_cert: lookup("NETDOC_TLS_CERT"),
            tls_key: lookup("NETDOC_TLS_KEY"),
            metrics_port: parsed(&lookup, "NETDOC_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("netdoc.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.listen_addr(), "0.0.0.0:5433");
        assert_eq!(c.wal_path(), PathBuf::from("./data/netdoc.wal"));
        assert_eq!(c.transfer_dir, PathBuf::from("./data/transfer"));
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.audit_capacity, 1024);
        assert_eq!(c.user, None);
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let c = config(&[
            ("NETDOC_PORT", "6000"),
            ("NETDOC_DATA_DIR", "/var/lib/netdoc"),
            ("NETDOC_MAX_CONNECTIONS", "lots"),
            ("NETDOC_METRICS_PORT", "9100"),
            ("NETDOC_COMPACT_THRESHOLD", "50"),
            ("NETDOC_AUDIT_CAPACITY", "-1"),
            ("NETDOC_USER", "ops"),
        ]);
        assert_eq!(c.port, 6000);
        assert_eq!(c.transfer_dir, PathBuf::from("/var/lib/netdoc/transfer"));
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.audit_capacity, 1024);
        assert_eq!(c.user.as_deref(), Some("ops"));
    }
}
