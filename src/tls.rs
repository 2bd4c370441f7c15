use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

/// Build the TLS acceptor from PEM files. `Ok(None)` when neither path is set.
pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both NETDOC_TLS_CERT and NETDOC_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];
    tracing::info!(cert = cert_path, "TLS enabled");

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_paths_means_plaintext() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
    }

    #[test]
    fn half_configured_tls_is_rejected() {
        let Err(err) = load_tls_acceptor(Some("cert.pem"), None) else {
            panic!("expected an error");
        };
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("NETDOC_TLS_KEY"));
    }

    #[test]
    fn missing_cert_file_is_an_io_error() {
        let Err(err) = load_tls_acceptor(Some("/nonexistent/netdoc.pem"), Some("/nonexistent/netdoc.key")) else {
            panic!("expected an error");
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
