//! TLS acceptor loading
//!
//! Reads a PEM certificate chain and private key into the acceptor shared by
//! AUTH TLS control upgrades and PROT P data connections.

use log::info;
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::CertificateDer;

use crate::error::TlsError;

pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let cert_err = |e: String| TlsError::CertificateLoad(cert_path.display().to_string(), e);
    let key_err = |e: String| TlsError::KeyLoad(key_path.display().to_string(), e);

    let cert_file = fs::File::open(cert_path).map_err(|e| cert_err(e.to_string()))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| cert_err(e.to_string()))?;
    if certs.is_empty() {
        return Err(cert_err("no certificates found".into()));
    }

    let key_file = fs::File::open(key_path).map_err(|e| key_err(e.to_string()))?;
    let mut key_reader = BufReader::new(key_file);
    let private_key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| key_err(e.to_string()))?
        .ok_or_else(|| key_err("no private key found".into()))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .map_err(|e| TlsError::Config(e.to_string()))?;

    info!("Loaded TLS certificate from {}", cert_path.display());
    Ok(TlsAcceptor::from(Arc::new(config)))
}
