//! TLS configuration and certificate loading.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Handshake acceptor for an already-prepared rustls configuration.
pub fn acceptor_from(config: &RustlsConfig) -> TlsAcceptor {
    TlsAcceptor::from(config.get_inner())
}

/// Build the HTTPS acceptor from configured PEM paths.
pub async fn acceptor_for(tls: &TlsConfig) -> Result<TlsAcceptor, std::io::Error> {
    let config = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
    tracing::info!(cert_path = %tls.cert_path, "TLS certificate loaded");
    Ok(acceptor_from(&config))
}
