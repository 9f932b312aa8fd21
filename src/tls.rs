//! TLS setup for the secure endpoint.
//!
//! Supports two modes:
//! - **User-provided**: load PEM cert + key from disk
//! - **Self-signed**: generate an ephemeral certificate via `rcgen`

use crate::config::TlsConfig;
use axum_server::tls_rustls::RustlsConfig;
use tracing::warn;

/// Build a [`RustlsConfig`] for the secure listener.
///
/// Without PEM paths, generates a self-signed certificate for `localhost`,
/// `127.0.0.1`, and the virtual-host suffix (with a wildcard) if one is set.
pub async fn build_rustls_config(
    tls: Option<&TlsConfig>,
    virtual_host: Option<&str>,
) -> Result<RustlsConfig, Box<dyn std::error::Error>> {
    if let Some(TlsConfig {
        cert_path: Some(cert),
        key_path: Some(key),
    }) = tls
    {
        return Ok(RustlsConfig::from_pem_file(cert, key).await?);
    }

    let mut subject_alt_names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    if let Some(suffix) = virtual_host {
        subject_alt_names.push(suffix.to_string());
        subject_alt_names.push(format!("*.{}", suffix));
    }
    warn!(
        "No TLS certificate configured; generating a self-signed one for {:?}",
        subject_alt_names
    );
    let cert_params = rcgen::CertificateParams::new(subject_alt_names)?;
    let key_pair = rcgen::KeyPair::generate()?;
    let cert = cert_params.self_signed(&key_pair)?;
    Ok(RustlsConfig::from_pem(cert.pem().into(), key_pair.serialize_pem().into()).await?)
}
