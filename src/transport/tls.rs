//! Client-side TLS configuration for the STARTTLS upgrade.
//!
//! Trust anchors are always explicit: either a PEM bundle on disk or raw DER
//! certificates handed in by the caller. There is no built-in root store.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ConfigError;

/// Source of trusted CA certificates.
#[derive(Debug, Clone)]
pub enum TrustAnchors {
    /// Load certificates from a PEM file.
    File(PathBuf),
    /// Use raw DER-encoded certificates.
    Der(Vec<Vec<u8>>),
}

impl TrustAnchors {
    /// Load the anchors into a root store.
    pub fn load(&self) -> Result<rustls::RootCertStore, ConfigError> {
        let ders = match self {
            Self::File(path) => {
                let pem = fs::read(path).map_err(|e| {
                    ConfigError::Invalid(format!("Failed to read CA file {}: {e}", path.display()))
                })?;
                rustls_pemfile::certs(&mut pem.as_slice()).map_err(|e| {
                    ConfigError::Invalid(format!("Failed to parse CA PEM {}: {e}", path.display()))
                })?
            },
            Self::Der(ders) => ders.clone(),
        };

        if ders.is_empty() {
            return Err(ConfigError::Invalid(
                "No CA certificates found".to_string(),
            ));
        }

        let mut roots = rustls::RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(&ders[..]);
        if ignored > 0 {
            tracing::warn!("Ignored {} unparsable CA certificate(s)", ignored);
        }
        if added == 0 {
            return Err(ConfigError::Invalid(
                "No usable CA certificates".to_string(),
            ));
        }
        Ok(roots)
    }
}

/// Build a rustls client config trusting only `anchors`.
pub fn client_config(anchors: &TrustAnchors) -> Result<Arc<rustls::ClientConfig>, ConfigError> {
    let roots = anchors.load()?;
    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Parse the name the server certificate must match.
pub fn server_name(name: &str) -> Result<rustls::ServerName, ConfigError> {
    rustls::ServerName::try_from(name)
        .map_err(|e| ConfigError::Invalid(format!("Invalid TLS server name '{name}': {e}")))
}
