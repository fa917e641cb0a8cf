//! HTTP client construction, including the optional mutual-TLS identity.
//!
//! The application server may sit behind HTTPS with a self-issued
//! certificate; the operator opts into trusting it via
//! `accept_invalid_certs` and may attach a client certificate for mutual
//! TLS.

use crate::HookError;
use std::path::PathBuf;
use std::time::Duration;

/// Default request timeout for auth and webhook calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client certificate material for mutual TLS.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    /// PEM-encoded certificate path.
    pub cert_path: PathBuf,
    /// PEM-encoded private key path.
    pub key_path: PathBuf,
    /// Key passphrase. Encrypted keys are rejected at construction.
    pub passphrase: Option<String>,
}

/// TLS policy for outbound calls to the application server.
#[derive(Debug, Clone, Default)]
pub struct ClientTls {
    /// Client identity to present, if mutual TLS is configured.
    pub material: Option<TlsMaterial>,
    /// Trust endpoints with certificates that fail verification.
    ///
    /// Operator opt-in only; never enabled by default.
    pub accept_invalid_certs: bool,
}

/// Build the reqwest client shared by the auth and webhook paths.
///
/// # Errors
///
/// Fails when the TLS material cannot be read, the key is encrypted, or
/// the client cannot be constructed.
pub fn build_client(tls: &ClientTls) -> Result<reqwest::Client, HookError> {
    let mut builder = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("beacon/", env!("CARGO_PKG_VERSION")));

    if tls.accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(material) = &tls.material {
        builder = builder.identity(load_identity(material)?);
    }

    builder.build().map_err(HookError::ClientBuild)
}

/// Load a PEM client identity from the configured certificate and key.
fn load_identity(material: &TlsMaterial) -> Result<reqwest::Identity, HookError> {
    if material.passphrase.is_some() {
        return Err(HookError::EncryptedKey);
    }

    let mut pem = read_pem(&material.cert_path)?;
    pem.extend_from_slice(&read_pem(&material.key_path)?);

    reqwest::Identity::from_pem(&pem).map_err(HookError::InvalidIdentity)
}

fn read_pem(path: &PathBuf) -> Result<Vec<u8>, HookError> {
    std::fs::read(path).map_err(|source| HookError::TlsRead {
        path: path.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_without_tls() {
        assert!(build_client(&ClientTls::default()).is_ok());
    }

    #[test]
    fn test_encrypted_key_is_rejected() {
        let tls = ClientTls {
            material: Some(TlsMaterial {
                cert_path: PathBuf::from("/tmp/cert.pem"),
                key_path: PathBuf::from("/tmp/key.pem"),
                passphrase: Some("secret".to_string()),
            }),
            accept_invalid_certs: false,
        };

        assert!(matches!(build_client(&tls), Err(HookError::EncryptedKey)));
    }

    #[test]
    fn test_missing_material_is_reported_with_path() {
        let tls = ClientTls {
            material: Some(TlsMaterial {
                cert_path: PathBuf::from("/nonexistent/cert.pem"),
                key_path: PathBuf::from("/nonexistent/key.pem"),
                passphrase: None,
            }),
            accept_invalid_certs: false,
        };

        match build_client(&tls) {
            Err(HookError::TlsRead { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/cert.pem"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
