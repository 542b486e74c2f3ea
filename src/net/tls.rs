//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;

use crate::config::UpstreamTlsConfig;

/// Only HTTP/1.1 can carry an `Upgrade` handshake.
const ALPN_HTTP11: &[u8] = b"http/1.1";

#[derive(Debug, Error)]
pub enum TlsSetupError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("no trust anchors configured for upstream TLS")]
    NoTrustAnchors,

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the client configuration used to dial `wss` targets.
pub fn build_client_config(config: &UpstreamTlsConfig) -> Result<Arc<ClientConfig>, TlsSetupError> {
    let mut roots = RootCertStore::empty();
    if config.use_webpki_roots {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    if let Some(path) = &config.extra_ca_path {
        let (added, ignored) = roots.add_parsable_certificates(load_certs(Path::new(path))?);
        tracing::debug!(path = %path, added, ignored, "Loaded extra upstream CA bundle");
    }
    if roots.is_empty() {
        return Err(TlsSetupError::NoTrustAnchors);
    }
    client_config_with_roots(roots)
}

/// Client configuration trusting exactly `roots`.
pub fn client_config_with_roots(roots: RootCertStore) -> Result<Arc<ClientConfig>, TlsSetupError> {
    let mut config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];
    Ok(Arc::new(config))
}

/// Load a static server certificate for the TLS listener.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, TlsSetupError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];
    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsSetupError> {
    File::open(path).map(BufReader::new).map_err(|source| TlsSetupError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsSetupError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsSetupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsSetupError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsSetupError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsSetupError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsSetupError::NoPrivateKey(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_self_signed(dir: &Path) -> (PathBuf, PathBuf) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn default_client_config_uses_bundled_roots() {
        let config = build_client_config(&UpstreamTlsConfig::default()).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn extra_ca_only() {
        let dir = tempfile::tempdir().unwrap();
        let (cert_path, _) = write_self_signed(dir.path());

        let config = UpstreamTlsConfig {
            use_webpki_roots: false,
            extra_ca_path: Some(cert_path.to_string_lossy().into_owned()),
        };
        assert!(build_client_config(&config).is_ok());
    }

    #[test]
    fn no_roots_is_an_error() {
        let config = UpstreamTlsConfig {
            use_webpki_roots: false,
            extra_ca_path: None,
        };
        assert!(matches!(
            build_client_config(&config),
            Err(TlsSetupError::NoTrustAnchors)
        ));
    }

    #[test]
    fn server_config_from_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let (cert_path, key_path) = write_self_signed(dir.path());
        assert!(load_server_config(&cert_path, &key_path).is_ok());

        let err = load_server_config(&key_path, &key_path).unwrap_err();
        assert!(matches!(err, TlsSetupError::NoCertificates(_)));
    }
}
