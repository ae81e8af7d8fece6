//! TLS acceptor construction for WSS (spec §4.1: "WSS additionally
//! terminates TLS using the configured certificate").

use crate::error::{WsError, WsResult};
use relaycore_model::TlsParams;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Once};

static CRYPTO_PROVIDER_INIT: Once = Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

pub fn build_tls_acceptor(params: &TlsParams) -> WsResult<tokio_rustls::TlsAcceptor> {
    ensure_crypto_provider();

    let certs = load_certs(Path::new(&params.cert_path))?;
    let key = load_private_key(Path::new(&params.key_path))?;
    let versions = protocol_versions(params)?;

    let server_crypto = rustls::ServerConfig::builder_with_protocol_versions(&versions)
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| WsError::Tls(format!("invalid cert/key: {e}")))?;

    Ok(tokio_rustls::TlsAcceptor::from(Arc::new(server_crypto)))
}

/// Maps the tunnel's configured `min_version..=max_version` range onto the
/// rustls version constants accepted during the handshake, instead of
/// letting every supported version through.
fn protocol_versions(params: &TlsParams) -> WsResult<Vec<&'static rustls::SupportedProtocolVersion>> {
    use relaycore_model::TlsVersion::{Tls12, Tls13};
    match (params.min_version, params.max_version) {
        (Tls12, Tls12) => Ok(vec![&rustls::version::TLS12]),
        (Tls12, Tls13) => Ok(vec![&rustls::version::TLS12, &rustls::version::TLS13]),
        (Tls13, Tls13) => Ok(vec![&rustls::version::TLS13]),
        (Tls13, Tls12) => Err(WsError::Tls("tls min-version must not exceed max-version".to_string())),
    }
}

fn load_certs(path: &Path) -> WsResult<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| WsError::Tls(format!("failed to open cert file: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| WsError::Tls(format!("failed to parse certs: {e}")))
}

fn load_private_key(path: &Path) -> WsResult<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| WsError::Tls(format!("failed to open key file: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| WsError::Tls(format!("failed to parse key: {e}")))?
        .ok_or_else(|| WsError::Tls("no private key found".to_string()))
}
