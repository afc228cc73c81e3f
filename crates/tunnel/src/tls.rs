//! TLS client side of the tunnel
//!
//! Servers are reached by the address an operator typed, not by a name a CA
//! vouched for, so the certificate chain is validated against the trusted
//! roots while a host name mismatch is tolerated.

use crate::config::TlsSettings;
use crate::error::{Result, TunnelError};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Chain verification without host name verification
#[derive(Debug)]
pub struct ChainOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ChainOnlyVerifier {
    pub fn new(roots: RootCertStore) -> Result<Self> {
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| TunnelError::Tls(format!("Failed to build certificate verifier: {}", e)))?;
        Ok(Self { inner })
    }
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => {
                debug!("Ignoring certificate name mismatch for {:?}", server_name);
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Root store from the system roots and/or an operator CA bundle
pub fn root_store(settings: &TlsSettings) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();

    if settings.native_roots {
        let native = rustls_native_certs::load_native_certs();
        for err in native.errors {
            debug!("Warning loading native cert: {}", err);
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        debug!("Loaded {} native root certificates ({} ignored)", added, ignored);
    }

    if let Some(path) = settings.ca_file_path() {
        for cert in load_ca_file(&path)? {
            roots.add(cert)?;
        }
    }

    if roots.is_empty() {
        return Err(TunnelError::Tls("No trusted root certificates found".into()));
    }

    debug!("Trusting {} root certificates", roots.len());
    Ok(roots)
}

/// Certificates from a PEM bundle
pub fn load_ca_file(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        TunnelError::Tls(format!("Failed to open CA file {}: {}", path.display(), e))
    })?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            TunnelError::Tls(format!("Failed to parse CA file {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(TunnelError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Client configuration for upstream connections
pub fn client_config(settings: &TlsSettings) -> Result<ClientConfig> {
    let verifier = ChainOnlyVerifier::new(root_store(settings)?)?;
    Ok(ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth())
}

/// Server name for the handshake; IP literals are accepted as-is
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| TunnelError::Tls(format!("Invalid server name: {}", host)))
}
