//! A deliberately non-validating TLS client config, shared by the
//! upstream DNS resolver and the boundary redial helper. Both dial
//! hosts the intermediary cannot trust a CA chain for when fronting.
use std::sync::Arc;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, Error as TlsError, ServerName};
use std::time::SystemTime;

struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

/// A `rustls::ClientConfig` whose certificate verifier accepts any
/// certificate for any name.
pub fn client_config() -> Arc<ClientConfig> {
    Arc::new(
        ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth(),
    )
}

pub fn connector() -> tokio_rustls::TlsConnector {
    tokio_rustls::TlsConnector::from(client_config())
}
