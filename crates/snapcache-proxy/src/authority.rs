//! Signing authority for the listener.
//!
//! hudsucker requires a certificate authority even when no tunnel is ever
//! intercepted. Snapcache never decrypts `CONNECT` traffic, so the authority
//! is generated in memory at startup and never written to disk or trusted
//! by any client.

use hudsucker::certificate_authority::RcgenAuthority;
use hudsucker::rcgen::{
    BasicConstraints, CertificateParams, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use hudsucker::rustls::crypto::aws_lc_rs::default_provider;

use crate::error::{ProxyError, Result};

const AUTHORITY_NAME: &str = "Snapcache Ephemeral CA";

/// Number of leaf certificates the authority keeps cached.
const CERT_CACHE_SIZE: u64 = 16;

/// Generates a throwaway root authority.
pub fn ephemeral_authority() -> Result<RcgenAuthority> {
    let key_pair = KeyPair::generate().map_err(|e| ProxyError::Authority(e.to_string()))?;

    let mut params = CertificateParams::new(vec![AUTHORITY_NAME.to_string()])
        .map_err(|e| ProxyError::Authority(e.to_string()))?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| ProxyError::Authority(e.to_string()))?;

    let issuer = Issuer::from_ca_cert_pem(&cert.pem(), key_pair)
        .map_err(|e| ProxyError::Authority(e.to_string()))?;

    tracing::debug!("Generated ephemeral signing authority");

    Ok(RcgenAuthority::new(issuer, CERT_CACHE_SIZE, default_provider()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_authority_generates() {
        assert!(ephemeral_authority().is_ok());
    }
}
