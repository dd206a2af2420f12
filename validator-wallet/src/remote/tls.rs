//! PEM loading and rustls client configuration for the remote signer.

use std::{fs, io::BufReader, path::Path, sync::Arc};

use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    ClientConfig, RootCertStore,
};

use super::{ChannelError, RemoteIdentity};

/// Load every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ChannelError> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            ChannelError::InvalidIdentity(format!("invalid certificate {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(ChannelError::InvalidIdentity(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load the first private key in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ChannelError> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut BufReader::new(pem.as_slice()))
        .map_err(|e| {
            ChannelError::InvalidIdentity(format!("invalid private key {}: {}", path.display(), e))
        })?
        .ok_or_else(|| {
            ChannelError::InvalidIdentity(format!("no private key found in {}", path.display()))
        })
}

/// Fail with [`ChannelError::CertificateExpired`] unless `cert` is valid
/// right now.
pub fn ensure_currently_valid(cert: &CertificateDer<'_>, path: &Path) -> Result<(), ChannelError> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref()).map_err(|e| {
        ChannelError::InvalidIdentity(format!("unparseable certificate {}: {}", path.display(), e))
    })?;
    if !parsed.validity().is_valid() {
        return Err(ChannelError::CertificateExpired(path.to_path_buf()));
    }
    Ok(())
}

/// Build the mutual-TLS client configuration for `identity`.
///
/// The configured CA is the only trust anchor; system roots are not used.
pub fn client_config(identity: &RemoteIdentity) -> Result<ClientConfig, ChannelError> {
    let client_certs = load_certs(&identity.client_cert)?;
    ensure_currently_valid(&client_certs[0], &identity.client_cert)?;
    let client_key = load_private_key(&identity.client_key)?;

    let mut roots = RootCertStore::empty();
    for ca in load_certs(&identity.ca_cert)? {
        roots.add(ca).map_err(|e| {
            ChannelError::InvalidIdentity(format!(
                "unusable CA certificate {}: {}",
                identity.ca_cert.display(),
                e
            ))
        })?;
    }

    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ChannelError::InvalidIdentity(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(client_certs, client_key)
        .map_err(|e| ChannelError::InvalidIdentity(format!("client certificate rejected: {}", e)))
}

/// Name the signer's certificate is verified against.
pub fn server_name(identity: &RemoteIdentity) -> Result<ServerName<'static>, ChannelError> {
    let name = identity
        .server_name
        .clone()
        .unwrap_or_else(|| identity.host().to_string());
    ServerName::try_from(name.clone())
        .map_err(|e| ChannelError::InvalidIdentity(format!("invalid server name '{}': {}", name, e)))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ChannelError> {
    fs::read(path)
        .map_err(|e| ChannelError::InvalidIdentity(format!("reading {}: {}", path.display(), e)))
}
