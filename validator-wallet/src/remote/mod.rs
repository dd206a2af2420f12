//! Remote signing channel
//!
//! A mutually authenticated TLS connection to an external signing service.
//! The wallet owns no private keys in this mode; it presents a client
//! certificate, trusts only the configured CA, and forwards signing
//! requests over a small length-prefixed protocol.

mod channel;
pub mod protocol;
pub mod tls;

use std::{io, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use channel::RemoteChannel;

/// Endpoint and TLS material for a remote signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    /// `host:port` of the signer
    pub address: String,
    /// PEM client certificate presented to the signer
    pub client_cert: PathBuf,
    /// PEM private key for `client_cert`
    pub client_key: PathBuf,
    /// PEM CA certificate; the only trust root for the signer
    pub ca_cert: PathBuf,
    /// Name checked against the signer's certificate. Defaults to the host
    /// part of `address`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl RemoteIdentity {
    pub fn new(
        address: impl Into<String>,
        client_cert: impl Into<PathBuf>,
        client_key: impl Into<PathBuf>,
        ca_cert: impl Into<PathBuf>,
    ) -> Self {
        Self {
            address: address.into(),
            client_cert: client_cert.into(),
            client_key: client_key.into(),
            ca_cert: ca_cert.into(),
            server_name: None,
        }
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Host part of `address`, without brackets for IPv6 literals.
    pub fn host(&self) -> &str {
        let host = match self.address.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => host,
            _ => &self.address,
        };
        host.trim_start_matches('[').trim_end_matches(']')
    }
}

/// Errors raised by the remote signing channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid TLS identity: {0}")]
    InvalidIdentity(String),

    #[error("certificate {} is outside its validity window", .0.display())]
    CertificateExpired(PathBuf),

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(usize),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("remote signer rejected the request: {0}")]
    Rejected(String),

    #[error("remote signer error: {0}")]
    Server(String),
}

impl ChannelError {
    /// Failures of the connection itself, as opposed to an answer from the
    /// signer. Only these are retried.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChannelError::Connect { .. }
                | ChannelError::HandshakeFailed(_)
                | ChannelError::Timeout(_)
                | ChannelError::Io(_)
        )
    }
}

impl From<bincode::Error> for ChannelError {
    fn from(err: bincode::Error) -> Self {
        ChannelError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_host() {
        let identity = RemoteIdentity::new("signer.local:9000", "c.pem", "k.pem", "ca.pem");
        assert_eq!(identity.host(), "signer.local");

        let identity = RemoteIdentity::new("[::1]:9000", "c.pem", "k.pem", "ca.pem");
        assert_eq!(identity.host(), "::1");

        let identity = RemoteIdentity::new("signer.local", "c.pem", "k.pem", "ca.pem");
        assert_eq!(identity.host(), "signer.local");
    }

    #[test]
    fn test_transport_classification() {
        assert!(ChannelError::Timeout(Duration::from_secs(5)).is_transport());
        assert!(ChannelError::HandshakeFailed("bad cert".into()).is_transport());
        assert!(!ChannelError::Rejected("slashable".into()).is_transport());
        assert!(!ChannelError::CertificateExpired(PathBuf::from("client.pem")).is_transport());
    }
}
