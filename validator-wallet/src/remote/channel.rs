use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::{debug, warn};

use super::{
    protocol::{self, Request, Response},
    tls, ChannelError, RemoteIdentity,
};
use crate::{
    error::{WalletError, WalletResult},
    types::{PublicKey, Signature, SigningRoot},
};

type Connection = TlsStream<TcpStream>;

/// Idle connections kept for reuse
const MAX_IDLE_CONNECTIONS: usize = 8;

/// Pooled mutual-TLS connection to a remote signer.
///
/// Connections are opened lazily and returned to the pool only after a
/// complete exchange, so a cancelled or failed call never leaves a
/// half-read stream behind for the next caller.
pub struct RemoteChannel {
    address: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    timeout: Duration,
    idle: Mutex<Vec<Connection>>,
}

impl RemoteChannel {
    /// Validate the identity and prepare the TLS client. No connection is
    /// made until the first request.
    pub fn open(identity: &RemoteIdentity, timeout: Duration) -> Result<Self, ChannelError> {
        let config = tls::client_config(identity)?;
        let server_name = tls::server_name(identity)?;
        debug!(
            "remote signer channel prepared for {} (timeout {:?})",
            identity.address, timeout
        );

        Ok(Self {
            address: identity.address.clone(),
            server_name,
            connector: TlsConnector::from(Arc::new(config)),
            timeout,
            idle: Mutex::new(Vec::new()),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    /// Ask the signer to sign `root` with `public_key`. The returned
    /// signature has been verified against `public_key`.
    pub async fn request_signature(
        &self,
        public_key: &PublicKey,
        root: &SigningRoot,
    ) -> WalletResult<Signature> {
        let request_id = protocol::next_request_id();
        let request = Request::Sign {
            public_key: *public_key,
            signing_root: *root,
            request_id,
        };

        match self.call(&request).await? {
            Response::Signature {
                signature,
                request_id: echoed,
            } => {
                if echoed != request_id {
                    return Err(ChannelError::Protocol(format!(
                        "response for request {} answered request {}",
                        request_id, echoed
                    ))
                    .into());
                }
                let signature = Signature::from_slice(&signature).ok_or_else(|| {
                    ChannelError::Protocol(format!("signature has {} bytes", signature.len()))
                })?;
                if !public_key.verify(root, &signature) {
                    return Err(ChannelError::Rejected(format!(
                        "signature does not verify against {}",
                        public_key
                    ))
                    .into());
                }
                Ok(signature)
            }
            Response::Rejected { reason, .. } => Err(ChannelError::Rejected(reason).into()),
            other => Err(unexpected(&other)),
        }
    }

    /// Public keys the signer holds for this client.
    pub async fn list_public_keys(&self) -> WalletResult<Vec<PublicKey>> {
        match self.call(&Request::ListPublicKeys).await? {
            Response::PublicKeys(keys) => Ok(keys),
            other => Err(unexpected(&other)),
        }
    }

    /// Round trip used as a health check.
    pub async fn ping(&self) -> WalletResult<()> {
        match self.call(&Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Send one request, retrying exactly once on a fresh connection if the
    /// transport fails. Answers from the signer are never retried.
    async fn call(&self, request: &Request) -> WalletResult<Response> {
        let pooled = self.idle.lock().pop();
        let response = match self.exchange(request, pooled).await {
            Ok(response) => response,
            Err(first) if first.is_transport() => {
                warn!(
                    "remote signer {} failed ({}), retrying on a fresh connection",
                    self.address, first
                );
                self.exchange(request, None).await.map_err(|source| {
                    if source.is_transport() {
                        WalletError::RemoteUnavailable {
                            address: self.address.clone(),
                            source,
                        }
                    } else {
                        source.into()
                    }
                })?
            }
            Err(e) => return Err(e.into()),
        };

        if let Response::Error { message } = response {
            return Err(ChannelError::Server(message).into());
        }
        Ok(response)
    }

    async fn exchange(
        &self,
        request: &Request,
        pooled: Option<Connection>,
    ) -> Result<Response, ChannelError> {
        let round_trip = async {
            let mut conn = match pooled {
                Some(conn) => conn,
                None => self.connect().await?,
            };
            protocol::write_frame(&mut conn, request).await?;
            let response: Response = protocol::read_frame(&mut conn).await?;
            Ok::<_, ChannelError>((conn, response))
        };

        let (conn, response) = tokio::time::timeout(self.timeout, round_trip)
            .await
            .map_err(|_| ChannelError::Timeout(self.timeout))??;

        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
        Ok(response)
    }

    async fn connect(&self) -> Result<Connection, ChannelError> {
        let tcp = TcpStream::connect(&self.address)
            .await
            .map_err(|source| ChannelError::Connect {
                address: self.address.clone(),
                source,
            })?;
        tcp.set_nodelay(true)?;

        let conn = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| ChannelError::HandshakeFailed(e.to_string()))?;
        debug!("opened TLS connection to remote signer {}", self.address);
        Ok(conn)
    }
}

impl std::fmt::Debug for RemoteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChannel")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .field("idle", &self.idle_connections())
            .finish_non_exhaustive()
    }
}

fn unexpected(response: &Response) -> WalletError {
    let name = match response {
        Response::Signature { .. } => "Signature",
        Response::Rejected { .. } => "Rejected",
        Response::PublicKeys(_) => "PublicKeys",
        Response::Pong => "Pong",
        Response::Error { .. } => "Error",
    };
    ChannelError::Protocol(format!("unexpected {} response", name)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_with_missing_identity() {
        let identity = RemoteIdentity::new(
            "127.0.0.1:1",
            "/nonexistent/client.pem",
            "/nonexistent/client.key",
            "/nonexistent/ca.pem",
        );
        let result = RemoteChannel::open(&identity, Duration::from_secs(1));
        assert!(matches!(result, Err(ChannelError::InvalidIdentity(_))));
    }

    #[test]
    fn test_unexpected_response_is_protocol_error() {
        let err = unexpected(&Response::Pong);
        assert!(matches!(
            err,
            WalletError::Remote(ChannelError::Protocol(ref msg)) if msg.contains("Pong")
        ));
    }
}
