//! Wire protocol for the remote signer.
//!
//! Each frame is a 4-byte big-endian length followed by a bincode payload.

use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ChannelError;
use crate::types::{PublicKey, SigningRoot};

/// Largest accepted frame payload
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Messages from the wallet to the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Sign {
        public_key: PublicKey,
        signing_root: SigningRoot,
        /// Kept identical across a retry so the signer can deduplicate
        request_id: u64,
    },
    ListPublicKeys,
    Ping,
}

/// Messages from the signer to the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Signature {
        signature: Vec<u8>,
        request_id: u64,
    },
    /// The signer refused, e.g. slashing protection or unknown key
    Rejected {
        reason: String,
        request_id: u64,
    },
    PublicKeys(Vec<PublicKey>),
    Pong,
    Error {
        message: String,
    },
}

/// Random id for a new sign request.
pub fn next_request_id() -> u64 {
    rand::thread_rng().gen()
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ChannelError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let request = Request::Sign {
            public_key: PublicKey::from_bytes([1; 32]),
            signing_root: SigningRoot::new([2; 32]),
            request_id: 42,
        };

        write_frame(&mut client, &request).await.unwrap();
        let received: Request = read_frame(&mut server).await.unwrap();
        assert_eq!(received, request);

        write_frame(&mut server, &Response::Pong).await.unwrap();
        let reply: Response = read_frame(&mut client).await.unwrap();
        assert_eq!(reply, Response::Pong);
    }

    #[tokio::test]
    async fn test_length_prefix_is_big_endian() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, &Request::Ping).await.unwrap();

        let mut len_buf = [0u8; 4];
        server.read_exact(&mut len_buf).await.unwrap();
        let expected = bincode::serialize(&Request::Ping).unwrap().len() as u32;
        assert_eq!(len_buf, expected.to_be_bytes());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes())
            .await
            .unwrap();
        let result: Result<Response, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(ChannelError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&16u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0u8; 4]).await.unwrap();
        drop(client);
        let result: Result<Response, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(ChannelError::Io(_))));
    }
}
