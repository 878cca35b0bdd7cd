//! The dqlite-style upgrade handshake and frame codec (spec §4.4).
//!
//! A Raft RPC connection starts life as an ordinary HTTP/1.1 request:
//!
//! ```text
//! GET /database HTTP/1.1
//! Upgrade: dqlite
//! Connection: Upgrade
//! X-Dqlite-Version: 1
//! ```
//!
//! The server answers `101 Switching Protocols` (echoing the version
//! header) if it speaks the same wire version, or `426 Upgrade Required`
//! otherwise. After `101` both ends treat the socket as a raw duplex
//! stream carrying length-prefixed JSON [`RaftMessage`](crate::network::messages::RaftMessage)
//! frames, openraft's four RPCs multiplexed over the one connection the
//! way real dqlite multiplexes its binary protocol.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::GatewayError;
use crate::network::messages::RaftMessage;

pub const UPGRADE_PROTOCOL: &str = "dqlite";
pub const VERSION_HEADER: &str = "X-Dqlite-Version";
pub const WIRE_VERSION: &str = "1";

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Performs the client side of the upgrade handshake over an already
/// connected (and, for TLS listeners, already negotiated) stream. Returns
/// once a `101 Switching Protocols` has been read, leaving `stream`
/// positioned at the start of the framed RPC protocol.
pub async fn client_handshake<S>(stream: &mut S, path: &str, host: &str) -> Result<(), GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: {UPGRADE_PROTOCOL}\r\n\
         Connection: Upgrade\r\n\
         {VERSION_HEADER}: {WIRE_VERSION}\r\n\
         \r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| GatewayError::Handshake(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| GatewayError::Handshake(e.to_string()))?;

    let status_line = read_http_status_line(stream).await?;
    if status_line.contains("101") {
        Ok(())
    } else if status_line.contains("426") {
        Err(GatewayError::Handshake(format!(
            "peer rejected wire version {WIRE_VERSION} with 426 Upgrade Required"
        )))
    } else {
        Err(GatewayError::Handshake(format!(
            "unexpected handshake response: {status_line}"
        )))
    }
}

/// Reads a `\r\n\r\n`-terminated HTTP response header block and returns the
/// status line. Minimal on purpose: this is a one-shot handshake, not a
/// general HTTP client.
async fn read_http_status_line<S>(stream: &mut S) -> Result<String, GatewayError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| GatewayError::Handshake(e.to_string()))?;
        if n == 0 {
            return Err(GatewayError::Handshake("connection closed during handshake".into()));
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
        if buf.len() > 8192 {
            return Err(GatewayError::Handshake("handshake response too large".into()));
        }
    }
    let text = String::from_utf8_lossy(&buf);
    Ok(text.lines().next().unwrap_or_default().to_string())
}

/// Server-side handshake response bytes for a version match.
pub fn accepted_response() -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: {UPGRADE_PROTOCOL}\r\n\
         Connection: Upgrade\r\n\
         {VERSION_HEADER}: {WIRE_VERSION}\r\n\
         \r\n"
    )
}

/// Server-side handshake response bytes for a wire-version mismatch.
pub fn rejected_response() -> String {
    format!(
        "HTTP/1.1 426 Upgrade Required\r\n\
         {VERSION_HEADER}: {WIRE_VERSION}\r\n\
         Content-Length: 0\r\n\
         \r\n"
    )
}

/// Returns `true` if the client's advertised dqlite wire version is one
/// this binary understands.
pub fn version_is_compatible(client_version: &str) -> bool {
    client_version == WIRE_VERSION
}

pub async fn write_frame<S>(stream: &mut S, message: &RaftMessage) -> Result<(), GatewayError>
where
    S: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(message).map_err(|e| GatewayError::Serialization(e.to_string()))?;
    let len = payload.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| GatewayError::Network(e.to_string()))?;
    stream
        .write_all(&payload)
        .await
        .map_err(|e| GatewayError::Network(e.to_string()))?;
    stream.flush().await.map_err(|e| GatewayError::Network(e.to_string()))?;
    Ok(())
}

pub async fn read_frame<S>(stream: &mut S) -> Result<RaftMessage, GatewayError>
where
    S: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| GatewayError::Network(e.to_string()))?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(GatewayError::Network(format!("frame of {len} bytes exceeds limit")));
    }
    let mut payload = vec![0u8; len as usize];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| GatewayError::Network(e.to_string()))?;
    serde_json::from_slice(&payload).map_err(|e| GatewayError::Serialization(e.to_string()))
}

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_compatibility() {
        assert!(version_is_compatible(WIRE_VERSION));
        assert!(!version_is_compatible("2"));
    }

    #[tokio::test]
    async fn frame_roundtrips_through_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let msg = RaftMessage::VoteResponse(crate::network::messages::VoteResponse {
            vote: openraft::Vote::new(1, 2),
            vote_granted: true,
            last_log_id: None,
        });
        write_frame(&mut a, &msg).await.unwrap();
        let got = read_frame(&mut b).await.unwrap();
        match got {
            RaftMessage::VoteResponse(resp) => assert!(resp.vote_granted),
            _ => panic!("unexpected variant"),
        }
    }

    #[tokio::test]
    async fn client_handshake_accepts_101_and_rejects_426() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let _ = server.read(&mut buf).await;
            server.write_all(accepted_response().as_bytes()).await.unwrap();
        });
        client_handshake(&mut client, "/database", "node-a").await.unwrap();

        let (mut client2, mut server2) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let _ = server2.read(&mut buf).await;
            server2.write_all(rejected_response().as_bytes()).await.unwrap();
        });
        let err = client_handshake(&mut client2, "/database", "node-a").await;
        assert!(err.is_err());
    }
}
