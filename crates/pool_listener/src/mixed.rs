use std::sync::Arc;

use pool_outbound::Outbound;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Handshakes whatever protocol the client opened with (SOCKS5 or an HTTP
/// proxy's `CONNECT`/plain request), then relays bytes between the client and
/// this port's one named outbound. Every connection on a given port is
/// forwarded to the same outbound, matching the facade's contract: the port
/// is bound to one proxy, not to whatever target the client asked for.
pub(crate) async fn serve(mut client: TcpStream, outbound: Arc<Outbound>) -> anyhow::Result<()> {
    let mut peek = [0u8; 1];
    let n = client.peek(&mut peek).await?;
    if n == 0 {
        return Ok(());
    }

    if peek[0] == 0x05 {
        handshake_socks5(&mut client).await?;
    } else {
        handshake_http(&mut client).await?;
    }

    let mut upstream = outbound.dial_context().await?;
    debug!(
        target: "pool::listener",
        outbound = outbound.name(),
        "tunnel established"
    );

    let (from_client, from_upstream) = io::copy_bidirectional(&mut client, &mut upstream).await?;
    debug!(
        target: "pool::listener",
        outbound = outbound.name(),
        from_client,
        from_upstream,
        "tunnel closed"
    );
    Ok(())
}

/// Minimal SOCKS5 handshake: accepts the greeting with no-auth, reads (and
/// discards the target of) a CONNECT request, and replies success
/// unconditionally — the real destination is always this port's outbound.
async fn handshake_socks5(client: &mut TcpStream) -> anyhow::Result<()> {
    let mut header = [0u8; 2];
    client.read_exact(&mut header).await?;
    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    client.read_exact(&mut methods).await?;
    client.write_all(&[0x05, 0x00]).await?; // version 5, no auth required

    let mut req_head = [0u8; 4];
    client.read_exact(&mut req_head).await?;
    let atyp = req_head[3];
    match atyp {
        0x01 => {
            let mut addr = [0u8; 4 + 2];
            client.read_exact(&mut addr).await?;
        }
        0x03 => {
            let mut len = [0u8; 1];
            client.read_exact(&mut len).await?;
            let mut addr = vec![0u8; len[0] as usize + 2];
            client.read_exact(&mut addr).await?;
        }
        0x04 => {
            let mut addr = [0u8; 16 + 2];
            client.read_exact(&mut addr).await?;
        }
        other => {
            warn!(target: "pool::listener", atyp = other, "unsupported SOCKS5 address type");
            anyhow::bail!("unsupported SOCKS5 address type {other}");
        }
    }

    // Reply: succeeded, bind address 0.0.0.0:0 (we don't expose a real bound
    // relay address; clients only care about the success byte).
    client
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

/// Handles an HTTP-proxy client: answers `CONNECT` with `200 Connection
/// Established` and otherwise leaves the already-buffered request line alone
/// (it is simply relayed to the outbound as the first bytes of the tunnel).
async fn handshake_http(client: &mut TcpStream) -> anyhow::Result<()> {
    let mut buf = [0u8; 8];
    let n = client.peek(&mut buf).await?;
    if &buf[..n.min(7)] == b"CONNECT" {
        // Drain the request line + headers up to the blank line.
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        let mut blank_lines = 0;
        loop {
            client.read_exact(&mut byte).await?;
            line.push(byte[0]);
            if line.ends_with(b"\r\n") {
                if line == b"\r\n" {
                    blank_lines += 1;
                } else {
                    blank_lines = 0;
                }
                line.clear();
                if blank_lines == 1 {
                    break;
                }
            }
        }
        client
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;
    }
    // Plain (non-CONNECT) HTTP proxy requests are relayed byte-for-byte; the
    // bytes already peeked above remain in the kernel socket buffer and will
    // be read again once the tunnel copy starts.
    Ok(())
}
