//! PROXY protocol v2 header
//!
//! A load balancer in front of the listener prepends this binary header to
//! each connection; it carries the address of the original client.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

const SIGNATURE: [u8; 12] = *b"\r\n\r\n\0\r\nQUIT\n";

const CMD_LOCAL: u8 = 0x0;
const CMD_PROXY: u8 = 0x1;

const TCP4: u8 = 0x11;
const TCP6: u8 = 0x21;

/// Read a v2 header from the start of a connection.
///
/// Returns the client address for `PROXY` over TCP, `None` for `LOCAL`
/// connections and address families that carry no IP endpoint.
pub async fn read_header<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<SocketAddr>> {
    let mut header = [0u8; 16];
    reader.read_exact(&mut header).await?;

    if header[..12] != SIGNATURE {
        return Err(invalid("missing PROXY v2 signature"));
    }

    let version = header[12] >> 4;
    let command = header[12] & 0x0F;
    if version != 2 {
        return Err(invalid("unsupported PROXY protocol version"));
    }

    let family = header[13];
    let len = u16::from_be_bytes([header[14], header[15]]) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    match command {
        CMD_LOCAL => Ok(None),
        CMD_PROXY => Ok(source_address(family, &payload)),
        _ => Err(invalid("unknown PROXY command")),
    }
}

fn source_address(family: u8, payload: &[u8]) -> Option<SocketAddr> {
    match family {
        TCP4 if payload.len() >= 12 => {
            let ip = Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]);
            let port = u16::from_be_bytes([payload[8], payload[9]]);
            Some(SocketAddr::new(ip.into(), port))
        }
        TCP6 if payload.len() >= 36 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&payload[..16]);
            let port = u16::from_be_bytes([payload[32], payload[33]]);
            Some(SocketAddr::new(Ipv6Addr::from(octets).into(), port))
        }
        _ => None,
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}
