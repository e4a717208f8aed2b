// Crossfire message framing
//
// <label>:<decimal length>\r\n<length bytes of UTF-8 JSON>
// The label is skipped on read; there is no trailing delimiter.

use crate::protocol::{CrossfireError, CrossfireResult, Packet, FRAME_LABEL};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted payload size (10MB)
/// Guards against a corrupt length header allocating unbounded memory
pub const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

// Enough for any u64 length
const MAX_LENGTH_DIGITS: usize = 20;

/// Map an I/O failure to the protocol's error kinds: a stream that ends
/// mid-read means the peer is gone
pub(crate) fn eof_as_disconnect(e: std::io::Error) -> CrossfireError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe => CrossfireError::Disconnected,
        _ => CrossfireError::Io(e),
    }
}

async fn next_byte<R>(reader: &mut R) -> CrossfireResult<u8>
where
    R: AsyncRead + Unpin,
{
    reader.read_u8().await.map_err(eof_as_disconnect)
}

/// Read one framed payload and return the raw JSON bytes
pub async fn read_frame<R>(reader: &mut R) -> CrossfireResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    // Skip the label up to and including the colon
    while next_byte(reader).await? != b':' {}

    let mut digits = String::new();
    loop {
        let c = next_byte(reader).await?;
        if c == b'\r' {
            break;
        }
        if digits.len() >= MAX_LENGTH_DIGITS {
            return Err(CrossfireError::Protocol(format!(
                "Content length exceeds {} characters: {}",
                MAX_LENGTH_DIGITS, digits
            )));
        }
        digits.push(c as char);
    }

    let length: usize = digits.parse().map_err(|_| {
        CrossfireError::Protocol(format!("Failed to parse content length: {}", digits))
    })?;

    let c = next_byte(reader).await?;
    if c != b'\n' {
        return Err(CrossfireError::Protocol(format!(
            "Failed to parse content length: {} next char was not '\\n' but {:?}",
            digits, c as char
        )));
    }

    if length > MAX_PACKET_SIZE {
        return Err(CrossfireError::Protocol(format!(
            "Packet too large: {} bytes (max: {} bytes)",
            length, MAX_PACKET_SIZE
        )));
    }

    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(eof_as_disconnect)?;

    Ok(payload)
}

/// Read one frame and classify it into a packet
pub async fn read_packet<R>(reader: &mut R) -> CrossfireResult<Packet>
where
    R: AsyncRead + Unpin,
{
    let payload = read_frame(reader).await?;
    let json = serde_json::from_slice(&payload)?;
    Packet::from_json(json)
}

/// Serialize a packet into a complete frame
pub fn encode_packet(packet: &Packet) -> CrossfireResult<BytesMut> {
    let payload = serde_json::to_vec(&packet.to_json()?)?;
    let header = format!("{}:{}\r\n", FRAME_LABEL, payload.len());

    let mut buf = BytesMut::with_capacity(header.len() + payload.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(&payload);
    Ok(buf)
}

/// Write one framed packet and flush it
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> CrossfireResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_packet(packet)?;
    writer.write_all(&frame).await.map_err(eof_as_disconnect)?;
    writer.flush().await.map_err(eof_as_disconnect)?;
    Ok(())
}
