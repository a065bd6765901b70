//! Ferry wire protocol primitives.
//!
//! Ferry has no frame header. Each operation starts with a 4-byte ASCII
//! opcode and continues with a fixed sequence of fields that both sides know
//! from the opcode alone:
//!
//! ```text
//! ┌────────┬──────────────────────────────────┬──────────────────────────────┐
//! │ Opcode │ Request                          │ Response                     │
//! ├────────┼──────────────────────────────────┼──────────────────────────────┤
//! │ CONN   │ -                                │ -                            │
//! │ UPLD   │ u16 len, name, [u32 size, bytes] │ "ACK", u32 received, elapsed │
//! │ LIST   │ -                                │ u32 count, count x (u16,name)│
//! │ DWLD   │ u16 len, name                    │ i32 size (-1 absent), bytes  │
//! │ DELF   │ u16 len, name, [confirmation]    │ i16 1/-1, [outcome]          │
//! │ QUIT   │ -                                │ connection closed            │
//! └────────┴──────────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! - All integers are little-endian.
//! - Fixed-width fields are always read to their exact width; a stream that
//!   ends early is [`ProtocolError::Truncated`](crate::error::ProtocolError).
//! - Free-text fields (elapsed time, delete confirmation and outcome) carry no
//!   length. They are written with a single write and read with a single read
//!   of at most [`MAX_MESSAGE_SIZE`] bytes.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Opcode size in bytes
pub const OPCODE_SIZE: usize = 4;

/// Upload acknowledgement: the server is ready to receive file bytes.
pub const ACK: [u8; 3] = *b"ACK";

/// Upload refusal: the server will not store a file under that name.
pub const NAK: [u8; 3] = *b"NAK";

/// Maximum size of a free-text message
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Download size sentinel: the requested file does not exist.
pub const SIZE_NOT_FOUND: i32 = -1;

/// Delete confirmation code: the file exists.
pub const CONFIRM_EXISTS: i16 = 1;

/// Delete confirmation code: the file does not exist.
pub const CONFIRM_NOT_FOUND: i16 = -1;

/// Operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Connection handshake
    Conn,
    /// Upload a file to the store
    Upload,
    /// List the store
    List,
    /// Download a file from the store
    Download,
    /// Delete a file from the store
    Delete,
    /// End the session
    Quit,
}

impl OpCode {
    /// Every opcode, in protocol order.
    pub const ALL: [Self; 6] = [
        Self::Conn,
        Self::Upload,
        Self::List,
        Self::Download,
        Self::Delete,
        Self::Quit,
    ];

    /// The literal 4-byte tag sent on the wire.
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8; OPCODE_SIZE] {
        match self {
            Self::Conn => b"CONN",
            Self::Upload => b"UPLD",
            Self::List => b"LIST",
            Self::Download => b"DWLD",
            Self::Delete => b"DELF",
            Self::Quit => b"QUIT",
        }
    }

    /// The tag as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conn => "CONN",
            Self::Upload => "UPLD",
            Self::List => "LIST",
            Self::Download => "DWLD",
            Self::Delete => "DELF",
            Self::Quit => "QUIT",
        }
    }

    /// Match a 4-byte tag literally. Case matters.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; OPCODE_SIZE]) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_bytes() == bytes)
    }

    /// Parse operator input such as `"UPLD"`.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let bytes: &[u8; OPCODE_SIZE] = input.as_bytes().try_into().ok()?;
        Self::from_bytes(bytes)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The server's answer to a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteConfirmation {
    /// The file exists; a confirmation round-trip follows
    Exists,
    /// The file does not exist; the exchange is over
    NotFound,
    /// Any other code
    ServerError(i16),
}

impl DeleteConfirmation {
    /// Decode the signed 16-bit confirmation code.
    #[must_use]
    pub const fn from_code(code: i16) -> Self {
        match code {
            CONFIRM_EXISTS => Self::Exists,
            CONFIRM_NOT_FOUND => Self::NotFound,
            other => Self::ServerError(other),
        }
    }

    /// The code sent on the wire.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::Exists => CONFIRM_EXISTS,
            Self::NotFound => CONFIRM_NOT_FOUND,
            Self::ServerError(code) => code,
        }
    }
}

/// Result of a confirmed delete, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The file was removed
    Successful,
    /// Removal failed on the server's filesystem
    Failed,
    /// The operator did not confirm
    Cancelled,
}

impl DeleteOutcome {
    /// The outcome text sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Successful => "delete successful.",
            Self::Failed => "delete failed.",
            Self::Cancelled => "delete cancelled.",
        }
    }

    /// Recognise an outcome text, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        [Self::Successful, Self::Failed, Self::Cancelled]
            .into_iter()
            .find(|outcome| outcome.as_str().eq_ignore_ascii_case(text))
    }
}

impl fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a confirmation text asks for the delete to go ahead.
#[must_use]
pub fn is_affirmative(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("yes")
}

/// What the server reports after receiving an upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadReceipt {
    /// Bytes the server wrote to its store
    pub bytes_received: u32,
    /// Time the server spent receiving
    pub elapsed: Duration,
}

impl UploadReceipt {
    /// Encode as `u32 bytes_received` followed by the decimal elapsed seconds.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let elapsed = format_elapsed(self.elapsed);
        let mut buf = Vec::with_capacity(4 + elapsed.len());
        buf.extend_from_slice(&self.bytes_received.to_le_bytes());
        buf.extend_from_slice(elapsed.as_bytes());
        buf
    }

    /// Write the receipt with a single write so the elapsed text arrives in
    /// one piece.
    pub async fn write<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a receipt.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the elapsed text is not a non-negative number.
    pub async fn read<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let bytes_received = read_u32(reader).await?;
        let text = read_message(reader).await?;
        let elapsed = parse_elapsed(&text)?;
        Ok(Self {
            bytes_received,
            elapsed,
        })
    }
}

/// Format a duration as decimal seconds, the way elapsed times travel.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    elapsed.as_secs_f64().to_string()
}

/// Parse decimal seconds.
///
/// # Errors
///
/// Returns `Malformed` if the text is not a finite, non-negative number.
pub fn parse_elapsed(text: &[u8]) -> Result<Duration> {
    let text = std::str::from_utf8(text)
        .map_err(|_| Error::malformed("elapsed time", "not valid UTF-8"))?
        .trim();
    let secs: f64 = text
        .parse()
        .map_err(|_| Error::malformed("elapsed time", format!("'{text}' is not a number")))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::malformed("elapsed time", format!("'{text}' is out of range")))
}

/// Fill `buf` completely, reporting how far we got if the stream ends.
async fn read_field<R>(reader: &mut R, buf: &mut [u8], field: &'static str) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::truncated(field, buf.len(), filled));
        }
        filled += n;
    }
    Ok(())
}

/// Read a little-endian `u16`.
pub async fn read_u16<R>(reader: &mut R) -> Result<u16>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    read_field(reader, &mut buf, "u16").await?;
    Ok(u16::from_le_bytes(buf))
}

/// Write a little-endian `u16`.
pub async fn write_u16<W>(writer: &mut W, value: u16) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&value.to_le_bytes()).await?;
    Ok(())
}

/// Read a little-endian `i16`.
pub async fn read_i16<R>(reader: &mut R) -> Result<i16>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    read_field(reader, &mut buf, "i16").await?;
    Ok(i16::from_le_bytes(buf))
}

/// Write a little-endian `i16`.
pub async fn write_i16<W>(writer: &mut W, value: i16) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&value.to_le_bytes()).await?;
    Ok(())
}

/// Read a little-endian `u32`.
pub async fn read_u32<R>(reader: &mut R) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    read_field(reader, &mut buf, "u32").await?;
    Ok(u32::from_le_bytes(buf))
}

/// Write a little-endian `u32`.
pub async fn write_u32<W>(writer: &mut W, value: u32) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&value.to_le_bytes()).await?;
    Ok(())
}

/// Read a little-endian `i32`.
pub async fn read_i32<R>(reader: &mut R) -> Result<i32>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    read_field(reader, &mut buf, "i32").await?;
    Ok(i32::from_le_bytes(buf))
}

/// Write a little-endian `i32`.
pub async fn write_i32<W>(writer: &mut W, value: i32) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&value.to_le_bytes()).await?;
    Ok(())
}

/// Read a `u16` length followed by that many bytes.
pub async fn read_name_bytes<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = read_u16(reader).await?;
    let mut name = vec![0u8; usize::from(len)];
    read_field(reader, &mut name, "name").await?;
    Ok(name)
}

/// Read a length-prefixed name and decode it as UTF-8.
///
/// # Errors
///
/// Returns `Truncated` on a short read and `Malformed` if the bytes are not
/// UTF-8.
pub async fn read_name<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_name_bytes(reader).await?;
    String::from_utf8(bytes).map_err(|_| Error::malformed("name", "not valid UTF-8"))
}

/// Write a `u16` length followed by the bytes.
///
/// # Errors
///
/// Returns `InvalidInput` if the name does not fit a `u16` length.
pub async fn write_name<W>(writer: &mut W, name: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u16::try_from(name.len()).map_err(|_| {
        Error::InvalidInput(format!(
            "name is {} bytes, the protocol allows at most {}",
            name.len(),
            u16::MAX
        ))
    })?;
    write_u16(writer, len).await?;
    writer.write_all(name).await?;
    Ok(())
}

/// Read a 4-byte opcode tag.
///
/// Returns `Ok(None)` if the stream ends cleanly before the first byte,
/// which is how a peer that went away between operations looks.
pub async fn read_opcode<R>(reader: &mut R) -> Result<Option<[u8; OPCODE_SIZE]>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; OPCODE_SIZE];
    let first = reader.read(&mut buf).await?;
    if first == 0 {
        return Ok(None);
    }
    let mut filled = first;
    while filled < OPCODE_SIZE {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::truncated("opcode", OPCODE_SIZE, filled));
        }
        filled += n;
    }
    Ok(Some(buf))
}

/// Write an opcode tag.
pub async fn write_opcode<W>(writer: &mut W, op: OpCode) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(op.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the 3-byte upload acknowledgement.
pub async fn read_ack<R>(reader: &mut R) -> Result<[u8; 3]>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 3];
    read_field(reader, &mut buf, "acknowledgement").await?;
    Ok(buf)
}

/// Read one free-text message of at most [`MAX_MESSAGE_SIZE`] bytes.
///
/// # Errors
///
/// Returns `Truncated` if the peer closed the stream instead of sending.
pub async fn read_message<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Err(Error::truncated("message", 1, 0));
    }
    buf.truncate(n);
    Ok(buf)
}

/// Read one free-text message as a string, replacing invalid UTF-8.
pub async fn read_text<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_message(reader).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write one free-text message with a single write.
///
/// # Errors
///
/// Returns `InvalidInput` for an empty message or one longer than
/// [`MAX_MESSAGE_SIZE`]; neither could be read back as one message.
pub async fn write_message<W>(writer: &mut W, message: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if message.is_empty() || message.len() > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidInput(format!(
            "message must be 1..={MAX_MESSAGE_SIZE} bytes, got {}",
            message.len()
        )));
    }
    writer.write_all(message).await?;
    writer.flush().await?;
    Ok(())
}
