//! Server side of each operation.
//!
//! Every handler is entered right after its opcode has been read and leaves
//! the stream positioned at the next opcode. "Not found" and refusals are
//! answered in-band; only transport and framing failures are returned.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::{
    self, DeleteOutcome, UploadReceipt, ACK, CONFIRM_EXISTS, CONFIRM_NOT_FOUND, NAK,
    SIZE_NOT_FOUND,
};
use crate::store::{validate_name, FileStore};
use crate::transfer::{self, StallTimeout};

/// Decode a requested name, returning `None` if the store cannot hold it.
fn store_name(bytes: Vec<u8>) -> Option<String> {
    let name = match String::from_utf8(bytes) {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(
                "Refusing non UTF-8 name '{}'",
                String::from_utf8_lossy(e.as_bytes())
            );
            return None;
        }
    };
    if let Err(e) = validate_name(&name) {
        tracing::warn!("Refusing name: {}", e);
        return None;
    }
    Some(name)
}

async fn refuse_upload<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&NAK).await?;
    stream.flush().await?;
    Ok(())
}

/// Handle `UPLD`: receive a file into the store.
///
/// A zero-length name means the client has no such file and the exchange
/// ends without a reply. A name the store cannot hold is answered with NAK.
/// If the file cannot be created the body is read and discarded, and the
/// receipt reports 0 bytes.
///
/// The stored file is only replaced once the size has arrived, and the
/// name stays locked only while bytes keep coming: a body that stalls for
/// `stall_limit` ends the connection with [`Error::Timeout`].
pub async fn upload<S>(
    stream: &mut S,
    store: &FileStore,
    chunk_size: usize,
    stall_limit: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = protocol::read_name_bytes(stream).await?;
    if name.is_empty() {
        tracing::info!("Upload aborted: file does not exist on the client");
        return Ok(());
    }
    let Some(name) = store_name(name) else {
        return refuse_upload(stream).await;
    };

    stream.write_all(&ACK).await?;
    stream.flush().await?;

    let size = protocol::read_u32(stream).await?;
    tracing::debug!("Receiving {} ({} bytes)", name, size);

    let (summary, stored) = {
        let _guard = store.write_lock(&name).await;
        let mut body = StallTimeout::new(&mut *stream, stall_limit);
        let total = u64::from(size);
        let received = match store.create_file(&name).await {
            Ok(mut file) => transfer::receive_file(&mut body, &mut file, total, chunk_size, |_| {})
                .await
                .map(|summary| (summary, true)),
            Err(e) => {
                // The client is already sending; keep the stream in step.
                tracing::warn!("Cannot create {}: {}", name, e);
                let mut discard = tokio::io::sink();
                transfer::receive_file(&mut body, &mut discard, total, chunk_size, |_| {})
                    .await
                    .map(|summary| (summary, false))
            }
        };
        received.map_err(|e| match e {
            Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                tracing::warn!("Upload of {} stalled: {}", name, io);
                Error::Timeout(stall_limit)
            }
            other => other,
        })?
    };

    let bytes_received = if stored {
        u32::try_from(summary.bytes_moved).map_err(|_| {
            Error::InvalidInput(format!("{} bytes received", summary.bytes_moved))
        })?
    } else {
        0
    };
    let receipt = UploadReceipt {
        bytes_received,
        elapsed: summary.elapsed,
    };
    receipt.write(stream).await?;

    tracing::info!(
        "Received {} ({} bytes in {} chunks, {:.3}s)",
        name,
        summary.bytes_moved,
        summary.chunks,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

/// Handle `LIST`: send the count followed by each name.
pub async fn list<S>(stream: &mut S, store: &FileStore) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let names: Vec<String> = store
        .list()
        .await?
        .into_iter()
        .filter(|name| {
            let fits = u16::try_from(name.len()).is_ok();
            if !fits {
                tracing::warn!("Leaving out a {} byte name from the listing", name.len());
            }
            fits
        })
        .collect();

    let count = u32::try_from(names.len())
        .map_err(|_| Error::InvalidInput(format!("{} files are too many to list", names.len())))?;

    let mut reply = Vec::new();
    protocol::write_u32(&mut reply, count).await?;
    for name in &names {
        protocol::write_name(&mut reply, name.as_bytes()).await?;
    }

    stream.write_all(&reply).await?;
    stream.flush().await?;

    tracing::info!("Listed {} file(s)", count);
    Ok(())
}

/// Handle `DWLD`: send the size (or -1) followed by the file bytes.
pub async fn download<S>(stream: &mut S, store: &FileStore, chunk_size: usize) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = protocol::read_name_bytes(stream).await?;
    let Some(name) = store_name(name) else {
        return send_not_found(stream).await;
    };

    let _guard = store.read_lock(&name).await;
    let (mut file, size) = match store.open_file(&name).await {
        Ok(Some(opened)) => opened,
        Ok(None) => {
            tracing::info!("Download of {}: file does not exist", name);
            return send_not_found(stream).await;
        }
        Err(e) => {
            tracing::warn!("Cannot open {}: {}", name, e);
            return send_not_found(stream).await;
        }
    };

    let Ok(announced) = i32::try_from(size) else {
        tracing::warn!(
            "{} is {} bytes, too large to announce; reporting it as absent",
            name,
            size
        );
        return send_not_found(stream).await;
    };

    protocol::write_i32(stream, announced).await?;
    let summary = transfer::send_file(stream, &mut file, size, chunk_size, |_| {}).await?;

    tracing::info!(
        "Sent {} ({} bytes in {} chunks, {:.3}s)",
        name,
        summary.bytes_moved,
        summary.chunks,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

async fn send_not_found<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    protocol::write_i32(stream, SIZE_NOT_FOUND).await?;
    stream.flush().await?;
    Ok(())
}

/// Handle `DELF`: confirm existence, wait for the client's answer, then
/// remove the file or cancel.
///
/// No lock is held while the client is deciding. If the file is gone by the
/// time the answer arrives, the outcome is "delete failed.".
pub async fn delete<S>(stream: &mut S, store: &FileStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = protocol::read_name_bytes(stream).await?;
    let Some(name) = store_name(name) else {
        protocol::write_i16(stream, CONFIRM_NOT_FOUND).await?;
        stream.flush().await?;
        return Ok(());
    };

    let exists = {
        let _guard = store.read_lock(&name).await;
        store.exists(&name).await.unwrap_or_else(|e| {
            tracing::warn!("Cannot inspect {}: {}", name, e);
            false
        })
    };
    if !exists {
        tracing::info!("Delete of {}: file does not exist", name);
        protocol::write_i16(stream, CONFIRM_NOT_FOUND).await?;
        stream.flush().await?;
        return Ok(());
    }

    protocol::write_i16(stream, CONFIRM_EXISTS).await?;
    stream.flush().await?;

    let answer = protocol::read_text(stream).await?;
    let outcome = if protocol::is_affirmative(&answer) {
        let _guard = store.write_lock(&name).await;
        match store.remove_file(&name).await {
            Ok(()) => DeleteOutcome::Successful,
            Err(e) => {
                tracing::warn!("Failed to delete {}: {}", name, e);
                DeleteOutcome::Failed
            }
        }
    } else {
        DeleteOutcome::Cancelled
    };

    protocol::write_message(stream, outcome.as_str().as_bytes()).await?;
    tracing::info!("Delete of {}: {}", name, outcome);
    Ok(())
}
