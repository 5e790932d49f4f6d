//! The two unidirectional pumps of a tunnel client.
//!
//! [upload] moves packets from the interface to the server, [download] moves
//! them back. They share nothing and run independently: one of them stopping
//! leaves the other untouched.

use std::{io, time::Duration};

use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    client::device::MAX_MTU,
    common::{EndOfStreamPolicy, DEFAULT_RETRY_INTERVAL},
    error::TunnelError,
    frame::{encode_into, FrameDecoder, HEADER_LEN, MAX_FRAME_LEN},
};

/// Size of the buffer a packet is read into from the interface.
pub const PACKET_BUFFER_LEN: usize = MAX_MTU as usize;

/// How the download pump treats the server closing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    pub end_of_stream: EndOfStreamPolicy,
    /// Pause before reading again under [EndOfStreamPolicy::Retry].
    pub retry_interval: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            end_of_stream: EndOfStreamPolicy::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Reads packets from `interface` and sends them to `network` as frames.
///
/// A failed network write is logged and the pump goes on with the next
/// packet. Failing to read from the interface, or the interface reaching its
/// end, stops the pump with an error. Cancellation stops it with `Ok`.
pub async fn upload<I, N>(
    mut interface: I,
    mut network: N,
    cancel: CancellationToken,
) -> Result<(), TunnelError>
where
    I: AsyncRead + Unpin,
    N: AsyncWrite + Unpin,
{
    let mut packet = vec![0u8; PACKET_BUFFER_LEN];
    let mut frame = BytesMut::with_capacity(HEADER_LEN + PACKET_BUFFER_LEN);
    loop {
        let size = select! {
            _ = cancel.cancelled() => return Ok(()),
            read = interface.read(&mut packet) => read?,
        };
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "interface closed").into());
        }

        frame.clear();
        encode_into(&packet[..size], &mut frame);
        trace!(size, "Forwarding packet to server");
        select! {
            _ = cancel.cancelled() => return Ok(()),
            written = network.write_all(&frame) => {
                if let Err(error) = written {
                    warn!(%error, size, "Failed to forward packet to server");
                }
            }
        }
    }
}

/// Reads frames from `network` and writes the packets they carry to `interface`.
///
/// A frame split across reads is completed by later reads. Failing to read
/// from the network or to write to the interface stops the pump with an
/// error; the server closing the connection is handled per `options`.
pub async fn download<N, I>(
    mut network: N,
    mut interface: I,
    options: DownloadOptions,
    cancel: CancellationToken,
) -> Result<(), TunnelError>
where
    N: AsyncRead + Unpin,
    I: AsyncWrite + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut at_end_of_stream = false;
    loop {
        let buffer = decoder.buffer_mut();
        buffer.reserve(MAX_FRAME_LEN + 1);
        let read = select! {
            _ = cancel.cancelled() => return Ok(()),
            read = network.read_buf(buffer) => read?,
        };

        if read == 0 {
            match options.end_of_stream {
                EndOfStreamPolicy::Fatal => {
                    info!("Server closed the connection");
                    return Ok(());
                }
                EndOfStreamPolicy::Retry => {
                    if !at_end_of_stream {
                        warn!(
                            retry_interval = ?options.retry_interval,
                            "Server closed the connection, retrying"
                        );
                        at_end_of_stream = true;
                    }
                    select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(options.retry_interval) => continue,
                    }
                }
            }
        }
        at_end_of_stream = false;

        let discarded = decoder.discarded();
        for packet in decoder.frames() {
            trace!(size = packet.len(), "Writing packet to interface");
            select! {
                _ = cancel.cancelled() => return Ok(()),
                written = interface.write_all(&packet) => written?,
            }
        }
        if decoder.discarded() > discarded {
            warn!(
                skipped = decoder.discarded() - discarded,
                "Skipped bytes to find the next frame"
            );
        }
        debug!(buffered = decoder.len(), "Waiting for more data from server");
    }
}
