//! Relay engine
//!
//! Bridges a raw client byte stream and a negotiated [`TunnelConnection`]
//! with two independent pumps:
//!
//! - outbound: each read of up to `chunk_size` bytes from the client becomes
//!   exactly one binary message
//! - inbound: binary message payloads are written verbatim to the client,
//!   a close frame ends the direction, anything else is dropped
//!
//! The first EOF, close frame or error in either direction completes the
//! session. Both
//! pumps watch the shared [`CompletionSignal`], so a pump blocked on a quiet
//! peer wakes up as soon as the other one finishes.

use super::{
    CompletionSignal, MessageKind, TunnelConnection, TunnelError, TunnelReader, TunnelWriter,
};
use crate::protocol::CLOSE_GRACE;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

/// One relayed session: a client stream bridged to a tunnel connection
pub struct RelaySession<C, T> {
    client: C,
    tunnel: TunnelConnection<T>,
    chunk_size: usize,
}

impl<C, T> RelaySession<C, T>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// `chunk_size` is in bytes and caps the size of every outbound message
    pub fn new(client: C, tunnel: TunnelConnection<T>, chunk_size: usize) -> Self {
        Self {
            client,
            tunnel,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Relay until either side finishes, then close both ends.
    ///
    /// EOF on either side is a normal end. Returns the first error seen by
    /// either direction.
    pub async fn run(self) -> Result<(), TunnelError> {
        let (client_rd, client_wr) = tokio::io::split(self.client);
        let (writer, reader) = self.tunnel.split();
        let done = CompletionSignal::new();

        let inbound = tokio::spawn(pump_inbound(reader, client_wr, done.clone()));
        let outbound = pump_outbound(client_rd, writer, self.chunk_size, done).await;

        let inbound = match inbound.await {
            Ok(result) => result,
            Err(e) => Err(TunnelError::Relay(io::Error::new(io::ErrorKind::Other, e))),
        };

        outbound.and(inbound)
    }
}

/// Tunnel -> client
async fn pump_inbound<T, W>(
    mut reader: TunnelReader<T>,
    mut client: W,
    done: CompletionSignal,
) -> Result<(), TunnelError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = relay_inbound(&mut reader, &mut client, &done).await;
    if let Err(e) = &result {
        debug!("Inbound relay ended: {}", e);
    }
    done.complete();

    match timeout(CLOSE_GRACE, client.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!("Client shutdown: {}", e),
        Err(_) => debug!("Client shutdown timed out"),
    }

    result
}

async fn relay_inbound<T, W>(
    reader: &mut TunnelReader<T>,
    client: &mut W,
    done: &CompletionSignal,
) -> Result<(), TunnelError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = done.completed() => return Ok(()),
            message = reader.next_message() => message?,
        };

        let Some(message) = message else {
            return Ok(());
        };

        // The relay may keep the socket open after its close frame
        if message.kind == MessageKind::Close {
            debug!("Relay sent close frame");
            return Ok(());
        }

        if !message.is_binary() {
            trace!("Discarding {:?} message", message.kind);
            continue;
        }

        tokio::select! {
            _ = done.completed() => return Ok(()),
            written = client.write_all(&message.payload) => written?,
        }
    }
}

/// Client -> tunnel
async fn pump_outbound<R, T>(
    mut client: R,
    mut writer: TunnelWriter<T>,
    chunk_size: usize,
    done: CompletionSignal,
) -> Result<(), TunnelError>
where
    R: AsyncRead + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let result = relay_outbound(&mut client, &mut writer, chunk_size, &done).await;
    if let Err(e) = &result {
        debug!("Outbound relay ended: {}", e);
    }
    done.complete();

    match timeout(CLOSE_GRACE, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!("Tunnel close: {}", e),
        Err(_) => debug!("Tunnel close timed out"),
    }

    result
}

async fn relay_outbound<R, T>(
    client: &mut R,
    writer: &mut TunnelWriter<T>,
    chunk_size: usize,
    done: &CompletionSignal,
) -> Result<(), TunnelError>
where
    R: AsyncRead + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = tokio::select! {
            _ = done.completed() => return Ok(()),
            read = client.read(&mut buf) => read?,
        };

        // EOF
        if n == 0 {
            return Ok(());
        }

        tokio::select! {
            _ = done.completed() => return Ok(()),
            sent = writer.write_binary(&buf[..n]) => sent?,
        }
    }
}
