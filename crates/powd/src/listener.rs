//! TCP listener for custom-command frames.
//!
//! Each connection is a sequence of frames. Every frame is routed on the
//! blocking pool, since handlers touch SQLite, and a reply frame is
//! written back when the handler produces one. A malformed frame closes
//! the connection; the peer's next poll reconnects.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use powd_core::wire::{CommandHeader, HEADER_LEN};
use powd_core::CustomCommand;

use crate::dispatch::CommandRouter;

pub struct CommandListener {
    listener: TcpListener,
    router: Arc<CommandRouter>,
    shutdown: broadcast::Receiver<()>,
}

impl CommandListener {
    pub fn new(
        listener: TcpListener,
        router: Arc<CommandRouter>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            router,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let local = self.listener.local_addr()?;
        tracing::info!(addr = %local, "command listener started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("command listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let router = self.router.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, peer, router).await {
                            tracing::debug!(peer = %peer, error = %e, "connection closed");
                        }
                    });
                }
            }
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    router: Arc<CommandRouter>,
) -> Result<()> {
    tracing::debug!(peer = %peer, "connection accepted");

    while let Some(command) = read_command(&mut stream).await? {
        let router = router.clone();
        let reply = tokio::task::spawn_blocking(move || router.route(&command))
            .await
            .context("command handler panicked")?;

        if let Some(reply) = reply {
            write_command(&mut stream, &reply).await?;
        }
    }
    Ok(())
}

/// Read one frame. `None` on a clean end of stream between frames.
pub async fn read_command<R>(reader: &mut R) -> Result<Option<CustomCommand>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header = CommandHeader::parse(&header_buf)?;
    let mut payload = vec![0u8; header.payload_len()];
    reader
        .read_exact(&mut payload)
        .await
        .context("truncated payload")?;
    header.verify(&payload)?;

    Ok(Some(CustomCommand::from_parts(&header, Bytes::from(payload))))
}

pub async fn write_command<W>(writer: &mut W, command: &CustomCommand) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = command.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
