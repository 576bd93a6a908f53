use std::{
    future::Future,
    io,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    ais_reformatter::process_complete_chunk,
    config::ChannelConfig,
    dated_file::{DatedFileRouter, Opened},
    error::ChannelError,
};

const RECV_BUF_SIZE: usize = 6144;
/// Datagrams larger than a typical Ethernet payload get noted in the log.
pub const LARGE_DATAGRAM: usize = 1460;
/// How long a read waits before the loop re-checks the date and shutdown.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Records one channel until shutdown is requested or a fatal error occurs.
///
/// The socket and the output file are handled independently: a read error
/// re-opens the socket once without touching the file, and a date change
/// switches the file without touching the socket.
pub async fn run_udp_listener(
    channel: ChannelConfig,
    bind_address: IpAddr,
    data_root: PathBuf,
    shutdown_token: CancellationToken,
) -> Result<(), ChannelError> {
    let port = channel.port;
    let addr = SocketAddr::new(bind_address, port);
    let mut socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| ChannelError::Bind { port, source })?;
    info!(%addr, "connected for input");

    let mut router = DatedFileRouter::new(data_root, channel);
    let mut buf = vec![0u8; RECV_BUF_SIZE].into_boxed_slice();

    let res = loop {
        if shutdown_token.is_cancelled() {
            break Ok(());
        }
        if let Err(e) = switch_if_new_day(&mut router, Utc::now()).await {
            break Err(e);
        }

        let recv_res = tokio::select! {
            _ = shutdown_token.cancelled() => {
                break Ok(());
            },
            res = tokio::time::timeout(RECV_TIMEOUT, socket.recv(&mut buf)) => res,
        };

        let num_bytes = match recv_res {
            // nothing arrived, go round and look at the clock again
            Err(_elapsed) => continue,
            Ok(Ok(num_bytes)) => num_bytes,
            Ok(Err(e)) => {
                drop(socket);
                socket = match reopen(port, e, || UdpSocket::bind(addr)).await {
                    Ok(socket) => socket,
                    Err(e) => break Err(e),
                };
                continue;
            }
        };

        if num_bytes > LARGE_DATAGRAM {
            info!(bytes = num_bytes, "large packet received");
        }

        if let Err(e) = record_datagram(&mut router, &buf[..num_bytes], Utc::now()).await {
            break Err(e);
        }
    };

    if let Some(path) = router.current_path() {
        info!(path = %path.display(), "closing output file");
    }
    router.close().await;
    info!("ending process for input port");
    res
}

/// Makes the single reconnect attempt allowed after a failed read.
async fn reopen<S, F, Fut>(port: u16, read_error: io::Error, bind: F) -> Result<S, ChannelError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = io::Result<S>>,
{
    warn!(error = %read_error, "UDP read error, will re-open port");
    let socket = bind()
        .await
        .map_err(|source| ChannelError::Rebind { port, source })?;
    info!("input reconnected");
    Ok(socket)
}

/// Writes every sentence of one datagram, all stamped with `received_at`,
/// into the file for the UTC day of `received_at`.
async fn record_datagram(
    router: &mut DatedFileRouter,
    chunk: &[u8],
    received_at: DateTime<Utc>,
) -> Result<(), ChannelError> {
    switch_if_new_day(router, received_at).await?;
    let (rows, count) = process_complete_chunk(chunk, router.port(), || received_at);
    debug!(sentences = count, bytes = chunk.len(), "datagram scanned");
    if rows.is_empty() {
        return Ok(());
    }
    router.append(&rows).await
}

async fn switch_if_new_day(
    router: &mut DatedFileRouter,
    now: DateTime<Utc>,
) -> Result<(), ChannelError> {
    match router.ensure_current(now).await? {
        Some(Opened::Created(path)) => info!(path = %path.display(), "creating new file"),
        Some(Opened::Appended(path)) => info!(path = %path.display(), "appending to file"),
        None => {}
    }
    Ok(())
}
