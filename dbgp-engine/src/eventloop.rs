// DBGP transport loop
//
// One task reads and deframes commands from the IDE, handing each to a
// blocking worker; one task drains the outbound channel and owns the write
// half, so responses are never interleaved on the wire.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, trace, warn};

use crate::commands::CommandTable;
use crate::protocol::{frame_message, DbgpError, DbgpResult};
use crate::reader::CommandDecoder;
use crate::session::Session;

const READ_BUFFER_SIZE: usize = 4096;

/// Producer side of the outbound queue. Once closed every send is dropped
/// with a log line instead of failing the caller.
#[derive(Debug)]
pub struct ResponseWriter {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl ResponseWriter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Queue an xml body. Returns false when the transport is gone.
    pub fn send(&self, body: String) -> bool {
        let mut guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(body).is_ok() {
                    return true;
                }
                warn!("Transport writer has shut down, dropping outbound messages");
                *guard = None;
                false
            }
            None => {
                debug!("Transport closed, dropping message: {}", body);
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.tx
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Stop accepting messages. Already queued messages are still written.
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

/// Run the transport until either direction fails or the session closes
pub async fn run_transport<R, W>(
    reader: R,
    writer: W,
    session: Arc<Session>,
    outbound: mpsc::UnboundedReceiver<String>,
    table: Arc<CommandTable>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!("Transport started");

    let workers = Arc::new(Semaphore::new(session.config().worker_limit.max(1)));

    tokio::select! {
        result = read_loop(reader, Arc::clone(&session), table, workers) => {
            match result {
                Ok(()) => info!("IDE closed the connection"),
                Err(e) => warn!("Failed to read from IDE: {}", e),
            }
        }
        result = write_loop(writer, outbound) => {
            match result {
                Ok(()) => debug!("Outbound queue closed"),
                Err(e) => warn!("Failed to write to IDE: {}", e),
            }
        }
    }

    session.close();
    info!("Transport shutting down");
}

async fn read_loop<R>(
    mut reader: R,
    session: Arc<Session>,
    table: Arc<CommandTable>,
    workers: Arc<Semaphore>,
) -> DbgpResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = CommandDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for line in decoder.feed(&buf[..n])? {
            let permit = Arc::clone(&workers)
                .acquire_owned()
                .await
                .map_err(|_| DbgpError::ConnectionClosed)?;

            let session = Arc::clone(&session);
            let table = Arc::clone(&table);
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                table.dispatch(&session, &line);
            });
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> DbgpResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(body) = outbound.recv().await {
        trace!("-> {}", body);
        let framed = frame_message(&body);
        writer.write_all(&framed).await?;
        writer.flush().await?;
    }

    writer.shutdown().await?;
    Ok(())
}
