// DBGP connection management
//
// Dials the IDE, announces the debuggee with the init packet and starts the
// transport tasks. The interpreter side drives the returned session through
// the DebugHook trait.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::commands::CommandTable;
use crate::config::SessionConfig;
use crate::eventloop::{run_transport, ResponseWriter};
use crate::object::ScriptHost;
use crate::protocol::{DbgpError, DbgpResult};
use crate::session::Session;

#[derive(Debug)]
pub struct DbgpConnection {
    session: Arc<Session>,
    transport: JoinHandle<()>,
}

impl DbgpConnection {
    /// Connect to an IDE listening on `host:port` (the IDE is the server in DBGP)
    pub async fn connect(
        host: &str,
        port: u16,
        config: SessionConfig,
        script_host: Arc<dyn ScriptHost>,
        file_uri: &str,
    ) -> DbgpResult<Self> {
        info!("Connecting to IDE at {}:{}", host, port);

        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        Self::attach(reader, writer, config, script_host, file_uri)
    }

    /// Start a session over an already established byte stream.
    /// Must be called from within a tokio runtime.
    pub fn attach<R, W>(
        reader: R,
        writer: W,
        config: SessionConfig,
        script_host: Arc<dyn ScriptHost>,
        file_uri: &str,
    ) -> DbgpResult<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (response_writer, outbound) = ResponseWriter::channel();
        let session = Arc::new(Session::new(config, script_host, response_writer));

        if !session.send_init(file_uri) {
            return Err(DbgpError::ConnectionClosed);
        }

        let transport = tokio::spawn(run_transport(
            reader,
            writer,
            Arc::clone(&session),
            outbound,
            Arc::new(CommandTable::new()),
        ));

        Ok(Self { session, transport })
    }

    /// Shared session handle, passed to the interpreter thread
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    /// Wait until the transport has shut down
    pub async fn closed(self) {
        if let Err(e) = self.transport.await {
            warn!("Transport task failed: {}", e);
        }
    }

    /// Close the session and wait for the transport to finish
    pub async fn shutdown(self) {
        self.session.close();
        self.closed().await;
    }
}
