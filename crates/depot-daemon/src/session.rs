//! Per-connection protocol handler
//!
//! ```text
//! AWAIT_HEADER ──► DISPATCH ──┬──► AWAIT_HEADER            (LIST, DELETE, errors)
//!                             ├──► STREAM_UPLOAD ──► AWAIT_HEADER
//!                             └──► STREAM_DOWNLOAD ──► AWAIT_HEADER
//! any state ──► CLOSED   (QUIT, EOF, idle timeout, transport error)
//! ```
//!
//! Each header is taken from a single bounded read. Every socket read and
//! write is bounded by the idle timeout.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use depot_core::path::sanitize_name;
use depot_core::{
    download_header, encode_listing, error_reply, Command, ErrorCode, ProtocolError,
    ServerConfig, ERROR, INVALID, OK, READY,
};

use crate::storage::{Download, Storage, StorageError};

/// Session errors; all of them end the session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("idle for {0:?}")]
    IdleTimeout(Duration),

    #[error("{name} produced {sent} of the {announced} bytes announced")]
    SourceTruncated {
        name: String,
        announced: u64,
        sent: u64,
    },
}

impl SessionError {
    /// Peer went away (reset, broken pipe) rather than something failing here
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Per-session limits
#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub frame_size: usize,
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            frame_size: config.frame_size.max(1),
        }
    }
}

enum Flow {
    Continue,
    Close,
}

/// One accepted connection
pub struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    storage: Arc<Storage>,
    idle_timeout: Duration,
    frame: Vec<u8>,
    chunk: Vec<u8>,
    /// Frame that arrived glued to a download acknowledgement
    pending: Option<Vec<u8>>,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        storage: Arc<Storage>,
        settings: SessionSettings,
    ) -> Self {
        let chunk = vec![0u8; storage.chunk_size()];
        Self {
            stream,
            peer,
            storage,
            idle_timeout: settings.idle_timeout,
            frame: vec![0u8; settings.frame_size],
            chunk,
            pending: None,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Serve frames until the peer quits or disconnects
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            let Some(frame) = self.read_frame().await? else {
                debug!("{} closed the connection", self.peer);
                break;
            };

            let request = std::str::from_utf8(&frame)
                .map_err(|_| ProtocolError::NotUtf8)
                .and_then(Command::parse);

            if let Flow::Close = self.dispatch(request).await? {
                break;
            }
        }

        let _ = self.stream.shutdown().await;
        Ok(())
    }

    async fn dispatch(
        &mut self,
        request: Result<Command, ProtocolError>,
    ) -> Result<Flow, SessionError> {
        let command = match request {
            Ok(command) => command,
            Err(e @ (ProtocolError::UnknownCommand(_) | ProtocolError::NotUtf8)) => {
                debug!("{} sent an invalid frame: {}", self.peer, e);
                self.send(INVALID).await?;
                return Ok(Flow::Continue);
            }
            Err(e) => {
                warn!("{} sent a bad frame: {}", self.peer, e);
                self.send(ERROR).await?;
                return Ok(Flow::Continue);
            }
        };

        debug!("{} -> {}", self.peer, command.verb());

        match command {
            Command::List => self.handle_list().await,
            Command::Upload { name, size } => self.handle_upload(&name, size).await,
            Command::Download { name } => self.handle_download(&name).await,
            Command::Delete { name } => self.handle_delete(&name).await,
            Command::Quit => Ok(Flow::Close),
        }
    }

    async fn handle_list(&mut self) -> Result<Flow, SessionError> {
        let reply = match self.storage.list().await {
            Ok(entries) => encode_listing(&entries),
            Err(e) => {
                error!("Listing {:?} failed: {}", self.storage.root(), e);
                error_reply(e.code())
            }
        };

        self.send(&reply).await?;
        Ok(Flow::Continue)
    }

    async fn handle_upload(&mut self, wire_name: &str, size: u64) -> Result<Flow, SessionError> {
        let name = match sanitize_name(wire_name) {
            Ok(name) => name,
            Err(e) => {
                warn!("{} rejected upload name {:?}: {}", self.peer, wire_name, e);
                self.send(ERROR).await?;
                return Ok(Flow::Continue);
            }
        };

        self.send(READY).await?;

        // The client streams right after READY, so a failure to stage the
        // upload still has to consume the announced bytes.
        let mut upload = match self.storage.begin_upload(&name, size).await {
            Ok(upload) => Some(upload),
            Err(e) => {
                error!("Cannot stage upload of {}: {}", name, e);
                None
            }
        };

        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(self.chunk.len() as u64) as usize;
            let n = self.read_chunk(want).await?;

            if n == 0 {
                warn!(
                    "{} disconnected mid-upload of {} ({} of {} bytes)",
                    self.peer,
                    name,
                    size - remaining,
                    size
                );
                if let Some(upload) = upload {
                    upload.abort().await;
                }
                return Ok(Flow::Close);
            }

            let failed = match upload.as_mut() {
                Some(upload) => upload.write(&self.chunk[..n]).await.err(),
                None => None,
            };
            if let Some(e) = failed {
                error!("Writing upload of {} failed: {}", name, e);
                if let Some(upload) = upload.take() {
                    upload.abort().await;
                }
            }

            remaining -= n as u64;
        }

        if let Some(upload) = upload {
            if let Err(e) = upload.commit().await {
                error!("Committing upload of {} failed: {}", name, e);
            }
        }

        Ok(Flow::Continue)
    }

    async fn handle_download(&mut self, wire_name: &str) -> Result<Flow, SessionError> {
        let name = match sanitize_name(wire_name) {
            Ok(name) => name,
            Err(e) => {
                debug!("{} rejected download name {:?}: {}", self.peer, wire_name, e);
                self.send(ERROR).await?;
                return Ok(Flow::Continue);
            }
        };

        if !self.storage.contains(&name).await {
            debug!("{} asked for missing {}", self.peer, name);
            self.send(ERROR).await?;
            return Ok(Flow::Continue);
        }

        let mut download = match self.storage.open_read(&name).await {
            Ok(download) => download,
            Err(e) => {
                match e {
                    StorageError::NotFound(_) | StorageError::IsDirectory(_) => {
                        debug!("Download of {} refused: {}", name, e)
                    }
                    _ => error!("Opening {} for download failed: {}", name, e),
                }
                self.send(ERROR).await?;
                return Ok(Flow::Continue);
            }
        };

        self.send(&download_header(&name, download.size())).await?;

        let Some(frame) = self.read_frame().await? else {
            return Ok(Flow::Close);
        };
        let ack = trim_line_end(&frame);
        if ack != OK.as_bytes() {
            match ack.strip_prefix(OK.as_bytes()) {
                // A zero-byte download lets the client's next frame share a
                // read with the acknowledgement
                Some(next) if download.size() == 0 => {
                    let next = trim_line_start(next);
                    if !next.is_empty() {
                        self.pending = Some(next.to_vec());
                    }
                }
                _ => {
                    debug!("{} declined download of {}", self.peer, name);
                    return Ok(Flow::Continue);
                }
            }
        }

        let sent = self.send_download(&mut download).await?;
        info!("Sent {} ({} bytes) to {}", name, sent, self.peer);
        Ok(Flow::Continue)
    }

    async fn handle_delete(&mut self, wire_name: &str) -> Result<Flow, SessionError> {
        let reply = match sanitize_name(wire_name) {
            Ok(name) => match self.storage.delete(&name).await {
                Ok(()) => OK.to_string(),
                Err(e) => {
                    match e.code() {
                        ErrorCode::NotFound => debug!("Delete of missing {}", name),
                        _ => warn!("Delete of {} failed: {}", name, e),
                    }
                    error_reply(e.code())
                }
            },
            Err(e) => {
                debug!("{} rejected delete name {:?}: {}", self.peer, wire_name, e);
                error_reply(ErrorCode::InvalidName)
            }
        };

        self.send(&reply).await?;
        Ok(Flow::Continue)
    }

    async fn send_download(&mut self, download: &mut Download) -> Result<u64, SessionError> {
        let idle = self.idle_timeout;
        let mut sent = 0u64;

        loop {
            let n = download.read(&mut self.chunk).await?;
            if n == 0 {
                break;
            }
            timeout(idle, self.stream.write_all(&self.chunk[..n]))
                .await
                .map_err(|_| SessionError::IdleTimeout(idle))??;
            sent += n as u64;
        }

        if sent < download.size() {
            return Err(SessionError::SourceTruncated {
                name: download.name().to_string(),
                announced: download.size(),
                sent,
            });
        }

        Ok(sent)
    }

    /// One bounded read; `None` when the peer closed the connection
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }

        let idle = self.idle_timeout;
        let n = timeout(idle, self.stream.read(&mut self.frame))
            .await
            .map_err(|_| SessionError::IdleTimeout(idle))??;

        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.frame[..n].to_vec()))
    }

    async fn read_chunk(&mut self, max: usize) -> Result<usize, SessionError> {
        let idle = self.idle_timeout;
        let limit = max.min(self.chunk.len());
        let n = timeout(idle, self.stream.read(&mut self.chunk[..limit]))
            .await
            .map_err(|_| SessionError::IdleTimeout(idle))??;
        Ok(n)
    }

    async fn send(&mut self, reply: &str) -> Result<(), SessionError> {
        let idle = self.idle_timeout;
        timeout(idle, self.stream.write_all(reply.as_bytes()))
            .await
            .map_err(|_| SessionError::IdleTimeout(idle))??;
        Ok(())
    }
}

fn trim_line_end(mut bytes: &[u8]) -> &[u8] {
    while let [head @ .., b'\r' | b'\n'] = bytes {
        bytes = head;
    }
    bytes
}

fn trim_line_start(mut bytes: &[u8]) -> &[u8] {
    while let [b'\r' | b'\n', tail @ ..] = bytes {
        bytes = tail;
    }
    bytes
}
