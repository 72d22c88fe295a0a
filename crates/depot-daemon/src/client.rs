//! Depot client - talks the frame protocol to a running server

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use depot_core::{
    parse_download_header, parse_listing, parse_status_reply, Command, ErrorCode, FileEntry,
    ProtocolError, ERROR, OK, READY,
};

/// Largest reply read in one go (listings can be long)
const REPLY_BUFFER_SIZE: usize = 64 * 1024;

/// Default time to wait for the server to answer
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("server closed the connection")]
    Closed,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("{0} not found on server")]
    NotFound(String),

    #[error("server rejected the request: {0}")]
    Rejected(String),

    #[error("server reported {0}")]
    Server(ErrorCode),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// One connection to a Depot server
pub struct DepotClient {
    stream: TcpStream,
    reply: Vec<u8>,
    request_timeout: Duration,
}

impl DepotClient {
    /// Connect with the default request timeout
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with_timeout(addr, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        addr: SocketAddr,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = timeout(request_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(request_timeout))?
            .map_err(|source| ClientError::Connect { addr, source })?;
        stream.set_nodelay(true)?;

        debug!("Connected to {}", addr);
        Ok(Self {
            stream,
            reply: vec![0u8; REPLY_BUFFER_SIZE],
            request_timeout,
        })
    }

    /// Send a raw frame and return the raw reply
    pub async fn request(&mut self, frame: &str) -> Result<String, ClientError> {
        self.send(frame).await?;
        self.recv().await
    }

    /// Names and sizes of every stored file
    pub async fn list(&mut self) -> Result<Vec<FileEntry>, ClientError> {
        let reply = self.request(&Command::List.encode()).await?;
        if let Ok(Err(code)) = parse_status_reply(&reply) {
            return Err(ClientError::Server(code));
        }
        Ok(parse_listing(&reply)?)
    }

    /// Store `data` under `name`
    pub async fn upload(&mut self, name: &str, data: &[u8]) -> Result<(), ClientError> {
        self.upload_from(name, data.len() as u64, data).await
    }

    /// Store exactly `size` bytes read from `reader` under `name`.
    ///
    /// If `reader` runs dry early the connection is left mid-upload and
    /// should be dropped.
    pub async fn upload_from<R>(
        &mut self,
        name: &str,
        size: u64,
        reader: R,
    ) -> Result<(), ClientError>
    where
        R: AsyncRead + Unpin,
    {
        let command = Command::Upload {
            name: name.to_string(),
            size,
        };
        let reply = self.request(&command.encode()).await?;
        if reply != READY {
            return Err(ClientError::Rejected(reply));
        }

        let copied = tokio::io::copy(&mut reader.take(size), &mut self.stream).await?;
        if copied < size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended after {} of {} bytes", copied, size),
            )
            .into());
        }
        self.stream.flush().await?;

        info!("Uploaded {} ({} bytes)", name, size);
        Ok(())
    }

    /// Upload a local file, stored under `name` or the file's own name
    pub async fn upload_file(
        &mut self,
        path: &Path,
        name: Option<&str>,
    ) -> Result<(), ClientError> {
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| ProtocolError::InvalidName(format!("{:?}", path)))?,
        };

        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        self.upload_from(&name, size, file).await
    }

    /// Fetch `name` into memory
    pub async fn download(&mut self, name: &str) -> Result<Vec<u8>, ClientError> {
        let mut data = Vec::new();
        self.download_to(name, &mut data).await?;
        Ok(data)
    }

    /// Stream `name` into `writer`; returns the byte count
    pub async fn download_to<W>(&mut self, name: &str, writer: &mut W) -> Result<u64, ClientError>
    where
        W: AsyncWrite + Unpin,
    {
        let command = Command::Download {
            name: name.to_string(),
        };
        let reply = self.request(&command.encode()).await?;
        if reply == ERROR {
            return Err(ClientError::NotFound(name.to_string()));
        }

        let (_, size) = parse_download_header(&reply)?;
        self.send(OK).await?;

        let copied = tokio::io::copy(&mut (&mut self.stream).take(size), writer).await?;
        if copied < size {
            return Err(ClientError::Closed);
        }
        writer.flush().await?;

        debug!("Downloaded {} ({} bytes)", name, copied);
        Ok(copied)
    }

    /// Fetch `name` into a local file at `dest`
    pub async fn download_file(&mut self, name: &str, dest: &Path) -> Result<u64, ClientError> {
        let mut file = tokio::fs::File::create(dest).await?;
        match self.download_to(name, &mut file).await {
            Ok(n) => Ok(n),
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                Err(e)
            }
        }
    }

    pub async fn delete(&mut self, name: &str) -> Result<(), ClientError> {
        let command = Command::Delete {
            name: name.to_string(),
        };
        let reply = self.request(&command.encode()).await?;
        match parse_status_reply(&reply) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(status_error(&reply, name)),
        }
    }

    /// End the session
    pub async fn quit(mut self) -> Result<(), ClientError> {
        self.send(&Command::Quit.encode()).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), ClientError> {
        self.stream.write_all(frame.as_bytes()).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, ClientError> {
        let n = timeout(self.request_timeout, self.stream.read(&mut self.reply))
            .await
            .map_err(|_| ClientError::Timeout(self.request_timeout))??;
        if n == 0 {
            return Err(ClientError::Closed);
        }
        Ok(String::from_utf8_lossy(&self.reply[..n]).into_owned())
    }
}

fn status_error(reply: &str, name: &str) -> ClientError {
    match parse_status_reply(reply) {
        Ok(Err(ErrorCode::NotFound)) => ClientError::NotFound(name.to_string()),
        Ok(Err(code)) => ClientError::Server(code),
        _ => ClientError::Rejected(reply.to_string()),
    }
}
