use crate::{IpcMessage, IpcResponse, MAX_FRAME_LEN, decode, encode};
use procwarden_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, trace};

async fn write_frame<T: Serialize>(stream: &mut UnixStream, value: &T) -> Result<()> {
    let data = encode(value)?;
    stream.write_u32(data.len() as u32).await?;
    stream.write_all(&data).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<T: for<'de> Deserialize<'de>>(stream: &mut UnixStream) -> Result<T> {
    let len = stream.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(Error::Other(anyhow::anyhow!(
            "Frame of {} bytes exceeds limit of {}",
            len,
            MAX_FRAME_LEN
        )));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    decode(&buf)
}

/// Listening side of the control socket. The socket file is removed on drop.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        // A stale socket from a previous daemon blocks bind.
        let _ = tokio::fs::remove_file(&path).await;
        let listener = UnixListener::bind(&path)?;
        debug!("IPC server listening on {:?}", path);
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn accept(&self) -> Result<IpcConnection> {
        let (stream, _) = self.listener.accept().await?;
        trace!("Accepted IPC connection");
        Ok(IpcConnection { stream })
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Daemon side of one client connection.
pub struct IpcConnection {
    stream: UnixStream,
}

impl IpcConnection {
    /// Next request, or `None` once the client hung up between frames.
    pub async fn recv(&mut self) -> Result<Option<IpcMessage>> {
        match read_frame(&mut self.stream).await {
            Ok(msg) => Ok(Some(msg)),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn send(&mut self, response: &IpcResponse) -> Result<()> {
        write_frame(&mut self.stream, response).await
    }
}

pub struct IpcClient {
    stream: UnixStream,
}

impl IpcClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, msg: &IpcMessage) -> Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> Result<IpcResponse> {
        read_frame(&mut self.stream).await
    }

    /// Sends one message and waits for its response.
    pub async fn request(&mut self, msg: &IpcMessage) -> Result<IpcResponse> {
        self.send(msg).await?;
        self.recv().await
    }
}
