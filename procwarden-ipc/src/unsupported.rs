use crate::{IpcMessage, IpcResponse};
use procwarden_core::{Error, Result};
use std::path::Path;

fn unsupported<T>() -> Result<T> {
    Err(Error::Other(anyhow::anyhow!(
        "the control socket needs unix domain sockets"
    )))
}

pub struct IpcServer;

impl IpcServer {
    pub async fn bind(_path: impl AsRef<Path>) -> Result<Self> {
        unsupported()
    }

    pub fn path(&self) -> &Path {
        Path::new("")
    }

    pub async fn accept(&self) -> Result<IpcConnection> {
        unsupported()
    }
}

pub struct IpcConnection;

impl IpcConnection {
    pub async fn recv(&mut self) -> Result<Option<IpcMessage>> {
        unsupported()
    }

    pub async fn send(&mut self, _response: &IpcResponse) -> Result<()> {
        unsupported()
    }
}

pub struct IpcClient;

impl IpcClient {
    pub async fn connect(_path: impl AsRef<Path>) -> Result<Self> {
        unsupported()
    }

    pub async fn send(&mut self, _msg: &IpcMessage) -> Result<()> {
        unsupported()
    }

    pub async fn recv(&mut self) -> Result<IpcResponse> {
        unsupported()
    }

    pub async fn request(&mut self, _msg: &IpcMessage) -> Result<IpcResponse> {
        unsupported()
    }
}
