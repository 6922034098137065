use std::fmt;
use std::path::Path;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenUriError {
    #[error("invalid listen URI (missing '://' between protocol and details): {0}")]
    MissingSeparator(String),
    #[error("unsupported listen transport {0:?} (expected unix or tcp)")]
    UnsupportedTransport(String),
    #[error("listen URI has an empty address: {0}")]
    EmptyAddress(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Unix,
    Tcp,
}

/// Listener address of the form `<transport>://<address>`, e.g.
/// `unix:///run/milter.sock` or `tcp://127.0.0.1:10025`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenUri {
    pub transport: Transport,
    pub address: String,
}

pub enum MilterListener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl ListenUri {
    pub fn parse(uri: &str) -> Result<Self, ListenUriError> {
        let (transport, address) = uri
            .split_once("://")
            .ok_or_else(|| ListenUriError::MissingSeparator(uri.to_string()))?;
        let transport = match transport {
            "unix" => Transport::Unix,
            "tcp" | "tcp4" | "tcp6" => Transport::Tcp,
            other => return Err(ListenUriError::UnsupportedTransport(other.to_string())),
        };
        if address.is_empty() {
            return Err(ListenUriError::EmptyAddress(uri.to_string()));
        }
        Ok(ListenUri {
            transport,
            address: address.to_string(),
        })
    }

    pub async fn bind(&self) -> anyhow::Result<MilterListener> {
        match self.transport {
            Transport::Unix => {
                // Remove a socket left behind by a previous run
                if Path::new(&self.address).exists() {
                    std::fs::remove_file(&self.address)?;
                }
                Ok(MilterListener::Unix(UnixListener::bind(&self.address)?))
            }
            Transport::Tcp => Ok(MilterListener::Tcp(TcpListener::bind(&self.address).await?)),
        }
    }
}

impl fmt::Display for ListenUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = match self.transport {
            Transport::Unix => "unix",
            Transport::Tcp => "tcp",
        };
        write!(f, "{transport}://{}", self.address)
    }
}
