//! Unix domain socket endpoint.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tracing::warn;

use super::TransportConfig;
use crate::security::CallerIdentity;

pub(crate) struct Listener {
    inner: UnixListener,
    path: PathBuf,
}

impl Listener {
    pub(crate) fn bind(config: &TransportConfig) -> Result<Self> {
        let path = PathBuf::from(&config.endpoint);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        if path.exists() {
            // A previous broker exited without cleaning up.
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
        }

        let inner = UnixListener::bind(&path)
            .with_context(|| format!("Failed to bind {}", path.display()))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(config.socket_mode))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;

        Ok(Self { inner, path })
    }

    pub(crate) async fn accept(&mut self) -> io::Result<(UnixStream, CallerIdentity)> {
        let (stream, _) = self.inner.accept().await?;
        let caller = match stream.peer_cred() {
            Ok(cred) => CallerIdentity::new(
                format!("uid:{}", cred.uid()),
                cred.pid().and_then(|pid| u32::try_from(pid).ok()),
            ),
            Err(err) => {
                warn!(error = %err, "Peer credentials unavailable");
                CallerIdentity::unknown()
            }
        };
        Ok((stream, caller))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub(crate) async fn connect_stream(endpoint: &str) -> io::Result<UnixStream> {
    UnixStream::connect(endpoint).await
}
