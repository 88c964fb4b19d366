//! Mount session lifecycle.
//!
//! ```text
//! Unmounted ──mount()──▶ Mounted ──cancel / OS close / serve error──▶ Unmounted
//!     ▲
//!     └── mount failure: no session is created, nothing to undo
//! ```
//!
//! The OS binding is supplied by a [`MountBackend`].  Once
//! [`MountSession::mount`] returns, the handle is released exactly once:
//! at the end of [`MountSession::serve`], by an explicit
//! [`MountSession::unmount`], or on drop, whichever comes first.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MountConfig;
use crate::error::SessionError;
use crate::tree::ContentTree;

/// Something that can bind a content tree to a directory.
pub trait MountBackend {
    type Handle: MountHandle;

    fn mount(
        &self,
        mountpoint: &Path,
        tree: Arc<ContentTree>,
        config: &MountConfig,
    ) -> anyhow::Result<Self::Handle>;
}

/// A live mount owned by a [`MountSession`].
#[async_trait::async_trait]
pub trait MountHandle: Send {
    /// Resolve once the OS side has ended the session on its own (for example
    /// an external `fusermount3 -u`).  An error means serving failed.
    async fn closed(&mut self) -> anyhow::Result<()>;

    /// Tear down the mount.  Called at most once per handle.
    fn release(&mut self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Mounted,
    Unmounted,
}

/// Why [`MountSession::serve`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// The cancellation token fired.
    Cancelled,
    /// The OS ended the session.
    Closed,
}

pub struct MountSession<H: MountHandle> {
    handle: Option<H>,
    mountpoint: PathBuf,
}

impl<H: MountHandle> std::fmt::Debug for MountSession<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountSession")
            .field("mountpoint", &self.mountpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<H: MountHandle> MountSession<H> {
    /// Mount `tree` at `mountpoint`.  On failure no session exists and there
    /// is nothing to unmount.
    pub fn mount<B>(
        backend: &B,
        mountpoint: &Path,
        tree: Arc<ContentTree>,
        config: &MountConfig,
    ) -> Result<Self, SessionError>
    where
        B: MountBackend<Handle = H>,
    {
        let groups = tree.group_count();
        let handle =
            backend
                .mount(mountpoint, tree, config)
                .map_err(|source| SessionError::Mount {
                    mountpoint: mountpoint.to_path_buf(),
                    source,
                })?;
        info!(
            mountpoint = %mountpoint.display(),
            fsname = %config.fsname,
            groups,
            "mounted"
        );
        Ok(Self {
            handle: Some(handle),
            mountpoint: mountpoint.to_path_buf(),
        })
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn state(&self) -> SessionState {
        if self.handle.is_some() {
            SessionState::Mounted
        } else {
            SessionState::Unmounted
        }
    }

    /// Serve until `cancel` fires or the OS closes the session, then unmount.
    ///
    /// The unmount happens on every path out of this function, including
    /// serve errors.  A serve error takes precedence over an unmount error in
    /// the returned result; the latter is still logged.
    pub async fn serve(&mut self, cancel: CancellationToken) -> Result<ServeExit, SessionError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(SessionError::Serve {
                mountpoint: self.mountpoint.clone(),
                source: anyhow::anyhow!("session is not mounted"),
            });
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(mountpoint = %self.mountpoint.display(), "serve loop cancelled");
                Ok(ServeExit::Cancelled)
            }
            res = handle.closed() => match res {
                Ok(()) => {
                    info!(mountpoint = %self.mountpoint.display(), "filesystem closed by the OS");
                    Ok(ServeExit::Closed)
                }
                Err(source) => Err(SessionError::Serve {
                    mountpoint: self.mountpoint.clone(),
                    source,
                }),
            },
        };

        let unmounted = self.unmount();
        match (outcome, unmounted) {
            (Ok(exit), Ok(())) => Ok(exit),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unmount_err)) => {
                warn!("{unmount_err}");
                Err(e)
            }
        }
    }

    /// Release the mount.  Only the first call does anything; later calls
    /// return `Ok(())`.
    pub fn unmount(&mut self) -> Result<(), SessionError> {
        let Some(mut handle) = self.handle.take() else {
            debug!(mountpoint = %self.mountpoint.display(), "already unmounted");
            return Ok(());
        };
        handle.release().map_err(|source| SessionError::Unmount {
            mountpoint: self.mountpoint.clone(),
            source,
        })?;
        info!(mountpoint = %self.mountpoint.display(), "unmounted");
        Ok(())
    }
}

impl<H: MountHandle> Drop for MountSession<H> {
    fn drop(&mut self) {
        if let Err(e) = self.unmount() {
            warn!("{e}");
        }
    }
}
