//! `fuser`-backed [`MountBackend`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use fuser::{BackgroundSession, Config, MountOption, SessionACL};
use packfs_core::{ContentTree, MountBackend, MountConfig, MountHandle};
use tokio::sync::oneshot;
use tracing::debug;

use crate::fs::RenderFs;

/// Mounts content trees with FUSE.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuseBackend;

impl MountBackend for FuseBackend {
    type Handle = FuseMount;

    /// The mount is read-only and restricted to the owner
    /// (`SessionACL::Owner`).  The mountpoint must already exist; an occupied
    /// or missing mountpoint is an error, never cleaned up behind the
    /// caller's back.
    fn mount(
        &self,
        mountpoint: &Path,
        tree: Arc<ContentTree>,
        config: &MountConfig,
    ) -> anyhow::Result<FuseMount> {
        let meta = std::fs::metadata(mountpoint)
            .with_context(|| format!("stat mountpoint {}", mountpoint.display()))?;
        if !meta.is_dir() {
            anyhow::bail!("mountpoint {} is not a directory", mountpoint.display());
        }

        let (closed_tx, closed_rx) = oneshot::channel();
        let fs = RenderFs::new(tree, config.attr_ttl()).notify_on_close(closed_tx);

        let mut fuse_config = Config::default();
        fuse_config.mount_options = vec![
            MountOption::RO,
            MountOption::FSName(config.fsname.clone()),
            MountOption::Subtype(config.subtype.clone()),
        ];
        fuse_config.acl = SessionACL::Owner;

        let session = fuser::spawn_mount2(fs, mountpoint, &fuse_config)
            .with_context(|| format!("mount FUSE at {}", mountpoint.display()))?;
        debug!(mountpoint = %mountpoint.display(), "FUSE session started");

        Ok(FuseMount {
            session: Some(session),
            closed: Some(closed_rx),
            mountpoint: mountpoint.to_path_buf(),
        })
    }
}

/// A live FUSE mount.
///
/// Releasing drops the `BackgroundSession`, which stops the FUSE thread and
/// unmounts through fuser's drop handler; `fusermount3 -u` then runs in case
/// the kernel mount outlived it.
pub struct FuseMount {
    session: Option<BackgroundSession>,
    closed: Option<oneshot::Receiver<()>>,
    mountpoint: PathBuf,
}

impl std::fmt::Debug for FuseMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuseMount")
            .field("mountpoint", &self.mountpoint)
            .field("live", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

/// Wait for the session thread and surface its run-loop result.
///
/// A clean unmount (`ENODEV` from the device) ends the loop with `Ok`; any
/// other device error, or a panic on the thread, is an error.
async fn join_session<F>(join: F) -> anyhow::Result<()>
where
    F: FnOnce() -> std::io::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(join)
        .await
        .context("join FUSE session thread")?
        .context("FUSE session ended with an error")
}

#[async_trait::async_trait]
impl MountHandle for FuseMount {
    async fn closed(&mut self) -> anyhow::Result<()> {
        let Some(rx) = self.closed.as_mut() else {
            return std::future::pending().await;
        };
        // The sender is never used; it is dropped with the filesystem when
        // the session thread exits.
        let _ = rx.await;
        self.closed = None;

        let Some(session) = self.session.take() else {
            return Ok(());
        };
        debug!(mountpoint = %self.mountpoint.display(), "FUSE session thread exited");
        join_session(move || session.join()).await
    }

    fn release(&mut self) -> anyhow::Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        drop(session);

        // Failure here just means nothing was left mounted.
        let mountpoint = self.mountpoint.to_string_lossy();
        if let Ok(out) = std::process::Command::new("fusermount3")
            .args(["-u", mountpoint.as_ref()])
            .output()
            && out.status.success()
        {
            debug!(%mountpoint, "fusermount3 -u removed a leftover mount");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_mountpoint_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let err = FuseBackend
            .mount(
                &dir.path().join("absent"),
                Arc::new(ContentTree::default()),
                &MountConfig::default(),
            )
            .unwrap_err();
        assert!(format!("{err:#}").contains("stat mountpoint"));
    }

    #[test]
    fn file_mountpoint_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = FuseBackend
            .mount(&file, Arc::new(ContentTree::default()), &MountConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[tokio::test]
    async fn clean_session_exit_is_ok() {
        join_session(|| Ok(())).await.unwrap();
    }

    #[tokio::test]
    async fn session_io_error_is_reported() {
        let err = join_session(|| Err(std::io::Error::from_raw_os_error(libc::EIO)))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("FUSE session ended with an error"));
        let io = err.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.raw_os_error(), Some(libc::EIO));
    }

    #[tokio::test]
    async fn session_thread_panic_is_reported() {
        let err = join_session(|| panic!("fuse loop")).await.unwrap_err();
        assert!(err.to_string().contains("join FUSE session thread"));
    }

    #[tokio::test]
    async fn external_close_without_session_is_ok() {
        let (tx, rx) = oneshot::channel::<()>();
        let mut mount = FuseMount {
            session: None,
            closed: Some(rx),
            mountpoint: PathBuf::from("/mnt/packs"),
        };
        drop(tx);
        mount.closed().await.unwrap();
        assert!(mount.closed.is_none());
        mount.release().unwrap();
    }
}
