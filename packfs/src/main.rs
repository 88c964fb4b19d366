mod print;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use packfs_core::config::{Config, default_config_path};
use packfs_core::{MountBackend, MountSession, source};
use packfs_fuse::FuseBackend;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Mount rendered pack output as a read-only filesystem.
///
/// Every top-level table of DOCUMENT becomes a directory and every string
/// inside it a file.  The filesystem stays mounted until SIGINT or SIGTERM.
#[derive(Debug, Parser)]
#[command(name = "packfs", version)]
struct Cli {
    /// TOML document mapping group -> file name -> content
    document: PathBuf,

    /// Existing directory to mount on
    #[arg(required_unless_present = "print")]
    mountpoint: Option<PathBuf>,

    /// Settings file (default: $XDG_CONFIG_HOME/packfs/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print every file to stdout instead of mounting
    #[arg(long)]
    print: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Reset SIGPIPE to default so piping `--print` output to `head` etc.
    // exits cleanly instead of panicking with "broken pipe".
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli, &FuseBackend).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run<B: MountBackend>(cli: Cli, backend: &B) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path, true)?,
        None => Config::load(&default_config_path(), false)?,
    };

    let tree = source::load_document(&cli.document)?;
    tracing::info!(
        "loaded {}: {} groups, {} files",
        cli.document.display(),
        tree.group_count(),
        tree.file_count()
    );

    if cli.print {
        let stdout = std::io::stdout();
        let bold = stdout.is_terminal();
        print::print_tree(&tree, &mut stdout.lock(), bold).context("write to stdout")?;
        return Ok(());
    }

    let mountpoint = cli.mountpoint.context("a mountpoint is required")?;

    // Handlers go in before the mount so a signal can never take the
    // default action while the filesystem is attached.
    let shutdown = ShutdownSignal::install().context("install signal handlers")?;
    let mut session = MountSession::mount(backend, &mountpoint, Arc::new(tree), &config.mount)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown.recv().await;
            tracing::info!("received shutdown signal, unmounting");
            cancel.cancel();
        });
    }

    let exit = session.serve(cancel).await?;
    tracing::debug!(?exit, "serve loop finished");
    Ok(())
}

/// SIGINT and SIGTERM streams, registered as soon as they are created.
struct ShutdownSignal {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignal {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use packfs_core::{ContentTree, MountConfig, MountHandle, SessionError};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug, Clone, Copy)]
    enum Ending {
        /// Stays mounted until cancelled.
        Never,
        /// Unmounted from outside, cleanly.
        Closed,
        /// Transport failure while serving.
        Fails,
    }

    #[derive(Debug)]
    struct FakeBackend {
        ending: Ending,
        mounted: Arc<Notify>,
        releases: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        fn new(ending: Ending) -> Self {
            Self {
                ending,
                mounted: Arc::new(Notify::new()),
                releases: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct FakeHandle {
        ending: Ending,
        releases: Arc<AtomicUsize>,
    }

    impl MountBackend for FakeBackend {
        type Handle = FakeHandle;

        fn mount(
            &self,
            _mountpoint: &Path,
            _tree: Arc<ContentTree>,
            _config: &MountConfig,
        ) -> anyhow::Result<FakeHandle> {
            self.mounted.notify_one();
            Ok(FakeHandle {
                ending: self.ending,
                releases: Arc::clone(&self.releases),
            })
        }
    }

    #[async_trait::async_trait]
    impl MountHandle for FakeHandle {
        async fn closed(&mut self) -> anyhow::Result<()> {
            match self.ending {
                Ending::Never => std::future::pending().await,
                Ending::Closed => Ok(()),
                Ending::Fails => anyhow::bail!("device read failed"),
            }
        }

        fn release(&mut self) -> anyhow::Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn mount_cli(dir: &tempfile::TempDir) -> Cli {
        Cli {
            document: write_doc(dir, "[web]\n\"job.conf\" = \"A\"\n"),
            mountpoint: Some(dir.path().to_path_buf()),
            config: Some(empty_config(dir)),
            print: false,
        }
    }

    fn cli(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("packfs").chain(args.iter().copied()))
    }

    fn write_doc(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("packs.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn empty_config(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        path
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn two_positionals() {
        let cli = cli(&["packs.toml", "./mnt"]).unwrap();
        assert_eq!(cli.document, PathBuf::from("packs.toml"));
        assert_eq!(cli.mountpoint, Some(PathBuf::from("./mnt")));
        assert!(!cli.print);
    }

    #[test]
    fn mountpoint_required_unless_printing() {
        assert!(cli(&["packs.toml"]).is_err());
        let cli = cli(&["packs.toml", "--print"]).unwrap();
        assert!(cli.print);
        assert!(cli.mountpoint.is_none());
    }

    #[tokio::test]
    async fn print_mode_never_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let doc = write_doc(&dir, "[web]\n\"job.conf\" = \"A\"\n");
        let config = empty_config(&dir);
        let cli = Cli {
            document: doc,
            mountpoint: None,
            config: Some(config),
            print: true,
        };
        run(cli, &FuseBackend).await.unwrap();
    }

    #[tokio::test]
    async fn bad_document_fails_before_mount() {
        let dir = tempfile::tempdir().unwrap();
        let doc = write_doc(&dir, "[web]\n\"job.conf\" = 7\n");
        let cli = Cli {
            document: doc,
            mountpoint: Some(dir.path().join("never-created")),
            config: Some(empty_config(&dir)),
            print: false,
        };
        let err = run(cli, &FuseBackend).await.unwrap_err();
        assert!(err.downcast_ref::<packfs_core::ConfigError>().is_some());
    }

    #[tokio::test]
    async fn missing_mountpoint_is_mount_error() {
        let dir = tempfile::tempdir().unwrap();
        let doc = write_doc(&dir, "[web]\n\"job.conf\" = \"A\"\n");
        let cli = Cli {
            document: doc,
            mountpoint: Some(dir.path().join("absent")),
            config: Some(empty_config(&dir)),
            print: false,
        };
        let err = run(cli, &FuseBackend).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<packfs_core::SessionError>(),
            Some(packfs_core::SessionError::Mount { .. })
        ));
    }

    #[tokio::test]
    async fn explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let doc = write_doc(&dir, "");
        let cli = Cli {
            document: doc,
            mountpoint: None,
            config: Some(dir.path().join("nope.toml")),
            print: true,
        };
        assert!(run(cli, &FuseBackend).await.is_err());
    }

    #[tokio::test]
    async fn external_unmount_exits_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new(Ending::Closed);
        run(mount_cli(&dir), &backend).await.unwrap();
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn serve_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new(Ending::Fails);
        let err = run(mount_cli(&dir), &backend).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::Serve { .. })
        ));
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sigint_after_mount_unmounts_and_exits_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new(Ending::Never));
        let mounted = Arc::clone(&backend.mounted);
        let task = {
            let backend = Arc::clone(&backend);
            let cli = mount_cli(&dir);
            tokio::spawn(async move { run(cli, backend.as_ref()).await })
        };

        mounted.notified().await;
        unsafe {
            libc::raise(libc::SIGINT);
        }

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("run did not stop on SIGINT")
            .unwrap()
            .unwrap();
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
    }
}
