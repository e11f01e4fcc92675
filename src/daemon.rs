use std::sync::Arc;

use countfs::fs::{CounterFs, FsError, MountSession};
use thiserror::Error;
use tokio::select;
use tracing::{debug, error, info};

use crate::app_config;

/// Why the daemon stopped early.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to build the counter tree: {0}")]
    Mount(#[from] FsError),
}

mod managed_fuse {
    //! fuser only does a regular unmount when the `BackgroundSession` is dropped. We want to be
    //! aggressive and detach the mount if the kernel still holds it afterwards.
    use std::path::PathBuf;
    use std::time::Duration;

    use nix::errno::Errno;

    use super::{CounterFs, app_config, debug, error};
    use countfs::fs::fuser::FuserAdapter;
    use fuser::BackgroundSession;

    pub struct FuseCoreScope {
        _session: BackgroundSession,
    }

    impl FuseCoreScope {
        fn spawn(
            config: &app_config::Config,
            fs: CounterFs,
        ) -> Result<Self, std::io::Error> {
            let mut mount_opts = vec![
                fuser::MountOption::FSName("countfs".to_owned()),
                fuser::MountOption::Subtype("countfs".to_owned()),
                fuser::MountOption::RW,
                fuser::MountOption::NoDev,
                fuser::MountOption::NoSuid,
                fuser::MountOption::NoExec,
            ];
            if config.mount.allow_other {
                mount_opts.push(fuser::MountOption::AllowOther);
            }
            if config.mount.auto_unmount {
                mount_opts.push(fuser::MountOption::AutoUnmount);
            }

            Ok(Self {
                _session: fuser::spawn_mount2(
                    FuserAdapter::new(fs),
                    &config.mount_point,
                    &mount_opts,
                )?,
            })
        }
    }

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(config: &app_config::Config) -> Self {
            Self {
                mount_point: config.mount_point.clone(),
            }
        }

        pub fn spawn(
            &self,
            config: &app_config::Config,
            fs: CounterFs,
        ) -> Result<FuseCoreScope, std::io::Error> {
            debug!(mount_point = ?self.mount_point, "Spawning FUSE session...");
            FuseCoreScope::spawn(config, fs)
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            const UMOUNT_ATTEMPT_COUNT: usize = 10;
            const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

            debug!(mount_point = ?self.mount_point, "Confirming unmount of FUSE filesystem...");

            for i in 0..UMOUNT_ATTEMPT_COUNT {
                let result = {
                    #[cfg(target_os = "macos")]
                    {
                        nix::mount::unmount(&self.mount_point, nix::mount::MntFlags::MNT_FORCE)
                    }

                    #[cfg(target_os = "linux")]
                    {
                        nix::mount::umount2(&self.mount_point, nix::mount::MntFlags::MNT_DETACH)
                    }
                };

                match result {
                    Ok(()) => {
                        debug!(attempt = i + 1, "Unmounted FUSE filesystem.");
                        break;
                    }
                    Err(Errno::EBUSY) => {
                        debug!(attempt = i + 1, "FUSE filesystem still busy. Retrying...");
                        std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                    }
                    Err(Errno::EINVAL | Errno::ENOENT) => {
                        debug!(attempt = i + 1, "FUSE filesystem already unmounted.");
                        break;
                    }
                    Err(e) => {
                        error!(attempt = i + 1, error = %e, "Failed to unmount FUSE filesystem.");
                        break;
                    }
                }
            }
        }
    }
}

/// Prepares the mount point directory.
///
/// - If the directory exists and is non-empty, returns an error.
/// - If the directory does not exist, creates it (including parents) and logs an info message.
/// - If the directory exists and is empty, does nothing.
async fn prepare_mount_point(mount_point: &std::path::Path) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(mount_point).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!(
                        "Mount point '{}' already exists and is not empty.",
                        mount_point.display()
                    ),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn wait_for_exit() -> Result<(), std::io::Error> {
    use tokio::signal;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    select! {
        _ = signal::ctrl_c() => {
            debug!("Received Ctrl+C signal, shutting down...");
        },
        _ = sigterm.recv() => {
            debug!("Received termination signal, shutting down...");
        },
        _ = sighup.recv() => {
            debug!("Received hangup signal, shutting down...");
        },
    }
    Ok(())
}

/// Main entry point for the daemon.
pub async fn run(config: app_config::Config) -> Result<(), DaemonError> {
    prepare_mount_point(&config.mount_point).await?;

    let session = Arc::new(MountSession::mount(
        &config.mount_point,
        config.root_policy(),
        config.mount_options(),
    )?);

    info!("Mounting filesystem at {}.", config.mount_point.display());

    let fuse = managed_fuse::ManagedFuse::new(&config);
    {
        let _scope = fuse.spawn(&config, CounterFs::new(Arc::clone(&session)))?;
        info!("countfs is running. Press Ctrl+C to stop.");

        wait_for_exit().await?;
    }
    drop(fuse);

    // The kernel normally triggers `destroy`, which already tore the tree down.
    if session.unmount() {
        debug!("Session outlived the FUSE connection; tore it down explicitly.");
    }
    Ok(())
}

pub fn spawn(config: app_config::Config) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}
