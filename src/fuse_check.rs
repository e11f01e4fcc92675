//! FUSE availability checks.

#[cfg(target_os = "linux")]
use std::path::Path;

/// Character device the kernel FUSE driver exposes on Linux.
#[cfg(target_os = "linux")]
const FUSE_DEVICE: &str = "/dev/fuse";

/// Mount helpers fuser falls back to when it cannot mount directly.
#[cfg(target_os = "linux")]
const MOUNT_HELPERS: [&str; 2] = ["fusermount3", "fusermount"];

/// Errors that can occur when verifying FUSE availability.
#[derive(Debug, thiserror::Error)]
pub enum FuseCheckError {
    /// The kernel driver is not loaded.
    #[error(
        "{path} does not exist. countfs needs the FUSE kernel module; try `modprobe fuse`."
    )]
    DeviceMissing {
        /// Path where the device was expected.
        path: &'static str,
    },

    /// Neither `fusermount3` nor `fusermount` is on `PATH`.
    #[error(
        "No FUSE mount helper found on PATH. Install the fuse3 package (or fuse) and retry."
    )]
    MountHelperMissing,
}

#[cfg(target_os = "linux")]
fn on_path(binary: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file())
    })
}

/// Verify that FUSE is installed and usable on the current platform.
///
/// Root can mount without a helper, so the helper lookup is skipped for it.
#[cfg(target_os = "linux")]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    if !Path::new(FUSE_DEVICE).exists() {
        return Err(FuseCheckError::DeviceMissing { path: FUSE_DEVICE });
    }

    if !nix::unistd::Uid::effective().is_root() && !MOUNT_HELPERS.iter().any(|h| on_path(h)) {
        return Err(FuseCheckError::MountHelperMissing);
    }

    Ok(())
}

/// Verify that FUSE is installed and usable on the current platform.
///
/// Only Linux is checked; elsewhere mounting reports its own errors.
#[cfg(not(target_os = "linux"))]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    Ok(())
}
