//! Shared dependency provisioning
//!
//! User functions import packages from a `node_modules` directory next to
//! their sources. When the function root has none, link the image's shared
//! modules directory in its place.

use std::io;
use std::path::{Path, PathBuf};

use crate::engine::resolver::path_exists;

const NODE_MODULES: &str = "node_modules";

#[derive(Debug, Clone)]
pub struct Provisioner {
    function_root: PathBuf,
    shared_modules: PathBuf,
}

impl Provisioner {
    pub fn new(function_root: impl Into<PathBuf>, shared_modules: impl Into<PathBuf>) -> Self {
        Self {
            function_root: function_root.into(),
            shared_modules: shared_modules.into(),
        }
    }

    pub fn link_path(&self) -> PathBuf {
        self.function_root.join(NODE_MODULES)
    }

    /// Best effort: never fails, only logs.
    pub fn ensure_shared_modules(&self) {
        let link = self.link_path();
        if path_exists(&link) {
            return;
        }
        if !path_exists(&self.function_root) || !path_exists(&self.shared_modules) {
            return;
        }

        match symlink_dir(&self.shared_modules, &link) {
            Ok(()) => tracing::debug!(
                link = %link.display(),
                target = %self.shared_modules.display(),
                "Linked shared modules"
            ),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => tracing::warn!(
                error = %e,
                link = %link.display(),
                "Failed to create node_modules symlink"
            ),
        }
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
