use std::{
    fs,
    os::unix::fs::MetadataExt,
    path::{
        Path,
        PathBuf,
    },
};

use errors::ErrorMetadata;

/// Verifies `<devices_root>/<drive>` is a mount point before any broker call
/// touches it. Disabled entirely when `mount_check` is off, in which case
/// every drive is trusted.
#[derive(Debug, Clone)]
pub struct MountGuard {
    devices_root: PathBuf,
    enabled: bool,
}

impl MountGuard {
    pub fn new(devices_root: PathBuf, enabled: bool) -> Self {
        Self { devices_root, enabled }
    }

    /// Returns an `Unmounted` error if `enabled` and `<devices_root>/<drive>`
    /// is not a distinct mount from its parent. Never caches the result:
    /// freshness matters more than the cost of a couple of `stat` calls.
    pub fn check(&self, drive: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.devices_root.join(drive);
        if !is_mount_point(&path) {
            anyhow::bail!(ErrorMetadata::unmounted(drive));
        }
        Ok(())
    }
}

fn is_mount_point(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    let parent = path.parent().unwrap_or(path);
    let Ok(parent_meta) = fs::metadata(parent) else {
        return false;
    };
    meta.dev() != parent_meta.dev()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn disabled_guard_always_passes() {
        let guard = MountGuard::new(Path::new("/nonexistent-devices-root").to_path_buf(), false);
        assert!(guard.check("sda").is_ok());
    }

    #[test]
    fn enabled_guard_rejects_a_plain_subdirectory() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("sda")).unwrap();
        let guard = MountGuard::new(root.path().to_path_buf(), true);
        // A plain subdirectory of a tempdir shares its device, so it is not
        // a distinct mount point.
        assert!(guard.check("sda").is_err());
    }

    #[test]
    fn enabled_guard_rejects_a_missing_drive() {
        let root = TempDir::new().unwrap();
        let guard = MountGuard::new(root.path().to_path_buf(), true);
        assert!(guard.check("missing").is_err());
    }
}
