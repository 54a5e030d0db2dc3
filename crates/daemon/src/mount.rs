//! Mount lifecycle.
//!
//! The daemon mounts in the foreground: `mount` blocks until the
//! kernel unmounts the filesystem, which is the clean-exit path.

use std::path::Path;
use std::sync::Arc;

use fuser::MountOption;
use tracing::info;

use crate::fs::CaskFs;
use crate::fuse::CaskFuse;

/// Mount options for a caskfs mount. `volume_name` labels the volume
/// on platforms that surface one.
pub fn mount_options(subtype: &str, volume_name: Option<&str>) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName("caskfs".to_string()),
        MountOption::Subtype(subtype.to_string()),
        MountOption::AutoUnmount,
    ];

    #[cfg(target_os = "macos")]
    if let Some(volume) = volume_name {
        options.push(MountOption::CUSTOM(format!("volname={volume}")));
        options.push(MountOption::CUSTOM("local".to_string()));
    }
    #[cfg(not(target_os = "macos"))]
    let _ = volume_name;

    options
}

/// Mount `fs` at `mountpoint` and serve until unmounted.
pub fn mount(fs: Arc<CaskFs>, mountpoint: &Path, options: &[MountOption]) -> std::io::Result<()> {
    info!(mountpoint = %mountpoint.display(), "mounting filesystem");
    fuser::mount2(CaskFuse::new(fs), mountpoint, options)
}
