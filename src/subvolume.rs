// SPDX-License-Identifier: MPL-2.0
use crate::config::{Config, ROOT_SUBVOL, SNAPSHOT_MOUNT_DIR, SNAPSHOT_SUBVOL};
use anyhow::{Context, Result};
use libbtrfsutil::CreateSubvolumeFlags;
use std::fs;

/// Creates whichever of the two managed subvolumes is missing from the
/// top-level view, then the snapshot mountpoint directory inside the root
/// subvolume. Safe to re-run after a partial failure.
pub fn ensure_managed_subvolumes(config: &Config) -> Result<()> {
	for name in [ROOT_SUBVOL, SNAPSHOT_SUBVOL] {
		let path = config.mount_point.join(name);
		if path.exists() {
			debug!("subvolume {name} already exists");
			continue;
		}
		info!("creating subvolume {name}");
		libbtrfsutil::create_subvolume(&path, CreateSubvolumeFlags::empty(), None)
			.with_context(|| format!("failed to create subvolume {}", path.display()))?;
	}

	let snapshot_dir = config.root_subvol_path().join(SNAPSHOT_MOUNT_DIR);
	fs::create_dir_all(&snapshot_dir)
		.with_context(|| format!("failed to create {}", snapshot_dir.display()))?;
	Ok(())
}
