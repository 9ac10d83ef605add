// SPDX-License-Identifier: MPL-2.0
use crate::args::CliArgs;
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Subvolume the installed system is moved into, mounted at `/`.
pub const ROOT_SUBVOL: &str = "@";
/// Subvolume reserved for snapshot storage, mounted at `/.snapshots`.
pub const SNAPSHOT_SUBVOL: &str = "@snapshots";
/// Directory inside the root subvolume that `@snapshots` is mounted over.
/// Snapshot tooling expects this path to pre-exist as a plain directory.
pub const SNAPSHOT_MOUNT_DIR: &str = ".snapshots";

const MOUNT_POINT: &str = "/run/snapshot-prep";

/// Immutable description of one migration run, threaded through every
/// component call.
///
/// The tool owns `mount_point` and all submounts beneath it for the run's
/// duration. Exclusive access is assumed; concurrent invocations are not
/// supported.
#[derive(Debug)]
pub struct Config {
	pub root_device: PathBuf,
	pub boot_device: PathBuf,
	pub efi_device: Option<PathBuf>,
	pub mount_point: PathBuf,
}

impl Config {
	pub fn new(args: CliArgs) -> Result<Self> {
		require_device(&args.root_device)?;
		require_device(&args.boot_device)?;
		if let Some(efi_device) = &args.efi_device {
			require_device(efi_device)?;
		}
		Ok(Config {
			root_device: args.root_device,
			boot_device: args.boot_device,
			efi_device: args.efi_device,
			mount_point: PathBuf::from(MOUNT_POINT),
		})
	}

	/// Path of the root subvolume under the mounted top-level view.
	pub fn root_subvol_path(&self) -> PathBuf {
		self.mount_point.join(ROOT_SUBVOL)
	}

	/// Path of the snapshot subvolume under the mounted top-level view.
	pub fn snapshot_subvol_path(&self) -> PathBuf {
		self.mount_point.join(SNAPSHOT_SUBVOL)
	}
}

fn require_device(device: &Path) -> Result<()> {
	if !device.exists() {
		bail!("device {} does not exist", device.display());
	}
	Ok(())
}
