// SPDX-License-Identifier: MPL-2.0
use crate::config::{Config, ROOT_SUBVOL};
use anyhow::{bail, Context, Result};
use std::{ffi::CString, fs, io, os::unix::ffi::OsStrExt, path::Path, ptr};
use sys_mount::{unmount, FilesystemType, Mount, UnmountFlags};

/// Pseudo-filesystems bound from the running system into the relocated tree
/// so the chrooted boot generators can see kernel state.
const PSEUDO_FILESYSTEMS: &[&str] = &["proc", "sys", "dev", "run"];

/// Teardown order: innermost mounts first, the working mount point last.
const TEARDOWN_ORDER: &[&str] = &["boot/efi", "boot", "run", "dev", "sys", "proc"];

/// Mounts the volume's top-level view (subvolume id 5) at the working mount
/// point and verifies the mounted filesystem really is btrfs.
pub fn mount_top_level(config: &Config) -> Result<()> {
	fs::create_dir_all(&config.mount_point)
		.with_context(|| format!("failed to create {}", config.mount_point.display()))?;
	info!(
		"mounting {} (top-level view) at {}",
		config.root_device.display(),
		config.mount_point.display()
	);
	Mount::builder()
		.fstype(FilesystemType::Manual("btrfs"))
		.data("subvolid=5")
		.mount(&config.root_device, &config.mount_point)
		.with_context(|| {
			format!(
				"failed to mount {} at {}",
				config.root_device.display(),
				config.mount_point.display()
			)
		})?;
	verify_btrfs(&config.mount_point)
}

/// Swaps the top-level view for the root-subvolume view. The two are never
/// mounted at the working mount point simultaneously.
pub fn remount_as_root(config: &Config) -> Result<()> {
	unmount(&config.mount_point, UnmountFlags::empty()).with_context(|| {
		format!(
			"failed to unmount top-level view at {}",
			config.mount_point.display()
		)
	})?;
	info!(
		"mounting subvol={ROOT_SUBVOL} at {}",
		config.mount_point.display()
	);
	let data = format!("subvol={ROOT_SUBVOL}");
	Mount::builder()
		.fstype(FilesystemType::Manual("btrfs"))
		.data(&data)
		.mount(&config.root_device, &config.mount_point)
		.with_context(|| {
			format!(
				"failed to mount subvolume {ROOT_SUBVOL} at {}",
				config.mount_point.display()
			)
		})?;
	Ok(())
}

/// Binds the kernel pseudo-filesystems into the relocated tree, then mounts
/// the boot partition (and the EFI partition, if one was supplied) beneath
/// it. Requires the root-subvolume view to be mounted.
pub fn bind_boot_hierarchy(config: &Config) -> Result<()> {
	for name in PSEUDO_FILESYSTEMS {
		let source = Path::new("/").join(name);
		let target = config.mount_point.join(name);
		fs::create_dir_all(&target)
			.with_context(|| format!("failed to create {}", target.display()))?;
		debug!("binding {} at {}", source.display(), target.display());
		bind_recursive(&source, &target)?;
	}

	let boot_target = config.mount_point.join("boot");
	fs::create_dir_all(&boot_target)
		.with_context(|| format!("failed to create {}", boot_target.display()))?;
	info!(
		"mounting {} at {}",
		config.boot_device.display(),
		boot_target.display()
	);
	Mount::builder()
		.fstype(FilesystemType::Manual("ext4"))
		.mount(&config.boot_device, &boot_target)
		.with_context(|| {
			format!(
				"failed to mount {} at {}",
				config.boot_device.display(),
				boot_target.display()
			)
		})?;

	if let Some(efi_device) = &config.efi_device {
		let efi_target = boot_target.join("efi");
		fs::create_dir_all(&efi_target)
			.with_context(|| format!("failed to create {}", efi_target.display()))?;
		info!(
			"mounting {} at {}",
			efi_device.display(),
			efi_target.display()
		);
		Mount::builder()
			.fstype(FilesystemType::Manual("vfat"))
			.mount(efi_device, &efi_target)
			.with_context(|| {
				format!(
					"failed to mount {} at {}",
					efi_device.display(),
					efi_target.display()
				)
			})?;
	}
	Ok(())
}

/// Best-effort teardown of everything under (and including) the working
/// mount point. Already-unmounted targets are expected and never fatal.
pub fn unmount_all(config: &Config) {
	for rel in TEARDOWN_ORDER {
		best_effort_unmount(&config.mount_point.join(rel));
	}
	best_effort_unmount(&config.mount_point);
}

fn best_effort_unmount(target: &Path) {
	if let Err(e) = unmount(target, UnmountFlags::DETACH) {
		debug!("skipping unmount of {}: {e}", target.display());
	}
}

/// Scoped ownership of the working mount point for the duration of a run.
///
/// Construction clears any stale mounts a previously interrupted run may
/// have left behind; dropping tears everything down again, on success,
/// error, and panic paths alike.
pub struct MountGuard<'a> {
	config: &'a Config,
}

impl<'a> MountGuard<'a> {
	pub fn new(config: &'a Config) -> Self {
		unmount_all(config);
		MountGuard { config }
	}
}

impl Drop for MountGuard<'_> {
	fn drop(&mut self) {
		unmount_all(self.config);
	}
}

/// Bind flags for the pseudo-filesystems: recursive, so submounts such as
/// /dev/pts and /sys/firmware/efi/efivars are visible to the chrooted
/// generators. sys-mount's flag set carries no MS_REC, so this goes through
/// the raw syscall.
const BIND_FLAGS: libc::c_ulong = libc::MS_BIND | libc::MS_REC;

fn bind_recursive(source: &Path, target: &Path) -> Result<()> {
	let source_c = path_cstring(source)?;
	let target_c = path_cstring(target)?;
	let ret = unsafe {
		libc::mount(
			source_c.as_ptr(),
			target_c.as_ptr(),
			ptr::null(),
			BIND_FLAGS,
			ptr::null(),
		)
	};
	if ret != 0 {
		return Err(io::Error::last_os_error()).with_context(|| {
			format!("failed to bind {} at {}", source.display(), target.display())
		});
	}
	Ok(())
}

fn path_cstring(path: &Path) -> Result<CString> {
	CString::new(path.as_os_str().as_bytes())
		.with_context(|| format!("path {} contains a NUL byte", path.display()))
}

fn verify_btrfs(mount_point: &Path) -> Result<()> {
	let mounts = fs::read_to_string("/proc/mounts").context("failed to read /proc/mounts")?;
	match fstype_at(&mounts, mount_point) {
		Some("btrfs") => Ok(()),
		Some(other) => bail!(
			"{} is mounted as {other}, not btrfs; was the wrong device supplied?",
			mount_point.display()
		),
		None => bail!(
			"{} does not appear in /proc/mounts after mounting",
			mount_point.display()
		),
	}
}

/// Filesystem type of the most recent mount at `target`, per /proc/mounts.
fn fstype_at<'a>(mounts: &'a str, target: &Path) -> Option<&'a str> {
	let target = target.to_str()?;
	mounts
		.lines()
		.filter_map(|line| {
			let mut fields = line.split_whitespace();
			let mount_point = fields.nth(1)?;
			let fstype = fields.next()?;
			(mount_point == target).then_some(fstype)
		})
		.last()
}
