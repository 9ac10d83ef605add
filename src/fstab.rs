// SPDX-License-Identifier: MPL-2.0
use crate::config::Config;
use anyhow::{anyhow, bail, Context, Result};
use std::{fs, path::Path, process::Command};

/// Queries filesystem UUIDs; listed in the preflight check.
pub(crate) const BLKID: &str = "blkid";

/// Regenerates the mount table inside the relocated tree: drops every btrfs,
/// swap and boot-related entry, then appends the entries for the new layout.
/// Requires the root-subvolume view to be mounted and populated.
pub fn rewrite_mount_table(config: &Config) -> Result<()> {
	let fstab_path = config.mount_point.join("etc/fstab");
	if !fstab_path.exists() {
		bail!(
			"{} does not exist; the root subvolume does not hold a populated system",
			fstab_path.display()
		);
	}

	let root_uuid = blkid_uuid(&config.root_device)?;
	let boot_uuid = blkid_uuid(&config.boot_device)?;
	let efi_uuid = match &config.efi_device {
		Some(device) => Some(blkid_uuid(device)?),
		None => None,
	};

	info!("rewriting {}", fstab_path.display());
	let current = fs::read_to_string(&fstab_path)
		.with_context(|| format!("failed to read {}", fstab_path.display()))?;
	let rewritten = rewrite(&current, &root_uuid, &boot_uuid, efi_uuid.as_deref());
	fs::write(&fstab_path, rewritten)
		.with_context(|| format!("failed to write {}", fstab_path.display()))?;
	Ok(())
}

fn rewrite(current: &str, root_uuid: &str, boot_uuid: &str, efi_uuid: Option<&str>) -> String {
	let mut table: String = current
		.lines()
		.filter(|line| !is_superseded(line))
		.map(|line| format!("{line}\n"))
		.collect();
	table.push_str(&render_entries(root_uuid, boot_uuid, efi_uuid));
	table
}

/// True for the lines this run replaces: any btrfs or swap mount, and
/// anything mounted at /boot or /boot/efi. Purely textual, one entry per
/// line assumed.
fn is_superseded(line: &str) -> bool {
	let mut fields = line.split_whitespace();
	let mount_point = match fields.nth(1) {
		Some(field) => field,
		None => return false,
	};
	let fs_type = match fields.next() {
		Some(field) => field,
		None => return false,
	};
	fs_type == "btrfs" || fs_type == "swap" || mount_point == "/boot" || mount_point == "/boot/efi"
}

/// The authoritative entries for the new layout. Field spacing and the
/// option strings are fixed; downstream tooling re-parses these lines.
fn render_entries(root_uuid: &str, boot_uuid: &str, efi_uuid: Option<&str>) -> String {
	let mut entries = format!(
		"UUID={root_uuid}  /            btrfs  defaults,ssd,discard=async,noatime,space_cache=v2,compress=zstd:1,subvol=@          0 0\n\
		 UUID={root_uuid}  /.snapshots  btrfs  defaults,ssd,discard=async,noatime,space_cache=v2,compress=zstd:1,subvol=@snapshots 0 0\n\
		 UUID={boot_uuid}  /boot        ext4   defaults                                                                             0 2\n"
	);
	if let Some(efi_uuid) = efi_uuid {
		entries.push_str(&format!(
			"UUID={efi_uuid}   /boot/efi    vfat   umask=0077                                                                           0 1\n"
		));
	}
	entries
}

fn blkid_uuid(device: &Path) -> Result<String> {
	let output = Command::new(BLKID)
		.arg("-o")
		.arg("export")
		.arg(device)
		.output()
		.with_context(|| format!("failed to run blkid for {}", device.display()))?;
	if !output.status.success() {
		bail!("blkid failed for {}", device.display());
	}
	let stdout = String::from_utf8_lossy(&output.stdout);
	parse_uuid(&stdout)
		.ok_or_else(|| anyhow!("no UUID in blkid output for {}", device.display()))
}

/// Picks the UUID value out of `blkid -o export` key/value output.
fn parse_uuid(output: &str) -> Option<String> {
	output
		.lines()
		.find_map(|line| line.strip_prefix("UUID="))
		.map(str::to_string)
}

#[cfg(test)]
mod tests {
	use super::{is_superseded, parse_uuid, render_entries, rewrite};
	use crate::config::Config;
	use std::path::PathBuf;

	const ROOT_UUID: &str = "3b1679b8-bcbe-43ca-986c-6f1fd1e0be7c";
	const BOOT_UUID: &str = "864c3058-2f2b-4a0b-8a4d-6e298f2b00b0";
	const EFI_UUID: &str = "B2AE-5A10";

	#[test]
	fn supersedes_btrfs_swap_and_boot_lines() {
		assert!(is_superseded(
			"UUID=abcd / btrfs defaults,subvol=@ 0 0"
		));
		assert!(is_superseded("/dev/sda4 none swap defaults 0 0"));
		assert!(is_superseded("UUID=abcd /boot ext4 defaults 0 2"));
		assert!(is_superseded("UUID=abcd /boot/efi vfat umask=0077 0 1"));
	}

	#[test]
	fn keeps_unrelated_lines() {
		assert!(!is_superseded("# /etc/fstab: static file system information"));
		assert!(!is_superseded(""));
		assert!(!is_superseded("UUID=abcd /home ext4 defaults 0 2"));
		assert!(!is_superseded("tmpfs /tmp tmpfs nosuid,nodev 0 0"));
	}

	#[test]
	fn renders_exact_entries_with_efi() {
		let expected = format!(
			"UUID={ROOT_UUID}  /            btrfs  defaults,ssd,discard=async,noatime,space_cache=v2,compress=zstd:1,subvol=@          0 0\n\
			 UUID={ROOT_UUID}  /.snapshots  btrfs  defaults,ssd,discard=async,noatime,space_cache=v2,compress=zstd:1,subvol=@snapshots 0 0\n\
			 UUID={BOOT_UUID}  /boot        ext4   defaults                                                                             0 2\n\
			 UUID={EFI_UUID}   /boot/efi    vfat   umask=0077                                                                           0 1\n"
		);
		assert_eq!(
			render_entries(ROOT_UUID, BOOT_UUID, Some(EFI_UUID)),
			expected
		);
	}

	#[test]
	fn renders_no_efi_line_without_an_efi_device() {
		let entries = render_entries(ROOT_UUID, BOOT_UUID, None);
		assert_eq!(entries.lines().count(), 3);
		assert!(!entries.contains("/boot/efi"));
		assert!(!entries.contains("vfat"));
	}

	#[test]
	fn rewrite_replaces_old_entries_and_keeps_the_rest() {
		let current = "\
# /etc/fstab: static file system information
UUID=old-root / btrfs defaults,subvol=@ 0 0
UUID=old-boot /boot ext4 defaults 0 2
UUID=old-efi /boot/efi vfat umask=0077 0 1
UUID=old-swap none swap defaults 0 0
UUID=home /home ext4 defaults 0 2
";
		let table = rewrite(current, ROOT_UUID, BOOT_UUID, Some(EFI_UUID));
		let lines: Vec<&str> = table.lines().collect();

		assert!(lines.contains(&"# /etc/fstab: static file system information"));
		assert!(lines.contains(&"UUID=home /home ext4 defaults 0 2"));
		assert!(!table.contains("old-root"));
		assert!(!table.contains("old-boot"));
		assert!(!table.contains("old-efi"));
		assert!(!table.contains("swap"));

		assert_eq!(
			lines.iter().filter(|line| line.contains(" /boot ")).count(),
			1
		);
		assert_eq!(
			lines
				.iter()
				.filter(|line| line.contains(" /boot/efi "))
				.count(),
			1
		);
		assert_eq!(
			lines
				.iter()
				.filter(|line| line.contains(" /.snapshots "))
				.count(),
			1
		);
	}

	#[test]
	fn rewriting_twice_is_idempotent() {
		let once = rewrite("UUID=old / btrfs subvol=@ 0 0\n", ROOT_UUID, BOOT_UUID, None);
		let twice = rewrite(&once, ROOT_UUID, BOOT_UUID, None);
		assert_eq!(once, twice);
	}

	#[test]
	fn missing_mount_table_is_a_hard_precondition() {
		let dir = tempfile::tempdir().unwrap();
		let config = Config {
			root_device: PathBuf::from("/dev/null"),
			boot_device: PathBuf::from("/dev/null"),
			efi_device: None,
			mount_point: dir.path().to_path_buf(),
		};
		let err = super::rewrite_mount_table(&config).unwrap_err();
		assert!(err.to_string().contains("does not exist"));
	}

	#[test]
	fn parses_uuid_from_blkid_export_output() {
		let output = "\
DEVNAME=/dev/sda2
UUID=3b1679b8-bcbe-43ca-986c-6f1fd1e0be7c
BLOCK_SIZE=4096
TYPE=btrfs
PARTUUID=0e723e9b-02
";
		assert_eq!(
			parse_uuid(output).as_deref(),
			Some("3b1679b8-bcbe-43ca-986c-6f1fd1e0be7c")
		);
		assert_eq!(parse_uuid("DEVNAME=/dev/sda2\nTYPE=btrfs\n"), None);
	}
}
