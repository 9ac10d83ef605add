// SPDX-License-Identifier: MPL-2.0
use crate::config::{Config, ROOT_SUBVOL, SNAPSHOT_SUBVOL};
use anyhow::{bail, Context, Result};
use std::{
	fs,
	path::{Path, PathBuf},
	process::Command,
};

/// Moves entries across the subvolume boundary (plain rename would fail
/// with EXDEV); listed in the preflight check.
pub(crate) const MV: &str = "mv";

/// Directories a fully relocated system is expected to contain. Both present
/// inside the root subvolume means the move already happened.
const RELOCATION_MARKERS: &[&str] = &["etc", "usr"];

/// Written inside the snapshot subvolume once the whole move has completed,
/// making the re-run check exact rather than a directory heuristic.
const SENTINEL: &str = ".relocation-complete";

/// Moves every top-level entry (the previously installed system) into the
/// root subvolume, skipping the two managed subvolumes. Requires the
/// top-level view to be mounted.
///
/// Runtime scales with installed-system size; this is the only step over an
/// unbounded set of objects.
pub fn relocate_installed_system(config: &Config) -> Result<()> {
	if already_relocated(&config.mount_point) {
		info!("installed system already relocated into {ROOT_SUBVOL}, skipping");
		return Ok(());
	}

	let root_subvol = config.root_subvol_path();
	info!("moving installed system into {ROOT_SUBVOL}");
	for entry in entries_to_move(&config.mount_point)? {
		move_entry(&entry, &root_subvol)?;
	}

	let sentinel = config.snapshot_subvol_path().join(SENTINEL);
	fs::write(&sentinel, b"")
		.with_context(|| format!("failed to write {}", sentinel.display()))?;
	Ok(())
}

/// True once the sentinel exists, or when the root subvolume already carries
/// the marker directories of a complete system. The marker fallback covers
/// trees relocated before the sentinel existed; it cannot see a move that
/// failed mid-loop, which is safe only because re-running the move is
/// per-item idempotent.
fn already_relocated(top: &Path) -> bool {
	if top.join(SNAPSHOT_SUBVOL).join(SENTINEL).exists() {
		return true;
	}
	let root_subvol = top.join(ROOT_SUBVOL);
	RELOCATION_MARKERS
		.iter()
		.all(|marker| root_subvol.join(marker).is_dir())
}

/// Every immediate child of the top-level view, hidden entries included,
/// minus the two managed subvolumes.
fn entries_to_move(top: &Path) -> Result<Vec<PathBuf>> {
	let mut entries = Vec::new();
	for entry in fs::read_dir(top)
		.with_context(|| format!("failed to read directory {}", top.display()))?
	{
		let entry =
			entry.with_context(|| format!("failed to read entry in {}", top.display()))?;
		let name = entry.file_name();
		if name == ROOT_SUBVOL || name == SNAPSHOT_SUBVOL {
			continue;
		}
		entries.push(entry.path());
	}
	Ok(entries)
}

fn move_entry(source: &Path, dest_dir: &Path) -> Result<()> {
	debug!("moving {} into {}", source.display(), dest_dir.display());
	let status = Command::new(MV)
		.arg(source)
		.arg(dest_dir)
		.status()
		.with_context(|| format!("failed to run mv for {}", source.display()))?;
	if status.success() {
		return Ok(());
	}
	// An earlier partial run may have moved this entry already.
	if !source.exists() {
		warn!("{} was already moved by an earlier run", source.display());
		return Ok(());
	}
	bail!(
		"failed to move {} into {}",
		source.display(),
		dest_dir.display()
	);
}

#[cfg(test)]
mod tests {
	use super::{already_relocated, entries_to_move, SENTINEL};
	use std::fs;
	use std::path::Path;

	fn mkdirs(base: &Path, dirs: &[&str]) {
		for dir in dirs {
			fs::create_dir_all(base.join(dir)).unwrap();
		}
	}

	#[test]
	fn fresh_top_level_is_not_relocated() {
		let top = tempfile::tempdir().unwrap();
		mkdirs(top.path(), &["@", "@snapshots", "etc", "usr", "boot"]);
		assert!(!already_relocated(top.path()));
	}

	#[test]
	fn marker_directories_mean_relocated() {
		let top = tempfile::tempdir().unwrap();
		mkdirs(top.path(), &["@/etc", "@/usr", "@snapshots"]);
		assert!(already_relocated(top.path()));
	}

	#[test]
	fn a_single_marker_is_not_enough() {
		let top = tempfile::tempdir().unwrap();
		mkdirs(top.path(), &["@/etc", "@snapshots"]);
		assert!(!already_relocated(top.path()));

		// A marker that is a file, not a directory, does not count either.
		fs::write(top.path().join("@/usr"), b"").unwrap();
		assert!(!already_relocated(top.path()));
	}

	#[test]
	fn sentinel_alone_means_relocated() {
		let top = tempfile::tempdir().unwrap();
		mkdirs(top.path(), &["@", "@snapshots"]);
		fs::write(top.path().join("@snapshots").join(SENTINEL), b"").unwrap();
		assert!(already_relocated(top.path()));
	}

	#[test]
	fn enumeration_skips_managed_subvolumes_and_keeps_hidden_entries() {
		let top = tempfile::tempdir().unwrap();
		mkdirs(top.path(), &["@", "@snapshots", "etc", "usr"]);
		fs::write(top.path().join(".hidden"), b"").unwrap();
		fs::write(top.path().join("vmlinuz"), b"").unwrap();

		let mut names: Vec<String> = entries_to_move(top.path())
			.unwrap()
			.into_iter()
			.map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
			.collect();
		names.sort();
		assert_eq!(names, [".hidden", "etc", "usr", "vmlinuz"]);
	}
}
