// SPDX-License-Identifier: MPL-2.0

//! One-shot migration of a freshly installed btrfs system into a
//! `@`/`@snapshots` subvolume layout, so snapshot tooling can manage a clean
//! root subvolume separate from its own snapshot history.
//!
//! The pipeline is strictly sequential and destructive; it is meant to run
//! exactly once, before the installed system first boots. Re-running after a
//! partial failure is safe: subvolume creation and the relocation step are
//! idempotent, and stale mounts from an interrupted run are torn down on
//! entry.

mod args;
mod bootgen;
mod config;
mod fstab;
mod guard;
mod mount;
mod relocate;
mod subvolume;

#[macro_use]
extern crate tracing;

use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn run(config: &config::Config) -> Result<()> {
	// Held for the whole run: clears stale mounts from a prior interrupted
	// run now, and unmounts everything again on every exit path.
	let _teardown = mount::MountGuard::new(config);

	mount::mount_top_level(config)?;
	subvolume::ensure_managed_subvolumes(config)?;
	relocate::relocate_installed_system(config)?;
	mount::remount_as_root(config)?;
	fstab::rewrite_mount_table(config)?;
	mount::bind_boot_hierarchy(config)?;
	bootgen::refresh_boot_artifacts(config)?;
	Ok(())
}

fn main() -> Result<()> {
	tracing_subscriber::registry()
		.with(fmt::layer())
		.with(
			EnvFilter::builder()
				.with_default_directive(if cfg!(debug_assertions) {
					LevelFilter::DEBUG.into()
				} else {
					LevelFilter::INFO.into()
				})
				.from_env_lossy(),
		)
		.init();

	let args = args::CliArgs::parse();
	let config = config::Config::new(args)?;
	guard::check_environment()?;
	run(&config)?;

	println!(
		"{} the installed system now lives in the {} subvolume, with {} reserved for snapshots.",
		"Migration complete:".green().bold(),
		config::ROOT_SUBVOL.blue(),
		config::SNAPSHOT_SUBVOL.blue(),
	);
	println!(
		"{} the system before using any snapshot tooling.",
		"Reboot".bold()
	);
	Ok(())
}
