// SPDX-License-Identifier: MPL-2.0
use crate::config::Config;
use anyhow::{bail, Context, Result};
use std::process::Command;

/// Execution-root entry; listed in the preflight check.
pub(crate) const CHROOT: &str = "chroot";
/// Boot loader configuration generator; listed in the preflight check.
pub(crate) const GRUB_MKCONFIG: &str = "grub-mkconfig";
/// Initial RAM filesystem generator; listed in the preflight check.
pub(crate) const MKINITCPIO: &str = "mkinitcpio";

/// Enters the relocated tree and regenerates the boot loader configuration,
/// then the initial RAM filesystem. Both generators must see the final mount
/// table and the mounted boot partition, so this runs last. Fatal on any
/// nonzero exit; a failure here leaves the boot images stale and requires a
/// re-run or manual repair.
pub fn refresh_boot_artifacts(config: &Config) -> Result<()> {
	info!("regenerating boot loader configuration");
	run_in_target(config, &[GRUB_MKCONFIG, "-o", "/boot/grub/grub.cfg"])?;
	info!("regenerating initial RAM filesystem");
	run_in_target(config, &[MKINITCPIO, "-P"])?;
	Ok(())
}

fn run_in_target(config: &Config, command: &[&str]) -> Result<()> {
	let status = Command::new(CHROOT)
		.arg(&config.mount_point)
		.args(command)
		.status()
		.with_context(|| {
			format!(
				"failed to run {} in {}",
				command[0],
				config.mount_point.display()
			)
		})?;
	if !status.success() {
		bail!("{} exited with {status}", command[0]);
	}
	Ok(())
}
