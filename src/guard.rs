// SPDX-License-Identifier: MPL-2.0
use anyhow::{bail, Context, Result};

/// External binaries the pipeline invokes, referenced from the modules that
/// spawn them so a new call site extends this list at its definition. Checked
/// up front so a missing tool is reported before anything has been mutated.
const REQUIRED_TOOLS: &[&str] = &[
	crate::fstab::BLKID,
	crate::relocate::MV,
	crate::bootgen::CHROOT,
	crate::bootgen::GRUB_MKCONFIG,
	crate::bootgen::MKINITCPIO,
];

/// Verifies privilege and tool availability. No side effects; must run
/// before any mutating step.
pub fn check_environment() -> Result<()> {
	if unsafe { libc::geteuid() } != 0 {
		bail!("this tool mounts block devices and rewrites the boot path; run it as root");
	}
	for tool in REQUIRED_TOOLS {
		which::which(tool)
			.with_context(|| format!("required tool `{tool}` not found in PATH"))?;
	}
	Ok(())
}
