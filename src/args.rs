use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(author, version, about)]
pub struct CliArgs {
	/// Block device holding the btrfs root filesystem (e.g. /dev/sda2)
	pub root_device: PathBuf,
	/// Block device holding the /boot filesystem (e.g. /dev/sda3)
	pub boot_device: PathBuf,
	/// Block device holding the EFI system partition, for systems booting
	/// via UEFI. If omitted, no /boot/efi entry is written and no EFI
	/// partition is ever mounted.
	#[clap(short, long)]
	pub efi_device: Option<PathBuf>,
}
