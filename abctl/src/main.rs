// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use abctl::engine::SlotCtl;
use abctl::slots::{Slot, DEFAULT_CMDLINE_PATH, DEFAULT_PARTLABEL_DIR};
use abctl::ufs::{UfsBsg, DEFAULT_UFS_BSG_DEV};
use abctl::utils::{set_log_level, LogLevel};

#[derive(Parser)]
#[command(name = "abctl", version, about = "A/B slot boot control for Qualcomm-style devices", long_about = None)]
struct Cli {
    /// Partition label directory
    #[arg(long, global = true, default_value = DEFAULT_PARTLABEL_DIR)]
    partlabel_dir: PathBuf,

    /// Kernel command line to probe for the booted slot
    #[arg(long, global = true, default_value = DEFAULT_CMDLINE_PATH)]
    cmdline: PathBuf,

    /// UFS bsg node used for the boot LUN switch
    #[arg(long, global = true, default_value = DEFAULT_UFS_BSG_DEV)]
    bsg: PathBuf,

    /// Tolerate a missing bsg node when switching the active slot
    #[arg(long, global = true)]
    ignore_missing_bsg: bool,

    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the state of both slots (the default)
    Status,
    /// Print the slot the system booted from
    Current,
    /// Print the slot the bootloader will try first
    Active,
    /// Check whether SLOT is bootable
    Bootable { slot: String },
    /// Check whether SLOT is marked successful
    Successful { slot: String },
    /// Print the suffix for SLOT (default: current)
    Suffix { slot: Option<String> },
    /// Make SLOT the active boot slot
    SetActive { slot: String },
    /// Mark a boot of SLOT as successful (default: current)
    MarkSuccessful { slot: Option<String> },
    /// Mark SLOT as unbootable (default: current)
    SetUnbootable { slot: Option<String> },
}

fn parse_slot(arg: &str) -> Result<Slot> {
    match arg {
        "0" | "a" | "A" => Ok(Slot::A),
        "1" | "b" | "B" => Ok(Slot::B),
        _ => anyhow::bail!("expected a slot (0/1/a/b), not '{arg}'"),
    }
}

fn slot_or_current(arg: Option<&str>, ctl: &SlotCtl) -> Result<Slot> {
    match arg {
        Some(s) => parse_slot(s),
        None => Ok(ctl.current_slot()),
    }
}

fn dump_info(ctl: &SlotCtl) -> Result<()> {
    let current = ctl.current_slot();
    let infos = ctl.slot_info()?;
    println!("Current slot: {}", current.suffix());
    for slot in Slot::ALL {
        let info = infos[slot.index() as usize];
        println!("SLOT {}:", slot.suffix());
        println!("\tActive      : {}", info.active as u8);
        println!("\tSuccessful  : {}", info.successful as u8);
        println!("\tBootable    : {}", info.bootable as u8);
        if let Ok(guid) = ctl.boot_guid(slot) {
            println!("\tBoot GUID   : {}", Uuid::from_bytes_le(guid));
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.quiet {
        set_log_level(LogLevel::Quiet);
    } else if cli.verbose > 0 {
        set_log_level(LogLevel::Verbose);
    }

    let mut ctl = SlotCtl::new()
        .with_partlabel_dir(cli.partlabel_dir)
        .with_cmdline_path(cli.cmdline)
        .with_lun_switch(Box::new(UfsBsg::at(cli.bsg)))
        .ignore_missing_bsg(cli.ignore_missing_bsg);

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => dump_info(&ctl)?,
        Commands::Current => {
            println!("Current slot: {}", ctl.current_slot().suffix());
        }
        Commands::Active => {
            println!("Active slot: {}", ctl.active_slot().suffix());
        }
        Commands::Bootable { slot } => {
            let slot = parse_slot(&slot)?;
            let bootable = ctl.is_slot_bootable(slot)?;
            println!(
                "SLOT {}: is {}marked bootable",
                slot.suffix(),
                if bootable { "" } else { "not " }
            );
        }
        Commands::Successful { slot } => {
            let slot = parse_slot(&slot)?;
            let successful = ctl.is_slot_marked_successful(slot)?;
            println!(
                "SLOT {}: is {}marked successful",
                slot.suffix(),
                if successful { "" } else { "not " }
            );
        }
        Commands::Suffix { slot } => {
            // Never errors: anything that isn't a valid slot prints "".
            let suffix = match slot.as_deref() {
                Some(arg) => {
                    let index = match arg {
                        "a" | "A" => 0,
                        "b" | "B" => 1,
                        _ => arg.parse().unwrap_or(u32::MAX),
                    };
                    ctl.get_suffix(index)
                }
                None => ctl.current_slot().suffix(),
            };
            println!("{suffix}");
        }
        Commands::SetActive { slot } => {
            let slot = parse_slot(&slot)?;
            ctl.set_active_boot_slot(slot)?;
            println!("SLOT {}: set as active", slot.suffix());
        }
        Commands::MarkSuccessful { slot } => {
            let slot = slot_or_current(slot.as_deref(), &ctl)?;
            ctl.mark_boot_successful(slot)?;
            println!("SLOT {}: marked boot successful", slot.suffix());
        }
        Commands::SetUnbootable { slot } => {
            let slot = slot_or_current(slot.as_deref(), &ctl)?;
            ctl.set_slot_as_unbootable(slot)?;
            println!("SLOT {}: set as unbootable", slot.suffix());
        }
    }

    Ok(())
}
