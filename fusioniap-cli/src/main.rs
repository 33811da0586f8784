//! fusioniap CLI - update I2C-attached companion MCU firmware from the host.
//!
//! ## Features
//!
//! - Flash a raw firmware image over the IAP protocol
//! - Restore the factory image
//! - Query device mode, versions and entry address
//! - Shell completion generation
//! - Environment variable support

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use fusioniap::{
    DeviceHandle, DeviceMode, FirmwareImage, NativeBus, Phase, SessionConfig, SystemClock,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

mod config;

use config::Config;

/// Set by the Ctrl-C handler; the library polls it between chunks.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// fusioniap - update the firmware of an I2C-attached companion MCU.
///
/// Environment variables:
///   FUSIONIAP_BUS               - Default I2C bus number
///   FUSIONIAP_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "fusioniap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// I2C bus number, as in /dev/i2c-N.
    #[arg(short, long, global = true, env = "FUSIONIAP_BUS")]
    bus: Option<u8>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "FUSIONIAP_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show device mode, firmware versions and entry address.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Flash a firmware image.
    Update {
        /// Path to the raw firmware image (.bin).
        firmware: PathBuf,

        /// Leave the device in bootloader mode afterwards.
        #[arg(long)]
        no_reset: bool,

        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Restore the factory firmware image.
    Restore {
        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Reset the device in whatever mode it is in.
    Reset,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "fusioniap v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Forward Ctrl-C to the library's cooperative interruption check
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;
    fusioniap::set_interrupt_checker(|| INTERRUPTED.load(Ordering::SeqCst));

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let bus = cli.bus.or(config.connection.bus).unwrap_or(1);

    match &cli.command {
        Commands::Info { json } => cmd_info(bus, *json),
        Commands::Update {
            firmware,
            no_reset,
            yes,
        } => cmd_update(&cli, bus, firmware, *no_reset, *yes),
        Commands::Restore { yes } => cmd_restore(&cli, bus, *yes),
        Commands::Reset => cmd_reset(&cli, bus),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        }
    }
}

/// Open both device endpoints on the chosen bus.
fn open_device(bus: u8) -> Result<DeviceHandle<NativeBus>> {
    DeviceHandle::open(bus).with_context(|| format!("failed to open /dev/i2c-{bus}"))
}

/// Ask for confirmation unless `--yes` or non-interactive mode decided it.
fn confirm(cli: &Cli, yes: bool, prompt: &str) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if cli.non_interactive {
        bail!("{prompt}: confirmation required, pass --yes in non-interactive mode");
    }
    Ok(dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

/// Info command implementation.
fn cmd_info(bus: u8, json: bool) -> Result<()> {
    let mut handle = open_device(bus)?;
    let mode = handle.probe_mode();

    let board_id = match mode {
        DeviceMode::Application => handle.board_id().ok(),
        _ => None,
    };
    let boot_version = handle.boot_version().ok();
    let app_version = handle.app_version().ok();
    let factory_version = handle.factory_version().ok();
    let main_entry = handle.main_entry().ok();

    if json {
        let info = serde_json::json!({
            "bus": bus,
            "mode": mode.to_string(),
            "board_id": board_id,
            "boot_version": boot_version.map(|v| v.to_string()),
            "app_version": app_version.map(|v| v.to_string()),
            "factory_version": factory_version.map(|v| v.to_string()),
            "main_entry": main_entry.map(|e| e.to_string()),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&info).unwrap_or_default()
        );
        return Ok(());
    }

    let mode_str = match mode {
        DeviceMode::Application => style("application").green().to_string(),
        DeviceMode::Bootloader => style("bootloader").yellow().to_string(),
        DeviceMode::Unreachable => style("unreachable").red().to_string(),
    };
    eprintln!("{}", style("Device").bold().underlined());
    eprintln!("  Bus:             /dev/i2c-{bus}");
    eprintln!("  Mode:            {mode_str}");
    eprintln!("  Board ID:        {}", format_opt(board_id));
    eprintln!("  Boot version:    {}", format_opt(boot_version));
    eprintln!("  App version:     {}", format_opt(app_version));
    eprintln!("  Factory version: {}", format_opt(factory_version));
    eprintln!("  Main entry:      {}", format_opt(main_entry));

    Ok(())
}

/// Render an optional readout, dash for unavailable.
fn format_opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Update command implementation.
fn cmd_update(cli: &Cli, bus: u8, firmware: &PathBuf, no_reset: bool, yes: bool) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} loading firmware {}",
            style("→").cyan(),
            firmware.display()
        );
    }

    let image = FirmwareImage::from_file(firmware)
        .with_context(|| format!("failed to load firmware {}", firmware.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} {} bytes, {} flash pages",
            style("→").cyan(),
            image.len(),
            image.pages()
        );
    }

    if !confirm(cli, yes, "Flash this image onto the device?")? {
        bail!("aborted");
    }

    let mut handle = open_device(bus)?;
    let clock = SystemClock;

    if let Ok(version) = handle.app_version() {
        if !cli.quiet {
            eprintln!("{} current app version: {version}", style("→").cyan());
        }
    }

    let pb = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let mut current_phase = None;
    fusioniap::run_update(
        &mut handle,
        &clock,
        &image,
        SessionConfig::default(),
        &mut |phase: Phase, current: usize, total: usize| {
            if current_phase != Some(phase) {
                current_phase = Some(phase);
                pb.set_message(phase.to_string());
            }
            if total > 0 {
                #[allow(clippy::cast_possible_truncation)]
                pb.set_position((current * 100 / total) as u64);
            }
        },
    )?;
    pb.finish_with_message("verified");

    if no_reset {
        if !cli.quiet {
            eprintln!(
                "{} device left in bootloader mode",
                style("⚠").yellow()
            );
        }
    } else {
        if !cli.quiet {
            eprintln!("{} resetting device", style("→").cyan());
        }
        fusioniap::reset_device(&mut handle)?;
    }

    if !cli.quiet {
        eprintln!("{} firmware update complete", style("✓").green().bold());
    }
    Ok(())
}

/// Restore command implementation.
fn cmd_restore(cli: &Cli, bus: u8, yes: bool) -> Result<()> {
    if !confirm(cli, yes, "Restore the factory firmware image?")? {
        bail!("aborted");
    }

    let mut handle = open_device(bus)?;
    let clock = SystemClock;

    if !cli.quiet {
        eprintln!("{} restoring factory firmware", style("→").cyan());
    }
    fusioniap::restore_factory(&mut handle, &clock)?;
    fusioniap::reset_device(&mut handle)?;

    if !cli.quiet {
        eprintln!("{} factory firmware restored", style("✓").green().bold());
    }
    Ok(())
}

/// Reset command implementation.
fn cmd_reset(cli: &Cli, bus: u8) -> Result<()> {
    let mut handle = open_device(bus)?;
    fusioniap::reset_device(&mut handle)?;
    if !cli.quiet {
        eprintln!("{} device reset", style("✓").green().bold());
    }
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
