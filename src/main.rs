//! src/main.rs

use std::path::PathBuf;
use std::process;

use clap::Parser;

use nsblk::device::{Device, OpenSpec};
use nsblk::ops::{self, EnumSpec, RangeSpec, ReadSpec, WriteSpec};
use nsblk::report::Log;

fn parse_size_with_suffix(s: &str) -> Result<u64, String> {
    let s_trimmed = s.trim();
    if s_trimmed.is_empty() {
        return Err("Input string is empty".to_string());
    }
    let first_non_digit_idx = s_trimmed.find(|c: char| !c.is_ascii_digit());
    let (num_str, suffix_orig) = match first_non_digit_idx {
        Some(0) => {
            return Err(format!(
                "Invalid format: missing numeric value in '{}'",
                s_trimmed
            ))
        }
        Some(idx) => s_trimmed.split_at(idx),
        None => (s_trimmed, ""),
    };
    let num = num_str
        .parse::<u64>()
        .map_err(|_| format!("Invalid number: '{}' in '{}'", num_str, s_trimmed))?;
    let suffix = suffix_orig.trim_start().to_uppercase();
    match suffix.as_str() {
        "" | "B" => Ok(num),
        "K" | "KB" | "KIB" => Ok(num.saturating_mul(1024)),
        "M" | "MB" | "MIB" => Ok(num.saturating_mul(1024 * 1024)),
        "G" | "GB" | "GIB" => Ok(num.saturating_mul(1024 * 1024 * 1024)),
        _ => Err(format!(
            "Unknown or misplaced size suffix: '{}' in '{}'",
            suffix_orig, s_trimmed
        )),
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Logical Block Namespace Utility", long_about = None)]
struct Cli {
    /// Append every report line to this file in addition to stderr
    #[clap(long, global = true)]
    log_file: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Enumerate logical block namespaces on the system
    Enum {
        /// Directory of backing files to list instead of the system's block devices
        #[clap(long)]
        sys_locator: Option<PathBuf>,
        /// Keep entries the default listing filters out
        #[clap(long)]
        all: bool,
        /// Print the listing as JSON
        #[clap(long)]
        json: bool,
    },
    /// Retrieve derived information for the given locator
    Info {
        /// Block-device node or backing file
        locator: PathBuf,
        #[clap(long, value_parser = parse_size_with_suffix)]
        lba_bytes: Option<u64>,
        #[clap(long, value_parser = parse_size_with_suffix, default_value = "0")]
        oob_bytes: u64,
        #[clap(long)]
        extended: bool,
    },
    /// Identify the namespace for the given locator
    Idfy {
        locator: PathBuf,
        #[clap(long)]
        nsid: Option<u32>,
        /// Dump the raw identify record to this file
        #[clap(long)]
        data_output: Option<PathBuf>,
        #[clap(long, value_parser = parse_size_with_suffix)]
        lba_bytes: Option<u64>,
        #[clap(long, value_parser = parse_size_with_suffix, default_value = "0")]
        oob_bytes: u64,
        #[clap(long)]
        extended: bool,
    },
    /// Read data and optionally metadata
    Read {
        locator: PathBuf,
        /// Start logical block address
        #[clap(long)]
        slba: u64,
        /// Number of blocks to read, minus one
        #[clap(long)]
        nlb: u64,
        #[clap(long)]
        nsid: Option<u32>,
        /// Dump the data buffer to this file
        #[clap(long)]
        data_output: Option<PathBuf>,
        /// Declared but not implemented; ignored
        #[clap(long)]
        meta_output: Option<PathBuf>,
        #[clap(long, value_parser = parse_size_with_suffix)]
        lba_bytes: Option<u64>,
        #[clap(long, value_parser = parse_size_with_suffix, default_value = "0")]
        oob_bytes: u64,
        #[clap(long)]
        extended: bool,
        /// Open the locator with O_DIRECT
        #[clap(long)]
        direct: bool,
    },
    /// Write data and optionally metadata
    Write {
        locator: PathBuf,
        /// Start logical block address
        #[clap(long)]
        slba: u64,
        /// Number of blocks to write, minus one
        #[clap(long)]
        nlb: u64,
        #[clap(long)]
        nsid: Option<u32>,
        /// Fill the data buffer from this file instead of the pattern fill
        #[clap(long)]
        data_input: Option<PathBuf>,
        /// Declared but not implemented; metadata always uses the pattern fill
        #[clap(long)]
        meta_input: Option<PathBuf>,
        #[clap(long, value_parser = parse_size_with_suffix)]
        lba_bytes: Option<u64>,
        #[clap(long, value_parser = parse_size_with_suffix, default_value = "0")]
        oob_bytes: u64,
        #[clap(long)]
        extended: bool,
        /// Open the locator with O_DIRECT
        #[clap(long)]
        direct: bool,
    },
    /// Set a range of logical blocks to zero (reserved, not implemented)
    WriteZeros {
        locator: PathBuf,
        #[clap(long)]
        slba: u64,
        #[clap(long)]
        nlb: u64,
        #[clap(long)]
        nsid: Option<u32>,
        #[clap(long)]
        data_input: Option<PathBuf>,
        #[clap(long)]
        meta_input: Option<PathBuf>,
    },
    /// Mark a range of logical blocks as invalid (reserved, not implemented)
    WriteUncor {
        locator: PathBuf,
        #[clap(long)]
        slba: u64,
        #[clap(long)]
        nlb: u64,
        #[clap(long)]
        nsid: Option<u32>,
        #[clap(long)]
        data_input: Option<PathBuf>,
        #[clap(long)]
        meta_input: Option<PathBuf>,
    },
}

fn run(log: &Log, cmd: Commands) -> nsblk::Result<()> {
    match cmd {
        Commands::Enum {
            sys_locator,
            all,
            json,
        } => ops::enumerate(
            log,
            &EnumSpec {
                sys_locator,
                all,
                json,
            },
        ),
        Commands::Info {
            locator,
            lba_bytes,
            oob_bytes,
            extended,
        } => {
            let dev = Device::open(
                &OpenSpec {
                    locator,
                    writable: false,
                    direct: false,
                    lba_bytes,
                    oob_bytes,
                    extended,
                },
                log,
            )?;
            ops::info(log, &dev)
        }
        Commands::Idfy {
            locator,
            nsid,
            data_output,
            lba_bytes,
            oob_bytes,
            extended,
        } => {
            let mut dev = Device::open(
                &OpenSpec {
                    locator,
                    writable: false,
                    direct: false,
                    lba_bytes,
                    oob_bytes,
                    extended,
                },
                log,
            )?;
            ops::identify(log, &mut dev, nsid, data_output.as_deref())
        }
        Commands::Read {
            locator,
            slba,
            nlb,
            nsid,
            data_output,
            meta_output,
            lba_bytes,
            oob_bytes,
            extended,
            direct,
        } => {
            let mut dev = Device::open(
                &OpenSpec {
                    locator,
                    writable: false,
                    direct,
                    lba_bytes,
                    oob_bytes,
                    extended,
                },
                log,
            )?;
            ops::read(
                log,
                &mut dev,
                &ReadSpec {
                    range: RangeSpec { slba, nlb },
                    nsid,
                    data_output,
                    meta_output,
                },
            )
        }
        Commands::Write {
            locator,
            slba,
            nlb,
            nsid,
            data_input,
            meta_input,
            lba_bytes,
            oob_bytes,
            extended,
            direct,
        } => {
            let mut dev = Device::open(
                &OpenSpec {
                    locator,
                    writable: true,
                    direct,
                    lba_bytes,
                    oob_bytes,
                    extended,
                },
                log,
            )?;
            ops::write(
                log,
                &mut dev,
                &WriteSpec {
                    range: RangeSpec { slba, nlb },
                    nsid,
                    data_input,
                    meta_input,
                },
            )
        }
        Commands::WriteZeros { .. } => ops::write_zeroes(log),
        Commands::WriteUncor { .. } => ops::write_uncor(log),
    }
}

fn main() {
    let cli = Cli::parse();
    let log = match cli.log_file {
        Some(ref path) => match Log::with_file(path) {
            Ok(log) => log,
            Err(err) => {
                eprintln!("cannot open log file '{}': {}", path.display(), err);
                process::exit(1);
            }
        },
        None => Log::to_stderr(),
    };

    let code = match run(&log, cli.command) {
        Ok(()) => 0,
        Err(err) => {
            log.error(format!("command failed: {}", err));
            err.exit_code()
        }
    };
    process::exit(code);
}
