use clap::builder::styling::AnsiColor;
use clap::builder::Styles;
use clap::Parser;

const CLAP_STYLING: Styles = Styles::styled()
    .header(AnsiColor::BrightGreen.on_default().bold())
    .usage(AnsiColor::BrightGreen.on_default().bold())
    .literal(AnsiColor::BrightCyan.on_default().bold())
    .placeholder(AnsiColor::BrightCyan.on_default());

/// Format (or unformat) a tape cartridge for LTFS.
#[derive(Parser, Debug)]
#[command(name = "mkltfs")]
#[command(about = "Format a tape cartridge with the LTFS on-tape layout")]
#[command(version)]
#[command(styles = CLAP_STYLING)]
pub struct Cli {
    /// Tape device (e.g. mem:4096 for an in-memory cartridge of 4096 MiB)
    #[arg(short = 'd', long = "device", value_name = "DEVICE")]
    pub device: String,

    /// Tape block size in bytes
    #[arg(short = 'b', long, default_value_t = 524288)]
    pub blocksize: u32,

    /// Cartridge volume serial (barcode), up to six characters
    #[arg(short = 's', long = "tape-serial", default_value = "")]
    pub tape_serial: String,

    /// Human-readable volume name
    #[arg(short = 'n', long = "volume-name")]
    pub volume_name: Option<String>,

    /// Data placement policy, e.g. "size=1M/name=*.xml:*.json"
    #[arg(short = 'r', long)]
    pub rules: Option<String>,

    /// Forbid later policy overrides at mount time
    #[arg(long)]
    pub no_override: bool,

    /// Disable drive compression
    #[arg(short = 'c', long)]
    pub no_compression: bool,

    /// Index partition size in MiB
    #[arg(short = 'p', long = "index-partition-size", default_value_t = 1024)]
    pub index_partition_mib: u64,

    /// Reformat a cartridge that already carries an LTFS format
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Remove the LTFS format instead of creating one
    #[arg(short = 'w', long)]
    pub wipe: bool,

    /// With --wipe, also long-erase the medium
    #[arg(long)]
    pub long_wipe: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_format_invocation() {
        let cli = Cli::parse_from([
            "mkltfs",
            "--device",
            "mem:4096",
            "--blocksize",
            "524288",
            "--tape-serial",
            "TAPE01",
            "--volume-name",
            "archive-1",
            "--rules",
            "size=1M/name=*.xml:*.json",
        ]);
        assert_eq!(cli.device, "mem:4096");
        assert_eq!(cli.blocksize, 524288);
        assert_eq!(cli.tape_serial, "TAPE01");
        assert_eq!(cli.volume_name.as_deref(), Some("archive-1"));
        assert!(!cli.wipe);
        assert!(!cli.force);
    }

    #[test]
    fn wipe_mode_flags() {
        let cli = Cli::parse_from(["mkltfs", "-d", "mem:1024", "-w", "--long-wipe"]);
        assert!(cli.wipe);
        assert!(cli.long_wipe);
    }
}
