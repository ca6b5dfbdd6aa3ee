//! Command-line diagnostics for secure element traffic
//!
//! Every subcommand works offline on hex input captured from a bus trace or
//! typed by hand, no hardware is needed.

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

mod commands;

use commands::{Challenge, CrcVariant, HexBytes};

#[derive(Parser)]
#[command(version, about = "Decode and check secure element traffic")]
struct Cli {
    /// Debug level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a checksum
    Crc {
        /// Checksum algorithm
        #[arg(short, long, value_enum, default_value = "x25")]
        variant: CrcVariant,

        /// Input (hex)
        #[arg(value_parser = commands::parse_hex)]
        data: HexBytes,
    },

    /// Derive SCP03 session keys and cryptograms
    DeriveSessionKeys {
        /// Static encryption key (hex)
        #[arg(long, value_parser = commands::parse_hex)]
        enc: HexBytes,

        /// Static MAC key (hex)
        #[arg(long, value_parser = commands::parse_hex)]
        mac: HexBytes,

        /// Host challenge (8 bytes hex)
        #[arg(long, value_parser = commands::parse_challenge)]
        host_challenge: Challenge,

        /// Card challenge (8 bytes hex)
        #[arg(long, value_parser = commands::parse_challenge)]
        card_challenge: Challenge,
    },

    /// Decode a T=1' block
    DecodeBlock {
        /// Frame including NAD and checksum (hex)
        #[arg(value_parser = commands::parse_hex)]
        frame: HexBytes,
    },

    /// Decode communication interface parameters
    DecodeCip {
        /// CIP as returned by S(CIP) (hex)
        #[arg(value_parser = commands::parse_hex)]
        cip: HexBytes,
    },

    /// Decode a command APDU
    DecodeApdu {
        /// APDU (hex)
        #[arg(value_parser = commands::parse_hex)]
        apdu: HexBytes,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let output = match cli.command {
        Commands::Crc { variant, data } => commands::crc(variant, &data),
        Commands::DeriveSessionKeys { enc, mac, host_challenge, card_challenge } => {
            debug!("deriving session keys");
            commands::derive_session_keys(&enc, &mac, &host_challenge, &card_challenge)?
        }
        Commands::DecodeBlock { frame } => commands::decode_block(&frame)?,
        Commands::DecodeCip { cip } => commands::decode_cip(&cip)?,
        Commands::DecodeApdu { apdu } => commands::decode_apdu(&apdu)?,
    };

    println!("{output}");
    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };

    // RUST_LOG directives take precedence over the default level
    let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).with_ansi(true).init();
}
