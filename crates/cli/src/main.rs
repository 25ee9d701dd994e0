use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use namecarry::commands::{
    build_command, export_image_command, inspect_command, list_backends_command,
    resolve_command, BuildArgs, ResolveArgs,
};
use namecarry::default_log_level;

/// Carry function names from one build of a binary to another.
///
/// This CLI is a thin wrapper around `namecarry-core` (exposed in code as `namecarry_core`).
/// All matching logic lives in the library so it can be tested thoroughly and reused from
/// other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "namecarry",
    version,
    about = "Carry function names across versions of a binary",
    long_about = None
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides this.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fingerprint every named function of a source image and write a dump.
    Build {
        /// Source image (an image export, or an ELF with `--backend capstone`).
        #[arg(long)]
        image: String,

        /// Image loader to use.
        #[arg(long, default_value = "export")]
        backend: String,

        /// Architecture override for disassembling loaders.
        #[arg(long)]
        arch: Option<String>,

        /// Optional match config (JSON or YAML).
        #[arg(long)]
        config: Option<String>,

        /// Output dump (.json, .yaml/.yml, or .db/.sqlite).
        #[arg(long)]
        out: String,
    },

    /// Locate the fingerprints of a dump in a target image.
    Resolve {
        /// Target image.
        #[arg(long)]
        image: String,

        /// Dump written by `build`.
        #[arg(long)]
        dump: String,

        /// Image loader to use.
        #[arg(long, default_value = "export")]
        backend: String,

        /// Architecture override for disassembling loaders.
        #[arg(long)]
        arch: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Apply resolved names to the target and write the renamed image export here.
        #[arg(long)]
        apply_out: Option<String>,
    },

    /// Show the fingerprints stored in a dump.
    Inspect {
        #[arg(long)]
        dump: String,

        /// Only show this function.
        #[arg(long)]
        name: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Convert a binary into an image export (JSON or YAML by extension).
    ExportImage {
        #[arg(long)]
        binary: String,

        #[arg(long, default_value = "capstone")]
        backend: String,

        #[arg(long)]
        arch: Option<String>,

        #[arg(long)]
        out: String,
    },

    /// List the image loaders compiled into this binary.
    Backends {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_level(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .without_time()
        .init();

    match cli.command {
        Command::Build { image, backend, arch, config, out } => {
            build_command(&BuildArgs { image, backend, arch, config, out })?
        }
        Command::Resolve { image, dump, backend, arch, json, apply_out } => {
            resolve_command(&ResolveArgs { image, dump, backend, arch, json, apply_out })?
        }
        Command::Inspect { dump, name, json } => inspect_command(&dump, name.as_deref(), json)?,
        Command::ExportImage { binary, backend, arch, out } => {
            export_image_command(&binary, &backend, arch.as_deref(), &out)?
        }
        Command::Backends { json } => list_backends_command(json)?,
    }

    Ok(())
}
