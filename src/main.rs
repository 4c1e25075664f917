mod cmd;
mod config;
mod error;
mod inspector;
mod license;
mod progress;
#[cfg(test)]
mod testutil;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use config::{CliOverrides, ScanConfig};
use inspector::runtime::RuntimeKind;

#[derive(Parser)]
#[command(name = "image-licenses")]
#[command(about = "Print the license files shipped inside a container image")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    options: ScanOptions,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Image reference or path to a tar archive (shorthand for `image-licenses scan <image>`)
    image: Option<String>,
}

#[derive(Args)]
struct ScanOptions {
    /// Runtime used to export images given by reference
    #[arg(long, global = true, value_enum, default_value_t = RuntimeKind::Docker)]
    runtime: RuntimeKind,

    /// JSON file with common_license_dirs, license_filenames and resolve_shadowing
    #[arg(long, global = true)]
    config: Option<String>,

    /// Directory holding shared license texts (repeatable, replaces the default)
    #[arg(long = "common-licenses-dir", global = true)]
    common_licenses_dirs: Vec<String>,

    /// File name suffix that marks a license file (repeatable, replaces the defaults)
    #[arg(long = "license-name", global = true)]
    license_names: Vec<String>,

    /// Only report the copy of each path that is visible in the final image
    #[arg(long, global = true)]
    resolve_shadowing: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print license files and the common licenses they reference
    Scan {
        /// Image reference or path to a tar archive
        image: String,
    },

    /// List the common license texts found in an image
    Commons {
        /// Image reference or path to a tar archive
        image: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = ScanConfig::from_cli(CliOverrides {
        config_file: cli.options.config,
        common_license_dirs: cli.options.common_licenses_dirs,
        license_filenames: cli.options.license_names,
        resolve_shadowing: cli.options.resolve_shadowing,
    })?;
    let runtime = cli.options.runtime;

    // `image-licenses <image>` is shorthand for `image-licenses scan <image>`
    match (cli.command, cli.image) {
        (Some(Commands::Scan { image }), _) | (None, Some(image)) => cmd::scan::run(&image, runtime, &config)?,
        (Some(Commands::Commons { image }), _) => cmd::scan::commons(&image, runtime, &config)?,
        (None, None) => {
            Cli::parse_from(["image-licenses", "--help"]);
        }
    }

    Ok(())
}
