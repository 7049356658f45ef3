use clap::Parser;
use clap::error::ErrorKind;
use ocipull_oci::{DEFAULT_TOKEN_SERVICE, Platform, current_platform, normalize_arch};
use std::path::PathBuf;

use crate::config::{
    DEFAULT_ARCH, DEFAULT_DEST, DEFAULT_OS, DEFAULT_REGISTRY, DEFAULT_REPO, DEFAULT_TAG,
    PullConfig,
};
use crate::tracing::{LogLevel, TracingConfig, TracingFormat};

#[derive(Parser, Debug)]
#[command(name = "ocipull")]
#[command(about = "Pull an OCI image from a registry and extract its layers into a directory")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[arg(
        short = 'r',
        long,
        env = "OCIPULL_REGISTRY",
        help = "Registry base URL",
        default_value = DEFAULT_REGISTRY
    )]
    pub registry: String,

    #[arg(
        short = 'R',
        long,
        env = "OCIPULL_REPO",
        help = "Repository within the registry",
        default_value = DEFAULT_REPO
    )]
    pub repo: String,

    #[arg(
        short = 't',
        long,
        env = "OCIPULL_TAG",
        help = "Tag to pull",
        default_value = DEFAULT_TAG
    )]
    pub tag: String,

    #[arg(
        short = 'a',
        long,
        env = "OCIPULL_ARCH",
        help = "Target architecture (x86_64 and aarch64 become amd64 and arm64)",
        default_value = DEFAULT_ARCH
    )]
    pub arch: String,

    #[arg(
        short = 'o',
        long,
        env = "OCIPULL_OS",
        help = "Target operating system",
        default_value = DEFAULT_OS
    )]
    pub os: String,

    #[arg(
        long,
        env = "OCIPULL_PLATFORM",
        help = "Target platform as os/arch, or \"host\"; overrides --arch and --os",
        value_parser = parse_platform
    )]
    pub platform: Option<Platform>,

    #[arg(
        short = 'd',
        long,
        env = "OCIPULL_DEST",
        help = "Directory to extract layers into",
        default_value = DEFAULT_DEST
    )]
    pub dest: PathBuf,

    #[arg(
        long,
        env = "OCIPULL_TOKEN_SERVICE",
        help = "Service name sent to the token endpoint",
        default_value = DEFAULT_TOKEN_SERVICE
    )]
    pub token_service: String,

    #[arg(long, help = "Continue without a token if the token endpoint fails")]
    pub anonymous: bool,

    #[arg(long, help = "Skip checking layer digests")]
    pub no_verify: bool,

    #[arg(long, help = "Keep downloaded layer-N.tar.gz files in the work directory")]
    pub keep_layers: bool,

    #[arg(
        long,
        env = "OCIPULL_WORK_DIR",
        help = "Directory for downloaded layer archives",
        default_value = "."
    )]
    pub work_dir: PathBuf,

    #[arg(
        short = 'l',
        long,
        help = "Set logging level",
        default_value = "info",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(
        long,
        env = "OCIPULL_LOG_FORMAT",
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,

    #[arg(long, help = "Output logs in JSON format (shorthand for --log-format json)")]
    pub json: bool,
}

impl Cli {
    #[must_use]
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            format: if self.json {
                TracingFormat::Json
            } else {
                self.log_format
            },
            level: self.level.into(),
        }
    }
}

fn parse_platform(value: &str) -> Result<Platform, String> {
    if value.eq_ignore_ascii_case("host") {
        return Ok(current_platform());
    }
    Platform::parse(value).ok_or_else(|| format!("expected os/arch or \"host\", got '{value}'"))
}

impl From<Cli> for PullConfig {
    fn from(cli: Cli) -> Self {
        let platform = cli
            .platform
            .unwrap_or_else(|| Platform::new(normalize_arch(&cli.arch), cli.os.to_lowercase()));

        Self {
            registry: cli.registry,
            repo: cli.repo,
            tag: cli.tag,
            platform,
            dest: cli.dest,
            token_service: cli.token_service,
            anonymous: cli.anonymous,
            verify: !cli.no_verify,
            keep_layers: cli.keep_layers,
            work_dir: cli.work_dir,
        }
    }
}

/// Process exit code for an argument parsing outcome.
///
/// Help and version requests succeed; every other parse error is a failure.
#[must_use]
pub const fn parse_exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}
