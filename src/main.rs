use anyhow::{Context, Result};
use clap::Parser;
use clipfs::config::{parse_delimiter, Config};
use clipfs::error::ClipError;
use clipfs::fs::{serve, ClipFs, ClipFuse};
use clipfs::probe::default_probe;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "clipfs")]
#[command(version, about = "Mount time-trimmed views of audio files")]
#[command(long_about = "Mirror ROOT at MOUNTPOINT. Opening `song.mp3#25-75` under the mount \
reads as a copy of song.mp3 holding only seconds 25 to 75, without re-encoding.")]
struct Cli {
    /// Directory holding the real audio files
    root: PathBuf,

    /// Empty directory to mount the view on
    mountpoint: PathBuf,

    /// Character separating a file name from its clip range
    #[arg(short, long)]
    delimiter: Option<String>,

    /// Cache probed metadata until a file's mtime or size changes
    #[arg(long)]
    cache_metadata: bool,

    /// Seconds the kernel may cache file attributes
    #[arg(long)]
    attr_ttl: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    // RUST_LOG wins over -v when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn apply_cli(config: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(ref delim) = cli.delimiter {
        config.delimiter = parse_delimiter(delim)?;
    }
    if cli.cache_metadata {
        config.cache_metadata = true;
    }
    if let Some(ttl) = cli.attr_ttl {
        config.attr_ttl_secs = ttl;
    }
    Ok(())
}

fn canonical_dir(path: &Path, what: &str) -> Result<PathBuf> {
    let dir = path
        .canonicalize()
        .with_context(|| format!("{} not found: {}", what, path.display()))?;
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory: {}", what, dir.display());
    }
    Ok(dir)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let root = canonical_dir(&cli.root, "Root")?;
    let mountpoint = canonical_dir(&cli.mountpoint, "Mount point")?;

    // Load and validate configuration
    let mut config = Config::load().context("Failed to load configuration")?;
    apply_cli(&mut config, &cli)?;
    config.validate().context("Configuration validation failed")?;

    info!("Root:      {}", root.display());
    info!("Mount:     {}", mountpoint.display());
    info!("Delimiter: {}", config.delimiter);
    if config.cache_metadata {
        info!("Metadata cache enabled");
    }

    let fs = ClipFs::new(&config.mount_config(&root), default_probe(config.cache_metadata));
    let fuse = ClipFuse::new(fs, config.attr_ttl());

    serve(fuse, &mountpoint, &config, |mut unmounter| {
        ctrlc::set_handler(move || {
            info!("Interrupted, unmounting");
            if let Err(e) = unmounter.unmount() {
                warn!("Unmount failed: {}", e);
            }
        })
        .map_err(|e| ClipError::Mount(format!("failed to install Ctrl+C handler: {e}")))?;
        info!("Serving; press Ctrl+C to unmount");
        Ok(())
    })
    .context("Filesystem session failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_positional_args() {
        let cli = parse(&["clipfs", "/music", "/mnt/clips"]);
        assert_eq!(cli.root, PathBuf::from("/music"));
        assert_eq!(cli.mountpoint, PathBuf::from("/mnt/clips"));
        assert!(cli.delimiter.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_requires_mountpoint() {
        assert!(Cli::try_parse_from(["clipfs", "/music"]).is_err());
    }

    #[test]
    fn test_apply_cli_overrides() {
        let cli = parse(&[
            "clipfs",
            "/music",
            "/mnt",
            "--delimiter",
            "@",
            "--cache-metadata",
            "--attr-ttl",
            "0",
        ]);
        let mut config = Config::default();
        apply_cli(&mut config, &cli).unwrap();

        assert_eq!(config.delimiter, '@');
        assert!(config.cache_metadata);
        assert_eq!(config.attr_ttl_secs, 0);
    }

    #[test]
    fn test_apply_cli_rejects_long_delimiter() {
        let cli = parse(&["clipfs", "/music", "/mnt", "-d", "##"]);
        let mut config = Config::default();
        assert!(apply_cli(&mut config, &cli).is_err());
    }

    #[test]
    fn test_canonical_dir_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"").unwrap();

        assert!(canonical_dir(dir.path(), "Root").is_ok());
        assert!(canonical_dir(&file, "Root").is_err());
        assert!(canonical_dir(&dir.path().join("missing"), "Root").is_err());
    }
}
