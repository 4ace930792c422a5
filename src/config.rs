use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use purefood_sync::export::{default_output_dir, ExportError};
use purefood_sync::retry::RetryConfig;
use purefood_sync::store::{DirStore, HomeDirStore, LocalStore};
use purefood_sync::sync::SyncConfig;

use crate::cli::{Cli, NetworkArgs};

/// Settings shared by every command.
pub struct Config {
    pub store: Arc<dyn LocalStore>,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.store.app_data_dir())
            .field("no_progress_bar", &self.no_progress_bar)
            .finish()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let store: Arc<dyn LocalStore> = match cli.data_dir.as_deref() {
            Some(dir) => {
                let dir = std::path::absolute(expand_tilde(dir))
                    .with_context(|| format!("Invalid data directory: {}", dir))?;
                Arc::new(DirStore::new(dir))
            }
            None => Arc::new(
                HomeDirStore::resolve()
                    .context("Cannot determine the home directory; pass --data-dir")?,
            ),
        };
        Ok(Self {
            store,
            no_progress_bar: cli.no_progress_bar,
        })
    }
}

/// Pipeline settings from the network flags.
pub fn sync_config(args: &NetworkArgs) -> anyhow::Result<SyncConfig> {
    if args.url.trim().is_empty() {
        anyhow::bail!("--url must not be empty");
    }
    if args.concurrency == 0 {
        anyhow::bail!("--concurrency must be at least 1");
    }
    if args.timeout == 0 {
        anyhow::bail!("--timeout must be at least 1 second");
    }
    Ok(SyncConfig {
        url: args.url.clone(),
        timeout: Duration::from_secs(args.timeout),
        retry: RetryConfig {
            max_retries: args.max_retries,
            delay: Duration::from_secs(args.retry_delay),
        },
        transcode_concurrency: args.concurrency,
        ..SyncConfig::default()
    })
}

/// Export destination: the given directory, else the documents directory.
pub fn output_dir(output: Option<&str>) -> anyhow::Result<PathBuf> {
    match output {
        Some(dir) => Ok(expand_tilde(dir)),
        None => Ok(default_output_dir().ok_or(ExportError::NoOutputDir)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["purefood-sync"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn network(cli: Cli) -> NetworkArgs {
        match cli.command {
            crate::cli::Command::Sync { network, .. } | crate::cli::Command::Refresh { network } => {
                network
            }
            other => panic!("no network args on {:?}", other),
        }
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Documents");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Documents"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(
            expand_tilde("/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            expand_tilde("relative/path"),
            PathBuf::from("relative/path")
        );
    }

    #[test]
    fn test_sync_defaults_match_pipeline_defaults() {
        let cfg = sync_config(&network(parse(&["sync"]))).unwrap();
        let defaults = SyncConfig::default();
        assert_eq!(cfg.url, defaults.url);
        assert_eq!(cfg.timeout, defaults.timeout);
        assert_eq!(cfg.retry.max_retries, defaults.retry.max_retries);
        assert_eq!(cfg.retry.delay, defaults.retry.delay);
        assert_eq!(cfg.transcode_concurrency, defaults.transcode_concurrency);
        assert_eq!(cfg.chunk_size, defaults.chunk_size);
    }

    #[test]
    fn test_network_flags_passthrough() {
        let cli = parse(&[
            "refresh",
            "--url",
            "http://localhost:8080/r.zip",
            "--max-retries",
            "5",
            "--retry-delay",
            "0",
            "--timeout",
            "10",
            "--concurrency",
            "2",
        ]);
        let cfg = sync_config(&network(cli)).unwrap();
        assert_eq!(cfg.url, "http://localhost:8080/r.zip");
        assert_eq!(cfg.retry.total_attempts(), 6);
        assert_eq!(cfg.retry.delay, Duration::ZERO);
        assert_eq!(cfg.timeout, Duration::from_secs(10));
        assert_eq!(cfg.transcode_concurrency, 2);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let cli = parse(&["sync", "--concurrency", "0"]);
        assert!(sync_config(&network(cli)).is_err());
    }

    #[test]
    fn test_data_dir_is_absolute() {
        let cli = parse(&["--data-dir", "relative/store", "status"]);
        let cfg = Config::from_cli(&cli).unwrap();
        assert!(cfg.store.app_data_dir().is_absolute());
        assert!(cfg.store.app_data_dir().ends_with("relative/store"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["list", "--no-progress-bar", "--log-level", "warn"]);
        assert!(cli.no_progress_bar);
        assert_eq!(cli.log_level, crate::types::LogLevel::Warn);
    }

    #[test]
    fn test_explicit_output_dir() {
        assert_eq!(
            output_dir(Some("/tmp/exports")).unwrap(),
            PathBuf::from("/tmp/exports")
        );
    }
}
