pub mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kvclone::{CloneConfig, RawEndpoint, TracingReporter, clone_stores};

#[derive(Parser, Debug)]
#[command(name = "kvclone")]
#[command(about = "Copy every key of one key-value store into another")]
pub struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Local store directory to copy from
    #[arg(long, value_name = "PATH")]
    pub from_local: Option<PathBuf>,
    /// MongoDB URI to copy from
    #[arg(long, value_name = "URI")]
    pub from_remote_uri: Option<String>,
    #[arg(long, value_name = "NAME")]
    pub from_remote_database: Option<String>,
    #[arg(long, value_name = "NAME")]
    pub from_remote_collection: Option<String>,

    /// Local store directory to copy into (created if missing)
    #[arg(long, value_name = "PATH")]
    pub to_local: Option<PathBuf>,
    /// MongoDB URI to copy into
    #[arg(long, value_name = "URI")]
    pub to_remote_uri: Option<String>,
    #[arg(long, value_name = "NAME")]
    pub to_remote_database: Option<String>,
    #[arg(long, value_name = "NAME")]
    pub to_remote_collection: Option<String>,

    /// Maximum concurrent writes
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Log every copied key
    #[arg(short, long)]
    pub verbose: bool,

    /// Seconds allowed for opening each store
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    fn source_overrides(&self) -> RawEndpoint {
        RawEndpoint {
            local_path: self.from_local.clone(),
            remote_uri: self.from_remote_uri.clone(),
            remote_database: self.from_remote_database.clone(),
            remote_collection: self.from_remote_collection.clone(),
        }
    }

    fn destination_overrides(&self) -> RawEndpoint {
        RawEndpoint {
            local_path: self.to_local.clone(),
            remote_uri: self.to_remote_uri.clone(),
            remote_database: self.to_remote_database.clone(),
            remote_collection: self.to_remote_collection.clone(),
        }
    }

    /// Build the job config from the optional file plus flags.
    pub fn into_config(self) -> Result<CloneConfig> {
        let base = match &self.config {
            Some(path) => CloneConfig::from_json_file(path)?,
            None => CloneConfig::default(),
        };

        let mut config = CloneConfig {
            source: base.source.clone().merge(self.source_overrides()),
            destination: base.destination.clone().merge(self.destination_overrides()),
            ..base
        };
        if let Some(parallel) = self.parallel {
            config = config.with_parallel(parallel);
        }
        if self.verbose {
            config = config.with_verbose(true);
        }
        if let Some(secs) = self.connect_timeout {
            config = config.with_connect_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config()?;
    let summary = clone_stores(&config, Arc::new(TracingReporter))
        .await
        .context("clone failed")?;
    summary
        .destination
        .close()
        .await
        .context("closing destination")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_build_a_config() {
        let cli = Cli::parse_from([
            "kvclone",
            "--from-remote-uri",
            "mongodb://localhost:27017",
            "--from-remote-database",
            "hub",
            "--to-local",
            "/tmp/out",
            "-p",
            "16",
            "-v",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.parallel, 16);
        assert!(config.verbose);
        assert_eq!(config.source.remote_database.as_deref(), Some("hub"));
        assert_eq!(config.destination.local_path, Some(PathBuf::from("/tmp/out")));
        config.validate().unwrap();
    }

    #[test]
    fn flags_override_config_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("job.json");
        std::fs::write(
            &path,
            r#"{"source": {"local_path": "/from"}, "destination": {"local_path": "/to"}, "parallel": 4}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "kvclone",
            "--config",
            path.to_str().unwrap(),
            "--to-local",
            "/elsewhere",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.parallel, 4);
        assert_eq!(config.source.local_path, Some(PathBuf::from("/from")));
        assert_eq!(config.destination.local_path, Some(PathBuf::from("/elsewhere")));
    }
}
