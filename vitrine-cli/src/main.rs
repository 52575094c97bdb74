//! `vitrine` binary: resolve the configuration, open the bucket and
//! serve it at the mount point until the kernel unmounts it.

use anyhow::Context;
use clap::Parser;
use serde_yaml::Mapping;
use std::{path::Path, process::ExitCode, sync::Arc};
use tracing_subscriber::EnvFilter;
use vitrine::{
    config::{self, ConfigError, Settings, DEFAULT_CONFIG_FILE},
    fs::Viewport,
    mount, util,
};
use vitrine_backends::{Region, S3Store};

/// Mount a remote object-storage bucket as a read-only filesystem.
#[derive(Debug, Parser)]
#[command(name = "vitrine", version, about)]
struct Args {
    /// Where to mount the bucket
    #[arg(value_name = "mount-point")]
    mount_point: String,

    /// Bucket to mount
    #[arg(long)]
    bucket: Option<String>,

    /// Access key for the bucket
    #[arg(long, value_name = "KEY")]
    access_key: Option<String>,

    /// Secret key for the bucket
    #[arg(long, value_name = "KEY")]
    secret_key: Option<String>,

    /// Custom S3-compatible endpoint URL
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Bucket region
    #[arg(long, value_name = "NAME")]
    region: Option<String>,

    /// Path to the configuration file
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Don't prompt for missing information
    #[arg(long)]
    no_input: bool,

    /// Run the filesystem server in the foreground
    #[arg(long)]
    foreground: bool,
}

impl Args {
    /// Only settings given on the command line may override the file
    /// layers, so absent flags stay absent from the mapping.
    fn overrides(&self, mount_point: &Path) -> Mapping {
        let mut map = Mapping::new();
        map.insert(
            "mount-point".into(),
            mount_point.display().to_string().into(),
        );

        let flags = [
            ("bucket", &self.bucket),
            ("access-key", &self.access_key),
            ("secret-key", &self.secret_key),
            ("endpoint", &self.endpoint),
            ("region", &self.region),
        ];
        for (key, value) in flags {
            if let Some(value) = value {
                map.insert(key.into(), value.clone().into());
            }
        }

        if self.no_input {
            map.insert("no-input".into(), true.into());
        }
        if self.foreground {
            map.insert("foreground".into(), true.into());
        }

        map
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mount_point = util::expand_path(&args.mount_point);

    let settings = match config::resolve(
        &args.config_file,
        &mount_point,
        args.overrides(&mount_point),
    ) {
        Ok(settings) => settings,
        Err(error) => {
            report(&error);
            return ExitCode::FAILURE;
        }
    };

    match run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn report(error: &ConfigError) {
    match error {
        ConfigError::Missing { fields } => {
            for field in fields {
                eprintln!("error: missing configuration for \"{field}\"");
            }
        }
        other => eprintln!("error: {other}"),
    }
}

fn run(settings: Settings) -> anyhow::Result<()> {
    let region = match (&settings.endpoint, &settings.region) {
        (Some(endpoint), region) => {
            Region::with_endpoint(region.as_deref().unwrap_or("us-east-1"), endpoint)
        }
        (None, Some(region)) => Region::new(region),
        (None, None) => Region::default(),
    };

    let store = S3Store::open(
        region,
        &settings.bucket,
        settings.access_key.clone(),
        settings.secret_key.clone(),
    )
    .context("failed to open the bucket")?;

    let scratch = settings
        .scratch_dir()
        .context("cannot locate the user home directory")?;
    let viewport = Viewport::new(Arc::new(store), &scratch, settings.cache_options())
        .context("failed to prepare the scratch directory")?;

    if !settings.foreground {
        // stdio closes here; anything later goes through the log writer
        nix::unistd::daemon(true, false).context("failed to daemonise")?;
    }

    tracing::info!(
        bucket = %settings.bucket,
        mount_point = %settings.mount_point.display(),
        "serving"
    );
    mount::serve(Arc::new(viewport), &settings.mount_point, &settings.bucket)
        .context("mount failed")?;

    Ok(())
}
