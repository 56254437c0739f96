use anyhow::{bail, Context, Result};
use router_stats::{logging, service::RouterSource, AppConfig, Service};
use std::path::Path;

#[derive(Debug)]
struct Cli {
    config_path: Option<String>,
    simulate: bool,
    once: bool,
    print_default_config: bool,
}

impl Cli {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut cli = Cli {
            config_path: None,
            simulate: false,
            once: false,
            print_default_config: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                    cli.config_path = Some(value);
                }
                "--simulate" => cli.simulate = true,
                "--once" => cli.once = true,
                "--print-default-config" => cli.print_default_config = true,
                "--help" | "-h" => {
                    println!(
                        "Usage: router-stats [--config <path>] [--simulate] [--once]\n\
                         --config <path>          Path to TOML configuration (default: config/router-stats.toml)\n\
                         --simulate               Poll a built-in simulated router instead of a real one\n\
                         --once                   Poll a single time and exit\n\
                         --print-default-config   Print an example configuration and exit\n\
                         Environment: ROUTER_IP, ROUTER_USERNAME, ROUTER_PASSWORD, COLLECTION_INTERVAL,\n\
                         DATASTORE_TYPE, DATA_FILE_PATH override the file; RUST_LOG overrides log_level"
                    );
                    std::process::exit(0);
                }
                other => bail!("unknown argument '{other}'"),
            }
        }

        Ok(cli)
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config_path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("unable to load configuration from {path}"))?,
        None if Path::new(AppConfig::default_path()).exists() => {
            AppConfig::load(AppConfig::default_path())?
        }
        None => AppConfig::default(),
    };
    config
        .apply_process_env()
        .context("invalid environment override")?;
    config
        .validate(!cli.simulate)
        .context("invalid configuration")?;
    Ok(config)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse()?;
    if cli.print_default_config {
        print!("{}", AppConfig::example_toml());
        return Ok(());
    }

    let config = load_config(&cli)?;
    let _log_guard = logging::init(&config)?;
    tracing::info!(
        service = %config.service_name,
        router = %config.router_address,
        interval_seconds = config.collection_interval_seconds,
        datastore = ?config.datastore,
        "configuration loaded"
    );

    let source = if cli.simulate {
        RouterSource::Simulated
    } else {
        RouterSource::Http
    };
    let service = Service::new(config, source);
    if cli.once {
        service.run_once().await
    } else {
        service.run().await
    }
}
