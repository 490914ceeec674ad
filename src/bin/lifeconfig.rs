//! Watches a configuration file or endpoint and prints every state as a JSON line.
use std::{error::Error, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use futures::StreamExt;
use lifeconfig::{
    LifeConfig, LifeConfigOptions, ReloadPolicy, Session, SessionValue,
    sources::{FileSource, HttpSource, HttpSourceOptions},
    tracing_config,
};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lifeconfig")]
#[command(about = "Follow a live configuration source")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print the first state and exit
    #[arg(long, global = true)]
    once: bool,

    /// Keep watching after a failed reload
    #[arg(long, global = true)]
    keep_going: bool,

    /// Session attribute sent with every load, as key=value
    #[arg(short, long = "session", value_parser = parse_attribute, global = true)]
    attributes: Vec<(String, SessionValue)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a JSON or TOML file
    File {
        path: PathBuf,
        #[arg(long, default_value_t = 50)]
        debounce_ms: u64,
    },
    /// Poll an HTTP endpoint serving JSON
    Http {
        url: String,
        #[arg(long, default_value_t = 300)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_config::init()?;

    let cli = Cli::parse();

    let session = cli
        .attributes
        .into_iter()
        .fold(Session::new(), |session, (key, value)| session.with(key, value));

    let reload_policy = if cli.keep_going {
        ReloadPolicy::Skip
    } else {
        ReloadPolicy::Terminate
    };

    let options = LifeConfigOptions::default()
        .with_session(session)
        .with_reload_policy(reload_policy);

    let config: LifeConfig<Value> = match cli.command {
        Commands::File { path, debounce_ms } => {
            info!(path = %path.display(), "watching file");
            let source = FileSource::new(path).with_debounce(Duration::from_millis(debounce_ms));
            LifeConfig::new(source, options)
        }
        Commands::Http { url, interval_ms } => {
            info!(%url, "polling endpoint");
            let source_options = HttpSourceOptions::default()
                .with_refresh_interval(Duration::from_millis(interval_ms));
            LifeConfig::new(HttpSource::with_options(url, source_options), options)
        }
    };

    config.wait().await?;
    let mut states = config.stream();

    loop {
        tokio::select! {
            state = states.next() => {
                let Some(state) = state else {
                    warn!("state stream ended");
                    break;
                };

                println!("{}", serde_json::to_string(&state)?);

                if cli.once {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    drop(states);
    config.stop().await?;

    Ok(())
}

fn parse_attribute(raw: &str) -> Result<(String, SessionValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;

    let value = if let Ok(flag) = value.parse::<bool>() {
        SessionValue::Flag(flag)
    } else if let Ok(number) = value.parse::<i64>() {
        SessionValue::Integer(number)
    } else if let Ok(number) = value.parse::<f64>() {
        SessionValue::Float(number)
    } else {
        SessionValue::Text(value.to_string())
    };

    Ok((key.to_string(), value))
}
