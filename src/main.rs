//! lmsarchive - archive a school LMS through a disk-backed response cache
//!
//! Wires configuration, logging, and the two clients together, then
//! dispatches the subcommand. Fetches run sequentially; the cache on disk
//! is the only state shared between runs, so an interrupted run resumes
//! where it stopped.

use std::error::Error;
use std::path::Path;
use std::process;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use lmsarchive::api::oauth::Signer;
use lmsarchive::api::{FetchError, FetchOptions, MultiGetClient, MultiGetOptions, SessionClient};
use lmsarchive::archive;
use lmsarchive::cache::{CacheKind, CacheStore, CachedBody};
use lmsarchive::cli::{normalize_path, Cli, Command};
use lmsarchive::config::{self, Config};

#[tokio::main]
async fn main() {
    // A missing .env is fine; the variables may be exported instead
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        process::exit(1);
    }
}

/// Installs the fmt subscriber on stderr, keeping stdout clean for fetched
/// bodies. `RUST_LOG` overrides the -v flags.
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let Cli {
        cache_dir,
        creds,
        verbose: _,
        command,
    } = cli;
    command.validate()?;

    let config = Config::from_env()?;
    let store = match cache_dir {
        Some(dir) => CacheStore::with_root(dir),
        None => CacheStore::new(),
    };

    match command {
        Command::Fetch {
            paths,
            html,
            allow_forbidden,
            no_retry,
            out,
        } => {
            let session = build_session(&config, store)?;
            let options = FetchOptions {
                allow_forbidden,
                no_retry,
                ..Default::default()
            };

            if let Some(dest) = out {
                // validate() guarantees exactly one path with --out
                let path = normalize_path(&paths[0]);
                session.download(&path, &dest, options).await?;
                println!("{}", dest.display());
                return Ok(());
            }

            let kind = if html { CacheKind::Html } else { CacheKind::Json };
            for arg in &paths {
                let path = normalize_path(arg);
                match session.fetch(&path, kind, options).await {
                    Ok(CachedBody::Json(value)) => {
                        println!("{}", serde_json::to_string_pretty(&value)?)
                    }
                    Ok(CachedBody::Html(text)) => println!("{}", text),
                    Ok(CachedBody::File(bytes)) => println!("{} bytes", bytes.len()),
                    Err(FetchError::Forbidden(path)) if allow_forbidden => {
                        warn!("{} is forbidden; cached the sentinel", path);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Command::MultiGet {
            paths,
            allow_forbidden,
        } => {
            let multiget = build_multiget(creds.as_deref(), &config, store)?;
            let normalized: Vec<String> = paths.iter().map(|p| normalize_path(p)).collect();
            let resolved = multiget
                .fetch_many(&normalized, MultiGetOptions { allow_forbidden })
                .await?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Command::Archive { out } => {
            let session = build_session(&config, store.clone())?;
            let multiget = build_multiget(creds.as_deref(), &config, store)?;
            archive::run(&session, &multiget, config.user_id, &out).await?;
        }
    }
    Ok(())
}

fn build_session(config: &Config, store: CacheStore) -> Result<SessionClient, Box<dyn Error>> {
    let mut session = SessionClient::new(&config.host, &config.session_id, store)?;
    if let Some((key, token)) = &config.csrf {
        session = session.with_csrf(key, token);
    }
    Ok(session)
}

fn build_multiget(
    creds: Option<&Path>,
    config: &Config,
    store: CacheStore,
) -> Result<MultiGetClient, Box<dyn Error>> {
    let credentials = config::load_credentials(creds)?;
    Ok(MultiGetClient::new(
        &config.api_base,
        Signer::new(credentials),
        store,
    ))
}
