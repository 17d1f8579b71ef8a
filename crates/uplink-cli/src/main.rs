use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use uplink_core::domain::{AbortHandle, AccessRole, TokenPair, UploadFile};
use uplink_core::{ClientBuilder, ClientConfig, UploadOptions};

#[derive(Debug, Parser)]
#[command(name = "uplink", version, about = "Authenticated API and direct-upload client")]
struct Cli {
    /// JSON config file; UPLINK_* variables still override it.
    #[arg(long, global = true, env = "UPLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Negotiate a ticket and upload a file straight to the edge.
    Upload {
        path: PathBuf,
        #[arg(long, default_value = "uploads")]
        folder: String,
        /// guest, student, teacher or admin
        #[arg(long, default_value = "guest")]
        role: AccessRole,
        /// Do not print progress.
        #[arg(long)]
        quiet: bool,
    },
    /// GET a backend path and print the normalized envelope.
    Get {
        path: String,
        /// Print only the list payload.
        #[arg(long)]
        items: bool,
    },
    /// Store tokens obtained elsewhere.
    LoginToken {
        #[arg(long, env = "UPLINK_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long, env = "UPLINK_REFRESH_TOKEN")]
        refresh_token: Option<String>,
    },
    /// Drop stored tokens.
    Logout,
}

/// Uses `RUST_LOG` if set, otherwise `--log-level`. Logs go to stderr so
/// stdout stays machine-readable.
fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ClientConfig> {
    let config = match path {
        Some(path) => ClientConfig::from_file(path)?
            .merge_env(|key| std::env::var(key).ok())?,
        None => ClientConfig::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json)?;

    let config = load_config(cli.config.as_ref()).context("loading configuration")?;
    if config.token_file.is_none() {
        warn!("no token file configured, tokens live only for this process");
    }
    let client = ClientBuilder::new(config).build()?;

    match cli.command {
        Command::Upload {
            path,
            folder,
            role,
            quiet,
        } => {
            let file = UploadFile::from_path(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;

            let (abort, signal) = AbortHandle::new();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, aborting upload");
                    abort.abort();
                }
            });

            let mut options = UploadOptions::new(folder)
                .with_access_role(role)
                .with_signal(signal);
            if !quiet {
                let last = AtomicU8::new(u8::MAX);
                options = options.with_progress(Arc::new(move |progress| {
                    if last.swap(progress.percentage, Ordering::Relaxed) != progress.percentage {
                        eprint!(
                            "\r{:>3}% ({}/{} bytes)",
                            progress.percentage, progress.bytes_sent, progress.total_bytes
                        );
                        if progress.is_complete() {
                            eprintln!();
                        }
                    }
                }));
            }

            let result = client.upload_file_with_presign(file, options).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                bail!(result.error.unwrap_or_else(|| "upload failed".into()));
            }
        }
        Command::Get { path, items } => {
            if items {
                let items: Vec<serde_json::Value> = client.api().get_items(&path).await?;
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                let envelope = client.api().get(&path).await?;
                println!("{}", serde_json::to_string_pretty(&envelope)?);
                if !envelope.success {
                    bail!("{}", envelope.message);
                }
            }
        }
        Command::LoginToken {
            access_token,
            refresh_token,
        } => {
            client
                .login(TokenPair::new(access_token, refresh_token))
                .await?;
            let persisted = client.config().token_file.is_some();
            info!(persisted, "tokens stored");
        }
        Command::Logout => {
            client.logout().await;
            info!("logged out");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_upload_role() {
        let cli = Cli::parse_from(["uplink", "upload", "a.png", "--role", "Teacher"]);
        match cli.command {
            Command::Upload { role, folder, .. } => {
                assert_eq!(role, AccessRole::Teacher);
                assert_eq!(folder, "uploads");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
