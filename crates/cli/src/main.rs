// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `keyrack` — manage named Claude API accounts from the terminal.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;

use keyrack::{AccountType, AccountUsage, AuthorizeOptions, Client, ClientConfig};

#[derive(Debug, Parser)]
#[command(name = "keyrack", version, about = "Encrypted multi-account Claude credential store")]
struct Cli {
    /// Path of the encrypted account store.
    #[arg(long, global = true, env = "KEYRACK_STORAGE_PATH")]
    storage_path: Option<PathBuf>,

    /// Value for the anthropic-beta header on OAuth API calls.
    #[arg(long, global = true, env = "KEYRACK_BETA")]
    beta: Option<String>,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, global = true, default_value = "warn", env = "KEYRACK_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List stored accounts.
    List,
    /// Authorize a new account in the browser and store it.
    Login {
        /// Account name.
        name: String,
        /// Fail unless the token can be upgraded to a long-lived API key.
        #[arg(long)]
        long_lived: bool,
        /// Seconds to wait for the browser callback.
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
    /// Import credentials from the platform secret store.
    Import {
        /// Account name.
        name: String,
    },
    /// Validate and store an organization admin API key.
    AddAdmin {
        /// Account name.
        name: String,
        /// The admin API key (sk-ant-admin...).
        key: String,
    },
    /// Mark an account as active.
    Use {
        /// Account name.
        name: String,
    },
    /// Delete an account.
    Remove {
        /// Account name.
        name: String,
    },
    /// Rename an account.
    Rename {
        old: String,
        new: String,
    },
    /// Re-authorize an existing OAuth account in the browser.
    Refresh {
        /// Account name.
        name: String,
        /// Fail unless the token can be upgraded to a long-lived API key.
        #[arg(long)]
        long_lived: bool,
        /// Seconds to wait for the browser callback.
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
    /// Fetch usage for one account, or all of them.
    Usage {
        /// Account name (omit for all accounts).
        name: Option<String>,
        /// Emit raw JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    // reqwest needs a process-wide crypto provider before the first TLS dial.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut config = ClientConfig { storage_path: cli.storage_path.clone(), ..Default::default() };
    if let Some(beta) = cli.beta.clone() {
        config.anthropic_beta = beta;
    }

    match run(cli, config).await {
        Ok(()) => {}
        Err(e) => {
            error!("fatal: {e:#}");
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(cli: Cli, config: ClientConfig) -> anyhow::Result<()> {
    let client = Client::new(config)?;

    match cli.command {
        Command::List => {
            let data = client.list_accounts()?;
            if data.accounts.is_empty() {
                println!("no accounts stored");
                return Ok(());
            }
            for account in &data.accounts {
                let marker =
                    if data.active_account.as_deref() == Some(&account.name) { "*" } else { " " };
                let email = account.email.as_deref().unwrap_or("-");
                let kind = match account.account_type {
                    AccountType::Oauth => "oauth",
                    AccountType::Admin => "admin",
                };
                println!("{marker} {:<20} {kind:<6} {email}", account.name);
            }
        }
        Command::Login { name, long_lived, timeout_secs } => {
            println!("opening browser for authorization...");
            let options = AuthorizeOptions {
                timeout: Duration::from_secs(timeout_secs),
                require_long_lived: long_lived,
                ..Default::default()
            };
            let account = client.authenticate(&name, options).await?;
            println!("saved account {}", account.name);
        }
        Command::Import { name } => {
            let account = client.save_account(&name, None).await?;
            match account.email {
                Some(email) => println!("imported {} ({email})", account.name),
                None => println!("imported {}", account.name),
            }
        }
        Command::AddAdmin { name, key } => {
            let account = client.save_admin_account(&name, &key).await?;
            println!("saved admin account {}", account.name);
        }
        Command::Use { name } => {
            client.switch_account(&name)?;
            println!("active account: {name}");
        }
        Command::Remove { name } => {
            if client.delete_account(&name)? {
                println!("removed {name}");
            } else {
                println!("no account named {name}");
            }
        }
        Command::Rename { old, new } => {
            if client.rename_account(&old, &new)? {
                println!("renamed {old} -> {new}");
            } else {
                println!("no account named {old}");
            }
        }
        Command::Refresh { name, long_lived, timeout_secs } => {
            println!("opening browser to re-authorize {name}...");
            let options = AuthorizeOptions {
                timeout: Duration::from_secs(timeout_secs),
                require_long_lived: long_lived,
                ..Default::default()
            };
            let account = client.refresh_account(&name, options).await?;
            println!("refreshed {}", account.name);
        }
        Command::Usage { name, json } => {
            let results = match name {
                Some(name) => vec![client.get_account_usage(&name).await?],
                None => client.get_all_accounts_usage().await?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for result in &results {
                    print_usage(result);
                }
            }
        }
    }
    Ok(())
}

fn print_usage(result: &AccountUsage) {
    if let Some(error) = &result.error {
        println!("{:<20} error: {error}", result.name);
        return;
    }
    let Some(usage) = &result.usage else {
        println!("{:<20} no usage data", result.name);
        return;
    };
    let window = |w: &Option<keyrack::usage::UsageWindow>| match w {
        Some(w) => format!("{:.0}%", w.utilization),
        None => "-".to_owned(),
    };
    println!(
        "{:<20} 5h {:>5}  7d {:>5}  7d-opus {:>5}",
        result.name,
        window(&usage.five_hour),
        window(&usage.seven_day),
        window(&usage.seven_day_opus),
    );
}
