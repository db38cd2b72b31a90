// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dashguard::config::SecurityConfig;
use dashguard::error::{format_error, SUPPORT_HINT};
use dashguard::sanitize;
use dashguard::security::{fingerprint, generate_csp_nonce};
use dashguard::{redact_text, redact_value, ValidationError};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Data error - input rejected by a validator
    pub const DATA_ERR: i32 = 65;
    /// Configuration error - invalid or unreadable config
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

/// dashguard - session and request security for the dealership dashboard
#[derive(Parser)]
#[command(name = "dashguard")]
#[command(version = VERSION)]
#[command(about = "Security utilities for the dealership dashboard.")]
#[command(long_about = "dashguard - session and request security for the dealership dashboard\n\n\
    Clean a form value:      dashguard sanitize email \"User@Example.com\"\n\
    Redact a log line:       dashguard redact \"password=hunter2\"\n\
    Pin a certificate:       dashguard fingerprint backend.der\n\
    Inspect configuration:   dashguard config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose mode: debug logging to stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sanitize or validate a form value
    ///
    /// Examples:
    ///   dashguard sanitize html "<b onclick=x>hi</b>"
    ///   dashguard sanitize phone "+1 (555) 123-4567"
    Sanitize {
        /// Kind of field
        #[arg(value_enum)]
        kind: FieldKind,
        /// Raw input
        input: String,
    },

    /// Redact secrets from text, or from a JSON document with --json
    ///
    /// Examples:
    ///   dashguard redact "My password is 1234 and secret99 too"
    ///   dashguard redact --json '{"user":"j","apiKey":"abc"}'
    Redact {
        text: String,
        /// Parse the input as JSON and redact keys and values
        #[arg(long)]
        json: bool,
    },

    /// Print the SHA-256 pin of a DER-encoded certificate
    Fingerprint {
        /// Path to the certificate (DER)
        file: PathBuf,
    },

    /// Generate a CSP nonce
    Nonce,

    /// Configuration
    ///
    /// Examples:
    ///   dashguard config show
    ///   dashguard config path
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration (defaults, file, environment)
    Show,
    /// Print the config file location
    Path,
}

#[derive(Clone, Copy, ValueEnum)]
enum FieldKind {
    Html,
    Sql,
    Js,
    Email,
    Phone,
    Url,
    Filename,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "dashguard=debug" } else { "dashguard=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn sanitize_field(kind: FieldKind, input: &str) -> Result<String, ValidationError> {
    Ok(match kind {
        FieldKind::Html => sanitize::escape_html(input),
        FieldKind::Sql => sanitize::defang_sql(input),
        FieldKind::Js => sanitize::strip_js(input),
        FieldKind::Email => sanitize::sanitize_email(input)?,
        FieldKind::Phone => sanitize::sanitize_phone(input)?,
        FieldKind::Url => sanitize::sanitize_url(input)?,
        FieldKind::Filename => sanitize::sanitize_filename(input)?,
    })
}

fn handle_sanitize(kind: FieldKind, input: &str) -> Result<()> {
    match sanitize_field(kind, input) {
        Ok(clean) => {
            println!("{}", clean);
            Ok(())
        }
        Err(e) => {
            eprintln!(
                "{}",
                format_error(
                    &e.to_string(),
                    &["The value does not have the expected shape"],
                    &["Correct the value and try again"],
                )
                .red()
            );
            std::process::exit(DATA_ERR);
        }
    }
}

fn handle_redact(text: &str, json: bool) -> Result<()> {
    if json {
        let value: serde_json::Value = serde_json::from_str(text).context("input is not valid JSON")?;
        println!("{}", serde_json::to_string_pretty(&redact_value(value))?);
    } else {
        println!("{}", redact_text(text));
    }
    Ok(())
}

fn handle_config(command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config = match SecurityConfig::load() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!(
                        "{}",
                        format_error(
                            &e.to_string(),
                            &["The config file or an environment override is invalid"],
                            &[
                                format!("Check {}", SecurityConfig::config_path().display()).as_str(),
                                SUPPORT_HINT,
                            ],
                        )
                        .red()
                    );
                    std::process::exit(CONFIG);
                }
            };

            println!();
            println!("{}", "=== dashguard configuration ===".bright_cyan().bold());
            println!();
            println!("  Mode:              {}", config.mode);
            println!("  API base URL:      {}", config.api_base_url);
            println!("  Session timeout:   {}s", config.session_timeout().as_secs());
            println!("  Max sign-in tries: {}", config.max_login_attempts);
            println!(
                "  Rate limit:        {} requests / {}s",
                config.rate_limit_max_requests,
                config.rate_limit_window().as_secs()
            );
            println!("  API cache TTL:     {}s", config.api_cache_ttl().as_secs());
            println!("  Audit endpoint:    {}", config.audit_endpoint);
            println!("  Log endpoint:      {}", config.log_endpoint);
            let pins = config.certificate_fingerprints.as_ref().map_or(0, Vec::len);
            if pins == 0 {
                println!("  Certificate pins:  {}", "(none)".dimmed());
            } else {
                println!("  Certificate pins:  {}", pins);
            }
            let nonce = if config.csp_nonce.is_some() { "(set)" } else { "(generated at startup)" };
            println!("  CSP nonce:         {}", nonce.dimmed());
            println!();
        }
        Some(ConfigCommands::Path) => {
            println!("{}", SecurityConfig::config_path().display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Sanitize { kind, input } => handle_sanitize(kind, &input),
        Commands::Redact { text, json } => handle_redact(&text, json),
        Commands::Fingerprint { file } => {
            let der = fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            println!("{}", fingerprint(&der));
            Ok(())
        }
        Commands::Nonce => {
            println!("{}", generate_csp_nonce());
            Ok(())
        }
        Commands::Config { command } => handle_config(command),
    }
}
