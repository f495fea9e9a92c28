// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rand::RngCore;
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Read};
use std::path::{Path, PathBuf};

use farmgate::config::{self, GuardConfig, SECRET_ENV_VAR};
use farmgate::envelope::{EnvelopeCodec, EnvelopeError};
use farmgate::error::GuardError;
use farmgate::identity::{
    resolve_wire, HttpIdentitySource, Identity, IdentityError, IdentitySource, IdentityWire,
    StaticIdentitySource,
};
use farmgate::security::{
    lacks_privilege, screen_channels, ActivityKind, FileActivityStore, GuardState, Navigator,
    Privilege, SessionGuard, SystemClock, TokioTicker,
};
use farmgate::utils::{mask_sensitive, token_preview};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Data error - envelope or identity rejected
    pub const DATA_ERR: i32 = 65;
    /// Service unavailable - identity endpoint unreachable
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// I/O error - activity file or config unreadable
    pub const IO_ERR: i32 = 74;
    /// Permission denied - privilege check failed
    pub const NO_PERM: i32 = 77;
    /// Configuration error - invalid or missing config or secret
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

#[derive(Parser)]
#[command(name = "farmgate")]
#[command(author, version = VERSION, about = "Session and transport guard for farm records screens")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose mode: session audit lines and debug output on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.farmgate/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a random signing secret
    ///
    /// Examples:
    ///   farmgate keygen
    ///   export FARMGATE_ENVELOPE_SECRET=$(farmgate keygen --raw)
    Keygen {
        /// Print only the secret
        #[arg(long)]
        raw: bool,
    },

    /// Seal a JSON payload into an envelope
    ///
    /// Examples:
    ///   farmgate seal '{"district": "North", "page": 2}'
    ///   echo '{"page": 2}' | farmgate seal --ttl 600
    Seal {
        /// JSON payload (read from stdin when omitted)
        payload: Option<String>,
        /// Envelope lifetime in seconds (overrides envelope.ttl_secs)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Verify an envelope and print its payload
    ///
    /// Examples:
    ///   farmgate open k1.eyJ...
    Open {
        /// Envelope token (read from stdin when omitted)
        token: Option<String>,
    },

    /// Resolve an identity and evaluate required privileges (any-of)
    ///
    /// Examples:
    ///   farmgate check --identity me.json --require Crops:Update --require Crops:Delete
    ///   farmgate check --require Harvests:Read --credential $TOKEN
    Check {
        /// Identity JSON file, plain or {"envelope": ...}. Uses identity_url when omitted.
        #[arg(long)]
        identity: Option<PathBuf>,
        /// Bearer credential for identity_url
        #[arg(long)]
        credential: Option<String>,
        /// Required privilege as Resource:Action (repeatable)
        #[arg(short, long = "require")]
        require: Vec<String>,
    },

    /// Guard an interactive session in the terminal
    ///
    /// Every line typed counts as activity. Type `logout` to end the session.
    ///
    /// Examples:
    ///   farmgate watch --identity me.json
    Watch {
        /// Identity JSON file, plain or {"envelope": ...}. Uses identity_url when omitted.
        #[arg(long)]
        identity: Option<PathBuf>,
        /// Bearer credential for identity_url
        #[arg(long)]
        credential: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the effective configuration to the config file
    Init,
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "farmgate=debug" } else { "farmgate=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        let code = exit_code_for(&e);
        match e.downcast_ref::<GuardError>() {
            Some(guard_error) => eprintln!("{}", guard_error.to_report()),
            None => eprintln!("{} {:#}", "[✗]".red(), e),
        }
        std::process::exit(code);
    }
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<GuardError>() {
        Some(GuardError::EnvelopeInvalid(_)) => DATA_ERR,
        Some(GuardError::IdentityUnresolved(IdentityError::Transport(_))) => SERVICE_UNAVAILABLE,
        Some(GuardError::IdentityUnresolved(_)) => DATA_ERR,
        Some(GuardError::Config(_)) => CONFIG,
        Some(GuardError::Store(_)) | Some(GuardError::Io(_)) => IO_ERR,
        None => ERROR,
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };

    match cli.command {
        Commands::Keygen { raw } => keygen(raw),
        Commands::Seal { payload, ttl } => seal(&config, payload, ttl),
        Commands::Open { token } => open(&config, token),
        Commands::Check { identity, credential, require } => {
            let source = identity_source(&config, identity.as_deref(), credential)?;
            runtime()?.block_on(check(source, &require))
        }
        Commands::Watch { identity, credential } => {
            let source = identity_source(&config, identity.as_deref(), credential)?;
            runtime()?.block_on(watch(&config, source))
        }
        Commands::Config { command } => match command {
            None => show_config(&config, cli.config.as_deref(), false),
            Some(ConfigCommands::Show { json }) => {
                show_config(&config, cli.config.as_deref(), json)
            }
            Some(ConfigCommands::Init) => init_config(&config, cli.config.as_deref()),
        },
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")
}

fn codec(config: &GuardConfig) -> Result<EnvelopeCodec> {
    let secret = config::secret_from_env()?;
    let codec = config.envelope.codec(&secret).map_err(GuardError::from)?;
    Ok(codec)
}

fn read_arg_or_stdin(arg: Option<String>, what: &str) -> Result<String> {
    if let Some(value) = arg {
        return Ok(value);
    }
    if io::stdin().is_terminal() {
        anyhow::bail!("no {} given and stdin is a terminal", what);
    }
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .with_context(|| format!("Failed to read {} from stdin", what))?;
    Ok(input.trim().to_string())
}

fn keygen(raw: bool) -> Result<()> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = hex::encode(bytes);

    if raw {
        println!("{}", secret);
    } else {
        println!("{}", "New envelope signing secret:".bold());
        println!();
        println!("  export {}={}", SECRET_ENV_VAR, secret);
        println!();
        println!(
            "{} Rotate by bumping envelope.key_id and listing the old id in envelope.retired_key_ids.",
            "[i]".cyan()
        );
    }
    Ok(())
}

fn seal(config: &GuardConfig, payload: Option<String>, ttl: Option<u64>) -> Result<()> {
    let codec = codec(config)?;
    let raw = read_arg_or_stdin(payload, "payload")?;
    let value: Value = serde_json::from_str(&raw).context("Payload is not valid JSON")?;

    let ttl = match ttl {
        Some(secs) => Some(chrono::Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64)),
        None => config.envelope.ttl(),
    };
    let token = match ttl {
        Some(ttl) => codec.encode_with_ttl(&value, ttl),
        None => codec.encode(&value),
    };

    tracing::debug!(
        "ENVELOPE_SEALED | token={} ttl={:?}",
        token_preview(&token),
        ttl.map(|t| t.num_seconds())
    );
    println!("{}", token);
    Ok(())
}

fn open(config: &GuardConfig, token: Option<String>) -> Result<()> {
    let codec = codec(config)?;
    let token = read_arg_or_stdin(token, "token")?;

    let value = codec.decode(&token).map_err(|e| {
        tracing::warn!("ENVELOPE_REJECTED | token={} error={}", token_preview(&token), e);
        GuardError::from(e)
    })?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Identity sources the CLI can use.
enum CliIdentitySource {
    File(StaticIdentitySource),
    Http(HttpIdentitySource),
}

impl IdentitySource for CliIdentitySource {
    async fn fetch_identity(&self) -> Result<Option<Identity>, IdentityError> {
        match self {
            CliIdentitySource::File(source) => source.fetch_identity().await,
            CliIdentitySource::Http(source) => source.fetch_identity().await,
        }
    }
}

fn identity_source(
    config: &GuardConfig,
    file: Option<&Path>,
    credential: Option<String>,
) -> Result<CliIdentitySource> {
    // The codec is only needed for wrapped identities.
    let codec = codec(config).ok();

    if let Some(path) = file {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read identity file {}", path.display()))?;
        let source = match serde_json::from_str::<Option<IdentityWire>>(&content) {
            Err(e) => StaticIdentitySource::failing(IdentityError::Decode(e.to_string())),
            Ok(body) => match resolve_wire(body, codec.as_ref()) {
                Ok(Some(identity)) => StaticIdentitySource::found(identity),
                Ok(None) => StaticIdentitySource::absent(),
                Err(e) => StaticIdentitySource::failing(e),
            },
        };
        return Ok(CliIdentitySource::File(source));
    }

    let url = config.identity_url.clone().ok_or_else(|| {
        GuardError::Config(
            "no --identity file given and identity_url is not configured".to_string(),
        )
    })?;
    let mut source = HttpIdentitySource::new(url);
    if let Some(credential) = credential {
        tracing::debug!("IDENTITY_CREDENTIAL | credential={}", mask_sensitive(&credential, 4));
        source = source.with_credential(credential);
    }
    if let Some(codec) = codec {
        source = source.with_codec(codec);
    }
    Ok(CliIdentitySource::Http(source))
}

async fn check(source: CliIdentitySource, require: &[String]) -> Result<()> {
    for raw in require {
        if let Err(e) = raw.parse::<Privilege>() {
            eprintln!("{} {}", "[!]".yellow(), e);
        }
    }

    let identity = source.fetch_identity().await.map_err(GuardError::from)?;
    let Some(identity) = identity else {
        println!("{} No identity: every privilege is denied.", "[✗]".red());
        std::process::exit(NO_PERM);
    };

    let role = identity
        .role
        .as_ref()
        .map(|r| format!("{} ({})", r.name, r.id))
        .unwrap_or_else(|| format!("legacy roles {:?}", identity.roles));
    println!("Identity: {} / {}", identity.id, identity.employee_ref.as_deref().unwrap_or("-"));
    println!("Role:     {}", role);

    if !identity.is_complete() || !identity.is_logged_in() {
        println!("{} Identity is stale: every privilege is denied.", "[!]".yellow());
    }

    if lacks_privilege(Some(&identity), require) {
        println!("{} Denied: none of {:?}", "[✗]".red(), require);
        std::process::exit(NO_PERM);
    }
    println!("{} Allowed", "[OK]".green());
    Ok(())
}

/// Navigator for the terminal: prints the redirect and the credential drop.
struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn clear_credentials(&mut self) {
        println!("{} Session credential cleared", "[i]".cyan());
    }

    fn redirect(&mut self, route: &str) {
        println!("{} Redirect -> {}", "[→]".bold(), route);
    }
}

async fn watch(config: &GuardConfig, source: CliIdentitySource) -> Result<()> {
    let store = FileActivityStore::new(config.activity_path()?, config.storage.clone());
    let (handle, tick_tx, driver) = screen_channels();

    let guard = SessionGuard::new(
        config.session.clone(),
        store,
        ConsoleNavigator,
        TokioTicker::new(tick_tx),
        SystemClock,
    );

    println!(
        "{} Guarding session (idle window {}s). Press Enter for activity, type `logout` to end.",
        "[i]".cyan(),
        config.session.idle_window_secs
    );

    // Blocking stdin reader; dropping its handle on EOF unmounts the screen.
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let delivered = if line.trim() == "logout" {
                handle.logout()
            } else {
                handle.activity(ActivityKind::KeyPress)
            };
            if !delivered {
                break;
            }
        }
    });

    let guard = driver.run(guard, &source).await;

    match guard.state() {
        GuardState::Terminated => println!("{} Logged out", "[OK]".green()),
        GuardState::Invalid => {
            let reason = guard
                .invalidation_reason()
                .map(|r| r.to_string())
                .unwrap_or_default();
            println!("{} Session ended: {}", "[✗]".red(), reason);
        }
        state => println!("{} Screen closed while {}", "[i]".cyan(), state),
    }
    Ok(())
}

fn show_config(config: &GuardConfig, path: Option<&Path>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::config_path()?,
    };

    println!();
    println!("{}", "=== farmgate Configuration ===".bright_cyan().bold());
    println!();
    println!("  Idle window:      {}s", config.session.idle_window_secs);
    println!("  Tick interval:    {}ms", config.session.tick_interval_ms);
    println!("  Warning before:   {}s", config.session.warning_before_timeout_secs);
    println!("  End route:        {}", config.session.routes.end_session);
    println!("  Stale route:      {}", config.session.routes.stale_identity);
    if let Some(route) = &config.session.routes.self_service_end_session {
        println!("  Farmer end route: {}", route);
    }
    println!("  Activity key:     {}", config.storage.last_activity);
    println!("  Activity file:    {}", config.activity_path()?.display());
    println!();
    println!("  Envelope key id:  {}", config.envelope.key_id);
    println!("  Retired key ids:  {:?}", config.envelope.retired_key_ids);
    println!(
        "  Envelope TTL:     {}",
        config
            .envelope
            .ttl_secs
            .map(|s| format!("{}s", s))
            .unwrap_or_else(|| "(none)".to_string())
    );
    match codec(config) {
        Ok(codec) => println!("  Key fingerprint:  {}", codec.fingerprint()),
        Err(e) => {
            let hint = match e.downcast_ref::<GuardError>() {
                Some(GuardError::EnvelopeInvalid(EnvelopeError::InvalidKey(why))) => {
                    why.to_string()
                }
                _ => format!("{} not set", SECRET_ENV_VAR),
            };
            println!("  Key fingerprint:  {}", format!("({})", hint).dimmed());
        }
    }
    println!(
        "  Identity URL:     {}",
        config.identity_url.as_deref().unwrap_or("(none, use --identity)")
    );
    println!();
    println!("Config file: {}", path.display());
    println!();
    Ok(())
}

fn init_config(config: &GuardConfig, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => config.save_to(path)?,
        None => config::save_config(config)?,
    }
    println!("{} Configuration written", "[OK]".green());
    Ok(())
}
