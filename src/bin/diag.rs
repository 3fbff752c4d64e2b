//! Minerva connectivity diagnostics
//!
//! Usage:
//!   minerva-diag keys
//!   minerva-diag providers
//!   minerva-diag --url http://localhost:8080 server
//!   minerva-diag --port 5000 socketio --eio 3
//!   minerva-diag ws --message "hello"
//!   minerva-diag all

use anyhow::Result;
use clap::{Parser, Subcommand};
use minerva::{
    config::MinervaConfig,
    diagnostics::{self, KeyStatus},
    init_logging,
};
use reqwest::Url;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "minerva-diag", version, about = "Check API keys, providers and a running Minerva server")]
struct Cli {
    /// Server URL; a bare host without a port means port 5000
    #[arg(long, global = true, default_value = "127.0.0.1")]
    url: String,

    /// Server port (overrides any port in --url)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// TOML config file (API keys are also read from the environment)
    #[arg(long, global = true, env = "MINERVA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check which API keys are set and well formed
    Keys,
    /// Call each provider's listing endpoint with its key
    Providers,
    /// GET /health on the Minerva server
    Server,
    /// Engine.IO polling handshake against a Socket.IO server
    Socketio {
        #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(3..=4))]
        eio: u8,
    },
    /// Send one chat message over /ws and wait for the answer
    Ws {
        #[arg(long, default_value = "Hello from minerva-diag")]
        message: String,
    },
    /// keys, server and ws in turn
    All {
        #[arg(long, default_value = "Hello from minerva-diag")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = MinervaConfig::load(cli.config.as_deref())?;
    let base = diagnostics::server_base(&cli.url, cli.port)?;
    let client = reqwest::Client::new();

    let healthy = match cli.command {
        Commands::Keys => run_keys(&config),
        Commands::Providers => run_providers(&client, &config).await,
        Commands::Server => run_server(&client, &base).await,
        Commands::Socketio { eio } => run_socketio(&client, &base, eio).await,
        Commands::Ws { message } => run_ws(&base, &message).await,
        Commands::All { message } => {
            let keys = run_keys(&config);
            let server = run_server(&client, &base).await;
            let ws = server && run_ws(&base, &message).await;
            keys && server && ws
        }
    };

    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗"
    }
}

/// At least one usable key counts as healthy
fn run_keys(config: &MinervaConfig) -> bool {
    println!("\n🔑 API KEYS");
    let statuses = diagnostics::check_keys(&config.providers);
    for status in &statuses {
        print_key(status);
    }
    let usable = statuses.iter().filter(|s| s.present && s.valid_format).count();
    if usable == 0 {
        println!("   No usable keys: Minerva will answer in simulated mode");
    }
    usable > 0
}

fn print_key(status: &KeyStatus) {
    match (&status.masked, status.valid_format) {
        (None, _) => println!("   {} {:<12} not set", mark(false), status.provider),
        (Some(masked), true) => println!("   {} {:<12} {}", mark(true), status.provider, masked),
        (Some(masked), false) => {
            println!("   {} {:<12} {} (unexpected format)", mark(false), status.provider, masked)
        }
    }
}

async fn run_providers(client: &reqwest::Client, config: &MinervaConfig) -> bool {
    println!("\n🌐 PROVIDERS");
    let mut all_ok = true;
    for status in diagnostics::check_keys(&config.providers) {
        let settings = config.providers.settings(status.provider);
        let Some(key) = settings.and_then(|s| s.api_key.as_deref()).filter(|k| !k.trim().is_empty()) else {
            println!("   - {:<12} skipped (no key)", status.provider);
            continue;
        };
        let base_url = match status.provider {
            minerva::ProviderKind::HuggingFace => None,
            _ => settings.and_then(|s| s.base_url.as_deref()),
        };
        let url = diagnostics::listing_url(status.provider, base_url);
        let probe = diagnostics::probe_provider(client, status.provider, &url, key.trim()).await;

        let code = probe.status.map(|s| s.to_string()).unwrap_or_else(|| "---".to_string());
        println!("   {} {:<12} HTTP {} in {}ms", mark(probe.ok()), probe.provider, code, probe.latency_ms);
        if let Some(error) = &probe.error {
            println!("      {}", error);
        }
        all_ok &= probe.ok();
    }
    all_ok
}

async fn run_server(client: &reqwest::Client, base: &Url) -> bool {
    println!("\n🖥  SERVER {}", base);
    match diagnostics::check_server(client, base).await {
        Ok(check) => {
            let ok = check.status == 200;
            println!("   {} GET /health -> {} in {}ms", mark(ok), check.status, check.latency_ms);
            if let Some(body) = check.body {
                println!("      {}", body);
            }
            ok
        }
        Err(e) => {
            println!("   {} {:#}", mark(false), e);
            false
        }
    }
}

async fn run_socketio(client: &reqwest::Client, base: &Url, eio: u8) -> bool {
    println!("\n🔌 ENGINE.IO v{} HANDSHAKE {}", eio, base);
    match diagnostics::socketio_handshake(client, base, eio).await {
        Ok(hs) => {
            println!("   {} sid           {}", mark(true), hs.sid);
            println!("     upgrades      {}", hs.upgrades.join(", "));
            println!("     pingInterval  {}ms", hs.ping_interval);
            println!("     pingTimeout   {}ms", hs.ping_timeout);
            true
        }
        Err(e) => {
            println!("   {} {:#}", mark(false), e);
            false
        }
    }
}

async fn run_ws(base: &Url, message: &str) -> bool {
    let url = match diagnostics::ws_url(base) {
        Ok(url) => url,
        Err(e) => {
            println!("   {} {:#}", mark(false), e);
            return false;
        }
    };
    println!("\n💬 WEBSOCKET {}", url);
    match diagnostics::ws_roundtrip(&url, message).await {
        Ok(trip) => {
            println!(
                "   {} answered by {} in {}ms{}",
                mark(true),
                trip.model.as_deref().unwrap_or("unknown"),
                trip.latency_ms,
                if trip.saw_typing { "" } else { " (no typing frame)" }
            );
            let preview: String = trip.response.chars().take(120).collect();
            println!("      {}", preview);
            true
        }
        Err(e) => {
            println!("   {} {:#}", mark(false), e);
            false
        }
    }
}
