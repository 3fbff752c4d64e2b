//! Minerva chat server and CLI
//!
//! Run with: minerva serve
//! One-shot: minerva ask "How do I reverse a list in Python?"

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use minerva::{
    chat::ChatService, init_logging, server, ChatMode, ChatRequest, MinervaConfig,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "minerva", version, about = "Multi-model chat server with Think Tank model selection")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "MINERVA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP/WebSocket server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ask one question and print the answer
    Ask {
        message: String,
        /// think_tank, single or simulated
        #[arg(long)]
        mode: Option<ChatMode>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Show how each model scores for a query
    Models { query: String },
    /// Usage and feedback statistics
    Stats,
    /// Search stored insights (most used when no query is given)
    Insights {
        query: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Rate a stored insight from 1 to 5
    Rate { insight_id: String, rating: f64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut config = MinervaConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            server::serve(&config).await
        }
        Commands::Ask { message, mode, session } => run_ask(&config, message, mode, session).await,
        Commands::Models { query } => run_models(&config, &query),
        Commands::Stats => run_stats(&config).await,
        Commands::Insights { query, limit } => run_insights(&config, query.as_deref(), limit),
        Commands::Rate { insight_id, rating } => run_rate(&config, &insight_id, rating).await,
    }
}

async fn run_ask(
    config: &MinervaConfig,
    message: String,
    mode: Option<ChatMode>,
    session: Option<String>,
) -> Result<()> {
    let chat = ChatService::open(config)?;
    let mut request = ChatRequest::new(message);
    request.mode = mode;
    request.session_id = session;

    let answer = chat.handle(request).await?;
    let info = &answer.model_info;

    println!("{}", answer.response);
    println!();
    println!(
        "🧠 {} via {} [{} · {}] in {:.2}s",
        info.model,
        info.provider,
        info.mode.name(),
        info.query_type,
        answer.time
    );
    if info.models_consulted.len() > 1 {
        let scores: Vec<String> = info.scores.iter().map(|(m, s)| format!("{m} {s:.3}")).collect();
        println!("   Consulted: {}", scores.join(", "));
    }
    if info.blended {
        println!("   Blended with runner-up perspectives");
    }
    println!("   Session: {}", answer.session_id);
    if let Some(id) = &answer.insight_id {
        println!("   Insight: {} (rate with: minerva rate {} <1-5>)", id, id);
    }
    Ok(())
}

fn run_models(config: &MinervaConfig, query: &str) -> Result<()> {
    let chat = ChatService::open(config)?;
    let analysis = minerva::analyze_query(query);

    println!("\n📊 MODEL SCORES");
    println!(
        "Query type: {} (complexity: {:?}, tags: {})\n",
        analysis.query_type.name(),
        analysis.complexity,
        analysis.tags.join(", ")
    );
    for (rank, status) in chat.models(Some(query))?.iter().enumerate() {
        println!(
            "  {}. {:<16} {:<12} score {:.3}  confidence {:.2}  {}",
            rank + 1,
            status.model,
            status.provider.name(),
            status.score.unwrap_or(0.0),
            status.confidence,
            if status.available { "✓" } else { "✗ no key" }
        );
    }
    Ok(())
}

async fn run_stats(config: &MinervaConfig) -> Result<()> {
    let chat = ChatService::open(config)?;
    let stats = chat.stats().await?;

    println!("\n📈 MINERVA STATS");
    println!("Insights: {}", stats.insights);
    println!("Rankings: {}", stats.rankings);
    println!("Messages: {} across {} sessions", stats.messages, stats.sessions);
    let providers: Vec<&str> = stats.available_providers.iter().map(|p| p.name()).collect();
    println!(
        "Providers: {}",
        if providers.is_empty() { "none (simulated mode)".to_string() } else { providers.join(", ") }
    );

    if !stats.criterion_averages.is_empty() {
        println!("\nFeedback averages:");
        for (criterion, avg) in &stats.criterion_averages {
            println!("  {:<12} {:.1}/10", criterion, avg);
        }
    }

    if !stats.models.is_empty() {
        println!("\nModels:");
        for (model, s) in &stats.models {
            println!(
                "  {:<16} calls {:>4}  ok {:>5}  avg {:>7}  picked {:>4}  confidence {:.2}",
                model,
                s.calls,
                s.success_rate().map(|r| format!("{:.0}%", r * 100.0)).unwrap_or_else(|| "-".into()),
                s.avg_latency_ms().map(|l| format!("{l:.0}ms")).unwrap_or_else(|| "-".into()),
                s.selections,
                s.confidence
            );
        }
    }
    Ok(())
}

fn run_insights(config: &MinervaConfig, query: Option<&str>, limit: usize) -> Result<()> {
    let chat = ChatService::open(config)?;
    let matches = chat.insights(query, limit)?;
    if matches.is_empty() {
        println!("No insights found");
        return Ok(());
    }

    println!("\n💡 INSIGHTS");
    for m in matches {
        let i = &m.insight;
        let rating = i
            .feedback_rating
            .map(|r| format!("{r:.1}/5"))
            .unwrap_or_else(|| "unrated".to_string());
        println!("\n  {} [{}] used {}x, {}", i.id, i.model, i.usage_count, rating);
        if query.is_some() {
            println!("  similarity {:.2}", m.similarity);
        }
        println!("  Q: {}", i.query);
        let preview: String = i.response.chars().take(160).collect();
        println!("  A: {}", preview);
    }
    Ok(())
}

async fn run_rate(config: &MinervaConfig, insight_id: &str, rating: f64) -> Result<()> {
    if !(1.0..=5.0).contains(&rating) {
        bail!("Rating must be between 1 and 5");
    }
    let chat = ChatService::open(config)?;
    let avg = chat.rate_insight(insight_id, rating).await?;
    println!("✓ Rated {} ({:.1}/5 average)", insight_id, avg);
    Ok(())
}
