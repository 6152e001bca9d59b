use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use linkscout::extract::HttpExtractor;
use linkscout::oracle::ClaudeOracle;
use linkscout::store::PgStore;
use linkscout::{LinkScout, PipelineConfig};
use linkscout_common::Config;

const MAX_DB_CONNECTIONS: u32 = 5;

#[derive(Parser)]
#[command(name = "linkscout")]
#[command(about = "Internal backlink suggestions for a website")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations and exit
    Migrate,

    /// Fetch pages and rebuild their sentence index
    Index {
        /// Page URLs to index
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Find and store backlink suggestions for a target page
    Analyze {
        /// Target page URL
        url: String,
    },

    /// Run one deferred link-check batch
    VerifyLinks {
        /// Batch size (defaults to LINK_CHECK_BATCH)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Forget cached keywords for a page
    ClearKeywords {
        url: String,
    },

    /// Print stored suggestions for a target page as JSON
    Suggestions {
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("linkscout=info".parse()?);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_redacted();

    let store = Arc::new(PgStore::connect(&config.database_url, MAX_DB_CONNECTIONS).await?);
    store.migrate().await?;
    if matches!(cli.command, Command::Migrate) {
        return Ok(());
    }

    let api_key = match cli.command {
        Command::Analyze { .. } => config.require_anthropic_key()?.to_string(),
        _ => config.anthropic_api_key.clone().unwrap_or_default(),
    };
    let oracle = Arc::new(ClaudeOracle::new(api_key, config.anthropic_model.clone())?);
    let extractor = Arc::new(HttpExtractor::new(
        Duration::from_secs(config.fetch_timeout_secs),
        &config.user_agent,
    )?);

    let scout = LinkScout::new(store, extractor, oracle, PipelineConfig::from_config(&config));

    match cli.command {
        Command::Migrate => {}
        Command::Index { urls } => {
            let summary = scout.index_pages(&urls).await;
            info!(%summary, "Index finished");
            println!("{summary}");
        }
        Command::Analyze { url } => {
            let report = scout.analyze_target(&url).await?;
            println!("{report}");
        }
        Command::VerifyLinks { limit } => {
            let summary = scout.verify_links(limit).await?;
            println!("{summary}");
        }
        Command::ClearKeywords { url } => {
            let cleared = scout.clear_keywords(&url).await?;
            println!("{}", if cleared { "cleared" } else { "page not indexed" });
        }
        Command::Suggestions { url } => {
            let suggestions = scout.suggestions_for_target(&url).await?;
            println!("{}", serde_json::to_string_pretty(&suggestions)?);
        }
    }

    Ok(())
}
