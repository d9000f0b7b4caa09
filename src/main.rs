//*** START FILE: src/main.rs ***//
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use verse_align::config::{load_config_or_default, Config};
use verse_align::parsing::tokenize;
use verse_align::pipeline::{format, AnalysisCacheStore, OpenAiGateway, Orchestrator, SqliteCacheStore};
use verse_align::types::alignment::VerseReference;
use verse_align::types::language::{supported_languages, DEFAULT_LANGUAGE};

#[derive(Parser, Debug)]
#[command(name = "verse_align", about = "Verse translation and word-alignment analysis with a persistent cache")]
struct Cli {
    /// Path to config.toml (defaults are used when it does not exist)
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the cache database path from the config
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a verse in one or more languages (cache first, provider on miss)
    Analyze {
        #[arg(long)]
        reference: String,
        #[arg(long)]
        text: String,
        /// Target language code; repeat for several languages
        #[arg(long = "lang", default_value = DEFAULT_LANGUAGE)]
        languages: Vec<String>,
    },
    /// Print the cached analysis for one language without calling the provider
    Show {
        #[arg(long)]
        reference: String,
        #[arg(long = "lang", default_value = DEFAULT_LANGUAGE)]
        language: String,
        /// Verse text to lay the alignment over; the cached text is used when omitted
        #[arg(long)]
        text: Option<String>,
    },
    /// Drop cached analyses for a verse (all languages unless --lang is given)
    Invalidate {
        #[arg(long)]
        reference: String,
        #[arg(long = "lang")]
        language: Option<String>,
    },
    /// Cache entry counts
    Stats,
    /// Remove every cached analysis
    Clear,
    /// List recognized target languages
    Languages,
}

#[derive(Serialize)]
struct LanguageInfo {
    code: &'static str,
    name: &'static str,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(config: &Config, database: Option<&Path>) -> Result<SqliteCacheStore, Box<dyn Error>> {
    let path = database.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(&config.database_path));
    info!(path = %path.display(), "opening analysis cache");
    Ok(SqliteCacheStore::open(&path)?)
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = load_config_or_default(&cli.config)?;
    config.apply_env_overrides();
    config.validate()?;

    match cli.command {
        Command::Analyze { reference, text, languages } => {
            let store = open_store(&config, cli.database.as_deref())?;
            let api_key = config.provider.api_key_from_env();
            let gateway = OpenAiGateway::new(&config.provider, api_key)?;
            if !gateway.has_api_key() {
                warn!(
                    env = %config.provider.api_key_env,
                    "no API key set; only cached languages can be served"
                );
            }

            let orchestrator = Orchestrator::new(Arc::new(gateway), Arc::new(store), config.orchestrator.clone());
            let languages: BTreeSet<String> = languages.into_iter().collect();
            let report = orchestrator
                .analyze(&text, &VerseReference::new(reference), &languages)
                .await;
            let failed = report.failed_languages().count();
            if failed > 0 {
                warn!(failed, total = report.results.len(), "some languages could not be analyzed");
            }
            print_json(&report)?;
        }
        Command::Show { reference, language, text } => {
            let store = open_store(&config, cli.database.as_deref())?;
            let reference = VerseReference::new(reference);
            let language = language.trim().to_lowercase();
            match store.get(&reference, &language).await? {
                Some(entry) => {
                    let verse_text = text.unwrap_or_else(|| entry.verse_text.clone());
                    let formatted = format(&tokenize(&verse_text), &entry.literal_alignment, &entry.dynamic_alignment)?;
                    print_json(&serde_json::json!({
                        "reference": entry.verse_reference,
                        "language_code": entry.language_code,
                        "updated_at": entry.updated_at,
                        "translations": entry.translations,
                        "alignment": formatted,
                    }))?;
                }
                None => {
                    println!("No cached analysis for {} ({})", reference, language);
                }
            }
        }
        Command::Invalidate { reference, language } => {
            let store = open_store(&config, cli.database.as_deref())?;
            let language = language.map(|l| l.trim().to_lowercase());
            let removed = store
                .invalidate(&VerseReference::new(reference), language.as_deref())
                .await?;
            println!("Removed {} cached analyses", removed);
        }
        Command::Stats => {
            let store = open_store(&config, cli.database.as_deref())?;
            print_json(&store.stats().await?)?;
        }
        Command::Clear => {
            let store = open_store(&config, cli.database.as_deref())?;
            let removed = store.clear().await?;
            println!("Cleared {} cached analyses", removed);
        }
        Command::Languages => {
            let languages: Vec<LanguageInfo> = supported_languages()
                .map(|(code, name)| LanguageInfo { code, name })
                .collect();
            print_json(&languages)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("verse_align=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
//*** END FILE: src/main.rs ***//
