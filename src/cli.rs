use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sensemaker::algo::comment::{RowFields, Topic};
use sensemaker::algo::stats::IdeaStatsOptions;
use sensemaker::algo::taxonomy;
use sensemaker::config::SensemakerConfig;
use sensemaker::model::ModelGateway;
use sensemaker::ops;
use sensemaker::pipeline::categorize::CategorizeOptions;
use sensemaker::pipeline::ideas::IdeaOptions;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sensemaker",
    version,
    about = "Categorize public comments, cluster their ideas, and roll up vote statistics"
)]
struct Cli {
    /// Configuration file (TOML). Defaults to ./sensemaker.toml when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON field holding the comment id
    #[arg(long, global = true, default_value = "id")]
    id_field: String,

    /// JSON field holding the comment text
    #[arg(long, global = true, default_value = "text")]
    text_field: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assign topics (and subtopics) to every comment
    Categorize {
        /// Taxonomy depth: 1 = topics, 2 = subtopics, 3 = themes
        #[arg(short, long)]
        depth: Option<u8>,
        /// Seed taxonomy JSON file
        #[arg(short, long)]
        taxonomy: Option<String>,
        /// Seed from topics already present on the input rows
        #[arg(long)]
        use_existing: bool,
        #[arg(long)]
        min_topics: Option<usize>,
        #[arg(long)]
        max_topics: Option<usize>,
    },
    /// Score 0..1 relevance of existing topic assignments
    Relevance,
    /// Generate, match and filter ideas per topic
    Ideas {
        #[arg(long)]
        min_comments: Option<usize>,
        #[arg(long)]
        max_ideas: Option<usize>,
        #[arg(long)]
        min_proposals: Option<usize>,
    },
    /// Vote rollups per topic, subtopic and (if present) idea
    Stats,
    /// Corpus-wide taxonomy from categorized rows
    Taxonomy,
    /// Categorization stability across runs (stdin: array of runs)
    Stability,
    /// Categorize, cluster ideas and report in one pass
    Run {
        #[arg(short, long)]
        taxonomy: Option<String>,
        #[arg(long)]
        use_existing: bool,
        /// Also score topic relevance
        #[arg(long)]
        relevance: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = SensemakerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let fields = RowFields {
        id: cli.id_field,
        text: cli.text_field,
    };

    let output = match cli.command {
        Commands::Categorize {
            depth,
            taxonomy: tax,
            use_existing,
            min_topics,
            max_topics,
        } => {
            if let Some(depth) = depth {
                cfg.categorization_depth = depth;
            }
            cfg.min_topics = min_topics.unwrap_or(cfg.min_topics);
            cfg.max_topics = max_topics.unwrap_or(cfg.max_topics);
            let options = CategorizeOptions {
                seed_topics: load_seed(tax.as_deref())?,
                use_existing,
                ..CategorizeOptions::from_config(&cfg)?
            };
            let gateway = ModelGateway::from_config(&cfg)?;
            info!(depth = u8::from(options.depth), "categorize");
            ops::op_categorize(&gateway, &read_stdin_json()?, &fields, &options).await?
        }
        Commands::Relevance => {
            let gateway = ModelGateway::from_config(&cfg)?;
            let options = CategorizeOptions::from_config(&cfg)?;
            ops::op_relevance(&gateway, &read_stdin_json()?, &fields, &options).await?
        }
        Commands::Ideas {
            min_comments,
            max_ideas,
            min_proposals,
        } => {
            let mut options = IdeaOptions::from(&cfg);
            options.min_comments = min_comments.unwrap_or(options.min_comments);
            options.max_ideas = max_ideas.unwrap_or(options.max_ideas);
            options.min_proposals = min_proposals.unwrap_or(options.min_proposals);
            let gateway = ModelGateway::from_config(&cfg)?;
            ops::op_ideas(&gateway, &read_stdin_json()?, &fields, &options).await?
        }
        Commands::Stats => {
            let thresholds = IdeaStatsOptions {
                consensus_threshold: cfg.consensus_threshold,
                controversy_threshold: cfg.controversy_threshold,
            };
            ops::op_stats(&read_stdin_json()?, &fields, thresholds)?
        }
        Commands::Taxonomy => ops::op_taxonomy(&read_stdin_json()?, &fields)?,
        Commands::Stability => {
            let runs: Vec<Vec<Value>> = read_stdin_json()?
                .into_iter()
                .map(|run| match run {
                    Value::Array(rows) => Ok(rows),
                    _ => bail!("stability input must be an array of arrays of rows"),
                })
                .collect::<Result<_>>()?;
            ops::op_stability(&runs, &fields)?
        }
        Commands::Run {
            taxonomy: tax,
            use_existing,
            relevance,
        } => {
            if relevance {
                cfg.calculate_relevance = true;
            }
            let gateway = ModelGateway::from_config(&cfg)?;
            let seed = load_seed(tax.as_deref())?;
            ops::op_run(&gateway, &read_stdin_json()?, &fields, &cfg, seed, use_existing).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_seed(path: Option<&str>) -> Result<Option<Vec<Topic>>> {
    match path {
        Some(p) => Ok(Some(taxonomy::load_taxonomy(p).map_err(anyhow::Error::msg)?)),
        None => Ok(None),
    }
}

fn read_stdin_json() -> Result<Vec<Value>> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read stdin")?;
    let parsed: Value = serde_json::from_str(&buf).context("invalid JSON on stdin")?;
    Ok(match parsed {
        Value::Array(arr) => arr,
        single => vec![single],
    })
}
