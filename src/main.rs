// Requires Ollama & SearXNG
// narrows collected articles down to the ones closest to a research title, and writes chart data and a report.

// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paper_funnel::collector::SearxngCollector;
use paper_funnel::config::{CollectorConfig, FunnelConfig, OracleConfig, RefinementKind, VerdictStrategy};
use paper_funnel::funnel::{self, FunnelTrace, Reference};
use paper_funnel::oracle::{self, SimilarityOracle};
use paper_funnel::ranking::rank_by_embedding;
use paper_funnel::report::FunnelReport;
use paper_funnel::sink::ChartDataSink;
use paper_funnel::web;

// CL arguments for config
#[derive(Parser, Debug)]
#[command(author, version, about = "Research article funnel with AI similarity filtering", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "transformer attention mechanism")]
    query: String,

    /// Title of the research the articles are compared against
    #[arg(short, long, env = "PROJECT_TITLE")]
    title: String,

    /// File holding the reference abstract (final refinement and ranking)
    #[arg(long)]
    abstract_file: Option<PathBuf>,

    #[arg(short, long, env = "SEARXNG_INSTANCE", default_value = "https://searxng.site/")]
    instance: String,

    #[arg(short, long, default_value = "100")]
    max_results: usize,

    #[arg(long, default_value = "science")]
    category: String,

    #[arg(short, long, default_value = "arxiv,pubmed,google scholar,crossref,semantic scholar")]
    engines: String,

    #[arg(long, default_value = "")]
    time_range: String,

    /// Raw results cache, reused as-is when it exists
    #[arg(long, default_value = "articles_snapshot.json")]
    snapshot: PathBuf,

    #[arg(long, default_value = "2000")]
    delay_ms: u64,

    #[arg(long, default_value_t = false)]
    enrich_abstracts: bool,

    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost")]
    ollama_host: String,

    #[arg(long, env = "OLLAMA_PORT", default_value = "11434")]
    ollama_port: u16,

    #[arg(long, default_value = "llama3.2:latest")]
    model: String,

    #[arg(long, default_value = "nomic-embed-text")]
    embedding_model: String,

    #[arg(long, default_value = "60")]
    oracle_timeout: u64,

    #[arg(long, default_value = "3")]
    oracle_attempts: u32,

    #[arg(long, default_value = "1")]
    concurrency: usize,

    #[arg(long, default_value_t = false)]
    no_ai: bool,

    #[arg(long, default_value = "10")]
    floor: usize,

    #[arg(long, default_value = "10")]
    top_sources: usize,

    #[arg(long, default_value = "2015")]
    min_year: i32,

    #[arg(long, default_value_t = false)]
    keyword_filter: bool,

    #[arg(long, value_delimiter = ',', default_value = "transformer,attention,aggregation")]
    keywords: Vec<String>,

    /// Final stage: snippet similarity to the abstract, or the recency threshold
    #[arg(long, value_enum, default_value = "abstract")]
    refinement: RefinementKind,

    #[arg(long, value_enum, default_value = "keywords")]
    verdicts: VerdictStrategy,

    #[arg(long, default_value = "0.6")]
    min_score: f32,

    /// Rank the final articles by embedding similarity
    #[arg(long, default_value_t = false)]
    rank: bool,

    #[arg(short, long, default_value = "funnel_output")]
    output_dir: PathBuf,

    /// Serve the report dashboard after the run
    #[arg(long, default_value_t = false)]
    serve: bool,

    /// Only serve an existing report, do not run the funnel
    #[arg(long, default_value_t = false)]
    serve_only: bool,

    #[arg(long, default_value = "6601")]
    web_port: u16,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn funnel_config(&self) -> FunnelConfig {
        FunnelConfig {
            floor: self.floor,
            top_sources: self.top_sources,
            min_year: self.min_year,
            keyword_stage: self.keyword_filter,
            keywords: self.keywords.clone(),
            refinement: self.refinement,
            verdicts: self.verdicts,
            min_score: self.min_score,
            concurrency: self.concurrency,
            ..FunnelConfig::default()
        }
    }

    fn oracle_config(&self) -> OracleConfig {
        OracleConfig {
            host: self.ollama_host.clone(),
            port: self.ollama_port,
            model: self.model.clone(),
            embedding_model: self.embedding_model.clone(),
            timeout_secs: self.oracle_timeout,
            attempts: self.oracle_attempts,
            ..OracleConfig::default()
        }
    }

    fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            instance: self.instance.clone(),
            engines: self.engines.clone(),
            category: self.category.clone(),
            time_range: self.time_range.clone(),
            snapshot: Some(self.snapshot.clone()),
            delay_ms: self.delay_ms,
            enrich_abstracts: self.enrich_abstracts,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn connect_oracle(args: &Args) -> Result<Option<Arc<dyn SimilarityOracle>>> {
    if args.no_ai {
        println!("AI similarity filtering is disabled (--no-ai flag)");
        return Ok(None);
    }

    let config = args.oracle_config();
    let retrying = oracle::connect(&config).await.with_context(|| {
        format!(
            "Ollama not reachable at {}:{} (pass --no-ai to run without similarity stages)",
            config.host, config.port
        )
    })?;
    println!("Ollama available, model: {}", config.model);
    let shared: Arc<dyn SimilarityOracle> = Arc::new(retrying);
    Ok(Some(shared))
}

fn print_summary(trace: &FunnelTrace, report: &Path) {
    println!("\n{}", "=".repeat(64));
    println!("Funnel");
    println!("{}", "=".repeat(64));
    for entry in trace.entries() {
        if entry.fell_back {
            println!(
                "{:<24} {:>6}   (filter kept {}, loosened)",
                entry.stage, entry.size, entry.attempted
            );
        } else {
            println!("{:<24} {:>6}", entry.stage, entry.size);
        }
    }
    println!("Report: {}\n", report.display());
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.serve_only {
        web::start_web_server(args.output_dir.clone(), args.web_port).await;
        return Ok(());
    }

    let abstract_text = match &args.abstract_file {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("Reading abstract from {}", path.display()))?
                .trim()
                .to_string(),
        ),
        None => None,
    };
    let reference = Reference {
        title: args.title.clone(),
        abstract_text,
    };

    println!("{}", "=".repeat(64));
    println!("   Paper Funnel");
    println!("{}", "=".repeat(64));
    println!("\nQuery: {}", args.query);
    println!("Reference title: {}", reference.title);
    println!("Instance: {}", args.instance);
    println!("Max results: {}", args.max_results);
    println!("Floor: {}", args.floor);
    println!("Output: {}\n", args.output_dir.display());

    let oracle = connect_oracle(&args).await?;
    let collector = SearxngCollector::new(args.collector_config())?;
    let sink = ChartDataSink::new(&args.output_dir).context("Creating the output directory")?;

    let collected = funnel::collect_validated(&collector, &args.query, args.max_results)
        .await
        .context("Collecting articles failed")?;

    let config = args.funnel_config();
    let plan = funnel::standard(&config, &reference, oracle.clone());
    let outcome = plan
        .run(collected, &sink)
        .await
        .context("Funnel aborted")?;

    let mut final_set = outcome.final_collection().clone();
    let mut ranked = false;
    if args.rank {
        match &oracle {
            Some(oracle) => {
                let against = reference.abstract_text.as_deref().unwrap_or(&reference.title);
                final_set = rank_by_embedding(&final_set, oracle.as_ref(), &reference.title, against)
                    .await
                    .context("Embedding ranking failed")?;
                ranked = true;
            }
            None => warn!("Ranking needs the oracle, keeping funnel order"),
        }
    }

    let report = FunnelReport::new(
        &args.query,
        &reference,
        plan.floor(),
        &outcome.trace,
        final_set.into_records(),
        ranked,
    );
    let report_path = report.write(sink.out_dir())?;
    print_summary(&outcome.trace, &report_path);

    if args.serve {
        web::start_web_server(args.output_dir.clone(), args.web_port).await;
    }

    Ok(())
}
