//! `weave`: scrape structured records from web pages with a local model.
//!
//! Configuration comes from `WEAVER_*` environment variables (and `.env`);
//! flags override the model endpoint per invocation. Records are printed as
//! JSON on stdout, progress goes to stderr.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weaver::{SchemaDescriptor, ScrapeOptions, Scraper, ScraperConfig};

#[derive(Parser)]
#[command(name = "weave")]
#[command(about = "Schema-driven extraction from web pages")]
struct Cli {
    /// Debug logging for the library
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Model name served by the inference endpoint
    #[arg(long, global = true)]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible inference endpoint
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL and extract one record
    Scrape {
        url: String,

        #[command(flatten)]
        extract: ExtractArgs,

        #[command(flatten)]
        fetch: FetchArgs,

        /// Pretty-print with this many spaces
        #[arg(long, default_value_t = 2)]
        indent: usize,
    },

    /// Extract one record from a local HTML file ("-" for stdin)
    Extract {
        file: PathBuf,

        #[command(flatten)]
        extract: ExtractArgs,

        #[arg(long, default_value_t = 2)]
        indent: usize,
    },

    /// Scrape several URLs, one JSON line per URL in input order
    Many {
        urls: Vec<String>,

        /// Read URLs from a file, one per line
        #[arg(long)]
        from_file: Option<PathBuf>,

        /// Concurrent fetches
        #[arg(long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        extract: ExtractArgs,

        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Fetch a URL and print its HTML
    Fetch {
        url: String,

        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Ask a free-form question about a local HTML file ("-" for stdin)
    Analyze {
        file: PathBuf,

        #[arg(short, long)]
        prompt: String,

        #[arg(long)]
        temperature: Option<f32>,
    },
}

#[derive(Args)]
struct ExtractArgs {
    /// Schema file: `{"fields": [...]}` or a JSON Schema object
    #[arg(short, long)]
    schema: PathBuf,

    /// Extra guidance for the model
    #[arg(short, long)]
    instructions: Option<String>,
}

#[derive(Args)]
struct FetchArgs {
    /// Render with the browser backend straight away
    #[arg(long)]
    browser: bool,

    /// Never escalate to the browser backend
    #[arg(long)]
    no_fallback: bool,

    /// Transport timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Save the HTML used for extraction
    #[arg(long)]
    save_html: Option<PathBuf>,
}

impl FetchArgs {
    fn options(&self, instructions: Option<&str>) -> ScrapeOptions {
        ScrapeOptions {
            instructions: instructions.map(String::from),
            use_browser: self.browser,
            auto_fallback: self.no_fallback.then_some(false),
            timeout: self.timeout.map(Duration::from_secs),
            save_html: self.save_html.clone(),
            concurrency: None,
        }
    }
}

#[derive(Serialize)]
struct ManyLine<'a> {
    url: &'a str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let default_filter = if cli.verbose {
        "info,weaver=debug"
    } else {
        "warn,weaver=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = ScraperConfig::from_env().context("Invalid WEAVER_* configuration")?;
    if let Some(model) = cli.model {
        config = config.with_model(model);
    }
    if let Some(base_url) = cli.base_url {
        config = config.with_base_url(base_url);
    }

    let scraper = Scraper::from_config(config).context("Failed to build scraper")?;
    let result = run(&scraper, cli.command).await;
    scraper.shutdown().await.context("Failed to shut down generator")?;
    result
}

async fn run(scraper: &Scraper, command: Commands) -> Result<()> {
    match command {
        Commands::Scrape {
            url,
            extract,
            fetch,
            indent,
        } => {
            let schema = load_schema(&extract.schema)?;
            let options = fetch.options(extract.instructions.as_deref());

            eprintln!("{} {}", "Scraping".bright_cyan().bold(), url);
            let response = scraper
                .scrape(&url, &schema, &options)
                .await
                .with_context(|| format!("Failed to scrape {}", url))?;

            if let Some(state) = response.fetch_state() {
                eprintln!("{} {}", "Fetch state:".bright_black(), state);
            }
            println!("{}", response.to_json(Some(indent))?);
        }

        Commands::Extract {
            file,
            extract,
            indent,
        } => {
            let schema = load_schema(&extract.schema)?;
            let html = read_input(&file)?;

            let response = scraper
                .extract_from_html(&html, &schema, extract.instructions.as_deref())
                .await
                .context("Extraction failed")?;
            println!("{}", response.to_json(Some(indent))?);
        }

        Commands::Many {
            mut urls,
            from_file,
            concurrency,
            extract,
            fetch,
        } => {
            if let Some(path) = from_file {
                let list = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                urls.extend(
                    list.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty() && !l.starts_with('#'))
                        .map(String::from),
                );
            }
            if urls.is_empty() {
                bail!("No URLs given");
            }

            let schema = load_schema(&extract.schema)?;
            let mut options = fetch.options(extract.instructions.as_deref());
            options.concurrency = concurrency;

            eprintln!("{} {} URLs", "Scraping".bright_cyan().bold(), urls.len());
            let results = scraper.scrape_many(&urls, &schema, &options).await;

            let mut failed = 0;
            for (url, result) in &results {
                let line = match result {
                    Ok(response) => ManyLine {
                        url,
                        success: true,
                        record: Some(response.to_value()),
                        error: None,
                    },
                    Err(e) => {
                        failed += 1;
                        ManyLine {
                            url,
                            success: false,
                            record: None,
                            error: Some(e.to_string()),
                        }
                    }
                };
                println!("{}", serde_json::to_string(&line)?);
            }

            let summary = format!("{} succeeded, {} failed", results.len() - failed, failed);
            if failed == 0 {
                eprintln!("{}", summary.bright_green());
            } else {
                eprintln!("{}", summary.bright_yellow());
            }
        }

        Commands::Fetch { url, fetch } => {
            let outcome = scraper
                .fetch_html(&url, &fetch.options(None))
                .await
                .with_context(|| format!("Failed to fetch {}", url))?;

            eprintln!("{} {}", "Fetch state:".bright_black(), outcome.state);
            if let Some(reason) = &outcome.insufficiency {
                eprintln!("{} {}", "Cheap page insufficient:".bright_yellow(), reason);
            }
            println!("{}", outcome.html);
        }

        Commands::Analyze {
            file,
            prompt,
            temperature,
        } => {
            let html = read_input(&file)?;
            let answer = scraper
                .analyze_html(&html, &prompt, temperature)
                .await
                .context("Analysis failed")?;
            println!("{}", answer);
        }
    }

    Ok(())
}

/// Accepts either the field-list format or a JSON Schema object.
fn load_schema(path: &Path) -> Result<SchemaDescriptor> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let schema = if value.get("fields").is_some() {
        SchemaDescriptor::from_json(&text)?
    } else {
        SchemaDescriptor::from_json_schema(&value)?
    };
    Ok(schema)
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
