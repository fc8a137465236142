mod checkpoint;
mod config;
mod crawler;
mod export;
mod fetch;
mod parser;
mod pipeline;
mod review;
mod stats;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scraper::Html;

use crate::config::{ExtractionMode, ScraperConfig};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::parser::extractor::ContentExtractor;
use crate::parser::payload::PayloadExtractor;
use crate::parser::PageExtractor;

#[derive(Parser)]
#[command(name = "review_scraper", about = "Resumable restaurant review scraper")]
struct Cli {
    /// TOML config file (optional; REVIEWS_* env vars override it)
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every restaurant in the input table, resuming from the checkpoint
    Run {
        /// Input CSV with a `url` column
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Final CSV export
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum)]
        mode: Option<ExtractionMode>,
        /// Review pages per restaurant
        #[arg(long)]
        max_pages: Option<u32>,
        /// Ignore and remove any earlier checkpoint
        #[arg(long)]
        fresh: bool,
    },
    /// Show what each extraction strategy finds on one page
    Inspect {
        /// Page URL, or a saved HTML file
        target: String,
        #[arg(long, value_enum)]
        mode: Option<ExtractionMode>,
        /// Save the fetched HTML here
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Summarize an existing export
    Analyze {
        /// Export CSV (default: configured output file)
        file: Option<PathBuf>,
        /// Also write the <stem>_stats.json document
        #[arg(long)]
        write_stats: bool,
    },
    /// Remove the checkpoint file
    ClearCheckpoint,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut cfg = ScraperConfig::load(&cli.config)?;

    let result = match cli.command {
        Commands::Run {
            input,
            output,
            mode,
            max_pages,
            fresh,
        } => {
            if let Some(input) = input {
                cfg.input_file = input;
            }
            if let Some(output) = output {
                cfg.output_file = output;
            }
            if let Some(mode) = mode {
                cfg.mode = mode;
            }
            if let Some(max_pages) = max_pages {
                cfg.max_pages = max_pages;
            }
            cfg.validate()?;

            let identifiers = export::load_identifiers(&cfg.input_file)?;
            if identifiers.is_empty() {
                println!("No URLs found in {}.", cfg.input_file.display());
                return Ok(());
            }

            let fetcher = HttpFetcher::new(&cfg)?;
            let pipeline = pipeline::Pipeline::new(cfg.clone(), Box::new(fetcher));
            if fresh {
                pipeline.reset()?;
            }

            println!("Scraping reviews for {} restaurants...", identifiers.len());
            let summary = pipeline.run(&identifiers).await?;
            println!(
                "Done: {} URLs ({} processed, {} skipped, {} failed).",
                summary.total, summary.processed, summary.skipped, summary.failed
            );
            println!(
                "Reviews: {} collected, {} saved to {}",
                summary.raw_records,
                summary.saved_records,
                cfg.output_file.display()
            );
            if summary.saved_records > 0 {
                println!();
                stats::print_summary(&summary.stats);
            }
            Ok(())
        }
        Commands::Inspect { target, mode, save } => {
            let html = if target.starts_with("http://") || target.starts_with("https://") {
                HttpFetcher::new(&cfg)?.get(&target).await?
            } else {
                std::fs::read_to_string(&target).with_context(|| format!("Failed to read {}", target))?
            };
            println!("Page length: {} characters", html.len());
            if let Some(path) = save {
                std::fs::write(&path, &html)?;
                println!("Saved page to {}", path.display());
            }
            inspect_page(&html, mode.unwrap_or(cfg.mode), &cfg);
            Ok(())
        }
        Commands::Analyze { file, write_stats } => {
            let path = file.unwrap_or_else(|| cfg.output_file.clone());
            let rows = export::read_reviews(&path)?;
            let edited = rows.iter().filter(|r| r.length_mismatch()).count();
            if edited > 0 {
                tracing::warn!("{} rows have a review_length that no longer matches their text", edited);
            }
            if let Some(exported_at) = rows.iter().filter_map(|r| r.processed_at).max() {
                println!("Exported at: {}\n", exported_at.to_rfc3339());
            }
            let records: Vec<_> = rows.into_iter().map(export::ExportRow::into_record).collect();
            if records.is_empty() {
                println!("No reviews in {}.", path.display());
                return Ok(());
            }

            let summary = stats::SummaryStats::compute(&records, cfg.top_n);
            stats::print_summary(&summary);
            stats::print_length_distribution(&records);
            stats::print_top_identifiers(&summary);
            stats::print_keywords(&stats::keyword_report(&records, 20));

            if write_stats {
                let out = config::stats_path_for(&path);
                stats::write_stats(&out, &summary)?;
                println!("\nStats written to {}", out.display());
            }
            Ok(())
        }
        Commands::ClearCheckpoint => {
            let store = checkpoint::CheckpointStore::new(cfg.checkpoint_file.clone());
            let forgotten = store.load().len();
            store.clear()?;
            println!(
                "Checkpoint cleared: {} ({} processed URLs forgotten)",
                store.path().display(),
                forgotten
            );
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn inspect_page(html: &str, mode: ExtractionMode, cfg: &ScraperConfig) {
    match mode {
        ExtractionMode::Markup => {
            let document = Html::parse_document(html);
            let extractor = ContentExtractor::from_selectors(&cfg.selectors, cfg.min_review_length);

            println!("\n{:>3} | {:>5} | {}", "#", "Found", "Selector");
            println!("{}", "-".repeat(72));
            for (i, report) in extractor.diagnose(&document, 3).iter().enumerate() {
                match &report.error {
                    Some(err) => println!("{:>3} | {:>5} | {} (error: {})", i + 1, "-", report.name, err),
                    None => println!("{:>3} | {:>5} | {}", i + 1, report.matched, report.name),
                }
                for sample in &report.samples {
                    println!("      > {}", truncate(sample, 100));
                }
            }

            let picked = extractor.extract(&document);
            println!("\nExtractor would keep {} reviews.", picked.len());
        }
        ExtractionMode::Payload => {
            let reviews = PayloadExtractor::new().extract_page(html);
            println!("\nPreloaded state yielded {} reviews", reviews.len());
            for (i, r) in reviews.iter().enumerate() {
                let author = r
                    .meta
                    .as_ref()
                    .and_then(|m| m.author.as_deref())
                    .unwrap_or("-");
                let rating = r
                    .meta
                    .as_ref()
                    .and_then(|m| m.rating.as_deref())
                    .unwrap_or("-");
                println!("{:>3}. [{} | {}] {}", i + 1, author, rating, truncate(&r.text, 100));
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
