use anyhow::Result;
use clap::Parser;
use montore_scrape::{logger, pipeline, ScrapeConfig};
use std::path::PathBuf;

/// Scrape a chain of question pages into a PDF.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML file with credentials and URLs
    #[arg(short, long, default_value = "montore.toml")]
    config: PathBuf,

    /// First question page, overriding the config
    #[arg(long)]
    start_url: Option<String>,

    /// Maximum number of pages to walk
    #[arg(short = 'n', long)]
    pages: Option<usize>,

    /// Output file name without extension
    #[arg(short, long)]
    output: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let args = Args::parse();

    let mut config = ScrapeConfig::load(&args.config)?;
    if let Some(start_url) = args.start_url {
        config.start_url = start_url;
    }
    if let Some(pages) = args.pages {
        config.page_count = pages;
    }
    if let Some(output) = args.output {
        config.file_name = output;
    }
    config.validate()?;

    pipeline::run(&config).await?;
    Ok(())
}
