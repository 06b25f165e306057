use crate::{
    config::ScrapeConfig,
    document::build_document,
    extract::{PageExtractor, QuestionRecord},
    pdf,
    session::{authenticate, Session},
    walker::walk,
};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::{
    fs,
    path::{Path, PathBuf},
    pin::pin,
};
use tracing::{error, info, warn};

/// Log in, walk the question chain and write the PDF.
///
/// A failed login aborts before anything is scraped. A failed page ends the walk but the
/// pages already collected are still rendered.
pub async fn run(config: &ScrapeConfig) -> Result<PathBuf> {
    let session = match authenticate(&config.login_url, &config.email, &config.password).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "login failed, aborting");
            return Err(e).context("login failed");
        }
    };

    let extractor = PageExtractor::new(config.origin.as_str());
    let records =
        collect_records(&session, &extractor, &config.start_url, config.page_count).await;
    info!(count = records.len(), "scraping finished");
    if records.is_empty() {
        warn!("no question pages were collected");
    }

    let path = config.output_path();
    if let Err(e) = render(&session, &records, config, &path).await {
        error!(error = %e, path = %path.display(), "failed to write pdf");
        return Err(e);
    }
    info!(path = %path.display(), "pdf written");
    Ok(path)
}

/// Drain the walk, keeping every record before the first failure.
pub async fn collect_records(
    session: &Session,
    extractor: &PageExtractor,
    start_url: &str,
    budget: usize,
) -> Vec<QuestionRecord> {
    let mut records = Vec::new();
    let mut pages = pin!(walk(session, extractor, start_url, budget));
    while let Some(page) = pages.next().await {
        match page {
            Ok(record) => records.push(record),
            Err(e) => {
                error!(page = records.len() + 1, error = %e, "failed to scrape page, stopping");
                break;
            }
        }
    }
    records
}

async fn render(
    session: &Session,
    records: &[QuestionRecord],
    config: &ScrapeConfig,
    path: &Path,
) -> Result<()> {
    let font = fs::read(&config.font_path)
        .with_context(|| format!("failed to read font {}", config.font_path.display()))?;

    let doc = build_document(session, records).await;
    let bytes = pdf::to_pdf(&doc, &font)?;
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
