use clap::{Parser, Subcommand};
use marketplace_review_crawler::classify::{self, SentimentEndpoint};
use marketplace_review_crawler::config::Config;
use marketplace_review_crawler::error::CrawlerError;
use marketplace_review_crawler::fetch::{HttpFetcher, WebDriverFetcher};
use marketplace_review_crawler::mercado::{MercadoListing, MercadoReviews};
use marketplace_review_crawler::store::Store;
use marketplace_review_crawler::{enrich, ingest};
use std::io::{self, Write};
use tracing::{info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;

/// Categories crawled by `products`, with their listing base URLs.
const CATEGORIES: &[(&str, &str)] = &[
    ("headphones", "https://listado.mercadolibre.com.ec/audifonos"),
    (
        "laptops",
        "https://listado.mercadolibre.com.ec/computacion-notebooks/laptops",
    ),
    (
        "televisions",
        "https://listado.mercadolibre.com.ec/electronica-audio-y-video/televisores/televisores",
    ),
];

const DEFAULT_MAX_PAGES: u32 = 20;

#[derive(Parser)]
#[command(about = "MercadoLibre review corpus builder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl category listings and store products not seen before.
    Products {
        /// Page cap per category.
        #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
        max_pages: u32,
        /// Restrict the crawl to one configured category.
        #[arg(long)]
        category: Option<String>,
    },
    /// Collect reviews for stored products that have none yet.
    Reviews,
    /// Attach sentiment to stored reviews that have none yet.
    Enrich {
        #[arg(long, default_value_t = enrich::DEFAULT_BATCH_SIZE)]
        batch_size: u32,
    },
    /// Print corpus counts and the sentiment distribution.
    Stats,
    /// Clear all sentiment fields so the corpus can be re-enriched.
    ResetSentiments,
    /// Delete every stored product.
    ResetProducts,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
                "info,html5ever=error,selectors=error,hyper=warn,reqwest=info,sqlx=warn".into()
            }),
        )
        .with(ErrorLayer::default())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = Store::connect(&config.database_url).await?;

    match cli.command {
        Command::Products {
            max_pages,
            category,
        } => products(&store, max_pages, category.as_deref()).await?,
        Command::Reviews => reviews(&store, &config).await?,
        Command::Enrich { batch_size } => enrich_reviews(&store, &config, batch_size).await?,
        Command::Stats => stats(&store).await?,
        Command::ResetSentiments => reset_sentiments(&store).await?,
        Command::ResetProducts => reset_products(&store).await?,
    }

    Ok(())
}

async fn products(store: &Store, max_pages: u32, only: Option<&str>) -> Result<(), CrawlerError> {
    if let Some(only) = only {
        if !CATEGORIES.iter().any(|(category, _)| *category == only) {
            warn!("Unknown category {:?}, nothing to do", only);
            return Ok(());
        }
    }

    let fetcher = HttpFetcher::new()?;
    let site = MercadoListing;
    let mut new_products = 0;

    for (category, base_url) in CATEGORIES {
        if matches!(only, Some(only) if only != *category) {
            continue;
        }
        info!("{}: crawling {}", category, base_url);
        let outcome =
            ingest::ingest_category(store, &fetcher, &site, category, base_url, max_pages).await?;
        new_products += outcome.inserted;
        info!(
            "{}: {} pages | {} new | {} duplicates | {} rejected | {} stored",
            category,
            outcome.pages,
            outcome.inserted,
            outcome.duplicates,
            outcome.rejected,
            store.count_products(Some(category)).await?
        );
    }

    info!(
        "Done: {} new products, {} stored overall",
        new_products,
        store.count_products(None).await?
    );
    Ok(())
}

async fn reviews(store: &Store, config: &Config) -> Result<(), CrawlerError> {
    let products = store.products().await?;
    if products.is_empty() {
        info!("No products stored yet, run `products` first");
        return Ok(());
    }

    info!("Collecting reviews for {} products", products.len());
    let fetcher = WebDriverFetcher::connect(&config.webdriver_url).await?;
    let site = MercadoReviews;
    let outcome = ingest::ingest_all_reviews(store, &fetcher, &site, &products).await;
    fetcher.close().await?;
    let outcome = outcome?;

    info!(
        "Done: {}/{} products gained reviews ({} new), {} already covered, {} reviews stored overall",
        outcome.covered,
        outcome.products,
        outcome.reviews,
        outcome.skipped,
        store.count_reviews().await?
    );
    Ok(())
}

async fn enrich_reviews(store: &Store, config: &Config, batch_size: u32) -> Result<(), CrawlerError> {
    let total = store.count_reviews().await?;
    let scored = store.count_scored_reviews().await?;
    info!(
        "{} reviews stored | {} enriched | {} pending",
        total,
        scored,
        total - scored
    );
    if total == scored {
        info!("Nothing to enrich");
        return Ok(());
    }

    let classifier = SentimentEndpoint::new(config.classifier_url()?, classify::DEFAULT_MODEL)?;
    let outcome = enrich::enrich_all(store, &classifier, batch_size).await?;

    info!(
        "Done: {} batches | {} enriched | {} failed",
        outcome.batches, outcome.succeeded, outcome.failed
    );
    distribution(store).await?;
    Ok(())
}

async fn stats(store: &Store) -> Result<(), CrawlerError> {
    for (category, _) in CATEGORIES {
        info!(
            "{}: {} products",
            category,
            store.count_products(Some(category)).await?
        );
    }
    info!("{} products overall", store.count_products(None).await?);

    let total = store.count_reviews().await?;
    let scored = store.count_scored_reviews().await?;
    info!(
        "{} reviews | {} enriched | {} pending",
        total,
        scored,
        total - scored
    );
    distribution(store).await?;
    Ok(())
}

async fn distribution(store: &Store) -> Result<(), CrawlerError> {
    let scored = store.count_scored_reviews().await?;
    if scored == 0 {
        return Ok(());
    }
    for label in ["positive", "neutral", "negative"] {
        let count = store.count_label(label).await?;
        info!(
            "  {}: {} ({:.1}%)",
            label,
            count,
            count as f64 * 100.0 / scored as f64
        );
    }
    Ok(())
}

/// Destructive operations ask on stdin before touching anything.
fn confirmed(prompt: &str) -> bool {
    print!("{} (yes/no): ", prompt);
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim().eq_ignore_ascii_case("yes")
}

async fn reset_sentiments(store: &Store) -> Result<(), CrawlerError> {
    let scored = store.count_scored_reviews().await?;
    if !confirmed(&format!("Clear sentiment from {} reviews?", scored)) {
        info!("Cancelled");
        return Ok(());
    }
    let cleared = enrich::reset_sentiments(store).await?;
    info!("Cleared sentiment on {} reviews", cleared);
    Ok(())
}

async fn reset_products(store: &Store) -> Result<(), CrawlerError> {
    let count = store.count_products(None).await?;
    if !confirmed(&format!("Delete all {} products?", count)) {
        info!("Cancelled");
        return Ok(());
    }
    let deleted = store.delete_all_products().await?;
    info!(
        "Deleted {} products; run prune-orphans to drop their reviews",
        deleted
    );
    Ok(())
}
