use scraper::Html;

pub mod classify;
pub mod config;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod mercado;
pub mod record;
pub mod store;

pub use error::CrawlerError;
pub use record::{
    ListingCandidate, NewProduct, NewReview, Polarity, Prediction, Product, Review,
    ReviewCandidate, Sentiment,
};

/// Returns the rendered content of a URL. Implemented by the plain HTTP
/// fetcher and the WebDriver-backed one; the controllers do not care which.
#[async_trait::async_trait]
pub trait Fetcher {
    async fn fetch(&self, url: &str) -> Result<String, CrawlerError>;
}

/// Site-specific listing behavior: pagination scheme and item extraction.
pub trait ListingSite {
    /// URL of the n-th listing page, counted from 0, for a category base URL.
    fn page_url(&self, base_url: &str, page: u32) -> String;

    /// Origin prefixed onto relative product links.
    fn origin(&self) -> &str;

    /// Item count of a full, non-final listing page. A page yielding fewer
    /// raw items than this is the last one.
    fn page_size(&self) -> usize;

    /// Provenance tag stored on every product from this site.
    fn provenance(&self) -> &str;

    fn extract(&self, doc: &Html) -> Vec<ListingCandidate>;
}

/// Site-specific review extraction from a rendered product page.
pub trait ReviewSite {
    /// Provenance tag stored on every review from this site.
    fn provenance(&self) -> &str;

    fn extract(&self, doc: &Html) -> Vec<ReviewCandidate>;
}

/// External 3-way sentiment classifier.
#[async_trait::async_trait]
pub trait Classifier {
    /// Identifier persisted next to every sentiment it produces.
    fn model(&self) -> &str;

    async fn classify(&self, text: &str) -> Result<Prediction, CrawlerError>;
}
