//! Listing crawl and review collection with store-backed deduplication.
//!
//! Repeated runs extend the corpus instead of duplicating it: products are
//! keyed by cleaned URL, review pages are only visited for products that
//! have no stored reviews yet.

use crate::error::CrawlerError;
use crate::record::{ListingCandidate, NewProduct, NewReview, Product};
use crate::store::Store;
use crate::{Fetcher, ListingSite, ReviewSite};
use scraper::Html;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Shortest title accepted from a listing cell. Placeholder cells render a
/// glyph or two of text.
const MIN_TITLE_LEN: usize = 5;
/// Shortest review text worth storing.
const MIN_REVIEW_LEN: usize = 10;
/// Reviews kept per product page.
const MAX_REVIEWS_PER_PRODUCT: usize = 20;
/// Pause between listing page requests.
const PAGE_DELAY: Duration = Duration::from_secs(1);
/// Pause between product pages on the review crawl.
const PRODUCT_DELAY: Duration = Duration::from_secs(3);

/// Counters for one listing page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageOutcome {
    pub inserted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    /// Raw extracted item count, before validation. Drives the
    /// last-page decision.
    pub raw_items: usize,
}

/// Counters accumulated over one category crawl.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CategoryOutcome {
    pub pages: u32,
    pub inserted: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

/// Strips the query string. Everything after `?` is per-session tracking
/// noise that would defeat URL-keyed deduplication.
pub fn clean_url(url: &str) -> &str {
    match url.split_once('?') {
        Some((base, _)) => base,
        None => url,
    }
}

fn absolutize(origin: &str, url: &str) -> String {
    if url.starts_with("http") {
        url.to_string()
    } else {
        format!("{}{}", origin, url)
    }
}

/// Crawls one category's paginated listing, inserting products not yet in
/// the store.
///
/// The crawl ends at `max_pages`, on the first page yielding fewer raw items
/// than the site's full-page size, or on a fetch failure. A failed page is
/// not retried; the next run starts over from page 0 and skips everything
/// already stored.
pub async fn ingest_category<F, L>(
    store: &Store,
    fetcher: &F,
    site: &L,
    category: &str,
    base_url: &str,
    max_pages: u32,
) -> Result<CategoryOutcome, CrawlerError>
where
    F: Fetcher,
    L: ListingSite,
{
    let mut totals = CategoryOutcome::default();

    for page in 0..max_pages {
        let page_url = site.page_url(base_url, page);
        debug!("Fetch {}", page_url);

        let html = match fetcher.fetch(&page_url).await {
            Ok(html) => html,
            Err(e) => {
                warn!("{}: fetch failed ({}), stopping category", page_url, e);
                break;
            }
        };

        let items = {
            let doc = Html::parse_document(&html);
            site.extract(&doc)
        };

        let outcome = ingest_items(store, site, category, items).await?;
        totals.pages += 1;
        totals.inserted += outcome.inserted;
        totals.duplicates += outcome.duplicates;
        totals.rejected += outcome.rejected;

        info!(
            "{} page {}: {} new | {} duplicates | {} rejected",
            category,
            page + 1,
            outcome.inserted,
            outcome.duplicates,
            outcome.rejected
        );

        if outcome.raw_items < site.page_size() {
            info!("{}: last page reached ({} items)", category, outcome.raw_items);
            break;
        }

        tokio::time::sleep(PAGE_DELAY).await;
    }

    Ok(totals)
}

/// Runs one page's candidates through the validation pipeline and inserts
/// the survivors as a batch.
///
/// Checks are applied in order and short-circuit per candidate: missing
/// link or title, then URL cleaning, then title length, then the duplicate
/// lookup. A failed candidate bumps a counter and never aborts the page.
async fn ingest_items<L>(
    store: &Store,
    site: &L,
    category: &str,
    items: Vec<ListingCandidate>,
) -> Result<PageOutcome, CrawlerError>
where
    L: ListingSite,
{
    let mut outcome = PageOutcome {
        raw_items: items.len(),
        ..PageOutcome::default()
    };
    let mut batch = vec![];

    for item in items {
        let (title, url) = match (item.title, item.url) {
            (Some(title), Some(url)) if !url.is_empty() => (title, url),
            _ => {
                outcome.rejected += 1;
                continue;
            }
        };

        let url = absolutize(site.origin(), clean_url(&url));

        if title.trim().len() < MIN_TITLE_LEN {
            outcome.rejected += 1;
            continue;
        }

        if store.product_exists(&url).await? {
            outcome.duplicates += 1;
            continue;
        }

        batch.push(NewProduct {
            category: category.to_string(),
            title,
            url,
            price: item.price,
            source: site.provenance().to_string(),
        });
    }

    // The UNIQUE column catches candidates repeated within one page, so the
    // insert count is authoritative.
    outcome.inserted = store.insert_products(&batch).await?;
    Ok(outcome)
}

/// What a review pass over a single product did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewIngest {
    /// The product already has stored reviews; the page was not fetched.
    AlreadyCovered,
    /// The page was fetched but yielded nothing usable.
    Empty,
    /// Number of reviews written.
    Inserted(u64),
}

/// Collects reviews for one product, unless it already has some.
///
/// Coverage is all-or-nothing per product: once any review is stored the
/// product is never revisited, which keeps re-runs from re-scraping every
/// product page.
pub async fn ingest_reviews<F, R>(
    store: &Store,
    fetcher: &F,
    site: &R,
    product: &Product,
) -> Result<ReviewIngest, CrawlerError>
where
    F: Fetcher,
    R: ReviewSite,
{
    if store.product_has_reviews(product.id).await? {
        debug!("{}: reviews already stored, skipping", product.url);
        return Ok(ReviewIngest::AlreadyCovered);
    }

    let html = match fetcher.fetch(&product.url).await {
        Ok(html) => html,
        Err(e) => {
            warn!("{}: fetch failed ({})", product.url, e);
            return Ok(ReviewIngest::Empty);
        }
    };

    let candidates = {
        let doc = Html::parse_document(&html);
        site.extract(&doc)
    };

    let batch: Vec<NewReview> = candidates
        .into_iter()
        .filter(|c| c.text.trim().len() >= MIN_REVIEW_LEN)
        .take(MAX_REVIEWS_PER_PRODUCT)
        .map(|c| NewReview {
            product_id: product.id,
            category: product.category.clone(),
            product_url: product.url.clone(),
            product_title: product.title.clone(),
            text: c.text,
            rating: c.rating,
            source: site.provenance().to_string(),
        })
        .collect();

    if batch.is_empty() {
        return Ok(ReviewIngest::Empty);
    }

    let inserted = store.insert_reviews(&batch).await?;
    Ok(ReviewIngest::Inserted(inserted))
}

/// Counters for a review crawl over many products.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReviewCrawlOutcome {
    pub products: usize,
    /// Products that gained at least one review this run.
    pub covered: usize,
    /// Products skipped because they were already covered.
    pub skipped: usize,
    pub reviews: u64,
}

/// Walks the given products in order, collecting reviews for each one that
/// has none yet.
pub async fn ingest_all_reviews<F, R>(
    store: &Store,
    fetcher: &F,
    site: &R,
    products: &[Product],
) -> Result<ReviewCrawlOutcome, CrawlerError>
where
    F: Fetcher,
    R: ReviewSite,
{
    let mut outcome = ReviewCrawlOutcome {
        products: products.len(),
        ..ReviewCrawlOutcome::default()
    };

    for (idx, product) in products.iter().enumerate() {
        info!("[{}/{}] {}", idx + 1, products.len(), product.title);
        match ingest_reviews(store, fetcher, site, product).await? {
            ReviewIngest::AlreadyCovered => {
                outcome.skipped += 1;
                continue;
            }
            ReviewIngest::Empty => {}
            ReviewIngest::Inserted(n) => {
                outcome.covered += 1;
                outcome.reviews += n;
                info!("{}: {} reviews stored", product.url, n);
            }
        }
        tokio::time::sleep(PRODUCT_DELAY).await;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ReviewCandidate;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Records requested URLs; optionally fails from the n-th request on.
    struct ScriptedFetcher {
        requests: Mutex<Vec<String>>,
        fail_from: Option<usize>,
    }

    impl ScriptedFetcher {
        fn new() -> ScriptedFetcher {
            ScriptedFetcher {
                requests: Mutex::new(vec![]),
                fail_from: None,
            }
        }

        fn failing_from(n: usize) -> ScriptedFetcher {
            ScriptedFetcher {
                requests: Mutex::new(vec![]),
                fail_from: Some(n),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<String, CrawlerError> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(url.to_string());
            if matches!(self.fail_from, Some(n) if requests.len() >= n) {
                return Err(CrawlerError::Config("scripted fetch failure"));
            }
            Ok("<html><body></body></html>".to_string())
        }
    }

    /// Serves pre-scripted candidate pages front to back, then empty pages.
    struct PagedSite {
        pages: Mutex<Vec<Vec<ListingCandidate>>>,
    }

    impl PagedSite {
        fn new(pages: Vec<Vec<ListingCandidate>>) -> PagedSite {
            PagedSite {
                pages: Mutex::new(pages),
            }
        }
    }

    impl ListingSite for PagedSite {
        fn page_url(&self, base_url: &str, page: u32) -> String {
            if page == 0 {
                base_url.to_string()
            } else {
                format!("{}_page_{}", base_url, page + 1)
            }
        }

        fn origin(&self) -> &str {
            "https://market.test"
        }

        fn page_size(&self) -> usize {
            48
        }

        fn provenance(&self) -> &str {
            "test_listing"
        }

        fn extract(&self, _doc: &Html) -> Vec<ListingCandidate> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                vec![]
            } else {
                pages.remove(0)
            }
        }
    }

    fn candidates(page: usize, n: usize) -> Vec<ListingCandidate> {
        (0..n)
            .map(|i| ListingCandidate {
                title: Some(format!("Wireless headphones model {}-{}", page, i)),
                url: Some(format!("/product-{}-{}?tracking=abc123", page, i)),
                price: Some("129".to_string()),
            })
            .collect()
    }

    #[test]
    fn clean_url_strips_the_query_string() {
        assert_eq!(
            clean_url("https://market.test/p-1?tracking=xyz&pos=3"),
            "https://market.test/p-1"
        );
        assert_eq!(clean_url("https://market.test/p-1"), "https://market.test/p-1");
        assert_eq!(clean_url("/p-1?a=b?c=d"), "/p-1");
    }

    #[test]
    fn absolutize_only_touches_relative_urls() {
        assert_eq!(
            absolutize("https://market.test", "/p-1"),
            "https://market.test/p-1"
        );
        assert_eq!(
            absolutize("https://market.test", "https://other.test/p-1"),
            "https://other.test/p-1"
        );
    }

    #[tokio::test]
    async fn crawl_stops_at_the_first_short_page() {
        let store = Store::in_memory().await.unwrap();
        let fetcher = ScriptedFetcher::new();
        let site = PagedSite::new(vec![
            candidates(0, 48),
            candidates(1, 48),
            candidates(2, 12),
        ]);

        let outcome = ingest_category(&store, &fetcher, &site, "headphones", "https://market.test/headphones", 20)
            .await
            .unwrap();

        // The third page is short, so a fourth is never requested.
        assert_eq!(fetcher.request_count(), 3);
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.inserted, 108);
        assert_eq!(outcome.duplicates, 0);
        assert_eq!(outcome.rejected, 0);
        assert_eq!(store.count_products(None).await.unwrap(), 108);
    }

    #[tokio::test]
    async fn crawl_respects_the_page_cap() {
        let store = Store::in_memory().await.unwrap();
        let fetcher = ScriptedFetcher::new();
        let site = PagedSite::new(vec![
            candidates(0, 48),
            candidates(1, 48),
            candidates(2, 48),
        ]);

        let outcome = ingest_category(&store, &fetcher, &site, "headphones", "https://market.test/headphones", 2)
            .await
            .unwrap();

        assert_eq!(fetcher.request_count(), 2);
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.inserted, 96);
    }

    #[tokio::test]
    async fn second_run_over_unchanged_listing_inserts_nothing() {
        let store = Store::in_memory().await.unwrap();
        let fetcher = ScriptedFetcher::new();

        let site = PagedSite::new(vec![candidates(0, 48), candidates(1, 12)]);
        let first = ingest_category(&store, &fetcher, &site, "headphones", "https://market.test/headphones", 20)
            .await
            .unwrap();
        assert_eq!(first.inserted, 60);

        let site = PagedSite::new(vec![candidates(0, 48), candidates(1, 12)]);
        let second = ingest_category(&store, &fetcher, &site, "headphones", "https://market.test/headphones", 20)
            .await
            .unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 60);
        assert_eq!(store.count_products(None).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn candidates_without_link_or_title_are_rejected() {
        let store = Store::in_memory().await.unwrap();
        let fetcher = ScriptedFetcher::new();
        let page = vec![
            ListingCandidate {
                title: None,
                url: Some("/p-1".to_string()),
                price: None,
            },
            ListingCandidate {
                title: Some("Gaming laptop 16GB".to_string()),
                url: None,
                price: None,
            },
            ListingCandidate {
                title: Some("TV".to_string()),
                url: Some("/p-2".to_string()),
                price: None,
            },
            ListingCandidate {
                title: Some("Gaming laptop 16GB".to_string()),
                url: Some("/p-3?ref=home".to_string()),
                price: Some("899".to_string()),
            },
        ];
        let site = PagedSite::new(vec![page]);

        let outcome = ingest_category(&store, &fetcher, &site, "laptops", "https://market.test/laptops", 20)
            .await
            .unwrap();

        assert_eq!(outcome.rejected, 3);
        assert_eq!(outcome.inserted, 1);
        let stored = store.products().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].url, "https://market.test/p-3");
    }

    #[tokio::test]
    async fn fetch_failure_ends_the_category() {
        let store = Store::in_memory().await.unwrap();
        let fetcher = ScriptedFetcher::failing_from(2);
        let site = PagedSite::new(vec![
            candidates(0, 48),
            candidates(1, 48),
            candidates(2, 48),
        ]);

        let outcome = ingest_category(&store, &fetcher, &site, "headphones", "https://market.test/headphones", 20)
            .await
            .unwrap();

        assert_eq!(fetcher.request_count(), 2);
        assert_eq!(outcome.pages, 1);
        assert_eq!(outcome.inserted, 48);
    }

    struct FixedReviewSite {
        reviews: Vec<ReviewCandidate>,
    }

    impl ReviewSite for FixedReviewSite {
        fn provenance(&self) -> &str {
            "test_reviews"
        }

        fn extract(&self, _doc: &Html) -> Vec<ReviewCandidate> {
            self.reviews.clone()
        }
    }

    async fn seeded_product(store: &Store) -> Product {
        store
            .insert_products(&[NewProduct {
                category: "headphones".to_string(),
                title: "Wireless over-ear headphones".to_string(),
                url: "https://market.test/p-1".to_string(),
                price: Some("129".to_string()),
                source: "test_listing".to_string(),
            }])
            .await
            .unwrap();
        store.products().await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn reviews_reference_their_product_and_short_text_is_dropped() {
        let store = Store::in_memory().await.unwrap();
        let fetcher = ScriptedFetcher::new();
        let product = seeded_product(&store).await;
        let site = FixedReviewSite {
            reviews: vec![
                ReviewCandidate {
                    text: "Great sound for the price, battery lasts days.".to_string(),
                    rating: Some(5),
                },
                ReviewCandidate {
                    text: "ok".to_string(),
                    rating: None,
                },
            ],
        };

        let outcome = ingest_reviews(&store, &fetcher, &site, &product).await.unwrap();

        assert_eq!(outcome, ReviewIngest::Inserted(1));
        let stored = store.reviews_for_product(product.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].product_id, product.id);
        assert_eq!(stored[0].category, "headphones");
        assert_eq!(stored[0].rating, Some(5));
        assert_eq!(store.delete_orphan_reviews().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn covered_products_are_not_fetched_again() {
        let store = Store::in_memory().await.unwrap();
        let product = seeded_product(&store).await;
        let site = FixedReviewSite {
            reviews: vec![ReviewCandidate {
                text: "Solid build, the hinge feels sturdy.".to_string(),
                rating: Some(4),
            }],
        };

        let fetcher = ScriptedFetcher::new();
        let first = ingest_reviews(&store, &fetcher, &site, &product).await.unwrap();
        assert_eq!(first, ReviewIngest::Inserted(1));
        assert_eq!(fetcher.request_count(), 1);

        let second = ingest_reviews(&store, &fetcher, &site, &product).await.unwrap();
        assert_eq!(second, ReviewIngest::AlreadyCovered);
        assert_eq!(fetcher.request_count(), 1);
        assert_eq!(store.count_reviews().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn review_count_per_product_is_capped() {
        let store = Store::in_memory().await.unwrap();
        let fetcher = ScriptedFetcher::new();
        let product = seeded_product(&store).await;
        let reviews = (0..30)
            .map(|i| ReviewCandidate {
                text: format!("Review number {} with enough text to keep.", i),
                rating: None,
            })
            .collect();
        let site = FixedReviewSite { reviews };

        let outcome = ingest_reviews(&store, &fetcher, &site, &product).await.unwrap();

        assert_eq!(outcome, ReviewIngest::Inserted(20));
    }
}
