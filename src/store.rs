use crate::error::CrawlerError;
use crate::record::{NewProduct, NewReview, Product, Review, Sentiment};
use chrono::{DateTime, FixedOffset};
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// SQLite-backed record store shared by both controllers.
///
/// Every insert and update is an independent atomic statement: an interrupted
/// batch loses at most its in-flight rows, never previously committed ones.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(url: &str) -> Result<Store, CrawlerError> {
        let opt: SqliteConnectOptions = url.parse::<SqliteConnectOptions>()?.create_if_missing(true);
        let pool = SqlitePool::connect_with(opt).await?;
        let store = Store { pool };
        store.init().await?;
        Ok(store)
    }

    /// Single-connection in-memory database. More than one connection would
    /// see a different empty database each.
    pub async fn in_memory() -> Result<Store, CrawlerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Store { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), CrawlerError> {
        if !self.is_table_exists("products").await? {
            sqlx::query(
                r#"
                    CREATE TABLE products (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        category TEXT NOT NULL,
                        title TEXT NOT NULL,
                        url TEXT NOT NULL UNIQUE,
                        price TEXT,
                        source TEXT NOT NULL,
                        created_at DATETIME
                    )
                "#,
            )
            .execute(&self.pool)
            .await?;
            debug!("Created products");
        }
        if !self.is_table_exists("reviews").await? {
            sqlx::query(
                r#"
                    CREATE TABLE reviews (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        product_id INTEGER NOT NULL,
                        category TEXT NOT NULL,
                        product_url TEXT NOT NULL,
                        product_title TEXT NOT NULL,
                        text TEXT,
                        body TEXT,
                        rating INTEGER,
                        source TEXT NOT NULL,
                        sentiment_label TEXT,
                        sentiment_score REAL,
                        sentiment_stars INTEGER,
                        sentiment_confidence REAL,
                        sentiment_model TEXT,
                        created_at DATETIME
                    )
                "#,
            )
            .execute(&self.pool)
            .await?;
            debug!("Created reviews");
        }
        Ok(())
    }

    async fn is_table_exists(&self, table_name: &str) -> Result<bool, CrawlerError> {
        Ok(
            sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                .bind(table_name)
                .fetch_optional(&self.pool)
                .await?
                .is_some(),
        )
    }

    pub async fn product_exists(&self, url: &str) -> Result<bool, CrawlerError> {
        Ok(sqlx::query("SELECT id FROM products WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }

    /// Inserts a batch of products, silently skipping rows whose URL is
    /// already present. Returns the number of rows actually written.
    pub async fn insert_products(&self, batch: &[NewProduct]) -> Result<u64, CrawlerError> {
        let mut inserted = 0;
        for p in batch {
            let done = sqlx::query(
                r#"INSERT OR IGNORE INTO products
                    (category, title, url, price, source, created_at)
                    VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&p.category)
            .bind(&p.title)
            .bind(&p.url)
            .bind(&p.price)
            .bind(&p.source)
            .bind(get_now())
            .execute(&self.pool)
            .await?;
            inserted += done.rows_affected();
        }
        Ok(inserted)
    }

    pub async fn products(&self) -> Result<Vec<Product>, CrawlerError> {
        let mut products = vec![];
        let mut rows =
            sqlx::query("SELECT id, category, title, url, price, source FROM products ORDER BY id")
                .fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            products.push(Product {
                id: row.try_get("id")?,
                category: row.try_get("category")?,
                title: row.try_get("title")?,
                url: row.try_get("url")?,
                price: row.try_get("price")?,
                source: row.try_get("source")?,
            });
        }
        Ok(products)
    }

    pub async fn count_products(&self, category: Option<&str>) -> Result<u64, CrawlerError> {
        let count: i64 = match category {
            Some(category) => {
                sqlx::query("SELECT COUNT(*) FROM products WHERE category = ?")
                    .bind(category)
                    .fetch_one(&self.pool)
                    .await?
                    .try_get(0)?
            }
            None => sqlx::query("SELECT COUNT(*) FROM products")
                .fetch_one(&self.pool)
                .await?
                .try_get(0)?,
        };
        Ok(count as u64)
    }

    pub async fn delete_all_products(&self) -> Result<u64, CrawlerError> {
        let done = sqlx::query("DELETE FROM products").execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    pub async fn product_has_reviews(&self, product_id: i64) -> Result<bool, CrawlerError> {
        Ok(sqlx::query("SELECT id FROM reviews WHERE product_id = ? LIMIT 1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }

    pub async fn insert_reviews(&self, batch: &[NewReview]) -> Result<u64, CrawlerError> {
        let mut inserted = 0;
        for r in batch {
            let done = sqlx::query(
                r#"INSERT INTO reviews
                    (product_id, category, product_url, product_title, text, rating, source, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(r.product_id)
            .bind(&r.category)
            .bind(&r.product_url)
            .bind(&r.product_title)
            .bind(&r.text)
            .bind(r.rating)
            .bind(&r.source)
            .bind(get_now())
            .execute(&self.pool)
            .await?;
            inserted += done.rows_affected();
        }
        Ok(inserted)
    }

    /// Reviews not yet enriched, oldest first. Selecting by the missing score
    /// is what makes enrichment resumable: a restarted run re-queries the
    /// same shrinking set.
    pub async fn unscored_reviews(&self, limit: u32) -> Result<Vec<Review>, CrawlerError> {
        let mut reviews = vec![];
        let mut rows = sqlx::query(
            r#"SELECT id, product_id, category, text, body, rating
                FROM reviews WHERE sentiment_score IS NULL ORDER BY id LIMIT ?"#,
        )
        .bind(limit)
        .fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            reviews.push(Review {
                id: row.try_get("id")?,
                product_id: row.try_get("product_id")?,
                category: row.try_get("category")?,
                text: row.try_get("text")?,
                body: row.try_get("body")?,
                rating: row.try_get("rating")?,
                sentiment: None,
            });
        }
        Ok(reviews)
    }

    pub async fn reviews_for_product(&self, product_id: i64) -> Result<Vec<Review>, CrawlerError> {
        let mut reviews = vec![];
        let mut rows = sqlx::query(
            r#"SELECT id, product_id, category, text, body, rating,
                      sentiment_label, sentiment_score, sentiment_stars,
                      sentiment_confidence, sentiment_model
                FROM reviews WHERE product_id = ? ORDER BY id"#,
        )
        .bind(product_id)
        .fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            let score: Option<f64> = row.try_get("sentiment_score")?;
            let sentiment = match score {
                Some(score) => Some(Sentiment {
                    label: row.try_get("sentiment_label")?,
                    score,
                    stars: row.try_get("sentiment_stars")?,
                    confidence: row.try_get("sentiment_confidence")?,
                    model: row.try_get("sentiment_model")?,
                }),
                None => None,
            };
            reviews.push(Review {
                id: row.try_get("id")?,
                product_id: row.try_get("product_id")?,
                category: row.try_get("category")?,
                text: row.try_get("text")?,
                body: row.try_get("body")?,
                rating: row.try_get("rating")?,
                sentiment,
            });
        }
        Ok(reviews)
    }

    /// Writes all five sentiment fields in one statement; a review is never
    /// left partially enriched.
    pub async fn set_sentiment(&self, review_id: i64, s: &Sentiment) -> Result<(), CrawlerError> {
        sqlx::query(
            r#"UPDATE reviews SET
                sentiment_label = ?,
                sentiment_score = ?,
                sentiment_stars = ?,
                sentiment_confidence = ?,
                sentiment_model = ?
                WHERE id = ?"#,
        )
        .bind(&s.label)
        .bind(s.score)
        .bind(s.stars)
        .bind(s.confidence)
        .bind(&s.model)
        .bind(review_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clears sentiment from every enriched review, returning how many were
    /// touched.
    pub async fn clear_sentiments(&self) -> Result<u64, CrawlerError> {
        let done = sqlx::query(
            r#"UPDATE reviews SET
                sentiment_label = NULL,
                sentiment_score = NULL,
                sentiment_stars = NULL,
                sentiment_confidence = NULL,
                sentiment_model = NULL
                WHERE sentiment_score IS NOT NULL"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }

    pub async fn count_reviews(&self) -> Result<u64, CrawlerError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM reviews")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count as u64)
    }

    pub async fn count_scored_reviews(&self) -> Result<u64, CrawlerError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM reviews WHERE sentiment_score IS NOT NULL")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count as u64)
    }

    pub async fn count_label(&self, label: &str) -> Result<u64, CrawlerError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM reviews WHERE sentiment_label = ?")
            .bind(label)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count as u64)
    }

    /// Deletes reviews whose owning product is gone. A review must always
    /// reference an existing product; this repairs drift after a product
    /// reset.
    pub async fn delete_orphan_reviews(&self) -> Result<u64, CrawlerError> {
        let done = sqlx::query(
            "DELETE FROM reviews WHERE product_id NOT IN (SELECT id FROM products)",
        )
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }
}

fn get_now() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(
        &chrono::offset::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn product(url: &str) -> NewProduct {
        NewProduct {
            category: "headphones".to_string(),
            title: "Wireless over-ear headphones".to_string(),
            url: url.to_string(),
            price: Some("129".to_string()),
            source: "test_listing".to_string(),
        }
    }

    fn review(product_id: i64, text: &str) -> NewReview {
        NewReview {
            product_id,
            category: "headphones".to_string(),
            product_url: "https://market.test/p-1".to_string(),
            product_title: "Wireless over-ear headphones".to_string(),
            text: text.to_string(),
            rating: Some(4),
            source: "test_reviews".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_products_skips_rows_sharing_a_url() {
        let store = Store::in_memory().await.unwrap();
        let batch = vec![
            product("https://market.test/p-1"),
            product("https://market.test/p-1"),
            product("https://market.test/p-2"),
        ];
        assert_eq!(store.insert_products(&batch).await.unwrap(), 2);
        assert_eq!(store.count_products(None).await.unwrap(), 2);

        // A second run over the same batch writes nothing.
        assert_eq!(store.insert_products(&batch).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn count_products_filters_by_category() {
        let store = Store::in_memory().await.unwrap();
        let mut other = product("https://market.test/tv-1");
        other.category = "televisions".to_string();
        store
            .insert_products(&[product("https://market.test/p-1"), other])
            .await
            .unwrap();
        assert_eq!(store.count_products(Some("headphones")).await.unwrap(), 1);
        assert_eq!(store.count_products(Some("televisions")).await.unwrap(), 1);
        assert_eq!(store.count_products(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn orphaned_reviews_are_deleted() {
        let store = Store::in_memory().await.unwrap();
        store
            .insert_products(&[product("https://market.test/p-1")])
            .await
            .unwrap();
        let id = store.products().await.unwrap()[0].id;
        store
            .insert_reviews(&[review(id, "Solid bass, weak highs.")])
            .await
            .unwrap();

        assert_eq!(store.delete_orphan_reviews().await.unwrap(), 0);

        store.delete_all_products().await.unwrap();
        assert_eq!(store.delete_orphan_reviews().await.unwrap(), 1);
        assert_eq!(store.count_reviews().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sentiment_round_trips_and_clears() {
        let store = Store::in_memory().await.unwrap();
        store
            .insert_products(&[product("https://market.test/p-1")])
            .await
            .unwrap();
        let id = store.products().await.unwrap()[0].id;
        store
            .insert_reviews(&[review(id, "Arrived broken."), review(id, "Love it.")])
            .await
            .unwrap();

        let pending = store.unscored_reviews(10).await.unwrap();
        assert_eq!(pending.len(), 2);

        let sentiment = Sentiment {
            label: "negative".to_string(),
            score: -1.0,
            stars: 1,
            confidence: 0.97,
            model: "test-model".to_string(),
        };
        store.set_sentiment(pending[0].id, &sentiment).await.unwrap();

        assert_eq!(store.unscored_reviews(10).await.unwrap().len(), 1);
        assert_eq!(store.count_scored_reviews().await.unwrap(), 1);
        assert_eq!(store.count_label("negative").await.unwrap(), 1);

        let stored = store.reviews_for_product(id).await.unwrap();
        assert_eq!(stored[0].sentiment, Some(sentiment));
        assert_eq!(stored[1].sentiment, None);

        assert_eq!(store.clear_sentiments().await.unwrap(), 1);
        assert_eq!(store.count_scored_reviews().await.unwrap(), 0);
        assert_eq!(store.unscored_reviews(10).await.unwrap().len(), 2);
    }
}
