/// Listing item as extracted, before validation. Fields the page did not
/// yield stay `None`; the ingest pipeline decides what to do with them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingCandidate {
    pub title: Option<String>,
    pub url: Option<String>,
    pub price: Option<String>,
}

/// Review as extracted from a rendered product page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewCandidate {
    pub text: String,
    pub rating: Option<i64>,
}

/// Product row to be inserted. The URL must already be cleaned of tracking
/// parameters; it is the deduplication key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub category: String,
    pub title: String,
    pub url: String,
    pub price: Option<String>,
    pub source: String,
}

/// A stored product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: i64,
    pub category: String,
    pub title: String,
    pub url: String,
    pub price: Option<String>,
    pub source: String,
}

/// Review row to be inserted, tied to the product it was scraped from.
/// Category, URL and title are denormalized from the product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub product_id: i64,
    pub category: String,
    pub product_url: String,
    pub product_title: String,
    pub text: String,
    pub rating: Option<i64>,
    pub source: String,
}

/// A stored review, possibly already enriched.
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub id: i64,
    pub product_id: i64,
    pub category: String,
    pub text: Option<String>,
    pub body: Option<String>,
    pub rating: Option<i64>,
    pub sentiment: Option<Sentiment>,
}

impl Review {
    /// Text used for classification: the `text` column written by the review
    /// crawl, falling back to the legacy `body` column of earlier imports.
    pub fn content(&self) -> Option<&str> {
        self.text.as_deref().or(self.body.as_deref())
    }
}

/// The five sentiment fields, always written together.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentiment {
    pub label: String,
    pub score: f64,
    pub stars: i64,
    pub confidence: f64,
    pub model: String,
}

/// Fixed 3-way output contract of the external classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

/// One classifier verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub polarity: Polarity,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn review(text: Option<&str>, body: Option<&str>) -> Review {
        Review {
            id: 1,
            product_id: 1,
            category: "laptops".to_string(),
            text: text.map(ToString::to_string),
            body: body.map(ToString::to_string),
            rating: None,
            sentiment: None,
        }
    }

    #[test]
    fn content_prefers_text_over_legacy_body() {
        let r = review(Some("great battery"), Some("old copy"));
        assert_eq!(r.content(), Some("great battery"));
    }

    #[test]
    fn content_falls_back_to_legacy_body() {
        let r = review(None, Some("still works fine"));
        assert_eq!(r.content(), Some("still works fine"));
    }

    #[test]
    fn content_is_none_when_both_missing() {
        assert_eq!(review(None, None).content(), None);
    }
}
