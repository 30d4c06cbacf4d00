use crate::error::CrawlerError;
use crate::record::{Polarity, Prediction};
use crate::Classifier;
use serde::Deserialize;
use tokio::time::Duration;

pub const DEFAULT_MODEL: &str = "pysentimiento/robertuito-sentiment-analysis";

/// Model inference is much slower than a page fetch.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for an HTTP inference endpoint serving the sentiment model.
///
/// The endpoint takes `{"inputs": text}` and answers with the usual ranked
/// form `[[{"label": "POS"|"NEG"|"NEU", "score": f64}, ..]]`; only the top
/// entry is kept.
pub struct SentimentEndpoint {
    client: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

impl SentimentEndpoint {
    pub fn new(url: &str, model: &str) -> Result<SentimentEndpoint, CrawlerError> {
        let client = reqwest::Client::builder()
            .timeout(CLASSIFY_TIMEOUT)
            .build()?;
        Ok(SentimentEndpoint {
            client,
            url: url.to_string(),
            model: model.to_string(),
        })
    }
}

fn polarity_from_tag(tag: &str) -> Result<Polarity, CrawlerError> {
    match tag {
        "POS" => Ok(Polarity::Positive),
        "NEG" => Ok(Polarity::Negative),
        "NEU" => Ok(Polarity::Neutral),
        other => Err(CrawlerError::Classify(format!(
            "unknown label {:?}",
            other
        ))),
    }
}

#[async_trait::async_trait]
impl Classifier for SentimentEndpoint {
    fn model(&self) -> &str {
        &self.model
    }

    async fn classify(&self, text: &str) -> Result<Prediction, CrawlerError> {
        let ranked: Vec<Vec<LabelScore>> = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "inputs": text }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let top = ranked
            .into_iter()
            .flatten()
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or_else(|| CrawlerError::Classify("empty response".to_string()))?;

        Ok(Prediction {
            polarity: polarity_from_tag(&top.label)?,
            confidence: top.score,
        })
    }
}
