//! Batched sentiment enrichment over stored reviews.
//!
//! Candidates are selected by the absence of a sentiment score, so any crash
//! or restart resumes by simply running the pass again; already-enriched
//! reviews are never re-processed.

use crate::error::CrawlerError;
use crate::record::{Polarity, Prediction, Sentiment};
use crate::store::Store;
use crate::Classifier;
use tracing::{debug, info, warn};

/// Input window of the classifier; longer reviews are cut at a character
/// boundary before the call.
const MAX_CLASSIFIER_INPUT: usize = 512;

pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Counters for one enrichment batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: u64,
    pub failed: u64,
}

impl BatchOutcome {
    /// True when the candidate set itself was empty.
    pub fn is_exhausted(&self) -> bool {
        self.succeeded == 0 && self.failed == 0
    }
}

/// Counters for a full drive-to-exhaustion run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichOutcome {
    pub batches: u32,
    pub succeeded: u64,
    pub failed: u64,
}

/// Maps the classifier's 3-way output onto the stored label/score/star
/// schema.
pub fn grade(prediction: &Prediction, model: &str) -> Sentiment {
    let (label, score, stars) = match prediction.polarity {
        Polarity::Positive => ("positive", 1.0, 5),
        Polarity::Negative => ("negative", -1.0, 1),
        Polarity::Neutral => ("neutral", 0.0, 3),
    };
    Sentiment {
        label: label.to_string(),
        score,
        stars,
        confidence: prediction.confidence,
        model: model.to_string(),
    }
}

fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Enriches up to `limit` reviews that have no sentiment yet, returning how
/// many succeeded and how many failed.
///
/// A review with no usable text, or one the classifier errors on, counts as
/// failed and is left untouched; it stays in the pending set. All five
/// sentiment fields of a successful review are written in one update.
pub async fn enrich_batch<C>(
    store: &Store,
    classifier: &C,
    limit: u32,
) -> Result<BatchOutcome, CrawlerError>
where
    C: Classifier,
{
    let pending = store.unscored_reviews(limit).await?;
    let mut outcome = BatchOutcome::default();

    for review in &pending {
        let text = match review.content() {
            Some(text) if !text.trim().is_empty() => text.trim(),
            _ => {
                outcome.failed += 1;
                continue;
            }
        };

        let prediction = match classifier.classify(clip(text, MAX_CLASSIFIER_INPUT)).await {
            Ok(prediction) => prediction,
            Err(e) => {
                warn!("review {}: classification failed ({})", review.id, e);
                outcome.failed += 1;
                continue;
            }
        };

        let sentiment = grade(&prediction, classifier.model());
        store.set_sentiment(review.id, &sentiment).await?;
        debug!("review {}: {}", review.id, sentiment.label);
        outcome.succeeded += 1;
    }

    Ok(outcome)
}

/// Runs batches until the pending set is exhausted.
///
/// A batch with failures but no successes also ends the run: every remaining
/// candidate failed, and since failures are not written they would be
/// re-selected forever. They stay eligible for a later run.
pub async fn enrich_all<C>(
    store: &Store,
    classifier: &C,
    batch_size: u32,
) -> Result<EnrichOutcome, CrawlerError>
where
    C: Classifier,
{
    let mut totals = EnrichOutcome::default();

    loop {
        let batch = enrich_batch(store, classifier, batch_size).await?;
        if batch.is_exhausted() {
            break;
        }

        totals.batches += 1;
        totals.succeeded += batch.succeeded;
        totals.failed += batch.failed;
        info!(
            "batch {}: {} enriched | {} failed",
            totals.batches, batch.succeeded, batch.failed
        );

        if batch.succeeded == 0 {
            warn!("no review in the last batch could be classified, stopping");
            break;
        }
    }

    Ok(totals)
}

/// Clears every sentiment field, returning the corpus to its pre-enrichment
/// state for reprocessing with a different model or mapping. Destructive;
/// callers confirm first.
pub async fn reset_sentiments(store: &Store) -> Result<u64, CrawlerError> {
    store.clear_sentiments().await
}
