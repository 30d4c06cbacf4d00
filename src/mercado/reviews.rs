use super::collapse_ws;
use crate::record::ReviewCandidate;
use crate::ReviewSite;
use itertools::Itertools;
use lazy_regex::regex;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};

const E: &str = "Invalid selector";
lazy_static! {
    // Full review containers carry the rating; bare comment nodes do not.
    static ref ARTICLE: Selector = Selector::parse(r#"article[class*="ui-review"]"#).expect(E);
    static ref COMMENT_TEXT: Selector =
        Selector::parse("p.ui-review-capability-comments__comment__text").expect(E);
    static ref COMMENT: Selector = Selector::parse("div.ui-review-capability__comment").expect(E);
    static ref COMMENT_LEGACY: Selector = Selector::parse("div.ui-pdp-review__comment").expect(E);
    static ref RATING: Selector =
        Selector::parse(r#"[class*="rating"], [class*="stars"]"#).expect(E);
}

#[derive(Debug, Default)]
pub struct MercadoReviews;

fn rating(article: &ElementRef<'_>) -> Option<i64> {
    article.select(&RATING).find_map(|el| {
        let label = match el.value().attr("aria-label") {
            Some(label) => label.to_string(),
            None => el.text().collect::<String>(),
        };
        regex!(r"\d+")
            .find(&label)
            .and_then(|m| m.as_str().parse().ok())
    })
}

impl ReviewSite for MercadoReviews {
    fn provenance(&self) -> &str {
        "mercadolibre_reviews"
    }

    fn extract(&self, doc: &Html) -> Vec<ReviewCandidate> {
        let mut reviews: Vec<ReviewCandidate> = doc
            .select(&ARTICLE)
            .filter_map(|article| {
                let text = article
                    .select(&COMMENT_TEXT)
                    .next()
                    .or_else(|| article.select(&COMMENT).next())?;
                let text = collapse_ws(&text.text().collect::<String>());
                if text.is_empty() {
                    return None;
                }
                Some(ReviewCandidate {
                    text,
                    rating: rating(&article),
                })
            })
            .collect();

        if reviews.is_empty() {
            // Some layouts render comments without a surrounding article.
            reviews = doc
                .select(&COMMENT_TEXT)
                .chain(doc.select(&COMMENT))
                .chain(doc.select(&COMMENT_LEGACY))
                .map(|el| collapse_ws(&el.text().collect::<String>()))
                .filter(|text| !text.is_empty())
                .map(|text| ReviewCandidate { text, rating: None })
                .collect();
        }

        reviews
            .into_iter()
            .unique_by(|r| r.text.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn extracts_review_articles_with_ratings() {
        let site = MercadoReviews;
        let html = fs::read_to_string("tests/htmls/product.html").expect("Invalid file path");
        let doc = Html::parse_document(&html);

        let reviews = site.extract(&doc);
        assert_eq!(
            reviews,
            vec![
                ReviewCandidate {
                    text: "Excelente calidad de sonido, la batería dura varios días.".to_string(),
                    rating: Some(5),
                },
                ReviewCandidate {
                    text: "El empaque llegó golpeado pero el producto funciona bien.".to_string(),
                    rating: None,
                },
            ]
        );
    }

    #[test]
    fn falls_back_to_bare_comment_nodes() {
        let site = MercadoReviews;
        let html = r#"
            <html><body>
                <div class="ui-pdp-review__comment">Muy cómodo para uso diario.</div>
                <div class="ui-pdp-review__comment">Muy cómodo para uso diario.</div>
            </body></html>
        "#;
        let doc = Html::parse_document(html);

        let reviews = site.extract(&doc);
        assert_eq!(
            reviews,
            vec![ReviewCandidate {
                text: "Muy cómodo para uso diario.".to_string(),
                rating: None,
            }]
        );
    }
}
