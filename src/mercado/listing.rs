use super::{collapse_ws, ORIGIN, PAGE_SIZE};
use crate::record::ListingCandidate;
use crate::ListingSite;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};

const E: &str = "Invalid selector";
lazy_static! {
    static ref ITEM: Selector = Selector::parse("li.ui-search-layout__item").expect(E);
    static ref ITEM_WRAPPER: Selector = Selector::parse("div.ui-search-result__wrapper").expect(E);
    static ref ITEM_LEGACY: Selector = Selector::parse("div.ui-search-result").expect(E);
    // The title is the text of the product link itself.
    static ref LINK: Selector = Selector::parse("a.poly-component__title").expect(E);
    static ref LINK_GROUP: Selector =
        Selector::parse("a.ui-search-item__group__element").expect(E);
    static ref LINK_PLAIN: Selector = Selector::parse("a.ui-search-link").expect(E);
    static ref ANY_LINK: Selector = Selector::parse("a[href]").expect(E);
    static ref PRICE: Selector = Selector::parse("span.andes-money-amount__fraction").expect(E);
    static ref PRICE_FRACTION: Selector = Selector::parse("span.price-tag-fraction").expect(E);
    static ref PRICE_AMOUNT: Selector = Selector::parse("span.price-tag-amount").expect(E);
}

#[derive(Debug, Default)]
pub struct MercadoListing;

impl MercadoListing {
    fn items<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        let mut items: Vec<_> = doc.select(&ITEM).collect();
        if items.is_empty() {
            items = doc.select(&ITEM_WRAPPER).collect();
        }
        if items.is_empty() {
            items = doc.select(&ITEM_LEGACY).collect();
        }
        items
    }

    fn link<'a>(&self, item: &ElementRef<'a>) -> Option<ElementRef<'a>> {
        item.select(&LINK)
            .next()
            .or_else(|| item.select(&LINK_GROUP).next())
            .or_else(|| item.select(&LINK_PLAIN).next())
            .or_else(|| item.select(&ANY_LINK).next())
    }

    fn price(&self, item: &ElementRef<'_>) -> Option<String> {
        item.select(&PRICE)
            .next()
            .or_else(|| item.select(&PRICE_FRACTION).next())
            .or_else(|| item.select(&PRICE_AMOUNT).next())
            .map(|el| collapse_ws(&el.text().collect::<String>()))
    }
}

impl ListingSite for MercadoListing {
    fn page_url(&self, base_url: &str, page: u32) -> String {
        if page == 0 {
            base_url.to_string()
        } else {
            let offset = page as usize * PAGE_SIZE + 1;
            format!("{}_Desde_{}_NoIndex_True", base_url, offset)
        }
    }

    fn origin(&self) -> &str {
        ORIGIN
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn provenance(&self) -> &str {
        "mercadolibre_listing"
    }

    fn extract(&self, doc: &Html) -> Vec<ListingCandidate> {
        self.items(doc)
            .into_iter()
            .map(|item| {
                let link = self.link(&item);
                ListingCandidate {
                    title: link
                        .map(|a| collapse_ws(&a.text().collect::<String>()))
                        .filter(|t| !t.is_empty()),
                    url: link.and_then(|a| a.value().attr("href")).map(ToString::to_string),
                    price: self.price(&item),
                }
            })
            .collect()
    }
}
