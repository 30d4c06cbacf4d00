use crate::error::CrawlerError;
use crate::Fetcher;
use fantoccini::{Client, ClientBuilder, Locator};
use tokio::time::Duration;
use tracing::debug;

/// Listing pages serve a degraded shell to unknown agents.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Hard deadline for a single page request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Plain stateless HTTP fetch for server-rendered pages.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<HttpFetcher, CrawlerError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CrawlerError> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }
}

/// How often the reveal-more control is clicked before giving up.
const REVEAL_ATTEMPTS: usize = 3;
/// Settling time after navigation, before the first extraction attempt.
const RENDER_WAIT: Duration = Duration::from_secs(3);
/// Settling time after each reveal click.
const REVEAL_WAIT: Duration = Duration::from_secs(2);

/// Buttons that expand the collapsed review list.
const REVEAL_XPATH: &str = "//button[contains(., 'Ver más') \
                            or contains(., 'opiniones') \
                            or contains(., 'Mostrar más')]";

/// Browser-rendered fetch through a WebDriver server, for pages that only
/// show reviews after script execution. Scrolls, clicks the reveal-more
/// control a bounded number of times, then returns the rendered DOM.
pub struct WebDriverFetcher {
    client: Client,
}

impl WebDriverFetcher {
    /// Connects to a running WebDriver server (chromedriver / geckodriver).
    pub async fn connect(webdriver_url: &str) -> Result<WebDriverFetcher, CrawlerError> {
        let mut caps = serde_json::Map::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            serde_json::json!({ "args": ["--headless", "--no-sandbox", "--disable-dev-shm-usage"] }),
        );
        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(webdriver_url)
            .await?;
        Ok(WebDriverFetcher { client })
    }

    pub async fn close(self) -> Result<(), CrawlerError> {
        self.client.close().await?;
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> Result<(), CrawlerError> {
        self.client
            .execute("window.scrollTo(0, document.body.scrollHeight);", vec![])
            .await?;
        Ok(())
    }

    async fn reveal_more(&self) -> Result<(), CrawlerError> {
        for _ in 0..REVEAL_ATTEMPTS {
            self.scroll_to_bottom().await?;
            let buttons = self.client.find_all(Locator::XPath(REVEAL_XPATH)).await?;
            match buttons.into_iter().next() {
                Some(button) => {
                    debug!("Expanding collapsed reviews");
                    button.click().await?;
                    tokio::time::sleep(REVEAL_WAIT).await;
                }
                None => break,
            }
        }
        self.scroll_to_bottom().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Fetcher for WebDriverFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CrawlerError> {
        self.client.goto(url).await?;
        tokio::time::sleep(RENDER_WAIT).await;
        self.reveal_more().await?;
        Ok(self.client.source().await?)
    }
}
