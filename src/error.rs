#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("Missing required configuration: {0}")]
    Config(&'static str),
    #[error("Database error")]
    Database(#[from] sqlx::Error),
    #[error("Request failed")]
    Fetch(#[from] reqwest::Error),
    #[error("WebDriver command failed")]
    WebDriver(#[from] fantoccini::error::CmdError),
    #[error("WebDriver session could not be established")]
    WebDriverSession(#[from] fantoccini::error::NewSessionError),
    #[error("Classification failed: {0}")]
    Classify(String),
}
