use crate::error::CrawlerError;
use std::env;

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

/// Runtime configuration, read once before any network activity.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub classifier_url: Option<String>,
    pub webdriver_url: String,
}

impl Config {
    /// Loads `.env` if present, then the process environment. A missing
    /// `DATABASE_URL` is fatal here, before anything is opened or fetched.
    pub fn from_env() -> Result<Config, CrawlerError> {
        let _ = dotenvy::dotenv();
        let database_url =
            env::var("DATABASE_URL").map_err(|_| CrawlerError::Config("DATABASE_URL"))?;
        let classifier_url = env::var("CLASSIFIER_URL").ok();
        let webdriver_url =
            env::var("WEBDRIVER_URL").unwrap_or_else(|_| DEFAULT_WEBDRIVER_URL.to_string());
        Ok(Config {
            database_url,
            classifier_url,
            webdriver_url,
        })
    }

    /// The classifier endpoint, required only by the enrichment pass.
    pub fn classifier_url(&self) -> Result<&str, CrawlerError> {
        self.classifier_url
            .as_deref()
            .ok_or(CrawlerError::Config("CLASSIFIER_URL"))
    }
}
