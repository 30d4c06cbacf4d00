use marketplace_review_crawler::config::Config;
use marketplace_review_crawler::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let store = Store::connect(&config.database_url).await?;
    let removed = store.delete_orphan_reviews().await?;
    println!("Removed {} orphaned reviews", removed);
    Ok(())
}
