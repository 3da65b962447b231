use anyhow::Result;

use vota_harvest::http_client::http_client;
use vota_harvest::leaderboard_crawl::{self, CrawlConfig};
use vota_harvest::store;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = CrawlConfig::from_env();
    let db_path = store::default_db_path();
    let mut conn = store::open_db(&db_path)?;
    let client = http_client()?;

    let summary = leaderboard_crawl::run_crawl(&mut conn, &cfg, |page| {
        leaderboard_crawl::fetch_leaderboard_page(client, &cfg.leaderboard_url, page)
    })?;

    println!("Leaderboard crawl complete");
    println!("DB: {}", db_path.display());
    println!(
        "Pages: {} stored, {} fetch failures",
        summary.pages_stored, summary.page_failures
    );
    println!("Ranking rows upserted: {}", summary.rows_upserted);
    println!("New callsigns seeded: {}", summary.stubs_seeded);

    Ok(())
}
