use anyhow::Result;

use vota_harvest::http_client::http_client;
use vota_harvest::points_fetch::{self, HarvestConfig};
use vota_harvest::store;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = HarvestConfig::from_env();
    let db_path = store::default_db_path();
    let mut conn = store::open_db(&db_path)?;
    let client = http_client()?;

    let summary = points_fetch::run_harvest(&mut conn, &cfg, |callsign| {
        points_fetch::fetch_callsign_points(client, &cfg.points_url, callsign)
    })?;

    println!("Points harvest complete");
    println!("DB: {}", db_path.display());
    println!(
        "Batches: {} completed, {} abandoned",
        summary.batches_completed, summary.batches_abandoned
    );
    println!("Callsigns stored: {}", summary.callsigns_stored);

    Ok(())
}
