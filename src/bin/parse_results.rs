use anyhow::Result;

use vota_harvest::result_parse;
use vota_harvest::store;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let db_path = store::default_db_path();
    let mut conn = store::open_db(&db_path)?;

    let summary = result_parse::run_parse(&mut conn)?;

    println!("Result parse complete");
    println!("DB: {}", db_path.display());
    println!(
        "Candidates: {} ({} parsed, {} left unparsed)",
        summary.candidates, summary.parsed, summary.failures
    );

    Ok(())
}
