use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use rusqlite::Connection;
use scraper::{Html, Selector};

use crate::store;

const DEFAULT_LEADERBOARD_URL: &str = "https://vota.arrl.org/leaderboard.php";
// Known page count of the leaderboard; revised by hand as the event grows.
const DEFAULT_LAST_PAGE: u32 = 722;
const PAGE_PAUSE_SECS: u64 = 5;
const FAILURE_BACKOFF_SECS: u64 = 300;

static LEAD_TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table.leadTable").unwrap());
static TABLE_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static ROW_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static ROW_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());

static USA_RANK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9]+) \(USA\)$").unwrap());
static STATE_RANK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+) \(([A-Z]{2})\)$").unwrap());

#[derive(Debug, Clone)]
pub struct RankingRow {
    pub callsign: String,
    pub world_rank: i64,
    pub usa_rank: Option<i64>,
    pub state: Option<String>,
    pub state_rank: Option<i64>,
    pub qso_count: i64,
    pub point_count: i64,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub leaderboard_url: String,
    pub first_page: u32,
    pub last_page: u32,
    pub page_pause: Duration,
    pub failure_backoff: Duration,
}

impl CrawlConfig {
    pub fn from_env() -> Self {
        let leaderboard_url = env::var("VOTA_LEADERBOARD_URL")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| DEFAULT_LEADERBOARD_URL.to_string());
        let first_page = env_u32("VOTA_FIRST_PAGE", 1).max(1);
        let last_page = env_u32("VOTA_LAST_PAGE", DEFAULT_LAST_PAGE).max(first_page);
        Self {
            leaderboard_url,
            first_page,
            last_page,
            page_pause: Duration::from_secs(PAGE_PAUSE_SECS),
            failure_backoff: Duration::from_secs(FAILURE_BACKOFF_SECS),
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub pages_stored: usize,
    pub page_failures: usize,
    pub rows_upserted: usize,
    pub stubs_seeded: usize,
}

/// Extracts every ranking row from one leaderboard page. A page without the
/// leaderboard table is malformed beyond retrying and fails the crawl.
pub fn parse_leaderboard_page(raw: &str) -> Result<Vec<RankingRow>> {
    let document = Html::parse_document(raw);
    let table = document
        .select(&LEAD_TABLE)
        .next()
        .context("leaderboard table (table.leadTable) not found")?;

    let mut rows = Vec::new();
    for tr in table.select(&TABLE_ROW) {
        // Header rows carry no callsign link.
        let Some(link) = tr.select(&ROW_LINK).next() else {
            continue;
        };
        let callsign = link.text().collect::<String>().trim().to_string();
        let cells = tr
            .select(&ROW_CELL)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect::<Vec<_>>();
        if cells.len() < 6 {
            bail!("unexpected {}-cell row for {callsign}", cells.len());
        }

        // Overall Rank | Call Sign | Country Rank | State Rank | QSOs | Points
        let world_rank = cells[0]
            .parse::<i64>()
            .with_context(|| format!("world rank for {callsign}"))?;
        let qso_count = cells[4]
            .parse::<i64>()
            .with_context(|| format!("qso count for {callsign}"))?;
        let point_count = cells[5]
            .parse::<i64>()
            .with_context(|| format!("point count for {callsign}"))?;
        let (usa_rank, state_rank, state) = parse_region_ranks(&cells[2], &cells[3]);

        rows.push(RankingRow {
            callsign,
            world_rank,
            usa_rank,
            state,
            state_rank,
            qso_count,
            point_count,
        });
    }
    Ok(rows)
}

/// Splits the country-rank and state-rank cells into `(usa_rank, state_rank,
/// state)`. Non-US rows sometimes carry stray text in the state column, so
/// the state fields are only kept when the strict `<rank> (<state>)` shape
/// matches inside a US row.
fn parse_region_ranks(
    country_cell: &str,
    state_cell: &str,
) -> (Option<i64>, Option<i64>, Option<String>) {
    let Some(caps) = USA_RANK_RE.captures(country_cell) else {
        return (None, None, None);
    };
    let Ok(usa_rank) = caps[1].parse::<i64>() else {
        return (None, None, None);
    };
    let state = STATE_RANK_RE.captures(state_cell).and_then(|caps| {
        let state_rank = caps[1].parse::<i64>().ok()?;
        Some((state_rank, caps[2].to_string()))
    });
    match state {
        Some((state_rank, state)) => (Some(usa_rank), Some(state_rank), Some(state)),
        None => (Some(usa_rank), None, None),
    }
}

/// One leaderboard page read. A request error or non-success status is a
/// transient miss (`Ok(None)`) for the crawl loop to back off on; a body
/// without the expected table propagates as an error.
pub fn fetch_leaderboard_page(
    client: &Client,
    base_url: &str,
    page: u32,
) -> Result<Option<Vec<RankingRow>>> {
    let url = format!("{base_url}?page={page}");
    let resp = match client.get(&url).send() {
        Ok(resp) => resp,
        Err(err) => {
            warn!("leaderboard request failed for page {page}: {err}");
            return Ok(None);
        }
    };
    let status = resp.status();
    if !status.is_success() {
        warn!("leaderboard page {page} returned http {status}");
        return Ok(None);
    }
    let body = match resp.text() {
        Ok(body) => body,
        Err(err) => {
            warn!("failed reading leaderboard page {page}: {err}");
            return Ok(None);
        }
    };
    parse_leaderboard_page(&body)
        .map(Some)
        .with_context(|| format!("parse leaderboard page {page}"))
}

enum CrawlStep {
    Fetch(u32),
    Backoff(u32),
    Done,
}

/// Walks pages `first_page..=last_page`. A stored page advances the counter
/// after the politeness pause; a missed page backs off and re-attempts the
/// same page number.
pub fn run_crawl<F>(
    conn: &mut Connection,
    cfg: &CrawlConfig,
    mut fetch_page: F,
) -> Result<CrawlSummary>
where
    F: FnMut(u32) -> Result<Option<Vec<RankingRow>>>,
{
    let mut summary = CrawlSummary::default();
    let mut step = CrawlStep::Fetch(cfg.first_page);
    loop {
        step = match step {
            CrawlStep::Fetch(page) => {
                info!("fetching leaderboard page {page}/{}", cfg.last_page);
                match fetch_page(page)? {
                    Some(rows) => {
                        summary.stubs_seeded += store::insert_callsign_stubs(conn, &rows)?;
                        store::upsert_rankings(conn, &rows)?;
                        summary.pages_stored += 1;
                        summary.rows_upserted += rows.len();
                        info!("stored page {page} ({} rows)", rows.len());
                        if page >= cfg.last_page {
                            CrawlStep::Done
                        } else {
                            thread::sleep(cfg.page_pause);
                            CrawlStep::Fetch(page + 1)
                        }
                    }
                    None => {
                        warn!(
                            "failed to grab page {page}, sleeping {}s",
                            cfg.failure_backoff.as_secs()
                        );
                        summary.page_failures += 1;
                        CrawlStep::Backoff(page)
                    }
                }
            }
            CrawlStep::Backoff(page) => {
                thread::sleep(cfg.failure_backoff);
                CrawlStep::Fetch(page)
            }
            CrawlStep::Done => break,
        };
    }
    Ok(summary)
}
