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

const DEFAULT_POINTS_URL: &str = "https://vota.arrl.org/callPoints.php";
const DEFAULT_BATCH_SIZE: usize = 10;
const MAX_ATTEMPTS: u32 = 5;
const RETRY_PAUSE_SECS: u64 = 5;
const BATCH_COOLDOWN_SECS: u64 = 60;
const STORE_PAUSE_SECS: u64 = 5;

static INFO_BLOCK: Lazy<Selector> = Lazy::new(|| Selector::parse(".info").unwrap());
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());
static STRONG: Lazy<Selector> = Lazy::new(|| Selector::parse("strong").unwrap());

static NOT_FOUND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"was not found in the points table\.$").unwrap());

/// One fetched points result, stored verbatim alongside the parsed score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallsignPoints {
    pub callsign: String,
    pub points: i64,
    pub result_string: String,
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub points_url: String,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub retry_pause: Duration,
    pub batch_cooldown: Duration,
    pub store_pause: Duration,
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        let points_url = env::var("VOTA_POINTS_URL")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| DEFAULT_POINTS_URL.to_string());
        let batch_size = env::var("VOTA_BATCH_SIZE")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_BATCH_SIZE)
            .max(1);
        Self {
            points_url,
            batch_size,
            max_attempts: MAX_ATTEMPTS,
            retry_pause: Duration::from_secs(RETRY_PAUSE_SECS),
            batch_cooldown: Duration::from_secs(BATCH_COOLDOWN_SECS),
            store_pause: Duration::from_secs(STORE_PAUSE_SECS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    pub batches_completed: usize,
    pub batches_abandoned: usize,
    pub callsigns_stored: usize,
}

#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Completed(Vec<CallsignPoints>),
    Abandoned { callsign: String },
}

/// Extracts the points result from one response body. `None` means the page
/// had nothing usable (missing info block, missing result paragraph, or a
/// result shape outside the known grammar) — typically a formatting change
/// or a throttling page, so the caller treats it as a transient miss.
pub fn parse_points_response(raw: &str, callsign: &str) -> Option<CallsignPoints> {
    let document = Html::parse_document(raw);
    let info = document.select(&INFO_BLOCK).next()?;
    let paragraph = info.select(&PARAGRAPH).next()?;
    let text = paragraph.text().collect::<String>();

    if NOT_FOUND_RE.is_match(&text) {
        // Not listed in the points table: a definitive zero, not a failure.
        return Some(CallsignPoints {
            callsign: callsign.to_string(),
            points: 0,
            result_string: text,
        });
    }

    let second_strong = paragraph.select(&STRONG).nth(1)?;
    let points_text = second_strong.text().collect::<String>();
    let points = points_text.split_whitespace().next()?.parse::<i64>().ok()?;
    Some(CallsignPoints {
        callsign: callsign.to_string(),
        points,
        result_string: text,
    })
}

pub fn fetch_callsign_points(
    client: &Client,
    points_url: &str,
    callsign: &str,
) -> Result<Option<CallsignPoints>> {
    let resp = client
        .post(points_url)
        .form(&[("callsign", callsign)])
        .send()
        .with_context(|| format!("points request for {callsign}"))?;
    let status = resp.status();
    if !status.is_success() {
        bail!("points endpoint returned http {status} for {callsign}");
    }
    let body = resp
        .text()
        .with_context(|| format!("read points response for {callsign}"))?;
    Ok(parse_points_response(&body, callsign))
}

/// Fetches every callsign in the batch, retrying each up to `max_attempts`
/// times. One exhausted callsign sinks the whole batch — results already
/// fetched for earlier callsigns are discarded with it, and later callsigns
/// are never attempted.
pub fn fetch_batch<F>(callsigns: &[String], cfg: &HarvestConfig, mut fetch: F) -> BatchOutcome
where
    F: FnMut(&str) -> Result<Option<CallsignPoints>>,
{
    let mut results = Vec::with_capacity(callsigns.len());
    for callsign in callsigns {
        let mut fetched = None;
        for attempt in 1..=cfg.max_attempts {
            match fetch(callsign) {
                Ok(Some(result)) => {
                    fetched = Some(result);
                    break;
                }
                Ok(None) => warn!(
                    "no usable points response for {callsign} (attempt {attempt}/{})",
                    cfg.max_attempts
                ),
                Err(err) => warn!(
                    "problem while fetching {callsign} (attempt {attempt}/{}): {err:#}",
                    cfg.max_attempts
                ),
            }
            if attempt < cfg.max_attempts {
                thread::sleep(cfg.retry_pause);
            }
        }
        let Some(result) = fetched else {
            return BatchOutcome::Abandoned {
                callsign: callsign.clone(),
            };
        };
        results.push(result);
    }
    BatchOutcome::Completed(results)
}

/// Outer harvest loop: pull a random batch of unfetched callsigns, fetch it,
/// store completed batches in one transaction, and cool down after abandoned
/// ones. Terminates once no unfetched callsigns remain.
pub fn run_harvest<F>(
    conn: &mut Connection,
    cfg: &HarvestConfig,
    mut fetch: F,
) -> Result<HarvestSummary>
where
    F: FnMut(&str) -> Result<Option<CallsignPoints>>,
{
    let mut summary = HarvestSummary::default();
    loop {
        let callsigns = store::select_unfetched_callsigns(conn, cfg.batch_size)?;
        if callsigns.is_empty() {
            info!("no callsigns left to fetch");
            break;
        }
        info!("fetching a batch of {} callsigns", callsigns.len());
        match fetch_batch(&callsigns, cfg, &mut fetch) {
            BatchOutcome::Completed(results) => {
                let stored = store::store_callsign_points(conn, &results)?;
                summary.batches_completed += 1;
                summary.callsigns_stored += stored;
                info!("stored {stored} callsigns");
                thread::sleep(cfg.store_pause);
            }
            BatchOutcome::Abandoned { callsign } => {
                summary.batches_abandoned += 1;
                warn!(
                    "gave up on batch after {} failed attempts for {callsign}, sleeping {}s",
                    cfg.max_attempts,
                    cfg.batch_cooldown.as_secs()
                );
                thread::sleep(cfg.batch_cooldown);
            }
        }
    }
    Ok(summary)
}
