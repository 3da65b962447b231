use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;
use rusqlite::{Connection, params};

use crate::leaderboard_crawl::RankingRow;
use crate::points_fetch::CallsignPoints;
use crate::result_parse::RoleFields;

const END_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn default_db_path() -> PathBuf {
    std::env::var("VOTA_DB")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("vota.sqlite"))
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS vota_points (
            callsign TEXT PRIMARY KEY,
            points INTEGER NULL,
            role TEXT NULL,
            role_abbrev TEXT NULL,
            end_date TEXT NULL,
            result_string TEXT NULL
        );
        CREATE TABLE IF NOT EXISTS vota_rankings (
            callsign TEXT PRIMARY KEY,
            world_rank INTEGER NOT NULL,
            usa_rank INTEGER NULL,
            state TEXT NULL,
            state_rank INTEGER NULL,
            qso_count INTEGER NOT NULL,
            point_count INTEGER NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Seeds a points stub per discovered callsign. Existing rows, fetched or
/// not, are left untouched. Returns how many stubs were new.
pub fn insert_callsign_stubs(conn: &mut Connection, rows: &[RankingRow]) -> Result<usize> {
    let tx = conn.transaction().context("begin stub transaction")?;
    let mut seeded = 0;
    for row in rows {
        seeded += tx
            .execute(
                "INSERT INTO vota_points (callsign) VALUES (?1) ON CONFLICT(callsign) DO NOTHING",
                params![row.callsign],
            )
            .with_context(|| format!("seed stub for {}", row.callsign))?;
    }
    tx.commit().context("commit stub transaction")?;
    Ok(seeded)
}

/// Upserts one page's ranking rows in a single transaction. If the bulk
/// transaction fails (a page can list the same callsign twice), every row is
/// re-applied in its own transaction so the last occurrence wins.
pub fn upsert_rankings(conn: &mut Connection, rows: &[RankingRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    if let Err(err) = upsert_rankings_bulk(conn, rows) {
        warn!("bulk rankings upsert failed ({err}), re-applying rows individually");
        for row in rows {
            let tx = conn.transaction().context("begin ranking row transaction")?;
            upsert_ranking_row(&tx, row)
                .with_context(|| format!("upsert ranking row for {}", row.callsign))?;
            tx.commit().context("commit ranking row transaction")?;
        }
    }
    Ok(())
}

fn upsert_rankings_bulk(conn: &mut Connection, rows: &[RankingRow]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    for row in rows {
        upsert_ranking_row(&tx, row)?;
    }
    tx.commit()
}

fn upsert_ranking_row(conn: &Connection, row: &RankingRow) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        INSERT INTO vota_rankings (
            callsign, world_rank, usa_rank, state, state_rank, qso_count, point_count
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(callsign) DO UPDATE SET
            world_rank = excluded.world_rank,
            usa_rank = excluded.usa_rank,
            state = excluded.state,
            state_rank = excluded.state_rank,
            qso_count = excluded.qso_count,
            point_count = excluded.point_count
        "#,
        params![
            row.callsign,
            row.world_rank,
            row.usa_rank,
            row.state,
            row.state_rank,
            row.qso_count,
            row.point_count,
        ],
    )
}

/// Random sample of callsigns that have never been fetched. The random order
/// keeps a permanently failing callsign from pinning the head of every batch.
pub fn select_unfetched_callsigns(conn: &Connection, limit: usize) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT callsign FROM vota_points
             WHERE points IS NULL AND result_string IS NULL
             ORDER BY RANDOM() LIMIT ?1",
        )
        .context("prepare unfetched callsigns query")?;
    let rows = stmt
        .query_map(params![limit as i64], |row| row.get::<_, String>(0))
        .context("query unfetched callsigns")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode callsign row")?);
    }
    Ok(out)
}

pub fn store_callsign_points(conn: &mut Connection, results: &[CallsignPoints]) -> Result<usize> {
    let tx = conn.transaction().context("begin points transaction")?;
    let mut changed = 0;
    for result in results {
        changed += tx
            .execute(
                "UPDATE vota_points SET points = ?2, result_string = ?3 WHERE callsign = ?1",
                params![result.callsign, result.points, result.result_string],
            )
            .with_context(|| format!("store points for {}", result.callsign))?;
    }
    tx.commit().context("commit points transaction")?;
    Ok(changed)
}

/// Rows eligible for the parse pass: fetched, scored, and not yet parsed.
/// Zero-point rows carry no role and are never candidates.
pub fn select_role_candidates(conn: &Connection) -> Result<Vec<CallsignPoints>> {
    let mut stmt = conn
        .prepare(
            "SELECT callsign, points, result_string FROM vota_points
             WHERE points != 0 AND role IS NULL AND result_string IS NOT NULL",
        )
        .context("prepare role candidates query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CallsignPoints {
                callsign: row.get(0)?,
                points: row.get(1)?,
                result_string: row.get(2)?,
            })
        })
        .context("query role candidates")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode role candidate row")?);
    }
    Ok(out)
}

pub fn store_role_fields(conn: &mut Connection, updates: &[RoleFields]) -> Result<usize> {
    let tx = conn.transaction().context("begin role transaction")?;
    let mut changed = 0;
    for fields in updates {
        changed += tx
            .execute(
                "UPDATE vota_points
                 SET points = ?2, role = ?3, role_abbrev = ?4, end_date = ?5
                 WHERE callsign = ?1",
                params![
                    fields.callsign,
                    fields.points,
                    fields.role,
                    fields.role_abbrev,
                    fields.end_date.format(END_DATE_FORMAT).to_string(),
                ],
            )
            .with_context(|| format!("store role for {}", fields.callsign))?;
    }
    tx.commit().context("commit role transaction")?;
    Ok(changed)
}
