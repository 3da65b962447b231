use chrono::NaiveDate;
use rusqlite::{Connection, params};

use vota_harvest::leaderboard_crawl::RankingRow;
use vota_harvest::points_fetch::CallsignPoints;
use vota_harvest::result_parse::RoleFields;
use vota_harvest::store;

fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    store::init_schema(&conn).expect("schema should apply");
    conn
}

fn ranking(callsign: &str, world_rank: i64, point_count: i64) -> RankingRow {
    RankingRow {
        callsign: callsign.to_string(),
        world_rank,
        usa_rank: None,
        state: None,
        state_rank: None,
        qso_count: 10,
        point_count,
    }
}

fn stored_points(conn: &Connection, callsign: &str) -> Option<i64> {
    conn.query_row(
        "SELECT points FROM vota_points WHERE callsign = ?1",
        params![callsign],
        |row| row.get(0),
    )
    .expect("points row should exist")
}

fn stored_world_rank(conn: &Connection, callsign: &str) -> i64 {
    conn.query_row(
        "SELECT world_rank FROM vota_rankings WHERE callsign = ?1",
        params![callsign],
        |row| row.get(0),
    )
    .expect("ranking row should exist")
}

#[test]
fn stub_insert_is_idempotent() {
    let mut conn = test_conn();
    let rows = vec![ranking("W1AW", 1, 100), ranking("K6XYZ", 2, 90)];
    assert_eq!(store::insert_callsign_stubs(&mut conn, &rows).unwrap(), 2);
    assert_eq!(store::insert_callsign_stubs(&mut conn, &rows).unwrap(), 0);
    assert_eq!(stored_points(&conn, "W1AW"), None);
}

#[test]
fn stub_insert_never_clears_fetched_points() {
    let mut conn = test_conn();
    let rows = vec![ranking("W1AW", 1, 100)];
    store::insert_callsign_stubs(&mut conn, &rows).unwrap();
    store::store_callsign_points(
        &mut conn,
        &[CallsignPoints {
            callsign: "W1AW".to_string(),
            points: 5,
            result_string: "W1AW counts for 5 points.".to_string(),
        }],
    )
    .unwrap();

    assert_eq!(store::insert_callsign_stubs(&mut conn, &rows).unwrap(), 0);
    assert_eq!(stored_points(&conn, "W1AW"), Some(5));
}

#[test]
fn rankings_upsert_overwrites_all_fields() {
    let mut conn = test_conn();
    let mut row = ranking("W1AW", 3, 100);
    row.usa_rank = Some(2);
    row.state_rank = Some(1);
    row.state = Some("CT".to_string());
    store::upsert_rankings(&mut conn, &[row.clone()]).unwrap();

    // A later crawl sees the row drop out of the state listings entirely.
    let updated = ranking("W1AW", 5, 120);
    store::upsert_rankings(&mut conn, &[updated]).unwrap();

    let (world_rank, usa_rank, state): (i64, Option<i64>, Option<String>) = conn
        .query_row(
            "SELECT world_rank, usa_rank, state FROM vota_rankings WHERE callsign = ?1",
            params!["W1AW"],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(world_rank, 5);
    assert_eq!(usa_rank, None);
    assert_eq!(state, None);
}

#[test]
fn rankings_reupsert_of_identical_rows_is_a_no_op() {
    let mut conn = test_conn();
    let rows = vec![ranking("W1AW", 1, 100), ranking("K6XYZ", 2, 90)];
    store::upsert_rankings(&mut conn, &rows).unwrap();
    store::upsert_rankings(&mut conn, &rows).unwrap();

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM vota_rankings", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(stored_world_rank(&conn, "W1AW"), 1);
    assert_eq!(stored_world_rank(&conn, "K6XYZ"), 2);
}

#[test]
fn duplicate_callsign_in_one_batch_is_last_write_wins() {
    let mut conn = test_conn();
    let rows = vec![ranking("W1AW", 1, 100), ranking("W1AW", 8, 42)];
    store::upsert_rankings(&mut conn, &rows).unwrap();
    assert_eq!(stored_world_rank(&conn, "W1AW"), 8);
}

#[test]
fn unfetched_selection_skips_fetched_rows_and_respects_limit() {
    let mut conn = test_conn();
    let rows = vec![
        ranking("W1AW", 1, 100),
        ranking("K6XYZ", 2, 90),
        ranking("G4ABC", 3, 80),
    ];
    store::insert_callsign_stubs(&mut conn, &rows).unwrap();

    let sample = store::select_unfetched_callsigns(&conn, 2).unwrap();
    assert_eq!(sample.len(), 2);

    store::store_callsign_points(
        &mut conn,
        &[CallsignPoints {
            callsign: "W1AW".to_string(),
            points: 5,
            result_string: "W1AW counts for 5 points.".to_string(),
        }],
    )
    .unwrap();

    let mut remaining = store::select_unfetched_callsigns(&conn, 10).unwrap();
    remaining.sort();
    assert_eq!(remaining, vec!["G4ABC".to_string(), "K6XYZ".to_string()]);
}

#[test]
fn role_candidates_exclude_zero_scores_and_parsed_rows() {
    let mut conn = test_conn();
    let rows = vec![
        ranking("AB1CDE", 1, 0),
        ranking("2E0OBO", 2, 90),
        ranking("G4ABC", 3, 80),
    ];
    store::insert_callsign_stubs(&mut conn, &rows).unwrap();
    store::store_callsign_points(
        &mut conn,
        &[
            CallsignPoints {
                callsign: "AB1CDE".to_string(),
                points: 0,
                result_string: "The call sign AB1CDE was not found in the points table."
                    .to_string(),
            },
            CallsignPoints {
                callsign: "2E0OBO".to_string(),
                points: 1,
                result_string:
                    "2E0OBO counts for 1 point because 2E0OBO has the role ARRL Member (MEM) through 2024-05-31 04:00:00."
                        .to_string(),
            },
        ],
    )
    .unwrap();

    // G4ABC is unfetched, AB1CDE is a zero score: only 2E0OBO qualifies.
    let candidates = store::select_role_candidates(&conn).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].callsign, "2E0OBO");

    let end_date = NaiveDate::from_ymd_opt(2024, 5, 31)
        .unwrap()
        .and_hms_opt(4, 0, 0)
        .unwrap();
    store::store_role_fields(
        &mut conn,
        &[RoleFields {
            callsign: "2E0OBO".to_string(),
            points: 1,
            role: "ARRL Member".to_string(),
            role_abbrev: "MEM".to_string(),
            end_date,
        }],
    )
    .unwrap();

    assert!(store::select_role_candidates(&conn).unwrap().is_empty());

    let (role, role_abbrev, end_date_text): (Option<String>, Option<String>, Option<String>) =
        conn.query_row(
            "SELECT role, role_abbrev, end_date FROM vota_points WHERE callsign = ?1",
            params!["2E0OBO"],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(role.as_deref(), Some("ARRL Member"));
    assert_eq!(role_abbrev.as_deref(), Some("MEM"));
    assert_eq!(end_date_text.as_deref(), Some("2024-05-31 04:00:00"));
}
