use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::calc::{BiasRow, MarkRow, ScoreRow};

pub const DB_FILE: &str = "vpr.sqlite3";

/// The three source tables, loaded once per workspace selection and
/// immutable for the rest of the process lifetime.
pub struct Datasets {
    pub marks: Vec<MarkRow>,
    pub scores: Vec<ScoreRow>,
    pub bias: Vec<BiasRow>,
    pub loaded_at: DateTime<Utc>,
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE))?;

    // The ingest step normally creates these; an empty workspace is still a
    // valid one and resolves to empty-state responses.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            year INTEGER NOT NULL,
            grade INTEGER NOT NULL,
            subject TEXT NOT NULL,
            municipality TEXT NOT NULL,
            school TEXT NOT NULL,
            login TEXT NOT NULL,
            participants INTEGER NOT NULL,
            pct2 REAL NOT NULL,
            pct3 REAL NOT NULL,
            pct4 REAL NOT NULL,
            pct5 REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            year INTEGER NOT NULL,
            grade INTEGER NOT NULL,
            subject TEXT NOT NULL,
            login TEXT NOT NULL,
            participants INTEGER NOT NULL,
            points TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bias(
            year INTEGER NOT NULL,
            login TEXT NOT NULL,
            municipality TEXT NOT NULL,
            school TEXT NOT NULL,
            ru4 INTEGER NOT NULL DEFAULT 0,
            ma4 INTEGER NOT NULL DEFAULT 0,
            ru5 INTEGER NOT NULL DEFAULT 0,
            ma5 INTEGER NOT NULL DEFAULT 0,
            marker_count INTEGER
        )",
        [],
    )?;

    Ok(conn)
}

pub fn load_datasets(conn: &Connection) -> anyhow::Result<Datasets> {
    Ok(Datasets {
        marks: load_marks(conn)?,
        scores: load_scores(conn)?,
        bias: load_bias(conn)?,
        loaded_at: Utc::now(),
    })
}

fn load_marks(conn: &Connection) -> anyhow::Result<Vec<MarkRow>> {
    let mut stmt = conn.prepare(
        "SELECT year, grade, subject, municipality, school, login,
                participants, pct2, pct3, pct4, pct5
         FROM marks",
    )?;
    let rows: Vec<MarkRow> = stmt
        .query_map([], |r| {
            Ok(MarkRow {
                year: r.get(0)?,
                grade: r.get(1)?,
                subject: r.get(2)?,
                municipality: r.get(3)?,
                school: r.get(4)?,
                login: r.get(5)?,
                participants: r.get(6)?,
                pct2: r.get(7)?,
                pct3: r.get(8)?,
                pct4: r.get(9)?,
                pct5: r.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (i, row) in rows.iter().enumerate() {
        let at = || format!("marks row {} (login {})", i + 1, row.login);
        if row.login.trim().is_empty() {
            bail!("marks row {}: empty login", i + 1);
        }
        if row.year <= 0 || row.grade <= 0 {
            bail!("{}: year/grade must be positive", at());
        }
        if row.participants < 0 {
            bail!("{}: negative participant count", at());
        }
        for pct in [row.pct2, row.pct3, row.pct4, row.pct5] {
            // Values slightly above 100 survive the load; aggregation clamps.
            if !pct.is_finite() || pct < 0.0 {
                bail!("{}: mark percentage {} out of range", at(), pct);
            }
        }
    }
    Ok(rows)
}

fn load_scores(conn: &Connection) -> anyhow::Result<Vec<ScoreRow>> {
    let mut stmt = conn.prepare(
        "SELECT year, grade, subject, login, participants, points FROM scores",
    )?;
    let raw: Vec<(i64, i64, String, String, i64, String)> = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(raw.len());
    for (i, (year, grade, subject, login, participants, points_json)) in raw.into_iter().enumerate()
    {
        let at = || format!("scores row {} (login {})", i + 1, login);
        if login.trim().is_empty() {
            bail!("scores row {}: empty login", i + 1);
        }
        if year <= 0 || grade <= 0 {
            bail!("{}: year/grade must be positive", at());
        }
        if participants < 0 {
            bail!("{}: negative participant count", at());
        }
        let points = parse_points(&points_json).with_context(at)?;
        rows.push(ScoreRow {
            year,
            grade,
            subject,
            login,
            participants,
            points,
        });
    }
    Ok(rows)
}

/// The `points` column is a JSON object keyed by raw score point. A null
/// value is a missing cell in the source export and is dropped here; a key
/// that is present maps to an observed percentage.
fn parse_points(raw: &str) -> anyhow::Result<BTreeMap<u32, f64>> {
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(raw).context("points column is not a JSON object")?;

    let mut points = BTreeMap::new();
    for (key, value) in object {
        let point: u32 = key
            .parse()
            .with_context(|| format!("score point key '{}' is not an integer", key))?;
        if value.is_null() {
            continue;
        }
        let Some(pct) = value.as_f64() else {
            bail!("score point {} has a non-numeric value", point);
        };
        if !pct.is_finite() || pct < 0.0 {
            bail!("score point {} percentage {} out of range", point, pct);
        }
        points.insert(point, pct);
    }
    Ok(points)
}

fn load_bias(conn: &Connection) -> anyhow::Result<Vec<BiasRow>> {
    let mut stmt = conn.prepare(
        "SELECT year, login, municipality, school, ru4, ma4, ru5, ma5, marker_count FROM bias",
    )?;
    let raw: Vec<(i64, String, String, String, i64, i64, i64, i64, Option<i64>)> = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
                r.get(7)?,
                r.get(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(raw.len());
    for (i, (year, login, municipality, school, ru4, ma4, ru5, ma5, stored_count)) in
        raw.into_iter().enumerate()
    {
        if login.trim().is_empty() {
            bail!("bias row {}: empty login", i + 1);
        }
        if year <= 0 {
            bail!("bias row {} (login {}): year must be positive", i + 1, login);
        }
        let mut flags = [false; 4];
        for (slot, value) in flags.iter_mut().zip([ru4, ma4, ru5, ma5]) {
            *slot = match value {
                0 => false,
                1 => true,
                other => bail!(
                    "bias row {} (login {}): marker flag {} is not 0/1",
                    i + 1,
                    login,
                    other
                ),
            };
        }
        if let Some(count) = stored_count {
            if count < 0 {
                bail!(
                    "bias row {} (login {}): negative marker count",
                    i + 1,
                    login
                );
            }
        }
        // The export may precompute the count; derive it from the flags when
        // it does not.
        let marker_count =
            stored_count.unwrap_or_else(|| flags.iter().filter(|f| **f).count() as i64);
        rows.push(BiasRow {
            year,
            login,
            municipality,
            school,
            flags,
            marker_count,
        });
    }
    Ok(rows)
}
