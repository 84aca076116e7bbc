//! In-crate warehouse fixture for unit tests.

use std::path::PathBuf;

use rusqlite::{Connection, params};
use tempfile::TempDir;

use crate::config::WarehouseConfig;

pub(crate) const WAREHOUSE_DDL: &str = "
CREATE TABLE dim_title (
    title_key INTEGER PRIMARY KEY,
    primary_title TEXT NOT NULL,
    title_type TEXT NOT NULL,
    start_year INTEGER
);
CREATE TABLE dim_genre (genre_key INTEGER PRIMARY KEY, genre_code TEXT NOT NULL);
CREATE TABLE dim_region (region_key INTEGER PRIMARY KEY, region_code TEXT NOT NULL);
CREATE TABLE bridge_title_genre (title_key INTEGER NOT NULL, genre_key INTEGER NOT NULL);
CREATE TABLE bridge_title_region (title_key INTEGER NOT NULL, region_key INTEGER NOT NULL);
CREATE TABLE fact_title_rating (
    title_key INTEGER PRIMARY KEY,
    average_rating REAL,
    num_votes INTEGER
);
";

/// Temporary warehouse file, removed on drop.
pub(crate) struct Warehouse {
    _dir: TempDir,
    pub path: PathBuf,
}

impl Warehouse {
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warehouse.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(WAREHOUSE_DDL).unwrap();
        Self { _dir: dir, path }
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }

    pub fn config(&self) -> WarehouseConfig {
        WarehouseConfig::at(&self.path)
    }

    /// Insert a title with its rating row and genre/region links.
    pub fn title(
        &self,
        key: i64,
        title: &str,
        kind: &str,
        year: Option<i64>,
        rating: Option<f64>,
        votes: i64,
        genres: &[&str],
        regions: &[&str],
    ) -> &Self {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO dim_title (title_key, primary_title, title_type, start_year)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, title, kind, year],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO fact_title_rating (title_key, average_rating, num_votes)
             VALUES (?1, ?2, ?3)",
            params![key, rating, votes],
        )
        .unwrap();
        for genre in genres {
            let genre_key = code_key(&conn, "dim_genre", "genre_key", "genre_code", genre);
            conn.execute(
                "INSERT INTO bridge_title_genre (title_key, genre_key) VALUES (?1, ?2)",
                params![key, genre_key],
            )
            .unwrap();
        }
        for region in regions {
            let region_key = code_key(&conn, "dim_region", "region_key", "region_code", region);
            conn.execute(
                "INSERT INTO bridge_title_region (title_key, region_key) VALUES (?1, ?2)",
                params![key, region_key],
            )
            .unwrap();
        }
        self
    }
}

fn code_key(conn: &Connection, table: &str, key: &str, column: &str, code: &str) -> i64 {
    let existing = conn
        .query_row(
            &format!("SELECT {key} FROM {table} WHERE {column} = ?1"),
            [code],
            |row| row.get(0),
        )
        .ok();
    if let Some(found) = existing {
        return found;
    }
    conn.execute(&format!("INSERT INTO {table} ({column}) VALUES (?1)"), [code])
        .unwrap();
    conn.last_insert_rowid()
}
