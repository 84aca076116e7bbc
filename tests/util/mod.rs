use std::path::{Path, PathBuf};
use std::sync::Arc;

use olap_explorer::config::{OlapConfig, WarehouseConfig};
use olap_explorer::olap::Dispatcher;
use rusqlite::{Connection, params};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
pub struct EnvGuard {
    key: String,
    prev: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, val: impl AsRef<str>) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::set_var(key, val.as_ref()) };
        Self {
            key: key.to_string(),
            prev,
        }
    }

    pub fn unset(key: &str) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::remove_var(key) };
        Self {
            key: key.to_string(),
            prev,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => unsafe { std::env::set_var(&self.key, v) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

const WAREHOUSE_DDL: &str = "
CREATE TABLE dim_title (
    title_key INTEGER PRIMARY KEY,
    primary_title TEXT NOT NULL,
    title_type TEXT NOT NULL,
    start_year INTEGER
);
CREATE TABLE dim_genre (genre_key INTEGER PRIMARY KEY, genre_code TEXT NOT NULL UNIQUE);
CREATE TABLE dim_region (region_key INTEGER PRIMARY KEY, region_code TEXT NOT NULL UNIQUE);
CREATE TABLE bridge_title_genre (
    title_key INTEGER NOT NULL,
    genre_key INTEGER NOT NULL,
    PRIMARY KEY (title_key, genre_key)
);
CREATE TABLE bridge_title_region (
    title_key INTEGER NOT NULL,
    region_key INTEGER NOT NULL,
    PRIMARY KEY (title_key, region_key)
);
CREATE TABLE fact_title_rating (
    title_key INTEGER PRIMARY KEY,
    average_rating REAL,
    num_votes INTEGER NOT NULL
);
";

/// One title row plus its fact and bridge rows.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Title {
    pub name: String,
    pub kind: String,
    pub year: Option<i64>,
    pub rating: Option<f64>,
    pub votes: i64,
    pub genres: Vec<String>,
    pub regions: Vec<String>,
}

#[allow(dead_code)]
impl Title {
    pub fn new(name: &str, rating: f64, votes: i64) -> Self {
        Self {
            name: name.into(),
            kind: "movie".into(),
            year: Some(2000),
            rating: Some(rating),
            votes,
            genres: Vec::new(),
            regions: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn year(mut self, year: Option<i64>) -> Self {
        self.year = year;
        self
    }

    pub fn unrated(mut self) -> Self {
        self.rating = None;
        self
    }

    pub fn genres(mut self, genres: &[&str]) -> Self {
        self.genres = genres.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn regions(mut self, regions: &[&str]) -> Self {
        self.regions = regions.iter().map(|r| r.to_string()).collect();
        self
    }
}

/// A warehouse file in a temp dir, loaded through the same tables the
/// dispatcher queries.
#[allow(dead_code)]
pub struct WarehouseFixture {
    dir: TempDir,
    pub path: PathBuf,
    next_key: i64,
}

#[allow(dead_code)]
impl WarehouseFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("warehouse.db");
        let conn = Connection::open(&path).expect("open warehouse");
        conn.execute_batch(WAREHOUSE_DDL).expect("create schema");
        Self {
            dir,
            path,
            next_key: 1,
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.path).expect("open warehouse")
    }

    pub fn add(&mut self, title: Title) -> i64 {
        let key = self.next_key;
        self.next_key += 1;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO dim_title (title_key, primary_title, title_type, start_year)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, title.name, title.kind, title.year],
        )
        .expect("insert title");
        conn.execute(
            "INSERT INTO fact_title_rating (title_key, average_rating, num_votes)
             VALUES (?1, ?2, ?3)",
            params![key, title.rating, title.votes],
        )
        .expect("insert fact");
        for genre in &title.genres {
            let genre_key = code_key(&conn, "dim_genre", "genre_code", genre);
            conn.execute(
                "INSERT INTO bridge_title_genre (title_key, genre_key) VALUES (?1, ?2)",
                params![key, genre_key],
            )
            .expect("insert genre bridge");
        }
        for region in &title.regions {
            let region_key = code_key(&conn, "dim_region", "region_code", region);
            conn.execute(
                "INSERT INTO bridge_title_region (title_key, region_key) VALUES (?1, ?2)",
                params![key, region_key],
            )
            .expect("insert region bridge");
        }
        key
    }

    pub fn with(mut self, titles: impl IntoIterator<Item = Title>) -> Self {
        for title in titles {
            self.add(title);
        }
        self
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig::at(&self.path)
    }

    pub fn config(&self) -> OlapConfig {
        OlapConfig {
            warehouse: self.warehouse_config(),
            ..Default::default()
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::open(&self.config()).expect("open dispatcher")
    }
}

fn code_key(conn: &Connection, table: &str, column: &str, code: &str) -> i64 {
    conn.execute(
        &format!("INSERT OR IGNORE INTO {table} ({column}) VALUES (?1)"),
        [code],
    )
    .expect("insert code");
    conn.query_row(
        &format!("SELECT rowid FROM {table} WHERE {column} = ?1"),
        [code],
        |row| row.get(0),
    )
    .expect("code key")
}
