//! Config discovery and environment overrides. These mutate process env,
//! so every test is serialized.

mod util;

use std::path::PathBuf;

use olap_explorer::config::{ConfigError, OlapConfig};
use serial_test::serial;

use util::{EnvGuard, WarehouseFixture};

fn clear_overrides() -> Vec<EnvGuard> {
    ["OLAP_WAREHOUSE_PATH", "OLAP_SCHEMA", "OLAP_MAX_CONNECTIONS"]
        .into_iter()
        .map(EnvGuard::unset)
        .collect()
}

#[test]
#[serial]
fn config_path_honours_xdg_config_home() {
    let fixture = WarehouseFixture::new();
    let _xdg = EnvGuard::set("XDG_CONFIG_HOME", fixture.dir().to_string_lossy());
    assert_eq!(
        OlapConfig::config_path().unwrap(),
        fixture.dir().join("olap-explorer").join("config.toml")
    );
}

#[test]
#[serial]
fn load_reads_file_then_applies_env() {
    let fixture = WarehouseFixture::new();
    let _clear = clear_overrides();
    let _xdg = EnvGuard::set("XDG_CONFIG_HOME", fixture.dir().to_string_lossy());
    let dir = fixture.dir().join("olap-explorer");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("config.toml"),
        "[warehouse]\npath = \"/from/file.db\"\nmax_connections = 2\n\n[operations]\ndice_limit = 5\n",
    )
    .unwrap();

    let config = OlapConfig::load().unwrap();
    assert_eq!(config.warehouse.path, PathBuf::from("/from/file.db"));
    assert_eq!(config.warehouse.max_connections, 2);
    assert_eq!(config.operations.dice_limit, 5);

    let _path = EnvGuard::set("OLAP_WAREHOUSE_PATH", "/from/env.db");
    let _max = EnvGuard::set("OLAP_MAX_CONNECTIONS", "6");
    let config = OlapConfig::load().unwrap();
    assert_eq!(config.warehouse.path, PathBuf::from("/from/env.db"));
    assert_eq!(config.warehouse.max_connections, 6);
    assert_eq!(config.operations.dice_limit, 5);
}

#[test]
#[serial]
fn missing_file_gives_defaults() {
    let fixture = WarehouseFixture::new();
    let _clear = clear_overrides();
    let config = OlapConfig::load_from(&fixture.dir().join("none.toml")).unwrap();
    assert_eq!(config, OlapConfig::default());
}

#[test]
#[serial]
fn invalid_env_schema_is_rejected() {
    let fixture = WarehouseFixture::new();
    let _clear = clear_overrides();
    let _schema = EnvGuard::set("OLAP_SCHEMA", "not valid");
    let err = OlapConfig::load_from(&fixture.dir().join("none.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
#[serial]
fn schema_override_changes_qualification() {
    let fixture = WarehouseFixture::new();
    let _clear = clear_overrides();
    let _schema = EnvGuard::set("OLAP_SCHEMA", "mart");
    let mut config = OlapConfig::load_from(&fixture.dir().join("none.toml")).unwrap();
    config.warehouse.path = fixture.path.clone();
    let dispatcher = olap_explorer::olap::Dispatcher::open(&config).unwrap();
    let query = dispatcher.explain("roll-up").unwrap();
    assert!(query.sql.contains("FROM mart.fact_title_rating f"));
    assert!(dispatcher.run("roll-up").unwrap().is_empty());
}
