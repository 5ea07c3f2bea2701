use assert_matches::assert_matches;

use dlsite_manager::config::{Config, ConfigLoader, DEFAULT_WATCHED_DIR, Endpoints};
use dlsite_manager::error::ManagerError;

#[test]
fn defaults_apply_to_empty_config() {
    let settings = ConfigLoader::resolve_config(Config::default());
    assert_eq!(settings.schema_version, 1);
    assert_eq!(settings.watched_dir, DEFAULT_WATCHED_DIR);
    assert_eq!(settings.endpoints, Endpoints::default());
    assert_matches!(settings.management_dir(), Err(ManagerError::MissingManagementDir));
}

#[test]
fn blank_values_count_as_unset() {
    let settings = ConfigLoader::resolve_config(Config {
        management_dir: Some("  ".to_string()),
        watched_dir: Some(String::new()),
        ..Config::default()
    });
    assert!(settings.management_dir.is_none());
    assert_eq!(settings.watched_dir, DEFAULT_WATCHED_DIR);
}

#[test]
fn missing_file_is_empty_config() {
    let temp = tempfile::tempdir().unwrap();
    let config = ConfigLoader::load(&temp.path().join("config.json")).unwrap();
    assert!(config.management_dir.is_none());
}

#[test]
fn save_then_load_keeps_partial_endpoints() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nested").join("config.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"{
            "management_dir": "/srv/works",
            "endpoints": {"download": "http://127.0.0.1/dl?w={workno}"}
        }"#,
    )
    .unwrap();

    let settings = ConfigLoader::resolve(&path).unwrap();
    assert_eq!(settings.management_dir().unwrap().as_str(), "/srv/works");
    let id = "RJ01".parse().unwrap();
    assert_eq!(settings.endpoints.download_url(&id), "http://127.0.0.1/dl?w=RJ01");
    assert_eq!(settings.endpoints.login, Endpoints::default().login);

    let mut config = ConfigLoader::load(&path).unwrap();
    config.watched_dir = Some("done".to_string());
    ConfigLoader::save(&path, &config).unwrap();
    let reloaded = ConfigLoader::resolve(&path).unwrap();
    assert_eq!(reloaded.watched_dir, "done");
    assert!(!temp.path().join("nested").join("config.json.tmp").exists());
}

#[test]
fn invalid_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_matches!(ConfigLoader::load(&path), Err(ManagerError::ConfigParse(_)));
}
