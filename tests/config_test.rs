//! Loading layered settings from TOML files.

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use wx_daq::config::Settings;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_file_overrides_defaults() {
    let file = write_config(
        r#"
        [application]
        log_level = "debug"

        [storage]
        log_dir = "/srv/wx"
        rotation_format = "%Y_%m_%d_%H"

        [network]
        control_port = 9100
        viz_broadcast = true

        [acquisition]
        standard_period_secs = 2.0
        "#,
    );
    let settings = Settings::load_from(file.path()).unwrap();
    settings.validate().unwrap();

    assert_eq!(settings.application.log_level, "debug");
    assert_eq!(settings.storage.log_dir.to_str(), Some("/srv/wx"));
    assert_eq!(settings.storage.rotation_format, "%Y_%m_%d_%H");
    assert_eq!(settings.network.control_port, 9100);
    assert!(settings.network.viz_broadcast);
    assert_eq!(settings.standard_period(), Duration::from_secs(2));

    // untouched keys keep their defaults
    let defaults = Settings::default();
    assert_eq!(settings.network.status_port, defaults.network.status_port);
    assert_eq!(settings.storage.fieldnames, defaults.storage.fieldnames);
    assert_eq!(settings.acquisition.window_capacity, 32);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings.storage, Settings::default().storage);
    assert_eq!(settings.acquisition, Settings::default().acquisition);
}

#[test]
fn test_wrong_type_is_a_configuration_error() {
    let file = write_config(
        r#"
        [network]
        control_port = "not a port"
        "#,
    );
    let err = Settings::load_from(file.path()).err().unwrap();
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn test_semantic_errors_surface_from_validate() {
    let file = write_config(
        r#"
        [storage]
        current_link = "same.csv"
        previous_link = "same.csv"
        "#,
    );
    let settings = Settings::load_from(file.path()).unwrap();
    let err = settings.validate().err().unwrap();
    assert_eq!(err.exit_code(), 5);
    assert!(err.to_string().contains("must differ"));
}

#[test]
fn test_bad_rotation_pattern_is_rejected_before_use() {
    let file = write_config(
        r#"
        [storage]
        rotation_format = "%Y_%Q"
        "#,
    );
    let settings = Settings::load_from(file.path()).unwrap();
    let err = settings.validate().err().unwrap();
    assert_eq!(err.exit_code(), 5);
    assert!(err.to_string().contains("rotation_format"));
}
