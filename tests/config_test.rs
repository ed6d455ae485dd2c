//! Configuration loading from files and the environment

use std::io::Write;
use std::path::Path;

use feedmix::config::Config;
use feedmix::error::{ErrorCategory, FeedErrorTrait};
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_load_from_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[retrieval]
article_limit = 30
min_sources = 4

[health]
max_consecutive_failures = 3
quarantine_duration_secs = 600

[logging]
format = "json"
"#
    )
    .unwrap();

    let config = assert_ok!(Config::from_file(file.path()));
    assert_eq!(config.retrieval.article_limit, 30);
    assert_eq!(config.retrieval.min_sources, 4);
    assert_eq!(config.retrieval.max_per_source, 5);
    assert_eq!(config.health.max_consecutive_failures, 3);
    assert_eq!(config.health.quarantine_duration_secs, 600);
    assert_eq!(config.logging.format, "json");
    assert_ok!(config.validate());
}

#[test]
fn test_sample_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("feedmix.toml");
    let config = assert_ok!(Config::from_file(&path));
    assert_ok!(config.validate());
    assert_eq!(config, Config::default());
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = assert_err!(Config::from_file(&dir.path().join("absent.toml")));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn test_out_of_range_file_fails_validation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[retrieval]\nstrategy_timeout_ms = 20000\nglobal_timeout_ms = 10000").unwrap();

    let config = assert_ok!(Config::from_file(file.path()));
    let err = assert_err!(config.validate());
    assert_eq!(err.category(), ErrorCategory::Config);
}

// Environment is process-wide, so every env case lives in one test
#[test]
fn test_environment_overrides() {
    std::env::set_var("FEEDMIX_ARTICLE_LIMIT", "12");
    std::env::set_var("FEEDMIX_QUARANTINE_SECS", "90");
    let config = assert_ok!(Config::from_env());
    assert_eq!(config.retrieval.article_limit, 12);
    assert_eq!(config.health.quarantine_duration_secs, 90);
    assert_eq!(config.diversity, Config::default().diversity);

    std::env::set_var("FEEDMIX_ARTICLE_LIMIT", "plenty");
    let err = assert_err!(Config::from_env());
    assert_eq!(err.category(), ErrorCategory::Config);
    assert!(err.to_string().contains("FEEDMIX_ARTICLE_LIMIT"));

    std::env::remove_var("FEEDMIX_ARTICLE_LIMIT");
    std::env::remove_var("FEEDMIX_QUARANTINE_SECS");
    assert_eq!(assert_ok!(Config::from_env()), Config::default());
}
