use std::time::Duration;

use assert_matches::assert_matches;

use prodfetch::config::{Config, ConfigLoader, DEFAULT_API_BASE_URL, LoadPolicy};
use prodfetch::error::CrawlError;

#[test]
fn partial_config_keeps_remaining_defaults() {
    let config = Config {
        output: Some("out/results.tsv".to_string()),
        concurrency: Some(8),
        backoff_secs: Some(0),
        dedupe_input: Some(false),
        ..Config::default()
    };

    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.output.as_str(), "out/results.tsv");
    assert_eq!(resolved.input.as_str(), "product_ids.csv");
    assert_eq!(resolved.error_log.as_str(), "errors.log");
    assert_eq!(resolved.api_base_url, DEFAULT_API_BASE_URL);
    assert_eq!(resolved.concurrency, 8);
    assert_eq!(resolved.backoff_unit, Duration::ZERO);
    assert_eq!(resolved.load_policy, LoadPolicy::KeepAll);
}

#[test]
fn zero_limits_are_rejected() {
    for config in [
        Config {
            retries: Some(0),
            ..Config::default()
        },
        Config {
            concurrency: Some(0),
            ..Config::default()
        },
        Config {
            batch_size: Some(0),
            ..Config::default()
        },
        Config {
            timeout_secs: Some(0),
            ..Config::default()
        },
    ] {
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(CrawlError::InvalidConfig(_))
        );
    }
}

#[test]
fn loads_json_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("prodfetch.json");
    std::fs::write(
        &path,
        r#"{"input": "ids.tsv", "retries": 3, "batch_size": 100, "retry_failures": true}"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.input.as_str(), "ids.tsv");
    assert_eq!(resolved.retries, 3);
    assert_eq!(resolved.batch_size, 100);
    assert!(resolved.retry_failures);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(CrawlError::ConfigRead(_))
    );
}

#[test]
fn malformed_json_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("prodfetch.json");
    std::fs::write(&path, "{\"retries\": \"many\"}").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(CrawlError::ConfigParse(_))
    );
}
