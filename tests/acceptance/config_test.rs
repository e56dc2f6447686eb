//! Configuration file acceptance tests.

use super::common::{levels, run_manual};
use pulse_common::config::{ConfigError, OutputDriver, PatternMode, PulseConfig};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_config_file_drives_pattern() {
    let file = config_file(
        r#"
period = "20ms"
pin = 17
output = "simulated"

[pattern]
skip_every = 2
skip_count = 1

[realtime]
enabled = false
"#,
    );

    let config = PulseConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.pin, 17);
    assert_eq!(config.output, OutputDriver::Simulated);
    assert_eq!(config.timer_interval(), Duration::from_millis(10));
    assert_eq!(
        config.pattern_mode(),
        PatternMode::Skip {
            modulus: 5,
            length: 2
        }
    );

    let run = run_manual(&config, 10);
    // Ticks 5-6 held, tick 10 starts the next episode
    assert_eq!(levels(&run), [true, false, true, false, true, false, true]);
}

#[test]
fn test_malformed_file_is_parse_error() {
    let file = config_file("period = \"soon\"\n");
    let err = PulseConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PulseConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_zero_skip_count_rejected() {
    let file = config_file("[pattern]\nskip_every = 3\nskip_count = 0\n");
    let config = PulseConfig::from_file(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_rendered_config_reloads() {
    let mut config = PulseConfig::default();
    config.pattern.insert_every = Some(5);
    config.start_epoch = 1_700_000_000;
    config.diagnostics.duration = Duration::from_secs(3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pulse.toml");
    std::fs::write(&path, config.to_toml().unwrap()).unwrap();

    assert_eq!(PulseConfig::from_file(&path).unwrap(), config);
}
