//! Configuration loading from disk

use packethunt::config::SimConfig;
use packethunt::simulator::hosts::HostRole;
use packethunt::{HuntError, Simulator};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut config = SimConfig::default();
    config.interface.name = "hunt0".to_string();
    config.ftp.password = "s3cret".to_string();

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(config.to_toml_string().unwrap().as_bytes()).unwrap();

    let loaded = SimConfig::from_toml_file(file.path()).unwrap();
    loaded.validate().unwrap();
    assert_eq!(loaded.interface.name, "hunt0");
    assert_eq!(loaded.ftp.password, "s3cret");
    assert_eq!(loaded.hosts_with_role(HostRole::FtpServer).len(), 1);
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = SimConfig::from_toml_file(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(HuntError::ConfigError(_))));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[interface\nname = ").unwrap();
    assert!(matches!(SimConfig::from_toml_file(file.path()), Err(HuntError::ConfigError(_))));
}

#[test]
fn test_simulator_rejects_inconsistent_config() {
    struct Null;
    impl packethunt::FrameSink for Null {
        fn write_frame(&self, _: &[u8]) -> packethunt::Result<()> {
            Ok(())
        }
    }
    impl packethunt::DaemonLauncher for Null {
        fn launch(&self, _: packethunt::DaemonKind, _: std::sync::Arc<Simulator>) {}
    }

    let mut config = SimConfig::default();
    config.puzzle.knock_sequence.clear();
    let null = std::sync::Arc::new(Null);
    assert!(Simulator::new(&config, null.clone(), null).is_err());
}
