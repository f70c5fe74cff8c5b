use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use parley::config::ChatConfig;
use parley::providers::FakeBackend;
use parley::ChatClient;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Chat client on a fake backend with default chat settings
#[allow(dead_code)]
pub fn fake_client() -> (Arc<FakeBackend>, ChatClient) {
    let backend = Arc::new(FakeBackend::new());
    let client = ChatClient::new(backend.clone(), "granite3-moe", &ChatConfig::default());
    (backend, client)
}
