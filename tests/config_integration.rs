//! Configuration loading tests across file, environment and CLI layers

mod common;

use common::temp_config_file;
use parley::cli::{Cli, Commands};
use parley::config::Config;
use parley::ChatClient;
use serial_test::serial;
use std::time::Duration;

fn ask_cli(model: Option<&str>) -> Cli {
    Cli {
        command: Commands::Ask {
            prompt: "hi".to_string(),
            model: model.map(str::to_string),
            json: false,
        },
        ..Cli::default()
    }
}

#[test]
#[serial]
fn test_file_values_and_cli_override() {
    let yaml = r#"
backend:
  type: fake
  ollama:
    host: http://gpu-box:11434
    model: llama3.2
chat:
  context_window_turns: 6
  next_prompt_turns: 2
  stream_idle_timeout_seconds: 45
"#;
    let (_dir, path) = temp_config_file(yaml);
    let config = Config::load(path.to_str().unwrap(), &ask_cli(Some("phi3"))).unwrap();
    config.validate().unwrap();

    assert_eq!(config.backend.backend_type, "fake");
    assert_eq!(config.backend.ollama.host, "http://gpu-box:11434");
    assert_eq!(config.backend.ollama.model, "phi3");
    assert_eq!(config.chat.stats_window().context_turns, 6);
    assert_eq!(config.chat.stats_window().next_prompt_turns, 2);
    assert_eq!(config.chat.stream_idle_timeout(), Some(Duration::from_secs(45)));
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let (_dir, path) = temp_config_file("backend:\n  type: ollama\n");
    std::env::set_var("PARLEY_BACKEND", "fake");
    std::env::set_var("PARLEY_MODEL", "mistral");

    let config = Config::load(path.to_str().unwrap(), &ask_cli(None));

    std::env::remove_var("PARLEY_BACKEND");
    std::env::remove_var("PARLEY_MODEL");

    let config = config.unwrap();
    assert_eq!(config.backend.backend_type, "fake");
    assert_eq!(config.backend.ollama.model, "mistral");
}

#[test]
#[serial]
fn test_invalid_values_fail_validation() {
    let (_dir, path) = temp_config_file("chat:\n  context_window_turns: 0\n");
    let config = Config::load(path.to_str().unwrap(), &Cli::default()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("context_window_turns"));
}

#[tokio::test]
#[serial]
async fn test_client_from_fake_config() {
    let (_dir, path) = temp_config_file("backend:\n  type: fake\n  ollama:\n    model: tinyllama\n");
    let config = Config::load(path.to_str().unwrap(), &Cli::default()).unwrap();

    let mut client = ChatClient::from_config(&config).unwrap();
    assert_eq!(client.backend_name(), "fake");
    assert_eq!(client.model(), "tinyllama");

    let id = client.new_conversation();
    client.send_user_message(&id, "ping", Vec::new()).await.unwrap();
    client.wait_for_idle(&id).await;
    assert_eq!(client.snapshot(&id).last().unwrap().content, "You said: ping");
}

#[test]
#[serial]
fn test_bundled_config_is_valid() {
    let config = Config::from_file("config/config.yaml").unwrap();
    config.validate().unwrap();
    assert_eq!(config.backend.backend_type, "ollama");
}
