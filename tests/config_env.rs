use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use asterai_cli::config::{self, CONFIG_ENV, EndpointOverrides, HOME_ENV};
use asterai_cli::registry::STAGING_API_URL;
use once_cell::sync::Lazy;
use tempfile::tempdir;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[test]
fn environment_variables_locate_config_and_store() {
    let _guard = ENV_LOCK.lock().unwrap();
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[registry]
api_url = "http://localhost:3003/"
timeout_secs = 7

[store]
root = "/from/config"

[defaults]
namespace = "acme"
"#,
    )
    .unwrap();
    let home = temp.path().join("home");
    unsafe {
        std::env::set_var(CONFIG_ENV, &config_path);
        std::env::set_var(HOME_ENV, &home);
    }

    let loaded = config::load().unwrap();
    assert_eq!(config::config_path(), Some(config_path.clone()));
    assert_eq!(loaded.defaults.namespace.as_deref(), Some("acme"));
    assert_eq!(loaded.store_root().unwrap(), home);

    let endpoints = loaded.endpoints(&EndpointOverrides::default());
    assert_eq!(endpoints.api_url, "http://localhost:3003");
    assert_eq!(endpoints.timeout, Duration::from_secs(7));
    let staging = loaded.endpoints(&EndpointOverrides {
        staging: true,
        ..EndpointOverrides::default()
    });
    assert_eq!(staging.api_url, STAGING_API_URL);

    unsafe { std::env::remove_var(HOME_ENV) };
    assert_eq!(
        loaded.store_root().unwrap(),
        std::path::PathBuf::from("/from/config")
    );

    unsafe { std::env::set_var(CONFIG_ENV, temp.path().join("missing.toml")) };
    let defaults = config::load().unwrap();
    assert!(defaults.defaults.namespace.is_none());
    unsafe { std::env::remove_var(CONFIG_ENV) };
}

#[test]
fn malformed_config_is_reported() {
    let _guard = ENV_LOCK.lock().unwrap();
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");
    fs::write(&config_path, "[registry\napi_url = 1").unwrap();
    unsafe { std::env::set_var(CONFIG_ENV, &config_path) };

    let err = config::load().unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse config"));
    unsafe { std::env::remove_var(CONFIG_ENV) };
}
