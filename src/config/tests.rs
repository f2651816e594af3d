use super::*;
use serial_test::serial;
use std::collections::HashMap;
use std::path::Path;
use tempfile::{NamedTempFile, TempDir};

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

fn configured() -> ProviderConfig {
    let mut config = ProviderConfig::default();
    config.backends.openai.api_key = Some("sk-test".to_string());
    config
}

#[test]
fn test_estimate_cost_one_million_input_tokens() {
    let config = ProviderConfig::default();
    let spec = *config.model_spec("gpt-4o");

    let cost = config.estimate_cost("gpt-4o", 1_000_000, 0);
    assert!((cost - spec.input_per_m).abs() < f64::EPSILON);

    let cost = config.estimate_cost("gpt-4o", 0, 1_000_000);
    assert!((cost - spec.output_per_m).abs() < f64::EPSILON);
}

#[test]
fn test_unknown_model_uses_default_row() {
    let config = ProviderConfig::default();
    let cost = config.estimate_cost("brand-new-model", 2_000_000, 1_000_000);
    let expected =
        2.0 * config.default_model_spec.input_per_m + config.default_model_spec.output_per_m;
    assert!((cost - expected).abs() < 1e-9);
    assert!(config.supports_tools("brand-new-model"));
}

#[test]
fn test_tool_capability_is_explicit_per_model() {
    let config = ProviderConfig::default();
    assert!(config.supports_tools("gpt-4o-mini"));
    assert!(!config.supports_tools("deepseek-r1-distill-llama-70b"));
}

#[test]
fn test_model_selection_by_complexity() {
    let config = ProviderConfig::default();
    assert_eq!(config.model_for(Complexity::Simple), "gpt-4o-mini");
    assert_eq!(config.model_for(Complexity::Complex), "gpt-4o");
    assert_eq!(
        config.max_tokens_for(Complexity::Complex),
        config.limits.max_tokens_complex
    );
}

#[test]
fn test_apply_env_overrides() {
    let mut config = ProviderConfig::default();
    let lookup = lookup_from(&[
        ("LLM_PROVIDER", "anthropic"),
        ("ANTHROPIC_API_KEY", "sk-ant"),
        ("LLM_FALLBACK_PROVIDER", "openai"),
        ("LLM_FALLBACK_MODEL", "gpt-4o-mini"),
        ("OPENAI_API_KEY", "sk-openai"),
        ("LLM_MODEL_SIMPLE", "claude-3-5-haiku-latest"),
        ("CHAT_STREAMING_ENABLED", "false"),
        ("CHAT_MAX_INPUT_LENGTH", "500"),
    ]);

    config.apply_env(lookup).unwrap();

    assert_eq!(config.active_backend, BackendKind::Anthropic);
    assert_eq!(
        config.fallback,
        Some(FallbackConfig {
            backend: BackendKind::OpenAi,
            model: "gpt-4o-mini".to_string()
        })
    );
    assert_eq!(config.backends.anthropic.api_key.as_deref(), Some("sk-ant"));
    assert_eq!(config.models.simple, "claude-3-5-haiku-latest");
    assert!(!config.feature_flags.streaming);
    assert_eq!(config.limits.max_input_len, 500);
    assert!(config.validate().is_ok());
}

#[test]
fn test_apply_env_rejects_bad_values() {
    let mut config = ProviderConfig::default();
    let err = config
        .apply_env(lookup_from(&[("CHAT_ENABLED", "maybe")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));

    let err = config
        .apply_env(lookup_from(&[("LLM_PROVIDER", "mystery")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownBackend(_)));

    let err = config
        .apply_env(lookup_from(&[("LLM_FALLBACK_PROVIDER", "gemini")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_validate_requires_api_key_for_active_backend() {
    assert!(ProviderConfig::default().validate().is_err());
    assert!(configured().validate().is_ok());
}

#[test]
fn test_validate_rejects_fallback_to_same_backend() {
    let mut config = configured();
    config.fallback = Some(FallbackConfig {
        backend: BackendKind::OpenAi,
        model: "gpt-4o-mini".to_string(),
    });
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_malformed_base_url() {
    let mut config = configured();
    config.backends.openai.base_url = Some("not a url".to_string());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue { .. })
    ));
}

#[test]
fn test_partial_toml_uses_defaults() {
    let toml = r#"
active_backend = "gemini"

[backends.gemini]
api_key = "g-key"

[limits]
max_input_len = 300

[cost_table."gemini-2.0-flash"]
input_per_m = 0.2
output_per_m = 0.8
"#;
    let config = ProviderConfig::from_toml_str(toml).unwrap();
    assert_eq!(config.active_backend, BackendKind::Gemini);
    assert_eq!(config.limits.max_input_len, 300);
    assert_eq!(config.limits.max_history, 10);
    assert!(config.supports_tools("gemini-2.0-flash"));
    assert_eq!(config.model_spec("gemini-2.0-flash").input_per_m, 0.2);
    assert!(config.feature_flags.enabled);
}

#[test]
fn test_config_file_roundtrip() {
    let original = configured();
    let temp_file = NamedTempFile::new().unwrap();

    original.to_toml_file(temp_file.path()).unwrap();
    let loaded = ProviderConfig::from_toml_file(temp_file.path()).unwrap();

    assert_eq!(loaded.active_backend, original.active_backend);
    assert_eq!(loaded.models, original.models);
    assert_eq!(loaded.limits, original.limits);
    assert_eq!(loaded.cost_table.len(), original.cost_table.len());
    assert_eq!(loaded.backends.openai.api_key.as_deref(), Some("sk-test"));
}

#[test]
fn test_redacted_masks_keys() {
    let redacted = configured().redacted();
    assert_eq!(redacted.backends.openai.api_key.as_deref(), Some("***"));
    assert_eq!(redacted.backends.gemini.api_key, None);
}

/// Point `HOME` at `dir` for the duration of `f`.
fn with_home<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
    let previous = std::env::var_os("HOME");
    // SAFETY: callers are #[serial], so no other test thread reads the environment
    unsafe { std::env::set_var("HOME", dir) };
    let out = f();
    match previous {
        Some(home) => unsafe { std::env::set_var("HOME", home) },
        None => unsafe { std::env::remove_var("HOME") },
    }
    out
}

#[test]
#[serial]
fn test_create_default_user_config_writes_loadable_file() {
    let home = TempDir::new().unwrap();

    let path = with_home(home.path(), ConfigDiscovery::create_default_user_config).unwrap();
    assert_eq!(path, crate::env::user_config_file_path(home.path()));
    assert!(path.is_file());

    let loaded = ProviderConfig::from_toml_file(&path).unwrap();
    assert_eq!(loaded.models, ProviderConfig::default().models);

    // A second call leaves the existing file alone
    std::fs::write(&path, "active_backend = \"gemini\"\n").unwrap();
    with_home(home.path(), ConfigDiscovery::create_default_user_config).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("gemini"));
}

#[test]
#[serial]
fn test_candidates_include_user_config() {
    let home = TempDir::new().unwrap();
    let candidates = with_home(home.path(), ConfigDiscovery::get_config_candidates);
    assert!(candidates.contains(&crate::env::user_config_file_path(home.path())));
}
