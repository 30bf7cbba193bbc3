//! Unit tests for typed runtime settings updates.

use interpreter_relay::settings::{self, SettingUpdate, Settings};
use interpreter_relay::AppError;
use serde_json::{json, Map, Value};

fn pairs(value: Value) -> Map<String, Value> {
    value.as_object().expect("object").clone()
}

#[test]
fn defaults_match_documented_values() {
    let defaults = Settings::default();
    assert!(!defaults.auto_run);
    assert!(!defaults.require_acknowledge);
    assert!(defaults.print_output);
}

#[test]
fn parse_known_keys() {
    assert_eq!(
        SettingUpdate::parse("require_acknowledge", &json!(true)).expect("parse"),
        SettingUpdate::RequireAcknowledge(true)
    );
    assert_eq!(
        SettingUpdate::parse("print_output", &json!(false)).expect("parse"),
        SettingUpdate::PrintOutput(false)
    );
    for key in SettingUpdate::KEYS {
        assert_eq!(
            SettingUpdate::parse(key, &json!(true)).expect("parse").key(),
            key
        );
    }
}

#[test]
fn parse_rejects_unknown_key() {
    let err = SettingUpdate::parse("model", &json!("gpt")).expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[test]
fn parse_rejects_wrong_value_type() {
    let err = SettingUpdate::parse("print_output", &json!("yes")).expect_err("bad type");
    assert!(matches!(err, AppError::Settings(_)));
}

#[test]
fn get_reads_by_name() {
    let settings = Settings {
        require_acknowledge: true,
        ..Settings::default()
    };
    assert_eq!(settings.get("require_acknowledge").expect("get"), json!(true));
    assert!(matches!(settings.get("nope"), Err(AppError::NotFound(_))));
}

#[test]
fn apply_remote_updates_shared_settings() {
    let shared = Settings::default().shared();
    let updates = settings::apply_remote(
        &shared,
        &pairs(json!({ "require_acknowledge": true, "print_output": false })),
    )
    .expect("apply");

    assert_eq!(updates.len(), 2);
    let current = settings::current(&shared);
    assert!(current.require_acknowledge);
    assert!(!current.print_output);
}

#[test]
fn apply_remote_refuses_auto_run() {
    let shared = Settings::default().shared();
    let err = settings::apply_remote(&shared, &pairs(json!({ "auto_run": true })))
        .expect_err("auto_run is local only");

    assert!(matches!(err, AppError::Unauthorized(_)));
    assert!(!settings::current(&shared).auto_run);
}

#[test]
fn apply_remote_is_all_or_nothing() {
    let shared = Settings::default().shared();
    let result = settings::apply_remote(
        &shared,
        &pairs(json!({ "require_acknowledge": true, "colour": "blue" })),
    );

    assert!(result.is_err());
    assert_eq!(settings::current(&shared), Settings::default());
}
