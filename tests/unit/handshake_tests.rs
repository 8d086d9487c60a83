use attach_shell::config::SessionDefaults;
use attach_shell::shell::handshake::{EvaluateAndExit, HandshakeRequest};
use attach_shell::AppError;
use serde_json::json;

fn request(header: serde_json::Value) -> HandshakeRequest {
    HandshakeRequest::from_header(header).expect("valid header")
}

#[test]
fn non_object_header_is_rejected() {
    let err = HandshakeRequest::from_header(json!(["key"])).expect_err("array header");
    assert!(matches!(err, AppError::Handshake(_)));
}

#[test]
fn wrongly_typed_options_fall_back_to_defaults() {
    let options = request(json!({"key": "k", "columns": "wide", "useColors": "yes", "prompt": 7}))
        .into_options(&SessionDefaults::default());

    assert!(options.use_colors);
    assert_eq!(options.prompt, "> ");
    assert_eq!(options.extra.get("useColors"), Some(&json!("yes")));
    assert_eq!(options.extra.get("prompt"), Some(&json!(7)));
    assert!(!options.extra.contains_key("columns"));
}

#[test]
fn malformed_one_shot_request_is_rejected() {
    let err = HandshakeRequest::from_header(json!({"key": "k", "evaluateAndExit": "1+1"}))
        .expect_err("evaluateAndExit must be an object");
    assert!(matches!(err, AppError::Handshake(_)));
}

#[test]
fn non_string_key_is_a_mismatch() {
    let numeric = request(json!({"key": 123})).authorize("123");

    assert!(matches!(numeric, Err(AppError::Unauthorized(_))));
}

#[test]
fn matching_key_is_authorized() {
    assert!(request(json!({"key": "abc"})).authorize("abc").is_ok());
}

#[test]
fn mismatched_or_missing_key_is_unauthorized() {
    let wrong = request(json!({"key": "abd"})).authorize("abc");
    let missing = request(json!({})).authorize("abc");

    assert!(matches!(wrong, Err(AppError::Unauthorized(_))));
    assert!(matches!(missing, Err(AppError::Unauthorized(_))));
}

#[test]
fn unset_options_take_defaults() {
    let options = request(json!({"key": "k", "columns": 120})).into_options(&SessionDefaults::default());

    assert_eq!(options.prompt, "> ");
    assert!(options.terminal);
    assert!(options.use_colors);
    assert!(options.ignore_undefined);
    assert!(!options.use_global);
    assert!(options.evaluate_and_exit.is_none());
    assert!(options.extra.is_empty(), "key and columns are stripped");
}

#[test]
fn client_overrides_display_options() {
    let options = request(json!({
        "key": "k",
        "prompt": "app> ",
        "useColors": false,
        "ignoreUndefined": false,
        "breakEvalOnSigint": true
    }))
    .into_options(&SessionDefaults::default());

    assert_eq!(options.prompt, "app> ");
    assert!(!options.use_colors);
    assert!(!options.ignore_undefined);
    assert_eq!(options.extra.get("breakEvalOnSigint"), Some(&json!(true)));
}

#[test]
fn host_only_options_are_discarded() {
    let options = request(json!({
        "key": "k",
        "input": "/dev/tty",
        "output": 3,
        "useGlobal": true
    }))
    .into_options(&SessionDefaults::default());

    assert!(!options.use_global);
    assert!(!options.extra.contains_key("input"));
    assert!(!options.extra.contains_key("output"));
    assert!(!options.extra.contains_key("useGlobal"));
}

#[test]
fn one_shot_forces_empty_prompt() {
    let options = request(json!({
        "key": "k",
        "prompt": "ignored> ",
        "evaluateAndExit": {"command": "1+1", "filename": "answer.calc"}
    }))
    .into_options(&SessionDefaults::default());

    assert_eq!(options.prompt, "");
    assert_eq!(
        options.evaluate_and_exit,
        Some(EvaluateAndExit {
            command: "1+1".into(),
            filename: Some("answer.calc".into()),
        })
    );
}

#[test]
fn request_serializes_in_wire_casing() {
    let request = HandshakeRequest {
        key: Some("k".into()),
        columns: Some(80.into()),
        evaluate_and_exit: Some(EvaluateAndExit {
            command: "_".into(),
            filename: None,
        }),
        ..HandshakeRequest::default()
    };

    let wire = serde_json::to_value(&request).expect("serialize");

    assert_eq!(
        wire,
        json!({"key": "k", "columns": 80, "evaluateAndExit": {"command": "_"}})
    );
}
