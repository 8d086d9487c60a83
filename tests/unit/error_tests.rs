//! Display format of `AppError` and `EvalError`.

use attach_shell::eval::EvalError;
use attach_shell::AppError;
use serde_json::json;

#[test]
fn app_error_display_is_prefixed_by_kind() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Io("x".into()), "io: x"),
        (AppError::Handshake("x".into()), "handshake: x"),
        (AppError::Unauthorized("x".into()), "unauthorized: x"),
        (AppError::Discovery("x".into()), "discovery: x"),
        (AppError::History("x".into()), "history: x"),
        (AppError::Pipeline("x".into()), "pipeline: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_error_converts_to_io_variant() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("gone")));
}

#[test]
fn json_error_converts_to_handshake_variant() {
    let parse = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
    let err: AppError = parse.into();
    assert!(err.to_string().starts_with("handshake: invalid json"));
}

#[test]
fn eval_exception_renders_name_and_message() {
    assert_eq!(EvalError::exception("Error", "x").to_string(), "Error: x");
}

#[test]
fn thrown_error_object_becomes_exception() {
    let err = EvalError::from_thrown(json!({"name": "RangeError", "message": "too big"}));
    assert_eq!(err, EvalError::exception("RangeError", "too big"));
}

#[test]
fn thrown_plain_values_render_raw() {
    assert_eq!(EvalError::from_thrown(json!("oops")).to_string(), "oops");
    assert_eq!(EvalError::from_thrown(json!(42)).to_string(), "42");
}

#[test]
fn only_incomplete_input_is_recoverable() {
    assert!(EvalError::Incomplete("Unexpected end of input".into()).is_recoverable());
    assert!(!EvalError::exception("SyntaxError", "Unexpected token").is_recoverable());
}
