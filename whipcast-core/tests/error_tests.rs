//! Integration tests for error handling

use whipcast_core::SourceKind;
use whipcast_core::capture::AcquireError;
use whipcast_core::error::{ResultExt, WhipcastError};

#[test]
fn test_error_context_chaining() {
    let base_error = WhipcastError::negotiation("Ingest server answered 400");
    let with_context = base_error.with_context("Publishing 'room-1'");

    let msg = format!("{}", with_context);
    assert!(msg.contains("Publishing 'room-1'"));
    assert!(msg.contains("Ingest server answered 400"));
}

#[test]
fn test_error_context_preserves_hint() {
    let base_error = WhipcastError::webrtc("ICE failed");
    let hint_before = base_error.user_hint();

    let with_context = base_error.with_context("During negotiation");
    let hint_after = with_context.user_hint();

    assert_eq!(hint_before, hint_after);
}

#[test]
fn test_result_ext_context() {
    let result: Result<(), WhipcastError> = Err(WhipcastError::signaling("connection refused"));
    let with_context = result.context("Sending offer");

    let err = with_context.unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Sending offer"));
    assert!(err.is_fatal_to_publish());
}

#[test]
fn test_user_hints() {
    let err = WhipcastError::PermissionDenied(SourceKind::Screen);
    assert!(err.user_hint().unwrap().contains("Grant"));

    let err = WhipcastError::negotiation("test");
    assert!(err.user_hint().unwrap().contains("ingest"));

    let err = WhipcastError::config("test");
    assert!(err.user_hint().unwrap().contains("config.toml"));

    let err = WhipcastError::encoder("libopus not found");
    assert!(err.user_hint().unwrap().contains("FFmpeg"));

    let err = WhipcastError::InvalidSessionId("  ".into());
    assert!(err.user_hint().is_some());

    // Teardown problems are logged, never shown
    assert!(WhipcastError::teardown("DELETE failed").user_hint().is_none());
}

#[test]
fn test_fatal_classification() {
    assert!(WhipcastError::negotiation("bad answer").is_fatal_to_publish());
    assert!(!WhipcastError::teardown("DELETE failed").is_fatal_to_publish());
    assert!(!WhipcastError::encoder("no H.264 encoder").is_fatal_to_publish());
    assert!(!WhipcastError::PermissionDenied(SourceKind::Camera).is_fatal_to_publish());
}

#[test]
fn test_acquire_error_conversion() {
    let err = AcquireError::PermissionDenied.into_error(SourceKind::Screen);
    assert_eq!(err.to_string(), "Permission denied for screen");

    let err = AcquireError::NotFound.into_error(SourceKind::Camera);
    assert_eq!(err.to_string(), "camera unavailable: no matching device");
}

#[test]
fn test_url_error_conversion() {
    let err: WhipcastError = url::Url::parse("not a url").unwrap_err().into();
    assert!(matches!(err, WhipcastError::Config(_)));
}
