use serde_json::json;

use crate::CoordinationError;
use crate::Error;
use crate::OperationError;
use crate::OperationErrorKind;
use crate::TransportError;

#[test]
fn test_invalid_key_parameters_message() {
    let err = Error::InvalidKeyParameters("expected a map".to_string());
    assert_eq!(err.to_string(), "Invalid cache key parameters: expected a map");
}

#[test]
fn test_coordination_error_stats_round_in_progress() {
    let err = CoordinationError::StatsRoundInProgress;
    assert_eq!(
        err.to_string(),
        "Can't start a new stats request until the previous one ends"
    );
}

#[test]
fn test_coordination_error_waiter_dropped() {
    let err = CoordinationError::WaiterDropped {
        operation: "get-customer".to_string(),
        key: "42".to_string(),
    };
    assert!(err.to_string().contains("get-customer#42"));
}

#[test]
fn test_transport_error_read() {
    let err = TransportError::Read {
        stream_id: "stream".to_string(),
        reason: "broken pipe".to_string(),
    };
    let msg = err.to_string();
    assert!(msg.contains("stream"));
    assert!(msg.contains("broken pipe"));
}

#[test]
fn test_operation_error_converts_into_error() {
    let err: Error = OperationError::generic("boom").into();
    assert!(matches!(err, Error::Operation(ref e) if e.message == "boom"));
    assert_eq!(err.to_string(), "Error: boom");
}

#[test]
fn test_normalize_rebuilds_known_kind() {
    let raw = r#"{"type":"NotFoundError","message":"customer missing","statusCode":404}"#;
    let err = OperationError::normalize(raw);

    assert_eq!(err.kind, OperationErrorKind::NotFound);
    assert_eq!(err.message, "customer missing");
    assert_eq!(err.status_code, Some(404));
}

#[test]
fn test_normalize_keeps_wire_form_stable() {
    let original = OperationError::new(OperationErrorKind::Timeout, "upstream slow");
    let serialized = original.to_wire().to_string();

    let rebuilt = OperationError::normalize(&serialized);

    assert_eq!(rebuilt, original);
    assert_eq!(rebuilt.to_wire().to_string(), serialized);
}

#[test]
fn test_normalize_unknown_tag_falls_back_to_generic() {
    let raw = r#"{"anyobj":"abc"}"#;
    let err = OperationError::normalize(raw);

    assert_eq!(err.kind, OperationErrorKind::Generic);
    assert_eq!(err.message, raw);
}

#[test]
fn test_normalize_unparseable_text_falls_back_to_generic() {
    let err = OperationError::normalize("some trash");

    assert_eq!(err.kind, OperationErrorKind::Generic);
    assert_eq!(err.message, "some trash");
}

#[test]
fn test_normalize_missing_message_uses_default() {
    let err = OperationError::normalize(r#"{"type":"InternalServerError"}"#);

    assert_eq!(err.kind, OperationErrorKind::Internal);
    assert_eq!(err.message, "Unknown error");
}

#[test]
fn test_from_wire_accepts_object_string_and_scalars() {
    let object = json!({"type": "InvalidInputError", "message": "bad id"});
    assert_eq!(OperationError::from_wire(&object).kind, OperationErrorKind::InvalidInput);

    let text = json!("{\"type\":\"UnavailableError\",\"message\":\"down\"}");
    assert_eq!(OperationError::from_wire(&text).kind, OperationErrorKind::Unavailable);

    let number = json!(42);
    let err = OperationError::from_wire(&number);
    assert_eq!(err.kind, OperationErrorKind::Generic);
    assert_eq!(err.message, "42");
}

#[test]
fn test_to_wire_omits_missing_status_code() {
    let wire = OperationError::generic("x").to_wire();
    assert_eq!(wire, json!({"type": "Error", "message": "x"}));

    let wire = OperationError::internal("y").with_status(500).to_wire();
    assert_eq!(
        wire,
        json!({"type": "InternalServerError", "message": "y", "statusCode": 500})
    );
}
