use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::binder::{bind, marshal, matches_shape, BindError};
use crate::contract::{MethodEntry, ParamKind, ParameterEntry};
use crate::message::{codes, MessageId};

use super::*;

fn entry(builder: crate::contract::MethodBuilder) -> Arc<MethodEntry> {
    Arc::new(
        builder
            .handler(|_args, _ctx| async move { Ok(Value::Null) })
            .expect("test entry"),
    )
}

fn token() -> CancellationToken {
    CancellationToken::new()
}

#[test]
fn absent_null_and_missing_params_match_parameterless_methods() {
    let bare = entry(MethodEntry::builder("m"));
    let optional_only = entry(
        MethodEntry::builder("m")
            .param(ParameterEntry::optional("flag", ParamKind::Boolean)),
    );
    let required = entry(
        MethodEntry::builder("m").param(ParameterEntry::required("flag", ParamKind::Boolean)),
    );

    for params in [None, Some(Value::Null), Some(json!([])), Some(json!({}))] {
        assert!(matches_shape(&bare, params.as_ref()));
        assert!(matches_shape(&optional_only, params.as_ref()));
        assert!(!matches_shape(&required, params.as_ref()));
    }
}

#[test]
fn by_name_requires_every_required_parameter() {
    let method = entry(
        MethodEntry::builder("m")
            .param(ParameterEntry::required("a", ParamKind::Integer))
            .param(ParameterEntry::optional("b", ParamKind::Integer)),
    );

    assert!(matches_shape(&method, Some(&json!({"a": 1}))));
    assert!(matches_shape(&method, Some(&json!({"a": 1, "b": 2}))));
    assert!(!matches_shape(&method, Some(&json!({"b": 2}))));
    assert!(!matches_shape(&method, Some(&json!({"a": "text"}))), "kind mismatch");
}

#[test]
fn extra_object_keys_follow_the_allow_extra_flag() {
    let strict = entry(
        MethodEntry::builder("m").param(ParameterEntry::required("a", ParamKind::Integer)),
    );
    let lenient = entry(
        MethodEntry::builder("m")
            .allow_extra_params()
            .param(ParameterEntry::required("a", ParamKind::Integer)),
    );

    let params = json!({"a": 1, "surprise": true});
    assert!(!matches_shape(&strict, Some(&params)));
    assert!(matches_shape(&lenient, Some(&params)));

    // The extra key is ignored by marshaling.
    let args = marshal(&lenient, Some(&params), &token()).expect("marshal");
    assert_eq!(args.len(), 1);
    assert_eq!(args.value(0), Some(&json!(1)));
}

#[test]
fn by_position_respects_arity_and_optional_tails() {
    let method = entry(
        MethodEntry::builder("m")
            .param(ParameterEntry::required("a", ParamKind::Integer))
            .param(ParameterEntry::optional("b", ParamKind::Integer)),
    );

    assert!(matches_shape(&method, Some(&json!([1]))));
    assert!(matches_shape(&method, Some(&json!([1, 2]))));
    assert!(!matches_shape(&method, Some(&json!([1, 2, 3]))), "too many");
    assert!(!matches_shape(&method, Some(&json!([]))), "missing required");

    let lenient = entry(
        MethodEntry::builder("m")
            .allow_extra_params()
            .param(ParameterEntry::required("a", ParamKind::Integer)),
    );
    assert!(matches_shape(&lenient, Some(&json!([1, 2, 3]))));
}

#[test]
fn cancellation_parameters_never_count_toward_selection() {
    let method = entry(
        MethodEntry::builder("m")
            .param(ParameterEntry::cancellation())
            .param(ParameterEntry::required("a", ParamKind::Integer)),
    );

    // One positional argument binds the one bindable parameter.
    assert!(matches_shape(&method, Some(&json!([5]))));

    let trigger = token();
    let args = marshal(&method, Some(&json!([5])), &trigger).expect("marshal");
    assert_eq!(args.len(), 2);
    assert!(args.cancellation(0).is_some(), "slot 0 is the injected token");
    assert_eq!(args.value(1), Some(&json!(5)));
}

#[test]
fn kind_table_covers_null_id_and_wildcards() {
    let id_param = entry(MethodEntry::builder("m").param(ParameterEntry::required("id", ParamKind::Id)));
    for accepted in [json!([1]), json!(["x"]), json!([null])] {
        assert!(matches_shape(&id_param, Some(&accepted)), "{accepted}");
    }
    assert!(!matches_shape(&id_param, Some(&json!([1.5]))));

    let any_param =
        entry(MethodEntry::builder("m").param(ParameterEntry::required("v", ParamKind::Any)));
    for accepted in [json!([1]), json!(["x"]), json!([null]), json!([[1]]), json!([{"k":1}])] {
        assert!(matches_shape(&any_param, Some(&accepted)), "{accepted}");
    }

    let string_param =
        entry(MethodEntry::builder("m").param(ParameterEntry::required("s", ParamKind::String)));
    assert!(matches_shape(&string_param, Some(&json!(["2024-01-01T00:00:00Z"]))));
    assert!(!matches_shape(&string_param, Some(&json!([{"k": 1}]))), "objects are not strings");

    let nullable_param = entry(
        MethodEntry::builder("m")
            .param(ParameterEntry::required("s", ParamKind::String).nullable()),
    );
    assert!(matches_shape(&nullable_param, Some(&json!([null]))));
}

#[test]
fn ambiguous_candidate_sets_are_rejected() {
    let a = entry(MethodEntry::builder("m").param(ParameterEntry::required("x", ParamKind::Any)));
    let b =
        entry(MethodEntry::builder("m").param(ParameterEntry::required("x", ParamKind::Integer)));

    let outcome = bind(&[a, b], Some(&json!([1])), &token());
    match outcome {
        Err(BindError::Ambiguous { matched }) => assert_eq!(matched, 2),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn no_candidate_yields_no_match() {
    let a = entry(MethodEntry::builder("m").param(ParameterEntry::required("x", ParamKind::Integer)));
    let outcome = bind(&[a], Some(&json!(["text"])), &token());
    assert!(matches!(outcome, Err(BindError::NoMatch)));
}

#[test]
fn overload_selection_prefers_the_kind_compatible_entry() {
    let candidates = [
        Arc::new(add_int_entry()),
        Arc::new(add_string_entry()),
    ];

    let (chosen, args) = bind(&candidates, Some(&json!(["ab", "cd"])), &token()).expect("bind");
    assert_eq!(chosen.params[0].kind, ParamKind::String);
    assert_eq!(args.value(0), Some(&json!("ab")));

    let (chosen, _) = bind(&candidates, Some(&json!([1, 2])), &token()).expect("bind");
    assert_eq!(chosen.params[0].kind, ParamKind::Integer);
}

#[test]
fn marshaling_substitutes_defaults_and_zeroes() {
    let method = entry(
        MethodEntry::builder("m")
            .param(ParameterEntry::optional("flag", ParamKind::Boolean).with_default(json!(true)))
            .param(ParameterEntry::optional("count", ParamKind::Integer))
            .param(ParameterEntry::optional("name", ParamKind::String)),
    );

    let args = marshal(&method, None, &token()).expect("marshal");
    assert_eq!(args.value(0), Some(&json!(true)), "declared default");
    assert_eq!(args.value(1), Some(&json!(0)), "zero for integers");
    assert_eq!(args.value(2), Some(&json!("")), "zero for strings");
}

#[test]
fn missing_required_parameters_fail_marshaling() {
    let method = entry(
        MethodEntry::builder("m").param(ParameterEntry::required("a", ParamKind::Integer)),
    );
    let outcome = marshal(&method, Some(&json!({})), &token());
    assert!(matches!(outcome, Err(BindError::InvalidParams(_))));
}

#[test]
fn argument_conversion_failures_surface_as_invalid_params() {
    let method = entry(
        MethodEntry::builder("m").param(ParameterEntry::required("a", ParamKind::Integer)),
    );
    // A float token passes kind selection for the numeric family but fails
    // integral conversion at the typed boundary.
    let args = marshal(&method, Some(&json!([1.5])), &token()).expect("marshal");
    let outcome: Result<i64, _> = args.get(0);
    let error = outcome.expect_err("conversion must fail");
    assert_eq!(error.code, codes::INVALID_PARAMS);

    // Ids deserialize into the MessageId sum type.
    let id_method =
        entry(MethodEntry::builder("m").param(ParameterEntry::required("id", ParamKind::Id)));
    let args = marshal(&id_method, Some(&json!(["c1"])), &token()).expect("marshal");
    let id: MessageId = args.get(0).expect("id conversion");
    assert_eq!(id, "c1".into());
}

#[test]
fn bind_errors_map_to_protocol_codes() {
    assert_eq!(
        BindError::NoMatch.to_response_error("m").code,
        codes::METHOD_NOT_FOUND
    );
    assert_eq!(
        BindError::Ambiguous { matched: 2 }.to_response_error("m").code,
        codes::INVALID_REQUEST
    );
    assert_eq!(
        BindError::InvalidParams("x".into()).to_response_error("m").code,
        codes::INVALID_PARAMS
    );
}
