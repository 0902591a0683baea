//! Integration tests for hook sequencing through the fluent builder.
//!
//! Focus areas:
//! - pre → target → post ordering, for calls and constructions
//! - Pre-hook aborts, post-hook overrides, exactly-once post
//! - Custom hooks with full control over the thunk
//! - Audit events emitted along the way

use std::cell::RefCell;
use std::rc::Rc;

use wrapper_roo::events::{
    EVENT_HOOK_REJECTED, EVENT_INVOCATION_SETTLED, EVENT_POST_HOOK_OVERRIDE,
    EVENT_PRE_HOOK_ABORTED, EVENT_WRAPPER_CREATED,
};
use wrapper_roo::{
    ErrorKind, InterceptError, JsValue, ObjectHandle, Realm, RealmConfig, build_pre_post_hook,
    wrap, wrap_with_hook,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Trace = Rc<RefCell<Vec<String>>>;

fn int_val(n: i64) -> JsValue {
    JsValue::Int(n)
}

/// Function that appends `label` to the trace and returns `undefined`.
fn spy(realm: &mut Realm, trace: &Trace, label: &str) -> ObjectHandle {
    let trace = Rc::clone(trace);
    let owned = label.to_string();
    realm.function(label, 1, move |_, _| {
        trace.borrow_mut().push(owned.clone());
        Ok(JsValue::Undefined)
    })
}

/// Function that appends `label` to the trace and throws `Error(message)`.
fn throwing_spy(realm: &mut Realm, trace: &Trace, label: &str, message: &str) -> ObjectHandle {
    let trace = Rc::clone(trace);
    let owned = label.to_string();
    let message = message.to_string();
    realm.function(label, 1, move |realm, _| {
        trace.borrow_mut().push(owned.clone());
        Err(realm.throw_error(ErrorKind::Error, &message))
    })
}

fn trace_of(trace: &Trace) -> Vec<String> {
    trace.borrow().clone()
}

fn message_of(realm: &Realm, value: &JsValue) -> String {
    realm.error_message(value).unwrap_or_default()
}

// ===========================================================================
// 1. Ordering
// ===========================================================================

#[test]
fn pre_hook_runs_once_per_call() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let increment = spy(&mut realm, &trace, "increment");
    let nop = realm.function("nop", 0, |_, _| Ok(JsValue::Undefined));
    let wrapped = wrap(&mut realm, nop).with_pre_hook(increment).unwrap();
    realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap();
    assert_eq!(trace_of(&trace).len(), 1);
    realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap();
    assert_eq!(trace_of(&trace).len(), 2);
}

#[test]
fn pre_and_post_bracket_the_target() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let pre = spy(&mut realm, &trace, "pre");
    let target = spy(&mut realm, &trace, "target");
    let post = spy(&mut realm, &trace, "post");
    let wrapped = wrap(&mut realm, target).with_pre_post_hooks(pre, post).unwrap();
    realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap();
    assert_eq!(trace_of(&trace), ["pre", "target", "post"]);
}

#[test]
fn hooks_bracket_constructions_too() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let pre = spy(&mut realm, &trace, "pre");
    let target = spy(&mut realm, &trace, "Target");
    let post = spy(&mut realm, &trace, "post");
    let wrapped = wrap(&mut realm, target).with_pre_post_hooks(pre, post).unwrap();
    let instance = realm.construct(&wrapped, vec![], None).unwrap();
    assert!(instance.is_object());
    assert_eq!(trace_of(&trace), ["pre", "Target", "post"]);
}

#[test]
fn post_hook_sees_the_call_completed() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let target = spy(&mut realm, &trace, "target");
    let post = spy(&mut realm, &trace, "post");
    let wrapped = wrap(&mut realm, target).with_post_hook(post).unwrap();
    realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap();
    assert_eq!(trace_of(&trace), ["target", "post"]);
}

#[test]
fn pre_post_result_is_the_target_result() {
    let mut realm = Realm::new();
    let answer = realm.function("answer", 0, |_, _| Ok(int_val(42)));
    let nop = realm.intrinsics().nop_hook;
    let wrapped = wrap(&mut realm, answer).with_pre_post_hooks(nop, nop).unwrap();
    assert_eq!(realm.call(&wrapped, JsValue::Undefined, vec![]), Ok(int_val(42)));
}

// ===========================================================================
// 2. Exceptions
// ===========================================================================

#[test]
fn throwing_pre_hook_aborts_the_invocation() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let pre = throwing_spy(&mut realm, &trace, "pre", "42");
    let target = spy(&mut realm, &trace, "target");
    let post = spy(&mut realm, &trace, "post");
    let wrapped = wrap(&mut realm, target).with_pre_post_hooks(pre, post).unwrap();
    let err = realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap_err();
    assert!(message_of(&realm, err.value()).contains("42"));
    assert_eq!(trace_of(&trace), ["pre"]);
    assert_eq!(realm.event_counts()[EVENT_PRE_HOOK_ABORTED], 1);
}

#[test]
fn throwing_post_hook_propagates() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let target = spy(&mut realm, &trace, "target");
    let post = throwing_spy(&mut realm, &trace, "post", "42");
    let wrapped = wrap(&mut realm, target).with_post_hook(post).unwrap();
    let err = realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap_err();
    assert_eq!(message_of(&realm, err.value()), "42");
}

#[test]
fn post_hook_error_wins_over_target_error() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let target = throwing_spy(&mut realm, &trace, "target", "original");
    let post = throwing_spy(&mut realm, &trace, "post", "42");
    let wrapped = wrap(&mut realm, target).with_post_hook(post).unwrap();
    let err = realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap_err();
    assert_eq!(message_of(&realm, err.value()), "42");
    assert_eq!(trace_of(&trace), ["target", "post"]);
    assert_eq!(realm.event_counts()[EVENT_POST_HOOK_OVERRIDE], 1);
}

#[test]
fn post_hook_runs_exactly_once_when_target_throws() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let target = throwing_spy(&mut realm, &trace, "target", "42");
    let post = spy(&mut realm, &trace, "post");
    let wrapped = wrap(&mut realm, target).with_post_hook(post).unwrap();
    let err = realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap_err();
    assert_eq!(message_of(&realm, err.value()), "42");
    assert_eq!(trace_of(&trace).iter().filter(|l| *l == "post").count(), 1);
}

#[test]
fn post_hook_runs_exactly_once_when_it_throws() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let nop = realm.function("nop", 0, |_, _| Ok(JsValue::Undefined));
    let post = throwing_spy(&mut realm, &trace, "post", "42");
    let wrapped = wrap(&mut realm, nop).with_post_hook(post).unwrap();
    assert!(realm.call(&wrapped, JsValue::Undefined, vec![]).is_err());
    assert_eq!(trace_of(&trace), ["post"]);
}

#[test]
fn target_error_identity_survives_pre_post() {
    let mut realm = Realm::new();
    let error = realm.new_error(ErrorKind::RangeError, "boom");
    let thrown = error.clone();
    let target = realm.function("target", 0, move |_, _| Err(wrapper_roo::Throw(thrown.clone())));
    let nop = realm.intrinsics().nop_hook;
    let wrapped = wrap(&mut realm, target).with_pre_post_hooks(nop, nop).unwrap();
    let err = realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap_err();
    assert_eq!(err.value(), &error);
}

// ===========================================================================
// 3. Custom hooks
// ===========================================================================

#[test]
fn custom_hook_receives_metadata_and_thunk() {
    let mut realm = Realm::new();
    let answer = realm.function("answer", 0, |_, _| Ok(int_val(42)));
    let hook = realm.function("hook", 2, |realm, ctx| {
        let metadata = ctx.arg(0);
        let thunk = ctx.arg(1);
        assert!(realm.invocation(&metadata).is_some());
        realm.call(&thunk, JsValue::Undefined, vec![])
    });
    let wrapped = wrap(&mut realm, answer).with_custom_hook(hook).unwrap();
    assert_eq!(realm.call(&wrapped, JsValue::Undefined, vec![]), Ok(int_val(42)));
}

#[test]
fn custom_hook_may_replace_the_result() {
    let mut realm = Realm::new();
    let answer = realm.function("answer", 0, |_, _| Ok(int_val(42)));
    let hook = realm.function("hook", 2, |realm, ctx| {
        let thunk = ctx.arg(1);
        let value = realm.call(&thunk, JsValue::Undefined, vec![])?;
        Ok(int_val(value.as_int().unwrap_or(0) + 1))
    });
    let wrapped = wrap(&mut realm, answer).with_hook(hook).unwrap();
    assert_eq!(realm.call(&wrapped, JsValue::Undefined, vec![]), Ok(int_val(43)));
}

#[test]
fn custom_hook_may_swallow_exceptions() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let target = throwing_spy(&mut realm, &trace, "target", "nope");
    let hook = realm.function("hook", 2, |realm, ctx| {
        let thunk = ctx.arg(1);
        Ok(realm
            .call(&thunk, JsValue::Undefined, vec![])
            .unwrap_or(JsValue::Null))
    });
    let wrapped = wrap(&mut realm, target).with_custom_hook(hook).unwrap();
    assert_eq!(realm.call(&wrapped, JsValue::Undefined, vec![]), Ok(JsValue::Null));
    assert_eq!(trace_of(&trace), ["target"]);
}

#[test]
fn custom_hook_may_skip_the_target() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let target = spy(&mut realm, &trace, "target");
    let hook = realm.function("hook", 2, |_, _| Ok(JsValue::Str("cached".to_string())));
    let wrapped = wrap(&mut realm, target).with_custom_hook(hook).unwrap();
    let out = realm.call(&wrapped, JsValue::Undefined, vec![]);
    assert_eq!(out, Ok(JsValue::Str("cached".to_string())));
    assert!(trace_of(&trace).is_empty());
}

#[test]
fn custom_hook_may_run_the_thunk_repeatedly() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let target = spy(&mut realm, &trace, "target");
    let hook = realm.function("hook", 2, |realm, ctx| {
        let thunk = ctx.arg(1);
        for _ in 0..3 {
            realm.call(&thunk, JsValue::Undefined, vec![])?;
        }
        Ok(JsValue::Undefined)
    });
    let wrapped = wrap(&mut realm, target).with_custom_hook(hook).unwrap();
    realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap();
    assert_eq!(trace_of(&trace).len(), 3);
}

#[test]
fn hooks_may_call_other_wrappers() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let inner_target = spy(&mut realm, &trace, "inner");
    let passthrough = realm.intrinsics().passthrough_hook;
    let inner = wrap(&mut realm, inner_target)
        .with_custom_hook(passthrough)
        .unwrap();
    let slot = realm.create_object();
    realm.set_value(&slot.into(), "inner", inner).unwrap();
    let pre = realm.function("pre", 1, move |realm, _| {
        let inner = realm.get_value(&slot.into(), "inner")?;
        realm.call(&inner, JsValue::Undefined, vec![])
    });
    let outer_target = spy(&mut realm, &trace, "outer");
    let outer = wrap(&mut realm, outer_target).with_pre_hook(pre).unwrap();
    realm.call(&outer, JsValue::Undefined, vec![]).unwrap();
    assert_eq!(trace_of(&trace), ["inner", "outer"]);
    assert_eq!(realm.live_invocations(), 0);
}

// ===========================================================================
// 4. Argument validation
// ===========================================================================

#[test]
fn invalid_hooks_are_rejected_with_a_stable_code() {
    let mut realm = Realm::new();
    let f = realm.function("f", 0, |_, _| Ok(JsValue::Undefined));
    let err = wrap(&mut realm, f).with_pre_hook(int_val(1)).unwrap_err();
    assert_eq!(err.error_code(), "FE-WRAP-1001");
    assert!(matches!(
        err,
        InterceptError::InvalidArgument { ref parameter, .. } if parameter == "pre_hook"
    ));
    let err = wrap(&mut realm, f).with_post_hook(JsValue::Undefined).unwrap_err();
    assert!(matches!(
        err,
        InterceptError::InvalidArgument { ref parameter, .. } if parameter == "post_hook"
    ));
    assert!(realm.event_counts()[EVENT_HOOK_REJECTED] >= 2);
}

#[test]
fn invalid_argument_lifts_into_type_error() {
    let mut realm = Realm::new();
    let nop = realm.intrinsics().nop_hook;
    let err = build_pre_post_hook(&mut realm, &JsValue::Null, &nop.into()).unwrap_err();
    let thrown = err.into_throw(&mut realm);
    assert_eq!(realm.error_kind(thrown.value()), Some(ErrorKind::TypeError));
    assert_eq!(message_of(&realm, thrown.value()), "Pre-hook must be a function");
}

#[test]
fn composed_hook_is_reusable_across_targets() {
    let mut realm = Realm::new();
    let trace = Trace::default();
    let pre = spy(&mut realm, &trace, "pre");
    let post = spy(&mut realm, &trace, "post");
    let hook = build_pre_post_hook(&mut realm, &pre.into(), &post.into()).unwrap();
    let a = spy(&mut realm, &trace, "a");
    let b = spy(&mut realm, &trace, "b");
    let wa = wrap_with_hook(&mut realm, &a.into(), &hook.into()).unwrap();
    let wb = wrap_with_hook(&mut realm, &b.into(), &hook.into()).unwrap();
    realm.call(&wa, JsValue::Undefined, vec![]).unwrap();
    realm.call(&wb, JsValue::Undefined, vec![]).unwrap();
    assert_eq!(trace_of(&trace), ["pre", "a", "post", "pre", "b", "post"]);
}

// ===========================================================================
// 5. Audit events
// ===========================================================================

#[test]
fn wrapping_and_calling_emit_events() {
    let mut realm = Realm::new();
    let f = realm.function("f", 0, |_, _| Ok(JsValue::Undefined));
    let nop = realm.intrinsics().nop_hook;
    let wrapped = wrap(&mut realm, f).with_pre_hook(nop).unwrap();
    realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap();
    let events = realm.drain_events();
    assert!(events.iter().any(|e| e.event == EVENT_WRAPPER_CREATED && e.target == Some(f.index())));
    let settled: Vec<_> = events
        .iter()
        .filter(|e| e.event == EVENT_INVOCATION_SETTLED)
        .collect();
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].outcome, "ok");
    assert!(settled[0].invocation_id.is_some());
    assert!(realm.drain_events().is_empty());
}

#[test]
fn quiet_realm_records_nothing() {
    let mut realm = Realm::with_config(RealmConfig::quiet());
    let f = realm.function("f", 0, |_, _| Ok(JsValue::Undefined));
    let nop = realm.intrinsics().nop_hook;
    let wrapped = wrap(&mut realm, f).with_pre_hook(nop).unwrap();
    realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap();
    assert!(realm.drain_events().is_empty());
    assert!(realm.event_counts().is_empty());
}

#[test]
fn events_serialize_as_json() {
    let mut realm = Realm::new();
    let f = realm.function("f", 0, |_, _| Ok(JsValue::Undefined));
    let nop = realm.intrinsics().nop_hook;
    let wrapped = wrap(&mut realm, f).with_pre_hook(nop).unwrap();
    realm.call(&wrapped, JsValue::Undefined, vec![]).unwrap();
    let events = realm.drain_events();
    let json = serde_json::to_string(&events).unwrap();
    assert!(json.contains("\"component\":\"wrapper_roo\""));
    let back: Vec<wrapper_roo::InterceptEvent> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, events);
}
