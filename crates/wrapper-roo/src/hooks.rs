//! Hook composition.
//!
//! A hook is a realm callable invoked as `hook(metadata, thunk)`; whatever it
//! returns (or throws) is the wrapper's completion. The pre/post composer
//! runs the thunk exactly once between two observers.

use crate::events::{EVENT_POST_HOOK_OVERRIDE, EVENT_PRE_HOOK_ABORTED, InterceptEvent};
use crate::interceptor::{InterceptError, check_callable};
use crate::metadata::{MetadataError, Outcome};
use crate::object_model::{JsValue, ObjectHandle};
use crate::realm::{Completion, ErrorKind, Realm};

/// Build `(metadata, thunk) => { pre(metadata); try { return thunk() }
/// finally { post(metadata) } }`, also recording the thunk's outcome on the
/// metadata before `post` runs.
pub fn build_pre_post_hook(
    realm: &mut Realm,
    pre: &JsValue,
    post: &JsValue,
) -> Result<ObjectHandle, InterceptError> {
    let pre = check_callable(realm, pre, "pre_hook", "Pre-hook must be a function")?;
    let post = check_callable(realm, post, "post_hook", "Post-hook must be a function")?;
    Ok(realm.function("hook", 2, move |realm, ctx| {
        run_pre_post(realm, pre, post, ctx.arg(0), ctx.arg(1))
    }))
}

fn run_pre_post(
    realm: &mut Realm,
    pre: ObjectHandle,
    post: ObjectHandle,
    metadata: JsValue,
    thunk: JsValue,
) -> Completion {
    // Not protected: a throwing pre-hook aborts the invocation.
    if let Err(thrown) = realm.call(&pre.into(), JsValue::Undefined, vec![metadata.clone()]) {
        let event = lifecycle_event(realm, EVENT_PRE_HOOK_ABORTED, "aborted", &metadata);
        realm.emit(event);
        return Err(thrown);
    }

    let result = realm.call(&thunk, JsValue::Undefined, Vec::new());
    let outcome = match &result {
        Ok(value) => Outcome::Returned(value.clone()),
        Err(thrown) => Outcome::Threw(thrown.value().clone()),
    };
    let settled = realm.settle_invocation(&metadata, outcome);

    if let Err(thrown) = realm.call(&post.into(), JsValue::Undefined, vec![metadata.clone()]) {
        let event = lifecycle_event(realm, EVENT_POST_HOOK_OVERRIDE, "threw", &metadata);
        realm.emit(event);
        return Err(thrown);
    }

    match settled {
        // A hand-built metadata object (or one whose wrapper call already
        // returned) has nothing to record into.
        Ok(()) | Err(MetadataError::UnknownInvocation) => result,
        Err(err @ MetadataError::AlreadySettled(_)) => {
            Err(realm.throw_error(ErrorKind::TypeError, &err.to_string()))
        }
    }
}

fn lifecycle_event(realm: &Realm, event: &str, outcome: &str, metadata: &JsValue) -> InterceptEvent {
    let event = InterceptEvent::new(event, outcome);
    match realm.invocation(metadata) {
        Some(record) => event
            .invocation(record.id().0, record.kind().label())
            .target(record.function().index()),
        None => event,
    }
}

/// `(metadata, thunk) => thunk()`.
pub fn passthrough_hook(realm: &Realm) -> ObjectHandle {
    realm.intrinsics().passthrough_hook
}

/// `() => {}`.
pub fn nop_hook(realm: &Realm) -> ObjectHandle {
    realm.intrinsics().nop_hook
}

/// Allocate the passthrough and no-op hooks of a fresh realm.
pub(crate) fn install(realm: &mut Realm) -> (ObjectHandle, ObjectHandle) {
    let passthrough = realm.arrow(2, |realm, ctx| {
        let thunk = ctx.arg(1);
        realm.call(&thunk, JsValue::Undefined, Vec::new())
    });
    let nop = realm.arrow(0, |_, _| Ok(JsValue::Undefined));
    (passthrough, nop)
}
