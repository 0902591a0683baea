//! Wrapper exotic objects: hooked `[[Call]]`/`[[Construct]]` over a target.
//!
//! A wrapper forwards every internal method to its target except:
//! - `[[Call]]`: builds a bound thunk and invokes `hook(metadata, thunk)`;
//! - `[[Construct]]`: same with a deferred construction, with `new.target`
//!   rewritten to the target when it is the wrapper itself;
//! - `[[Get]]`: resolves on the target, but the intrinsic
//!   `Function.prototype.toString` is replaced by a per-target hooked
//!   stringifier so `wrapper.toString()` reports the target's source.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{
    EVENT_HOOK_REJECTED, EVENT_INVOCATION_SETTLED, EVENT_WRAPPER_CREATED, InterceptEvent,
};
use crate::metadata::InvocationKind;
use crate::object_model::{JsValue, ManagedObject, ObjectHandle, PropertyKey};
use crate::realm::{Completion, ErrorKind, Realm, Throw};

/// Stable code for invalid wrap/build arguments.
pub const INVALID_ARGUMENT_CODE: &str = "FE-WRAP-1001";

// ---------------------------------------------------------------------------
// WrapperObject
// ---------------------------------------------------------------------------

/// Heap entry of a wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperObject {
    pub target: ObjectHandle,
    pub hook: ObjectHandle,
    /// Replaces the caller's `this` on plain calls; only set on hooked
    /// stringifiers, where it is the function being stringified.
    pub this_override: Option<JsValue>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterceptError {
    #[error("{message}")]
    InvalidArgument { parameter: String, message: String },
}

impl InterceptError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => INVALID_ARGUMENT_CODE,
        }
    }

    /// Lift into a realm `TypeError`.
    pub fn into_throw(self, realm: &mut Realm) -> Throw {
        realm.throw_error(ErrorKind::TypeError, &self.to_string())
    }
}

pub(crate) fn check_callable(
    realm: &mut Realm,
    value: &JsValue,
    parameter: &str,
    message: &str,
) -> Result<ObjectHandle, InterceptError> {
    if let Some(handle) = value.as_object().filter(|_| realm.is_callable(value)) {
        return Ok(handle);
    }
    realm.emit(InterceptEvent::new(EVENT_HOOK_REJECTED, "rejected").error_code(INVALID_ARGUMENT_CODE));
    Err(InterceptError::InvalidArgument {
        parameter: parameter.to_string(),
        message: message.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Wrapping
// ---------------------------------------------------------------------------

/// Wrap `target` so every call and construction goes through `hook`.
pub fn wrap_with_hook(
    realm: &mut Realm,
    target: &JsValue,
    hook: &JsValue,
) -> Result<JsValue, InterceptError> {
    let target = check_callable(
        realm,
        target,
        "target",
        "The object to be wrapped must be a function",
    )?;
    let hook = check_callable(realm, hook, "hook", "The hook must be a function")?;
    Ok(wrap_inner(realm, target, hook, None).into())
}

fn wrap_inner(
    realm: &mut Realm,
    target: ObjectHandle,
    hook: ObjectHandle,
    this_override: Option<JsValue>,
) -> ObjectHandle {
    cache_hooked_to_string(realm, target);
    let wrapper = realm.heap.alloc_wrapper(WrapperObject {
        target,
        hook,
        this_override,
    });
    realm.emit(InterceptEvent::new(EVENT_WRAPPER_CREATED, "ok").target(target.index()));
    wrapper
}

/// The placeholder goes in first: wrapping `Function.prototype.toString`
/// recurses into this function for that target.
fn cache_hooked_to_string(realm: &mut Realm, target: ObjectHandle) {
    if realm.to_string_cache.contains_key(&target) {
        return;
    }
    realm.to_string_cache.insert(target, None);
    let to_string = realm.intrinsics.function_to_string;
    let passthrough = realm.intrinsics.passthrough_hook;
    let hooked = wrap_inner(realm, to_string, passthrough, Some(target.into()));
    realm.to_string_cache.insert(target, Some(hooked));
}

/// Target of a wrapper, `None` for anything else.
pub fn target_of(realm: &Realm, value: &JsValue) -> Option<ObjectHandle> {
    match realm.heap.get(value.as_object()?).ok()? {
        ManagedObject::Wrapper(w) => Some(w.target),
        ManagedObject::Ordinary(_) => None,
    }
}

pub fn is_wrapper(realm: &Realm, value: &JsValue) -> bool {
    target_of(realm, value).is_some()
}

// ---------------------------------------------------------------------------
// Traps
// ---------------------------------------------------------------------------

pub(crate) fn call_trap(
    realm: &mut Realm,
    wrapper: &WrapperObject,
    this: JsValue,
    arguments: Vec<JsValue>,
) -> Completion {
    let this = wrapper.this_override.clone().unwrap_or(this);
    // Realm-internal bind: a `bind`, `call` or `apply` property on the
    // target is never looked up.
    let thunk = realm.bind_thunk(&wrapper.target.into(), this.clone(), arguments.clone())?;
    dispatch(realm, wrapper, arguments, InvocationKind::Call { this }, thunk)
}

pub(crate) fn construct_trap(
    realm: &mut Realm,
    handle: ObjectHandle,
    wrapper: &WrapperObject,
    arguments: Vec<JsValue>,
    new_target: ObjectHandle,
) -> Completion {
    let new_target = if new_target == handle {
        wrapper.target
    } else {
        new_target
    };
    let thunk = realm.deferred_construct(wrapper.target, arguments.clone(), new_target);
    dispatch(
        realm,
        wrapper,
        arguments,
        InvocationKind::Construct { new_target },
        thunk,
    )
}

fn dispatch(
    realm: &mut Realm,
    wrapper: &WrapperObject,
    arguments: Vec<JsValue>,
    kind: InvocationKind,
    thunk: ObjectHandle,
) -> Completion {
    let label = kind.label();
    if let Err(thrown) = realm.enter() {
        realm.heap.release(&[thunk]);
        return Err(thrown);
    }
    let (id, metadata) = realm.open_invocation(wrapper.target, arguments, kind, thunk);
    let result = realm.call(
        &wrapper.hook.into(),
        JsValue::Undefined,
        vec![metadata.into(), thunk.into()],
    );
    realm.leave();
    // Whatever leaves the hook outlives the invocation.
    match &result {
        Ok(value) => realm.heap.escape(value),
        Err(thrown) => realm.heap.escape(thrown.value()),
    }
    realm.close_invocation(id);
    let outcome = if result.is_ok() { "ok" } else { "threw" };
    realm.emit(
        InterceptEvent::new(EVENT_INVOCATION_SETTLED, outcome)
            .invocation(id.0, label)
            .target(wrapper.target.index()),
    );
    result
}

pub(crate) fn get_trap(
    realm: &mut Realm,
    wrapper: &WrapperObject,
    key: &PropertyKey,
    receiver: &JsValue,
) -> Completion {
    // Wrappers can sit on each other's prototype chains; the depth guard
    // turns a cycle through them into a RangeError.
    realm.enter()?;
    let value = realm.get(wrapper.target, key, receiver);
    realm.leave();
    let value = value?;

    if key.is_named("toString")
        && value == JsValue::Object(realm.intrinsics.function_to_string)
        && let Some(Some(hooked)) = realm.to_string_cache.get(&wrapper.target)
    {
        return Ok((*hooked).into());
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Mirroring report
// ---------------------------------------------------------------------------

/// Observable facets a wrapper shares with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirroredFacet {
    Prototype,
    Extensible,
    OwnKeys,
    OwnDescriptors,
    Name,
    Length,
    PrototypeProperty,
    SourceText,
}

impl fmt::Display for MirroredFacet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prototype => "prototype",
            Self::Extensible => "extensible",
            Self::OwnKeys => "own_keys",
            Self::OwnDescriptors => "own_descriptors",
            Self::Name => "name",
            Self::Length => "length",
            Self::PrototypeProperty => "prototype_property",
            Self::SourceText => "source_text",
        };
        f.write_str(s)
    }
}

pub const MIRRORED_FACETS: [MirroredFacet; 8] = [
    MirroredFacet::Prototype,
    MirroredFacet::Extensible,
    MirroredFacet::OwnKeys,
    MirroredFacet::OwnDescriptors,
    MirroredFacet::Name,
    MirroredFacet::Length,
    MirroredFacet::PrototypeProperty,
    MirroredFacet::SourceText,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCheck {
    pub facet: MirroredFacet,
    pub matches: bool,
    /// Debug rendering of both sides when they differ.
    pub detail: Option<String>,
}

impl FacetCheck {
    fn compare<T: PartialEq + fmt::Debug>(facet: MirroredFacet, wrapper: T, target: T) -> Self {
        let matches = wrapper == target;
        let detail = (!matches).then(|| format!("wrapper={wrapper:?} target={target:?}"));
        Self {
            facet,
            matches,
            detail,
        }
    }
}

/// Compare each [`MirroredFacet`] of `wrapper` against its target.
pub fn mirroring_report(realm: &mut Realm, wrapper: &JsValue) -> Result<Vec<FacetCheck>, Throw> {
    let Some(target) = target_of(realm, wrapper) else {
        return Err(realm.throw_error(ErrorKind::TypeError, "value is not a wrapper"));
    };
    let Some(w) = wrapper.as_object() else {
        return Err(realm.throw_error(ErrorKind::TypeError, "value is not a wrapper"));
    };
    let t = JsValue::Object(target);

    let mut report = Vec::with_capacity(MIRRORED_FACETS.len());
    for facet in MIRRORED_FACETS {
        let check = match facet {
            MirroredFacet::Prototype => FacetCheck::compare(
                facet,
                realm.get_prototype_of(w)?,
                realm.get_prototype_of(target)?,
            ),
            MirroredFacet::Extensible => {
                FacetCheck::compare(facet, realm.is_extensible(w)?, realm.is_extensible(target)?)
            }
            MirroredFacet::OwnKeys => FacetCheck::compare(
                facet,
                realm.own_property_keys(w)?,
                realm.own_property_keys(target)?,
            ),
            MirroredFacet::OwnDescriptors => FacetCheck::compare(
                facet,
                realm.own_property_descriptors(w)?,
                realm.own_property_descriptors(target)?,
            ),
            MirroredFacet::Name => FacetCheck::compare(
                facet,
                realm.get_value(wrapper, "name")?,
                realm.get_value(&t, "name")?,
            ),
            MirroredFacet::Length => FacetCheck::compare(
                facet,
                realm.get_value(wrapper, "length")?,
                realm.get_value(&t, "length")?,
            ),
            MirroredFacet::PrototypeProperty => FacetCheck::compare(
                facet,
                realm.get_value(wrapper, "prototype")?,
                realm.get_value(&t, "prototype")?,
            ),
            MirroredFacet::SourceText => FacetCheck::compare(
                facet,
                realm.invoke(wrapper, "toString", Vec::new())?,
                realm.invoke(&t, "toString", Vec::new())?,
            ),
        };
        report.push(check);
    }
    Ok(report)
}
