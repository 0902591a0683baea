#![forbid(unsafe_code)]
//! Transparent function interception with pre/post hooks.
//!
//! Targets, hooks and wrappers live in a [`Realm`], a small ES2020-style
//! object world where callables are heap objects with identity, a
//! prototype chain and call/construct behaviour. A wrapper is
//! indistinguishable from its target except that every call or
//! construction is routed through a hook:
//!
//! ```
//! use wrapper_roo::{JsValue, Realm, wrap};
//!
//! let mut realm = Realm::new();
//! let answer = realm.function("answer", 0, |_, _| Ok(JsValue::Int(42)));
//! let log = realm.function("log", 1, |_, _| Ok(JsValue::Undefined));
//! let wrapped = wrap(&mut realm, answer).with_pre_hook(log).unwrap();
//! assert_eq!(realm.call(&wrapped, JsValue::Undefined, vec![]), Ok(JsValue::Int(42)));
//! ```

pub mod builder;
pub mod config;
pub mod events;
pub mod function;
pub mod hooks;
pub mod interceptor;
pub mod metadata;
pub mod object_model;
pub mod realm;

pub use builder::{Wrap, wrap, wrap_the};
pub use config::{ConfigError, RealmConfig};
pub use events::{EventLog, InterceptEvent};
pub use function::{CallContext, FunctionKind, FunctionSpec, NativeBehavior};
pub use hooks::{build_pre_post_hook, nop_hook, passthrough_hook};
pub use interceptor::{
    FacetCheck, InterceptError, MIRRORED_FACETS, MirroredFacet, mirroring_report, wrap_with_hook,
};
pub use metadata::{InvocationId, InvocationKind, InvocationMetadata, MetadataError, Outcome};
pub use object_model::{JsValue, ObjectHandle, PropertyDescriptor, PropertyKey, SymbolId};
pub use realm::{Completion, ErrorKind, Intrinsics, Realm, Reflect, Throw};
