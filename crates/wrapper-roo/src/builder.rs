//! Fluent entry points: `wrap(realm, f).with_pre_hook(pre)` and friends.
//!
//! Every method validates the target before building any hook, so a
//! rejected call leaves nothing half-built in the realm.

use crate::hooks::build_pre_post_hook;
use crate::interceptor::{InterceptError, check_callable, wrap_with_hook};
use crate::object_model::JsValue;
use crate::realm::Realm;

/// Pending wrap of one target.
#[derive(Debug)]
pub struct Wrap<'r> {
    realm: &'r mut Realm,
    target: JsValue,
}

/// Start wrapping `target`.
pub fn wrap(realm: &mut Realm, target: impl Into<JsValue>) -> Wrap<'_> {
    Wrap {
        realm,
        target: target.into(),
    }
}

/// Wrap with the passthrough hook.
pub fn wrap_the(realm: &mut Realm, target: impl Into<JsValue>) -> Result<JsValue, InterceptError> {
    let hook = realm.intrinsics().passthrough_hook;
    wrap_with_hook(realm, &target.into(), &hook.into())
}

impl Wrap<'_> {
    /// `hook(metadata, thunk)` decides whether, when and how often the
    /// target runs; its completion is the wrapper's.
    pub fn with_custom_hook(self, hook: impl Into<JsValue>) -> Result<JsValue, InterceptError> {
        wrap_with_hook(self.realm, &self.target, &hook.into())
    }

    pub fn with_hook(self, hook: impl Into<JsValue>) -> Result<JsValue, InterceptError> {
        self.with_custom_hook(hook)
    }

    pub fn with_pre_hook(self, pre: impl Into<JsValue>) -> Result<JsValue, InterceptError> {
        let nop = self.realm.intrinsics().nop_hook;
        self.with_pre_post_hooks(pre, nop)
    }

    pub fn with_post_hook(self, post: impl Into<JsValue>) -> Result<JsValue, InterceptError> {
        let nop = self.realm.intrinsics().nop_hook;
        self.with_pre_post_hooks(nop, post)
    }

    pub fn with_pre_post_hooks(
        self,
        pre: impl Into<JsValue>,
        post: impl Into<JsValue>,
    ) -> Result<JsValue, InterceptError> {
        check_callable(
            self.realm,
            &self.target,
            "target",
            "The object to be wrapped must be a function",
        )?;
        let hook = build_pre_post_hook(self.realm, &pre.into(), &post.into())?;
        wrap_with_hook(self.realm, &self.target, &hook.into())
    }
}
