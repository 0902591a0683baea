//! The realm: heap, intrinsics and the internal methods of every object kind.
//!
//! Ordinary objects run the ES2020 ordinary internal methods (§9.1). Wrapper
//! objects forward every internal method to their target except `[[Get]]`,
//! `[[Call]]` and `[[Construct]]`, which the interceptor handles.
//!
//! Exceptions are values: a failed operation returns `Err(Throw(value))`
//! and the thrown value keeps its identity all the way to the caller.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RealmConfig;
use crate::events::{EVENT_CALL_DEPTH_EXCEEDED, EventLog, InterceptEvent};
use crate::function::{
    CallContext, FunctionKind, FunctionSlot, FunctionSpec, GeneratorState, NativeBehavior,
    NativeFn, NativeFnId,
};
use crate::hooks;
use crate::interceptor::{self, WrapperObject};
use crate::metadata::{InvocationId, InvocationMetadata};
use crate::object_model::{
    JsValue, Lifetime, MAX_PROTOTYPE_CHAIN_DEPTH, ManagedObject, ObjectError, ObjectHandle,
    ObjectHeap, ObjectSlot, OrdinaryObject, PropertyDescriptor, PropertyKey, SymbolId,
};

/// Largest array `length` (2^32 - 1).
pub const MAX_ARRAY_LENGTH: i64 = 4_294_967_295;

// ---------------------------------------------------------------------------
// Completions
// ---------------------------------------------------------------------------

/// A thrown value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Throw(pub JsValue);

impl Throw {
    pub fn value(&self) -> &JsValue {
        &self.0
    }
}

impl fmt::Display for Throw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uncaught {}", self.0)
    }
}

/// Normal or throw completion.
pub type Completion = Result<JsValue, Throw>;

/// Native error constructors the realm knows how to classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::TypeError => "TypeError",
            Self::RangeError => "RangeError",
            Self::ReferenceError => "ReferenceError",
        }
    }
}

// ---------------------------------------------------------------------------
// Intrinsics
// ---------------------------------------------------------------------------

/// Well-known objects of a realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub object_prototype: ObjectHandle,
    pub function_prototype: ObjectHandle,
    pub array_prototype: ObjectHandle,
    pub generator_prototype: ObjectHandle,
    pub error_prototype: ObjectHandle,
    pub type_error_prototype: ObjectHandle,
    pub range_error_prototype: ObjectHandle,
    pub reference_error_prototype: ObjectHandle,
    /// `Function.prototype.toString`.
    pub function_to_string: ObjectHandle,
    /// `Function.prototype.bind`.
    pub function_bind: ObjectHandle,
    /// `Function.prototype.call`.
    pub function_call: ObjectHandle,
    /// `(metadata, thunk) => thunk()`.
    pub passthrough_hook: ObjectHandle,
    /// `() => {}`.
    pub nop_hook: ObjectHandle,
}

impl Intrinsics {
    pub fn error_prototype_for(&self, kind: ErrorKind) -> ObjectHandle {
        match kind {
            ErrorKind::Error => self.error_prototype,
            ErrorKind::TypeError => self.type_error_prototype,
            ErrorKind::RangeError => self.range_error_prototype,
            ErrorKind::ReferenceError => self.reference_error_prototype,
        }
    }

    fn error_kind_of_prototype(&self, proto: ObjectHandle) -> Option<ErrorKind> {
        [
            ErrorKind::TypeError,
            ErrorKind::RangeError,
            ErrorKind::ReferenceError,
            ErrorKind::Error,
        ]
        .into_iter()
        .find(|kind| self.error_prototype_for(*kind) == proto)
    }
}

// ---------------------------------------------------------------------------
// Realm
// ---------------------------------------------------------------------------

/// A self-contained object world. Single-threaded; driven through `&mut`.
pub struct Realm {
    pub(crate) heap: ObjectHeap,
    natives: Vec<NativeBehavior>,
    pub(crate) intrinsics: Intrinsics,
    /// Live invocation records, removed when the wrapper call returns.
    pub(crate) invocations: BTreeMap<InvocationId, InvocationMetadata>,
    pub(crate) next_invocation: u64,
    /// Target → hooked `toString`; `None` is the placeholder written before
    /// the hooked stringifier is built. Entries are never evicted.
    pub(crate) to_string_cache: BTreeMap<ObjectHandle, Option<ObjectHandle>>,
    events: EventLog,
    config: RealmConfig,
    depth: u32,
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("objects", &self.heap.len())
            .field("natives", &self.natives.len())
            .field("live_invocations", &self.invocations.len())
            .field("depth", &self.depth)
            .finish()
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

impl Realm {
    pub fn new() -> Self {
        Self::with_config(RealmConfig::default())
    }

    pub fn with_config(config: RealmConfig) -> Self {
        let mut heap = ObjectHeap::new();
        let object_prototype = heap.alloc_plain(None);
        let function_prototype = heap.alloc(OrdinaryObject {
            prototype: Some(object_prototype),
            class_tag: Some("Function".to_string()),
            ..OrdinaryObject::default()
        });
        let array_prototype = heap.alloc_plain(Some(object_prototype));
        let generator_prototype = heap.alloc_plain(Some(object_prototype));
        let error_prototype = heap.alloc_plain(Some(object_prototype));
        let type_error_prototype = heap.alloc_plain(Some(error_prototype));
        let range_error_prototype = heap.alloc_plain(Some(error_prototype));
        let reference_error_prototype = heap.alloc_plain(Some(error_prototype));

        // Method slots point at Function.prototype until install_builtins
        // replaces them.
        let intrinsics = Intrinsics {
            object_prototype,
            function_prototype,
            array_prototype,
            generator_prototype,
            error_prototype,
            type_error_prototype,
            range_error_prototype,
            reference_error_prototype,
            function_to_string: function_prototype,
            function_bind: function_prototype,
            function_call: function_prototype,
            passthrough_hook: function_prototype,
            nop_hook: function_prototype,
        };

        let mut realm = Self {
            heap,
            natives: Vec::new(),
            intrinsics,
            invocations: BTreeMap::new(),
            next_invocation: 1,
            to_string_cache: BTreeMap::new(),
            events: EventLog::new(&config),
            config,
            depth: 0,
        };
        realm.install_builtins();
        let (passthrough, nop) = hooks::install(&mut realm);
        realm.intrinsics.passthrough_hook = passthrough;
        realm.intrinsics.nop_hook = nop;
        realm
    }

    fn install_builtins(&mut self) {
        for kind in [
            ErrorKind::Error,
            ErrorKind::TypeError,
            ErrorKind::RangeError,
            ErrorKind::ReferenceError,
        ] {
            let proto = self.intrinsics.error_prototype_for(kind);
            self.put_builtin(proto, "name", JsValue::Str(kind.name().to_string()));
            self.put_builtin(proto, "message", JsValue::Str(String::new()));
        }

        let to_string = self.method("toString", 0, |realm, ctx| {
            realm.function_source(&ctx.this).map(JsValue::Str)
        });
        let bind = self.method("bind", 1, |realm, ctx| {
            let (this_arg, rest) = split_this_arg(&ctx.arguments);
            realm.bind(&ctx.this, this_arg, rest).map(JsValue::Object)
        });
        let call = self.method("call", 1, |realm, ctx| {
            let (this_arg, rest) = split_this_arg(&ctx.arguments);
            realm.call(&ctx.this, this_arg, rest)
        });
        let function_prototype = self.intrinsics.function_prototype;
        self.put_builtin(function_prototype, "toString", to_string.into());
        self.put_builtin(function_prototype, "bind", bind.into());
        self.put_builtin(function_prototype, "call", call.into());
        self.intrinsics.function_to_string = to_string;
        self.intrinsics.function_bind = bind;
        self.intrinsics.function_call = call;

        let next = self.method("next", 0, |realm, ctx| match ctx.this.as_object() {
            Some(generator) => realm.resume_generator(generator),
            None => Err(realm.throw_error(
                ErrorKind::TypeError,
                "next method called on incompatible receiver",
            )),
        });
        let generator_prototype = self.intrinsics.generator_prototype;
        self.put_builtin(generator_prototype, "next", next.into());
    }

    fn put_builtin(&mut self, object: ObjectHandle, key: &str, value: JsValue) {
        if let Ok(o) = self.heap.ordinary_mut(object) {
            o.properties
                .insert(key.into(), PropertyDescriptor::builtin(value));
        }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn config(&self) -> &RealmConfig {
        &self.config
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// Current activation nesting.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<InterceptEvent> {
        self.events.drain()
    }

    /// Per-event totals, including events dropped past capacity.
    pub fn event_counts(&self) -> &BTreeMap<String, u64> {
        self.events.counts()
    }

    pub(crate) fn emit(&mut self, event: InterceptEvent) {
        self.events.emit(event);
    }

    // -- Errors ---------------------------------------------------------------

    /// Allocate an error object of `kind`.
    pub fn new_error(&mut self, kind: ErrorKind, message: &str) -> JsValue {
        let mut object =
            OrdinaryObject::with_prototype(Some(self.intrinsics.error_prototype_for(kind)));
        object.class_tag = Some("Error".to_string());
        object.properties.insert(
            "message".into(),
            PropertyDescriptor::builtin(JsValue::Str(message.to_string())),
        );
        JsValue::Object(self.heap.alloc(object))
    }

    pub fn throw_error(&mut self, kind: ErrorKind, message: &str) -> Throw {
        Throw(self.new_error(kind, message))
    }

    /// Most specific native error kind on the value's prototype chain.
    pub fn error_kind(&self, value: &JsValue) -> Option<ErrorKind> {
        let mut current = self.heap.ordinary(value.as_object()?).ok()?.prototype;
        let mut depth: u32 = 0;
        while let Some(h) = current {
            if let Some(kind) = self.intrinsics.error_kind_of_prototype(h) {
                return Some(kind);
            }
            depth += 1;
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return None;
            }
            current = self.heap.ordinary(h).ok()?.prototype;
        }
        None
    }

    /// Own `message` of an error object.
    pub fn error_message(&self, value: &JsValue) -> Option<String> {
        let object = self.heap.ordinary(value.as_object()?).ok()?;
        object
            .get_own_property(&"message".into())
            .and_then(|d| d.value())
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    fn object_error(&mut self, err: ObjectError) -> Throw {
        let message = match err {
            ObjectError::TypeError(msg) => msg,
            other => other.to_string(),
        };
        self.throw_error(ErrorKind::TypeError, &message)
    }

    fn lift<T>(&mut self, result: Result<T, ObjectError>) -> Result<T, Throw> {
        result.map_err(|e| self.object_error(e))
    }

    // -- Allocation -----------------------------------------------------------

    /// `{}` with `Object.prototype`.
    pub fn create_object(&mut self) -> ObjectHandle {
        self.heap.alloc_plain(Some(self.intrinsics.object_prototype))
    }

    pub fn create_object_with_proto(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        self.heap.alloc_plain(proto)
    }

    pub fn create_array(&mut self, values: Vec<JsValue>) -> ObjectHandle {
        let object = self.array_object(values);
        self.heap.alloc(object)
    }

    /// Frozen array allocated with `lifetime`.
    pub(crate) fn create_frozen_array(
        &mut self,
        values: Vec<JsValue>,
        lifetime: Lifetime,
    ) -> ObjectHandle {
        let mut object = self.array_object(values);
        object.freeze();
        self.heap.alloc_managed(ManagedObject::Ordinary(object), lifetime)
    }

    fn array_object(&self, values: Vec<JsValue>) -> OrdinaryObject {
        let mut object = OrdinaryObject::with_prototype(Some(self.intrinsics.array_prototype));
        object.class_tag = Some("Array".to_string());
        let length = i64::try_from(values.len()).unwrap_or(MAX_ARRAY_LENGTH);
        for (index, value) in values.into_iter().enumerate() {
            object
                .properties
                .insert(index.to_string().into(), PropertyDescriptor::data(value));
        }
        object.properties.insert(
            "length".into(),
            PropertyDescriptor::Data {
                value: JsValue::Int(length),
                writable: true,
                enumerable: false,
                configurable: false,
            },
        );
        object
    }

    /// Read an array-like back into a vector. A `length` beyond the array
    /// index range is a RangeError.
    pub fn array_values(&mut self, array: &JsValue) -> Result<Vec<JsValue>, Throw> {
        let length = self.get_value(array, "length")?.as_int().unwrap_or(0).max(0);
        if length > MAX_ARRAY_LENGTH {
            return Err(self.throw_error(ErrorKind::RangeError, "Invalid array length"));
        }
        let mut values = Vec::new();
        for index in 0..length {
            values.push(self.get_value(array, index.to_string())?);
        }
        Ok(values)
    }

    pub fn new_symbol(&mut self) -> SymbolId {
        self.heap.alloc_symbol()
    }

    // -- Functions --------------------------------------------------------------

    fn register_native(&mut self, behavior: NativeBehavior) -> NativeFnId {
        let id = NativeFnId(self.natives.len());
        self.natives.push(behavior);
        id
    }

    fn native(&mut self, id: NativeFnId) -> Result<NativeBehavior, Throw> {
        match self.natives.get(id.0) {
            Some(behavior) => Ok(behavior.clone()),
            None => Err(self.throw_error(
                ErrorKind::TypeError,
                &format!("native behaviour {} is not registered", id.0),
            )),
        }
    }

    /// Allocate a function described by `spec`. Derived classes read the
    /// parent's `prototype` property, which may run a getter.
    pub fn create_function(
        &mut self,
        spec: FunctionSpec,
        behavior: NativeBehavior,
    ) -> Result<ObjectHandle, Throw> {
        let prototype_parent = match spec.kind {
            FunctionKind::DerivedClass => {
                let Some(parent) = spec.parent else {
                    return Err(self.throw_error(
                        ErrorKind::TypeError,
                        "derived class requires a parent constructor",
                    ));
                };
                if !self.is_constructor(&parent.into()) {
                    return Err(self.throw_error(
                        ErrorKind::TypeError,
                        "Class extends value is not a constructor or null",
                    ));
                }
                match self.get(parent, &"prototype".into(), &parent.into())? {
                    JsValue::Object(p) => Some(p),
                    JsValue::Null => None,
                    _ => {
                        return Err(self.throw_error(
                            ErrorKind::TypeError,
                            "Class extends value does not have valid prototype property",
                        ));
                    }
                }
            }
            FunctionKind::Generator => Some(self.intrinsics.generator_prototype),
            _ => Some(self.intrinsics.object_prototype),
        };
        Ok(self.alloc_function(spec, behavior, prototype_parent))
    }

    fn alloc_function(
        &mut self,
        spec: FunctionSpec,
        behavior: NativeBehavior,
        prototype_parent: Option<ObjectHandle>,
    ) -> ObjectHandle {
        let behavior = self.register_native(behavior);
        let source = spec.source_text();
        let mut object = OrdinaryObject::with_prototype(Some(
            spec.parent.unwrap_or(self.intrinsics.function_prototype),
        ));
        object.class_tag = Some("Function".to_string());
        object.slot = ObjectSlot::Function(FunctionSlot::Native {
            behavior,
            kind: spec.kind,
            source,
        });
        object.properties.insert(
            "length".into(),
            PropertyDescriptor::readonly(JsValue::Int(i64::from(spec.length))),
        );
        object.properties.insert(
            "name".into(),
            PropertyDescriptor::readonly(JsValue::Str(spec.name.clone())),
        );
        let function = self.heap.alloc(object);

        if spec.kind.has_prototype_property() {
            let mut proto_object = OrdinaryObject::with_prototype(prototype_parent);
            if spec.kind != FunctionKind::Generator {
                proto_object
                    .properties
                    .insert("constructor".into(), PropertyDescriptor::builtin(function.into()));
            }
            let proto_object = self.heap.alloc(proto_object);
            if let Ok(o) = self.heap.ordinary_mut(function) {
                o.properties.insert(
                    "prototype".into(),
                    PropertyDescriptor::Data {
                        value: proto_object.into(),
                        writable: !spec.kind.is_class(),
                        enumerable: false,
                        configurable: false,
                    },
                );
            }
        }
        function
    }

    /// `function name(...) { body }`.
    pub fn function(
        &mut self,
        name: &str,
        length: u32,
        body: impl Fn(&mut Realm, &mut CallContext) -> Completion + 'static,
    ) -> ObjectHandle {
        let prototype_parent = Some(self.intrinsics.object_prototype);
        self.alloc_function(
            FunctionSpec::new(name, length, FunctionKind::Normal),
            NativeBehavior::function(body),
            prototype_parent,
        )
    }

    /// `(...) => body`: not constructible.
    pub fn arrow(
        &mut self,
        length: u32,
        body: impl Fn(&mut Realm, &mut CallContext) -> Completion + 'static,
    ) -> ObjectHandle {
        self.alloc_function(
            FunctionSpec::new("", length, FunctionKind::Arrow),
            NativeBehavior::function(body),
            None,
        )
    }

    /// Built-in style method: not constructible, no `prototype`.
    pub fn method(
        &mut self,
        name: &str,
        length: u32,
        body: impl Fn(&mut Realm, &mut CallContext) -> Completion + 'static,
    ) -> ObjectHandle {
        self.alloc_function(
            FunctionSpec::new(name, length, FunctionKind::Method),
            NativeBehavior::function(body),
            None,
        )
    }

    /// `class name [extends parent] { constructor(...) { body } }`.
    pub fn class(
        &mut self,
        name: &str,
        length: u32,
        parent: Option<ObjectHandle>,
        body: impl Fn(&mut Realm, &mut CallContext) -> Completion + 'static,
    ) -> Result<ObjectHandle, Throw> {
        let spec = match parent {
            Some(parent) => FunctionSpec::new(name, length, FunctionKind::DerivedClass).extending(parent),
            None => FunctionSpec::new(name, length, FunctionKind::BaseClass),
        };
        self.create_function(spec, NativeBehavior::function(body))
    }

    /// `function* name(...) { yield ... }`: the body returns the yield sequence.
    pub fn generator(
        &mut self,
        name: &str,
        length: u32,
        body: impl Fn(&mut Realm, &mut CallContext) -> Result<Vec<JsValue>, Throw> + 'static,
    ) -> ObjectHandle {
        let prototype_parent = Some(self.intrinsics.generator_prototype);
        self.alloc_function(
            FunctionSpec::new(name, length, FunctionKind::Generator),
            NativeBehavior::generator(body),
            prototype_parent,
        )
    }

    /// `Function.prototype.bind` (§19.2.3.2). Never consults a `bind`
    /// property on the target.
    pub fn bind(
        &mut self,
        target: &JsValue,
        bound_this: JsValue,
        bound_args: Vec<JsValue>,
    ) -> Result<ObjectHandle, Throw> {
        self.bound_function(target, bound_this, bound_args, Lifetime::Realm)
    }

    /// Call thunk of a wrapper invocation: a bound function owned by it.
    pub(crate) fn bind_thunk(
        &mut self,
        target: &JsValue,
        bound_this: JsValue,
        bound_args: Vec<JsValue>,
    ) -> Result<ObjectHandle, Throw> {
        let lifetime = self.next_invocation_lifetime();
        self.bound_function(target, bound_this, bound_args, lifetime)
    }

    /// `BoundFunctionCreate` plus the `length`/`name` setup of
    /// `Function.prototype.bind`: `length` is only read when the target
    /// has it as an own property.
    fn bound_function(
        &mut self,
        target: &JsValue,
        bound_this: JsValue,
        bound_args: Vec<JsValue>,
        lifetime: Lifetime,
    ) -> Result<ObjectHandle, Throw> {
        let Some(target_handle) = target.as_object().filter(|_| self.is_callable(target)) else {
            return Err(self.throw_error(ErrorKind::TypeError, "Bind must be called on a function"));
        };
        let proto = self.get_prototype_of(target_handle)?;
        let mut length = 0;
        if self.get_own_property(target_handle, &"length".into())?.is_some() {
            let target_length = self.get(target_handle, &"length".into(), target)?;
            let bound = i64::try_from(bound_args.len()).unwrap_or(i64::MAX);
            length = target_length.as_int().unwrap_or(0).saturating_sub(bound).max(0);
        }
        let target_name = self.get(target_handle, &"name".into(), target)?;
        let name = format!("bound {}", target_name.as_str().unwrap_or(""));

        let mut object = OrdinaryObject::with_prototype(proto);
        object.class_tag = Some("Function".to_string());
        object.slot = ObjectSlot::Function(FunctionSlot::Bound {
            target: target_handle,
            bound_this,
            bound_args,
        });
        object
            .properties
            .insert("length".into(), PropertyDescriptor::readonly(JsValue::Int(length)));
        object
            .properties
            .insert("name".into(), PropertyDescriptor::readonly(JsValue::Str(name)));
        Ok(self.heap.alloc_managed(ManagedObject::Ordinary(object), lifetime))
    }

    /// Zero-argument thunk performing `Reflect.construct(target, args,
    /// new_target)`, owned by the wrapper invocation about to open.
    pub(crate) fn deferred_construct(
        &mut self,
        target: ObjectHandle,
        arguments: Vec<JsValue>,
        new_target: ObjectHandle,
    ) -> ObjectHandle {
        let mut object = OrdinaryObject::with_prototype(Some(self.intrinsics.function_prototype));
        object.class_tag = Some("Function".to_string());
        object.slot = ObjectSlot::Function(FunctionSlot::DeferredConstruct {
            target,
            arguments,
            new_target,
        });
        object
            .properties
            .insert("length".into(), PropertyDescriptor::readonly(JsValue::Int(0)));
        object.properties.insert(
            "name".into(),
            PropertyDescriptor::readonly(JsValue::Str("bound construct".to_string())),
        );
        let lifetime = self.next_invocation_lifetime();
        self.heap.alloc_managed(ManagedObject::Ordinary(object), lifetime)
    }

    /// `Function.prototype.toString` applied to `function`.
    pub fn function_source(&mut self, function: &JsValue) -> Result<String, Throw> {
        let text = function.as_object().and_then(|h| match self.heap.get(h).ok()? {
            ManagedObject::Ordinary(o) => match o.function_slot()? {
                FunctionSlot::Native { source, .. } => Some(source.clone()),
                FunctionSlot::Bound { .. } | FunctionSlot::DeferredConstruct { .. } => {
                    Some("function () { [native code] }".to_string())
                }
            },
            ManagedObject::Wrapper(_) => Some("function () { [native code] }".to_string()),
        });
        match text {
            Some(text) => Ok(text),
            None => Err(self.throw_error(
                ErrorKind::TypeError,
                "Function.prototype.toString requires that 'this' be a Function",
            )),
        }
    }

    // -- Classification ---------------------------------------------------------

    pub fn is_callable(&self, value: &JsValue) -> bool {
        let Some(h) = value.as_object() else {
            return false;
        };
        match self.heap.get(h) {
            Ok(ManagedObject::Wrapper(_)) => true,
            Ok(ManagedObject::Ordinary(o)) => o.function_slot().is_some(),
            Err(_) => false,
        }
    }

    pub fn is_constructor(&self, value: &JsValue) -> bool {
        let Some(h) = value.as_object() else {
            return false;
        };
        match self.heap.get(h) {
            Ok(ManagedObject::Wrapper(w)) => self.is_constructor(&w.target.into()),
            Ok(ManagedObject::Ordinary(o)) => match o.function_slot() {
                Some(FunctionSlot::Native { kind, .. }) => kind.is_constructor(),
                Some(FunctionSlot::Bound { target, .. }) => self.is_constructor(&(*target).into()),
                Some(FunctionSlot::DeferredConstruct { .. }) | None => false,
            },
            Err(_) => false,
        }
    }

    /// `typeof value`.
    pub fn type_of(&self, value: &JsValue) -> &'static str {
        if self.is_callable(value) {
            "function"
        } else {
            value.type_name()
        }
    }

    /// Short name used in error messages.
    fn describe(&self, value: &JsValue) -> String {
        let Some(h) = value.as_object() else {
            return value.to_string();
        };
        match self.heap.get(h) {
            Ok(ManagedObject::Wrapper(w)) => self.describe(&w.target.into()),
            Ok(ManagedObject::Ordinary(o)) => o
                .get_own_property(&"name".into())
                .and_then(|d| d.value())
                .and_then(|v| v.as_str())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
            Err(_) => value.to_string(),
        }
    }

    fn wrapper_of(&mut self, handle: ObjectHandle) -> Result<Option<WrapperObject>, Throw> {
        let found = match self.heap.get(handle) {
            Ok(ManagedObject::Wrapper(w)) => Ok(Some(w.clone())),
            Ok(ManagedObject::Ordinary(_)) => Ok(None),
            Err(e) => Err(e),
        };
        self.lift(found)
    }

    fn function_slot_of(&mut self, handle: ObjectHandle) -> Result<Option<FunctionSlot>, Throw> {
        let found = match self.heap.get(handle) {
            Ok(ManagedObject::Ordinary(o)) => Ok(o.function_slot().cloned()),
            Ok(ManagedObject::Wrapper(_)) => Ok(None),
            Err(e) => Err(e),
        };
        self.lift(found)
    }

    // -- Call depth ---------------------------------------------------------------

    /// One activation: a function body, a wrapper dispatch or a property
    /// lookup through a wrapper. Bound functions and construct thunks only
    /// forward and are not counted.
    pub(crate) fn enter(&mut self) -> Result<(), Throw> {
        if self.depth >= self.config.max_call_depth {
            self.emit(
                InterceptEvent::new(EVENT_CALL_DEPTH_EXCEEDED, "rejected").error_code("FE-WRAP-1003"),
            );
            return Err(self.throw_error(
                ErrorKind::RangeError,
                "Maximum call stack size exceeded",
            ));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // -- [[Call]] / [[Construct]] ---------------------------------------------------

    /// Run a native body as one activation.
    fn activate(&mut self, body: &NativeFn, ctx: &mut CallContext) -> Completion {
        self.enter()?;
        let result = body(self, ctx);
        self.leave();
        result
    }

    /// `Call(F, thisArgument, argumentsList)`.
    pub fn call(&mut self, function: &JsValue, this: JsValue, arguments: Vec<JsValue>) -> Completion {
        let Some(handle) = function.as_object().filter(|_| self.is_callable(function)) else {
            let message = format!("{} is not a function", self.describe(function));
            return Err(self.throw_error(ErrorKind::TypeError, &message));
        };
        if let Some(wrapper) = self.wrapper_of(handle)? {
            return interceptor::call_trap(self, &wrapper, this, arguments);
        }
        match self.function_slot_of(handle)? {
            Some(FunctionSlot::Native { behavior, kind, .. }) => match kind {
                FunctionKind::BaseClass | FunctionKind::DerivedClass => {
                    let message = format!(
                        "Class constructor {} cannot be invoked without 'new'",
                        self.describe(function)
                    );
                    Err(self.throw_error(ErrorKind::TypeError, &message))
                }
                FunctionKind::Generator => {
                    let proto = match self.get(handle, &"prototype".into(), function)? {
                        JsValue::Object(p) => p,
                        _ => self.intrinsics.generator_prototype,
                    };
                    let mut object = OrdinaryObject::with_prototype(Some(proto));
                    object.class_tag = Some("Generator".to_string());
                    object.slot =
                        ObjectSlot::Generator(GeneratorState::new(handle, this, arguments));
                    Ok(self.heap.alloc(object).into())
                }
                FunctionKind::Normal | FunctionKind::Arrow | FunctionKind::Method => {
                    let NativeBehavior::Function(body) = self.native(behavior)? else {
                        return Err(self.throw_error(ErrorKind::TypeError, "not a plain function"));
                    };
                    let this = if kind == FunctionKind::Arrow {
                        JsValue::Undefined
                    } else {
                        this
                    };
                    let mut ctx = CallContext {
                        callee: handle,
                        this,
                        arguments,
                        new_target: None,
                    };
                    self.activate(&body, &mut ctx)
                }
            },
            Some(FunctionSlot::Bound {
                target,
                bound_this,
                mut bound_args,
            }) => {
                bound_args.extend(arguments);
                self.call(&target.into(), bound_this, bound_args)
            }
            Some(FunctionSlot::DeferredConstruct {
                target,
                arguments,
                new_target,
            }) => self.construct(&target.into(), arguments, Some(new_target)),
            None => {
                let message = format!("{} is not a function", self.describe(function));
                Err(self.throw_error(ErrorKind::TypeError, &message))
            }
        }
    }

    /// `Construct(F, argumentsList, newTarget)`; `newTarget` defaults to `F`.
    pub fn construct(
        &mut self,
        function: &JsValue,
        arguments: Vec<JsValue>,
        new_target: Option<ObjectHandle>,
    ) -> Completion {
        let Some(handle) = function.as_object().filter(|_| self.is_constructor(function)) else {
            let message = format!("{} is not a constructor", self.describe(function));
            return Err(self.throw_error(ErrorKind::TypeError, &message));
        };
        let new_target = new_target.unwrap_or(handle);
        if let Some(wrapper) = self.wrapper_of(handle)? {
            return interceptor::construct_trap(self, handle, &wrapper, arguments, new_target);
        }
        match self.function_slot_of(handle)? {
            Some(FunctionSlot::Native { behavior, kind, .. }) => {
                let NativeBehavior::Function(body) = self.native(behavior)? else {
                    return Err(self.throw_error(ErrorKind::TypeError, "not a constructor body"));
                };
                let this = if kind == FunctionKind::DerivedClass {
                    JsValue::Undefined
                } else {
                    self.ordinary_create_from_constructor(new_target)?.into()
                };
                let mut ctx = CallContext {
                    callee: handle,
                    this,
                    arguments,
                    new_target: Some(new_target),
                };
                let result = self.activate(&body, &mut ctx)?;
                if result.is_object() {
                    return Ok(result);
                }
                if kind == FunctionKind::DerivedClass && !result.is_undefined() {
                    return Err(self.throw_error(
                        ErrorKind::TypeError,
                        "Derived constructors may only return object or undefined",
                    ));
                }
                if ctx.this.is_object() {
                    Ok(ctx.this)
                } else {
                    Err(self.throw_error(
                        ErrorKind::ReferenceError,
                        "Must call super constructor in derived class before accessing 'this' or returning from derived constructor",
                    ))
                }
            }
            Some(FunctionSlot::Bound {
                target,
                mut bound_args,
                ..
            }) => {
                let new_target = if new_target == handle { target } else { new_target };
                bound_args.extend(arguments);
                self.construct(&target.into(), bound_args, Some(new_target))
            }
            Some(FunctionSlot::DeferredConstruct { .. }) | None => {
                let message = format!("{} is not a constructor", self.describe(function));
                Err(self.throw_error(ErrorKind::TypeError, &message))
            }
        }
    }

    /// `OrdinaryCreateFromConstructor(newTarget, "%Object.prototype%")`.
    fn ordinary_create_from_constructor(
        &mut self,
        new_target: ObjectHandle,
    ) -> Result<ObjectHandle, Throw> {
        let proto = match self.get(new_target, &"prototype".into(), &new_target.into())? {
            JsValue::Object(p) => p,
            _ => self.intrinsics.object_prototype,
        };
        Ok(self.heap.alloc_plain(Some(proto)))
    }

    /// `super(...args)` inside a derived constructor body.
    pub fn super_construct(&mut self, ctx: &mut CallContext, arguments: Vec<JsValue>) -> Completion {
        if ctx.this.is_object() {
            return Err(self.throw_error(
                ErrorKind::ReferenceError,
                "Super constructor may only be called once",
            ));
        }
        let Some(new_target) = ctx.new_target else {
            return Err(self.throw_error(ErrorKind::ReferenceError, "'super' keyword unexpected here"));
        };
        let Some(parent) = self.get_prototype_of(ctx.callee)? else {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                "Super constructor null of anonymous class is not a constructor",
            ));
        };
        let this = self.construct(&parent.into(), arguments, Some(new_target))?;
        ctx.this = this.clone();
        Ok(this)
    }

    // -- Generators ---------------------------------------------------------------

    fn resume_generator(&mut self, generator: ObjectHandle) -> Completion {
        let state = match self.heap.get(generator) {
            Ok(ManagedObject::Ordinary(OrdinaryObject {
                slot: ObjectSlot::Generator(state),
                ..
            })) => Some(state.clone()),
            _ => None,
        };
        let Some(mut state) = state else {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                "next method called on incompatible receiver",
            ));
        };
        if state.done {
            return Ok(self.iter_result(JsValue::Undefined, true));
        }
        if state.buffered.is_none() {
            let body = match self.function_slot_of(state.function)? {
                Some(FunctionSlot::Native { behavior, .. }) => match self.native(behavior)? {
                    NativeBehavior::Generator(body) => body,
                    NativeBehavior::Function(_) => {
                        return Err(self.throw_error(ErrorKind::TypeError, "not a generator function"));
                    }
                },
                _ => return Err(self.throw_error(ErrorKind::TypeError, "not a generator function")),
            };
            let mut ctx = CallContext {
                callee: state.function,
                this: state.this.clone(),
                arguments: state.arguments.clone(),
                new_target: None,
            };
            self.enter()?;
            let produced = body(self, &mut ctx);
            self.leave();
            match produced {
                Ok(values) => state.buffered = Some(values),
                Err(thrown) => {
                    state.done = true;
                    self.store_generator(generator, state);
                    return Err(thrown);
                }
            }
        }
        let next = state
            .buffered
            .as_ref()
            .and_then(|values| values.get(state.cursor))
            .cloned();
        let (value, done) = match next {
            Some(value) => {
                state.cursor += 1;
                (value, false)
            }
            None => {
                state.done = true;
                (JsValue::Undefined, true)
            }
        };
        self.store_generator(generator, state);
        Ok(self.iter_result(value, done))
    }

    fn store_generator(&mut self, generator: ObjectHandle, state: GeneratorState) {
        for value in state.buffered.iter().flatten() {
            self.heap.note_reference(generator, value);
        }
        if let Ok(o) = self.heap.ordinary_mut(generator) {
            o.slot = ObjectSlot::Generator(state);
        }
    }

    fn iter_result(&mut self, value: JsValue, done: bool) -> JsValue {
        let mut result = OrdinaryObject::with_prototype(Some(self.intrinsics.object_prototype));
        result
            .properties
            .insert("value".into(), PropertyDescriptor::data(value));
        result
            .properties
            .insert("done".into(), PropertyDescriptor::data(JsValue::Bool(done)));
        self.heap.alloc(result).into()
    }

    /// Drain an iterator by calling its `next` method until `done`.
    pub fn iterate(&mut self, iterator: &JsValue) -> Result<Vec<JsValue>, Throw> {
        let mut values = Vec::new();
        loop {
            let step = self.invoke(iterator, "next", Vec::new())?;
            if self.get_value(&step, "done")? == JsValue::Bool(true) {
                return Ok(values);
            }
            values.push(self.get_value(&step, "value")?);
        }
    }

    // -- Object internal methods ------------------------------------------------

    /// `[[GetPrototypeOf]]`.
    pub fn get_prototype_of(&mut self, object: ObjectHandle) -> Result<Option<ObjectHandle>, Throw> {
        if let Some(w) = self.wrapper_of(object)? {
            return self.get_prototype_of(w.target);
        }
        self.lift(self.heap.get_prototype_of(object))
    }

    /// `[[SetPrototypeOf]]`.
    pub fn set_prototype_of(
        &mut self,
        object: ObjectHandle,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, Throw> {
        if let Some(w) = self.wrapper_of(object)? {
            return self.set_prototype_of(w.target, proto);
        }
        let result = self.heap.set_prototype_of(object, proto);
        self.lift(result)
    }

    /// `[[IsExtensible]]`.
    pub fn is_extensible(&mut self, object: ObjectHandle) -> Result<bool, Throw> {
        if let Some(w) = self.wrapper_of(object)? {
            return self.is_extensible(w.target);
        }
        self.lift(self.heap.is_extensible(object))
    }

    /// `[[PreventExtensions]]`.
    pub fn prevent_extensions(&mut self, object: ObjectHandle) -> Result<bool, Throw> {
        if let Some(w) = self.wrapper_of(object)? {
            return self.prevent_extensions(w.target);
        }
        let result = self.heap.prevent_extensions(object);
        self.lift(result)
    }

    /// `[[GetOwnProperty]]`.
    pub fn get_own_property(
        &mut self,
        object: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, Throw> {
        if let Some(w) = self.wrapper_of(object)? {
            return self.get_own_property(w.target, key);
        }
        self.lift(self.heap.get_own_property_descriptor(object, key))
    }

    /// `[[DefineOwnProperty]]`.
    pub fn define_own_property(
        &mut self,
        object: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, Throw> {
        if let Some(w) = self.wrapper_of(object)? {
            return self.define_own_property(w.target, key, desc);
        }
        let result = self.heap.define_property(object, key, desc);
        self.lift(result)
    }

    /// `[[HasProperty]]`.
    pub fn has_property(&mut self, object: ObjectHandle, key: &PropertyKey) -> Result<bool, Throw> {
        if let Some(w) = self.wrapper_of(object)? {
            return self.has_property(w.target, key);
        }
        if self.get_own_property(object, key)?.is_some() {
            return Ok(true);
        }
        match self.get_prototype_of(object)? {
            Some(parent) => self.has_property(parent, key),
            None => Ok(false),
        }
    }

    /// `[[Get]](P, Receiver)`; accessors run with `receiver` as `this`.
    pub fn get(&mut self, object: ObjectHandle, key: &PropertyKey, receiver: &JsValue) -> Completion {
        let mut current = object;
        let mut depth: u32 = 0;
        loop {
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(self.object_error(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                }));
            }
            if let Some(w) = self.wrapper_of(current)? {
                return interceptor::get_trap(self, &w, key, receiver);
            }
            match self.lift(self.heap.get_own_property_descriptor(current, key))? {
                Some(PropertyDescriptor::Data { value, .. }) => return Ok(value),
                Some(PropertyDescriptor::Accessor { get: Some(getter), .. }) => {
                    return self.call(&getter.into(), receiver.clone(), Vec::new());
                }
                Some(PropertyDescriptor::Accessor { get: None, .. }) => {
                    return Ok(JsValue::Undefined);
                }
                None => match self.lift(self.heap.get_prototype_of(current))? {
                    Some(parent) => current = parent,
                    None => return Ok(JsValue::Undefined),
                },
            }
            depth += 1;
        }
    }

    /// `[[Set]](P, V, Receiver)`: OrdinarySet (§9.1.9.2).
    pub fn set(
        &mut self,
        object: ObjectHandle,
        key: PropertyKey,
        value: JsValue,
        receiver: &JsValue,
    ) -> Result<bool, Throw> {
        if let Some(w) = self.wrapper_of(object)? {
            return self.set(w.target, key, value, receiver);
        }
        let own = match self.get_own_property(object, &key)? {
            Some(desc) => desc,
            None => match self.get_prototype_of(object)? {
                Some(parent) => return self.set(parent, key, value, receiver),
                None => PropertyDescriptor::data(JsValue::Undefined),
            },
        };
        match own {
            PropertyDescriptor::Data { writable, .. } => {
                if !writable {
                    return Ok(false);
                }
                let Some(receiver) = receiver.as_object() else {
                    return Ok(false);
                };
                match self.get_own_property(receiver, &key)? {
                    Some(existing) => {
                        if existing.is_accessor() || !existing.is_writable() {
                            return Ok(false);
                        }
                        self.define_own_property(receiver, key, existing.with_value(value))
                    }
                    None => self.define_own_property(receiver, key, PropertyDescriptor::data(value)),
                }
            }
            PropertyDescriptor::Accessor { set: Some(setter), .. } => {
                self.call(&setter.into(), receiver.clone(), vec![value])?;
                Ok(true)
            }
            PropertyDescriptor::Accessor { set: None, .. } => Ok(false),
        }
    }

    /// `[[Delete]]`.
    pub fn delete(&mut self, object: ObjectHandle, key: &PropertyKey) -> Result<bool, Throw> {
        if let Some(w) = self.wrapper_of(object)? {
            return self.delete(w.target, key);
        }
        let result = self.heap.delete_property(object, key);
        self.lift(result)
    }

    /// `[[OwnPropertyKeys]]`.
    pub fn own_property_keys(&mut self, object: ObjectHandle) -> Result<Vec<PropertyKey>, Throw> {
        if let Some(w) = self.wrapper_of(object)? {
            return self.own_property_keys(w.target);
        }
        self.lift(self.heap.own_property_keys(object))
    }

    /// `Object.getOwnPropertyDescriptors(O)`.
    pub fn own_property_descriptors(
        &mut self,
        object: ObjectHandle,
    ) -> Result<Vec<(PropertyKey, PropertyDescriptor)>, Throw> {
        let mut result = Vec::new();
        for key in self.own_property_keys(object)? {
            if let Some(desc) = self.get_own_property(object, &key)? {
                result.push((key, desc));
            }
        }
        Ok(result)
    }

    // -- Value-level conveniences -------------------------------------------------

    /// `value[key]`.
    pub fn get_value(&mut self, value: &JsValue, key: impl Into<PropertyKey>) -> Completion {
        let key = key.into();
        match value {
            JsValue::Object(h) => self.get(*h, &key, value),
            JsValue::Undefined | JsValue::Null => {
                let message = format!("Cannot read properties of {value} (reading '{key}')");
                Err(self.throw_error(ErrorKind::TypeError, &message))
            }
            _ => Ok(JsValue::Undefined),
        }
    }

    /// Strict-mode `value[key] = new_value`.
    pub fn set_value(
        &mut self,
        value: &JsValue,
        key: impl Into<PropertyKey>,
        new_value: JsValue,
    ) -> Result<(), Throw> {
        let key = key.into();
        let Some(h) = value.as_object() else {
            let message = format!("Cannot create property '{key}' on {}", value.type_name());
            return Err(self.throw_error(ErrorKind::TypeError, &message));
        };
        if self.set(h, key.clone(), new_value, value)? {
            Ok(())
        } else {
            let message = format!("Cannot assign to read only property '{key}' of object");
            Err(self.throw_error(ErrorKind::TypeError, &message))
        }
    }

    /// `Object.defineProperty(object, key, desc)`; rejection is a TypeError.
    pub fn define_property(
        &mut self,
        object: ObjectHandle,
        key: impl Into<PropertyKey>,
        desc: PropertyDescriptor,
    ) -> Result<(), Throw> {
        let key = key.into();
        if self.define_own_property(object, key.clone(), desc)? {
            Ok(())
        } else {
            let message = format!("Cannot redefine property: {key}");
            Err(self.throw_error(ErrorKind::TypeError, &message))
        }
    }

    /// `value.key(...arguments)`.
    pub fn invoke(
        &mut self,
        value: &JsValue,
        key: impl Into<PropertyKey>,
        arguments: Vec<JsValue>,
    ) -> Completion {
        let function = self.get_value(value, key)?;
        self.call(&function, value.clone(), arguments)
    }
}

fn split_this_arg(arguments: &[JsValue]) -> (JsValue, Vec<JsValue>) {
    match arguments.split_first() {
        Some((first, rest)) => (first.clone(), rest.to_vec()),
        None => (JsValue::Undefined, Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// Reflect: ES2020 Reflect namespace
// ---------------------------------------------------------------------------

/// ES2020 `Reflect` (§26.1) over a realm. Every operation dispatches through
/// the realm's internal methods, so wrappers are handled uniformly.
pub struct Reflect;

impl Reflect {
    /// `Reflect.apply(target, thisArgument, argumentsList)`.
    pub fn apply(
        realm: &mut Realm,
        target: &JsValue,
        this: JsValue,
        arguments: Vec<JsValue>,
    ) -> Completion {
        realm.call(target, this, arguments)
    }

    /// `Reflect.construct(target, argumentsList, newTarget)`.
    pub fn construct(
        realm: &mut Realm,
        target: &JsValue,
        arguments: Vec<JsValue>,
        new_target: Option<&JsValue>,
    ) -> Completion {
        let new_target = match new_target {
            None => None,
            Some(nt) => match nt.as_object().filter(|_| realm.is_constructor(nt)) {
                Some(h) => Some(h),
                None => {
                    let message = format!("{} is not a constructor", realm.describe(nt));
                    return Err(realm.throw_error(ErrorKind::TypeError, &message));
                }
            },
        };
        realm.construct(target, arguments, new_target)
    }

    /// `Reflect.get(target, propertyKey)`.
    pub fn get(realm: &mut Realm, target: ObjectHandle, key: &PropertyKey) -> Completion {
        realm.get(target, key, &target.into())
    }

    /// `Reflect.set(target, propertyKey, value)`.
    pub fn set(
        realm: &mut Realm,
        target: ObjectHandle,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, Throw> {
        realm.set(target, key, value, &target.into())
    }

    pub fn has(realm: &mut Realm, target: ObjectHandle, key: &PropertyKey) -> Result<bool, Throw> {
        realm.has_property(target, key)
    }

    pub fn delete_property(
        realm: &mut Realm,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, Throw> {
        realm.delete(target, key)
    }

    pub fn own_keys(realm: &mut Realm, target: ObjectHandle) -> Result<Vec<PropertyKey>, Throw> {
        realm.own_property_keys(target)
    }

    pub fn get_prototype_of(
        realm: &mut Realm,
        target: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, Throw> {
        realm.get_prototype_of(target)
    }

    pub fn set_prototype_of(
        realm: &mut Realm,
        target: ObjectHandle,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, Throw> {
        realm.set_prototype_of(target, proto)
    }

    pub fn is_extensible(realm: &mut Realm, target: ObjectHandle) -> Result<bool, Throw> {
        realm.is_extensible(target)
    }

    pub fn prevent_extensions(realm: &mut Realm, target: ObjectHandle) -> Result<bool, Throw> {
        realm.prevent_extensions(target)
    }

    pub fn define_property(
        realm: &mut Realm,
        target: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, Throw> {
        realm.define_own_property(target, key, desc)
    }

    pub fn get_own_property_descriptor(
        realm: &mut Realm,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, Throw> {
        realm.get_own_property(target, key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
