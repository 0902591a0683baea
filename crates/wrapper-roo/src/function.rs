//! Function objects: kinds, internal slots and native behaviours.
//!
//! Callable bodies are Rust closures registered with the realm. A heap
//! function only stores a `NativeFnId` so the heap itself stays plain data
//! (and serde-friendly); the closures live in the realm's native table.
//!
//! Besides native functions the slot models the two exotic callables the
//! interceptor relies on:
//! - **bound functions** (`Function.prototype.bind` semantics, §10.4.1),
//! - **deferred constructions**: zero-argument thunks that perform
//!   `Reflect.construct(target, args, newTarget)` when called.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::object_model::{JsValue, ObjectHandle};
use crate::realm::{Completion, Realm, Throw};

// ---------------------------------------------------------------------------
// FunctionKind
// ---------------------------------------------------------------------------

/// Syntactic flavour of a function; decides `[[Call]]`/`[[Construct]]`
/// behaviour and the shape of the `prototype` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// `function f() {}`: callable and constructible.
    Normal,
    /// `() => {}`: callable, lexical `this`, not constructible.
    Arrow,
    /// Method or built-in: callable, not constructible.
    Method,
    /// `class C {}`: constructible, calling throws.
    BaseClass,
    /// `class D extends B {}`: like `BaseClass`, `this` comes from `super`.
    DerivedClass,
    /// `function* g() {}`: calling returns a generator, not constructible.
    Generator,
}

impl FunctionKind {
    pub fn is_constructor(self) -> bool {
        matches!(self, Self::Normal | Self::BaseClass | Self::DerivedClass)
    }

    pub fn is_class(self) -> bool {
        matches!(self, Self::BaseClass | Self::DerivedClass)
    }

    pub fn has_prototype_property(self) -> bool {
        matches!(
            self,
            Self::Normal | Self::BaseClass | Self::DerivedClass | Self::Generator
        )
    }

    fn default_source(self, name: &str) -> String {
        match self {
            Self::Normal | Self::Method => format!("function {name}() {{ [native code] }}"),
            Self::Arrow => "() => { [native code] }".to_string(),
            Self::BaseClass => format!("class {name} {{ }}"),
            Self::DerivedClass => format!("class {name} extends Base {{ }}"),
            Self::Generator => format!("function* {name}() {{ [native code] }}"),
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "function",
            Self::Arrow => "arrow",
            Self::Method => "method",
            Self::BaseClass => "class",
            Self::DerivedClass => "derived_class",
            Self::Generator => "generator",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Index into the realm's native behaviour table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NativeFnId(pub usize);

/// `[[Call]]`/`[[Construct]]` internal slot of a function object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionSlot {
    Native {
        behavior: NativeFnId,
        kind: FunctionKind,
        /// Text returned by `Function.prototype.toString`.
        source: String,
    },
    Bound {
        target: ObjectHandle,
        bound_this: JsValue,
        bound_args: Vec<JsValue>,
    },
    DeferredConstruct {
        target: ObjectHandle,
        arguments: Vec<JsValue>,
        new_target: ObjectHandle,
    },
}

/// State of a generator object. The body runs on the first `next()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorState {
    pub function: ObjectHandle,
    pub this: JsValue,
    pub arguments: Vec<JsValue>,
    pub buffered: Option<Vec<JsValue>>,
    pub cursor: usize,
    pub done: bool,
}

impl GeneratorState {
    pub fn new(function: ObjectHandle, this: JsValue, arguments: Vec<JsValue>) -> Self {
        Self {
            function,
            this,
            arguments,
            buffered: None,
            cursor: 0,
            done: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Native behaviours
// ---------------------------------------------------------------------------

/// Everything a native body sees about the current activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// The function object being executed.
    pub callee: ObjectHandle,
    /// `this` binding; for derived constructors `Undefined` until `super`.
    pub this: JsValue,
    pub arguments: Vec<JsValue>,
    /// `new.target`; `None` for plain calls.
    pub new_target: Option<ObjectHandle>,
}

impl CallContext {
    /// Argument `index`, or `undefined` when absent.
    pub fn arg(&self, index: usize) -> JsValue {
        self.arguments.get(index).cloned().unwrap_or(JsValue::Undefined)
    }

    pub fn is_construct(&self) -> bool {
        self.new_target.is_some()
    }
}

pub type NativeFn = Rc<dyn Fn(&mut Realm, &mut CallContext) -> Completion>;
pub type NativeGeneratorFn = Rc<dyn Fn(&mut Realm, &mut CallContext) -> Result<Vec<JsValue>, Throw>>;

/// A registered native body.
#[derive(Clone)]
pub enum NativeBehavior {
    Function(NativeFn),
    /// Produces the full yield sequence when the generator is first resumed.
    Generator(NativeGeneratorFn),
}

impl NativeBehavior {
    pub fn function(f: impl Fn(&mut Realm, &mut CallContext) -> Completion + 'static) -> Self {
        Self::Function(Rc::new(f))
    }

    pub fn generator(
        f: impl Fn(&mut Realm, &mut CallContext) -> Result<Vec<JsValue>, Throw> + 'static,
    ) -> Self {
        Self::Generator(Rc::new(f))
    }
}

impl fmt::Debug for NativeBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("NativeBehavior::Function(..)"),
            Self::Generator(_) => f.write_str("NativeBehavior::Generator(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// FunctionSpec
// ---------------------------------------------------------------------------

/// Declared interface of a function to allocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub length: u32,
    pub kind: FunctionKind,
    pub source: Option<String>,
    /// `[[Prototype]]` of the function object; `Function.prototype` if unset.
    pub parent: Option<ObjectHandle>,
}

impl FunctionSpec {
    pub fn new(name: &str, length: u32, kind: FunctionKind) -> Self {
        Self {
            name: name.to_string(),
            length,
            kind,
            source: None,
            parent: None,
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn extending(mut self, parent: ObjectHandle) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Source text, falling back to a `[native code]` rendering.
    pub fn source_text(&self) -> String {
        self.source
            .clone()
            .unwrap_or_else(|| self.kind.default_source(&self.name))
    }
}
