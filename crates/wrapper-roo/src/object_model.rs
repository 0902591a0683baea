//! ES2020 object model: property keys, values, descriptors and the heap.
//!
//! Key features:
//!
//! - **Property descriptors**: data vs accessor, configurable/enumerable/writable
//! - **Prototype chains**: `[[Prototype]]` internal slot with cycle and depth guards
//! - **Symbol keys**: property keys that are either strings or symbols
//! - **Exotic wrappers**: the heap stores interception wrappers next to
//!   ordinary objects; their internal methods are dispatched by the realm
//!
//! `BTreeMap`/`BTreeSet` for deterministic ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::function::{FunctionSlot, GeneratorState};
use crate::interceptor::WrapperObject;
use crate::metadata::InvocationId;

/// Serialize/deserialize a `BTreeMap` as a sorted sequence of `[key, value]`
/// pairs.  serde_json requires string keys for JSON maps but `PropertyKey`
/// and `ObjectHandle` are not strings.
mod map_as_seq {
    use super::BTreeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<K: Serialize, V: Serialize, S: Serializer>(
        map: &BTreeMap<K, V>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&K, &V)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// PropertyKey: string or symbol
// ---------------------------------------------------------------------------

/// Unique symbol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// A property key: either a string or a symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    /// String key.
    String(String),
    /// Symbol key.
    Symbol(SymbolId),
}

impl PropertyKey {
    /// Is this the string key `name`?
    pub fn is_named(&self, name: &str) -> bool {
        matches!(self, Self::String(s) if s == name)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<SymbolId> for PropertyKey {
    fn from(id: SymbolId) -> Self {
        Self::Symbol(id)
    }
}

// ---------------------------------------------------------------------------
// ObjectHandle: typed reference to heap objects
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object on the managed heap: a slot index
/// plus the generation of the slot when the object was allocated.
///
/// Handle equality is object identity. A handle to a freed object never
/// resolves to whatever later reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle {
    index: usize,
    generation: u32,
}

impl ObjectHandle {
    /// Handle to slot `index` in its first generation.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            generation: 0,
        }
    }

    pub fn index(self) -> usize {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.generation {
            0 => write!(f, "object#{}", self.index),
            generation => write!(f, "object#{}.{generation}", self.index),
        }
    }
}

// ---------------------------------------------------------------------------
// JsValue: runtime value for the object model
// ---------------------------------------------------------------------------

/// Runtime value. Functions are objects; callability is a property of the
/// heap entry, not of the value tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(SymbolId),
    Object(ObjectHandle),
}

impl JsValue {
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Self::Object(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// `typeof` for primitives; objects report `"object"` here, the realm
    /// refines callables to `"function"`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "number",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(_) => "object",
        }
    }

    /// SameValue comparison (ES2020 §7.2.10).
    pub fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl From<ObjectHandle> for JsValue {
    fn from(h: ObjectHandle) -> Self {
        Self::Object(h)
    }
}

impl From<i64> for JsValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
            Self::Object(h) => write!(f, "[{h}]"),
        }
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// ES2020 property descriptor (§6.2.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyDescriptor {
    /// Data descriptor: has `value` and `writable`.
    Data {
        value: JsValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Accessor descriptor: has `get` and/or `set`.
    Accessor {
        get: Option<ObjectHandle>,
        set: Option<ObjectHandle>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Create a default data descriptor (writable, enumerable, configurable).
    pub fn data(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Create a non-writable, non-enumerable, non-configurable data descriptor.
    pub fn data_frozen(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Writable, configurable, non-enumerable: the shape of built-in methods.
    pub fn builtin(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, configurable: function `name`/`length`.
    pub fn readonly(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: true,
        }
    }

    /// Accessor with both flags set.
    pub fn accessor(get: Option<ObjectHandle>, set: Option<ObjectHandle>) -> Self {
        Self::Accessor {
            get,
            set,
            enumerable: true,
            configurable: true,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    /// Get the value if this is a data descriptor.
    pub fn value(&self) -> Option<&JsValue> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Objects the descriptor points at: the value, or the accessors.
    pub fn references(&self) -> Vec<ObjectHandle> {
        match self {
            Self::Data { value, .. } => value.as_object().into_iter().collect(),
            Self::Accessor { get, set, .. } => get.iter().chain(set.iter()).copied().collect(),
        }
    }

    /// Is this a data descriptor with writable=true?
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }

    pub fn set_non_configurable(&mut self) {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => {
                *configurable = false;
            }
        }
    }

    /// Make this data descriptor non-writable (no-op for accessors).
    pub fn set_non_writable(&mut self) {
        if let Self::Data { writable, .. } = self {
            *writable = false;
        }
    }

    /// Same descriptor shape carrying a new value (accessors are returned as is).
    pub fn with_value(&self, new_value: JsValue) -> Self {
        match self {
            Self::Data {
                writable,
                enumerable,
                configurable,
                ..
            } => Self::Data {
                value: new_value,
                writable: *writable,
                enumerable: *enumerable,
                configurable: *configurable,
            },
            Self::Accessor { .. } => self.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Errors from heap-level object operations. The realm lifts these into
/// `TypeError` throws.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectError {
    /// TypeError per ES2020 spec.
    TypeError(String),
    /// Object not found in the heap.
    ObjectNotFound(ObjectHandle),
    /// The object was freed when its invocation returned.
    Reclaimed(ObjectHandle),
    /// Prototype chain cycle detected.
    PrototypeCycleDetected,
    /// Maximum prototype chain depth exceeded.
    PrototypeChainTooDeep { depth: u32, max: u32 },
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeError(msg) => write!(f, "TypeError: {msg}"),
            Self::ObjectNotFound(h) => write!(f, "{h} not found"),
            Self::Reclaimed(h) => {
                write!(f, "{h} belonged to an invocation that has already returned")
            }
            Self::PrototypeCycleDetected => write!(f, "TypeError: prototype chain cycle detected"),
            Self::PrototypeChainTooDeep { depth, max } => {
                write!(
                    f,
                    "TypeError: prototype chain depth {depth} exceeds max {max}"
                )
            }
        }
    }
}

impl std::error::Error for ObjectError {}

// ---------------------------------------------------------------------------
// OrdinaryObject
// ---------------------------------------------------------------------------

/// Maximum prototype chain depth to prevent infinite loops.
pub const MAX_PROTOTYPE_CHAIN_DEPTH: u32 = 1024;

/// Internal slots beyond the ordinary ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum ObjectSlot {
    #[default]
    None,
    /// `[[Call]]` (and possibly `[[Construct]]`) behaviour.
    Function(FunctionSlot),
    /// Suspended generator produced by calling a generator function.
    Generator(GeneratorState),
    /// JS-visible projection of an invocation record.
    Invocation(InvocationId),
}

/// An ordinary ES2020 object with internal slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdinaryObject {
    /// `[[Prototype]]` internal slot (None means end of chain).
    pub prototype: Option<ObjectHandle>,
    /// `[[Extensible]]` internal slot.
    pub extensible: bool,
    /// Own properties with descriptors, keyed by PropertyKey.
    #[serde(with = "map_as_seq")]
    pub properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    /// `[[Class]]` tag for intrinsic identification.
    pub class_tag: Option<String>,
    /// Function, generator or invocation slot.
    pub slot: ObjectSlot,
}

impl Default for OrdinaryObject {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            class_tag: None,
            slot: ObjectSlot::None,
        }
    }
}

impl OrdinaryObject {
    /// Create a new ordinary object with the given prototype.
    pub fn with_prototype(proto: Option<ObjectHandle>) -> Self {
        Self {
            prototype: proto,
            ..Self::default()
        }
    }

    pub fn function_slot(&self) -> Option<&FunctionSlot> {
        match &self.slot {
            ObjectSlot::Function(f) => Some(f),
            _ => None,
        }
    }

    /// `[[GetOwnProperty]](P)`.
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    /// `[[DefineOwnProperty]](P, Desc)`: define or update a property.
    ///
    /// Returns `Ok(false)` if rejected (non-configurable conflict or
    /// non-extensible object).
    pub fn define_own_property(
        &mut self,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        if let Some(current) = self.properties.get(&key) {
            if !current.is_configurable() {
                if desc.is_configurable() {
                    return Ok(false);
                }
                if desc.is_enumerable() != current.is_enumerable() {
                    return Ok(false);
                }
                if current.is_data() != desc.is_data() {
                    return Ok(false);
                }
                if let (
                    PropertyDescriptor::Data {
                        writable: current_w,
                        value: current_v,
                        ..
                    },
                    PropertyDescriptor::Data {
                        writable: new_w,
                        value: new_v,
                        ..
                    },
                ) = (current, &desc)
                    && !current_w
                    && (*new_w || !current_v.same_value(new_v))
                {
                    return Ok(false);
                }
                if let (
                    PropertyDescriptor::Accessor {
                        get: cur_get,
                        set: cur_set,
                        ..
                    },
                    PropertyDescriptor::Accessor {
                        get: new_get,
                        set: new_set,
                        ..
                    },
                ) = (current, &desc)
                    && (cur_get != new_get || cur_set != new_set)
                {
                    return Ok(false);
                }
            }
            self.properties.insert(key, desc);
            Ok(true)
        } else {
            if !self.extensible {
                return Ok(false);
            }
            self.properties.insert(key, desc);
            Ok(true)
        }
    }

    /// `[[Delete]](P)`: returns `false` if non-configurable.
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        match self.properties.get(key) {
            Some(desc) if !desc.is_configurable() => false,
            Some(_) => {
                self.properties.remove(key);
                true
            }
            None => true,
        }
    }

    /// `[[OwnPropertyKeys]]()`: integer indices (numeric order), then
    /// string keys, then symbol keys.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut int_keys: Vec<(u64, PropertyKey)> = Vec::new();
        let mut str_keys: Vec<PropertyKey> = Vec::new();
        let mut sym_keys: Vec<PropertyKey> = Vec::new();

        for key in self.properties.keys() {
            match key {
                PropertyKey::String(s) => {
                    if let Ok(n) = s.parse::<u64>() {
                        int_keys.push((n, key.clone()));
                    } else {
                        str_keys.push(key.clone());
                    }
                }
                PropertyKey::Symbol(_) => sym_keys.push(key.clone()),
            }
        }

        int_keys.sort_by_key(|(n, _)| *n);
        let mut result: Vec<PropertyKey> = int_keys.into_iter().map(|(_, k)| k).collect();
        result.extend(str_keys);
        result.extend(sym_keys);
        result
    }

    /// `Object.freeze` semantics.
    pub fn freeze(&mut self) {
        self.extensible = false;
        for desc in self.properties.values_mut() {
            desc.set_non_configurable();
            desc.set_non_writable();
        }
    }

    pub fn is_frozen(&self) -> bool {
        !self.extensible
            && self
                .properties
                .values()
                .all(|d| !d.is_configurable() && !d.is_writable())
    }
}

// ---------------------------------------------------------------------------
// ManagedObject: union of ordinary and wrapper
// ---------------------------------------------------------------------------

/// A managed object: either ordinary or an interception wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManagedObject {
    Ordinary(OrdinaryObject),
    Wrapper(WrapperObject),
}

impl ManagedObject {
    pub fn as_ordinary(&self) -> Option<&OrdinaryObject> {
        match self {
            Self::Ordinary(o) => Some(o),
            Self::Wrapper(_) => None,
        }
    }

    pub fn as_ordinary_mut(&mut self) -> Option<&mut OrdinaryObject> {
        match self {
            Self::Ordinary(o) => Some(o),
            Self::Wrapper(_) => None,
        }
    }

    pub fn as_wrapper(&self) -> Option<&WrapperObject> {
        match self {
            Self::Wrapper(w) => Some(w),
            Self::Ordinary(_) => None,
        }
    }

    /// Every object this one holds a reference to, through its prototype,
    /// properties, internal slots or wrapper fields.
    pub fn references(&self) -> Vec<ObjectHandle> {
        let mut out = Vec::new();
        match self {
            Self::Wrapper(w) => {
                out.push(w.target);
                out.push(w.hook);
                out.extend(w.this_override.as_ref().and_then(JsValue::as_object));
            }
            Self::Ordinary(o) => {
                out.extend(o.prototype);
                for desc in o.properties.values() {
                    out.extend(desc.references());
                }
                match &o.slot {
                    ObjectSlot::None | ObjectSlot::Invocation(_) => {}
                    ObjectSlot::Function(FunctionSlot::Native { .. }) => {}
                    ObjectSlot::Function(FunctionSlot::Bound {
                        target,
                        bound_this,
                        bound_args,
                    }) => {
                        out.push(*target);
                        out.extend(bound_this.as_object());
                        out.extend(bound_args.iter().filter_map(JsValue::as_object));
                    }
                    ObjectSlot::Function(FunctionSlot::DeferredConstruct {
                        target,
                        arguments,
                        new_target,
                    }) => {
                        out.push(*target);
                        out.push(*new_target);
                        out.extend(arguments.iter().filter_map(JsValue::as_object));
                    }
                    ObjectSlot::Generator(state) => {
                        out.push(state.function);
                        out.extend(state.this.as_object());
                        out.extend(state.arguments.iter().filter_map(JsValue::as_object));
                        out.extend(state.buffered.iter().flatten().filter_map(JsValue::as_object));
                    }
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ObjectHeap: the managed object store
// ---------------------------------------------------------------------------

/// How long an allocation is expected to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// Lives as long as the realm.
    Realm,
    /// Belongs to the wrapper invocation at this nesting level (1 for the
    /// outermost) and is freed when it returns, unless it escaped first.
    Invocation(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeapSlot {
    generation: u32,
    object: Option<ManagedObject>,
}

/// The object heap: a slot arena of managed objects.
///
/// Realm-lifetime objects are never freed. Invocation-lifetime objects are
/// freed by [`ObjectHeap::release`] unless they escaped: a reference to one
/// stored into an object of a shallower lifetime promotes it (and whatever
/// invocation-lifetime objects it reaches) to the realm lifetime. No
/// realm-lifetime object ever points at an invocation-lifetime one.
///
/// Freed slots are reused under the next generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectHeap {
    slots: Vec<HeapSlot>,
    free: Vec<usize>,
    /// Invocation-lifetime objects that have not escaped, with their level.
    #[serde(with = "map_as_seq")]
    scoped: BTreeMap<ObjectHandle, u32>,
    live: usize,
    /// Next symbol id.
    next_symbol: u32,
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            scoped: BTreeMap::new(),
            live: 0,
            next_symbol: 1,
        }
    }

    fn insert(&mut self, object: ManagedObject) -> ObjectHandle {
        self.live += 1;
        if let Some(index) = self.free.pop()
            && let Some(slot) = self.slots.get_mut(index)
        {
            slot.object = Some(object);
            return ObjectHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len();
        self.slots.push(HeapSlot {
            generation: 0,
            object: Some(object),
        });
        ObjectHandle::new(index)
    }

    /// Allocate `object` with the given lifetime.
    pub fn alloc_managed(&mut self, object: ManagedObject, lifetime: Lifetime) -> ObjectHandle {
        let level = match lifetime {
            Lifetime::Realm => 0,
            Lifetime::Invocation(level) => level,
        };
        if !self.scoped.is_empty() {
            let references = object.references();
            self.escape_deeper(level, references);
        }
        let handle = self.insert(object);
        if level > 0 {
            self.scoped.insert(handle, level);
        }
        handle
    }

    /// Allocate an ordinary object for the lifetime of the realm.
    pub fn alloc(&mut self, object: OrdinaryObject) -> ObjectHandle {
        self.alloc_managed(ManagedObject::Ordinary(object), Lifetime::Realm)
    }

    /// Allocate a plain object with the given prototype.
    pub fn alloc_plain(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        self.alloc(OrdinaryObject::with_prototype(proto))
    }

    /// Allocate an interception wrapper.
    pub fn alloc_wrapper(&mut self, wrapper: WrapperObject) -> ObjectHandle {
        self.alloc_managed(ManagedObject::Wrapper(wrapper), Lifetime::Realm)
    }

    /// Allocate a new unique symbol id.
    pub fn alloc_symbol(&mut self) -> SymbolId {
        let id = SymbolId(self.next_symbol);
        self.next_symbol += 1;
        id
    }

    // -- Lifetimes ------------------------------------------------------------

    /// Current lifetime of `handle`.
    pub fn lifetime(&self, handle: ObjectHandle) -> Lifetime {
        match self.scoped.get(&handle) {
            Some(level) => Lifetime::Invocation(*level),
            None => Lifetime::Realm,
        }
    }

    /// Promote `value`, and every invocation-lifetime object it reaches, to
    /// the realm lifetime.
    pub fn escape(&mut self, value: &JsValue) {
        if let Some(handle) = value.as_object() {
            self.escape_deeper(0, vec![handle]);
        }
    }

    /// Store barrier: `holder` is about to reference `value`.
    pub fn note_reference(&mut self, holder: ObjectHandle, value: &JsValue) {
        if let Some(handle) = value.as_object() {
            self.note_references(holder, vec![handle]);
        }
    }

    fn note_references(&mut self, holder: ObjectHandle, references: Vec<ObjectHandle>) {
        if self.scoped.is_empty() {
            return;
        }
        let level = self.scoped.get(&holder).copied().unwrap_or(0);
        self.escape_deeper(level, references);
    }

    /// Promote every object in `stack` scoped deeper than `level`, together
    /// with the scoped objects it reaches.
    fn escape_deeper(&mut self, level: u32, mut stack: Vec<ObjectHandle>) {
        stack.retain(|h| self.scoped.get(h).is_some_and(|l| *l > level));
        while let Some(handle) = stack.pop() {
            if self.scoped.remove(&handle).is_none() {
                continue;
            }
            if let Ok(object) = self.get(handle) {
                let reached = object.references();
                stack.extend(reached.into_iter().filter(|h| self.scoped.contains_key(h)));
            }
        }
    }

    /// Free those of `handles` that still have an invocation lifetime.
    /// Returns how many objects were freed.
    pub fn release(&mut self, handles: &[ObjectHandle]) -> usize {
        let mut freed = 0;
        for &handle in handles {
            if self.scoped.remove(&handle).is_none() {
                continue;
            }
            let Some(slot) = self.slots.get_mut(handle.index) else {
                continue;
            };
            if slot.generation != handle.generation || slot.object.take().is_none() {
                continue;
            }
            freed += 1;
            self.live = self.live.saturating_sub(1);
            // A slot whose generation counter is exhausted is retired.
            if let Some(next) = slot.generation.checked_add(1) {
                slot.generation = next;
                self.free.push(handle.index);
            }
        }
        freed
    }

    // -- Access ---------------------------------------------------------------

    pub fn get(&self, handle: ObjectHandle) -> Result<&ManagedObject, ObjectError> {
        match self.slots.get(handle.index) {
            Some(HeapSlot {
                generation,
                object: Some(object),
            }) if *generation == handle.generation => Ok(object),
            Some(_) => Err(ObjectError::Reclaimed(handle)),
            None => Err(ObjectError::ObjectNotFound(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut ManagedObject, ObjectError> {
        match self.slots.get_mut(handle.index) {
            Some(HeapSlot {
                generation,
                object: Some(object),
            }) if *generation == handle.generation => Ok(object),
            Some(_) => Err(ObjectError::Reclaimed(handle)),
            None => Err(ObjectError::ObjectNotFound(handle)),
        }
    }

    /// Borrow the ordinary object behind `handle`; wrappers are a TypeError
    /// here because their internal methods live in the realm.
    pub fn ordinary(&self, handle: ObjectHandle) -> Result<&OrdinaryObject, ObjectError> {
        match self.get(handle)? {
            ManagedObject::Ordinary(o) => Ok(o),
            ManagedObject::Wrapper(_) => Err(ObjectError::TypeError(format!(
                "{handle} is a wrapper; its internal methods must be dispatched by the realm"
            ))),
        }
    }

    pub fn ordinary_mut(&mut self, handle: ObjectHandle) -> Result<&mut OrdinaryObject, ObjectError> {
        match self.get_mut(handle)? {
            ManagedObject::Ordinary(o) => Ok(o),
            ManagedObject::Wrapper(_) => Err(ObjectError::TypeError(format!(
                "{handle} is a wrapper; its internal methods must be dispatched by the realm"
            ))),
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    // -- Ordinary internal methods ------------------------------------------

    pub fn get_own_property_descriptor(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        Ok(self.ordinary(handle)?.get_own_property(key).cloned())
    }

    pub fn define_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        self.ordinary(handle)?;
        self.note_references(handle, desc.references());
        self.ordinary_mut(handle)?.define_own_property(key, desc)
    }

    pub fn delete_property(
        &mut self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        Ok(self.ordinary_mut(handle)?.delete(key))
    }

    pub fn get_prototype_of(
        &self,
        handle: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, ObjectError> {
        Ok(self.ordinary(handle)?.prototype)
    }

    /// `Object.setPrototypeOf(O, proto)` with cycle detection. The walk stops
    /// at a wrapper: its own chain is the target's and is checked there.
    pub fn set_prototype_of(
        &mut self,
        handle: ObjectHandle,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, ObjectError> {
        if let Some(p) = proto {
            let mut current = Some(p);
            let mut visited = BTreeSet::new();
            visited.insert(handle);
            let mut depth: u32 = 0;
            while let Some(h) = current {
                if !visited.insert(h) {
                    return Err(ObjectError::PrototypeCycleDetected);
                }
                depth += 1;
                if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                    return Err(ObjectError::PrototypeChainTooDeep {
                        depth,
                        max: MAX_PROTOTYPE_CHAIN_DEPTH,
                    });
                }
                match self.get(h)? {
                    ManagedObject::Ordinary(o) => current = o.prototype,
                    ManagedObject::Wrapper(_) => break,
                }
            }
        }

        let o = self.ordinary(handle)?;
        if !o.extensible {
            return Ok(o.prototype == proto);
        }
        self.note_references(handle, proto.into_iter().collect());
        self.ordinary_mut(handle)?.prototype = proto;
        Ok(true)
    }

    pub fn is_extensible(&self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        Ok(self.ordinary(handle)?.extensible)
    }

    pub fn prevent_extensions(&mut self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        self.ordinary_mut(handle)?.extensible = false;
        Ok(true)
    }

    pub fn own_property_keys(&self, handle: ObjectHandle) -> Result<Vec<PropertyKey>, ObjectError> {
        Ok(self.ordinary(handle)?.own_property_keys())
    }

    pub fn freeze(&mut self, handle: ObjectHandle) -> Result<(), ObjectError> {
        self.ordinary_mut(handle)?.freeze();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
