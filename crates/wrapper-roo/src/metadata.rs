//! Per-invocation records handed to hooks.
//!
//! Every call or construction through a wrapper opens one
//! [`InvocationMetadata`] in the realm. Hooks see it as a frozen-shape
//! `InvocationData` object; host code reads the typed record through
//! [`Realm::invocation`]. The record is closed when the wrapper returns.
//!
//! The projection, its `arguments` array and the thunk have an invocation
//! [`Lifetime`]: closing the record frees them unless a hook stored them
//! somewhere that outlives the call, returned them or threw them. Handles
//! kept on the Rust side past that point resolve to a `TypeError`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object_model::{
    JsValue, Lifetime, ManagedObject, ObjectHandle, ObjectSlot, OrdinaryObject, PropertyDescriptor,
};
use crate::realm::Realm;

/// Monotonic per-realm invocation number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InvocationId(pub u64);

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invocation#{}", self.0)
    }
}

/// Plain call or construction. `this` only exists for calls and
/// `new.target` only for constructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationKind {
    Call { this: JsValue },
    Construct { new_target: ObjectHandle },
}

impl InvocationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::Construct { .. } => "construct",
        }
    }
}

/// Result of running the thunk. Result and exception are exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Pending,
    Returned(JsValue),
    Threw(JsValue),
}

impl Outcome {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// `None` while pending.
    pub fn success(&self) -> Option<bool> {
        match self {
            Self::Pending => None,
            Self::Returned(_) => Some(true),
            Self::Threw(_) => Some(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("{0} already holds a result or exception")]
    AlreadySettled(InvocationId),
    #[error("value is not a live invocation record")]
    UnknownInvocation,
}

/// Typed invocation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationMetadata {
    id: InvocationId,
    function: ObjectHandle,
    arguments: Vec<JsValue>,
    kind: InvocationKind,
    thunk: ObjectHandle,
    projection: ObjectHandle,
    arguments_array: ObjectHandle,
    outcome: Outcome,
}

impl InvocationMetadata {
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// The wrapped target.
    pub fn function(&self) -> ObjectHandle {
        self.function
    }

    pub fn arguments(&self) -> &[JsValue] {
        &self.arguments
    }

    pub fn kind(&self) -> &InvocationKind {
        &self.kind
    }

    pub fn this(&self) -> Option<&JsValue> {
        match &self.kind {
            InvocationKind::Call { this } => Some(this),
            InvocationKind::Construct { .. } => None,
        }
    }

    pub fn new_target(&self) -> Option<ObjectHandle> {
        match self.kind {
            InvocationKind::Construct { new_target } => Some(new_target),
            InvocationKind::Call { .. } => None,
        }
    }

    /// Zero-argument callable running the real call or construction.
    pub fn thunk(&self) -> ObjectHandle {
        self.thunk
    }

    /// The `InvocationData` object passed to hooks.
    pub fn projection(&self) -> ObjectHandle {
        self.projection
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn success(&self) -> Option<bool> {
        self.outcome.success()
    }

    pub fn settle(&mut self, outcome: Outcome) -> Result<(), MetadataError> {
        if self.outcome.is_settled() {
            return Err(MetadataError::AlreadySettled(self.id));
        }
        self.outcome = outcome;
        Ok(())
    }
}

/// Enumerable, non-writable, non-configurable.
fn exposed(value: JsValue) -> PropertyDescriptor {
    PropertyDescriptor::Data {
        value,
        writable: false,
        enumerable: true,
        configurable: false,
    }
}

impl Realm {
    /// Lifetime of objects owned by the next wrapper invocation to open.
    pub(crate) fn next_invocation_lifetime(&self) -> Lifetime {
        let level = u32::try_from(self.invocations.len()).map_or(u32::MAX, |n| n.saturating_add(1));
        Lifetime::Invocation(level)
    }

    /// Register a record and build its projection.
    pub(crate) fn open_invocation(
        &mut self,
        function: ObjectHandle,
        arguments: Vec<JsValue>,
        kind: InvocationKind,
        thunk: ObjectHandle,
    ) -> (InvocationId, ObjectHandle) {
        let lifetime = self.next_invocation_lifetime();
        let id = InvocationId(self.next_invocation);
        self.next_invocation += 1;

        let args_array = self.create_frozen_array(arguments.clone(), lifetime);

        let mut projection = OrdinaryObject::with_prototype(Some(self.intrinsics.object_prototype));
        projection.class_tag = Some("InvocationData".to_string());
        projection.slot = ObjectSlot::Invocation(id);
        projection.properties.insert("function".into(), exposed(function.into()));
        projection.properties.insert("arguments".into(), exposed(args_array.into()));
        match &kind {
            InvocationKind::Call { this } => {
                projection.properties.insert("this".into(), exposed(this.clone()));
            }
            InvocationKind::Construct { new_target } => {
                projection
                    .properties
                    .insert("constructor".into(), exposed((*new_target).into()));
            }
        }
        projection.properties.insert("boundFunction".into(), exposed(thunk.into()));
        let projection = self
            .heap
            .alloc_managed(ManagedObject::Ordinary(projection), lifetime);

        self.invocations.insert(
            id,
            InvocationMetadata {
                id,
                function,
                arguments,
                kind,
                thunk,
                projection,
                arguments_array: args_array,
                outcome: Outcome::Pending,
            },
        );
        (id, projection)
    }

    /// Drop the record and free the objects it owns that did not escape.
    pub(crate) fn close_invocation(&mut self, id: InvocationId) -> Option<InvocationMetadata> {
        let record = self.invocations.remove(&id)?;
        self.heap
            .release(&[record.projection, record.arguments_array, record.thunk]);
        Some(record)
    }

    fn invocation_id_of(&self, metadata: &JsValue) -> Option<InvocationId> {
        let object = self.heap.ordinary(metadata.as_object()?).ok()?;
        match object.slot {
            ObjectSlot::Invocation(id) => Some(id),
            _ => None,
        }
    }

    /// Live record behind an `InvocationData` object.
    pub fn invocation(&self, metadata: &JsValue) -> Option<&InvocationMetadata> {
        let id = self.invocation_id_of(metadata)?;
        self.invocations.get(&id)
    }

    pub fn invocation_by_id(&self, id: InvocationId) -> Option<&InvocationMetadata> {
        self.invocations.get(&id)
    }

    /// Records still open, i.e. wrapper calls currently on the stack.
    pub fn live_invocations(&self) -> usize {
        self.invocations.len()
    }

    /// Record the thunk's outcome once; the projection gains `result` or
    /// `exception` plus `success` and is frozen.
    pub fn settle_invocation(
        &mut self,
        metadata: &JsValue,
        outcome: Outcome,
    ) -> Result<(), MetadataError> {
        let id = self
            .invocation_id_of(metadata)
            .ok_or(MetadataError::UnknownInvocation)?;
        let record = self
            .invocations
            .get_mut(&id)
            .ok_or(MetadataError::UnknownInvocation)?;
        record.settle(outcome.clone())?;
        let projection = record.projection;
        if let Outcome::Returned(value) | Outcome::Threw(value) = &outcome {
            self.heap.note_reference(projection, value);
        }

        let object = self
            .heap
            .ordinary_mut(projection)
            .map_err(|_| MetadataError::UnknownInvocation)?;
        let success = match outcome {
            Outcome::Returned(value) => {
                object.properties.insert("result".into(), exposed(value));
                true
            }
            Outcome::Threw(exception) => {
                object.properties.insert("exception".into(), exposed(exception));
                false
            }
            Outcome::Pending => return Ok(()),
        };
        object
            .properties
            .insert("success".into(), exposed(JsValue::Bool(success)));
        object.freeze();
        Ok(())
    }
}
