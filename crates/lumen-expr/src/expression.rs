#![forbid(unsafe_code)]

//! The expression node abstraction and the constant variant.
//!
//! # Design
//!
//! Every expression variant implements [`Node`]: a small capability set of
//! `value_type` / `is_static` / `evaluate` / `watch_slots` / `watch`.
//! [`Expression`] is a cheap handle over `Arc<dyn Node>`; trees share nodes
//! freely and a parent owns its children through plain handle clones.
//!
//! Observer state installed by `watch` is a recursively-owned [`SubWatch`]
//! tree: one state object per non-static node, torn down by `Drop` in the
//! same child order the install pass used.
//!
//! # Invariants
//!
//! 1. `value_type` never changes after construction.
//! 2. `evaluate` returns either one fully-formed value of `value_type` or
//!    `None`; there is no partial initialization.
//! 3. An expression reported static never produces two different results
//!    for the same `this` over its lifetime.
//! 4. `watch_slots` equals the number of observer-state objects `watch`
//!    installs (`SubWatch::slot_count`); the install pass asserts this.
//! 5. Sizing, install, and teardown visit children in the same fixed
//!    order, skipping static children.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use lumen_object::{Object, Value, ValueType};

use crate::closure::ClosureSub;
use crate::object_ref::ObjectRefSub;
use crate::property::PropertySub;

/// Change-notification callback threaded through the observer tree.
pub(crate) type NotifyFn = Rc<dyn Fn()>;

/// Capability set of an expression variant.
pub(crate) trait Node: 'static {
    fn type_name(&self) -> &'static str;

    fn value_type(&self) -> ValueType;

    fn is_static(&self) -> bool;

    fn evaluate(&self, this: Option<&Object>) -> Option<Value>;

    /// Number of observer-state objects a watch of this node installs,
    /// recursively counting non-static children only.
    fn watch_slots(&self) -> usize;

    /// Install listeners for this node and its non-static children.
    fn watch(self: Arc<Self>, this: Option<&Object>, notify: &NotifyFn) -> SubWatch;
}

/// Per-node observer state. Dropping it tears the listeners down.
pub(crate) enum SubWatch {
    /// Static subtree; nothing to observe.
    Inert,
    Object(ObjectRefSub),
    Property(Rc<PropertySub>),
    Closure(ClosureSub),
}

impl SubWatch {
    /// Number of observer-state objects in this subtree.
    pub(crate) fn slot_count(&self) -> usize {
        match self {
            SubWatch::Inert => 0,
            SubWatch::Object(_) => 1,
            SubWatch::Property(sub) => 1 + sub.child_slot_count(),
            SubWatch::Closure(sub) => 1 + sub.child_slot_count(),
        }
    }
}

/// An immutable, reference-counted computation node.
///
/// Cloning shares the node. See the crate docs for the variants and
/// [`Expression::watch`](crate::watch) / [`Expression::bind`](crate::bind)
/// for observation.
#[derive(Clone)]
pub struct Expression {
    pub(crate) node: Arc<dyn Node>,
}

impl Expression {
    pub(crate) fn from_node(node: Arc<dyn Node>) -> Self {
        Self { node }
    }

    /// The type this expression evaluates to. Constant over the
    /// expression's lifetime.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.node.value_type()
    }

    /// Whether this expression can never change its result for a given
    /// `this`. Static expressions need no watch to stay current.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.node.is_static()
    }

    /// Evaluate against an optional `this` context.
    ///
    /// Returns `None` when the expression references state that is
    /// currently unavailable, e.g. a destroyed object; no diagnostic is
    /// emitted for that.
    #[must_use]
    pub fn evaluate(&self, this: Option<&Object>) -> Option<Value> {
        self.node.evaluate(this)
    }

    pub(crate) fn watch_slots(&self) -> usize {
        self.node.watch_slots()
    }

    pub(crate) fn subwatch(&self, this: Option<&Object>, notify: &NotifyFn) -> SubWatch {
        Arc::clone(&self.node).watch(this, notify)
    }

    /// An expression that always evaluates to `value`.
    ///
    /// # Panics
    ///
    /// Panics on [`Value::Null`]; use [`Expression::constant_value`] to
    /// reject untyped values without panicking.
    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Expression {
        Self::constant_value(value.into()).expect("constant expressions require a typed value")
    }

    /// Checked variant of [`Expression::constant`].
    ///
    /// Returns `None` (with a critical diagnostic) for [`Value::Null`],
    /// which carries no type to evaluate to.
    #[must_use]
    pub fn constant_value(value: Value) -> Option<Expression> {
        let Some(ty) = value.value_type() else {
            tracing::error!("constant expressions cannot hold an untyped null");
            return None;
        };
        Some(Self::from_node(Arc::new(ConstantNode { value, ty })))
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("kind", &self.node.type_name())
            .field("value_type", &self.node.value_type())
            .field("static", &self.node.is_static())
            .finish()
    }
}

struct ConstantNode {
    value: Value,
    ty: ValueType,
}

impl Node for ConstantNode {
    fn type_name(&self) -> &'static str {
        "constant"
    }

    fn value_type(&self) -> ValueType {
        self.ty.clone()
    }

    fn is_static(&self) -> bool {
        true
    }

    fn evaluate(&self, _this: Option<&Object>) -> Option<Value> {
        Some(self.value.clone())
    }

    fn watch_slots(&self) -> usize {
        0
    }

    fn watch(self: Arc<Self>, _this: Option<&Object>, _notify: &NotifyFn) -> SubWatch {
        SubWatch::Inert
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
