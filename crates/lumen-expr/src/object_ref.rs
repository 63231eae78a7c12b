#![forbid(unsafe_code)]

//! Weak object-reference expressions.
//!
//! An object-reference expression evaluates to a fixed object without
//! keeping it alive; it is meant to break reference cycles between an
//! expression tree and the objects it observes. Once the object is
//! destroyed, evaluation fails and every pending watcher is notified
//! exactly once, synchronously, from the destruction notification.

use std::cell::{Cell, RefCell};
use std::sync::{Arc, Weak};

use lumen_object::{DisposeGuard, Object, Value, ValueType, WeakObject};
use smallvec::SmallVec;

use crate::expression::{Expression, Node, NotifyFn, SubWatch};

struct Watcher {
    id: u64,
    notify: NotifyFn,
}

pub(crate) struct ObjectRefNode {
    ty: ValueType,
    object: WeakObject,
    watchers: RefCell<SmallVec<[Watcher; 2]>>,
    next_id: Cell<u64>,
    _guard: DisposeGuard,
}

impl ObjectRefNode {
    fn object_destroyed(&self) {
        // Snapshot so watchers may unwatch from inside their callback.
        let pending: Vec<NotifyFn> = self
            .watchers
            .borrow()
            .iter()
            .map(|w| w.notify.clone())
            .collect();
        for notify in pending {
            notify();
        }
    }
}

impl Drop for ObjectRefNode {
    fn drop(&mut self) {
        // Every sub-watch holds the node alive, so none can be left.
        debug_assert!(
            self.watchers.borrow().is_empty(),
            "object expression finalized with live watchers"
        );
    }
}

impl Node for ObjectRefNode {
    fn type_name(&self) -> &'static str {
        "object"
    }

    fn value_type(&self) -> ValueType {
        self.ty.clone()
    }

    fn is_static(&self) -> bool {
        false
    }

    fn evaluate(&self, _this: Option<&Object>) -> Option<Value> {
        self.object.upgrade().map(Value::Object)
    }

    fn watch_slots(&self) -> usize {
        1
    }

    fn watch(self: Arc<Self>, _this: Option<&Object>, notify: &NotifyFn) -> SubWatch {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.watchers.borrow_mut().push(Watcher {
            id,
            notify: notify.clone(),
        });
        SubWatch::Object(ObjectRefSub { node: self, id })
    }
}

/// Observer state of one object-reference watch; removal is by identity.
pub(crate) struct ObjectRefSub {
    node: Arc<ObjectRefNode>,
    id: u64,
}

impl Drop for ObjectRefSub {
    fn drop(&mut self) {
        self.node.watchers.borrow_mut().retain(|w| w.id != self.id);
    }
}

impl Expression {
    /// An expression evaluating to `object` through a weak reference.
    ///
    /// Once `object` is destroyed the expression fails to evaluate. To
    /// keep a strong reference instead, use [`Expression::constant`].
    #[must_use]
    pub fn object(object: &Object) -> Expression {
        let node = Arc::new_cyclic(|weak: &Weak<ObjectRefNode>| {
            let weak = weak.clone();
            let guard = object.add_dispose_guard(move || {
                if let Some(node) = weak.upgrade() {
                    node.object_destroyed();
                }
            });
            ObjectRefNode {
                ty: ValueType::Object(object.object_type().clone()),
                object: object.downgrade(),
                watchers: RefCell::new(SmallVec::new()),
                next_id: Cell::new(1),
                _guard: guard,
            }
        });
        Expression::from_node(node)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
