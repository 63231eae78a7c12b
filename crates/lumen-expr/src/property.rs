#![forbid(unsafe_code)]

//! Property-lookup expressions.
//!
//! A property expression reads a named property from a source object: the
//! result of an optional child expression, or the ambient `this` when no
//! child was given. The property descriptor is resolved once, at
//! construction.
//!
//! # Watch protocol
//!
//! Watching installs a change listener on the *current* source object,
//! filtered to the property. When a non-static child expression exists, it
//! is sub-watched with a relay: the source object itself may change, so the
//! relay tears the listener down, rebuilds it against the newly resolved
//! source, and only then forwards the notification. If the source cannot
//! currently be resolved, no listener is installed until the next relay
//! fires — evaluation failures are silent by design, and a notification is
//! conservative anyway.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use lumen_object::{NotifyGuard, Object, ObjectType, ParamSpec, Value, ValueType, WeakObject};

use crate::expression::{Expression, Node, NotifyFn, SubWatch};

pub(crate) struct PropertyNode {
    pspec: ParamSpec,
    expr: Option<Expression>,
}

impl PropertyNode {
    /// Resolve the source object: child expression result or `this`.
    ///
    /// Fails when the source is absent, not an object, or not an instance
    /// of the property's declaring type.
    fn resolve_object(&self, this: Option<&Object>) -> Option<Object> {
        let object = match &self.expr {
            None => this.cloned()?,
            Some(expr) => match expr.evaluate(this)? {
                Value::Object(obj) => obj,
                _ => return None,
            },
        };
        if !self.pspec.applies_to(object.object_type()) {
            return None;
        }
        Some(object)
    }
}

impl Node for PropertyNode {
    fn type_name(&self) -> &'static str {
        "property"
    }

    fn value_type(&self) -> ValueType {
        self.pspec.value_type().clone()
    }

    fn is_static(&self) -> bool {
        // The property can be mutated externally even under a static child.
        false
    }

    fn evaluate(&self, this: Option<&Object>) -> Option<Value> {
        let object = self.resolve_object(this)?;
        object.get(self.pspec.name()).ok()
    }

    fn watch_slots(&self) -> usize {
        1 + match &self.expr {
            Some(expr) if !expr.is_static() => expr.watch_slots(),
            _ => 0,
        }
    }

    fn watch(self: Arc<Self>, this: Option<&Object>, notify: &NotifyFn) -> SubWatch {
        PropertySub::install(self, this, notify)
    }
}

/// Observer state of one property watch.
pub(crate) struct PropertySub {
    node: Arc<PropertyNode>,
    this: Option<WeakObject>,
    notify: NotifyFn,
    // Teardown order: the source listener goes before the child sub-watch,
    // mirroring the install pass in reverse.
    source_guard: RefCell<Option<NotifyGuard>>,
    child: RefCell<Option<SubWatch>>,
}

impl PropertySub {
    fn install(node: Arc<PropertyNode>, this: Option<&Object>, notify: &NotifyFn) -> SubWatch {
        let sub = Rc::new(PropertySub {
            node: Arc::clone(&node),
            this: this.map(Object::downgrade),
            notify: notify.clone(),
            source_guard: RefCell::new(None),
            child: RefCell::new(None),
        });

        if let Some(expr) = &node.expr {
            if !expr.is_static() {
                let weak = Rc::downgrade(&sub);
                let relay: NotifyFn = Rc::new(move || {
                    if let Some(sub) = Weak::upgrade(&weak) {
                        PropertySub::source_changed(&sub);
                    }
                });
                *sub.child.borrow_mut() = Some(expr.subwatch(this, &relay));
            }
        }

        PropertySub::attach_source(&sub);
        SubWatch::Property(sub)
    }

    pub(crate) fn child_slot_count(&self) -> usize {
        self.child.borrow().as_ref().map_or(0, SubWatch::slot_count)
    }

    fn this_object(&self) -> Option<Object> {
        self.this.as_ref()?.upgrade()
    }

    /// Install the property listener on the currently resolved source.
    ///
    /// Silently installs nothing when the source cannot be resolved.
    fn attach_source(sub: &Rc<Self>) {
        let this = sub.this_object();
        let Some(source) = sub.node.resolve_object(this.as_ref()) else {
            return;
        };
        let weak = Rc::downgrade(sub);
        let guard = source.connect_notify(sub.node.pspec.name(), move |_, _| {
            if let Some(sub) = Weak::upgrade(&weak) {
                (sub.notify)();
            }
        });
        // resolve_object verified the declaring type, so the property
        // exists on the source.
        debug_assert!(guard.is_ok());
        *sub.source_guard.borrow_mut() = guard.ok();
    }

    fn detach_source(&self) {
        self.source_guard.borrow_mut().take();
    }

    /// Relay for a changed child expression: the source object may differ
    /// now, so teardown, rebuild, then forward.
    fn source_changed(sub: &Rc<Self>) {
        sub.detach_source();
        Self::attach_source(sub);
        (sub.notify)();
    }
}

impl Expression {
    /// An expression looking up `property_name` on the result of
    /// `expression`, or on `this` when `expression` is `None`.
    ///
    /// The property is resolved against `this_type` at construction; the
    /// source object is type-checked against the property's declaring type
    /// at every evaluation. An unknown or unreadable property is a
    /// programmer error: a critical diagnostic is emitted and `None` is
    /// returned.
    #[must_use]
    pub fn property(
        this_type: &ObjectType,
        expression: Option<Expression>,
        property_name: &str,
    ) -> Option<Expression> {
        let Some(pspec) = this_type.find_property(property_name) else {
            tracing::error!(
                ty = this_type.name(),
                property = property_name,
                "type has no property with that name"
            );
            return None;
        };
        if !pspec.is_readable() {
            tracing::error!(
                ty = this_type.name(),
                property = property_name,
                "property is not readable"
            );
            return None;
        }
        Some(Expression::from_node(Arc::new(PropertyNode {
            pspec,
            expr: expression,
        })))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
