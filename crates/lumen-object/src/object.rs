#![forbid(unsafe_code)]

//! Reference-counted object instances.
//!
//! An [`Object`] is a cheaply-cloneable handle to shared instance state:
//! a property store typed by the instance's [`ObjectType`], a per-property
//! notification registry, a registry of destruction callbacks, and an
//! `Any`-keyed side table for collaborators that need to attach state to an
//! instance they do not own.
//!
//! # Design
//!
//! Handles are `Arc`-backed so reference counts are atomic, but all interior
//! state is `RefCell`-guarded and must only be touched from the owning
//! thread. Notification dispatch snapshots the matching handlers before
//! invoking them, so a handler may connect or disconnect handlers (including
//! itself) re-entrantly.
//!
//! # Destruction protocol
//!
//! When the last strong reference drops:
//!
//! 1. Every dispose guard callback runs exactly once, in registration
//!    order. Guards unregistered from within a callback are skipped.
//!    [`WeakObject::upgrade`] already fails at this point.
//! 2. The side table is cleared; entry destructors run after all guards.
//!
//! Dropping a [`NotifyGuard`] or [`DisposeGuard`] after its object has died
//! is a no-op.
//!
//! # Failure Modes
//!
//! - **Unknown/ill-typed property access**: reported via [`ObjectError`],
//!   never a panic; no notification fires on a failed set.
//! - **Re-entrant mutation during dispatch**: safe by snapshotting; the
//!   handler list seen by a dispatch cycle is the one at emission time.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Weak};

use ahash::AHashMap;

use crate::class::{ObjectType, ParamSpec};
use crate::error::ObjectError;
use crate::value::Value;

type NotifyCallback = Rc<dyn Fn(&Object, &ParamSpec)>;

struct NotifyEntry {
    id: u64,
    property: String,
    callback: NotifyCallback,
}

#[derive(Default)]
struct NotifyRegistry {
    next_id: u64,
    handlers: Vec<NotifyEntry>,
}

struct GuardEntry {
    id: u64,
    callback: Option<Box<dyn FnOnce()>>,
}

#[derive(Default)]
struct GuardRegistry {
    next_id: u64,
    guards: Vec<GuardEntry>,
}

pub(crate) struct ObjectCore {
    ty: ObjectType,
    props: RefCell<AHashMap<String, Value>>,
    notify: RefCell<NotifyRegistry>,
    guards: RefCell<GuardRegistry>,
    data: RefCell<AHashMap<&'static str, Box<dyn Any>>>,
}

impl Drop for ObjectCore {
    fn drop(&mut self) {
        // Dispose guards first. Callbacks are taken one at a time so a guard
        // may tear down other guards; unregistration during this loop is a
        // no-op because weak upgrades already fail.
        loop {
            let next = self
                .guards
                .borrow_mut()
                .guards
                .iter_mut()
                .find_map(|g| g.callback.take());
            match next {
                Some(callback) => callback(),
                None => break,
            }
        }
        // Side-table destructors run after every guard has seen the death.
        let data = std::mem::take(&mut *self.data.borrow_mut());
        drop(data);
    }
}

/// A reference-counted instance of an [`ObjectType`].
///
/// Cloning is cheap and shares the instance; equality is identity.
#[derive(Clone)]
pub struct Object {
    core: Arc<ObjectCore>,
}

impl Object {
    /// Create an instance with every property at its default value.
    #[must_use]
    pub fn new(ty: &ObjectType) -> Self {
        let props = ty
            .list_properties()
            .iter()
            .map(|spec| (spec.name().to_owned(), spec.default_value().clone()))
            .collect();
        Self {
            core: Arc::new(ObjectCore {
                ty: ty.clone(),
                props: RefCell::new(props),
                notify: RefCell::new(NotifyRegistry::default()),
                guards: RefCell::new(GuardRegistry::default()),
                data: RefCell::new(AHashMap::new()),
            }),
        }
    }

    /// Create an instance with explicit initial values.
    ///
    /// Unlike [`Object::set`], this may initialize `CONSTRUCT_ONLY`
    /// properties. No notifications fire during construction.
    pub fn with_properties(
        ty: &ObjectType,
        values: &[(&str, Value)],
    ) -> Result<Self, ObjectError> {
        let object = Self::new(ty);
        for (name, value) in values {
            let spec = ty
                .find_property(name)
                .ok_or_else(|| object.no_such_property(name))?;
            if !spec.is_writable() {
                return Err(ObjectError::NotWritable {
                    ty: ty.name().to_owned(),
                    property: spec.name().to_owned(),
                });
            }
            if !spec.value_type().accepts(value) {
                return Err(object.type_mismatch(&spec, value));
            }
            object
                .core
                .props
                .borrow_mut()
                .insert(spec.name().to_owned(), value.clone());
        }
        Ok(object)
    }

    #[must_use]
    pub fn object_type(&self) -> &ObjectType {
        &self.core.ty
    }

    /// Current strong reference count, including this handle.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.core)
    }

    /// Read a property.
    pub fn get(&self, property: &str) -> Result<Value, ObjectError> {
        let spec = self
            .core
            .ty
            .find_property(property)
            .ok_or_else(|| self.no_such_property(property))?;
        if !spec.is_readable() {
            return Err(ObjectError::NotReadable {
                ty: self.core.ty.name().to_owned(),
                property: spec.name().to_owned(),
            });
        }
        let value = self
            .core
            .props
            .borrow()
            .get(spec.name())
            .cloned()
            .expect("property store holds every declared property");
        Ok(value)
    }

    /// Write a property and notify its handlers.
    ///
    /// Handlers fire after the store is updated; a failed set fires
    /// nothing.
    pub fn set(&self, property: &str, value: impl Into<Value>) -> Result<(), ObjectError> {
        let value = value.into();
        let spec = self
            .core
            .ty
            .find_property(property)
            .ok_or_else(|| self.no_such_property(property))?;
        if !spec.is_writable() {
            return Err(ObjectError::NotWritable {
                ty: self.core.ty.name().to_owned(),
                property: spec.name().to_owned(),
            });
        }
        if spec.is_construct_only() {
            return Err(ObjectError::ConstructOnly {
                ty: self.core.ty.name().to_owned(),
                property: spec.name().to_owned(),
            });
        }
        if !spec.value_type().accepts(&value) {
            return Err(self.type_mismatch(&spec, &value));
        }
        self.core
            .props
            .borrow_mut()
            .insert(spec.name().to_owned(), value);
        self.notify_property(&spec);
        Ok(())
    }

    /// Subscribe to change notifications of one property.
    ///
    /// The handler fires after every successful [`Object::set`] of that
    /// property, in registration order. Dropping the returned guard
    /// disconnects.
    pub fn connect_notify(
        &self,
        property: &str,
        callback: impl Fn(&Object, &ParamSpec) + 'static,
    ) -> Result<NotifyGuard, ObjectError> {
        let spec = self
            .core
            .ty
            .find_property(property)
            .ok_or_else(|| self.no_such_property(property))?;
        let mut registry = self.core.notify.borrow_mut();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.handlers.push(NotifyEntry {
            id,
            property: spec.name().to_owned(),
            callback: Rc::new(callback),
        });
        Ok(NotifyGuard {
            core: Arc::downgrade(&self.core),
            id,
        })
    }

    /// Register a callback that runs when the last strong reference drops.
    ///
    /// Dropping the returned guard unregisters the callback; once the
    /// object is dead both the callback and the unregistration have already
    /// become no-ops.
    pub fn add_dispose_guard(&self, callback: impl FnOnce() + 'static) -> DisposeGuard {
        let mut registry = self.core.guards.borrow_mut();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.guards.push(GuardEntry {
            id,
            callback: Some(Box::new(callback)),
        });
        DisposeGuard {
            core: Arc::downgrade(&self.core),
            id,
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakObject {
        WeakObject {
            core: Arc::downgrade(&self.core),
        }
    }

    /// Attach a keyed value to this instance, replacing any previous entry.
    pub fn set_data<T: Any>(&self, key: &'static str, value: T) {
        let previous = self.core.data.borrow_mut().insert(key, Box::new(value));
        drop(previous);
    }

    /// Detach and return the keyed value, if present with the right type.
    pub fn steal_data<T: Any>(&self, key: &'static str) -> Option<T> {
        let mut data = self.core.data.borrow_mut();
        if !data.get(key).is_some_and(|entry| entry.is::<T>()) {
            return None;
        }
        let entry = data.remove(key).expect("entry checked above");
        drop(data);
        Some(
            *entry
                .downcast::<T>()
                .expect("entry type checked above"),
        )
    }

    /// Borrow the keyed value for the duration of `f`.
    ///
    /// `f` must not mutate this instance's side table.
    pub fn with_data<T: Any, R>(&self, key: &'static str, f: impl FnOnce(&T) -> R) -> Option<R> {
        let data = self.core.data.borrow();
        let value = data.get(key)?.downcast_ref::<T>()?;
        Some(f(value))
    }

    fn notify_property(&self, spec: &ParamSpec) {
        let callbacks: Vec<NotifyCallback> = self
            .core
            .notify
            .borrow()
            .handlers
            .iter()
            .filter(|h| h.property == spec.name())
            .map(|h| h.callback.clone())
            .collect();
        for callback in callbacks {
            callback(self, spec);
        }
    }

    fn no_such_property(&self, property: &str) -> ObjectError {
        ObjectError::NoSuchProperty {
            ty: self.core.ty.name().to_owned(),
            property: property.to_owned(),
        }
    }

    fn type_mismatch(&self, spec: &ParamSpec, value: &Value) -> ObjectError {
        ObjectError::TypeMismatch {
            property: spec.name().to_owned(),
            expected: spec.value_type().to_string(),
            found: value
                .value_type()
                .map_or_else(|| "null".to_owned(), |ty| ty.to_string()),
        }
    }
}

#[cfg(feature = "test-helpers")]
impl Object {
    /// Number of connected notify handlers (all properties).
    #[must_use]
    pub fn notify_handler_count(&self) -> usize {
        self.core.notify.borrow().handlers.len()
    }

    /// Number of registered dispose guards.
    #[must_use]
    pub fn dispose_guard_count(&self) -> usize {
        self.core.guards.borrow().guards.len()
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for Object {}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.core.ty.name())
            .field("refs", &Arc::strong_count(&self.core))
            .finish()
    }
}

/// A non-owning handle to an [`Object`].
#[derive(Clone)]
pub struct WeakObject {
    core: Weak<ObjectCore>,
}

impl WeakObject {
    /// Recover a strong handle, failing once destruction has begun.
    #[must_use]
    pub fn upgrade(&self) -> Option<Object> {
        self.core.upgrade().map(|core| Object { core })
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakObject")
    }
}

/// RAII disconnect for a notify handler. Inert after the object dies.
#[derive(Debug)]
pub struct NotifyGuard {
    core: Weak<ObjectCore>,
    id: u64,
}

impl Drop for NotifyGuard {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            core.notify.borrow_mut().handlers.retain(|h| h.id != self.id);
        }
    }
}

/// RAII unregistration for a dispose callback. Inert after the object dies.
#[derive(Debug)]
pub struct DisposeGuard {
    core: Weak<ObjectCore>,
    id: u64,
}

impl Drop for DisposeGuard {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            core.guards.borrow_mut().guards.retain(|g| g.id != self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ParamFlags;
    use crate::value::ValueType;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn widget_type() -> ObjectType {
        ObjectType::builder("Widget")
            .property(ParamSpec::new("width", ValueType::Int, ParamFlags::READWRITE))
            .property(ParamSpec::new("label", ValueType::Str, ParamFlags::READWRITE))
            .property(ParamSpec::new(
                "id",
                ValueType::Str,
                ParamFlags::READWRITE | ParamFlags::CONSTRUCT_ONLY,
            ))
            .build()
    }

    #[test]
    fn defaults_then_set_get() {
        let ty = widget_type();
        let obj = Object::new(&ty);

        assert_eq!(obj.get("width").unwrap(), Value::Int(0));
        obj.set("width", 42).unwrap();
        assert_eq!(obj.get("width").unwrap(), Value::Int(42));
    }

    #[test]
    fn set_errors() {
        let ty = widget_type();
        let obj = Object::new(&ty);

        assert!(matches!(
            obj.set("missing", 1),
            Err(ObjectError::NoSuchProperty { .. })
        ));
        assert!(matches!(
            obj.set("width", "nope"),
            Err(ObjectError::TypeMismatch { .. })
        ));
        assert!(matches!(
            obj.set("id", "later"),
            Err(ObjectError::ConstructOnly { .. })
        ));
    }

    #[test]
    fn construct_only_settable_at_construction() {
        let ty = widget_type();
        let obj = Object::with_properties(&ty, &[("id", Value::from("w1"))]).unwrap();
        assert_eq!(obj.get("id").unwrap(), Value::from("w1"));
    }

    #[test]
    fn notify_fires_after_store_in_order() {
        let ty = widget_type();
        let obj = Object::new(&ty);
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = Rc::clone(&log);
        let _a = obj
            .connect_notify("width", move |object, spec| {
                let seen = object.get(spec.name()).unwrap();
                log_a.borrow_mut().push(("a", seen));
            })
            .unwrap();
        let log_b = Rc::clone(&log);
        let _b = obj
            .connect_notify("width", move |_, _| {
                log_b.borrow_mut().push(("b", Value::Null));
            })
            .unwrap();

        obj.set("width", 7).unwrap();
        let entries = log.borrow();
        assert_eq!(entries.len(), 2);
        // First handler sees the already-updated value; order is
        // registration order.
        assert_eq!(entries[0], ("a", Value::Int(7)));
        assert_eq!(entries[1].0, "b");
    }

    #[test]
    fn notify_filters_by_property() {
        let ty = widget_type();
        let obj = Object::new(&ty);
        let fired = Rc::new(Cell::new(0u32));

        let fired_clone = Rc::clone(&fired);
        let _guard = obj
            .connect_notify("width", move |_, _| {
                fired_clone.set(fired_clone.get() + 1);
            })
            .unwrap();

        obj.set("label", "hello").unwrap();
        assert_eq!(fired.get(), 0);
        obj.set("width", 1).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn failed_set_fires_nothing() {
        let ty = widget_type();
        let obj = Object::new(&ty);
        let fired = Rc::new(Cell::new(0u32));

        let fired_clone = Rc::clone(&fired);
        let _guard = obj
            .connect_notify("width", move |_, _| {
                fired_clone.set(fired_clone.get() + 1);
            })
            .unwrap();

        let _ = obj.set("width", "wrong type");
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn guard_drop_disconnects() {
        let ty = widget_type();
        let obj = Object::new(&ty);
        let fired = Rc::new(Cell::new(0u32));

        let fired_clone = Rc::clone(&fired);
        let guard = obj
            .connect_notify("width", move |_, _| {
                fired_clone.set(fired_clone.get() + 1);
            })
            .unwrap();

        obj.set("width", 1).unwrap();
        drop(guard);
        obj.set("width", 2).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn disconnect_during_dispatch_is_safe() {
        let ty = widget_type();
        let obj = Object::new(&ty);
        let fired = Rc::new(Cell::new(0u32));

        // The first handler drops the second one's guard mid-dispatch; the
        // snapshot still delivers the current cycle to both.
        let slot: Rc<RefCell<Option<NotifyGuard>>> = Rc::new(RefCell::new(None));
        let slot_clone = Rc::clone(&slot);
        let _first = obj
            .connect_notify("width", move |_, _| {
                slot_clone.borrow_mut().take();
            })
            .unwrap();
        let fired_clone = Rc::clone(&fired);
        let second = obj
            .connect_notify("width", move |_, _| {
                fired_clone.set(fired_clone.get() + 1);
            })
            .unwrap();
        *slot.borrow_mut() = Some(second);

        obj.set("width", 1).unwrap();
        assert_eq!(fired.get(), 1);
        obj.set("width", 2).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn dispose_guards_run_once_in_order() {
        let ty = widget_type();
        let obj = Object::new(&ty);
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = Rc::clone(&log);
        let _a = obj.add_dispose_guard(move || log_a.borrow_mut().push("a"));
        let log_b = Rc::clone(&log);
        let _b = obj.add_dispose_guard(move || log_b.borrow_mut().push("b"));

        drop(obj);
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn unregistered_dispose_guard_does_not_run() {
        let ty = widget_type();
        let obj = Object::new(&ty);
        let fired = Rc::new(Cell::new(false));

        let fired_clone = Rc::clone(&fired);
        let guard = obj.add_dispose_guard(move || fired_clone.set(true));
        drop(guard);
        drop(obj);
        assert!(!fired.get());
    }

    #[test]
    fn guard_drop_after_death_is_noop() {
        let ty = widget_type();
        let obj = Object::new(&ty);
        let notify_guard = obj.connect_notify("width", |_, _| {}).unwrap();
        let dispose_guard = obj.add_dispose_guard(|| {});

        drop(obj);
        drop(notify_guard);
        drop(dispose_guard);
    }

    #[test]
    fn weak_upgrade_fails_during_dispose() {
        let ty = widget_type();
        let obj = Object::new(&ty);
        let weak = obj.downgrade();

        let seen_alive = Rc::new(Cell::new(true));
        let seen_clone = Rc::clone(&seen_alive);
        let weak_clone = weak.clone();
        let _guard = obj.add_dispose_guard(move || {
            seen_clone.set(weak_clone.upgrade().is_some());
        });

        drop(obj);
        assert!(!seen_alive.get());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn side_table_round_trip() {
        let ty = widget_type();
        let obj = Object::new(&ty);

        obj.set_data("marker", 17u32);
        assert_eq!(obj.with_data("marker", |v: &u32| *v), Some(17));
        // Wrong type neither reads nor removes the entry.
        assert_eq!(obj.steal_data::<String>("marker"), None);
        assert_eq!(obj.steal_data::<u32>("marker"), Some(17));
        assert_eq!(obj.steal_data::<u32>("marker"), None);
    }

    #[test]
    fn side_table_dropped_after_guards() {
        struct Tracker(Rc<RefCell<Vec<&'static str>>>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.borrow_mut().push("data");
            }
        }

        let ty = widget_type();
        let obj = Object::new(&ty);
        let log = Rc::new(RefCell::new(Vec::new()));

        obj.set_data("tracker", Tracker(Rc::clone(&log)));
        let log_guard = Rc::clone(&log);
        let _guard = obj.add_dispose_guard(move || log_guard.borrow_mut().push("guard"));

        drop(obj);
        assert_eq!(*log.borrow(), vec!["guard", "data"]);
    }

    #[test]
    fn identity_semantics() {
        let ty = widget_type();
        let a = Object::new(&ty);
        let b = a.clone();
        let c = Object::new(&ty);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.ref_count(), 2);
    }
}
