#![forbid(unsafe_code)]

//! One-way property binds.
//!
//! [`Expression::bind`] keeps a target object's property synchronized with
//! an expression: one immediate evaluation-and-write at bind time, then a
//! re-evaluation and write on every watch notification. A failed
//! evaluation leaves the target property untouched.
//!
//! # Teardown protocol
//!
//! Every target carries the list of its active binds in its side table, so
//! a bind outlives its creator's interest automatically:
//!
//! - When the *target* is destroyed, a dispose guard first invalidates
//!   every bind (clears its target pointer) so no re-entrant write can hit
//!   the dying object; the side-table teardown that follows unwatches each
//!   watch that is still alive.
//! - When a bind's *watch* dies first (its `this` was destroyed, or the
//!   caller unwatched it), the bind removes itself from the target's list;
//!   once the list empties, the list and its dispose guard go away too.
//!
//! Whichever side runs last performs the final teardown, exactly once.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use lumen_object::{Object, ParamSpec, WeakObject};

use crate::expression::Expression;
use crate::watch::ExpressionWatch;

const BINDS_KEY: &str = "lumen-expression-binds";

struct BindState {
    pspec: ParamSpec,
    target: RefCell<Option<WeakObject>>,
    watch: RefCell<Option<ExpressionWatch>>,
}

struct BindList {
    binds: RefCell<Vec<Rc<BindState>>>,
    _guard: lumen_object::DisposeGuard,
}

impl Drop for BindList {
    fn drop(&mut self) {
        let binds: Vec<Rc<BindState>> = self.binds.borrow_mut().drain(..).collect();
        for bind in binds {
            debug_assert!(
                bind.target.borrow().is_none(),
                "bind list torn down before invalidation"
            );
            let watch = bind.watch.borrow_mut().take();
            if let Some(watch) = watch {
                watch.unwatch();
            }
        }
    }
}

/// Keeps the bind registered for the lifetime of the watch callback;
/// dropping it (when the watch dies) runs the bind's free path.
struct BindRelease(Rc<BindState>);

impl BindRelease {
    fn notify(&self) {
        bind_notify(&self.0);
    }
}

impl Drop for BindRelease {
    fn drop(&mut self) {
        let bind = &self.0;
        let target = bind.target.borrow_mut().take().and_then(|w| w.upgrade());
        match target {
            Some(target) => {
                // The watch died while the target is alive: leave the list.
                let now_empty = target.with_data(BINDS_KEY, |list: &Rc<BindList>| {
                    let mut binds = list.binds.borrow_mut();
                    binds.retain(|b| !Rc::ptr_eq(b, bind));
                    binds.is_empty()
                });
                if now_empty == Some(true) {
                    let _ = target.steal_data::<Rc<BindList>>(BINDS_KEY);
                }
                bind.watch.borrow_mut().take();
            }
            None => {
                // Invalidation already ran; the list teardown must not
                // unwatch this bind a second time.
                bind.watch.borrow_mut().take();
            }
        }
    }
}

fn bind_notify(bind: &BindState) {
    let Some(target) = bind
        .target
        .borrow()
        .as_ref()
        .and_then(WeakObject::upgrade)
    else {
        return;
    };
    let Some(watch) = bind.watch.borrow().clone() else {
        return;
    };
    let Some(value) = watch.evaluate() else {
        return;
    };
    if let Err(err) = target.set(bind.pspec.name(), value) {
        tracing::error!(%err, "bind target rejected the evaluated value");
    }
}

fn bind_list_for(target: &Object) -> Rc<BindList> {
    if let Some(list) = target.with_data(BINDS_KEY, |list: &Rc<BindList>| Rc::clone(list)) {
        return list;
    }
    let list = Rc::new_cyclic(|weak: &Weak<BindList>| {
        let weak = weak.clone();
        let guard = target.add_dispose_guard(move || {
            if let Some(list) = weak.upgrade() {
                // Clear every target pointer before any per-bind teardown
                // runs, so nothing writes into the dying object.
                for bind in list.binds.borrow().iter() {
                    bind.target.borrow_mut().take();
                }
            }
        });
        BindList {
            binds: RefCell::new(Vec::new()),
            _guard: guard,
        }
    });
    target.set_data(BINDS_KEY, Rc::clone(&list));
    list
}

impl Expression {
    /// Bind `target`'s property named `property_name` to this expression.
    ///
    /// The expression is evaluated against `this` and written into the
    /// property immediately, and again after every notification. A failed
    /// evaluation leaves the property unchanged; supply a fallback
    /// expression to avoid that.
    ///
    /// The expression is consumed, on success and on failure alike; clone
    /// the handle first to keep it. The target property must exist, be
    /// writable, not be construct-only, and accept the expression's value
    /// type — violations are programmer errors: a critical diagnostic is
    /// emitted and `None` is returned.
    ///
    /// The returned watch may be used to unbind early via
    /// [`ExpressionWatch::unwatch`]; the bind otherwise lives until the
    /// target or `this` is destroyed.
    pub fn bind(
        self,
        target: &Object,
        property_name: &str,
        this: Option<&Object>,
    ) -> Option<ExpressionWatch> {
        let ty = target.object_type();
        let Some(pspec) = ty.find_property(property_name) else {
            tracing::error!(
                ty = ty.name(),
                property = property_name,
                "bind target has no property with that name"
            );
            return None;
        };
        if !pspec.is_writable() || pspec.is_construct_only() {
            tracing::error!(
                ty = ty.name(),
                property = property_name,
                "bind target property is not writable"
            );
            return None;
        }
        if !pspec.value_type().is_assignable_from(&self.value_type()) {
            tracing::error!(
                ty = ty.name(),
                property = property_name,
                expected = %pspec.value_type(),
                found = %self.value_type(),
                "expression value type does not fit the bind target property"
            );
            return None;
        }

        let list = bind_list_for(target);
        let bind = Rc::new(BindState {
            pspec,
            target: RefCell::new(Some(target.downgrade())),
            watch: RefCell::new(None),
        });

        let release = BindRelease(Rc::clone(&bind));
        let watch = self.watch(this, move || release.notify());
        *bind.watch.borrow_mut() = Some(watch.clone());
        list.binds.borrow_mut().push(Rc::clone(&bind));

        bind_notify(&bind);
        Some(watch)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
