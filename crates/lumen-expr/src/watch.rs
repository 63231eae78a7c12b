#![forbid(unsafe_code)]

//! The watch subscription state machine.
//!
//! An [`ExpressionWatch`] pairs one expression tree with one optional
//! `this` context and keeps listeners installed on everything the tree's
//! value may depend on. The caller's callback fires whenever the value
//! *may* have changed — spurious notifications are permitted, missed
//! changes are not.
//!
//! # State machine
//!
//! *watching* → *unwatched* (terminal). The transition happens on the
//! first of: an explicit [`ExpressionWatch::unwatch`], the destruction of
//! `this` (which notifies the callback once more, then tears down), or the
//! drop of the last handle. Unwatching releases the sub-watch tree, the
//! guard on `this`, the user callback (running the destructors of whatever
//! it captured), and the expression reference — in that order. A second
//! unwatch is a no-op; an unwatched watch evaluates to `None` without side
//! effects.
//!
//! # Invariants
//!
//! 1. The installed observer tree has exactly `watch_slots` state objects
//!    (asserted at install).
//! 2. The watch holds `this` weakly: watching an object never keeps it
//!    alive.
//! 3. Teardown runs exactly once, even when triggered from inside a
//!    notification it is itself delivering.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Weak};

use lumen_object::{DisposeGuard, Object, Value, WeakObject};

use crate::expression::{Expression, NotifyFn, SubWatch};

struct WatchInner {
    // Field order is teardown order: sub-watches, then the guard on
    // `this`, then the user callback, then the expression reference.
    sub: SubWatch,
    _this_guard: Option<DisposeGuard>,
    callback: Rc<dyn Fn()>,
    this: Option<WeakObject>,
    expression: Expression,
}

pub(crate) struct WatchState {
    inner: RefCell<Option<WatchInner>>,
}

impl WatchState {
    /// Deliver a notification to the user callback, if still watching.
    fn fire(&self) {
        let callback = self
            .inner
            .borrow()
            .as_ref()
            .map(|inner| Rc::clone(&inner.callback));
        if let Some(callback) = callback {
            callback();
        }
    }

    /// `this` is being destroyed: clear it, notify once, then tear down.
    fn this_destroyed(&self) {
        let callback = {
            let mut borrow = self.inner.borrow_mut();
            borrow.as_mut().map(|inner| {
                inner.this = None;
                Rc::clone(&inner.callback)
            })
        };
        if let Some(callback) = callback {
            callback();
        }
        self.unwatch();
    }

    fn unwatch(&self) {
        let inner = self.inner.borrow_mut().take();
        if let Some(inner) = inner {
            tracing::trace!("tearing down expression watch");
            drop(inner);
        }
    }
}

/// A live subscription to an expression's possible value changes.
///
/// Handles are reference-counted independently of the watching state:
/// clones may be kept after the watch was unwatched, but an unwatched
/// watch is inert.
#[derive(Clone)]
pub struct ExpressionWatch {
    state: Arc<WatchState>,
}

impl ExpressionWatch {
    /// Whether the watch still delivers notifications.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.state.inner.borrow().is_some()
    }

    /// Evaluate the watched expression against the captured `this`.
    ///
    /// Equivalent to evaluating the expression the watch was created from;
    /// fails without side effects once the watch is unwatched.
    #[must_use]
    pub fn evaluate(&self) -> Option<Value> {
        let (expression, this) = {
            let borrow = self.state.inner.borrow();
            let inner = borrow.as_ref()?;
            (inner.expression.clone(), inner.this.clone())
        };
        let this = match this {
            Some(weak) => Some(weak.upgrade()?),
            None => None,
        };
        expression.evaluate(this.as_ref())
    }

    /// Stop watching. Releases every installed listener, runs the
    /// destructors of the callback's captured state, and drops the
    /// expression reference. A second call is a no-op.
    pub fn unwatch(&self) {
        self.state.unwatch();
    }
}

impl fmt::Debug for ExpressionWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionWatch")
            .field("watching", &self.is_watching())
            .finish()
    }
}

impl Expression {
    /// Watch this expression for possible value changes.
    ///
    /// `callback` is invoked whenever the evaluation *may* have changed;
    /// the engine cannot guarantee that it did change, but it guarantees
    /// the opposite: when it did, the callback is invoked. If `this` is
    /// destroyed, the callback is invoked one final time and the watch
    /// tears itself down.
    #[must_use]
    pub fn watch(&self, this: Option<&Object>, callback: impl Fn() + 'static) -> ExpressionWatch {
        let state = Arc::new(WatchState {
            inner: RefCell::new(None),
        });

        let notify: NotifyFn = {
            let weak: Weak<WatchState> = Arc::downgrade(&state);
            Rc::new(move || {
                if let Some(state) = weak.upgrade() {
                    state.fire();
                }
            })
        };
        let this_guard = this.map(|object| {
            let weak = Arc::downgrade(&state);
            object.add_dispose_guard(move || {
                if let Some(state) = weak.upgrade() {
                    state.this_destroyed();
                }
            })
        });

        let sub = self.subwatch(this, &notify);
        debug_assert_eq!(
            sub.slot_count(),
            self.watch_slots(),
            "sizing and install passes disagree on the observer tree"
        );
        tracing::trace!(slots = sub.slot_count(), "expression watch installed");

        *state.inner.borrow_mut() = Some(WatchInner {
            sub,
            _this_guard: this_guard,
            callback: Rc::new(callback),
            this: this.map(Object::downgrade),
            expression: self.clone(),
        });

        ExpressionWatch { state }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
