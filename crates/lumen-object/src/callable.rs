#![forbid(unsafe_code)]

//! Opaque callables with a declared return type.
//!
//! A [`Callable`] is invoked with an optional instance (`this`) as argument
//! 0 and a slice of evaluated parameter values as arguments 1..N. The
//! backing function representation is opaque to callers.

use std::fmt;
use std::rc::Rc;

use crate::object::Object;
use crate::value::{Value, ValueType};

struct CallableInner {
    return_type: ValueType,
    func: Box<dyn Fn(Option<&Object>, &[Value]) -> Value>,
}

/// A shared, immutable callable value.
#[derive(Clone)]
pub struct Callable {
    inner: Rc<CallableInner>,
}

impl Callable {
    #[must_use]
    pub fn new(
        return_type: ValueType,
        func: impl Fn(Option<&Object>, &[Value]) -> Value + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(CallableInner {
                return_type,
                func: Box::new(func),
            }),
        }
    }

    /// The type this callable declares for its result.
    #[must_use]
    pub fn return_type(&self) -> &ValueType {
        &self.inner.return_type
    }

    /// Call with `this` as argument 0 and `args` as arguments 1..N.
    #[must_use]
    pub fn invoke(&self, this: Option<&Object>, args: &[Value]) -> Value {
        (self.inner.func)(this, args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("return_type", self.return_type())
            .finish()
    }
}
