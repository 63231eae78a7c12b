#![forbid(unsafe_code)]

//! Host object model for the Lumen expression engine.
//!
//! This crate provides the runtime substrate that the `lumen-expr`
//! expression engine evaluates against:
//!
//! - [`Value`] / [`ValueType`]: the dynamically-typed value currency.
//! - [`ObjectType`] / [`ParamSpec`]: a runtime type system with
//!   single-inheritance and per-type property introspection.
//! - [`Object`]: a reference-counted instance with typed properties,
//!   per-property change notification, destruction callbacks, and an
//!   `Any`-keyed side table.
//! - [`Callable`]: an opaque N+1-ary callable (instance plus N parameters).
//!
//! # Architecture
//!
//! `Object` uses `Arc` for shared ownership (atomic reference counts) while
//! all interior state lives in `RefCell`s: handles may be released from any
//! thread, but property access, notification, and side-table mutation are
//! single-threaded by construction.
//!
//! Notification dispatch snapshots the handler list before invoking it, so
//! handlers may connect and disconnect re-entrantly. Destruction callbacks
//! registered via [`Object::add_dispose_guard`] run exactly once, before the
//! side table is torn down.

pub mod callable;
pub mod class;
pub mod error;
pub mod object;
pub mod value;

pub use callable::Callable;
pub use class::{ObjectType, ParamFlags, ParamSpec, TypeBuilder};
pub use error::ObjectError;
pub use object::{DisposeGuard, NotifyGuard, Object, WeakObject};
pub use value::{Value, ValueType};
