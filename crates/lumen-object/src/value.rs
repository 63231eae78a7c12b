#![forbid(unsafe_code)]

//! Dynamically-typed values and their type descriptors.
//!
//! [`Value`] is the currency exchanged between properties, expressions, and
//! callables. [`ValueType`] describes what a slot (a property, an expression
//! result, a callable return) may hold.
//!
//! # Invariants
//!
//! 1. Every `Value` except [`Value::Null`] has exactly one `ValueType`.
//! 2. `Null` is assignable only to object-typed slots; it is the default of
//!    object-typed properties.
//! 3. Assignability is exact for scalars and covariant for objects: a value
//!    of type `T` fits a slot of type `U` iff `T.is_a(U)`.

use std::fmt;

use crate::class::ObjectType;
use crate::object::Object;

/// The semantic type of a value slot.
#[derive(Clone, PartialEq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
    /// An object instance of the given type (or any subtype).
    Object(ObjectType),
}

impl ValueType {
    /// Whether a value of type `source` may be stored in a slot of this type.
    ///
    /// Scalars must match exactly; object types accept subtypes.
    #[must_use]
    pub fn is_assignable_from(&self, source: &ValueType) -> bool {
        match (self, source) {
            (ValueType::Object(slot), ValueType::Object(value)) => value.is_a(slot),
            _ => self == source,
        }
    }

    /// Whether the given value may be stored in a slot of this type.
    ///
    /// [`Value::Null`] is accepted by object slots only.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Object(_), Value::Null) => true,
            _ => value
                .value_type()
                .is_some_and(|ty| self.is_assignable_from(&ty)),
        }
    }

    /// The default value for a slot of this type.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Str => Value::Str(String::new()),
            ValueType::Object(_) => Value::Null,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => f.write_str("bool"),
            ValueType::Int => f.write_str("int"),
            ValueType::Float => f.write_str("float"),
            ValueType::Str => f.write_str("str"),
            ValueType::Object(ty) => write!(f, "object<{}>", ty.name()),
        }
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A dynamically-typed value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// The absent object reference. Has no type of its own.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(Object),
}

impl Value {
    /// The type of this value, or `None` for [`Value::Null`].
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int(_) => Some(ValueType::Int),
            Value::Float(_) => Some(ValueType::Float),
            Value::Str(_) => Some(ValueType::Str),
            Value::Object(obj) => Some(ValueType::Object(obj.object_type().clone())),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Object(obj)
    }
}

impl From<&Object> for Value {
    fn from(obj: &Object) -> Self {
        Value::Object(obj.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ParamFlags, ParamSpec};

    fn base_type() -> ObjectType {
        ObjectType::builder("Widget")
            .property(ParamSpec::new("width", ValueType::Int, ParamFlags::READWRITE))
            .build()
    }

    #[test]
    fn scalar_assignability_is_exact() {
        assert!(ValueType::Int.is_assignable_from(&ValueType::Int));
        assert!(!ValueType::Int.is_assignable_from(&ValueType::Float));
        assert!(!ValueType::Float.is_assignable_from(&ValueType::Int));
        assert!(!ValueType::Str.is_assignable_from(&ValueType::Bool));
    }

    #[test]
    fn object_assignability_is_covariant() {
        let base = base_type();
        let derived = ObjectType::builder("Button").parent(&base).build();

        let base_slot = ValueType::Object(base.clone());
        let derived_slot = ValueType::Object(derived.clone());
        assert!(base_slot.is_assignable_from(&derived_slot));
        assert!(!derived_slot.is_assignable_from(&base_slot));
    }

    #[test]
    fn null_only_fits_object_slots() {
        let base = base_type();
        assert!(ValueType::Object(base).accepts(&Value::Null));
        assert!(!ValueType::Int.accepts(&Value::Null));
        assert!(!ValueType::Str.accepts(&Value::Null));
    }

    #[test]
    fn defaults_match_types() {
        assert_eq!(ValueType::Bool.default_value(), Value::Bool(false));
        assert_eq!(ValueType::Int.default_value(), Value::Int(0));
        assert_eq!(ValueType::Str.default_value(), Value::Str(String::new()));
        assert!(ValueType::Object(base_type()).default_value().is_null());
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from(7).as_int(), Some(7));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(1.5).as_float(), Some(1.5));
        assert_eq!(Value::from(7).as_str(), None);
        assert!(Value::Null.is_null());
    }

    #[test]
    fn null_has_no_type() {
        assert!(Value::Null.value_type().is_none());
        assert_eq!(Value::from(1).value_type(), Some(ValueType::Int));
    }

    #[test]
    fn display_names() {
        assert_eq!(ValueType::Int.to_string(), "int");
        assert_eq!(
            ValueType::Object(base_type()).to_string(),
            "object<Widget>"
        );
    }
}
