#![forbid(unsafe_code)]

//! Runtime type descriptors and property introspection.
//!
//! An [`ObjectType`] names a class of objects, optionally derives from a
//! parent type (single inheritance), and declares a list of properties.
//! Each property is described by a shared [`ParamSpec`]: name, value type,
//! default, and access flags.
//!
//! # Invariants
//!
//! 1. A type's property set never changes after [`TypeBuilder::build`].
//! 2. Property names are unique across a type and all of its ancestors.
//! 3. A `ParamSpec` belongs to exactly one declaring type; installing the
//!    same spec on a second type is a programmer error and panics.
//! 4. The declaring type is held weakly inside the spec, so the type graph
//!    contains no strong cycles. Since every live instance holds its type
//!    strongly, a spec whose declaring type has been dropped can no longer
//!    match any instance, and `applies_to` simply returns false.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use bitflags::bitflags;

use crate::value::{Value, ValueType};

bitflags! {
    /// Access flags of a property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ParamFlags: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        /// Settable only while constructing the instance.
        const CONSTRUCT_ONLY = 1 << 2;
    }
}

impl ParamFlags {
    pub const READWRITE: ParamFlags = ParamFlags::READABLE.union(ParamFlags::WRITABLE);
}

pub(crate) struct TypeDef {
    name: String,
    parent: Option<ObjectType>,
    props: Vec<ParamSpec>,
}

/// A reference-counted runtime type descriptor.
///
/// Cheap to clone; equality is identity.
#[derive(Clone)]
pub struct ObjectType {
    pub(crate) def: Arc<TypeDef>,
}

impl ObjectType {
    /// Start declaring a new type with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> TypeBuilder {
        TypeBuilder {
            name: name.into(),
            parent: None,
            props: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    #[must_use]
    pub fn parent(&self) -> Option<&ObjectType> {
        self.def.parent.as_ref()
    }

    /// Whether `self` is `ancestor` or derives from it.
    #[must_use]
    pub fn is_a(&self, ancestor: &ObjectType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if Arc::ptr_eq(&ty.def, &ancestor.def) {
                return true;
            }
            current = ty.parent();
        }
        false
    }

    /// Look up a property by name on this type or any ancestor.
    ///
    /// Returns the spec of the declaring type.
    #[must_use]
    pub fn find_property(&self, name: &str) -> Option<ParamSpec> {
        let mut current = Some(self);
        while let Some(ty) = current {
            if let Some(spec) = ty.def.props.iter().find(|p| p.name() == name) {
                return Some(spec.clone());
            }
            current = ty.parent();
        }
        None
    }

    /// All properties of this type, own and inherited.
    #[must_use]
    pub fn list_properties(&self) -> Vec<ParamSpec> {
        let mut out = Vec::new();
        let mut current = Some(self);
        while let Some(ty) = current {
            out.extend(ty.def.props.iter().cloned());
            current = ty.parent();
        }
        out
    }
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.def, &other.def)
    }
}

impl Eq for ObjectType {}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectType").field(&self.name()).finish()
    }
}

struct ParamSpecInner {
    name: String,
    value_type: ValueType,
    default: Value,
    flags: ParamFlags,
    owner: OnceLock<Weak<TypeDef>>,
}

/// A shared property descriptor.
#[derive(Clone)]
pub struct ParamSpec {
    inner: Arc<ParamSpecInner>,
}

impl ParamSpec {
    /// Create a spec with the type's default value.
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType, flags: ParamFlags) -> Self {
        let default = value_type.default_value();
        Self::with_default(name, value_type, default, flags)
    }

    /// Create a spec with an explicit default value.
    ///
    /// # Panics
    ///
    /// Panics if `default` is not assignable to `value_type`.
    #[must_use]
    pub fn with_default(
        name: impl Into<String>,
        value_type: ValueType,
        default: Value,
        flags: ParamFlags,
    ) -> Self {
        assert!(
            value_type.accepts(&default),
            "default value does not fit the property type `{value_type}`"
        );
        Self {
            inner: Arc::new(ParamSpecInner {
                name: name.into(),
                value_type,
                default,
                flags,
                owner: OnceLock::new(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn value_type(&self) -> &ValueType {
        &self.inner.value_type
    }

    #[must_use]
    pub fn default_value(&self) -> &Value {
        &self.inner.default
    }

    #[must_use]
    pub fn flags(&self) -> ParamFlags {
        self.inner.flags
    }

    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.inner.flags.contains(ParamFlags::READABLE)
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.inner.flags.contains(ParamFlags::WRITABLE)
    }

    #[must_use]
    pub fn is_construct_only(&self) -> bool {
        self.inner.flags.contains(ParamFlags::CONSTRUCT_ONLY)
    }

    /// The type this property was declared on, if it is still alive.
    #[must_use]
    pub fn owner(&self) -> Option<ObjectType> {
        let weak = self.inner.owner.get()?;
        weak.upgrade().map(|def| ObjectType { def })
    }

    /// Whether an instance of `ty` carries this property, i.e. whether the
    /// declaring type is `ty` or one of its ancestors.
    #[must_use]
    pub fn applies_to(&self, ty: &ObjectType) -> bool {
        let Some(owner) = self.inner.owner.get() else {
            return false;
        };
        let owner_ptr = owner.as_ptr();
        let mut current = Some(ty);
        while let Some(t) = current {
            if std::ptr::eq(Arc::as_ptr(&t.def), owner_ptr) {
                return true;
            }
            current = t.parent();
        }
        false
    }
}

impl PartialEq for ParamSpec {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ParamSpec {}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name())
            .field("value_type", self.value_type())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Builder for [`ObjectType`].
pub struct TypeBuilder {
    name: String,
    parent: Option<ObjectType>,
    props: Vec<ParamSpec>,
}

impl TypeBuilder {
    /// Derive from a parent type.
    #[must_use]
    pub fn parent(mut self, parent: &ObjectType) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Declare a property on the new type.
    #[must_use]
    pub fn property(mut self, spec: ParamSpec) -> Self {
        self.props.push(spec);
        self
    }

    /// Finalize the type.
    ///
    /// # Panics
    ///
    /// Panics on duplicate property names (including against ancestors) or
    /// when a spec is already installed on another type.
    #[must_use]
    pub fn build(self) -> ObjectType {
        for (i, spec) in self.props.iter().enumerate() {
            let duplicate = self.props[..i].iter().any(|p| p.name() == spec.name())
                || self
                    .parent
                    .as_ref()
                    .is_some_and(|p| p.find_property(spec.name()).is_some());
            assert!(
                !duplicate,
                "type `{}` declares property `{}` more than once",
                self.name,
                spec.name()
            );
        }

        let def = Arc::new(TypeDef {
            name: self.name,
            parent: self.parent,
            props: self.props,
        });
        for spec in &def.props {
            assert!(
                spec.inner.owner.set(Arc::downgrade(&def)).is_ok(),
                "property `{}` is already installed on another type",
                spec.name()
            );
        }
        ObjectType { def }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
