#![forbid(unsafe_code)]

//! Property-access errors.

use thiserror::Error;

/// Recoverable misuse of the property API.
///
/// These cover the caller-side mistakes that the object model reports
/// instead of panicking; internal invariant violations still assert.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObjectError {
    #[error("type `{ty}` has no property named `{property}`")]
    NoSuchProperty { ty: String, property: String },

    #[error("property `{property}` of `{ty}` is not readable")]
    NotReadable { ty: String, property: String },

    #[error("property `{property}` of `{ty}` is not writable")]
    NotWritable { ty: String, property: String },

    #[error("property `{property}` of `{ty}` can only be set at construction")]
    ConstructOnly { ty: String, property: String },

    #[error("value of type {found} is not assignable to property `{property}` ({expected})")]
    TypeMismatch {
        property: String,
        expected: String,
        found: String,
    },
}
