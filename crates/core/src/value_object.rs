//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value** — two value
/// objects with the same attributes are equal. Entities, by contrast, are
/// identified by their id regardless of attribute values. A consultation
/// record is a value object; an appointment is an entity.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
