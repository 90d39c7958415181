//! Small accessor-generator macros used to keep the request/response
//! structs declarative.

/// Generates a by-reference getter for a field.
macro_rules! field_method {
    ($name:ident, $field:ident, $ty:ty) => {
        pub fn $name(&self) -> &$ty {
            &self.$field
        }
    };
}

/// Generates a by-mutable-reference getter for a field.
macro_rules! field_method_as_mut {
    ($name:ident, $field:ident, $ty:ty) => {
        pub fn $name(&mut self) -> &mut $ty {
            &mut self.$field
        }
    };
}

/// Generates a builder-style setter that takes the value by move and
/// returns `&mut Self` for chaining.
macro_rules! set_field_method_as_mut {
    ($name:ident, $field:ident, $ty:ty) => {
        pub fn $name(&mut self, value: $ty) -> &mut Self {
            self.$field = value;
            self
        }
    };
}

pub(crate) use field_method;
pub(crate) use field_method_as_mut;
pub(crate) use set_field_method_as_mut;
