//! Record traits and the compile-time field walk.
//!
//! The reflection walk of a dynamic language is replaced here by two
//! generated trait impls: [`ObjectCore`] (identity) and [`Fields`]
//! (descriptor walk plus dotted-path accessors), both derived by the
//! [`object!`](crate::object!) and [`fields!`](crate::fields!)
//! macros from a plain field list with inline constraint tags.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::schema::descriptor::{Constraints, FieldDescMap, FieldDescriptor};
use crate::value::Value;

/// Base item every stored record embeds. Holds the UUID, which lives
/// in the filename rather than the document body, so it is never
/// serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    uuid: String,
}

impl Item {
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn initialize(&mut self, uuid: &str) {
        self.uuid = uuid.to_string();
    }
}

/// Identity surface generated by [`object!`](crate::object!).
pub trait ObjectCore {
    /// Per-type string identifier; also names the type directory.
    const TYPE_NAME: &'static str;

    fn uuid(&self) -> &str;

    fn initialize(&mut self, uuid: &str);
}

/// Structural surface generated by [`object!`](crate::object!) and
/// [`fields!`](crate::fields!): the descriptor walk and the
/// dotted-path accessors.
pub trait Fields {
    /// Appends the descriptors of this shape, every path prefixed
    /// with `prefix`.
    fn describe(prefix: &str, out: &mut Vec<FieldDescriptor>);

    /// Value of the field at `path`, split on dots.
    fn value_at(&self, path: &[&str]) -> Option<Value>;

    /// Applies a case transform to the string field at `path`.
    fn apply_at(&mut self, path: &[&str], constraints: &Constraints);
}

/// An optional sub-structure walks like its pointee: descriptors come
/// from the type, an absent value reads as the zero pointee.
impl<T: Fields + Default> Fields for Option<T> {
    fn describe(prefix: &str, out: &mut Vec<FieldDescriptor>) {
        T::describe(prefix, out);
    }

    fn value_at(&self, path: &[&str]) -> Option<Value> {
        match self {
            Some(inner) => inner.value_at(path),
            None => T::default().value_at(path),
        }
    }

    fn apply_at(&mut self, path: &[&str], constraints: &Constraints) {
        if let Some(inner) = self {
            inner.apply_at(path, constraints);
        }
    }
}

/// A storable record.
///
/// `transform` and `validate` are the two behavior hooks; the rest of
/// the surface is generated. Most types implement this with an empty
/// block:
///
/// ```ignore
/// impl Object for Person {}
/// ```
pub trait Object:
    ObjectCore + Fields + Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
    /// In-place canonicalization hook run before validation.
    fn transform(&mut self) {}

    /// Pre-insert check; an error here aborts the write.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Walks the record shape into its descriptor map.
    fn descriptors() -> FieldDescMap {
        let mut fds = Vec::new();
        Self::describe("", &mut fds);
        FieldDescMap::from_descriptors(fds)
    }

    /// Name-keyed accessor over dotted paths.
    fn field_by_path(&self, path: &str) -> Option<Value> {
        let parts: Vec<&str> = path.split('.').collect();
        self.value_at(&parts)
    }
}

pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Leaf types a record can expose to the index engine.
///
/// Conversion widens to the four [`Value`] cases: signed integers to
/// `Int`, unsigned to `Uint`, floats to `Float`, timestamps to UTC
/// nanoseconds. The type name is the static name recorded in field
/// descriptors; optional leaves collapse to the pointee's name
/// prefixed with `*`.
pub trait FieldValue {
    fn type_name() -> String;

    fn to_value(&self) -> Value;

    /// Case transform hook; only strings react to upper/lower.
    fn apply_case(&mut self, _constraints: &Constraints) {}
}

macro_rules! leaf_field_value {
    ($($t:ty => $name:literal as $case:ident),+ $(,)?) => {
        $(impl FieldValue for $t {
            fn type_name() -> String {
                $name.to_string()
            }

            fn to_value(&self) -> Value {
                Value::$case(*self as _)
            }
        })+
    };
}

leaf_field_value!(
    i8 => "i8" as Int,
    i16 => "i16" as Int,
    i32 => "i32" as Int,
    i64 => "i64" as Int,
    u8 => "u8" as Uint,
    u16 => "u16" as Uint,
    u32 => "u32" as Uint,
    u64 => "u64" as Uint,
    f32 => "f32" as Float,
    f64 => "f64" as Float,
);

impl FieldValue for String {
    fn type_name() -> String {
        "String".to_string()
    }

    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }

    fn apply_case(&mut self, constraints: &Constraints) {
        if constraints.upper {
            *self = self.to_uppercase();
        }
        if constraints.lower {
            *self = self.to_lowercase();
        }
    }
}

impl FieldValue for DateTime<Utc> {
    fn type_name() -> String {
        "DateTime".to_string()
    }

    fn to_value(&self) -> Value {
        Value::Int(self.timestamp_nanos_opt().unwrap_or_default())
    }
}

impl<T: FieldValue + Default> FieldValue for Option<T> {
    fn type_name() -> String {
        format!("*{}", T::type_name())
    }

    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => T::default().to_value(),
        }
    }

    fn apply_case(&mut self, constraints: &Constraints) {
        if let Some(inner) = self {
            inner.apply_case(constraints);
        }
    }
}

/// Declares a storable record type.
///
/// Generates the struct (with an embedded, non-serialized [`Item`]
/// holding the UUID) plus its [`ObjectCore`] and [`Fields`] impls.
/// Constraint tags follow each field in brackets:
///
/// ```ignore
/// shelfdb::object! {
///     #[derive(Debug)]
///     pub struct Person {
///         pub first_name: String,
///         pub last_name: String [index],
///         pub email: String [unique, lower],
///         pub address: Address [nested],
///         pub notes: String [skip],
///     }
/// }
/// impl shelfdb::Object for Person {}
/// ```
///
/// Tag vocabulary: `index`, `unique` (implies `index`), `upper`,
/// `lower`, plus the structural markers `nested` (recurse into a
/// [`fields!`]-declared sub-struct with a dotted path prefix) and
/// `skip` (leave the field out of the walk).
#[macro_export]
macro_rules! object {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $fvis:vis $fname:ident : $fty:ty $([ $($tag:ident),+ $(,)? ])?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Default, ::serde::Serialize, ::serde::Deserialize)]
        $vis struct $name {
            #[serde(skip)]
            $vis item: $crate::Item,
            $( $fvis $fname : $fty, )*
        }

        impl $crate::ObjectCore for $name {
            const TYPE_NAME: &'static str = stringify!($name);

            fn uuid(&self) -> &str {
                self.item.uuid()
            }

            fn initialize(&mut self, uuid: &str) {
                self.item.initialize(uuid);
            }
        }

        $crate::__shelf_fields_impl! {
            $name { $( $fname : $fty $([ $($tag),+ ])? ),* }
        }
    };
}

/// Declares a sub-structure embeddable in an [`object!`](crate::object!)
/// record through the `nested` tag. Generates the struct and its
/// [`Fields`] impl only.
#[macro_export]
macro_rules! fields {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $fvis:vis $fname:ident : $fty:ty $([ $($tag:ident),+ $(,)? ])?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Default, ::serde::Serialize, ::serde::Deserialize)]
        $vis struct $name {
            $( $fvis $fname : $fty, )*
        }

        $crate::__shelf_fields_impl! {
            $name { $( $fname : $fty $([ $($tag),+ ])? ),* }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __shelf_fields_impl {
    ($name:ident { $( $fname:ident : $fty:ty $([ $($tag:ident),+ ])? ),* }) => {
        impl $crate::Fields for $name {
            fn describe(prefix: &str, out: &mut ::std::vec::Vec<$crate::FieldDescriptor>) {
                let _ = (&prefix, &out);
                $( $crate::__shelf_field!(@describe prefix, out, $fname : $fty $([ $($tag),+ ])?); )*
            }

            fn value_at(&self, path: &[&str]) -> ::std::option::Option<$crate::Value> {
                let head = *path.first()?;
                $( if head == stringify!($fname) {
                    return $crate::__shelf_field!(@value self, path, $fname : $fty $([ $($tag),+ ])?);
                } )*
                let _ = head;
                ::std::option::Option::None
            }

            fn apply_at(&mut self, path: &[&str], constraints: &$crate::Constraints) {
                let head = match path.first() {
                    ::std::option::Option::Some(head) => *head,
                    ::std::option::Option::None => return,
                };
                $( if head == stringify!($fname) {
                    $crate::__shelf_field!(@apply self, path, constraints, $fname : $fty $([ $($tag),+ ])?);
                    return;
                } )*
                let _ = (head, constraints);
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __shelf_field {
    (@describe $prefix:ident, $out:ident, $fname:ident : $fty:ty [skip]) => {};
    (@describe $prefix:ident, $out:ident, $fname:ident : $fty:ty [nested]) => {
        <$fty as $crate::Fields>::describe(
            &$crate::object::join_path($prefix, stringify!($fname)),
            $out,
        );
    };
    (@describe $prefix:ident, $out:ident, $fname:ident : $fty:ty $([ $($tag:ident),+ ])?) => {
        $out.push($crate::FieldDescriptor::new(
            $crate::object::join_path($prefix, stringify!($fname)),
            <$fty as $crate::object::FieldValue>::type_name(),
            $crate::__shelf_constraints!($($($tag),+)?),
        ));
    };

    (@value $self:ident, $path:ident, $fname:ident : $fty:ty [skip]) => {
        ::std::option::Option::None
    };
    (@value $self:ident, $path:ident, $fname:ident : $fty:ty [nested]) => {
        $crate::Fields::value_at(&$self.$fname, &$path[1..])
    };
    (@value $self:ident, $path:ident, $fname:ident : $fty:ty $([ $($tag:ident),+ ])?) => {
        if $path.len() == 1 {
            ::std::option::Option::Some($crate::object::FieldValue::to_value(&$self.$fname))
        } else {
            ::std::option::Option::None
        }
    };

    (@apply $self:ident, $path:ident, $c:ident, $fname:ident : $fty:ty [skip]) => {};
    (@apply $self:ident, $path:ident, $c:ident, $fname:ident : $fty:ty [nested]) => {
        $crate::Fields::apply_at(&mut $self.$fname, &$path[1..], $c);
    };
    (@apply $self:ident, $path:ident, $c:ident, $fname:ident : $fty:ty $([ $($tag:ident),+ ])?) => {
        if $path.len() == 1 {
            $crate::object::FieldValue::apply_case(&mut $self.$fname, $c);
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __shelf_constraints {
    () => {
        $crate::Constraints::default()
    };
    ($($tag:ident),+) => {
        $crate::Constraints::default()$(.$tag())+
    };
}
