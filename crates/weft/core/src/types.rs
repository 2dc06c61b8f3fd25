// Weft
// Copyright (C) 2025 Weft contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a baked type inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Semantic type descriptor attached to every location and declared member.
///
/// Registered types are referenced by their unique registry name so that
/// descriptors stay stable across image save/reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeDesc {
    /// No value; only meaningful as a return type.
    Unit,
    Int,
    Float,
    Bool,
    /// UTF-8 string reference.
    Str,
    /// Reference to a registered type, by unique name.
    Object(String),
    /// Homogeneous list reference.
    List(Box<TypeDesc>),
    /// Widened ("boxed") value of unknown static type.
    Boxed,
}

impl TypeDesc {
    pub fn is_value_type(&self) -> bool {
        matches!(self, TypeDesc::Int | TypeDesc::Float | TypeDesc::Bool)
    }

    pub fn is_reference_type(&self) -> bool {
        matches!(
            self,
            TypeDesc::Str | TypeDesc::Object(_) | TypeDesc::List(_) | TypeDesc::Boxed
        )
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Unit => write!(f, "unit"),
            TypeDesc::Int => write!(f, "int"),
            TypeDesc::Float => write!(f, "float"),
            TypeDesc::Bool => write!(f, "bool"),
            TypeDesc::Str => write!(f, "str"),
            TypeDesc::Object(name) => write!(f, "{}", name),
            TypeDesc::List(inner) => write!(f, "list<{}>", inner),
            TypeDesc::Boxed => write!(f, "boxed"),
        }
    }
}

/// Structured member tag, decided once at declaration time.
///
/// Consumers select members by this tag instead of re-deriving the member's
/// role from naming conventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberKind {
    Method,
    /// Getter of the named property.
    Getter(String),
    /// Setter of the named property.
    Setter(String),
    Constructor,
}

impl MemberKind {
    pub fn label(&self) -> &'static str {
        match self {
            MemberKind::Method => "method",
            MemberKind::Getter(_) => "getter",
            MemberKind::Setter(_) => "setter",
            MemberKind::Constructor => "constructor",
        }
    }
}

/// Resolved reference to a field slot in an object layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// Name of the type that declares the field.
    pub owner: String,
    pub name: String,
    /// Absolute slot in the flattened layout (base fields first).
    pub slot: u16,
    pub ty: TypeDesc,
}

/// Reference to a callable used by invoke operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    /// Direct, non-virtual call to the method at `index` on `owner`.
    Direct {
        owner: String,
        index: u16,
        name: String,
        params: Vec<TypeDesc>,
        return_type: TypeDesc,
    },
    /// Virtual dispatch on the receiver's dynamic type.
    Virtual {
        name: String,
        params: Vec<TypeDesc>,
        return_type: TypeDesc,
    },
}

impl Callee {
    pub fn name(&self) -> &str {
        match self {
            Callee::Direct { name, .. } | Callee::Virtual { name, .. } => name,
        }
    }

    pub fn params(&self) -> &[TypeDesc] {
        match self {
            Callee::Direct { params, .. } | Callee::Virtual { params, .. } => params,
        }
    }

    pub fn return_type(&self) -> &TypeDesc {
        match self {
            Callee::Direct { return_type, .. } | Callee::Virtual { return_type, .. } => return_type,
        }
    }
}

/// Resolved reference to a declared property and its accessors.
///
/// A missing accessor makes the property write-only or read-only; using the
/// missing direction is a construction-time usage error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRef {
    pub owner: String,
    pub name: String,
    pub ty: TypeDesc,
    pub getter: Option<Callee>,
    pub setter: Option<Callee>,
}

/// Declaration-time attributes of a synthesized type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeAttributes {
    /// Sealed types cannot be used as a weaving base.
    pub sealed: bool,
}
