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

use crate::runtime::object::ObjectRef;
use crate::types::TypeDesc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Literal value embedded in an instruction stream.
///
/// Constants are the serializable subset of [`Value`]; anything that only
/// exists at run time (objects, lists, boxed values) cannot appear in a
/// baked stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Constant {
    /// Static type of the constant as seen by the IR.
    pub fn data_type(&self) -> TypeDesc {
        match self {
            Constant::Null => TypeDesc::Boxed,
            Constant::Int(_) => TypeDesc::Int,
            Constant::Float(_) => TypeDesc::Float,
            Constant::Bool(_) => TypeDesc::Bool,
            Constant::Str(_) => TypeDesc::Str,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Constant::Null => Value::Null,
            Constant::Int(v) => Value::Int(*v),
            Constant::Float(v) => Value::Float(*v),
            Constant::Bool(v) => Value::Bool(*v),
            Constant::Str(v) => Value::Str(v.clone()),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Int(v) => write!(f, "{v}"),
            Constant::Float(v) => write!(f, "{v}"),
            Constant::Bool(v) => write!(f, "{v}"),
            Constant::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// Runtime operand held on the stack, in locals and in object fields.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
    /// Widened value-type operand.
    Boxed(Box<Value>),
    Object(ObjectRef),
}

impl Value {
    /// Initial value for a freshly allocated slot of the given type.
    pub fn default_for(ty: &TypeDesc) -> Value {
        match ty {
            TypeDesc::Int => Value::Int(0),
            TypeDesc::Float => Value::Float(0.0),
            TypeDesc::Bool => Value::Bool(false),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short operand-kind name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Boxed(_) => "boxed",
            Value::Object(_) => "object",
        }
    }

    /// Wrap a value-kind operand; reference kinds pass through unchanged.
    pub fn widened(self) -> Value {
        match self {
            v @ (Value::Int(_) | Value::Float(_) | Value::Bool(_)) => Value::Boxed(Box::new(v)),
            other => other,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Boxed(a), Value::Boxed(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Boxed(inner) => write!(f, "boxed({inner})"),
            Value::Object(obj) => write!(f, "<object {}>", obj.read().type_id),
        }
    }
}
