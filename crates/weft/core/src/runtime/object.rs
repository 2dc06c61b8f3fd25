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

use crate::errors::RuntimeError;
use crate::runtime::registry::RuntimeType;
use crate::runtime::value::Value;
use crate::types::TypeId;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared handle to a live instance of a baked type.
pub type ObjectRef = Arc<RwLock<ObjectData>>;

/// Instance state: the dynamic type plus a flat field slot vector laid out
/// base-first.
#[derive(Debug)]
pub struct ObjectData {
    pub type_id: TypeId,
    pub fields: Vec<Value>,
}

impl ObjectData {
    pub fn get_field(&self, slot: u16) -> Result<Value, RuntimeError> {
        self.fields
            .get(slot as usize)
            .cloned()
            .ok_or(RuntimeError::FieldOutOfRange(slot))
    }

    pub fn set_field(&mut self, slot: u16, value: Value) -> Result<(), RuntimeError> {
        match self.fields.get_mut(slot as usize) {
            Some(f) => {
                *f = value;
                Ok(())
            }
            None => Err(RuntimeError::FieldOutOfRange(slot)),
        }
    }
}

/// Allocate an instance with every field at its default value.
pub fn new_object(ty: &RuntimeType) -> ObjectRef {
    let fields = ty.fields.iter().map(|f| Value::default_for(&f.ty)).collect();
    Arc::new(RwLock::new(ObjectData {
        type_id: ty.id,
        fields,
    }))
}
