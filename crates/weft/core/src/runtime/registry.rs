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

use crate::errors::{RuntimeError, SynthesisError};
use crate::runtime::instruction::BakedBody;
use crate::runtime::object::ObjectRef;
use crate::runtime::value::Value;
use crate::types::{Callee, MemberKind, PropertyRef, TypeDesc, TypeId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Host-provided method implementation: receives the receiver and the
/// declared arguments, returns the method's value.
pub type NativeFn =
    Arc<dyn Fn(Value, Vec<Value>) -> Result<Value, RuntimeError> + Send + Sync + 'static>;

/// Executable payload of a declared method.
#[derive(Clone)]
pub enum MethodBody {
    Bytecode(BakedBody),
    Native(NativeFn),
    /// Named native slot, bound at install time; invoking an unbound slot is
    /// a runtime error.
    HookSlot(String),
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Bytecode(b) => write!(f, "Bytecode({} instrs)", b.instructions.len()),
            MethodBody::Native(_) => write!(f, "Native(..)"),
            MethodBody::HookSlot(name) => write!(f, "HookSlot({name:?})"),
        }
    }
}

/// Declared method of a baked type.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    pub kind: MemberKind,
    /// Declared parameter types, excluding the receiver slot.
    pub params: Vec<TypeDesc>,
    pub return_type: TypeDesc,
    pub is_virtual: bool,
    pub is_final: bool,
    pub body: MethodBody,
}

/// Declared field of a baked type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeDesc,
}

/// Resolved position of a method: declaring type plus declaration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSlot {
    pub owner: TypeId,
    pub index: u16,
}

/// Immutable, loadable representation of a baked type.
#[derive(Debug)]
pub struct RuntimeType {
    pub id: TypeId,
    pub name: String,
    pub base: Option<TypeId>,
    pub sealed: bool,
    pub interfaces: Vec<String>,
    /// Full field layout including inherited slots (base fields first).
    pub fields: Vec<FieldDef>,
    /// Methods declared on this type only.
    pub methods: Vec<MethodDef>,
    /// Precomputed dispatch table: member name to its most-derived
    /// declaration. Built once at install time; constructors are excluded.
    pub dispatch: HashMap<String, MethodSlot>,
}

impl RuntimeType {
    pub fn field_slot(&self, name: &str) -> Option<u16> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as u16)
    }

    pub fn method(&self, index: u16) -> Option<&MethodDef> {
        self.methods.get(index as usize)
    }

    /// First constructor taking exactly `argc` declared arguments.
    pub fn constructor(&self, argc: usize) -> Option<u16> {
        self.methods
            .iter()
            .position(|m| m.kind == MemberKind::Constructor && m.params.len() == argc)
            .map(|i| i as u16)
    }
}

#[derive(Default)]
struct RegistryInner {
    types: Vec<Option<Arc<RuntimeType>>>,
    by_name: HashMap<String, TypeId>,
}

/// Append-only store of baked types.
///
/// Installed types are immutable; the lock only guards the append path so
/// concurrent readers can resolve types while another build is installing.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a type id for `name` before its definition is installed.
    pub fn reserve(&self, name: &str) -> Result<TypeId, SynthesisError> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) {
            return Err(SynthesisError::DuplicateType(name.to_string()));
        }
        let id = TypeId(inner.types.len() as u32);
        inner.types.push(None);
        inner.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Install a definition under a previously reserved id, computing the
    /// flattened field layout and the dispatch table.
    pub fn install(
        &self,
        id: TypeId,
        name: String,
        sealed: bool,
        base: Option<TypeId>,
        interfaces: Vec<String>,
        own_fields: Vec<FieldDef>,
        methods: Vec<MethodDef>,
    ) -> Result<Arc<RuntimeType>, SynthesisError> {
        let mut inner = self.inner.write();
        let base_ty = match base {
            Some(b) => Some(
                inner
                    .types
                    .get(b.0 as usize)
                    .and_then(|t| t.clone())
                    .ok_or_else(|| SynthesisError::UnknownType(format!("{b}")))?,
            ),
            None => None,
        };

        let mut fields = base_ty.as_ref().map(|b| b.fields.clone()).unwrap_or_default();
        for f in &own_fields {
            if fields.iter().any(|existing| existing.name == f.name) {
                return Err(SynthesisError::DuplicateMember {
                    ty: name.clone(),
                    kind: "field",
                    name: f.name.clone(),
                });
            }
        }
        fields.extend(own_fields);

        let mut dispatch = base_ty
            .as_ref()
            .map(|b| b.dispatch.clone())
            .unwrap_or_default();
        for (index, m) in methods.iter().enumerate() {
            if !m.is_virtual || m.kind == MemberKind::Constructor {
                continue;
            }
            if let Some(existing) = dispatch.get(&m.name) {
                let overridden = inner
                    .types
                    .get(existing.owner.0 as usize)
                    .and_then(|t| t.clone())
                    .and_then(|t| t.method(existing.index).cloned());
                if let Some(overridden) = overridden {
                    if overridden.is_final {
                        return Err(SynthesisError::OverrideFinal(m.name.clone()));
                    }
                }
            }
            dispatch.insert(
                m.name.clone(),
                MethodSlot {
                    owner: id,
                    index: index as u16,
                },
            );
        }

        let ty = Arc::new(RuntimeType {
            id,
            name,
            base,
            sealed,
            interfaces,
            fields,
            methods,
            dispatch,
        });
        inner.types[id.0 as usize] = Some(ty.clone());
        Ok(ty)
    }

    pub fn get(&self, id: TypeId) -> Option<Arc<RuntimeType>> {
        self.inner.read().types.get(id.0 as usize).and_then(|t| t.clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<RuntimeType>> {
        let inner = self.inner.read();
        let id = inner.by_name.get(name)?;
        inner.types.get(id.0 as usize).and_then(|t| t.clone())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<RuntimeType>, RuntimeError> {
        self.get_by_name(name)
            .ok_or_else(|| RuntimeError::UnknownType(name.to_string()))
    }

    /// Resolve a dispatch slot into its method definition.
    pub fn method_def(&self, slot: MethodSlot) -> Option<MethodDef> {
        self.get(slot.owner)
            .and_then(|t| t.method(slot.index).cloned())
    }

    /// Whether `ty` can be treated as `target` (base-chain walk plus declared
    /// interfaces).
    pub fn is_assignable(&self, ty: TypeId, target: &str) -> bool {
        let mut cursor = self.get(ty);
        while let Some(t) = cursor {
            if t.name == target || t.interfaces.iter().any(|i| i == target) {
                return true;
            }
            cursor = t.base.and_then(|b| self.get(b));
        }
        false
    }

    /// Register a host-backed type whose method bodies are Rust closures.
    pub fn register_native_type(&self, spec: NativeTypeSpec) -> Result<TypeId, SynthesisError> {
        let base = match &spec.base {
            Some(name) => Some(
                self.get_by_name(name)
                    .ok_or_else(|| SynthesisError::UnknownType(name.clone()))?
                    .id,
            ),
            None => None,
        };
        let id = self.reserve(&spec.name)?;
        self.install(
            id,
            spec.name,
            spec.sealed,
            base,
            spec.interfaces,
            spec.fields,
            spec.methods,
        )?;
        Ok(id)
    }

    /// Read a field of a live instance by name, resolving the slot through
    /// the instance's dynamic type.
    pub fn get_field(&self, obj: &ObjectRef, field: &str) -> Result<Value, RuntimeError> {
        let ty = self.type_of(obj)?;
        let slot = ty.field_slot(field).ok_or_else(|| RuntimeError::UnknownField {
            ty: ty.name.clone(),
            field: field.to_string(),
        })?;
        obj.read().get_field(slot)
    }

    /// Write a field of a live instance by name.
    pub fn set_field(&self, obj: &ObjectRef, field: &str, value: Value) -> Result<(), RuntimeError> {
        let ty = self.type_of(obj)?;
        let slot = ty.field_slot(field).ok_or_else(|| RuntimeError::UnknownField {
            ty: ty.name.clone(),
            field: field.to_string(),
        })?;
        obj.write().set_field(slot, value)
    }

    /// Dynamic type of a live instance.
    pub fn type_of(&self, obj: &ObjectRef) -> Result<Arc<RuntimeType>, RuntimeError> {
        let id = obj.read().type_id;
        self.get(id)
            .ok_or_else(|| RuntimeError::UnknownType(format!("{id}")))
    }

    /// Resolve the accessors of a declared property into a property
    /// reference usable from the IR. Accessors are located through their
    /// structured member tags.
    pub fn property_of(&self, type_name: &str, property: &str) -> Option<PropertyRef> {
        let ty = self.get_by_name(type_name)?;
        let mut getter = None;
        let mut setter = None;
        let mut prop_ty = None;
        for slot in ty.dispatch.values() {
            let Some(def) = self.method_def(*slot) else {
                continue;
            };
            match &def.kind {
                MemberKind::Getter(p) if p == property => {
                    prop_ty = Some(def.return_type.clone());
                    getter = Some(Callee::Virtual {
                        name: def.name.clone(),
                        params: def.params.clone(),
                        return_type: def.return_type.clone(),
                    });
                }
                MemberKind::Setter(p) if p == property => {
                    setter = Some(Callee::Virtual {
                        name: def.name.clone(),
                        params: def.params.clone(),
                        return_type: def.return_type.clone(),
                    });
                }
                _ => {}
            }
        }
        Some(PropertyRef {
            owner: type_name.to_string(),
            name: property.to_string(),
            ty: prop_ty?,
            getter,
            setter,
        })
    }
}

/// Specification of a host-backed type.
pub struct NativeTypeSpec {
    pub name: String,
    pub base: Option<String>,
    pub sealed: bool,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}
