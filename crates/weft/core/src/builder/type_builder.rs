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

use crate::builder::method::MethodBuilder;
use crate::errors::SynthesisError;
use crate::runtime::registry::{FieldDef, MethodBody, MethodDef, RuntimeType, TypeRegistry};
use crate::types::{Callee, FieldRef, MemberKind, PropertyRef, TypeAttributes, TypeDesc, TypeId};
use std::sync::Arc;

/// Getter method name for property `p`.
pub fn getter_name(property: &str) -> String {
    format!("get__{property}")
}

/// Setter method name for property `p`.
pub fn setter_name(property: &str) -> String {
    format!("set__{property}")
}

enum Pending {
    /// Recorded body awaiting lowering at bake time.
    Recorded(MethodBuilder),
    /// Already-complete definition (natives and hook slots).
    Ready(MethodDef),
}

impl Pending {
    fn name(&self) -> &str {
        match self {
            Pending::Recorded(m) => m.name(),
            Pending::Ready(d) => &d.name,
        }
    }

    fn kind(&self) -> &MemberKind {
        match self {
            Pending::Recorded(m) => m.kind(),
            Pending::Ready(d) => &d.kind,
        }
    }

    fn params(&self) -> &[TypeDesc] {
        match self {
            Pending::Recorded(m) => m.params(),
            Pending::Ready(d) => &d.params,
        }
    }

    fn return_type(&self) -> &TypeDesc {
        match self {
            Pending::Recorded(m) => m.return_type(),
            Pending::Ready(d) => &d.return_type,
        }
    }
}

/// Accumulates the definition of one synthesized type.
///
/// A type builder owns the fields and pending methods; the method bodies
/// themselves are recorded through [`MethodBuilder`]s handed out by the
/// `create_*` methods and handed back through [`TypeBuilder::finish_method`].
/// The base type (when any) must already be installed in the registry.
pub struct TypeBuilder {
    name: String,
    id: TypeId,
    base: Option<Arc<RuntimeType>>,
    attributes: TypeAttributes,
    interfaces: Vec<String>,
    fields: Vec<FieldDef>,
    methods: Vec<Pending>,
    registry: Arc<TypeRegistry>,
}

impl TypeBuilder {
    pub(crate) fn new(
        name: String,
        id: TypeId,
        base: Option<Arc<RuntimeType>>,
        attributes: TypeAttributes,
        registry: Arc<TypeRegistry>,
    ) -> Self {
        TypeBuilder {
            name,
            id,
            base,
            attributes,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn base(&self) -> Option<&Arc<RuntimeType>> {
        self.base.as_ref()
    }

    pub fn add_interface(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.interfaces.iter().any(|i| *i == name) {
            self.interfaces.push(name);
        }
    }

    // --- fields and properties --------------------------------------------

    /// Declare a new instance field, returning its resolved reference.
    pub fn create_field(
        &mut self,
        name: impl Into<String>,
        ty: TypeDesc,
    ) -> Result<FieldRef, SynthesisError> {
        let name = name.into();
        if self.field(&name).is_some() {
            return Err(SynthesisError::DuplicateMember {
                ty: self.name.clone(),
                kind: "field",
                name,
            });
        }
        let base_len = self.base.as_ref().map(|b| b.fields.len()).unwrap_or(0);
        let slot = (base_len + self.fields.len()) as u16;
        self.fields.push(FieldDef {
            name: name.clone(),
            ty: ty.clone(),
        });
        Ok(FieldRef {
            owner: self.name.clone(),
            name,
            slot,
            ty,
        })
    }

    /// Resolve a field by name, searching own declarations and then the
    /// inherited layout.
    pub fn field(&self, name: &str) -> Option<FieldRef> {
        let base_len = self.base.as_ref().map(|b| b.fields.len()).unwrap_or(0);
        if let Some(i) = self.fields.iter().position(|f| f.name == name) {
            let f = &self.fields[i];
            return Some(FieldRef {
                owner: self.name.clone(),
                name: f.name.clone(),
                slot: (base_len + i) as u16,
                ty: f.ty.clone(),
            });
        }
        let base = self.base.as_ref()?;
        let slot = base.field_slot(name)?;
        let f = &base.fields[slot as usize];
        Some(FieldRef {
            owner: base.name.clone(),
            name: f.name.clone(),
            slot,
            ty: f.ty.clone(),
        })
    }

    /// Resolve a property's accessors, searching own pending methods first
    /// and falling back to the base chain.
    pub fn property(&self, name: &str) -> Option<PropertyRef> {
        let mut getter = None;
        let mut setter = None;
        let mut prop_ty = None;
        for m in &self.methods {
            match m.kind() {
                MemberKind::Getter(p) if p == name => {
                    prop_ty = Some(m.return_type().clone());
                    getter = Some(Callee::Virtual {
                        name: m.name().to_string(),
                        params: m.params().to_vec(),
                        return_type: m.return_type().clone(),
                    });
                }
                MemberKind::Setter(p) if p == name => {
                    setter = Some(Callee::Virtual {
                        name: m.name().to_string(),
                        params: m.params().to_vec(),
                        return_type: m.return_type().clone(),
                    });
                }
                _ => {}
            }
        }
        match prop_ty {
            Some(ty) => Some(PropertyRef {
                owner: self.name.clone(),
                name: name.to_string(),
                ty,
                getter,
                setter,
            }),
            None => {
                let base = self.base.as_ref()?;
                self.registry.property_of(&base.name, name)
            }
        }
    }

    /// Declare a property backed by a fresh private field with trivial
    /// accessors.
    pub fn create_default_property(
        &mut self,
        name: impl Into<String>,
        ty: TypeDesc,
    ) -> Result<PropertyRef, SynthesisError> {
        let name = name.into();
        let backing = self.create_field(format!("_{name}"), ty.clone())?;

        let mut getter = self.create_getter(&name, ty.clone());
        let value = getter.field(getter.receiver(), backing.clone());
        getter.return_(Some(value))?;
        self.finish_method(getter)?;

        let mut setter = self.create_setter(&name, ty.clone());
        let target = setter.field(setter.receiver(), backing);
        let incoming = setter.param(0)?;
        setter.assign(target, incoming)?;
        self.finish_method(setter)?;

        self.property(&name)
            .ok_or_else(|| SynthesisError::UnknownMember {
                ty: self.name.clone(),
                member: name,
            })
    }

    // --- methods ----------------------------------------------------------

    /// Begin recording an ordinary virtual method.
    pub fn create_method(
        &self,
        name: impl Into<String>,
        params: Vec<TypeDesc>,
        return_type: TypeDesc,
    ) -> MethodBuilder {
        MethodBuilder::new(
            self.name.clone(),
            name.into(),
            MemberKind::Method,
            params,
            return_type,
            true,
        )
    }

    /// Begin recording the getter of `property`.
    pub fn create_getter(&self, property: &str, ty: TypeDesc) -> MethodBuilder {
        MethodBuilder::new(
            self.name.clone(),
            getter_name(property),
            MemberKind::Getter(property.to_string()),
            vec![],
            ty,
            true,
        )
    }

    /// Begin recording the setter of `property`.
    pub fn create_setter(&self, property: &str, ty: TypeDesc) -> MethodBuilder {
        MethodBuilder::new(
            self.name.clone(),
            setter_name(property),
            MemberKind::Setter(property.to_string()),
            vec![ty],
            TypeDesc::Unit,
            true,
        )
    }

    /// Begin recording a constructor taking `params`.
    pub fn create_constructor(&self, params: Vec<TypeDesc>) -> MethodBuilder {
        MethodBuilder::new(
            self.name.clone(),
            "new".into(),
            MemberKind::Constructor,
            params,
            TypeDesc::Unit,
            false,
        )
    }

    /// Declare a zero-argument constructor that chains the base
    /// zero-argument constructor when one exists. Returns its declaration
    /// index.
    pub fn create_default_constructor(&mut self) -> Result<u16, SynthesisError> {
        let mut ctor = self.create_constructor(vec![]);
        if let Some(base) = &self.base {
            if let Some(index) = base.constructor(0) {
                let callee = Callee::Direct {
                    owner: base.name.clone(),
                    index,
                    name: "new".into(),
                    params: vec![],
                    return_type: TypeDesc::Unit,
                };
                let receiver = ctor.receiver();
                ctor.invoke(Some(receiver), callee, vec![])?;
            }
        }
        ctor.return_(None)?;
        let callee = self.finish_method(ctor)?;
        match callee {
            Callee::Direct { index, .. } => Ok(index),
            Callee::Virtual { .. } => unreachable!("constructors are direct"),
        }
    }

    /// Begin recording an override of an inherited virtual member.
    pub fn create_override(&self, inherited: &MethodDef) -> Result<MethodBuilder, SynthesisError> {
        if inherited.is_final {
            return Err(SynthesisError::OverrideFinal(inherited.name.clone()));
        }
        Ok(MethodBuilder::new(
            self.name.clone(),
            inherited.name.clone(),
            inherited.kind.clone(),
            inherited.params.clone(),
            inherited.return_type.clone(),
            true,
        ))
    }

    /// Declare a named native slot bound at install time.
    pub fn create_hook_slot(
        &mut self,
        name: impl Into<String>,
        params: Vec<TypeDesc>,
        return_type: TypeDesc,
    ) -> Result<Callee, SynthesisError> {
        let name = name.into();
        let def = MethodDef {
            name: name.clone(),
            kind: MemberKind::Method,
            params,
            return_type,
            is_virtual: false,
            is_final: false,
            body: MethodBody::HookSlot(name),
        };
        self.finish_ready(def)
    }

    /// Resolve a callable member by name: own pending methods first, then
    /// the base dispatch table.
    pub fn find_method(&self, name: &str) -> Option<Callee> {
        for (index, m) in self.methods.iter().enumerate() {
            if m.name() == name {
                return Some(Callee::Direct {
                    owner: self.name.clone(),
                    index: index as u16,
                    name: m.name().to_string(),
                    params: m.params().to_vec(),
                    return_type: m.return_type().clone(),
                });
            }
        }
        let base = self.base.as_ref()?;
        let slot = base.dispatch.get(name)?;
        let owner = self.registry.get(slot.owner)?;
        let def = owner.method(slot.index)?;
        Some(Callee::Direct {
            owner: owner.name.clone(),
            index: slot.index,
            name: def.name.clone(),
            params: def.params.clone(),
            return_type: def.return_type.clone(),
        })
    }

    /// Accept a fully-recorded method body into the type.
    pub fn finish_method(&mut self, method: MethodBuilder) -> Result<Callee, SynthesisError> {
        self.check_duplicate(
            method.name(),
            method.kind(),
            method.params().len(),
        )?;
        let callee = Callee::Direct {
            owner: self.name.clone(),
            index: self.methods.len() as u16,
            name: method.name().to_string(),
            params: method.params().to_vec(),
            return_type: method.return_type().clone(),
        };
        self.methods.push(Pending::Recorded(method));
        Ok(callee)
    }

    /// Accept an already-complete definition (native body or hook slot).
    pub fn finish_ready(&mut self, def: MethodDef) -> Result<Callee, SynthesisError> {
        self.check_duplicate(&def.name, &def.kind, def.params.len())?;
        let callee = Callee::Direct {
            owner: self.name.clone(),
            index: self.methods.len() as u16,
            name: def.name.clone(),
            params: def.params.clone(),
            return_type: def.return_type.clone(),
        };
        self.methods.push(Pending::Ready(def));
        Ok(callee)
    }

    fn check_duplicate(
        &self,
        name: &str,
        kind: &MemberKind,
        argc: usize,
    ) -> Result<(), SynthesisError> {
        let clash = self.methods.iter().any(|m| {
            if m.name() != name {
                return false;
            }
            // Constructors may overload by arity; everything else may not.
            *kind != MemberKind::Constructor || m.params().len() == argc
        });
        if clash {
            return Err(SynthesisError::DuplicateMember {
                ty: self.name.clone(),
                kind: kind.label(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Lower every pending body and hand the parts to the registry install
    /// step.
    pub(crate) fn bake(
        self,
    ) -> Result<BakedTypeParts, SynthesisError> {
        let mut methods = Vec::with_capacity(self.methods.len());
        for m in self.methods {
            match m {
                Pending::Recorded(builder) => methods.push(builder.into_def()?),
                Pending::Ready(def) => methods.push(def),
            }
        }
        Ok(BakedTypeParts {
            id: self.id,
            name: self.name,
            sealed: self.attributes.sealed,
            base: self.base.map(|b| b.id),
            interfaces: self.interfaces,
            fields: self.fields,
            methods,
        })
    }
}

/// Lowered output of a type builder, ready for registry installation.
pub(crate) struct BakedTypeParts {
    pub id: TypeId,
    pub name: String,
    pub sealed: bool,
    pub base: Option<TypeId>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(name: &str) -> TypeBuilder {
        let registry = Arc::new(TypeRegistry::new());
        let id = registry.reserve(name).unwrap();
        TypeBuilder::new(
            name.to_string(),
            id,
            None,
            TypeAttributes::default(),
            registry,
        )
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let mut tb = fresh("Point");
        tb.create_field("x", TypeDesc::Int).unwrap();
        let err = tb.create_field("x", TypeDesc::Int).unwrap_err();
        assert!(matches!(err, SynthesisError::DuplicateMember { kind: "field", .. }));
    }

    #[test]
    fn default_property_declares_accessors() {
        let mut tb = fresh("Person");
        let prop = tb.create_default_property("Name", TypeDesc::Str).unwrap();
        assert!(prop.getter.is_some());
        assert!(prop.setter.is_some());
        assert_eq!(prop.ty, TypeDesc::Str);
        assert!(tb.field("_Name").is_some());
    }

    #[test]
    fn duplicate_method_name_is_rejected() {
        let mut tb = fresh("Svc");
        let m = tb.create_method("run", vec![], TypeDesc::Unit);
        tb.finish_method(m).unwrap();
        let m2 = tb.create_method("run", vec![TypeDesc::Int], TypeDesc::Unit);
        let err = tb.finish_method(m2).unwrap_err();
        assert!(matches!(err, SynthesisError::DuplicateMember { kind: "method", .. }));
    }

    #[test]
    fn constructors_overload_by_arity() {
        let mut tb = fresh("Pair");
        let c0 = tb.create_constructor(vec![]);
        tb.finish_method(c0).unwrap();
        let c2 = tb.create_constructor(vec![TypeDesc::Int, TypeDesc::Int]);
        tb.finish_method(c2).unwrap();
        let c0_again = tb.create_constructor(vec![]);
        assert!(tb.finish_method(c0_again).is_err());
    }

    #[test]
    fn hook_slot_is_direct_and_not_virtual() {
        let mut tb = fresh("Hooked");
        let callee = tb
            .create_hook_slot("__slot", vec![TypeDesc::Boxed], TypeDesc::Boxed)
            .unwrap();
        assert!(matches!(callee, Callee::Direct { index: 0, .. }));
        let parts = tb.bake().unwrap();
        assert!(!parts.methods[0].is_virtual);
        assert!(matches!(parts.methods[0].body, MethodBody::HookSlot(_)));
    }
}
