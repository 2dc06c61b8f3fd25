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

//! Lazy-loading aspect: mapped properties of a woven entity are fetched
//! from a session on first read and cached in holder fields.

use crate::aspect::{Aspect, MemberContext};
use crate::errors::WeaveError;
use std::sync::Arc;
use tracing::debug;
use weft_core::runtime::instruction::CmpOp;
use weft_core::{
    Callee, Constant, Location, MemberKind, MethodBuilder, NativeFn, ObjectRef, RuntimeError,
    TypeBuilder, TypeDesc, TypeRegistry, Value,
};

/// Marker field set on instances that carry a live session.
pub const SESSION_FIELD: &str = "__weft_session";

/// How many values a mapped property holds. Decided once at mapping time;
/// the weaver never re-derives it from the property type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    Single,
    Enumerable,
    List,
}

impl Multiplicity {
    pub fn is_collection(&self) -> bool {
        matches!(self, Multiplicity::Enumerable | Multiplicity::List)
    }
}

/// One lazily-loaded property of a mapped entity.
#[derive(Debug, Clone)]
pub struct PropertyMapping {
    /// Property name as declared on the base type.
    pub name: String,
    /// Declared property type; list-typed for collection multiplicities.
    pub ty: TypeDesc,
    /// Field on the woven type caching the loaded value.
    pub holder_field: String,
    pub multiplicity: Multiplicity,
}

/// Mapping of a base entity type onto session loads.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    /// Base type name this mapping applies to.
    pub entity: String,
    /// Property whose value keys every load.
    pub id_property: String,
    pub properties: Vec<PropertyMapping>,
}

impl EntityMapping {
    fn property(&self, name: &str) -> Option<&PropertyMapping> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Source of lazily-loaded property values.
pub trait Session: Send + Sync {
    fn load_property(
        &self,
        entity: &str,
        property: &str,
        key: &Value,
    ) -> Result<Value, RuntimeError>;

    fn load_list_property(
        &self,
        entity: &str,
        property: &str,
        key: &Value,
    ) -> Result<Vec<Value>, RuntimeError>;
}

/// Aspect weaving conditional-load logic into mapped property accessors.
///
/// Getter reads consult a per-property loaded flag: when the instance has a
/// session, the flag is clear and the holder is missing, the value is
/// fetched through a hook slot keyed by the entity id, stored and flagged.
/// The flag is authoritative for every multiplicity, so a loaded-but-empty
/// collection never re-triggers a fetch. Setter writes pre-fill the holder
/// and leave the flag untouched.
pub struct LazyLoadAspect {
    mapping: EntityMapping,
    session: Option<Arc<dyn Session>>,
}

impl LazyLoadAspect {
    pub fn new(mapping: EntityMapping, session: Option<Arc<dyn Session>>) -> Self {
        LazyLoadAspect { mapping, session }
    }

    pub fn mapping(&self) -> &EntityMapping {
        &self.mapping
    }

    fn load_slot_name(property: &str) -> String {
        format!("__weft_load__{property}")
    }

    fn loaded_flag_name(holder: &str) -> String {
        format!("{holder}__loaded")
    }

    /// Direct callee of the base getter exposing the entity id, located
    /// through its structured member tag.
    fn id_getter(&self, ctx: &MemberContext<'_>) -> Result<Callee, WeaveError> {
        for slot in ctx.base.dispatch.values() {
            let Some(def) = ctx.registry.method_def(*slot) else {
                continue;
            };
            if let MemberKind::Getter(p) = &def.kind {
                if *p == self.mapping.id_property {
                    let owner = ctx
                        .registry
                        .get(slot.owner)
                        .ok_or(WeaveError::Internal("id getter owner missing"))?;
                    return Ok(Callee::Direct {
                        owner: owner.name.clone(),
                        index: slot.index,
                        name: def.name.clone(),
                        params: def.params.clone(),
                        return_type: def.return_type.clone(),
                    });
                }
            }
        }
        Err(WeaveError::Internal("mapped entity has no id getter"))
    }

    /// Emit the conditional load ahead of the getter's result substitution.
    fn emit_conditional_load(
        &self,
        m: &mut MethodBuilder,
        ctx: &MemberContext<'_>,
        prop: &PropertyMapping,
        holder: &Location,
    ) -> Result<(), WeaveError> {
        let flag_ref = ctx
            .ty
            .field(&Self::loaded_flag_name(&prop.holder_field))
            .ok_or(WeaveError::Internal("loaded flag not declared"))?;
        let marker_ref = ctx
            .ty
            .field(SESSION_FIELD)
            .ok_or(WeaveError::Internal("session marker not declared"))?;
        let flag = m.field(ctx.receiver.clone(), flag_ref);
        let marker = m.field(ctx.receiver.clone(), marker_ref);

        m.if_(marker);
        let not_loaded = m.compare(CmpOp::Eq, flag.clone(), m.constant(Constant::Bool(false)))?;
        m.if_(not_loaded);

        // Missing means null, or empty on the first read of a collection.
        let need = m.declare_local(TypeDesc::Bool);
        let is_null = m.compare(CmpOp::Eq, holder.clone(), m.constant(Constant::Null))?;
        m.assign(need.clone(), is_null)?;
        if prop.multiplicity.is_collection() {
            let present = m.compare(CmpOp::Ne, holder.clone(), m.constant(Constant::Null))?;
            m.if_(present);
            let len = m.list_len(holder.clone())?;
            let empty = m.compare(CmpOp::Eq, len, m.constant(Constant::Int(0)))?;
            m.assign(need.clone(), empty)?;
            m.end_if()?;
        }

        m.if_(need);
        let id_getter = self.id_getter(ctx)?;
        let id_ty = id_getter.return_type().clone();
        let id = m
            .invoke(Some(ctx.receiver.clone()), id_getter, vec![])?
            .ok_or(WeaveError::Internal("id getter returns a value"))?;
        let key = if id_ty.is_value_type() { m.widen(id)? } else { id };

        let load_slot = ctx
            .ty
            .find_method(&Self::load_slot_name(&prop.name))
            .ok_or(WeaveError::Internal("load slot not declared"))?;
        let fetched = m
            .invoke(Some(ctx.receiver.clone()), load_slot, vec![key])?
            .ok_or(WeaveError::Internal("load slot returns a value"))?;

        let got_value = m.compare(CmpOp::Ne, fetched.clone(), m.constant(Constant::Null))?;
        m.if_(got_value);
        m.assign(holder.clone(), fetched)?;
        m.end_if()?;
        m.assign(flag.clone(), m.constant(Constant::Bool(true)))?;
        m.end_if()?; // need

        m.end_if()?; // not_loaded
        m.end_if()?; // marker
        Ok(())
    }
}

impl Aspect for LazyLoadAspect {
    fn name(&self) -> &str {
        "lazy-load"
    }

    fn required_capabilities(&self) -> Vec<String> {
        vec!["LazyLoadable".to_string()]
    }

    fn on_type_setup(&self, ty: &mut TypeBuilder) -> Result<(), WeaveError> {
        ty.create_field(SESSION_FIELD, TypeDesc::Bool)?;
        for prop in &self.mapping.properties {
            ty.create_field(&prop.holder_field, prop.ty.clone())?;
            ty.create_field(Self::loaded_flag_name(&prop.holder_field), TypeDesc::Bool)?;
            ty.create_hook_slot(
                Self::load_slot_name(&prop.name),
                vec![TypeDesc::Boxed],
                prop.ty.clone(),
            )?;
        }
        debug!(
            target: "weft::lazy",
            entity = %self.mapping.entity,
            properties = self.mapping.properties.len(),
            "lazy fields declared"
        );
        Ok(())
    }

    fn on_member_start(
        &self,
        m: &mut MethodBuilder,
        ctx: &MemberContext<'_>,
    ) -> Result<(), WeaveError> {
        // Setter writes pre-fill the holder; the loaded flag stays as-is.
        let MemberKind::Setter(property) = &ctx.def.kind else {
            return Ok(());
        };
        let Some(prop) = self.mapping.property(property) else {
            return Ok(());
        };
        let holder_ref = ctx
            .ty
            .field(&prop.holder_field)
            .ok_or(WeaveError::Internal("holder field not declared"))?;
        let holder = m.field(ctx.receiver.clone(), holder_ref);
        let incoming = m.param(0)?;
        m.assign(holder, incoming)?;
        Ok(())
    }

    fn on_member_end(
        &self,
        m: &mut MethodBuilder,
        ctx: &MemberContext<'_>,
    ) -> Result<(), WeaveError> {
        let MemberKind::Getter(property) = &ctx.def.kind else {
            return Ok(());
        };
        let Some(prop) = self.mapping.property(property) else {
            return Ok(());
        };
        let Some(result) = &ctx.result else {
            return Ok(());
        };
        let holder_ref = ctx
            .ty
            .field(&prop.holder_field)
            .ok_or(WeaveError::Internal("holder field not declared"))?;
        let holder = m.field(ctx.receiver.clone(), holder_ref);

        self.emit_conditional_load(m, ctx, prop, &holder)?;

        // The holder is the property's value from here on.
        if prop.multiplicity.is_collection() {
            let item_ty = match &prop.ty {
                TypeDesc::List(inner) => (**inner).clone(),
                _ => TypeDesc::Boxed,
            };
            let missing = m.compare(CmpOp::Eq, holder.clone(), m.constant(Constant::Null))?;
            m.if_(missing);
            let empty = m.make_list(item_ty, vec![]);
            m.assign(result.clone(), empty)?;
            m.end_if()?;
            let present = m.compare(CmpOp::Ne, holder.clone(), m.constant(Constant::Null))?;
            m.if_(present);
            m.assign(result.clone(), holder)?;
            m.end_if()?;
        } else {
            m.assign(result.clone(), holder)?;
        }
        Ok(())
    }

    fn on_instance_setup(
        &self,
        instance: &ObjectRef,
        registry: &TypeRegistry,
    ) -> Result<(), WeaveError> {
        if self.session.is_some() {
            registry.set_field(instance, SESSION_FIELD, Value::Bool(true))?;
        }
        Ok(())
    }

    fn hook_bindings(&self) -> Vec<(String, NativeFn)> {
        self.mapping
            .properties
            .iter()
            .map(|prop| {
                let entity = self.mapping.entity.clone();
                let property = prop.name.clone();
                let multiplicity = prop.multiplicity;
                let session = self.session.clone();
                let body: NativeFn = Arc::new(move |_receiver, args| {
                    let key = args.into_iter().next().unwrap_or(Value::Null);
                    let Some(session) = &session else {
                        return Ok(Value::Null);
                    };
                    if multiplicity.is_collection() {
                        session
                            .load_list_property(&entity, &property, &key)
                            .map(Value::List)
                    } else {
                        session.load_property(&entity, &property, &key)
                    }
                });
                (Self::load_slot_name(&prop.name), body)
            })
            .collect()
    }
}
