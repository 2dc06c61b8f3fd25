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

use crate::aspect::{Aspect, HookRegistry, MemberContext, MemberEvent};
use crate::errors::WeaveError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use weft_core::runtime::instruction::CmpOp;
use weft_core::runtime::registry::RuntimeType;
use weft_core::{
    AssemblyBuilder, AssemblyImage, Callee, Constant, Executor, HookBinder, ImageError,
    MemberKind, NativeFn, ObjectRef, TypeAttributes, TypeDesc, TypeId, TypeRegistry, Value,
};

/// Hook slot raising the start phase of a wrapped member.
pub const START_SLOT: &str = "__weft_start";
/// Hook slot raising the end phase of a wrapped member.
pub const END_SLOT: &str = "__weft_end";
/// Hook slot raising the exception phase of a wrapped member.
pub const RAISE_SLOT: &str = "__weft_raise";

/// Suffix appended to a base type name to name its woven derivation.
const WOVEN_SUFFIX: &str = "__woven";

/// Persistence and regeneration policy of a weaving manager.
#[derive(Debug, Clone)]
pub struct WeaveConfig {
    /// Directory holding `.weft` assembly images, one per woven type.
    pub output_dir: Option<PathBuf>,
    /// When false, woven types are only loaded from stored images and an
    /// unmapped base is a configuration error, never a silent rebuild.
    pub regenerate: bool,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        WeaveConfig {
            output_dir: None,
            regenerate: true,
        }
    }
}

/// Synthesizes derived types that wrap every overridable member of a base
/// with start/end/exception lifecycle hooks.
///
/// Woven bodies raise their events through hook slots bound to the
/// manager's [`HookRegistry`], so the generated code itself stays fully
/// serializable.
pub struct WeavingManager {
    registry: Arc<TypeRegistry>,
    executor: Executor,
    aspects: Vec<Box<dyn Aspect>>,
    hooks: Arc<HookRegistry>,
    cache: RwLock<HashMap<String, TypeId>>,
    loaded: RwLock<bool>,
    config: WeaveConfig,
}

impl WeavingManager {
    pub fn new(registry: Arc<TypeRegistry>, config: WeaveConfig) -> Self {
        WeavingManager {
            executor: Executor::new(registry.clone()),
            registry,
            aspects: Vec::new(),
            hooks: Arc::new(HookRegistry::new()),
            cache: RwLock::new(HashMap::new()),
            loaded: RwLock::new(false),
            config,
        }
    }

    /// Register an aspect. Aspects participate in every weave performed
    /// after registration, in registration order.
    pub fn add_aspect(&mut self, aspect: Box<dyn Aspect>) {
        debug!(target: "weft::weave", aspect = aspect.name(), "aspect registered");
        self.aspects.push(aspect);
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// The woven counterpart of `base_name`, weaving it on first use (or
    /// resolving it from stored images when regeneration is disabled).
    pub fn synthesize(&self, base_name: &str) -> Result<TypeId, WeaveError> {
        if let Some(id) = self.cache.read().get(base_name) {
            return Ok(*id);
        }
        if !self.config.regenerate {
            self.ensure_loaded()?;
            return self
                .cache
                .read()
                .get(base_name)
                .copied()
                .ok_or_else(|| WeaveError::NoMapping(base_name.to_string()));
        }
        let base = self
            .registry
            .get_by_name(base_name)
            .ok_or_else(|| WeaveError::UnknownBase(base_name.to_string()))?;
        let id = self.weave(&base)?;
        self.cache.write().insert(base_name.to_string(), id);
        Ok(id)
    }

    /// Instantiate the woven counterpart of `base_name` and run every
    /// aspect's instance setup against it.
    pub fn create(&self, base_name: &str) -> Result<ObjectRef, WeaveError> {
        let id = self.synthesize(base_name)?;
        let ty = self
            .registry
            .get(id)
            .ok_or(WeaveError::Internal("woven type missing from registry"))?;
        let instance = self.executor.instantiate(&ty.name, vec![])?;
        for aspect in &self.aspects {
            aspect.on_instance_setup(&instance, &self.registry)?;
        }
        Ok(instance)
    }

    /// Relink every stored image from the artifact directory.
    fn ensure_loaded(&self) -> Result<(), WeaveError> {
        if *self.loaded.read() {
            return Ok(());
        }
        let mut loaded = self.loaded.write();
        if *loaded {
            return Ok(());
        }
        let dir = self
            .config
            .output_dir
            .as_ref()
            .ok_or(WeaveError::MissingArtifact)?;
        let binder = self.binder();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(ImageError::Io)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "weft"))
            .collect();
        paths.sort();
        for path in paths {
            let image = AssemblyImage::load(&path)?;
            let types = image
                .install(&self.registry, &binder)
                .map_err(WeaveError::Synthesis)?;
            for ty in types {
                if let Some(base) = ty.name.strip_suffix(WOVEN_SUFFIX) {
                    self.cache.write().insert(base.to_string(), ty.id);
                }
            }
            info!(target: "weft::weave", path = %path.display(), "image relinked");
        }
        *loaded = true;
        Ok(())
    }

    /// Generate, verify and install the woven derivation of `base`.
    fn weave(&self, base: &Arc<RuntimeType>) -> Result<TypeId, WeaveError> {
        if base.sealed {
            return Err(WeaveError::SealedBase(base.name.clone()));
        }
        let woven_name = format!("{}{}", base.name, WOVEN_SUFFIX);
        debug!(target: "weft::weave", base = %base.name, woven = %woven_name, "weaving");

        let mut asm = AssemblyBuilder::new(woven_name.clone(), self.registry.clone());
        let mut tb = asm
            .create_type(&woven_name, Some(&base.name), TypeAttributes::default())
            .map_err(WeaveError::Synthesis)?;

        for aspect in &self.aspects {
            for capability in aspect.required_capabilities() {
                tb.add_interface(capability);
            }
        }
        for aspect in &self.aspects {
            aspect.on_type_setup(&mut tb)?;
        }

        let boxed_args = TypeDesc::List(Box::new(TypeDesc::Boxed));
        let start_slot = tb.create_hook_slot(
            START_SLOT,
            vec![TypeDesc::Str, boxed_args.clone()],
            TypeDesc::Boxed,
        )?;
        let end_slot = tb.create_hook_slot(
            END_SLOT,
            vec![TypeDesc::Str, boxed_args.clone(), TypeDesc::Boxed],
            TypeDesc::Boxed,
        )?;
        let raise_slot = tb.create_hook_slot(
            RAISE_SLOT,
            vec![TypeDesc::Str, boxed_args, TypeDesc::Boxed],
            TypeDesc::Unit,
        )?;
        tb.create_default_constructor()?;

        // Deterministic wrap order regardless of hash-map iteration.
        let mut members: Vec<_> = base
            .dispatch
            .iter()
            .map(|(name, slot)| (name.clone(), *slot))
            .collect();
        members.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, slot) in members {
            let Some(def) = self.registry.method_def(slot) else {
                continue;
            };
            if !def.is_virtual || def.is_final || def.kind == MemberKind::Constructor {
                continue;
            }
            if name.starts_with("__weft") {
                continue;
            }
            let owner = self
                .registry
                .get(slot.owner)
                .ok_or(WeaveError::Internal("dispatch entry names unknown owner"))?;

            let mut m = tb.create_override(&def)?;
            let receiver = m.receiver();
            let result = if def.return_type != TypeDesc::Unit {
                Some(m.declare_local(def.return_type.clone()))
            } else {
                None
            };

            // Widened snapshot of the declared arguments for the events.
            let mut snapshot = Vec::with_capacity(def.params.len());
            for (i, p) in def.params.iter().enumerate() {
                let arg = m.param(i)?;
                snapshot.push(if p.is_value_type() { m.widen(arg)? } else { arg });
            }
            let args_list = m.make_list(TypeDesc::Boxed, snapshot);
            let member_const = m.constant(Constant::Str(def.name.clone()));

            m.try_();

            {
                let ctx = MemberContext {
                    ty: &tb,
                    base,
                    def: &def,
                    receiver: receiver.clone(),
                    result: result.clone(),
                    registry: &self.registry,
                };
                for aspect in &self.aspects {
                    aspect.on_member_start(&mut m, &ctx)?;
                }
            }

            let start_result = m
                .invoke(
                    Some(receiver.clone()),
                    start_slot.clone(),
                    vec![member_const.clone(), args_list.clone()],
                )?
                .ok_or(WeaveError::Internal("start slot returns a value"))?;

            // Base path: no start handler claimed the call.
            let no_override = m.compare(
                CmpOp::Eq,
                start_result.clone(),
                m.constant(Constant::Null),
            )?;
            m.if_(no_override);
            {
                let mut base_args = Vec::with_capacity(def.params.len());
                for i in 0..def.params.len() {
                    base_args.push(m.param(i)?);
                }
                let base_callee = Callee::Direct {
                    owner: owner.name.clone(),
                    index: slot.index,
                    name: def.name.clone(),
                    params: def.params.clone(),
                    return_type: def.return_type.clone(),
                };
                let base_result = m.invoke(Some(receiver.clone()), base_callee, base_args)?;

                let end_arg = match &base_result {
                    Some(r) if r.data_type().is_value_type() => m.widen(r.clone())?,
                    Some(r) => r.clone(),
                    None => m.constant(Constant::Null),
                };
                let end_result = m
                    .invoke(
                        Some(receiver.clone()),
                        end_slot.clone(),
                        vec![member_const.clone(), args_list.clone(), end_arg],
                    )?
                    .ok_or(WeaveError::Internal("end slot returns a value"))?;

                if let Some(result_loc) = &result {
                    let substituted = m.compare(
                        CmpOp::Ne,
                        end_result.clone(),
                        m.constant(Constant::Null),
                    )?;
                    m.if_(substituted);
                    m.assign(result_loc.clone(), end_result.clone())?;
                    m.end_if()?;

                    let kept = m.compare(CmpOp::Eq, end_result, m.constant(Constant::Null))?;
                    m.if_(kept);
                    if let Some(base_result) = base_result {
                        m.assign(result_loc.clone(), base_result)?;
                    }
                    m.end_if()?;
                }

                let ctx = MemberContext {
                    ty: &tb,
                    base,
                    def: &def,
                    receiver: receiver.clone(),
                    result: result.clone(),
                    registry: &self.registry,
                };
                for aspect in &self.aspects {
                    aspect.on_member_end(&mut m, &ctx)?;
                }
            }
            m.end_if()?;

            // Short-circuit path: a start handler supplied the result.
            if let Some(result_loc) = &result {
                let overridden =
                    m.compare(CmpOp::Ne, start_result.clone(), m.constant(Constant::Null))?;
                m.if_(overridden);
                m.assign(result_loc.clone(), start_result)?;
                m.end_if()?;
            }

            let caught = m.catch_(None)?;
            m.invoke(
                Some(receiver.clone()),
                raise_slot.clone(),
                vec![member_const, args_list, caught],
            )?;
            {
                let ctx = MemberContext {
                    ty: &tb,
                    base,
                    def: &def,
                    receiver: receiver.clone(),
                    result: result.clone(),
                    registry: &self.registry,
                };
                for aspect in &self.aspects {
                    aspect.on_member_exception(&mut m, &ctx)?;
                }
            }
            m.rethrow()?;
            m.end_try()?;

            m.return_(result)?;
            tb.finish_method(m)?;
        }

        asm.finish_type(tb);
        let baked = asm.finalize_with(&self.binder())?;

        if self.config.regenerate {
            if let Some(dir) = &self.config.output_dir {
                std::fs::create_dir_all(dir).map_err(ImageError::Io)?;
                let path = dir.join(format!("{woven_name}.weft"));
                baked.image.save(&path)?;
            }
        }

        let ty = baked
            .types
            .first()
            .ok_or(WeaveError::Internal("finalize produced no types"))?;
        info!(target: "weft::weave", woven = %ty.name, "woven type installed");
        Ok(ty.id)
    }

    /// Native bindings for the manager's dispatch slots plus every aspect's
    /// own hook slots.
    fn binder(&self) -> ManagerBinder {
        let mut bindings: HashMap<String, NativeFn> = HashMap::new();
        bindings.insert(START_SLOT.to_string(), start_dispatcher(self.hooks.clone()));
        bindings.insert(END_SLOT.to_string(), end_dispatcher(self.hooks.clone()));
        bindings.insert(RAISE_SLOT.to_string(), raise_dispatcher(self.hooks.clone()));
        for aspect in &self.aspects {
            for (slot, body) in aspect.hook_bindings() {
                bindings.insert(slot, body);
            }
        }
        ManagerBinder { bindings }
    }
}

struct ManagerBinder {
    bindings: HashMap<String, NativeFn>,
}

impl HookBinder for ManagerBinder {
    fn bind(&self, slot: &str) -> Option<NativeFn> {
        self.bindings.get(slot).cloned()
    }
}

fn decode_event(args: Vec<Value>) -> Result<(MemberEvent, Option<Value>), weft_core::RuntimeError> {
    let mut args = args.into_iter();
    let member = match args.next() {
        Some(Value::Str(s)) => s,
        other => {
            return Err(weft_core::RuntimeError::OperandMismatch {
                expected: "str",
                found: other.as_ref().map(Value::kind_name).unwrap_or("missing"),
            });
        }
    };
    let snapshot = match args.next() {
        Some(Value::List(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(weft_core::RuntimeError::OperandMismatch {
                expected: "list",
                found: other.kind_name(),
            });
        }
    };
    let extra = args.next();
    Ok((
        MemberEvent {
            member,
            args: snapshot,
            result: None,
            exception: None,
        },
        extra,
    ))
}

fn start_dispatcher(hooks: Arc<HookRegistry>) -> NativeFn {
    Arc::new(move |_receiver, args| {
        let (event, _) = decode_event(args)?;
        // Value-kind overrides are widened so the wrapper's unbox succeeds.
        Ok(match hooks.raise_start(&event) {
            Some(v) => v.widened(),
            None => Value::Null,
        })
    })
}

fn end_dispatcher(hooks: Arc<HookRegistry>) -> NativeFn {
    Arc::new(move |_receiver, args| {
        let (mut event, extra) = decode_event(args)?;
        event.result = extra;
        Ok(match hooks.raise_end(&event) {
            Some(v) => v.widened(),
            None => Value::Null,
        })
    })
}

fn raise_dispatcher(hooks: Arc<HookRegistry>) -> NativeFn {
    Arc::new(move |_receiver, args| {
        let (mut event, extra) = decode_event(args)?;
        event.exception = extra;
        hooks.raise_exception(&event);
        Ok(Value::Null)
    })
}
