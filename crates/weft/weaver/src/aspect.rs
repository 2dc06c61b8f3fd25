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

use crate::errors::WeaveError;
use parking_lot::RwLock;
use std::sync::Arc;
use weft_core::runtime::registry::{MethodDef, RuntimeType};
use weft_core::runtime::{NativeFn, TypeRegistry, Value};
use weft_core::{Location, MethodBuilder, ObjectRef, TypeBuilder};

/// Member lifecycle event delivered to hook handlers.
///
/// `args` is a widened snapshot of the declared arguments; `result` is set
/// for the end phase and `exception` for the exception phase.
#[derive(Debug, Clone)]
pub struct MemberEvent {
    pub member: String,
    pub args: Vec<Value>,
    pub result: Option<Value>,
    pub exception: Option<Value>,
}

/// Runtime hook handler. A `Some` return overrides the intercepted phase:
/// on start it short-circuits the member, on end it substitutes the result.
pub type HookHandler = Arc<dyn Fn(&MemberEvent) -> Option<Value> + Send + Sync + 'static>;

/// Observing handler for the exception phase; the raised value always
/// propagates unchanged afterwards.
pub type ExceptionHandler = Arc<dyn Fn(&MemberEvent) + Send + Sync + 'static>;

/// Handler lists raised by woven member bodies.
///
/// Handlers run in registration order; for start and end the first handler
/// returning `Some` wins and later handlers are not consulted.
#[derive(Default)]
pub struct HookRegistry {
    start: RwLock<Vec<HookHandler>>,
    end: RwLock<Vec<HookHandler>>,
    exception: RwLock<Vec<ExceptionHandler>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(&self, handler: HookHandler) {
        self.start.write().push(handler);
    }

    pub fn on_end(&self, handler: HookHandler) {
        self.end.write().push(handler);
    }

    pub fn on_exception(&self, handler: ExceptionHandler) {
        self.exception.write().push(handler);
    }

    pub fn raise_start(&self, event: &MemberEvent) -> Option<Value> {
        self.start.read().iter().find_map(|h| h(event))
    }

    pub fn raise_end(&self, event: &MemberEvent) -> Option<Value> {
        self.end.read().iter().find_map(|h| h(event))
    }

    pub fn raise_exception(&self, event: &MemberEvent) {
        for h in self.exception.read().iter() {
            h(event);
        }
    }
}

/// Generation-time view of the member currently being wrapped.
pub struct MemberContext<'a> {
    /// The woven type under construction.
    pub ty: &'a TypeBuilder,
    /// The base type whose member is being wrapped.
    pub base: &'a Arc<RuntimeType>,
    /// The inherited member definition.
    pub def: &'a MethodDef,
    /// Receiver of the wrapper body.
    pub receiver: Location,
    /// Result local of the wrapper, absent for unit members.
    pub result: Option<Location>,
    pub registry: &'a TypeRegistry,
}

/// A cross-cutting behavior woven into derived types.
///
/// Generation-time callbacks emit IR into the woven type and its member
/// wrappers; `on_instance_setup` runs against each live instance;
/// `hook_bindings` supplies native bodies for the hook slots the aspect
/// declared during type setup.
pub trait Aspect: Send + Sync {
    fn name(&self) -> &str;

    /// Interface names stamped onto every woven type.
    fn required_capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    fn on_type_setup(&self, _ty: &mut TypeBuilder) -> Result<(), WeaveError> {
        Ok(())
    }

    fn on_member_start(
        &self,
        _method: &mut MethodBuilder,
        _ctx: &MemberContext<'_>,
    ) -> Result<(), WeaveError> {
        Ok(())
    }

    fn on_member_end(
        &self,
        _method: &mut MethodBuilder,
        _ctx: &MemberContext<'_>,
    ) -> Result<(), WeaveError> {
        Ok(())
    }

    fn on_member_exception(
        &self,
        _method: &mut MethodBuilder,
        _ctx: &MemberContext<'_>,
    ) -> Result<(), WeaveError> {
        Ok(())
    }

    fn on_instance_setup(
        &self,
        _instance: &ObjectRef,
        _registry: &TypeRegistry,
    ) -> Result<(), WeaveError> {
        Ok(())
    }

    /// Native bodies for the hook slots this aspect declared.
    fn hook_bindings(&self) -> Vec<(String, NativeFn)> {
        Vec::new()
    }
}
