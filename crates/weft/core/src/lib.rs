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

//! Runtime code synthesis for the Weft engine.
//!
//! The crate is layered bottom-up:
//!
//! - [`runtime`] is the host engine: values, instructions, the type registry
//!   and the interpreter that executes baked bodies.
//! - [`ir`] is the typed intermediate representation recorded by builders.
//! - [`builder`] turns recorded IR into installed, runnable types and into
//!   relinkable on-disk images.
//!
//! Synthesized types reference one another by registry name, so an assembly
//! baked in one process can be saved, reloaded and relinked in another.

pub mod builder;
pub mod errors;
pub mod ir;
pub mod runtime;
pub mod types;
pub mod verify;

pub use builder::{AssemblyBuilder, AssemblyImage, BakedAssembly, HookBinder, MethodBuilder, NoHooks, TypeBuilder};
pub use errors::{BakeError, ImageError, RuntimeError, SynthesisError, VerifyError};
pub use ir::{LocalSlot, Location, Operation};
pub use runtime::{
    ArithOp, BakedBody, CmpOp, Constant, Executor, Instruction, MethodBody, MethodDef, NativeFn,
    NativeTypeSpec, ObjectRef, TypeRegistry, Value,
};
pub use types::{Callee, FieldRef, MemberKind, PropertyRef, TypeAttributes, TypeDesc, TypeId};
