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

//! The host execution engine: values, instructions, baked types and the
//! interpreter that runs synthesized method bodies.

pub mod executor;
pub mod instruction;
pub mod object;
pub mod registry;
pub mod value;

pub use executor::Executor;
pub use instruction::{ArithOp, BakedBody, CmpOp, ExceptionRegion, Instruction};
pub use object::{ObjectData, ObjectRef};
pub use registry::{
    FieldDef, MethodBody, MethodDef, MethodSlot, NativeFn, NativeTypeSpec, RuntimeType,
    TypeRegistry,
};
pub use value::{Constant, Value};
