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

//! Builder layer: methods record operations, types collect members, and the
//! assembly builder bakes everything into the registry in one verified step.

pub mod assembly;
pub mod method;
pub mod type_builder;

pub use assembly::{AssemblyBuilder, AssemblyImage, BakedAssembly, HookBinder, NoHooks};
pub use method::MethodBuilder;
pub use type_builder::{getter_name, setter_name, TypeBuilder};
