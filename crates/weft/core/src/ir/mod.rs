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

//! Typed intermediate representation: locations name values, operations
//! describe the steps, and the assembler flattens both into instructions.

pub mod assembler;
pub mod location;
pub mod operation;

pub use assembler::{BodyAssembler, LabelId};
pub use location::{LocalSlot, Location};
pub use operation::Operation;
