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

//! Aspect weaving over the Weft synthesis core.
//!
//! The [`manager::WeavingManager`] derives a woven counterpart of a base
//! type whose overridable members raise start/end/exception lifecycle
//! events, and [`lazy::LazyLoadAspect`] builds on that to fetch mapped
//! properties from a session on first read.

pub mod aspect;
pub mod errors;
pub mod lazy;
pub mod manager;

pub use aspect::{Aspect, HookRegistry, MemberContext, MemberEvent};
pub use errors::WeaveError;
pub use lazy::{EntityMapping, LazyLoadAspect, Multiplicity, PropertyMapping, Session};
pub use manager::{WeaveConfig, WeavingManager};
