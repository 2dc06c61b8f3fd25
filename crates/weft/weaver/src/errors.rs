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

use thiserror::Error;
use weft_core::{BakeError, ImageError, RuntimeError, SynthesisError};

/// Errors raised by the weaving manager and its aspects.
#[derive(Debug, Error)]
pub enum WeaveError {
    #[error("unknown base type `{0}`")]
    UnknownBase(String),
    #[error("cannot weave sealed base type `{0}`")]
    SealedBase(String),
    #[error("no stored mapping for `{0}` and regeneration is disabled")]
    NoMapping(String),
    #[error("regeneration is disabled but no artifact directory is configured")]
    MissingArtifact,
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Bake(#[from] BakeError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("{0}")]
    Internal(&'static str),
}
