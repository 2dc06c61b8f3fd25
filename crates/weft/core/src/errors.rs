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

use crate::runtime::value::Value;
use crate::types::TypeDesc;
use thiserror::Error;

/// Usage errors raised while an IR is being constructed.
///
/// These fail immediately and locally; the builder that produced them can be
/// dropped without affecting other, independent builds.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("cannot store into constant location")]
    SaveIntoConstant,
    #[error("cannot store into read-only location `{0}`")]
    SaveIntoReadOnly(&'static str),
    #[error("cannot load from write-only property `{0}`")]
    PropertyNotReadable(String),
    #[error("cannot store into read-only property `{0}`")]
    PropertyNotWritable(String),
    #[error("cannot widen non-value type {0}")]
    WidenNonValue(TypeDesc),
    #[error("cannot narrow into non-value type {0}")]
    NarrowNonValue(TypeDesc),
    #[error("cannot cast to non-reference type {0}")]
    CastNonReference(TypeDesc),
    #[error("arithmetic requires numeric operands, found {0}")]
    NonNumericOperand(TypeDesc),
    #[error("closed `{found}` while the innermost open region is `{expected}`")]
    RegionMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("no open `{0}` region to close")]
    RegionNotOpen(&'static str),
    #[error("`{0}` region left open at end of method body")]
    RegionLeftOpen(&'static str),
    #[error("catch handler is only valid directly inside an open try region")]
    CatchOutsideTry,
    #[error("try region already has a catch handler")]
    DuplicateCatch,
    #[error("try region closed without a catch handler")]
    TryWithoutCatch,
    #[error("rethrow is only valid inside a catch handler")]
    RethrowOutsideCatch,
    #[error("duplicate {kind} `{name}` on type `{ty}`")]
    DuplicateMember {
        ty: String,
        kind: &'static str,
        name: String,
    },
    #[error("duplicate type name `{0}`")]
    DuplicateType(String),
    #[error("callee `{name}` expects {expected} arguments, {found} supplied")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("return value does not match declared return type {0}")]
    ReturnMismatch(TypeDesc),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("unknown member `{member}` on type `{ty}`")]
    UnknownMember { ty: String, member: String },
    #[error("cannot override final member `{0}`")]
    OverrideFinal(String),
    #[error("unresolved branch label {0}")]
    UnresolvedLabel(u32),
    #[error("parameter index {index} out of range for `{method}`")]
    ParamOutOfRange { method: String, index: u16 },
}

/// Verification failure detected at bake time.
///
/// A single failure is reported, naming the offending member; the whole
/// assembly fails to bake.
#[derive(Debug, Error)]
#[error("verification of `{member}` failed at offset {offset}: {reason}")]
pub struct VerifyError {
    pub member: String,
    pub offset: u32,
    pub reason: String,
}

/// Errors raised while finalizing an assembly.
#[derive(Debug, Error)]
pub enum BakeError {
    #[error(transparent)]
    Usage(#[from] SynthesisError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// Errors raised by the executor while running baked instruction streams.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("attempted division by zero")]
    DivisionByZero,
    #[error("invalid jump target: {0}")]
    InvalidJumpTarget(u32),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("unknown method index {index} on type `{ty}`")]
    UnknownMethod { ty: String, index: u16 },
    #[error("no virtual member `{name}` on type `{ty}`")]
    UnknownVirtualMember { ty: String, name: String },
    #[error("type `{ty}` has no constructor taking {argc} arguments")]
    NoConstructor { ty: String, argc: usize },
    #[error("null reference")]
    NullReference,
    #[error("invalid cast: `{from}` is not a `{to}`")]
    InvalidCast { from: String, to: String },
    #[error("cannot unbox {found} into {expected}")]
    UnboxMismatch { expected: TypeDesc, found: String },
    #[error("field slot {0} out of range")]
    FieldOutOfRange(u16),
    #[error("unknown field `{field}` on type `{ty}`")]
    UnknownField { ty: String, field: String },
    #[error("argument slot {0} out of range")]
    ArgOutOfRange(u16),
    #[error("expected {expected} operand, found {found}")]
    OperandMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("hook slot `{0}` is not bound")]
    UnboundHookSlot(String),
    #[error("rethrow outside of an active exception handler")]
    RethrowOutsideHandler,
    #[error("control fell off the end of `{0}`")]
    FellOffEnd(String),
    #[error("raised: {0}")]
    Raised(Value),
}

/// Errors raised while persisting or reloading an assembly image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("invalid image magic number")]
    InvalidMagic,
    #[error("unsupported image version {0}")]
    UnsupportedVersion(u8),
}
