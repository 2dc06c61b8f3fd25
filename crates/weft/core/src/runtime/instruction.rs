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

use crate::runtime::value::Constant;
use crate::types::TypeDesc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Arithmetic opcodes. The right operand is coerced to the left operand's
/// numeric kind before the operation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
}

impl ArithOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            ArithOp::Add => "ADD",
            ArithOp::Subtract => "SUB",
            ArithOp::Multiply => "MUL",
            ArithOp::Divide => "DIV",
            ArithOp::Modulus => "MOD",
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Comparison opcodes; each pushes a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            CmpOp::Eq => "CEQ",
            CmpOp::Ne => "CNE",
            CmpOp::Lt => "CLT",
            CmpOp::Le => "CLE",
            CmpOp::Gt => "CGT",
            CmpOp::Ge => "CGE",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// One primitive stack-machine instruction.
///
/// Argument slot 0 is the receiver; declared parameters follow. Type
/// references are carried by registry name so a serialized stream can be
/// relinked against a fresh registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    PushConst(Constant),
    LoadLocal(u16),
    StoreLocal(u16),
    LoadArg(u16),
    /// Pops the receiver, pushes the field value.
    LoadField(u16),
    /// Pops the value, then the receiver.
    StoreField(u16),
    /// Direct call: pops `argc` arguments, then the receiver.
    Call {
        owner: String,
        method: u16,
        argc: u8,
        returns: bool,
    },
    /// Virtual call dispatched on the receiver's dynamic type.
    CallVirtual {
        name: String,
        argc: u8,
        returns: bool,
    },
    /// Allocates an instance, runs the constructor, pushes the object.
    New {
        type_name: String,
        ctor: u16,
        argc: u8,
    },
    /// Widen the top value-kind operand into a boxed reference.
    BoxValue,
    /// Narrow the top boxed reference back into the given value type.
    Unbox(TypeDesc),
    /// Checked reference cast.
    CastRef(String),
    Arith(ArithOp),
    Compare(CmpOp),
    /// Pops that many items into a fresh list (top of stack is the last element).
    MakeList(u16),
    /// Pops a list, pushes its length.
    ListLen,
    BranchFalse(u32),
    Jump(u32),
    /// Pops a value and raises it.
    Throw,
    /// Re-raises the exception caught by the active handler, unchanged.
    Rethrow,
    Pop,
    Dup,
    Return,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushConst(c) => write!(f, "PUSH {c}"),
            Instruction::LoadLocal(s) => write!(f, "LDLOC {s}"),
            Instruction::StoreLocal(s) => write!(f, "STLOC {s}"),
            Instruction::LoadArg(s) => write!(f, "LDARG {s}"),
            Instruction::LoadField(s) => write!(f, "LDFLD {s}"),
            Instruction::StoreField(s) => write!(f, "STFLD {s}"),
            Instruction::Call { owner, method, argc, .. } => {
                write!(f, "CALL {owner}::{method} argc={argc}")
            }
            Instruction::CallVirtual { name, argc, .. } => {
                write!(f, "CALLVIRT {name} argc={argc}")
            }
            Instruction::New { type_name, argc, .. } => write!(f, "NEW {type_name} argc={argc}"),
            Instruction::BoxValue => write!(f, "BOX"),
            Instruction::Unbox(ty) => write!(f, "UNBOX {ty}"),
            Instruction::CastRef(name) => write!(f, "CAST {name}"),
            Instruction::Arith(op) => write!(f, "{op}"),
            Instruction::Compare(op) => write!(f, "{op}"),
            Instruction::MakeList(n) => write!(f, "MKLIST {n}"),
            Instruction::ListLen => write!(f, "LISTLEN"),
            Instruction::BranchFalse(t) => write!(f, "BRFALSE {t}"),
            Instruction::Jump(t) => write!(f, "JMP {t}"),
            Instruction::Throw => write!(f, "THROW"),
            Instruction::Rethrow => write!(f, "RETHROW"),
            Instruction::Pop => write!(f, "POP"),
            Instruction::Dup => write!(f, "DUP"),
            Instruction::Return => write!(f, "RET"),
        }
    }
}

/// Exception-protected span of a baked body.
///
/// On a raised value inside `[try_start, try_end)` whose runtime type passes
/// `filter`, the operand stack is cleared, the caught value is pushed, and
/// control transfers to `handler_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRegion {
    pub try_start: u32,
    pub try_end: u32,
    pub handler_start: u32,
    pub handler_end: u32,
    /// `None` catches any raised value.
    pub filter: Option<TypeDesc>,
    /// Local slot holding the caught value for the handler.
    pub catch_slot: u16,
}

/// Lowered, label-resolved method body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakedBody {
    pub instructions: Vec<Instruction>,
    pub local_count: u16,
    pub regions: Vec<ExceptionRegion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_are_stable() {
        assert_eq!(ArithOp::Add.mnemonic(), "ADD");
        assert_eq!(ArithOp::Modulus.mnemonic(), "MOD");
        assert_eq!(CmpOp::Ne.mnemonic(), "CNE");
    }

    #[test]
    fn instructions_round_trip_through_bincode() {
        let body = BakedBody {
            instructions: vec![
                Instruction::PushConst(Constant::Int(41)),
                Instruction::PushConst(Constant::Int(1)),
                Instruction::Arith(ArithOp::Add),
                Instruction::Return,
            ],
            local_count: 0,
            regions: vec![],
        };
        let bytes = bincode::serde::encode_to_vec(&body, bincode::config::standard()).unwrap();
        let (decoded, _): (BakedBody, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(decoded, body);
    }
}
