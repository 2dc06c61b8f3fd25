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

use crate::errors::SynthesisError;
use crate::ir::assembler::{BodyAssembler, LabelId};
use crate::ir::location::{emit_call, LocalSlot, Location};
use crate::runtime::instruction::{ArithOp, CmpOp, ExceptionRegion, Instruction};
use crate::types::{Callee, TypeDesc};

/// One imperative step of a synthesized method body.
///
/// Operations validate their usage rules when the owning method builder
/// records them; `lower` only translates an already-valid sequence. A
/// produced value lives in the operation's result local.
#[derive(Debug, Clone)]
pub enum Operation {
    Assign {
        target: Location,
        value: Location,
    },
    Invoke {
        receiver: Option<Location>,
        callee: Callee,
        args: Vec<Location>,
        result: Option<LocalSlot>,
    },
    Construct {
        type_name: String,
        ctor: u16,
        args: Vec<Location>,
        result: LocalSlot,
    },
    /// Value type to boxed reference.
    Widen {
        source: Location,
        result: LocalSlot,
    },
    /// Boxed reference back to a value type.
    Narrow {
        source: Location,
        target: TypeDesc,
        result: LocalSlot,
    },
    /// Checked reference-to-reference conversion.
    Cast {
        source: Location,
        target: TypeDesc,
        result: LocalSlot,
    },
    Arithmetic {
        op: ArithOp,
        lhs: Location,
        rhs: Location,
        result: LocalSlot,
    },
    Compare {
        op: CmpOp,
        lhs: Location,
        rhs: Location,
        result: LocalSlot,
    },
    MakeList {
        items: Vec<Location>,
        result: LocalSlot,
    },
    ListLen {
        list: Location,
        result: LocalSlot,
    },
    If {
        cond: Location,
    },
    EndIf,
    While {
        cond: Location,
    },
    EndWhile,
    Try,
    Catch {
        filter: Option<TypeDesc>,
        caught: LocalSlot,
    },
    EndTry,
    Throw {
        value: Location,
    },
    Rethrow,
    Return {
        value: Option<Location>,
    },
}

/// Open control/exception frames tracked while lowering.
enum Frame {
    If {
        end: LabelId,
    },
    While {
        start: LabelId,
        end: LabelId,
    },
    Try {
        try_start: u32,
        try_end: u32,
        handler_start: u32,
        done: Option<LabelId>,
        filter: Option<TypeDesc>,
        catch_slot: u16,
    },
}

/// Lowering-time stack of open frames. Construction-time validation
/// guarantees frames close in LIFO order with matching kinds.
#[derive(Default)]
pub(crate) struct FlowState {
    frames: Vec<Frame>,
}

impl Operation {
    /// The implicitly allocated local holding this operation's value, when
    /// it produces one.
    pub fn result(&self) -> Option<&LocalSlot> {
        match self {
            Operation::Invoke { result, .. } => result.as_ref(),
            Operation::Construct { result, .. }
            | Operation::Widen { result, .. }
            | Operation::Narrow { result, .. }
            | Operation::Cast { result, .. }
            | Operation::Arithmetic { result, .. }
            | Operation::Compare { result, .. }
            | Operation::MakeList { result, .. }
            | Operation::ListLen { result, .. } => Some(result),
            Operation::Catch { caught, .. } => Some(caught),
            _ => None,
        }
    }

    /// Human-readable rendering used for diagnostics and tests.
    pub fn describe(&self) -> String {
        match self {
            Operation::Assign { target, value } => {
                format!("{} = {}", target.name(), value.name())
            }
            Operation::Invoke {
                receiver,
                callee,
                args,
                result,
            } => {
                let args = args.iter().map(Location::name).collect::<Vec<_>>().join(", ");
                let recv = receiver
                    .as_ref()
                    .map(|r| format!("{}.", r.name()))
                    .unwrap_or_default();
                match result {
                    Some(r) => format!("{} = {recv}{}({args})", r.name, callee.name()),
                    None => format!("{recv}{}({args})", callee.name()),
                }
            }
            Operation::Construct {
                type_name,
                args,
                result,
                ..
            } => {
                let args = args.iter().map(Location::name).collect::<Vec<_>>().join(", ");
                format!("{} = new {type_name}({args})", result.name)
            }
            Operation::Widen { source, result } => {
                format!("{} = widen {}", result.name, source.name())
            }
            Operation::Narrow {
                source,
                target,
                result,
            } => format!("{} = narrow<{target}> {}", result.name, source.name()),
            Operation::Cast {
                source,
                target,
                result,
            } => format!("{} = cast<{target}> {}", result.name, source.name()),
            Operation::Arithmetic { op, lhs, rhs, result } => {
                format!("{} = {} {op} {}", result.name, lhs.name(), rhs.name())
            }
            Operation::Compare { op, lhs, rhs, result } => {
                format!("{} = {} {op} {}", result.name, lhs.name(), rhs.name())
            }
            Operation::MakeList { items, result } => {
                let items = items.iter().map(Location::name).collect::<Vec<_>>().join(", ");
                format!("{} = [{items}]", result.name)
            }
            Operation::ListLen { list, result } => {
                format!("{} = len {}", result.name, list.name())
            }
            Operation::If { cond } => format!("if {}", cond.name()),
            Operation::EndIf => "end if".to_string(),
            Operation::While { cond } => format!("while {}", cond.name()),
            Operation::EndWhile => "end while".to_string(),
            Operation::Try => "try".to_string(),
            Operation::Catch { filter, caught } => match filter {
                Some(ty) => format!("catch<{ty}> -> {}", caught.name),
                None => format!("catch -> {}", caught.name),
            },
            Operation::EndTry => "end try".to_string(),
            Operation::Throw { value } => format!("throw {}", value.name()),
            Operation::Rethrow => "rethrow".to_string(),
            Operation::Return { value } => match value {
                Some(v) => format!("return {}", v.name()),
                None => "return".to_string(),
            },
        }
    }

    /// Append this operation's instructions to the body stream.
    pub(crate) fn lower(
        &self,
        asm: &mut BodyAssembler,
        flow: &mut FlowState,
    ) -> Result<(), SynthesisError> {
        match self {
            Operation::Assign { target, value } => {
                let src = value.data_type();
                let dst = target.data_type();
                target.emit_save(asm, |asm| {
                    value.emit_load(asm)?;
                    // Automatic value/reference reconciliation.
                    if src.is_value_type() && dst.is_reference_type() {
                        asm.emit(Instruction::BoxValue);
                    } else if src.is_reference_type() && dst.is_value_type() {
                        asm.emit(Instruction::Unbox(dst.clone()));
                    }
                    Ok(())
                })
            }
            Operation::Invoke {
                receiver,
                callee,
                args,
                result,
            } => {
                match receiver {
                    Some(r) => r.emit_load(asm)?,
                    None => {
                        asm.emit(Instruction::PushConst(
                            crate::runtime::value::Constant::Null,
                        ));
                    }
                }
                for arg in args {
                    arg.emit_load(asm)?;
                }
                emit_call(asm, callee, args.len() as u8);
                if let Some(result) = result {
                    asm.emit(Instruction::StoreLocal(result.slot));
                }
                Ok(())
            }
            Operation::Construct {
                type_name,
                ctor,
                args,
                result,
            } => {
                for arg in args {
                    arg.emit_load(asm)?;
                }
                asm.emit(Instruction::New {
                    type_name: type_name.clone(),
                    ctor: *ctor,
                    argc: args.len() as u8,
                });
                asm.emit(Instruction::StoreLocal(result.slot));
                Ok(())
            }
            Operation::Widen { source, result } => {
                source.emit_load(asm)?;
                asm.emit(Instruction::BoxValue);
                asm.emit(Instruction::StoreLocal(result.slot));
                Ok(())
            }
            Operation::Narrow {
                source,
                target,
                result,
            } => {
                source.emit_load(asm)?;
                asm.emit(Instruction::Unbox(target.clone()));
                asm.emit(Instruction::StoreLocal(result.slot));
                Ok(())
            }
            Operation::Cast {
                source,
                target,
                result,
            } => {
                source.emit_load(asm)?;
                if let TypeDesc::Object(name) = target {
                    asm.emit(Instruction::CastRef(name.clone()));
                }
                asm.emit(Instruction::StoreLocal(result.slot));
                Ok(())
            }
            Operation::Arithmetic { op, lhs, rhs, result } => {
                lhs.emit_load(asm)?;
                rhs.emit_load(asm)?;
                asm.emit(Instruction::Arith(*op));
                asm.emit(Instruction::StoreLocal(result.slot));
                Ok(())
            }
            Operation::Compare { op, lhs, rhs, result } => {
                lhs.emit_load(asm)?;
                rhs.emit_load(asm)?;
                asm.emit(Instruction::Compare(*op));
                asm.emit(Instruction::StoreLocal(result.slot));
                Ok(())
            }
            Operation::MakeList { items, result } => {
                for item in items {
                    item.emit_load(asm)?;
                }
                asm.emit(Instruction::MakeList(items.len() as u16));
                asm.emit(Instruction::StoreLocal(result.slot));
                Ok(())
            }
            Operation::ListLen { list, result } => {
                list.emit_load(asm)?;
                asm.emit(Instruction::ListLen);
                asm.emit(Instruction::StoreLocal(result.slot));
                Ok(())
            }
            Operation::If { cond } => {
                cond.emit_load(asm)?;
                let end = asm.new_label();
                asm.emit_branch_false(end);
                flow.frames.push(Frame::If { end });
                Ok(())
            }
            Operation::EndIf => match flow.frames.pop() {
                Some(Frame::If { end }) => {
                    asm.mark(end);
                    Ok(())
                }
                _ => Err(SynthesisError::RegionNotOpen("if")),
            },
            Operation::While { cond } => {
                let start = asm.new_label();
                asm.mark(start);
                cond.emit_load(asm)?;
                let end = asm.new_label();
                asm.emit_branch_false(end);
                flow.frames.push(Frame::While { start, end });
                Ok(())
            }
            Operation::EndWhile => match flow.frames.pop() {
                Some(Frame::While { start, end }) => {
                    asm.emit_jump(start);
                    asm.mark(end);
                    Ok(())
                }
                _ => Err(SynthesisError::RegionNotOpen("while")),
            },
            Operation::Try => {
                flow.frames.push(Frame::Try {
                    try_start: asm.offset(),
                    try_end: 0,
                    handler_start: 0,
                    done: None,
                    filter: None,
                    catch_slot: 0,
                });
                Ok(())
            }
            Operation::Catch { filter, caught } => {
                match flow.frames.last_mut() {
                    Some(Frame::Try {
                        try_end,
                        handler_start,
                        done,
                        filter: frame_filter,
                        catch_slot,
                        ..
                    }) => {
                        *try_end = asm.offset();
                        let done_label = asm.new_label();
                        asm.emit_jump(done_label);
                        *handler_start = asm.offset();
                        // The executor pushes the caught value on entry.
                        asm.emit(Instruction::StoreLocal(caught.slot));
                        *done = Some(done_label);
                        *frame_filter = filter.clone();
                        *catch_slot = caught.slot;
                        Ok(())
                    }
                    _ => Err(SynthesisError::CatchOutsideTry),
                }
            }
            Operation::EndTry => match flow.frames.pop() {
                Some(Frame::Try {
                    try_start,
                    try_end,
                    handler_start,
                    done: Some(done),
                    filter,
                    catch_slot,
                }) => {
                    let handler_end = asm.offset();
                    asm.mark(done);
                    asm.push_region(ExceptionRegion {
                        try_start,
                        try_end,
                        handler_start,
                        handler_end,
                        filter,
                        catch_slot,
                    });
                    Ok(())
                }
                Some(Frame::Try { done: None, .. }) => Err(SynthesisError::TryWithoutCatch),
                _ => Err(SynthesisError::RegionNotOpen("try")),
            },
            Operation::Throw { value } => {
                value.emit_load(asm)?;
                asm.emit(Instruction::Throw);
                Ok(())
            }
            Operation::Rethrow => {
                asm.emit(Instruction::Rethrow);
                Ok(())
            }
            Operation::Return { value } => {
                if let Some(value) = value {
                    value.emit_load(asm)?;
                }
                asm.emit(Instruction::Return);
                Ok(())
            }
        }
    }
}
