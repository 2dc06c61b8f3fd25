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

//! Bake-time structural verification of lowered bodies.
//!
//! The verifier walks every reachable instruction tracking the operand stack
//! depth, so the executor never has to defend against underflow or dangling
//! branch targets in bodies that passed a bake.

use crate::errors::VerifyError;
use crate::runtime::instruction::{BakedBody, Instruction};
use std::collections::HashMap;

/// Verify a single lowered body. `member` names the method for diagnostics
/// (`Type::method`).
pub fn verify_body(member: &str, body: &BakedBody) -> Result<(), VerifyError> {
    let len = body.instructions.len() as u32;
    let fail = |offset: u32, reason: String| VerifyError {
        member: member.to_string(),
        offset,
        reason,
    };

    for region in &body.regions {
        if region.try_end > len || region.handler_start >= len || region.handler_end > len {
            return Err(fail(region.handler_start, "exception region out of range".into()));
        }
        if region.catch_slot >= body.local_count {
            return Err(fail(
                region.handler_start,
                format!("catch slot {} out of range", region.catch_slot),
            ));
        }
    }

    // (offset, stack depth) worklist; handlers start with the caught value
    // already pushed.
    let mut work: Vec<(u32, u32)> = vec![(0, 0)];
    for region in &body.regions {
        work.push((region.handler_start, 1));
    }
    let mut seen: HashMap<u32, u32> = HashMap::new();

    while let Some((offset, depth)) = work.pop() {
        if offset >= len {
            return Err(fail(offset, "control falls off the end of the body".into()));
        }
        match seen.get(&offset) {
            Some(prev) if *prev == depth => continue,
            Some(prev) => {
                return Err(fail(
                    offset,
                    format!("inconsistent stack depth at join: {prev} vs {depth}"),
                ));
            }
            None => {
                seen.insert(offset, depth);
            }
        }

        let instruction = &body.instructions[offset as usize];
        let (pops, pushes) = effect(instruction);
        if depth < pops {
            return Err(fail(
                offset,
                format!("stack underflow: `{instruction}` needs {pops}, depth is {depth}"),
            ));
        }
        let next_depth = depth - pops + pushes;

        match instruction {
            Instruction::Return | Instruction::Throw | Instruction::Rethrow => {}
            Instruction::Jump(target) => {
                check_target(member, offset, *target, len)?;
                work.push((*target, next_depth));
            }
            Instruction::BranchFalse(target) => {
                check_target(member, offset, *target, len)?;
                work.push((*target, next_depth));
                work.push((offset + 1, next_depth));
            }
            Instruction::StoreLocal(slot) | Instruction::LoadLocal(slot) => {
                if *slot >= body.local_count {
                    return Err(fail(offset, format!("local slot {slot} out of range")));
                }
                work.push((offset + 1, next_depth));
            }
            _ => work.push((offset + 1, next_depth)),
        }
    }
    Ok(())
}

fn check_target(member: &str, offset: u32, target: u32, len: u32) -> Result<(), VerifyError> {
    if target >= len {
        return Err(VerifyError {
            member: member.to_string(),
            offset,
            reason: format!("branch target {target} out of range"),
        });
    }
    Ok(())
}

/// Operand stack effect of one instruction as `(pops, pushes)`.
fn effect(instruction: &Instruction) -> (u32, u32) {
    match instruction {
        Instruction::PushConst(_) | Instruction::LoadLocal(_) | Instruction::LoadArg(_) => (0, 1),
        Instruction::StoreLocal(_) => (1, 0),
        Instruction::LoadField(_) => (1, 1),
        Instruction::StoreField(_) => (2, 0),
        Instruction::Call { argc, returns, .. } | Instruction::CallVirtual { argc, returns, .. } => {
            (*argc as u32 + 1, u32::from(*returns))
        }
        Instruction::New { argc, .. } => (*argc as u32, 1),
        Instruction::BoxValue
        | Instruction::Unbox(_)
        | Instruction::CastRef(_)
        | Instruction::ListLen => (1, 1),
        Instruction::Arith(_) | Instruction::Compare(_) => (2, 1),
        Instruction::MakeList(n) => (*n as u32, 1),
        Instruction::BranchFalse(_) | Instruction::Throw => (1, 0),
        Instruction::Jump(_) | Instruction::Rethrow => (0, 0),
        Instruction::Pop => (1, 0),
        Instruction::Dup => (1, 2),
        // Return accepts an empty stack (unit bodies push nothing).
        Instruction::Return => (0, 0),
    }
}
