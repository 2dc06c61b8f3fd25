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
use crate::runtime::instruction::{ExceptionRegion, Instruction};

/// Forward-reference label handed out while a body is being lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelId(u32);

/// Append-only instruction sink with label patching.
///
/// Branch targets may name labels that are marked later; `finish` resolves
/// every patch once the whole body has been lowered.
pub struct BodyAssembler {
    instructions: Vec<Instruction>,
    labels: Vec<Option<u32>>,
    patches: Vec<(usize, LabelId)>,
    regions: Vec<ExceptionRegion>,
}

impl BodyAssembler {
    pub fn new() -> Self {
        BodyAssembler {
            instructions: Vec::new(),
            labels: Vec::new(),
            patches: Vec::new(),
            regions: Vec::new(),
        }
    }

    /// Offset the next emitted instruction will occupy.
    pub fn offset(&self) -> u32 {
        self.instructions.len() as u32
    }

    pub fn emit(&mut self, instruction: Instruction) -> u32 {
        let at = self.offset();
        self.instructions.push(instruction);
        at
    }

    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(None);
        id
    }

    /// Resolve `label` to the current offset.
    pub fn mark(&mut self, label: LabelId) {
        self.labels[label.0 as usize] = Some(self.offset());
    }

    pub fn emit_branch_false(&mut self, label: LabelId) {
        let at = self.emit(Instruction::BranchFalse(0));
        self.patches.push((at as usize, label));
    }

    pub fn emit_jump(&mut self, label: LabelId) {
        let at = self.emit(Instruction::Jump(0));
        self.patches.push((at as usize, label));
    }

    pub fn push_region(&mut self, region: ExceptionRegion) {
        self.regions.push(region);
    }

    /// Patch every recorded branch and hand back the finished stream.
    pub fn finish(self) -> Result<(Vec<Instruction>, Vec<ExceptionRegion>), SynthesisError> {
        let mut instructions = self.instructions;
        for (at, label) in self.patches {
            let target = self.labels[label.0 as usize]
                .ok_or(SynthesisError::UnresolvedLabel(label.0))?;
            match &mut instructions[at] {
                Instruction::BranchFalse(t) | Instruction::Jump(t) => *t = target,
                _ => return Err(SynthesisError::UnresolvedLabel(label.0)),
            }
        }
        Ok((instructions, self.regions))
    }
}

impl Default for BodyAssembler {
    fn default() -> Self {
        Self::new()
    }
}
