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
use crate::ir::assembler::BodyAssembler;
use crate::runtime::instruction::Instruction;
use crate::runtime::value::Constant;
use crate::types::{Callee, FieldRef, PropertyRef, TypeDesc};

/// Method-local variable slot with a unique, monotonic name.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSlot {
    pub slot: u16,
    pub name: String,
    pub ty: TypeDesc,
}

/// An addressable value source/sink participating in a synthesized body.
///
/// Locations are cheap handles; the owning method builder allocates the
/// underlying slots. Field and property locations do not push their own
/// receiver; the emitting operation pushes the owner immediately before
/// load/save.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Constant(Constant),
    Local(LocalSlot),
    /// Argument slot; slot 0 is the receiver on instance methods.
    Parameter { index: u16, ty: TypeDesc },
    /// The implicit receiver of the method being built.
    Receiver { ty: TypeDesc },
    Field {
        owner: Box<Location>,
        field: FieldRef,
    },
    Property {
        owner: Box<Location>,
        property: PropertyRef,
    },
}

impl Location {
    pub fn data_type(&self) -> TypeDesc {
        match self {
            Location::Constant(c) => c.data_type(),
            Location::Local(l) => l.ty.clone(),
            Location::Parameter { ty, .. } => ty.clone(),
            Location::Receiver { ty } => ty.clone(),
            Location::Field { field, .. } => field.ty.clone(),
            Location::Property { property, .. } => property.ty.clone(),
        }
    }

    /// Diagnostic name used by `describe`.
    pub fn name(&self) -> String {
        match self {
            Location::Constant(c) => format!("{c}"),
            Location::Local(l) => l.name.clone(),
            Location::Parameter { index, .. } => format!("arg{index}"),
            Location::Receiver { .. } => "this".to_string(),
            Location::Field { owner, field } => format!("{}.{}", owner.name(), field.name),
            Location::Property { owner, property } => {
                format!("{}.{}", owner.name(), property.name)
            }
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            Location::Constant(_) | Location::Receiver { .. } => false,
            Location::Property { property, .. } => property.setter.is_some(),
            _ => true,
        }
    }

    /// Emit instructions that push this location's current value.
    pub(crate) fn emit_load(&self, asm: &mut BodyAssembler) -> Result<(), SynthesisError> {
        match self {
            Location::Constant(c) => {
                asm.emit(Instruction::PushConst(c.clone()));
                Ok(())
            }
            Location::Local(l) => {
                asm.emit(Instruction::LoadLocal(l.slot));
                Ok(())
            }
            Location::Parameter { index, .. } => {
                asm.emit(Instruction::LoadArg(*index));
                Ok(())
            }
            Location::Receiver { .. } => {
                asm.emit(Instruction::LoadArg(0));
                Ok(())
            }
            Location::Field { owner, field } => {
                owner.emit_load(asm)?;
                asm.emit(Instruction::LoadField(field.slot));
                Ok(())
            }
            Location::Property { owner, property } => {
                let getter = property
                    .getter
                    .as_ref()
                    .ok_or_else(|| SynthesisError::PropertyNotReadable(property.name.clone()))?;
                owner.emit_load(asm)?;
                emit_call(asm, getter, 0);
                Ok(())
            }
        }
    }

    /// Emit instructions that store the value produced by `emit_value` into
    /// this location. The receiver (when any) is pushed first, then the
    /// value, then the store primitive.
    pub(crate) fn emit_save(
        &self,
        asm: &mut BodyAssembler,
        emit_value: impl FnOnce(&mut BodyAssembler) -> Result<(), SynthesisError>,
    ) -> Result<(), SynthesisError> {
        match self {
            Location::Constant(_) => Err(SynthesisError::SaveIntoConstant),
            Location::Receiver { .. } => Err(SynthesisError::SaveIntoReadOnly("this")),
            Location::Local(l) => {
                emit_value(asm)?;
                asm.emit(Instruction::StoreLocal(l.slot));
                Ok(())
            }
            Location::Parameter { .. } => {
                // Parameters are read-only in this IR.
                Err(SynthesisError::SaveIntoReadOnly("argument"))
            }
            Location::Field { owner, field } => {
                owner.emit_load(asm)?;
                emit_value(asm)?;
                asm.emit(Instruction::StoreField(field.slot));
                Ok(())
            }
            Location::Property { owner, property } => {
                let setter = property
                    .setter
                    .as_ref()
                    .ok_or_else(|| SynthesisError::PropertyNotWritable(property.name.clone()))?;
                owner.emit_load(asm)?;
                emit_value(asm)?;
                emit_call(asm, setter, 1);
                Ok(())
            }
        }
    }
}

/// Emit the call primitive for a resolved callee with `argc` arguments
/// already on the stack (below them, the receiver).
pub(crate) fn emit_call(asm: &mut BodyAssembler, callee: &Callee, argc: u8) {
    let returns = *callee.return_type() != TypeDesc::Unit;
    match callee {
        Callee::Direct { owner, index, .. } => {
            asm.emit(Instruction::Call {
                owner: owner.clone(),
                method: *index,
                argc,
                returns,
            });
        }
        Callee::Virtual { name, .. } => {
            asm.emit(Instruction::CallVirtual {
                name: name.clone(),
                argc,
                returns,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_not_writable() {
        let c = Location::Constant(Constant::Int(1));
        assert!(!c.is_writable());
        let mut asm = BodyAssembler::new();
        let err = c.emit_save(&mut asm, |_| Ok(())).unwrap_err();
        assert!(matches!(err, SynthesisError::SaveIntoConstant));
    }

    #[test]
    fn field_load_pushes_receiver_first() {
        let field = Location::Field {
            owner: Box::new(Location::Receiver {
                ty: TypeDesc::Object("Point".into()),
            }),
            field: FieldRef {
                owner: "Point".into(),
                name: "x".into(),
                slot: 0,
                ty: TypeDesc::Int,
            },
        };
        let mut asm = BodyAssembler::new();
        field.emit_load(&mut asm).unwrap();
        let (instructions, _) = asm.finish().unwrap();
        assert_eq!(
            instructions,
            vec![Instruction::LoadArg(0), Instruction::LoadField(0)]
        );
    }
}
