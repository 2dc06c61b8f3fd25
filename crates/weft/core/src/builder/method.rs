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
use crate::ir::location::{LocalSlot, Location};
use crate::ir::operation::{FlowState, Operation};
use crate::runtime::instruction::{ArithOp, BakedBody, CmpOp, Instruction};
use crate::runtime::registry::{MethodBody, MethodDef};
use crate::runtime::value::Constant;
use crate::types::{Callee, FieldRef, MemberKind, PropertyRef, TypeDesc};

/// Open structured region awaiting its closing operation.
enum OpenRegion {
    If,
    While,
    Try { has_catch: bool },
}

impl OpenRegion {
    fn label(&self) -> &'static str {
        match self {
            OpenRegion::If => "if",
            OpenRegion::While => "while",
            OpenRegion::Try { .. } => "try",
        }
    }
}

/// Records one method body as a sequence of validated operations.
///
/// The builder is the method's context: it hands out locations, allocates
/// result locals and tracks open regions. Every recording call validates its
/// usage rules immediately, so an `Err` points at the exact offending step.
/// `lower` runs only over sequences that already passed those checks.
pub struct MethodBuilder {
    owner: String,
    name: String,
    kind: MemberKind,
    params: Vec<TypeDesc>,
    return_type: TypeDesc,
    is_virtual: bool,
    is_final: bool,
    ops: Vec<Operation>,
    next_local: u16,
    open: Vec<OpenRegion>,
}

impl MethodBuilder {
    pub(crate) fn new(
        owner: String,
        name: String,
        kind: MemberKind,
        params: Vec<TypeDesc>,
        return_type: TypeDesc,
        is_virtual: bool,
    ) -> Self {
        MethodBuilder {
            owner,
            name,
            kind,
            params,
            return_type,
            is_virtual,
            is_final: false,
            ops: Vec::new(),
            next_local: 0,
            open: Vec::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &MemberKind {
        &self.kind
    }

    pub fn params(&self) -> &[TypeDesc] {
        &self.params
    }

    pub fn return_type(&self) -> &TypeDesc {
        &self.return_type
    }

    pub fn mark_final(&mut self) {
        self.is_final = true;
    }

    // --- location handles -------------------------------------------------

    pub fn constant(&self, value: Constant) -> Location {
        Location::Constant(value)
    }

    /// The implicit receiver of this method.
    pub fn receiver(&self) -> Location {
        Location::Receiver {
            ty: TypeDesc::Object(self.owner.clone()),
        }
    }

    /// Declared parameter `index` (zero-based, excluding the receiver).
    pub fn param(&self, index: usize) -> Result<Location, SynthesisError> {
        let ty = self
            .params
            .get(index)
            .cloned()
            .ok_or_else(|| SynthesisError::ParamOutOfRange {
                method: self.name.clone(),
                index: index as u16,
            })?;
        // Argument slot 0 is the receiver.
        Ok(Location::Parameter {
            index: (index + 1) as u16,
            ty,
        })
    }

    pub fn declare_local(&mut self, ty: TypeDesc) -> Location {
        Location::Local(self.fresh_local(ty))
    }

    pub fn field(&self, owner: Location, field: FieldRef) -> Location {
        Location::Field {
            owner: Box::new(owner),
            field,
        }
    }

    pub fn property(&self, owner: Location, property: PropertyRef) -> Location {
        Location::Property {
            owner: Box::new(owner),
            property,
        }
    }

    fn fresh_local(&mut self, ty: TypeDesc) -> LocalSlot {
        let slot = self.next_local;
        self.next_local += 1;
        LocalSlot {
            slot,
            name: format!("loc{slot}"),
            ty,
        }
    }

    // --- operations -------------------------------------------------------

    /// Store `value` into `target`, reconciling value and reference
    /// representations automatically.
    pub fn assign(&mut self, target: Location, value: Location) -> Result<(), SynthesisError> {
        match &target {
            Location::Constant(_) => return Err(SynthesisError::SaveIntoConstant),
            Location::Receiver { .. } => {
                return Err(SynthesisError::SaveIntoReadOnly("this"));
            }
            Location::Parameter { .. } => {
                return Err(SynthesisError::SaveIntoReadOnly("argument"));
            }
            Location::Property { property, .. } if property.setter.is_none() => {
                return Err(SynthesisError::PropertyNotWritable(property.name.clone()));
            }
            _ => {}
        }
        self.ops.push(Operation::Assign { target, value });
        Ok(())
    }

    /// Call `callee`, returning the location of its result for non-unit
    /// callees.
    pub fn invoke(
        &mut self,
        receiver: Option<Location>,
        callee: Callee,
        args: Vec<Location>,
    ) -> Result<Option<Location>, SynthesisError> {
        if args.len() != callee.params().len() {
            return Err(SynthesisError::ArityMismatch {
                name: callee.name().to_string(),
                expected: callee.params().len(),
                found: args.len(),
            });
        }
        let result = if *callee.return_type() == TypeDesc::Unit {
            None
        } else {
            Some(self.fresh_local(callee.return_type().clone()))
        };
        let loc = result.clone().map(Location::Local);
        self.ops.push(Operation::Invoke {
            receiver,
            callee,
            args,
            result,
        });
        Ok(loc)
    }

    /// Allocate a `type_name` instance and run its constructor at
    /// declaration index `ctor`.
    pub fn construct(&mut self, type_name: &str, ctor: u16, args: Vec<Location>) -> Location {
        let result = self.fresh_local(TypeDesc::Object(type_name.to_string()));
        let loc = Location::Local(result.clone());
        self.ops.push(Operation::Construct {
            type_name: type_name.to_string(),
            ctor,
            args,
            result,
        });
        loc
    }

    /// Box a value-typed location into a reference.
    pub fn widen(&mut self, source: Location) -> Result<Location, SynthesisError> {
        let ty = source.data_type();
        if !ty.is_value_type() {
            return Err(SynthesisError::WidenNonValue(ty));
        }
        let result = self.fresh_local(TypeDesc::Boxed);
        let loc = Location::Local(result.clone());
        self.ops.push(Operation::Widen { source, result });
        Ok(loc)
    }

    /// Unbox a reference-typed location back into value type `target`.
    pub fn narrow(&mut self, source: Location, target: TypeDesc) -> Result<Location, SynthesisError> {
        if !target.is_value_type() {
            return Err(SynthesisError::NarrowNonValue(target));
        }
        let src = source.data_type();
        if !src.is_reference_type() {
            return Err(SynthesisError::NarrowNonValue(src));
        }
        let result = self.fresh_local(target.clone());
        let loc = Location::Local(result.clone());
        self.ops.push(Operation::Narrow {
            source,
            target,
            result,
        });
        Ok(loc)
    }

    /// Checked reference conversion to `target`.
    pub fn cast(&mut self, source: Location, target: TypeDesc) -> Result<Location, SynthesisError> {
        if !matches!(target, TypeDesc::Object(_)) {
            return Err(SynthesisError::CastNonReference(target));
        }
        let result = self.fresh_local(target.clone());
        let loc = Location::Local(result.clone());
        self.ops.push(Operation::Cast {
            source,
            target,
            result,
        });
        Ok(loc)
    }

    pub fn arith(
        &mut self,
        op: ArithOp,
        lhs: Location,
        rhs: Location,
    ) -> Result<Location, SynthesisError> {
        let lhs_ty = lhs.data_type();
        let rhs_ty = rhs.data_type();
        let concat = op == ArithOp::Add && lhs_ty == TypeDesc::Str && rhs_ty == TypeDesc::Str;
        if !concat {
            for ty in [&lhs_ty, &rhs_ty] {
                if !matches!(ty, TypeDesc::Int | TypeDesc::Float) {
                    return Err(SynthesisError::NonNumericOperand(ty.clone()));
                }
            }
        }
        let result = self.fresh_local(lhs_ty);
        let loc = Location::Local(result.clone());
        self.ops.push(Operation::Arithmetic { op, lhs, rhs, result });
        Ok(loc)
    }

    pub fn compare(
        &mut self,
        op: CmpOp,
        lhs: Location,
        rhs: Location,
    ) -> Result<Location, SynthesisError> {
        if !matches!(op, CmpOp::Eq | CmpOp::Ne) {
            for loc in [&lhs, &rhs] {
                let ty = loc.data_type();
                if !matches!(ty, TypeDesc::Int | TypeDesc::Float | TypeDesc::Str) {
                    return Err(SynthesisError::NonNumericOperand(ty));
                }
            }
        }
        let result = self.fresh_local(TypeDesc::Bool);
        let loc = Location::Local(result.clone());
        self.ops.push(Operation::Compare { op, lhs, rhs, result });
        Ok(loc)
    }

    pub fn make_list(&mut self, item_ty: TypeDesc, items: Vec<Location>) -> Location {
        let result = self.fresh_local(TypeDesc::List(Box::new(item_ty)));
        let loc = Location::Local(result.clone());
        self.ops.push(Operation::MakeList { items, result });
        loc
    }

    pub fn list_len(&mut self, list: Location) -> Result<Location, SynthesisError> {
        let ty = list.data_type();
        if !matches!(ty, TypeDesc::List(_)) {
            return Err(SynthesisError::NonNumericOperand(ty));
        }
        let result = self.fresh_local(TypeDesc::Int);
        let loc = Location::Local(result.clone());
        self.ops.push(Operation::ListLen { list, result });
        Ok(loc)
    }

    // --- structured regions -----------------------------------------------

    pub fn if_(&mut self, cond: Location) {
        self.open.push(OpenRegion::If);
        self.ops.push(Operation::If { cond });
    }

    pub fn end_if(&mut self) -> Result<(), SynthesisError> {
        self.close_region("if")?;
        self.ops.push(Operation::EndIf);
        Ok(())
    }

    pub fn while_(&mut self, cond: Location) {
        self.open.push(OpenRegion::While);
        self.ops.push(Operation::While { cond });
    }

    pub fn end_while(&mut self) -> Result<(), SynthesisError> {
        self.close_region("while")?;
        self.ops.push(Operation::EndWhile);
        Ok(())
    }

    pub fn try_(&mut self) {
        self.open.push(OpenRegion::Try { has_catch: false });
        self.ops.push(Operation::Try);
    }

    /// Begin the handler of the innermost open try region. Returns the
    /// location holding the caught value.
    pub fn catch_(&mut self, filter: Option<TypeDesc>) -> Result<Location, SynthesisError> {
        match self.open.last_mut() {
            Some(OpenRegion::Try { has_catch: true }) => Err(SynthesisError::DuplicateCatch),
            Some(OpenRegion::Try { has_catch }) => {
                *has_catch = true;
                Ok(())
            }
            _ => Err(SynthesisError::CatchOutsideTry),
        }?;
        let caught_ty = filter.clone().unwrap_or(TypeDesc::Boxed);
        let caught = self.fresh_local(caught_ty);
        let loc = Location::Local(caught.clone());
        self.ops.push(Operation::Catch { filter, caught });
        Ok(loc)
    }

    pub fn end_try(&mut self) -> Result<(), SynthesisError> {
        match self.open.last() {
            Some(OpenRegion::Try { has_catch: true }) => {}
            Some(OpenRegion::Try { has_catch: false }) => {
                return Err(SynthesisError::TryWithoutCatch);
            }
            Some(other) => {
                return Err(SynthesisError::RegionMismatch {
                    expected: other.label(),
                    found: "try",
                });
            }
            None => return Err(SynthesisError::RegionNotOpen("try")),
        }
        self.open.pop();
        self.ops.push(Operation::EndTry);
        Ok(())
    }

    pub fn throw_(&mut self, value: Location) {
        self.ops.push(Operation::Throw { value });
    }

    /// Re-raise the value currently being handled. Valid only inside an open
    /// catch handler.
    pub fn rethrow(&mut self) -> Result<(), SynthesisError> {
        let in_handler = self
            .open
            .iter()
            .any(|r| matches!(r, OpenRegion::Try { has_catch: true }));
        if !in_handler {
            return Err(SynthesisError::RethrowOutsideCatch);
        }
        self.ops.push(Operation::Rethrow);
        Ok(())
    }

    pub fn return_(&mut self, value: Option<Location>) -> Result<(), SynthesisError> {
        match (&self.return_type, &value) {
            (TypeDesc::Unit, None) => {}
            (TypeDesc::Unit, Some(v)) => {
                return Err(SynthesisError::ReturnMismatch(v.data_type()));
            }
            (_, None) => return Err(SynthesisError::ReturnMismatch(TypeDesc::Unit)),
            (expected, Some(v)) => {
                let found = v.data_type();
                if !types_compatible(expected, &found) {
                    return Err(SynthesisError::ReturnMismatch(found));
                }
            }
        }
        self.ops.push(Operation::Return { value });
        Ok(())
    }

    fn close_region(&mut self, expected: &'static str) -> Result<(), SynthesisError> {
        match self.open.last() {
            Some(region) if region.label() == expected => {
                self.open.pop();
                Ok(())
            }
            Some(region) => Err(SynthesisError::RegionMismatch {
                expected: region.label(),
                found: expected,
            }),
            None => Err(SynthesisError::RegionNotOpen(expected)),
        }
    }

    // --- rendering and lowering -------------------------------------------

    /// Line-per-operation rendering of the recorded body.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let mut indent = 0usize;
        for op in &self.ops {
            if matches!(
                op,
                Operation::EndIf | Operation::EndWhile | Operation::EndTry | Operation::Catch { .. }
            ) {
                indent = indent.saturating_sub(1);
            }
            out.push_str(&"  ".repeat(indent));
            out.push_str(&op.describe());
            out.push('\n');
            if matches!(
                op,
                Operation::If { .. }
                    | Operation::While { .. }
                    | Operation::Try
                    | Operation::Catch { .. }
            ) {
                indent += 1;
            }
        }
        out
    }

    /// Flatten the recorded operations into a baked instruction stream.
    pub(crate) fn lower(&self) -> Result<BakedBody, SynthesisError> {
        if let Some(region) = self.open.last() {
            return Err(SynthesisError::RegionLeftOpen(region.label()));
        }
        let mut asm = BodyAssembler::new();
        let mut flow = FlowState::default();
        for op in &self.ops {
            op.lower(&mut asm, &mut flow)?;
        }
        // A unit method may simply run off its recorded steps.
        if self.return_type == TypeDesc::Unit {
            asm.emit(Instruction::Return);
        }
        let (instructions, regions) = asm.finish()?;
        Ok(BakedBody {
            instructions,
            local_count: self.next_local,
            regions,
        })
    }

    /// Lower and package this builder into an installable method definition.
    pub(crate) fn into_def(self) -> Result<MethodDef, SynthesisError> {
        let body = self.lower()?;
        Ok(MethodDef {
            name: self.name,
            kind: self.kind,
            params: self.params,
            return_type: self.return_type,
            is_virtual: self.is_virtual,
            is_final: self.is_final,
            body: MethodBody::Bytecode(body),
        })
    }
}

/// Loose static compatibility: exact match, boxed on either side, or both
/// references whose relationship is only known at run time.
fn types_compatible(expected: &TypeDesc, found: &TypeDesc) -> bool {
    if expected == found {
        return true;
    }
    match (expected, found) {
        (TypeDesc::Boxed, f) => f.is_reference_type() || f.is_value_type(),
        (_, TypeDesc::Boxed) => true,
        (TypeDesc::Object(_), TypeDesc::Object(_)) => true,
        (TypeDesc::List(_), TypeDesc::List(_)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(return_type: TypeDesc) -> MethodBuilder {
        MethodBuilder::new(
            "Sample".into(),
            "run".into(),
            MemberKind::Method,
            vec![TypeDesc::Int],
            return_type,
            true,
        )
    }

    #[test]
    fn mismatched_region_close_is_rejected() {
        let mut m = builder(TypeDesc::Unit);
        m.if_(m.constant(Constant::Bool(true)));
        m.while_(m.constant(Constant::Bool(true)));
        let err = m.end_if().unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::RegionMismatch {
                expected: "while",
                found: "if"
            }
        ));
    }

    #[test]
    fn receiver_and_arguments_are_read_only() {
        let mut m = builder(TypeDesc::Unit);
        let value = m.constant(Constant::Int(1));
        let this = m.receiver();
        let err = m.assign(this, value.clone()).unwrap_err();
        assert!(matches!(err, SynthesisError::SaveIntoReadOnly("this")));
        let arg = m.param(0).unwrap();
        let err = m.assign(arg, value).unwrap_err();
        assert!(matches!(err, SynthesisError::SaveIntoReadOnly("argument")));
    }

    #[test]
    fn open_region_blocks_lowering() {
        let mut m = builder(TypeDesc::Unit);
        m.if_(m.constant(Constant::Bool(true)));
        let err = m.lower().unwrap_err();
        assert!(matches!(err, SynthesisError::RegionLeftOpen("if")));
    }

    #[test]
    fn catch_requires_open_try() {
        let mut m = builder(TypeDesc::Unit);
        let err = m.catch_(None).unwrap_err();
        assert!(matches!(err, SynthesisError::CatchOutsideTry));
    }

    #[test]
    fn try_must_have_handler() {
        let mut m = builder(TypeDesc::Unit);
        m.try_();
        let err = m.end_try().unwrap_err();
        assert!(matches!(err, SynthesisError::TryWithoutCatch));
    }

    #[test]
    fn widen_rejects_reference_source() {
        let mut m = builder(TypeDesc::Unit);
        let s = m.constant(Constant::Str("x".into()));
        let err = m.widen(s).unwrap_err();
        assert!(matches!(err, SynthesisError::WidenNonValue(TypeDesc::Str)));
    }

    #[test]
    fn return_type_is_enforced() {
        let mut m = builder(TypeDesc::Int);
        let v = m.constant(Constant::Str("oops".into()));
        let err = m.return_(Some(v)).unwrap_err();
        assert!(matches!(err, SynthesisError::ReturnMismatch(TypeDesc::Str)));
    }

    #[test]
    fn unit_body_gets_implicit_return() {
        let mut m = builder(TypeDesc::Unit);
        let lhs = m.param(0).unwrap();
        let rhs = m.constant(Constant::Int(1));
        m.arith(ArithOp::Add, lhs, rhs).unwrap();
        let body = m.lower().unwrap();
        assert_eq!(body.instructions.last(), Some(&Instruction::Return));
        assert_eq!(body.local_count, 1);
    }

    #[test]
    fn describe_renders_nested_regions() {
        let mut m = builder(TypeDesc::Unit);
        m.if_(m.constant(Constant::Bool(true)));
        m.return_(None).unwrap();
        m.end_if().unwrap();
        let text = m.describe();
        assert!(text.contains("if true"));
        assert!(text.contains("  return"));
    }
}
