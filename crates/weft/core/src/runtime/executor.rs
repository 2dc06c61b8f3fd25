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

use crate::errors::RuntimeError;
use crate::runtime::instruction::{ArithOp, BakedBody, CmpOp, Instruction};
use crate::runtime::object::{self, ObjectRef};
use crate::runtime::registry::{MethodBody, MethodDef, MethodSlot, RuntimeType, TypeRegistry};
use crate::runtime::value::Value;
use crate::types::TypeDesc;
use std::sync::Arc;
use tracing::{debug, trace};

/// Control transfer produced by a single instruction.
enum Flow {
    Next,
    Jump(u32),
    Return(Value),
}

/// Frame-per-call interpreter over baked instruction streams.
///
/// The executor itself is stateless apart from its registry handle; any
/// number of executors may run concurrently over already-baked types.
pub struct Executor {
    registry: Arc<TypeRegistry>,
}

impl Executor {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Executor { registry }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Allocate an instance of `type_name` and run the matching constructor.
    ///
    /// A type with no constructors can only be instantiated without
    /// arguments.
    pub fn instantiate(&self, type_name: &str, args: Vec<Value>) -> Result<ObjectRef, RuntimeError> {
        let ty = self.registry.lookup(type_name)?;
        let obj = object::new_object(&ty);
        match ty.constructor(args.len()) {
            Some(index) => {
                self.call_slot(
                    MethodSlot { owner: ty.id, index },
                    Value::Object(obj.clone()),
                    args,
                )?;
            }
            None if args.is_empty() => {}
            None => {
                return Err(RuntimeError::NoConstructor {
                    ty: ty.name.clone(),
                    argc: args.len(),
                });
            }
        }
        Ok(obj)
    }

    /// Invoke a member through the receiver's dispatch table.
    pub fn invoke_virtual(
        &self,
        receiver: &ObjectRef,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let ty = self.registry.type_of(receiver)?;
        let slot = ty
            .dispatch
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownVirtualMember {
                ty: ty.name.clone(),
                name: name.to_string(),
            })?;
        self.call_slot(slot, Value::Object(receiver.clone()), args)
    }

    /// Invoke a method by declaring type and declaration index, bypassing
    /// virtual dispatch.
    pub fn invoke_direct(
        &self,
        owner: &str,
        index: u16,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let ty = self.registry.lookup(owner)?;
        self.call_slot(MethodSlot { owner: ty.id, index }, receiver, args)
    }

    fn call_slot(
        &self,
        slot: MethodSlot,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let ty = self
            .registry
            .get(slot.owner)
            .ok_or_else(|| RuntimeError::UnknownType(format!("{}", slot.owner)))?;
        let def = ty
            .method(slot.index)
            .ok_or(RuntimeError::UnknownMethod {
                ty: ty.name.clone(),
                index: slot.index,
            })?
            .clone();
        self.call_def(&ty, &def, receiver, args)
    }

    fn call_def(
        &self,
        ty: &RuntimeType,
        def: &MethodDef,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        trace!(target: "weft::exec", ty = %ty.name, method = %def.name, "invoke");
        match &def.body {
            MethodBody::Bytecode(body) => self.run_body(&ty.name, &def.name, body, receiver, args),
            MethodBody::Native(f) => f(receiver, args),
            MethodBody::HookSlot(name) => Err(RuntimeError::UnboundHookSlot(name.clone())),
        }
    }

    fn run_body(
        &self,
        ty_name: &str,
        method_name: &str,
        body: &BakedBody,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let mut frame_args = Vec::with_capacity(args.len() + 1);
        frame_args.push(receiver);
        frame_args.extend(args);

        let mut locals = vec![Value::Null; body.local_count as usize];
        let mut stack: Vec<Value> = Vec::new();
        let mut ip: usize = 0;
        let mut current_exception: Option<Value> = None;

        loop {
            if ip >= body.instructions.len() {
                return Err(RuntimeError::FellOffEnd(format!("{ty_name}::{method_name}")));
            }
            let result = self.step(
                &body.instructions[ip],
                &mut stack,
                &mut locals,
                &frame_args,
                current_exception.as_ref(),
            );
            match result {
                Ok(Flow::Next) => ip += 1,
                Ok(Flow::Jump(target)) => {
                    if target as usize > body.instructions.len() {
                        return Err(RuntimeError::InvalidJumpTarget(target));
                    }
                    ip = target as usize;
                }
                Ok(Flow::Return(value)) => return Ok(value),
                Err(RuntimeError::Raised(value)) => {
                    match self.find_handler(body, ip as u32, &value) {
                        Some(region) => {
                            debug!(
                                target: "weft::exec",
                                method = %method_name,
                                handler = region.handler_start,
                                "caught raised value"
                            );
                            stack.clear();
                            stack.push(value.clone());
                            current_exception = Some(value);
                            ip = region.handler_start as usize;
                        }
                        None => return Err(RuntimeError::Raised(value)),
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Innermost region protecting `ip` whose filter accepts `value`.
    fn find_handler<'a>(
        &self,
        body: &'a BakedBody,
        ip: u32,
        value: &Value,
    ) -> Option<&'a crate::runtime::instruction::ExceptionRegion> {
        body.regions
            .iter()
            .filter(|r| r.try_start <= ip && ip < r.try_end)
            .filter(|r| self.filter_matches(r.filter.as_ref(), value))
            .max_by_key(|r| r.try_start)
    }

    fn filter_matches(&self, filter: Option<&TypeDesc>, value: &Value) -> bool {
        let Some(filter) = filter else {
            return true;
        };
        match (filter, value) {
            (TypeDesc::Str, Value::Str(_)) => true,
            (TypeDesc::Int, Value::Int(_)) => true,
            (TypeDesc::Float, Value::Float(_)) => true,
            (TypeDesc::Bool, Value::Bool(_)) => true,
            (TypeDesc::List(_), Value::List(_)) => true,
            (TypeDesc::Boxed, _) => true,
            (TypeDesc::Object(name), Value::Object(obj)) => {
                self.registry.is_assignable(obj.read().type_id, name)
            }
            _ => false,
        }
    }

    fn step(
        &self,
        instruction: &Instruction,
        stack: &mut Vec<Value>,
        locals: &mut [Value],
        frame_args: &[Value],
        current_exception: Option<&Value>,
    ) -> Result<Flow, RuntimeError> {
        match instruction {
            Instruction::PushConst(c) => {
                stack.push(c.to_value());
                Ok(Flow::Next)
            }
            Instruction::LoadLocal(slot) => {
                let v = locals
                    .get(*slot as usize)
                    .cloned()
                    .ok_or(RuntimeError::ArgOutOfRange(*slot))?;
                stack.push(v);
                Ok(Flow::Next)
            }
            Instruction::StoreLocal(slot) => {
                let v = pop(stack)?;
                match locals.get_mut(*slot as usize) {
                    Some(l) => {
                        *l = v;
                        Ok(Flow::Next)
                    }
                    None => Err(RuntimeError::ArgOutOfRange(*slot)),
                }
            }
            Instruction::LoadArg(slot) => {
                let v = frame_args
                    .get(*slot as usize)
                    .cloned()
                    .ok_or(RuntimeError::ArgOutOfRange(*slot))?;
                stack.push(v);
                Ok(Flow::Next)
            }
            Instruction::LoadField(slot) => {
                let obj = pop_object(stack)?;
                let v = obj.read().get_field(*slot)?;
                stack.push(v);
                Ok(Flow::Next)
            }
            Instruction::StoreField(slot) => {
                let value = pop(stack)?;
                let obj = pop_object(stack)?;
                obj.write().set_field(*slot, value)?;
                Ok(Flow::Next)
            }
            Instruction::Call {
                owner,
                method,
                argc,
                returns,
            } => {
                let args = pop_n(stack, *argc as usize)?;
                let receiver = pop(stack)?;
                let ty = self.registry.lookup(owner)?;
                let def = ty
                    .method(*method)
                    .ok_or(RuntimeError::UnknownMethod {
                        ty: ty.name.clone(),
                        index: *method,
                    })?
                    .clone();
                let result = self.call_def(&ty, &def, receiver, args)?;
                if *returns {
                    stack.push(result);
                }
                Ok(Flow::Next)
            }
            Instruction::CallVirtual { name, argc, returns } => {
                let args = pop_n(stack, *argc as usize)?;
                let receiver = pop(stack)?;
                let Value::Object(obj) = &receiver else {
                    return Err(RuntimeError::NullReference);
                };
                let ty = self.registry.type_of(obj)?;
                let slot =
                    ty.dispatch
                        .get(name)
                        .copied()
                        .ok_or_else(|| RuntimeError::UnknownVirtualMember {
                            ty: ty.name.clone(),
                            name: name.clone(),
                        })?;
                let result = self.call_slot(slot, receiver, args)?;
                if *returns {
                    stack.push(result);
                }
                Ok(Flow::Next)
            }
            Instruction::New {
                type_name,
                ctor,
                argc,
            } => {
                let args = pop_n(stack, *argc as usize)?;
                let ty = self.registry.lookup(type_name)?;
                let obj = object::new_object(&ty);
                self.call_slot(
                    MethodSlot {
                        owner: ty.id,
                        index: *ctor,
                    },
                    Value::Object(obj.clone()),
                    args,
                )?;
                stack.push(Value::Object(obj));
                Ok(Flow::Next)
            }
            Instruction::BoxValue => {
                let v = pop(stack)?;
                stack.push(v.widened());
                Ok(Flow::Next)
            }
            Instruction::Unbox(ty) => {
                let v = pop(stack)?;
                let inner = match v {
                    Value::Boxed(inner) => *inner,
                    Value::Null => return Err(RuntimeError::NullReference),
                    other => other,
                };
                let ok = matches!(
                    (&inner, ty),
                    (Value::Int(_), TypeDesc::Int)
                        | (Value::Float(_), TypeDesc::Float)
                        | (Value::Bool(_), TypeDesc::Bool)
                );
                if !ok {
                    return Err(RuntimeError::UnboxMismatch {
                        expected: ty.clone(),
                        found: inner.kind_name().to_string(),
                    });
                }
                stack.push(inner);
                Ok(Flow::Next)
            }
            Instruction::CastRef(target) => {
                let v = pop(stack)?;
                match &v {
                    Value::Null => {}
                    Value::Object(obj) => {
                        let id = obj.read().type_id;
                        if !self.registry.is_assignable(id, target) {
                            let from = self
                                .registry
                                .get(id)
                                .map(|t| t.name.clone())
                                .unwrap_or_else(|| format!("{id}"));
                            return Err(RuntimeError::InvalidCast {
                                from,
                                to: target.clone(),
                            });
                        }
                    }
                    other => {
                        return Err(RuntimeError::InvalidCast {
                            from: other.kind_name().to_string(),
                            to: target.clone(),
                        });
                    }
                }
                stack.push(v);
                Ok(Flow::Next)
            }
            Instruction::Arith(op) => {
                let b = pop(stack)?;
                let a = pop(stack)?;
                stack.push(arith(*op, a, b)?);
                Ok(Flow::Next)
            }
            Instruction::Compare(op) => {
                let b = pop(stack)?;
                let a = pop(stack)?;
                stack.push(Value::Bool(compare(*op, &a, &b)?));
                Ok(Flow::Next)
            }
            Instruction::MakeList(n) => {
                let items = pop_n(stack, *n as usize)?;
                stack.push(Value::List(items));
                Ok(Flow::Next)
            }
            Instruction::ListLen => {
                let v = pop(stack)?;
                match v {
                    Value::List(items) => {
                        stack.push(Value::Int(items.len() as i64));
                        Ok(Flow::Next)
                    }
                    Value::Null => Err(RuntimeError::NullReference),
                    other => Err(RuntimeError::OperandMismatch {
                        expected: "list",
                        found: other.kind_name(),
                    }),
                }
            }
            Instruction::BranchFalse(target) => {
                let v = pop(stack)?;
                match v {
                    Value::Bool(true) => Ok(Flow::Next),
                    Value::Bool(false) => Ok(Flow::Jump(*target)),
                    other => Err(RuntimeError::OperandMismatch {
                        expected: "bool",
                        found: other.kind_name(),
                    }),
                }
            }
            Instruction::Jump(target) => Ok(Flow::Jump(*target)),
            Instruction::Throw => {
                let v = pop(stack)?;
                Err(RuntimeError::Raised(v))
            }
            Instruction::Rethrow => match current_exception {
                Some(v) => Err(RuntimeError::Raised(v.clone())),
                None => Err(RuntimeError::RethrowOutsideHandler),
            },
            Instruction::Pop => {
                pop(stack)?;
                Ok(Flow::Next)
            }
            Instruction::Dup => {
                let v = stack.last().cloned().ok_or(RuntimeError::StackUnderflow)?;
                stack.push(v);
                Ok(Flow::Next)
            }
            Instruction::Return => {
                let v = stack.pop().unwrap_or(Value::Null);
                Ok(Flow::Return(v))
            }
        }
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, RuntimeError> {
    stack.pop().ok_or(RuntimeError::StackUnderflow)
}

fn pop_object(stack: &mut Vec<Value>) -> Result<ObjectRef, RuntimeError> {
    match pop(stack)? {
        Value::Object(obj) => Ok(obj),
        Value::Null => Err(RuntimeError::NullReference),
        other => Err(RuntimeError::OperandMismatch {
            expected: "object",
            found: other.kind_name(),
        }),
    }
}

/// Pop `n` operands preserving push order (the returned vector's last
/// element was on top of the stack).
fn pop_n(stack: &mut Vec<Value>, n: usize) -> Result<Vec<Value>, RuntimeError> {
    if stack.len() < n {
        return Err(RuntimeError::StackUnderflow);
    }
    Ok(stack.split_off(stack.len() - n))
}

/// Coerce the right operand to the left operand's numeric kind.
fn coerce_rhs(a: &Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(_), Value::Float(f)) => Ok(Value::Int(f as i64)),
        (Value::Float(_), Value::Int(i)) => Ok(Value::Float(i as f64)),
        (_, other) => Ok(other),
    }
}

fn arith(op: ArithOp, a: Value, b: Value) -> Result<Value, RuntimeError> {
    let b = coerce_rhs(&a, b)?;
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => {
            if b == 0 && matches!(op, ArithOp::Divide | ArithOp::Modulus) {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(Value::Int(match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Subtract => a.wrapping_sub(b),
                ArithOp::Multiply => a.wrapping_mul(b),
                ArithOp::Divide => a / b,
                ArithOp::Modulus => a % b,
            }))
        }
        (Value::Float(a), Value::Float(b)) => {
            if b == 0.0 && matches!(op, ArithOp::Divide | ArithOp::Modulus) {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(Value::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Subtract => a - b,
                ArithOp::Multiply => a * b,
                ArithOp::Divide => a / b,
                ArithOp::Modulus => a % b,
            }))
        }
        (Value::Str(a), Value::Str(b)) if op == ArithOp::Add => Ok(Value::Str(a + &b)),
        (a, _) => Err(RuntimeError::OperandMismatch {
            expected: "numeric",
            found: a.kind_name(),
        }),
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    match op {
        CmpOp::Eq => Ok(a == b),
        CmpOp::Ne => Ok(a != b),
        _ => {
            let ordering = match (a, b) {
                (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
                (Value::Int(a), Value::Float(b)) => a.partial_cmp(&(*b as i64)),
                (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
                (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(RuntimeError::OperandMismatch {
                    expected: "comparable",
                    found: a.kind_name(),
                });
            };
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Eq | CmpOp::Ne => unreachable!(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::Constant;

    fn run(instructions: Vec<Instruction>, locals: u16) -> Result<Value, RuntimeError> {
        let registry = Arc::new(TypeRegistry::new());
        let executor = Executor::new(registry);
        let body = BakedBody {
            instructions,
            local_count: locals,
            regions: vec![],
        };
        executor.run_body("Test", "main", &body, Value::Null, vec![])
    }

    #[test]
    fn arithmetic_pops_two_pushes_one() {
        let result = run(
            vec![
                Instruction::PushConst(Constant::Int(10)),
                Instruction::PushConst(Constant::Int(4)),
                Instruction::Arith(ArithOp::Subtract),
                Instruction::Return,
            ],
            0,
        )
        .unwrap();
        assert_eq!(result, Value::Int(6));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let err = run(
            vec![
                Instruction::PushConst(Constant::Int(1)),
                Instruction::PushConst(Constant::Int(0)),
                Instruction::Arith(ArithOp::Divide),
                Instruction::Return,
            ],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::DivisionByZero));
    }

    #[test]
    fn string_concatenation_through_add() {
        let result = run(
            vec![
                Instruction::PushConst(Constant::Str("Hello".into())),
                Instruction::PushConst(Constant::Str(" World".into())),
                Instruction::Arith(ArithOp::Add),
                Instruction::Return,
            ],
            0,
        )
        .unwrap();
        assert_eq!(result, Value::Str("Hello World".into()));
    }

    #[test]
    fn right_operand_coerces_to_left_kind() {
        let result = run(
            vec![
                Instruction::PushConst(Constant::Int(7)),
                Instruction::PushConst(Constant::Float(2.9)),
                Instruction::Arith(ArithOp::Add),
                Instruction::Return,
            ],
            0,
        )
        .unwrap();
        assert_eq!(result, Value::Int(9));
    }

    #[test]
    fn branch_false_requires_bool() {
        let err = run(
            vec![
                Instruction::PushConst(Constant::Int(1)),
                Instruction::BranchFalse(0),
                Instruction::Return,
            ],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::OperandMismatch { .. }));
    }

    #[test]
    fn box_unbox_round_trip() {
        let result = run(
            vec![
                Instruction::PushConst(Constant::Int(123)),
                Instruction::BoxValue,
                Instruction::Unbox(TypeDesc::Int),
                Instruction::Return,
            ],
            0,
        )
        .unwrap();
        assert_eq!(result, Value::Int(123));
    }

    #[test]
    fn unbox_mismatch_names_kinds() {
        let err = run(
            vec![
                Instruction::PushConst(Constant::Int(1)),
                Instruction::BoxValue,
                Instruction::Unbox(TypeDesc::Bool),
                Instruction::Return,
            ],
            0,
        )
        .unwrap_err();
        match err {
            RuntimeError::UnboxMismatch { expected, found } => {
                assert_eq!(expected, TypeDesc::Bool);
                assert_eq!(found, "int");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn raised_value_without_handler_propagates() {
        let err = run(
            vec![
                Instruction::PushConst(Constant::Str("boom".into())),
                Instruction::Throw,
            ],
            0,
        )
        .unwrap_err();
        match err {
            RuntimeError::Raised(Value::Str(s)) => assert_eq!(s, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn handler_receives_caught_value() {
        let registry = Arc::new(TypeRegistry::new());
        let executor = Executor::new(registry);
        let body = BakedBody {
            // 0: push "boom"  1: throw  2: (handler) return caught
            instructions: vec![
                Instruction::PushConst(Constant::Str("boom".into())),
                Instruction::Throw,
                Instruction::Return,
            ],
            local_count: 1,
            regions: vec![crate::runtime::instruction::ExceptionRegion {
                try_start: 0,
                try_end: 2,
                handler_start: 2,
                handler_end: 3,
                filter: None,
                catch_slot: 0,
            }],
        };
        let result = executor
            .run_body("Test", "main", &body, Value::Null, vec![])
            .unwrap();
        assert_eq!(result, Value::Str("boom".into()));
    }
}
