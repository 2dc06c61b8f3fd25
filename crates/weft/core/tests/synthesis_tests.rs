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

//! End-to-end synthesis tests: record IR through the builders, bake, then
//! execute the result.

use proptest::prelude::*;
use std::sync::Arc;
use weft_core::runtime::instruction::{ArithOp, CmpOp};
use weft_core::{
    AssemblyBuilder, AssemblyImage, Constant, Executor, RuntimeError, SynthesisError,
    TypeAttributes, TypeDesc, TypeRegistry, Value,
};

fn fresh() -> (Arc<TypeRegistry>, Executor) {
    let registry = Arc::new(TypeRegistry::new());
    let executor = Executor::new(registry.clone());
    (registry, executor)
}

#[test]
fn default_property_round_trips_through_accessors() {
    let (registry, exec) = fresh();
    let mut asm = AssemblyBuilder::new("people", registry.clone());
    let mut tb = asm
        .create_type("Person", None, TypeAttributes::default())
        .unwrap();
    tb.create_default_constructor().unwrap();
    tb.create_default_property("Name", TypeDesc::Str).unwrap();
    asm.finish_type(tb);
    asm.finalize().unwrap();

    let person = exec.instantiate("Person", vec![]).unwrap();
    exec.invoke_virtual(&person, "set__Name", vec![Value::Str("Ada".into())])
        .unwrap();
    let name = exec.invoke_virtual(&person, "get__Name", vec![]).unwrap();
    assert_eq!(name, Value::Str("Ada".into()));
    // The backing field holds the same value.
    assert_eq!(
        registry.get_field(&person, "_Name").unwrap(),
        Value::Str("Ada".into())
    );
}

#[test]
fn constructor_with_parameters_initializes_fields() {
    let (registry, exec) = fresh();
    let mut asm = AssemblyBuilder::new("geometry", registry.clone());
    let mut tb = asm
        .create_type("Point", None, TypeAttributes::default())
        .unwrap();
    let x = tb.create_field("x", TypeDesc::Int).unwrap();
    let y = tb.create_field("y", TypeDesc::Int).unwrap();
    let mut ctor = tb.create_constructor(vec![TypeDesc::Int, TypeDesc::Int]);
    let fx = ctor.field(ctor.receiver(), x);
    let p0 = ctor.param(0).unwrap();
    ctor.assign(fx, p0).unwrap();
    let fy = ctor.field(ctor.receiver(), y);
    let p1 = ctor.param(1).unwrap();
    ctor.assign(fy, p1).unwrap();
    tb.finish_method(ctor).unwrap();
    asm.finish_type(tb);
    asm.finalize().unwrap();

    let point = exec
        .instantiate("Point", vec![Value::Int(3), Value::Int(4)])
        .unwrap();
    assert_eq!(registry.get_field(&point, "x").unwrap(), Value::Int(3));
    assert_eq!(registry.get_field(&point, "y").unwrap(), Value::Int(4));
}

#[test]
fn while_loop_sums_the_first_n_integers() {
    let (registry, exec) = fresh();
    let mut asm = AssemblyBuilder::new("math", registry.clone());
    let mut tb = asm
        .create_type("Summer", None, TypeAttributes::default())
        .unwrap();
    tb.create_default_constructor().unwrap();

    let mut m = tb.create_method("sum_below", vec![TypeDesc::Int], TypeDesc::Int);
    let n = m.param(0).unwrap();
    let total = m.declare_local(TypeDesc::Int);
    m.assign(total.clone(), m.constant(Constant::Int(0))).unwrap();
    let i = m.declare_local(TypeDesc::Int);
    m.assign(i.clone(), m.constant(Constant::Int(0))).unwrap();
    let cond = m.compare(CmpOp::Lt, i.clone(), n.clone()).unwrap();
    m.while_(cond.clone());
    let new_total = m.arith(ArithOp::Add, total.clone(), i.clone()).unwrap();
    m.assign(total.clone(), new_total).unwrap();
    let next_i = m
        .arith(ArithOp::Add, i.clone(), m.constant(Constant::Int(1)))
        .unwrap();
    m.assign(i.clone(), next_i).unwrap();
    let again = m.compare(CmpOp::Lt, i.clone(), n).unwrap();
    m.assign(cond, again).unwrap();
    m.end_while().unwrap();
    m.return_(Some(total)).unwrap();
    tb.finish_method(m).unwrap();
    asm.finish_type(tb);
    asm.finalize().unwrap();

    let summer = exec.instantiate("Summer", vec![]).unwrap();
    let out = exec
        .invoke_virtual(&summer, "sum_below", vec![Value::Int(10)])
        .unwrap();
    assert_eq!(out, Value::Int(45));
}

#[test]
fn catch_receives_the_raised_value() {
    let (registry, exec) = fresh();
    let mut asm = AssemblyBuilder::new("faults", registry.clone());
    let mut tb = asm
        .create_type("Risky", None, TypeAttributes::default())
        .unwrap();
    tb.create_default_constructor().unwrap();

    let mut m = tb.create_method("run", vec![TypeDesc::Bool], TypeDesc::Str);
    m.try_();
    let flag = m.param(0).unwrap();
    m.if_(flag);
    m.throw_(m.constant(Constant::Str("boom".into())));
    m.end_if().unwrap();
    m.return_(Some(m.constant(Constant::Str("ok".into()))))
        .unwrap();
    let caught = m.catch_(Some(TypeDesc::Str)).unwrap();
    let message = m
        .arith(
            ArithOp::Add,
            m.constant(Constant::Str("caught:".into())),
            caught,
        )
        .unwrap();
    m.return_(Some(message)).unwrap();
    m.end_try().unwrap();
    tb.finish_method(m).unwrap();
    asm.finish_type(tb);
    asm.finalize().unwrap();

    let risky = exec.instantiate("Risky", vec![]).unwrap();
    let ok = exec
        .invoke_virtual(&risky, "run", vec![Value::Bool(false)])
        .unwrap();
    assert_eq!(ok, Value::Str("ok".into()));
    let caught = exec
        .invoke_virtual(&risky, "run", vec![Value::Bool(true)])
        .unwrap();
    assert_eq!(caught, Value::Str("caught:boom".into()));
}

#[test]
fn rethrow_propagates_the_original_value() {
    let (registry, exec) = fresh();
    let mut asm = AssemblyBuilder::new("faults", registry.clone());
    let mut tb = asm
        .create_type("PassThrough", None, TypeAttributes::default())
        .unwrap();
    tb.create_default_constructor().unwrap();

    let mut m = tb.create_method("run", vec![], TypeDesc::Unit);
    m.try_();
    m.throw_(m.constant(Constant::Str("original".into())));
    m.catch_(None).unwrap();
    m.rethrow().unwrap();
    m.end_try().unwrap();
    tb.finish_method(m).unwrap();
    asm.finish_type(tb);
    asm.finalize().unwrap();

    let obj = exec.instantiate("PassThrough", vec![]).unwrap();
    let err = exec.invoke_virtual(&obj, "run", vec![]).unwrap_err();
    match err {
        RuntimeError::Raised(Value::Str(s)) => assert_eq!(s, "original"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn derived_override_wins_virtual_dispatch() {
    let (registry, exec) = fresh();

    let mut base_asm = AssemblyBuilder::new("base", registry.clone());
    let mut base = base_asm
        .create_type("Animal", None, TypeAttributes::default())
        .unwrap();
    base.create_default_constructor().unwrap();
    let mut speak = base.create_method("speak", vec![], TypeDesc::Str);
    speak
        .return_(Some(speak.constant(Constant::Str("generic".into()))))
        .unwrap();
    base.finish_method(speak).unwrap();
    base_asm.finish_type(base);
    base_asm.finalize().unwrap();

    let animal = registry.get_by_name("Animal").unwrap();
    let slot = *animal.dispatch.get("speak").unwrap();
    let inherited = registry.method_def(slot).unwrap();

    let mut derived_asm = AssemblyBuilder::new("derived", registry.clone());
    let mut derived = derived_asm
        .create_type("Dog", Some("Animal"), TypeAttributes::default())
        .unwrap();
    derived.create_default_constructor().unwrap();
    let mut bark = derived.create_override(&inherited).unwrap();
    bark.return_(Some(bark.constant(Constant::Str("woof".into()))))
        .unwrap();
    derived.finish_method(bark).unwrap();
    derived_asm.finish_type(derived);
    derived_asm.finalize().unwrap();

    let dog = exec.instantiate("Dog", vec![]).unwrap();
    assert_eq!(
        exec.invoke_virtual(&dog, "speak", vec![]).unwrap(),
        Value::Str("woof".into())
    );
    // A direct call still reaches the base declaration.
    let animal_ty = registry.get_by_name("Animal").unwrap();
    assert_eq!(
        exec.invoke_direct(
            &animal_ty.name,
            slot.index,
            Value::Object(dog.clone()),
            vec![]
        )
        .unwrap(),
        Value::Str("generic".into())
    );
}

#[test]
fn image_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("math.weft");

    {
        let (registry, _) = fresh();
        let mut asm = AssemblyBuilder::new("math", registry.clone());
        let mut tb = asm
            .create_type("Doubler", None, TypeAttributes::default())
            .unwrap();
        tb.create_default_constructor().unwrap();
        let mut m = tb.create_method("double", vec![TypeDesc::Int], TypeDesc::Int);
        let v = m.param(0).unwrap();
        let two = m.constant(Constant::Int(2));
        let out = m.arith(ArithOp::Multiply, v, two).unwrap();
        m.return_(Some(out)).unwrap();
        tb.finish_method(m).unwrap();
        asm.finish_type(tb);
        let baked = asm.finalize().unwrap();
        baked.image.save(&path).unwrap();
    }

    let (registry, exec) = fresh();
    let image = AssemblyImage::load(&path).unwrap();
    image
        .install(&registry, &weft_core::NoHooks)
        .unwrap();
    let obj = exec.instantiate("Doubler", vec![]).unwrap();
    assert_eq!(
        exec.invoke_virtual(&obj, "double", vec![Value::Int(21)]).unwrap(),
        Value::Int(42)
    );
}

#[test]
fn corrupt_image_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.weft");
    std::fs::write(&path, b"NOPE....").unwrap();
    assert!(matches!(
        AssemblyImage::load(&path),
        Err(weft_core::ImageError::InvalidMagic)
    ));
}

#[test]
fn duplicate_type_names_are_rejected() {
    let (registry, _) = fresh();
    let asm = AssemblyBuilder::new("dup", registry);
    asm.create_type("Widget", None, TypeAttributes::default())
        .unwrap();
    let err = match asm.create_type("Widget", None, TypeAttributes::default()) {
        Ok(_) => panic!("duplicate type name was accepted"),
        Err(err) => err,
    };
    assert!(matches!(err, SynthesisError::DuplicateType(_)));
}

#[test]
fn describe_renders_the_recorded_body() {
    let (registry, _) = fresh();
    let asm = AssemblyBuilder::new("demo", registry);
    let tb = asm
        .create_type("Sample", None, TypeAttributes::default())
        .unwrap();
    let mut m = tb.create_method("guarded", vec![TypeDesc::Bool], TypeDesc::Unit);
    let flag = m.param(0).unwrap();
    m.if_(flag);
    m.return_(None).unwrap();
    m.end_if().unwrap();
    let text = m.describe();
    assert!(text.contains("if arg1"));
    assert!(text.contains("  return"));
    assert!(text.contains("end if"));
}

proptest! {
    #[test]
    fn widen_then_narrow_is_identity(n in any::<i64>()) {
        let (registry, exec) = fresh();
        let mut asm = AssemblyBuilder::new("boxing", registry.clone());
        let mut tb = asm
            .create_type("Boxer", None, TypeAttributes::default())
            .unwrap();
        tb.create_default_constructor().unwrap();
        let mut m = tb.create_method("trip", vec![TypeDesc::Int], TypeDesc::Int);
        let v = m.param(0).unwrap();
        let boxed = m.widen(v).unwrap();
        let back = m.narrow(boxed, TypeDesc::Int).unwrap();
        m.return_(Some(back)).unwrap();
        tb.finish_method(m).unwrap();
        asm.finish_type(tb);
        asm.finalize().unwrap();

        let obj = exec.instantiate("Boxer", vec![]).unwrap();
        let out = exec.invoke_virtual(&obj, "trip", vec![Value::Int(n)]).unwrap();
        prop_assert_eq!(out, Value::Int(n));
    }
}
