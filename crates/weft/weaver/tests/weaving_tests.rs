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

//! Lifecycle-weaving tests: hook short-circuit, result substitution,
//! exception observation, caching and image persistence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use weft_core::runtime::instruction::ArithOp;
use weft_core::{
    AssemblyBuilder, Constant, RuntimeError, TypeAttributes, TypeDesc, TypeRegistry, Value,
};
use weft_weaver::{Aspect, WeaveConfig, WeaveError, WeavingManager};

/// Install a small base type with a call counter, a throwing member and an
/// identity member.
fn build_service(registry: &Arc<TypeRegistry>) {
    let mut asm = AssemblyBuilder::new("svc", registry.clone());
    let mut tb = asm
        .create_type("Service", None, TypeAttributes::default())
        .unwrap();
    let calls = tb.create_field("calls", TypeDesc::Int).unwrap();
    tb.create_default_constructor().unwrap();

    let mut m = tb.create_method("work", vec![], TypeDesc::Str);
    let counter = m.field(m.receiver(), calls.clone());
    let bumped = m
        .arith(ArithOp::Add, counter.clone(), m.constant(Constant::Int(1)))
        .unwrap();
    m.assign(counter, bumped).unwrap();
    m.return_(Some(m.constant(Constant::Str("done".into()))))
        .unwrap();
    tb.finish_method(m).unwrap();

    let mut m = tb.create_method("explode", vec![], TypeDesc::Unit);
    m.throw_(m.constant(Constant::Str("kaboom".into())));
    tb.finish_method(m).unwrap();

    let mut m = tb.create_method("echo", vec![TypeDesc::Int], TypeDesc::Int);
    let p = m.param(0).unwrap();
    m.return_(Some(p)).unwrap();
    tb.finish_method(m).unwrap();

    asm.finish_type(tb);
    asm.finalize().unwrap();
}

fn manager(registry: &Arc<TypeRegistry>) -> WeavingManager {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    WeavingManager::new(registry.clone(), WeaveConfig::default())
}

#[test]
fn start_override_short_circuits_the_base() {
    let registry = Arc::new(TypeRegistry::new());
    build_service(&registry);
    let mgr = manager(&registry);
    mgr.hooks().on_start(Arc::new(|event| {
        (event.member == "work").then(|| Value::Str("hijacked".into()))
    }));

    let svc = mgr.create("Service").unwrap();
    let out = mgr.executor().invoke_virtual(&svc, "work", vec![]).unwrap();
    assert_eq!(out, Value::Str("hijacked".into()));
    // The base body never ran.
    assert_eq!(registry.get_field(&svc, "calls").unwrap(), Value::Int(0));
}

#[test]
fn end_override_substitutes_the_result() {
    let registry = Arc::new(TypeRegistry::new());
    build_service(&registry);
    let mgr = manager(&registry);
    let observed = Arc::new(Mutex::new(None));
    let sink = observed.clone();
    mgr.hooks().on_end(Arc::new(move |event| {
        if event.member != "work" {
            return None;
        }
        *sink.lock().unwrap() = event.result.clone();
        Some(Value::Str("patched".into()))
    }));

    let svc = mgr.create("Service").unwrap();
    let out = mgr.executor().invoke_virtual(&svc, "work", vec![]).unwrap();
    assert_eq!(out, Value::Str("patched".into()));
    // The base ran before the substitution and its result was observable.
    assert_eq!(registry.get_field(&svc, "calls").unwrap(), Value::Int(1));
    assert_eq!(*observed.lock().unwrap(), Some(Value::Str("done".into())));
}

#[test]
fn start_event_carries_a_widened_argument_snapshot() {
    let registry = Arc::new(TypeRegistry::new());
    build_service(&registry);
    let mgr = manager(&registry);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    mgr.hooks().on_start(Arc::new(move |event| {
        if event.member == "echo" {
            *sink.lock().unwrap() = event.args.clone();
        }
        None
    }));

    let svc = mgr.create("Service").unwrap();
    let out = mgr
        .executor()
        .invoke_virtual(&svc, "echo", vec![Value::Int(5)])
        .unwrap();
    assert_eq!(out, Value::Int(5));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::Boxed(Box::new(Value::Int(5)))]
    );
}

#[test]
fn exception_hook_fires_once_and_the_value_propagates() {
    let registry = Arc::new(TypeRegistry::new());
    build_service(&registry);
    let mgr = manager(&registry);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    mgr.hooks().on_exception(Arc::new(move |event| {
        assert_eq!(event.member, "explode");
        assert_eq!(event.exception, Some(Value::Str("kaboom".into())));
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let svc = mgr.create("Service").unwrap();
    let err = mgr
        .executor()
        .invoke_virtual(&svc, "explode", vec![])
        .unwrap_err();
    match err {
        RuntimeError::Raised(Value::Str(s)) => assert_eq!(s, "kaboom"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn synthesize_is_memoized() {
    let registry = Arc::new(TypeRegistry::new());
    build_service(&registry);
    let mgr = manager(&registry);
    let first = mgr.synthesize("Service").unwrap();
    let second = mgr.synthesize("Service").unwrap();
    assert_eq!(first, second);
}

#[test]
fn unknown_base_is_rejected() {
    let registry = Arc::new(TypeRegistry::new());
    let mgr = manager(&registry);
    assert!(matches!(
        mgr.synthesize("Ghost"),
        Err(WeaveError::UnknownBase(_))
    ));
}

#[test]
fn sealed_base_is_rejected() {
    let registry = Arc::new(TypeRegistry::new());
    let asm = AssemblyBuilder::new("sealed", registry.clone());
    let tb = asm
        .create_type("Locked", None, TypeAttributes { sealed: true })
        .unwrap();
    let mut asm = asm;
    asm.finish_type(tb);
    asm.finalize().unwrap();

    let mgr = manager(&registry);
    assert!(matches!(
        mgr.synthesize("Locked"),
        Err(WeaveError::SealedBase(_))
    ));
}

struct Audited;

impl Aspect for Audited {
    fn name(&self) -> &str {
        "audited"
    }

    fn required_capabilities(&self) -> Vec<String> {
        vec!["Auditable".to_string()]
    }
}

#[test]
fn aspect_capabilities_become_interfaces() {
    let registry = Arc::new(TypeRegistry::new());
    build_service(&registry);
    let mut mgr = manager(&registry);
    mgr.add_aspect(Box::new(Audited));

    let id = mgr.synthesize("Service").unwrap();
    assert!(registry.is_assignable(id, "Auditable"));
    assert!(registry.is_assignable(id, "Service"));
}

#[test]
fn stored_images_reload_without_regeneration() {
    let dir = tempfile::tempdir().unwrap();
    let config = WeaveConfig {
        output_dir: Some(dir.path().to_path_buf()),
        regenerate: true,
    };

    {
        let registry = Arc::new(TypeRegistry::new());
        build_service(&registry);
        let mgr = WeavingManager::new(registry, config.clone());
        mgr.synthesize("Service").unwrap();
    }

    let registry = Arc::new(TypeRegistry::new());
    build_service(&registry);
    let mgr = WeavingManager::new(
        registry.clone(),
        WeaveConfig {
            output_dir: config.output_dir.clone(),
            regenerate: false,
        },
    );
    mgr.hooks().on_start(Arc::new(|event| {
        (event.member == "work").then(|| Value::Str("from-image".into()))
    }));

    let svc = mgr.create("Service").unwrap();
    let out = mgr.executor().invoke_virtual(&svc, "work", vec![]).unwrap();
    assert_eq!(out, Value::Str("from-image".into()));

    // An unmapped base is a configuration error, never a silent rebuild.
    assert!(matches!(
        mgr.synthesize("Unmapped"),
        Err(WeaveError::NoMapping(_))
    ));
}

#[test]
fn regeneration_disabled_without_artifacts_is_fatal() {
    let registry = Arc::new(TypeRegistry::new());
    build_service(&registry);
    let mgr = WeavingManager::new(
        registry,
        WeaveConfig {
            output_dir: None,
            regenerate: false,
        },
    );
    assert!(matches!(
        mgr.synthesize("Service"),
        Err(WeaveError::MissingArtifact)
    ));
}
