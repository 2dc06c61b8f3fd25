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

//! Lazy-loading aspect tests against a counting in-memory session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_core::{
    AssemblyBuilder, RuntimeError, TypeAttributes, TypeDesc, TypeRegistry, Value,
};
use weft_weaver::{
    EntityMapping, LazyLoadAspect, Multiplicity, PropertyMapping, Session, WeaveConfig,
    WeavingManager,
};

/// Install the base entity: an id plus two mapped properties.
fn build_customer(registry: &Arc<TypeRegistry>) {
    let mut asm = AssemblyBuilder::new("crm", registry.clone());
    let mut tb = asm
        .create_type("Customer", None, TypeAttributes::default())
        .unwrap();
    tb.create_default_constructor().unwrap();
    tb.create_default_property("Id", TypeDesc::Int).unwrap();
    tb.create_default_property("Nickname", TypeDesc::Str).unwrap();
    tb.create_default_property("Tags", TypeDesc::List(Box::new(TypeDesc::Str)))
        .unwrap();
    asm.finish_type(tb);
    asm.finalize().unwrap();
}

fn mapping() -> EntityMapping {
    EntityMapping {
        entity: "Customer".into(),
        id_property: "Id".into(),
        properties: vec![
            PropertyMapping {
                name: "Nickname".into(),
                ty: TypeDesc::Str,
                holder_field: "_nickname_holder".into(),
                multiplicity: Multiplicity::Single,
            },
            PropertyMapping {
                name: "Tags".into(),
                ty: TypeDesc::List(Box::new(TypeDesc::Str)),
                holder_field: "_tags_holder".into(),
                multiplicity: Multiplicity::List,
            },
        ],
    }
}

/// Session that counts loads and serves canned values.
struct CountingSession {
    loads: AtomicUsize,
    tags: Vec<Value>,
}

impl CountingSession {
    fn new(tags: Vec<Value>) -> Arc<Self> {
        Arc::new(CountingSession {
            loads: AtomicUsize::new(0),
            tags,
        })
    }

    fn count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl Session for CountingSession {
    fn load_property(
        &self,
        entity: &str,
        property: &str,
        _key: &Value,
    ) -> Result<Value, RuntimeError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Str(format!("{entity}.{property}")))
    }

    fn load_list_property(
        &self,
        _entity: &str,
        _property: &str,
        _key: &Value,
    ) -> Result<Vec<Value>, RuntimeError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.tags.clone())
    }
}

fn manager_with(
    registry: &Arc<TypeRegistry>,
    session: Option<Arc<CountingSession>>,
) -> WeavingManager {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut mgr = WeavingManager::new(registry.clone(), WeaveConfig::default());
    let session = session.map(|s| s as Arc<dyn Session>);
    mgr.add_aspect(Box::new(LazyLoadAspect::new(mapping(), session)));
    mgr
}

#[test]
fn single_valued_property_loads_exactly_once() {
    let registry = Arc::new(TypeRegistry::new());
    build_customer(&registry);
    let session = CountingSession::new(vec![]);
    let mgr = manager_with(&registry, Some(session.clone()));

    let customer = mgr.create("Customer").unwrap();
    mgr.executor()
        .invoke_virtual(&customer, "set__Id", vec![Value::Int(7)])
        .unwrap();

    let first = mgr
        .executor()
        .invoke_virtual(&customer, "get__Nickname", vec![])
        .unwrap();
    assert_eq!(first, Value::Str("Customer.Nickname".into()));
    let second = mgr
        .executor()
        .invoke_virtual(&customer, "get__Nickname", vec![])
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(session.count(), 1);
}

#[test]
fn empty_collection_counts_as_loaded() {
    let registry = Arc::new(TypeRegistry::new());
    build_customer(&registry);
    let session = CountingSession::new(vec![]);
    let mgr = manager_with(&registry, Some(session.clone()));

    let customer = mgr.create("Customer").unwrap();
    let first = mgr
        .executor()
        .invoke_virtual(&customer, "get__Tags", vec![])
        .unwrap();
    assert_eq!(first, Value::List(vec![]));
    // Loaded-and-empty never re-triggers a fetch.
    let second = mgr
        .executor()
        .invoke_virtual(&customer, "get__Tags", vec![])
        .unwrap();
    assert_eq!(second, Value::List(vec![]));
    assert_eq!(session.count(), 1);
}

#[test]
fn populated_collection_is_cached() {
    let registry = Arc::new(TypeRegistry::new());
    build_customer(&registry);
    let session = CountingSession::new(vec![
        Value::Str("vip".into()),
        Value::Str("trade".into()),
    ]);
    let mgr = manager_with(&registry, Some(session.clone()));

    let customer = mgr.create("Customer").unwrap();
    let tags = mgr
        .executor()
        .invoke_virtual(&customer, "get__Tags", vec![])
        .unwrap();
    assert_eq!(
        tags,
        Value::List(vec![Value::Str("vip".into()), Value::Str("trade".into())])
    );
    mgr.executor()
        .invoke_virtual(&customer, "get__Tags", vec![])
        .unwrap();
    assert_eq!(session.count(), 1);
}

#[test]
fn setter_prefill_skips_the_load() {
    let registry = Arc::new(TypeRegistry::new());
    build_customer(&registry);
    let session = CountingSession::new(vec![]);
    let mgr = manager_with(&registry, Some(session.clone()));

    let customer = mgr.create("Customer").unwrap();
    mgr.executor()
        .invoke_virtual(
            &customer,
            "set__Nickname",
            vec![Value::Str("manual".into())],
        )
        .unwrap();
    let out = mgr
        .executor()
        .invoke_virtual(&customer, "get__Nickname", vec![])
        .unwrap();
    assert_eq!(out, Value::Str("manual".into()));
    assert_eq!(session.count(), 0);
}

#[test]
fn without_a_session_nothing_is_fetched() {
    let registry = Arc::new(TypeRegistry::new());
    build_customer(&registry);
    let mgr = manager_with(&registry, None);

    let customer = mgr.create("Customer").unwrap();
    let nickname = mgr
        .executor()
        .invoke_virtual(&customer, "get__Nickname", vec![])
        .unwrap();
    assert_eq!(nickname, Value::Null);
    // Collection reads still present an empty list rather than null.
    let tags = mgr
        .executor()
        .invoke_virtual(&customer, "get__Tags", vec![])
        .unwrap();
    assert_eq!(tags, Value::List(vec![]));
}
