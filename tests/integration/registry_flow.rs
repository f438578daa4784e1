//! Integration tests for the metadata registry overlay stack

use proptest::prelude::*;
use std::collections::BTreeMap;
use tirex_tracker::{
    clear_metadata_register, scoped_metadata, MetadataPath, MetadataRegistry, MetadataValue,
    TrackerError,
};

fn flat(pairs: &[(&str, &str)]) -> BTreeMap<String, MetadataValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), MetadataValue::from(*v)))
        .collect()
}

/// Walks the nested register/deregister sequence step by step
#[test]
fn test_lifo_sequence() {
    let registry = MetadataRegistry::new();

    registry.register([("k1", "v1"), ("k2", "v2")]).unwrap();
    assert_eq!(registry.snapshot(), flat(&[("k1", "v1"), ("k2", "v2")]));
    registry.register([("k2", "v3")]).unwrap();
    assert_eq!(registry.snapshot(), flat(&[("k1", "v1"), ("k2", "v3")]));
    registry.register([("k1", "v4"), ("k2", "v5")]).unwrap();
    assert_eq!(registry.snapshot(), flat(&[("k1", "v4"), ("k2", "v5")]));

    registry.deregister(["k1", "k2"]).unwrap();
    assert_eq!(registry.snapshot(), flat(&[("k1", "v1"), ("k2", "v3")]));
    registry.deregister(["k2"]).unwrap();
    assert_eq!(registry.snapshot(), flat(&[("k1", "v1"), ("k2", "v2")]));
    registry.deregister(["k1", "k2"]).unwrap();
    assert!(registry.snapshot().is_empty());
    assert_eq!(registry.depth(), 0);
}

/// A nested overlay only shadows the leaf it names
#[test]
fn test_path_key_isolation() {
    let registry = MetadataRegistry::new();
    registry
        .register([(
            "parent",
            MetadataValue::nested([("child1", "v1"), ("child2", "v2")]),
        )])
        .unwrap();
    registry.register([(["parent", "child1"], "v3")]).unwrap();

    let expected = BTreeMap::from([(
        "parent".to_string(),
        MetadataValue::nested([("child1", "v3"), ("child2", "v2")]),
    )]);
    assert_eq!(registry.snapshot(), expected);

    registry.deregister([["parent", "child1"]]).unwrap();
    assert_eq!(
        registry.get(["parent", "child1"]).and_then(|v| v.as_leaf().map(str::to_string)),
        Some("v1".to_string())
    );
}

/// Nested scoped registrations restore the outer facts as they close
#[test]
fn test_nested_scopes_restore() {
    let registry = MetadataRegistry::new();
    let outer = registry
        .scoped_register([("dataset", "msmarco"), ("split", "dev")])
        .unwrap();
    {
        let _inner = registry.scoped_register([("split", "test")]).unwrap();
        assert_eq!(registry.snapshot(), flat(&[("dataset", "msmarco"), ("split", "test")]));
    }
    assert_eq!(registry.snapshot(), flat(&[("dataset", "msmarco"), ("split", "dev")]));
    outer.close().unwrap();
    assert!(registry.snapshot().is_empty());
}

/// Closing an outer scope first is reported, and only its own overlay goes away
#[test]
fn test_out_of_order_close() {
    let registry = MetadataRegistry::new();
    let outer = registry.scoped_register([("a", "outer")]).unwrap();
    let inner = registry.scoped_register([("b", "inner")]).unwrap();

    assert!(matches!(outer.close(), Err(TrackerError::ScopeOrder(_))));
    assert_eq!(registry.snapshot(), flat(&[("b", "inner")]));
    inner.close().unwrap();
    assert!(registry.snapshot().is_empty());
}

/// Deregistering a path nobody registered leaves the stack untouched
#[test]
fn test_deregister_unknown_path() {
    let registry = MetadataRegistry::new();
    registry.register([("k1", "v1")]).unwrap();
    let err = registry.deregister(["k1", "missing"]).unwrap_err();
    assert!(matches!(err, TrackerError::KeyNotFound(_)));
    assert_eq!(registry.snapshot(), flat(&[("k1", "v1")]));
}

/// The free functions act on the process-wide registry
#[test]
fn test_global_scoped_metadata() {
    clear_metadata_register();
    {
        let _scope = scoped_metadata([(MetadataPath::dotted("method.name"), "bm25")]).unwrap();
        assert_eq!(
            MetadataRegistry::global()
                .get(MetadataPath::dotted("method.name"))
                .and_then(|v| v.as_leaf().map(str::to_string)),
            Some("bm25".to_string())
        );
    }
    assert!(MetadataRegistry::global().snapshot().is_empty());
}

const PATHS: &[&str] = &["k1", "k2", "k3", "parent.child1", "parent.child2", "deep.a.b"];

fn overlays() -> impl Strategy<Value = Vec<BTreeMap<&'static str, String>>> {
    prop::collection::vec(
        prop::collection::btree_map(prop::sample::select(PATHS), "[a-z]{1,4}", 1..4),
        1..6,
    )
}

proptest! {
    /// Every deregister restores the snapshot seen before its register
    #[test]
    fn prop_lifo_restores_snapshots(stack in overlays()) {
        let registry = MetadataRegistry::new();
        let mut before = Vec::new();
        for overlay in &stack {
            before.push(registry.snapshot());
            registry
                .register(overlay.iter().map(|(k, v)| (MetadataPath::dotted(k), v.clone())))
                .unwrap();
        }
        for overlay in stack.iter().rev() {
            registry.deregister(overlay.keys().map(|k| MetadataPath::dotted(k))).unwrap();
            prop_assert_eq!(registry.snapshot(), before.pop().unwrap());
        }
        prop_assert!(registry.snapshot().is_empty());
    }

    /// The newest registration of a path is the visible one
    #[test]
    fn prop_newest_wins(stack in overlays()) {
        let registry = MetadataRegistry::new();
        for overlay in &stack {
            registry
                .register(overlay.iter().map(|(k, v)| (MetadataPath::dotted(k), v.clone())))
                .unwrap();
        }
        for path in PATHS {
            let newest = stack.iter().rev().find_map(|o| o.get(path));
            let visible = registry
                .get(MetadataPath::dotted(path))
                .and_then(|v| v.as_leaf().map(str::to_string));
            prop_assert_eq!(visible.as_ref(), newest);
        }
    }
}
