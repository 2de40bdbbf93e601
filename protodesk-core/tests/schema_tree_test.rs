use protodesk_core::grpc::codec::to_text;
use protodesk_core::schema::{Generation, SchemaError, SchemaSource, SchemaTree};
use serde_json::json;
use std::path::PathBuf;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn tree_of(files: &[&str]) -> SchemaTree {
    let entry_files: Vec<_> = files.iter().map(|f| fixtures().join(f)).collect();
    SchemaTree::from_files(&[fixtures()], &entry_files, Generation::next()).unwrap()
}

#[test]
fn test_tree_groups_services_by_file() {
    let tree = tree_of(&["greeter.proto"]);

    let nodes = tree.nodes();
    assert_eq!(nodes.len(), 1);

    let namespace = &nodes[0];
    assert_eq!(namespace.id, "greeter.proto");
    assert_eq!(namespace.label, "greeter.proto");
    assert!(!namespace.selectable);

    let service = &namespace.children[0];
    assert_eq!(service.id, "Greeter");
    assert!(!service.selectable);

    let method = &service.children[0];
    assert_eq!(method.id, "Greeter.SayHello");
    assert_eq!(method.label, "SayHello");
    assert!(method.selectable);
    assert!(method.children.is_empty());

    assert!(tree.contains_method("Greeter.SayHello"));
}

#[test]
fn test_services_are_sorted_and_methods_keep_declaration_order() {
    let tree = tree_of(&["catalog.proto"]);

    let namespace = &tree.nodes()[0];
    let services: Vec<_> = namespace.children.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(services, vec!["shop.Audit", "shop.Catalog"]);

    let catalog = &namespace.children[1];
    let methods: Vec<_> = catalog.children.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(methods, vec!["shop.Catalog.Put", "shop.Catalog.Watch"]);
}

#[test]
fn test_one_namespace_per_file() {
    let tree = tree_of(&["greeter.proto", "farewell.proto"]);

    let mut files: Vec<_> = tree.nodes().iter().map(|n| n.id.as_str()).collect();
    files.sort();
    assert_eq!(files, vec!["farewell.proto", "greeter.proto"]);
    assert_eq!(tree.method_ids().count(), 2);
}

#[test]
fn test_template_of_a_flat_message() {
    let tree = tree_of(&["greeter.proto"]);

    let template = tree.template("Greeter.SayHello").unwrap();

    assert_eq!(to_text(&template), "{\n    \"name\": \"\"\n}");
}

#[test]
fn test_template_of_a_nested_message() {
    let tree = tree_of(&["catalog.proto"]);

    let template = tree.template("shop.Catalog.Put").unwrap();

    assert_eq!(
        template,
        json!({
            "sku": "",
            "tags": [""],
            "prices": { "": { "currency": "", "units": 0, "rate": 0.0 } },
            "color": 0,
            "available": false,
            "thumbnail": "",
            "created_at": "1970-01-01T00:00:00Z",
            "percent": 0,
            "note": "",
            "parent": {},
            "labels": { "0": "" },
            "weight": 0.0
        })
    );

    // Keys follow declaration order, not alphabetical order.
    let keys: Vec<_> = template.as_object().unwrap().keys().cloned().collect();
    assert_eq!(
        keys,
        vec![
            "sku",
            "tags",
            "prices",
            "color",
            "available",
            "thumbnail",
            "created_at",
            "percent",
            "note",
            "parent",
            "labels",
            "weight"
        ]
    );
}

#[test]
fn test_template_uses_declared_defaults() {
    let tree = tree_of(&["legacy.proto"]);

    let template = tree.template("legacy.Config.Apply").unwrap();

    assert_eq!(
        template,
        json!({ "retries": 3, "mode": "fast", "verbose": false })
    );
}

#[test]
fn test_template_of_unknown_method() {
    let tree = tree_of(&["greeter.proto"]);

    let result = tree.template("Greeter.SayGoodbye");

    assert!(matches!(
        result,
        Err(SchemaError::UnknownMethodId(id)) if id == "Greeter.SayGoodbye"
    ));
}

#[test]
fn test_unresolvable_symbols_fail_compilation() {
    let result = SchemaTree::from_files(
        &[fixtures()],
        &[fixtures().join("broken.proto")],
        Generation::next(),
    );

    assert!(matches!(result, Err(SchemaError::CompileFailed(_))));
}

#[test]
fn test_missing_file_fails_compilation() {
    let result = SchemaTree::from_files(
        &[fixtures()],
        &[fixtures().join("does_not_exist.proto")],
        Generation::next(),
    );

    assert!(matches!(result, Err(SchemaError::CompileFailed(_))));
}

#[test]
fn test_tree_keeps_the_source_generation() {
    let greeter = fixtures().join("greeter.proto");
    let source = SchemaSource::static_files(vec![fixtures()], vec![greeter.clone()]);

    let tree = SchemaTree::from_files(&[fixtures()], &[greeter], source.generation()).unwrap();

    assert_eq!(tree.generation(), source.generation());
    assert_eq!(SchemaTree::empty().generation(), Generation::NONE);
}
