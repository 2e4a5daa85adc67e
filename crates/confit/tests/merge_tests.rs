//! Layered-document semantics: entry merge operations, ordering
//! directives, overrides and multiple inheritance across layers.

use confit::{
    config_eq, ConfigValue, ConfitError, DeclaredType, Engine, Item, PropertyDef, ScalarValue,
    SchemaDef,
};

// ===========================================================================
// Fixtures
// ===========================================================================

fn server_engine() -> Engine {
    let mut engine = Engine::new();
    engine
        .add_schema(
            SchemaDef::new("connection")
                .tag("connection")
                .property(PropertyDef::new("name").declared(DeclaredType::named("string")))
                .property(PropertyDef::new("port").declared(DeclaredType::named("int")))
                .property(PropertyDef::new("secure").declared(DeclaredType::named("boolean"))),
        )
        .unwrap();
    engine
        .add_schema(
            SchemaDef::new("server")
                .property(PropertyDef::new("host").declared(DeclaredType::named("string")))
                .property(
                    PropertyDef::new("connections")
                        .declared(DeclaredType::list_of(DeclaredType::schema("connection")))
                        .key_property("name"),
                ),
        )
        .unwrap();
    engine
}

fn entry_names(item: &Item) -> Vec<String> {
    item.value("connections")
        .unwrap()
        .as_list()
        .unwrap()
        .iter()
        .map(|entry| {
            entry
                .as_item()
                .unwrap()
                .value("name")
                .unwrap()
                .as_scalar()
                .and_then(|s| s.as_str().map(str::to_owned))
                .unwrap()
        })
        .collect()
}

fn entry(item: &Item, name: &str) -> Item {
    item.value("connections")
        .unwrap()
        .as_list()
        .unwrap()
        .iter()
        .map(|e| e.as_item().unwrap().clone())
        .find(|e| {
            e.value("name")
                .unwrap()
                .as_scalar()
                .and_then(|s| s.as_str().map(str::to_owned))
                .as_deref()
                == Some(name)
        })
        .unwrap()
}

// ===========================================================================
// Refinement over a base item
// ===========================================================================

#[test]
fn overlay_updates_entries_and_keeps_the_rest() {
    let engine = server_engine();
    let base = engine
        .parse(
            r#"<server host="db1">
                 <connection name="a" port="1" secure="true"/>
                 <connection name="b" port="2"/>
               </server>"#,
            "server",
        )
        .unwrap();

    let merged = engine
        .parse_over(
            r#"<server><connection name="a" port="9"/></server>"#,
            "server",
            &base,
        )
        .unwrap();

    // The updated entry keeps values the overlay did not touch.
    let a = entry(&merged, "a");
    assert!(config_eq(
        &a.value("port").unwrap(),
        &ConfigValue::from(ScalarValue::Int(9))
    ));
    assert!(config_eq(
        &a.value("secure").unwrap(),
        &ConfigValue::from(ScalarValue::Bool(true))
    ));
    // Untouched entries and scalars survive; the base is unmodified.
    assert_eq!(entry_names(&merged), vec!["a", "b"]);
    assert!(config_eq(
        &entry(&base, "a").value("port").unwrap(),
        &ConfigValue::from(ScalarValue::Int(1))
    ));
}

#[test]
fn merging_the_same_overlay_is_deterministic() {
    let engine = server_engine();
    let base = engine
        .parse(
            r#"<server><connection name="a"/><connection name="b"/></server>"#,
            "server",
        )
        .unwrap();
    let overlay = r#"<server host="x">
                       <connection name="b" cfg:op="remove"/>
                       <connection name="c" cfg:op="add" port="3"/>
                     </server>"#;

    let once = engine.parse_over(overlay, "server", &base).unwrap();
    let again = engine.parse_over(overlay, "server", &base).unwrap();
    assert!(config_eq(
        &ConfigValue::Item(once.clone()),
        &ConfigValue::Item(again)
    ));
    assert_eq!(entry_names(&once), vec!["a", "c"]);
}

#[test]
fn entry_operation_misuse_is_reported() {
    let engine = server_engine();
    let base = engine
        .parse(r#"<server><connection name="a"/></server>"#, "server")
        .unwrap();

    // Duplicate add.
    let err = engine
        .parse(
            r#"<server><connection name="x"/><connection name="x"/></server>"#,
            "server",
        )
        .unwrap_err();
    assert!(err.to_string().contains("duplicate entry key 'x'"));

    // Update of a key that does not exist.
    let err = engine
        .parse_over(
            r#"<server><connection name="ghost" cfg:op="update"/></server>"#,
            "server",
            &base,
        )
        .unwrap_err();
    assert!(err.to_string().contains("cannot update unknown entry"));

    // Remove of a key that does not exist.
    let err = engine
        .parse_over(
            r#"<server><connection name="ghost" cfg:op="remove"/></server>"#,
            "server",
            &base,
        )
        .unwrap_err();
    assert!(err.to_string().contains("cannot remove unknown entry"));
}

// ===========================================================================
// Ordering directives
// ===========================================================================

#[test]
fn positions_place_and_move_entries() {
    let engine = server_engine();
    let base = engine
        .parse(
            r#"<server>
                 <connection name="A"/>
                 <connection name="B"/>
                 <connection name="C"/>
               </server>"#,
            "server",
        )
        .unwrap();
    assert_eq!(entry_names(&base), vec!["A", "B", "C"]);

    // Updating B to sit before C, where it already sits, changes nothing.
    let unchanged = engine
        .parse_over(
            r#"<server><connection name="B" cfg:pos="before" cfg:anchor="C"/></server>"#,
            "server",
            &base,
        )
        .unwrap();
    assert_eq!(entry_names(&unchanged), vec!["A", "B", "C"]);

    // A new entry directly after its anchor.
    let inserted = engine
        .parse_over(
            r#"<server><connection name="D" cfg:op="add" cfg:pos="after" cfg:anchor="A"/></server>"#,
            "server",
            &base,
        )
        .unwrap();
    assert_eq!(entry_names(&inserted), vec!["A", "D", "B", "C"]);

    // Begin and end.
    let moved = engine
        .parse_over(
            r#"<server><connection name="C" cfg:pos="begin"/></server>"#,
            "server",
            &base,
        )
        .unwrap();
    assert_eq!(entry_names(&moved), vec!["C", "A", "B"]);
}

#[test]
fn position_misuse_is_reported() {
    let engine = server_engine();
    let base = engine
        .parse(r#"<server><connection name="a"/></server>"#, "server")
        .unwrap();

    // remove + position contradict each other.
    let err = engine
        .parse_over(
            r#"<server><connection name="a" cfg:op="remove" cfg:pos="begin"/></server>"#,
            "server",
            &base,
        )
        .unwrap_err();
    assert!(err.to_string().contains("cannot be combined"));

    // A positional anchor that does not exist.
    let err = engine
        .parse_over(
            r#"<server><connection name="n" cfg:op="add" cfg:pos="after" cfg:anchor="nope"/></server>"#,
            "server",
            &base,
        )
        .unwrap_err();
    assert!(err.to_string().contains("anchor"));
}

// ===========================================================================
// Override semantics
// ===========================================================================

#[test]
fn override_replaces_instead_of_merging() {
    let engine = server_engine();
    let base = engine
        .parse(
            r#"<server host="db1"><connection name="a" port="7"/></server>"#,
            "server",
        )
        .unwrap();

    // Entry-level override: the fresh definition drops base values.
    let entry_fresh = engine
        .parse_over(
            r#"<server><connection name="a" cfg:op="add-or-update" cfg:override="true"/></server>"#,
            "server",
            &base,
        )
        .unwrap();
    assert!(!entry(&entry_fresh, "a").value_set("port").unwrap());

    // Root-level override: the base item is ignored entirely.
    let root_fresh = engine
        .parse_over(r#"<server cfg:override="true"/>"#, "server", &base)
        .unwrap();
    assert!(!root_fresh.value_set("host").unwrap());
    assert!(!root_fresh.value_set("connections").unwrap());
}

// ===========================================================================
// Map properties
// ===========================================================================

#[test]
fn map_entries_merge_by_key() {
    let mut engine = Engine::new();
    engine
        .add_schema(
            SchemaDef::new("route")
                .tag("route")
                .property(PropertyDef::new("path").declared(DeclaredType::named("string")))
                .property(PropertyDef::new("target").declared(DeclaredType::named("string"))),
        )
        .unwrap();
    engine
        .add_schema(
            SchemaDef::new("router").property(
                PropertyDef::new("routes")
                    .declared(DeclaredType::map_of(DeclaredType::schema("route")))
                    .key_property("path"),
            ),
        )
        .unwrap();

    let base = engine
        .parse(
            r#"<router>
                 <route path="/a" target="one"/>
                 <route path="/b" target="two"/>
               </router>"#,
            "router",
        )
        .unwrap();
    let merged = engine
        .parse_over(
            r#"<router><route path="/b" target="elsewhere"/></router>"#,
            "router",
            &base,
        )
        .unwrap();

    let routes = merged.value("routes").unwrap();
    let routes = routes.as_map().unwrap();
    assert_eq!(routes.len(), 2);
    let b = routes[&confit::EntryKey::from("/b")].as_item().unwrap().clone();
    assert!(config_eq(
        &b.value("target").unwrap(),
        &ConfigValue::from(ScalarValue::from("elsewhere"))
    ));

    // Maps have no order to direct.
    let err = engine
        .parse_over(
            r#"<router><route path="/a" cfg:pos="begin"/></router>"#,
            "router",
            &base,
        )
        .unwrap_err();
    assert!(err.to_string().contains("no position"));
}

// ===========================================================================
// Inheritance
// ===========================================================================

#[test]
fn diamond_inheritance_collapses_to_one_property() {
    let mut engine = Engine::new();
    engine
        .add_schema(
            SchemaDef::new("component")
                .property(PropertyDef::new("name").declared(DeclaredType::named("string"))),
        )
        .unwrap();
    engine
        .add_schema(SchemaDef::new("left").extends("component"))
        .unwrap();
    engine
        .add_schema(SchemaDef::new("right").extends("component"))
        .unwrap();
    engine
        .add_schema(SchemaDef::new("both").extends("left").extends("right"))
        .unwrap();

    let descriptor = engine.resolve("both").unwrap();
    assert_eq!(descriptor.property_count(), 1);

    let item = engine.new_instance("both").unwrap();
    item.update("name", ConfigValue::from(ScalarValue::from("x")))
        .unwrap();
    assert!(config_eq(
        &item.value("name").unwrap(),
        &ConfigValue::from(ScalarValue::from("x"))
    ));
}

#[test]
fn conflicting_inherited_declarations_fail_the_build() {
    let mut engine = Engine::new();
    engine
        .add_schema(
            SchemaDef::new("as-text")
                .property(PropertyDef::new("limit").declared(DeclaredType::named("string"))),
        )
        .unwrap();
    engine
        .add_schema(
            SchemaDef::new("as-number")
                .property(PropertyDef::new("limit").declared(DeclaredType::named("int"))),
        )
        .unwrap();
    engine
        .add_schema(
            SchemaDef::new("torn")
                .extends("as-text")
                .extends("as-number"),
        )
        .unwrap();

    let err = engine.resolve("torn").unwrap_err();
    let ConfitError::BuildFailed { details, .. } = err else {
        panic!("expected BuildFailed, got {err}");
    };
    assert!(details.contains("conflicting"), "details: {details}");
}

#[test]
fn subtype_tags_and_concrete_markers_select_schemas() {
    let mut engine = Engine::new();
    engine
        .add_schema(
            SchemaDef::new("task")
                .abstract_schema()
                .property(PropertyDef::new("name").declared(DeclaredType::named("string"))),
        )
        .unwrap();
    engine
        .add_schema(
            SchemaDef::new("shell.task")
                .extends("task")
                .property(PropertyDef::new("command").declared(DeclaredType::named("string"))),
        )
        .unwrap();
    engine
        .add_schema(
            SchemaDef::new("plan").property(
                PropertyDef::new("tasks")
                    .declared(DeclaredType::list_of(DeclaredType::schema("task")))
                    .key_property("name")
                    .subtype_tag("shell", "shell.task"),
            ),
        )
        .unwrap();

    // Via the declared subtype tag.
    let plan = engine
        .parse(
            r#"<plan><shell name="build" command="make"/></plan>"#,
            "plan",
        )
        .unwrap();
    let tasks = plan.value("tasks").unwrap();
    let task = tasks.as_list().unwrap()[0].as_item().unwrap().clone();
    assert_eq!(task.descriptor().schema().as_str(), "shell.task");

    // Via an explicit concrete-type marker on the generic tag.
    let plan = engine
        .parse(
            r#"<plan><tasks cfg:impl="shell.task" name="test" command="make test"/></plan>"#,
            "plan",
        )
        .unwrap();
    let tasks = plan.value("tasks").unwrap();
    let task = tasks.as_list().unwrap()[0].as_item().unwrap().clone();
    assert_eq!(task.descriptor().schema().as_str(), "shell.task");

    // The abstract element schema itself cannot be instantiated.
    let err = engine
        .parse(r#"<plan><tasks name="broken"/></plan>"#, "plan")
        .unwrap_err();
    assert!(err.to_string().contains("abstract"));
}
