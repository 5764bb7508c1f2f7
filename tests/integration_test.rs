use docsql::prelude::*;
use docsql::{compile_update, compile_where, decode_row, encode_object, Dialect, MySqlDialect, Query, Statement};
use serde_json::{json, Map, Value};

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn widget_schema() -> ClassSchema {
    ClassSchema::with_default_fields("Widget")
        .field("name", FieldType::String)
        .field("count", FieldType::Number)
        .field("tags", FieldType::array_of(FieldType::String))
        .field("meta", FieldType::Object)
        .field("location", FieldType::GeoPoint)
        .field("owner", FieldType::pointer("_User"))
        .field("fans", FieldType::relation("_User"))
}

fn where_sql(query: Value) -> Result<String> {
    let compiled = compile_where(&widget_schema(), &Query::parse(&query)?, 1)?;
    let condition = compiled.condition().to_string();
    let statement = Statement::new(condition, compiled.params);
    MySqlDialect.render(&statement)
}

#[test]
fn test_compile_where_public_api() {
    assert_eq!(
        where_sql(json!({"name": "gear", "count": {"$gte": 2}})).unwrap(),
        "`name` = 'gear' AND `count` >= 2"
    );
    assert_eq!(where_sql(json!({})).unwrap(), "TRUE");
}

#[test]
fn test_empty_in_and_nin() {
    assert_eq!(where_sql(json!({"name": {"$in": []}})).unwrap(), "`name` IS NULL");
    assert_eq!(where_sql(json!({"name": {"$nin": []}})).unwrap(), "TRUE");
}

#[test]
fn test_unknown_field_rejected() {
    let err = where_sql(json!({"color": "red"})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownField);
    assert_eq!(where_sql(json!({"color": {"$exists": false}})).unwrap(), "TRUE");
}

#[test]
fn test_compile_update_public_api() {
    let schema = widget_schema();
    let update = object(json!({
        "count": {"__op": "Increment", "amount": 5},
        "fans": {"__op": "AddRelation", "objects": []}
    }));
    let clause = compile_update(&schema, &update, 1).unwrap();
    assert_eq!(clause.assignments, vec!["$1 = COALESCE($1, 0) + $2".to_string()]);
    assert_eq!(clause.params.len(), 2);
}

#[test]
fn test_unsupported_update() {
    let schema = widget_schema();
    let err = compile_update(&schema, &object(json!({"count": {"__op": "Frobnicate"}})), 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedUpdate);
}

#[test]
fn test_codec_round_trip() {
    let schema = widget_schema();
    let doc = object(json!({
        "objectId": "w1",
        "name": "gear",
        "count": 2,
        "tags": ["a", "b"],
        "owner": {"__type": "Pointer", "className": "_User", "objectId": "u1"}
    }));
    let encoded = encode_object(&schema, &doc).unwrap();
    assert_eq!(encoded.columns, vec!["objectId", "name", "count", "tags", "owner"]);

    // what MySQL hands back for that row
    let row = QueryRow::from(object(json!({
        "objectId": "w1",
        "name": "gear",
        "count": 2,
        "tags": ["a", "b"],
        "owner": "u1",
        "meta": null
    })));
    let decoded = decode_row(&schema, &row).unwrap();
    for (key, value) in &doc {
        assert_eq!(decoded.get(key), Some(value), "field {}", key);
    }
    assert_eq!(decoded.get("fans"), Some(&json!({"__type": "Relation", "className": "_User"})));
    assert!(!decoded.contains_key("meta"));
}

#[test]
fn test_invalid_nested_key() {
    let err = encode_object(&widget_schema(), &object(json!({"meta": {"a$b": 1}}))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidNestedKey);
}

#[test]
fn test_regex_literal_span() {
    let sql = where_sql(json!({"name": {"$regex": "^\\Qa.b\\E"}})).unwrap();
    assert_eq!(sql, "REGEXP_LIKE(`name`, '^a\\\\.b', 'c')");
}

#[cfg(feature = "mysql")]
mod mysql_tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn test_url() -> String {
        std::env::var("DOCSQL_TEST_URL").unwrap_or_else(|_| "mysql://root@localhost/docsql_test".to_string())
    }

    async fn fresh_adapter(class_name: &str) -> StorageAdapter<MySqlBackend> {
        init_tracing();
        let adapter = StorageAdapter::new(AdapterConfig::new(test_url()));
        adapter.ensure_registry_exists().await.unwrap();
        adapter.delete_class(class_name).await.unwrap();
        adapter
    }

    #[tokio::test]
    #[ignore] // Requires MySQL running
    async fn test_widget_scenario() {
        let adapter = fresh_adapter("Widget").await;
        let schema = ClassSchema::with_default_fields("Widget").field("name", FieldType::String);
        adapter.create_class("Widget", &schema).await.unwrap();

        let found = adapter
            .find("Widget", &schema, &Map::new(), &FindOptions::default())
            .await
            .unwrap();
        assert!(found.is_empty());

        let class = adapter.get_class("Widget").await.unwrap().unwrap();
        assert_eq!(class.field_type("name"), Some(&FieldType::String));
        assert!(class.field_type("_rperm").is_none());

        let err = adapter.create_class("Widget", &schema).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateClass);
        adapter.handle_shutdown().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires MySQL running
    async fn test_round_trip() {
        let adapter = fresh_adapter("RoundTrip").await;
        let schema = ClassSchema::with_default_fields("RoundTrip")
            .field("name", FieldType::String)
            .field("count", FieldType::Number)
            .field("done", FieldType::Boolean)
            .field("tags", FieldType::array())
            .field("meta", FieldType::Object)
            .field("where", FieldType::GeoPoint)
            .field("due", FieldType::Date)
            .field("owner", FieldType::pointer("_User"));
        adapter.create_class("RoundTrip", &schema).await.unwrap();

        let doc = object(json!({
            "objectId": "rt1",
            "name": "gear",
            "count": 3.5,
            "done": true,
            "tags": ["a", 1],
            "meta": {"nested": {"deep": true}},
            "where": {"__type": "GeoPoint", "latitude": 10.0, "longitude": 20.0},
            "due": {"__type": "Date", "iso": "2024-05-01T10:20:30.123Z"},
            "owner": {"__type": "Pointer", "className": "_User", "objectId": "u1"}
        }));
        adapter.create_object("RoundTrip", &schema, &doc).await.unwrap();

        let found = adapter
            .find("RoundTrip", &schema, &object(json!({"objectId": "rt1"})), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        for (key, value) in &doc {
            assert_eq!(found[0].get(key), Some(value), "field {}", key);
        }
        assert!(found[0].contains_key("createdAt"));
    }

    #[tokio::test]
    #[ignore] // Requires MySQL running
    async fn test_add_field_idempotence() {
        let adapter = fresh_adapter("AddField").await;
        let schema = ClassSchema::with_default_fields("AddField");
        adapter.create_class("AddField", &schema).await.unwrap();

        adapter.add_field_if_not_exists("AddField", "due", &FieldType::Date).await.unwrap();
        adapter.add_field_if_not_exists("AddField", "due", &FieldType::Date).await.unwrap();
        let err = adapter
            .add_field_if_not_exists("AddField", "due", &FieldType::String)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FieldAlreadyExists);

        let class = adapter.get_class("AddField").await.unwrap().unwrap();
        assert_eq!(class.field_type("due"), Some(&FieldType::Date));
    }

    #[tokio::test]
    #[ignore] // Requires MySQL running
    async fn test_duplicate_object_id() {
        let adapter = fresh_adapter("Dup").await;
        let schema = ClassSchema::with_default_fields("Dup");
        adapter.create_class("Dup", &schema).await.unwrap();

        let doc = object(json!({"objectId": "same"}));
        adapter.create_object("Dup", &schema, &doc).await.unwrap();
        let err = adapter.create_object("Dup", &schema, &doc).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateValue);
    }

    #[tokio::test]
    #[ignore] // Requires MySQL running
    async fn test_null_safe_increment() {
        let adapter = fresh_adapter("Counter").await;
        let schema = ClassSchema::with_default_fields("Counter").field("count", FieldType::Number);
        adapter.create_class("Counter", &schema).await.unwrap();
        adapter
            .create_object("Counter", &schema, &object(json!({"objectId": "c1"})))
            .await
            .unwrap();

        let updated = adapter
            .find_one_and_update(
                "Counter",
                &schema,
                &object(json!({"objectId": "c1"})),
                &object(json!({"count": {"__op": "Increment", "amount": 5}})),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.get("count").and_then(Value::as_f64), Some(5.0));
    }

    #[tokio::test]
    #[ignore] // Requires MySQL running
    async fn test_delete_by_empty_query() {
        let adapter = fresh_adapter("Doomed").await;
        let schema = ClassSchema::with_default_fields("Doomed");
        adapter.create_class("Doomed", &schema).await.unwrap();
        for id in ["d1", "d2", "d3"] {
            adapter
                .create_object("Doomed", &schema, &object(json!({"objectId": id})))
                .await
                .unwrap();
        }

        assert_eq!(adapter.delete_objects_by_query("Doomed", &schema, &Map::new()).await.unwrap(), 3);
        let err = adapter
            .delete_objects_by_query("Doomed", &schema, &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
    }

    #[tokio::test]
    #[ignore] // Requires MySQL running
    async fn test_empty_in_and_nin_against_rows() {
        let adapter = fresh_adapter("Sets").await;
        let schema = ClassSchema::with_default_fields("Sets").field("name", FieldType::String);
        adapter.create_class("Sets", &schema).await.unwrap();
        adapter
            .create_object("Sets", &schema, &object(json!({"objectId": "s1", "name": "x"})))
            .await
            .unwrap();

        let none = adapter
            .count("Sets", &schema, &object(json!({"name": {"$in": []}})))
            .await
            .unwrap();
        assert_eq!(none, 0);
        let all = adapter
            .count("Sets", &schema, &object(json!({"name": {"$nin": []}})))
            .await
            .unwrap();
        assert_eq!(all, 1);
    }

    #[tokio::test]
    #[ignore] // Requires MySQL running
    async fn test_regex_literal_and_max_distance() {
        let adapter = fresh_adapter("Places").await;
        let schema = ClassSchema::with_default_fields("Places")
            .field("name", FieldType::String)
            .field("where", FieldType::GeoPoint);
        adapter.create_class("Places", &schema).await.unwrap();
        for (id, name, lat) in [("p1", "a.b", 0.0), ("p2", "axb", 10.0)] {
            adapter
                .create_object(
                    "Places",
                    &schema,
                    &object(json!({
                        "objectId": id,
                        "name": name,
                        "where": {"__type": "GeoPoint", "latitude": lat, "longitude": 0.0}
                    })),
                )
                .await
                .unwrap();
        }

        let literal = adapter
            .find("Places", &schema, &object(json!({"name": {"$regex": "^\\Qa.b\\E$"}})), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(literal.len(), 1);

        // 0.1 radians is roughly 637 km: p1 only
        let near = adapter
            .find(
                "Places",
                &schema,
                &object(json!({"where": {
                    "$nearSphere": {"__type": "GeoPoint", "latitude": 0.0, "longitude": 0.0},
                    "$maxDistance": 0.1
                }})),
                &FindOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].get("objectId"), Some(&json!("p1")));
    }
}
