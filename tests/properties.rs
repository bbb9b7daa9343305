//! Property tests for parsing, normalization and event ordering.

use gql_subscriptions::testing::normalize_json;
use gql_subscriptions::{from_iter, parse, Context, FieldDef, ObjectDef, Schema, Variables};
use proptest::prelude::*;
use serde_json::{json, Value};

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z ]{0,8}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,4}", inner), 0..4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect())),
        ]
    })
}

fn arb_name() -> impl Strategy<Value = String> {
    "[a-z][a-zA-Z0-9_]{0,8}".prop_filter("keyword", |s| {
        !matches!(s.as_str(), "on" | "fragment" | "query" | "mutation" | "subscription" | "true" | "false" | "null")
    })
}

fn counter_schema() -> Schema {
    Schema::builder()
        .object(ObjectDef::new("Query").field(FieldDef::new("ok", "Boolean")))
        .object(ObjectDef::new("Subscription").field(FieldDef::new("values", "[Int!]!").argument("of", "[Int!]!")))
        .resolver_fn("values", |_, args| {
            let values: Vec<i64> = args.decode::<Of>().map(|of| of.of).unwrap_or_default();
            Ok(Some(from_iter(values.into_iter().map(|v| vec![v]))))
        })
        .build()
        .unwrap()
}

#[derive(serde::Deserialize)]
struct Of {
    of: Vec<i64>,
}

proptest! {
    #[test]
    fn test_parse_never_panics(input in "\\PC{0,64}") {
        let _ = parse(&input);
    }

    #[test]
    fn test_parse_accepts_aliased_root_field(alias in arb_name(), field in arb_name()) {
        let query = format!("subscription {{ {}: {} }}", alias, field);
        let doc = parse(&query).unwrap();
        prop_assert!(doc.operation("").is_ok());
    }

    #[test]
    fn test_normalize_is_idempotent(value in arb_json()) {
        let once = normalize_json(Some(&value.to_string())).unwrap();
        let twice = normalize_json(Some(&once)).unwrap();
        prop_assert_eq!(&once, &twice);
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        prop_assert_eq!(reparsed, value);
    }

    #[test]
    fn test_events_delivered_in_order(values in prop::collection::vec(any::<i32>(), 0..16)) {
        let schema = counter_schema();
        let vars = json!({"of": values}).as_object().cloned().unwrap_or_default();
        let got: Vec<Value> = schema
            .subscribe(&Context::background(), "subscription ($of: [Int!]!) { values(of: $of) }", "", vars)
            .iter()
            .map(|r| r.data_value().unwrap()["values"].clone())
            .collect();
        let want: Vec<Value> = values.iter().map(|v| json!([v])).collect();
        prop_assert_eq!(got, want);
    }
}

#[test]
fn test_empty_variables_accepted() {
    let schema = counter_schema();
    let got: Vec<_> = schema
        .subscribe(&Context::background(), "subscription { values(of: []) }", "", Variables::new())
        .iter()
        .collect();
    assert!(got.is_empty());
}
