//! Performance benchmarks for subscription execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gql_subscriptions::{
    from_iter, parse, validate, Arguments, Context, FieldDef, ObjectDef, ObjectResolver, Resolved, ResolverError,
    Schema, Variables,
};
use serde_json::json;
use std::time::Duration;

struct Row(i64);

impl ObjectResolver for Row {
    fn resolve_field(&self, _ctx: &Context, field: &str, _args: &Arguments) -> Result<Resolved, ResolverError> {
        match field {
            "id" => Ok(Resolved::from(self.0)),
            "label" => Ok(Resolved::from(format!("row {}", self.0))),
            "slow" => {
                std::thread::sleep(Duration::from_micros(50));
                Ok(Resolved::from(self.0 * 2))
            }
            _ => Ok(Resolved::Null),
        }
    }
}

fn create_schema(parallelism: usize) -> Schema {
    Schema::builder()
        .object(ObjectDef::new("Query").field(FieldDef::new("ok", "Boolean")))
        .object(
            ObjectDef::new("Row")
                .field(FieldDef::new("id", "ID!"))
                .field(FieldDef::new("label", "String"))
                .field(FieldDef::new("slow", "Int")),
        )
        .object(
            ObjectDef::new("Subscription")
                .field(FieldDef::new("ticks", "Int!").argument("count", "Int!"))
                .field(FieldDef::new("rows", "[Row!]").argument("count", "Int!")),
        )
        .resolver_fn("ticks", |_, args| {
            let count = args.get_i64("count").unwrap_or(0);
            Ok(Some(from_iter(0..count)))
        })
        .resolver_fn("rows", |_, args| {
            let count = args.get_i64("count").unwrap_or(0);
            Ok(Some(from_iter((0..count).map(|n| {
                (0..8).map(|i| Resolved::object(Row(n * 8 + i))).collect::<Vec<_>>()
            }))))
        })
        .max_parallelism(parallelism)
        .build()
        .unwrap()
}

/// Benchmark raw event throughput with scalar payloads
fn bench_event_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_throughput");
    let schema = create_schema(1);

    for count in [10i64, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("events", count), &count, |b, &count| {
            let query = format!("subscription {{ ticks(count: {}) }}", count);
            b.iter(|| {
                let responses = schema.subscribe(&Context::background(), &query, "", Variables::new());
                black_box(responses.iter().count());
            });
        });
    }

    group.finish();
}

/// Benchmark rendering of object lists at different parallelism limits
fn bench_render_parallelism(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_parallelism");
    group.sample_size(20);

    for parallelism in [1usize, 4, 16] {
        let schema = create_schema(parallelism);
        group.bench_with_input(BenchmarkId::new("limit", parallelism), &schema, |b, schema| {
            b.iter(|| {
                let responses = schema.subscribe(
                    &Context::background(),
                    "subscription { rows(count: 4) { id label slow } }",
                    "",
                    Variables::new(),
                );
                black_box(responses.iter().count());
            });
        });
    }

    group.finish();
}

/// Benchmark parse and validation of a query with fragments and variables
fn bench_prepare(c: &mut Criterion) {
    let schema = create_schema(1);
    let query = r#"
        subscription Feed($count: Int!, $withLabel: Boolean = true) {
            rows(count: $count) { ...RowFields label @include(if: $withLabel) }
        }
        fragment RowFields on Row { id slow __typename }
    "#;

    c.bench_function("parse", |b| {
        b.iter(|| black_box(parse(black_box(query)).unwrap()));
    });

    let doc = parse(query).unwrap();
    c.bench_function("validate", |b| {
        b.iter(|| black_box(validate(&schema, &doc, 0)));
    });

    // Second and later calls hit the document cache.
    let vars = json!({"count": 1}).as_object().cloned().unwrap();
    c.bench_function("subscribe_cached", |b| {
        b.iter(|| {
            let responses = schema.subscribe(&Context::background(), query, "Feed", vars.clone());
            black_box(responses.iter().count());
        });
    });
}

criterion_group!(benches, bench_event_throughput, bench_render_parallelism, bench_prepare);
criterion_main!(benches);
