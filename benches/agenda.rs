use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use noema::{
    schema::{derivation_content, DeriveTemplate},
    Agenda, Atom, AtomKind, AtomMeta, AttentionValue, Content, Engine, Item, ItemKind,
    TruthValue,
};

fn fact_meta() -> AtomMeta {
    AtomMeta::new(AtomKind::Fact, "bench", 0.9).unwrap()
}

fn query_item(priority: f32, label: &str) -> Item {
    let atom = Atom::new(Content::text(label), Vec::new(), fact_meta());
    Item::builder()
        .atom(atom.id)
        .kind(ItemKind::Query)
        .attention(AttentionValue::clamped(priority, 0.5))
        .build()
        .unwrap()
}

fn bench_agenda_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("agenda");
    group.throughput(Throughput::Elements(1024));
    group.bench_function("push_pop_1024", |b| {
        b.iter_custom(|iters| {
            // Fresh queue per sample so heap growth does not leak between samples.
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                let agenda = Agenda::new();
                let items: Vec<_> = (0..1024)
                    .map(|i| query_item((i % 100) as f32 / 100.0, &format!("q-{i}")))
                    .collect();

                let start = Instant::now();
                for item in items {
                    agenda.push(item);
                }
                while agenda.try_pop().is_some() {}
                total += start.elapsed();
            }
            total
        });
    });
    group.finish();
}

fn engine_with_schema_and_facts() -> (Engine, Item) {
    let engine = Engine::default();
    let content = derivation_content(
        ItemKind::Belief,
        Content::list(vec![Content::text("p"), Content::text("?x")]),
        ItemKind::Belief,
        Content::list(vec![Content::text("q"), Content::text("?x")]),
        DeriveTemplate {
            kind: ItemKind::Belief,
            content: Content::list(vec![Content::text("r"), Content::text("?x")]),
            label: None,
            attach_to_goal: false,
        },
    );
    let schema_meta = AtomMeta::new(AtomKind::Schema, "rules", 0.9).unwrap();
    engine
        .register_schema(Atom::new(content, Vec::new(), schema_meta))
        .unwrap();

    // One p(v0) probe, one matching q(v0), and 126 q distractors.
    let mut probe = None;
    for i in 0..128 {
        let (head, value) = match i {
            0 => ("p", "v0".to_string()),
            1 => ("q", "v0".to_string()),
            _ => ("q", format!("v{i}")),
        };
        let atom = engine
            .find_or_create_atom(
                Content::list(vec![Content::text(head), Content::text(value)]),
                Vec::new(),
                fact_meta(),
            )
            .unwrap();
        let item = engine
            .perceive(
                atom.id,
                ItemKind::Belief,
                Some(TruthValue::new(1.0, 0.8).unwrap()),
            )
            .unwrap();
        if i == 0 {
            probe = Some(item);
        }
    }
    (engine, probe.unwrap())
}

fn bench_matcher_application(c: &mut Criterion) {
    c.bench_function("matcher/find_and_apply_128_context", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                let (engine, probe) = engine_with_schema_and_facts();
                let context = engine.store().all_items().unwrap();

                let start = Instant::now();
                let derived = engine
                    .matcher()
                    .find_and_apply(&probe, &context, engine.store())
                    .unwrap();
                total += start.elapsed();
                assert_eq!(derived.len(), 1);
            }
            total
        });
    });
}

criterion_group!(benches, bench_agenda_push_pop, bench_matcher_application);
criterion_main!(benches);
