use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flow_replay::events::{ElementInfo, InputSource, RawEvent, RawEventKind};
use flow_replay::transform::transform_events;

fn synthetic_log(events: usize) -> Vec<RawEvent> {
    (0..events)
        .map(|i| {
            let mut target = ElementInfo::for_tag("input");
            target.id = Some(format!("field-{}", i % 8));
            target.class_names = vec!["form-control".to_string(), format!("css-{:08x}", i)];
            RawEvent::new(
                i as i64 * 50,
                "https://app.example/form",
                RawEventKind::Input {
                    target,
                    value: format!("value {}", i),
                    previous_value: String::new(),
                    source: InputSource::Change,
                },
            )
        })
        .collect()
}

fn benchmark_transform(c: &mut Criterion) {
    let events = synthetic_log(1_000);
    c.bench_function("transform_and_merge_1000_events", |b| {
        b.iter(|| {
            let steps = transform_events(black_box(&events), None);
            assert!(!steps.is_empty());
        })
    });
}

criterion_group!(benches, benchmark_transform);
criterion_main!(benches);
