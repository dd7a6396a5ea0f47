//! Benchmarks for the notification link state machine
//!
//! Run with: cargo bench

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use incident_notify::*;

fn connected_machine(capacity: usize) -> (LinkMachine, HandleId) {
    let mut machine = LinkMachine::new(LinkSettings {
        capacity,
        ..LinkSettings::default()
    });
    let effects = machine.handle(LinkEvent::Start(AuthSnapshot::with_token("bench")));
    let handle = effects
        .iter()
        .find_map(|e| match e {
            Effect::Open { handle, .. } => Some(*handle),
            _ => None,
        })
        .unwrap();
    machine.handle(LinkEvent::Opened { handle });
    (machine, handle)
}

fn bench_inbound(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound");
    let payload = r#"{"id":"n1","title":"Nueva incidencia","message":"Printer on fire","type":"INCIDENCIA_NUEVA","priority":"ALTA","incidentId":42}"#;

    for capacity in [50, 500] {
        group.throughput(Throughput::Elements(1));
        group.bench_function(format!("message_capacity_{}", capacity), |b| {
            let (mut machine, handle) = connected_machine(capacity);
            b.iter(|| {
                machine.handle(LinkEvent::Message {
                    handle,
                    payload: black_box(payload).to_string(),
                    received_at: Utc::now(),
                })
            })
        });
    }

    group.bench_function("malformed", |b| {
        let (mut machine, handle) = connected_machine(50);
        b.iter(|| {
            machine.handle(LinkEvent::Message {
                handle,
                payload: black_box("{not json").to_string(),
                received_at: Utc::now(),
            })
        })
    });

    group.finish();
}

fn bench_reconnect_cycle(c: &mut Criterion) {
    c.bench_function("drop_retry_open", |b| {
        let (mut machine, mut handle) = connected_machine(50);
        b.iter(|| {
            let effects = machine.handle(LinkEvent::Closed {
                handle,
                clean: false,
                code: Some(1006),
                reason: None,
            });
            let epoch = effects
                .iter()
                .find_map(|e| match e {
                    Effect::ScheduleRetry { epoch, .. } => Some(*epoch),
                    _ => None,
                })
                .unwrap();
            let effects = machine.handle(LinkEvent::RetryDue {
                epoch,
                auth: AuthSnapshot::with_token("bench"),
            });
            handle = effects
                .iter()
                .find_map(|e| match e {
                    Effect::Open { handle, .. } => Some(*handle),
                    _ => None,
                })
                .unwrap();
            machine.handle(LinkEvent::Opened { handle })
        })
    });
}

criterion_group!(benches, bench_inbound, bench_reconnect_cycle);
criterion_main!(benches);
