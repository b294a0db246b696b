//! Criterion benchmarks for the PadLink report codec.
//!
//! The encoder sits directly on the input-sampling path of the handheld
//! application, so it must stay far below the sub-100ms keepalive period.
//!
//! Run with:
//! ```bash
//! cargo bench --package padlink-core --bench report_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use padlink_core::{
    buttons, decode_report, encode_report, HatDirection, LogicalInputState, ReportVariant,
    TriggerPolicy,
};

fn busy_state() -> LogicalInputState {
    LogicalInputState {
        buttons: buttons::A | buttons::X | buttons::L1 | buttons::R3,
        lx: 12,
        ly: 243,
        rx: 127,
        ry: 90,
        l2: 200,
        r2: 15,
        hat: HatDirection::NorthEast,
    }
}

fn bench_encode(c: &mut Criterion) {
    let state = busy_state();
    let mut group = c.benchmark_group("encode");
    for variant in [
        ReportVariant::Compact,
        ReportVariant::Prefixed,
        ReportVariant::Extended,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{variant:?}")),
            &variant,
            |b, &variant| {
                b.iter(|| {
                    encode_report(black_box(&state), variant, TriggerPolicy::PreferAnalog)
                });
            },
        );
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let state = busy_state();
    let mut group = c.benchmark_group("decode");
    for variant in [
        ReportVariant::Compact,
        ReportVariant::Prefixed,
        ReportVariant::Extended,
    ] {
        let bytes = encode_report(&state, variant, TriggerPolicy::PreferAnalog);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{variant:?}")),
            &bytes,
            |b, bytes| {
                b.iter(|| decode_report(black_box(bytes)));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
