//! Item pipeline benchmarks: freeze on the way out, decode on the way in.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use itemwire::{
    ClientInfo, CryptoProvider, FreezeContext, Item, ManualClock, NoKeys, SerialFormat, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Serialize, Deserialize)]
struct Curve {
    name: String,
    tenors: Vec<String>,
    rates: Vec<f64>,
}

fn curve(points: usize) -> Curve {
    Curve {
        name: "AUD-BBSW".to_string(),
        tenors: (0..points).map(|i| format!("{}M", i + 1)).collect(),
        rates: (0..points).map(|i| 0.0425 + i as f64 * 0.0001).collect(),
    }
}

struct Env {
    crypto: Arc<dyn CryptoProvider>,
    clock: ManualClock,
    info: ClientInfo,
}

impl Env {
    fn new() -> Self {
        Self {
            crypto: Arc::new(NoKeys),
            clock: ManualClock::new(Timestamp(1_700_000_000_000_000)),
            info: ClientInfo::default(),
        }
    }

    fn frozen(&self, value: Curve, format: SerialFormat) -> Item {
        let mut item = Item::builder("Curve.AUD")
            .object(value)
            .serial_format(format)
            .build();
        item.freeze(&self.ctx()).unwrap();
        item
    }

    fn ctx(&self) -> FreezeContext<'_> {
        FreezeContext {
            crypto: &self.crypto,
            clock: &self.clock,
            client_info: &self.info,
            default_format: SerialFormat::Undefined,
        }
    }
}

const FORMATS: [(&str, SerialFormat); 3] = [
    ("schema", SerialFormat::Schema),
    ("json", SerialFormat::Json),
    ("binary", SerialFormat::Binary),
];

fn bench_freeze(c: &mut Criterion) {
    let env = Env::new();
    let mut group = c.benchmark_group("freeze");

    for points in [10, 1_000] {
        for (label, format) in FORMATS {
            let value = curve(points);
            group.bench_with_input(BenchmarkId::new(label, points), &value, |b, value| {
                b.iter(|| black_box(env.frozen(value.clone(), format)));
            });
        }
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let env = Env::new();
    let mut group = c.benchmark_group("decode");

    for points in [10, 1_000] {
        for (label, format) in FORMATS {
            let wire = env.frozen(curve(points), format).to_wire().unwrap();
            group.bench_with_input(BenchmarkId::new(label, points), &wire, |b, wire| {
                b.iter(|| {
                    let item = Item::from_wire(wire.clone(), Arc::clone(&env.crypto));
                    black_box(item.data::<Curve>().unwrap())
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_freeze, bench_decode);
criterion_main!(benches);
