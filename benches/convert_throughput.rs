use std::path::PathBuf;

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use csv_convert::{ConversionConfig, Converter, Record, Value, expr::Condition};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

fn generate_transactions(rows: usize) -> Vec<Record> {
    (0..rows)
        .map(|i| {
            let currency = match i % 4 {
                0 => "JPY",
                1 => "USD",
                2 => "GBP",
                _ => "EUR",
            };
            let product = if i % 3 == 0 { "D" } else { "L" };
            let face_value = if i % 2 == 0 { 1_000 * i as i64 } else { -500 * i as i64 };
            let day = (i % 28) + 1;
            [
                ("RECORD_TYPE", Value::from("TXN")),
                ("CONTRACT_REF_NO", Value::from(format!("CTR{i:06}"))),
                ("CURRENCY", Value::from(currency)),
                ("PRODUCT_TYPE", Value::from(product)),
                ("LEAF_GL", Value::from(format!("GL{:04}", i % 97))),
                ("FACE_VALUE", Value::Decimal(face_value.into())),
                ("VALUE_DATE", Value::from(format!("2024-03-{day:02}"))),
            ]
            .into_iter()
            .collect()
        })
        .collect()
}

fn bench_convert(c: &mut Criterion) {
    let config = ConversionConfig::load(
        &fixture("input_schema.yaml"),
        &fixture("output_schema.yaml"),
        &fixture("processing_rules.yaml"),
    )
    .expect("fixture configuration");
    let rows = 10_000;
    let records = generate_transactions(rows);

    let mut group = c.benchmark_group("convert");
    group.throughput(Throughput::Elements(rows as u64));
    group.bench_function("flex_pp_balance", |b| {
        b.iter_batched(
            || records.clone(),
            |batch| Converter::new(&config).convert(batch),
            BatchSize::LargeInput,
        )
    });
    group.finish();

    let condition = Condition::parse("CURRENCY == 'JPY' AND PRODUCT_TYPE IN ['D', 'G']")
        .expect("condition parses");
    c.bench_function("condition_evaluate", |b| {
        b.iter(|| records.iter().filter(|r| condition.evaluate(r)).count())
    });
}

criterion_group!(benches, bench_convert);
criterion_main!(benches);
