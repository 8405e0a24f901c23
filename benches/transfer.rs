//! Benchmarks for the drag/drop transfer codec.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use crosswalk::model::Element;
use crosswalk::transfer::{self, TransferPayload};

fn sample() -> Element {
    Element {
        doc_identifier: "ATTACK".into(),
        element_type: "technique".into(),
        element_identifier: "T1204".into(),
        title: "User Execution".into(),
        text: "Adversaries may rely on a user opening a \"malicious\" file & running it (l'exécution)"
            .repeat(4),
    }
}

fn bench_encode(c: &mut Criterion) {
    let element = sample();
    c.bench_function("encode_element", |bench| {
        bench.iter(|| black_box(transfer::encode(black_box(&element))))
    });
}

fn bench_decode_current(c: &mut Criterion) {
    let element = sample();
    let payload = TransferPayload::grab(&element, 0);
    c.bench_function("decode_current", |bench| {
        bench.iter(|| black_box(transfer::decode(black_box(&payload), &[], "ATTACK").unwrap()))
    });
}

fn bench_decode_legacy(c: &mut Criterion) {
    let payload = TransferPayload::pasted(
        "\"{&quot;element_identifier&quot;:&quot;T1204&quot;,&quot;title&quot;:&quot;User Execution&quot;}\"",
    );
    c.bench_function("decode_legacy", |bench| {
        bench.iter(|| black_box(transfer::decode(black_box(&payload), &[], "ATTACK").unwrap()))
    });
}

criterion_group!(benches, bench_encode, bench_decode_current, bench_decode_legacy);
criterion_main!(benches);
