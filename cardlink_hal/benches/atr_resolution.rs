//! ATR resolution micro-benchmark.
//!
//! Measures `card_type_from_atr` on:
//! - an exact table hit
//! - a PC/SC storage ATR resolved through its card name code
//! - a contact ATR resolved to its generic family
//! - a malformed ATR

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use cardlink_hal::reader::{atr_protocol, card_type_from_atr};

const DESFIRE_EV1: [u8; 11] = [
    0x3B, 0x86, 0x80, 0x01, 0x06, 0x75, 0x77, 0x81, 0x02, 0x80, 0x00,
];
const MIFARE_MINI: [u8; 20] = [
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x26,
    0x00, 0x00, 0x00, 0x00, 0x45,
];
const CONTACT_T1: [u8; 10] = [0x3B, 0x92, 0x11, 0x81, 0x31, 0xFE, 0x45, 0x41, 0x42, 0x00];
const MALFORMED: [u8; 3] = [0x3B, 0x0F, 0x01];

fn bench_card_type(c: &mut Criterion) {
    let mut group = c.benchmark_group("card_type_from_atr");
    for (name, atr) in [
        ("exact", &DESFIRE_EV1[..]),
        ("pcsc_storage", &MIFARE_MINI[..]),
        ("generic_t1", &CONTACT_T1[..]),
        ("malformed", &MALFORMED[..]),
    ] {
        group.bench_function(name, |b| b.iter(|| card_type_from_atr(black_box(atr))));
    }
    group.finish();
}

fn bench_protocol(c: &mut Criterion) {
    c.bench_function("atr_protocol", |b| {
        b.iter(|| atr_protocol(black_box(&CONTACT_T1)))
    });
}

criterion_group!(benches, bench_card_type, bench_protocol);
criterion_main!(benches);
