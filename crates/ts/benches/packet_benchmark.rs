use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use ts::psi::PsiSection;
use ts::{packet, sync};

fn benchmark_packet_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("Packet Path");

    let ts_data = create_ts_data();

    group.bench_function("Resync", |b| {
        b.iter(|| sync::resync(black_box(&ts_data), 0))
    });

    group.bench_function("Header Dispatch", |b| {
        b.iter(|| {
            let mut payload_bytes = 0usize;
            for chunk in ts_data.chunks_exact(packet::PACKET_SIZE) {
                if packet::pid(chunk) != ts::PID_NULL {
                    payload_bytes += packet::payload(black_box(chunk)).len();
                }
            }
            payload_bytes
        })
    });

    let mut psi = PsiSection::new();
    group.bench_function("PSI Reassembly", |b| {
        b.iter(|| {
            for (i, chunk) in ts_data.chunks_exact(packet::PACKET_SIZE).enumerate() {
                if packet::pid(chunk) == 0 {
                    psi.feed(
                        packet::payload(chunk),
                        packet::unit_start(chunk),
                        i as u8 & 0x0f,
                    );
                }
            }
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_packet_path);
criterion_main!(benches);

fn create_ts_data() -> Vec<u8> {
    let mut ts_data = Vec::new();
    for i in 0..1000u32 {
        let mut packet = vec![0u8; 188];
        packet[0] = 0x47;
        // interleave PAT, one ES PID and null packets
        let pid: u16 = match i % 4 {
            0 => 0x0000,
            1 | 2 => 0x0100,
            _ => ts::PID_NULL,
        };
        packet[1] = (if i % 8 == 0 { 0x40 } else { 0x00 }) | (pid >> 8) as u8;
        packet[2] = pid as u8;
        packet[3] = 0x10 | (i as u8 & 0x0f);
        ts_data.extend_from_slice(&packet);
    }
    ts_data
}
