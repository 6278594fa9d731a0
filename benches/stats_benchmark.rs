/*!
 * Interface Statistics Benchmarks
 * Scanner cost against reports of growing size
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use netns_sandbox::{scan_interface_stats, InterfaceStatistics};

const HEADER: &str = "Inter-|   Receive                                                |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n";

fn report(interfaces: usize) -> String {
    let mut data = String::from(HEADER);
    for i in 0..interfaces {
        data.push_str(&format!(
            "{:>8}: {:>9} {:>7}    0    0    0     0          0         0 {:>9} {:>7}    0    0    0     0       0          0\n",
            format!("veth{}", i),
            7787685 + i,
            11141 + i,
            1681390 + i,
            7220 + i
        ));
    }
    data
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_interface_stats");

    for size in [4usize, 64, 512] {
        let data = report(size);
        let last = format!("veth{}", size - 1);
        group.throughput(Throughput::Bytes(data.len() as u64));

        group.bench_with_input(BenchmarkId::new("first", size), &data, |b, data| {
            let mut stats = InterfaceStatistics::default();
            b.iter(|| scan_interface_stats(black_box(data), "veth0", &mut stats))
        });

        group.bench_with_input(BenchmarkId::new("last", size), &data, |b, data| {
            let mut stats = InterfaceStatistics::default();
            b.iter(|| scan_interface_stats(black_box(data), black_box(&last), &mut stats))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
