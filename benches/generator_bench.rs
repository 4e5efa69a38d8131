use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::cell::Cell;
use std::rc::Rc;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use zip_pump::{
    ArchiveGenerator, CompressionMethod, EntrySource, GeneratorConfig, StreamingZipWriter,
};

fn generate_compressible_data(size: usize) -> Vec<u8> {
    let pattern = b"The quick brown fox jumps over the lazy dog. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}

fn generate_random_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state = 0x12345678u32;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Generate one archive and return the number of bytes delivered
fn generate(rt: &Runtime, files: Vec<(String, Vec<u8>)>, config: GeneratorConfig) -> u64 {
    let local = LocalSet::new();
    local.block_on(rt, async move {
        let generator = ArchiveGenerator::with_config(EntrySource::from_files(files), config)
            .unwrap();
        let delivered = Rc::new(Cell::new(0u64));
        let (tx, rx) = oneshot::channel();

        let counter = delivered.clone();
        generator.attach(
            move |chunk| counter.set(counter.get() + chunk.len() as u64),
            |err| panic!("archive failed: {err}"),
            move || {
                let _ = tx.send(());
            },
        );
        rx.await.unwrap();
        delivered.get()
    })
}

fn bench_buffer_capacity(c: &mut Criterion) {
    let rt = runtime();
    let size = 4 * 1024 * 1024;
    let data = generate_random_data(size);

    let mut group = c.benchmark_group("generator_buffer_capacity");
    group.throughput(Throughput::Bytes(size as u64));
    group.sample_size(10);

    for capacity in [1024, 8 * 1024, 64 * 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let config = GeneratorConfig::default()
                        .with_buffer_capacity(capacity)
                        .with_compression(CompressionMethod::Stored, 0);
                    let files = vec![("blob.bin".to_string(), data.clone())];
                    black_box(generate(&rt, files, config))
                });
            },
        );
    }

    group.finish();
}

fn bench_many_small_entries(c: &mut Criterion) {
    let rt = runtime();
    let body = generate_compressible_data(2 * 1024);
    let count = 200;

    let mut group = c.benchmark_group("generator_many_entries");
    group.throughput(Throughput::Elements(count as u64));
    group.sample_size(10);

    group.bench_function("deflate_200x2KB", |b| {
        b.iter(|| {
            let files: Vec<(String, Vec<u8>)> = (0..count)
                .map(|i| (format!("src/module_{i}.rs"), body.clone()))
                .collect();
            black_box(generate(&rt, files, GeneratorConfig::default()))
        });
    });

    group.finish();
}

fn bench_writer_direct(c: &mut Criterion) {
    let size = 4 * 1024 * 1024;
    let data = generate_compressible_data(size);

    let mut group = c.benchmark_group("writer_in_memory");
    group.throughput(Throughput::Bytes(size as u64));

    for level in [1u32, 6, 9] {
        group.bench_with_input(BenchmarkId::new("deflate", level), &level, |b, &level| {
            b.iter(|| {
                let mut writer =
                    StreamingZipWriter::with_method(Vec::new(), CompressionMethod::Deflate, level);
                writer.start_entry("test.bin").unwrap();
                writer.write_data(black_box(&data)).unwrap();
                black_box(writer.finish().unwrap().len())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_buffer_capacity,
    bench_many_small_entries,
    bench_writer_direct
);
criterion_main!(benches);
