//! Duplex engine benchmarks
//!
//! Run with: cargo bench --bench engine

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::io::{self, Cursor, Seek, SeekFrom, Write};

use aiff_duplex::codec::{read_container, ContainerWriter, SampleSource};
use aiff_duplex::engine::DuplexEngine;

const FRAMES: usize = 64;

/// Seekable sink that discards everything
#[derive(Default)]
struct NullSink {
    pos: u64,
    len: u64,
}

impl Write for NullSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pos += buf.len() as u64;
        self.len = self.len.max(self.pos);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for NullSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::End(d) => (self.len as i64 + d) as u64,
            SeekFrom::Current(d) => (self.pos as i64 + d) as u64,
        };
        Ok(self.pos)
    }
}

fn source(samples: usize) -> (i32, SampleSource<Cursor<Vec<u8>>>) {
    let mut writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
    let data: Vec<i32> = (0..samples as i32).collect();
    writer.append(&data).unwrap();
    let bytes = writer.into_inner().unwrap().into_inner();
    let (format, source) = read_container(Cursor::new(bytes)).unwrap().into_parts();
    (format.sample_count, source)
}

fn engine(samples: usize) -> DuplexEngine<NullSink, Cursor<Vec<u8>>> {
    let (count, source) = source(samples);
    let writer = ContainerWriter::create(NullSink::default()).unwrap();
    DuplexEngine::new(writer, source, count)
}

/// One callback period with both directions active
fn bench_duplex_callback(c: &mut Criterion) {
    let mut group = c.benchmark_group("duplex_callback");
    group.throughput(Throughput::Elements(FRAMES as u64));

    let input = vec![0x1234_5678; FRAMES];
    group.bench_function("capture_and_play", |b| {
        b.iter_batched_ref(
            || (engine(FRAMES), vec![0i32; FRAMES]),
            |(engine, out)| {
                black_box(engine.process(black_box(&input), out).unwrap());
            },
            BatchSize::SmallInput,
        )
    });

    let mut capture_only = engine(0);
    let mut out = vec![0i32; FRAMES];
    group.bench_function("capture_only", |b| {
        b.iter(|| black_box(capture_only.process(black_box(&input), &mut out).unwrap()))
    });

    group.finish();
}

/// Big-endian decode of one playback block
fn bench_sample_source(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_source");
    group.throughput(Throughput::Elements(FRAMES as u64));

    let (_, mut source) = source(FRAMES * 1024);
    let mut out = vec![0i32; FRAMES];
    group.bench_function("read_block", |b| {
        b.iter(|| {
            if source.remaining_samples() < FRAMES as u64 {
                source.seek_to_sample(0).unwrap();
            }
            black_box(source.read_samples(&mut out).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_duplex_callback, bench_sample_source);

criterion_main!(benches);
