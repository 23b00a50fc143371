// Manifest and transfer codec benchmarks for cloudtier

use cloudtier::key::{EncodedKey, InternalKey, ValueType};
use cloudtier::manifest::{LocalFile, RemoteFile, VersionEdit};
use cloudtier::transfer::{decode_job, encode_job, CompactionJob};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

fn ikey(i: u64) -> EncodedKey {
    EncodedKey::from(&InternalKey::new(format!("key{:08}", i).into_bytes(), i, ValueType::Value))
}

fn build_edit(files: u64) -> VersionEdit {
    let mut edit = VersionEdit::new();
    edit.set_log_number(3);
    edit.set_next_file_number(files + 10);
    edit.set_last_sequence(files * 100);
    edit.set_next_remote_number(1_000_000 + files * 2);
    edit.set_cloud_compact_pointer(ikey(files));
    for i in 0..files {
        edit.delete_file(6, i + 1);
        edit.add_file(5, LocalFile::new(i + 1, 2 << 20, ikey(i * 2), ikey(i * 2 + 1)));
        edit.add_remote_file(RemoteFile::new(1_000_000 + files + i, 2 << 20, ikey(i * 2), ikey(i * 2 + 1)));
        edit.delete_remote_file(1_000_000 + i);
    }
    edit
}

fn benchmark_edit_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("edit_encode");

    for files in [1u64, 10, 100].iter() {
        let edit = build_edit(*files);
        group.throughput(Throughput::Elements(*files));
        group.bench_with_input(BenchmarkId::from_parameter(files), &edit, |b, edit| {
            b.iter(|| black_box(edit.encode()));
        });
    }

    group.finish();
}

fn benchmark_edit_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("edit_decode");

    for files in [1u64, 10, 100].iter() {
        let encoded = build_edit(*files).encode();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(files), &encoded, |b, encoded| {
            b.iter(|| black_box(VersionEdit::decode(encoded, 7).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_job_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_codec");

    for files in [1u64, 10, 100].iter() {
        let local: Vec<LocalFile> =
            (0..*files).map(|i| LocalFile::new(i + 1, 2 << 20, ikey(i), ikey(i + 1))).collect();
        let remote: Vec<RemoteFile> =
            (0..*files).map(|i| RemoteFile::new(1_000_000 + i, 2 << 20, ikey(i), ikey(i + 1))).collect();
        let job = CompactionJob::new(&local, &remote, 1_000_000 + files);
        let text = encode_job(&job);

        group.throughput(Throughput::Elements(files * 2));
        group.bench_with_input(BenchmarkId::new("encode", files), &job, |b, job| {
            b.iter(|| black_box(encode_job(job)));
        });
        group.bench_with_input(BenchmarkId::new("decode", files), &text, |b, text| {
            b.iter(|| black_box(decode_job(text).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_edit_encode, benchmark_edit_decode, benchmark_job_codec);
criterion_main!(benches);
