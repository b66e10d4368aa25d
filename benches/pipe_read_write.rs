/* Pipe throughput through the sysio path, one process writing and reading
 * its own pipe in chunk-sized pieces. */

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use capposix::interface::{MemoryTerminal, Vfs, PIPE_BUFFER_SIZE};
use capposix::safeposix::dispatcher::System;
use capposix::safeposix::filesystem::RamFileSystem;
use capposix::safeposix::loader::ImageLoader;
use capposix::tools::register_builtins;

mod global_criterion_settings;

pub fn run_benchmark(c: &mut Criterion) {
    let vfs = Vfs::new();
    vfs.mount("/", RamFileSystem::new());
    let loader = ImageLoader::new();
    register_builtins(&loader);
    let system = System::init(vfs, loader, MemoryTerminal::new(80, 24));
    let entrypoint = system.loader().entrypoint("cat").unwrap();
    let mut session = system
        .attach_init(entrypoint, vec!["cat".to_string()], String::new())
        .unwrap();
    let (readfd, writefd) = session.pipe().unwrap();

    let mut group = c.benchmark_group("Pipe write+read");
    for size in [16usize, 256, 1024, PIPE_BUFFER_SIZE] {
        let buf = vec![b'A'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &buf, |b, buf| {
            b.iter(|| {
                let _ = session.write(writefd, buf);
                let _ = session.read(readfd, buf.len());
            })
        });
    }
    group.finish();

    session.process().exit(0);
    system.finalize();
}

criterion_group!(name=benches;
                 config=global_criterion_settings::get_criterion();
                 targets=run_benchmark);
criterion_main!(benches);
