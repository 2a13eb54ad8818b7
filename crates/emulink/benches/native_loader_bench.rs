use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use emulink::{
    Backend, BootstrapError, EmulatorConfig, EmulatorRuntime, EntryPoints, Loader, Visibility,
};

#[cfg(target_os = "linux")]
const LIBRARY: (&str, &str) = ("libm.so.6", "cos");
#[cfg(target_os = "macos")]
const LIBRARY: (&str, &str) = ("/usr/lib/libSystem.B.dylib", "strlen");
#[cfg(windows)]
const LIBRARY: (&str, &str) = ("kernel32.dll", "GetTickCount");
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
const LIBRARY: (&str, &str) = ("libc.so", "strlen");

fn native_only_loader() -> Loader {
    Loader::new(Arc::new(EmulatorRuntime::new(
        EmulatorConfig::default(),
        |_: &EmulatorConfig| -> Result<EntryPoints, BootstrapError> { Err(BootstrapError::Panicked) },
    )))
}

fn benchmark_native_paths(c: &mut Criterion) {
    let loader = native_only_loader();
    let (path, symbol) = LIBRARY;
    let mut group = c.benchmark_group("native_loader");

    group.bench_function("open_close", |b| {
        b.iter(|| {
            let handle = loader
                .open(black_box(path), Visibility::Local, Backend::Native)
                .expect("open system library");
            loader.close(handle).expect("close system library");
        });
    });

    let handle = loader
        .open(path, Visibility::Local, Backend::Native)
        .expect("open system library");
    group.bench_function("symbol_ptr", |b| {
        b.iter(|| black_box(loader.symbol_ptr(&handle, black_box(symbol))));
    });
    group.bench_function("symbol_missing", |b| {
        b.iter(|| black_box(loader.symbol_ptr(&handle, black_box("emulink_absent")).is_err()));
    });
    group.finish();
    loader.close(handle).expect("close system library");
}

criterion_group!(benches, benchmark_native_paths);
criterion_main!(benches);
