use std::hint::black_box;
use std::time::Instant;

use revlog_common::{ChangeType, EntityType};
use revlog_kernel::{HistoryQuery, SaveRequest, VersionHistoryManager};
use revlog_persist::Content;

fn make_manager(timelines: usize, versions: usize) -> VersionHistoryManager {
    let manager = VersionHistoryManager::new();
    for t in 0..timelines {
        for v in 0..versions {
            let request = SaveRequest::new(
                EntityType::File,
                format!("file-{t}"),
                format!("file-{t}"),
                ChangeType::Update,
                Content::text(format!("line {v}\n").repeat(20)),
            )
            .author(if v % 2 == 0 { "alice" } else { "bob" });
            if manager.save_version(request).is_err() {
                panic!("save failed while building bench fixture");
            }
        }
    }
    manager
}

fn bench_save(iterations: usize) {
    let manager = VersionHistoryManager::new();
    let start = Instant::now();
    for i in 0..iterations {
        let request = SaveRequest::new(
            EntityType::Config,
            "app",
            "app",
            ChangeType::Update,
            Content::text(format!("replicas: {i}\n")),
        );
        let _ = black_box(manager.save_version(black_box(request)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  save ({iterations} versions, one key): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_get_version(versions: usize, iterations: usize) {
    let manager = make_manager(1, versions);
    let start = Instant::now();
    for i in 0..iterations {
        let version = (i % versions) as u64 + 1;
        let _ = black_box(manager.get_version(EntityType::File, "file-0", black_box(Some(version))));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  get_version ({versions} versions, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_search(timelines: usize, versions: usize, iterations: usize) {
    let manager = make_manager(timelines, versions);
    let query = HistoryQuery::new().author("alice").text("update").limit(50);
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(manager.search_history(black_box(&query)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  search ({} entries, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}",
        timelines * versions
    );
}

fn bench_compare(versions: usize, iterations: usize) {
    let manager = make_manager(1, versions);
    let start = Instant::now();
    for i in 0..iterations {
        let b = (i % versions) as u64 + 1;
        let _ = black_box(manager.compare_versions(EntityType::File, "file-0", 1, black_box(b)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  compare ({versions} versions, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn main() {
    println!("=== History Benchmarks ===\n");

    println!("Save:");
    bench_save(1000);
    bench_save(10000);

    println!("\nVersion lookup (linear scan):");
    bench_get_version(100, 10000);
    bench_get_version(1000, 10000);

    println!("\nSearch (full scan):");
    bench_search(10, 100, 100);
    bench_search(100, 100, 10);

    println!("\nCompare:");
    bench_compare(100, 1000);

    println!("\n=== Done ===");
}
