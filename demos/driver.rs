//! Standalone throughput driver: worker threads hammer one set with a
//! deterministic pseudo-random add/remove stream, then wall time and the
//! final element count are reported.
//!
//! Run with `cargo run --release --example driver`.

use rand::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use stripeset_rs::StripeSet;

const OPS_PER_THREAD: usize = 1_000_000;
const KEY_UNIVERSE: u64 = 1 << 20;

fn main() {
    let num_threads = num_cpus::get();
    println!("StripeSet throughput driver");
    println!("threads: {}", num_threads);
    println!("ops per thread: {}", OPS_PER_THREAD);
    println!("key universe: {}", KEY_UNIVERSE);
    println!();

    let set: Arc<StripeSet<u64>> = Arc::new(StripeSet::new());
    let barrier = Arc::new(Barrier::new(num_threads));

    let start = Instant::now();
    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let set = Arc::clone(&set);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(thread_id as u64);
                let mut inserted = 0usize;
                let mut removed = 0usize;

                barrier.wait();
                for _ in 0..OPS_PER_THREAD {
                    let v = rng.gen::<u64>() % KEY_UNIVERSE;
                    // 3:1 insert/remove mix keeps the table growing
                    if rng.gen::<u32>() % 4 != 0 {
                        if set.insert(v).expect("bucket progression exhausted") {
                            inserted += 1;
                        }
                    } else if set.remove(&v) {
                        removed += 1;
                    }
                }
                (inserted, removed)
            })
        })
        .collect();

    let mut inserted = 0usize;
    let mut removed = 0usize;
    for handle in handles {
        let (i, r) = handle.join().unwrap();
        inserted += i;
        removed += r;
    }
    let elapsed = start.elapsed();

    let total_ops = num_threads * OPS_PER_THREAD;
    println!("wall time: {:?}", elapsed);
    println!(
        "throughput: {:.0} ops/sec",
        total_ops as f64 / elapsed.as_secs_f64()
    );
    println!("effective inserts: {}", inserted);
    println!("effective removes: {}", removed);
    println!("final count: {}", set.len());
    println!("final bucket count: {}", set.bucket_count());

    assert_eq!(set.len(), inserted - removed);
    println!("count reconciles with per-thread tallies");
}
