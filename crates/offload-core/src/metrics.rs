#![cfg(feature = "metrics")]

use once_cell::sync::Lazy;
use std::{
    collections::BTreeMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

/* ───────────── stage latencies ──────────────────────── */

static TIMES: Lazy<Mutex<Vec<(&'static str, u128)>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Call at the end of a stage: `record("upload", start);`
pub fn record(stage: &'static str, start: Instant) {
    let us = start.elapsed().as_micros();
    TIMES.lock().unwrap_or_else(PoisonError::into_inner).push((stage, us));
}

/* ───────────── buffer allocations ───────────────────── */

pub static ALLOCS: AtomicUsize = AtomicUsize::new(0);
pub static ALLOC_BYTES: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn count_allocation(bytes: usize) {
    ALLOCS.fetch_add(1, Ordering::Relaxed);
    ALLOC_BYTES.fetch_add(bytes, Ordering::Relaxed);
}

/// Mean and p95 per stage, in microseconds, draining what was recorded.
pub fn take_stats() -> BTreeMap<&'static str, (u128, u128)> {
    let mut grouped: BTreeMap<&'static str, Vec<u128>> = BTreeMap::new();
    {
        let mut times = TIMES.lock().unwrap_or_else(PoisonError::into_inner);
        for (stage, us) in times.drain(..) {
            grouped.entry(stage).or_default().push(us);
        }
    }
    grouped
        .into_iter()
        .map(|(stage, mut v)| {
            v.sort_unstable();
            let mean = v.iter().sum::<u128>() / v.len() as u128;
            let p95 = v[((v.len() * 95) / 100).saturating_sub(1)];
            (stage, (mean, p95))
        })
        .collect()
}

/* ───────────── summary ──────────────────────────────── */

/// Print at program end, after the run.
pub fn summary() {
    eprintln!("── metrics summary ──");
    for (stage, (mean, p95)) in take_stats() {
        eprintln!("{stage:<10} mean={mean:>7} µs   p95={p95:>7} µs");
    }
    let allocs = ALLOCS.load(Ordering::Relaxed);
    let bytes = ALLOC_BYTES.load(Ordering::Relaxed);
    eprintln!("device allocations: {allocs}   ({} MiB)", bytes / 1024 / 1024);
}
