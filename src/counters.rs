//! Performance counters: count how many times we do various important operations.

use std::sync::atomic::{AtomicUsize, Ordering, fence};

use enum_map::{Enum, EnumMap};
use lazy_static::lazy_static;
use tracing::*;

#[derive(Debug, Copy, Clone, Enum)]
pub enum Op {
    TicksRun,
    FilesCopied,
    BytesCopied,
    FilesDeleted,
    ItemErrors,
    FilesSkippedTooLarge,
    PersistenceFailures,
}

lazy_static! {
    static ref COUNTER_MAP: EnumMap<Op, AtomicUsize> = EnumMap::default();
}

#[inline]
pub fn bump(which: Op) {
    add(which, 1);
}

pub fn add(to: Op, amount: usize) {
    COUNTER_MAP[to].fetch_add(amount, Ordering::Relaxed);
}

pub fn get(which: Op) -> usize {
    COUNTER_MAP[which].load(Ordering::Relaxed)
}

pub fn log_counts() {
    // Probably not needed, but we're probably calling this once at program exit.
    fence(Ordering::SeqCst);

    let counts = COUNTER_MAP
        .iter()
        .map(|(k, v)| (k, v.load(Ordering::Relaxed)))
        .filter(|(_k, v)| *v > 0) // Ignore things we didn't do
        .collect::<Vec<_>>();

    if counts.is_empty() {
        return;
    }

    let opname = |op| match op {
        Op::TicksRun => "ticks run",
        Op::FilesCopied => "files copied",
        Op::BytesCopied => "bytes copied",
        Op::FilesDeleted => "files/directories deleted",
        Op::ItemErrors => "per-item errors",
        Op::FilesSkippedTooLarge => "files skipped (over maxsize)",
        Op::PersistenceFailures => "library persistence failures",
    };

    debug!("Counters:");
    for (op, count) in &counts {
        debug!("{:>10} {}", count, opname(*op));
    }
}
