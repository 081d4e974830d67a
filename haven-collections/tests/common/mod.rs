//! Shared helpers for the collection tests: a payload that detects
//! use-after-free and double drops, and a linearizability checker.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const LIVE: u64 = 0x11fe_11fe_11fe_11fe;
const DEAD: u64 = 0xdead_dead_dead_dead;

/// Routes `tracing` output to the test harness; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Payload whose canary is checked on every read and on drop.
#[derive(Debug)]
pub struct Canary {
    canary: u64,
    pub value: usize,
    drops: Arc<AtomicUsize>,
}

impl Canary {
    pub fn new(value: usize, drops: &Arc<AtomicUsize>) -> Self {
        Self {
            canary: LIVE,
            value,
            drops: drops.clone(),
        }
    }

    /// Returns the value after checking the canary.
    pub fn get(&self) -> usize {
        assert_eq!(self.canary, LIVE, "payload read after it was dropped");
        self.value
    }
}

impl Drop for Canary {
    fn drop(&mut self) {
        assert_eq!(self.canary, LIVE, "payload dropped twice");
        self.canary = DEAD;
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sequential model an observed history is checked against.
pub trait SequentialSpec: Clone + Hash + Eq {
    type Op: Clone + Debug;
    type Ret: Clone + Debug + PartialEq;

    fn apply(&mut self, op: &Self::Op) -> Self::Ret;
}

/// One completed operation with its logical invocation and response times.
#[derive(Debug, Clone)]
pub struct Event<O, R> {
    pub op: O,
    pub ret: R,
    pub invoke: usize,
    pub response: usize,
}

/// Global logical clock shared by the threads of one history.
#[derive(Debug, Default)]
pub struct Clock(AtomicUsize);

impl Clock {
    pub fn tick(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Runs `f` between two clock ticks and records the result.
pub fn record<O, R>(clock: &Clock, op: O, f: impl FnOnce() -> R) -> Event<O, R> {
    let invoke = clock.tick();
    let ret = f();
    let response = clock.tick();
    Event {
        op,
        ret,
        invoke,
        response,
    }
}

/// Wing-Gong search with memoization on (linearized set, model state).
///
/// Histories are limited to 64 events.
pub fn is_linearizable<S: SequentialSpec>(initial: S, history: &[Event<S::Op, S::Ret>]) -> bool {
    assert!(history.len() <= 64, "history too long for the checker");
    let full = if history.len() == 64 {
        u64::MAX
    } else {
        (1u64 << history.len()) - 1
    };
    let mut seen = HashSet::new();
    search(&initial, history, 0, full, &mut seen)
}

fn search<S: SequentialSpec>(
    state: &S,
    history: &[Event<S::Op, S::Ret>],
    done: u64,
    full: u64,
    seen: &mut HashSet<(u64, S)>,
) -> bool {
    if done == full {
        return true;
    }
    if !seen.insert((done, state.clone())) {
        return false;
    }

    let pending = |i: usize| done & (1 << i) == 0;
    // Earliest response among pending events: anything invoked after it
    // cannot be linearized next.
    let horizon = (0..history.len())
        .filter(|&i| pending(i))
        .map(|i| history[i].response)
        .min()
        .unwrap_or(usize::MAX);

    for (i, event) in history.iter().enumerate() {
        if !pending(i) || event.invoke > horizon {
            continue;
        }
        let mut next = state.clone();
        if next.apply(&event.op) == event.ret
            && search(&next, history, done | (1 << i), full, seen)
        {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, Copy)]
pub enum StackOp {
    Push(u32),
    Pop,
}

/// LIFO model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StackModel(Vec<u32>);

impl SequentialSpec for StackModel {
    type Op = StackOp;
    type Ret = Option<u32>;

    fn apply(&mut self, op: &StackOp) -> Option<u32> {
        match *op {
            StackOp::Push(v) => {
                self.0.push(v);
                None
            }
            StackOp::Pop => self.0.pop(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum QueueOp {
    Enqueue(u32),
    Dequeue,
}

/// FIFO model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QueueModel(VecDeque<u32>);

impl SequentialSpec for QueueModel {
    type Op = QueueOp;
    type Ret = Option<u32>;

    fn apply(&mut self, op: &QueueOp) -> Option<u32> {
        match *op {
            QueueOp::Enqueue(v) => {
                self.0.push_back(v);
                None
            }
            QueueOp::Dequeue => self.0.pop_front(),
        }
    }
}
