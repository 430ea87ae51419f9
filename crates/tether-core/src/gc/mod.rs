//! Garbage collection system
//!
//! This module provides a mark-sweep garbage collector for the engine heap.
//!
//! # Architecture
//!
//! - **GcHeader**: mark/finalized bits and slot generation
//! - **Heap**: slot arena addressed by generation-checked [`GcRef`](crate::value::GcRef)
//! - **RootSet**: stack, registry and global roots gathered per cycle
//! - **GarbageCollector**: mark, weak clearing, resurrection, sweep
//!
//! Objects whose metatable carries `__gc` are resurrected once and returned
//! to the engine for finalization; they are freed by the following cycle.

mod collector;
mod header;
mod heap;
mod roots;

pub use collector::{Collection, Finalization, GarbageCollector, GcStats, HeapStats};
pub use header::GcHeader;
pub use heap::Heap;
pub use roots::RootSet;
