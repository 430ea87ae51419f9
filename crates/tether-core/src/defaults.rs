//! Default constants for engine configuration.

/// Default live-object count that triggers the first automatic collection.
pub const DEFAULT_GC_THRESHOLD: usize = 4096;

/// Default maximum number of value stack slots.
pub const DEFAULT_MAX_STACK_SIZE: usize = 1024 * 64;

/// Default maximum depth of nested native calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Maximum length of an `__index` / `__newindex` delegation chain.
pub const MAX_TAG_LOOP: usize = 2000;
