//! This module contains constants that are needed throughout the codebase.

use std::time::Duration;

/// The bit-width of the boolean values produced by comparisons.
pub const BOOL_WIDTH_BITS: u32 = 1;

/// The bit-width of a single byte of memory.
pub const BYTE_WIDTH_BITS: u32 = 8;

/// The widest bit-vector that the expression layer can represent.
pub const MAX_EXPR_WIDTH_BITS: u32 = 64;

/// The default pointer width used when no explicit [`crate::expr::Context`] is
/// provided.
pub const DEFAULT_POINTER_WIDTH_BITS: u32 = 64;

/// The lowest address handed out by the memory manager.
///
/// Keeping the null page unmapped means that a concrete null pointer can never
/// resolve to an object.
pub const ALLOCATION_BASE_ADDRESS: u64 = 0x1_0000;

/// The number of unused bytes left between two consecutive allocations.
pub const ALLOCATION_GUARD_BYTES: u64 = 16;

/// The base address at which functions are given their concrete addresses so
/// that they can be used as the targets of indirect calls.
pub const FUNCTION_ADDRESS_BASE: u64 = 0x7f00_0000;

/// The spacing between consecutive function addresses.
pub const FUNCTION_ADDRESS_STRIDE: u64 = 0x10;

/// The default alignment for allocations that do not request one.
pub const DEFAULT_ALLOCATION_ALIGNMENT: u64 = 8;

/// The default number of loop iterations that the executor performs before
/// polling the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 100;

/// The default per-query solver timeout.
pub const DEFAULT_SOLVER_TIMEOUT: Duration = Duration::from_secs(10);

/// The default number of objects that symbolic pointer resolution may return
/// before it is considered incomplete.
///
/// A value of zero means that resolution is unbounded.
pub const DEFAULT_MAX_RESOLUTIONS: usize = 0;

/// The default bound on the total number of instructions executed across all
/// states, where zero means no bound.
pub const DEFAULT_MAX_INSTRUCTIONS: u64 = 0;

/// The default bound on the number of instructions executed by a single
/// state, where zero means no bound.
pub const DEFAULT_MAX_STEPPED_INSTRUCTIONS: u64 = 0;

/// The default bound on the number of forks performed in a run, where zero
/// means no bound.
pub const DEFAULT_MAX_FORKS: u64 = 0;

/// The default bound on the fork depth of a state, where zero means no bound.
pub const DEFAULT_MAX_DEPTH: u64 = 0;

/// The default bound, in bytes, on the memory held by live objects, where zero
/// means no bound.
pub const DEFAULT_MAX_MEMORY: u64 = 2 << 30;

/// The default bound on the number of test cases produced, where zero means no
/// bound.
pub const DEFAULT_MAX_TESTS: usize = 0;

/// The default number of times a state may revisit a block before it is
/// terminated, where zero means no bound.
pub const DEFAULT_MAX_CYCLES: u32 = 0;

/// The default maximum number of call frames a single state may hold.
pub const DEFAULT_MAX_STACK_FRAMES: usize = 8192;

/// The default number of times a state may revisit the same block before it is
/// considered to be stuck in a loop.
pub const DEFAULT_MAX_CYCLES_BEFORE_STUCK: u32 = 1;

/// The default size above which a symbolically-sized allocation is treated as
/// failing.
///
/// It is also the number of bytes of address space reserved for objects whose
/// size stays symbolic.
pub const DEFAULT_MAX_SYMBOLIC_ALLOCATION_SIZE: u64 = 1 << 20;

/// The default upper bound searched when looking for a small witness for a
/// symbolic allocation size.
pub const DEFAULT_SYMBOLIC_ALLOCATION_WITNESS_BOUND: u64 = 1 << 16;

/// The default lower bound on the size of lazily initialized objects.
pub const DEFAULT_MIN_LAZY_INIT_SIZE: u64 = 8;

/// The default upper bound on the size of lazily initialized objects.
pub const DEFAULT_MAX_LAZY_INIT_SIZE: u64 = 1 << 12;

/// The default for whether pointers rooted in symbolic input may invent the
/// objects they point to.
pub const DEFAULT_LAZY_INITIALIZATION: bool = true;

/// The default for whether every error is reported, or only the first error at
/// each instruction.
pub const DEFAULT_EMIT_ALL_ERRORS: bool = false;

/// The default for whether states that remain when the run halts are turned
/// into test cases.
pub const DEFAULT_DUMP_STATES_ON_HALT: bool = true;

/// The largest number of input bits over which the enumeration solver will
/// perform an exhaustive search.
pub const EXHAUSTIVE_SEARCH_MAX_BITS: u32 = 20;

/// The maximum number of candidate assignments the enumeration solver will try
/// for a single independent group of constraints.
pub const ENUMERATION_SOLVER_MAX_CANDIDATES: u64 = 1 << 22;

/// The number of candidate assignments tried between checks of the query
/// timeout.
pub const ENUMERATION_SOLVER_TIMEOUT_CHECK_INTERVAL: u64 = 1 << 10;

/// The confidence, as a percentage, that the engine has in a target trace
/// before any exploration has happened.
pub const MAX_CONFIDENCE: f64 = 100.0;

/// The lowest possible confidence.
pub const MIN_CONFIDENCE: f64 = 0.0;

/// The confidence threshold above which a false-positive conclusion is
/// considered "very confident".
pub const VERY_CONFIDENT: f64 = 90.0;

/// The default for whether states that no seed follows are abandoned while
/// seeds are replayed.
pub const DEFAULT_ONLY_REPLAY_SEEDS: bool = false;

/// The default for whether the run halts once every seed has been replayed.
pub const DEFAULT_ONLY_SEED: bool = false;

/// The default for whether seeds may be shorter than the objects they are
/// matched with.
pub const DEFAULT_ALLOW_SEED_EXTENSION: bool = false;

/// The default for whether objects that no seed object matches are filled
/// with zeros.
pub const DEFAULT_ZERO_SEED_EXTENSION: bool = false;

/// The default for whether seeds may be longer than the objects they are
/// matched with.
pub const DEFAULT_ALLOW_SEED_TRUNCATION: bool = false;

/// The default for whether seed objects are matched with symbolic objects by
/// name, rather than in the order they were made symbolic.
pub const DEFAULT_NAMED_SEED_MATCHING: bool = false;
