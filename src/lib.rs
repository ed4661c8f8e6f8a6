//! This library implements a symbolic execution engine that explores the paths
//! of a program given as a control-flow graph. Every input of the program is
//! treated as symbolic, and for each path that ends the engine produces a
//! concrete test case that drives the program down that path. Errors that the
//! program may commit on some input, such as an out of bounds access, a double
//! free or a failed assertion, are reported as bugs.
//!
//! Exploration can be left undirected, or directed towards code that has not
//! yet been covered, or towards locations where some other tool predicts an
//! error. In the last case, the engine reports which of the predicted errors
//! it could confirm and which of them it could show to be false positives.
//!
//! # How it Works
//!
//! From a very high level, the exploration process is performed as follows:
//!
//! 1. A front end builds a [`program::Program`] through the
//!    [`program::ProgramBuilder`]. This is the control-flow graph of the
//!    functions to explore, made up of blocks of [`program::Instruction`]s.
//! 2. The [`executor::Executor`] sets up an initial
//!    [`state::ExecutionState`] for the entry function in which the arguments
//!    are symbolic. States hold their memory in a persistent
//!    [`memory::AddressSpace`] and their path condition as a
//!    [`constraint::ConstraintSet`] over hash-consed [`expr::ExprRef`]s.
//! 3. The executor repeatedly asks a [`searcher::Searcher`] for a state and
//!    executes one instruction of it. Where a condition can go either way, the
//!    state is forked, with the [`solver::Solver`] deciding which sides are
//!    feasible.
//! 4. When directed by traces, the [`target`] subsystem tracks the locations
//!    that each state still has to reach, and the distances to them computed
//!    by the [`codegraph`] prune the paths that can no longer reach them.
//! 5. The test cases, bugs and trace verdicts are gathered into a
//!    [`report::ExecutionResult`] that can then be output.
//!
//! # Basic Usage
//!
//! For the most basic usage of the library, it is sufficient to build a
//! program, construct an `Explorer` and call the `.explore` method, passing
//! the name of the entry function.
//!
//! ```
//! use path_explorer as pe;
//! use path_explorer::{
//!     executor,
//!     executor::StateTerminationType,
//!     expr::{CompareOp, Context},
//!     program::{InstructionKind, Operand, ProgramBuilder, Register},
//!     watchdog::LazyWatchdog,
//! };
//!
//! let mut builder = ProgramBuilder::new();
//! let main = builder.declare_function("main", 0).unwrap();
//! let entry = builder.add_block(main).unwrap();
//! let fails = builder.add_block(main).unwrap();
//! let passes = builder.add_block(main).unwrap();
//!
//! // Read a symbolic word and abort if it is 42.
//! let word = Register(0);
//! let value = Register(1);
//! let is_bad = Register(2);
//! let instructions = [
//!     InstructionKind::Alloca {
//!         dest:      word,
//!         size:      Operand::constant(4, 64),
//!         alignment: 4,
//!     },
//!     InstructionKind::MakeSymbolic {
//!         pointer: Operand::Register(word),
//!         name:    "word".to_string(),
//!     },
//!     InstructionKind::Load {
//!         dest:    value,
//!         pointer: Operand::Register(word),
//!         width:   32,
//!     },
//!     InstructionKind::Compare {
//!         dest: is_bad,
//!         op:   CompareOp::Eq,
//!         lhs:  Operand::Register(value),
//!         rhs:  Operand::constant(42, 32),
//!     },
//!     InstructionKind::Branch {
//!         cond:      Operand::Register(is_bad),
//!         then:      fails,
//!         otherwise: passes,
//!     },
//! ];
//! for instruction in instructions {
//!     builder.push(entry, instruction).unwrap();
//! }
//! builder
//!     .push(fails, InstructionKind::Abort { message: "bad word".to_string() })
//!     .unwrap();
//! builder.push(passes, InstructionKind::Return { value: None }).unwrap();
//! let program = builder.build().unwrap();
//!
//! let result = pe::new(
//!     program,
//!     executor::Config::default(),
//!     Context::default(),
//!     LazyWatchdog.in_rc(),
//! )
//! .explore("main")
//! .unwrap();
//!
//! assert_eq!(result.tests.len(), 2);
//! assert_eq!(result.bugs_of(StateTerminationType::Abort).count(), 1);
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod codegraph;
pub mod constant;
pub mod constraint;
pub mod error;
pub mod executor;
pub mod explorer;
pub mod expr;
pub mod memory;
pub mod program;
pub mod report;
pub mod searcher;
pub mod seed;
pub mod solver;
pub mod state;
pub mod target;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use explorer::new;
pub use report::ExecutionResult;
