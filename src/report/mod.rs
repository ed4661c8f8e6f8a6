//! This module contains the artefacts produced by an exploration run: the test
//! cases that reproduce each explored path, the reports of the bugs found on
//! them, and the [`ExecutionResult`] that gathers everything up.

use std::{collections::BTreeMap, rc::Rc};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    error::{execution::Errors, solver},
    executor::{HaltReason, StateTerminationType},
    expr::{Array, Assignment, Context, Endianness},
    memory::MemoryObjectId,
    program::{FunctionId, InstructionId, Program, SourceLocation},
    solver::{SolverStats, TimingSolver},
    state::{ExecutionState, SymcreteId, SymcreteKind},
    target::{FalsePositive, ReachWithError, TruePositive},
};

/// The concrete contents of a symbolic object in a test case.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestObject {
    pub name:   String,
    pub object: MemoryObjectId,

    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
}

/// A pointer stored in the contents of one symbolic object that points into
/// another object under the test case's inputs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PointerRelation {
    pub from_object: MemoryObjectId,

    /// The offset within `from_object` at which the pointer is stored.
    pub offset: u64,

    pub to_object: MemoryObjectId,

    /// The offset within `to_object` that the pointer points at.
    pub to_offset: u64,
}

/// The value chosen for a symcrete in a test case.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConcreteSymcrete {
    pub id:     SymcreteId,
    pub kind:   SymcreteKind,
    pub object: MemoryObjectId,
    pub value:  u64,
}

/// Concrete inputs that drive the program down one explored path.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id:          usize,
    pub termination: StateTerminationType,
    pub message:     Option<String>,
    pub objects:     Vec<TestObject>,
    pub pointers:    Vec<PointerRelation>,
    pub symcretes:   Vec<ConcreteSymcrete>,
}

impl TestCase {
    /// Solves the path condition of `state` for the contents of its symbolic
    /// objects.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver cannot produce a model for the path.
    pub fn generate(
        id: usize,
        state: &ExecutionState,
        termination: StateTerminationType,
        message: Option<String>,
        solver: &TimingSolver,
        context: Context,
    ) -> solver::Result<Self> {
        let arrays: Vec<Rc<Array>> = state
            .symbolics
            .iter()
            .map(|s| s.array.clone())
            .chain(state.constraints.arrays())
            .chain(state.symcretes.iter().filter_map(|s| s.array.clone()))
            .sorted_by_key(|a| a.id())
            .dedup_by(|a, b| a.id() == b.id())
            .collect();
        let assignment = solver.get_initial_values(&state.constraints, &arrays)?;

        let objects: Vec<TestObject> = state
            .symbolics
            .iter()
            .map(|s| {
                let size = assignment.evaluate(s.object.size()).min(s.array.size());
                TestObject {
                    name:   s.array.name().to_string(),
                    object: s.object.id(),
                    bytes:  (0..size)
                        .map(|i| {
                            s.array
                                .constant_byte(i)
                                .unwrap_or_else(|| assignment.byte(s.array.id(), i))
                        })
                        .collect(),
                }
            })
            .collect();
        let pointers = pointer_relations(state, &objects, &assignment, context);
        let symcretes = state
            .symcretes
            .iter()
            .map(|s| ConcreteSymcrete {
                id:     s.id,
                kind:   s.kind,
                object: s.object,
                value:  assignment.evaluate(&s.expr),
            })
            .collect();

        Ok(Self {
            id,
            termination,
            message,
            objects,
            pointers,
            symcretes,
        })
    }
}

/// Finds the pointer-sized values in `objects` that point into an object of
/// `state` once `assignment` fixes every symbolic address.
fn pointer_relations(
    state: &ExecutionState,
    objects: &[TestObject],
    assignment: &Assignment,
    context: Context,
) -> Vec<PointerRelation> {
    let extents: Vec<(MemoryObjectId, u64, u64)> = state
        .address_space
        .iter()
        .map(|p| {
            let base = assignment.evaluate(p.object.address());
            let size = assignment.evaluate(p.object.size());
            (p.object.id(), base, size)
        })
        .collect();

    let Ok(width) = usize::try_from(context.pointer_bytes()) else {
        return vec![];
    };
    let mut relations = Vec::new();
    for object in objects {
        for (index, chunk) in object.bytes.chunks_exact(width).enumerate() {
            let value = match context.endianness() {
                Endianness::Little => chunk.iter().rev().fold(0u64, |v, b| (v << 8) | u64::from(*b)),
                Endianness::Big => chunk.iter().fold(0u64, |v, b| (v << 8) | u64::from(*b)),
            };
            if value == 0 {
                continue;
            }
            let target = extents.iter().find(|(_, base, size)| {
                value == *base || (value > *base && value - base < *size)
            });
            if let Some((to_object, base, _)) = target {
                relations.push(PointerRelation {
                    from_object: object.object,
                    offset:      (index * width) as u64,
                    to_object:   *to_object,
                    to_offset:   value - base,
                });
            }
        }
    }
    relations
}

/// A step in the code flow of a bug report.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CodeFlowStep {
    pub instruction: InstructionId,
    pub location:    Option<SourceLocation>,
}

/// An error committed by the explored program on some path.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    pub kind:        StateTerminationType,
    pub error:       ReachWithError,
    pub message:     String,
    pub instruction: InstructionId,

    /// The branches taken on the way to the error, ending at the error itself.
    pub code_flow: Vec<CodeFlowStep>,

    /// The trace that predicted the error, when one did.
    pub trace_id: Option<String>,

    /// The test case that reproduces the error, if one could be produced.
    pub test: Option<usize>,
}

impl BugReport {
    /// Builds the report for `state` failing at `instruction`.
    #[must_use]
    pub fn new(
        program: &Program,
        state: &ExecutionState,
        kind: StateTerminationType,
        message: String,
        instruction: InstructionId,
    ) -> Self {
        let step = |instruction: InstructionId| CodeFlowStep {
            instruction,
            location: program
                .instruction(instruction)
                .ok()
                .and_then(|i| i.location.clone()),
        };
        let code_flow = state
            .branch_trace
            .iter()
            .map(|e| step(e.instruction))
            .chain(std::iter::once(step(instruction)))
            .collect();
        Self {
            kind,
            error: state.error,
            message,
            instruction,
            code_flow,
            trace_id: None,
            test: None,
        }
    }
}

/// Counters describing the work done by a run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub instructions: u64,
    pub forks:        u64,
    pub states:       u64,
    pub solver:       SolverStats,

    /// The number of states that ended in each way.
    pub terminations: BTreeMap<StateTerminationType, u64>,
}

/// Everything produced by exploring from one entry function.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionResult {
    pub entry:           FunctionId,
    pub halt_reason:     HaltReason,
    pub tests:           Vec<TestCase>,
    pub bugs:            Vec<BugReport>,
    pub true_positives:  Vec<TruePositive>,
    pub false_positives: Vec<FalsePositive>,
    pub stats:           Statistics,

    /// The errors of the engine itself that ended some states.
    #[serde(skip)]
    pub errors: Errors,
}

impl ExecutionResult {
    /// Gets the bugs of the provided `kind`.
    pub fn bugs_of(&self, kind: StateTerminationType) -> impl Iterator<Item = &BugReport> {
        self.bugs.iter().filter(move |b| b.kind == kind)
    }

    /// Renders the result as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the result cannot be serialized.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod test {
    use std::{rc::Rc, time::Duration};

    use crate::{
        expr::{ArraySource, Context, ExprBuilder},
        memory::{AllocSite, MemoryManager, ObjectFlags, ObjectState},
        program::{FunctionId, InstructionId},
        report::TestCase,
        executor::StateTerminationType,
        solver::{EnumerationSolver, TimingSolver},
        state::{ExecutionState, StateId, SymbolicObject},
    };

    #[test]
    fn can_find_pointers_between_objects() -> anyhow::Result<()> {
        let context = Context::default();
        let builder = Rc::new(ExprBuilder::new(context));
        let solver = TimingSolver::new(
            Box::new(EnumerationSolver::new()),
            builder.clone(),
            Duration::from_secs(5),
        );
        let manager = MemoryManager::new(builder.clone());
        let site = AllocSite::Instruction(InstructionId(0));
        let mut state = ExecutionState::new(StateId(0), FunctionId(0), InstructionId(0), vec![]);

        let target = manager.allocate_concrete(16, 8, ObjectFlags::heap(), site.clone(), "target");
        let address = target.concrete_address().unwrap_or_default() + 4;
        let root = builder.create_array("target", 16, ArraySource::Zeroed);
        state.address_space.bind_object(target.clone(), ObjectState::new(target.id(), root));

        let holder = manager.allocate_concrete(8, 8, ObjectFlags::heap(), site, "holder");
        let contents = builder.create_array("holder", 8, ArraySource::Constant {
            values: address.to_le_bytes().into(),
        });
        state.address_space.bind_object(
            holder.clone(),
            ObjectState::new(holder.id(), contents.clone()),
        );
        state.symbolics.push_back(SymbolicObject {
            object: holder.clone(),
            array:  contents,
        });

        let test = TestCase::generate(0, &state, StateTerminationType::Exit, None, &solver, context)?;
        assert_eq!(test.objects.len(), 1);
        assert_eq!(test.objects[0].bytes, address.to_le_bytes().to_vec());
        assert_eq!(test.pointers.len(), 1);
        assert_eq!(test.pointers[0].from_object, holder.id());
        assert_eq!(test.pointers[0].to_object, target.id());
        assert_eq!(test.pointers[0].to_offset, 4);

        Ok(())
    }
}
