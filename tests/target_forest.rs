//! This module is an integration test that checks how a forest of targets
//! evolves as the targets in it are reached.
#![cfg(test)]

use std::rc::Rc;

use path_explorer::{
    program::BlockId,
    target::{ErrorLocation, ReachWithError, TargetCache, TargetForest, TargetsSet},
};

fn line(number: u32) -> ErrorLocation {
    ErrorLocation {
        start_line:   number,
        end_line:     number,
        start_column: None,
        end_column:   None,
    }
}

#[test]
fn reaching_one_of_two_targets_keeps_the_other_subtree() -> anyhow::Result<()> {
    let cache = TargetCache::new();
    let b1 = cache.reach_block(BlockId(1), false);
    let b2 = cache.reach_block(BlockId(2), false);
    let e1 = cache.reproduce_error(vec![ReachWithError::UseAfterFree], "one", line(10), BlockId(3));
    let e2 = cache.reproduce_error(vec![ReachWithError::DoubleFree], "two", line(20), BlockId(4));

    let mut forest = TargetForest::new();
    forest.add_trace(&[TargetsSet::single(b1.clone()), TargetsSet::single(e1.clone())]);
    forest.add_trace(&[TargetsSet::single(b2.clone()), TargetsSet::single(e2.clone())]);
    let before = forest.clone();
    let b2_set = TargetsSet::single(b2.clone());
    let b2_subtree = before
        .layer()
        .child(&b2_set)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("B2 subtree missing"))?;

    forest.step_to(&b1);

    // Only the B1 subtree is consumed: B1 is replaced by what follows it.
    assert!(!forest.contains(&b1));
    assert!(forest.contains(&e1));
    assert!(forest.contains(&b2));
    assert!(forest.deep_contains(&e2));
    assert_eq!(forest.history().iter().cloned().collect::<Vec<_>>(), vec![b1.clone()]);

    // The B2 subtree is untouched and shared with the forest before the step.
    let after = forest
        .layer()
        .child(&b2_set)
        .ok_or_else(|| anyhow::anyhow!("B2 subtree missing after step"))?;
    assert!(Rc::ptr_eq(after, &b2_subtree));
    assert_eq!(after.targets(), vec![e2.clone()]);

    // The forest before the step is unchanged.
    assert!(before.contains(&b1));
    assert!(before.deep_contains(&e1));
    assert!(before.history().is_empty());

    Ok(())
}

#[test]
fn reaching_a_target_never_adds_goals() {
    let cache = TargetCache::new();
    let a = cache.reach_block(BlockId(0), false);
    let b = cache.reach_block(BlockId(1), false);
    let c = cache.reach_block(BlockId(2), false);
    let error = cache.reproduce_error(vec![ReachWithError::Reachable], "t", line(1), BlockId(3));

    let mut forest = TargetForest::new();
    forest.add_trace(&[
        TargetsSet::single(a.clone()),
        TargetsSet::single(b.clone()),
        TargetsSet::single(error.clone()),
    ]);
    forest.add_trace(&[TargetsSet::single(c.clone()), TargetsSet::single(error.clone())]);

    let goals = |f: &TargetForest| {
        [&a, &b, &c, &error]
            .into_iter()
            .filter(|t| f.deep_contains(t))
            .count()
    };

    let mut previous = goals(&forest);
    for target in [&a, &b, &c] {
        forest.step_to(target);
        let current = goals(&forest);
        assert!(current <= previous);
        previous = current;
    }
}
