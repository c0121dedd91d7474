use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;
use taskherd::config::PlanFile;
use taskherd::dag::{sort_by_priority, TaskDependencies, TaskId, TaskQueue, TaskStatus};
use taskherd_test_utils::builders::{EntryPointBuilder, PlanBuilder};

const FORMATS: [&str; 3] = ["fesm2015", "main", "module"];

// Acyclic by construction: entry-point N may only depend on 0..N-1.
fn plan_strategy(max_entry_points: usize) -> impl Strategy<Value = PlanFile> {
    (1..=max_entry_points).prop_flat_map(|n| {
        let eps = proptest::collection::vec(
            (
                proptest::collection::vec(any::<usize>(), 0..n),
                1..=FORMATS.len(),
                any::<bool>(),
            ),
            n,
        );

        eps.prop_map(|raw| {
            let mut builder = PlanBuilder::new("build {path}").max_workers(4);
            for (i, (potential_deps, format_count, typings)) in raw.into_iter().enumerate() {
                let mut ep = EntryPointBuilder::new(&format!("ep{i}"));
                for format in &FORMATS[..format_count] {
                    ep = ep.format(format);
                }
                if !typings {
                    ep = ep.no_typings();
                }

                let deps: BTreeSet<usize> = potential_deps
                    .into_iter()
                    .filter(|_| i > 0)
                    .map(|d| d % i)
                    .collect();
                for dep in deps {
                    ep = ep.depends_on(&format!("ep{dep}"));
                }
                builder = builder.with_entry_point(ep.build());
            }
            builder.build()
        })
    })
}

fn queue_for(plan: &PlanFile) -> TaskQueue {
    TaskQueue::new(plan.build_tasks().unwrap(), &plan.graph()).unwrap()
}

/// Drive the queue to the end. Each choice either takes the next task or
/// settles one in flight; settled tasks fail when their index is in `failing`.
fn drive(
    queue: &mut TaskQueue,
    choices: &[usize],
    failing: &HashSet<usize>,
) -> Result<(), TestCaseError> {
    let mut in_flight: Vec<TaskId> = Vec::new();
    let mut choices = choices.iter().copied().cycle();

    loop {
        let take = choices.next().unwrap_or(0) % 2 == 0;
        if take || in_flight.is_empty() {
            if let Some(id) = queue.get_next_task() {
                prop_assert!(queue.blocked_by(id).is_empty(), "handed out blocked task {}", id);
                for dependency in 0..queue.tasks().len() {
                    let dependency = TaskId(dependency);
                    let blocks = queue
                        .dependencies()
                        .dependents_of(dependency)
                        .is_some_and(|d| d.contains(&id));
                    if blocks {
                        prop_assert_eq!(queue.status(dependency), TaskStatus::Completed);
                    }
                }

                let target = queue.task(id).target();
                for other in &in_flight {
                    prop_assert_ne!(queue.task(*other).target(), target.clone());
                }
                in_flight.push(id);
                continue;
            }
            if in_flight.is_empty() {
                break;
            }
        }

        let pick = choices.next().unwrap_or(0) % in_flight.len();
        let id = in_flight.swap_remove(pick);
        if failing.contains(&id.0) {
            queue.mark_as_failed(id).unwrap();
        } else {
            queue.mark_task_completed(id).unwrap();
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn acyclic_plans_always_run_to_completion(
        plan in plan_strategy(8),
        choices in proptest::collection::vec(0..16usize, 1..32),
    ) {
        let mut queue = queue_for(&plan);
        drive(&mut queue, &choices, &HashSet::new())?;

        prop_assert!(queue.all_tasks_completed());
        for id in 0..queue.tasks().len() {
            prop_assert_eq!(queue.status(TaskId(id)), TaskStatus::Completed);
        }
    }

    #[test]
    fn failures_skip_dependents_and_still_terminate(
        plan in plan_strategy(8),
        choices in proptest::collection::vec(0..16usize, 1..32),
        failing in proptest::collection::hash_set(0..24usize, 0..4),
    ) {
        let mut queue = queue_for(&plan);
        drive(&mut queue, &choices, &failing)?;

        prop_assert!(queue.all_tasks_completed());
        for id in 0..queue.tasks().len() {
            let id = TaskId(id);
            if queue.status(id) == TaskStatus::Failed {
                for dependent in queue.dependencies().transitive_dependents(id) {
                    prop_assert_eq!(queue.status(dependent), TaskStatus::Skipped);
                }
            }
        }
    }

    #[test]
    fn priority_sort_is_stable(
        n in 1..20usize,
        edges in proptest::collection::vec((0..20usize, 0..20usize), 0..40),
    ) {
        let deps = TaskDependencies::from_edges(
            edges
                .into_iter()
                .map(|(a, b)| (TaskId(a % n), TaskId(b % n)))
                .filter(|(a, b)| a != b),
        );
        let input: Vec<TaskId> = (0..n).map(TaskId).collect();
        let sorted = sort_by_priority(&input, &deps);

        prop_assert_eq!(sorted.len(), n);
        for pair in sorted.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let (count_a, count_b) = (deps.dependent_count(a), deps.dependent_count(b));
            prop_assert!(count_a >= count_b);
            if count_a == count_b {
                prop_assert!(a < b, "{} and {} swapped", a, b);
            }
        }
    }
}
