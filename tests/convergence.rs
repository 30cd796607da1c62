//! End-to-end propagation properties: edits converge to a correct fixed
//! point regardless of delivery order, duplicates, or retries.

use std::sync::Arc;
use std::time::Duration;

use taskforest::config::EngineConfig;
use taskforest::propagation::{Coordinator, Propagator};
use taskforest::queue::{InProcessQueue, JobOutcome, JobRunner, PropagationJob, WorkQueue};
use taskforest::store::{LibSqlStore, TreeStore};
use taskforest::tasks::{NewTask, TaskId, MISSING_DISPLAY_NAME};

struct Harness {
    store: Arc<LibSqlStore>,
    queue: Arc<InProcessQueue>,
    coordinator: Coordinator,
    propagator: Arc<Propagator>,
    runner: JobRunner,
}

async fn harness() -> Harness {
    let queue = Arc::new(InProcessQueue::new());
    let store = Arc::new(LibSqlStore::in_memory(queue.clone()).await.unwrap());
    let tree: Arc<dyn TreeStore> = store.clone();
    let propagator = Arc::new(Propagator::new(tree.clone(), queue.clone()));
    let coordinator = Coordinator::new(tree);
    let config = EngineConfig {
        retry_base_delay: Duration::from_millis(1),
        retry_jitter: 0.0,
        ..Default::default()
    };
    let runner = JobRunner::new(queue.clone(), propagator.clone(), config);
    Harness {
        store,
        queue,
        coordinator,
        propagator,
        runner,
    }
}

/// Walk the whole domain and check every convergence invariant.
async fn assert_invariants(store: &LibSqlStore, domain: &str) {
    let mut stack: Vec<TaskId> = store.roots(domain).await.unwrap();
    while let Some(id) = stack.pop() {
        let task = store.get_task(domain, id).await.unwrap().unwrap();
        let index = store.get_index(domain, id).await.unwrap().unwrap();
        let children = store.direct_children(domain, id).await.unwrap();

        if children.is_empty() {
            assert_eq!(task.derived_size, 1, "leaf size");
            assert_eq!(task.derived_atomic_count, 1, "leaf atomic count");
            assert_eq!(task.derived_completed, task.completed, "leaf completion");
        } else {
            assert_eq!(
                task.derived_size,
                1 + children.iter().map(|c| c.derived_size).sum::<u64>(),
                "composite size"
            );
            assert_eq!(
                task.derived_atomic_count,
                children.iter().map(|c| c.derived_atomic_count).sum::<u64>(),
                "composite atomic count"
            );
            assert_eq!(
                task.derived_completed,
                children.iter().all(|c| c.derived_completed),
                "composite completion"
            );
            assert_eq!(
                task.derived_has_open_work,
                children.iter().any(|c| c.derived_has_open_work),
                "composite open work"
            );
        }

        assert_eq!(index.depth as usize, index.path.len(), "index depth");
        assert_eq!(index.completed, task.derived_completed, "index mirror");
        assert_eq!(index.atomic, task.is_atomic(), "index atomic mirror");

        for child in &children {
            let child_index = store.get_index(domain, child.id).await.unwrap().unwrap();
            let mut expected = index.path.clone();
            expected.push(id);
            assert_eq!(child_index.path, expected, "child path");
            assert_eq!(
                child.derived_depth,
                task.derived_depth + 1,
                "child depth"
            );
            stack.push(child.id);
        }
    }
}

#[tokio::test]
async fn leaf_base_case() {
    let h = harness().await;
    let task = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Single task"))
        .await
        .unwrap();
    h.runner.run_until_idle().await;

    let task = h.store.get_task("acme", task.id).await.unwrap().unwrap();
    assert_eq!(task.derived_size, 1);
    assert_eq!(task.derived_atomic_count, 1);
    assert!(!task.derived_completed);
    assert!(task.derived_has_open_work);
    assert!(task.derived_assignees.is_empty());
    assert_eq!(task.derived_depth, 0);

    let index = h.store.get_index("acme", task.id).await.unwrap().unwrap();
    assert!(index.path.is_empty());
    assert!(index.atomic);
    assert!(index.has_open_work);
}

#[tokio::test]
async fn composite_aggregation() {
    let h = harness().await;
    h.store.upsert_user("a", "Alice").await.unwrap();

    let root = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Project"))
        .await
        .unwrap();
    let done = h
        .coordinator
        .create_task(
            "acme",
            NewTask::new("tess", "Finished piece")
                .with_parent(root.id)
                .with_assignee("a"),
        )
        .await
        .unwrap();
    h.coordinator
        .create_task("acme", NewTask::new("tess", "Open piece").with_parent(root.id))
        .await
        .unwrap();
    h.coordinator
        .set_completed("acme", done.id, true)
        .await
        .unwrap();
    h.runner.run_until_idle().await;

    let root = h.store.get_task("acme", root.id).await.unwrap().unwrap();
    assert_eq!(root.derived_size, 3);
    assert_eq!(root.derived_atomic_count, 2);
    assert!(!root.derived_completed);
    assert!(root.derived_has_open_work);
    assert_eq!(root.derived_assignees.len(), 1);
    let progress = &root.derived_assignees["a"];
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.total, 1);
    assert_eq!(progress.display_name, "Alice");
    assert_eq!(root.summary(), "2 tasks (1 completed)");

    let index = h.store.get_index("acme", root.id).await.unwrap().unwrap();
    assert!(!index.atomic);
    assert!(!index.completed);
    assert!(index.has_open_work);
    assert_eq!(index.assignees, vec!["a".to_string()]);

    assert_invariants(&h.store, "acme").await;
}

#[tokio::test]
async fn completing_every_leaf_completes_the_root() {
    let h = harness().await;
    let root = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Release"))
        .await
        .unwrap();
    let mut leaves = Vec::new();
    for n in 0..3 {
        let leaf = h
            .coordinator
            .create_task(
                "acme",
                NewTask::new("tess", format!("Step {n}"))
                    .with_parent(root.id)
                    .with_assignee("tess"),
            )
            .await
            .unwrap();
        leaves.push(leaf.id);
    }

    for id in &leaves {
        h.coordinator.set_completed("acme", *id, true).await.unwrap();
    }
    h.runner.run_until_idle().await;

    let root = h.store.get_task("acme", root.id).await.unwrap().unwrap();
    assert!(root.derived_completed);
    assert!(!root.derived_has_open_work);
    assert_eq!(root.derived_assignees["tess"].completed, 3);

    // Reopening one leaf flips the root back.
    h.coordinator
        .set_completed("acme", leaves[0], false)
        .await
        .unwrap();
    h.runner.run_until_idle().await;
    let root = h.store.get_task("acme", root.id).await.unwrap().unwrap();
    assert!(!root.derived_completed);
    assert_invariants(&h.store, "acme").await;
}

#[tokio::test]
async fn unresolvable_assignee_gets_placeholder_name() {
    let h = harness().await;
    let root = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Project"))
        .await
        .unwrap();
    h.coordinator
        .create_task(
            "acme",
            NewTask::new("tess", "Piece")
                .with_parent(root.id)
                .with_assignee("ghost"),
        )
        .await
        .unwrap();
    h.runner.run_until_idle().await;

    let root = h.store.get_task("acme", root.id).await.unwrap().unwrap();
    assert_eq!(
        root.derived_assignees["ghost"].display_name,
        MISSING_DISPLAY_NAME
    );
}

#[tokio::test]
async fn move_updates_subtree_paths_and_both_parents() {
    let h = harness().await;
    let root_a = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Alpha"))
        .await
        .unwrap();
    let root_b = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Beta"))
        .await
        .unwrap();
    let x = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "X").with_parent(root_a.id))
        .await
        .unwrap();
    let y = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Y").with_parent(x.id))
        .await
        .unwrap();
    let z = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Z").with_parent(y.id))
        .await
        .unwrap();
    h.runner.run_until_idle().await;

    h.coordinator
        .move_task("acme", x.id, Some(root_b.id))
        .await
        .unwrap();
    h.runner.run_until_idle().await;

    let x_index = h.store.get_index("acme", x.id).await.unwrap().unwrap();
    assert_eq!(x_index.path, vec![root_b.id]);
    let y_index = h.store.get_index("acme", y.id).await.unwrap().unwrap();
    assert_eq!(y_index.path, vec![root_b.id, x.id]);
    let z_index = h.store.get_index("acme", z.id).await.unwrap().unwrap();
    assert_eq!(z_index.path, vec![root_b.id, x.id, y.id]);
    assert_eq!(z_index.depth, 3);

    let root_a = h.store.get_task("acme", root_a.id).await.unwrap().unwrap();
    assert_eq!(root_a.derived_size, 1);
    let root_b = h.store.get_task("acme", root_b.id).await.unwrap().unwrap();
    assert_eq!(root_b.derived_size, 4);
    assert_eq!(root_b.derived_atomic_count, 1);

    assert_invariants(&h.store, "acme").await;
}

#[tokio::test]
async fn emptied_composite_degenerates_to_leaf() {
    let h = harness().await;
    let root = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Former parent"))
        .await
        .unwrap();
    let child = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Only child").with_parent(root.id))
        .await
        .unwrap();
    h.runner.run_until_idle().await;
    assert_eq!(
        h.store
            .get_task("acme", root.id)
            .await
            .unwrap()
            .unwrap()
            .derived_size,
        2
    );

    h.coordinator.move_task("acme", child.id, None).await.unwrap();
    h.runner.run_until_idle().await;

    let root = h.store.get_task("acme", root.id).await.unwrap().unwrap();
    assert_eq!(root.derived_size, 1);
    assert_eq!(root.derived_atomic_count, 1);
    // Leaf semantics again: the user-set flag is authoritative.
    assert_eq!(root.derived_completed, root.completed);
    assert!(!root.derived_completed);
    assert!(root.derived_has_open_work);

    // And it can be completed directly now that it is atomic.
    h.coordinator
        .set_completed("acme", root.id, true)
        .await
        .unwrap();
    h.runner.run_until_idle().await;
    let root = h.store.get_task("acme", root.id).await.unwrap().unwrap();
    assert!(root.derived_completed);
    assert_invariants(&h.store, "acme").await;
}

#[tokio::test]
async fn duplicate_and_reordered_jobs_still_converge() {
    let h = harness().await;
    let root = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Project"))
        .await
        .unwrap();
    let mid = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Phase").with_parent(root.id))
        .await
        .unwrap();
    let leaf = h
        .coordinator
        .create_task(
            "acme",
            NewTask::new("tess", "Work item")
                .with_parent(mid.id)
                .with_assignee("tess"),
        )
        .await
        .unwrap();
    h.coordinator
        .set_completed("acme", leaf.id, true)
        .await
        .unwrap();

    // Inject duplicates with the parent's job ahead of the child's.
    for job in [
        PropagationJob::aggregate_up("acme", root.id),
        PropagationJob::aggregate_up("acme", mid.id),
        PropagationJob::aggregate_up("acme", leaf.id),
        PropagationJob::locate_down("acme", leaf.id),
        PropagationJob::locate_down("acme", root.id),
        PropagationJob::aggregate_up("acme", root.id),
    ] {
        h.queue.enqueue(job).await.unwrap();
    }
    h.runner.run_until_idle().await;

    assert!(h.queue.is_empty().await);
    let root = h.store.get_task("acme", root.id).await.unwrap().unwrap();
    assert!(root.derived_completed);
    assert_eq!(root.derived_size, 3);
    assert_invariants(&h.store, "acme").await;
}

#[tokio::test]
async fn aggregation_is_idempotent() {
    let h = harness().await;
    let root = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Project"))
        .await
        .unwrap();
    h.coordinator
        .create_task(
            "acme",
            NewTask::new("tess", "Piece")
                .with_parent(root.id)
                .with_assignee("tess"),
        )
        .await
        .unwrap();
    h.runner.run_until_idle().await;

    let job = PropagationJob::aggregate_up("acme", root.id);
    assert_eq!(
        h.propagator.handle(&job).await.unwrap(),
        JobOutcome::Completed
    );
    let first_task = h.store.get_task("acme", root.id).await.unwrap().unwrap();
    let first_index = h.store.get_index("acme", root.id).await.unwrap().unwrap();

    assert_eq!(
        h.propagator.handle(&job).await.unwrap(),
        JobOutcome::Completed
    );
    let second_task = h.store.get_task("acme", root.id).await.unwrap().unwrap();
    let second_index = h.store.get_index("acme", root.id).await.unwrap().unwrap();

    assert_eq!(first_task, second_task);
    assert_eq!(first_index, second_index);
}

#[tokio::test]
async fn locator_retries_until_parent_index_exists() {
    let h = harness().await;
    let root = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Root"))
        .await
        .unwrap();
    let child = h
        .coordinator
        .create_task("acme", NewTask::new("tess", "Child").with_parent(root.id))
        .await
        .unwrap();
    // Nothing drained yet: no index exists for the root.

    let child_job = PropagationJob::locate_down("acme", child.id);
    assert_eq!(
        h.propagator.handle(&child_job).await.unwrap(),
        JobOutcome::RetryLater
    );

    assert_eq!(
        h.propagator
            .handle(&PropagationJob::locate_down("acme", root.id))
            .await
            .unwrap(),
        JobOutcome::Completed
    );
    assert_eq!(
        h.propagator.handle(&child_job).await.unwrap(),
        JobOutcome::Completed
    );

    let index = h.store.get_index("acme", child.id).await.unwrap().unwrap();
    assert_eq!(index.path, vec![root.id]);
    assert_eq!(index.depth, 1);
}

#[tokio::test]
async fn jobs_for_vanished_tasks_are_skipped() {
    let h = harness().await;
    let ghost = uuid::Uuid::new_v4();
    assert_eq!(
        h.propagator
            .handle(&PropagationJob::aggregate_up("acme", ghost))
            .await
            .unwrap(),
        JobOutcome::PermanentSkip
    );
    assert_eq!(
        h.propagator
            .handle(&PropagationJob::locate_down("acme", ghost))
            .await
            .unwrap(),
        JobOutcome::PermanentSkip
    );
    // A skipped job abandons its chain: nothing new was enqueued.
    assert!(h.queue.is_empty().await);
}
