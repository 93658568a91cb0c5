//! Migration engine behavior under pause, cancellation, failure and restart.

use ferry_migrate::{
    MigrationControl, MigrationEngine, MigrationOutcome, MigrationState, ProgressObserver,
    RecordSource, StoreCheckpoints,
};
use ferry_testkit::prelude::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn pause_after_three_batches_then_resume() {
    let engine = TestEngine::new();
    let source = Arc::new(VecSource::new(sample_records(1000, 32)));
    let sink = Arc::new(FaultySink::gated());

    let handle = engine
        .start(source, sink.clone(), test_options("pause", 100))
        .unwrap();
    sink.pause_after(3, handle.clone());
    sink.open_gate();

    let resume = match handle.wait() {
        MigrationOutcome::Paused(resume) => resume,
        other => panic!("expected pause, got {other:?}"),
    };
    assert_eq!(resume.items_processed, 300);
    assert_eq!(resume.total_items, 1000);
    assert_eq!(resume.last_processed_key.as_deref(), Some("rec-00299"));
    assert!(resume.pause_time.is_some());
    assert_eq!(sink.len(), 300);

    let stored = engine.resumable(handle.job_id()).unwrap().unwrap();
    assert_eq!(stored.items_processed, 300);

    handle.resume().unwrap();
    let summary = match handle.wait() {
        MigrationOutcome::Completed(summary) => summary,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(summary.items_migrated, 1000);
    assert_eq!(sink.len(), 1000);
    assert_eq!(sink.record_writes(), 1000);
    assert!(engine.resumable(handle.job_id()).unwrap().is_none());
}

#[test]
fn checkpoint_write_failure_pauses_at_last_saved_batch() {
    let store = Arc::new(FaultyStore::new());
    let engine = MigrationEngine::new(Arc::new(StoreCheckpoints::new(Arc::clone(&store))));
    let source = Arc::new(VecSource::new(sample_records(50, 8)));
    let sink = Arc::new(FaultySink::new());

    // Put 1 saves the initial checkpoint and put 2 follows the first batch.
    store.fail_nth_put(3);
    let handle = engine
        .start(source, sink.clone(), test_options("checkpoint-fault", 10))
        .unwrap();

    let resume = match handle.wait() {
        MigrationOutcome::Paused(resume) => resume,
        other => panic!("expected pause, got {other:?}"),
    };
    assert_eq!(resume.items_processed, 10);
    assert_eq!(resume.last_processed_key.as_deref(), Some("rec-00009"));

    let control = handle.control();
    assert_eq!(control.state, MigrationState::Paused);
    assert!(control.can_resume);
    assert!(control
        .last_error
        .as_deref()
        .unwrap()
        .contains("checkpoint write failed"));

    // The second batch reached the sink but the checkpoint did not advance.
    assert_eq!(sink.len(), 20);
    let stored = engine.resumable(handle.job_id()).unwrap().unwrap();
    assert_eq!(stored.items_processed, 10);

    handle.resume().unwrap();
    match handle.wait() {
        MigrationOutcome::Completed(summary) => assert_eq!(summary.items_migrated, 50),
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(sink.len(), 50);
    assert_eq!(sink.record_writes(), 60);
    assert!(engine.resumable(handle.job_id()).unwrap().is_none());
}

#[test]
fn cancel_keeps_written_batches_and_drops_checkpoint() {
    let engine = TestEngine::new();
    let source = Arc::new(VecSource::new(sample_records(1000, 8)));
    let sink = Arc::new(FaultySink::gated());

    let handle = engine
        .start(source.clone(), sink.clone(), test_options("cancel", 100))
        .unwrap();
    sink.cancel_after(4, handle.clone());
    sink.open_gate();

    assert_eq!(
        handle.wait(),
        MigrationOutcome::Cancelled { items_migrated: 400 }
    );
    assert_eq!(handle.state(), MigrationState::Cancelled);
    assert_eq!(sink.len(), 400);
    assert!(engine.resumable(handle.job_id()).unwrap().is_none());
    assert!(engine.checkpoints().list().unwrap().is_empty());

    // A new run starts over instead of picking up a stale session.
    sink.clear_trigger();
    let rerun = engine
        .start(source, sink.clone(), test_options("cancel", 100))
        .unwrap();
    match rerun.wait() {
        MigrationOutcome::Completed(summary) => {
            assert!(!summary.resumed);
            assert_eq!(summary.items_migrated, 1000);
            assert_eq!(summary.items_this_run, 1000);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(sink.len(), 1000);
}

#[test]
fn restart_resumes_from_checkpoint() {
    let first = TestEngine::new();
    let source = Arc::new(VecSource::new(sample_records(500, 16)));
    let sink = Arc::new(FaultySink::new());

    let trip = Arc::clone(&sink);
    let observer: Arc<dyn ProgressObserver> = Arc::new(move |control: &MigrationControl| {
        if control.items_processed >= 200 {
            trip.set_fatal(true);
        }
    });
    let handle = first
        .start_with_observer(
            source.clone(),
            sink.clone(),
            test_options("restart", 100),
            Some(observer),
        )
        .unwrap();

    let resume = match handle.wait() {
        MigrationOutcome::Failed {
            resume_data: Some(resume),
            ..
        } => resume,
        other => panic!("expected failure with checkpoint, got {other:?}"),
    };
    assert_eq!(resume.items_processed, 200);
    assert_eq!(sink.len(), 200);

    sink.set_fatal(false);
    let second = first.restarted();
    let stored = second.resumable(handle.job_id()).unwrap().unwrap();
    assert_eq!(stored.session_id, resume.session_id);

    let handle = second
        .start(source, sink.clone(), test_options("restart", 100))
        .unwrap();
    match handle.wait() {
        MigrationOutcome::Completed(summary) => {
            assert!(summary.resumed);
            assert_eq!(summary.session_id, resume.session_id);
            assert_eq!(summary.items_migrated, 500);
            assert_eq!(summary.items_this_run, 300);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(sink.len(), 500);
    assert_eq!(sink.record_writes(), 500);
}

#[test]
fn transient_write_failures_are_retried() {
    let engine = TestEngine::new();
    let source = Arc::new(VecSource::new(sample_records(300, 8)));
    let sink = Arc::new(FaultySink::new());
    sink.fail_next(2);

    let handle = engine
        .start(source, sink.clone(), test_options("retry", 100))
        .unwrap();
    assert!(handle.wait().is_completed());
    assert_eq!(sink.batch_sizes(), vec![100, 100, 100]);
}

#[test]
fn exhausted_retries_fail_and_keep_checkpoint() {
    let engine = TestEngine::new();
    let source = Arc::new(VecSource::new(sample_records(50, 8)));
    let sink = Arc::new(FaultySink::new());
    sink.fail_next(10);

    let handle = engine
        .start(source, sink.clone(), test_options("exhausted", 25))
        .unwrap();
    match handle.wait() {
        MigrationOutcome::Failed { error, resume_data } => {
            assert!(error.contains("injected write failure"));
            assert_eq!(resume_data.unwrap().items_processed, 0);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(handle.state(), MigrationState::Failed);
    assert!(engine.resumable(handle.job_id()).unwrap().is_some());
    assert!(sink.is_empty());
}

#[test]
fn progress_is_monotonic() {
    let engine = TestEngine::new();
    let source = Arc::new(VecSource::new(sample_records(730, 4)));
    let sink = Arc::new(FaultySink::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let record = Arc::clone(&seen);
    let observer: Arc<dyn ProgressObserver> = Arc::new(move |control: &MigrationControl| {
        let checkpointed = control
            .resume_data
            .as_ref()
            .map(|resume| resume.items_processed);
        record.lock().push((control.items_processed, checkpointed));
    });
    let handle = engine
        .start_with_observer(source, sink, test_options("progress", 64), Some(observer))
        .unwrap();
    assert!(handle.wait().is_completed());

    let seen = seen.lock();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    for (processed, checkpointed) in seen.iter() {
        if let Some(checkpointed) = checkpointed {
            assert_eq!(processed, checkpointed);
        }
    }
    assert_eq!(seen.last().map(|s| s.0), Some(730));
}

#[test]
fn vanished_records_are_skipped() {
    let engine = TestEngine::new();
    let source = Arc::new(VecSource::new(sample_records(200, 8)));
    let sink = Arc::new(FaultySink::gated());

    let handle = engine
        .start(source.clone(), sink.clone(), test_options("vanished", 50))
        .unwrap();
    // The first batch may already be read; later ones are not.
    source.remove("rec-00120");
    source.remove("rec-00150");
    sink.open_gate();

    match handle.wait() {
        MigrationOutcome::Completed(summary) => assert_eq!(summary.items_migrated, 200),
        other => panic!("expected completion, got {other:?}"),
    }
    let written = sink.written();
    assert_eq!(written.len(), 198);
    assert!(!written.contains_key("rec-00120"));
    assert!(!written.contains_key("rec-00150"));
}

#[test]
fn second_start_of_running_job_is_rejected() {
    let engine = TestEngine::new();
    let source = Arc::new(VecSource::new(sample_records(10, 8)));
    let sink = Arc::new(FaultySink::gated());

    let handle = engine
        .start(source.clone(), sink.clone(), test_options("dup", 5))
        .unwrap();
    assert!(engine
        .start(source, sink.clone(), test_options("dup", 5))
        .is_err());
    assert!(engine.discard(handle.job_id()).is_err());

    sink.open_gate();
    assert!(handle.wait().is_completed());
    assert!(engine.running(handle.job_id()).is_none());
}

#[test]
fn wait_timeout_returns_none_while_blocked() {
    let engine = TestEngine::new();
    let source = Arc::new(VecSource::new(sample_records(10, 8)));
    let sink = Arc::new(FaultySink::gated());

    let handle = engine
        .start(source, sink.clone(), test_options("blocked", 5))
        .unwrap();
    assert!(handle.wait_timeout(Duration::from_millis(20)).is_none());
    assert_eq!(handle.state(), MigrationState::Running);

    sink.open_gate();
    assert!(handle
        .wait_timeout(Duration::from_secs(10))
        .unwrap()
        .is_completed());
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn interrupted_runs_resume_without_loss_or_duplicates(
        records in records_strategy(1, 120),
        batch_size in 1usize..40,
        cut_fraction in 0.0f64..1.0,
    ) {
        let cut = (records.len() as f64 * cut_fraction) as u64;
        let engine = TestEngine::new();
        let source = Arc::new(VecSource::new(records.clone()));
        let sink = Arc::new(FaultySink::new());

        let trip = Arc::clone(&sink);
        let observer: Arc<dyn ProgressObserver> = Arc::new(move |control: &MigrationControl| {
            if control.items_processed >= cut {
                trip.set_fatal(true);
            }
        });
        let handle = engine
            .start_with_observer(
                source.clone(),
                sink.clone(),
                test_options("prop", batch_size),
                Some(observer),
            )
            .unwrap();

        match handle.wait() {
            MigrationOutcome::Completed(_) => {}
            MigrationOutcome::Failed { resume_data: Some(resume), .. } => {
                prop_assert_eq!(resume.items_processed as usize, sink.len());
                sink.set_fatal(false);
                let restarted = engine.restarted();
                let outcome = restarted
                    .start(source.clone(), sink.clone(), test_options("prop", batch_size))
                    .unwrap()
                    .wait();
                prop_assert!(outcome.is_completed());
            }
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }

        prop_assert_eq!(sink.record_writes(), records.len());
        let expected: Vec<_> = source.keys().unwrap();
        let written: Vec<_> = sink.written().into_keys().collect();
        prop_assert_eq!(written, expected);
    }
}
