//! Integration tests for admission, isolation and the transaction protocol.

mod common;

use common::{counter_setup, init_tracing, wait_until, Faulty, Recorder};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use tripledb_txn::{
    ComponentId, Config, DataVersion, Journal, ThreadTxn, TransBlob, TransCounter,
    TransactionCoordinator, TxnError, TxnMode, TxnState,
};

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn reader_started_before_commit_sees_old_value() {
    let (coordinator, counter) = counter_setup(3);

    let mut writer = coordinator.begin_write().unwrap();
    assert_eq!(counter.inc(&writer).unwrap(), 4);

    let seen_by_reader = Arc::clone(&counter);
    let reader = ThreadTxn::read(&coordinator, move |txn| seen_by_reader.get(txn)).unwrap();

    writer.commit().unwrap();
    writer.end().unwrap();

    assert_eq!(reader.run().unwrap(), 3);
    let fresh = coordinator.execute_read(|txn| counter.get(txn)).unwrap();
    assert_eq!(fresh.unwrap(), 4);
}

#[test]
fn writer_changes_invisible_to_concurrent_reader_on_same_thread() {
    let (coordinator, counter) = counter_setup(10);

    let mut writer = coordinator.begin_write().unwrap();
    let mut reader = coordinator.begin_read().unwrap();
    counter.set(&writer, 20).unwrap();

    assert_eq!(counter.get(&reader).unwrap(), 10);
    writer.commit().unwrap();
    assert_eq!(counter.get(&reader).unwrap(), 10);

    writer.end().unwrap();
    reader.end().unwrap();
    assert_eq!(counter.committed_value(), 20);
}

#[test]
fn data_version_advances_per_write_commit() {
    let (coordinator, counter) = counter_setup(0);
    assert_eq!(coordinator.data_version(), DataVersion::new(0));

    let mut before = coordinator.begin_read().unwrap();
    coordinator.execute_write(|txn| counter.inc(txn)).unwrap();
    let mut after = coordinator.begin_read().unwrap();

    assert_eq!(before.data_version(), DataVersion::new(0));
    assert_eq!(after.data_version(), DataVersion::new(1));
    before.end().unwrap();
    after.end().unwrap();

    // Aborted writes leave the version alone.
    let mut aborted = coordinator.begin_write().unwrap();
    counter.inc(&aborted).unwrap();
    aborted.abort().unwrap();
    aborted.end().unwrap();
    assert_eq!(coordinator.data_version(), DataVersion::new(1));
}

#[test]
fn sequential_writes_compose() {
    let (coordinator, counter) = counter_setup(5);

    for _ in 0..3 {
        coordinator.execute_write(|txn| counter.inc(txn)).unwrap();
        assert_eq!(coordinator.count_active(), 0);
    }

    assert_eq!(counter.committed_value(), 8);
    assert_eq!(coordinator.count_begin_write(), 3);
    assert_eq!(coordinator.count_finished(), 3);
    assert!(coordinator.journal().is_empty().unwrap());
}

#[test]
fn blob_component_commits_atomically_with_counter() {
    init_tracing();
    let coordinator = TransactionCoordinator::in_memory();
    let count = Arc::new(TransCounter::new(ComponentId::named("count"), 0));
    let log = Arc::new(TransBlob::in_memory(ComponentId::named("log")));
    coordinator.add(count.clone()).unwrap();
    coordinator.add(log.clone()).unwrap();
    coordinator.start().unwrap();

    coordinator
        .execute_write(|txn| {
            log.append(txn, b"s p o .")?;
            count.inc(txn)
        })
        .unwrap();

    let failed = coordinator.execute_write(|txn| {
        log.append(txn, b"bad")?;
        count.inc(txn)?;
        Err::<(), _>(TxnError::protocol("rejected"))
    });
    assert!(failed.is_err());

    assert_eq!(count.committed_value(), 1);
    assert_eq!(log.committed_value(), b"s p o .".to_vec());
}

// ============================================================================
// Admission
// ============================================================================

#[test]
fn blocked_writers_still_admit_readers() {
    let (coordinator, _counter) = counter_setup(0);

    coordinator.block_writers().unwrap();
    assert!(coordinator.writers_blocked());
    assert!(coordinator.begin(TxnMode::Write, false).unwrap().is_none());

    let mut reader = coordinator.begin(TxnMode::Read, false).unwrap().unwrap();
    reader.end().unwrap();

    coordinator.enable_writers().unwrap();
    let mut writer = coordinator.begin(TxnMode::Write, false).unwrap().unwrap();
    writer.abort().unwrap();
    writer.end().unwrap();
}

#[test]
fn second_writer_is_not_admitted_without_blocking() {
    let (coordinator, _counter) = counter_setup(0);

    let mut first = coordinator.begin_write().unwrap();
    assert!(coordinator.begin(TxnMode::Write, false).unwrap().is_none());
    assert_eq!(coordinator.count_active_writer(), 1);

    first.commit().unwrap();
    first.end().unwrap();
    let mut second = coordinator.begin(TxnMode::Write, false).unwrap().unwrap();
    second.commit().unwrap();
    second.end().unwrap();
}

#[test]
fn blocking_writer_waits_for_active_writer() {
    let (coordinator, counter) = counter_setup(0);

    let mut first = coordinator.begin_write().unwrap();
    counter.inc(&first).unwrap();

    let second_counter = Arc::clone(&counter);
    let mut second = ThreadTxn::execute("second-writer", {
        let coordinator = coordinator.clone();
        move || coordinator.execute_write(|txn| second_counter.inc(txn))
    })
    .unwrap();
    second.start();

    // The second writer cannot get in while the first is active.
    assert_eq!(coordinator.count_active_writer(), 1);
    first.commit().unwrap();
    first.end().unwrap();

    assert_eq!(second.run().unwrap(), 2);
    assert_eq!(counter.committed_value(), 2);
}

#[test]
fn exclusive_mode_refused_while_writer_in_flight() {
    let (coordinator, counter) = counter_setup(0);

    let mut writer = coordinator.begin_write().unwrap();
    counter.inc(&writer).unwrap();
    assert!(!coordinator.try_exclusive_mode(false).unwrap());

    writer.commit().unwrap();
    writer.end().unwrap();
    assert!(coordinator.try_exclusive_mode(false).unwrap());
    assert!(coordinator.is_exclusive_mode());
    coordinator.finish_exclusive_mode().unwrap();
}

#[test]
fn exclusive_mode_denies_other_threads() {
    let (coordinator, _counter) = counter_setup(0);
    coordinator.start_exclusive_mode().unwrap();

    let other = coordinator.clone();
    let denied = ThreadTxn::execute("other-thread", move || {
        let write = other.begin(TxnMode::Write, false)?;
        let read = other.begin(TxnMode::Read, false)?;
        Ok((write.is_none(), read.is_none()))
    })
    .unwrap()
    .run()
    .unwrap();
    assert_eq!(denied, (true, true));

    coordinator.finish_exclusive_mode().unwrap();

    let other = coordinator.clone();
    let admitted = ThreadTxn::execute("other-thread", move || {
        let mut read = other.begin(TxnMode::Read, false)?;
        let mut write = other.begin(TxnMode::Write, false)?;
        let both = read.is_some() && write.is_some();
        if let Some(txn) = write.as_mut() {
            txn.abort()?;
            txn.end()?;
        }
        if let Some(txn) = read.as_mut() {
            txn.end()?;
        }
        Ok(both)
    })
    .unwrap()
    .run()
    .unwrap();
    assert!(admitted);
}

#[test]
fn queued_exclusive_request_holds_back_new_readers() {
    let (coordinator, _counter) = counter_setup(0);
    let mut reader = coordinator.begin_read().unwrap();

    let mut exclusive = ThreadTxn::execute("exclusive", {
        let coordinator = coordinator.clone();
        move || coordinator.start_exclusive_mode()
    })
    .unwrap();
    exclusive.start();

    // Once the request is queued, new readers are turned away.
    wait_until("exclusive request to queue", || {
        match coordinator.begin(TxnMode::Read, false).unwrap() {
            None => true,
            Some(mut txn) => {
                txn.end().unwrap();
                false
            }
        }
    });
    assert!(!coordinator.is_exclusive_mode());

    reader.end().unwrap();
    exclusive.run().unwrap();
    assert!(coordinator.is_exclusive_mode());
    coordinator.finish_exclusive_mode().unwrap();
    assert_eq!(coordinator.count_active(), 0);
}

#[test]
fn block_writers_waits_for_active_writer() {
    let (coordinator, counter) = counter_setup(0);
    let mut writer = coordinator.begin_write().unwrap();
    counter.inc(&writer).unwrap();

    assert!(!coordinator.try_block_writers().unwrap());

    let mut blocker = ThreadTxn::execute("blocker", {
        let coordinator = coordinator.clone();
        move || coordinator.block_writers()
    })
    .unwrap();
    blocker.start();

    writer.commit().unwrap();
    writer.end().unwrap();
    blocker.run().unwrap();

    assert!(coordinator.writers_blocked());
    assert!(coordinator.begin(TxnMode::Write, false).unwrap().is_none());
    coordinator.enable_writers().unwrap();
    assert_eq!(counter.committed_value(), 1);
}

#[test]
fn scoped_helpers_restore_admission() {
    let (coordinator, counter) = counter_setup(0);

    let inside = coordinator.exec_exclusive(|| coordinator.is_exclusive_mode()).unwrap();
    assert!(inside);
    assert!(!coordinator.is_exclusive_mode());

    let inside = coordinator.exec_as_writer(|| coordinator.writers_blocked()).unwrap();
    assert!(inside);
    assert!(!coordinator.writers_blocked());

    coordinator.execute_write(|txn| counter.inc(txn)).unwrap();
    assert_eq!(counter.committed_value(), 1);
}

#[test]
fn waiting_requests_are_granted_in_arrival_order() {
    let (coordinator, counter) = counter_setup(0);
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut first = coordinator.begin_write().unwrap();
    counter.inc(&first).unwrap();

    let mut writer = ThreadTxn::execute("queued-writer", {
        let coordinator = coordinator.clone();
        let counter = Arc::clone(&counter);
        let order = Arc::clone(&order);
        move || {
            coordinator.execute_write(|txn| {
                order.lock().push("writer");
                counter.inc(txn)
            })
        }
    })
    .unwrap();
    writer.start();
    wait_until("writer to queue", || coordinator.count_queued() == 1);

    let mut exclusive = ThreadTxn::execute("queued-exclusive", {
        let coordinator = coordinator.clone();
        let order = Arc::clone(&order);
        move || {
            coordinator.start_exclusive_mode()?;
            order.lock().push("exclusive");
            coordinator.finish_exclusive_mode()
        }
    })
    .unwrap();
    exclusive.start();
    wait_until("exclusive request to queue", || coordinator.count_queued() == 2);

    // Nothing jumps the queue.
    assert!(!coordinator.try_block_writers().unwrap());
    assert!(!coordinator.try_exclusive_mode(false).unwrap());
    assert!(coordinator.begin(TxnMode::Write, false).unwrap().is_none());
    assert!(coordinator.begin(TxnMode::Read, false).unwrap().is_none());

    first.commit().unwrap();
    first.end().unwrap();

    assert_eq!(writer.run().unwrap(), 2);
    exclusive.run().unwrap();
    assert_eq!(*order.lock(), vec!["writer", "exclusive"]);
    assert_eq!(coordinator.count_queued(), 0);
    assert!(!coordinator.is_exclusive_mode());
}

#[test]
fn queued_block_writers_goes_before_later_writer() {
    let (coordinator, counter) = counter_setup(0);
    let mut first = coordinator.begin_write().unwrap();

    let mut blocker = ThreadTxn::execute("queued-blocker", {
        let coordinator = coordinator.clone();
        move || coordinator.block_writers()
    })
    .unwrap();
    blocker.start();
    wait_until("blocker to queue", || coordinator.count_queued() == 1);

    let mut writer = ThreadTxn::execute("late-writer", {
        let coordinator = coordinator.clone();
        let counter = Arc::clone(&counter);
        move || coordinator.execute_write(|txn| counter.inc(txn))
    })
    .unwrap();
    writer.start();
    wait_until("writer to queue", || coordinator.count_queued() == 2);

    first.abort().unwrap();
    first.end().unwrap();
    blocker.run().unwrap();

    // The blocker took the slot first; the writer is still waiting.
    assert!(coordinator.writers_blocked());
    assert_eq!(coordinator.count_queued(), 1);
    assert_eq!(counter.committed_value(), 0);

    coordinator.enable_writers().unwrap();
    assert_eq!(writer.run().unwrap(), 1);
}

#[test]
fn try_block_writers_refused_when_already_blocked() {
    let (coordinator, _counter) = counter_setup(0);
    coordinator.block_writers().unwrap();
    assert!(!coordinator.try_block_writers().unwrap());
    coordinator.enable_writers().unwrap();
    assert!(coordinator.try_block_writers().unwrap());
    coordinator.enable_writers().unwrap();
}

// ============================================================================
// Promotion
// ============================================================================

#[test]
fn reader_promotes_to_writer() {
    let (coordinator, counter) = counter_setup(5);
    let mut txn = coordinator.begin_read().unwrap();
    assert!(counter.inc(&txn).is_err());

    assert!(txn.promote().unwrap());
    assert_eq!(txn.mode(), TxnMode::Write);
    assert_eq!(coordinator.count_active_writer(), 1);
    assert_eq!(coordinator.count_active_readers(), 0);
    assert!(coordinator.begin(TxnMode::Write, false).unwrap().is_none());

    assert_eq!(counter.inc(&txn).unwrap(), 6);
    assert!(txn.promote().unwrap());
    txn.commit().unwrap();
    txn.end().unwrap();

    assert_eq!(counter.committed_value(), 6);
    assert_eq!(coordinator.data_version(), DataVersion::new(1));
    assert_eq!(coordinator.count_promoted(), 1);
    assert_eq!(coordinator.count_active(), 0);
}

#[test]
fn promotion_refused_after_intervening_commit() {
    let (coordinator, counter) = counter_setup(0);
    let mut reader = coordinator.begin_read().unwrap();
    coordinator.execute_write(|txn| counter.inc(txn)).unwrap();

    assert!(!reader.promote().unwrap());
    assert_eq!(reader.mode(), TxnMode::Read);
    assert!(reader.is_active());
    assert_eq!(counter.get(&reader).unwrap(), 0);
    assert_eq!(coordinator.count_active_writer(), 0);
    reader.end().unwrap();

    // The slot was given back.
    coordinator.execute_write(|txn| counter.inc(txn)).unwrap();
    assert_eq!(counter.committed_value(), 2);
    assert_eq!(coordinator.count_promoted(), 0);
}

#[test]
fn promotion_waiting_behind_writer_is_refused_when_it_commits() {
    let (coordinator, counter) = counter_setup(0);
    let mut reader = coordinator.begin_read().unwrap();
    let mut writer = coordinator.begin_write().unwrap();
    counter.inc(&writer).unwrap();

    let mut promoting = ThreadTxn::execute("promoting-reader", move || {
        let promoted = reader.promote()?;
        reader.end()?;
        Ok(promoted)
    })
    .unwrap();
    promoting.start();
    wait_until("promotion to queue", || coordinator.count_queued() == 1);

    writer.commit().unwrap();
    writer.end().unwrap();

    assert!(!promoting.run().unwrap());
    assert_eq!(coordinator.count_active(), 0);
    assert_eq!(counter.committed_value(), 1);
}

#[test]
fn read_committed_promotion_moves_to_latest_state() {
    init_tracing();
    let config = Config::new().read_committed_promotion(true);
    let coordinator = TransactionCoordinator::with_config(Journal::in_memory(), config);
    let counter = Arc::new(TransCounter::new(ComponentId::named("counter"), 0));
    coordinator.add(counter.clone()).unwrap();
    coordinator.start().unwrap();

    let mut txn = coordinator.begin_read().unwrap();
    coordinator.execute_write(|w| counter.add(w, 10)).unwrap();
    assert_eq!(counter.get(&txn).unwrap(), 0);

    assert!(txn.promote().unwrap());
    assert_eq!(txn.data_version(), DataVersion::new(1));
    assert_eq!(counter.get(&txn).unwrap(), 10);
    counter.inc(&txn).unwrap();
    txn.commit().unwrap();
    txn.end().unwrap();

    assert_eq!(counter.committed_value(), 11);
}

#[test]
fn promotion_gives_way_to_queued_exclusive_request() {
    let (coordinator, _counter) = counter_setup(0);
    let mut reader = coordinator.begin_read().unwrap();

    let mut exclusive = ThreadTxn::execute("exclusive", {
        let coordinator = coordinator.clone();
        move || coordinator.exec_exclusive(|| ())
    })
    .unwrap();
    exclusive.start();
    wait_until("exclusive request to queue", || coordinator.count_queued() == 1);

    assert!(!reader.promote().unwrap());
    reader.end().unwrap();
    exclusive.run().unwrap();
    assert!(!coordinator.is_exclusive_mode());
}

#[test]
fn component_promote_failure_aborts_reader() {
    init_tracing();
    let coordinator = TransactionCoordinator::in_memory();
    let flaky = Arc::new(Faulty::new(Arc::new(TransCounter::new(
        ComponentId::named("flaky"),
        0,
    ))));
    coordinator.add(flaky.clone()).unwrap();
    coordinator.start().unwrap();

    flaky.fail_promote(true);
    let mut txn = coordinator.begin_read().unwrap();
    assert!(matches!(txn.promote(), Err(TxnError::Component { .. })));
    assert_eq!(txn.state(), TxnState::Aborted);
    txn.end().unwrap();
    assert_eq!(coordinator.count_active(), 0);

    let mut writer = coordinator.begin(TxnMode::Write, false).unwrap().unwrap();
    writer.abort().unwrap();
    writer.end().unwrap();
}

#[test]
fn finished_transaction_cannot_promote() {
    let (coordinator, _counter) = counter_setup(0);
    let mut txn = coordinator.begin_read().unwrap();
    txn.commit().unwrap();
    assert!(txn.promote().unwrap_err().is_protocol());
    txn.end().unwrap();
}

// ============================================================================
// Protocol
// ============================================================================

#[test]
fn double_commit_is_protocol_error() {
    let (coordinator, counter) = counter_setup(0);
    let mut txn = coordinator.begin_write().unwrap();
    counter.inc(&txn).unwrap();

    txn.commit().unwrap();
    assert!(txn.commit().unwrap_err().is_protocol());
    assert_eq!(txn.state(), TxnState::Committed);

    txn.end().unwrap();
    assert_eq!(coordinator.count_active(), 0);
    assert_eq!(counter.committed_value(), 1);
}

#[test]
fn abort_after_commit_is_protocol_error() {
    let (coordinator, counter) = counter_setup(0);
    let mut txn = coordinator.begin_write().unwrap();
    counter.inc(&txn).unwrap();

    txn.commit().unwrap();
    assert!(txn.abort().unwrap_err().is_protocol());
    txn.end().unwrap();
    assert_eq!(coordinator.count_active(), 0);
    assert_eq!(counter.committed_value(), 1);
}

#[test]
fn commit_after_abort_is_protocol_error() {
    let (coordinator, counter) = counter_setup(0);
    let mut txn = coordinator.begin_write().unwrap();
    counter.inc(&txn).unwrap();

    txn.abort().unwrap();
    assert!(txn.commit().unwrap_err().is_protocol());
    assert_eq!(txn.state(), TxnState::Aborted);
    txn.end().unwrap();
    assert_eq!(coordinator.count_active(), 0);
    assert_eq!(counter.committed_value(), 0);
}

#[test]
fn ending_active_writer_is_refused() {
    let (coordinator, _counter) = counter_setup(0);
    let mut txn = coordinator.begin_write().unwrap();

    assert!(txn.end().unwrap_err().is_protocol());
    assert!(txn.is_active());
    assert_eq!(coordinator.count_active(), 1);

    txn.abort().unwrap();
    txn.end().unwrap();
    txn.end().unwrap();
    assert_eq!(coordinator.count_active(), 0);
}

#[test]
fn handle_cannot_begin_twice() {
    let (coordinator, _counter) = counter_setup(0);
    let mut txn = coordinator.begin_read().unwrap();
    assert!(txn.begin().unwrap_err().is_protocol());
    txn.end().unwrap();
    assert!(txn.begin().unwrap_err().is_protocol());
}

#[test]
fn enable_writers_without_block_is_protocol_error() {
    let (coordinator, _counter) = counter_setup(0);
    assert!(coordinator.enable_writers().unwrap_err().is_protocol());
    assert!(coordinator.finish_exclusive_mode().unwrap_err().is_protocol());
}

#[test]
fn dropped_writer_is_aborted() {
    let (coordinator, counter) = counter_setup(0);
    {
        let txn = coordinator.begin_write().unwrap();
        counter.set(&txn, 50).unwrap();
    }
    assert_eq!(coordinator.count_active(), 0);
    assert_eq!(counter.committed_value(), 0);
    assert!(coordinator.begin(TxnMode::Write, false).unwrap().is_some());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn read_sequences_leave_nothing_active(endings in proptest::collection::vec(0u8..3, 0..24)) {
        let coordinator = TransactionCoordinator::in_memory();
        coordinator.start().unwrap();

        for ending in endings.iter().copied() {
            let mut txn = coordinator.begin(TxnMode::Read, false).unwrap().unwrap();
            match ending {
                0 => {}
                1 => txn.commit().unwrap(),
                _ => txn.abort().unwrap(),
            }
            txn.end().unwrap();
        }

        prop_assert_eq!(coordinator.count_active(), 0);
        prop_assert_eq!(coordinator.count_begin(), coordinator.count_finished());
        prop_assert_eq!(coordinator.count_begin_read(), endings.len() as u64);
    }
}

#[test]
fn selector_limits_transaction_to_chosen_components() {
    init_tracing();
    let coordinator = TransactionCoordinator::in_memory();
    let nodes = Arc::new(TransCounter::new(ComponentId::named("nodes"), 0));
    let spo = Arc::new(TransCounter::new(ComponentId::named("spo"), 0));
    coordinator.add(nodes.clone()).unwrap();
    coordinator.add(spo.clone()).unwrap();
    let nodes_id = ComponentId::named("nodes");
    coordinator
        .set_component_selector(Arc::new(move |mode: TxnMode| {
            (mode == TxnMode::Read).then(|| vec![nodes_id])
        }))
        .unwrap();
    coordinator.start().unwrap();

    let mut reader = coordinator.begin_read().unwrap();
    assert_eq!(nodes.get(&reader).unwrap(), 0);
    assert!(spo.get(&reader).is_err());
    reader.end().unwrap();

    coordinator
        .execute_write(|txn| {
            nodes.inc(txn)?;
            spo.inc(txn)
        })
        .unwrap();
    assert_eq!(spo.committed_value(), 1);
    assert_eq!(coordinator.count_active(), 0);

    let everything = |_: TxnMode| -> Option<Vec<ComponentId>> { None };
    assert!(matches!(
        coordinator.set_component_selector(Arc::new(everything)),
        Err(TxnError::ConfigurationLocked)
    ));
}

// ============================================================================
// Component failures
// ============================================================================

#[test]
fn prepare_failure_aborts_whole_transaction() {
    init_tracing();
    let coordinator = TransactionCoordinator::in_memory();
    let healthy = Arc::new(TransCounter::new(ComponentId::named("healthy"), 0));
    let flaky = Arc::new(Faulty::new(Arc::new(TransCounter::new(
        ComponentId::named("flaky"),
        0,
    ))));
    coordinator.add(healthy.clone()).unwrap();
    coordinator.add(flaky.clone()).unwrap();
    coordinator.start().unwrap();

    flaky.fail_prepare(true);
    let mut txn = coordinator.begin_write().unwrap();
    healthy.inc(&txn).unwrap();

    let err = txn.commit().unwrap_err();
    assert!(matches!(err, TxnError::PrepareFailed { component, .. } if component == ComponentId::named("flaky")));
    assert_eq!(txn.state(), TxnState::Aborted);
    txn.end().unwrap();

    assert_eq!(healthy.committed_value(), 0);
    assert!(coordinator.journal().is_empty().unwrap());
    assert_eq!(coordinator.count_active(), 0);
    assert_eq!(coordinator.data_version(), DataVersion::new(0));
}

#[test]
fn component_begin_failure_rolls_back_admission() {
    init_tracing();
    let coordinator = TransactionCoordinator::in_memory();
    let flaky = Arc::new(Faulty::new(Arc::new(TransCounter::new(
        ComponentId::named("flaky"),
        0,
    ))));
    coordinator.add(flaky.clone()).unwrap();
    coordinator.start().unwrap();

    flaky.fail_begin(true);
    assert!(matches!(
        coordinator.begin_write(),
        Err(TxnError::Component { .. })
    ));
    assert_eq!(coordinator.count_active(), 0);
    assert_eq!(coordinator.count_begin(), coordinator.count_finished());

    flaky.fail_begin(false);
    let mut txn = coordinator.begin(TxnMode::Write, false).unwrap().unwrap();
    txn.commit().unwrap();
    txn.end().unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn begin_before_start_is_rejected() {
    let coordinator = TransactionCoordinator::in_memory();
    assert!(matches!(coordinator.begin_read(), Err(TxnError::NotStarted)));
}

#[test]
fn configuration_is_locked_after_start() {
    init_tracing();
    let coordinator = TransactionCoordinator::in_memory();
    let counter = Arc::new(TransCounter::new(ComponentId::named("counter"), 0));
    coordinator.add(counter.clone()).unwrap();
    assert!(matches!(
        coordinator.add(counter.clone()),
        Err(TxnError::DuplicateComponent { .. })
    ));
    coordinator.start().unwrap();

    let late = Arc::new(TransCounter::new(ComponentId::named("late"), 0));
    assert!(matches!(coordinator.add(late), Err(TxnError::ConfigurationLocked)));
    assert!(matches!(
        coordinator.add_listener(Arc::new(Recorder::default())),
        Err(TxnError::ConfigurationLocked)
    ));
    assert!(coordinator.start().unwrap_err().is_protocol());
    assert_eq!(coordinator.component_ids(), vec![ComponentId::named("counter")]);
}

#[test]
fn removed_component_takes_no_part() {
    init_tracing();
    let coordinator = TransactionCoordinator::in_memory();
    let kept = Arc::new(TransCounter::new(ComponentId::named("kept"), 0));
    let dropped = Arc::new(TransCounter::new(ComponentId::named("dropped"), 0));
    coordinator.add(kept.clone()).unwrap();
    coordinator.add(dropped.clone()).unwrap();

    assert!(coordinator.remove(ComponentId::named("dropped")).unwrap().is_some());
    assert!(coordinator.remove(ComponentId::named("dropped")).unwrap().is_none());
    coordinator.start().unwrap();

    let mut txn = coordinator.begin_read().unwrap();
    assert!(kept.get(&txn).is_ok());
    assert!(dropped.get(&txn).is_err());
    txn.end().unwrap();
}

#[test]
fn listeners_observe_lifecycle() {
    init_tracing();
    let coordinator = TransactionCoordinator::in_memory();
    let counter = Arc::new(TransCounter::new(ComponentId::named("counter"), 0));
    let recorder = Arc::new(Recorder::default());
    coordinator.add(counter.clone()).unwrap();
    coordinator.add_listener(recorder.clone()).unwrap();
    coordinator.start().unwrap();

    coordinator.execute_write(|txn| counter.inc(txn)).unwrap();
    let mut aborted = coordinator.begin_write().unwrap();
    aborted.abort().unwrap();
    aborted.end().unwrap();
    let mut reader = coordinator.begin_read().unwrap();
    reader.end().unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            "begin 1 WRITE",
            "prepare 1 WRITE",
            "commit 1 WRITE",
            "end 1 WRITE",
            "begin 2 WRITE",
            "abort 2 WRITE",
            "end 2 WRITE",
            "begin 3 READ",
            "end 3 READ",
        ]
    );
}

#[test]
fn shutdown_runs_hooks_and_rejects_new_work() {
    init_tracing();
    let coordinator = TransactionCoordinator::in_memory();
    let hooked = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&hooked);
    coordinator
        .add_shutdown_hook(move || flag.store(true, Ordering::SeqCst))
        .unwrap();
    coordinator.start().unwrap();

    coordinator.shutdown().unwrap();
    assert!(hooked.load(Ordering::SeqCst));
    assert!(coordinator.is_shutdown());
    assert!(!coordinator.is_running());
    assert!(matches!(coordinator.begin_read(), Err(TxnError::Shutdown)));
    assert!(matches!(
        coordinator.add_shutdown_hook(|| {}),
        Err(TxnError::Shutdown)
    ));

    coordinator.shutdown().unwrap();
    coordinator.release().unwrap();
}

#[test]
fn shutdown_waits_for_active_transactions() {
    let (coordinator, counter) = counter_setup(1);
    let mut reader = coordinator.begin_read().unwrap();

    let mut closer = ThreadTxn::execute("closer", {
        let coordinator = coordinator.clone();
        move || coordinator.shutdown()
    })
    .unwrap();
    closer.start();

    wait_until("shutdown to begin", || !coordinator.is_running());
    assert!(!coordinator.is_shutdown());
    assert!(matches!(coordinator.begin_read(), Err(TxnError::Shutdown)));
    assert_eq!(counter.get(&reader).unwrap(), 1);

    reader.end().unwrap();
    closer.run().unwrap();
    assert!(coordinator.is_shutdown());
}

#[test]
fn shutdown_wakes_queued_writer() {
    let (coordinator, _counter) = counter_setup(0);
    let mut writer = coordinator.begin_write().unwrap();

    let mut waiting = ThreadTxn::execute("queued-writer", {
        let coordinator = coordinator.clone();
        move || coordinator.begin_write().map(|_| ())
    })
    .unwrap();
    waiting.start();

    let mut closer = ThreadTxn::execute("closer", {
        let coordinator = coordinator.clone();
        move || coordinator.shutdown()
    })
    .unwrap();
    closer.start();

    assert!(matches!(waiting.run(), Err(TxnError::Shutdown)));
    writer.abort().unwrap();
    writer.end().unwrap();
    closer.run().unwrap();
}
