use anyhow::{Context, Result};
use epochsync::{EpochStage, HeadOutcome};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::support::{
    helpers::{
        fast_config, wait_for_fetch_start, wait_for_latest_epoch, wait_for_subscription,
        wait_until, Harness, WAIT,
    },
    mock_chain::{first_slot, head_event},
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transition_event_processes_new_epoch() -> Result<()> {
    let harness = Harness::new(2);
    let (_service, task) = harness.service(fast_config())?;

    let handle = task.spawn(&CancellationToken::new());
    wait_for_subscription(&harness.chain, WAIT).await?;
    assert_eq!(harness.latest_epoch()?, Some(2));

    harness.chain_time.set_current_epoch(3);
    harness.chain.send_head(head_event(first_slot(3), true)).await?;
    wait_for_latest_epoch(&harness, 3, WAIT).await?;

    assert_eq!(harness.chain.fetched(), vec![0, 1, 2, 3]);
    assert_eq!(harness.telemetry.head_events(), 1);

    handle.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn head_within_epoch_is_ignored() -> Result<()> {
    let harness = Harness::new(3);
    harness.seed_latest_epoch(2)?;
    let (service, _task) = harness.service(fast_config())?;
    let cancel = CancellationToken::new();

    let outcome = service
        .on_head_updated(head_event(first_slot(3) + 1, false), &cancel)
        .await;

    assert!(matches!(outcome, HeadOutcome::Ignored), "got {outcome:?}");
    assert!(harness.chain.started().is_empty());
    assert_eq!(harness.store.memory().transactions_begun()?, 0);
    assert_eq!(harness.telemetry.head_events(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn epochs_covered_by_progress_are_skipped() -> Result<()> {
    let harness = Harness::new(6);
    harness.seed_latest_epoch(5)?;
    let (service, _task) = harness.service(fast_config())?;
    let cancel = CancellationToken::new();

    for epoch in [4, 5] {
        let outcome = service
            .on_head_updated(head_event(first_slot(epoch), true), &cancel)
            .await;
        match outcome {
            HeadOutcome::AlreadyProcessed(skipped) => assert_eq!(skipped, epoch),
            other => panic!("epoch {epoch} should be skipped, got {other:?}"),
        }
    }
    assert!(harness.chain.started().is_empty());

    let outcome = service
        .on_head_updated(head_event(first_slot(6), true), &cancel)
        .await;
    match outcome {
        HeadOutcome::Processed { epoch, committees } => {
            assert_eq!(epoch, 6);
            assert!(committees > 0);
        }
        other => panic!("epoch 6 should be processed, got {other:?}"),
    }
    assert_eq!(harness.latest_epoch()?, Some(6));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn epoch_zero_is_rewritten_while_progress_is_zero() -> Result<()> {
    let harness = Harness::new(0);
    let (service, _task) = harness.service(fast_config())?;
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let outcome = service
            .on_head_updated(head_event(first_slot(0), true), &cancel)
            .await;
        assert!(
            matches!(outcome, HeadOutcome::Processed { epoch: 0, .. }),
            "got {outcome:?}"
        );
    }

    assert_eq!(harness.chain.fetched(), vec![0, 0]);
    assert_eq!(harness.store.memory().committee_commit_count(0, 0)?, 2);
    assert_eq!(harness.latest_epoch()?, Some(0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn metadata_failure_fails_only_the_event() -> Result<()> {
    let harness = Harness::new(3);
    harness.store.fail_metadata_reads();
    let (service, _task) = harness.service(fast_config())?;
    let cancel = CancellationToken::new();

    let outcome = service
        .on_head_updated(head_event(first_slot(3), true), &cancel)
        .await;

    match outcome {
        HeadOutcome::Failed(err) => {
            assert_eq!(err.epoch(), 3);
            assert_eq!(err.stage(), EpochStage::ReadMetadata);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(harness.chain.started().is_empty());
    assert_eq!(harness.telemetry.epoch_failures(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_event_does_not_stop_listening() -> Result<()> {
    let harness = Harness::new(2);
    harness.chain.fail_epoch(3);
    let (_service, task) = harness.service(fast_config())?;

    let handle = task.spawn(&CancellationToken::new());
    wait_for_subscription(&harness.chain, WAIT).await?;

    harness.chain.send_head(head_event(first_slot(3), true)).await?;
    wait_until(WAIT, "epoch 3 failure", || harness.telemetry.epoch_failures() == 1).await?;
    assert_eq!(harness.latest_epoch()?, Some(2));
    assert!(handle.fatal_error().is_none());

    harness.chain.heal_epoch(3);
    harness.chain.send_head(head_event(first_slot(4), true)).await?;
    wait_for_latest_epoch(&harness, 4, WAIT).await?;
    assert_eq!(harness.committed_epochs()?, vec![0, 1, 2, 3, 4]);
    assert_eq!(harness.chain.fetched(), vec![0, 1, 2, 3, 4]);

    handle.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn skipped_epoch_is_filled_before_progress_advances() -> Result<()> {
    let harness = Harness::new(5);
    harness.seed_latest_epoch(3)?;
    harness.chain.fail_epoch(4);
    let (service, _task) = harness.service(fast_config())?;
    let cancel = CancellationToken::new();

    let outcome = service
        .on_head_updated(head_event(first_slot(4), true), &cancel)
        .await;
    assert!(matches!(outcome, HeadOutcome::Failed(_)), "got {outcome:?}");
    assert_eq!(harness.latest_epoch()?, Some(3));

    harness.chain.heal_epoch(4);
    let outcome = service
        .on_head_updated(head_event(first_slot(5), true), &cancel)
        .await;
    match outcome {
        HeadOutcome::Backfilled { from, to, epochs } => {
            assert_eq!((from, to, epochs), (4, 5, 2));
        }
        other => panic!("expected the gap to be filled, got {other:?}"),
    }

    assert_eq!(harness.latest_epoch()?, Some(5));
    assert_eq!(harness.committed_epochs()?, vec![4, 5]);
    assert_eq!(harness.chain.fetched(), vec![4, 5]);
    assert!(!service.is_catching_up());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gap_that_cannot_be_filled_keeps_progress() -> Result<()> {
    let harness = Harness::new(6);
    harness.seed_latest_epoch(2)?;
    harness.chain.fail_epoch(4);
    let (service, _task) = harness.service(fast_config())?;
    let cancel = CancellationToken::new();

    let outcome = service
        .on_head_updated(head_event(first_slot(6), true), &cancel)
        .await;
    match outcome {
        HeadOutcome::Failed(err) => {
            assert_eq!(err.epoch(), 4);
            assert_eq!(err.stage(), EpochStage::Fetch);
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert_eq!(harness.latest_epoch()?, Some(3));
    assert_eq!(harness.committed_epochs()?, vec![3]);
    assert_eq!(harness.chain.started(), vec![3, 4], "epoch 6 must not be written past the gap");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gap_is_deferred_while_catch_up_holds_guard() -> Result<()> {
    let harness = Harness::new(4);
    harness.seed_latest_epoch(1)?;
    harness.chain.pause_fetches();
    let (service, _task) = harness.service(fast_config())?;
    let cancel = CancellationToken::new();

    let running = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.catch_up_range(2, 2, &cancel).await })
    };
    wait_for_fetch_start(&harness.chain, 1, WAIT).await?;

    let outcome = service
        .on_head_updated(head_event(first_slot(4), true), &cancel)
        .await;
    assert!(matches!(outcome, HeadOutcome::Deferred(4)), "got {outcome:?}");
    assert_eq!(harness.telemetry.guard_denials(), 1);
    assert_eq!(harness.chain.started(), vec![2]);

    harness.chain.resume_fetches();
    running.await?.context("catch-up admitted")?;
    assert_eq!(harness.latest_epoch()?, Some(2));
    assert_eq!(harness.committed_epochs()?, vec![2]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn events_are_handled_in_arrival_order() -> Result<()> {
    let harness = Harness::new(1);
    let (_service, task) = harness.service(fast_config())?;

    let handle = task.spawn(&CancellationToken::new());
    wait_for_subscription(&harness.chain, WAIT).await?;

    for epoch in 2..=5 {
        harness.chain.send_head(head_event(first_slot(epoch) + 1, false)).await?;
        harness.chain.send_head(head_event(first_slot(epoch), true)).await?;
    }
    wait_for_latest_epoch(&harness, 5, WAIT).await?;

    assert_eq!(harness.chain.fetched(), vec![0, 1, 2, 3, 4, 5]);
    wait_until(WAIT, "all head events counted", || {
        harness.telemetry.head_events() == 8
    })
    .await?;

    handle.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn closed_head_stream_is_fatal() -> Result<()> {
    let harness = Harness::new(1);
    let (_service, task) = harness.service(fast_config())?;
    let root = CancellationToken::new();

    let handle = task.spawn(&root);
    wait_for_subscription(&harness.chain, WAIT).await?;
    harness.chain.close_head_stream();

    let fatal = timeout(WAIT, handle.wait_for_fatal())
        .await
        .context("fatal error was not raised")?;
    let rendered = format!("{fatal:#}");
    assert!(
        rendered.contains("beacon chain head updates stopped"),
        "got {rendered}"
    );
    assert!(root.is_cancelled());
    assert!(handle.stop().await.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_stops_listener_cleanly() -> Result<()> {
    let harness = Harness::new(1);
    let (_service, task) = harness.service(fast_config())?;
    let root = CancellationToken::new();

    let handle = task.spawn(&root);
    wait_for_subscription(&harness.chain, WAIT).await?;
    assert!(!handle.is_finished());

    root.cancel();
    wait_until(WAIT, "sync task to exit", || handle.is_finished()).await?;
    assert!(handle.fatal_error().is_none());
    handle.stop().await?;
    Ok(())
}
