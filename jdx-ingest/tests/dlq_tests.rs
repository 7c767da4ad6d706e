//! Dead letter queue lifecycle tests

mod helpers;

use helpers::{format_a_artifact, manual_artifact, TestEnv};
use jdx_common::config::SourceRuleConfig;
use jdx_common::events::JdxEvent;
use jdx_ingest::db::failed_rows;
use jdx_ingest::models::{BatchSource, FailedRowEntry, FailedRowFilter, ResolutionStatus};
use jdx_ingest::services::{DlqError, RetryOutcome, RuleTable};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Submit an export_format_a batch and return its failed rows
async fn batch_with_failures(env: &TestEnv, total: usize, missing: &[usize]) -> (Uuid, Vec<FailedRowEntry>) {
    let summary = env
        .coordinator
        .submit_batch("a.csv", &format_a_artifact(total, missing), BatchSource::ExportFormatA)
        .await
        .unwrap();
    let page = env
        .coordinator
        .dlq()
        .list_failed_rows(
            &FailedRowFilter {
                status: None,
                batch_id: Some(summary.batch_id),
            },
            1,
            100,
        )
        .await
        .unwrap();
    (summary.batch_id, page.items)
}

fn require_county() -> RuleTable {
    let mut overrides = BTreeMap::new();
    overrides.insert(
        "manual".to_string(),
        SourceRuleConfig {
            required_fields: Some(vec!["case_number".to_string(), "county".to_string()]),
            column_aliases: BTreeMap::new(),
        },
    );
    RuleTable::from_config(&overrides).unwrap()
}

#[tokio::test]
async fn test_retry_of_still_invalid_row_counts_attempts() {
    let env = TestEnv::new().await;
    let (_, failed) = batch_with_failures(&env, 4, &[2]).await;
    let id = failed[0].id;

    for attempt in 1..=3 {
        let outcome = env.coordinator.dlq().retry_failed_row(id).await.unwrap();
        assert!(!outcome.succeeded());
        let entry = outcome.into_entry();
        assert_eq!(entry.retry_count, attempt);
        assert_eq!(entry.resolution_status, ResolutionStatus::Pending);
        assert_eq!(entry.error_message, "missing required field: defendant_name");
    }
}

#[tokio::test]
async fn test_retry_revalidates_with_current_rules() {
    let env = TestEnv::with_rules(require_county()).await;
    let summary = env
        .coordinator
        .submit_batch("m.csv", b"case_number,county\nA,Kings\nB,\n", BatchSource::Manual)
        .await
        .unwrap();
    assert_eq!(summary.row_count_invalid, Some(1));

    let entry = env
        .coordinator
        .dlq()
        .list_failed_rows(&FailedRowFilter::default(), 1, 10)
        .await
        .unwrap()
        .items
        .remove(0);
    assert_eq!(entry.error_message, "missing required field: county");

    // Rules relaxed after the batch ran
    let relaxed = env.coordinator_with_rules(RuleTable::builtin());
    let outcome = relaxed.dlq().retry_failed_row(entry.id).await.unwrap();
    assert!(matches!(outcome, RetryOutcome::Resolved(_)));
    assert_eq!(env.stored_judgments(summary.batch_id).await, 2);
}

#[tokio::test]
async fn test_retry_of_resolved_entry_never_duplicates() {
    let env = TestEnv::with_rules(require_county()).await;
    let summary = env
        .coordinator
        .submit_batch("m.csv", b"case_number,county\nA,\n", BatchSource::Manual)
        .await
        .unwrap();
    let id = env
        .coordinator
        .dlq()
        .list_failed_rows(&FailedRowFilter::default(), 1, 10)
        .await
        .unwrap()
        .items[0]
        .id;

    let relaxed = env.coordinator_with_rules(RuleTable::builtin());
    assert!(matches!(
        relaxed.dlq().retry_failed_row(id).await.unwrap(),
        RetryOutcome::Resolved(_)
    ));

    // Even with the stored row removed, a resolved entry is not re-processed
    sqlx::query("DELETE FROM judgments WHERE batch_id = ?")
        .bind(summary.batch_id.to_string())
        .execute(&env.pool)
        .await
        .unwrap();
    for _ in 0..2 {
        let outcome = relaxed.dlq().retry_failed_row(id).await.unwrap();
        assert!(matches!(outcome, RetryOutcome::AlreadyResolved(_)));
        assert!(outcome.succeeded());
    }
    assert_eq!(env.stored_judgments(summary.batch_id).await, 0);

    let err = relaxed.dlq().ignore_failed_row(id, None).await.unwrap_err();
    assert!(matches!(err, DlqError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_retry_rejected_while_scheduled() {
    let env = TestEnv::new().await;
    let (_, failed) = batch_with_failures(&env, 3, &[1]).await;
    let id = failed[0].id;

    assert!(failed_rows::claim_for_retry(&env.pool, id, jdx_common::time::now())
        .await
        .unwrap());

    let err = env.coordinator.dlq().retry_failed_row(id).await.unwrap_err();
    assert!(matches!(err, DlqError::RetryInProgress(_)));
    let err = env.coordinator.dlq().ignore_failed_row(id, None).await.unwrap_err();
    assert!(matches!(err, DlqError::RetryInProgress(_)));

    // Rejection leaves the claim and the count untouched
    let entry = env.coordinator.dlq().get_failed_row(id).await.unwrap();
    assert_eq!(entry.resolution_status, ResolutionStatus::RetryScheduled);
    assert_eq!(entry.retry_count, 0);
}

#[tokio::test]
async fn test_ignore_is_idempotent_and_blocks_retry() {
    let env = TestEnv::new().await;
    let (batch_id, failed) = batch_with_failures(&env, 3, &[3]).await;
    let id = failed[0].id;
    let mut rx = env.event_bus.subscribe();

    let ignored = env
        .coordinator
        .dlq()
        .ignore_failed_row(id, Some("duplicate of CV-2024-0002"))
        .await
        .unwrap();
    assert_eq!(ignored.resolution_status, ResolutionStatus::Ignored);
    assert_eq!(ignored.resolution_notes.as_deref(), Some("duplicate of CV-2024-0002"));

    match rx.try_recv().unwrap() {
        JdxEvent::FailedRowIgnored { row_id, batch_id: event_batch, .. } => {
            assert_eq!(row_id, id);
            assert_eq!(event_batch, batch_id);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Second ignore: same entry back, no new event
    let again = env.coordinator.dlq().ignore_failed_row(id, Some("other")).await.unwrap();
    assert_eq!(again, ignored);
    assert!(rx.try_recv().is_err());

    let err = env.coordinator.dlq().retry_failed_row(id).await.unwrap_err();
    assert!(matches!(err, DlqError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_unknown_entry_is_not_found() {
    let env = TestEnv::new().await;
    let id = Uuid::new_v4();

    assert!(matches!(
        env.coordinator.dlq().retry_failed_row(id).await.unwrap_err(),
        DlqError::NotFound(_)
    ));
    assert!(matches!(
        env.coordinator.dlq().ignore_failed_row(id, None).await.unwrap_err(),
        DlqError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_concurrent_retries_process_row_once() {
    let env = TestEnv::new().await;
    env.inject_persist_fault("B").await;
    let summary = env
        .coordinator
        .submit_batch("m.csv", &manual_artifact(&["A", "B"]), BatchSource::Manual)
        .await
        .unwrap();
    env.clear_persist_fault().await;

    let id = env
        .coordinator
        .dlq()
        .list_failed_rows(&FailedRowFilter::default(), 1, 10)
        .await
        .unwrap()
        .items[0]
        .id;

    let dlq = env.coordinator.dlq();
    let (first, second) = tokio::join!(dlq.retry_failed_row(id), dlq.retry_failed_row(id));

    let resolved = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Ok(RetryOutcome::Resolved(_))))
        .count();
    assert_eq!(resolved, 1);
    for result in [&first, &second] {
        assert!(matches!(
            result,
            Ok(RetryOutcome::Resolved(_))
                | Ok(RetryOutcome::AlreadyResolved(_))
                | Err(DlqError::RetryInProgress(_))
        ));
    }
    assert_eq!(env.stored_judgments(summary.batch_id).await, 2);
}

#[tokio::test]
async fn test_retry_reports_conflict_when_claim_is_released_underneath() {
    let env = TestEnv::new().await;
    env.inject_persist_fault("B").await;
    let summary = env
        .coordinator
        .submit_batch("m.csv", &manual_artifact(&["A", "B"]), BatchSource::Manual)
        .await
        .unwrap();
    env.clear_persist_fault().await;

    let id = env
        .coordinator
        .dlq()
        .list_failed_rows(&FailedRowFilter::default(), 1, 10)
        .await
        .unwrap()
        .items[0]
        .id;

    // Release the claim while the row is being stored, as startup recovery would
    sqlx::query(
        "CREATE TRIGGER release_claim_mid_retry AFTER INSERT ON judgments \
         BEGIN UPDATE failed_row_entries SET resolution_status = 'pending' \
         WHERE resolution_status = 'retry_scheduled'; END",
    )
    .execute(&env.pool)
    .await
    .unwrap();

    let err = env.coordinator.dlq().retry_failed_row(id).await.unwrap_err();
    assert!(matches!(err, DlqError::Storage(jdx_common::Error::Conflict(_))));

    let entry = env.coordinator.dlq().get_failed_row(id).await.unwrap();
    assert_eq!(entry.resolution_status, ResolutionStatus::Pending);
    assert_eq!(entry.retry_count, 0);

    sqlx::query("DROP TRIGGER release_claim_mid_retry")
        .execute(&env.pool)
        .await
        .unwrap();

    // The row is already stored; the next retry resolves without duplicating it
    let outcome = env.coordinator.dlq().retry_failed_row(id).await.unwrap();
    assert!(matches!(outcome, RetryOutcome::Resolved(_)));
    assert_eq!(env.stored_judgments(summary.batch_id).await, 2);
}

#[tokio::test]
async fn test_listing_filters_and_pages() {
    let env = TestEnv::new().await;
    let (first_batch, failed) = batch_with_failures(&env, 10, &[1, 2, 3, 4, 5]).await;
    let (second_batch, _) = batch_with_failures(&env, 4, &[4]).await;

    env.coordinator
        .dlq()
        .ignore_failed_row(failed[0].id, None)
        .await
        .unwrap();

    let dlq = env.coordinator.dlq();

    let all = dlq.list_failed_rows(&FailedRowFilter::default(), 1, 100).await.unwrap();
    assert_eq!(all.total_items, 6);

    let pending = dlq
        .list_failed_rows(
            &FailedRowFilter {
                status: Some(ResolutionStatus::Pending),
                batch_id: None,
            },
            1,
            100,
        )
        .await
        .unwrap();
    assert_eq!(pending.total_items, 5);
    assert!(pending
        .items
        .iter()
        .all(|e| e.resolution_status == ResolutionStatus::Pending));

    let second = dlq
        .list_failed_rows(
            &FailedRowFilter {
                status: None,
                batch_id: Some(second_batch),
            },
            1,
            100,
        )
        .await
        .unwrap();
    assert_eq!(second.total_items, 1);
    assert_eq!(second.items[0].row_index, 4);

    let page_two = dlq
        .list_failed_rows(
            &FailedRowFilter {
                status: None,
                batch_id: Some(first_batch),
            },
            2,
            2,
        )
        .await
        .unwrap();
    assert_eq!(page_two.page, 2);
    assert_eq!(page_two.total_pages, 3);
    let indexes: Vec<i64> = page_two.items.iter().map(|e| e.row_index).collect();
    assert_eq!(indexes, vec![3, 4]);
}

#[tokio::test]
async fn test_failed_rows_cannot_be_deleted() {
    let env = TestEnv::new().await;
    let (_, failed) = batch_with_failures(&env, 2, &[1]).await;

    let result = sqlx::query("DELETE FROM failed_row_entries WHERE id = ?")
        .bind(failed[0].id.to_string())
        .execute(&env.pool)
        .await;
    assert!(result.is_err());

    let result = sqlx::query("UPDATE failed_row_entries SET retry_count = -1 WHERE id = ?")
        .bind(failed[0].id.to_string())
        .execute(&env.pool)
        .await;
    assert!(result.is_err());
}
