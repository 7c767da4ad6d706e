//! End-to-end ingestion tests: submit → validate → persist/dead-letter → verify

mod helpers;

use helpers::{format_a_artifact, manual_artifact, TestEnv};
use jdx_common::events::JdxEvent;
use jdx_ingest::db::{batches, failed_rows};
use jdx_ingest::models::{
    Batch, BatchSource, BatchStatus, DiscrepancyType, FailedRowFilter, IntegrityStatus,
    ResolutionStatus,
};
use jdx_ingest::services::{FormatError, IngestError, RetryOutcome};

#[tokio::test]
async fn test_partial_success_batch_is_verified() {
    let env = TestEnv::new().await;

    let summary = env
        .coordinator
        .submit_batch("export_a.csv", &format_a_artifact(10, &[3, 7]), BatchSource::ExportFormatA)
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.row_count_raw, Some(10));
    assert_eq!(summary.row_count_valid, Some(8));
    assert_eq!(summary.row_count_invalid, Some(2));
    assert_eq!(summary.integrity_status, Some(IntegrityStatus::Verified));
    assert_eq!(summary.integrity_score, Some(100.0));
    assert!(summary.completed_at.is_some());

    let record = env
        .coordinator
        .verifier()
        .current_record(summary.batch_id)
        .await
        .unwrap();
    assert_eq!(record.csv_row_count, 8);
    assert_eq!(record.db_row_count, 8);

    let failed = env
        .coordinator
        .dlq()
        .list_failed_rows(
            &FailedRowFilter {
                status: None,
                batch_id: Some(summary.batch_id),
            },
            1,
            50,
        )
        .await
        .unwrap();
    let indexes: Vec<i64> = failed.items.iter().map(|e| e.row_index).collect();
    assert_eq!(indexes, vec![3, 7]);
    for entry in &failed.items {
        assert_eq!(entry.discrepancy_type, DiscrepancyType::ValidationFailed);
        assert_eq!(entry.resolution_status, ResolutionStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.error_message, "missing required field: defendant_name");
        assert_eq!(entry.raw_data.source, BatchSource::ExportFormatA);
        assert_eq!(entry.raw_data.get("debtor"), None);
        assert!(entry.raw_data.get("case_no").is_some());
    }
}

#[tokio::test]
async fn test_persistence_fault_is_dead_lettered_and_retry_resolves() {
    let env = TestEnv::new().await;
    env.inject_persist_fault("CV-3").await;

    let summary = env
        .coordinator
        .submit_batch(
            "manual.csv",
            &manual_artifact(&["CV-1", "CV-2", "CV-3", "CV-4", "CV-5"]),
            BatchSource::Manual,
        )
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.row_count_valid, Some(4));
    assert_eq!(summary.row_count_invalid, Some(1));
    assert_eq!(env.stored_judgments(summary.batch_id).await, 4);

    let failed = env
        .coordinator
        .dlq()
        .list_failed_rows(&FailedRowFilter::default(), 1, 50)
        .await
        .unwrap();
    assert_eq!(failed.total_items, 1);
    let entry = &failed.items[0];
    assert_eq!(entry.discrepancy_type, DiscrepancyType::PersistenceFailed);
    assert_eq!(entry.row_index, 3);
    assert!(entry.error_message.contains("connectivity fault"));

    // Fault still present: retry fails and counts the attempt
    let outcome = env.coordinator.dlq().retry_failed_row(entry.id).await.unwrap();
    assert!(matches!(outcome, RetryOutcome::StillFailing(_)));
    assert_eq!(outcome.entry().retry_count, 1);
    assert_eq!(outcome.entry().resolution_status, ResolutionStatus::Pending);

    env.clear_persist_fault().await;
    let outcome = env.coordinator.dlq().retry_failed_row(entry.id).await.unwrap();
    match outcome {
        RetryOutcome::Resolved(resolved) => {
            assert_eq!(resolved.resolution_status, ResolutionStatus::Resolved);
            assert_eq!(resolved.retry_count, 1);
            assert!(resolved.resolution_notes.is_some());
        }
        other => panic!("expected Resolved, got {:?}", other),
    }
    assert_eq!(env.stored_judgments(summary.batch_id).await, 5);

    // Batch counters are frozen; the verifier expects the resolved row too
    let batch = batches::load_batch(&env.pool, summary.batch_id).await.unwrap().unwrap();
    assert_eq!(batch.row_count_valid, Some(4));
    let record = env
        .coordinator
        .verifier()
        .check_batch_integrity(summary.batch_id)
        .await
        .unwrap();
    assert_eq!(record.csv_row_count, 5);
    assert_eq!(record.db_row_count, 5);
    assert_eq!(record.integrity_status, IntegrityStatus::Verified);
}

#[tokio::test]
async fn test_out_of_band_delete_flips_to_discrepancy() {
    let env = TestEnv::new().await;

    let summary = env
        .coordinator
        .submit_batch("export_a.csv", &format_a_artifact(8, &[]), BatchSource::ExportFormatA)
        .await
        .unwrap();
    assert_eq!(summary.integrity_status, Some(IntegrityStatus::Verified));
    let before = batches::load_batch(&env.pool, summary.batch_id).await.unwrap().unwrap();

    sqlx::query("DELETE FROM judgments WHERE batch_id = ? AND row_index = 5")
        .bind(summary.batch_id.to_string())
        .execute(&env.pool)
        .await
        .unwrap();

    let record = env
        .coordinator
        .verifier()
        .check_batch_integrity(summary.batch_id)
        .await
        .unwrap();
    assert_eq!(record.integrity_status, IntegrityStatus::Discrepancy);
    assert_eq!(record.csv_row_count, 8);
    assert_eq!(record.db_row_count, 7);
    assert_eq!(record.integrity_score, 87.5);

    let after = batches::load_batch(&env.pool, summary.batch_id).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_over_count_is_a_discrepancy() {
    let env = TestEnv::new().await;

    let summary = env
        .coordinator
        .submit_batch("m.csv", &manual_artifact(&["A", "B", "C", "D"]), BatchSource::Manual)
        .await
        .unwrap();

    sqlx::query(
        "INSERT INTO judgments (id, batch_id, row_index, content_hash, case_number, raw_data, created_at) \
         VALUES ('extra', ?, 99, 'x', 'Z', '{}', '2024-01-01T00:00:00.000000Z')",
    )
    .bind(summary.batch_id.to_string())
    .execute(&env.pool)
    .await
    .unwrap();

    let record = env
        .coordinator
        .verifier()
        .check_batch_integrity(summary.batch_id)
        .await
        .unwrap();
    assert_eq!(record.db_row_count, 5);
    assert_eq!(record.integrity_status, IntegrityStatus::Discrepancy);
    assert_eq!(record.integrity_score, 80.0);
}

#[tokio::test]
async fn test_repeated_verification_is_byte_identical() {
    let env = TestEnv::new().await;
    let summary = env
        .coordinator
        .submit_batch("export_a.csv", &format_a_artifact(5, &[2]), BatchSource::ExportFormatA)
        .await
        .unwrap();

    let first = env
        .coordinator
        .verifier()
        .check_batch_integrity(summary.batch_id)
        .await
        .unwrap();
    let second = env
        .coordinator
        .verifier()
        .check_batch_integrity(summary.batch_id)
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test]
async fn test_format_errors_fail_the_batch() {
    let env = TestEnv::new().await;

    for (bytes, expected) in [
        (b"".to_vec(), FormatError::Empty),
        (
            b"case_number,,county\nA,B,C\n".to_vec(),
            FormatError::MalformedHeader("column 2 has a blank name".to_string()),
        ),
    ] {
        let err = env
            .coordinator
            .submit_batch("bad.csv", &bytes, BatchSource::Manual)
            .await
            .unwrap_err();

        let batch_id = match err {
            IngestError::Format { batch_id, source } => {
                assert_eq!(source, expected);
                batch_id
            }
            other => panic!("expected format error, got {:?}", other),
        };

        let batch = batches::load_batch(&env.pool, batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.row_count_raw, None);
        assert_eq!(batch.row_count_valid, None);
        assert_eq!(batch.row_count_invalid, None);
        assert!(batch.error_summary.is_some());
        assert!(batch.completed_at.is_some());
    }
}

#[tokio::test]
async fn test_header_only_artifact_completes_empty() {
    let env = TestEnv::new().await;
    let summary = env
        .coordinator
        .submit_batch("empty.csv", b"case_number,county\n", BatchSource::Manual)
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.row_count_raw, Some(0));
    assert_eq!(summary.row_count_valid, Some(0));
    assert_eq!(summary.row_count_invalid, Some(0));
    assert_eq!(summary.integrity_score, Some(100.0));
    assert_eq!(summary.integrity_status, Some(IntegrityStatus::Verified));
    assert_eq!(env.stored_judgments(summary.batch_id).await, 0);
}

#[tokio::test]
async fn test_all_rows_invalid_still_completes() {
    let env = TestEnv::new().await;
    let summary = env
        .coordinator
        .submit_batch("export_a.csv", &format_a_artifact(3, &[1, 2, 3]), BatchSource::ExportFormatA)
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.row_count_valid, Some(0));
    assert_eq!(summary.row_count_invalid, Some(3));
    // Nothing expected, nothing stored
    assert_eq!(summary.integrity_score, Some(100.0));
    assert_eq!(summary.integrity_status, Some(IntegrityStatus::Verified));
}

#[tokio::test]
async fn test_ragged_rows_are_dead_lettered() {
    let env = TestEnv::new().await;
    let artifact = b"case_number,county\nA,Kings\nB\nC,Queens,extra\n";

    let summary = env
        .coordinator
        .submit_batch("ragged.csv", artifact, BatchSource::Manual)
        .await
        .unwrap();

    assert_eq!(summary.row_count_valid, Some(1));
    assert_eq!(summary.row_count_invalid, Some(2));

    let failed = env
        .coordinator
        .dlq()
        .list_failed_rows(&FailedRowFilter::default(), 1, 10)
        .await
        .unwrap();
    assert!(failed
        .items
        .iter()
        .all(|e| e.error_message.starts_with("column count mismatch")));
    assert_eq!(failed.items[1].raw_data.overflow, vec!["extra"]);
}

#[tokio::test]
async fn test_completed_batch_accounts_for_every_row() {
    let env = TestEnv::new().await;
    env.inject_persist_fault("CV-2024-0009").await;

    let summary = env
        .coordinator
        .submit_batch(
            "export_a.csv",
            &format_a_artifact(25, &[1, 12, 20]),
            BatchSource::ExportFormatA,
        )
        .await
        .unwrap();

    let raw = summary.row_count_raw.unwrap();
    let valid = summary.row_count_valid.unwrap();
    let invalid = summary.row_count_invalid.unwrap();
    assert_eq!(valid + invalid, raw);
    assert_eq!(valid, 21);

    let filter = FailedRowFilter {
        status: None,
        batch_id: Some(summary.batch_id),
    };
    assert_eq!(failed_rows::count_entries(&env.pool, &filter).await.unwrap(), invalid);
    assert_eq!(env.stored_judgments(summary.batch_id).await, valid);
}

#[tokio::test]
async fn test_batch_events_are_broadcast() {
    let env = TestEnv::new().await;
    let mut rx = env.event_bus.subscribe();

    let summary = env
        .coordinator
        .submit_batch("export_a.csv", &format_a_artifact(9, &[4]), BatchSource::ExportFormatA)
        .await
        .unwrap();

    let stored = batches::load_batch(&env.pool, summary.batch_id)
        .await
        .unwrap()
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.batch_id(), summary.batch_id);
        kinds.push(event.event_type().to_string());
        match &event {
            JdxEvent::BatchStarted { timestamp, .. } => {
                assert!(*timestamp >= stored.created_at);
            }
            JdxEvent::BatchCompleted {
                row_count_valid,
                integrity_status,
                timestamp,
                ..
            } => {
                assert_eq!(*row_count_valid, 8);
                assert_eq!(integrity_status, "verified");
                // Same instant the COMPLETED transition recorded
                assert_eq!(Some(*timestamp), stored.completed_at);
            }
            _ => {}
        }
    }

    assert_eq!(kinds.first().map(String::as_str), Some("BatchStarted"));
    assert_eq!(kinds.last().map(String::as_str), Some("BatchCompleted"));
    assert!(kinds.iter().any(|k| k == "BatchProgress"));
    assert!(kinds.iter().any(|k| k == "IntegrityChecked"));
}

#[tokio::test]
async fn test_startup_recovery_fails_interrupted_batches() {
    let env = TestEnv::new().await;

    let pending = Batch::new("pending.csv".to_string(), BatchSource::Manual);
    batches::insert_batch(&env.pool, &pending).await.unwrap();

    let mut processing = Batch::new("processing.csv".to_string(), BatchSource::Manual);
    batches::insert_batch(&env.pool, &processing).await.unwrap();
    processing.transition_to(BatchStatus::Processing).unwrap();
    processing.begin_counting(10);
    batches::update_batch(&env.pool, &processing, BatchStatus::Pending)
        .await
        .unwrap();

    // An orphaned retry claim from the previous process
    let summary = env
        .coordinator
        .submit_batch("y.csv", b"case_number,county\n,Kings\n", BatchSource::Manual)
        .await
        .unwrap();
    let entry = env
        .coordinator
        .dlq()
        .list_failed_rows(
            &FailedRowFilter {
                status: None,
                batch_id: Some(summary.batch_id),
            },
            1,
            10,
        )
        .await
        .unwrap()
        .items
        .remove(0);
    assert!(failed_rows::claim_for_retry(&env.pool, entry.id, jdx_common::time::now())
        .await
        .unwrap());

    let recovered = env.coordinator.recover_interrupted_batches().await.unwrap();
    assert_eq!(recovered, 2);

    for id in [pending.batch_id, processing.batch_id] {
        let batch = batches::load_batch(&env.pool, id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.error_summary.as_deref(), Some("interrupted by restart"));
    }

    let released = env.coordinator.dlq().get_failed_row(entry.id).await.unwrap();
    assert_eq!(released.resolution_status, ResolutionStatus::Pending);
    assert_eq!(released.retry_count, 0);

    // Terminal batches are left alone on a second pass
    assert_eq!(env.coordinator.recover_interrupted_batches().await.unwrap(), 0);
}

#[tokio::test]
async fn test_verify_unknown_batch_is_not_found() {
    let env = TestEnv::new().await;
    let err = env
        .coordinator
        .verifier()
        .check_batch_integrity(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, jdx_common::Error::NotFound(_)));
}

#[tokio::test]
async fn test_terminal_batches_are_frozen_in_storage() {
    let env = TestEnv::new().await;
    let summary = env
        .coordinator
        .submit_batch("m.csv", &manual_artifact(&["A"]), BatchSource::Manual)
        .await
        .unwrap();

    let result = sqlx::query("UPDATE batches SET row_count_valid = 99 WHERE batch_id = ?")
        .bind(summary.batch_id.to_string())
        .execute(&env.pool)
        .await;
    assert!(result.is_err());

    let result = sqlx::query("DELETE FROM batches WHERE batch_id = ?")
        .bind(summary.batch_id.to_string())
        .execute(&env.pool)
        .await;
    assert!(result.is_err());
}
