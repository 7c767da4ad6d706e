//! Shared fixtures for jdx-ingest integration tests

#![allow(dead_code)]

use jdx_common::config::IngestSettings;
use jdx_common::events::EventBus;
use jdx_ingest::services::{IngestionCoordinator, RuleTable};
use jdx_ingest::AppState;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// Temp-dir database plus a coordinator wired to it
pub struct TestEnv {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub settings: IngestSettings,
    pub coordinator: IngestionCoordinator,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_rules(RuleTable::builtin()).await
    }

    pub async fn with_rules(rules: RuleTable) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = jdx_ingest::db::init_database_pool(&dir.path().join("jdx.db"))
            .await
            .expect("Failed to open test database");
        let event_bus = EventBus::new(1000);
        let settings = IngestSettings {
            validation_workers: 3,
            progress_flush_interval: 4,
            max_lock_wait_ms: 500,
            ..IngestSettings::default()
        };
        let coordinator = IngestionCoordinator::new(
            pool.clone(),
            event_bus.clone(),
            settings.clone(),
            Arc::new(rules),
        );

        Self {
            dir,
            pool,
            event_bus,
            settings,
            coordinator,
        }
    }

    /// Coordinator over the same database with different rules
    pub fn coordinator_with_rules(&self, rules: RuleTable) -> IngestionCoordinator {
        IngestionCoordinator::new(
            self.pool.clone(),
            self.event_bus.clone(),
            self.settings.clone(),
            Arc::new(rules),
        )
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.pool.clone(),
            self.event_bus.clone(),
            self.settings.clone(),
            RuleTable::builtin(),
        )
    }

    /// Abort inserts of one case number with a connection-style error
    pub async fn inject_persist_fault(&self, case_number: &str) {
        sqlx::query(&format!(
            "CREATE TRIGGER persist_fault BEFORE INSERT ON judgments \
             WHEN NEW.case_number = '{}' \
             BEGIN SELECT RAISE(ABORT, 'connection reset by peer'); END",
            case_number
        ))
        .execute(&self.pool)
        .await
        .expect("Failed to install fault trigger");
    }

    pub async fn clear_persist_fault(&self) {
        sqlx::query("DROP TRIGGER IF EXISTS persist_fault")
            .execute(&self.pool)
            .await
            .expect("Failed to drop fault trigger");
    }

    pub async fn stored_judgments(&self, batch_id: uuid::Uuid) -> i64 {
        jdx_ingest::db::judgments::count_for_batch(&self.pool, batch_id)
            .await
            .expect("count failed")
    }
}

pub const FORMAT_A_HEADER: &str = "Case No,Debtor,Amount,Date";

/// export_format_a artifact with `total` rows; rows listed in
/// `missing_debtor` (1-based) have an empty debtor column
pub fn format_a_artifact(total: usize, missing_debtor: &[usize]) -> Vec<u8> {
    let mut out = String::from(FORMAT_A_HEADER);
    out.push('\n');
    for i in 1..=total {
        let debtor = if missing_debtor.contains(&i) {
            String::new()
        } else {
            format!("Debtor {}", i)
        };
        out.push_str(&format!("CV-2024-{:04},{},{}.50,2024-03-{:02}\n", i, debtor, i * 100, (i % 28) + 1));
    }
    out.into_bytes()
}

/// manual artifact: one case number per row
pub fn manual_artifact(case_numbers: &[&str]) -> Vec<u8> {
    let mut out = String::from("case_number,county\n");
    for case in case_numbers {
        out.push_str(&format!("{},Kings\n", case));
    }
    out.into_bytes()
}
