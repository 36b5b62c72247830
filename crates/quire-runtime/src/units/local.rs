//! Embedded database catalog.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, NaiveDateTime};
use sqlx::{Sqlite, SqliteConnection};
use tracing::{debug, warn};

use crate::migrations::Migration;

const CREATE_PROJECTS: &str = include_str!("../../migrations/local/0001_create_projects.sql");
const CREATE_NOTES: &str = include_str!("../../migrations/local/0002_create_notes.sql");
const CREATE_TAGS: &str = include_str!("../../migrations/local/0003_create_tags.sql");
const CREATE_SYNC_TABLES: &str = include_str!("../../migrations/local/0004_create_sync_tables.sql");
const CREATE_TIME_ENTRIES: &str =
    include_str!("../../migrations/local/0005_create_time_entries.sql");
const ADD_TIME_ENTRY_MINUTES: &str =
    include_str!("../../migrations/local/0006_add_time_entry_minutes.sql");
const CREATE_NOTE_TEMPLATES: &str =
    include_str!("../../migrations/local/0008_create_note_templates.sql");
const DROP_LEGACY_SYNC: &str = include_str!("../../migrations/local/0009_drop_legacy_sync.sql");
const CREATE_OVERTIME_RULES: &str =
    include_str!("../../migrations/local/0010_create_overtime_rules.sql");

/// All embedded database migrations.
pub fn migrations() -> Vec<Migration<Sqlite>> {
    vec![
        Migration::sql(1, "create_projects", CREATE_PROJECTS).reverse_sql("DROP TABLE projects"),
        Migration::sql(2, "create_notes", CREATE_NOTES).reverse_sql("DROP TABLE notes"),
        Migration::sql(3, "create_tags", CREATE_TAGS)
            .reverse_sql("DROP TABLE note_tags; DROP TABLE tags;"),
        Migration::sql(4, "create_sync_tables", CREATE_SYNC_TABLES).reverse_sql(
            "DROP TABLE sync_conflicts;
             DROP TABLE sync_changes;
             DROP TABLE sync_batches;
             DROP TABLE sync_sessions;
             DROP TABLE sync_peers;",
        ),
        Migration::sql(5, "create_time_entries", CREATE_TIME_ENTRIES)
            .reverse_sql("DROP TABLE time_entries"),
        Migration::sql(6, "add_time_entry_minutes", ADD_TIME_ENTRY_MINUTES)
            .reverse_sql("ALTER TABLE time_entries DROP COLUMN minutes"),
        Migration::procedure(7, "backfill_time_entry_minutes", backfill_time_entry_minutes),
        Migration::sql(8, "create_note_templates", CREATE_NOTE_TEMPLATES)
            .reverse_sql("DROP TABLE note_templates"),
        Migration::sql(9, "drop_legacy_sync", DROP_LEGACY_SYNC).suspend_integrity(),
        Migration::sql(10, "create_overtime_rules", CREATE_OVERTIME_RULES)
            .reverse_sql("DROP TABLE overtime_rules"),
    ]
}

/// Fill `minutes` for finished entries recorded before the column existed.
fn backfill_time_entry_minutes(
    conn: &mut SqliteConnection,
) -> Pin<Box<dyn Future<Output = sqlx::Result<()>> + Send + '_>> {
    Box::pin(async move {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, started_at, ended_at FROM time_entries WHERE ended_at IS NOT NULL AND minutes IS NULL",
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut filled = 0;
        for (id, started_at, ended_at) in rows {
            let (Some(start), Some(end)) = (parse_timestamp(&started_at), parse_timestamp(&ended_at))
            else {
                warn!("Skipping time entry {} with unreadable timestamps", id);
                continue;
            };

            // Clock skew can put the end before the start
            let minutes = (end - start).num_minutes().max(0);

            sqlx::query("UPDATE time_entries SET minutes = ? WHERE id = ?")
                .bind(minutes)
                .bind(id)
                .execute(&mut *conn)
                .await?;
            filled += 1;
        }

        debug!("Backfilled minutes for {} time entries", filled);
        Ok(())
    })
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").ok())
}
