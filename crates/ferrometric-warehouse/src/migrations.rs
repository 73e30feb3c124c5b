use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_series_and_values",
        sql: r#"
CREATE TABLE IF NOT EXISTS series (
    series_id TEXT PRIMARY KEY,
    provider TEXT NOT NULL,
    asset TEXT NOT NULL,
    metric TEXT NOT NULL,
    exchange TEXT,
    resolution TEXT NOT NULL,
    chart_id TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS metric_values (
    series_id TEXT NOT NULL,
    ts_ms BIGINT NOT NULL,
    field_values TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(series_id, ts_ms)
);

CREATE TABLE IF NOT EXISTS series_watermarks (
    series_id TEXT PRIMARY KEY,
    watermark_ms BIGINT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS ingest_log (
    run_id TEXT NOT NULL,
    series_id TEXT NOT NULL,
    window_start_ms BIGINT NOT NULL,
    window_end_ms BIGINT NOT NULL,
    row_count BIGINT NOT NULL,
    logged_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_ingest_log_series ON ingest_log(series_id, window_end_ms);
"#,
    },
    Migration {
        version: "0003_series_fields",
        sql: r#"
ALTER TABLE series ADD COLUMN IF NOT EXISTS field_names TEXT DEFAULT '[]';
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
        }
    }

    Ok(())
}
