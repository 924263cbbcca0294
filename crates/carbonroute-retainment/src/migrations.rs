use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

// Timestamps are unix seconds so TTL comparisons stay integer arithmetic.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_retained_readings",
        sql: r#"
CREATE TABLE IF NOT EXISTS retained_readings (
    id TEXT PRIMARY KEY,
    provider TEXT NOT NULL,
    zone TEXT,
    lat DOUBLE NOT NULL,
    lon DOUBLE NOT NULL,
    pue DOUBLE NOT NULL,
    energy_kwh DOUBLE,
    request_time BIGINT NOT NULL,
    window_start BIGINT NOT NULL,
    window_end BIGINT NOT NULL,
    raw_payload TEXT NOT NULL,
    valid BOOLEAN NOT NULL DEFAULT FALSE,
    creation_time BIGINT NOT NULL,
    expires_at BIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_retained_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_retained_expires_at ON retained_readings(expires_at);
CREATE INDEX IF NOT EXISTS idx_retained_point ON retained_readings(lat, lon, request_time);
CREATE INDEX IF NOT EXISTS idx_retained_valid ON retained_readings(valid);
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
