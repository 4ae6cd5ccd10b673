//! Bootstrap schema for the blackboard key/value table.
//!
//! Applied with `IF NOT EXISTS` on every open, so reopening an existing
//! database is a no-op.

pub(crate) const BOOTSTRAP_SQL: &str = r#"
-- One row per namespaced key (plan:..., result:..., context:...)
CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY,
    kind       TEXT NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kv_kind ON kv(kind);
"#;
