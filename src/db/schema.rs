//! SQL used by the access layer itself: audit identity plumbing and catalog
//! introspection for schema repair. Business SQL never lives here.

/// Sets the audit identity for the current transaction only (`is_local = true`).
/// `$1` is the setting name, `$2` the acting user.
pub const SET_AUDIT_IDENTITY: &str = "SELECT set_config($1, $2, true)";

/// Clears the audit identity at session level; run when a connection goes
/// back to its pool. `$1` is the setting name.
pub const RESET_AUDIT_IDENTITY: &str = "SELECT set_config($1, '', false)";

/// Reads the audit identity as triggers see it. `$1` is the setting name.
pub const READ_AUDIT_IDENTITY: &str =
    "SELECT COALESCE(current_setting($1, true), '') AS acting_user";

/// `$1` schema, `$2` table, `$3` column.
pub const COLUMN_EXISTS: &str = r#"
SELECT column_name, data_type, is_nullable
FROM information_schema.columns
WHERE table_schema = $1 AND table_name = $2 AND column_name = $3
"#;

/// `$1` schema, `$2` table.
pub const TABLE_EXISTS: &str = r#"
SELECT table_name
FROM information_schema.tables
WHERE table_schema = $1 AND table_name = $2
"#;

pub const HEALTH_CHECK: &str = "SELECT 1 AS ok";
