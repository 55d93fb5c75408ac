//! Known schema drift and the DDL that fixes it.
//!
//! Columns not listed here are added as nullable `TEXT`; tables not listed
//! here are never created automatically.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::error::AgencyDbError;

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier regex is valid"));

/// What to run when a column (or table) turns out to be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    AddColumn {
        sql_type: &'static str,
        default: Option<&'static str>,
    },
    /// Adds the column plus a non-unique btree index on it.
    AddColumnWithIndex { sql_type: &'static str },
    /// Adds the column with a named CHECK constraint; `check` is the boolean
    /// expression over `"column"`.
    AddColumnWithCheck {
        sql_type: &'static str,
        default: Option<&'static str>,
        check: &'static str,
    },
    /// Adds the column, copies values over from `legacy` and drops NOT NULL on
    /// the legacy column so writers that no longer set it keep working.
    /// Degrades to a plain add when `legacy` does not exist either.
    RenameAndBackfill {
        legacy: &'static str,
        sql_type: &'static str,
    },
    CreateTable { columns: &'static str },
    /// Fallback for columns the catalog does not know.
    GenericText,
}

impl RepairAction {
    pub fn is_generic(&self) -> bool {
        matches!(self, RepairAction::GenericText)
    }

    pub fn legacy_column(&self) -> Option<&'static str> {
        match self {
            RepairAction::RenameAndBackfill { legacy, .. } => Some(legacy),
            _ => None,
        }
    }

    /// DDL for this action, in execution order. `legacy_present` only matters
    /// for [`RepairAction::RenameAndBackfill`].
    pub fn ddl(
        &self,
        schema: &str,
        table: &str,
        column: Option<&str>,
        legacy_present: bool,
    ) -> Result<Vec<String>, AgencyDbError> {
        let target = format!("{}.{}", quote_ident(schema)?, quote_ident(table)?);
        let column = match (self, column) {
            (RepairAction::CreateTable { columns }, _) => {
                return Ok(vec![format!("CREATE TABLE IF NOT EXISTS {target} ({columns})")]);
            }
            (_, Some(column)) => column,
            (_, None) => {
                return Err(AgencyDbError::InvalidIdentifier(format!(
                    "{table}.<missing column name>"
                )));
            }
        };
        let col = quote_ident(column)?;
        let add = |sql_type: &str, default: Option<&str>| {
            let default = default.map(|d| format!(" DEFAULT {d}")).unwrap_or_default();
            format!("ALTER TABLE {target} ADD COLUMN IF NOT EXISTS {col} {sql_type}{default}")
        };

        let statements = match self {
            RepairAction::AddColumn { sql_type, default } => vec![add(sql_type, *default)],
            RepairAction::AddColumnWithIndex { sql_type } => {
                let index = quote_ident(&format!("idx_{table}_{column}"))?;
                vec![
                    add(sql_type, None),
                    format!("CREATE INDEX IF NOT EXISTS {index} ON {target} ({col})"),
                ]
            }
            RepairAction::AddColumnWithCheck {
                sql_type,
                default,
                check,
            } => {
                let constraint = quote_ident(&format!("chk_{table}_{column}"))?;
                vec![
                    add(sql_type, *default),
                    format!("ALTER TABLE {target} DROP CONSTRAINT IF EXISTS {constraint}"),
                    format!("ALTER TABLE {target} ADD CONSTRAINT {constraint} CHECK ({check})"),
                ]
            }
            RepairAction::RenameAndBackfill { legacy, sql_type } => {
                let mut statements = vec![add(sql_type, None)];
                if legacy_present {
                    let legacy = quote_ident(legacy)?;
                    statements.push(format!(
                        "UPDATE {target} SET {col} = {legacy} WHERE {col} IS NULL"
                    ));
                    statements.push(format!(
                        "ALTER TABLE {target} ALTER COLUMN {legacy} DROP NOT NULL"
                    ));
                }
                statements
            }
            RepairAction::GenericText | RepairAction::CreateTable { .. } => vec![add("TEXT", None)],
        };
        Ok(statements)
    }
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairAction::AddColumn { sql_type, .. } => write!(f, "add column ({sql_type})"),
            RepairAction::AddColumnWithIndex { sql_type } => {
                write!(f, "add indexed column ({sql_type})")
            }
            RepairAction::AddColumnWithCheck { sql_type, .. } => {
                write!(f, "add checked column ({sql_type})")
            }
            RepairAction::RenameAndBackfill { legacy, .. } => {
                write!(f, "backfill from legacy column {legacy}")
            }
            RepairAction::CreateTable { .. } => f.write_str("create table"),
            RepairAction::GenericText => f.write_str("add nullable text column"),
        }
    }
}

struct ColumnEntry {
    table: &'static str,
    column: &'static str,
    action: RepairAction,
}

struct TableEntry {
    table: &'static str,
    columns: &'static str,
}

const COLUMNS: &[ColumnEntry] = &[
    ColumnEntry {
        table: "invoices",
        column: "status",
        action: RepairAction::AddColumnWithCheck {
            sql_type: "VARCHAR(20)",
            default: Some("'draft'"),
            check: r#""status" IN ('draft', 'sent', 'paid', 'overdue', 'void')"#,
        },
    },
    ColumnEntry {
        table: "invoices",
        column: "paid_at",
        action: RepairAction::AddColumn {
            sql_type: "TIMESTAMPTZ",
            default: None,
        },
    },
    ColumnEntry {
        table: "invoices",
        column: "updated_by",
        action: RepairAction::AddColumn {
            sql_type: "VARCHAR(128)",
            default: None,
        },
    },
    ColumnEntry {
        table: "inventory_items",
        column: "reorder_level",
        action: RepairAction::AddColumn {
            sql_type: "INTEGER",
            default: Some("0"),
        },
    },
    ColumnEntry {
        table: "inventory_items",
        column: "sku",
        action: RepairAction::AddColumnWithIndex {
            sql_type: "VARCHAR(64)",
        },
    },
    ColumnEntry {
        table: "purchase_orders",
        column: "approved_by",
        action: RepairAction::AddColumn {
            sql_type: "VARCHAR(128)",
            default: None,
        },
    },
    ColumnEntry {
        table: "purchase_orders",
        column: "supplier_id",
        action: RepairAction::RenameAndBackfill {
            legacy: "vendor_id",
            sql_type: "INTEGER",
        },
    },
    ColumnEntry {
        table: "assets",
        column: "depreciation_method",
        action: RepairAction::AddColumnWithCheck {
            sql_type: "VARCHAR(32)",
            default: Some("'straight_line'"),
            check: r#""depreciation_method" IN ('straight_line', 'declining_balance', 'units_of_production')"#,
        },
    },
    ColumnEntry {
        table: "workflow_instances",
        column: "current_step",
        action: RepairAction::AddColumn {
            sql_type: "INTEGER",
            default: Some("0"),
        },
    },
    ColumnEntry {
        table: "messages",
        column: "read_at",
        action: RepairAction::AddColumn {
            sql_type: "TIMESTAMPTZ",
            default: None,
        },
    },
    ColumnEntry {
        table: "messages",
        column: "thread_id",
        action: RepairAction::AddColumnWithIndex { sql_type: "UUID" },
    },
    ColumnEntry {
        table: "customers",
        column: "display_name",
        action: RepairAction::RenameAndBackfill {
            legacy: "name",
            sql_type: "VARCHAR(255)",
        },
    },
];

const TABLES: &[TableEntry] = &[
    TableEntry {
        table: "audit_log",
        columns: "id BIGSERIAL PRIMARY KEY, \
                  table_name VARCHAR(63) NOT NULL, \
                  record_id TEXT, \
                  action VARCHAR(16) NOT NULL, \
                  acting_user VARCHAR(128), \
                  changed_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
                  payload JSONB",
    },
    TableEntry {
        table: "app_settings",
        columns: "key VARCHAR(128) PRIMARY KEY, \
                  value JSONB NOT NULL DEFAULT '{}'::jsonb, \
                  updated_at TIMESTAMPTZ NOT NULL DEFAULT now()",
    },
];

/// Action for a missing column; unknown pairs get [`RepairAction::GenericText`].
pub fn column_action(table: &str, column: &str) -> RepairAction {
    COLUMNS
        .iter()
        .find(|e| e.table.eq_ignore_ascii_case(table) && e.column.eq_ignore_ascii_case(column))
        .map(|e| e.action)
        .unwrap_or(RepairAction::GenericText)
}

/// Action for a missing table, if the table is one this layer may create.
pub fn table_action(table: &str) -> Option<RepairAction> {
    TABLES
        .iter()
        .find(|e| e.table.eq_ignore_ascii_case(table))
        .map(|e| RepairAction::CreateTable { columns: e.columns })
}

/// Validates `name` as a plain identifier and double-quotes it.
pub fn quote_ident(name: &str) -> Result<String, AgencyDbError> {
    if !IDENT_RE.is_match(name) {
        return Err(AgencyDbError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}
