use regex::Regex;
use std::sync::LazyLock;

use crate::db::models::Statement;
use crate::error::{AgencyDbError, ErrorKind};

static COLUMN_OF_RELATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"column "([^"]+)" of relation "([^"]+)" does not exist"#)
        .expect("column-of-relation regex is valid")
});

static BARE_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"column "?([\w.]+)"? does not exist"#).expect("bare column regex is valid")
});

static RELATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"relation "([^"]+)" does not exist"#).expect("relation regex is valid")
});

static FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"function ([\w.]+)\(.*\) does not exist"#).expect("function regex is valid")
});

static FIRST_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:from|update|into|join)\s+("?[\w]+"?(?:\."?[\w]+"?)?)"#)
        .expect("table reference regex is valid")
});

/// The database object a schema error says is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingObject {
    Column { table: String, column: String },
    Table { table: String },
    Function { name: String },
    Unknown,
}

impl MissingObject {
    /// Locates the missing object from a classified schema error, falling back
    /// to the failing statements to find the table of an unqualified column.
    pub fn from_error(err: &AgencyDbError, statements: &[Statement]) -> Self {
        if err.kind() != ErrorKind::Schema {
            return MissingObject::Unknown;
        }
        let Some(message) = err.message() else {
            return MissingObject::Unknown;
        };
        let reported_table = err.context().and_then(|c| c.table.clone());

        if let Some(caps) = COLUMN_OF_RELATION.captures(message) {
            return MissingObject::Column {
                table: unqualified(&caps[2]),
                column: caps[1].to_string(),
            };
        }
        if let Some(caps) = RELATION.captures(message) {
            return MissingObject::Table {
                table: unqualified(&caps[1]),
            };
        }
        if let Some(caps) = FUNCTION.captures(message) {
            return MissingObject::Function {
                name: caps[1].to_string(),
            };
        }
        if let Some(caps) = BARE_COLUMN.captures(message) {
            let raw = &caps[1];
            let column = raw.rsplit('.').next().unwrap_or(raw).to_string();
            let table = reported_table.or_else(|| {
                statements
                    .iter()
                    .find_map(|s| FIRST_TABLE.captures(&s.sql).map(|c| unqualified(&c[1])))
            });
            return match table {
                Some(table) => MissingObject::Column { table, column },
                None => MissingObject::Unknown,
            };
        }
        MissingObject::Unknown
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            MissingObject::Column { table, .. } | MissingObject::Table { table } => Some(table),
            _ => None,
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            MissingObject::Column { column, .. } => Some(column),
            _ => None,
        }
    }
}

/// `public."invoices"` -> `invoices`.
fn unqualified(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.trim_matches('"').to_ascii_lowercase()
}
