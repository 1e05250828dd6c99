//! SQL checks applied before a statement is sent to BigQuery.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref FORBIDDEN_STATEMENT: Regex = Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|CREATE|DROP|ALTER|MERGE|TRUNCATE|GRANT|REVOKE|EXECUTE|BEGIN|COMMIT|ROLLBACK)\b"
    )
    .expect("forbidden statement pattern");
    static ref INFORMATION_SCHEMA_TABLES: Regex =
        Regex::new(r"(?i)FROM\s+(?:(\w+)\.)?INFORMATION_SCHEMA\.TABLES")
            .expect("information schema pattern");
}

pub const READ_ONLY_VIOLATION: &str = "Only READ operations are allowed";
pub const MISSING_DATASET: &str = "Dataset must be specified when querying INFORMATION_SCHEMA (e.g. dataset.INFORMATION_SCHEMA.TABLES)";

/// Rejects anything that is not a plain read. Keywords are matched on word
/// boundaries, so column names like `created_at` pass.
pub fn ensure_read_only(sql: &str) -> Result<(), &'static str> {
    if FORBIDDEN_STATEMENT.is_match(sql) {
        Err(READ_ONLY_VIOLATION)
    } else {
        Ok(())
    }
}

/// Qualifies `FROM dataset.INFORMATION_SCHEMA.TABLES` with the project so the
/// view resolves regardless of the job's default dataset. An unqualified
/// `FROM INFORMATION_SCHEMA.TABLES` has no region scope and is refused.
pub fn qualify_information_schema(sql: &str, project_id: &str) -> Result<String, &'static str> {
    if !sql.to_uppercase().contains("INFORMATION_SCHEMA") {
        return Ok(sql.to_string());
    }

    let mut missing_dataset = false;
    let qualified = INFORMATION_SCHEMA_TABLES.replace_all(sql, |caps: &Captures| match caps.get(1) {
        Some(dataset) => format!(
            "FROM `{}.{}.INFORMATION_SCHEMA.TABLES`",
            project_id,
            dataset.as_str()
        ),
        None => {
            missing_dataset = true;
            caps[0].to_string()
        }
    });

    if missing_dataset {
        return Err(MISSING_DATASET);
    }
    Ok(qualified.into_owned())
}
