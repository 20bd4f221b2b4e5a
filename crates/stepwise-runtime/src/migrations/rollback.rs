//! Best-effort rollback script synthesis.
//!
//! Steps are walked in reverse and each step's kind selects how the
//! statements in its body are inverted. Anything the generator does not
//! recognize is skipped, so the script is a starting point for an operator,
//! not a guaranteed inverse.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info};

use stepwise_core::error::Result;

use super::parser::parse_steps;
use super::sql::split_statements;
use super::step::{MigrationStep, StepKind};

/// A possibly schema-qualified, possibly quoted identifier.
const IDENT: &str = r#"(?:"[^"]*"|[\w$]+)(?:\.(?:"[^"]*"|[\w$]+))*"#;

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(&format!(
        r"^CREATE\s+(?:(?:GLOBAL|LOCAL)\s+)?(?:(?:TEMP|TEMPORARY|UNLOGGED)\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?P<table>{IDENT})"
    ))
});

static ADD_CONSTRAINT: LazyLock<Regex> = LazyLock::new(|| {
    pattern(&format!(
        r"^ALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?(?P<table>{IDENT})\s+ADD\s+CONSTRAINT\s+(?P<name>{IDENT})"
    ))
});

static CREATE_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    pattern(&format!(
        r"^CREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:CONCURRENTLY\s+)?(?:IF\s+NOT\s+EXISTS\s+)?(?P<name>{IDENT})\s+ON\s+(?:ONLY\s+)?(?P<table>{IDENT})"
    ))
});

static GRANT: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^GRANT\s+(?P<privileges>.+?)\s+ON\s+(?P<target>.+?)\s+TO\s+(?P<roles>.+?)(?:\s+WITH\s+GRANT\s+OPTION)?$")
});

static ROW_SECURITY: LazyLock<Regex> = LazyLock::new(|| {
    pattern(&format!(
        r"^ALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?(?P<table>{IDENT})\s+(?P<mode>ENABLE|FORCE)\s+ROW\s+LEVEL\s+SECURITY$"
    ))
});

static CREATE_POLICY: LazyLock<Regex> = LazyLock::new(|| {
    pattern(&format!(
        r"^CREATE\s+POLICY\s+(?P<name>{IDENT})\s+ON\s+(?P<table>{IDENT})"
    ))
});

fn pattern(re: &str) -> Regex {
    Regex::new(&format!("(?is){}", re)).expect("rollback patterns are valid regexes")
}

/// Generate the rollback script for a migration.
///
/// Fragments are emitted in reverse step order, each headed by
/// `-- Rollback: <label>` and separated by a blank line. Steps with nothing
/// to invert are left out.
pub fn generate_rollback(migration_sql: &str) -> String {
    let steps = parse_steps(migration_sql);

    let fragments: Vec<String> = steps
        .iter()
        .rev()
        .filter_map(|step| {
            let inverse = invert_step(step);
            if inverse.is_empty() {
                debug!("No rollback generated for step: {}", step.name);
                return None;
            }
            Some(format!("-- Rollback: {}\n{}", step.name, inverse.join("\n")))
        })
        .collect();

    fragments.join("\n\n")
}

/// Where the rollback script for `migration_path` is written.
///
/// `tickets.sql` becomes `tickets_rollback.sql`; a path without a `.sql`
/// extension gets `_rollback.sql` appended.
pub fn rollback_path(migration_path: &Path) -> PathBuf {
    let file_name = migration_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let base = match migration_path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("sql") => migration_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        _ => file_name,
    };

    migration_path.with_file_name(format!("{}_rollback.sql", base))
}

/// Generate and write the rollback script next to the migration file.
pub fn write_rollback(migration_path: &Path, migration_sql: &str) -> Result<PathBuf> {
    let path = rollback_path(migration_path);
    let body = generate_rollback(migration_sql);

    let content = format!(
        "-- Rollback for: {}\n-- Generated at: {}\n\n{}\n",
        migration_path.display(),
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        body
    );

    std::fs::write(&path, content)?;
    info!("Rollback script written to {}", path.display());

    Ok(path)
}

/// Inverse statements for one step, last statement first.
fn invert_step(step: &MigrationStep) -> Vec<String> {
    let invert: fn(&str) -> Option<String> = match step.kind() {
        StepKind::CreateBaseTable => invert_create_table,
        StepKind::AddConstraints => invert_add_constraint,
        StepKind::CreateIndexes => invert_create_index,
        StepKind::SetPermissions => invert_grant,
        StepKind::EnableRls => invert_row_security,
        StepKind::CreatePolicies => invert_create_policy,
        StepKind::Unknown(_) => return Vec::new(),
    };

    split_statements(&step.body)
        .iter()
        .rev()
        .filter_map(|stmt| invert(stmt))
        .collect()
}

fn invert_create_table(stmt: &str) -> Option<String> {
    let caps = CREATE_TABLE.captures(stmt)?;
    Some(format!("DROP TABLE IF EXISTS {};", &caps["table"]))
}

fn invert_add_constraint(stmt: &str) -> Option<String> {
    let caps = ADD_CONSTRAINT.captures(stmt)?;
    Some(format!(
        "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
        &caps["table"], &caps["name"]
    ))
}

fn invert_create_index(stmt: &str) -> Option<String> {
    let caps = CREATE_INDEX.captures(stmt)?;
    // Indexes live in their table's schema.
    let name = match schema_prefix(&caps["table"]) {
        Some(schema) => format!("{}.{}", schema, &caps["name"]),
        None => caps["name"].to_string(),
    };
    Some(format!("DROP INDEX IF EXISTS {};", name))
}

fn invert_grant(stmt: &str) -> Option<String> {
    let caps = GRANT.captures(stmt)?;
    Some(format!(
        "REVOKE {} ON {} FROM {};",
        &caps["privileges"], &caps["target"], &caps["roles"]
    ))
}

fn invert_row_security(stmt: &str) -> Option<String> {
    let caps = ROW_SECURITY.captures(stmt)?;
    let mode = if caps["mode"].eq_ignore_ascii_case("FORCE") {
        "NO FORCE"
    } else {
        "DISABLE"
    };
    Some(format!(
        "ALTER TABLE {} {} ROW LEVEL SECURITY;",
        &caps["table"], mode
    ))
}

fn invert_create_policy(stmt: &str) -> Option<String> {
    let caps = CREATE_POLICY.captures(stmt)?;
    Some(format!(
        "DROP POLICY IF EXISTS {} ON {};",
        &caps["name"], &caps["table"]
    ))
}

fn schema_prefix(qualified: &str) -> Option<&str> {
    let mut in_quotes = false;
    let mut split = None;
    for (idx, c) in qualified.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => split = Some(idx),
            _ => {}
        }
    }
    split.map(|idx| &qualified[..idx])
}
