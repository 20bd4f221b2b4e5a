use tracing::debug;

use super::step::MigrationStep;

/// Marker that opens a new step.
pub const STEP_MARKER: &str = "-- Step:";

/// Split migration text into ordered steps.
///
/// A line whose trimmed form starts with `-- Step:` opens a step named by the
/// rest of the line. Every following line up to the next marker belongs to
/// that step, verbatim. Lines before the first marker are ignored.
pub fn parse_steps(migration_sql: &str) -> Vec<MigrationStep> {
    let mut steps = Vec::new();
    let mut current_name: Option<String> = None;
    let mut current_lines: Vec<&str> = Vec::new();
    let mut preamble_lines = 0usize;

    if migration_sql.is_empty() {
        return steps;
    }

    for line in migration_sql.split('\n') {
        if let Some(label) = line.trim().strip_prefix(STEP_MARKER) {
            if let Some(name) = current_name.take() {
                steps.push(MigrationStep::new(name, current_lines.join("\n")));
            }
            current_lines.clear();
            current_name = Some(label.trim().to_string());
        } else if current_name.is_some() {
            current_lines.push(line);
        } else if !line.trim().is_empty() {
            preamble_lines += 1;
        }
    }

    if let Some(name) = current_name {
        steps.push(MigrationStep::new(name, current_lines.join("\n")));
    }

    if preamble_lines > 0 {
        debug!(
            "Ignored {} line(s) before the first step marker",
            preamble_lines
        );
    }

    steps
}
