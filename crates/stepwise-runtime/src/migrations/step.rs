use std::fmt;

/// A named unit of SQL within one migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    /// Label following the `-- Step:` marker (e.g. "Create base table").
    pub name: String,
    /// Raw SQL between this marker and the next, verbatim.
    pub body: String,
}

impl MigrationStep {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    /// The template step this label refers to.
    pub fn kind(&self) -> StepKind {
        StepKind::from_label(&self.name)
    }
}

/// Step types of the migration template.
///
/// Labels outside the template map to [`StepKind::Unknown`] so callers have to
/// decide explicitly what an unrecognized step means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    CreateBaseTable,
    AddConstraints,
    CreateIndexes,
    SetPermissions,
    EnableRls,
    CreatePolicies,
    Unknown(String),
}

impl StepKind {
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "Create base table" => StepKind::CreateBaseTable,
            "Add constraints" => StepKind::AddConstraints,
            "Create indexes" => StepKind::CreateIndexes,
            "Set permissions" => StepKind::SetPermissions,
            "Enable RLS" => StepKind::EnableRls,
            "Create policies" => StepKind::CreatePolicies,
            other => StepKind::Unknown(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            StepKind::CreateBaseTable => "Create base table",
            StepKind::AddConstraints => "Add constraints",
            StepKind::CreateIndexes => "Create indexes",
            StepKind::SetPermissions => "Set permissions",
            StepKind::EnableRls => "Enable RLS",
            StepKind::CreatePolicies => "Create policies",
            StepKind::Unknown(label) => label,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
