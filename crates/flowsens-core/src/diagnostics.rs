//! Warnings collected while reducing and building a network.
//!
//! Nothing here aborts a request: structural problems are [`crate::GridError`]s.
//! Diagnostics record what the builder silently fixed or ignored, e.g. a
//! retained switch closing a loop on a single bus, or a generator target
//! outside its active power limits.
//!
//! ```
//! use flowsens_core::diagnostics::Diagnostics;
//!
//! let mut diag = Diagnostics::new();
//! diag.add_warning_with_entity("topology", "retained switch loops on one bus", "SW1");
//! assert_eq!(diag.warning_count(), 1);
//! ```

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    pub severity: Severity,
    /// Grouping key ("topology", "control", "slack", ...)
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl std::fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
        };
        write!(f, "[{}:{}] {}", severity, self.category, self.message)?;
        if let Some(entity) = &self.entity {
            write!(f, " ({})", entity)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<DiagnosticIssue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_info_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues.push(DiagnosticIssue {
            severity: Severity::Info,
            category: category.to_string(),
            message: message.to_string(),
            entity: Some(entity.to_string()),
        });
    }

    /// Record a warning and mirror it to the `tracing` output.
    pub fn add_warning_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        tracing::warn!(category, entity, "{}", message);
        self.issues.push(DiagnosticIssue {
            severity: Severity::Warning,
            category: category.to_string(),
            message: message.to_string(),
            entity: Some(entity.to_string()),
        });
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.issues.extend(other.issues);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiagnosticIssue> {
        self.issues.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_warnings() {
        let mut diag = Diagnostics::new();
        diag.add_info_with_entity("slack", "selected slack bus", "VL1_0");
        diag.add_warning_with_entity("control", "inconsistent target", "G2");
        assert_eq!(diag.warning_count(), 1);
        assert_eq!(diag.iter().count(), 2);
    }

    #[test]
    fn display_includes_entity() {
        let mut diag = Diagnostics::new();
        diag.add_warning_with_entity("topology", "loop switch", "SW");
        let text = diag.issues[0].to_string();
        assert_eq!(text, "[warning:topology] loop switch (SW)");
    }

    #[test]
    fn merge_appends() {
        let mut a = Diagnostics::new();
        let mut b = Diagnostics::new();
        b.add_info_with_entity("x", "y", "z");
        a.merge(b);
        assert!(!a.is_empty());
    }

    #[test]
    fn serializes_to_json() {
        let mut diag = Diagnostics::new();
        diag.add_warning_with_entity("topology", "loop switch", "SW");
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("\"severity\":\"warning\""));
    }
}
