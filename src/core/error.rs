use serde::Serialize;
use thiserror::Error;

/// Errors that abort an ingestion.
///
/// Validation failures and duplicate conflicts are *not* errors: they are
/// returned as structured outcomes so the caller can branch on them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IngestError {
    /// The byte buffer could not be read as an XML document at all.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The store rejected the transaction; nothing was written.
    #[error("persistence failure ({kind}): {message}")]
    Persistence {
        kind: PersistenceErrorKind,
        message: String,
    },

    /// A stored row could not be decoded back into domain types.
    #[error("corrupt stored data: {0}")]
    CorruptRecord(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// User-facing classification of a store rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceErrorKind {
    /// A unique index rejected the row.
    UniqueViolation,
    /// A NOT NULL column received no value.
    MissingRequiredField,
    /// A foreign key did not resolve.
    Referential,
    /// A CHECK constraint failed (e.g. negative quantity).
    Constraint,
    /// I/O, connection or anything else.
    Other,
}

impl std::fmt::Display for PersistenceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UniqueViolation => "uniqueness conflict",
            Self::MissingRequiredField => "missing required field",
            Self::Referential => "referential error",
            Self::Constraint => "constraint violation",
            Self::Other => "store failure",
        };
        f.write_str(s)
    }
}

/// A single validation finding with field path and message.
///
/// Used for both errors and warnings in a validation report. Serializes as
/// its display string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct ValidationError {
    /// Slash-separated path to the offending element (e.g. "emit/CNPJ").
    pub field: String,
    /// Human-readable description.
    pub message: String,
    /// Internal rule code if applicable (e.g. "NFE-KEY").
    pub rule: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(rule) = &self.rule {
            write!(f, "[{}] {}: {}", rule, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

impl From<ValidationError> for String {
    fn from(e: ValidationError) -> Self {
        e.to_string()
    }
}

impl ValidationError {
    /// Create a finding without a rule code.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            rule: None,
        }
    }

    /// Create a finding tagged with a rule code.
    pub fn with_rule(
        field: impl Into<String>,
        message: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            rule: Some(rule.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_rule() {
        let e = ValidationError::with_rule("emit/CNPJ", "issuer tax id missing", "NFE-EMIT");
        assert_eq!(e.to_string(), "[NFE-EMIT] emit/CNPJ: issuer tax id missing");
        let w = ValidationError::new("det[3]/prod/cProd", "product code missing");
        assert_eq!(w.to_string(), "det[3]/prod/cProd: product code missing");
    }

    #[test]
    fn persistence_kind_labels() {
        let err = IngestError::Persistence {
            kind: PersistenceErrorKind::UniqueViolation,
            message: "UNIQUE constraint failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "persistence failure (uniqueness conflict): UNIQUE constraint failed"
        );
    }
}
