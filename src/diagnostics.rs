use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::navigation::Location;
use crate::syntax::TextSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticCategory {
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticKind {
    NamespaceNotDeclared,
    MemberNotDeclared,
}

impl DiagnosticKind {
    pub fn code(self) -> u32 {
        match self {
            DiagnosticKind::NamespaceNotDeclared => 191919,
            DiagnosticKind::MemberNotDeclared => 191920,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            DiagnosticKind::NamespaceNotDeclared => "Such namespace is not declared",
            DiagnosticKind::MemberNotDeclared => "Such method or property is not declared",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub category: DiagnosticCategory,
    pub kind: DiagnosticKind,
    pub code: u32,
    pub file: PathBuf,
    pub span: TextSpan,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(kind: DiagnosticKind, at: Location) -> Self {
        Self {
            category: DiagnosticCategory::Warning,
            kind,
            code: kind.code(),
            file: at.file,
            span: at.span,
            line: at.line,
            column: at.column,
            message: kind.message().to_string(),
        }
    }
}

/// `path:line:col: warning[191919]: message`
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: warning[{}]: {}",
            self.file.display(),
            self.line,
            self.column,
            self.code,
            self.message
        )
    }
}
