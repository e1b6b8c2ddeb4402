pub mod config;
pub mod scanner;
pub mod syntax;
pub mod navigation;
pub mod target;
pub mod declaration;
pub mod reference;
pub mod diagnostics;
pub mod project;
pub mod index;
pub mod queries;
pub mod server;

pub use declaration::NamespaceDeclaration;
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use index::{IndexState, NamespaceIndex};
pub use navigation::Location;
pub use project::{FileChange, Project, TreeProvider};
pub use reference::NamespaceReference;
pub use target::{TargetConfig, TargetKind};
