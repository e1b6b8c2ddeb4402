use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of member a plugin registration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// The whole annotated function / variable. No member names.
    Function,
    MemberFunction,
    MemberProperty,
    StaticMember,
}

/// Member kinds in the order diagnostics walk them.
pub const CLASS_MEMBER_KINDS: [TargetKind; 3] = [
    TargetKind::MemberProperty,
    TargetKind::MemberFunction,
    TargetKind::StaticMember,
];

/// Name reported for `function` targets, which have no member name.
pub const FUNCTION_TARGET_NAME: &str = "unknown";

impl TargetKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "function" => Some(TargetKind::Function),
            "member-function" => Some(TargetKind::MemberFunction),
            "member-property" => Some(TargetKind::MemberProperty),
            "static-member" => Some(TargetKind::StaticMember),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Function => "function",
            TargetKind::MemberFunction => "member-function",
            TargetKind::MemberProperty => "member-property",
            TargetKind::StaticMember => "static-member",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetKind::from_tag(s).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown target kind '{s}' (expected function, member-function, member-property or static-member)"
            )
        })
    }
}

/// A `(kind, member name)` pair. For [`TargetKind::Function`] the name is
/// [`FUNCTION_TARGET_NAME`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetConfig {
    pub kind: TargetKind,
    pub name: String,
}

impl TargetConfig {
    pub fn new(kind: TargetKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn function() -> Self {
        Self::new(TargetKind::Function, FUNCTION_TARGET_NAME)
    }
}
