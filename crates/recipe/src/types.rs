//! Core types for recipes.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tool word written in recipe headers.
pub const TOOL_NAME: &str = "git-build-recipe";

/// Tool word found in older recipe headers.
pub const LEGACY_TOOL_NAME: &str = "bzr-builder";

/// Newest recipe format understood by the parser and written by the writer.
pub const CURRENT_FORMAT: &str = "0.4";

/// Prefix selecting a revision id.
pub const REVID_PREFIX: &str = "revid:";
/// Prefix selecting a tag.
pub const TAG_PREFIX: &str = "tag:";
/// Prefix selecting the latest revision at or before a date.
pub const DATE_PREFIX: &str = "date:";

/// Which revision of a branch a recipe line asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevisionSpec {
    /// The current tip of the branch
    Tip,
    /// A specific revision id that must exist in the branch history
    RevisionId(String),
    /// The latest revision committed at or before an instant
    Date(DateTime<Utc>),
    /// The revision a tag points at
    Tag(String),
}

impl RevisionSpec {
    /// Parse a revision specifier token.
    ///
    /// Tokens without a recognized prefix are plain revision ids.
    /// Returns the problem description on failure.
    pub fn parse(token: &str) -> Result<Self, String> {
        if let Some(id) = token.strip_prefix(REVID_PREFIX) {
            if id.is_empty() {
                return Err(format!("Empty revision id in '{token}'"));
            }
            return Ok(Self::RevisionId(id.to_string()));
        }

        if let Some(tag) = token.strip_prefix(TAG_PREFIX) {
            if tag.is_empty() {
                return Err(format!("Empty tag in '{token}'"));
            }
            return Ok(Self::Tag(tag.to_string()));
        }

        if let Some(date) = token.strip_prefix(DATE_PREFIX) {
            return parse_date(date)
                .map(Self::Date)
                .ok_or_else(|| format!("Invalid date '{date}', expecting YYYY-MM-DD or RFC 3339"));
        }

        Ok(Self::RevisionId(token.to_string()))
    }

    /// The token that selects this revision in recipe text, `None` for tip.
    pub fn to_token(&self) -> Option<String> {
        match self {
            Self::Tip => None,
            Self::RevisionId(id) => Some(format!("{REVID_PREFIX}{id}")),
            Self::Tag(tag) => Some(format!("{TAG_PREFIX}{tag}")),
            Self::Date(when) => Some(format!("{DATE_PREFIX}{}", format_date(when))),
        }
    }

    /// Check if this selects the branch tip
    pub fn is_tip(&self) -> bool {
        matches!(self, Self::Tip)
    }

    /// The pinned revision id, if this is one
    pub fn revision_id(&self) -> Option<&str> {
        match self {
            Self::RevisionId(id) => Some(id),
            _ => None,
        }
    }
}

impl Default for RevisionSpec {
    fn default() -> Self {
        Self::Tip
    }
}

impl fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_token() {
            Some(token) => write!(f, "{token}"),
            None => write!(f, "tip"),
        }
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(when) = DateTime::parse_from_rfc3339(value) {
        return Some(when.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn format_date(when: &DateTime<Utc>) -> String {
    if when.num_seconds_from_midnight() == 0 && when.nanosecond() == 0 {
        when.format("%Y-%m-%d").to_string()
    } else {
        when.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

/// How a child branch is combined with its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    /// Merge the child's history into the parent tree
    Merge,
    /// Check the child out independently at a path below the parent tree
    Nest {
        /// Relative path of the nested tree
        location: String,
    },
}

impl Directive {
    /// Instruction word used in recipe text
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Nest { .. } => "nest",
        }
    }

    /// Nest location, if this is a nest
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Merge => None,
            Self::Nest { location } => Some(location),
        }
    }
}

/// One branch of a recipe and everything combined into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeBranch {
    /// Where the branch lives
    pub url: String,
    /// Which revision to use
    pub revspec: RevisionSpec,
    /// Instructions applied to this branch, in declaration order
    pub children: Vec<ChildBranch>,
}

/// A merge or nest instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildBranch {
    /// Label used in recipe text, commit messages and `{revno:...}`
    pub nickname: String,
    /// Merge or nest
    pub directive: Directive,
    /// The branch being combined
    pub branch: RecipeBranch,
}

impl RecipeBranch {
    /// Create a branch at its tip with no children.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revspec: RevisionSpec::Tip,
            children: Vec::new(),
        }
    }

    /// Set the revision specifier.
    pub fn with_revspec(mut self, revspec: RevisionSpec) -> Self {
        self.revspec = revspec;
        self
    }

    /// Append a merge instruction.
    pub fn merge(&mut self, nickname: impl Into<String>, branch: RecipeBranch) {
        self.children.push(ChildBranch {
            nickname: nickname.into(),
            directive: Directive::Merge,
            branch,
        });
    }

    /// Append a nest instruction.
    pub fn nest(
        &mut self,
        nickname: impl Into<String>,
        location: impl Into<String>,
        branch: RecipeBranch,
    ) {
        self.children.push(ChildBranch {
            nickname: nickname.into(),
            directive: Directive::Nest {
                location: location.into(),
            },
            branch,
        });
    }

    /// Whether URLs, nicknames, directives or nesting differ from `other`.
    ///
    /// Revision specifiers are not part of the shape.
    pub fn different_shape_to(&self, other: &RecipeBranch) -> bool {
        if self.url != other.url || self.children.len() != other.children.len() {
            return true;
        }
        self.children.iter().zip(&other.children).any(|(a, b)| {
            a.nickname != b.nickname
                || a.directive != b.directive
                || a.branch.different_shape_to(&b.branch)
        })
    }

    /// Total number of branches including this one
    pub fn branch_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|c| c.branch.branch_count())
            .sum::<usize>()
    }

    /// Attach `(depth, instruction)` pairs in declaration order.
    ///
    /// Depth 0 instructions become children of `self`; deeper ones become
    /// children of the nearest preceding instruction one level up.
    pub fn attach_instructions(
        &mut self,
        instructions: impl IntoIterator<Item = (usize, ChildBranch)>,
    ) {
        let mut open: Vec<ChildBranch> = Vec::new();
        for (depth, child) in instructions {
            self.close_to(&mut open, depth);
            open.push(child);
        }
        self.close_to(&mut open, 0);
    }

    fn close_to(&mut self, open: &mut Vec<ChildBranch>, depth: usize) {
        while open.len() > depth {
            let Some(done) = open.pop() else { break };
            match open.last_mut() {
                Some(parent) => parent.branch.children.push(done),
                None => self.children.push(done),
            }
        }
    }

    /// Find a child instruction by nickname (depth-first, declaration order)
    pub fn find(&self, nickname: &str) -> Option<&ChildBranch> {
        for child in &self.children {
            if child.nickname == nickname {
                return Some(child);
            }
            if let Some(found) = child.branch.find(nickname) {
                return Some(found);
            }
        }
        None
    }
}

/// The first line of a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Format version exactly as written, e.g. `0.4`
    pub format: String,
    /// The `deb-version` template, if any
    pub version_template: Option<String>,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            format: CURRENT_FORMAT.to_string(),
            version_template: None,
        }
    }
}

/// A parsed recipe: header plus the base branch tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// Format header
    pub header: Header,
    /// The branch placed at the root of the built tree
    pub base: RecipeBranch,
}

impl Recipe {
    /// Create a recipe with a default header.
    pub fn new(base: RecipeBranch) -> Self {
        Self {
            header: Header::default(),
            base,
        }
    }

    /// Set the version template.
    pub fn with_version_template(mut self, template: impl Into<String>) -> Self {
        self.header.version_template = Some(template.into());
        self
    }

    /// Whether the branch tree of `other` has a different shape.
    pub fn different_shape_to(&self, other: &Recipe) -> bool {
        self.base.different_shape_to(&other.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_revspec_prefixes() {
        assert_eq!(
            RevisionSpec::parse("revid:abc").unwrap(),
            RevisionSpec::RevisionId("abc".into())
        );
        assert_eq!(
            RevisionSpec::parse("tag:1.0").unwrap(),
            RevisionSpec::Tag("1.0".into())
        );
        assert_eq!(
            RevisionSpec::parse("r123").unwrap(),
            RevisionSpec::RevisionId("r123".into())
        );
    }

    #[test]
    fn test_revspec_date_forms() {
        let midnight = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            RevisionSpec::parse("date:2020-01-01").unwrap(),
            RevisionSpec::Date(midnight)
        );

        let later = Utc.with_ymd_and_hms(2020, 1, 1, 12, 30, 0).unwrap();
        assert_eq!(
            RevisionSpec::parse("date:2020-01-01T12:30:00Z").unwrap(),
            RevisionSpec::Date(later)
        );
        assert_eq!(
            RevisionSpec::parse("date:2020-01-01T12:30:00").unwrap(),
            RevisionSpec::Date(later)
        );
    }

    #[test]
    fn test_revspec_rejects_empty_values() {
        assert!(RevisionSpec::parse("tag:").is_err());
        assert!(RevisionSpec::parse("revid:").is_err());
        assert!(RevisionSpec::parse("date:yesterday").is_err());
    }

    #[test]
    fn test_revspec_token_round_trip() {
        for token in ["revid:abc", "tag:v1.0", "date:2020-01-01", "date:2020-01-01T12:30:00Z"] {
            let spec = RevisionSpec::parse(token).unwrap();
            assert_eq!(spec.to_token().as_deref(), Some(token));
        }
        assert_eq!(RevisionSpec::Tip.to_token(), None);
        assert_eq!(RevisionSpec::Tip.to_string(), "tip");
    }

    #[test]
    fn test_revspec_date_keeps_fractional_seconds() {
        for token in ["date:2020-01-01T12:30:00.500Z", "date:2020-01-02T00:00:00.250Z"] {
            let spec = RevisionSpec::parse(token).unwrap();
            assert_eq!(spec.to_token().as_deref(), Some(token));
        }

        let half = Utc.with_ymd_and_hms(2020, 1, 1, 12, 30, 0).unwrap()
            + chrono::Duration::milliseconds(500);
        assert_eq!(
            RevisionSpec::parse("date:2020-01-01T12:30:00.5Z").unwrap(),
            RevisionSpec::Date(half)
        );
    }

    #[test]
    fn test_different_shape_ignores_revisions() {
        let mut a = RecipeBranch::new("base");
        a.merge("pkg", RecipeBranch::new("packaging"));
        let mut b = RecipeBranch::new("base").with_revspec(RevisionSpec::Tag("1.0".into()));
        b.merge(
            "pkg",
            RecipeBranch::new("packaging").with_revspec(RevisionSpec::RevisionId("x".into())),
        );
        assert!(!a.different_shape_to(&b));
    }

    #[test]
    fn test_different_shape_detects_changes() {
        let mut a = RecipeBranch::new("base");
        a.merge("pkg", RecipeBranch::new("packaging"));

        let mut nested = RecipeBranch::new("base");
        nested.nest("pkg", "debian", RecipeBranch::new("packaging"));
        assert!(a.different_shape_to(&nested));

        let mut renamed = RecipeBranch::new("base");
        renamed.merge("packaging", RecipeBranch::new("packaging"));
        assert!(a.different_shape_to(&renamed));

        assert!(a.different_shape_to(&RecipeBranch::new("base")));
    }

    #[test]
    fn test_find_and_count() {
        let mut inner = RecipeBranch::new("images");
        inner.merge("fixes", RecipeBranch::new("images-fixes"));
        let mut base = RecipeBranch::new("base");
        base.merge("pkg", RecipeBranch::new("packaging"));
        base.nest("art", "images", inner);

        assert_eq!(base.branch_count(), 4);
        assert_eq!(base.find("fixes").unwrap().branch.url, "images-fixes");
        assert_eq!(base.find("art").unwrap().directive.location(), Some("images"));
        assert!(base.find("missing").is_none());
    }
}
