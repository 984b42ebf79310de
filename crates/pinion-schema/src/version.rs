//! Versions and version constraints.
//!
//! Constraint strings are comma-separated clauses of the form `[op] version`
//! where `op` is one of `= != > >= < <= ~>`. A missing operator means `=`.
//! Versions in constraints may be partial (`2`, `2.5`) and are zero-padded.
//!
//! Pre-release versions are only ever selected by an exact `=` clause that
//! names them; range clauses never admit them.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SchemaError;

/// An exact semantic version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(semver::Version);

impl Version {
    /// Build a release version from its three numeric parts.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parse a full or partial version, zero-padding missing segments.
    ///
    /// A leading `v` is accepted and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidVersion`] for non-numeric segments or
    /// more than three segments.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        parse_partial(s).map(|(v, _)| v)
    }

    /// True when the version carries a pre-release suffix.
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// A pessimistic constraint that pins this version's release line.
    ///
    /// `2.7.1` suggests `~> 2.7`; `0.4.2` suggests `~> 0.4.2` since minor
    /// releases of 0.x may break.
    pub fn suggested_constraint(&self) -> String {
        if self.0.major == 0 {
            format!("~> 0.{}.{}", self.0.minor, self.0.patch)
        } else {
            format!("~> {}.{}", self.0.major, self.0.minor)
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Version {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

/// Parse a possibly partial version, returning how many numeric segments
/// were written.
fn parse_partial(s: &str) -> Result<(Version, usize), SchemaError> {
    let trimmed = s.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let invalid = || SchemaError::InvalidVersion(s.to_string());

    let (core, suffix) = match trimmed.find(['-', '+']) {
        Some(i) => (&trimmed[..i], &trimmed[i..]),
        None => (trimmed, ""),
    };

    let segments: Vec<&str> = core.split('.').collect();
    if segments.len() > 3
        || segments
            .iter()
            .any(|seg| seg.is_empty() || !seg.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(invalid());
    }

    let mut padded = segments.join(".");
    for _ in segments.len()..3 {
        padded.push_str(".0");
    }

    let parsed = semver::Version::parse(&format!("{padded}{suffix}")).map_err(|_| invalid())?;
    Ok((Version(parsed), segments.len()))
}

/// Comparison operator of a single constraint clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=` (also the implied operator)
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `~>` (pessimistic: allows only the rightmost written segment to grow)
    Pessimistic,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Pessimistic => "~>",
        }
    }
}

/// One `op version` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    op: Operator,
    version: Version,
    segments: usize,
}

impl Clause {
    fn parse(raw: &str, whole: &str) -> Result<Self, SchemaError> {
        let raw = raw.trim();
        let invalid = |reason: &str| SchemaError::InvalidConstraint {
            constraint: whole.to_string(),
            reason: reason.to_string(),
        };
        if raw.is_empty() {
            return Err(invalid("empty clause"));
        }

        // Longest operators first so ">=" is not read as ">".
        let ops = [
            ("~>", Operator::Pessimistic),
            (">=", Operator::Ge),
            ("<=", Operator::Le),
            ("!=", Operator::Ne),
            (">", Operator::Gt),
            ("<", Operator::Lt),
            ("=", Operator::Eq),
        ];
        let (op, rest) = ops
            .iter()
            .find_map(|(token, op)| raw.strip_prefix(token).map(|rest| (*op, rest)))
            .unwrap_or((Operator::Eq, raw));

        let (version, segments) =
            parse_partial(rest).map_err(|_| invalid(&format!("'{}' is not a version", rest.trim())))?;

        if op == Operator::Pessimistic && version.is_prerelease() {
            return Err(invalid("~> cannot be combined with a pre-release version"));
        }

        Ok(Self {
            op,
            version,
            segments,
        })
    }

    /// The operator of this clause.
    pub fn op(&self) -> Operator {
        self.op
    }

    /// The (zero-padded) version this clause compares against.
    pub fn version(&self) -> &Version {
        &self.version
    }

    fn matches(&self, v: &Version) -> bool {
        let ord = strip_pre(v).cmp(&strip_pre(&self.version));
        match self.op {
            Operator::Eq => v == &self.version,
            Operator::Ne => v != &self.version,
            Operator::Gt => v > &self.version,
            Operator::Ge => v >= &self.version,
            Operator::Lt => v < &self.version,
            Operator::Le => v <= &self.version,
            Operator::Pessimistic => {
                if ord == Ordering::Less {
                    return false;
                }
                let base = &self.version.0;
                let upper = match self.segments {
                    1 | 2 => semver::Version::new(base.major + 1, 0, 0),
                    _ => semver::Version::new(base.major, base.minor + 1, 0),
                };
                strip_pre(v) < upper
            }
        }
    }
}

fn strip_pre(v: &Version) -> semver::Version {
    semver::Version::new(v.0.major, v.0.minor, v.0.patch)
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.as_str(), self.version)
    }
}

/// A parsed constraint string, e.g. `">= 2.0, < 3.0"`.
///
/// An empty string parses to an unconstrained value that allows every
/// release version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraints {
    raw: String,
    clauses: Vec<Clause>,
}

impl VersionConstraints {
    /// Parse a comma-separated list of clauses.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidConstraint`] for any malformed clause.
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::any());
        }
        let clauses = trimmed
            .split(',')
            .map(|c| Clause::parse(c, trimmed))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: trimmed.to_string(),
            clauses,
        })
    }

    /// The unconstrained value.
    pub fn any() -> Self {
        Self {
            raw: String::new(),
            clauses: Vec::new(),
        }
    }

    /// The constraint string as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed clauses.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// True when there are no clauses.
    pub fn is_unconstrained(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Whether `version` satisfies every clause.
    pub fn allows(&self, version: &Version) -> bool {
        allows(self.clauses.iter(), version)
    }
}

impl fmt::Display for VersionConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.clauses.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(", "))
    }
}

fn allows<'a>(mut clauses: impl Iterator<Item = &'a Clause> + Clone, version: &Version) -> bool {
    if version.is_prerelease()
        && !clauses
            .clone()
            .any(|c| c.op == Operator::Eq && &c.version == version)
    {
        return false;
    }
    clauses.all(|c| c.matches(version))
}

/// A constraint contributed by one configuration module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedConstraint {
    /// Module path that declared the constraint (`""` for the root module).
    pub module: String,
    /// The parsed constraint.
    pub constraints: VersionConstraints,
}

/// Every constraint declared for one provider, in collection order.
///
/// Constraints from different modules combine with AND semantics, but each
/// keeps its module attribution so diagnostics can name where an
/// unsatisfiable bound came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionConstraintSet {
    entries: Vec<SourcedConstraint>,
}

impl VersionConstraintSet {
    /// An empty (unconstrained) set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a constraint declared by `module`.
    pub fn push(&mut self, module: impl Into<String>, constraints: VersionConstraints) {
        self.entries.push(SourcedConstraint {
            module: module.into(),
            constraints,
        });
    }

    /// Contributing constraints with their modules.
    pub fn entries(&self) -> &[SourcedConstraint] {
        &self.entries
    }

    /// True when no contributing module imposes any clause.
    pub fn is_unconstrained(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.constraints.is_unconstrained())
    }

    /// Whether `version` satisfies every contributing constraint.
    pub fn allows(&self, version: &Version) -> bool {
        allows(
            self.entries.iter().flat_map(|e| e.constraints.clauses()),
            version,
        )
    }

    /// The newest version in `candidates` satisfying the whole set.
    pub fn newest_allowed<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a Version>,
    ) -> Option<&'a Version> {
        candidates.into_iter().filter(|v| self.allows(v)).max()
    }

    /// Per-module breakdown, e.g. `root: >= 2.0, < 3.0; module.net: >= 2.5`.
    pub fn describe_sources(&self) -> String {
        let parts: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.constraints.is_unconstrained())
            .map(|e| {
                let module = if e.module.is_empty() {
                    "root"
                } else {
                    e.module.as_str()
                };
                format!("{module}: {}", e.constraints)
            })
            .collect();
        parts.join("; ")
    }
}

impl fmt::Display for VersionConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .flat_map(|e| e.constraints.clauses())
            .map(ToString::to_string)
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}
