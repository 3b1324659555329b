use std::fmt;

use serde::Serialize;

/// Output of `go version`, with the release numbers picked out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoVersion {
    pub raw: String,
    pub major: u64,
    pub minor: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<u64>,
}

/// Which toolchain releases a runner accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRequirement {
    /// Only `go<major>.<minor>.x` releases.
    Exact { major: u64, minor: u64 },
    /// `go<major>.<minor>` or anything newer.
    AtLeast { major: u64, minor: u64 },
}

impl Default for VersionRequirement {
    fn default() -> Self {
        VersionRequirement::AtLeast {
            major: 1,
            minor: 14,
        }
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRequirement::Exact { major, minor } => write!(f, "go{major}.{minor}.x"),
            VersionRequirement::AtLeast { major, minor } => write!(f, "go{major}.{minor} or newer"),
        }
    }
}

impl VersionRequirement {
    /// Check the raw `go version` output against this requirement.
    ///
    /// `Exact` matches on the literal `go version go<major>.<minor>.` prefix so
    /// that development builds and odd vendor strings are rejected the same way
    /// the toolchain's own prefix check would.
    pub fn accepts(&self, raw: &str) -> bool {
        match *self {
            VersionRequirement::Exact { major, minor } => {
                raw.starts_with(&format!("go version go{major}.{minor}."))
            }
            VersionRequirement::AtLeast { major, minor } => GoVersion::parse(raw)
                .is_some_and(|found| (found.major, found.minor) >= (major, minor)),
        }
    }
}

impl GoVersion {
    /// Parse `go version go1.14.9 linux/amd64` style output.
    ///
    /// Pre-release suffixes such as `go1.21rc2` keep their leading digits.
    pub fn parse(raw: &str) -> Option<GoVersion> {
        let raw = raw.trim();
        let release = raw
            .strip_prefix("go version ")?
            .split_whitespace()
            .next()?
            .strip_prefix("go")?;

        let mut parts = release.split('.').map(leading_number);
        let major = parts.next()??;
        let minor = parts.next()??;
        let patch = parts.next().flatten();

        Some(GoVersion {
            raw: raw.to_string(),
            major,
            minor,
            patch,
        })
    }
}

fn leading_number(part: &str) -> Option<u64> {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    part[..end].parse().ok()
}
