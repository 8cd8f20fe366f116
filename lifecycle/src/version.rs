use crate::{Error, Result};
use semver::Version;
use std::cmp::Ordering;

/// Outcome of comparing the version an object runs with the requested one
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum VersionChange {
    Upgrade,
    NoOp,
    Downgrade,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Semver {
    pub version: Version,
    pub use_v: bool,
}
// "v1.2.3" and "1.2.3" are the same version
impl Semver {
    pub fn parse(str: &str) -> Result<Self> {
        let use_v = str.starts_with('v');
        let version = Version::parse(strip_v(str)).map_err(Error::Semver)?;
        Ok(Self { version, use_v })
    }

    pub fn opt_parse(str: &str) -> Option<Self> {
        Self::parse(str).ok()
    }

    /// Precedence ordering: build metadata is ignored, a pre-release sorts before its release
    pub fn cmp_precedence(&self, other: &Self) -> Ordering {
        let a = &self.version;
        let b = &other.version;
        (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
    }
}

impl std::fmt::Display for Semver {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.use_v {
            write!(formatter, "v{}", self.version)
        } else {
            self.version.fmt(formatter)
        }
    }
}

fn strip_v(str: &str) -> &str {
    str.strip_prefix('v').unwrap_or(str)
}

/// Decide how moving from `current` to `target` should be handled.
///
/// Strings that are not strict semver cannot be ordered: equal strings are a no-op and
/// anything else is accepted as an upgrade.
pub fn compare(current: &str, target: &str) -> VersionChange {
    let (cur, tgt) = (strip_v(current), strip_v(target));
    if cur == tgt {
        return VersionChange::NoOp;
    }
    if cur.is_empty() {
        return VersionChange::Upgrade;
    }
    match (Semver::opt_parse(current), Semver::opt_parse(target)) {
        (Some(c), Some(t)) => match t.cmp_precedence(&c) {
            Ordering::Greater => VersionChange::Upgrade,
            Ordering::Equal => VersionChange::NoOp,
            Ordering::Less => VersionChange::Downgrade,
        },
        _ => VersionChange::Upgrade,
    }
}

/// Returns whether an upgrade should be started, and an error on downgrade
pub fn should_take_update_path(target: &str, current: &str, deploying: bool) -> Result<bool> {
    match compare(current, target) {
        VersionChange::Downgrade => Err(Error::Downgrade {
            current: current.to_string(),
            target: target.to_string(),
        }),
        VersionChange::Upgrade => Ok(!deploying),
        VersionChange::NoOp => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_detected() {
        for (current, target) in [
            ("0.0.1", "0.0.2"),
            ("0.0.1", "0.1.0"),
            ("0.0.1", "1.0.0"),
            ("0.1.0", "1.0.0"),
            ("v0.0.1", "v0.0.2"),
            ("1.9.5", "1.10.0"),
            ("1.0.0-rc.1", "1.0.0"),
        ] {
            assert_eq!(compare(current, target), VersionChange::Upgrade, "{current} -> {target}");
        }
    }

    #[test]
    fn test_empty_current_is_upgrade() {
        assert_eq!(compare("", "0.0.1"), VersionChange::Upgrade);
        assert_eq!(compare("", "devel"), VersionChange::Upgrade);
        assert!(should_take_update_path("0.0.1", "", false).unwrap());
    }

    #[test]
    fn test_same_version_is_noop() {
        for (current, target) in [("0.0.1", "0.0.1"), ("0.0.1", "v0.0.1"), ("v0.0.1", "0.0.1"), ("devel1.9.5", "devel1.9.5")] {
            assert_eq!(compare(current, target), VersionChange::NoOp, "{current} -> {target}");
        }
        assert_eq!(compare("", ""), VersionChange::NoOp);
    }

    #[test]
    fn test_build_metadata_ignored() {
        assert_eq!(compare("1.0.0+abc", "1.0.0+def"), VersionChange::NoOp);
    }

    #[test]
    fn test_downgrade_detected() {
        assert_eq!(compare("0.0.2", "0.0.1"), VersionChange::Downgrade);
        assert_eq!(compare("v1.10.0", "v1.9.5"), VersionChange::Downgrade);
        assert_eq!(compare("1.0.0", "1.0.0-rc.1"), VersionChange::Downgrade);
        let err = should_take_update_path("0.0.1", "0.0.2", false).unwrap_err();
        assert!(matches!(err, Error::Downgrade { .. }));
    }

    #[test]
    fn test_non_semver_never_downgrades() {
        assert_eq!(compare("devel", "v1.9.5"), VersionChange::Upgrade);
        assert_eq!(compare("v1.9.5", "devel"), VersionChange::Upgrade);
        assert_eq!(compare("1.2", "1.1"), VersionChange::Upgrade);
    }

    #[test]
    fn test_single_v_prefix_only() {
        assert!(Semver::parse("vv1.2.3").is_err());
        assert_eq!(compare("vv1.2.3", "v1.0.0"), VersionChange::Upgrade);
        assert_eq!(compare("v1.2.3", "vv1.0.0"), VersionChange::Upgrade);
        assert!(should_take_update_path("vv1.0.0", "1.2.3", false).unwrap());
    }

    #[test]
    fn test_not_taken_while_deploying() {
        assert!(!should_take_update_path("0.0.1", "0.0.1", true).unwrap());
        assert!(!should_take_update_path("0.0.2", "0.0.1", true).unwrap());
    }

    #[test]
    fn test_semver_display_keeps_prefix() {
        assert_eq!(Semver::parse("v1.2.3").unwrap().to_string(), "v1.2.3");
        assert_eq!(Semver::parse("1.2.3").unwrap().to_string(), "1.2.3");
        assert!(Semver::parse("devel").is_err());
    }
}
