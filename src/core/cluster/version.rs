//! Image tag parsing for the upgrade liveness gate

use semver::Version;
use std::collections::HashSet;

use crate::config::UpgradeConfig;
use crate::error::{OperatorError, Result};

/// Tag of an image reference; untagged references resolve to `latest`.
pub fn image_tag(image: &str) -> &str {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last_segment_start = without_digest.rfind('/').map(|i| i + 1).unwrap_or(0);
    match without_digest[last_segment_start..].rfind(':') {
        Some(colon) => &without_digest[last_segment_start + colon + 1..],
        None => "latest",
    }
}

/// Parse a free-text tag as a semantic version. A leading `v` is dropped
/// and missing minor/patch components are filled with zero.
pub fn parse_tag_version(tag: &str) -> Option<Version> {
    let trimmed = tag.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, rest) = trimmed.split_at(split_at);
    let padded = match core.split('.').count() {
        1 => format!("{}.0.0{}", core, rest),
        2 => format!("{}.0{}", core, rest),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

/// Decides whether a running image must pass the live status check
#[derive(Debug, Clone)]
pub struct StatusCheckGate {
    floating_tags: HashSet<String>,
    min_version: Version,
}

impl StatusCheckGate {
    pub fn from_config(config: &UpgradeConfig) -> Result<Self> {
        let min_version = Version::parse(&config.min_status_check_version).map_err(|e| {
            OperatorError::ConfigError(format!(
                "invalid min_status_check_version {:?}: {}",
                config.min_status_check_version, e
            ))
        })?;
        Ok(Self {
            floating_tags: config.floating_tags.iter().cloned().collect(),
            min_version,
        })
    }

    /// Floating tags always engage the gate; otherwise the tag must parse
    /// and be at or above the minimum. Unparsable tags skip the gate.
    pub fn needs_status_check(&self, tag: &str) -> bool {
        if self.floating_tags.contains(tag) {
            return true;
        }
        parse_tag_version(tag).is_some_and(|version| version >= self.min_version)
    }

    pub fn needs_status_check_for_image(&self, image: &str) -> bool {
        self.needs_status_check(image_tag(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_tag() {
        assert_eq!(image_tag("pingcap/store:v5.1.2"), "v5.1.2");
        assert_eq!(image_tag("registry:5000/pingcap/store:nightly"), "nightly");
        assert_eq!(image_tag("registry:5000/pingcap/store"), "latest");
        assert_eq!(image_tag("store"), "latest");
        assert_eq!(image_tag("store:v6.0.0@sha256:abc"), "v6.0.0");
    }

    #[test]
    fn test_parse_tag_version() {
        assert_eq!(parse_tag_version("v5.1.2"), Some(Version::new(5, 1, 2)));
        assert_eq!(parse_tag_version("5.1"), Some(Version::new(5, 1, 0)));
        assert_eq!(parse_tag_version("v6"), Some(Version::new(6, 0, 0)));
        assert!(parse_tag_version("v5.2.0-alpha").is_some());
        assert!(parse_tag_version("nightly").is_none());
        assert!(parse_tag_version("1.2.3.4").is_none());
    }

    #[test]
    fn test_gate() {
        let gate = StatusCheckGate::from_config(&UpgradeConfig::default()).unwrap();

        assert!(gate.needs_status_check("latest"));
        assert!(gate.needs_status_check("nightly"));
        assert!(gate.needs_status_check("v5.1.2"));
        assert!(gate.needs_status_check("v5.1.2-rc.1"));
        assert!(gate.needs_status_check("v6.0.0"));
        assert!(!gate.needs_status_check("v5.1.1"));
        assert!(!gate.needs_status_check("v4.0.9"));
        assert!(!gate.needs_status_check("some-branch-build"));
        assert!(gate.needs_status_check_for_image("pingcap/store"));
    }

    #[test]
    fn test_gate_rejects_bad_minimum() {
        let config = UpgradeConfig {
            floating_tags: vec![],
            min_status_check_version: "not-a-version".into(),
        };
        assert!(StatusCheckGate::from_config(&config).is_err());
    }
}
