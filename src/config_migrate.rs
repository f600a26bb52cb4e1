//! Config document migration
//!
//! Migration works on the raw text. `${VAR}` placeholders are left exactly as
//! written because expansion happens later, at load time.

use std::io::{Read, Write};

use tracing::debug;

use crate::config_version::{ConfigEnvelope, VERSION_FIELD, VersionRegistry, VersionStatus};
use crate::{Error, Result};

/// Migrate a raw document to `target`, or to the current version when
/// `target` is `None` or empty.
///
/// A document already at the target with an explicit tag is returned
/// unchanged. A document at the target without a tag gets the tag inserted
/// after its leading comment and blank lines.
pub fn migrate(registry: &VersionRegistry, raw: &str, target: Option<&str>) -> Result<String> {
    let target = match target {
        Some(t) if !t.is_empty() => t,
        _ => registry.current(),
    };

    let Some(target_info) = registry.get(target) else {
        return Err(Error::UnknownTargetVersion {
            version: target.to_string(),
            supported: registry.supported_list(),
        });
    };
    if target_info.status == VersionStatus::Removed {
        return Err(Error::RemovedTargetVersion {
            version: target.to_string(),
            supported: registry.supported_list(),
        });
    }

    let explicit = ConfigEnvelope::peek(raw);
    let source = explicit
        .clone()
        .unwrap_or_else(|| registry.current().to_string());
    let source_info = registry
        .resolve(&source)
        .map_err(|e| Error::SourceConfig(Box::new(e)))?;

    if source == target {
        if explicit.is_some() {
            debug!(version = %target, "Config already at target version");
            return Ok(raw.to_string());
        }
        return Ok(insert_version_tag(raw, target));
    }

    // Converters only produce the current schema.
    match &source_info.converter {
        Some(convert) if target == registry.current() => {
            debug!(from = %source, to = %target, "Converting config");
            convert(raw)
        }
        _ => Err(Error::MigrationNotImplemented {
            from: source,
            to: target.to_string(),
        }),
    }
}

/// Stream variant of [`migrate`].
pub fn migrate_stream(
    registry: &VersionRegistry,
    mut input: impl Read,
    mut output: impl Write,
    target: Option<&str>,
) -> Result<()> {
    let mut raw = String::new();
    input.read_to_string(&mut raw)?;
    let migrated = migrate(registry, &raw, target)?;
    output.write_all(migrated.as_bytes())?;
    Ok(())
}

/// Insert `apiVersion: <version>` before the first line that is neither
/// blank nor a comment.
fn insert_version_tag(raw: &str, version: &str) -> String {
    let tag = format!("{VERSION_FIELD}: {version}\n");
    if raw.trim().is_empty() {
        return tag;
    }

    let lines: Vec<&str> = raw.split('\n').collect();
    let insert_at = lines
        .iter()
        .position(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .unwrap_or(lines.len());

    let mut out = String::with_capacity(raw.len() + tag.len() + 1);
    for line in &lines[..insert_at] {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&tag);
    out.push_str(&lines[insert_at..].join("\n"));
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config_version::VersionInfo;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tagged_document_is_unchanged() {
        let reg = VersionRegistry::with_defaults();
        let raw = "apiVersion: v1\n# trailing\nserver:\n  name: x\n";
        assert_eq!(migrate(&reg, raw, Some("v1")).unwrap(), raw);
    }

    #[test]
    fn test_tag_goes_after_leading_comments() {
        let reg = VersionRegistry::with_defaults();
        let out = migrate(&reg, "# c\n\nserver:\n  name: x\n", Some("v1")).unwrap();
        assert_eq!(out, "# c\n\napiVersion: v1\nserver:\n  name: x\n");
    }

    #[test]
    fn test_empty_input_yields_tag_only() {
        let reg = VersionRegistry::with_defaults();
        assert_eq!(migrate(&reg, "", None).unwrap(), "apiVersion: v1\n");
        assert_eq!(migrate(&reg, "  \n\t\n", None).unwrap(), "apiVersion: v1\n");
    }

    #[test]
    fn test_comment_only_input_gets_tag_appended() {
        let reg = VersionRegistry::with_defaults();
        let out = migrate(&reg, "# one\n# two", None).unwrap();
        assert_eq!(out, "# one\n# two\napiVersion: v1\n");
    }

    #[test]
    fn test_placeholders_survive() {
        let reg = VersionRegistry::with_defaults();
        let out = migrate(&reg, "name: ${FOO}\n", None).unwrap();
        assert!(out.contains("${FOO}"));
        assert_eq!(out, "apiVersion: v1\nname: ${FOO}\n");
    }

    #[test]
    fn test_unknown_target() {
        let reg = VersionRegistry::with_defaults();
        let err = migrate(&reg, "a: 1\n", Some("v9")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown target version \"v9\"; supported: v1"
        );
    }

    #[test]
    fn test_removed_target() {
        let mut reg = VersionRegistry::with_defaults();
        reg.register(VersionInfo::new("v0", VersionStatus::Removed));
        let err = migrate(&reg, "a: 1\n", Some("v0")).unwrap_err();
        assert!(matches!(err, Error::RemovedTargetVersion { .. }));
        assert!(err.to_string().contains("supported: v1"));
    }

    #[test]
    fn test_unknown_source() {
        let reg = VersionRegistry::with_defaults();
        let err = migrate(&reg, "apiVersion: v5\n", None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "source config: unsupported config apiVersion \"v5\"; supported versions: v1"
        );
    }

    #[test]
    fn test_cross_version_without_converter_fails() {
        let mut reg = VersionRegistry::with_defaults();
        reg.register(VersionInfo::new("v2", VersionStatus::Deprecated));
        let err = migrate(&reg, "apiVersion: v2\n", Some("v1")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "migration from v2 to v1 is not yet implemented"
        );
    }

    #[test]
    fn test_cross_version_uses_converter() {
        let mut reg = VersionRegistry::with_defaults();
        reg.register(
            VersionInfo::new("v0", VersionStatus::Deprecated).with_converter(Arc::new(|raw| {
                Ok(raw.replace("apiVersion: v0", "apiVersion: v1"))
            })),
        );
        let out = migrate(&reg, "apiVersion: v0\nname: ${X}\n", None).unwrap();
        assert_eq!(out, "apiVersion: v1\nname: ${X}\n");
    }

    #[test]
    fn test_migrate_stream() {
        let reg = VersionRegistry::with_defaults();
        let mut out = Vec::new();
        migrate_stream(&reg, "server: {}\n".as_bytes(), &mut out, None).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "apiVersion: v1\nserver: {}\n");
    }
}
