//! Compatibility check for the `buildfox_required_version` reserved variable.

use crate::error::Error;

/// The version this generator reports and checks manifests against.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn parse(version: &str) -> Result<Vec<u64>, Error> {
    version
        .trim()
        .split('.')
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| Error::InvalidVersion(version.to_string()))
        })
        .collect()
}

/// Fail if the running generator is older than the manifest requires.
///
/// Versions are dotted numeric tuples compared componentwise; a missing
/// component counts as zero, so `0.3` accepts `0.3.1`.
pub fn version_check(required: &str) -> Result<(), Error> {
    let required_parts = parse(required)?;
    let current_parts = parse(VERSION)?;

    let len = required_parts.len().max(current_parts.len());
    for i in 0..len {
        let req = required_parts.get(i).copied().unwrap_or(0);
        let cur = current_parts.get(i).copied().unwrap_or(0);
        if cur < req {
            return Err(Error::UnsupportedVersion {
                required: required.to_string(),
                current: VERSION.to_string(),
            });
        }
        if cur > req {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_older_requirement() {
        version_check("0.1").unwrap();
        version_check("0.3").unwrap();
    }

    #[test]
    fn rejects_newer_requirement() {
        assert!(matches!(
            version_check("99.0"),
            Err(Error::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            version_check("not-a-version"),
            Err(Error::InvalidVersion(_))
        ));
    }
}
