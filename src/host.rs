// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host checks.
//!
//! Stepwise provisions the operator's own account. Running it as root would
//! write every profile, clone, and dotfile into root's home instead, so a
//! privileged run is refused outright. Plans are also written for specific
//! distributions, identified through `/etc/os-release`.

use nix::unistd::{Uid, User};
use std::{fs, path::Path};

/// Default location of the os-release file.
pub const OS_RELEASE: &str = "/etc/os-release";

/// Check if process runs with an effective uid of root.
pub fn is_privileged() -> bool {
    Uid::effective().is_root()
}

/// Name of the account running the process.
///
/// # Errors
///
/// - Return [`HostError::User`] if the user database cannot be queried.
/// - Return [`HostError::UnknownUser`] if the account has no entry.
pub fn current_user() -> Result<String> {
    let uid = Uid::current();
    User::from_uid(uid)?
        .map(|user| user.name)
        .ok_or(HostError::UnknownUser(uid.as_raw()))
}

/// Distribution identity from os-release.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Value of `ID`.
    pub id: String,

    /// Values of `ID_LIKE`.
    pub id_like: Vec<String>,

    /// Value of `PRETTY_NAME`, if any.
    pub pretty_name: Option<String>,
}

impl HostInfo {
    /// Read distribution identity from os-release file at path.
    ///
    /// # Errors
    ///
    /// - Return [`HostError::Read`] if the file cannot be read.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|err| HostError::Read {
            source: err,
            path: path.display().to_string(),
        })?;

        Ok(Self::parse(&data))
    }

    /// Parse os-release content.
    ///
    /// Unknown keys, comments, and malformed lines are ignored.
    pub fn parse(data: &str) -> Self {
        let mut info = Self::default();
        for line in data.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');

            match key.trim() {
                "ID" => info.id = value.to_owned(),
                "ID_LIKE" => info.id_like = value.split_whitespace().map(Into::into).collect(),
                "PRETTY_NAME" => info.pretty_name = Some(value.to_owned()),
                _ => {}
            }
        }

        info
    }

    /// Human readable host name.
    pub fn name(&self) -> &str {
        self.pretty_name.as_deref().unwrap_or(&self.id)
    }

    /// Check if host matches any supported distribution identifier.
    ///
    /// An empty listing supports every host.
    pub fn is_supported(&self, supported: &[String]) -> bool {
        supported.is_empty()
            || supported.iter().any(|wanted| {
                wanted.eq_ignore_ascii_case(&self.id)
                    || self
                        .id_like
                        .iter()
                        .any(|like| wanted.eq_ignore_ascii_case(like))
            })
    }
}

/// Host check error types.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The os-release file cannot be read.
    #[error("failed to read host information from {path:?}")]
    Read {
        #[source]
        source: std::io::Error,
        path: String,
    },

    /// User database cannot be queried.
    #[error(transparent)]
    User(#[from] nix::Error),

    /// Account has no user database entry.
    #[error("no user database entry for uid {0}")]
    UnknownUser(u32),
}

/// Friendly result alias :3
pub type Result<T, E = HostError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    const UBUNTU: &str = indoc! {r#"
        # generated
        PRETTY_NAME="Ubuntu 24.04.1 LTS"
        NAME="Ubuntu"
        ID=ubuntu
        ID_LIKE=debian
        garbage
    "#};

    #[test]
    fn parse_os_release() {
        assert_eq!(
            HostInfo::parse(UBUNTU),
            HostInfo {
                id: "ubuntu".into(),
                id_like: vec!["debian".into()],
                pretty_name: Some("Ubuntu 24.04.1 LTS".into()),
            }
        );
    }

    #[test_case(vec![], true; "any host")]
    #[test_case(vec!["ubuntu".into()], true; "exact id")]
    #[test_case(vec!["Debian".into()], true; "id like")]
    #[test_case(vec!["fedora".into(), "arch".into()], false; "unsupported")]
    #[test]
    fn match_supported_hosts(supported: Vec<String>, expect: bool) {
        use pretty_assertions::assert_eq;
        assert_eq!(HostInfo::parse(UBUNTU).is_supported(&supported), expect);
    }

    #[sealed_test]
    fn read_os_release_file() -> anyhow::Result<()> {
        fs::write("os-release", "ID=fedora\nVERSION_ID=41\n")?;
        let info = HostInfo::read("os-release")?;
        assert_eq!(info.name(), "fedora");
        assert!(info.id_like.is_empty());

        assert!(matches!(HostInfo::read("missing"), Err(HostError::Read { .. })));
        Ok(())
    }
}
