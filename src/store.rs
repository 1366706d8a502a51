//! In-memory model of the AWS shared credentials file.
//!
//! The file is parsed with `configparser` and kept as an ordered list of profiles, each an
//! ordered list of `key = value` entries. Keys this tool does not manage are carried through
//! untouched, so writing the store back only changes the profile that was refreshed.

use std::{collections::HashSet, fmt, io, path::Path};

use anyhow::{Context, Result};
use configparser::ini::Ini;
use tokio::fs;

use crate::{credentials::SessionCredentials, error::MfaError};

pub const ACCESS_KEY_ID: &str = "aws_access_key_id";
pub const SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
pub const SESSION_TOKEN: &str = "aws_session_token";
pub const SESSION_EXPIRATION: &str = "aws_session_expiration";

const MANAGED_KEYS: [&str; 4] = [
    ACCESS_KEY_ID,
    SECRET_ACCESS_KEY,
    SESSION_TOKEN,
    SESSION_EXPIRATION,
];

// Bucket for entries that appear before any section header. A header line can never
// produce this name.
const UNSECTIONED: &str = "\0unsectioned";

/// A single `[name]` section of the credentials file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    entries: Vec<(String, String)>,
}

impl Profile {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Overwrites `key` in place, or appends it when the profile doesn't have it yet.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, current)) => *current = value,
            None => self.entries.push((key.to_owned(), value)),
        }
    }

    pub fn access_key_id(&self) -> Option<&str> {
        self.get(ACCESS_KEY_ID)
    }

    pub fn session_expiration(&self) -> Option<&str> {
        self.get(SESSION_EXPIRATION)
    }

    /// All entries in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries that are not one of the four session fields.
    pub fn unmanaged(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries().filter(|(k, _)| !MANAGED_KEYS.contains(k))
    }

    /// Stores `session` in the four managed fields, keeping everything else.
    pub fn with_session(mut self, session: &SessionCredentials) -> Self {
        self.set(ACCESS_KEY_ID, session.access_key_id.as_str());
        self.set(SECRET_ACCESS_KEY, session.secret_access_key.as_str());
        self.set(SESSION_TOKEN, session.session_token.as_str());
        self.set(SESSION_EXPIRATION, session.formatted_expiration());
        self
    }
}

/// Every profile of a credentials file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialsStore {
    profiles: Vec<(String, Profile)>,
}

impl CredentialsStore {
    /// Reads the credentials file at `path`. A missing file is an empty store.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read credentials file {}", path.display()));
            }
        };

        Self::parse(&content)
            .with_context(|| format!("Failed to load credentials from {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self, MfaError> {
        // Secrets may legitimately contain `#` or `;`, only whole-line comments are honoured.
        let no_inline_comments: &[char] = &[];

        let mut ini = Ini::new_cs();
        ini.set_default_section(UNSECTIONED);
        ini.set_inline_comment_symbols(Some(no_inline_comments));

        let sections = ini.read(content.to_owned()).map_err(MfaError::Parse)?;
        // configparser silently merges repeated sections and keys, which would drop values
        // on the next write.
        check_duplicates(content)?;

        let mut store = Self::default();
        for (name, keys) in sections {
            if name == UNSECTIONED {
                if let Some(key) = keys.keys().next() {
                    return Err(MfaError::Parse(format!(
                        "`{key}` appears before the first [profile] header"
                    )));
                }
                continue;
            }

            let mut profile = Profile::default();
            for (key, value) in keys {
                let value = value.ok_or_else(|| {
                    MfaError::Parse(format!("`{key}` in [{name}] is missing a `=` delimiter"))
                })?;
                profile.set(&key, value);
            }
            store.profiles.push((name, profile));
        }

        Ok(store)
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, profile)| profile)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Replaces the profile called `name`, appending it when it doesn't exist yet.
    pub fn with_profile(mut self, name: &str, profile: Profile) -> Self {
        match self.profiles.iter_mut().find(|(n, _)| n == name) {
            Some((_, current)) => *current = profile,
            None => self.profiles.push((name.to_owned(), profile)),
        }
        self
    }

    /// Writes `session` into the profile called `name`, creating the profile if needed.
    pub fn with_session(self, name: &str, session: &SessionCredentials) -> Self {
        let profile = self
            .profile(name)
            .cloned()
            .unwrap_or_default()
            .with_session(session);
        self.with_profile(name, profile)
    }
}

/// Rejects empty `[]` headers, repeated headers and repeated keys within a section.
///
/// Line handling follows the configparser settings used by [`CredentialsStore::parse`]:
/// whole-line comments only, `=` or `:` as delimiter, no multiline values.
fn check_duplicates(content: &str) -> Result<(), MfaError> {
    let mut sections = HashSet::new();
    let mut keys = HashSet::new();
    let mut section = UNSECTIONED;

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(['#', ';']) {
            continue;
        }

        if let Some(end) = line.strip_prefix('[').and_then(|_| line.rfind(']')) {
            section = line[1..end].trim();
            if section.is_empty() {
                return Err(MfaError::Parse(format!(
                    "line {}: empty profile name",
                    number + 1
                )));
            }
            if !sections.insert(section) {
                return Err(MfaError::Parse(format!(
                    "line {}: profile [{section}] is defined more than once",
                    number + 1
                )));
            }
            keys.clear();
            continue;
        }

        if let Some(delimiter) = line.find(['=', ':']) {
            let key = line[..delimiter].trim();
            if !keys.insert(key) {
                return Err(MfaError::Parse(format!(
                    "line {}: `{key}` is set more than once in [{section}]",
                    number + 1
                )));
            }
        }
    }

    Ok(())
}

impl fmt::Display for CredentialsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (name, profile)) in self.profiles.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{name}]")?;
            for (key, value) in profile.entries() {
                writeln!(f, "{key} = {value}")?;
            }
        }
        Ok(())
    }
}
