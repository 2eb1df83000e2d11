use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::HubError;

/// Lock-record key holding the hub's registration secret.
pub const SECRET_KEY: &str = "samp.secret";
/// Lock-record key holding the hub's reachable RPC endpoint.
pub const URL_KEY: &str = "samp.hub-xmlrpc-url";

/// The discovery record a running hub advertises at a well-known path.
///
/// Serialised as line-oriented `key=value` assignments preceded by a
/// comment line recording creation time. The secret in a valid record
/// authenticates exactly the hub instance that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub secret: String,
    pub url: String,
    /// Free-form informational entries (implementation identity, start
    /// time). Never required for discovery.
    pub extra: BTreeMap<String, String>,
}

impl LockInfo {
    pub fn new(secret: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            url: url.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extra.insert(key.to_owned(), value.into());
        self
    }

    /// Renders the record, stamping `created_at` into the leading comment.
    pub fn to_file_string(&self, created_at: SystemTime) -> Result<String, HubError> {
        let mut out = String::new();
        out.push_str(&format!(
            "# SAMP lockfile written {}\n",
            humantime::format_rfc3339_seconds(created_at)
        ));
        write_assignment(&mut out, SECRET_KEY, &self.secret)?;
        write_assignment(&mut out, URL_KEY, &self.url)?;
        for (key, value) in &self.extra {
            write_assignment(&mut out, key, value)?;
        }
        Ok(out)
    }

    /// Parses a record previously written by [`LockInfo::to_file_string`].
    ///
    /// Blank lines and `#` comments are ignored; every other line must be
    /// a `key=value` assignment, and the secret and url keys must both be
    /// present.
    pub fn parse(contents: &str) -> Result<Self, HubError> {
        let mut entries = BTreeMap::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(HubError::InvalidArgument(format!(
                    "lock record line {} is not a key=value assignment",
                    lineno + 1
                )));
            };
            entries.insert(key.to_owned(), value.to_owned());
        }
        let secret = entries
            .remove(SECRET_KEY)
            .ok_or_else(|| HubError::InvalidArgument(format!("lock record missing {SECRET_KEY}")))?;
        let url = entries
            .remove(URL_KEY)
            .ok_or_else(|| HubError::InvalidArgument(format!("lock record missing {URL_KEY}")))?;
        Ok(Self {
            secret,
            url,
            extra: entries,
        })
    }
}

fn write_assignment(out: &mut String, key: &str, value: &str) -> Result<(), HubError> {
    if key.contains('=') || key.contains('\n') || value.contains('\n') {
        return Err(HubError::InvalidArgument(format!(
            "lock record entry {key:?} contains forbidden characters"
        )));
    }
    out.push_str(key);
    out.push('=');
    out.push_str(value);
    out.push('\n');
    Ok(())
}
