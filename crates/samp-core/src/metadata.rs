use serde::{Deserialize, Serialize};
use url::Url;

use crate::value::{validate_map, MapValue, Value};
use crate::HubError;

pub const NAME_KEY: &str = "samp.name";
pub const DESCTEXT_KEY: &str = "samp.description.text";
pub const DESCHTML_KEY: &str = "samp.description.html";
pub const ICONURL_KEY: &str = "samp.icon.url";
pub const DOCURL_KEY: &str = "samp.documentation.url";

/// A client's self-description: free-form key/value pairs with well-known
/// keys for name, descriptions, and icon/documentation links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(MapValue);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: MapValue) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &MapValue {
        &self.0
    }

    pub fn into_map(self) -> MapValue {
        self.0
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.0.insert(NAME_KEY.to_owned(), Value::Str(name.into()));
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get(NAME_KEY).and_then(Value::as_str)
    }

    pub fn set_description(&mut self, text: impl Into<String>) {
        self.0
            .insert(DESCTEXT_KEY.to_owned(), Value::Str(text.into()));
    }

    pub fn description(&self) -> Option<&str> {
        self.0.get(DESCTEXT_KEY).and_then(Value::as_str)
    }

    pub fn set_icon_url(&mut self, url: impl Into<String>) {
        self.0.insert(ICONURL_KEY.to_owned(), Value::Str(url.into()));
    }

    pub fn icon_url(&self) -> Option<&str> {
        self.0.get(ICONURL_KEY).and_then(Value::as_str)
    }

    pub fn set_documentation_url(&mut self, url: impl Into<String>) {
        self.0.insert(DOCURL_KEY.to_owned(), Value::Str(url.into()));
    }

    pub fn documentation_url(&self) -> Option<&str> {
        self.0.get(DOCURL_KEY).and_then(Value::as_str)
    }

    /// Every string value stored under a `*.url` key, in declaration order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|(key, value)| {
            if key.ends_with(".url") {
                value.as_str()
            } else {
                None
            }
        })
    }

    /// Structural validation plus a parse check of the URL-valued keys.
    pub fn check(&self) -> Result<(), HubError> {
        validate_map(&self.0)?;
        for raw in self.urls() {
            let url = Url::parse(raw).map_err(|err| {
                HubError::InvalidArgument(format!("malformed metadata url {raw:?}: {err}"))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(HubError::InvalidArgument(format!(
                    "metadata url {raw:?} must be http or https"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_accessors_round_trip() {
        let mut meta = Metadata::new();
        meta.set_name("topcat");
        meta.set_description("Tool for OPerations on Catalogues And Tables");
        meta.set_icon_url("http://example.com/tc.png");
        assert_eq!(meta.name(), Some("topcat"));
        assert_eq!(meta.icon_url(), Some("http://example.com/tc.png"));
        assert!(meta.check().is_ok());
    }

    #[test]
    fn check_rejects_non_http_urls() {
        let mut meta = Metadata::new();
        meta.set_icon_url("file:///etc/passwd");
        assert!(meta.check().is_err());

        let mut meta = Metadata::new();
        meta.set_documentation_url("not a url");
        assert!(meta.check().is_err());
    }
}
