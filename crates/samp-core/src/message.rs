use serde::{Deserialize, Serialize};

use crate::value::{validate_map, MapValue, Value};
use crate::{HubError, MType};

/// Key under which an error map carries its human-readable description.
pub const ERRTXT_KEY: &str = "samp.errortxt";

/// A typed message travelling between clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "samp.mtype")]
    pub mtype: MType,
    #[serde(rename = "samp.params", default)]
    pub params: MapValue,
}

impl Message {
    pub fn new(mtype: MType) -> Self {
        Self {
            mtype,
            params: MapValue::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    /// Structural validation of the parameter tree.
    pub fn validate(&self) -> Result<(), HubError> {
        validate_map(&self.params)
    }
}

/// Outcome classification of a call response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    #[serde(rename = "samp.ok")]
    Ok,
    #[serde(rename = "samp.warning")]
    Warning,
    #[serde(rename = "samp.error")]
    Error,
}

/// The reply to a call: a status, a result map for OK/WARNING, and an
/// error map carrying at least [`ERRTXT_KEY`] for WARNING/ERROR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "samp.status")]
    pub status: ResponseStatus,
    #[serde(rename = "samp.result", default)]
    pub result: MapValue,
    #[serde(rename = "samp.error", default)]
    pub error: MapValue,
}

impl Response {
    pub fn ok(result: MapValue) -> Self {
        Self {
            status: ResponseStatus::Ok,
            result,
            error: MapValue::new(),
        }
    }

    pub fn error(errtxt: impl Into<String>) -> Self {
        let mut error = MapValue::new();
        error.insert(ERRTXT_KEY.to_owned(), Value::Str(errtxt.into()));
        Self {
            status: ResponseStatus::Error,
            result: MapValue::new(),
            error,
        }
    }

    pub fn warning(result: MapValue, errtxt: impl Into<String>) -> Self {
        let mut error = MapValue::new();
        error.insert(ERRTXT_KEY.to_owned(), Value::Str(errtxt.into()));
        Self {
            status: ResponseStatus::Warning,
            result,
            error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Human-readable error text, present for WARNING/ERROR responses.
    pub fn err_txt(&self) -> Option<&str> {
        self.error.get(ERRTXT_KEY).and_then(Value::as_str)
    }

    /// Checks the invariants a client-supplied response must satisfy
    /// before the hub forwards it.
    pub fn validate(&self) -> Result<(), HubError> {
        validate_map(&self.result)?;
        validate_map(&self.error)?;
        match self.status {
            ResponseStatus::Ok => Ok(()),
            ResponseStatus::Warning | ResponseStatus::Error => {
                if self.err_txt().is_none() {
                    return Err(HubError::InvalidArgument(format!(
                        "{} response missing {ERRTXT_KEY}",
                        match self.status {
                            ResponseStatus::Warning => "warning",
                            _ => "error",
                        }
                    )));
                }
                Ok(())
            }
        }
    }
}
