use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use super::response::Response;
use crate::core::error::{ConnectorError, ConnectorResult};

/// Callback invoked exactly once with the completed request and its response.
pub type ResponseCallback = Box<dyn FnOnce(&Request, Response) + Send>;

/// A single form field.
///
/// When any field of a request is a [`Form::File`], the whole form is sent as
/// `multipart/form-data`; otherwise it is sent url-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Form {
    Text(String),
    File {
        data: Bytes,
        file_name: String,
        mime_type: String,
    },
}

impl Form {
    pub fn text(value: impl Into<String>) -> Self {
        Form::Text(value.into())
    }

    pub fn file(
        data: impl Into<Bytes>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Form::File {
            data: data.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Form::File { .. })
    }

    fn len(&self) -> usize {
        match self {
            Form::Text(value) => value.len(),
            Form::File { data, .. } => data.len(),
        }
    }
}

/// An outbound REST call.
///
/// `function` is appended to the connector's base URL. At most one of
/// `body` and `forms` may be set.
pub struct Request {
    pub method: Method,
    pub function: String,
    pub headers: HashMap<String, String>,
    pub parameters: BTreeMap<String, String>,
    pub forms: Option<BTreeMap<String, Form>>,
    pub body: Option<Bytes>,
    /// Overrides the connector timeout for this request
    pub timeout: Option<Duration>,
    pub on_response: Option<ResponseCallback>,
}

impl Request {
    pub fn new(method: Method, function: impl Into<String>) -> Self {
        Self {
            method,
            function: function.into(),
            headers: HashMap::new(),
            parameters: BTreeMap::new(),
            forms: None,
            body: None,
            timeout: None,
            on_response: None,
        }
    }

    pub fn get(function: impl Into<String>) -> Self {
        Self::new(Method::GET, function)
    }

    pub fn post(function: impl Into<String>) -> Self {
        Self::new(Method::POST, function)
    }

    pub fn put(function: impl Into<String>) -> Self {
        Self::new(Method::PUT, function)
    }

    pub fn delete(function: impl Into<String>) -> Self {
        Self::new(Method::DELETE, function)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.parameters.insert(name.into(), value.to_string());
        self
    }

    pub fn with_form(mut self, name: impl Into<String>, field: Form) -> Self {
        self.forms
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), field);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_response<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Request, Response) + Send + 'static,
    {
        self.on_response = Some(Box::new(callback));
        self
    }

    /// Whether the form needs multipart encoding.
    pub fn is_multipart(&self) -> bool {
        self.forms
            .as_ref()
            .is_some_and(|forms| forms.values().any(Form::is_file))
    }

    /// Size of the outgoing payload in bytes (raw body or form contents).
    pub fn payload_len(&self) -> usize {
        if let Some(body) = &self.body {
            return body.len();
        }
        self.forms
            .as_ref()
            .map(|forms| forms.iter().map(|(name, field)| name.len() + field.len()).sum())
            .unwrap_or(0)
    }

    /// Check that the request can be sent at all.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.body.is_some() && self.forms.is_some() {
            return Err(ConnectorError::InvalidRequest(
                "a request cannot carry both a raw body and form fields".to_string(),
            ));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConnectorError::InvalidRequest(format!("invalid header name: {name}"))
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                ConnectorError::InvalidRequest(format!("invalid value for header {name}"))
            })?;
        }

        Ok(())
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("function", &self.function)
            .field("headers", &self.headers)
            .field("parameters", &self.parameters)
            .field("forms", &self.forms.as_ref().map(|forms| forms.len()))
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("timeout", &self.timeout)
            .field("has_callback", &self.on_response.is_some())
            .finish()
    }
}
