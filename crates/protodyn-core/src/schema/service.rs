//! Service and method descriptors.

use super::{NodeId, Options};

/// An RPC method
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub(crate) name: String,
    pub(crate) request_type: String,
    pub(crate) response_type: String,
    pub(crate) request_stream: bool,
    pub(crate) response_stream: bool,
    pub(crate) options: Options,
    pub(crate) resolved_request: Option<NodeId>,
    pub(crate) resolved_response: Option<NodeId>,
}

impl Method {
    /// Creates a unary method
    pub fn new(
        name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            request_type: request_type.into(),
            response_type: response_type.into(),
            request_stream: false,
            response_stream: false,
            options: Options::new(),
            resolved_request: None,
            resolved_response: None,
        }
    }

    /// Marks the request side as streaming
    pub fn request_stream(mut self, stream: bool) -> Self {
        self.request_stream = stream;
        self
    }

    /// Marks the response side as streaming
    pub fn response_stream(mut self, stream: bool) -> Self {
        self.response_stream = stream;
        self
    }

    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request type name as written
    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    /// Response type name as written
    pub fn response_type(&self) -> &str {
        &self.response_type
    }

    /// Whether requests are streamed
    pub fn is_request_stream(&self) -> bool {
        self.request_stream
    }

    /// Whether responses are streamed
    pub fn is_response_stream(&self) -> bool {
        self.response_stream
    }

    /// Method options
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Resolved request type
    pub fn resolved_request(&self) -> Option<NodeId> {
        self.resolved_request
    }

    /// Resolved response type
    pub fn resolved_response(&self) -> Option<NodeId> {
        self.resolved_response
    }
}

/// Methods of a service in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceData {
    pub(crate) methods: Vec<Method>,
}

impl ServiceData {
    /// All methods
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// A method by name
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}
