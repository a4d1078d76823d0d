//! RPC glue between service descriptors and a caller-supplied transport.
//!
//! The transport only ever sees a method's full name and encoded bytes.
//! [`ServiceClient`] encodes requests with the method's request type and
//! decodes responses with its response type.

use crate::error::{Error, Result};
use crate::message::Message;
use crate::schema::{Method, NodeId, NodeKind, Root};
use bytes::Bytes;
use tracing::debug;

/// A transport that carries encoded requests and responses.
///
/// `invoke` returns `Ok(None)` when the peer has ended the call; the
/// client then refuses further calls.
pub trait RpcImpl {
    /// Sends `request` to `method` (a full name such as `.pkg.Svc.Get`)
    fn invoke(&self, method: &str, request: Bytes) -> Result<Option<Bytes>>;

    /// Called once when the client side ends the service
    fn end(&self) {}
}

impl<F> RpcImpl for F
where
    F: Fn(&str, Bytes) -> Result<Option<Bytes>>,
{
    fn invoke(&self, method: &str, request: Bytes) -> Result<Option<Bytes>> {
        self(method, request)
    }
}

/// A client for one service of a schema tree.
///
/// # Example
///
/// ```no_run
/// use bytes::Bytes;
/// use protodyn_core::{Result, Root, ServiceClient};
///
/// fn send(method: &str, request: Bytes) -> Result<Option<Bytes>> {
///     // hand `request` to a real transport here
///     let _ = method;
///     Ok(Some(request))
/// }
///
/// # fn demo(root: &Root) -> Result<()> {
/// let request = root.get_type("pkg.HelloRequest")?.create();
/// let mut client = ServiceClient::new(root, "pkg.Greeter", send)?;
/// let reply = client.call("SayHello", &request)?;
/// # let _ = reply;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ServiceClient<'r, T> {
    root: &'r Root,
    service: NodeId,
    rpc: T,
    ended: bool,
}

impl<'r, T: RpcImpl> ServiceClient<'r, T> {
    /// Creates a client for the service at `path`
    pub fn new(root: &'r Root, path: &str, rpc: T) -> Result<Self> {
        let service = root.lookup_service(path)?;
        Ok(Self {
            root,
            service,
            rpc,
            ended: false,
        })
    }

    /// Node id of the service
    pub fn service(&self) -> NodeId {
        self.service
    }

    /// Whether the service has ended, by either side
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Calls `method` with `request`.
    ///
    /// Returns `Ok(None)` when the transport signals the end of the call.
    pub fn call(&mut self, method: &str, request: &Message) -> Result<Option<Message>> {
        if self.ended {
            return Err(Error::rpc("service has ended"));
        }
        let descriptor = self
            .root
            .as_service(self.service)
            .and_then(|data| data.method(method))
            .ok_or_else(|| {
                Error::not_found(format!("method {}.{method}", self.root.full_name(self.service)))
            })?;
        let request_type = self.root.type_ref(self.resolve(descriptor, true)?)?;
        let response_type = self.root.type_ref(self.resolve(descriptor, false)?)?;
        if request.type_id() != request_type.id() {
            return Err(Error::invalid_value(
                method,
                format!(
                    "request of type {} expected, got {}",
                    request_type.full_name(),
                    self.root.full_name(request.type_id())
                ),
            ));
        }

        let full_name = format!("{}.{}", self.root.full_name(self.service), descriptor.name());
        let payload = request_type.encode(request)?;
        debug!(method = %full_name, bytes = payload.len(), "invoking rpc method");
        match self.rpc.invoke(&full_name, payload)? {
            Some(response) => response_type.decode(response).map(Some),
            None => {
                debug!(method = %full_name, "rpc ended by peer");
                self.ended = true;
                Ok(None)
            }
        }
    }

    /// Ends the service, notifying the transport
    pub fn end(&mut self) {
        if !self.ended {
            self.ended = true;
            self.rpc.end();
        }
    }

    /// The request or response type of `method`, resolving it on the fly
    /// when the tree has not been resolved yet
    fn resolve(&self, method: &Method, request: bool) -> Result<NodeId> {
        let (resolved, name) = if request {
            (method.resolved_request(), method.request_type())
        } else {
            (method.resolved_response(), method.response_type())
        };
        if let Some(id) = resolved {
            return Ok(id);
        }
        self.root
            .lookup_filtered(self.service, name, |kind| matches!(kind, NodeKind::Type(_)))
            .ok_or_else(|| Error::UnresolvedReference {
                reference: name.to_string(),
                from: format!("{}.{}", self.root.full_name(self.service), method.name()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Value;
    use crate::schema::Field;
    use std::cell::{Cell, RefCell};

    fn echo_root() -> Root {
        let mut root = Root::new();
        let pkg = root.define_namespace("demo").unwrap();
        let req = root.add_type(pkg, "Ping").unwrap();
        root.add_field(req, Field::new("n", 1, "int32")).unwrap();
        let resp = root.add_type(pkg, "Pong").unwrap();
        root.add_field(resp, Field::new("n", 1, "int32")).unwrap();
        let svc = root.add_service(pkg, "Echo").unwrap();
        root.add_method(svc, Method::new("Bounce", "Ping", "Pong")).unwrap();
        root.resolve_all().unwrap();
        root
    }

    #[test]
    fn test_call_round_trip() {
        let root = echo_root();
        let seen = RefCell::new(Vec::new());
        let transport = |method: &str, request: Bytes| -> Result<Option<Bytes>> {
            seen.borrow_mut().push(method.to_string());
            Ok(Some(request))
        };
        let mut client = ServiceClient::new(&root, "demo.Echo", transport).unwrap();

        let ping = root.get_type("demo.Ping").unwrap();
        let mut request = ping.create();
        ping.set(&mut request, "n", Value::I32(9)).unwrap();
        let response = client.call("Bounce", &request).unwrap().unwrap();

        let pong = root.get_type("demo.Pong").unwrap();
        assert_eq!(response.type_id(), pong.id());
        assert_eq!(pong.get(&response, "n").unwrap(), Some(Value::I32(9)));
        assert_eq!(seen.borrow().as_slice(), [".demo.Echo.Bounce".to_string()]);
    }

    #[test]
    fn test_rejects_bad_calls() {
        let root = echo_root();
        let transport = |_: &str, _: Bytes| -> Result<Option<Bytes>> { Ok(None) };
        let mut client = ServiceClient::new(&root, "demo.Echo", transport).unwrap();
        let pong = root.get_type("demo.Pong").unwrap();

        assert!(matches!(
            client.call("Missing", &pong.create()),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            client.call("Bounce", &pong.create()),
            Err(Error::InvalidValue { .. })
        ));
    }

    struct Counting {
        ends: Cell<u32>,
    }

    impl RpcImpl for Counting {
        fn invoke(&self, _method: &str, _request: Bytes) -> Result<Option<Bytes>> {
            Ok(None)
        }

        fn end(&self) {
            self.ends.set(self.ends.get() + 1);
        }
    }

    #[test]
    fn test_end_of_stream() {
        let root = echo_root();
        let ping = root.get_type("demo.Ping").unwrap();
        let mut client = ServiceClient::new(&root, "demo.Echo", Counting { ends: Cell::new(0) })
            .unwrap();

        assert_eq!(client.call("Bounce", &ping.create()).unwrap(), None);
        assert!(client.is_ended());
        assert!(matches!(client.call("Bounce", &ping.create()), Err(Error::Rpc(_))));
        client.end();
        assert_eq!(client.rpc.ends.get(), 0);

        let mut fresh = ServiceClient::new(&root, "demo.Echo", Counting { ends: Cell::new(0) })
            .unwrap();
        fresh.end();
        fresh.end();
        assert_eq!(fresh.rpc.ends.get(), 1);
    }

    #[test]
    fn test_unresolved_tree() {
        let mut root = Root::new();
        let req = root.add_type(NodeId::ROOT, "Req").unwrap();
        root.add_field(req, Field::new("a", 1, "bool")).unwrap();
        let svc = root.add_service(NodeId::ROOT, "Svc").unwrap();
        root.add_method(svc, Method::new("Do", "Req", "Req")).unwrap();

        let transport = |_: &str, request: Bytes| -> Result<Option<Bytes>> { Ok(Some(request)) };
        let mut client = ServiceClient::new(&root, "Svc", transport).unwrap();
        let ty = root.get_type("Req").unwrap();
        assert!(client.call("Do", &ty.create()).unwrap().is_some());
    }
}
