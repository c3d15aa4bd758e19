//! JSON-RPC connection over a [`Transport`].
//!
//! One background task reads lines and dispatches them. Responses complete the
//! waiter registered under their id; requests and notifications go to the
//! [`MethodTable`]. Handler closures are called in arrival order on the read
//! task and only the futures they return run concurrently, so a handler can
//! update connection state before the next message is looked at.
//!
//! When the read side ends, every waiter still pending fails with
//! [`Error::ConnectionClosed`].

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::messages::{
    Message, Notification, Request, RequestId, Response, decode_line, encode_line,
};
use crate::transport::Transport;

type RequestHandler = Box<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync>;
type NotificationHandler = Box<dyn Fn(Option<Value>) + Send + Sync>;
type Waiters = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, Error>>>>>;

/// Inbound method handlers, keyed by method name
#[derive(Default)]
pub struct MethodTable {
    requests: HashMap<String, RequestHandler>,
    notifications: HashMap<String, NotificationHandler>,
}

impl MethodTable {
    /// Create an empty method table
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests for `method` with the handler's result
    pub fn on_request<F, Fut>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Error>> + Send + 'static,
    {
        self.requests
            .insert(method.into(), Box::new(move |params| handler(params).boxed()));
        self
    }

    /// Handle notifications for `method`; the handler runs on the read task
    pub fn on_notification<F>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.notifications.insert(method.into(), Box::new(handler));
        self
    }
}

/// A request that has been written and is waiting for its response
pub struct PendingRequest {
    id: RequestId,
    receiver: oneshot::Receiver<Result<Value, Error>>,
}

impl PendingRequest {
    /// The id the request was sent with
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the response, or for the connection to close
    pub async fn wait(self) -> Result<Value, Error> {
        self.receiver.await.map_err(|_| Error::ConnectionClosed)?
    }
}

/// A live JSON-RPC connection
pub struct RpcConnection {
    transport: Arc<dyn Transport>,
    waiters: Waiters,
    next_id: AtomicI64,
    closed: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RpcConnection {
    /// Start the read loop on `transport`
    pub fn start(transport: Arc<dyn Transport>, methods: MethodTable) -> Arc<Self> {
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            transport.clone(),
            waiters.clone(),
            methods,
            closed.clone(),
        ));

        Arc::new(Self {
            transport,
            waiters,
            next_id: AtomicI64::new(1),
            closed,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// The underlying transport
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        self.start_request(method, params).await?.wait().await
    }

    /// Like [`request`](Self::request) but gives up after `timeout`.
    ///
    /// An abandoned request's waiter is removed; a late response is dropped.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        let pending = self.start_request(method, params).await?;
        let Some(timeout) = timeout else {
            return pending.wait().await;
        };

        let id = pending.id().clone();
        match tokio::time::timeout(timeout, pending.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.waiters().remove(&id);
                tracing::warn!(method = %method, id = %id, "Request timed out");
                Err(Error::Timeout(format!(
                    "{} did not answer within {:?}",
                    method, timeout
                )))
            }
        }
    }

    /// Write a request without waiting for the response
    pub async fn start_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<PendingRequest, Error> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = oneshot::channel();
        self.waiters().insert(id.clone(), sender);

        // The read loop cancels before draining, so this catches a close that
        // raced with the insert above.
        if self.closed.is_cancelled() {
            self.waiters().remove(&id);
            return Err(Error::ConnectionClosed);
        }

        tracing::debug!(method = %method, id = %id, "Sending request");
        let message = Message::Request(Request::new(id.clone(), method, params));
        if let Err(e) = write_message(self.transport.as_ref(), &message).await {
            self.waiters().remove(&id);
            return Err(e);
        }

        Ok(PendingRequest { id, receiver })
    }

    /// Send a notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        tracing::debug!(method = %method, "Sending notification");
        let message = Message::Notification(Notification::new(method, params));
        write_message(self.transport.as_ref(), &message).await
    }

    /// Close the transport and wait for the read loop to finish
    pub async fn close(&self) -> Result<(), Error> {
        let result = self.transport.close().await;

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                tracing::debug!("Read loop ended abnormally: {}", e);
            }
        }
        result
    }

    /// Resolves once the read loop has ended
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Whether the read loop has ended
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn waiters(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, oneshot::Sender<Result<Value, Error>>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Dropping the last handle stops the read loop, which releases the transport.
impl Drop for RpcConnection {
    fn drop(&mut self) {
        let reader = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
        self.closed.cancel();
    }
}

async fn write_message(transport: &dyn Transport, message: &Message) -> Result<(), Error> {
    let line = encode_line(message)?;
    transport.write(line.as_bytes()).await
}

async fn read_loop(
    transport: Arc<dyn Transport>,
    waiters: Waiters,
    methods: MethodTable,
    closed: CancellationToken,
) {
    loop {
        let line = match transport.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("Peer closed the connection");
                break;
            }
            Err(e) => {
                tracing::error!("Transport read failed: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let message = match decode_line(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(line = %line, "Dropping malformed message: {}", e);
                continue;
            }
        };

        match message {
            Message::Response(response) => complete(&waiters, response),
            Message::Request(request) => dispatch_request(&methods, &transport, request),
            Message::Notification(notification) => {
                tracing::debug!(method = %notification.method, "Received notification");
                match methods.notifications.get(&notification.method) {
                    Some(handler) => handler(notification.params),
                    None => {
                        tracing::debug!(method = %notification.method, "Ignoring unhandled notification")
                    }
                }
            }
        }
    }

    closed.cancel();

    let abandoned: Vec<_> = waiters
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    if !abandoned.is_empty() {
        tracing::warn!(count = abandoned.len(), "Failing requests still in flight");
    }
    for (_, waiter) in abandoned {
        let _ = waiter.send(Err(Error::ConnectionClosed));
    }
}

fn complete(waiters: &Waiters, response: Response) {
    let waiter = waiters
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&response.id);

    match waiter {
        Some(waiter) => {
            tracing::debug!(id = %response.id, "Received response");
            // The caller may have stopped waiting
            let _ = waiter.send(response.into_result());
        }
        None => tracing::warn!(id = %response.id, "Dropping response for unknown request id"),
    }
}

fn dispatch_request(methods: &MethodTable, transport: &Arc<dyn Transport>, request: Request) {
    tracing::debug!(method = %request.method, id = %request.id, "Received request");

    let Request {
        id, method, params, ..
    } = request;

    let call = match methods.requests.get(&method) {
        Some(handler) => handler(params),
        None => {
            let error = Error::MethodNotFound(method.clone());
            async move { Err(error) }.boxed()
        }
    };

    let transport = transport.clone();
    tokio::spawn(async move {
        let response = match call.await {
            Ok(result) => Response::success(id, result),
            Err(error) => {
                tracing::debug!(method = %method, "Request failed: {}", error);
                Response::from_error(id, &error)
            }
        };
        match write_message(transport.as_ref(), &Message::Response(response)).await {
            Ok(()) => {}
            Err(e) if e.is_connection_failure() => {
                tracing::debug!(method = %method, "Peer left before the response: {}", e)
            }
            Err(e) => tracing::error!(method = %method, "Failed to send response: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::error_codes;
    use crate::transport::ChannelTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn connect(left: MethodTable, right: MethodTable) -> (Arc<RpcConnection>, Arc<RpcConnection>) {
        let (a, b) = ChannelTransport::pair();
        (
            RpcConnection::start(Arc::new(a), left),
            RpcConnection::start(Arc::new(b), right),
        )
    }

    #[tokio::test]
    async fn request_round_trip() {
        let mut methods = MethodTable::new();
        methods.on_request("echo", |params| async move { Ok(params.unwrap_or(Value::Null)) });
        let (client, _server) = connect(MethodTable::new(), methods);

        let result = client.request("echo", Some(json!({ "x": 1 }))).await.unwrap();
        assert_eq!(result, json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn unknown_method_is_an_rpc_error() {
        let (client, _server) = connect(MethodTable::new(), MethodTable::new());
        match client.request("nope", None).await {
            Err(Error::Rpc { code, .. }) => assert_eq!(code, error_codes::METHOD_NOT_FOUND),
            other => panic!("expected rpc error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn concurrent_requests_resolve_by_id() {
        let mut methods = MethodTable::new();
        methods.on_request("sleep", |params| async move {
            let ms = params.and_then(|p| p.as_u64()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        });
        let (client, _server) = connect(MethodTable::new(), methods);

        let slow = client.request("sleep", Some(json!(50)));
        let fast = client.request("sleep", Some(json!(1)));
        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.unwrap(), json!(50));
        assert_eq!(fast.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn notifications_are_dispatched_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut methods = MethodTable::new();
        let log = seen.clone();
        methods.on_notification("note", move |params| {
            log.lock().unwrap().push(params.unwrap_or(Value::Null));
        });
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        methods.on_request("count", move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!(n)) }
        });
        let (client, _server) = connect(MethodTable::new(), methods);

        client.notify("note", Some(json!(1))).await.unwrap();
        client.notify("note", Some(json!(2))).await.unwrap();
        // a request after the notifications proves they were handled first
        assert_eq!(client.request("count", None).await.unwrap(), json!(0));
        assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn pending_requests_fail_when_peer_goes_away() {
        let mut methods = MethodTable::new();
        methods.on_request("hang", |_| futures::future::pending::<Result<Value, Error>>());
        let (client, server) = connect(MethodTable::new(), methods);

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.request("hang", None).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.close().await.unwrap();
        drop(server);

        let result = call.await.unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        client.closed().await;
        assert!(matches!(
            client.request("hang", None).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn timeout_removes_waiter() {
        let mut methods = MethodTable::new();
        methods.on_request("hang", |_| futures::future::pending::<Result<Value, Error>>());
        let (client, _server) = connect(MethodTable::new(), methods);

        let result = client
            .request_with_timeout("hang", None, Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(client.waiters().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_do_not_stop_the_loop() {
        let (raw, peer) = ChannelTransport::pair();
        let mut methods = MethodTable::new();
        methods.on_request("ping", |_| async { Ok(json!({})) });
        let _server = RpcConnection::start(Arc::new(peer), methods);

        raw.write(b"garbage\n").await.unwrap();
        raw.write(b"{\"jsonrpc\":\"2.0\",\"id\":99,\"result\":{}}\n")
            .await
            .unwrap();
        raw.write(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let line = raw.read_line().await.unwrap().unwrap();
        assert_eq!(line, "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}");
    }

    #[tokio::test]
    async fn dropping_the_connection_releases_the_transport() {
        let (raw, peer) = ChannelTransport::pair();
        let connection = RpcConnection::start(Arc::new(peer), MethodTable::new());
        drop(connection);

        let end = tokio::time::timeout(Duration::from_secs(1), raw.read_line())
            .await
            .expect("peer transport dropped");
        assert_eq!(end.unwrap(), None);
    }
}
