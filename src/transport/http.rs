//! HTTP Streaming Transport
//!
//! The read side is one long-lived streamed GET response (Server-Sent Events
//! or plain newline-delimited JSON). The write side buffers outgoing bytes and
//! sends each complete `\n`-terminated message as its own HTTP POST.
//!
//! When the stream announces an `endpoint` event, its data (resolved against
//! the stream URL) becomes the POST target. A fixed target can be configured
//! instead with [`HttpOptions::with_post_url`].

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::errors::Error;
use crate::transport::{MAX_LINE_LENGTH, Transport, codec_error, drain_lines};

/// Default timeout for establishing the HTTP connection
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a send waits for the server to announce its POST endpoint
const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Options for the HTTP streaming transport
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// URL of the event stream
    pub url: Url,
    /// Fixed POST target; `None` waits for an `endpoint` event
    pub post_url: Option<Url>,
    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,
    /// Timeout for establishing each HTTP connection
    pub connect_timeout: Duration,
    /// How long a send waits for the `endpoint` event
    pub endpoint_timeout: Duration,
}

impl HttpOptions {
    /// Options for the event stream at `url`
    pub fn new(url: &str) -> Result<Self, Error> {
        let url = Url::parse(url).map_err(|e| Error::Transport(format!("invalid URL: {}", e)))?;
        Ok(Self {
            url,
            post_url: None,
            headers: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            endpoint_timeout: DEFAULT_ENDPOINT_TIMEOUT,
        })
    }

    /// Post every message to `url` instead of waiting for an endpoint event
    pub fn with_post_url(mut self, url: Url) -> Self {
        self.post_url = Some(url);
        self
    }

    /// Add a header to every request
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the timeout for establishing connections
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how long a send waits for the endpoint event
    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }
}

/// One line of an event stream
#[derive(Debug, PartialEq)]
enum StreamLine<'a> {
    /// End of an event
    Blank,
    Comment,
    Event(&'a str),
    Data(&'a str),
    /// `id:` / `retry:` and unknown fields
    Ignored,
    /// A bare JSON-RPC line outside SSE framing
    Raw(&'a str),
}

fn classify(line: &str) -> StreamLine<'_> {
    if line.trim().is_empty() {
        return StreamLine::Blank;
    }
    if line.starts_with(':') {
        return StreamLine::Comment;
    }

    let field = |name: &str| {
        line.strip_prefix(name)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(|value| value.strip_prefix(' ').unwrap_or(value))
    };

    if let Some(value) = field("data") {
        StreamLine::Data(value)
    } else if let Some(value) = field("event") {
        StreamLine::Event(value)
    } else if field("id").is_some() || field("retry").is_some() {
        StreamLine::Ignored
    } else {
        StreamLine::Raw(line)
    }
}

struct ReadState {
    lines: FramedRead<StreamReader<ByteStream, Bytes>, LinesCodec>,
    event: Option<String>,
}

/// Client-side HTTP streaming transport
pub struct HttpTransport {
    client: reqwest::Client,
    options: HttpOptions,
    /// `None` once closed; dropping it releases the event stream socket
    read_state: Mutex<Option<ReadState>>,
    post_url: watch::Sender<Option<Url>>,
    outbound: Mutex<BytesMut>,
    shutdown: CancellationToken,
    eof: AtomicBool,
}

impl HttpTransport {
    /// Open the event stream
    pub async fn connect(options: HttpOptions) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;

        tracing::info!(url = %options.url, "Connecting to MCP event stream");

        let mut request = client
            .get(options.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        for (key, value) in &options.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "event stream connection failed with status {}: {}",
                status, body
            )));
        }

        let stream: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        );

        tracing::info!(url = %options.url, "Connected to MCP event stream");
        Ok(Self::from_stream(client, options, stream))
    }

    fn from_stream(client: reqwest::Client, options: HttpOptions, stream: ByteStream) -> Self {
        let lines = FramedRead::new(
            StreamReader::new(stream),
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        );
        let (post_url, _) = watch::channel(options.post_url.clone());
        Self {
            client,
            options,
            read_state: Mutex::new(Some(ReadState { lines, event: None })),
            post_url,
            outbound: Mutex::new(BytesMut::new()),
            shutdown: CancellationToken::new(),
            eof: AtomicBool::new(false),
        }
    }

    /// The current POST target, if known
    pub fn post_url(&self) -> Option<Url> {
        self.post_url.borrow().clone()
    }

    fn set_endpoint(&self, endpoint: &str) -> Result<(), Error> {
        let url = self
            .options
            .url
            .join(endpoint.trim())
            .map_err(|e| Error::Protocol(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        tracing::info!(endpoint = %url, "Received message endpoint");
        self.post_url.send_replace(Some(url));
        Ok(())
    }

    async fn endpoint(&self) -> Result<Url, Error> {
        let mut receiver = self.post_url.subscribe();
        let announced = tokio::time::timeout(
            self.options.endpoint_timeout,
            receiver.wait_for(|url| url.is_some()),
        )
        .await;

        match announced {
            Ok(Ok(url)) => url.clone().ok_or(Error::ConnectionClosed),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::Timeout(
                "server did not announce a message endpoint".to_string(),
            )),
        }
    }

    async fn post(&self, body: Bytes) -> Result<(), Error> {
        let url = self.endpoint().await?;

        let mut request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json");
        for (key, value) in &self.options.headers {
            request = request.header(key, value);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!(url = %url, status = %status, "Message POST rejected");
            return Err(Error::Transport(format!(
                "POST to {} failed with status {}",
                url, status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn read_line(&self) -> Result<Option<String>, Error> {
        let mut guard = self.read_state.lock().await;
        let Some(state) = guard.as_mut() else {
            return Ok(None);
        };

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                next = state.lines.next() => next,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(codec_error(e)),
                None => {
                    self.eof.store(true, Ordering::Release);
                    tracing::info!(url = %self.options.url, "Event stream ended");
                    return Ok(None);
                }
            };

            match classify(&line) {
                StreamLine::Blank => state.event = None,
                StreamLine::Event(name) => state.event = Some(name.to_string()),
                StreamLine::Data(data) => {
                    if state.event.as_deref() == Some("endpoint") {
                        self.set_endpoint(data)?;
                        continue;
                    }
                    return Ok(Some(data.to_string()));
                }
                StreamLine::Raw(raw) => return Ok(Some(raw.to_string())),
                StreamLine::Comment | StreamLine::Ignored => {}
            }
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }

        // Posting under the buffer lock keeps messages in send order
        let mut outbound = self.outbound.lock().await;
        outbound.extend_from_slice(bytes);
        let lines = drain_lines(&mut outbound);
        let total = lines.len();
        for (sent, line) in lines.into_iter().enumerate() {
            if let Err(e) = self.post(line).await {
                let dropped = total - sent - 1;
                if dropped > 0 {
                    tracing::warn!(dropped, "Discarding messages queued behind a failed POST");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        // Wakes a pending read so the lock below is free
        self.shutdown.cancel();
        if self.read_state.lock().await.take().is_none() {
            return Ok(());
        }
        tracing::info!(url = %self.options.url, "HTTP transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.eof.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn classifies_event_stream_lines() {
        assert_eq!(classify(""), StreamLine::Blank);
        assert_eq!(classify(": keep-alive"), StreamLine::Comment);
        assert_eq!(classify("event: endpoint"), StreamLine::Event("endpoint"));
        assert_eq!(classify("event:message"), StreamLine::Event("message"));
        assert_eq!(
            classify("data: {\"jsonrpc\":\"2.0\"}"),
            StreamLine::Data("{\"jsonrpc\":\"2.0\"}")
        );
        assert_eq!(classify("id: 4"), StreamLine::Ignored);
        assert_eq!(classify("retry: 1000"), StreamLine::Ignored);
        assert_eq!(
            classify("{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}"),
            StreamLine::Raw("{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}")
        );
        // a field name must be followed by a colon
        assert_eq!(classify("database"), StreamLine::Raw("database"));
    }

    fn transport(stream: ByteStream, post_url: Option<Url>) -> HttpTransport {
        let mut options = HttpOptions::new("http://127.0.0.1:1/sse").unwrap();
        options.post_url = post_url;
        HttpTransport::from_stream(reqwest::Client::new(), options, stream)
    }

    /// A stream that never yields
    fn silent() -> ByteStream {
        Box::pin(futures_util::stream::pending())
    }

    #[tokio::test]
    async fn close_drops_the_event_stream() {
        let transport = Arc::new(transport(silent(), None));

        let reader = transport.clone();
        let read = tokio::spawn(async move { reader.read_line().await });
        tokio::task::yield_now().await;

        transport.close().await.unwrap();
        assert_eq!(read.await.unwrap().unwrap(), None);
        assert!(transport.read_state.lock().await.is_none());
        assert!(!transport.is_connected());
        assert_eq!(transport.read_line().await.unwrap(), None);

        // a second close is a no-op
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn reads_messages_and_endpoint_from_the_stream() {
        let body = "event: endpoint\ndata: /messages?sessionId=1\n\nevent: message\ndata: {\"id\":1}\n\n";
        let stream = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(body))]);
        let transport = transport(Box::pin(stream), None);

        assert_eq!(transport.read_line().await.unwrap().as_deref(), Some("{\"id\":1}"));
        assert_eq!(
            transport.post_url().unwrap().as_str(),
            "http://127.0.0.1:1/messages?sessionId=1"
        );
        assert_eq!(transport.read_line().await.unwrap(), None);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn failed_post_discards_the_rest_of_the_batch() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let post_url = Url::parse(&format!("http://{}/messages", addr)).unwrap();
        let transport = transport(silent(), Some(post_url));

        assert!(transport.write(b"{\"a\":1}\n{\"b\":2}\npart").await.is_err());
        // nothing complete is left to be resent with a later write
        assert_eq!(&transport.outbound.lock().await[..], b"part");
    }

    #[test]
    fn options_builder() {
        let options = HttpOptions::new("http://localhost:8090/sse")
            .unwrap()
            .with_header("Authorization", "Bearer t")
            .with_endpoint_timeout(Duration::from_secs(1));
        assert_eq!(options.url.path(), "/sse");
        assert!(options.post_url.is_none());
        assert_eq!(options.headers.len(), 1);
        assert!(HttpOptions::new("not a url").is_err());
    }
}
