//! SSE stream bound to a session's lifetime

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::sse::Event;
use futures::{stream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::mcp::message::JsonRpcMessage;
use crate::session::registry::SessionRegistry;
use crate::session::{ClientId, SessionToken};

/// Endpoint event followed by every outbound message of one session.
///
/// Dropping the stream, which axum does when the client disconnects, closes
/// the session and removes it from the registry.
pub struct SessionStream {
    inner: Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>,
    client_id: ClientId,
    sessions: Arc<SessionRegistry>,
}

impl SessionStream {
    pub fn new(
        token: &SessionToken,
        outbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        let endpoint = Event::default()
            .event("endpoint")
            .data(message_endpoint_for(token));
        let messages = UnboundedReceiverStream::new(outbound)
            .map(|message| Event::default().event("message").data(message.to_value().to_string()));

        Self {
            inner: stream::once(async move { endpoint })
                .chain(messages)
                .map(Ok)
                .boxed(),
            client_id: token.client_id.clone(),
            sessions,
        }
    }
}

pub fn message_endpoint_for(token: &SessionToken) -> String {
    format!("/message?sessionId={token}")
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        if self.sessions.close(&self.client_id).is_some() {
            debug!(client_id = %self.client_id, "sse stream dropped, session closed");
        }
    }
}
