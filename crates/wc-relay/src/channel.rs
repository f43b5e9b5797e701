//! Cancellable event channel over one relay adapter.
//!
//! Events arrive in emission order. Closing the channel, explicitly or by
//! dropping it, unsubscribes the handlers and kills the relay session
//! exactly once.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use wc_core::relay::RelayEvent;
use wc_core::RelayError;

use crate::adapter::RelayAdapter;

pub struct EventChannel {
    adapter: Arc<RelayAdapter>,
    rx: mpsc::UnboundedReceiver<RelayEvent>,
    closed: bool,
}

impl EventChannel {
    /// Subscribe to `adapter` and buffer its events.
    ///
    /// Fails with [`RelayError::Closed`] when the adapter was already
    /// subscribed or killed.
    pub fn open(adapter: Arc<RelayAdapter>) -> Result<Self, RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscribed = adapter.subscribe(Arc::new(move |event| {
            // Receiver gone means the channel was closed; drop the event.
            let _ = tx.send(event);
        }));
        if !subscribed {
            return Err(RelayError::Closed);
        }
        Ok(Self {
            adapter,
            rx,
            closed: false,
        })
    }

    pub fn adapter(&self) -> &Arc<RelayAdapter> {
        &self.adapter
    }

    /// Next event, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RelayEvent> {
        if self.closed {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop delivery, remove handlers, then kill the session.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rx.close();
        self.adapter.unsubscribe();
        self.adapter.kill_session();
        debug!(connection_id = %self.adapter.id(), "event channel closed");
    }
}

impl Stream for EventChannel {
    type Item = RelayEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RelayEvent>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.close();
    }
}
