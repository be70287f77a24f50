//! Listener lifecycle: starting and stopping the receive loop of a session.
//!
//! The caller side only sees a [`ListenerState`], a send-only stop channel
//! and the [`EventStream`]. The socket itself lives in the loop task.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};

use futures_util::future::poll_fn;
use futures_util::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::VkError;
use crate::session::{lock_slot, VkStream};
use crate::stream::client::{open_stream, receive_loop, LoopSettings};
use crate::stream::proto::Event;

/// Lifecycle of a session's receive loop.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ListenerState {
    /// Constructed, never started.
    #[default]
    Idle,
    /// `start` is dialing the stream endpoint.
    Connecting,
    /// Receive loop running.
    Listening,
    /// `stop` signalled the loop and is waiting for it to exit.
    Stopping,
    /// Loop exited and the connection is closed.
    Stopped,
}

/// Why an [`EventStream`] closed.
#[derive(Debug)]
pub enum StreamEnd {
    /// `stop` was called or the session was dropped.
    Stopped,
    /// The server closed the connection.
    ServerClosed { code: Option<u16>, reason: String },
    /// No frame arrived within `ClientOptions::idle_timeout`.
    IdleTimeout,
    /// The `EventStream` was dropped while the loop was delivering.
    ConsumerDropped,
    /// Read or write failure on the connection.
    Failed(VkError),
}

/// Snapshot of receive loop counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StreamStats {
    /// Data frames read from the connection.
    pub frames_received: u64,
    pub events_delivered: u64,
    /// Frames dropped because they were malformed or carried another code.
    pub frames_discarded: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    pub frames_received: AtomicU64,
    pub events_delivered: AtomicU64,
    pub frames_discarded: AtomicU64,
}

impl StreamCounters {
    fn snapshot(&self) -> StreamStats {
        StreamStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ListenerSlot {
    pub state: ListenerState,
    stop_tx: Option<oneshot::Sender<()>>,
    cancelled: Option<Arc<AtomicBool>>,
    task: Option<JoinHandle<()>>,
}

impl ListenerSlot {
    /// Signals the loop, then marks the consumer side cancelled so queued
    /// events are discarded. The stop must be sent first: the loop has to
    /// see it before a delivery fails on the closed queue.
    pub(crate) fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(cancelled) = self.cancelled.take() {
            cancelled.store(true, Ordering::Release);
        }
    }

    fn finish(&mut self) {
        self.state = ListenerState::Stopped;
        self.stop_tx = None;
        self.cancelled = None;
        self.task = None;
    }
}

/// Restores the pre-`start` state unless the dial succeeded.
///
/// Covers both dial errors and a `start` future dropped mid-dial.
struct ConnectingGuard<'a> {
    slot: &'a Mutex<ListenerSlot>,
    previous: ListenerState,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock_slot(self.slot).state = self.previous;
        }
    }
}

/// Events delivered by one receive loop, in arrival order.
///
/// Yields `None` once the loop has exited; [`EventStream::end_reason`] then
/// tells why. Once the session is stopped (or dropped) events still queued
/// are discarded rather than yielded.
#[derive(Debug)]
pub struct EventStream {
    events: mpsc::Receiver<Event>,
    cancelled: Arc<AtomicBool>,
    end_rx: Option<oneshot::Receiver<StreamEnd>>,
    end: Option<StreamEnd>,
    counters: Arc<StreamCounters>,
}

impl EventStream {
    /// Receives the next event, or `None` after the stream closed or the
    /// session was stopped.
    pub async fn recv(&mut self) -> Option<Event> {
        poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Reason the stream closed. `None` while it is still open.
    pub fn end_reason(&self) -> Option<&StreamEnd> {
        self.end.as_ref()
    }

    /// Consumes the stream and returns its end reason, if it has closed.
    pub fn into_end_reason(mut self) -> Option<StreamEnd> {
        self.collect_end();
        self.end
    }

    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        if self.cancelled.load(Ordering::Acquire) {
            self.events.close();
            while self.events.try_recv().is_ok() {}
        } else if let Some(event) = ready!(self.events.poll_recv(cx)) {
            return Poll::Ready(Some(event));
        }

        // The loop publishes its end reason before the channel closes, and a
        // cancelled loop exits without delivering again.
        if let Some(end_rx) = self.end_rx.as_mut() {
            let end = ready!(Pin::new(end_rx).poll(cx));
            self.end = end.ok();
            self.end_rx = None;
        }
        Poll::Ready(None)
    }

    fn collect_end(&mut self) {
        if let Some(mut end_rx) = self.end_rx.take() {
            match end_rx.try_recv() {
                Ok(end) => self.end = Some(end),
                Err(oneshot::error::TryRecvError::Empty) => self.end_rx = Some(end_rx),
                Err(oneshot::error::TryRecvError::Closed) => {}
            }
        }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.get_mut().poll_event(cx)
    }
}

impl VkStream {
    /// Opens the stream connection and spawns the receive loop.
    ///
    /// Allowed from `Idle` and `Stopped`; fails with `AlreadyListening`
    /// otherwise. On failure the state is left as it was. Must be called
    /// from within a tokio runtime.
    pub async fn start(&self) -> Result<EventStream, VkError> {
        let url = self.stream_url()?;

        let mut guard = {
            let mut slot = self.lock_listener();
            let previous = slot.state;
            if !matches!(previous, ListenerState::Idle | ListenerState::Stopped) {
                return Err(VkError::AlreadyListening);
            }
            slot.state = ListenerState::Connecting;
            ConnectingGuard {
                slot: &*self.listener,
                previous,
                armed: true,
            }
        };

        let socket = open_stream(&url, self.options.stream_connect_timeout).await?;

        let (events_tx, events_rx) = mpsc::channel(self.options.event_buffer.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let (end_tx, end_rx) = oneshot::channel();
        let counters = Arc::new(StreamCounters::default());
        let cancelled = Arc::new(AtomicBool::new(false));
        let settings = LoopSettings {
            idle_timeout: self.options.idle_timeout,
            close_timeout: self.options.close_timeout,
        };

        guard.armed = false;
        drop(guard);

        // Hold the slot while spawning so the loop cannot record its exit
        // before the slot says Listening.
        let mut slot = self.lock_listener();
        let loop_slot = Arc::clone(&self.listener);
        let loop_counters = Arc::clone(&counters);
        let task = tokio::spawn(async move {
            let end = receive_loop(socket, &events_tx, stop_rx, &loop_counters, settings).await;
            lock_slot(&loop_slot).finish();
            let _ = end_tx.send(end);
            drop(events_tx);
        });
        slot.state = ListenerState::Listening;
        slot.stop_tx = Some(stop_tx);
        slot.cancelled = Some(Arc::clone(&cancelled));
        slot.task = Some(task);
        drop(slot);

        info!(event = "stream_listening", endpoint = %self.endpoint());
        Ok(EventStream {
            events: events_rx,
            cancelled,
            end_rx: Some(end_rx),
            end: None,
            counters,
        })
    }

    /// Stops the receive loop and waits until it has closed the connection.
    ///
    /// Events the consumer has not received yet are discarded.
    ///
    /// Fails fast with `NotListening` unless the session is `Listening`,
    /// including when the server already ended the stream.
    pub async fn stop(&self) -> Result<(), VkError> {
        let task = {
            let mut slot = self.lock_listener();
            if slot.state != ListenerState::Listening {
                return Err(VkError::NotListening);
            }
            slot.state = ListenerState::Stopping;
            slot.signal_stop();
            slot.task.take()
        };

        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(event = "stream_loop_join_failed", error = %err);
            }
        }

        let mut slot = self.lock_listener();
        if slot.state == ListenerState::Stopping {
            slot.finish();
        }
        info!(event = "stream_stopped", endpoint = %self.endpoint());
        Ok(())
    }
}
