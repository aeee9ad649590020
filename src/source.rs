//! Flow origins.
//!
//! A [`Source`] owns the upstream end of a pipeline: each call to
//! [`Source::produce`] yields a flow of messages. Sources are registered by
//! name in a [`Registry`](crate::registry::Registry) and resolved at binding
//! time, so graph assembly never needs the concrete type.
//!
//! Two stock implementations cover the common cases: [`IterSource`] replays
//! a fixed batch (each `produce` call gets a fresh copy), and
//! [`ChannelSource`] adapts a bounded channel fed from elsewhere in the
//! process (one-shot; the channel can only be consumed once).

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::FlowError;
use crate::flow::Flow;
use crate::message::{HeaderValue, Message};

/// The upstream end of a pipeline.
pub trait Source<T>: Send {
  /// Opens a flow of messages from this source.
  fn produce(&mut self) -> Flow<T>;

  /// Human-readable name for logs and errors.
  fn name(&self) -> Option<&str> {
    None
  }

  /// Source-level attribute, stamped onto outgoing messages by adapters
  /// that care (origin, format, partition).
  fn attr(&self, _key: &str) -> Option<HeaderValue> {
    None
  }
}

/// A source replaying a fixed batch of messages.
pub struct IterSource<T> {
  name: String,
  batch: Vec<Message<T>>,
}

impl<T: Clone> IterSource<T> {
  /// Creates a source over bare payloads.
  pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = T>) -> Self {
    Self::from_messages(name, values.into_iter().map(Message::new))
  }

  /// Creates a source over pre-built messages.
  pub fn from_messages(
    name: impl Into<String>,
    messages: impl IntoIterator<Item = Message<T>>,
  ) -> Self {
    Self {
      name: name.into(),
      batch: messages.into_iter().collect(),
    }
  }
}

impl<T: Clone + Send + 'static> Source<T> for IterSource<T> {
  fn produce(&mut self) -> Flow<T> {
    Flow::from_messages(self.batch.clone())
  }

  fn name(&self) -> Option<&str> {
    Some(&self.name)
  }
}

/// A source adapting the receiving end of a bounded channel.
///
/// The channel can be drained only once; a second `produce` yields a flow
/// that fails with [`FlowError::AlreadyAttached`].
pub struct ChannelSource<T> {
  name: String,
  receiver: Option<mpsc::Receiver<Message<T>>>,
}

impl<T> ChannelSource<T> {
  /// Creates a channel-backed source with the given buffer capacity,
  /// returning the sending half alongside it.
  pub fn new(name: impl Into<String>, capacity: usize) -> (mpsc::Sender<Message<T>>, Self) {
    let (tx, rx) = mpsc::channel(capacity);
    (
      tx,
      Self {
        name: name.into(),
        receiver: Some(rx),
      },
    )
  }
}

impl<T: Send + 'static> Source<T> for ChannelSource<T> {
  fn produce(&mut self) -> Flow<T> {
    match self.receiver.take() {
      Some(rx) => Flow::from_stream(ReceiverStream::new(rx).map(Ok)),
      None => Flow::fail(FlowError::AlreadyAttached),
    }
  }

  fn name(&self) -> Option<&str> {
    Some(&self.name)
  }
}
