//! Flow destinations.
//!
//! A [`Sink`] owns the downstream end of a pipeline: [`Flow::to`]
//! (see [`crate::flow::Flow::to`]) awaits each [`Sink::dispatch`] as the
//! per-item acknowledgment, so a slow sink gates the whole subscription.
//! Dispatch errors are per-item and reported without cancelling the
//! upstream.
//!
//! [`WindowedSink`] is the window-aware adapter: it holds back messages
//! stamped with a `window-ref` header until the matching watermark arrives,
//! then releases the whole batch to the inner sink in arrival order.
//! Messages with no stamp pass straight through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FlowError;
use crate::message::Message;
use crate::window::WindowRef;

/// The downstream end of a pipeline.
#[async_trait]
pub trait Sink<T: Send + 'static>: Send {
  /// Accepts one message. Returning `Err` reports the item as failed
  /// without cancelling the upstream subscription.
  async fn dispatch(&mut self, message: Message<T>) -> Result<(), FlowError>;

  /// Accepts a bare payload, wrapped in a headerless message.
  async fn dispatch_payload(&mut self, payload: T) -> Result<(), FlowError> {
    self.dispatch(Message::new(payload)).await
  }

  /// Human-readable name for logs and errors.
  fn name(&self) -> Option<&str> {
    None
  }
}

/// Collects every data message; control messages are discarded.
pub struct VecSink<T> {
  name: String,
  messages: Vec<Message<T>>,
}

impl<T> VecSink<T> {
  /// Creates an empty collecting sink.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      messages: Vec::new(),
    }
  }

  /// The messages collected so far, in delivery order.
  #[must_use]
  pub fn messages(&self) -> &[Message<T>] {
    &self.messages
  }

  /// The collected payloads, in delivery order.
  pub fn payloads(&self) -> Vec<&T> {
    self.messages.iter().filter_map(Message::payload).collect()
  }

  /// Consumes the sink, returning the collected messages.
  #[must_use]
  pub fn into_messages(self) -> Vec<Message<T>> {
    self.messages
  }
}

#[async_trait]
impl<T: Send + 'static> Sink<T> for VecSink<T> {
  async fn dispatch(&mut self, message: Message<T>) -> Result<(), FlowError> {
    if !message.is_control() {
      self.messages.push(message);
    }
    Ok(())
  }

  fn name(&self) -> Option<&str> {
    Some(&self.name)
  }
}

/// Folds every data payload into an accumulator; control messages are
/// discarded.
pub struct FoldSink<T, A> {
  acc: Option<A>,
  fold: Box<dyn FnMut(A, T) -> A + Send>,
}

impl<T, A> FoldSink<T, A> {
  /// Creates a folding sink with the given initial accumulator.
  pub fn new<F>(init: A, fold: F) -> Self
  where
    F: FnMut(A, T) -> A + Send + 'static,
  {
    Self {
      acc: Some(init),
      fold: Box::new(fold),
    }
  }

  /// The current accumulator value.
  #[must_use]
  pub fn value(&self) -> &A {
    // The slot is only empty inside dispatch.
    self.acc.as_ref().expect("fold accumulator present")
  }

  /// Consumes the sink, returning the final accumulator.
  #[must_use]
  pub fn into_value(self) -> A {
    self.acc.expect("fold accumulator present")
  }
}

#[async_trait]
impl<T: Send + 'static, A: Send + 'static> Sink<T> for FoldSink<T, A> {
  async fn dispatch(&mut self, message: Message<T>) -> Result<(), FlowError> {
    if let Some(payload) = message.into_payload()
      && let Some(acc) = self.acc.take()
    {
      self.acc = Some((self.fold)(acc, payload));
    }
    Ok(())
  }
}

/// Accepts and discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl<T: Send + 'static> Sink<T> for NullSink {
  async fn dispatch(&mut self, _message: Message<T>) -> Result<(), FlowError> {
    Ok(())
  }

  fn name(&self) -> Option<&str> {
    Some("null")
  }
}

/// A cloneable handle sharing one sink between pipelines. Dispatches are
/// serialized through an async mutex.
pub struct SharedSink<S> {
  inner: Arc<tokio::sync::Mutex<S>>,
}

impl<S> Clone for SharedSink<S> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<S> SharedSink<S> {
  /// Wraps a sink for shared use.
  pub fn new(sink: S) -> Self {
    Self {
      inner: Arc::new(tokio::sync::Mutex::new(sink)),
    }
  }

  /// Locks the underlying sink for inspection.
  pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, S> {
    self.inner.lock().await
  }
}

#[async_trait]
impl<T, S> Sink<T> for SharedSink<S>
where
  T: Send + 'static,
  S: Sink<T>,
{
  async fn dispatch(&mut self, message: Message<T>) -> Result<(), FlowError> {
    self.inner.lock().await.dispatch(message).await
  }
}

/// Window-aware buffering adapter.
///
/// Messages stamped with a `window-ref` header are held back, keyed by
/// window identity, and released to the inner sink (followed by the
/// watermark itself) only when that window's watermark arrives. Unstamped
/// messages pass straight through. A watermark whose window was never seen
/// releases nothing but is still forwarded.
///
/// Windows that never watermark accumulate; [`WindowedSink::abandon`] drops
/// one such buffer and [`WindowedSink::drain`] flushes everything pending,
/// in first-arrival order, for shutdown paths.
pub struct WindowedSink<T, S> {
  inner: S,
  pending: HashMap<WindowRef, Vec<Message<T>>>,
  arrival: Vec<WindowRef>,
}

impl<T, S> WindowedSink<T, S>
where
  T: Send + 'static,
  S: Sink<T>,
{
  /// Wraps an inner sink with window buffering.
  pub fn new(inner: S) -> Self {
    Self {
      inner,
      pending: HashMap::new(),
      arrival: Vec::new(),
    }
  }

  /// Windows currently buffered, awaiting their watermark.
  #[must_use]
  pub fn pending_windows(&self) -> usize {
    self.pending.len()
  }

  /// Drops the buffer of one window without delivering it.
  pub fn abandon(&mut self, window: &WindowRef) -> Option<Vec<Message<T>>> {
    self.arrival.retain(|w| w != window);
    self.pending.remove(window)
  }

  /// Flushes every pending buffer to the inner sink in first-arrival
  /// order, without watermarks. Intended for shutdown.
  pub async fn drain(&mut self) -> Result<(), FlowError> {
    for window in std::mem::take(&mut self.arrival) {
      if let Some(buffer) = self.pending.remove(&window) {
        for message in buffer {
          self.inner.dispatch(message).await?;
        }
      }
    }
    Ok(())
  }

  /// Unwraps the inner sink, discarding any pending buffers.
  #[must_use]
  pub fn into_inner(self) -> S {
    self.inner
  }
}

#[async_trait]
impl<T, S> Sink<T> for WindowedSink<T, S>
where
  T: Send + 'static,
  S: Sink<T>,
{
  async fn dispatch(&mut self, message: Message<T>) -> Result<(), FlowError> {
    match message.window_ref().cloned() {
      Some(window) if message.is_watermark() => {
        self.arrival.retain(|w| *w != window);
        if let Some(buffer) = self.pending.remove(&window) {
          tracing::debug!(window = %window.id(), len = buffer.len(), "releasing window");
          for buffered in buffer {
            self.inner.dispatch(buffered).await?;
          }
        }
        self.inner.dispatch(message).await
      }
      Some(window) => {
        if !self.pending.contains_key(&window) {
          self.arrival.push(window.clone());
        }
        self.pending.entry(window).or_default().push(message);
        Ok(())
      }
      None => self.inner.dispatch(message).await,
    }
  }

  fn name(&self) -> Option<&str> {
    self.inner.name()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::flow::Flow;
  use crate::window::WindowPolicy;

  #[tokio::test]
  async fn test_vec_sink_discards_controls() {
    let mut sink = VecSink::new("out");
    let summary = Flow::from_values(vec![1, 2])
      .window(WindowPolicy::closed_count(2).unwrap())
      .to(&mut sink)
      .await
      .unwrap();

    // Two data messages plus one watermark were delivered.
    assert_eq!(summary.delivered, 3);
    assert_eq!(sink.payloads(), vec![&1, &2]);
  }

  #[tokio::test]
  async fn test_fold_sink_accumulates() {
    let mut sink = FoldSink::new(String::new(), |mut acc: String, x: &str| {
      acc.push_str(x);
      acc
    });
    Flow::from_values(vec!["a", "b"])
      .to(&mut sink)
      .await
      .unwrap();
    sink.dispatch_payload("c").await.unwrap();
    assert_eq!(sink.into_value(), "abc");
  }

  #[tokio::test]
  async fn test_windowed_sink_releases_on_watermark() {
    let mut sink = WindowedSink::new(VecSink::new("out"));
    Flow::from_values(vec![1, 2, 3, 4])
      .window(WindowPolicy::closed_count(2).unwrap())
      .to(&mut sink)
      .await
      .unwrap();

    assert_eq!(sink.pending_windows(), 0);
    assert_eq!(sink.into_inner().payloads(), vec![&1, &2, &3, &4]);
  }

  #[tokio::test]
  async fn test_windowed_sink_holds_until_watermark() {
    let mut sink = WindowedSink::new(VecSink::new("out"));
    let window = crate::window::Window::close(vec![Message::new(1), Message::new(2)]);

    for msg in window.messages() {
      sink.dispatch(msg.clone()).await.unwrap();
    }
    assert_eq!(sink.pending_windows(), 1);
    assert!(sink.inner.payloads().is_empty());

    sink.dispatch(window.watermark()).await.unwrap();
    assert_eq!(sink.pending_windows(), 0);
    assert_eq!(sink.inner.payloads(), vec![&1, &2]);
  }

  #[tokio::test]
  async fn test_windowed_sink_passes_unstamped_through() {
    let mut sink = WindowedSink::new(VecSink::new("out"));
    sink.dispatch(Message::new(42)).await.unwrap();
    assert_eq!(sink.inner.payloads(), vec![&42]);
  }

  #[tokio::test]
  async fn test_windowed_sink_abandon_and_drain() {
    let mut sink = WindowedSink::new(VecSink::new("out"));
    let first = crate::window::Window::close(vec![Message::new(1)]);
    let second = crate::window::Window::close(vec![Message::new(2)]);

    for msg in first.messages().iter().chain(second.messages()) {
      sink.dispatch(msg.clone()).await.unwrap();
    }
    assert_eq!(sink.pending_windows(), 2);

    sink.abandon(&first.handle());
    assert_eq!(sink.pending_windows(), 1);

    sink.drain().await.unwrap();
    assert_eq!(sink.pending_windows(), 0);
    assert_eq!(sink.inner.payloads(), vec![&2]);
  }

  #[tokio::test]
  async fn test_shared_sink_serializes_access() {
    let shared = SharedSink::new(VecSink::new("out"));
    let mut a = shared.clone();
    let mut b = shared.clone();

    tokio::try_join!(
      Flow::from_values(vec![1, 2]).to(&mut a),
      Flow::from_values(vec![3, 4]).to(&mut b)
    )
    .unwrap();

    let guard = shared.lock().await;
    assert_eq!(guard.messages().len(), 4);
  }
}
