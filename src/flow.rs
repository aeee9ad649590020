//! The composable stream node.
//!
//! A [`Flow<T>`] wraps an asynchronous sequence of [`Message<T>`] items (or
//! a terminal [`FlowError`]) and exposes the whole combinator surface: map,
//! filter, flat-map, scan/reduce, merge, concat, zip, group-by, broadcast,
//! branch, windowing, and error recovery. Every combinator is a pure
//! construction — it consumes its receiver and returns a new node, never
//! mutating one in place.
//!
//! Backpressure rides the `Stream` pull contract: nothing upstream runs
//! until the downstream polls, and the fan-out hub and group-by driver
//! bridge that demand over bounded channels. Within one subscription the
//! item/error/completion signals are strictly sequential.
//!
//! Control messages (watermarks) pass through payload-oriented combinators
//! untouched, so a window boundary survives any chain of transformations
//! between the windowing stage and a window-aware sink.
//!
//! # Example
//!
//! ```rust
//! use flowmark::flow::Flow;
//! use flowmark::sink::FoldSink;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut total = FoldSink::new(0i64, |acc, x: i64| acc + x);
//! Flow::from_values(1..=5)
//!   .map_payload(|x| x as i64)
//!   .to(&mut total)
//!   .await
//!   .unwrap();
//! assert_eq!(*total.value(), 15);
//! # }
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{DispatchFailure, DispatchSummary, FlowError};
use crate::hub::{HUB_CHANNEL_CAPACITY, Hub, Route};
use crate::message::{HeaderValue, Headers, Message, headers};
use crate::sink::Sink;
use crate::window::{PolicyKind, Window, WindowPolicy};

/// One element of a flow: a message, or the subscription's terminal error.
pub type FlowItem<T> = Result<Message<T>, FlowError>;

pub(crate) type BoxMessageStream<T> =
  Pin<Box<dyn Stream<Item = FlowItem<T>> + Send>>;

/// The sequence of `(key, sub-stream)` pairs produced by [`Flow::group_by`].
pub type GroupStream<K, T> =
  Pin<Box<dyn Stream<Item = Result<(K, Flow<T>), FlowError>> + Send>>;

/// A composable, possibly-infinite message sequence.
pub struct Flow<T> {
  stream: BoxMessageStream<T>,
}

impl<T: Send + 'static> Flow<T> {
  /// Wraps an existing stream of flow items.
  #[must_use]
  pub fn from_stream<S>(stream: S) -> Self
  where
    S: Stream<Item = FlowItem<T>> + Send + 'static,
  {
    Self {
      stream: Box::pin(stream),
    }
  }

  /// A flow over a finite batch of messages.
  #[must_use]
  pub fn from_messages<I>(items: I) -> Self
  where
    I: IntoIterator<Item = Message<T>>,
  {
    let items: Vec<_> = items.into_iter().map(Ok).collect();
    Self::from_stream(stream::iter(items))
  }

  /// A flow over a finite batch of bare payloads, each wrapped in a
  /// headerless message.
  #[must_use]
  pub fn from_values<I>(values: I) -> Self
  where
    I: IntoIterator<Item = T>,
  {
    Self::from_messages(values.into_iter().map(Message::new))
  }

  /// The empty flow: completes immediately.
  #[must_use]
  pub fn empty() -> Self {
    Self::from_stream(stream::empty())
  }

  /// A single-message flow.
  #[must_use]
  pub fn once(message: Message<T>) -> Self {
    Self::from_messages([message])
  }

  /// A flow that fails immediately with the given terminal error.
  #[must_use]
  pub fn fail(error: FlowError) -> Self {
    Self::from_stream(stream::iter([Err(error)]))
  }

  /// Unwraps the flow back into its boxed stream.
  #[must_use]
  pub fn into_stream(self) -> BoxMessageStream<T> {
    self.stream
  }

  // ---------------------------------------------------------------------
  // One-to-one transformations
  // ---------------------------------------------------------------------

  /// Transforms each data message. Control messages pass through with their
  /// headers intact; the function is never called for them.
  #[must_use]
  pub fn map<U, F>(self, mut f: F) -> Flow<U>
  where
    U: Send + 'static,
    F: FnMut(Message<T>) -> Message<U> + Send + 'static,
  {
    Flow::from_stream(self.stream.map(move |item| {
      item.map(|msg| match msg.try_recast::<U>() {
        Ok(control) => control,
        Err(data) => f(data),
      })
    }))
  }

  /// Transforms only the payload; the full header set of the input message
  /// is carried forward unchanged onto every output.
  #[must_use]
  pub fn map_payload<U, F>(self, mut f: F) -> Flow<U>
  where
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
  {
    Flow::from_stream(
      self
        .stream
        .map(move |item| item.map(|msg| msg.map_payload(&mut f))),
    )
  }

  /// Transforms the header map of every message (control messages
  /// included), leaving payloads untouched.
  #[must_use]
  pub fn map_headers<F>(self, mut f: F) -> Flow<T>
  where
    F: FnMut(Headers) -> Headers + Send + 'static,
  {
    Flow::from_stream(
      self
        .stream
        .map(move |item| item.map(|msg| msg.map_headers(&mut f))),
    )
  }

  /// Drops data messages for which the predicate is false. Surviving items
  /// are not altered, and control messages always pass through.
  #[must_use]
  pub fn filter<P>(self, mut predicate: P) -> Flow<T>
  where
    P: FnMut(&Message<T>) -> bool + Send + 'static,
  {
    Flow::from_stream(self.stream.filter(move |item| {
      futures::future::ready(match item {
        Ok(msg) => msg.is_control() || predicate(msg),
        Err(_) => true,
      })
    }))
  }

  /// Complement of [`Flow::filter`].
  #[must_use]
  pub fn filter_not<P>(self, mut predicate: P) -> Flow<T>
  where
    P: FnMut(&Message<T>) -> bool + Send + 'static,
  {
    self.filter(move |msg| !predicate(msg))
  }

  /// [`Flow::filter`] on the payload alone.
  #[must_use]
  pub fn filter_payload<P>(self, mut predicate: P) -> Flow<T>
  where
    P: FnMut(&T) -> bool + Send + 'static,
  {
    self.filter(move |msg| msg.payload().is_some_and(&mut predicate))
  }

  /// Complement of [`Flow::filter_payload`].
  #[must_use]
  pub fn filter_payload_not<P>(self, mut predicate: P) -> Flow<T>
  where
    P: FnMut(&T) -> bool + Send + 'static,
  {
    self.filter(move |msg| !msg.payload().is_some_and(&mut predicate))
  }

  /// Keeps the first `n` data messages, then completes. Control messages
  /// pass through and are not counted.
  #[must_use]
  pub fn take(self, n: usize) -> Flow<T> {
    let mut upstream = self.stream;
    Flow::from_stream(async_stream::try_stream! {
      if n > 0 {
        let mut remaining = n;
        while let Some(item) = upstream.next().await {
          let msg = item?;
          if msg.is_control() {
            yield msg;
            continue;
          }
          remaining -= 1;
          yield msg;
          if remaining == 0 {
            break;
          }
        }
      }
    })
  }

  /// Skips the first `n` data messages. Control messages pass through and
  /// are not counted.
  #[must_use]
  pub fn skip(self, n: usize) -> Flow<T> {
    let mut upstream = self.stream;
    Flow::from_stream(async_stream::try_stream! {
      let mut remaining = n;
      while let Some(item) = upstream.next().await {
        let msg = item?;
        if msg.is_control() {
          yield msg;
          continue;
        }
        if remaining > 0 {
          remaining -= 1;
          continue;
        }
        yield msg;
      }
    })
  }

  // ---------------------------------------------------------------------
  // One-to-many transformations
  // ---------------------------------------------------------------------

  /// Opens a sub-flow per data message and interleaves their items into the
  /// output by arrival order, honoring downstream demand. `max_concurrency`
  /// bounds how many sub-flows are driven at once (`None` = unbounded).
  /// Control messages pass straight through.
  #[must_use]
  pub fn flat_map<U, F>(self, mut f: F, max_concurrency: impl Into<Option<usize>>) -> Flow<U>
  where
    U: Send + 'static,
    F: FnMut(Message<T>) -> Flow<U> + Send + 'static,
  {
    let mapped = self.stream.map(move |item| {
      item.map(|msg| match msg.try_recast::<U>() {
        Ok(control) => Flow::once(control).into_stream(),
        Err(data) => f(data).into_stream(),
      })
    });
    Flow::from_stream(mapped.try_flatten_unordered(max_concurrency))
  }

  /// Sequential variant of [`Flow::flat_map`]: each sub-flow is fully
  /// drained, in upstream order, before the next one starts.
  #[must_use]
  pub fn concat_map<U, F>(self, mut f: F) -> Flow<U>
  where
    U: Send + 'static,
    F: FnMut(Message<T>) -> Flow<U> + Send + 'static,
  {
    let mapped = self.stream.map(move |item| {
      item.map(|msg| match msg.try_recast::<U>() {
        Ok(control) => Flow::once(control).into_stream(),
        Err(data) => f(data).into_stream(),
      })
    });
    Flow::from_stream(mapped.try_flatten())
  }

  // ---------------------------------------------------------------------
  // Accumulation
  // ---------------------------------------------------------------------

  /// Emits the running accumulator once per data message, carrying that
  /// message's headers forward. Control messages pass through.
  #[must_use]
  pub fn scan_payload<A, F>(self, init: A, mut f: F) -> Flow<A>
  where
    A: Clone + Send + 'static,
    F: FnMut(A, T) -> A + Send + 'static,
  {
    let mut upstream = self.stream;
    Flow::from_stream(async_stream::try_stream! {
      let mut acc = init;
      while let Some(item) = upstream.next().await {
        let msg = item?;
        match msg.try_recast::<A>() {
          Ok(control) => yield control,
          Err(data) => {
            let headers = data.headers().clone();
            if let Some(payload) = data.into_payload() {
              acc = f(acc, payload);
              yield Message::with_headers(acc.clone(), headers);
            }
          }
        }
      }
    })
  }

  /// Folds the whole flow and emits exactly one output message (with fresh
  /// headers — there is no single originating message) after upstream
  /// completion.
  #[must_use]
  pub fn reduce_payload<A, F>(self, init: A, mut f: F) -> Flow<A>
  where
    A: Send + 'static,
    F: FnMut(A, T) -> A + Send + 'static,
  {
    let mut upstream = self.stream;
    Flow::from_stream(async_stream::try_stream! {
      let mut acc = init;
      while let Some(item) = upstream.next().await {
        if let Some(payload) = item?.into_payload() {
          acc = f(acc, payload);
        }
      }
      yield Message::new(acc);
    })
  }

  // ---------------------------------------------------------------------
  // Fan-in
  // ---------------------------------------------------------------------

  /// Interleaves two flows by arrival order. No inter-source ordering is
  /// guaranteed beyond each source's own order.
  #[must_use]
  pub fn merge_with(self, other: Flow<T>) -> Flow<T> {
    Flow::from_stream(stream::select(self.stream, other.stream))
  }

  /// Interleaves any number of flows by arrival order. An empty list is a
  /// build-time error.
  pub fn merge_all(flows: Vec<Flow<T>>) -> Result<Flow<T>, FlowError> {
    if flows.is_empty() {
      return Err(FlowError::build("merge", "at least one input flow is required"));
    }
    Ok(Flow::from_stream(stream::select_all(
      flows.into_iter().map(Flow::into_stream),
    )))
  }

  /// Fully drains `self`, then `other`.
  #[must_use]
  pub fn concat_with(self, other: Flow<T>) -> Flow<T> {
    Flow::from_stream(self.stream.chain(other.stream))
  }

  /// Fully drains each flow in argument order. An empty list is a
  /// build-time error.
  pub fn concat_all(flows: Vec<Flow<T>>) -> Result<Flow<T>, FlowError> {
    let mut iter = flows.into_iter();
    let first = iter
      .next()
      .ok_or_else(|| FlowError::build("concat", "at least one input flow is required"))?;
    Ok(iter.fold(first, Flow::concat_with))
  }

  /// Pairs the k-th data message of both inputs into a tuple, completing
  /// when either input completes.
  ///
  /// Only the **first** input's headers survive on the paired output (an
  /// asymmetry inherited from the original design — documented, and easy to
  /// trip over). The first input's control messages are forwarded; the
  /// second input's are dropped.
  #[must_use]
  pub fn zip_with<U>(self, other: Flow<U>) -> Flow<(T, U)>
  where
    U: Send + 'static,
  {
    let mut left_stream = self.stream;
    let mut right_stream = other.into_stream();
    Flow::from_stream(async_stream::try_stream! {
      'pairs: loop {
        let left = loop {
          match left_stream.next().await {
            None => break 'pairs,
            Some(item) => {
              let msg = item?;
              match msg.try_recast::<(T, U)>() {
                Ok(control) => yield control,
                Err(data) => break data,
              }
            }
          }
        };
        let right = loop {
          match right_stream.next().await {
            None => break 'pairs,
            Some(item) => {
              let msg = item?;
              if !msg.is_control() {
                break msg;
              }
            }
          }
        };
        let headers = left.headers().clone();
        if let (Some(l), Some(r)) = (left.into_payload(), right.into_payload()) {
          yield Message::with_headers((l, r), headers);
        }
      }
    })
  }

  // ---------------------------------------------------------------------
  // Partitioning and fan-out
  // ---------------------------------------------------------------------

  /// Partitions data messages by key into independent sub-flows sharing one
  /// upstream subscription. Each sub-flow item is stamped with the
  /// `group-key` header; control messages are forwarded to every open
  /// group. A terminal error is forwarded into every open group (or onto
  /// the outer stream if none is open yet).
  #[must_use]
  pub fn group_by<K, F>(self, mut key_fn: F) -> GroupStream<K, T>
  where
    T: Clone,
    K: Into<HeaderValue> + Clone + Eq + Hash + Send + Sync + 'static,
    F: FnMut(&Message<T>) -> K + Send + 'static,
  {
    let (group_tx, group_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
    let mut upstream = self.stream;

    tokio::spawn(async move {
      let mut senders: HashMap<K, mpsc::Sender<FlowItem<T>>> = HashMap::new();
      while let Some(item) = upstream.next().await {
        match item {
          Ok(msg) => {
            if msg.is_control() {
              for tx in senders.values() {
                let _ = tx.send(Ok(msg.clone())).await;
              }
              continue;
            }
            let key = key_fn(&msg);
            let stamped = msg.with_header(headers::GROUP_KEY, key.clone());
            if !senders.contains_key(&key) {
              let (tx, rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
              let sub = Flow::from_stream(ReceiverStream::new(rx));
              if group_tx.send(Ok((key.clone(), sub))).await.is_err() {
                tracing::debug!("group consumer detached; stopping upstream");
                return;
              }
              senders.insert(key.clone(), tx);
            }
            if let Some(tx) = senders.get(&key)
              && tx.send(Ok(stamped)).await.is_err()
            {
              senders.remove(&key);
            }
          }
          Err(error) => {
            if senders.is_empty() {
              let _ = group_tx.send(Err(error)).await;
            } else {
              for tx in senders.values() {
                let _ = tx.send(Err(error.clone())).await;
              }
            }
            return;
          }
        }
      }
    });

    Box::pin(ReceiverStream::new(group_rx))
  }

  /// Turns this flow into a shared multicast point with `taps` independent
  /// outputs, each seeing every upstream item. The upstream is driven
  /// exactly once, starting when the last tap attaches. Zero taps is a
  /// build-time error.
  pub fn broadcast(self, taps: usize) -> Result<Vec<Flow<T>>, FlowError>
  where
    T: Clone,
  {
    self.broadcast_with_replay(taps, 0)
  }

  /// [`Flow::broadcast`] with a replay ring: taps attaching after the drive
  /// completed receive the last `replay` items.
  pub fn broadcast_with_replay(self, taps: usize, replay: usize) -> Result<Vec<Flow<T>>, FlowError>
  where
    T: Clone,
  {
    if taps == 0 {
      return Err(FlowError::build("broadcast", "at least one tap is required"));
    }
    let labels = (0..taps).map(|i| format!("tap-{}", i)).collect();
    Ok(Hub::new(self, Route::All { replay }, labels).taps())
  }

  /// [`Flow::broadcast`] with one tap per name; names appear in hub logs.
  pub fn broadcast_named(self, names: &[&str]) -> Result<Vec<Flow<T>>, FlowError>
  where
    T: Clone,
  {
    if names.is_empty() {
      return Err(FlowError::build("broadcast", "at least one tap is required"));
    }
    let labels = names.iter().map(|name| (*name).to_string()).collect();
    Ok(Hub::new(self, Route::All { replay: 0 }, labels).taps())
  }

  /// Two-way fan-out: `(matching, rest)`, built from a two-tap multicast
  /// with complementary filters. Data messages go to exactly one side;
  /// control messages pass through to both (they are signals, not items).
  #[must_use]
  pub fn branch<P>(self, predicate: P) -> (Flow<T>, Flow<T>)
  where
    T: Clone,
    P: Fn(&Message<T>) -> bool + Send + Sync + 'static,
  {
    let predicate = Arc::new(predicate);
    let hub = Hub::new(
      self,
      Route::All { replay: 0 },
      vec!["match".to_string(), "rest".to_string()],
    );
    let mut taps = hub.taps();
    let rest = taps.pop().expect("hub yields one tap per label");
    let matching = taps.pop().expect("hub yields one tap per label");
    let keep = predicate.clone();
    (
      matching.filter(move |msg| keep(msg)),
      rest.filter_not(move |msg| predicate(msg)),
    )
  }

  /// [`Flow::branch`] on the payload alone.
  #[must_use]
  pub fn branch_payload<P>(self, predicate: P) -> (Flow<T>, Flow<T>)
  where
    T: Clone,
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self.branch(move |msg| msg.payload().is_some_and(&predicate))
  }

  // ---------------------------------------------------------------------
  // Windowing
  // ---------------------------------------------------------------------

  /// Cuts the flow into windows per `policy`, emitting each window's
  /// messages followed by exactly one watermark. See
  /// [`WindowPolicy`](crate::window::WindowPolicy) for the
  /// closed/open/count/all variants. Upstream control messages pass
  /// through without being counted.
  #[must_use]
  pub fn window(self, policy: WindowPolicy) -> Flow<T>
  where
    T: Clone + Sync,
  {
    let mut upstream = self.stream;
    match policy.kind {
      PolicyKind::ClosedCount(size) => Flow::from_stream(async_stream::try_stream! {
        let mut buffer = Vec::with_capacity(size);
        while let Some(item) = upstream.next().await {
          let msg = item?;
          if msg.is_control() {
            yield msg;
            continue;
          }
          buffer.push(msg);
          if buffer.len() == size {
            let window = Window::close(std::mem::take(&mut buffer));
            for stamped in window.messages() {
              yield stamped.clone();
            }
            yield window.watermark();
          }
        }
        if !buffer.is_empty() {
          let window = Window::close(buffer);
          for stamped in window.messages() {
            yield stamped.clone();
          }
          yield window.watermark();
        }
      }),
      PolicyKind::OpenCount(size) => Flow::from_stream(async_stream::try_stream! {
        let mut pending = Vec::with_capacity(size);
        while let Some(item) = upstream.next().await {
          let msg = item?;
          if msg.is_control() {
            yield msg;
            continue;
          }
          pending.push(msg.clone());
          yield msg;
          if pending.len() == size {
            let window = Window::close(std::mem::take(&mut pending));
            yield window.watermark();
          }
        }
        if !pending.is_empty() {
          let window = Window::close(pending);
          yield window.watermark();
        }
      }),
      PolicyKind::ClosedAll => Flow::from_stream(async_stream::try_stream! {
        let mut buffer = Vec::new();
        while let Some(item) = upstream.next().await {
          let msg = item?;
          if msg.is_control() {
            yield msg;
            continue;
          }
          buffer.push(msg);
        }
        if !buffer.is_empty() {
          let window = Window::close(buffer);
          for stamped in window.messages() {
            yield stamped.clone();
          }
          yield window.watermark();
        }
      }),
      PolicyKind::OpenAll => Flow::from_stream(async_stream::try_stream! {
        let mut pending = Vec::new();
        while let Some(item) = upstream.next().await {
          let msg = item?;
          if msg.is_control() {
            yield msg;
            continue;
          }
          pending.push(msg.clone());
          yield msg;
        }
        if !pending.is_empty() {
          let window = Window::close(pending);
          yield window.watermark();
        }
      }),
    }
  }

  // ---------------------------------------------------------------------
  // Error recovery
  // ---------------------------------------------------------------------

  /// On a terminal upstream error, emits `replacement` as a headerless data
  /// message and completes gracefully.
  #[must_use]
  pub fn catch_and_return(self, replacement: T) -> Flow<T> {
    let mut upstream = self.stream;
    Flow::from_stream(async_stream::stream! {
      let mut replacement = Some(replacement);
      while let Some(item) = upstream.next().await {
        match item {
          Ok(msg) => yield Ok(msg),
          Err(error) => {
            tracing::debug!(error = %error, "substituting replacement value after error");
            if let Some(value) = replacement.take() {
              yield Ok(Message::new(value));
            }
            break;
          }
        }
      }
    })
  }

  /// On a terminal upstream error, switches to the continuation flow
  /// produced by `f` (which may be [`Flow::empty`] to just complete).
  #[must_use]
  pub fn on_error_resume_next<F>(self, f: F) -> Flow<T>
  where
    F: FnOnce(FlowError) -> Flow<T> + Send + 'static,
  {
    let mut upstream = self.stream;
    Flow::from_stream(async_stream::stream! {
      let mut recover = Some(f);
      while let Some(item) = upstream.next().await {
        match item {
          Ok(msg) => yield Ok(msg),
          Err(error) => {
            if let Some(f) = recover.take() {
              let mut continuation = f(error).into_stream();
              while let Some(item) = continuation.next().await {
                yield item;
              }
            }
            break;
          }
        }
      }
    })
  }

  // ---------------------------------------------------------------------
  // Terminal operations
  // ---------------------------------------------------------------------

  /// Drains the flow into `sink`, awaiting each `dispatch` as the per-item
  /// acknowledgment before pulling the next upstream item.
  ///
  /// A dispatch error is reported (logged and recorded in the returned
  /// [`DispatchSummary`]) but does not stop delivery of subsequent items. A
  /// terminal upstream error stops the subscription and is returned.
  pub async fn to<S>(self, sink: &mut S) -> Result<DispatchSummary, FlowError>
  where
    S: Sink<T> + ?Sized,
  {
    let sink_name = sink.name().unwrap_or("sink").to_string();
    let mut summary = DispatchSummary::default();
    let mut stream = self.stream;
    while let Some(item) = stream.next().await {
      match item {
        Ok(msg) => match sink.dispatch(msg).await {
          Ok(()) => summary.delivered += 1,
          Err(error) => {
            tracing::error!(sink = %sink_name, error = %error, "sink dispatch failed; continuing");
            summary
              .failures
              .push(DispatchFailure::now(sink_name.clone(), error));
          }
        },
        Err(error) => {
          tracing::error!(sink = %sink_name, error = %error, "terminal stream error; stopping delivery");
          return Err(error);
        }
      }
    }
    Ok(summary)
  }

  /// Collects every message (control messages included), or the terminal
  /// error.
  pub async fn collect_messages(self) -> Result<Vec<Message<T>>, FlowError> {
    self.stream.try_collect().await
  }

  /// Collects the data payloads, discarding control messages.
  pub async fn collect_payloads(self) -> Result<Vec<T>, FlowError> {
    let messages = self.collect_messages().await?;
    Ok(messages.into_iter().filter_map(Message::into_payload).collect())
  }
}

/// Re-runs the sub-sequence built by `factory` after a terminal error, up
/// to `attempts` extra times. Items emitted before the failure are
/// re-emitted by the fresh run; this wraps a whole sub-sequence, not a
/// single item. Retry is opt-in only — no combinator retries implicitly.
#[must_use]
pub fn retry<T, F>(attempts: usize, mut factory: F) -> Flow<T>
where
  T: Send + 'static,
  F: FnMut() -> Flow<T> + Send + 'static,
{
  Flow::from_stream(async_stream::stream! {
    let mut remaining = attempts;
    'attempt: loop {
      let mut current = factory().into_stream();
      while let Some(item) = current.next().await {
        match item {
          Ok(msg) => yield Ok(msg),
          Err(error) => {
            if remaining == 0 {
              yield Err(error);
              break 'attempt;
            }
            remaining -= 1;
            tracing::warn!(error = %error, remaining, "retrying sub-sequence after error");
            continue 'attempt;
          }
        }
      }
      break;
    }
  })
}
