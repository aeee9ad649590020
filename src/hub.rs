//! Shared fan-out hub behind `broadcast` and the branch table.
//!
//! The hub implements the pull/demand protocol by hand as an explicit state
//! machine: taps attach one by one, and the upstream is subscribed exactly
//! once, when the last expected tap attaches (the attach counter is then
//! reset for any later subscription cycle). A spawned pump task pulls one
//! upstream item at a time and forwards it over bounded channels, so the
//! upstream never outruns downstream demand — a slow tap gates the shared
//! pump, since per-tap demand is not isolated.
//!
//! Routing modes:
//!
//! - [`Route::All`]: every tap sees every item (multicast, upstream driven
//!   once); a ring of the last `replay` items is served to taps that attach
//!   after the drive completes.
//! - [`Route::FirstMatch`]: each item goes to the first tap whose predicate
//!   matches, with the final tap acting as the fallback — at most one
//!   delivery per item.
//!
//! Terminal errors and completion are forwarded to every tap.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::flow::{BoxMessageStream, Flow, FlowItem};
use crate::message::Message;

/// Bound on in-flight items per tap channel.
pub(crate) const HUB_CHANNEL_CAPACITY: usize = 16;

pub(crate) type HubPredicate<T> = Box<dyn Fn(&Message<T>) -> bool + Send + Sync>;

pub(crate) enum Route<T> {
  /// Multicast: every tap sees every item; keep the last `replay` items.
  All {
    /// Replay ring depth for taps attaching after the drive completed.
    replay: usize,
  },
  /// First matching predicate wins; the last tap is the fallback.
  FirstMatch(Vec<HubPredicate<T>>),
}

struct HubState<T> {
  upstream: Option<BoxMessageStream<T>>,
  senders: Vec<Option<mpsc::Sender<FlowItem<T>>>>,
  attached: usize,
  started: bool,
  replay: VecDeque<FlowItem<T>>,
}

enum Attach<T> {
  Joined(mpsc::Receiver<FlowItem<T>>),
  Replay(Vec<FlowItem<T>>),
}

pub(crate) struct Hub<T> {
  expected: usize,
  labels: Vec<String>,
  route: Route<T>,
  state: Mutex<HubState<T>>,
}

impl<T> Hub<T>
where
  T: Clone + Send + 'static,
{
  pub(crate) fn new(upstream: Flow<T>, route: Route<T>, labels: Vec<String>) -> Arc<Self> {
    let expected = labels.len();
    Arc::new(Self {
      expected,
      labels,
      route,
      state: Mutex::new(HubState {
        upstream: Some(upstream.into_stream()),
        senders: (0..expected).map(|_| None).collect(),
        attached: 0,
        started: false,
        replay: VecDeque::new(),
      }),
    })
  }

  /// Builds the tap flows. Each tap attaches to the hub on first poll; the
  /// upstream is not pulled until every tap has attached.
  pub(crate) fn taps(self: &Arc<Self>) -> Vec<Flow<T>> {
    (0..self.expected)
      .map(|index| {
        let hub = self.clone();
        Flow::from_stream(async_stream::stream! {
          match hub.attach(index) {
            Attach::Joined(mut rx) => {
              while let Some(item) = rx.recv().await {
                yield item;
              }
            }
            Attach::Replay(items) => {
              for item in items {
                yield item;
              }
            }
          }
        })
      })
      .collect()
  }

  fn attach(self: &Arc<Self>, index: usize) -> Attach<T> {
    let mut state = self.state.lock().expect("hub state poisoned");
    if state.started {
      // A later subscription cycle: the upstream has already been driven;
      // serve the replay ring and complete.
      return Attach::Replay(state.replay.iter().cloned().collect());
    }

    let (tx, rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
    state.senders[index] = Some(tx);
    state.attached += 1;
    tracing::debug!(
      tap = %self.labels[index],
      attached = state.attached,
      expected = self.expected,
      "hub tap attached"
    );

    if state.attached == self.expected {
      state.started = true;
      state.attached = 0;
      let upstream = state.upstream.take();
      let senders: Vec<_> = state.senders.iter_mut().map(Option::take).collect();
      if let Some(upstream) = upstream {
        let hub = self.clone();
        tokio::spawn(async move {
          hub.pump(upstream, senders).await;
        });
      }
    }

    Attach::Joined(rx)
  }

  async fn pump(
    self: Arc<Self>,
    mut upstream: BoxMessageStream<T>,
    mut senders: Vec<Option<mpsc::Sender<FlowItem<T>>>>,
  ) {
    while let Some(item) = upstream.next().await {
      match item {
        Ok(msg) => match &self.route {
          Route::All { replay } => {
            if *replay > 0 {
              let mut state = self.state.lock().expect("hub state poisoned");
              state.replay.push_back(Ok(msg.clone()));
              while state.replay.len() > *replay {
                state.replay.pop_front();
              }
            }
            for slot in senders.iter_mut() {
              if let Some(tx) = slot
                && tx.send(Ok(msg.clone())).await.is_err()
              {
                *slot = None;
              }
            }
            if senders.iter().all(Option::is_none) {
              tracing::debug!("all hub taps detached; stopping upstream");
              return;
            }
          }
          Route::FirstMatch(predicates) => {
            let index = predicates
              .iter()
              .position(|predicate| predicate(&msg))
              .unwrap_or(senders.len() - 1);
            if let Some(tx) = &senders[index]
              && tx.send(Ok(msg)).await.is_err()
            {
              tracing::debug!(tap = %self.labels[index], "hub tap detached");
              senders[index] = None;
            }
            if senders.iter().all(Option::is_none) {
              return;
            }
          }
        },
        Err(error) => {
          // A terminal error is broadcast to every tap so none is left
          // dangling.
          for slot in senders.iter_mut() {
            if let Some(tx) = slot {
              let _ = tx.send(Err(error.clone())).await;
            }
          }
          return;
        }
      }
    }
  }

  #[cfg(test)]
  fn attached_count(&self) -> usize {
    self.state.lock().expect("hub state poisoned").attached
  }

  #[cfg(test)]
  fn is_started(&self) -> bool {
    self.state.lock().expect("hub state poisoned").started
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::FlowError;

  fn label(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("tap-{}", i)).collect()
  }

  #[tokio::test]
  async fn test_upstream_subscribed_on_last_attach() {
    let hub = Hub::new(
      Flow::from_values(vec![1, 2, 3]),
      Route::All { replay: 0 },
      label(2),
    );

    assert!(!hub.is_started());
    let first = hub.attach(0);
    assert_eq!(hub.attached_count(), 1);
    assert!(!hub.is_started());

    let second = hub.attach(1);
    assert!(hub.is_started());
    // Counter resets for any later subscription cycle.
    assert_eq!(hub.attached_count(), 0);

    for attach in [first, second] {
      let mut rx = match attach {
        Attach::Joined(rx) => rx,
        Attach::Replay(_) => panic!("expected a joined tap"),
      };
      let mut seen = Vec::new();
      while let Some(item) = rx.recv().await {
        seen.push(item.unwrap().into_payload().unwrap());
      }
      assert_eq!(seen, vec![1, 2, 3]);
    }
  }

  #[tokio::test]
  async fn test_late_attach_serves_replay_ring() {
    let hub = Hub::new(
      Flow::from_values(vec![1, 2, 3, 4]),
      Route::All { replay: 2 },
      label(1),
    );

    let mut taps = hub.taps();
    let collected = taps.remove(0).collect_payloads().await.unwrap();
    assert_eq!(collected, vec![1, 2, 3, 4]);

    let late = match hub.attach(0) {
      Attach::Replay(items) => items,
      Attach::Joined(_) => panic!("expected replay"),
    };
    let values: Vec<i32> = late
      .into_iter()
      .map(|item| item.unwrap().into_payload().unwrap())
      .collect();
    assert_eq!(values, vec![3, 4]);
  }

  #[tokio::test]
  async fn test_first_match_routes_exclusively() {
    let predicates: Vec<HubPredicate<i32>> = vec![Box::new(|msg: &Message<i32>| {
      msg.payload().is_some_and(|x| x % 2 == 0)
    })];
    let hub = Hub::new(
      Flow::from_values(vec![1, 2, 3, 4, 5]),
      Route::FirstMatch(predicates),
      label(2),
    );

    let mut taps = hub.taps();
    let fallback = taps.pop().unwrap();
    let even = taps.pop().unwrap();

    let (even, rest) = tokio::join!(even.collect_payloads(), fallback.collect_payloads());
    assert_eq!(even.unwrap(), vec![2, 4]);
    assert_eq!(rest.unwrap(), vec![1, 3, 5]);
  }

  #[tokio::test]
  async fn test_error_broadcast_to_all_taps() {
    let upstream = Flow::from_stream(futures::stream::iter(vec![
      Ok(Message::new(1)),
      Err(FlowError::processing("boom", "bad item")),
    ]));
    let hub = Hub::new(upstream, Route::All { replay: 0 }, label(2));

    let mut taps = hub.taps();
    let b = taps.pop().unwrap();
    let a = taps.pop().unwrap();

    let (a, b) = tokio::join!(a.collect_payloads(), b.collect_payloads());
    assert!(matches!(a, Err(FlowError::Processing { .. })));
    assert!(matches!(b, Err(FlowError::Processing { .. })));
  }
}
