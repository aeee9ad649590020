//! Deferred wiring between graph construction and data flow.
//!
//! A [`Connector`] is a flow endpoint whose upstream is supplied later:
//! downstream stages compose against the connector's output while the
//! producing side is still being assembled, and `connect` wires the real
//! upstream in exactly once. The connector is transparent — it forwards
//! items, the terminal error, and completion unchanged, and adds no
//! buffering beyond the pull contract itself.
//!
//! Misuse is surfaced as protocol errors rather than silence: wiring twice
//! yields [`FlowError::AlreadyConnected`], polling the output before wiring
//! yields [`FlowError::NotConnected`], and taking the output twice yields
//! [`FlowError::AlreadyAttached`].

use std::sync::{Arc, Mutex};

use futures::StreamExt;

use crate::error::FlowError;
use crate::flow::Flow;

struct ConnectorState<T> {
  upstream: Option<Flow<T>>,
  connected: bool,
  taken: bool,
}

/// A flow whose upstream is wired after construction.
///
/// Cloning shares the same wiring point, so one handle can be passed to the
/// producing side and another kept for the consuming side.
pub struct Connector<T> {
  state: Arc<Mutex<ConnectorState<T>>>,
}

impl<T> Clone for Connector<T> {
  fn clone(&self) -> Self {
    Self {
      state: self.state.clone(),
    }
  }
}

impl<T: Send + 'static> Default for Connector<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Send + 'static> Connector<T> {
  /// Creates an unwired connector.
  #[must_use]
  pub fn new() -> Self {
    Self {
      state: Arc::new(Mutex::new(ConnectorState {
        upstream: None,
        connected: false,
        taken: false,
      })),
    }
  }

  /// Wires the upstream. Fails with [`FlowError::AlreadyConnected`] on any
  /// wiring after the first.
  pub fn connect(&self, upstream: Flow<T>) -> Result<(), FlowError> {
    let mut state = self.state.lock().expect("connector state poisoned");
    if state.connected {
      return Err(FlowError::AlreadyConnected);
    }
    state.connected = true;
    state.upstream = Some(upstream);
    Ok(())
  }

  /// Returns true once an upstream has been wired.
  #[must_use]
  pub fn is_connected(&self) -> bool {
    self.state.lock().expect("connector state poisoned").connected
  }

  /// The connector's output flow.
  ///
  /// The upstream is resolved lazily, on first poll: composing against the
  /// output before wiring is fine as long as nothing subscribes until
  /// `connect` has run. An unwired subscription fails with
  /// [`FlowError::NotConnected`]; a second subscription fails with
  /// [`FlowError::AlreadyAttached`].
  #[must_use]
  pub fn flow(&self) -> Flow<T> {
    let state = self.state.clone();
    Flow::from_stream(async_stream::stream! {
      let upstream = {
        let mut state = state.lock().expect("connector state poisoned");
        if !state.connected {
          Err(FlowError::NotConnected)
        } else if state.taken {
          Err(FlowError::AlreadyAttached)
        } else {
          state.taken = true;
          Ok(state.upstream.take())
        }
      };
      match upstream {
        Ok(Some(upstream)) => {
          let mut upstream = upstream.into_stream();
          while let Some(item) = upstream.next().await {
            yield item;
          }
        }
        Ok(None) => yield Err(FlowError::AlreadyAttached),
        Err(error) => yield Err(error),
      }
    })
  }
}
