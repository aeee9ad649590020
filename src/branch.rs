//! Predicate-table fan-out.
//!
//! [`BranchBuilder`] splits one flow into n predicate-matched outputs plus a
//! fallback. Unlike [`Flow::branch`](crate::flow::Flow::branch), which
//! multicasts and filters, the table routes each data message to **exactly
//! one** output: the first predicate that matches wins, and a message no
//! predicate claims lands in the fallback. Predicates are evaluated in
//! registration order.
//!
//! All outputs share a single upstream subscription, started once the last
//! output attaches, so a message evaluated against the table is consumed by
//! its winner and never re-offered.

use crate::error::FlowError;
use crate::flow::Flow;
use crate::hub::{Hub, HubPredicate, Route};
use crate::message::Message;

/// Builder for an n-way first-match split of one flow.
///
/// # Example
///
/// ```rust
/// use flowmark::branch::BranchBuilder;
/// use flowmark::flow::Flow;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let outputs = BranchBuilder::new(Flow::from_values(1..=6))
///   .when_payload("threes", |x: &i32| x % 3 == 0)
///   .when_payload("evens", |x| x % 2 == 0)
///   .build()
///   .unwrap();
///
/// let mut branches = outputs.branches.into_iter();
/// let threes = branches.next().unwrap().collect_payloads().await.unwrap();
/// let evens = branches.next().unwrap().collect_payloads().await.unwrap();
/// let rest = outputs.fallback.collect_payloads().await.unwrap();
/// assert_eq!(threes, vec![3, 6]);
/// assert_eq!(evens, vec![2, 4]);
/// assert_eq!(rest, vec![1, 5]);
/// # }
/// ```
pub struct BranchBuilder<T> {
  upstream: Flow<T>,
  labels: Vec<String>,
  predicates: Vec<HubPredicate<T>>,
}

/// The outputs of a built branch table: one flow per predicate, in
/// registration order, plus the fallback for unmatched messages.
pub struct BranchOutputs<T> {
  /// One output per registered predicate, in registration order.
  pub branches: Vec<Flow<T>>,
  /// Messages no predicate matched.
  pub fallback: Flow<T>,
}

impl<T: Clone + Send + 'static> BranchBuilder<T> {
  /// Starts a branch table over the given upstream.
  #[must_use]
  pub fn new(upstream: Flow<T>) -> Self {
    Self {
      upstream,
      labels: Vec::new(),
      predicates: Vec::new(),
    }
  }

  /// Adds a predicate branch. Earlier branches win ties.
  #[must_use]
  pub fn when<P>(mut self, label: impl Into<String>, predicate: P) -> Self
  where
    P: Fn(&Message<T>) -> bool + Send + Sync + 'static,
  {
    self.labels.push(label.into());
    self.predicates.push(Box::new(predicate));
    self
  }

  /// Adds a predicate branch matching on the payload alone. Control
  /// messages never match a payload predicate, so they land in the
  /// fallback.
  #[must_use]
  pub fn when_payload<P>(self, label: impl Into<String>, predicate: P) -> Self
  where
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self.when(label, move |msg: &Message<T>| {
      msg.payload().is_some_and(&predicate)
    })
  }

  /// Finalizes the table. Fails at build time if no predicate was
  /// registered.
  pub fn build(mut self) -> Result<BranchOutputs<T>, FlowError> {
    if self.predicates.is_empty() {
      return Err(FlowError::build(
        "branch table",
        "at least one predicate is required",
      ));
    }
    self.labels.push("fallback".to_string());
    let hub = Hub::new(self.upstream, Route::FirstMatch(self.predicates), self.labels);
    let mut taps = hub.taps();
    let fallback = taps.pop().ok_or(FlowError::build(
      "branch table",
      "hub produced no fallback tap",
    ))?;
    Ok(BranchOutputs {
      branches: taps,
      fallback,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_first_match_wins() {
    // 6 matches both predicates; the earlier one takes it.
    let outputs = BranchBuilder::new(Flow::from_values(1..=6))
      .when_payload("threes", |x: &i32| x % 3 == 0)
      .when_payload("evens", |x| x % 2 == 0)
      .build()
      .unwrap();

    let mut branches = outputs.branches.into_iter();
    let threes = branches.next().unwrap();
    let evens = branches.next().unwrap();
    let (threes, evens, rest) = tokio::join!(
      threes.collect_payloads(),
      evens.collect_payloads(),
      outputs.fallback.collect_payloads()
    );

    assert_eq!(threes.unwrap(), vec![3, 6]);
    assert_eq!(evens.unwrap(), vec![2, 4]);
    assert_eq!(rest.unwrap(), vec![1, 5]);
  }

  #[tokio::test]
  async fn test_unmatched_goes_to_fallback() {
    let outputs = BranchBuilder::new(Flow::from_values(vec![1, 2, 3]))
      .when_payload("none", |_: &i32| false)
      .build()
      .unwrap();

    let mut branches = outputs.branches.into_iter();
    let (matched, rest) = tokio::join!(
      branches.next().unwrap().collect_payloads(),
      outputs.fallback.collect_payloads()
    );
    assert!(matched.unwrap().is_empty());
    assert_eq!(rest.unwrap(), vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_empty_table_rejected() {
    let result = BranchBuilder::new(Flow::<i32>::empty()).build();
    assert!(matches!(result, Err(FlowError::Build { .. })));
  }
}
