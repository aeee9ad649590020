//! # Error Handling System
//!
//! Error taxonomy for flowmark flows, hubs, connectors, sinks, and registries.
//!
//! ## Overview
//!
//! Errors fall into four groups:
//!
//! - **Build errors**: invalid arguments caught while the graph is being
//!   constructed (a zero window size, a branch table with no predicates, an
//!   empty fan-in list).
//! - **Processing errors**: a transformation or sink failed while handling
//!   one item; these travel in-band and terminate the subscription unless
//!   caught with [`crate::flow::Flow::catch_and_return`] or
//!   [`crate::flow::Flow::on_error_resume_next`].
//! - **Protocol errors**: misuse of a stateful node, such as connecting a
//!   [`crate::connector::Connector`] twice or attaching to one before it is
//!   wired.
//! - **Dispatch errors**: a sink's `dispatch` failed for one item. These are
//!   reported at the terminal stage but do not, on their own, cancel the
//!   upstream subscription.
//!
//! Dispatch failures are collected into a [`DispatchSummary`] so callers can
//! inspect what was delivered and what was reported.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced by flow construction, processing, and delivery.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FlowError {
  /// Invalid arguments supplied while building the graph.
  #[error("invalid {what}: {reason}")]
  Build {
    /// What was being constructed.
    what: String,
    /// Why the arguments were rejected.
    reason: String,
  },

  /// A transformation or sink failed while processing one item.
  #[error("processing failed in {component}: {message}")]
  Processing {
    /// Name of the component that failed.
    component: String,
    /// Failure description.
    message: String,
  },

  /// A connector was wired a second time.
  #[error("connectable stream already connected")]
  AlreadyConnected,

  /// A consumer attached to a connector before it was wired.
  #[error("connectable stream not yet connected")]
  NotConnected,

  /// A connector's output was taken by more than one consumer.
  #[error("connectable stream output already attached")]
  AlreadyAttached,

  /// A sink rejected one item.
  #[error("sink dispatch failed in {sink}: {message}")]
  Dispatch {
    /// Name of the sink.
    sink: String,
    /// Failure description.
    message: String,
  },

  /// A registry or binding lookup found nothing under the given name.
  #[error("no {what} registered under name {name:?}")]
  MissingEntry {
    /// Kind of entry ("source", "sink", "source factory", ...).
    what: String,
    /// The name that was looked up.
    name: String,
  },

  /// A registry entry with the given name already exists.
  #[error("a {what} is already registered under name {name:?}")]
  DuplicateEntry {
    /// Kind of entry.
    what: String,
    /// The conflicting name.
    name: String,
  },

  /// A registry entry exists but was registered under a different payload type.
  #[error("entry {name:?} is registered under a different payload type")]
  WrongType {
    /// The name that was looked up.
    name: String,
  },

  /// The registry has been closed and no longer accepts registrations.
  #[error("registry has been closed")]
  RegistryClosed,
}

impl FlowError {
  /// Creates a build-time error for an invalid construction argument.
  pub fn build(what: impl Into<String>, reason: impl Into<String>) -> Self {
    FlowError::Build {
      what: what.into(),
      reason: reason.into(),
    }
  }

  /// Creates a per-item processing error attributed to a component.
  pub fn processing(component: impl Into<String>, message: impl Into<String>) -> Self {
    FlowError::Processing {
      component: component.into(),
      message: message.into(),
    }
  }

  /// Creates a sink dispatch error.
  pub fn dispatch(sink: impl Into<String>, message: impl Into<String>) -> Self {
    FlowError::Dispatch {
      sink: sink.into(),
      message: message.into(),
    }
  }
}

/// One reported (non-fatal) sink dispatch failure.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
  /// When the failure was observed.
  pub timestamp: DateTime<Utc>,
  /// Name of the sink that rejected the item.
  pub sink: String,
  /// The error the sink returned.
  pub error: FlowError,
}

impl DispatchFailure {
  /// Records a dispatch failure observed now.
  pub fn now(sink: impl Into<String>, error: FlowError) -> Self {
    Self {
      timestamp: Utc::now(),
      sink: sink.into(),
      error,
    }
  }
}

/// Outcome of draining a flow into a sink via [`crate::flow::Flow::to`].
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
  /// Number of items the sink acknowledged.
  pub delivered: usize,
  /// Dispatch failures that were reported without stopping delivery.
  pub failures: Vec<DispatchFailure>,
}

impl DispatchSummary {
  /// Returns true if every item was acknowledged without failure.
  #[must_use]
  pub fn is_clean(&self) -> bool {
    self.failures.is_empty()
  }
}
