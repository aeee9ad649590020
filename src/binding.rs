//! Resolving pipeline descriptions against a registry.
//!
//! A [`PipelinePlan`] names a pipeline's endpoints as data: its input port
//! binds to a registered source and its output port to a registered sink.
//! [`PipelinePlan::bind`] resolves both against a
//! [`Registry`](crate::registry::Registry) up front, so a typo or type
//! mismatch fails at binding time, not mid-run. The resulting
//! [`BoundPipeline`] can be run repeatedly; each run produces a fresh flow
//! from the source.

use std::sync::Arc;

use crate::error::{DispatchSummary, FlowError};
use crate::flow::Flow;
use crate::registry::{Registry, SharedSinkHandle, SharedSource};

/// One named port wired to a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
  /// The pipeline-local port name.
  pub port: String,
  /// The registry name the port resolves against.
  pub target: String,
}

impl PortBinding {
  /// Binds a port to a registry name.
  pub fn new(port: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      port: port.into(),
      target: target.into(),
    }
  }
}

/// A pipeline description: where messages come from and where they go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePlan {
  /// The input port, bound to a source.
  pub input: PortBinding,
  /// The output port, bound to a sink.
  pub output: PortBinding,
}

impl PipelinePlan {
  /// Describes a pipeline from a source name to a sink name, with default
  /// port names `in` and `out`.
  pub fn new(source: impl Into<String>, sink: impl Into<String>) -> Self {
    Self {
      input: PortBinding::new("in", source),
      output: PortBinding::new("out", sink),
    }
  }

  /// Resolves both ports against the registry. Fails with
  /// [`FlowError::MissingEntry`] or [`FlowError::WrongType`] before any
  /// message moves.
  pub fn bind<T: Send + 'static>(
    &self,
    registry: &Registry,
  ) -> Result<BoundPipeline<T>, FlowError> {
    let source = registry.lookup_source::<T>(&self.input.target)?;
    let sink = registry.lookup_sink::<T>(&self.output.target)?;
    tracing::debug!(
      source = %self.input.target,
      sink = %self.output.target,
      "pipeline bound"
    );
    Ok(BoundPipeline {
      plan: self.clone(),
      source,
      sink,
      transform: None,
    })
  }
}

type Transform<T> = Arc<dyn Fn(Flow<T>) -> Flow<T> + Send + Sync>;

/// A plan whose endpoints have been resolved to live components.
pub struct BoundPipeline<T> {
  plan: PipelinePlan,
  source: SharedSource<T>,
  sink: SharedSinkHandle<T>,
  transform: Option<Transform<T>>,
}

impl<T: Send + 'static> BoundPipeline<T> {
  /// Inserts a transformation between source and sink, applied to the flow
  /// of every run.
  #[must_use]
  pub fn with_transform<F>(mut self, transform: F) -> Self
  where
    F: Fn(Flow<T>) -> Flow<T> + Send + Sync + 'static,
  {
    self.transform = Some(Arc::new(transform));
    self
  }

  /// The plan this pipeline was bound from.
  #[must_use]
  pub fn plan(&self) -> &PipelinePlan {
    &self.plan
  }

  /// Produces a fresh flow from the source, applies the transform, and
  /// drains it into the sink.
  pub async fn run(&self) -> Result<DispatchSummary, FlowError> {
    let flow = self.source.lock().await.produce();
    let flow = match &self.transform {
      Some(transform) => transform(flow),
      None => flow,
    };
    let mut sink = self.sink.lock().await;
    flow.to(&mut **sink).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sink::VecSink;
  use crate::source::IterSource;

  fn registry() -> Registry {
    let registry = Registry::new();
    registry
      .register_source("numbers", IterSource::new("numbers", vec![1, 2, 3]))
      .unwrap();
    registry
      .register_sink::<i32, _>("collector", VecSink::new("collector"))
      .unwrap();
    registry
  }

  #[tokio::test]
  async fn test_bind_and_run() {
    let registry = registry();
    let pipeline = PipelinePlan::new("numbers", "collector")
      .bind::<i32>(&registry)
      .unwrap();

    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.delivered, 3);
    assert!(summary.is_clean());
  }

  #[tokio::test]
  async fn test_transform_applies_per_run() {
    let registry = registry();
    let pipeline = PipelinePlan::new("numbers", "collector")
      .bind::<i32>(&registry)
      .unwrap()
      .with_transform(|flow| flow.filter_payload(|x| x % 2 == 1).map_payload(|x| x * 10));

    let first = pipeline.run().await.unwrap();
    assert_eq!(first.delivered, 2); // 1 and 3 survive the filter

    // A second run produces a fresh flow through the same transform.
    let second = pipeline.run().await.unwrap();
    assert_eq!(second.delivered, 2);
  }

  #[test]
  fn test_bind_fails_fast_on_missing_entry() {
    let registry = registry();
    assert!(matches!(
      PipelinePlan::new("absent", "collector").bind::<i32>(&registry),
      Err(FlowError::MissingEntry { .. })
    ));
  }

  #[test]
  fn test_bind_fails_fast_on_wrong_type() {
    let registry = registry();
    assert!(matches!(
      PipelinePlan::new("numbers", "collector").bind::<String>(&registry),
      Err(FlowError::WrongType { .. })
    ));
  }
}
