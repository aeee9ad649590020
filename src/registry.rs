//! Named component registry.
//!
//! A [`Registry`] maps names to sources and sinks (and kind strings to
//! factories for them) so pipelines can be described as data and resolved
//! at binding time. The registry is an explicit object — callers create and
//! share one rather than going through process-global state — and every
//! lookup is typed: an entry registered under payload type `T` is only
//! recoverable as `T`, and a mismatched lookup fails with
//! [`FlowError::WrongType`] instead of panicking.
//!
//! Entries are handed out as shared async-mutex handles, since producing
//! from a source or dispatching to a sink needs exclusive access while the
//! registry itself stays shareable.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::FlowError;
use crate::sink::Sink;
use crate::source::Source;

/// A shared, exclusively-lockable handle to a registered source.
pub type SharedSource<T> = Arc<tokio::sync::Mutex<Box<dyn Source<T>>>>;

/// A shared, exclusively-lockable handle to a registered sink.
pub type SharedSinkHandle<T> = Arc<tokio::sync::Mutex<Box<dyn Sink<T>>>>;

/// Builds a source of the given name on demand.
pub type SourceFactory<T> =
  Arc<dyn Fn(&str) -> Result<Box<dyn Source<T>>, FlowError> + Send + Sync>;

/// Builds a sink of the given name on demand.
pub type SinkFactory<T> =
  Arc<dyn Fn(&str) -> Result<Box<dyn Sink<T>>, FlowError> + Send + Sync>;

type AnyEntry = Box<dyn Any + Send>;

#[derive(Default)]
struct RegistryState {
  closed: bool,
  sources: HashMap<String, AnyEntry>,
  sinks: HashMap<String, AnyEntry>,
  source_factories: HashMap<String, AnyEntry>,
  sink_factories: HashMap<String, AnyEntry>,
}

/// Typed name-to-component map for sources, sinks, and their factories.
#[derive(Default)]
pub struct Registry {
  state: Mutex<RegistryState>,
}

impl Registry {
  /// Creates an empty, open registry.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  fn insert(
    slot: &mut HashMap<String, AnyEntry>,
    closed: bool,
    what: &str,
    name: &str,
    entry: AnyEntry,
  ) -> Result<(), FlowError> {
    if closed {
      return Err(FlowError::RegistryClosed);
    }
    if slot.contains_key(name) {
      return Err(FlowError::DuplicateEntry {
        what: what.to_string(),
        name: name.to_string(),
      });
    }
    tracing::debug!(what, name, "registered");
    slot.insert(name.to_string(), entry);
    Ok(())
  }

  fn fetch<E: Clone + 'static>(
    slot: &HashMap<String, AnyEntry>,
    what: &str,
    name: &str,
  ) -> Result<E, FlowError> {
    let entry = slot.get(name).ok_or_else(|| FlowError::MissingEntry {
      what: what.to_string(),
      name: name.to_string(),
    })?;
    entry
      .downcast_ref::<E>()
      .cloned()
      .ok_or_else(|| FlowError::WrongType {
        name: name.to_string(),
      })
  }

  fn remove(
    slot: &mut HashMap<String, AnyEntry>,
    what: &str,
    name: &str,
  ) -> Result<(), FlowError> {
    slot.remove(name).map(|_| ()).ok_or_else(|| {
      FlowError::MissingEntry {
        what: what.to_string(),
        name: name.to_string(),
      }
    })
  }

  /// Registers a source under a unique name.
  pub fn register_source<T, S>(&self, name: &str, source: S) -> Result<(), FlowError>
  where
    T: Send + 'static,
    S: Source<T> + 'static,
  {
    let boxed: Box<dyn Source<T>> = Box::new(source);
    let handle: SharedSource<T> = Arc::new(tokio::sync::Mutex::new(boxed));
    let mut state = self.state.lock().expect("registry state poisoned");
    let closed = state.closed;
    Self::insert(&mut state.sources, closed, "source", name, Box::new(handle))
  }

  /// Looks up a source by name and payload type.
  pub fn lookup_source<T: Send + 'static>(&self, name: &str) -> Result<SharedSource<T>, FlowError> {
    let state = self.state.lock().expect("registry state poisoned");
    Self::fetch(&state.sources, "source", name)
  }

  /// Removes a source registration.
  pub fn unregister_source(&self, name: &str) -> Result<(), FlowError> {
    let mut state = self.state.lock().expect("registry state poisoned");
    Self::remove(&mut state.sources, "source", name)
  }

  /// Registers a sink under a unique name.
  pub fn register_sink<T, S>(&self, name: &str, sink: S) -> Result<(), FlowError>
  where
    T: Send + 'static,
    S: Sink<T> + 'static,
  {
    let boxed: Box<dyn Sink<T>> = Box::new(sink);
    let handle: SharedSinkHandle<T> = Arc::new(tokio::sync::Mutex::new(boxed));
    let mut state = self.state.lock().expect("registry state poisoned");
    let closed = state.closed;
    Self::insert(&mut state.sinks, closed, "sink", name, Box::new(handle))
  }

  /// Looks up a sink by name and payload type.
  pub fn lookup_sink<T: Send + 'static>(&self, name: &str) -> Result<SharedSinkHandle<T>, FlowError> {
    let state = self.state.lock().expect("registry state poisoned");
    Self::fetch(&state.sinks, "sink", name)
  }

  /// Removes a sink registration.
  pub fn unregister_sink(&self, name: &str) -> Result<(), FlowError> {
    let mut state = self.state.lock().expect("registry state poisoned");
    Self::remove(&mut state.sinks, "sink", name)
  }

  /// Registers a source factory under a kind string.
  pub fn register_source_factory<T, F>(&self, kind: &str, factory: F) -> Result<(), FlowError>
  where
    T: Send + 'static,
    F: Fn(&str) -> Result<Box<dyn Source<T>>, FlowError> + Send + Sync + 'static,
  {
    let factory: SourceFactory<T> = Arc::new(factory);
    let mut state = self.state.lock().expect("registry state poisoned");
    let closed = state.closed;
    Self::insert(
      &mut state.source_factories,
      closed,
      "source factory",
      kind,
      Box::new(factory),
    )
  }

  /// Builds a fresh source through the factory registered for `kind`.
  pub fn create_source<T: Send + 'static>(
    &self,
    kind: &str,
    name: &str,
  ) -> Result<Box<dyn Source<T>>, FlowError> {
    let factory: SourceFactory<T> = {
      let state = self.state.lock().expect("registry state poisoned");
      Self::fetch(&state.source_factories, "source factory", kind)?
    };
    factory(name)
  }

  /// Registers a sink factory under a kind string.
  pub fn register_sink_factory<T, F>(&self, kind: &str, factory: F) -> Result<(), FlowError>
  where
    T: Send + 'static,
    F: Fn(&str) -> Result<Box<dyn Sink<T>>, FlowError> + Send + Sync + 'static,
  {
    let factory: SinkFactory<T> = Arc::new(factory);
    let mut state = self.state.lock().expect("registry state poisoned");
    let closed = state.closed;
    Self::insert(
      &mut state.sink_factories,
      closed,
      "sink factory",
      kind,
      Box::new(factory),
    )
  }

  /// Builds a fresh sink through the factory registered for `kind`.
  pub fn create_sink<T: Send + 'static>(
    &self,
    kind: &str,
    name: &str,
  ) -> Result<Box<dyn Sink<T>>, FlowError> {
    let factory: SinkFactory<T> = {
      let state = self.state.lock().expect("registry state poisoned");
      Self::fetch(&state.sink_factories, "sink factory", kind)?
    };
    factory(name)
  }

  /// Drops every registration, leaving the registry open.
  pub fn reset(&self) {
    let mut state = self.state.lock().expect("registry state poisoned");
    state.sources.clear();
    state.sinks.clear();
    state.source_factories.clear();
    state.sink_factories.clear();
  }

  /// Closes the registry: existing entries stay resolvable, but any new
  /// registration fails with [`FlowError::RegistryClosed`].
  pub fn close(&self) {
    self.state.lock().expect("registry state poisoned").closed = true;
  }

  /// Returns true once [`Registry::close`] has run.
  #[must_use]
  pub fn is_closed(&self) -> bool {
    self.state.lock().expect("registry state poisoned").closed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sink::VecSink;
  use crate::source::IterSource;

  #[tokio::test]
  async fn test_register_and_resolve_source() {
    let registry = Registry::new();
    registry
      .register_source("numbers", IterSource::new("numbers", vec![1, 2, 3]))
      .unwrap();

    let handle = registry.lookup_source::<i32>("numbers").unwrap();
    let out = handle
      .lock()
      .await
      .produce()
      .collect_payloads()
      .await
      .unwrap();
    assert_eq!(out, vec![1, 2, 3]);
  }

  #[test]
  fn test_duplicate_registration_rejected() {
    let registry = Registry::new();
    registry
      .register_source("s", IterSource::new("s", vec![1]))
      .unwrap();
    assert!(matches!(
      registry.register_source("s", IterSource::new("s", vec![2])),
      Err(FlowError::DuplicateEntry { .. })
    ));
  }

  #[test]
  fn test_missing_and_wrong_type_lookups() {
    let registry = Registry::new();
    assert!(matches!(
      registry.lookup_source::<i32>("absent"),
      Err(FlowError::MissingEntry { .. })
    ));

    registry
      .register_source("s", IterSource::new("s", vec![1i32]))
      .unwrap();
    assert!(matches!(
      registry.lookup_source::<String>("s"),
      Err(FlowError::WrongType { .. })
    ));
  }

  #[test]
  fn test_unregister_frees_the_name() {
    let registry = Registry::new();
    registry
      .register_source("s", IterSource::new("s", vec![1]))
      .unwrap();
    registry.unregister_source("s").unwrap();
    registry
      .register_source("s", IterSource::new("s", vec![2]))
      .unwrap();
  }

  #[test]
  fn test_closed_registry_rejects_registration() {
    let registry = Registry::new();
    registry
      .register_source("before", IterSource::new("before", vec![1]))
      .unwrap();
    registry.close();
    assert!(registry.is_closed());

    assert_eq!(
      registry.register_source("after", IterSource::new("after", vec![2])),
      Err(FlowError::RegistryClosed)
    );
    // Existing entries remain resolvable.
    assert!(registry.lookup_source::<i32>("before").is_ok());
  }

  #[tokio::test]
  async fn test_factory_builds_fresh_components() {
    let registry = Registry::new();
    registry
      .register_source_factory("range", |name: &str| {
        Ok(Box::new(IterSource::new(name, vec![1, 2])) as Box<dyn Source<i32>>)
      })
      .unwrap();
    registry
      .register_sink_factory("vec", |name: &str| {
        Ok(Box::new(VecSink::new(name)) as Box<dyn Sink<i32>>)
      })
      .unwrap();

    let mut source = registry.create_source::<i32>("range", "a").unwrap();
    assert_eq!(source.name(), Some("a"));
    let out = source.produce().collect_payloads().await.unwrap();
    assert_eq!(out, vec![1, 2]);

    let sink = registry.create_sink::<i32>("vec", "b").unwrap();
    assert_eq!(sink.name(), Some("b"));
  }
}
