//! Windows, watermarks, and windowing policies.
//!
//! A [`Window`] is an immutable, ordered batch of messages closed out of a
//! flow. Closing a window stamps every contained message with a
//! [`headers::WINDOW_REF`] header pointing back at the window, and produces
//! a single watermark control message that marks the batch complete.
//!
//! The back-reference is a lookup key, not an ownership edge: a
//! [`WindowRef`] holds a weak handle, so messages never extend their own
//! window's lifetime. Identity ([`WindowId`]) is process-unique and survives
//! the window itself, which is what lets a window-aware sink key its buffers
//! by window identity rather than structural equality (two windows can hold
//! equal contents and must still be distinct keys).

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::error::FlowError;
use crate::message::{ControlSignal, HeaderValue, Headers, Message, headers};

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a window.
///
/// Allocated from a monotonic counter at window construction. Two windows
/// with equal contents still carry distinct ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

impl WindowId {
  fn next() -> Self {
    WindowId(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed))
  }
}

impl fmt::Display for WindowId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "window-{}", self.0)
  }
}

struct WindowInner<T> {
  id: WindowId,
  items: OnceLock<Vec<Message<T>>>,
}

/// An immutable closed batch of messages sharing a back-reference.
///
/// Built once from a finite buffer with [`Window::close`]; cloning shares
/// the same batch and identity.
pub struct Window<T> {
  inner: Arc<WindowInner<T>>,
}

impl<T> Clone for Window<T> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<T> fmt::Debug for Window<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Window")
      .field("id", &self.inner.id)
      .field("len", &self.len())
      .finish()
  }
}

impl<T: Send + Sync + 'static> Window<T> {
  /// Closes a batch into a window, stamping every message with the
  /// `window-ref` back-reference.
  #[must_use]
  pub fn close(batch: Vec<Message<T>>) -> Self {
    let window = Self {
      inner: Arc::new(WindowInner {
        id: WindowId::next(),
        items: OnceLock::new(),
      }),
    };
    let handle = window.handle();
    let stamped = batch
      .into_iter()
      .map(|msg| msg.with_header(headers::WINDOW_REF, handle.clone()))
      .collect();
    // The lock is freshly created above, so this set cannot fail.
    let _ = window.inner.items.set(stamped);
    window
  }

  /// Returns a type-erased, weakly held handle to this window.
  #[must_use]
  pub fn handle(&self) -> WindowRef {
    let any: Arc<dyn Any + Send + Sync> = self.inner.clone();
    WindowRef {
      id: self.inner.id,
      inner: Arc::downgrade(&any),
    }
  }

  /// Builds the watermark control message that marks this window complete.
  /// It carries only the `window-ref` header.
  #[must_use]
  pub fn watermark(&self) -> Message<T> {
    Message::control(
      ControlSignal::Watermark,
      Headers::new().with(headers::WINDOW_REF, HeaderValue::Window(self.handle())),
    )
  }
}

impl<T> Window<T> {
  /// The window's identity.
  #[must_use]
  pub fn id(&self) -> WindowId {
    self.inner.id
  }

  /// The stamped messages in arrival order.
  #[must_use]
  pub fn messages(&self) -> &[Message<T>] {
    self.inner.items.get().map(Vec::as_slice).unwrap_or(&[])
  }

  /// Number of messages in the window.
  #[must_use]
  pub fn len(&self) -> usize {
    self.messages().len()
  }

  /// Returns true if the window holds no messages.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.messages().is_empty()
  }
}

/// A weak, type-erased handle to a window, used as the `window-ref` header.
///
/// Compares and hashes by window identity. [`WindowRef::window`] recovers
/// the concrete window for read-only lookup, returning `None` once the
/// window has been dropped — the handle never keeps the window alive.
#[derive(Clone)]
pub struct WindowRef {
  id: WindowId,
  inner: Weak<dyn Any + Send + Sync>,
}

impl WindowRef {
  /// The identity of the referenced window.
  #[must_use]
  pub fn id(&self) -> WindowId {
    self.id
  }

  /// Upgrades the handle back to the concrete window, if it is still alive.
  #[must_use]
  pub fn window<T: Send + Sync + 'static>(&self) -> Option<Window<T>> {
    let any = self.inner.upgrade()?;
    any
      .downcast::<WindowInner<T>>()
      .ok()
      .map(|inner| Window { inner })
  }
}

impl fmt::Debug for WindowRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "WindowRef({})", self.id)
  }
}

impl PartialEq for WindowRef {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Eq for WindowRef {}

impl std::hash::Hash for WindowRef {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    self.id.hash(state);
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PolicyKind {
  ClosedCount(usize),
  OpenCount(usize),
  ClosedAll,
  OpenAll,
}

/// How a flow is cut into windows.
///
/// - **Closed** policies buffer a whole window before emitting any of it, so
///   every emitted message already carries its `window-ref` header.
/// - **Open** policies forward items immediately and finalize the window at
///   the boundary; early consumers see items without a stable
///   back-reference — the latency/completeness tradeoff is explicit.
/// - **Count** policies cut every `n` items (a smaller final window covers
///   the remainder); **all** policies span the entire input, so the closed
///   variant is only valid for bounded flows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowPolicy {
  pub(crate) kind: PolicyKind,
}

impl WindowPolicy {
  /// Windows of exactly `n` items, fully buffered before emission.
  /// Fails at build time for a non-positive size.
  pub fn closed_count(n: usize) -> Result<Self, FlowError> {
    if n == 0 {
      return Err(FlowError::build("window policy", "size must be positive"));
    }
    Ok(Self {
      kind: PolicyKind::ClosedCount(n),
    })
  }

  /// Windows of `n` items, forwarding immediately and finalizing at the
  /// boundary. Fails at build time for a non-positive size.
  pub fn open_count(n: usize) -> Result<Self, FlowError> {
    if n == 0 {
      return Err(FlowError::build("window policy", "size must be positive"));
    }
    Ok(Self {
      kind: PolicyKind::OpenCount(n),
    })
  }

  /// One window spanning the entire (bounded) input, fully buffered.
  #[must_use]
  pub fn closed_all() -> Self {
    Self {
      kind: PolicyKind::ClosedAll,
    }
  }

  /// One window spanning the entire input, forwarding immediately and
  /// finalizing at end-of-stream.
  #[must_use]
  pub fn open_all() -> Self {
    Self {
      kind: PolicyKind::OpenAll,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_close_stamps_every_message() {
    let batch = vec![Message::new(1).with_header("index", 0), Message::new(2)];
    let window = Window::close(batch);

    assert_eq!(window.len(), 2);
    for msg in window.messages() {
      let window_ref = msg.window_ref().expect("stamped");
      assert_eq!(window_ref.id(), window.id());
    }
    // Pre-existing headers survive the stamp.
    assert_eq!(
      window.messages()[0].header("index"),
      Some(&HeaderValue::Integer(0))
    );
  }

  #[test]
  fn test_identity_not_structural_equality() {
    let a = Window::close(vec![Message::new(1)]);
    let b = Window::close(vec![Message::new(1)]);
    assert_ne!(a.handle(), b.handle());
    assert_ne!(a.id(), b.id());
  }

  #[test]
  fn test_watermark_carries_only_window_ref() {
    let window = Window::close(vec![Message::new("a")]);
    let watermark = window.watermark();

    assert!(watermark.is_watermark());
    assert_eq!(watermark.headers().len(), 1);
    assert_eq!(watermark.window_ref().map(WindowRef::id), Some(window.id()));
  }

  #[test]
  fn test_ref_does_not_extend_lifetime() {
    let window = Window::close(vec![Message::new(7)]);
    let handle = window.handle();
    // Messages inside the window hold refs to their own window; dropping the
    // window (and its messages) must free it even so.
    assert!(handle.window::<i32>().is_some());
    drop(window);
    assert!(handle.window::<i32>().is_none());
  }

  #[test]
  fn test_upgrade_recovers_contents() {
    let window = Window::close(vec![Message::new(1), Message::new(2)]);
    let handle = window.handle();
    let recovered = handle.window::<i32>().expect("alive");
    let values: Vec<i32> = recovered
      .messages()
      .iter()
      .filter_map(|m| m.payload().copied())
      .collect();
    assert_eq!(values, vec![1, 2]);
  }

  #[test]
  fn test_policy_validation() {
    assert!(WindowPolicy::closed_count(0).is_err());
    assert!(WindowPolicy::open_count(0).is_err());
    assert!(WindowPolicy::closed_count(2).is_ok());
    assert_eq!(
      WindowPolicy::closed_all(),
      WindowPolicy::closed_all()
    );
  }
}
