//! Message envelope types.
//!
//! Everything flowing through a [`crate::flow::Flow`] is a [`Message<T>`]:
//! an immutable payload plus a copy-on-write header side-channel. A message
//! is either a **data** message carrying a `T`, or a **control** message
//! carrying an in-band signal (currently only the watermark that closes a
//! window) and no business payload. Control messages are distinguishable by
//! [`Message::is_control`] so business logic can filter them out while a
//! window-aware sink still reacts to them.
//!
//! # Headers
//!
//! Headers are a string-keyed map of [`HeaderValue`]. [`Headers::with`] and
//! [`Headers::without`] return a new map sharing the untouched entries, so
//! stamping one header on a message never mutates the original. Combinators
//! that transform only the payload carry the full header set forward
//! unchanged (the header-conservation rule exercised in this module's tests
//! and in `tests/pipeline.rs`).
//!
//! # Example
//!
//! ```rust
//! use flowmark::message::{Message, HeaderValue};
//!
//! let msg = Message::new(42).with_header("index", HeaderValue::Integer(7));
//! let doubled = msg.map_payload(|x| x * 2);
//!
//! assert_eq!(doubled.payload(), Some(&84));
//! assert_eq!(doubled.header("index"), Some(&HeaderValue::Integer(7)));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::window::WindowRef;

/// Well-known header names.
pub mod headers {
  /// Back-reference from a message to the window that contains it.
  pub const WINDOW_REF: &str = "window-ref";
  /// Key a message was grouped under by `group_by`.
  pub const GROUP_KEY: &str = "group-key";
}

/// A typed header value.
///
/// Covers the primitive kinds messages commonly carry, plus window
/// back-references and opaque user values. Opaque values compare by pointer
/// identity; window references compare by window identity.
#[derive(Clone)]
pub enum HeaderValue {
  /// A boolean flag.
  Bool(bool),
  /// A signed integer.
  Integer(i64),
  /// A floating-point number.
  Float(f64),
  /// A text value.
  Text(String),
  /// A back-reference to a window.
  Window(WindowRef),
  /// An arbitrary shared value.
  Opaque(Arc<dyn Any + Send + Sync>),
}

impl HeaderValue {
  /// Wraps an arbitrary value as an opaque header.
  pub fn opaque<V: Any + Send + Sync>(value: V) -> Self {
    HeaderValue::Opaque(Arc::new(value))
  }

  /// Returns the boolean value, if this is a `Bool`.
  #[must_use]
  pub fn as_bool(&self) -> Option<bool> {
    match self {
      HeaderValue::Bool(b) => Some(*b),
      _ => None,
    }
  }

  /// Returns the integer value, if this is an `Integer`.
  #[must_use]
  pub fn as_integer(&self) -> Option<i64> {
    match self {
      HeaderValue::Integer(i) => Some(*i),
      _ => None,
    }
  }

  /// Returns the float value, if this is a `Float`.
  #[must_use]
  pub fn as_float(&self) -> Option<f64> {
    match self {
      HeaderValue::Float(f) => Some(*f),
      _ => None,
    }
  }

  /// Returns the text value, if this is a `Text`.
  #[must_use]
  pub fn as_text(&self) -> Option<&str> {
    match self {
      HeaderValue::Text(s) => Some(s),
      _ => None,
    }
  }

  /// Returns the window reference, if this is a `Window`.
  #[must_use]
  pub fn as_window(&self) -> Option<&WindowRef> {
    match self {
      HeaderValue::Window(w) => Some(w),
      _ => None,
    }
  }

  /// Downcasts an opaque header to a concrete type.
  #[must_use]
  pub fn downcast_opaque<V: Any + Send + Sync>(&self) -> Option<&V> {
    match self {
      HeaderValue::Opaque(any) => any.downcast_ref::<V>(),
      _ => None,
    }
  }
}

impl fmt::Debug for HeaderValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HeaderValue::Bool(b) => write!(f, "Bool({})", b),
      HeaderValue::Integer(i) => write!(f, "Integer({})", i),
      HeaderValue::Float(x) => write!(f, "Float({})", x),
      HeaderValue::Text(s) => write!(f, "Text({:?})", s),
      HeaderValue::Window(w) => write!(f, "Window({})", w.id()),
      HeaderValue::Opaque(_) => write!(f, "Opaque(..)"),
    }
  }
}

impl PartialEq for HeaderValue {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (HeaderValue::Bool(a), HeaderValue::Bool(b)) => a == b,
      (HeaderValue::Integer(a), HeaderValue::Integer(b)) => a == b,
      (HeaderValue::Float(a), HeaderValue::Float(b)) => a == b,
      (HeaderValue::Text(a), HeaderValue::Text(b)) => a == b,
      (HeaderValue::Window(a), HeaderValue::Window(b)) => a == b,
      (HeaderValue::Opaque(a), HeaderValue::Opaque(b)) => Arc::ptr_eq(a, b),
      _ => false,
    }
  }
}

impl From<bool> for HeaderValue {
  fn from(value: bool) -> Self {
    HeaderValue::Bool(value)
  }
}

impl From<i32> for HeaderValue {
  fn from(value: i32) -> Self {
    HeaderValue::Integer(value.into())
  }
}

impl From<i64> for HeaderValue {
  fn from(value: i64) -> Self {
    HeaderValue::Integer(value)
  }
}

impl From<f64> for HeaderValue {
  fn from(value: f64) -> Self {
    HeaderValue::Float(value)
  }
}

impl From<&str> for HeaderValue {
  fn from(value: &str) -> Self {
    HeaderValue::Text(value.to_string())
  }
}

impl From<String> for HeaderValue {
  fn from(value: String) -> Self {
    HeaderValue::Text(value)
  }
}

impl From<WindowRef> for HeaderValue {
  fn from(value: WindowRef) -> Self {
    HeaderValue::Window(value)
  }
}

/// Copy-on-write header map.
///
/// Cloning is cheap (one `Arc` bump). [`Headers::with`] and
/// [`Headers::without`] duplicate the map with one entry added or removed,
/// leaving the original untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
  entries: Arc<HashMap<String, HeaderValue>>,
}

impl Headers {
  /// Creates an empty header map.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the value under `key`, if present.
  #[must_use]
  pub fn get(&self, key: &str) -> Option<&HeaderValue> {
    self.entries.get(key)
  }

  /// Returns true if `key` is present.
  #[must_use]
  pub fn contains(&self, key: &str) -> bool {
    self.entries.contains_key(key)
  }

  /// Returns a new map with `key` set to `value`.
  #[must_use]
  pub fn with(&self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
    let mut entries = (*self.entries).clone();
    entries.insert(key.into(), value.into());
    Self {
      entries: Arc::new(entries),
    }
  }

  /// Returns a new map with `key` removed. Returns a shared clone if the
  /// key was absent.
  #[must_use]
  pub fn without(&self, key: &str) -> Self {
    if !self.contains(key) {
      return self.clone();
    }
    let mut entries = (*self.entries).clone();
    entries.remove(key);
    Self {
      entries: Arc::new(entries),
    }
  }

  /// Number of headers.
  #[must_use]
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Returns true if no headers are set.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Iterates over all entries.
  pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
    self.entries.iter()
  }
}

/// In-band control signals carried by control messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
  /// Marks the end of a window; the `window-ref` header identifies which.
  Watermark,
}

#[derive(Clone, Debug, PartialEq)]
enum Body<T> {
  Value(T),
  Control(ControlSignal),
}

/// An immutable payload plus a header side-channel.
///
/// A message is either a data message (constructed with [`Message::new`] or
/// [`Message::with_headers`]) or a control message ([`Message::control`]).
/// All header operations are copy-on-write; no constructor or combinator
/// mutates an existing message.
#[derive(Clone, Debug, PartialEq)]
pub struct Message<T> {
  body: Body<T>,
  headers: Headers,
}

impl<T> Message<T> {
  /// Creates a data message with an empty header map.
  #[must_use]
  pub fn new(payload: T) -> Self {
    Self {
      body: Body::Value(payload),
      headers: Headers::new(),
    }
  }

  /// Creates a data message with the given headers.
  #[must_use]
  pub fn with_headers(payload: T, headers: Headers) -> Self {
    Self {
      body: Body::Value(payload),
      headers,
    }
  }

  /// Creates a control message carrying `signal` and the given headers.
  #[must_use]
  pub fn control(signal: ControlSignal, headers: Headers) -> Self {
    Self {
      body: Body::Control(signal),
      headers,
    }
  }

  /// Returns true if this is a control message.
  #[must_use]
  pub fn is_control(&self) -> bool {
    matches!(self.body, Body::Control(_))
  }

  /// Returns true if this is a watermark control message.
  #[must_use]
  pub fn is_watermark(&self) -> bool {
    matches!(self.body, Body::Control(ControlSignal::Watermark))
  }

  /// Returns the control signal, if this is a control message.
  #[must_use]
  pub fn control_signal(&self) -> Option<ControlSignal> {
    match self.body {
      Body::Control(signal) => Some(signal),
      Body::Value(_) => None,
    }
  }

  /// Returns the payload of a data message; `None` for control messages.
  #[must_use]
  pub fn payload(&self) -> Option<&T> {
    match &self.body {
      Body::Value(v) => Some(v),
      Body::Control(_) => None,
    }
  }

  /// Consumes the message and returns the payload of a data message.
  #[must_use]
  pub fn into_payload(self) -> Option<T> {
    match self.body {
      Body::Value(v) => Some(v),
      Body::Control(_) => None,
    }
  }

  /// Returns the header map.
  #[must_use]
  pub fn headers(&self) -> &Headers {
    &self.headers
  }

  /// Returns the header under `key`, if present.
  #[must_use]
  pub fn header(&self, key: &str) -> Option<&HeaderValue> {
    self.headers.get(key)
  }

  /// Returns a new message with one header added or replaced.
  #[must_use]
  pub fn with_header(self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
    Self {
      headers: self.headers.with(key, value),
      body: self.body,
    }
  }

  /// Returns a new message with one header removed.
  #[must_use]
  pub fn without_header(self, key: &str) -> Self {
    Self {
      headers: self.headers.without(key),
      body: self.body,
    }
  }

  /// Returns the window back-reference stamped on this message, if any.
  #[must_use]
  pub fn window_ref(&self) -> Option<&WindowRef> {
    self.header(headers::WINDOW_REF).and_then(HeaderValue::as_window)
  }

  /// Transforms the payload while carrying the header set forward unchanged.
  /// Control messages pass through untouched (the function is not called).
  #[must_use]
  pub fn map_payload<U, F>(self, f: F) -> Message<U>
  where
    F: FnOnce(T) -> U,
  {
    Message {
      body: match self.body {
        Body::Value(v) => Body::Value(f(v)),
        Body::Control(signal) => Body::Control(signal),
      },
      headers: self.headers,
    }
  }

  /// Transforms the header map, leaving the payload untouched.
  #[must_use]
  pub fn map_headers<F>(self, f: F) -> Self
  where
    F: FnOnce(Headers) -> Headers,
  {
    Self {
      body: self.body,
      headers: f(self.headers),
    }
  }

  /// Re-tags a control message with a different payload type.
  ///
  /// Returns `Ok` with the re-tagged control message, or `Err(self)` if the
  /// message carries a payload and cannot change type without mapping.
  pub fn try_recast<U>(self) -> Result<Message<U>, Message<T>> {
    match self.body {
      Body::Control(signal) => Ok(Message {
        body: Body::Control(signal),
        headers: self.headers,
      }),
      Body::Value(v) => Err(Message {
        body: Body::Value(v),
        headers: self.headers,
      }),
    }
  }
}

impl<T> From<T> for Message<T> {
  fn from(payload: T) -> Self {
    Message::new(payload)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_headers_copy_on_write() {
    let base = Headers::new().with("a", 1).with("b", "two");
    let extended = base.with("c", true);
    let shrunk = extended.without("a");

    assert_eq!(base.len(), 2);
    assert_eq!(extended.len(), 3);
    assert_eq!(shrunk.len(), 2);
    assert!(base.get("c").is_none());
    assert_eq!(extended.get("a"), Some(&HeaderValue::Integer(1)));
    assert!(!shrunk.contains("a"));
  }

  #[test]
  fn test_without_absent_key_shares() {
    let base = Headers::new().with("a", 1);
    let same = base.without("missing");
    assert_eq!(base, same);
  }

  #[test]
  fn test_message_header_conservation_through_map() {
    let msg = Message::new(21)
      .with_header("index", 3)
      .with_header("origin", "unit");
    let mapped = msg.clone().map_payload(|x| x * 2);

    assert_eq!(mapped.payload(), Some(&42));
    assert_eq!(mapped.headers(), msg.headers());
  }

  #[test]
  fn test_control_message_tagging() {
    let watermark = Message::<i32>::control(ControlSignal::Watermark, Headers::new());
    assert!(watermark.is_control());
    assert!(watermark.is_watermark());
    assert_eq!(watermark.payload(), None);
    assert_eq!(watermark.control_signal(), Some(ControlSignal::Watermark));

    let data = Message::new(1);
    assert!(!data.is_control());
  }

  #[test]
  fn test_recast_control_keeps_headers() {
    let watermark =
      Message::<i32>::control(ControlSignal::Watermark, Headers::new().with("k", 9));
    let recast: Message<String> = watermark.try_recast().expect("control recasts");
    assert!(recast.is_watermark());
    assert_eq!(recast.header("k"), Some(&HeaderValue::Integer(9)));

    let data = Message::new(5).with_header("k", 9);
    let back = data.try_recast::<String>().expect_err("data does not recast");
    assert_eq!(back.payload(), Some(&5));
  }

  #[test]
  fn test_map_payload_skips_control() {
    let watermark = Message::<i32>::control(ControlSignal::Watermark, Headers::new());
    let mapped = watermark.map_payload(|x| x + 1);
    assert!(mapped.is_watermark());
  }

  #[test]
  fn test_opaque_headers_compare_by_identity() {
    let value = Arc::new(vec![1, 2, 3]);
    let a = HeaderValue::Opaque(value.clone());
    let b = HeaderValue::Opaque(value);
    let c = HeaderValue::opaque(vec![1, 2, 3]);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.downcast_opaque::<Vec<i32>>(), Some(&vec![1, 2, 3]));
  }
}
