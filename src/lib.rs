#![deny(missing_docs)]
//! # flowmark
//!
//! Composable message flows with copy-on-write headers, count-based
//! windowing, and pull-based fan-out.
//!
//! ## Overview
//!
//! The unit of data is a [`message::Message`]: an immutable payload plus a
//! structure-shared header map that travels with it through every stage. A
//! [`flow::Flow`] is a composable async sequence of messages offering the
//! full combinator surface (map, filter, flat-map, scan, reduce, merge,
//! concat, zip, group-by, broadcast, branch, windowing, error recovery),
//! all demand-driven: nothing upstream runs until downstream polls.
//!
//! Batching is modeled with [`window::Window`] and watermark control
//! messages that flow in-band, so a window boundary survives any chain of
//! payload transformations between the windowing stage and a window-aware
//! [`sink::WindowedSink`].
//!
//! Graph assembly is separated from data flow: a [`connector::Connector`]
//! defers upstream wiring, a [`branch::BranchBuilder`] routes by predicate
//! table, and a [`registry::Registry`] plus [`binding::PipelinePlan`]
//! resolve named [`source::Source`]s and [`sink::Sink`]s at binding time.
//!
//! ## Example
//!
//! ```rust
//! use flowmark::flow::Flow;
//! use flowmark::sink::{VecSink, WindowedSink};
//! use flowmark::window::WindowPolicy;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut sink = WindowedSink::new(VecSink::new("out"));
//! Flow::from_values(1..=5)
//!   .map_payload(|x| x * x)
//!   .window(WindowPolicy::closed_count(2).unwrap())
//!   .to(&mut sink)
//!   .await
//!   .unwrap();
//! let squares: Vec<i32> = sink
//!   .into_inner()
//!   .into_messages()
//!   .into_iter()
//!   .filter_map(|m| m.into_payload())
//!   .collect();
//! assert_eq!(squares, vec![1, 4, 9, 16, 25]);
//! # }
//! ```

pub mod binding;
pub mod branch;
pub mod connector;
pub mod error;
pub mod flow;
mod hub;
pub mod message;
pub mod registry;
pub mod sink;
pub mod source;
pub mod window;

pub use binding::{BoundPipeline, PipelinePlan, PortBinding};
pub use branch::{BranchBuilder, BranchOutputs};
pub use connector::Connector;
pub use error::{DispatchFailure, DispatchSummary, FlowError};
pub use flow::{Flow, FlowItem, GroupStream, retry};
pub use message::{ControlSignal, HeaderValue, Headers, Message};
pub use registry::{Registry, SharedSinkHandle, SharedSource, SinkFactory, SourceFactory};
pub use sink::{FoldSink, NullSink, SharedSink, Sink, VecSink, WindowedSink};
pub use source::{ChannelSource, IterSource, Source};
pub use window::{Window, WindowId, WindowPolicy, WindowRef};
