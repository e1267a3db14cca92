//! Storage-agnostic control loop: admission, pipeline rendering, loop
//! expansion, `next.arcs[]` routing, and quiescence/cancellation.
//! Generic over the `noetl-core` trait objects; `noetl-api` wires this
//! to `noetl-storage`'s Postgres implementations.

pub mod admission;
pub mod cancellation;
pub mod engine;
pub mod loop_expand;
pub mod render;
pub mod routing;

pub use engine::Engine;
