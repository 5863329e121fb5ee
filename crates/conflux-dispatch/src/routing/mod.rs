//! Backend routing for dispatch.
//!
//! A routing strategy picks a preferred backend for a request before
//! trimming and dispatch. A fallback chain lists the backends tried, in
//! order, when earlier ones fail.

pub mod fallback;
pub mod strategies;

pub use fallback::FallbackChain;
pub use strategies::{FitToBudgetRouter, KeywordRouter, RoutingStrategy};

#[cfg(test)]
mod tests;
