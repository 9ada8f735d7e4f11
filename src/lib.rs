//! Booster: a local proxy that multiplexes outbound TCP connections
//! across multiple network egress interfaces.
//!
//! Clients speak SOCKS5 or HTTP to the front-ends in [`proxy`]; every
//! dial is routed through the source subsystem in [`core::source`],
//! which discovers usable interfaces, applies admission policies and
//! balances targets across the survivors. [`api`] exposes read-only
//! snapshots and policy mutations over HTTP.

pub mod api;
pub mod core;
pub mod events;
pub mod logging;
pub mod proxy;

pub use crate::core::error::DialError;
pub use crate::core::source::{Balancer, Dialer, Listener, SourceStore};
