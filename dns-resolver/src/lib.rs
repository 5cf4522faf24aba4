#![warn(clippy::pedantic)]
// Sometimes a redundant else is clearer
#![allow(clippy::redundant_else)]
// Don't care enough to fix
#![allow(clippy::match_same_arms)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::wildcard_imports)]

//! Iterative DNS resolution: delegation walk, CNAME chasing, a dual-quota
//! response cache, an optional side-car cache daemon, and the UDP/TCP/TLS
//! transports that carry queries on the wire.

pub mod cache;
pub mod daemon_client;
pub mod engine;
pub mod transport;

pub use engine::{Engine, ResolutionError, ResolveResult};
