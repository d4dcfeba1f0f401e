//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Transient failure (e.g. envoy log pipe read error):
//!     → backoff.rs (next delay, jittered)
//!     → caller sleeps and retries
//!     → success resets the sequence
//! ```
//!
//! # Design Decisions
//! - Backoff is unbounded; the caller owns the stop condition
//! - Jitter avoids lockstep retries across streams

pub mod backoff;
