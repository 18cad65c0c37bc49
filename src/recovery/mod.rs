//! Source-side shard recovery
//!
//! Serves recovery requests from nodes building a new copy of a shard
//! hosted here.
//!
//! # Components
//!
//! - `RecoveryCoordinator`: validates requests, registers and runs sessions
//! - `SessionRegistry`: active sessions per shard, admission blocking,
//!   bulk cancellation
//! - `RecoverySession`: one recovery attempt, running one of three
//!   protocols (full copy, incremental ops, primary handoff)
//! - `RecoveryTargetClient`: RPC facade to the recovering copy
//!
//! # Guarantees
//!
//! - A session is active in the registry from admission until it reaches
//!   a terminal state
//! - While new sessions of a shard are blocked, no session of that shard
//!   is admitted
//! - Operations reach the target in strictly increasing sequence order
//! - A shard's per-shard "current as source" counter equals the number of
//!   its active sessions
//!
//! # Retry signalling
//!
//! A request that cannot proceed yet for a reason that may resolve on its
//! own answers `RecoveryOutcome::Delayed`. It is a normal result, not an
//! error, and the issuer retries the whole request.

mod cancellation;
mod config;
mod coordinator;
mod errors;
mod protocol;
mod registry;
mod request;
mod session;
mod target_client;
mod throttle;

pub use cancellation::CancellationSignal;
pub use config::RecoverySettings;
pub use coordinator::RecoveryCoordinator;
pub use errors::{CancellationFailure, CancellationFailures, RecoveryError, RecoveryResult};
pub use registry::{Admission, BlockGuard, SessionRegistry};
pub use request::{
    RecoveryId, RecoveryKind, RecoveryOutcome, RecoveryParams, RecoveryRequest, RecoveryResponse,
};
pub use session::{RecoverySession, SessionContext, SessionState};
pub use target_client::{
    ClientError, ClientResult, FileChunk, FileInfo, FileManifest, OpBatch, RecoveryTargetClient,
    TargetClientFactory,
};
pub use throttle::RateLimiter;
