//! Recovery protocols
//!
//! One module per recovery kind. Each entry point takes the session and
//! its context and drives the target client to completion:
//!
//! - `full_copy`: file phase, then the op-log tail above the copied files
//! - `ops_replay`: op log from a requested sequence number
//! - `handoff`: primary context transfer under the shard's admission gate
//!
//! Every await on the target goes through the session's cancellation
//! signal, so a cancel interrupts the protocol at its next suspension.

pub(crate) mod full_copy;
pub(crate) mod handoff;
pub(crate) mod ops_replay;

use super::errors::{RecoveryError, RecoveryResult};
use super::request::RecoveryResponse;
use super::session::{RecoverySession, SessionContext};
use super::target_client::OpBatch;
use crate::shard::Operation;
use std::mem;

/// Stream `operations` to the target in size-bounded batches.
///
/// Sequence numbers must be strictly increasing. When `expected_start` is
/// given, the first operation must carry exactly that sequence number.
/// Returns the highest sequence number sent.
pub(crate) async fn stream_operations(
    session: &RecoverySession,
    ctx: &SessionContext,
    operations: Vec<Operation>,
    expected_start: Option<u64>,
    response: &mut RecoveryResponse,
) -> RecoveryResult<Option<u64>> {
    if let (Some(expected), Some(first)) = (expected_start, operations.first()) {
        if first.seq_no != expected {
            return Err(RecoveryError::Protocol(format!(
                "operation log of {} has no entry for seq_no {}, first available is {}",
                session.shard_id(),
                expected,
                first.seq_no
            )));
        }
    }

    let mut last_sent: Option<u64> = None;
    let mut batch = Vec::new();
    let mut batch_bytes = 0u64;

    for operation in operations {
        if let Some(previous) = last_sent {
            if operation.seq_no <= previous {
                return Err(RecoveryError::invariant(format!(
                    "operation log of {} is out of order: seq_no {} follows {}",
                    session.shard_id(),
                    operation.seq_no,
                    previous
                )));
            }
        }
        last_sent = Some(operation.seq_no);
        batch_bytes += operation.estimate_size();
        batch.push(operation);

        if batch_bytes >= ctx.settings.ops_batch_size_bytes {
            send_batch(session, ctx, mem::take(&mut batch), response).await?;
            batch_bytes = 0;
        }
    }

    if !batch.is_empty() {
        send_batch(session, ctx, batch, response).await?;
    }

    Ok(last_sent)
}

async fn send_batch(
    session: &RecoverySession,
    ctx: &SessionContext,
    operations: Vec<Operation>,
    response: &mut RecoveryResponse,
) -> RecoveryResult<()> {
    session.signal().check()?;
    let count = operations.len() as u64;
    session
        .call(session.client().send_ops(OpBatch { operations }))
        .await?;
    response.ops_sent += count;
    ctx.metrics.add_ops_sent(count);
    Ok(())
}
