//! Incremental recovery: replay the op log from a sequence number.

use crate::observability::{log_event_with_fields, RecoveryEvent};
use crate::recovery::errors::RecoveryResult;
use crate::recovery::request::{RecoveryKind, RecoveryResponse};
use crate::recovery::session::{RecoverySession, SessionContext};

use super::stream_operations;

/// Send every retained operation with `seq_no >= starting_seq_no`, then
/// finalize.
///
/// A starting point the log no longer holds, or one past its end, fails
/// the session with a protocol error.
pub(crate) async fn run(
    session: &RecoverySession,
    ctx: &SessionContext,
    starting_seq_no: u64,
) -> RecoveryResult<RecoveryResponse> {
    let mut response = RecoveryResponse::new(session.id(), RecoveryKind::IncrementalOps);
    let id = session.id().to_string();

    session.signal().check()?;
    let operations = ctx.shard.op_log_from(starting_seq_no)?;

    let start = starting_seq_no.to_string();
    let count = operations.len().to_string();
    log_event_with_fields(
        RecoveryEvent::Phase2Begin,
        &[("recovery_id", &id), ("starting_seq_no", &start), ("operations", &count)],
    );

    let max_seq_no = stream_operations(session, ctx, operations, Some(starting_seq_no), &mut response).await?;

    let sent = response.ops_sent.to_string();
    log_event_with_fields(
        RecoveryEvent::Phase2Complete,
        &[("recovery_id", &id), ("ops_sent", &sent)],
    );

    session.signal().check()?;
    session.call(session.client().finalize(max_seq_no)).await?;
    log_event_with_fields(RecoveryEvent::Finalized, &[("recovery_id", &id)]);

    Ok(response)
}
