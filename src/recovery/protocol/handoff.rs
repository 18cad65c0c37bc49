//! Primary handoff: move write authority to a relocation target.
//!
//! Runs with new recoveries of the shard blocked. Writes are drained
//! before the primary context leaves this node, and resumed again if the
//! transfer does not complete.

use crate::observability::{log_event_with_fields, RecoveryEvent};
use crate::recovery::errors::{RecoveryError, RecoveryResult};
use crate::recovery::request::{RecoveryKind, RecoveryResponse};
use crate::recovery::session::{RecoverySession, SessionContext};
use crate::shard::LocalShard;

pub(crate) async fn run(session: &RecoverySession, ctx: &SessionContext) -> RecoveryResult<RecoveryResponse> {
    let response = RecoveryResponse::new(session.id(), RecoveryKind::PrimaryHandoff);
    let id = session.id().to_string();
    let target = session.target_allocation_id().to_string();

    session.signal().check()?;
    let gate = ctx.registry.block_new_sessions(
        session.shard_id(),
        format!("primary handoff [{}] to [{}] in progress", session.id(), session.target_allocation_id()),
    )?;

    log_event_with_fields(
        RecoveryEvent::HandoffBegin,
        &[("recovery_id", &id), ("target_allocation_id", &target)],
    );

    let result = transfer(session, ctx).await;
    gate.release();

    if result.is_ok() {
        log_event_with_fields(
            RecoveryEvent::HandoffComplete,
            &[("recovery_id", &id), ("target_allocation_id", &target)],
        );
    }
    result.map(|_| response)
}

async fn transfer(session: &RecoverySession, ctx: &SessionContext) -> RecoveryResult<()> {
    let context = session.signal().run(ctx.shard.drain_operations()).await??;
    let drained = DrainGuard::new(ctx.shard.as_ref());

    let in_flight = ctx.shard.in_flight_operations();
    if in_flight != 0 {
        return Err(RecoveryError::invariant(format!(
            "{} still has {} in-flight operations after draining for handoff",
            session.shard_id(),
            in_flight
        )));
    }

    session
        .call(session.client().hand_off_primary_context(context))
        .await?;
    ctx.shard.relocated(session.target_allocation_id())?;
    drained.disarm();
    Ok(())
}

/// Resumes writes on drop unless the handoff went through.
struct DrainGuard<'a> {
    shard: &'a dyn LocalShard,
    armed: bool,
}

impl<'a> DrainGuard<'a> {
    fn new(shard: &'a dyn LocalShard) -> Self {
        Self { shard, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shard.resume_operations();
        }
    }
}
