//! Full copy: data files, then the operations above them.
//!
//! Phase 1 pins a point-in-time snapshot of the shard's files and streams
//! each one in chunks through the node-wide rate limiter. Phase 2 replays
//! the operations the snapshot does not cover, then the target finalizes.

use crate::observability::{log_event_with_fields, RecoveryEvent, ShardRecoveryStats};
use crate::recovery::errors::RecoveryResult;
use crate::recovery::request::{RecoveryKind, RecoveryResponse};
use crate::recovery::session::{RecoverySession, SessionContext};
use crate::recovery::target_client::{FileChunk, FileInfo, FileManifest};
use crate::shard::StoreFile;

use super::stream_operations;

pub(crate) async fn run(
    session: &RecoverySession,
    ctx: &SessionContext,
    chunk_size: u64,
) -> RecoveryResult<RecoveryResponse> {
    let mut response = RecoveryResponse::new(session.id(), RecoveryKind::FullCopy);
    let stats = ctx.metrics.shard(session.shard_id());
    let id = session.id().to_string();

    // Phase 1: files
    session.signal().check()?;
    let snapshot = ctx.shard.data_snapshot()?;
    let manifest = FileManifest {
        files: snapshot
            .files
            .iter()
            .map(|file| FileInfo {
                name: file.name.clone(),
                length: file.len(),
            })
            .collect(),
        total_bytes: snapshot.total_bytes(),
    };

    let file_count = manifest.files.len().to_string();
    let total_bytes = manifest.total_bytes.to_string();
    log_event_with_fields(
        RecoveryEvent::Phase1Begin,
        &[("recovery_id", &id), ("files", &file_count), ("total_bytes", &total_bytes)],
    );

    session.call(session.client().receive_file_info(&manifest)).await?;
    for file in &snapshot.files {
        send_file(session, ctx, file, chunk_size, &stats, &mut response).await?;
        response.files_sent += 1;
    }

    let bytes_sent = response.bytes_sent.to_string();
    let throttled_ms = response.throttle_time.as_millis().to_string();
    log_event_with_fields(
        RecoveryEvent::Phase1Complete,
        &[("recovery_id", &id), ("bytes_sent", &bytes_sent), ("throttle_ms", &throttled_ms)],
    );

    // Phase 2: operations above the snapshot
    session.signal().check()?;
    let from_seq_no = snapshot.next_seq_no();
    let operations = ctx.shard.op_log_from(from_seq_no)?;

    let from = from_seq_no.to_string();
    log_event_with_fields(
        RecoveryEvent::Phase2Begin,
        &[("recovery_id", &id), ("starting_seq_no", &from)],
    );
    let last_op = stream_operations(session, ctx, operations, None, &mut response).await?;

    let ops_sent = response.ops_sent.to_string();
    log_event_with_fields(
        RecoveryEvent::Phase2Complete,
        &[("recovery_id", &id), ("ops_sent", &ops_sent)],
    );

    session.signal().check()?;
    let max_seq_no = last_op.or(snapshot.max_seq_no);
    session.call(session.client().finalize(max_seq_no)).await?;
    log_event_with_fields(RecoveryEvent::Finalized, &[("recovery_id", &id)]);

    Ok(response)
}

/// Send one file as chunks of at most `chunk_size` bytes. An empty file
/// still produces one (empty) last chunk.
async fn send_file(
    session: &RecoverySession,
    ctx: &SessionContext,
    file: &StoreFile,
    chunk_size: u64,
    stats: &ShardRecoveryStats,
    response: &mut RecoveryResponse,
) -> RecoveryResult<()> {
    let total = file.data.len();
    // A chunk size past the address space covers the whole file
    let chunk_size = usize::try_from(chunk_size).unwrap_or(usize::MAX);
    let mut position = 0usize;

    loop {
        session.signal().check()?;
        let end = position.saturating_add(chunk_size).min(total);
        let length = (end - position) as u64;

        let waited = session.signal().run(ctx.limiter.acquire(length)).await?;
        if !waited.is_zero() {
            stats.add_throttle_time(waited);
            response.throttle_time += waited;
        }

        let chunk = FileChunk {
            file_name: file.name.clone(),
            position: position as u64,
            data: file.data.slice(position..end),
            last_chunk: end == total,
        };
        session.call(session.client().send_chunk(chunk)).await?;

        response.chunks_sent += 1;
        response.bytes_sent += length;
        ctx.metrics.record_chunk(length);

        position = end;
        if position >= total {
            return Ok(());
        }
    }
}
