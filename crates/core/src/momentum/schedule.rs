use crate::domain::offset::{target_offsets, OffsetKey, Weights};
use crate::domain::security::Snapshot;
use crate::momentum::error::MomentumError;
use crate::momentum::resolver::{resolve_snapshot, ResolveContext};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tokio::task::JoinSet;

/// Exactly one snapshot per offset.
pub type ResolvedSnapshots = BTreeMap<OffsetKey, Snapshot>;

/// Resolves all six offsets concurrently and waits for every one of them.
///
/// Only the reference snapshot is mandatory; lookbacks that stay unresolved are kept as
/// `Snapshot::unresolved()`.
pub async fn schedule(
    ctx: &ResolveContext,
    reference_date: NaiveDate,
    weights: &Weights,
) -> Result<ResolvedSnapshots, MomentumError> {
    let targets = target_offsets(reference_date, weights)?;

    let mut tasks = JoinSet::new();
    for target in targets {
        let ctx = ctx.clone();
        tracing::debug!(offset = %target.key, target_date = %target.target_date, weight = target.weight, "resolving offset");
        tasks.spawn(async move {
            let snapshot = resolve_snapshot(&ctx, target.target_date).await;
            (target.key, snapshot)
        });
    }

    let mut out = ResolvedSnapshots::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((key, snapshot)) => {
                out.insert(key, snapshot);
            }
            Err(err) => {
                tracing::error!(error = %err, "snapshot resolver task failed");
            }
        }
    }

    for key in OffsetKey::ALL {
        out.entry(key).or_insert_with(Snapshot::unresolved);
    }

    let reference_resolved = out
        .get(&OffsetKey::T)
        .is_some_and(Snapshot::is_resolved);
    if !reference_resolved {
        return Err(MomentumError::ReferenceDateUnresolved {
            reference_date,
            attempts: ctx.options.max_back_steps,
        });
    }

    Ok(out)
}
