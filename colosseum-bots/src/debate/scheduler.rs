//! Background turn loop, one per session.

use std::sync::Arc;

use super::{Session, Stage, TurnOutcome};

/// Sleep one cadence, advance one turn, repeat until the session stops.
pub async fn run_turns(session: Arc<Session>, stage: Arc<Stage>) {
    let key = session.key();
    tracing::info!(session = %key, topic = %session.topic_title(), "Turn loop started");
    loop {
        tokio::select! {
            biased;
            _ = session.cancellation().cancelled() => break,
            _ = tokio::time::sleep(stage.config.cadence) => {}
        }
        match session.advance(&stage).await {
            Ok(TurnOutcome::Inactive) | Ok(TurnOutcome::Cancelled) => break,
            Ok(_) => {}
            Err(e) => tracing::warn!(session = %key, error = %e, "Turn failed"),
        }
    }
    tracing::info!(session = %key, "Turn loop stopped");
}
