//! Outbound job queue.
//!
//! Handlers enqueue [`OutboundJob`]s and return; a worker drains the queue
//! and delivers each job on its own task with the client's timeout, at most
//! `max_in_flight` at once. Failures are logged and recorded in the activity
//! log. Nothing is retried and no local state is rolled back.

use mip_federation::{
    ActivityEvent, ApprovalNotice, Endorsement, MipNode, OutboundJob, ReasonNotice, RestoreNotice,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::client::{ClientError, MipClient};
use crate::AppState;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("no public key on file for {0}")]
    NoPublicKey(String),
    #[error("failed to issue endorsement: {0}")]
    Endorsement(#[from] mip_identity::CryptoError),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Hands jobs to the worker without waiting. A full or closed queue drops
/// the job.
pub fn enqueue(state: &AppState, jobs: Vec<OutboundJob>) {
    for job in jobs {
        let kind = job.kind();
        let organization = job.peer().organization.clone();
        let reason = match state.outbound.try_send(job) {
            Ok(()) => continue,
            Err(TrySendError::Full(_)) => "outbound queue full",
            Err(TrySendError::Closed(_)) => "outbound worker stopped",
        };
        tracing::warn!(job = kind, %organization, reason, "dropping outbound job");
        record(
            &state.node,
            ActivityEvent::DeliveryFailed {
                job: kind.to_string(),
                organization,
                error: reason.to_string(),
            },
        );
    }
}

/// Drains the queue until every sender is dropped, then waits for the
/// deliveries still in flight.
pub async fn run_outbound_worker(
    node: Arc<MipNode>,
    client: MipClient,
    mut jobs: mpsc::Receiver<OutboundJob>,
    max_in_flight: usize,
) {
    tracing::info!(max_in_flight, "outbound worker started");
    let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut in_flight = JoinSet::new();

    while let Some(job) = jobs.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        while let Some(finished) = in_flight.try_join_next() {
            log_join_error(finished);
        }
        let node = node.clone();
        let client = client.clone();
        in_flight.spawn(async move {
            let _permit = permit;
            deliver_and_record(&node, &client, job).await;
        });
    }

    while let Some(finished) = in_flight.join_next().await {
        log_join_error(finished);
    }
    tracing::info!("outbound worker stopped");
}

async fn deliver_and_record(node: &Arc<MipNode>, client: &MipClient, job: OutboundJob) {
    let kind = job.kind();
    let organization = job.peer().organization.clone();
    let mip_identifier = job.peer().mip_identifier.clone();

    match deliver(node, client, job).await {
        Ok(()) => {
            tracing::debug!(job = kind, %organization, %mip_identifier, "delivered outbound job");
        }
        Err(e) => {
            tracing::warn!(
                job = kind,
                %organization,
                %mip_identifier,
                error = %e,
                "outbound delivery failed"
            );
            record(
                node,
                ActivityEvent::DeliveryFailed {
                    job: kind.to_string(),
                    organization,
                    error: e.to_string(),
                },
            );
        }
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "outbound delivery task failed");
    }
}

async fn deliver(
    node: &Arc<MipNode>,
    client: &MipClient,
    job: OutboundJob,
) -> Result<(), DeliveryError> {
    let own_id = Some(node.identity().mip_identifier().to_string());
    match job {
        OutboundJob::SendEndorsement { peer } => {
            let key = peer
                .public_key
                .clone()
                .ok_or_else(|| DeliveryError::NoPublicKey(peer.mip_identifier.clone()))?;
            let identity = node.identity().clone();
            let endorsed = peer.mip_identifier.clone();
            let endorsement = tokio::task::spawn_blocking(move || {
                Endorsement::issue(&identity, &endorsed, &key)
            })
            .await??;
            client.send_endorsement(&peer, &endorsement.to_payload()).await?;
            record(
                node,
                ActivityEvent::EndorsementSent {
                    organization: peer.organization.clone(),
                },
            );
        }
        OutboundJob::NotifyApproved {
            peer,
            profile,
            daily_rate_limit,
        } => {
            let notice = ApprovalNotice {
                node_profile: Some(profile),
                daily_rate_limit: Some(daily_rate_limit),
            };
            client.notify_approved(&peer, &notice).await?;
        }
        OutboundJob::NotifyDeclined { peer, reason } => {
            let notice = ReasonNotice {
                mip_identifier: own_id,
                reason,
            };
            client.notify_declined(&peer, &notice).await?;
        }
        OutboundJob::NotifyRevoked { peer, reason } => {
            let notice = ReasonNotice {
                mip_identifier: own_id,
                reason,
            };
            client.notify_revoked(&peer, &notice).await?;
        }
        OutboundJob::NotifyRestored { peer } => {
            let notice = RestoreNotice { mip_identifier: own_id };
            client.notify_restored(&peer, &notice).await?;
        }
        OutboundJob::SendSearch { peer, request } => {
            let ack = client.send_search(&peer, &request).await?;
            tracing::debug!(
                shared_identifier = %ack.shared_identifier,
                status = %ack.status,
                "search accepted by peer"
            );
        }
        OutboundJob::SendSearchReply { peer, reply } => {
            client.send_search_reply(&peer, &reply).await?;
        }
        OutboundJob::SendCogsRequest { peer, request } => {
            let ack = client.send_cogs_request(&peer, &request).await?;
            tracing::debug!(
                shared_identifier = %ack.shared_identifier,
                status = %ack.status,
                "COGS request accepted by peer"
            );
        }
        OutboundJob::SendCogsReply { peer, reply } => {
            client.send_cogs_reply(&peer, &reply).await?;
        }
    }
    Ok(())
}

fn record(node: &MipNode, event: ActivityEvent) {
    if let Err(e) = node.record_activity(event) {
        tracing::error!(error = %e, "failed to record activity");
    }
}
