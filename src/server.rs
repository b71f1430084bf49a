// src/server.rs

use std::pin::Pin;

use tokio::sync::broadcast;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::{info, warn};
use uuid::Uuid;

use crate::orchestrator::{Orchestrator, TriggerDecision};
use crate::pipeline::Build;

pub mod slipway_pipeline {
    tonic::include_proto!("slipway.pipeline.v1");
}

use slipway_pipeline::pipeline_agent_server::PipelineAgent;
use slipway_pipeline::{
    AbortAck, BuildHandle, BuildOutcome, BuildRef, PushNotification, StageRecord,
    StartBuildRequest, StatusReply, TriggerAck, WatchRequest,
};

fn parse_build_id(raw: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw).map_err(|_| Status::invalid_argument("build_id must be a UUID"))
}

fn stage_records(build: &Build) -> Vec<StageRecord> {
    build
        .stage_log
        .iter()
        .map(|record| StageRecord {
            stage: record.stage.to_string(),
            state: record.state.to_string(),
            detail: record.detail.clone().unwrap_or_default(),
        })
        .collect()
}

fn timestamp(at: chrono::DateTime<chrono::Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

fn build_outcome(build: &Build) -> BuildOutcome {
    BuildOutcome {
        build_id: build.id.to_string(),
        revision: build.revision.clone(),
        status: build.status.to_string(),
        stage_log: stage_records(build),
        started_at: build.started_at.map(timestamp),
        finished_at: build.finished_at.map(timestamp),
    }
}

pub struct PipelineAgentService {
    orchestrator: Orchestrator,
}

impl PipelineAgentService {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[tonic::async_trait]
impl PipelineAgent for PipelineAgentService {
    async fn notify_push(
        &self,
        request: Request<PushNotification>,
    ) -> Result<Response<TriggerAck>, Status> {
        let req = request.into_inner();
        match self
            .orchestrator
            .submit_push(&req.repository_id, &req.revision, &req.git_ref)
            .await
        {
            Ok(TriggerDecision::Enqueued(build_id)) => Ok(Response::new(TriggerAck {
                accepted: true,
                build_id: build_id.to_string(),
                reason: String::new(),
            })),
            Ok(TriggerDecision::Coalesced(build_id)) => Ok(Response::new(TriggerAck {
                accepted: true,
                build_id: build_id.to_string(),
                reason: "coalesced into existing build".to_string(),
            })),
            // A rejection is a dropped notification, not an RPC failure.
            Err(rejection) => {
                info!(reason = %rejection, "trigger rejected");
                Ok(Response::new(TriggerAck {
                    accepted: false,
                    build_id: String::new(),
                    reason: rejection.to_string(),
                }))
            }
        }
    }

    async fn start_build(
        &self,
        request: Request<StartBuildRequest>,
    ) -> Result<Response<BuildHandle>, Status> {
        let req = request.into_inner();
        let (TriggerDecision::Enqueued(build_id) | TriggerDecision::Coalesced(build_id)) = self
            .orchestrator
            .start_manual(&req.revision)
            .await
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        Ok(Response::new(BuildHandle {
            build_id: build_id.to_string(),
        }))
    }

    async fn abort_build(&self, request: Request<BuildRef>) -> Result<Response<AbortAck>, Status> {
        let build_id = parse_build_id(&request.into_inner().build_id)?;
        match self.orchestrator.abort(build_id).await {
            Ok(true) => Ok(Response::new(AbortAck {
                aborted: true,
                reason: String::new(),
            })),
            Ok(false) => Ok(Response::new(AbortAck {
                aborted: false,
                reason: "build already terminal".to_string(),
            })),
            Err(e) => Err(Status::not_found(e)),
        }
    }

    async fn build_status(
        &self,
        request: Request<BuildRef>,
    ) -> Result<Response<StatusReply>, Status> {
        let build_id = parse_build_id(&request.into_inner().build_id)?;
        let build = self
            .orchestrator
            .status(build_id)
            .await
            .ok_or_else(|| Status::not_found(format!("unknown build {}", build_id)))?;

        Ok(Response::new(StatusReply {
            build_id: build.id.to_string(),
            status: build.status.to_string(),
            current_stage: build
                .current_stage()
                .map(|s| s.to_string())
                .unwrap_or_default(),
            stage_log: stage_records(&build),
        }))
    }

    type WatchOutcomesStream = Pin<Box<dyn Stream<Item = Result<BuildOutcome, Status>> + Send>>;

    async fn watch_outcomes(
        &self,
        _request: Request<WatchRequest>,
    ) -> Result<Response<Self::WatchOutcomesStream>, Status> {
        let mut outcomes = self.orchestrator.subscribe();
        let stream = async_stream::stream! {
            loop {
                match outcomes.recv().await {
                    Ok(build) => yield Ok(build_outcome(&build)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "outcome watcher lagged; continuing");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Response::new(Box::pin(stream)))
    }
}
