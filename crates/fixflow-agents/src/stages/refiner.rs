//! Image refinement side path: captions + uploaded images → refined captions.
//!
//! Uploads are resolved before any generation call, so a missing file costs
//! nothing. The streaming variant forwards chunks in generation order and
//! stops pulling from upstream as soon as nobody is listening.

use std::sync::Arc;
use std::time::Instant;

use fixflow_gateway::GenerationGateway;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PipelineError, RefineEvent, RefineRequest, RefinedCaptions, Stage};
use crate::contracts::parse_closed;
use crate::prompts::{refiner_prompt, PROMPT_VERSION};
use crate::uploads::UploadStore;

const STAGE: Stage = Stage::Refiner;

pub struct Refiner {
    gateway: Arc<dyn GenerationGateway>,
    uploads: UploadStore,
}

impl Refiner {
    pub fn new(gateway: Arc<dyn GenerationGateway>, uploads: UploadStore) -> Self {
        Self { gateway, uploads }
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    /// Single-shot refinement. The result has one caption per input caption.
    pub async fn refine(&self, request: &RefineRequest) -> Result<RefinedCaptions, PipelineError> {
        check_request(request)?;
        let images = self.uploads.load_all(&request.filenames).await?;
        let started = Instant::now();

        let prompt = refiner_prompt(&request.texts, images.len());
        debug!(stage = %STAGE, prompt_version = PROMPT_VERSION, images = images.len(), "calling vision generation");
        let raw = self
            .gateway
            .complete_with_images(&prompt, &images)
            .await
            .map_err(|e| PipelineError::from_gateway(STAGE, e))?;

        let refined: RefinedCaptions = parse_closed(STAGE, &raw)?;
        if refined.refined_texts.len() != request.texts.len() {
            return Err(PipelineError::malformed(
                STAGE,
                format!(
                    "expected {} refined texts, got {}",
                    request.texts.len(),
                    refined.refined_texts.len()
                ),
            ));
        }

        info!(
            texts = refined.refined_texts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "refinement finished"
        );
        Ok(refined)
    }

    /// Streamed refinement into `events`.
    ///
    /// Emits `Delta` per chunk then `Done`. Failures are pushed as a final
    /// `Error` event and also returned. If `events` closes or `cancel` fires,
    /// the upstream stream is dropped and `Cancelled` is returned. Returns the
    /// number of chunks forwarded.
    pub async fn refine_stream(
        &self,
        request: &RefineRequest,
        events: mpsc::Sender<RefineEvent>,
        cancel: CancellationToken,
    ) -> Result<usize, PipelineError> {
        match self.forward(request, &events, &cancel).await {
            Ok(chunks) => Ok(chunks),
            Err(PipelineError::Cancelled(reason)) => {
                debug!(%reason, "refinement stream stopped");
                Err(PipelineError::Cancelled(reason))
            }
            Err(err) => {
                warn!(error = %err, "refinement stream failed");
                // Best effort: the consumer may already be gone or stalled.
                let _ = emit(&events, &cancel, RefineEvent::Error(err.to_string())).await;
                Err(err)
            }
        }
    }

    async fn forward(
        &self,
        request: &RefineRequest,
        events: &mpsc::Sender<RefineEvent>,
        cancel: &CancellationToken,
    ) -> Result<usize, PipelineError> {
        check_request(request)?;
        let images = self.uploads.load_all(&request.filenames).await?;
        let started = Instant::now();

        let prompt = refiner_prompt(&request.texts, images.len());
        let mut upstream = self
            .gateway
            .complete_with_images_stream(&prompt, &images)
            .await
            .map_err(|e| PipelineError::from_gateway(STAGE, e))?;

        let mut chunks = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PipelineError::Cancelled("refinement cancelled by caller".into()));
                }
                _ = events.closed() => {
                    return Err(PipelineError::Cancelled("refinement consumer disconnected".into()));
                }
                item = upstream.next() => item,
            };
            match next {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    emit(events, cancel, RefineEvent::Delta(chunk)).await?;
                    chunks += 1;
                }
                Some(Err(e)) => return Err(PipelineError::from_gateway(STAGE, e)),
                None => break,
            }
        }
        drop(upstream);

        emit(events, cancel, RefineEvent::Done).await?;
        info!(
            chunks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "refinement stream finished"
        );
        Ok(chunks)
    }
}

/// Send one event, giving up as soon as `cancel` fires even when the
/// consumer is connected but not reading.
async fn emit(
    events: &mpsc::Sender<RefineEvent>,
    cancel: &CancellationToken,
    event: RefineEvent,
) -> Result<(), PipelineError> {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(PipelineError::Cancelled("refinement cancelled by caller".into()));
        }
        permit = events.reserve() => permit
            .map_err(|_| PipelineError::Cancelled("refinement consumer disconnected".into()))?,
    };
    permit.send(event);
    Ok(())
}

fn check_request(request: &RefineRequest) -> Result<(), PipelineError> {
    if request.texts.is_empty() {
        return Err(PipelineError::invalid("refine needs at least one text"));
    }
    Ok(())
}
