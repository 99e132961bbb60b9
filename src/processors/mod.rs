//! Domain processors
//!
//! One processor per queue, each a short state machine over its companion
//! row: read inputs from the stores, call the LLM adapter where applicable,
//! write results back before the engine marks the job terminal. All
//! collaborators arrive through constructors. Processors are idempotent
//! under at-least-once delivery: a re-delivered job whose companion is
//! already terminal returns the recorded result without re-running.

pub mod ats;
pub mod generation;
pub mod optimization;
pub mod parsing;

pub use ats::AtsProcessor;
pub use generation::GenerationProcessor;
pub use optimization::OptimizationProcessor;
pub use parsing::ParsingProcessor;

use std::sync::Arc;

use crate::ai::AiClient;
use crate::queue::ProcessorRegistry;
use crate::render::DocumentRenderer;
use crate::storage::BlobStore;
use crate::store::CoreStore;
use crate::versions::VersionService;
use crate::webhooks::{DeliveryProcessor, WebhookDispatcher};

/// Build the full registry for the five queues.
pub fn build_registry(
    store: CoreStore,
    blobs: BlobStore,
    ai: AiClient,
    versions: VersionService,
    renderer: DocumentRenderer,
    dispatcher: Arc<WebhookDispatcher>,
) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(ParsingProcessor::new(
        store.clone(),
        blobs.clone(),
        ai.clone(),
        versions.clone(),
    )));
    registry.register(Arc::new(OptimizationProcessor::new(
        store.clone(),
        ai.clone(),
        versions,
    )));
    registry.register(Arc::new(AtsProcessor::new(store.clone(), ai)));
    registry.register(Arc::new(GenerationProcessor::new(
        store.clone(),
        blobs,
        renderer,
    )));
    registry.register(Arc::new(DeliveryProcessor::new(store, dispatcher)));
    registry
}
