//! Queue worker for the Scribe media pipeline.
//!
//! This crate provides:
//! - Job executor with heartbeats, delayed-retry promotion and stalled recovery
//! - Handlers for conversion, speech recognition, LLM marking and YouTube ingestion
//! - Signed completion/failure webhooks
//! - Queue-driven autoscaling controller

pub mod asr;
pub mod config;
pub mod conversion;
pub mod error;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod marking;
pub mod metrics;
pub mod scaler;
pub mod webhook;
pub mod youtube;

pub use asr::AsrHandler;
pub use config::{AsrConfig, FileCacheConfig, LlmConfig, ScalerConfig, WebhookConfig, WorkerConfig};
pub use conversion::{derivative_key, waveform_key, ConversionHandler};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use handler::{handler_from_env, HandlerContext, JobHandler};
pub use logging::{init_tracing, JobLogger};
pub use marking::MarkingHandler;
pub use scaler::{desired_workers, RenderClient, ScaleDecision, ScalerLock, ScalingController};
pub use webhook::WebhookClient;
pub use youtube::YoutubeHandler;
