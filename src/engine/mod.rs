//! The engine: ingress pipeline, claimer, daemon loop and queue consumer.

pub mod alerting;
pub mod cache;
pub mod claimer;
pub mod consumer;
pub mod daemon;
pub mod ingress;
pub mod loop_guard;

pub use alerting::{Failure, FailureReporter};
pub use cache::TemplateCache;
pub use claimer::{Claim, Claimer};
pub use consumer::IngressConsumer;
pub use daemon::{Daemon, TickReport};
pub use ingress::{IngressOutcome, IngressPipeline};
pub use loop_guard::LoopGuard;
