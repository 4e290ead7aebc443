//! Carbon-aware document summarization.
//!
//! Documents are split into chunks, each chunk is summarized by the cheapest
//! model tier the grid's carbon intensity allows, and weak summaries are
//! escalated to a larger tier. Every job ends with a carbon report comparing
//! the work done against sending everything to the largest tier.

pub mod config;
pub mod error;
pub mod llm;
pub mod mapper;
pub mod orchestrator;
pub mod rag;
pub mod reduce;
pub mod router;
pub mod services;
pub mod state_machine;
pub mod tier;

pub use error::{PipelineError, Result};
pub use orchestrator::{Collaborators, JobOrchestrator, OrchestratorSettings};
pub use rag::{RagAnswer, RagQueryEngine};
pub use reduce::CarbonReport;
pub use state_machine::{Document, JobState, JobStatus, Strategy};
pub use tier::Tier;
