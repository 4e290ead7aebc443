mod job;
mod state;

pub use job::{
    Chunk, ChunkResult, Document, DocumentSummary, Job, JobFailure, JobStatus, Strategy,
};
pub use state::{JobState, StateMachine, Transition};
