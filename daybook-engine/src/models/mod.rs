//! Data models for daybook-engine

pub mod atom;
pub mod category;
pub mod classify;
pub mod run;

pub use atom::{compute_stable_id, ImportBatch, MessageAtom, NewAtom, NewLabel, PromptVersion};
pub use category::Category;
pub use classify::{ClassifyCounters, ClassifyMode, ClassifyRequest, ClassifyRun, ClassifyStatus};
pub use run::{
    CancelResult, FilterMode, FilterProfile, Job, JobStatus, LabelSpec, Output, PromptVersionIds,
    ResetJobResult, ResumeResult, Run, RunConfig, RunStatus, TickResult, SUMMARIZE_STAGE,
};
