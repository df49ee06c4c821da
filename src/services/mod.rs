pub mod accounts;
pub mod dispatcher;
pub mod enhancer;
pub mod job_store;
pub mod notify;
pub mod orchestrator;
pub mod progress;
pub mod prompt;
pub mod provider;
pub mod queue;
pub mod webhook;
