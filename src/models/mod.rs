pub mod generation;
pub mod job;
pub mod user;
pub mod webhook;
