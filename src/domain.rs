pub mod commerce;
pub mod error;
pub mod id;
pub mod job;
pub mod money;
pub mod provider;
pub mod retry;
pub mod webhook;
