//! Civic moderation: multi-stage LLM consensus for citizen messages.

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod llm;
pub mod moderation;
pub mod safety;
pub mod store;
