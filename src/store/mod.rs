//! Persistence: template reads and the moderation audit log.

pub mod audit;
pub mod migrations;
pub mod templates;

pub use audit::{AuditLog, LibSqlAuditLog, ModerationRecord};
pub use templates::{InMemoryTemplateStore, Template, TemplateStore, UserProfile};
