//! Maestro Core
//!
//! Domain models, storage contracts and the orchestration engine of the
//! Maestro task orchestration server. Every other crate depends on the
//! types and trait interfaces defined here.
//!
//! # Architecture
//!
//! - [`models`] - Domain entities (Task, Workspace, Lock, …)
//! - [`error`] - Error kinds and result handling
//! - [`store`] - Persistence trait family implemented by the database crate
//! - [`graph`] - In-memory dependency DAG with cycle-free admission
//! - [`queue`] - Priority task queue binding graph and store
//! - [`locks`] - Leased lock manager with scoped acquisition
//! - [`publisher`] - Durable event log plus bounded fan-out
//! - [`hub`] - Project-scoped WebSocket fan-out table
//! - [`notifier`] / [`adapters`] - Webhook delivery
//! - [`workspaces`] / [`projects`] - Membership-enforced tenancy CRUD
//!
//! Lifecycle-owned components are wired together by a composition root at
//! startup; nothing in this crate holds global state.

pub mod adapters;
pub mod error;
pub mod graph;
pub mod hub;
pub mod locks;
pub mod models;
pub mod notifier;
pub mod projects;
pub mod publisher;
pub mod queue;
pub mod store;
pub mod workspaces;

// Re-export the types most callers need at the crate root.
pub use error::{Error, Result};
pub use graph::DependencyGraph;
pub use hub::{ConnectionId, ProjectHub};
pub use locks::{AcquireOptions, LockGuard, LockManager};
pub use models::{
    EventType, JsonMap, Lock, NewTask, Principal, Project, ProjectStatus, Task, TaskEvent,
    TaskStatus, User, UserRole, Webhook, WebhookService, Workspace, WorkspaceMember,
};
pub use notifier::{NotifyOutcome, WebhookNotifier};
pub use projects::ProjectManager;
pub use publisher::{EventContext, EventPublisher};
pub use queue::{QueueConfig, TaskQueue};
pub use store::Store;
pub use workspaces::WorkspaceManager;

/// Current version of the core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
