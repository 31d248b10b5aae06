//! # Loopwright Mesh
//!
//! Persisted mailbox between workers. Messages are written to a shared
//! [`MessageStore`](loopwright_core::MessageStore) and drained by the
//! recipient in priority order; nothing is pushed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use loopwright_mesh::Coordinator;
//! use loopwright_core::{InMemoryStore, MessageType, Priority};
//!
//! let coordinator = Coordinator::new(Arc::new(InMemoryStore::new()));
//! let request = coordinator
//!     .send_message("strategy", "research", MessageType::Request, payload, Priority::High, None)
//!     .await;
//!
//! // research, on its next run
//! for message in coordinator.get_pending_messages("research", 10).await {
//!     coordinator.acknowledge_message(&message.id, Some(answer), None).await;
//! }
//!
//! let answer = coordinator.get_response(&request.id, Duration::from_secs(30)).await;
//! ```

pub mod coordinator;
pub mod handoff;

pub use coordinator::Coordinator;
