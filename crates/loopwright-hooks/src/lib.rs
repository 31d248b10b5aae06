//! # Loopwright Hooks
//!
//! Human-in-the-loop decision points. A worker calls
//! [`HookRegistry::check_hook`] before a sensitive step; depending on the
//! per-hook-type [`HookConfig`] it either continues or receives
//! [`HookDecision::Pause`] with the id of a persisted approval, which a
//! human resolves through [`HookRegistry::approve`] or
//! [`HookRegistry::reject`].
//!
//! Waiting never fails the caller: an approval nobody answers expires and
//! the wait resolves to [`HookDecision::Continue`].

pub mod error;
pub mod notify;
pub mod registry;

pub use error::{HookError, HookResult};
pub use loopwright_core::{HookConfig, HookType, HooksConfig};
pub use notify::{ApprovalNotice, LogChannel, NotificationChannel};
pub use registry::{HookDecision, HookRegistry, HookRequest, SYSTEM_RESOLVER};
