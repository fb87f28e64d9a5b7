/*!
 * Conversation sessions.
 *
 * This module provides:
 * - Session records and `add` command parsing
 * - The per-session state machine (upload, language confirmation,
 *   dispatch and delivery)
 * - Transcript chunking for chat delivery
 */

pub mod delivery;
pub mod machine;
pub mod models;

// Re-export main types
pub use machine::SessionStateMachine;
pub use models::{AddCommand, Session, SessionKey, Step};
