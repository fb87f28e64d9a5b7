/*!
 * Conversation routing.
 *
 * The router owns the live session map. For every inbound message it
 * applies the password gate, decides which session the message belongs
 * to and runs that session's next step on its own task. Steps of one
 * session run strictly in arrival order; different sessions run
 * concurrently. A failing or panicking step is answered with an internal
 * error reply and never takes the router down.
 */

use anyhow::Result;
use futures::FutureExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::auth::{AllowList, LOCKED_MESSAGE, WELCOME_MESSAGE};
use crate::session::models::is_add_command;
use crate::session::{Session, SessionKey, SessionStateMachine};
use crate::transport::{InboundMessage, Transport, UserId};

pub const INTERNAL_ERROR_MESSAGE: &str = "❌ Internal error occurred, check logs for details.";

// Pause before polling again after the transport failed to receive
const RECEIVE_BACKOFF: Duration = Duration::from_secs(5);

/// Live sessions and the per-session turn queue
#[derive(Debug, Default)]
pub struct SessionMap {
    inner: Mutex<SessionMapInner>,
}

#[derive(Debug, Default)]
struct SessionMapInner {
    sessions: HashMap<SessionKey, Session>,
    // Latest session announced with `add`, per user
    latest: HashMap<UserId, String>,
    // Completion signal of the last queued step, per session
    turns: HashMap<SessionKey, (u64, oneshot::Receiver<()>)>,
    next_ticket: u64,
}

/// A queued step: wait for `previous`, then run, then drop `done`
struct Turn {
    key: SessionKey,
    ticket: u64,
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the session `message` belongs to and queue a step for it
    fn route(&self, message: &InboundMessage) -> Turn {
        let mut inner = self.inner.lock();
        let user = message.user_id;

        let session_id = if !message.has_media() && is_add_command(message.trimmed_text()) {
            let session_id = Uuid::new_v4().to_string();
            if let Some(previous) = inner.latest.insert(user, session_id.clone()) {
                let previous = SessionKey::new(user, previous);
                if !inner.turns.contains_key(&previous) {
                    inner.sessions.remove(&previous);
                }
            }
            session_id
        } else if message.has_media() {
            inner
                .latest
                .remove(&user)
                .unwrap_or_else(|| Uuid::new_v4().to_string())
        } else {
            match inner.latest.get(&user) {
                Some(latest) => latest.clone(),
                None => Uuid::new_v4().to_string(),
            }
        };

        let key = SessionKey::new(user, session_id);
        let (done, rx) = oneshot::channel();
        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        let previous = inner.turns.insert(key.clone(), (ticket, rx)).map(|(_, rx)| rx);
        Turn {
            key,
            ticket,
            previous,
            done,
        }
    }

    /// Take the session out of the map, or start a fresh one
    fn take(&self, key: &SessionKey) -> Session {
        self.inner
            .lock()
            .sessions
            .remove(key)
            .unwrap_or_else(|| Session::new(key.clone()))
    }

    /// End a turn, keeping `session` if anything can still reach it
    fn finish(&self, key: &SessionKey, ticket: u64, session: Option<Session>) {
        let mut inner = self.inner.lock();
        let queued_after = match inner.turns.get(key) {
            Some((last, _)) if *last == ticket => {
                inner.turns.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        };

        if let Some(session) = session {
            let is_latest = inner.latest.get(&key.user_id) == Some(&key.session_id);
            if !session.is_terminal() && (is_latest || queued_after) {
                inner.sessions.insert(key.clone(), session);
            } else {
                debug!("Session {} is no longer reachable, dropping it", key);
            }
        }
    }

    /// Number of sessions waiting for input
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a stored session
    pub fn get(&self, key: &SessionKey) -> Option<Session> {
        self.inner.lock().sessions.get(key).cloned()
    }

    /// The user's latest announced session, if still pending an upload
    pub fn latest(&self, user: UserId) -> Option<SessionKey> {
        self.inner
            .lock()
            .latest
            .get(&user)
            .map(|id| SessionKey::new(user, id.clone()))
    }
}

/// Entry point of the conversation layer
pub struct ConversationRouter {
    transport: Arc<dyn Transport>,
    machine: Arc<SessionStateMachine>,
    allow_list: Arc<AllowList>,
    sessions: Arc<SessionMap>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl ConversationRouter {
    pub fn new(
        transport: Arc<dyn Transport>,
        machine: Arc<SessionStateMachine>,
        allow_list: Arc<AllowList>,
    ) -> Self {
        Self {
            transport,
            machine,
            allow_list,
            sessions: Arc::new(SessionMap::new()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the router and cancels running sessions
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    /// Receive and route messages until the transport closes or shutdown
    /// is requested, then wait for running sessions to end
    pub async fn run(&self) -> Result<()> {
        info!("Bot running. To start: type 'add <speakers> <language>' or just 'add <speakers>', then upload audio.");
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = self.transport.next_message() => next,
            };

            match next {
                Ok(Some(message)) => self.handle(message).await,
                Ok(None) => {
                    info!("Transport closed, no more messages");
                    break;
                }
                Err(e) => {
                    warn!("Failed to receive messages: {}", e);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                    }
                }
            }
        }

        self.tracker.close();
        if !self.tracker.is_empty() {
            info!("Waiting for {} running session task(s)", self.tracker.len());
        }
        self.tracker.wait().await;
        Ok(())
    }

    /// Route one message
    pub async fn handle(&self, message: InboundMessage) {
        let user = message.user_id;
        debug!(
            "Received message {} from user {}, text: {:?}, media: {}",
            message.message_id,
            user,
            message.text,
            message.has_media()
        );

        if !self.allow_list.is_allowed(user) {
            let reply = if self.allow_list.check_password(message.trimmed_text()) {
                self.allow_list.admit(user);
                WELCOME_MESSAGE
            } else {
                LOCKED_MESSAGE
            };
            if let Err(e) = self.transport.send_text(&message, reply).await {
                warn!("Failed to answer user {}: {}", user, e);
            }
            return;
        }

        let turn = self.sessions.route(&message);
        debug!("Message {} routed to session {}", message.message_id, turn.key);

        let transport = self.transport.clone();
        let machine = self.machine.clone();
        let sessions = self.sessions.clone();
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            let Turn {
                key,
                ticket,
                previous,
                done,
            } = turn;

            if let Some(previous) = previous {
                let _ = previous.await;
            }

            let session = sessions.take(&key);
            let step = AssertUnwindSafe(machine.advance(session, &message)).catch_unwind();
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Session {} cancelled by shutdown", key);
                    None
                }
                outcome = step => Some(outcome),
            };

            let kept = match outcome {
                Some(Ok(Ok(session))) => session,
                Some(Ok(Err(e))) => {
                    error!("Exception for session {}: {:#}", key, e);
                    reply_internal_error(transport.as_ref(), &message).await;
                    None
                }
                Some(Err(panic)) => {
                    error!("Session {} panicked: {}", key, panic_message(panic.as_ref()));
                    reply_internal_error(transport.as_ref(), &message).await;
                    None
                }
                None => None,
            };

            sessions.finish(&key, ticket, kept);
            drop(done);
        });
    }
}

async fn reply_internal_error(transport: &dyn Transport, message: &InboundMessage) {
    if let Err(e) = transport.send_text(message, INTERNAL_ERROR_MESSAGE).await {
        warn!("Failed to report internal error to user {}: {}", message.user_id, e);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
