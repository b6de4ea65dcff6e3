//! Per-connection session state machine.
//!
//! Each WebSocket connection gets one [`ConnectionSession`] running on its
//! own tokio task, draining an unbounded mpsc queue of [`ClientEvent`]s
//! strictly FIFO. That single-worker queue is what guarantees the core
//! ordering invariant: the Nth user turn is persisted and answered before
//! the (N+1)th is started. Different sessions share nothing mutable
//! beyond the durable store.
//!
//! Dropping the inbound sender (transport close) lets an in-flight turn
//! complete -- the assistant reply is still durably recorded -- but its
//! emission to the closed connection is silently dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pumplink_types::conversation::{ASSISTANT_AUTHOR, Conversation};
use pumplink_types::error::RepositoryError;
use pumplink_types::event::{ClientEvent, ServerEvent};
use pumplink_types::identity::UserIdentity;

use crate::context;
use crate::relay::InferenceRelay;
use crate::repository::ConversationRepository;

/// Lifecycle state of one connection.
///
/// `Connecting` covers the window between transport accept and identity
/// verification; the gateway only spawns session workers for verified
/// identities, so a worker normally starts life in `Authenticated` and
/// moves to `Bound` on its first chat event (conversations are created
/// lazily). `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Bound(Uuid),
    Closed,
}

/// Caller-enforced bounds on history reads.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Messages rendered into one inference prompt.
    pub context_messages: i64,
    /// Messages returned by a `load_history` request.
    pub history_messages: i64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            context_messages: 20,
            history_messages: 500,
        }
    }
}

/// Cheap handle to a running session worker, held by the gateway registry.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub user_id: String,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl SessionHandle {
    /// Queue an event for FIFO processing. Returns `false` once the
    /// worker has stopped.
    pub fn submit(&self, event: ClientEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// State machine binding one transport connection to a user and an
/// active conversation. The unit of concurrency in the gateway.
pub struct ConnectionSession<R, I> {
    id: Uuid,
    user: UserIdentity,
    repo: Arc<R>,
    relay: Arc<I>,
    limits: SessionLimits,
    state: ConnectionState,
    /// Set while a turn is being processed, cleared on completion or
    /// persistence failure. The FIFO queue serializes turns, so this is
    /// an invariant marker rather than a lock.
    pending: bool,
    outbound: mpsc::UnboundedSender<ServerEvent>,
}

/// Spawn a session worker for a verified identity.
///
/// Returns the handle used to queue inbound events; replies flow through
/// `outbound`. The worker exits when the handle (and its clones) drop.
pub fn spawn_session<R, I>(
    user: UserIdentity,
    repo: Arc<R>,
    relay: Arc<I>,
    limits: SessionLimits,
    outbound: mpsc::UnboundedSender<ServerEvent>,
) -> SessionHandle
where
    R: ConversationRepository + 'static,
    I: InferenceRelay + 'static,
{
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session_id = Uuid::now_v7();
    let user_id = user.user_id.clone();

    let session = ConnectionSession {
        id: session_id,
        user,
        repo,
        relay,
        limits,
        state: ConnectionState::Connecting,
        pending: false,
        outbound,
    };
    tokio::spawn(session.run(events_rx));

    SessionHandle {
        session_id,
        user_id,
        events: events_tx,
    }
}

impl<R, I> ConnectionSession<R, I>
where
    R: ConversationRepository,
    I: InferenceRelay,
{
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ClientEvent>) {
        // The gateway verifies the credential before spawning a worker.
        self.state = ConnectionState::Authenticated;
        info!(session_id = %self.id, user_id = %self.user.user_id, "Session started");

        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
            if self.state == ConnectionState::Closed {
                break;
            }
        }

        self.state = ConnectionState::Closed;
        debug!(session_id = %self.id, "Session worker stopped");
    }

    async fn handle_event(&mut self, event: ClientEvent) {
        match self.state {
            ConnectionState::Connecting => {
                self.emit(ServerEvent::Error {
                    message: "connection is not authenticated".to_string(),
                });
            }
            ConnectionState::Closed => {}
            ConnectionState::Authenticated | ConnectionState::Bound(_) => match event {
                ClientEvent::Message {
                    text,
                    conversation_id,
                } => self.handle_message(text, conversation_id).await,
                ClientEvent::LoadHistory { conversation_id } => {
                    self.handle_load_history(conversation_id).await;
                }
                ClientEvent::NewConversation => self.handle_new_conversation().await,
            },
        }
    }

    /// Resolve the target conversation and move to `Bound`.
    ///
    /// An id carried by the event takes priority over the current
    /// binding; with neither, a fresh conversation is created.
    async fn bind(&mut self, requested: Option<Uuid>) -> Result<Conversation, RepositoryError> {
        let target = requested.or(match self.state {
            ConnectionState::Bound(id) => Some(id),
            _ => None,
        });
        let conversation = self
            .repo
            .find_or_create_conversation(&self.user, target)
            .await?;
        self.state = ConnectionState::Bound(conversation.id);
        Ok(conversation)
    }

    /// One full chat turn: persist the user message, assemble context,
    /// ask the relay, persist and emit the assistant message.
    async fn handle_message(&mut self, text: String, requested: Option<Uuid>) {
        // The worker awaits each turn to completion before taking the
        // next event off the queue, so no turn is pending on entry.
        debug_assert!(!self.pending);

        let conversation = match self.bind(requested).await {
            Ok(conversation) => conversation,
            Err(err) => return self.emit_repository_error(err),
        };
        self.pending = true;

        // History is loaded before the new turn is appended so the prompt
        // carries prior turns only; the new utterance is passed separately.
        let history = match self
            .repo
            .load_recent_messages(conversation.id, self.limits.context_messages)
            .await
        {
            Ok(history) => history,
            Err(err) => {
                self.pending = false;
                return self.emit_repository_error(err);
            }
        };

        let user_turn = match self
            .repo
            .append_message(conversation.id, &self.user.user_id, &text, false)
            .await
        {
            Ok(message) => message,
            Err(err) => {
                self.pending = false;
                return self.emit_repository_error(err);
            }
        };
        self.emit(ServerEvent::Message { message: user_turn });

        let prompt = context::build_prompt(&history, &text);
        let answer = self.relay.ask(&prompt).await;

        match self
            .repo
            .append_message(conversation.id, ASSISTANT_AUTHOR, &answer, true)
            .await
        {
            Ok(message) => self.emit(ServerEvent::Message { message }),
            Err(err) => self.emit_repository_error(err),
        }
        self.pending = false;
    }

    async fn handle_load_history(&mut self, requested: Option<Uuid>) {
        let conversation = match self.bind(requested).await {
            Ok(conversation) => conversation,
            Err(err) => return self.emit_repository_error(err),
        };

        match self
            .repo
            .load_recent_messages(conversation.id, self.limits.history_messages)
            .await
        {
            Ok(messages) => self.emit(ServerEvent::History {
                conversation_id: conversation.id,
                title: conversation.display_title(),
                messages,
            }),
            Err(err) => self.emit_repository_error(err),
        }
    }

    /// Rebind to a fresh conversation. The previous conversation's data
    /// is untouched; only the binding changes.
    async fn handle_new_conversation(&mut self) {
        match self
            .repo
            .find_or_create_conversation(&self.user, None)
            .await
        {
            Ok(conversation) => {
                self.state = ConnectionState::Bound(conversation.id);
                info!(
                    session_id = %self.id,
                    conversation_id = %conversation.id,
                    "Rebound to new conversation"
                );
                self.emit(ServerEvent::NewConversation {
                    conversation_id: conversation.id,
                    title: conversation.display_title(),
                });
            }
            Err(err) => self.emit_repository_error(err),
        }
    }

    fn emit_repository_error(&mut self, err: RepositoryError) {
        warn!(session_id = %self.id, error = %err, "Store operation failed");
        self.emit(ServerEvent::Error {
            message: err.to_string(),
        });
    }

    fn emit(&self, event: ServerEvent) {
        // A failed send means the transport already closed; the turn's
        // store writes have still happened, the reply is just undeliverable.
        if self.outbound.send(event).is_err() {
            debug!(session_id = %self.id, "Dropped reply for closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use pumplink_types::conversation::Message;
    use pumplink_types::identity::Role;
    use tokio::time::timeout;

    /// In-memory store recording every append in arrival order.
    #[derive(Default)]
    struct RecordingStore {
        conversations: Mutex<Vec<Conversation>>,
        messages: Mutex<HashMap<Uuid, Vec<Message>>>,
        ops: Mutex<Vec<String>>,
        fail_next_append: AtomicBool,
    }

    impl RecordingStore {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }

        fn messages_in(&self, conversation_id: Uuid) -> Vec<Message> {
            self.messages
                .lock()
                .unwrap()
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default()
        }
    }

    impl ConversationRepository for RecordingStore {
        async fn find_or_create_conversation(
            &self,
            user: &UserIdentity,
            conversation_id: Option<Uuid>,
        ) -> Result<Conversation, RepositoryError> {
            let mut conversations = self.conversations.lock().unwrap();
            if let Some(id) = conversation_id
                && let Some(found) = conversations
                    .iter()
                    .find(|c| c.id == id && c.user_id == user.user_id)
            {
                return Ok(found.clone());
            }
            let conversation = Conversation {
                id: Uuid::now_v7(),
                user_id: user.user_id.clone(),
                title: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            conversations.push(conversation.clone());
            Ok(conversation)
        }

        async fn append_message(
            &self,
            conversation_id: Uuid,
            author: &str,
            text: &str,
            is_assistant: bool,
        ) -> Result<Message, RepositoryError> {
            if self.fail_next_append.swap(false, Ordering::SeqCst) {
                return Err(RepositoryError::Query("synthetic write failure".to_string()));
            }
            let message = Message {
                id: Uuid::now_v7(),
                conversation_id,
                author: author.to_string(),
                text: text.to_string(),
                created_at: Utc::now(),
                is_assistant,
                deleted: false,
            };
            self.messages
                .lock()
                .unwrap()
                .entry(conversation_id)
                .or_default()
                .push(message.clone());
            let kind = if is_assistant { "assistant" } else { "user" };
            self.ops.lock().unwrap().push(format!("{kind}: {text}"));
            Ok(message)
        }

        async fn load_recent_messages(
            &self,
            conversation_id: Uuid,
            limit: i64,
        ) -> Result<Vec<Message>, RepositoryError> {
            let messages = self.messages_in(conversation_id);
            let skip = messages.len().saturating_sub(limit as usize);
            Ok(messages.into_iter().skip(skip).collect())
        }
    }

    /// Relay that records prompts and answers after an optional delay.
    struct ScriptedRelay {
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedRelay {
        fn instant() -> Self {
            Self {
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl InferenceRelay for ScriptedRelay {
        async fn ask(&self, prompt: &str) -> String {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            format!("answer #{}", self.prompts.lock().unwrap().len())
        }
    }

    fn spawn_test_session(
        store: &Arc<RecordingStore>,
        relay: &Arc<ScriptedRelay>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let handle = spawn_session(
            UserIdentity::new("user-7", Role::Operator),
            store.clone(),
            relay.clone(),
            SessionLimits::default(),
            out_tx,
        );
        (handle, out_rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for server event")
            .expect("session worker dropped outbound channel")
    }

    #[tokio::test]
    async fn test_message_on_fresh_connection_creates_conversation_and_answers() {
        let store = Arc::new(RecordingStore::default());
        let relay = Arc::new(ScriptedRelay::instant());
        let (handle, mut rx) = spawn_test_session(&store, &relay);

        assert!(handle.submit(ClientEvent::Message {
            text: "What is the pressure on pump A?".to_string(),
            conversation_id: None,
        }));

        let echo = next_event(&mut rx).await;
        let ServerEvent::Message { message: user_turn } = echo else {
            panic!("expected echoed user turn, got {echo:?}");
        };
        assert_eq!(user_turn.text, "What is the pressure on pump A?");
        assert_eq!(user_turn.author, "user-7");
        assert!(!user_turn.is_assistant);

        let reply = next_event(&mut rx).await;
        let ServerEvent::Message { message: assistant } = reply else {
            panic!("expected assistant turn, got {reply:?}");
        };
        assert!(assistant.is_assistant);
        assert_eq!(assistant.author, ASSISTANT_AUTHOR);
        assert_eq!(assistant.conversation_id, user_turn.conversation_id);

        // No history on a fresh conversation: prompt is utterance + marker.
        assert_eq!(
            relay.prompts(),
            vec!["What is the pressure on pump A?\nAssistant:".to_string()]
        );

        // Both turns are durably recorded in creation order.
        let persisted = store.messages_in(user_turn.conversation_id);
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].text, "What is the pressure on pump A?");
        assert!(persisted[1].is_assistant);
    }

    #[tokio::test]
    async fn test_queued_turns_are_persisted_and_answered_in_order() {
        let store = Arc::new(RecordingStore::default());
        let relay = Arc::new(ScriptedRelay::slow(Duration::from_millis(50)));
        let (handle, mut rx) = spawn_test_session(&store, &relay);

        // B is queued while A's relay call is still in flight.
        handle.submit(ClientEvent::Message {
            text: "A".to_string(),
            conversation_id: None,
        });
        handle.submit(ClientEvent::Message {
            text: "B".to_string(),
            conversation_id: None,
        });

        // Every reply is a persisted turn; queueing never produces errors.
        for _ in 0..4 {
            let event = next_event(&mut rx).await;
            assert!(
                matches!(event, ServerEvent::Message { .. }),
                "unexpected event: {event:?}"
            );
        }

        // A's assistant turn lands strictly before B's user turn.
        assert_eq!(
            store.ops(),
            vec![
                "user: A".to_string(),
                "assistant: answer #1".to_string(),
                "user: B".to_string(),
                "assistant: answer #2".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_turn_reuses_the_bound_conversation() {
        let store = Arc::new(RecordingStore::default());
        let relay = Arc::new(ScriptedRelay::instant());
        let (handle, mut rx) = spawn_test_session(&store, &relay);

        handle.submit(ClientEvent::Message {
            text: "Is pump B running?".to_string(),
            conversation_id: None,
        });
        handle.submit(ClientEvent::Message {
            text: "And its discharge pressure?".to_string(),
            conversation_id: None,
        });

        let mut conversation_ids = Vec::new();
        for _ in 0..4 {
            if let ServerEvent::Message { message } = next_event(&mut rx).await {
                conversation_ids.push(message.conversation_id);
            }
        }
        assert!(conversation_ids.iter().all(|id| *id == conversation_ids[0]));

        // The second prompt carries the first exchange as labeled history.
        let prompts = relay.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(
            prompts[1],
            "User: Is pump B running?\n\
             Assistant: answer #1\n\
             And its discharge pressure?\n\
             Assistant:"
        );
    }

    #[tokio::test]
    async fn test_new_conversation_rebinds_without_touching_prior_messages() {
        let store = Arc::new(RecordingStore::default());
        let relay = Arc::new(ScriptedRelay::instant());
        let (handle, mut rx) = spawn_test_session(&store, &relay);

        handle.submit(ClientEvent::Message {
            text: "first".to_string(),
            conversation_id: None,
        });
        let ServerEvent::Message { message } = next_event(&mut rx).await else {
            panic!("expected user echo");
        };
        let old_id = message.conversation_id;
        next_event(&mut rx).await; // assistant turn

        let before = store.messages_in(old_id);

        handle.submit(ClientEvent::NewConversation);
        let event = next_event(&mut rx).await;
        let ServerEvent::NewConversation {
            conversation_id: new_id,
            ..
        } = event
        else {
            panic!("expected new_conversation, got {event:?}");
        };
        assert_ne!(new_id, old_id);

        handle.submit(ClientEvent::Message {
            text: "second".to_string(),
            conversation_id: None,
        });
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        // Rebinding discarded the binding, not the data.
        assert_eq!(store.messages_in(old_id), before);
        assert_eq!(store.messages_in(new_id).len(), 2);
    }

    #[tokio::test]
    async fn test_load_history_on_fresh_conversation_is_empty() {
        let store = Arc::new(RecordingStore::default());
        let relay = Arc::new(ScriptedRelay::instant());
        let (handle, mut rx) = spawn_test_session(&store, &relay);

        handle.submit(ClientEvent::LoadHistory {
            conversation_id: None,
        });

        let event = next_event(&mut rx).await;
        let ServerEvent::History { messages, title, .. } = event else {
            panic!("expected history, got {event:?}");
        };
        assert!(messages.is_empty());
        assert_eq!(title, "New conversation");
    }

    #[tokio::test]
    async fn test_load_history_returns_turns_in_order() {
        let store = Arc::new(RecordingStore::default());
        let relay = Arc::new(ScriptedRelay::instant());
        let (handle, mut rx) = spawn_test_session(&store, &relay);

        handle.submit(ClientEvent::Message {
            text: "hello".to_string(),
            conversation_id: None,
        });
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        handle.submit(ClientEvent::LoadHistory {
            conversation_id: None,
        });
        let event = next_event(&mut rx).await;
        let ServerEvent::History { messages, .. } = event else {
            panic!("expected history, got {event:?}");
        };
        assert_eq!(messages.len(), 2);
        assert!(!messages[0].is_assistant);
        assert!(messages[1].is_assistant);
    }

    #[tokio::test]
    async fn test_append_failure_reports_error_and_session_stays_usable() {
        let store = Arc::new(RecordingStore::default());
        let relay = Arc::new(ScriptedRelay::instant());
        let (handle, mut rx) = spawn_test_session(&store, &relay);

        store.fail_next_append.store(true, Ordering::SeqCst);
        handle.submit(ClientEvent::Message {
            text: "doomed".to_string(),
            conversation_id: None,
        });

        let event = next_event(&mut rx).await;
        assert!(matches!(event, ServerEvent::Error { .. }));

        // The pending flag was cleared: the next turn goes through.
        handle.submit(ClientEvent::Message {
            text: "retry".to_string(),
            conversation_id: None,
        });
        let echo = next_event(&mut rx).await;
        let ServerEvent::Message { message } = echo else {
            panic!("expected user echo after recovery, got {echo:?}");
        };
        assert_eq!(message.text, "retry");
        next_event(&mut rx).await; // assistant turn

        assert_eq!(
            store.ops(),
            vec!["user: retry".to_string(), "assistant: answer #1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_worker_after_current_turn() {
        let store = Arc::new(RecordingStore::default());
        let relay = Arc::new(ScriptedRelay::slow(Duration::from_millis(30)));
        let (handle, mut rx) = spawn_test_session(&store, &relay);

        handle.submit(ClientEvent::Message {
            text: "parting".to_string(),
            conversation_id: None,
        });
        drop(handle);

        // The in-flight turn completes and both writes land.
        next_event(&mut rx).await;
        next_event(&mut rx).await;
        assert_eq!(store.ops().len(), 2);

        // Worker exits once the queue is drained and closed.
        assert!(
            timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("worker did not stop")
                .is_none()
        );
    }
}
