//! Client session controller — session, feed, user list, and the poll task.
//!
//! DESIGN
//! ======
//! `ClientSessionController` is a cheap `Clone` handle over shared state.
//! All mutable state sits behind one `std::sync::Mutex` that is never held
//! across an `.await`; network calls go through [`MessagingApi`] and the
//! session is mirrored into a [`KeyValueStore`].
//!
//! At most one poll task runs at a time. It owns a `CancellationToken`
//! tied to the auto-update flag: each cycle fetches messages and users
//! concurrently, waits for both, then asks [`PollState::decide`] whether to
//! sleep and go again. The token is checked at every cycle boundary and
//! raced against the sleep, so switching auto-update off stops the loop
//! without waiting out the interval.
//!
//! ERROR HANDLING
//! ==============
//! Fetch failures are logged and counted; they never escalate beyond the
//! failure ceiling. Session and send failures are logged and returned to
//! the caller, who is free to ignore them. Store write failures are logged
//! and otherwise absorbed: the in-memory session stays authoritative.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, MessagingApi};
use crate::config::ClientConfig;
use crate::poll::{CycleDecision, MAX_FAILURE_NOTICE, PollState};
use crate::store::{KeyValueStore, SESSION_KEY};
use crate::types::{Message, User, decode_messages, decode_users};
use crate::view::{Tab, ViewEvent};

/// Shortest accepted user name, in characters.
pub const MIN_USERNAME_CHARS: usize = 5;

const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// User input was rejected before any request was made.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

// =============================================================================
// STATE
// =============================================================================

/// Everything the view renders.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub session: Option<User>,
    /// The view shows the user as identified (no "create user" form).
    pub identified: bool,
    pub messages: Vec<Message>,
    pub users: Vec<User>,
    pub user_count: usize,
    pub poll: PollState,
    pub active_tab: Tab,
    /// Pending text of the compose field.
    pub draft: Option<String>,
    pub error_notice: Option<String>,
}

impl ControllerState {
    fn new(config: &ClientConfig) -> Self {
        Self {
            session: None,
            identified: false,
            messages: Vec::new(),
            users: Vec::new(),
            user_count: 0,
            poll: PollState::new(config.poll_interval_secs),
            active_tab: Tab::default(),
            draft: None,
            error_notice: None,
        }
    }
}

struct RunningPoller {
    stop: CancellationToken,
    task: JoinHandle<()>,
    generation: u64,
}

struct Inner {
    api: Arc<dyn MessagingApi>,
    store: Arc<dyn KeyValueStore>,
    config: ClientConfig,
    state: Mutex<ControllerState>,
    poller: Mutex<Option<RunningPoller>>,
    generation: AtomicU64,
    events: broadcast::Sender<ViewEvent>,
}

// =============================================================================
// CONTROLLER
// =============================================================================

#[derive(Clone)]
pub struct ClientSessionController {
    inner: Arc<Inner>,
}

impl ClientSessionController {
    #[must_use]
    pub fn new(api: Arc<dyn MessagingApi>, store: Arc<dyn KeyValueStore>, config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = ControllerState::new(&config);
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                config,
                state: Mutex::new(state),
                poller: Mutex::new(None),
                generation: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Start polling and restore the stored session. The first poll cycle
    /// fetches messages and users immediately, without waiting on the
    /// session lookup.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn initialize(&self) {
        let auto_updating = self.state().poll.is_auto_updating;
        if auto_updating {
            self.start_poller();
        }
        if let Err(e) = self.restore_session().await {
            debug!(error = %e, "continuing without a session");
        }
    }

    /// Receive view events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.inner.events.subscribe()
    }

    /// Copy of the current state for rendering.
    #[must_use]
    pub fn snapshot(&self) -> ControllerState {
        self.state().clone()
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poller(&self) -> MutexGuard<'_, Option<RunningPoller>> {
        self.inner.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ViewEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    // =========================================================================
    // SESSION
    // =========================================================================

    /// Validate the locally stored session against the backend.
    ///
    /// Returns the active user, or `None` when there is no valid session.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Api`] if the lookup request failed; the
    /// session is left anonymous.
    pub async fn restore_session(&self) -> Result<Option<User>, ControllerError> {
        let Some(user_id) = self.stored_user_id() else {
            return Ok(None);
        };

        let value = match self.inner.api.lookup_user(&user_id).await {
            Ok(value) => value,
            Err(e) => {
                error!(status = e.status(), error = %e, "failed to look up stored user");
                return Err(e.into());
            }
        };

        if let Some(user) = User::from_lookup(value) {
            info!(user_id = %user.user_id, "session restored");
            self.activate_session(user.clone());
            Ok(Some(user))
        } else {
            info!(%user_id, "stored user unknown to backend; clearing session");
            self.clear_session();
            Ok(None)
        }
    }

    /// Register a new user and make it the session.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Validation`] for an empty or short name
    /// (no request is made), or [`ControllerError::Api`] if the request
    /// failed, in which case the session is unchanged.
    pub async fn create_user(&self, name: &str, avatar: Option<&str>) -> Result<User, ControllerError> {
        if let Err(reason) = validate_username(name) {
            self.emit(ViewEvent::Alert(reason.clone()));
            return Err(ControllerError::Validation(reason));
        }

        let user = match self.inner.api.create_user(name, avatar).await {
            Ok(user) => user,
            Err(e) => {
                error!(status = e.status(), error = %e, "failed to create user");
                return Err(e.into());
            }
        };

        info!(user_id = %user.user_id, "user created");
        {
            let mut state = self.state();
            state.users.push(user.clone());
            state.user_count = state.users.len();
        }
        self.activate_session(user.clone());
        Ok(user)
    }

    fn activate_session(&self, user: User) {
        self.persist_session(&user);
        {
            let mut state = self.state();
            state.session = Some(user.clone());
            state.identified = true;
        }
        self.emit(ViewEvent::Identified(user));
    }

    fn persist_session(&self, user: &User) {
        let encoded = match serde_json::to_string(user) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "failed to encode session");
                return;
            }
        };
        if let Err(e) = self.inner.store.set(SESSION_KEY, &encoded) {
            warn!(error = %e, "failed to persist session");
        }
    }

    fn clear_session(&self) {
        {
            let mut state = self.state();
            state.session = None;
            state.identified = false;
        }
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "failed to clear local store");
        }
        self.emit(ViewEvent::SessionCleared);
    }

    /// `user_id` of the persisted session, if the stored value is a JSON
    /// object carrying one.
    fn stored_user_id(&self) -> Option<String> {
        let raw = self.inner.store.get(SESSION_KEY)?;
        let parsed = match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "stored session is not JSON; ignoring");
                return None;
            }
        };
        parsed.get("user_id").and_then(Value::as_str).map(ToOwned::to_owned)
    }

    // =========================================================================
    // MESSAGES
    // =========================================================================

    /// Replace the compose field's text.
    pub fn set_draft(&self, text: impl Into<String>) {
        self.state().draft = Some(text.into());
    }

    /// Send the compose field's text.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Api`] if the send failed; the draft is kept.
    pub async fn send_draft(&self) -> Result<(), ControllerError> {
        let text = self.state().draft.clone().unwrap_or_default();
        self.send_message(&text).await
    }

    /// Publish a message, attributed to the stored session when there is one.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Api`] if the request failed. The message is
    /// not queued for retry.
    pub async fn send_message(&self, text: &str) -> Result<(), ControllerError> {
        let user_id = self.stored_user_id();
        if let Err(e) = self.inner.api.send_message(text, user_id.as_deref()).await {
            error!(status = e.status(), error = %e, "failed to send the message");
            return Err(e.into());
        }
        debug!(attributed = user_id.is_some(), "message sent");
        self.state().draft = None;
        self.emit(ViewEvent::MessageSent);
        Ok(())
    }

    /// Fetch the full message list and replace the feed.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Api`] on failure, after counting it.
    pub async fn fetch_messages(&self) -> Result<usize, ControllerError> {
        match self.inner.api.fetch_messages().await {
            Ok(items) => {
                let received = items.len();
                let messages = decode_messages(items);
                let count = messages.len();
                if count < received {
                    debug!(dropped = received - count, "dropped invalid message records");
                }
                {
                    let mut state = self.state();
                    state.messages = messages;
                    state.poll.record_success();
                }
                self.emit(ViewEvent::MessagesUpdated { count });
                Ok(count)
            }
            Err(e) => {
                error!(status = e.status(), error = %e, "failed to receive the messages");
                self.state().poll.record_failure();
                Err(e.into())
            }
        }
    }

    /// Fetch the full user list and replace it, along with its count.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Api`] on failure, after counting it.
    pub async fn fetch_all_users(&self) -> Result<usize, ControllerError> {
        match self.inner.api.fetch_users().await {
            Ok(items) => {
                let users = decode_users(items);
                let count = users.len();
                {
                    let mut state = self.state();
                    state.users = users;
                    state.user_count = count;
                    state.poll.record_success();
                }
                self.emit(ViewEvent::UsersUpdated { count });
                Ok(count)
            }
            Err(e) => {
                error!(status = e.status(), error = %e, "failed to receive the users");
                self.state().poll.record_failure();
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // VIEW
    // =========================================================================

    pub fn select_tab(&self, tab: Tab) {
        self.state().active_tab = tab;
        self.emit(ViewEvent::TabSelected(tab));
    }

    // =========================================================================
    // POLLING
    // =========================================================================

    /// Flip auto-update. Turning it on starts polling immediately; turning it
    /// off cancels the scheduled poll. Returns the new flag.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn toggle_auto_update(&self) -> bool {
        let enabled = {
            let mut state = self.state();
            state.poll.is_auto_updating = !state.poll.is_auto_updating;
            if state.poll.is_auto_updating {
                state.error_notice = None;
            }
            state.poll.is_auto_updating
        };

        if enabled {
            info!("start fetching");
            self.start_poller();
        } else {
            self.cancel_poller();
        }
        self.emit(ViewEvent::AutoUpdateChanged(enabled));
        enabled
    }

    /// Stop polling and wait for the poll task to exit.
    pub async fn shutdown(&self) {
        let running = self.poller().take();
        self.state().poll.pending = false;
        if let Some(running) = running {
            running.stop.cancel();
            if let Err(e) = running.task.await {
                warn!(error = %e, "poll task ended abnormally");
            }
        }
    }

    fn start_poller(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();
        let task_stop = stop.child_token();
        let controller = self.clone();

        // The slot stays locked until the handle is stored, so a task that
        // finishes immediately still finds its own generation on exit.
        let mut slot = self.poller();
        let task = tokio::spawn(async move { controller.poll_loop(task_stop, generation).await });
        if let Some(previous) = slot.replace(RunningPoller { stop, task, generation }) {
            previous.stop.cancel();
        }
        self.state().poll.pending = true;
    }

    fn cancel_poller(&self) {
        let running = self.poller().take();
        self.state().poll.pending = false;
        if let Some(running) = running {
            info!(generation = running.generation, "cancel the scheduled poll");
            running.stop.cancel();
        }
    }

    fn release_poller(&self, generation: u64) {
        let mut slot = self.poller();
        if slot.as_ref().is_some_and(|running| running.generation == generation) {
            slot.take();
            self.state().poll.pending = false;
        }
    }

    async fn poll_loop(self, stop: CancellationToken, generation: u64) {
        let max_failure_count = self.inner.config.max_failure_count;
        debug!(generation, "poll task started");

        loop {
            if stop.is_cancelled() {
                break;
            }

            let _ = tokio::join!(self.fetch_messages(), self.fetch_all_users());

            if stop.is_cancelled() {
                break;
            }

            let (decision, delay) = {
                let mut state = self.state();
                let decision = state.poll.decide(max_failure_count);
                if decision == CycleDecision::CeilingReached {
                    state.error_notice = Some(MAX_FAILURE_NOTICE.to_owned());
                }
                (decision, state.poll.delay())
            };

            match decision {
                CycleDecision::Reschedule => {}
                CycleDecision::Idle => break,
                CycleDecision::CeilingReached => {
                    error!(max_failure_count, notice = MAX_FAILURE_NOTICE, "stopped polling");
                    self.emit(ViewEvent::Notice(MAX_FAILURE_NOTICE.to_owned()));
                    self.emit(ViewEvent::AutoUpdateChanged(false));
                    break;
                }
            }

            tokio::select! {
                () = stop.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.release_poller(generation);
        debug!(generation, "poll task stopped");
    }
}

fn validate_username(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("username is required".to_owned());
    }
    if name.chars().count() < MIN_USERNAME_CHARS {
        return Err(format!("username must be at least {MIN_USERNAME_CHARS} characters"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
