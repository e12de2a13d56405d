use super::*;
use crate::store::MemoryStore;
use crate::types::WireRecord;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::time::Duration;

// =========================================================================
// MockApi
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Lookup(String),
    CreateUser(String, Option<String>),
    Send(String, Option<String>),
}

#[derive(Default)]
struct MockApi {
    offline: AtomicBool,
    messages: Mutex<Vec<Value>>,
    users: Mutex<Vec<Value>>,
    lookup_response: Mutex<Value>,
    lookup_delay: Mutex<Duration>,
    message_fetches: AtomicUsize,
    user_fetches: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl MockApi {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn offline() -> Arc<Self> {
        let api = Self::default();
        api.offline.store(true, Ordering::SeqCst);
        Arc::new(api)
    }

    fn check(&self) -> Result<(), ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ApiError::Request("mock backend offline".into()))
        } else {
            Ok(())
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn message_fetches(&self) -> usize {
        self.message_fetches.load(Ordering::SeqCst)
    }

    fn user_fetches(&self) -> usize {
        self.user_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MessagingApi for MockApi {
    async fn fetch_messages(&self) -> Result<Vec<WireRecord>, ApiError> {
        self.message_fetches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.messages.lock().unwrap().iter().cloned().map(WireRecord::from).collect())
    }

    async fn fetch_users(&self) -> Result<Vec<WireRecord>, ApiError> {
        self.user_fetches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.users.lock().unwrap().iter().cloned().map(WireRecord::from).collect())
    }

    async fn lookup_user(&self, user_id: &str) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push(Call::Lookup(user_id.to_owned()));
        let delay = *self.lookup_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        Ok(self.lookup_response.lock().unwrap().clone())
    }

    async fn create_user(&self, name: &str, avatar: Option<&str>) -> Result<User, ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::CreateUser(name.to_owned(), avatar.map(ToOwned::to_owned)));
        self.check()?;
        Ok(User { user_id: format!("id-{name}"), name: name.to_owned(), avatar: avatar.map(ToOwned::to_owned) })
    }

    async fn send_message(&self, text: &str, user_id: Option<&str>) -> Result<(), ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Send(text.to_owned(), user_id.map(ToOwned::to_owned)));
        self.check()
    }
}

fn controller_with(api: Arc<MockApi>, store: Arc<MemoryStore>, config: ClientConfig) -> ClientSessionController {
    ClientSessionController::new(api, store, config)
}

fn controller(api: Arc<MockApi>, store: Arc<MemoryStore>) -> ClientSessionController {
    controller_with(api, store, ClientConfig::default())
}

fn drain(rx: &mut broadcast::Receiver<ViewEvent>) -> Vec<ViewEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => return events,
        }
    }
}

fn alice() -> User {
    User { user_id: "u1".into(), name: "Alice".into(), avatar: None }
}

// =========================================================================
// restore_session
// =========================================================================

#[tokio::test]
async fn restore_without_stored_session_makes_no_request() {
    let api = MockApi::new();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));

    assert!(ctl.restore_session().await.unwrap().is_none());
    assert!(api.calls().is_empty());
    assert!(ctl.snapshot().session.is_none());
}

#[tokio::test]
async fn restore_with_unparseable_stored_value_leaves_session_unset() {
    let api = MockApi::new();
    let store = Arc::new(MemoryStore::new());
    store.set(SESSION_KEY, "{not json").unwrap();
    let ctl = controller(api.clone(), store.clone());

    assert!(ctl.restore_session().await.unwrap().is_none());
    assert!(api.calls().is_empty());
    assert!(ctl.snapshot().session.is_none());
    assert_eq!(store.get(SESSION_KEY).as_deref(), Some("{not json"));
}

#[tokio::test]
async fn restore_with_non_object_stored_value_leaves_session_unset() {
    let api = MockApi::new();
    let store = Arc::new(MemoryStore::new());
    store.set(SESSION_KEY, "42").unwrap();
    let ctl = controller(api.clone(), store);

    assert!(ctl.restore_session().await.unwrap().is_none());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn restore_with_valid_lookup_sets_and_persists_session() {
    let api = MockApi::new();
    *api.lookup_response.lock().unwrap() = json!({"user_id": "u1", "name": "Alice"});
    let store = Arc::new(MemoryStore::new());
    store.set(SESSION_KEY, r#"{"user_id":"u1"}"#).unwrap();
    let ctl = controller(api.clone(), store.clone());
    let mut rx = ctl.subscribe();

    let user = ctl.restore_session().await.unwrap();
    assert_eq!(user, Some(alice()));
    assert_eq!(api.calls(), vec![Call::Lookup("u1".into())]);

    let snapshot = ctl.snapshot();
    assert_eq!(snapshot.session, Some(alice()));
    assert!(snapshot.identified);

    let stored: User = serde_json::from_str(&store.get(SESSION_KEY).unwrap()).unwrap();
    assert_eq!(stored, alice());
    assert_eq!(drain(&mut rx), vec![ViewEvent::Identified(alice())]);
}

#[tokio::test]
async fn restore_with_lookup_missing_user_id_clears_session_and_store() {
    let api = MockApi::new();
    *api.lookup_response.lock().unwrap() = json!({});
    let store = Arc::new(MemoryStore::new());
    store.set(SESSION_KEY, r#"{"user_id":"gone"}"#).unwrap();
    store.set("unrelated", "x").unwrap();
    let ctl = controller(api, store.clone());
    let mut rx = ctl.subscribe();

    assert!(ctl.restore_session().await.unwrap().is_none());
    assert!(ctl.snapshot().session.is_none());
    assert!(!ctl.snapshot().identified);
    assert!(store.is_empty());
    assert_eq!(drain(&mut rx), vec![ViewEvent::SessionCleared]);
}

#[tokio::test]
async fn restore_with_failed_lookup_stays_anonymous() {
    let api = MockApi::offline();
    let store = Arc::new(MemoryStore::new());
    store.set(SESSION_KEY, r#"{"user_id":"u1"}"#).unwrap();
    let ctl = controller(api, store.clone());

    assert!(matches!(ctl.restore_session().await, Err(ControllerError::Api(_))));
    assert!(ctl.snapshot().session.is_none());
    assert!(store.get(SESSION_KEY).is_some());
}

// =========================================================================
// create_user
// =========================================================================

#[tokio::test]
async fn create_user_short_name_is_rejected_without_request() {
    let api = MockApi::new();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));
    let mut rx = ctl.subscribe();

    let err = ctl.create_user("ab", None).await.unwrap_err();
    assert!(matches!(err, ControllerError::Validation(_)));
    assert!(api.calls().is_empty());
    assert!(ctl.snapshot().session.is_none());
    assert!(matches!(drain(&mut rx).as_slice(), [ViewEvent::Alert(_)]));
}

#[tokio::test]
async fn create_user_empty_name_is_rejected_without_request() {
    let api = MockApi::new();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));

    let err = ctl.create_user("", None).await.unwrap_err();
    assert_eq!(err.to_string(), "username is required");
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn create_user_four_chars_is_rejected() {
    let api = MockApi::new();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));

    assert!(ctl.create_user("abcd", None).await.is_err());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn create_user_five_chars_posts_once_and_sets_session() {
    let api = MockApi::new();
    let store = Arc::new(MemoryStore::new());
    let ctl = controller(api.clone(), store.clone());

    let user = ctl.create_user("alice", None).await.unwrap();
    assert_eq!(user.user_id, "id-alice");
    assert_eq!(api.calls(), vec![Call::CreateUser("alice".into(), None)]);

    let snapshot = ctl.snapshot();
    assert_eq!(snapshot.session.as_ref(), Some(&user));
    assert!(snapshot.identified);
    assert_eq!(snapshot.users, vec![user.clone()]);
    assert_eq!(snapshot.user_count, 1);

    let stored: User = serde_json::from_str(&store.get(SESSION_KEY).unwrap()).unwrap();
    assert_eq!(stored, user);
}

#[tokio::test]
async fn create_user_passes_avatar() {
    let api = MockApi::new();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));

    let user = ctl.create_user("carol", Some("http://img/c.png")).await.unwrap();
    assert_eq!(user.avatar.as_deref(), Some("http://img/c.png"));
    assert_eq!(api.calls(), vec![Call::CreateUser("carol".into(), Some("http://img/c.png".into()))]);
}

#[tokio::test]
async fn create_user_failure_leaves_session_unchanged() {
    let api = MockApi::offline();
    let store = Arc::new(MemoryStore::new());
    let ctl = controller(api.clone(), store.clone());

    assert!(matches!(ctl.create_user("alice", None).await, Err(ControllerError::Api(_))));
    assert_eq!(api.calls().len(), 1);
    assert!(ctl.snapshot().session.is_none());
    assert!(ctl.snapshot().users.is_empty());
    assert!(store.is_empty());
}

// =========================================================================
// send_message
// =========================================================================

#[tokio::test]
async fn send_message_without_session_omits_user_id() {
    let api = MockApi::new();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));

    ctl.send_message("hi").await.unwrap();
    assert_eq!(api.calls(), vec![Call::Send("hi".into(), None)]);
}

#[tokio::test]
async fn send_message_uses_stored_user_id() {
    let api = MockApi::new();
    let store = Arc::new(MemoryStore::new());
    store.set(SESSION_KEY, r#"{"user_id":"u1","name":"Alice"}"#).unwrap();
    let ctl = controller(api.clone(), store);

    ctl.send_message("hi").await.unwrap();
    assert_eq!(api.calls(), vec![Call::Send("hi".into(), Some("u1".into()))]);
}

#[tokio::test]
async fn send_draft_clears_draft_on_success() {
    let api = MockApi::new();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));
    let mut rx = ctl.subscribe();

    ctl.set_draft("hello there");
    ctl.send_draft().await.unwrap();
    assert_eq!(api.calls(), vec![Call::Send("hello there".into(), None)]);
    assert!(ctl.snapshot().draft.is_none());
    assert_eq!(drain(&mut rx), vec![ViewEvent::MessageSent]);
}

#[tokio::test]
async fn send_draft_keeps_draft_on_failure() {
    let api = MockApi::offline();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));

    ctl.set_draft("retry me");
    assert!(ctl.send_draft().await.is_err());
    assert_eq!(ctl.snapshot().draft.as_deref(), Some("retry me"));
    assert_eq!(api.calls().len(), 1);
}

// =========================================================================
// fetch_messages / fetch_all_users
// =========================================================================

#[tokio::test]
async fn fetch_messages_parses_text_and_drops_scalars() {
    let api = MockApi::new();
    *api.messages.lock().unwrap() = vec![json!(r#"{"id":1,"created":1000}"#), json!(42)];
    let ctl = controller(api, Arc::new(MemoryStore::new()));

    assert_eq!(ctl.fetch_messages().await.unwrap(), 1);
    let snapshot = ctl.snapshot();
    assert_eq!(snapshot.messages.len(), 1);
    let message = &snapshot.messages[0];
    assert_eq!(message.username, "Anonymous");
    assert_eq!(message.created.map(time::OffsetDateTime::unix_timestamp), Some(1000));
}

#[tokio::test]
async fn fetch_messages_replaces_previous_feed() {
    let api = MockApi::new();
    *api.messages.lock().unwrap() = vec![json!({"text": "a"}), json!({"text": "b"})];
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));
    ctl.fetch_messages().await.unwrap();

    *api.messages.lock().unwrap() = vec![json!({"text": "c"})];
    ctl.fetch_messages().await.unwrap();
    let texts: Vec<String> = ctl.snapshot().messages.into_iter().map(|m| m.text).collect();
    assert_eq!(texts, ["c"]);
}

#[tokio::test]
async fn fetch_failures_count_and_success_resets() {
    let api = MockApi::offline();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));

    assert!(ctl.fetch_messages().await.is_err());
    assert!(ctl.fetch_all_users().await.is_err());
    assert_eq!(ctl.snapshot().poll.failure_count, 2);

    api.offline.store(false, Ordering::SeqCst);
    ctl.fetch_all_users().await.unwrap();
    assert_eq!(ctl.snapshot().poll.failure_count, 0);
}

#[tokio::test]
async fn fetch_all_users_replaces_list_and_count() {
    let api = MockApi::new();
    *api.users.lock().unwrap() = vec![
        json!({"user_id": "u1", "name": "Alice"}),
        json!(r#"{"user_id":"u2","name":"Bob"}"#),
        json!("garbage"),
    ];
    let ctl = controller(api, Arc::new(MemoryStore::new()));
    let mut rx = ctl.subscribe();

    assert_eq!(ctl.fetch_all_users().await.unwrap(), 2);
    let snapshot = ctl.snapshot();
    assert_eq!(snapshot.user_count, 2);
    assert_eq!(snapshot.users[1].name, "Bob");
    assert_eq!(drain(&mut rx), vec![ViewEvent::UsersUpdated { count: 2 }]);
}

// =========================================================================
// select_tab
// =========================================================================

#[tokio::test]
async fn select_tab_records_tab_and_notifies_view() {
    let ctl = controller(MockApi::new(), Arc::new(MemoryStore::new()));
    let mut rx = ctl.subscribe();

    ctl.select_tab(Tab::AllUsers);
    assert_eq!(ctl.snapshot().active_tab, Tab::AllUsers);
    ctl.select_tab(Tab::from_name("messages"));
    assert_eq!(ctl.snapshot().active_tab, Tab::Messages);
    assert_eq!(
        drain(&mut rx),
        vec![ViewEvent::TabSelected(Tab::AllUsers), ViewEvent::TabSelected(Tab::Messages)]
    );
}

// =========================================================================
// validate_username
// =========================================================================

#[test]
fn validate_username_counts_characters_not_bytes() {
    assert!(validate_username("héllo").is_ok());
    assert!(validate_username("ééé").is_err());
}

// =========================================================================
// Polling
// =========================================================================

#[tokio::test(start_paused = true)]
async fn initialize_fetches_immediately_then_every_interval() {
    let api = MockApi::new();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));

    ctl.initialize().await;
    assert!(ctl.snapshot().poll.pending);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(api.message_fetches(), 1);
    assert_eq!(api.user_fetches(), 1);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(api.message_fetches(), 2);
    assert_eq!(api.user_fetches(), 2);

    ctl.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn initialize_restores_stored_session() {
    let api = MockApi::new();
    *api.lookup_response.lock().unwrap() = json!({"user_id": "u1", "name": "Alice"});
    let store = Arc::new(MemoryStore::new());
    store.set(SESSION_KEY, r#"{"user_id":"u1"}"#).unwrap();
    let ctl = controller(api.clone(), store);

    ctl.initialize().await;
    assert_eq!(ctl.snapshot().session, Some(alice()));

    ctl.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn initialize_polls_without_waiting_on_session_lookup() {
    let api = MockApi::new();
    *api.lookup_response.lock().unwrap() = json!({"user_id": "u1", "name": "Alice"});
    *api.lookup_delay.lock().unwrap() = Duration::from_secs(25);
    let store = Arc::new(MemoryStore::new());
    store.set(SESSION_KEY, r#"{"user_id":"u1"}"#).unwrap();
    let ctl = controller(api.clone(), store);

    let init = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.initialize().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(api.message_fetches(), 1);
    assert_eq!(api.user_fetches(), 1);
    assert_eq!(ctl.snapshot().session, None);

    init.await.unwrap();
    assert_eq!(ctl.snapshot().session, Some(alice()));

    ctl.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn toggle_off_cancels_pending_poll() {
    let api = MockApi::new();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));

    ctl.initialize().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(api.message_fetches(), 1);

    assert!(!ctl.toggle_auto_update());
    let snapshot = ctl.snapshot();
    assert!(!snapshot.poll.is_auto_updating);
    assert!(!snapshot.poll.pending);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.message_fetches(), 1);
    assert_eq!(api.user_fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn toggle_on_fetches_immediately_and_resumes() {
    let api = MockApi::new();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));

    ctl.initialize().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    ctl.toggle_auto_update();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(api.message_fetches(), 1);

    assert!(ctl.toggle_auto_update());
    assert!(ctl.snapshot().poll.pending);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(api.message_fetches(), 2);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(api.message_fetches(), 3);

    ctl.shutdown().await;
    assert!(!ctl.snapshot().poll.pending);
}

#[tokio::test(start_paused = true)]
async fn ceiling_of_ten_thousand_failures_stops_polling() {
    let api = MockApi::offline();
    let ctl = controller(api.clone(), Arc::new(MemoryStore::new()));
    let mut rx = ctl.subscribe();

    ctl.initialize().await;
    let mut waited = 0;
    while ctl.snapshot().poll.is_auto_updating && waited < 6_000 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        waited += 1;
    }

    let snapshot = ctl.snapshot();
    assert!(!snapshot.poll.is_auto_updating);
    assert!(!snapshot.poll.pending);
    assert_eq!(snapshot.poll.failure_count, 0);
    assert_eq!(snapshot.error_notice.as_deref(), Some(MAX_FAILURE_NOTICE));
    // Both fetches fail each cycle, so 5000 cycles make 10000 failures.
    assert_eq!(api.message_fetches(), 5_000);
    assert_eq!(api.user_fetches(), 5_000);

    let events = drain(&mut rx);
    assert!(events.contains(&ViewEvent::Notice(MAX_FAILURE_NOTICE.to_owned())));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.message_fetches(), 5_000);
}

#[tokio::test(start_paused = true)]
async fn ceiling_decision_counts_the_cycle_just_finished() {
    let api = MockApi::offline();
    let config = ClientConfig { max_failure_count: 2, ..ClientConfig::default() };
    let ctl = controller_with(api.clone(), Arc::new(MemoryStore::new()), config);

    ctl.initialize().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(api.message_fetches(), 1);
    assert!(!ctl.snapshot().poll.is_auto_updating);
}

#[tokio::test(start_paused = true)]
async fn re_enabling_after_ceiling_clears_notice_and_polls_again() {
    let api = MockApi::offline();
    let config = ClientConfig { max_failure_count: 2, ..ClientConfig::default() };
    let ctl = controller_with(api.clone(), Arc::new(MemoryStore::new()), config);

    ctl.initialize().await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(ctl.snapshot().error_notice.is_some());

    api.offline.store(false, Ordering::SeqCst);
    assert!(ctl.toggle_auto_update());
    assert!(ctl.snapshot().error_notice.is_none());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(api.message_fetches(), 2);
    assert_eq!(ctl.snapshot().poll.failure_count, 0);

    ctl.shutdown().await;
}
