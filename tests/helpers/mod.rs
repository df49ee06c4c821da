//! Test doubles for the external services the relay talks to.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use uuid::Uuid;

use imagegen_relay::{
    app_state::AppState,
    config::GenerationSettings,
    models::job::{Job, JobPatch},
    models::user::{Plan, UserProfile},
    services::{
        accounts::{AccountError, AccountService},
        dispatcher::QueueDispatcher,
        enhancer::{EnhancerError, PromptEnhancer},
        job_store::{JobStore, MemoryJobStore},
        notify::{AlertNotifier, AnalyticsEvent, EventTracker, NotifyError},
        orchestrator::GenerationOrchestrator,
        progress::{ProgressReceiver, DONE},
        provider::{Callback, ImageProvider, ProviderError, ProviderProgress},
        queue::MemoryJobQueue,
        webhook::WebhookRelay,
    },
};

pub const PRO_TOKEN: &str = "token-pro";
pub const OTHER_PRO_TOKEN: &str = "token-pro-2";
pub const FREE_TOKEN: &str = "token-free";
pub const BASIC_TOKEN: &str = "token-basic";
pub const UNLISTED_TIER_TOKEN: &str = "token-enterprise";
pub const BROKE_TOKEN: &str = "token-broke";

/// Settings tight enough that a full generation finishes in milliseconds.
pub fn fast_settings() -> GenerationSettings {
    GenerationSettings {
        poll_interval: Duration::from_millis(5),
        timeout: Duration::from_secs(2),
        webhook_url: Some("https://relay.test/api/webhooks/mj-health-check".to_string()),
    }
}

/// A submission the provider received.
#[derive(Debug, Clone)]
pub enum Submission {
    Imagine { prompt: String, callback: Callback },
    Button { button: String, message_id: String, callback: Callback },
}

impl Submission {
    pub fn callback(&self) -> &Callback {
        match self {
            Submission::Imagine { callback, .. } | Submission::Button { callback, .. } => callback,
        }
    }
}

/// A job store write performed while a given poll is in flight, standing in
/// for a callback that races the polling loop.
struct Interleaved {
    poll: usize,
    store: Arc<MemoryJobStore>,
    patch: JobPatch,
}

/// Provider that replays a fixed sequence of polling results. Once the script
/// runs out it keeps returning the last entry.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ProviderProgress>>,
    last: Mutex<ProviderProgress>,
    reject_submissions: bool,
    interleaved: Mutex<Option<Interleaved>>,
    pub polls: AtomicUsize,
    pub submissions: Mutex<Vec<Submission>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ProviderProgress>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(ProviderProgress::default()),
            reject_submissions: false,
            interleaved: Mutex::new(None),
            polls: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_submissions: true,
            ..Self::new(Vec::new())
        }
    }

    /// Apply `patch` to the submitted job during poll number `poll`
    /// (1-based), before that poll returns.
    pub fn interleave(&self, poll: usize, store: Arc<MemoryJobStore>, patch: JobPatch) {
        *self.interleaved.lock().unwrap() = Some(Interleaved { poll, store, patch });
    }

    /// Id of the job referenced by the first submission.
    pub fn submitted_job_id(&self) -> Option<Uuid> {
        self.submissions
            .lock()
            .unwrap()
            .first()
            .and_then(|s| s.callback().reference.parse().ok())
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageProvider for ScriptedProvider {
    async fn imagine(&self, prompt: &str, callback: &Callback) -> Result<String, ProviderError> {
        if self.reject_submissions {
            return Err(ProviderError::Status(503));
        }
        self.submissions.lock().unwrap().push(Submission::Imagine {
            prompt: prompt.to_string(),
            callback: callback.clone(),
        });
        Ok("msg-1".to_string())
    }

    async fn button(
        &self,
        button: &str,
        button_message_id: &str,
        callback: &Callback,
    ) -> Result<String, ProviderError> {
        if self.reject_submissions {
            return Err(ProviderError::Rejected);
        }
        self.submissions.lock().unwrap().push(Submission::Button {
            button: button.to_string(),
            message_id: button_message_id.to_string(),
            callback: callback.clone(),
        });
        Ok("msg-2".to_string())
    }

    async fn message(&self, _message_id: &str) -> Result<ProviderProgress, ProviderError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;

        let due = {
            let mut interleaved = self.interleaved.lock().unwrap();
            if interleaved.as_ref().is_some_and(|entry| entry.poll == poll) {
                interleaved.take()
            } else {
                None
            }
        };
        if let (Some(entry), Some(job_id)) = (due, self.submitted_job_id()) {
            entry
                .store
                .update(job_id, &entry.patch)
                .await
                .expect("interleaved update failed");
        }

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(next) = next {
            *last = next;
        }
        Ok(last.clone())
    }
}

/// Enhancer that returns a fixed prompt, or fails when built with `failing`.
pub struct StaticEnhancer {
    reply: Option<String>,
}

impl StaticEnhancer {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { reply: None }
    }
}

#[async_trait]
impl PromptEnhancer for StaticEnhancer {
    async fn enhance(&self, _user_text: &str) -> Result<String, EnhancerError> {
        self.reply.clone().ok_or(EnhancerError::Status(500))
    }
}

/// Accounts keyed by token, with counters for credit and usage writes.
pub struct StubAccounts {
    users: HashMap<&'static str, UserProfile>,
    broke: Uuid,
    pub credits_subtracted: AtomicUsize,
    pub usage_entries: AtomicUsize,
}

impl StubAccounts {
    pub fn new() -> Self {
        let broke = Uuid::new_v4();
        let users = HashMap::from([
            (PRO_TOKEN, profile(Plan::Pro)),
            (OTHER_PRO_TOKEN, profile(Plan::Ultra)),
            (FREE_TOKEN, profile(Plan::Free)),
            (BASIC_TOKEN, profile(Plan::Basic)),
            (
                UNLISTED_TIER_TOKEN,
                profile(Plan::Other("enterprise".to_string())),
            ),
            (
                BROKE_TOKEN,
                UserProfile {
                    id: broke,
                    plan: Plan::Pro,
                },
            ),
        ]);
        Self {
            users,
            broke,
            credits_subtracted: AtomicUsize::new(0),
            usage_entries: AtomicUsize::new(0),
        }
    }

    pub fn user(&self, token: &str) -> UserProfile {
        self.users[token].clone()
    }

    pub fn charges(&self) -> usize {
        self.credits_subtracted.load(Ordering::SeqCst)
    }

    pub fn usages(&self) -> usize {
        self.usage_entries.load(Ordering::SeqCst)
    }
}

fn profile(plan: Plan) -> UserProfile {
    UserProfile {
        id: Uuid::new_v4(),
        plan,
    }
}

#[async_trait]
impl AccountService for StubAccounts {
    async fn authenticate(&self, token: &str) -> Result<UserProfile, AccountError> {
        self.users.get(token).cloned().ok_or(AccountError::Unauthorized)
    }

    async fn has_run_out_of_credits(&self, user_id: Uuid) -> Result<bool, AccountError> {
        Ok(user_id == self.broke)
    }

    async fn subtract_credit(&self, _user_id: Uuid) -> Result<(), AccountError> {
        self.credits_subtracted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_usage_entry(&self, _user_id: Uuid) -> Result<(), AccountError> {
        self.usage_entries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AccountError> {
        Ok(())
    }
}

/// Records every event. Built with `failing`, it also reports each delivery
/// as rejected by the analytics endpoint.
#[derive(Default)]
pub struct RecordingTracker {
    pub events: Mutex<Vec<AnalyticsEvent>>,
    failing: bool,
}

impl RecordingTracker {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventTracker for RecordingTracker {
    async fn track(&self, event: AnalyticsEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event);
        if self.failing {
            return Err(NotifyError::HttpStatus(500));
        }
        Ok(())
    }
}

/// Records every alert, optionally failing each delivery like
/// [`RecordingTracker::failing`].
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(text.to_string());
        if self.failing {
            return Err(NotifyError::HttpStatus(502));
        }
        Ok(())
    }
}

/// Read a progress stream until the writer is dropped.
pub async fn drain(mut receiver: ProgressReceiver) -> Vec<String> {
    let mut fragments = Vec::new();
    let read = async {
        while let Some(bytes) = receiver.recv().await {
            fragments.push(bytes_to_string(bytes));
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("progress stream did not close");
    fragments
}

fn bytes_to_string(bytes: Bytes) -> String {
    String::from_utf8(bytes.to_vec()).expect("fragment is not UTF-8")
}

/// Asserts the stream ended with exactly one terminator.
pub fn assert_terminated_once(fragments: &[String]) {
    assert_eq!(fragments.last().map(String::as_str), Some(DONE));
    assert_eq!(fragments.iter().filter(|f| f.as_str() == DONE).count(), 1);
}

/// Everything a test needs to drive the relay in-process.
pub struct TestEnv {
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub provider: Arc<ScriptedProvider>,
    pub accounts: Arc<StubAccounts>,
    pub tracker: Arc<RecordingTracker>,
    pub alerts: Arc<RecordingNotifier>,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub relay: Arc<WebhookRelay>,
    pub dispatcher: Arc<QueueDispatcher>,
}

impl TestEnv {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::with(provider, StaticEnhancer::new("a red bicycle"), fast_settings())
    }

    pub fn with(
        provider: ScriptedProvider,
        enhancer: StaticEnhancer,
        settings: GenerationSettings,
    ) -> Self {
        Self::build(
            provider,
            enhancer,
            settings,
            RecordingTracker::default(),
            RecordingNotifier::default(),
        )
    }

    /// Analytics and alert deliveries all fail.
    pub fn with_failing_sinks(provider: ScriptedProvider) -> Self {
        Self::build(
            provider,
            StaticEnhancer::new("a red bicycle"),
            fast_settings(),
            RecordingTracker::failing(),
            RecordingNotifier::failing(),
        )
    }

    fn build(
        provider: ScriptedProvider,
        enhancer: StaticEnhancer,
        settings: GenerationSettings,
        tracker: RecordingTracker,
        alerts: RecordingNotifier,
    ) -> Self {
        let store = Arc::new(MemoryJobStore::default());
        let queue = Arc::new(MemoryJobQueue::default());
        let provider = Arc::new(provider);
        let accounts = Arc::new(StubAccounts::new());
        let tracker = Arc::new(tracker);
        let alerts = Arc::new(alerts);

        let orchestrator = Arc::new(GenerationOrchestrator::new(
            store.clone(),
            provider.clone(),
            Arc::new(enhancer),
            accounts.clone(),
            settings.clone(),
        ));
        let relay = Arc::new(WebhookRelay::new(
            store.clone(),
            tracker.clone(),
            alerts.clone(),
            accounts.clone(),
        ));
        let dispatcher = Arc::new(QueueDispatcher::new(
            store.clone(),
            queue.clone(),
            provider.clone(),
            settings.webhook_url,
        ));

        Self {
            store,
            queue,
            provider,
            accounts,
            tracker,
            alerts,
            orchestrator,
            relay,
            dispatcher,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            accounts: self.accounts.clone(),
            orchestrator: self.orchestrator.clone(),
            relay: self.relay.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

/// Wait until the provider has received a submission and return its job id.
pub async fn wait_for_submission(provider: &ScriptedProvider) -> Uuid {
    let wait = async {
        loop {
            if let Some(job_id) = provider.submitted_job_id() {
                return job_id;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("job was never submitted")
}

/// Wait until the job reaches a terminal status.
pub async fn wait_for_terminal(store: &MemoryJobStore, job_id: Uuid) -> Job {
    let wait = async {
        loop {
            if let Some(job) = store.get(job_id).await.expect("store read failed") {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("job never reached a terminal status")
}
