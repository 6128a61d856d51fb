//! In-memory fakes for the session collaborators.

use anyhow::Result;
use async_trait::async_trait;
use lark_calls::{
    CallConfig, CallRegistry, CallResponse, ConnectionState, EngineError, EngineEvent, IceCandidate,
    IceServer, IceState, MediaEngine, MemoryCallLogStore, PushSender, RestClient, SdpDescriptor,
    SessionController, SessionDeps, SessionParams,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Scriptable media engine.
pub struct FakeEngine {
    event_tx: mpsc::UnboundedSender<EngineEvent>,
    conn: Mutex<ConnectionState>,
    ice: Mutex<IceState>,
    pub capture_denied: AtomicBool,
    pub local_descs: Mutex<Vec<SdpDescriptor>>,
    pub remote_descs: Mutex<Vec<SdpDescriptor>>,
    pub added_candidates: Mutex<Vec<IceCandidate>>,
    pub applied_servers: Mutex<Vec<Vec<IceServer>>>,
    pub restart_count: AtomicU32,
    pub mic_enabled: AtomicBool,
    pub closed: AtomicBool,
    offer_seq: AtomicU32,
}

impl FakeEngine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            event_tx,
            conn: Mutex::new(ConnectionState::New),
            ice: Mutex::new(IceState::New),
            capture_denied: AtomicBool::new(false),
            local_descs: Mutex::new(Vec::new()),
            remote_descs: Mutex::new(Vec::new()),
            added_candidates: Mutex::new(Vec::new()),
            applied_servers: Mutex::new(Vec::new()),
            restart_count: AtomicU32::new(0),
            mic_enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            offer_seq: AtomicU32::new(0),
        });
        (engine, event_rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn set_states(&self, conn: ConnectionState, ice: IceState) {
        *self.conn.lock().unwrap() = conn;
        *self.ice.lock().unwrap() = ice;
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn ensure_audio_capture(&self) -> Result<(), EngineError> {
        if self.capture_denied.load(Ordering::SeqCst) {
            return Err(EngineError::PermissionDenied);
        }
        Ok(())
    }

    async fn apply_ice_servers(&self, servers: &[IceServer]) -> Result<(), EngineError> {
        self.applied_servers.lock().unwrap().push(servers.to_vec());
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SdpDescriptor, EngineError> {
        let seq = self.offer_seq.fetch_add(1, Ordering::SeqCst);
        let marker = if ice_restart { "restart" } else { "initial" };
        Ok(SdpDescriptor::offer(format!(
            "v=0\r\no=- {seq} {marker} IN IP4 127.0.0.1\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n"
        )))
    }

    async fn create_answer(&self) -> Result<SdpDescriptor, EngineError> {
        Ok(SdpDescriptor::answer(
            "v=0\r\no=- 1 answer IN IP4 127.0.0.1\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
        ))
    }

    async fn set_local_description(&self, desc: &SdpDescriptor) -> Result<(), EngineError> {
        self.local_descs.lock().unwrap().push(desc.clone());
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SdpDescriptor) -> Result<(), EngineError> {
        self.remote_descs.lock().unwrap().push(desc.clone());
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError> {
        self.added_candidates.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.conn.lock().unwrap()
    }

    fn ice_state(&self) -> IceState {
        *self.ice.lock().unwrap()
    }

    fn signaling_stable(&self) -> bool {
        true
    }

    async fn restart_ice(&self) {
        self.restart_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn set_mic_enabled(&self, enabled: bool) {
        self.mic_enabled.store(enabled, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Scriptable REST collaborator.
#[derive(Default)]
pub struct FakeRest {
    /// Offer served by `fetch_call_offer` once `offer_ready_after_fetches`
    /// fetches have happened.
    pub offer: Mutex<Option<String>>,
    pub offer_ready_after_fetches: AtomicU32,
    pub offer_fetches: AtomicU32,
    pub answer: Mutex<Option<String>>,
    pub response_to_check: Mutex<Option<CallResponse>>,
    pub served_candidates: Mutex<Vec<String>>,
    pub submitted_answers: Mutex<Vec<String>>,
    pub submitted_candidates: Mutex<Vec<String>>,
    pub submitted_responses: Mutex<Vec<CallResponse>>,
    pub notifications: AtomicU32,
}

#[async_trait]
impl RestClient for FakeRest {
    async fn fetch_call_offer(&self, _peer_id: &str) -> Result<Option<String>> {
        let fetches = self.offer_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if fetches < self.offer_ready_after_fetches.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.offer.lock().unwrap().clone())
    }

    async fn submit_answer(&self, _peer_id: &str, answer_b64: &str) -> Result<()> {
        self.submitted_answers
            .lock()
            .unwrap()
            .push(answer_b64.to_string());
        Ok(())
    }

    async fn submit_candidate(&self, _peer_id: &str, candidate_b64: &str) -> Result<()> {
        self.submitted_candidates
            .lock()
            .unwrap()
            .push(candidate_b64.to_string());
        Ok(())
    }

    async fn fetch_call_answer(&self, _peer_id: &str) -> Result<Option<String>> {
        Ok(self.answer.lock().unwrap().clone())
    }

    async fn fetch_candidates_since(&self, _peer_id: &str, _since: i64) -> Result<Vec<String>> {
        Ok(std::mem::take(&mut *self.served_candidates.lock().unwrap()))
    }

    async fn submit_call_response(&self, _peer_id: &str, response: CallResponse) -> Result<()> {
        self.submitted_responses.lock().unwrap().push(response);
        Ok(())
    }

    async fn check_call_response(&self, _peer_id: &str) -> Result<Option<CallResponse>> {
        Ok(*self.response_to_check.lock().unwrap())
    }

    async fn send_call_notification(&self, _peer_id: &str, _call_type: &str) -> Result<()> {
        self.notifications.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_turn_credentials(&self, _user_id: &str, _ttl: u32) -> Result<Vec<IceServer>> {
        Ok(Vec::new())
    }

    async fn fetch_turn_config(&self) -> Result<Vec<IceServer>> {
        Ok(Vec::new())
    }
}

/// Scriptable persistent channel.
pub struct FakePush {
    pub ready: AtomicBool,
    pub accept: AtomicBool,
    pub frames: Mutex<Vec<Value>>,
}

impl FakePush {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            accept: AtomicBool::new(true),
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn frames_of_type(&self, frame_type: &str) -> Vec<Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f["type"] == frame_type)
            .cloned()
            .collect()
    }
}

impl PushSender for FakePush {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send(&self, frame: Value) -> bool {
        if !self.accept.load(Ordering::SeqCst) {
            return false;
        }
        self.frames.lock().unwrap().push(frame);
        true
    }
}

/// Full collaborator set plus the engine event channel for one session.
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub rest: Arc<FakeRest>,
    pub push: Arc<FakePush>,
    pub store: Arc<MemoryCallLogStore>,
    pub registry: Arc<CallRegistry>,
    engine_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl Harness {
    pub fn new(push_ready: bool) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let (engine, engine_rx) = FakeEngine::new();
        Self {
            engine,
            rest: Arc::new(FakeRest::default()),
            push: Arc::new(FakePush::new(push_ready)),
            store: Arc::new(MemoryCallLogStore::new()),
            registry: Arc::new(CallRegistry::new(Duration::from_millis(100))),
            engine_rx: Mutex::new(Some(engine_rx)),
        }
    }

    pub fn deps(&self) -> SessionDeps {
        SessionDeps {
            engine: self.engine.clone(),
            rest: self.rest.clone(),
            push: self.push.clone(),
            store: self.store.clone(),
            registry: self.registry.clone(),
        }
    }

    pub fn params(&self) -> SessionParams {
        SessionParams {
            peer_id: "peer-1".to_string(),
            peer_name: Some("Ada".to_string()),
            call_id: None,
            self_user_id: Some("me".to_string()),
        }
    }

    fn take_engine_rx(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        self.engine_rx
            .lock()
            .unwrap()
            .take()
            .expect("engine event channel already taken")
    }

    pub fn outgoing(&self, config: CallConfig) -> Arc<SessionController> {
        SessionController::outgoing(self.params(), config, self.deps(), self.take_engine_rx())
            .expect("outgoing session")
    }

    pub fn incoming(&self, config: CallConfig) -> Arc<SessionController> {
        SessionController::incoming(self.params(), config, self.deps(), self.take_engine_rx())
            .expect("incoming session")
    }
}

/// A valid base64 JSON offer envelope.
pub fn offer_envelope() -> String {
    SdpDescriptor::offer("v=0\r\no=- 7 remote IN IP4 127.0.0.1\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n")
        .encode()
}

/// A valid base64 JSON answer envelope.
pub fn answer_envelope() -> String {
    SdpDescriptor::answer("v=0\r\no=- 8 remote IN IP4 127.0.0.1\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n")
        .encode()
}

/// Wait until `predicate` holds, polling every few milliseconds, or panic
/// after `timeout`.
pub async fn wait_for(timeout: Duration, what: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
