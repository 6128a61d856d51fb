//! SDP offer/answer negotiation.
//!
//! Owns the exactly-once guarantees around side-effecting signals: one
//! answer per session (two independent latches, one for "already sent" and
//! one for "send in flight"), one `accepted` notification, one application
//! of the remote answer. Outbound traffic goes through the channel selector
//! and falls back from the persistent channel to HTTP one-way on any
//! enqueue failure. Local ICE candidates funnel through here so the gating
//! and dedup rules of the candidate manager apply to every path.

use crate::candidates::{CandidateManager, LocalGate};
use crate::channel::{ChannelSelector, SignalChannel};
use crate::envelope::{IceCandidate, SdpDescriptor, SdpKind};
use crate::error::{CallError, EngineError};
use crate::engine::MediaEngine;
use crate::latch::Latch;
use crate::push::PushSignals;
use crate::rest::RestClient;
use crate::sched::{Scheduled, TimerSlot};
use crate::types::{CallDirection, CallResponse};
use crate::worker::SerialWorker;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct Negotiator {
    peer_id: String,
    direction: CallDirection,
    engine: Arc<dyn MediaEngine>,
    rest: Arc<dyn RestClient>,
    push: PushSignals,
    selector: Arc<ChannelSelector>,
    candidates: Arc<CandidateManager>,
    signaling_io: Arc<SerialWorker>,
    finishing: Arc<AtomicBool>,
    auth_recheck: Duration,
    answer_sent: Latch,
    answer_in_flight: Latch,
    accepted_sent: Latch,
    answer_applied: Latch,
    offer_send_retry: TimerSlot,
}

impl Negotiator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer_id: String,
        direction: CallDirection,
        engine: Arc<dyn MediaEngine>,
        rest: Arc<dyn RestClient>,
        push: PushSignals,
        selector: Arc<ChannelSelector>,
        candidates: Arc<CandidateManager>,
        signaling_io: Arc<SerialWorker>,
        finishing: Arc<AtomicBool>,
        auth_recheck: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer_id,
            direction,
            engine,
            rest,
            push,
            selector,
            candidates,
            signaling_io,
            finishing,
            auth_recheck,
            answer_sent: Latch::new(),
            answer_in_flight: Latch::new(),
            accepted_sent: Latch::new(),
            answer_applied: Latch::new(),
            offer_send_retry: TimerSlot::new(),
        })
    }

    fn finishing(&self) -> bool {
        self.finishing.load(Ordering::Acquire)
    }

    pub fn answer_sent(&self) -> bool {
        self.answer_sent.fired()
    }

    pub fn answer_applied(&self) -> bool {
        self.answer_applied.fired()
    }

    pub(crate) fn cancel_timers(&self) {
        self.offer_send_retry.cancel();
    }

    /// Build an audio-only offer, install it locally and transmit it.
    /// With `ice_restart` set this is the recovery re-offer path.
    pub async fn create_and_send_offer(self: &Arc<Self>, ice_restart: bool) -> Result<(), EngineError> {
        if ice_restart {
            self.engine.restart_ice().await;
        }
        let offer = self.engine.create_offer(ice_restart).await?;
        self.engine.set_local_description(&offer).await?;
        self.send_offer(&offer);
        Ok(())
    }

    /// Transmit an offer over the persistent channel, waiting (via scheduled
    /// re-checks, never blocking) for the channel to authenticate. Offers
    /// have no HTTP fallback; the server only relays them over push.
    fn send_offer(self: &Arc<Self>, offer: &SdpDescriptor) {
        self.send_offer_when_ready(offer.encode());
    }

    fn send_offer_when_ready(self: &Arc<Self>, offer_b64: String) {
        if self.finishing() {
            return;
        }
        if self.push.is_ready() {
            if !self.push.send_offer(&self.peer_id, "audio", &offer_b64) {
                warn!("offer: enqueue refused for peer {}", self.peer_id);
            }
            return;
        }
        let this = self.clone();
        self.offer_send_retry.arm(Scheduled::once(self.auth_recheck, async move {
            this.send_offer_when_ready(offer_b64);
        }));
    }

    /// Apply the remote answer exactly once. Returns `true` when this call
    /// actually applied it; a second arrival is a no-op.
    pub async fn apply_remote_answer(&self, answer: SdpDescriptor) -> bool {
        if !self.answer_applied.fire() {
            debug!("answer: already applied, ignoring");
            return false;
        }
        match self.engine.set_remote_description(&answer).await {
            Ok(()) => {
                self.drain_remote_candidates().await;
                debug!("answer: remote description applied");
                true
            }
            Err(e) => {
                warn!("answer: apply failed: {e}");
                // Not applied; let a later arrival retry.
                self.answer_applied.release();
                false
            }
        }
    }

    /// Accept an incoming offer: apply it, replay buffered candidates, build
    /// and install the answer, then transmit it through the exactly-once
    /// machinery.
    pub async fn accept_incoming(self: &Arc<Self>, offer_raw: &str) -> Result<(), CallError> {
        let offer = SdpDescriptor::decode(offer_raw, SdpKind::Offer)
            .ok_or(CallError::InvalidPayload("offer"))?;
        self.engine.set_remote_description(&offer).await?;
        self.drain_remote_candidates().await;
        let answer = self.engine.create_answer().await?;
        self.engine.set_local_description(&answer).await?;
        self.send_answer(answer);
        Ok(())
    }

    /// Answer a mid-call re-offer (ICE restart initiated by the peer).
    /// Never touches the phase, the answer latches or `accepted`; failures
    /// are logged and the call continues on its old description. Returns
    /// `true` when the fresh answer went out.
    pub async fn answer_reoffer(self: &Arc<Self>, offer: SdpDescriptor) -> bool {
        if let Err(e) = self.engine.set_remote_description(&offer).await {
            warn!("reoffer: apply failed: {e}");
            return false;
        }
        self.drain_remote_candidates().await;
        let answer = match self.engine.create_answer().await {
            Ok(a) => a,
            Err(e) => {
                warn!("reoffer: create answer failed: {e}");
                return false;
            }
        };
        if let Err(e) = self.engine.set_local_description(&answer).await {
            warn!("reoffer: install answer failed: {e}");
            return false;
        }
        let answer_b64 = answer.encode();
        let channel = self
            .selector
            .resolve(self.push.is_ready(), self.answer_sent.fired());
        debug!("reoffer: answering via {}", channel.as_str());
        if channel == SignalChannel::Persistent && self.push.is_ready() {
            if !self.push.send_answer(&self.peer_id, &answer_b64) {
                debug!("reoffer: enqueue failed, falling back to http");
                self.selector.force(SignalChannel::Http);
                self.submit_answer_http_plain(answer_b64);
            }
        } else {
            self.submit_answer_http_plain(answer_b64);
        }
        true
    }

    /// Transmit the session's one answer. Guarded by two independent
    /// latches: `answer_sent` stops anything after a success, and
    /// `answer_in_flight` stops concurrent duplicates while a send is
    /// pending. Any persistent-channel refusal forces the one-way HTTP
    /// fallback.
    pub fn send_answer(self: &Arc<Self>, answer: SdpDescriptor) {
        if self.answer_sent.fired() {
            debug!("answer: already sent");
            return;
        }
        if !self.answer_in_flight.fire() {
            debug!("answer: send already in flight");
            return;
        }
        let answer_b64 = answer.encode();
        let channel = self.selector.resolve(self.push.is_ready(), false);
        debug!(
            "answer: channel={} ready={}",
            channel.as_str(),
            self.push.is_ready()
        );
        match channel {
            SignalChannel::Persistent => {
                if !self.push.is_ready() {
                    debug!("answer: persistent not ready, falling back to http");
                    self.selector.force(SignalChannel::Http);
                    self.submit_answer_http(answer_b64);
                    return;
                }
                if !self.push.send_answer(&self.peer_id, &answer_b64) {
                    debug!("answer: enqueue failed, falling back to http");
                    self.selector.force(SignalChannel::Http);
                    self.submit_answer_http(answer_b64);
                    return;
                }
                self.selector.lock(SignalChannel::Persistent);
                self.answer_sent.fire();
                debug!("answer: sent over persistent channel");
                self.send_accepted_once();
                self.flush_queued_local();
                self.answer_in_flight.release();
            }
            SignalChannel::Http => {
                self.selector.lock(SignalChannel::Http);
                self.submit_answer_http(answer_b64);
            }
        }
    }

    /// HTTP answer leg with the success continuation (latch, accepted,
    /// candidate flush). Runs on the signaling worker; the in-flight latch
    /// is held until the request finishes.
    fn submit_answer_http(self: &Arc<Self>, answer_b64: String) {
        let this = self.clone();
        let submitted = self.signaling_io.submit(async move {
            let in_flight = this.clone();
            let _release = scopeguard::guard((), move |_| in_flight.answer_in_flight.release());
            if this.finishing() {
                return;
            }
            match this.rest.submit_answer(&this.peer_id, &answer_b64).await {
                Ok(()) => {
                    if this.answer_sent.fire() {
                        debug!("answer: sent over http");
                        this.send_accepted_once();
                        this.flush_queued_local();
                    } else {
                        debug!("answer: already sent (http)");
                    }
                }
                Err(e) => {
                    warn!("answer: http send failed for peer {}: {e}", this.peer_id);
                }
            }
        });
        if !submitted {
            self.answer_in_flight.release();
        }
    }

    /// HTTP answer leg without latches, used for re-offer answers.
    fn submit_answer_http_plain(self: &Arc<Self>, answer_b64: String) {
        let this = self.clone();
        self.signaling_io.submit(async move {
            if this.finishing() {
                return;
            }
            if let Err(e) = this.rest.submit_answer(&this.peer_id, &answer_b64).await {
                warn!("reoffer: http send failed for peer {}: {e}", this.peer_id);
            }
        });
    }

    /// Tell the peer we accepted, exactly once per session, independent of
    /// which leg carried the answer.
    fn send_accepted_once(self: &Arc<Self>) {
        if !self.accepted_sent.fire() {
            debug!("accepted: already sent");
            return;
        }
        let this = self.clone();
        self.signaling_io.submit(async move {
            if this.finishing() {
                return;
            }
            if let Err(e) = this
                .rest
                .submit_call_response(&this.peer_id, CallResponse::Accepted)
                .await
            {
                warn!("accepted: send failed for peer {}: {e}", this.peer_id);
            }
        });
    }

    /// Gate, dedup and transmit one local candidate.
    pub fn send_local_candidate(self: &Arc<Self>, candidate: IceCandidate) {
        if self.finishing() {
            return;
        }
        let incoming = self.direction.is_incoming();
        let answer_sent = self.answer_sent.fired();
        // The answering side holds candidates back without touching channel
        // selection, so the answer and its candidates share a channel.
        if incoming && !answer_sent {
            self.queue_local(candidate, "before answer");
            return;
        }
        let resolved = self.selector.resolve(self.push.is_ready(), answer_sent);
        let gate = self.candidates.gate_local(
            incoming,
            answer_sent,
            resolved,
            self.selector.locked(),
            self.push.is_ready(),
        );
        match gate {
            LocalGate::QueueUntilAnswer => self.queue_local(candidate, "before answer"),
            LocalGate::QueueUntilReady => self.queue_local(candidate, "channel not ready"),
            LocalGate::Send => self.transmit_candidate(resolved, candidate),
        }
    }

    fn queue_local(&self, candidate: IceCandidate, why: &str) {
        if self.candidates.queue_local(candidate) {
            debug!("candidate: queued ({why})");
        } else {
            debug!("candidate: duplicate queued, dropped");
        }
    }

    fn transmit_candidate(self: &Arc<Self>, resolved: SignalChannel, candidate: IceCandidate) {
        let key = candidate.dedup_key();
        match resolved {
            SignalChannel::Persistent if !self.push.is_ready() => {
                // Unlocked persistent channel that went away: one-way HTTP
                // fallback (the locked case queued in the gate above).
                if !self.candidates.mark_sent(&key) {
                    debug!("candidate: duplicate, dropped");
                    return;
                }
                debug!("candidate: persistent not ready, falling back to http");
                self.selector.force(SignalChannel::Http);
                self.submit_candidate_http(candidate.encode());
            }
            SignalChannel::Persistent => {
                if !self.candidates.mark_sent(&key) {
                    debug!("candidate: duplicate, dropped");
                    return;
                }
                debug!(
                    "candidate: sending over persistent ({} sent)",
                    self.candidates.sent_count()
                );
                if !self.push.send_ice(&self.peer_id, &candidate.encode()) {
                    // Roll back so the same candidate may go over HTTP.
                    self.candidates.unmark_sent(&key);
                    debug!("candidate: enqueue failed, falling back to http");
                    self.selector.force(SignalChannel::Http);
                    if !self.candidates.mark_sent(&key) {
                        debug!("candidate: duplicate, dropped");
                        return;
                    }
                    self.submit_candidate_http(candidate.encode());
                }
            }
            SignalChannel::Http => {
                if !self.candidates.mark_sent(&key) {
                    debug!("candidate: duplicate, dropped");
                    return;
                }
                debug!(
                    "candidate: sending over http ({} sent)",
                    self.candidates.sent_count()
                );
                self.submit_candidate_http(candidate.encode());
            }
        }
    }

    fn submit_candidate_http(self: &Arc<Self>, candidate_b64: String) {
        let this = self.clone();
        self.signaling_io.submit(async move {
            if this.finishing() {
                return;
            }
            if let Err(e) = this
                .rest
                .submit_candidate(&this.peer_id, &candidate_b64)
                .await
            {
                warn!("candidate: http send failed for peer {}: {e}", this.peer_id);
            }
        });
    }

    /// Flush candidates queued behind the answer gate, in arrival order.
    fn flush_queued_local(self: &Arc<Self>) {
        let queued = self.candidates.take_queued_local();
        if queued.is_empty() {
            return;
        }
        debug!("candidate: flushing {} queued", queued.len());
        for candidate in queued {
            self.send_local_candidate(candidate);
        }
    }

    /// Replay remote candidates buffered before the remote description.
    async fn drain_remote_candidates(&self) {
        for candidate in self.candidates.mark_remote_ready() {
            if let Err(e) = self.engine.add_remote_candidate(&candidate).await {
                warn!("candidate: replay failed: {e}");
            }
        }
    }

    /// Feed one inbound candidate payload through dedup, parse and buffer.
    pub async fn handle_remote_candidate(&self, raw: &str) {
        if !self.candidates.note_remote_payload(raw) {
            return;
        }
        let Some(candidate) = IceCandidate::decode(raw) else {
            debug!("candidate: unparseable payload, dropped");
            return;
        };
        if self.candidates.remote_ready() {
            if let Err(e) = self.engine.add_remote_candidate(&candidate).await {
                warn!("candidate: apply failed: {e}");
            }
        } else {
            self.candidates.buffer_remote(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::PushSender;
    use crate::types::IceServer;
    use crate::types::{ConnectionState, IceState};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct StubEngine;

    #[async_trait]
    impl MediaEngine for StubEngine {
        async fn ensure_audio_capture(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn apply_ice_servers(&self, _: &[IceServer]) -> Result<(), EngineError> {
            Ok(())
        }
        async fn create_offer(&self, _: bool) -> Result<SdpDescriptor, EngineError> {
            Ok(SdpDescriptor::offer("v=0 offer"))
        }
        async fn create_answer(&self) -> Result<SdpDescriptor, EngineError> {
            Ok(SdpDescriptor::answer("v=0 answer"))
        }
        async fn set_local_description(&self, _: &SdpDescriptor) -> Result<(), EngineError> {
            Ok(())
        }
        async fn set_remote_description(&self, _: &SdpDescriptor) -> Result<(), EngineError> {
            Ok(())
        }
        async fn add_remote_candidate(&self, _: &IceCandidate) -> Result<(), EngineError> {
            Ok(())
        }
        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
        fn ice_state(&self) -> IceState {
            IceState::Connected
        }
        fn signaling_stable(&self) -> bool {
            true
        }
        async fn restart_ice(&self) {}
        async fn set_mic_enabled(&self, _: bool) {}
        async fn close(&self) {}
    }

    #[derive(Default)]
    struct CountingRest {
        answers: AtomicUsize,
        responses: Mutex<Vec<CallResponse>>,
        candidates: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RestClient for CountingRest {
        async fn fetch_call_offer(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn submit_answer(&self, _: &str, _: &str) -> Result<()> {
            self.answers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn submit_candidate(&self, _: &str, c: &str) -> Result<()> {
            self.candidates.lock().unwrap().push(c.to_string());
            Ok(())
        }
        async fn fetch_call_answer(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn fetch_candidates_since(&self, _: &str, _: i64) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn submit_call_response(&self, _: &str, r: CallResponse) -> Result<()> {
            self.responses.lock().unwrap().push(r);
            Ok(())
        }
        async fn check_call_response(&self, _: &str) -> Result<Option<CallResponse>> {
            Ok(None)
        }
        async fn send_call_notification(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn fetch_turn_credentials(&self, _: &str, _: u32) -> Result<Vec<IceServer>> {
            Ok(Vec::new())
        }
        async fn fetch_turn_config(&self) -> Result<Vec<IceServer>> {
            Ok(Vec::new())
        }
    }

    struct StubPush {
        ready: AtomicBool,
        accept: AtomicBool,
        answers: AtomicUsize,
        ice: Mutex<Vec<Value>>,
    }

    impl StubPush {
        fn new(ready: bool, accept: bool) -> Self {
            Self {
                ready: AtomicBool::new(ready),
                accept: AtomicBool::new(accept),
                answers: AtomicUsize::new(0),
                ice: Mutex::new(Vec::new()),
            }
        }
    }

    impl PushSender for StubPush {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
        fn send(&self, frame: Value) -> bool {
            if !self.accept.load(Ordering::SeqCst) {
                return false;
            }
            match frame["type"].as_str() {
                Some("call_answer") => {
                    self.answers.fetch_add(1, Ordering::SeqCst);
                }
                Some("call_ice_candidate") => {
                    self.ice.lock().unwrap().push(frame);
                }
                _ => {}
            }
            true
        }
    }

    struct Fixture {
        negotiator: Arc<Negotiator>,
        rest: Arc<CountingRest>,
        push: Arc<StubPush>,
        selector: Arc<ChannelSelector>,
        candidates: Arc<CandidateManager>,
    }

    fn fixture(direction: CallDirection, push: StubPush) -> Fixture {
        let rest = Arc::new(CountingRest::default());
        let push = Arc::new(push);
        let selector = Arc::new(ChannelSelector::new());
        let candidates = Arc::new(CandidateManager::new());
        let negotiator = Negotiator::new(
            "peer-1".to_string(),
            direction,
            Arc::new(StubEngine),
            rest.clone(),
            PushSignals::new(push.clone()),
            selector.clone(),
            candidates.clone(),
            Arc::new(SerialWorker::spawn("signaling")),
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(5),
        );
        Fixture {
            negotiator,
            rest,
            push,
            selector,
            candidates,
        }
    }

    fn answer() -> SdpDescriptor {
        SdpDescriptor::answer("v=0 answer")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_answer_sends_transmit_exactly_one() {
        let fx = fixture(CallDirection::Incoming, StubPush::new(true, true));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let negotiator = fx.negotiator.clone();
            tasks.push(tokio::spawn(async move {
                negotiator.send_answer(answer());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let push_sends = fx.push.answers.load(Ordering::SeqCst);
        let http_sends = fx.rest.answers.load(Ordering::SeqCst);
        assert_eq!(push_sends + http_sends, 1, "exactly one answer on the wire");
        assert!(fx.negotiator.answer_sent());
        assert!(fx.selector.locked());
    }

    #[tokio::test]
    async fn test_answer_falls_back_to_http_and_locks() {
        // Channel claims ready but refuses the enqueue.
        let fx = fixture(CallDirection::Incoming, StubPush::new(true, false));
        fx.negotiator.send_answer(answer());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.rest.answers.load(Ordering::SeqCst), 1);
        assert!(fx.negotiator.answer_sent());
        assert!(fx.selector.locked());
        assert_eq!(fx.selector.current(), Some(SignalChannel::Http));
        // Accepted went out exactly once, after the answer.
        assert_eq!(
            *fx.rest.responses.lock().unwrap(),
            vec![CallResponse::Accepted]
        );
    }

    #[tokio::test]
    async fn test_second_answer_send_is_noop_after_success() {
        let fx = fixture(CallDirection::Incoming, StubPush::new(true, true));
        fx.negotiator.send_answer(answer());
        tokio::time::sleep(Duration::from_millis(20)).await;
        fx.negotiator.send_answer(answer());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fx.push.answers.load(Ordering::SeqCst), 1);
        assert_eq!(fx.rest.answers.load(Ordering::SeqCst), 0);
        assert_eq!(
            *fx.rest.responses.lock().unwrap(),
            vec![CallResponse::Accepted]
        );
    }

    #[tokio::test]
    async fn test_incoming_candidates_queue_until_answer_then_flush() {
        let fx = fixture(CallDirection::Incoming, StubPush::new(true, true));
        let c1 = IceCandidate::new("0", 0, "candidate:1 1 UDP 1 10.0.0.1 9 typ host");
        let c2 = IceCandidate::new("0", 0, "candidate:2 1 UDP 1 10.0.0.2 9 typ host");
        fx.negotiator.send_local_candidate(c1.clone());
        fx.negotiator.send_local_candidate(c2.clone());
        // Nothing on the wire yet.
        assert!(fx.push.ice.lock().unwrap().is_empty());
        fx.negotiator.send_answer(answer());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let ice = fx.push.ice.lock().unwrap();
        assert_eq!(ice.len(), 2);
        assert_eq!(ice[0]["candidate"], Value::String(c1.encode()));
        assert_eq!(ice[1]["candidate"], Value::String(c2.encode()));
    }

    #[tokio::test]
    async fn test_duplicate_candidates_transmit_once() {
        let fx = fixture(CallDirection::Outgoing, StubPush::new(true, true));
        let c = IceCandidate::new("0", 0, "candidate:1 1 UDP 1 10.0.0.1 9 typ host");
        for _ in 0..5 {
            fx.negotiator.send_local_candidate(c.clone());
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fx.push.ice.lock().unwrap().len(), 1);
        assert_eq!(fx.candidates.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_candidate_enqueue_failure_falls_back_once() {
        let fx = fixture(CallDirection::Outgoing, StubPush::new(true, false));
        let c = IceCandidate::new("0", 0, "candidate:1 1 UDP 1 10.0.0.1 9 typ host");
        fx.negotiator.send_local_candidate(c.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Went over HTTP exactly once, channel locked to HTTP.
        assert_eq!(fx.rest.candidates.lock().unwrap().len(), 1);
        assert_eq!(fx.selector.current(), Some(SignalChannel::Http));
        assert!(fx.selector.locked());
        // Resend of the same candidate is dropped.
        fx.negotiator.send_local_candidate(c);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fx.rest.candidates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_answer_applied_once() {
        let fx = fixture(CallDirection::Outgoing, StubPush::new(true, true));
        assert!(fx.negotiator.apply_remote_answer(answer()).await);
        assert!(!fx.negotiator.apply_remote_answer(answer()).await);
        assert!(fx.negotiator.answer_applied());
    }

    #[tokio::test]
    async fn test_remote_candidates_buffer_until_description() {
        let fx = fixture(CallDirection::Outgoing, StubPush::new(true, true));
        let raw = IceCandidate::new("0", 0, "candidate:9 1 UDP 1 10.0.0.9 9 typ host").encode();
        fx.negotiator.handle_remote_candidate(&raw).await;
        // Duplicate payload dropped before parse.
        fx.negotiator.handle_remote_candidate(&raw).await;
        assert!(!fx.candidates.remote_ready());
        assert!(fx.negotiator.apply_remote_answer(answer()).await);
        assert!(fx.candidates.remote_ready());
    }
}
