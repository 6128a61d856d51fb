//! Call session controller.
//!
//! The top-level state machine for one call. It owns the phase, drives the
//! negotiator and channel selector, consumes transport events (push
//! messages, engine callbacks, poller results), supervises recovery, and on
//! teardown records the call log exactly once. The UI observes through the
//! event bus and calls the user-action methods (`accept`, `reject`,
//! `hang_up`, media toggles); it never reaches into the internals.
//!
//! Every scheduled callback and worker job checks the `finishing` guard
//! before touching state, so results of in-flight I/O are discarded once
//! the session is ending.

use crate::call_log::CallLogRecorder;
use crate::candidates::CandidateManager;
use crate::channel::{ChannelSelector, SignalChannel};
use crate::config::CallConfig;
use crate::engine::{EngineEvent, MediaEngine};
use crate::envelope::{SdpDescriptor, SdpKind};
use crate::error::CallError;
use crate::events::{SessionEvent, SessionEvents};
use crate::ice_servers::IceServerCache;
use crate::media_sync::{MediaStateSynchronizer, RemoteMediaState};
use crate::negotiator::Negotiator;
use crate::phase::{CallPhase, PhaseTransition};
use crate::push::{PushEvent, PushSender, PushSignals};
use crate::recovery::{RecoverySupervisor, TickVerdict};
use crate::registry::CallRegistry;
use crate::rest::RestClient;
use crate::sched::{Scheduled, TimerSlot};
use crate::storage::CallLogStore;
use crate::types::{CallDirection, CallResponse, EndReason, MediaKind, generate_call_id};
use crate::worker::SerialWorker;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast, mpsc};

/// Identity of the session being established.
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    pub peer_id: String,
    pub peer_name: Option<String>,
    pub call_id: Option<String>,
    /// Our own user id, used for per-user TURN credential fetches.
    pub self_user_id: Option<String>,
}

/// External collaborators the session consumes.
#[derive(Clone)]
pub struct SessionDeps {
    pub engine: Arc<dyn MediaEngine>,
    pub rest: Arc<dyn RestClient>,
    pub push: Arc<dyn PushSender>,
    pub store: Arc<dyn CallLogStore>,
    pub registry: Arc<CallRegistry>,
}

pub struct SessionController {
    peer_id: String,
    peer_name: Mutex<Option<String>>,
    call_id: Option<String>,
    direction: CallDirection,
    config: CallConfig,
    created_at: DateTime<Utc>,
    self_user_id: Option<String>,

    engine: Arc<dyn MediaEngine>,
    rest: Arc<dyn RestClient>,
    push: PushSignals,
    registry: Arc<CallRegistry>,

    selector: Arc<ChannelSelector>,
    candidates: Arc<CandidateManager>,
    negotiator: Arc<Negotiator>,
    recovery: RecoverySupervisor,
    media_sync: MediaStateSynchronizer,
    recorder: CallLogRecorder,
    ice_servers: IceServerCache,
    events: SessionEvents,

    io: Arc<SerialWorker>,
    signaling_io: Arc<SerialWorker>,

    phase: Mutex<CallPhase>,
    end_reason: Mutex<Option<EndReason>>,
    finishing: Arc<AtomicBool>,
    accepting: AtomicBool,
    wait_accept_after_auth: AtomicBool,
    pending_offer: Mutex<Option<String>>,
    last_ice_check: AtomicI64,
    answer_polls: AtomicU32,
    mic_muted: AtomicBool,
    speaker_on: AtomicBool,

    offer_retry: TimerSlot,
    auth_wait: TimerSlot,
    response_poll: TimerSlot,
    ice_poll: TimerSlot,
    media_init: TimerSlot,
}

impl SessionController {
    /// Create a controller for an outgoing call. Claims the registry slot;
    /// fails when another call is in progress. Must be called from within a
    /// tokio runtime.
    pub fn outgoing(
        params: SessionParams,
        config: CallConfig,
        deps: SessionDeps,
        engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Result<Arc<Self>, CallError> {
        if !deps.registry.try_begin_outgoing() {
            return Err(CallError::CallInProgress);
        }
        Ok(Self::build(CallDirection::Outgoing, params, config, deps, engine_events))
    }

    /// Create a controller for an incoming call. Claims the registry slot
    /// and dedups repeat invocations for the same peer.
    pub fn incoming(
        params: SessionParams,
        config: CallConfig,
        deps: SessionDeps,
        engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Result<Arc<Self>, CallError> {
        if !deps.registry.try_begin_incoming(&params.peer_id) {
            return Err(CallError::CallInProgress);
        }
        Ok(Self::build(CallDirection::Incoming, params, config, deps, engine_events))
    }

    fn build(
        direction: CallDirection,
        params: SessionParams,
        config: CallConfig,
        deps: SessionDeps,
        engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Arc<Self> {
        let finishing = Arc::new(AtomicBool::new(false));
        let selector = Arc::new(ChannelSelector::new());
        let candidates = Arc::new(CandidateManager::new());
        let signaling_io = Arc::new(SerialWorker::spawn("signaling"));
        let io = Arc::new(SerialWorker::spawn("io"));
        let push = PushSignals::new(deps.push);
        let call_id = params.call_id.or_else(|| match direction {
            CallDirection::Outgoing => Some(generate_call_id()),
            CallDirection::Incoming => None,
        });

        let negotiator = Negotiator::new(
            params.peer_id.clone(),
            direction,
            deps.engine.clone(),
            deps.rest.clone(),
            push.clone(),
            selector.clone(),
            candidates.clone(),
            signaling_io.clone(),
            finishing.clone(),
            config.auth_recheck,
        );

        let controller = Arc::new(Self {
            peer_id: params.peer_id.clone(),
            peer_name: Mutex::new(params.peer_name),
            call_id,
            direction,
            created_at: Utc::now(),
            self_user_id: params.self_user_id,
            engine: deps.engine,
            rest: deps.rest,
            push: push.clone(),
            registry: deps.registry,
            selector,
            candidates,
            negotiator,
            recovery: RecoverySupervisor::new(
                direction,
                config.recovery_grace,
                config.recovery_max_attempts,
            ),
            media_sync: MediaStateSynchronizer::new(params.peer_id, push),
            recorder: CallLogRecorder::new(deps.store),
            ice_servers: IceServerCache::new(config.stun_fallback_url.clone()),
            events: SessionEvents::new(),
            io,
            signaling_io,
            phase: Mutex::new(CallPhase::Idle),
            end_reason: Mutex::new(None),
            finishing,
            accepting: AtomicBool::new(false),
            wait_accept_after_auth: AtomicBool::new(false),
            pending_offer: Mutex::new(None),
            last_ice_check: AtomicI64::new(0),
            answer_polls: AtomicU32::new(0),
            mic_muted: AtomicBool::new(false),
            speaker_on: AtomicBool::new(false),
            offer_retry: TimerSlot::new(),
            auth_wait: TimerSlot::new(),
            response_poll: TimerSlot::new(),
            ice_poll: TimerSlot::new(),
            media_init: TimerSlot::new(),
            config,
        });
        tokio::spawn(Self::pump_engine_events(
            Arc::downgrade(&controller),
            engine_events,
        ));
        controller
    }

    // ---- observation ----------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> CallPhase {
        self.phase.lock().unwrap().clone()
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn peer_name(&self) -> Option<String> {
        self.peer_name.lock().unwrap().clone()
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn remote_media(&self) -> RemoteMediaState {
        self.media_sync.remote_state()
    }

    pub fn is_finished(&self) -> bool {
        self.finishing.load(Ordering::Acquire)
    }

    fn finishing(&self) -> bool {
        self.finishing.load(Ordering::Acquire)
    }

    fn log_ctx(&self) -> String {
        format!(
            "dir={} call={} peer={}",
            self.direction.as_str(),
            self.call_id.as_deref().unwrap_or("-"),
            self.peer_id
        )
    }

    // ---- lifecycle ------------------------------------------------------

    /// Begin the session: dial out or register the incoming ring.
    pub async fn start(self: &Arc<Self>) {
        match self.direction {
            CallDirection::Outgoing => self.start_outgoing().await,
            CallDirection::Incoming => self.start_incoming().await,
        }
    }

    async fn start_outgoing(self: &Arc<Self>) {
        if !self.apply_phase(PhaseTransition::DialingStarted) {
            return;
        }
        info!("starting outgoing call: {}", self.log_ctx());
        if let Err(e) = self.engine.ensure_audio_capture().await {
            warn!("audio capture unavailable: {e} ({})", self.log_ctx());
            self.fail(
                EndReason::PermissionDenied,
                "Microphone access is required for calls",
                false,
            );
            return;
        }
        if self.push.is_ready() {
            self.selector.preselect(SignalChannel::Persistent);
        }
        let servers = self
            .ice_servers
            .load(
                self.rest.as_ref(),
                self.self_user_id.as_deref(),
                self.config.turn_ttl_minutes,
            )
            .await;
        if self.finishing() {
            return;
        }
        if let Err(e) = self.engine.apply_ice_servers(&servers).await {
            warn!("ice servers: apply failed: {e}");
            self.fail(EndReason::NegotiationFailed, "Could not set up the call", true);
            return;
        }
        match self.negotiator.create_and_send_offer(false).await {
            Ok(()) => {
                self.apply_phase(PhaseTransition::OfferSent);
                self.start_pollers();
                let this = self.clone();
                self.signaling_io.submit(async move {
                    if this.finishing() {
                        return;
                    }
                    if let Err(e) = this
                        .rest
                        .send_call_notification(&this.peer_id, "audio")
                        .await
                    {
                        debug!("call notification failed: {e}");
                        this.events.publish(SessionEvent::NotificationFailed);
                    }
                });
            }
            Err(e) => {
                warn!("offer: negotiation failed: {e} ({})", self.log_ctx());
                self.fail(EndReason::NegotiationFailed, "Could not start the call", true);
            }
        }
    }

    async fn start_incoming(self: &Arc<Self>) {
        if !self.apply_phase(PhaseTransition::IncomingRegistered) {
            return;
        }
        info!("incoming call ringing: {}", self.log_ctx());
        self.prefetch_ice_servers();
        // Early offer fetch: if the offer already sits on the server, accept
        // can take the fast path without waiting for a push.
        let this = self.clone();
        self.io.submit(async move {
            if this.finishing() {
                return;
            }
            match this.rest.fetch_call_offer(&this.peer_id).await {
                Ok(Some(offer)) => {
                    if this.negotiator.answer_sent() || this.phase().is_active() {
                        debug!("pending offer ignored: already answered/active");
                        return;
                    }
                    let mut pending = this.pending_offer.lock().unwrap();
                    if pending.is_some()
                        && this.selector.offer_channel() == Some(SignalChannel::Persistent)
                    {
                        debug!("pending offer ignored: push offer already present");
                        return;
                    }
                    this.selector.mark_offer_channel(
                        SignalChannel::Http,
                        this.negotiator.answer_sent(),
                        false,
                    );
                    debug!("pending offer fetched over http, {} bytes", offer.len());
                    *pending = Some(offer);
                }
                Ok(None) => {}
                Err(e) => debug!("pending offer fetch failed: {e}"),
            }
        });
    }

    fn prefetch_ice_servers(self: &Arc<Self>) {
        if self.ice_servers.is_primed() {
            return;
        }
        let this = self.clone();
        self.io.submit(async move {
            if this.finishing() {
                return;
            }
            let servers = this
                .ice_servers
                .load(
                    this.rest.as_ref(),
                    this.self_user_id.as_deref(),
                    this.config.turn_ttl_minutes,
                )
                .await;
            debug!("ice servers prefetched: {}", servers.len());
        });
    }

    // ---- user actions ---------------------------------------------------

    /// Accept the ringing incoming call.
    pub async fn accept(self: &Arc<Self>) {
        if self.finishing() || !self.phase().can_accept() {
            return;
        }
        if let Err(e) = self.engine.ensure_audio_capture().await {
            warn!("audio capture unavailable: {e} ({})", self.log_ctx());
            self.fail(
                EndReason::PermissionDenied,
                "Microphone access is required for calls",
                false,
            );
            return;
        }
        if self
            .accepting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.apply_phase(PhaseTransition::AcceptStarted);
        self.wait_accept_after_auth.store(false, Ordering::Release);
        self.auth_wait.cancel();
        if !self.push.is_ready() {
            // Give the persistent channel a bounded window to authenticate
            // before committing the answer to HTTP.
            self.wait_accept_after_auth.store(true, Ordering::Release);
            debug!("accept: waiting for channel auth ({})", self.log_ctx());
            let this = self.clone();
            self.auth_wait.arm(Scheduled::once(self.config.auth_wait, async move {
                if !this.wait_accept_after_auth.swap(false, Ordering::AcqRel)
                    || !this.accepting.load(Ordering::Acquire)
                    || this.finishing()
                {
                    return;
                }
                debug!("accept: channel auth timed out, using http");
                this.selector.preselect(SignalChannel::Http);
                this.attempt_accept(0);
            }));
            return;
        }
        self.selector.preselect(SignalChannel::Persistent);
        debug!(
            "accept: resolved={} ({})",
            self.selector
                .resolve(self.push.is_ready(), self.negotiator.answer_sent())
                .as_str(),
            self.log_ctx()
        );
        self.attempt_accept(0);
    }

    /// The persistent channel finished authenticating. Continues a waiting
    /// accept, if any.
    pub fn handle_channel_ready(self: &Arc<Self>) {
        debug!("channel authenticated ({})", self.log_ctx());
        if self.wait_accept_after_auth.swap(false, Ordering::AcqRel)
            && self.accepting.load(Ordering::Acquire)
            && !self.finishing()
        {
            self.auth_wait.cancel();
            self.selector.preselect(SignalChannel::Persistent);
            self.attempt_accept(0);
        }
    }

    fn attempt_accept(self: &Arc<Self>, attempt: u32) {
        if !self.accepting.load(Ordering::Acquire) || self.finishing() {
            return;
        }
        let pending = self.pending_offer.lock().unwrap().clone();
        if let Some(offer) = pending {
            debug!("accept: fast path, offer {} bytes", offer.len());
            let this = self.clone();
            tokio::spawn(async move {
                this.run_accept_with_offer(offer).await;
            });
            return;
        }
        let this = self.clone();
        self.signaling_io.submit(async move {
            if !this.accepting.load(Ordering::Acquire) || this.finishing() {
                return;
            }
            debug!("accept: offer fetch attempt {attempt}");
            match this.rest.fetch_call_offer(&this.peer_id).await {
                Ok(Some(offer)) => {
                    this.selector.mark_offer_channel(
                        SignalChannel::Http,
                        this.negotiator.answer_sent(),
                        this.phase().is_active(),
                    );
                    *this.pending_offer.lock().unwrap() = Some(offer.clone());
                    debug!("accept: offer fetched, {} bytes", offer.len());
                    this.run_accept_with_offer(offer).await;
                }
                other => {
                    if let Err(e) = other {
                        debug!("accept: offer fetch failed: {e}");
                    }
                    if attempt < this.config.offer_retry_max {
                        this.schedule_offer_retry(attempt + 1);
                    } else {
                        warn!("accept: offer retries exhausted ({})", this.log_ctx());
                        this.accepting.store(false, Ordering::Release);
                        this.fail(EndReason::NoOffer, "The call is no longer available", false);
                    }
                }
            }
        });
    }

    fn schedule_offer_retry(self: &Arc<Self>, attempt: u32) {
        let this = self.clone();
        self.offer_retry.arm(Scheduled::once(
            self.config.offer_retry_delay,
            async move {
                this.attempt_accept(attempt);
            },
        ));
    }

    async fn run_accept_with_offer(self: &Arc<Self>, offer: String) {
        if self.finishing() {
            return;
        }
        // Fast path: cached servers (or the STUN fallback) so the answer is
        // not stuck behind a credential fetch.
        let fast = self.ice_servers.fast();
        if let Err(e) = self.engine.apply_ice_servers(&fast).await {
            warn!("ice servers: apply failed: {e}");
            self.fail(EndReason::NegotiationFailed, "Could not set up the call", true);
            return;
        }
        match self.negotiator.accept_incoming(&offer).await {
            Ok(()) => {
                self.start_pollers();
                self.accepting.store(false, Ordering::Release);
                // Refresh the server set in the background and nudge ICE so
                // late TURN credentials still help this call.
                let this = self.clone();
                self.io.submit(async move {
                    if this.finishing() {
                        return;
                    }
                    let servers = this
                        .ice_servers
                        .load(
                            this.rest.as_ref(),
                            this.self_user_id.as_deref(),
                            this.config.turn_ttl_minutes,
                        )
                        .await;
                    if this.finishing() || servers.is_empty() {
                        return;
                    }
                    match this.engine.apply_ice_servers(&servers).await {
                        Ok(()) => this.engine.restart_ice().await,
                        Err(e) => debug!("ice servers: refresh apply failed: {e}"),
                    }
                });
            }
            Err(CallError::InvalidPayload(what)) => {
                warn!("accept: invalid {what} ({})", self.log_ctx());
                self.fail(EndReason::NegotiationFailed, "The incoming call could not be read", true);
            }
            Err(e) => {
                warn!("accept: negotiation failed: {e} ({})", self.log_ctx());
                self.fail(EndReason::NegotiationFailed, "Could not answer the call", true);
            }
        }
    }

    /// Decline the ringing incoming call.
    pub fn reject(self: &Arc<Self>) {
        if self.finishing() {
            return;
        }
        info!("rejecting call: {}", self.log_ctx());
        self.accepting.store(false, Ordering::Release);
        self.wait_accept_after_auth.store(false, Ordering::Release);
        self.auth_wait.cancel();
        self.offer_retry.cancel();
        *self.end_reason.lock().unwrap() = Some(EndReason::Rejected);
        let this = self.clone();
        self.signaling_io.submit(async move {
            if let Err(e) = this
                .rest
                .submit_call_response(&this.peer_id, CallResponse::Rejected)
                .await
            {
                debug!("reject: response send failed: {e}");
            }
        });
        self.push.send_end(&self.peer_id);
        self.end_call(false);
    }

    /// Hang up, notifying the remote side.
    pub fn hang_up(self: &Arc<Self>) {
        info!("hanging up: {}", self.log_ctx());
        self.end_call(true);
    }

    /// Toggle the microphone; the new state is mirrored to the engine and
    /// broadcast to the peer.
    pub async fn set_mic_muted(self: &Arc<Self>, muted: bool) {
        self.mic_muted.store(muted, Ordering::Release);
        self.engine.set_mic_enabled(!muted).await;
        self.send_media_state(MediaKind::Mic, !muted);
    }

    pub fn mic_muted(&self) -> bool {
        self.mic_muted.load(Ordering::Acquire)
    }

    /// Toggle the speaker flag. Routing is local; the peer is only informed.
    pub fn set_speaker_on(self: &Arc<Self>, on: bool) {
        self.speaker_on.store(on, Ordering::Release);
        self.send_media_state(MediaKind::Speaker, on);
    }

    pub fn speaker_on(&self) -> bool {
        self.speaker_on.load(Ordering::Acquire)
    }

    fn send_media_state(&self, media: MediaKind, enabled: bool) {
        if self.finishing() || self.phase().answered_at().is_none() {
            return;
        }
        let resolved = self
            .selector
            .resolve(self.push.is_ready(), self.negotiator.answer_sent());
        self.media_sync.send(resolved, media, enabled);
        debug!("media state sent: {}={}", media.as_str(), enabled);
    }

    // ---- transport events -----------------------------------------------

    /// Feed one parsed push message into the session.
    pub async fn handle_push(self: &Arc<Self>, event: PushEvent) {
        if self.finishing() {
            return;
        }
        if let Some(from) = event.from_user()
            && from != self.peer_id
        {
            debug!("push event from {} ignored ({})", from, self.log_ctx());
            return;
        }
        match event {
            PushEvent::CallOffer {
                from_username,
                offer,
                ..
            } => self.handle_push_offer(from_username, offer).await,
            PushEvent::CallAnswer { answer, .. } => {
                debug!("push answer, {} bytes", answer.len());
                let Some(desc) = SdpDescriptor::decode(&answer, SdpKind::Answer) else {
                    debug!("push answer unparseable, dropped");
                    return;
                };
                if self.negotiator.apply_remote_answer(desc).await {
                    self.activate(PhaseTransition::AnswerApplied);
                }
            }
            PushEvent::CallIceCandidate { candidate, .. } => {
                self.negotiator.handle_remote_candidate(&candidate).await;
            }
            PushEvent::CallMediaState {
                media_type,
                enabled,
                ..
            } => {
                let enabled = enabled.unwrap_or(true);
                if let Some(media) = self.media_sync.note_remote(&media_type, enabled) {
                    self.events
                        .publish(SessionEvent::RemoteMediaChanged { media, enabled });
                }
            }
            PushEvent::CallEnd {} => {
                debug!("remote ended the call ({})", self.log_ctx());
                let mut reason = self.end_reason.lock().unwrap();
                if reason.is_none() {
                    *reason = Some(if self.phase().answered_at().is_some() {
                        EndReason::RemoteEnded
                    } else if self.direction.is_incoming() {
                        EndReason::Missed
                    } else {
                        EndReason::Cancelled
                    });
                }
                drop(reason);
                self.end_call(false);
            }
            PushEvent::CallError { error_message } => {
                let message = error_message.unwrap_or_else(|| "Call error".to_string());
                warn!("remote call error: {message} ({})", self.log_ctx());
                *self.end_reason.lock().unwrap() = Some(EndReason::RemoteError);
                self.events.publish(SessionEvent::CallFailed { message });
                self.end_call(false);
            }
        }
    }

    async fn handle_push_offer(self: &Arc<Self>, from_username: Option<String>, offer: String) {
        if let Some(name) = from_username {
            let mut peer_name = self.peer_name.lock().unwrap();
            if peer_name.is_none() && !name.is_empty() {
                *peer_name = Some(name);
            }
        }
        let answered = self.phase().answered_at().is_some();
        if answered {
            // Mid-call renegotiation from the peer (ICE restart).
            debug!("re-offer received, {} bytes", offer.len());
            let Some(desc) = SdpDescriptor::decode(&offer, SdpKind::Offer) else {
                debug!("re-offer unparseable, dropped");
                return;
            };
            if self.negotiator.answer_reoffer(desc).await {
                self.clear_recovery("reoffer-answer");
            }
            return;
        }
        if self.negotiator.answer_sent() || self.phase().is_active() {
            debug!("push offer ignored: already answered/active");
            return;
        }
        debug!("push offer, {} bytes", offer.len());
        self.selector.mark_offer_channel(
            SignalChannel::Persistent,
            self.negotiator.answer_sent(),
            false,
        );
        if self.push.is_ready() {
            self.selector.preselect(SignalChannel::Persistent);
        }
        *self.pending_offer.lock().unwrap() = Some(offer);
    }

    async fn pump_engine_events(
        weak: Weak<Self>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(this) = weak.upgrade() else { return };
            if this.finishing() {
                return;
            }
            this.handle_engine_event(event).await;
        }
    }

    async fn handle_engine_event(self: &Arc<Self>, event: EngineEvent) {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                self.negotiator.send_local_candidate(candidate);
            }
            EngineEvent::ConnectionStateChanged(state) => {
                debug!("engine connection state: {state:?} ({})", self.log_ctx());
                if state.is_connected() {
                    self.activate(PhaseTransition::MediaConnected);
                    self.clear_recovery("pc-connected");
                } else if state.is_degraded() {
                    self.begin_recovery(&format!("pc-{state:?}"));
                }
            }
            EngineEvent::IceStateChanged(state) => {
                debug!("engine ice state: {state:?} ({})", self.log_ctx());
                if state.is_connected() {
                    self.clear_recovery("ice-connected");
                } else if state.is_degraded() {
                    self.begin_recovery(&format!("ice-{state:?}"));
                }
            }
            EngineEvent::RemoteTrack => {
                self.activate(PhaseTransition::MediaConnected);
                self.clear_recovery("track");
            }
        }
    }

    // ---- pollers --------------------------------------------------------

    fn start_pollers(self: &Arc<Self>) {
        if self.direction == CallDirection::Outgoing {
            let weak = Arc::downgrade(self);
            self.response_poll.arm(Scheduled::repeating(
                std::time::Duration::ZERO,
                self.config.poll_interval,
                move || {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(this) => this.response_and_answer_tick().await,
                            None => false,
                        }
                    }
                },
            ));
        }
        let weak = Arc::downgrade(self);
        self.ice_poll.arm(Scheduled::repeating(
            self.config.poll_interval / 2,
            self.config.poll_interval,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(this) => this.ice_tick().await,
                        None => false,
                    }
                }
            },
        ));
    }

    /// Outgoing-side poll: peer response first, then the answer while it has
    /// not been applied. Bounded: once the poll budget is spent with no
    /// answer, the call ends as unanswered.
    async fn response_and_answer_tick(self: &Arc<Self>) -> bool {
        if self.finishing() {
            return false;
        }
        match self.rest.check_call_response(&self.peer_id).await {
            Ok(Some(CallResponse::Rejected)) => {
                debug!("peer rejected ({})", self.log_ctx());
                *self.end_reason.lock().unwrap() = Some(EndReason::Rejected);
                self.end_call(false);
                return false;
            }
            Ok(Some(CallResponse::Ended)) => {
                debug!("peer ended ({})", self.log_ctx());
                let mut reason = self.end_reason.lock().unwrap();
                if reason.is_none() {
                    *reason = Some(EndReason::RemoteEnded);
                }
                drop(reason);
                self.end_call(false);
                return false;
            }
            Ok(_) => {}
            Err(e) => debug!("response poll failed: {e}"),
        }
        if !self.negotiator.answer_applied() {
            let polls = self.answer_polls.fetch_add(1, Ordering::Relaxed) + 1;
            match self.rest.fetch_call_answer(&self.peer_id).await {
                Ok(Some(raw)) => {
                    if let Some(desc) = SdpDescriptor::decode(&raw, SdpKind::Answer) {
                        if self.negotiator.apply_remote_answer(desc).await {
                            self.activate(PhaseTransition::AnswerApplied);
                        }
                    } else {
                        debug!("polled answer unparseable, dropped");
                    }
                }
                Ok(None) => {
                    if polls >= self.config.answer_poll_max {
                        warn!("no answer after {polls} polls ({})", self.log_ctx());
                        *self.end_reason.lock().unwrap() = Some(EndReason::NoAnswer);
                        self.events.publish(SessionEvent::CallFailed {
                            message: "No answer".to_string(),
                        });
                        self.end_call(true);
                        return false;
                    }
                }
                Err(e) => debug!("answer poll failed: {e}"),
            }
        }
        true
    }

    async fn ice_tick(self: &Arc<Self>) -> bool {
        if self.finishing() {
            return false;
        }
        let since = self.last_ice_check.load(Ordering::Acquire);
        match self.rest.fetch_candidates_since(&self.peer_id, since).await {
            Ok(payloads) => {
                self.last_ice_check
                    .store(Utc::now().timestamp(), Ordering::Release);
                for raw in payloads {
                    if raw.is_empty() {
                        continue;
                    }
                    self.negotiator.handle_remote_candidate(&raw).await;
                }
            }
            Err(e) => debug!("ice poll failed: {e}"),
        }
        true
    }

    // ---- recovery -------------------------------------------------------

    fn begin_recovery(self: &Arc<Self>, reason: &str) {
        if self.finishing() || self.phase().answered_at().is_none() {
            return;
        }
        if self.recovery.begin(reason) {
            let changed = {
                let mut phase = self.phase.lock().unwrap();
                phase.apply(PhaseTransition::ConnectivityLost).is_ok()
            };
            if changed {
                self.events.publish(SessionEvent::Reconnecting);
                self.events.publish(SessionEvent::PhaseChanged(self.phase()));
            }
        }
        let weak = Arc::downgrade(self);
        let tick = self.config.recovery_tick;
        self.recovery.ticker().arm_if_idle(|| {
            Scheduled::repeating(std::time::Duration::ZERO, tick, move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(this) => this.recovery_tick().await,
                        None => false,
                    }
                }
            })
        });
    }

    fn clear_recovery(self: &Arc<Self>, reason: &str) {
        if self.recovery.clear(reason) {
            let changed = {
                let mut phase = self.phase.lock().unwrap();
                phase.apply(PhaseTransition::ConnectivityRestored).is_ok()
            };
            if changed {
                self.events.publish(SessionEvent::PhaseChanged(self.phase()));
            }
        }
    }

    async fn recovery_tick(self: &Arc<Self>) -> bool {
        if self.finishing() {
            return false;
        }
        match self
            .recovery
            .assess(self.engine.connection_state(), self.engine.ice_state())
        {
            TickVerdict::Idle => false,
            TickVerdict::Recovered => {
                self.clear_recovery("tick-connected");
                false
            }
            TickVerdict::GiveUp => {
                warn!("recovery grace expired, ending call ({})", self.log_ctx());
                *self.end_reason.lock().unwrap() = Some(EndReason::ConnectionLost);
                self.events.publish(SessionEvent::CallFailed {
                    message: "Connection lost".to_string(),
                });
                self.end_call(true);
                false
            }
            TickVerdict::Reoffer => {
                if self.engine.signaling_stable() && self.recovery.try_begin_attempt() {
                    debug!(
                        "recovery re-offer attempt {} ({})",
                        self.recovery.attempts() + 1,
                        self.log_ctx()
                    );
                    let sent = self.negotiator.create_and_send_offer(true).await.is_ok();
                    if !sent {
                        debug!("recovery re-offer failed");
                    }
                    self.recovery.end_attempt(sent);
                }
                true
            }
            TickVerdict::Wait => true,
        }
    }

    // ---- phase plumbing -------------------------------------------------

    /// Apply a transition, publishing the change. Returns `false` (with a
    /// debug log) when the transition is invalid from the current phase.
    fn apply_phase(&self, transition: PhaseTransition) -> bool {
        let applied = {
            let mut phase = self.phase.lock().unwrap();
            match phase.apply(transition) {
                Ok(()) => true,
                Err(e) => {
                    debug!("{e}, dropped ({})", self.log_ctx());
                    false
                }
            }
        };
        if applied {
            self.events.publish(SessionEvent::PhaseChanged(self.phase()));
        }
        applied
    }

    /// Move into `Active` (first answer applied or media connected). Safe to
    /// call repeatedly; only the first activation emits side effects.
    fn activate(self: &Arc<Self>, transition: PhaseTransition) {
        let changed = {
            let mut phase = self.phase.lock().unwrap();
            if phase.is_active() {
                false
            } else {
                phase.apply(transition).is_ok()
            }
        };
        if !changed {
            return;
        }
        info!("call active ({})", self.log_ctx());
        self.events.publish(SessionEvent::PhaseChanged(self.phase()));
        self.media_sync.reset_remote();
        let this = self.clone();
        self.media_init.arm(Scheduled::once(
            self.config.media_state_delay,
            async move {
                if this.finishing() {
                    return;
                }
                this.send_media_state(MediaKind::Mic, !this.mic_muted());
            },
        ));
    }

    fn fail(self: &Arc<Self>, reason: EndReason, message: &str, notify_remote: bool) {
        {
            let mut end_reason = self.end_reason.lock().unwrap();
            if end_reason.is_none() {
                *end_reason = Some(reason);
            }
        }
        self.events.publish(SessionEvent::CallFailed {
            message: message.to_string(),
        });
        self.end_call(notify_remote);
    }

    // ---- teardown -------------------------------------------------------

    /// Tear the session down. Idempotent; the first caller wins. Cancels
    /// every pending timer, optionally notifies the remote, records the call
    /// log exactly once and releases the registry slot.
    pub fn end_call(self: &Arc<Self>, notify_remote: bool) {
        if self.finishing.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("ending call ({})", self.log_ctx());
        self.accepting.store(false, Ordering::Release);
        self.wait_accept_after_auth.store(false, Ordering::Release);
        self.offer_retry.cancel();
        self.auth_wait.cancel();
        self.response_poll.cancel();
        self.ice_poll.cancel();
        self.media_init.cancel();
        self.negotiator.cancel_timers();
        self.recovery.clear("teardown");

        if notify_remote {
            let this = self.clone();
            // Teardown notifications run unconditionally; they are the one
            // class of job that must survive the finishing guard.
            self.signaling_io.submit(async move {
                if let Err(e) = this
                    .rest
                    .submit_call_response(&this.peer_id, CallResponse::Ended)
                    .await
                {
                    debug!("end: response send failed: {e}");
                }
            });
            self.push.send_end(&self.peer_id);
        }

        let answered_at = self.phase.lock().unwrap().answered_at();
        let reason = *self.end_reason.lock().unwrap();
        self.apply_phase(PhaseTransition::Terminated { reason });
        self.recorder.record(
            &self.io,
            &self.peer_id,
            self.peer_name.lock().unwrap().as_deref(),
            self.direction,
            self.created_at,
            answered_at,
            reason,
        );
        self.candidates.reset();
        self.registry.finish();
        self.signaling_io.shutdown();
        self.io.shutdown();
        let engine = self.engine.clone();
        tokio::spawn(async move {
            engine.close().await;
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // A session dropped without reaching Ended must still free the
        // registry slot.
        if !self.finishing.load(Ordering::Acquire) {
            self.registry.finish();
        }
    }
}
