//! Signaling channel selection.
//!
//! Session-critical messages travel either over the persistent push channel
//! or over the HTTP fallback, never both. The selector owns that decision:
//! it prefers the persistent channel while it is still safe to switch (no
//! answer sent yet), remembers which channel delivered the incoming offer,
//! and locks hard once the answer has gone out or a fallback was forced.
//! Locking is one-way for the remainder of the session.
//!
//! One deliberate asymmetry is preserved from the production client: an
//! upgrade back to the persistent channel (including releasing a soft HTTP
//! lock) is allowed only *before* the answer is sent. After that the lock is
//! final regardless of transport availability.

use log::debug;
use std::sync::Mutex;

/// The transport carrying session-critical signaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalChannel {
    Persistent,
    Http,
}

impl SignalChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::Http => "http",
        }
    }
}

#[derive(Debug, Default)]
struct SelectorState {
    channel: Option<SignalChannel>,
    locked: bool,
    offer_channel: Option<SignalChannel>,
}

/// Owns the channel decision for one session.
#[derive(Debug, Default)]
pub struct ChannelSelector {
    state: Mutex<SelectorState>,
}

impl ChannelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the channel for the next session-critical send.
    ///
    /// `persistent_ready` is the live authenticated state of the push
    /// channel; `answer_sent` is the answer latch. Resolution rules, in
    /// priority order:
    /// 1. persistent ready and no answer sent yet: (re)select Persistent,
    ///    releasing a prior soft lock to Http;
    /// 2. a previous selection (locked or not) sticks;
    /// 3. the channel that delivered the offer;
    /// 4. Persistent if ready, else Http.
    pub fn resolve(&self, persistent_ready: bool, answer_sent: bool) -> SignalChannel {
        let mut state = self.state.lock().unwrap();
        if persistent_ready && !answer_sent {
            if state.locked && state.channel == Some(SignalChannel::Http) {
                state.locked = false;
                debug!("signal channel unlocked for persistent upgrade");
            }
            if state.channel != Some(SignalChannel::Persistent) {
                state.channel = Some(SignalChannel::Persistent);
                debug!("signal channel upgraded to persistent");
            }
            return SignalChannel::Persistent;
        }
        if let Some(channel) = state.channel {
            return channel;
        }
        if let Some(offer_channel) = state.offer_channel {
            state.channel = Some(offer_channel);
            debug!("signal channel selected from offer channel: {}", offer_channel.as_str());
            return offer_channel;
        }
        let selected = if persistent_ready {
            SignalChannel::Persistent
        } else {
            SignalChannel::Http
        };
        state.channel = Some(selected);
        debug!("signal channel selected: {}", selected.as_str());
        selected
    }

    /// Soft-select a channel. No effect once any selection or lock exists.
    pub fn preselect(&self, channel: SignalChannel) {
        let mut state = self.state.lock().unwrap();
        if state.locked || state.channel.is_some() {
            return;
        }
        state.channel = Some(channel);
        debug!("signal channel preselected: {}", channel.as_str());
    }

    /// Force a channel and lock it immediately. One-way; used when a
    /// persistent enqueue fails or the auth wait expires.
    pub fn force(&self, channel: SignalChannel) {
        let mut state = self.state.lock().unwrap();
        state.channel = Some(channel);
        state.locked = true;
        debug!("signal channel forced: {}", channel.as_str());
    }

    /// Lock the channel after the first successful answer transmission.
    /// No effect if already locked.
    pub fn lock(&self, channel: SignalChannel) {
        let mut state = self.state.lock().unwrap();
        if state.locked {
            return;
        }
        state.channel = Some(channel);
        state.locked = true;
        debug!("signal channel locked: {}", channel.as_str());
    }

    /// Record which channel delivered the incoming offer. The first channel
    /// wins, except that an Http record is upgraded to Persistent while the
    /// answer has not been sent and the call is not yet active.
    pub fn mark_offer_channel(&self, channel: SignalChannel, answer_sent: bool, active: bool) {
        let mut state = self.state.lock().unwrap();
        match state.offer_channel {
            None => {
                state.offer_channel = Some(channel);
                debug!("offer channel selected: {}", channel.as_str());
            }
            Some(SignalChannel::Http)
                if channel == SignalChannel::Persistent && !answer_sent && !active =>
            {
                state.offer_channel = Some(channel);
                debug!("offer channel upgraded to persistent");
            }
            Some(_) => {}
        }
    }

    pub fn locked(&self) -> bool {
        self.state.lock().unwrap().locked
    }

    pub fn current(&self) -> Option<SignalChannel> {
        self.state.lock().unwrap().channel
    }

    pub fn offer_channel(&self) -> Option<SignalChannel> {
        self.state.lock().unwrap().offer_channel
    }
}
