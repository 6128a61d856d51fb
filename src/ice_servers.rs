//! TURN/STUN server provisioning.
//!
//! Credentials are prefetched at session start so that accepting a call can
//! build the media path from cache instead of waiting on the network; a
//! fresh fetch after accept re-applies updated servers to the engine. Fetch
//! order: per-user TURN credentials, then the static TURN configuration,
//! then the configured STUN fallback. URLs are deduplicated across entries.

use crate::rest::RestClient;
use crate::types::IceServer;
use log::debug;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug)]
pub struct IceServerCache {
    cached: Mutex<Option<Vec<IceServer>>>,
    stun_fallback_url: String,
}

impl IceServerCache {
    pub fn new(stun_fallback_url: impl Into<String>) -> Self {
        Self {
            cached: Mutex::new(None),
            stun_fallback_url: stun_fallback_url.into(),
        }
    }

    /// The cached set, or the STUN fallback when nothing was fetched yet.
    /// Never blocks on the network; this is the accept-time fast path.
    pub fn fast(&self) -> Vec<IceServer> {
        if let Some(cached) = self.cached.lock().unwrap().as_ref()
            && !cached.is_empty()
        {
            return cached.clone();
        }
        debug!("ice servers: using STUN fallback");
        vec![IceServer::stun(self.stun_fallback_url.clone())]
    }

    pub fn store(&self, servers: Vec<IceServer>) {
        if servers.is_empty() {
            return;
        }
        *self.cached.lock().unwrap() = Some(servers);
    }

    pub fn is_primed(&self) -> bool {
        self.cached
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|s| !s.is_empty())
    }

    /// Fetch the full server set from the REST collaborator and cache it.
    /// Fetch failures fall through to the next source; the result always
    /// contains at least the STUN fallback.
    pub async fn load(
        &self,
        rest: &dyn RestClient,
        user_id: Option<&str>,
        ttl_minutes: u32,
    ) -> Vec<IceServer> {
        let mut servers = Vec::new();
        let mut seen_urls = HashSet::new();

        if let Some(user_id) = user_id {
            match rest.fetch_turn_credentials(user_id, ttl_minutes).await {
                Ok(fetched) => merge_servers(&mut servers, &mut seen_urls, fetched),
                Err(e) => debug!("ice servers: turn credential fetch failed: {e}"),
            }
        }
        if servers.is_empty() {
            match rest.fetch_turn_config().await {
                Ok(fetched) => merge_servers(&mut servers, &mut seen_urls, fetched),
                Err(e) => debug!("ice servers: turn config fetch failed: {e}"),
            }
        }
        if !seen_urls.contains(&self.stun_fallback_url) {
            servers.push(IceServer::stun(self.stun_fallback_url.clone()));
        }
        self.store(servers.clone());
        servers
    }
}

fn merge_servers(
    servers: &mut Vec<IceServer>,
    seen_urls: &mut HashSet<String>,
    fetched: Vec<IceServer>,
) {
    for server in fetched {
        let urls: Vec<String> = server
            .urls
            .into_iter()
            .filter(|u| !u.is_empty() && seen_urls.insert(u.clone()))
            .collect();
        if urls.is_empty() {
            continue;
        }
        servers.push(IceServer {
            urls,
            username: server.username,
            credential: server.credential,
        });
    }
}
