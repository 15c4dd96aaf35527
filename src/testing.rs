//! In-process fake adapter shared by the registry and engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::{
    Adapter, AdapterDescriptor, Capabilities, ChannelEntry, ChannelMap, Episode, LiveSource,
    Session, StreamDescriptor, VodItem, VodListing, VodOptions, VodSource,
};
use crate::error::{Error, Result};

/// Configurable adapter that counts every upstream call it receives.
pub(crate) struct FakeAdapter {
    pub id: String,
    pub caps: Capabilities,
    pub implements_live: bool,
    pub implements_vod: bool,
    /// What `channels()` reports; `None` means the adapter cannot list.
    pub reported: Mutex<Option<ChannelMap>>,
    /// provider channel id -> stream URL
    pub streams: HashMap<String, String>,
    pub delay: Option<Duration>,
    /// Reject the next stream call with an auth error.
    pub reject_next: AtomicBool,
    /// Reject every login.
    pub fail_login: AtomicBool,
    pub stream_calls: AtomicUsize,
    pub channel_calls: AtomicUsize,
    pub login_calls: AtomicUsize,
    /// Stream calls received: provider id (or `show/episode`) and session.
    pub calls_seen: Mutex<Vec<(String, Session)>>,
}

impl FakeAdapter {
    pub fn live(id: &str) -> Self {
        Self {
            id: id.to_string(),
            caps: Capabilities {
                has_live: true,
                ..Capabilities::default()
            },
            implements_live: true,
            implements_vod: false,
            reported: Mutex::new(None),
            streams: HashMap::new(),
            delay: None,
            reject_next: AtomicBool::new(false),
            fail_login: AtomicBool::new(false),
            stream_calls: AtomicUsize::new(0),
            channel_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            calls_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_vod(mut self) -> Self {
        self.caps.has_vod = true;
        self.implements_vod = true;
        self
    }

    pub fn with_auth(mut self) -> Self {
        self.caps.auth_required = true;
        self
    }

    /// Report `content_id -> provider_id` from `channels()` and serve a
    /// stream for it.
    pub fn with_channel(mut self, content_id: &str, provider_id: &str) -> Self {
        self.report(content_id, provider_id);
        self.streams.insert(
            provider_id.to_string(),
            format!("http://u/{provider_id}.m3u8"),
        );
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn report(&self, content_id: &str, provider_id: &str) {
        self.reported
            .lock()
            .unwrap()
            .get_or_insert_with(ChannelMap::new)
            .insert(
                content_id.to_string(),
                ChannelEntry::new(provider_id, content_id),
            );
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn channel_calls(&self) -> usize {
        self.channel_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    async fn stream_call(&self, target: String, session: &Session) -> Result<()> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.calls_seen
            .lock()
            .unwrap()
            .push((target, session.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Auth(format!("{}: token revoked", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            id: self.id.clone(),
            name: self.id.to_uppercase(),
            capabilities: self.caps,
            logo: None,
        }
    }

    async fn login(&self, username: &str, _password: &str) -> Result<Vec<String>> {
        let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(Error::Auth(format!("{}: bad credentials", self.id)));
        }
        Ok(vec![username.to_string(), format!("token-{n}")])
    }

    async fn channels(&self) -> Result<ChannelMap> {
        self.channel_calls.fetch_add(1, Ordering::SeqCst);
        self.reported
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::not_supported(&self.id, "getChannels"))
    }

    fn live_source(&self) -> Option<&dyn LiveSource> {
        self.implements_live.then_some(self as &dyn LiveSource)
    }

    fn vod_source(&self) -> Option<&dyn VodSource> {
        self.implements_vod.then_some(self as &dyn VodSource)
    }
}

#[async_trait]
impl LiveSource for FakeAdapter {
    async fn live_channel(
        &self,
        provider_channel_id: &str,
        session: &Session,
    ) -> Result<StreamDescriptor> {
        self.stream_call(provider_channel_id.to_string(), session)
            .await?;
        self.streams
            .get(provider_channel_id)
            .map(StreamDescriptor::new)
            .ok_or_else(|| Error::upstream(format!("{provider_channel_id} is off air")))
    }
}

#[async_trait]
impl VodSource for FakeAdapter {
    async fn vod_list(&self, _session: &Session, options: &VodOptions) -> Result<Vec<VodItem>> {
        let page = options.page.unwrap_or(1);
        Ok(vec![VodItem {
            id: format!("show-{page}"),
            name: format!("Show {page}"),
            link: format!("http://u/shows/{page}"),
            image: None,
        }])
    }

    async fn vod(
        &self,
        show_id: &str,
        _session: &Session,
        _options: &VodOptions,
    ) -> Result<VodListing> {
        if !show_id.starts_with("show-") {
            return Err(Error::ShowNotFound(show_id.to_string()));
        }
        Ok(VodListing::Episodes(vec![Episode {
            id: "e1".into(),
            name: "Pilot".into(),
            season: Some(1),
            episode: Some(1),
            image: None,
        }]))
    }

    async fn vod_episode(
        &self,
        show_id: &str,
        episode_id: &str,
        session: &Session,
    ) -> Result<StreamDescriptor> {
        self.stream_call(format!("{show_id}/{episode_id}"), session)
            .await?;
        Ok(StreamDescriptor::new(format!(
            "http://u/{show_id}/{episode_id}.m3u8"
        )))
    }
}
