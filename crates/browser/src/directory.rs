//! Target Directory - client for the `/json/*` HTTP endpoints
//!
//! Hands out `Target`s; the connection engine itself never talks HTTP.
//! One `Browser` per control-plane URL, owned by whoever created it, keeps
//! track of the targets it handed out.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use crate::cdp::protocol::{TargetDescriptor, TargetId, VersionInfo};
use crate::cdp::{CDPSession, ConnectionState, Target};
use crate::config::DirectoryConfig;
use crate::error::{CDPError, Result};

/// Id given to the browser-level target
const BROWSER_TARGET_ID: &str = "0";

pub struct Browser {
    config: DirectoryConfig,
    http: reqwest::Client,
    base: Url,

    /// Browser-level target, set by `connect()`
    browser_target: RwLock<Option<Target>>,

    /// Page targets handed out so far
    targets: DashMap<TargetId, Target>,
}

impl Browser {
    /// Build the HTTP client. No I/O happens here.
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        let mut base = Url::parse(&config.url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            base,
            config,
            browser_target: RwLock::new(None),
            targets: DashMap::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    /// GET /json/version
    pub async fn version(&self) -> Result<VersionInfo> {
        let version = self
            .http
            .get(self.endpoint("json/version")?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(version)
    }

    /// Wait for the endpoint to come up, then connect the browser-level target
    ///
    /// Fails with [`CDPError::Config`] while a previous browser target is
    /// still alive; one whose connection was lost is stopped and replaced.
    pub async fn connect(&self) -> Result<Target> {
        if let Some(previous) = self.browser_target() {
            if previous.is_connected() {
                return Err(CDPError::config(format!(
                    "browser at {} is already connected",
                    self.base
                )));
            }
            stop_dead(&previous).await;
        }

        let version = self.wait_until_reachable().await?;
        tracing::info!("Connected to {} ({})", version.browser, self.base);

        let descriptor =
            TargetDescriptor::new(BROWSER_TARGET_ID, "browser", version.web_socket_debugger_url);
        let target = Target::with_config(descriptor, self.config.connection.clone());
        target.connect().await?;

        *self.browser_target.write() = Some(target.clone());
        Ok(target)
    }

    /// Poll `/json/version` while the endpoint refuses connections
    async fn wait_until_reachable(&self) -> Result<VersionInfo> {
        let started = Instant::now();
        loop {
            match self.version().await {
                Ok(version) => return Ok(version),
                Err(CDPError::Http(e)) if e.is_connect() => {
                    if let Some(max_wait) = self.config.max_wait {
                        if started.elapsed() >= max_wait {
                            return Err(CDPError::timeout("GET /json/version", max_wait));
                        }
                    }
                    tracing::debug!("{} not reachable yet: {}", self.base, e);
                    tokio::time::sleep(self.config.retry_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn browser_target(&self) -> Option<Target> {
        self.browser_target.read().clone()
    }

    /// Root session of the browser-level target
    pub fn session(&self) -> Result<Arc<CDPSession>> {
        self.browser_target()
            .ok_or_else(|| CDPError::usage("browser is not connected"))?
            .session()
    }

    /// GET /json, pages only
    ///
    /// Running targets we handed out before are returned as-is; everything
    /// else comes back disconnected and must be `connect()`ed before use.
    /// Cached targets whose connection was lost are stopped and replaced.
    pub async fn list_targets(&self) -> Result<Vec<Target>> {
        let descriptors: Vec<TargetDescriptor> = self
            .http
            .get(self.endpoint("json")?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut dead = Vec::new();
        let listed: Vec<Target> = descriptors
            .into_iter()
            .filter(|descriptor| descriptor.target_type == "page")
            .map(|descriptor| {
                let cached = self.targets.get(&descriptor.id).map(|c| c.value().clone());
                match cached {
                    Some(target) if target.is_connected() => target,
                    stale => {
                        dead.extend(stale);
                        Target::with_config(descriptor, self.config.connection.clone())
                    }
                }
            })
            .collect();

        self.targets.clear();
        for target in &listed {
            self.targets.insert(target.id().to_string(), target.clone());
        }
        for target in dead {
            stop_dead(&target).await;
        }
        Ok(listed)
    }

    /// PUT /json/new?{url}, returns the new target connected
    pub async fn new_target(&self, url: Option<&str>) -> Result<Target> {
        let mut endpoint = self.endpoint("json/new")?;
        endpoint.set_query(url.filter(|u| !u.is_empty()));

        let descriptor: TargetDescriptor = self
            .http
            .put(endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let target = Target::with_config(descriptor, self.config.connection.clone());
        target.connect().await?;
        self.targets.insert(target.id().to_string(), target.clone());
        tracing::debug!("Created {}", target);
        Ok(target)
    }

    /// Cached target by id
    pub fn target(&self, target_id: &str) -> Option<Target> {
        self.targets.get(target_id).map(|t| t.value().clone())
    }

    /// GET /json/activate/{id}
    pub async fn activate_target(&self, target_id: &str) -> Result<String> {
        let text = self
            .http
            .get(self.endpoint(&format!("json/activate/{}", target_id))?)
            .send()
            .await?
            .text()
            .await?;
        Ok(text)
    }

    /// Stop our connection to the target if any, then GET /json/close/{id}
    pub async fn close_target(&self, target_id: &str) -> Result<String> {
        if let Some((_, target)) = self.targets.remove(target_id) {
            if target.state() == ConnectionState::Connected {
                if let Err(e) = target.stop().await {
                    tracing::warn!("Stopping {} failed: {}", target, e);
                }
            }
        }

        let text = self
            .http
            .get(self.endpoint(&format!("json/close/{}", target_id))?)
            .send()
            .await?
            .text()
            .await?;
        Ok(text)
    }

    /// Stop the browser-level target and every running target handed out
    pub async fn shutdown(&self) -> Result<()> {
        let running: Vec<Target> = self
            .targets
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|target| target.state() == ConnectionState::Connected)
            .collect();
        self.targets.clear();

        for target in running {
            if let Err(e) = target.stop().await {
                tracing::warn!("Stopping {} failed: {}", target, e);
            }
        }

        let browser_target = self.browser_target.write().take();
        if let Some(target) = browser_target {
            if target.state() == ConnectionState::Connected {
                target.stop().await?;
            }
        }
        Ok(())
    }
}

/// Finish off a target whose connection was lost
async fn stop_dead(target: &Target) {
    if target.state() == ConnectionState::Connected {
        if let Err(e) = target.stop().await {
            tracing::warn!("Stopping {} failed: {}", target, e);
        }
    }
}
