use crate::aws::AwsCli;
use crate::model::{AccessTarget, CloudContext, Credentials};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as TokioCommand;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

const CLIENT_NAME: &str = "cirrus";
const DEVICE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SESSION_GRACE_SECS: i64 = 60;
const ROLE_LOOKUP_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SsoSession {
    pub start_url: String,
    pub region: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub client_id: String,
    pub client_secret: String,
    pub registration_expires_at: Option<DateTime<Utc>>,
}

impl SsoSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + ChronoDuration::seconds(SESSION_GRACE_SECS)
    }

    fn registration_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.registration_expires_at
            .is_some_and(|expires| expires > now + ChronoDuration::seconds(SESSION_GRACE_SECS))
    }
}

/// Device authorization waiting for the user to approve it in a browser.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceAuthorization {
    pub start_url: String,
    pub region: String,
    pub client_id: String,
    pub client_secret: String,
    pub registration_expires_at: Option<DateTime<Utc>>,
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval_secs: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AuthProgress {
    Ready(SsoSession),
    Pending(DeviceAuthorization),
}

pub trait CredentialProvider: Send + Sync + 'static {
    /// Returns a cached session when one is still valid, otherwise starts a device authorization.
    fn authenticate(
        &self,
        start_url: &str,
        region: &str,
    ) -> impl Future<Output = Result<AuthProgress>> + Send;

    /// Polls until the user approves `pending` or its expiry passes.
    fn await_device_token(
        &self,
        pending: &DeviceAuthorization,
    ) -> impl Future<Output = Result<SsoSession>> + Send;

    fn list_access_targets(
        &self,
        session: &SsoSession,
    ) -> impl Future<Output = Result<Vec<AccessTarget>>> + Send;

    fn get_credentials(
        &self,
        session: &SsoSession,
        target: &AccessTarget,
    ) -> impl Future<Output = Result<Credentials>> + Send;
}

/// Stable cache key for a start URL: 31-polynomial hash over its bytes, 8 hex digits.
pub fn cache_key(start_url: &str) -> String {
    let hash = start_url
        .bytes()
        .fold(0u32, |hash, byte| hash.wrapping_mul(31).wrapping_add(u32::from(byte)));
    format!("{hash:08x}")
}

#[derive(Debug, Clone)]
pub struct SessionCache {
    dir: PathBuf,
}

impl SessionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, start_url: &str) -> PathBuf {
        self.dir
            .join(format!("session-{}.json", cache_key(start_url)))
    }

    /// Any cached session for `start_url`, expired or not. Unreadable entries count as absent.
    pub fn load(&self, start_url: &str) -> Option<SsoSession> {
        let path = self.path_for(start_url);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<SsoSession>(&raw) {
            Ok(session) if session.start_url == start_url => Some(session),
            Ok(_) => None,
            Err(error) => {
                warn!("ignoring unreadable session cache {}: {error}", path.display());
                None
            }
        }
    }

    pub fn store(&self, session: &SsoSession) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(&session.start_url);
        let raw = serde_json::to_string_pretty(session).context("failed to encode session")?;
        write_private(&path, &raw)
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// SSO login through `aws sso-oidc` / `aws sso`.
#[derive(Debug, Clone)]
pub struct AwsSso {
    cli: AwsCli,
    cache: SessionCache,
}

impl AwsSso {
    pub fn new(cli: AwsCli, cache: SessionCache) -> Self {
        Self { cli, cache }
    }

    async fn cached(&self, start_url: &str) -> Option<SsoSession> {
        let cache = self.cache.clone();
        let start_url = start_url.to_string();
        tokio::task::spawn_blocking(move || cache.load(&start_url))
            .await
            .ok()
            .flatten()
    }

    async fn register_client(&self, ctx: &CloudContext) -> Result<RegisterClient> {
        self.cli
            .json(
                ctx,
                &[
                    "sso-oidc",
                    "register-client",
                    "--client-name",
                    CLIENT_NAME,
                    "--client-type",
                    "public",
                ],
            )
            .await
    }
}

impl CredentialProvider for AwsSso {
    async fn authenticate(&self, start_url: &str, region: &str) -> Result<AuthProgress> {
        let now = Utc::now();
        let cached = self.cached(start_url).await;
        if let Some(session) = cached.as_ref().filter(|session| session.is_valid_at(now)) {
            info!("reusing cached SSO session for {start_url}");
            return Ok(AuthProgress::Ready(session.clone()));
        }

        let ctx = CloudContext::new(region);
        let (client_id, client_secret, registration_expires_at) = match cached
            .filter(|session| session.registration_valid_at(now))
        {
            Some(session) => (
                session.client_id,
                session.client_secret,
                session.registration_expires_at,
            ),
            None => {
                let registered = self.register_client(&ctx).await?;
                (
                    registered.client_id,
                    registered.client_secret,
                    epoch_seconds(registered.client_secret_expires_at),
                )
            }
        };

        let started: StartDeviceAuthorization = self
            .cli
            .json(
                &ctx,
                &[
                    "sso-oidc",
                    "start-device-authorization",
                    "--client-id",
                    &client_id,
                    "--client-secret",
                    &client_secret,
                    "--start-url",
                    start_url,
                ],
            )
            .await?;

        let verification_uri = if started.verification_uri_complete.is_empty() {
            started.verification_uri
        } else {
            started.verification_uri_complete
        };
        open_in_browser(&verification_uri);

        Ok(AuthProgress::Pending(DeviceAuthorization {
            start_url: start_url.to_string(),
            region: region.to_string(),
            client_id,
            client_secret,
            registration_expires_at,
            device_code: started.device_code,
            user_code: started.user_code,
            verification_uri,
            interval_secs: started.interval.max(1),
            expires_at: now + ChronoDuration::seconds(started.expires_in.max(1)),
        }))
    }

    async fn await_device_token(&self, pending: &DeviceAuthorization) -> Result<SsoSession> {
        let ctx = CloudContext::new(pending.region.clone());
        let mut interval = pending.interval_secs;
        loop {
            if Utc::now() >= pending.expires_at {
                anyhow::bail!("device authorization expired before it was approved");
            }
            sleep(Duration::from_secs(interval)).await;

            let result = self
                .cli
                .json::<CreateToken>(
                    &ctx,
                    &[
                        "sso-oidc",
                        "create-token",
                        "--client-id",
                        &pending.client_id,
                        "--client-secret",
                        &pending.client_secret,
                        "--grant-type",
                        DEVICE_GRANT,
                        "--device-code",
                        &pending.device_code,
                    ],
                )
                .await;

            match result {
                Ok(token) => {
                    let session = SsoSession {
                        start_url: pending.start_url.clone(),
                        region: pending.region.clone(),
                        access_token: token.access_token,
                        expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
                        client_id: pending.client_id.clone(),
                        client_secret: pending.client_secret.clone(),
                        registration_expires_at: pending.registration_expires_at,
                    };
                    let cache = self.cache.clone();
                    let to_store = session.clone();
                    match tokio::task::spawn_blocking(move || cache.store(&to_store)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => warn!("failed to cache SSO session: {error:#}"),
                        Err(error) => warn!("session cache writer failed: {error}"),
                    }
                    return Ok(session);
                }
                Err(error) => {
                    let message = error.to_string();
                    if message.contains("AuthorizationPendingException") {
                        debug!("device authorization still pending");
                    } else if message.contains("SlowDownException") {
                        interval += 5;
                    } else {
                        return Err(error);
                    }
                }
            }
        }
    }

    async fn list_access_targets(&self, session: &SsoSession) -> Result<Vec<AccessTarget>> {
        let ctx = CloudContext::new(session.region.clone());
        let accounts: ListAccounts = self
            .cli
            .json(
                &ctx,
                &["sso", "list-accounts", "--access-token", &session.access_token],
            )
            .await?;

        let ctx = &ctx;
        let per_account = stream::iter(accounts.account_list)
            .map(|account| async move {
                let roles: ListAccountRoles = self
                    .cli
                    .json(
                        ctx,
                        &[
                            "sso",
                            "list-account-roles",
                            "--access-token",
                            &session.access_token,
                            "--account-id",
                            &account.account_id,
                        ],
                    )
                    .await?;
                Ok::<_, anyhow::Error>(
                    roles
                        .role_list
                        .into_iter()
                        .map(|role| AccessTarget {
                            account_id: account.account_id.clone(),
                            account_name: account.account_name.clone(),
                            email: account.email_address.clone(),
                            role_name: role.role_name,
                        })
                        .collect::<Vec<_>>(),
                )
            })
            .buffered(ROLE_LOOKUP_CONCURRENCY)
            .try_collect::<Vec<_>>()
            .await?;

        let mut targets = per_account.into_iter().flatten().collect::<Vec<_>>();
        targets.sort_by(|left, right| {
            left.account_name
                .cmp(&right.account_name)
                .then(left.role_name.cmp(&right.role_name))
        });
        Ok(targets)
    }

    async fn get_credentials(
        &self,
        session: &SsoSession,
        target: &AccessTarget,
    ) -> Result<Credentials> {
        let ctx = CloudContext::new(session.region.clone());
        let output: GetRoleCredentials = self
            .cli
            .json(
                &ctx,
                &[
                    "sso",
                    "get-role-credentials",
                    "--role-name",
                    &target.role_name,
                    "--account-id",
                    &target.account_id,
                    "--access-token",
                    &session.access_token,
                ],
            )
            .await?;
        let raw = output.role_credentials;
        if raw.access_key_id.is_empty() {
            anyhow::bail!(
                "no credentials returned for {}/{}",
                target.account_id,
                target.role_name
            );
        }
        Ok(Credentials {
            access_key_id: raw.access_key_id,
            secret_access_key: raw.secret_access_key,
            session_token: Some(raw.session_token).filter(|token| !token.is_empty()),
            expiration: Utc.timestamp_millis_opt(raw.expiration).single(),
        })
    }
}

fn epoch_seconds(seconds: i64) -> Option<DateTime<Utc>> {
    (seconds > 0)
        .then(|| Utc.timestamp_opt(seconds, 0).single())
        .flatten()
}

fn open_in_browser(url: &str) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    let spawned = TokioCommand::new(opener)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(error) = spawned {
        debug!("could not launch {opener}: {error}");
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RegisterClient {
    client_id: String,
    client_secret: String,
    client_secret_expires_at: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StartDeviceAuthorization {
    device_code: String,
    user_code: String,
    verification_uri: String,
    verification_uri_complete: String,
    expires_in: i64,
    interval: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CreateToken {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListAccounts {
    account_list: Vec<RawAccount>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawAccount {
    account_id: String,
    account_name: String,
    email_address: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListAccountRoles {
    role_list: Vec<RawRole>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawRole {
    role_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GetRoleCredentials {
    role_credentials: RawRoleCredentials,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawRoleCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: i64,
}
