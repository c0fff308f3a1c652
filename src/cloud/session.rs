//! 会话：令牌、静默重登录所需凭据、单飞重登录
//!
//! 同一时刻至多一个有效令牌，重登录时整体替换。并发请求同时发现令牌失效时，
//! 只有第一个真正执行登录；其余在锁上等待，发现令牌已被替换后直接复用。

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha512};
use tokio::sync::{Mutex, RwLock};

use crate::cloud::CloudError;

/// 登录口令摘要：SHA-512，小写 hex（服务端固定要求，不可协商）
pub fn digest_password(secret: &str) -> String {
    hex::encode(Sha512::digest(secret.as_bytes()))
}

/// 缓存的登录凭据，只保存摘要，不保存明文
#[derive(Clone)]
pub struct Credentials {
    pub account: String,
    pub password_digest: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, secret: &str) -> Self {
        Self {
            account: account.into(),
            password_digest: digest_password(secret),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("password_digest", &"<redacted>")
            .finish()
    }
}

/// 当前有效会话
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub token: String,
    pub account: String,
    pub established_at: DateTime<Utc>,
}

/// 会话存储：被所有并发资源请求共享
#[derive(Default)]
pub struct SessionStore {
    current: RwLock<Option<SessionInfo>>,
    credentials: RwLock<Option<Credentials>>,
    relogin_lock: Mutex<()>,
    /// 尽力而为的「重登录进行中」标记，仅用于日志
    relogging: AtomicBool,
    relogins: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn token(&self) -> Option<String> {
        self.current.read().await.as_ref().map(|s| s.token.clone())
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().await.clone()
    }

    pub async fn set_credentials(&self, creds: Credentials) {
        *self.credentials.write().await = Some(creds);
    }

    /// 登录成功后整体替换会话
    pub async fn establish(&self, token: String, account: String) -> SessionInfo {
        let info = SessionInfo {
            token,
            account,
            established_at: Utc::now(),
        };
        *self.current.write().await = Some(info.clone());
        info
    }

    pub async fn clear(&self) {
        *self.current.write().await = None;
    }

    /// 登出时一并丢弃凭据，之后不再静默重登录
    pub async fn forget(&self) {
        self.clear().await;
        *self.credentials.write().await = None;
    }

    /// 已完成的重登录次数（不含首次登录）
    pub fn relogin_count(&self) -> u64 {
        self.relogins.load(Ordering::Relaxed)
    }

    /// 单飞重登录：`stale` 为请求失败时使用的令牌；若锁内发现令牌已被他人替换，直接返回新令牌
    pub async fn renew<F, Fut>(&self, stale: Option<&str>, login: F) -> Result<String, CloudError>
    where
        F: FnOnce(Credentials) -> Fut,
        Fut: Future<Output = Result<String, CloudError>>,
    {
        if self.relogging.load(Ordering::Acquire) {
            tracing::debug!("re-login already in progress, waiting");
        }
        let _guard = self.relogin_lock.lock().await;

        if let Some(current) = self.token().await {
            if stale != Some(current.as_str()) {
                return Ok(current);
            }
        }

        let creds = self.credentials().await.ok_or(CloudError::NotLoggedIn)?;
        self.relogging.store(true, Ordering::Release);
        let result = login(creds.clone()).await;
        self.relogging.store(false, Ordering::Release);

        match result {
            Ok(token) => {
                if stale.is_some() {
                    self.relogins.fetch_add(1, Ordering::Relaxed);
                }
                self.establish(token.clone(), creds.account).await;
                Ok(token)
            }
            Err(e) => {
                self.clear().await;
                Err(e)
            }
        }
    }
}
