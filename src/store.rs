//! 内存存储后端，实现 `SnippetModel` 与 `UserModel`。
//!
//! 通过 `memory://` 数据源启用。进程退出后数据全部丢失。

use std::sync::{Arc, Mutex, MutexGuard};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use log::{debug, warn};

use crate::config::ConfigError;
use crate::models::{ModelError, Snippet, SnippetModel, User, UserModel};

pub const MEMORY_DSN: &str = "memory://";

/// 首页展示的片段数量
pub const LATEST_LIMIT: usize = 10;

lazy_static! {
    /// 邮箱不存在时用于校验的哈希，使两条失败路径耗时相近
    static ref DUMMY_HASH: Option<String> = hash_password("snippetbox dummy password").ok();
}

fn hash_password(password: &str) -> Result<String, ModelError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ModelError::Backend(e.to_string()))
}

fn verify_password(hashed_password: &str, password: &str) -> Result<(), ModelError> {
    let parsed =
        PasswordHash::new(hashed_password).map_err(|e| ModelError::Backend(e.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(()),
        Err(argon2::password_hash::Error::Password) => Err(ModelError::InvalidCredentials),
        Err(e) => Err(ModelError::Backend(e.to_string())),
    }
}

/// 根据数据源字符串打开存储。目前只支持 `memory://`。
pub fn open_stores(
    dsn: &str,
) -> Result<(Arc<dyn SnippetModel>, Arc<dyn UserModel>), ConfigError> {
    if dsn.trim() != MEMORY_DSN {
        return Err(ConfigError::Invalid(format!(
            "unsupported dsn {:?}, only {} is available",
            dsn, MEMORY_DSN
        )));
    }
    debug!("使用内存存储后端");
    Ok((
        Arc::new(MemorySnippetStore::new()),
        Arc::new(MemoryUserStore::new()),
    ))
}

// 锁被毒化时沿用内部数据继续服务
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("存储的互斥锁已被毒化，继续使用其中的数据");
            poisoned.into_inner()
        }
    }
}

pub struct MemorySnippetStore {
    snippets: Mutex<Vec<Snippet>>,
    clock: fn() -> DateTime<Utc>,
}

impl MemorySnippetStore {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self {
            snippets: Mutex::new(Vec::new()),
            clock,
        }
    }
}

impl Default for MemorySnippetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnippetModel for MemorySnippetStore {
    fn insert(&self, title: &str, content: &str, expires_days: u32) -> Result<i64, ModelError> {
        let now = (self.clock)();
        let mut snippets = lock(&self.snippets);
        let id = snippets.len() as i64 + 1;
        snippets.push(Snippet {
            id,
            title: title.to_string(),
            content: content.to_string(),
            created: now,
            expires: now + Duration::days(i64::from(expires_days)),
        });
        Ok(id)
    }

    fn get(&self, id: i64) -> Result<Snippet, ModelError> {
        let now = (self.clock)();
        lock(&self.snippets)
            .iter()
            .find(|s| s.id == id && s.expires > now)
            .cloned()
            .ok_or(ModelError::NoRecord)
    }

    fn latest(&self) -> Result<Vec<Snippet>, ModelError> {
        let now = (self.clock)();
        // 编号单调递增，倒序遍历即为按创建时间倒序
        Ok(lock(&self.snippets)
            .iter()
            .rev()
            .filter(|s| s.expires > now)
            .take(LATEST_LIMIT)
            .cloned()
            .collect())
    }
}

pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserModel for MemoryUserStore {
    fn insert(&self, name: &str, email: &str, password: &str) -> Result<(), ModelError> {
        // 哈希计算较慢，放在锁外进行
        let hashed_password = hash_password(password)?;

        let mut users = lock(&self.users);
        if users.iter().any(|u| u.email == email) {
            return Err(ModelError::DuplicateEmail);
        }
        let id = users.len() as i64 + 1;
        users.push(User {
            id,
            name: name.to_string(),
            email: email.to_string(),
            hashed_password,
            created: Utc::now(),
        });
        Ok(())
    }

    fn authenticate(&self, email: &str, password: &str) -> Result<i64, ModelError> {
        let found = lock(&self.users)
            .iter()
            .find(|u| u.email == email)
            .map(|u| (u.id, u.hashed_password.clone()));
        match found {
            Some((id, hashed_password)) => verify_password(&hashed_password, password).map(|_| id),
            None => {
                if let Some(dummy) = DUMMY_HASH.as_deref() {
                    let _ = verify_password(dummy, password);
                }
                Err(ModelError::InvalidCredentials)
            }
        }
    }

    fn get(&self, id: i64) -> Result<User, ModelError> {
        lock(&self.users)
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or(ModelError::NoRecord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_snippet_insert_and_get() {
        let store = MemorySnippetStore::with_clock(fixed_now);
        let id = store.insert("O snail", "Climb Mount Fuji", 7).unwrap();
        let snippet = store.get(id).unwrap();
        assert_eq!(snippet.title, "O snail");
        assert_eq!(snippet.expires, fixed_now() + Duration::days(7));
        assert_eq!(store.get(id + 1), Err(ModelError::NoRecord));
    }

    #[test]
    fn test_expired_snippet_is_no_record() {
        let store = MemorySnippetStore::with_clock(fixed_now);
        let id = store.insert("gone", "already expired", 0).unwrap();
        assert_eq!(store.get(id), Err(ModelError::NoRecord));
        assert!(store.latest().unwrap().is_empty());
    }

    #[test]
    fn test_latest_is_newest_first_and_limited() {
        let store = MemorySnippetStore::with_clock(fixed_now);
        for i in 0..12 {
            store.insert(&format!("snippet {}", i), "content", 1).unwrap();
        }
        let latest = store.latest().unwrap();
        assert_eq!(latest.len(), LATEST_LIMIT);
        assert_eq!(latest[0].title, "snippet 11");
        assert_eq!(latest[9].title, "snippet 2");
    }

    #[test]
    fn test_user_signup_and_authenticate() {
        let store = MemoryUserStore::new();
        store.insert("Alice", "alice@example.com", "pa55word!!").unwrap();

        let id = store.authenticate("alice@example.com", "pa55word!!").unwrap();
        let user = store.get(id).unwrap();
        assert_eq!(user.name, "Alice");
        assert!(user.hashed_password.starts_with("$argon2id$"));

        assert_eq!(
            store.authenticate("alice@example.com", "wrong-password"),
            Err(ModelError::InvalidCredentials)
        );
        assert_eq!(
            store.authenticate("bob@example.com", "pa55word!!"),
            Err(ModelError::InvalidCredentials)
        );
    }

    #[test]
    fn test_unknown_email_still_verifies_a_hash() {
        let store = MemoryUserStore::new();
        store
            .insert("Alice", "alice@example.com", "pa55word123")
            .unwrap();
        // 预热，排除首次计算哑哈希的耗时
        let _ = store.authenticate("nobody@example.com", "pa55word123");

        let start = std::time::Instant::now();
        let known = store.authenticate("alice@example.com", "wrong password");
        let known_elapsed = start.elapsed();

        let start = std::time::Instant::now();
        let unknown = store.authenticate("nobody@example.com", "wrong password");
        let unknown_elapsed = start.elapsed();

        assert_eq!(known, Err(ModelError::InvalidCredentials));
        assert_eq!(unknown, Err(ModelError::InvalidCredentials));
        assert!(unknown_elapsed * 4 >= known_elapsed);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let store = MemoryUserStore::new();
        store.insert("Alice", "alice@example.com", "pa55word!!").unwrap();
        assert_eq!(
            store.insert("Alice 2", "alice@example.com", "another-pass"),
            Err(ModelError::DuplicateEmail)
        );
        assert_eq!(store.get(2), Err(ModelError::NoRecord));
    }

    #[test]
    fn test_open_stores_only_memory() {
        assert!(open_stores("memory://").is_ok());
        assert!(matches!(
            open_stores("postgres://web@localhost/snippetbox"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
