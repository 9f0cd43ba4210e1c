//! # 会话模块
//!
//! 会话内容整体保存在客户端的一个 Cookie 中，服务端不保留任何会话状态。
//!
//! Cookie 的值为 `base64url(nonce ‖ 密文 ‖ MAC)`：
//! - 明文是 JSON 编码的 `{id, deadline, values}`；
//! - 密文由 blake3 keyed XOF 产生的密钥流与明文异或得到，每次编码使用新的随机 nonce；
//! - MAC 为 `nonce ‖ 密文` 在独立密钥下的 blake3 keyed hash。
//!
//! 三把密钥都由配置中的 secret 经 `blake3::derive_key` 派生。
//! 任何校验失败都会降级为一个新的空会话，不会中断请求。

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use rand::Rng;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::param::{MAX_COOKIE_BYTES, SESSION_COOKIE_NAME};
use crate::request::Request;
use crate::util::format_http_date;

const NONCE_LEN: usize = 16;
const MAC_LEN: usize = 32;
const ID_LEN: usize = 18;

const ENCRYPTION_CONTEXT: &str = "snippetbox 2026-01-01 session cookie encryption";
const MAC_CONTEXT: &str = "snippetbox 2026-01-01 session cookie authentication";
const CSRF_CONTEXT: &str = "snippetbox 2026-01-01 csrf token";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// 不是合法的 base64url，长度不足，或解密后的内容无法解析
    Malformed,
    /// MAC 校验失败
    BadSignature,
    /// 会话已超过绝对有效期
    Expired,
    /// 编码后的 Cookie 超过浏览器允许的大小
    TooLarge,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Malformed => write!(f, "session cookie is malformed"),
            SessionError::BadSignature => write!(f, "session cookie signature mismatch"),
            SessionError::Expired => write!(f, "session cookie has expired"),
            SessionError::TooLarge => {
                write!(f, "session cookie exceeds {} bytes", MAX_COOKIE_BYTES)
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Cookie 中的明文结构
#[derive(Serialize, Deserialize)]
struct Payload {
    id: String,
    deadline: i64,
    values: BTreeMap<String, Value>,
}

/// 单个客户端的会话数据。
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: String,
    deadline: DateTime<Utc>,
    values: BTreeMap<String, Value>,
    /// 本次请求中是否修改过内容
    modified: bool,
    /// 是否为本次请求新建（客户端尚未持有）
    new: bool,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// 新会话与被修改过的会话需要写回客户端
    pub fn should_save(&self) -> bool {
        self.new || self.modified
    }

    pub fn put(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
        self.modified = true;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    /// 读取并删除，用于闪现消息
    pub fn pop(&mut self, key: &str) -> Option<Value> {
        self.remove(key)
    }

    pub fn pop_string(&mut self, key: &str) -> Option<String> {
        match self.pop(key)? {
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 负责会话的创建、编解码、续期以及 CSRF 令牌的生成。
///
/// 构建后只读，可以在所有连接之间共享。
pub struct SessionManager {
    encryption_key: [u8; 32],
    mac_key: [u8; 32],
    csrf_key: [u8; 32],
    lifetime: Duration,
    secure: bool,
}

impl SessionManager {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encryption_key: blake3::derive_key(ENCRYPTION_CONTEXT, secret),
            mac_key: blake3::derive_key(MAC_CONTEXT, secret),
            csrf_key: blake3::derive_key(CSRF_CONTEXT, secret),
            lifetime: Duration::hours(12),
            secure: true,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.secret().as_bytes())
            .with_lifetime(Duration::hours(config.session_lifetime_hours()))
            .with_secure(config.secure_cookie())
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// 新建一个空会话，有效期从 `now` 起算
    pub fn create(&self, now: DateTime<Utc>) -> Session {
        Session {
            id: new_session_id(),
            deadline: truncate_to_seconds(now + self.lifetime),
            values: BTreeMap::new(),
            modified: false,
            new: true,
        }
    }

    /// 从请求的会话 Cookie 恢复会话
    pub fn load(&self, request: &Request) -> Session {
        self.load_at(request.cookie(SESSION_COOKIE_NAME), Utc::now())
    }

    /// 恢复会话。Cookie 缺失、被篡改、已过期或格式错误时都返回新的空会话。
    pub fn load_at(&self, cookie: Option<&str>, now: DateTime<Utc>) -> Session {
        let cookie = match cookie {
            Some(c) if !c.is_empty() => c,
            _ => return self.create(now),
        };
        match self.decode(cookie, now) {
            Ok(session) => session,
            Err(e) => {
                debug!("会话Cookie被丢弃：{}", e);
                self.create(now)
            }
        }
    }

    pub fn decode(&self, cookie: &str, now: DateTime<Utc>) -> Result<Session, SessionError> {
        if cookie.len() > MAX_COOKIE_BYTES {
            return Err(SessionError::TooLarge);
        }
        let raw = URL_SAFE_NO_PAD
            .decode(cookie)
            .map_err(|_| SessionError::Malformed)?;
        if raw.len() < NONCE_LEN + MAC_LEN {
            return Err(SessionError::Malformed);
        }
        let (nonce, rest) = raw.split_at(NONCE_LEN);
        let (ciphertext, mac) = rest.split_at(rest.len() - MAC_LEN);

        let mut received = [0u8; MAC_LEN];
        received.copy_from_slice(mac);
        // blake3::Hash 的相等比较是常数时间的
        if self.mac(nonce, ciphertext) != blake3::Hash::from(received) {
            return Err(SessionError::BadSignature);
        }

        let plaintext = self.apply_keystream(nonce, ciphertext);
        let payload: Payload =
            serde_json::from_slice(&plaintext).map_err(|_| SessionError::Malformed)?;
        let deadline =
            DateTime::from_timestamp(payload.deadline, 0).ok_or(SessionError::Malformed)?;
        if deadline <= now {
            return Err(SessionError::Expired);
        }
        Ok(Session {
            id: payload.id,
            deadline,
            values: payload.values,
            modified: false,
            new: false,
        })
    }

    pub fn encode(&self, session: &Session) -> Result<String, SessionError> {
        let payload = Payload {
            id: session.id.clone(),
            deadline: session.deadline.timestamp(),
            values: session.values.clone(),
        };
        let plaintext = serde_json::to_vec(&payload).map_err(|_| SessionError::Malformed)?;
        let nonce: [u8; NONCE_LEN] = rand::thread_rng().gen();
        let ciphertext = self.apply_keystream(&nonce, &plaintext);
        let mac = self.mac(&nonce, &ciphertext);

        let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len() + MAC_LEN);
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&ciphertext);
        raw.extend_from_slice(mac.as_bytes());
        let encoded = URL_SAFE_NO_PAD.encode(raw);
        if encoded.len() > MAX_COOKIE_BYTES {
            return Err(SessionError::TooLarge);
        }
        Ok(encoded)
    }

    /// 生成完整的 `Set-Cookie` 标头值
    pub fn set_cookie_header(&self, session: &Session) -> Result<String, SessionError> {
        self.set_cookie_header_at(session, Utc::now())
    }

    pub fn set_cookie_header_at(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<String, SessionError> {
        let value = self.encode(session)?;
        let max_age = (session.deadline.timestamp() - now.timestamp()).max(0);
        let mut cookie = format!(
            "{}={}; Path=/; Expires={}; Max-Age={}; HttpOnly",
            SESSION_COOKIE_NAME,
            value,
            format_http_date(&session.deadline),
            max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=Strict");
        Ok(cookie)
    }

    /// 与会话标识绑定的 CSRF 令牌。同一会话内稳定，不知道 secret 的第三方无法预测。
    pub fn token(&self, session: &Session) -> String {
        let hash = blake3::keyed_hash(&self.csrf_key, session.id.as_bytes());
        URL_SAFE_NO_PAD.encode(hash.as_bytes())
    }

    /// 以常数时间比较表单提交的令牌
    pub fn verify_token(&self, session: &Session, candidate: &str) -> bool {
        let expected = self.token(session);
        if expected.len() != candidate.len() {
            return false;
        }
        expected
            .bytes()
            .zip(candidate.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// 在权限变化（登录、登出）时更换会话标识，保留已有内容并重新计算有效期
    pub fn renew(&self, session: &mut Session) {
        self.renew_at(session, Utc::now());
    }

    pub fn renew_at(&self, session: &mut Session, now: DateTime<Utc>) {
        session.id = new_session_id();
        session.deadline = truncate_to_seconds(now + self.lifetime);
        session.modified = true;
    }

    fn mac(&self, nonce: &[u8], ciphertext: &[u8]) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new_keyed(&self.mac_key);
        hasher.update(nonce);
        hasher.update(ciphertext);
        hasher.finalize()
    }

    fn apply_keystream(&self, nonce: &[u8], data: &[u8]) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new_keyed(&self.encryption_key);
        hasher.update(nonce);
        let mut stream = vec![0u8; data.len()];
        hasher.finalize_xof().fill(&mut stream);
        data.iter().zip(stream).map(|(d, k)| d ^ k).collect()
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("lifetime", &self.lifetime)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

fn new_session_id() -> String {
    let bytes: [u8; ID_LEN] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

// Cookie 中的期限只保存到秒
fn truncate_to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}
