//! 持久化协作者的数据类型与能力接口。
//!
//! 核心流程只通过 `SnippetModel` 与 `UserModel` 访问存储，
//! 具体实现（见 `store` 模块）或测试替身在启动时注入。

use std::fmt;

use chrono::{DateTime, Utc};
use serde_derive::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snippet {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub hashed_password: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// 记录不存在（或已过期）
    NoRecord,
    /// 邮箱或密码错误
    InvalidCredentials,
    /// 注册时邮箱已被占用
    DuplicateEmail,
    /// 存储后端的其他故障
    Backend(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::NoRecord => write!(f, "no matching record found"),
            ModelError::InvalidCredentials => write!(f, "invalid credentials"),
            ModelError::DuplicateEmail => write!(f, "duplicate email"),
            ModelError::Backend(detail) => write!(f, "storage backend error: {}", detail),
        }
    }
}

impl std::error::Error for ModelError {}

#[cfg_attr(test, mockall::automock)]
pub trait SnippetModel: Send + Sync {
    /// 新建片段，`expires_days` 天后过期，返回新片段的编号
    fn insert(&self, title: &str, content: &str, expires_days: u32) -> Result<i64, ModelError>;
    fn get(&self, id: i64) -> Result<Snippet, ModelError>;
    /// 最新的未过期片段，按创建时间倒序
    fn latest(&self) -> Result<Vec<Snippet>, ModelError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait UserModel: Send + Sync {
    fn insert(&self, name: &str, email: &str, password: &str) -> Result<(), ModelError>;
    /// 校验邮箱与密码，成功时返回用户编号
    fn authenticate(&self, email: &str, password: &str) -> Result<i64, ModelError>;
    fn get(&self, id: i64) -> Result<User, ModelError>;
}
