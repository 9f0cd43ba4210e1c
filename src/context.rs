use log::debug;

use crate::exception::Exception;
use crate::models::{ModelError, User, UserModel};
use crate::param::SESSION_KEY_USER_ID;
use crate::session::Session;

/// 当前请求的已认证用户。
///
/// 由认证中间件在处理器运行之前构造一次，之后只能读取。
/// 未登录或会话中的用户已不存在时为匿名请求。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    user: Option<User>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    /// 依据会话中的用户编号查询用户。
    ///
    /// 用户已被删除时视为匿名，但不修改会话；其他存储错误向上传递。
    pub fn resolve(session: &Session, users: &dyn UserModel) -> Result<Self, Exception> {
        let id = match session.get_i64(SESSION_KEY_USER_ID) {
            Some(id) => id,
            None => return Ok(Self::anonymous()),
        };
        match users.get(id) {
            Ok(user) => Ok(Self { user: Some(user) }),
            Err(ModelError::NoRecord) => {
                debug!("会话中的用户{}已不存在，按匿名请求处理", id);
                Ok(Self::anonymous())
            }
            Err(e) => Err(Exception::Store(e.to_string())),
        }
    }

    pub fn authenticated_user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user.as_ref().map(|u| u.id)
    }
}
