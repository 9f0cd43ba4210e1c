use chrono::{DateTime, Datelike, Utc};
use serde_derive::Serialize;

use crate::context::RequestContext;
use crate::forms::Form;
use crate::models::{Snippet, User};
use crate::param::SESSION_KEY_FLASH;
use crate::session::{Session, SessionManager};

/// 传入每个页面模板的数据。
///
/// `ViewModel::new` 填好所有页面共用的字段，处理器只补充自己页面需要的部分。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewModel {
    pub csrf_token: String,
    pub authenticated_user: Option<User>,
    pub snippet: Option<Snippet>,
    pub snippets: Vec<Snippet>,
    pub current_year: i32,
    pub form: Option<Form>,
    pub flash: Option<String>,
}

impl ViewModel {
    /// 带上当前用户、CSRF 令牌与会话中待显示的闪现消息。
    /// 闪现消息在这里只读取，页面渲染成功后才从会话中删除。
    pub fn new(
        sessions: &SessionManager,
        session: &Session,
        context: &RequestContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            csrf_token: sessions.token(session),
            authenticated_user: context.authenticated_user().cloned(),
            current_year: now.year(),
            flash: session.get_str(SESSION_KEY_FLASH).map(str::to_string),
            ..Default::default()
        }
    }

    pub fn with_snippet(mut self, snippet: Snippet) -> Self {
        self.snippet = Some(snippet);
        self
    }

    pub fn with_snippets(mut self, snippets: Vec<Snippet>) -> Self {
        self.snippets = snippets;
        self
    }

    pub fn with_form(mut self, form: Form) -> Self {
        self.form = Some(form);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated_user.is_some()
    }
}
