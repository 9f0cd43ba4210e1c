// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 应用层
//!
//! `Application` 持有启动时构造好的全部依赖（会话管理器、渲染管线、存储协作者、时钟），
//! 以引用形式交给每个连接任务，没有任何全局可变状态。
//!
//! 一个请求依次经过：
//! 1. panic 恢复（返回 500 并关闭连接）
//! 2. 访问日志
//! 3. 安全标头
//! 4. 路由匹配与方法检查（`/ping` 在此直接返回，不加载会话）
//! 5. 会话加载与写回
//! 6. 认证，构造 `RequestContext`
//! 7. POST 请求的 CSRF 校验
//! 8. 需要登录的路由检查认证状态
//! 9. 处理器

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::context::RequestContext;
use crate::forms::{self, Form, GENERIC_ERROR};
use crate::models::{ModelError, SnippetModel, UserModel};
use crate::param::{HttpRequestMethod, CSRF_FIELD, SESSION_KEY_FLASH, SESSION_KEY_USER_ID};
use crate::render::Renderer;
use crate::request::Request;
use crate::response::Response;
use crate::session::{Session, SessionManager};
use crate::view::ViewModel;

use HttpRequestMethod::*;

const READ_ONLY: &[HttpRequestMethod] = &[Get, Head];
const READ_WRITE: &[HttpRequestMethod] = &[Get, Head, Post];
const WRITE_ONLY: &[HttpRequestMethod] = &[Post];

/// 应用支持的路由
#[derive(Debug, Clone, PartialEq)]
enum Route {
    Home,
    ShowSnippet(String),
    CreateSnippet,
    Signup,
    Login,
    Logout,
    Ping,
}

impl Route {
    fn resolve(path: &str) -> Option<Route> {
        let route = match path {
            "/" => Route::Home,
            "/ping" => Route::Ping,
            "/snippet/create" => Route::CreateSnippet,
            "/user/signup" => Route::Signup,
            "/user/login" => Route::Login,
            "/user/logout" => Route::Logout,
            _ => {
                let id = path.strip_prefix("/snippet/")?;
                if id.is_empty() || id.contains('/') {
                    return None;
                }
                Route::ShowSnippet(id.to_string())
            }
        };
        Some(route)
    }

    fn allowed_methods(&self) -> &'static [HttpRequestMethod] {
        match self {
            Route::Home | Route::ShowSnippet(_) | Route::Ping => READ_ONLY,
            Route::CreateSnippet | Route::Signup | Route::Login => READ_WRITE,
            Route::Logout => WRITE_ONLY,
        }
    }

    fn requires_authentication(&self) -> bool {
        matches!(self, Route::CreateSnippet | Route::Logout)
    }
}

pub struct Application {
    sessions: SessionManager,
    renderer: Renderer,
    snippets: Arc<dyn SnippetModel>,
    users: Arc<dyn UserModel>,
    clock: fn() -> DateTime<Utc>,
}

impl Application {
    pub fn new(
        sessions: SessionManager,
        renderer: Renderer,
        snippets: Arc<dyn SnippetModel>,
        users: Arc<dyn UserModel>,
    ) -> Self {
        Self {
            sessions,
            renderer,
            snippets,
            users,
            clock: Utc::now,
        }
    }

    /// 替换页面使用的时钟（页脚年份等），便于测试
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// 处理一个已解析的请求，始终返回一个响应
    pub fn serve(&self, request: &Request, id: u128) -> Response {
        let start_time = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.route(request, id)));
        let mut response = match result {
            Ok(response) => response,
            Err(cause) => {
                let detail = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!("[ID{}]处理请求时发生panic：{}", id, detail);
                let mut response = Response::response_500();
                response.add_header("Connection", "close");
                response
            }
        };
        response
            .add_header("X-XSS-Protection", "1; mode=block")
            .add_header("X-Frame-Options", "deny");
        info!(
            "[ID{}] {}, {}, {}, {}, {}, {}ms",
            id,
            request.method(),
            request.path(),
            response.status_code(),
            response.information(),
            request.user_agent(),
            start_time.elapsed().as_millis()
        );
        response
    }

    fn route(&self, request: &Request, id: u128) -> Response {
        let route = match Route::resolve(request.path()) {
            Some(route) => route,
            None => {
                debug!("[ID{}]没有匹配的路由：{}", id, request.path());
                return Response::response_404();
            }
        };
        let allowed = route.allowed_methods();
        if !allowed.contains(&request.method()) {
            return Response::response_405(allowed.to_vec());
        }
        if route == Route::Ping {
            return Response::from_text(200, "OK");
        }

        let mut session = self.sessions.load(request);
        let response = self.authenticate(request, route, &mut session, id);
        if !session.should_save() {
            return response;
        }
        match self.sessions.set_cookie_header(&session) {
            Ok(cookie) => {
                let mut response = response;
                response.add_cookie(cookie);
                response
            }
            Err(e) => self.server_error(id, &e),
        }
    }

    fn authenticate(
        &self,
        request: &Request,
        route: Route,
        session: &mut Session,
        id: u128,
    ) -> Response {
        let context = match RequestContext::resolve(session, self.users.as_ref()) {
            Ok(context) => context,
            Err(e) => return self.server_error(id, &e),
        };

        if request.method() == Post {
            let form = request.form();
            let submitted = form.get(CSRF_FIELD).map_or("", |t| t.as_str());
            if !self.sessions.verify_token(session, submitted) {
                warn!("[ID{}]CSRF令牌校验失败：{}", id, request.path());
                return Response::response_400();
            }
        }

        if !route.requires_authentication() {
            return self.dispatch(request, route, session, &context, id);
        }
        let mut response = if context.is_authenticated() {
            self.dispatch(request, route, session, &context, id)
        } else {
            Response::redirect("/user/login")
        };
        response.add_header("Cache-Control", "no-store");
        response
    }

    fn dispatch(
        &self,
        request: &Request,
        route: Route,
        session: &mut Session,
        context: &RequestContext,
        id: u128,
    ) -> Response {
        let post = request.method() == Post;
        match route {
            Route::Home => self.home(session, context, id),
            Route::ShowSnippet(raw_id) => self.show_snippet(&raw_id, session, context, id),
            Route::CreateSnippet if post => self.create_snippet(request, session, context, id),
            Route::CreateSnippet => {
                let view = self.view(session, context).with_form(Form::default());
                self.render(200, "create.page.tmpl", &view, session, id)
            }
            Route::Signup if post => self.signup(request, session, context, id),
            Route::Signup => {
                let view = self.view(session, context).with_form(Form::default());
                self.render(200, "signup.page.tmpl", &view, session, id)
            }
            Route::Login if post => self.login(request, session, context, id),
            Route::Login => {
                let view = self.view(session, context).with_form(Form::default());
                self.render(200, "login.page.tmpl", &view, session, id)
            }
            Route::Logout => self.logout(session),
            Route::Ping => Response::from_text(200, "OK"),
        }
    }

    fn home(&self, session: &mut Session, context: &RequestContext, id: u128) -> Response {
        match self.snippets.latest() {
            Ok(snippets) => {
                let view = self.view(session, context).with_snippets(snippets);
                self.render(200, "home.page.tmpl", &view, session, id)
            }
            Err(e) => self.server_error(id, &e),
        }
    }

    fn show_snippet(
        &self,
        raw_id: &str,
        session: &mut Session,
        context: &RequestContext,
        id: u128,
    ) -> Response {
        let snippet_id = match raw_id.parse::<i64>() {
            Ok(n) if n >= 1 => n,
            _ => return Response::response_404(),
        };
        match self.snippets.get(snippet_id) {
            Ok(snippet) => {
                let view = self.view(session, context).with_snippet(snippet);
                self.render(200, "show.page.tmpl", &view, session, id)
            }
            Err(ModelError::NoRecord) => Response::response_404(),
            Err(e) => self.server_error(id, &e),
        }
    }

    fn create_snippet(
        &self,
        request: &Request,
        session: &mut Session,
        context: &RequestContext,
        id: u128,
    ) -> Response {
        let mut form = submitted_form(request);
        forms::validate_snippet(&mut form);
        if !form.valid() {
            let view = self.view(session, context).with_form(form);
            return self.render(200, "create.page.tmpl", &view, session, id);
        }
        // 已通过取值范围校验
        let expires = form.get("expires").parse::<u32>().unwrap_or(365);
        match self
            .snippets
            .insert(form.get("title"), form.get("content"), expires)
        {
            Ok(snippet_id) => {
                session.put(SESSION_KEY_FLASH, "Snippet successfully created!");
                Response::redirect(&format!("/snippet/{}", snippet_id))
            }
            Err(e) => self.server_error(id, &e),
        }
    }

    fn signup(
        &self,
        request: &Request,
        session: &mut Session,
        context: &RequestContext,
        id: u128,
    ) -> Response {
        let mut form = submitted_form(request);
        forms::validate_signup(&mut form);
        if form.valid() {
            let result = self
                .users
                .insert(form.get("name"), form.get("email"), form.get("password"));
            match result {
                Ok(()) => {
                    session.put(
                        SESSION_KEY_FLASH,
                        "Your signup was successful. Please log in.",
                    );
                    return Response::redirect("/user/login");
                }
                Err(ModelError::DuplicateEmail) => {
                    form.add_error("email", "Address is already in use");
                }
                Err(e) => return self.server_error(id, &e),
            }
        }
        let view = self.view(session, context).with_form(form);
        self.render(200, "signup.page.tmpl", &view, session, id)
    }

    fn login(
        &self,
        request: &Request,
        session: &mut Session,
        context: &RequestContext,
        id: u128,
    ) -> Response {
        let mut form = submitted_form(request);
        match self
            .users
            .authenticate(form.get("email"), form.get("password"))
        {
            Ok(user_id) => {
                // 登录后更换会话标识，防止会话固定攻击
                self.sessions.renew(session);
                session.put(SESSION_KEY_USER_ID, user_id);
                Response::redirect("/snippet/create")
            }
            Err(ModelError::InvalidCredentials) => {
                form.add_error(GENERIC_ERROR, "Email or Password is incorrect");
                let view = self.view(session, context).with_form(form);
                self.render(200, "login.page.tmpl", &view, session, id)
            }
            Err(e) => self.server_error(id, &e),
        }
    }

    fn logout(&self, session: &mut Session) -> Response {
        self.sessions.renew(session);
        session.remove(SESSION_KEY_USER_ID);
        session.put(SESSION_KEY_FLASH, "You've been logged out successfully!");
        Response::redirect("/")
    }

    fn view(&self, session: &Session, context: &RequestContext) -> ViewModel {
        ViewModel::new(&self.sessions, session, context, (self.clock)())
    }

    /// 渲染成功后才消费闪现消息，渲染失败时它留到下一次请求
    fn render(
        &self,
        status: u16,
        page: &str,
        view: &ViewModel,
        session: &mut Session,
        id: u128,
    ) -> Response {
        match self.renderer.render(page, view) {
            Ok(body) => {
                if view.flash.is_some() {
                    session.remove(SESSION_KEY_FLASH);
                }
                Response::from_html(status, body)
            }
            Err(e) => self.server_error(id, &e),
        }
    }

    /// 完整错误写入日志，客户端只看到通用的 500 页面
    fn server_error(&self, id: u128, error: &dyn fmt::Display) -> Response {
        error!("[ID{}]{}", id, error);
        Response::response_500()
    }
}

/// 提交的表单字段，不含 CSRF 令牌
fn submitted_form(request: &Request) -> Form {
    let mut values: BTreeMap<String, String> = request.form();
    values.remove(CSRF_FIELD);
    Form::new(values)
}
