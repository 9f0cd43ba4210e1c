pub mod app;
pub mod cache;
pub mod config;
pub mod context;
pub mod exception;
pub mod forms;
pub mod models;
pub mod param;
pub mod render;
pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod store;
pub mod template;
pub mod util;
pub mod view;

pub use app::Application;
pub use cache::TemplateCache;
pub use config::Config;
pub use context::RequestContext;
pub use exception::Exception;
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use render::Renderer;
pub use request::Request;
pub use response::Response;
pub use session::{Session, SessionError, SessionManager};
pub use template::{BuildError, TemplateFunctions, TemplateSet};
pub use util::HtmlBuilder;
pub use view::ViewModel;
