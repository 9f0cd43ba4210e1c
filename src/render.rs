use std::sync::Arc;

use bytes::Bytes;
use log::debug;

use crate::cache::TemplateCache;
use crate::exception::Exception;
use crate::view::ViewModel;

/// 渲染管线：按页面名称查找模板并执行。
///
/// 整个页面先渲染到内存中，成功后才交给响应，
/// 所以执行失败时客户端不会收到半截页面。
#[derive(Debug, Clone)]
pub struct Renderer {
    cache: Arc<TemplateCache>,
}

impl Renderer {
    pub fn new(cache: Arc<TemplateCache>) -> Self {
        Self { cache }
    }

    pub fn render(&self, page: &str, view: &ViewModel) -> Result<Bytes, Exception> {
        let set = match self.cache.get(page) {
            Some(set) => set,
            None => {
                debug!("模板{}不存在于缓存中", page);
                return Err(Exception::TemplateNotFound(page.to_string()));
            }
        };
        match set.render(view) {
            Ok(html) => Ok(Bytes::from(html)),
            Err(e) => {
                debug!("执行模板{}失败：{:#}", page, e);
                Err(Exception::Render(e.to_string()))
            }
        }
    }
}
