use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::template::{
    BuildError, SharedTemplates, TemplateFunctions, TemplateSet, TemplateSource, LAYOUT_SUFFIX,
    PAGE_SUFFIX, PARTIAL_SUFFIX,
};

/// 页面名称到 `TemplateSet` 的只读映射。
///
/// 启动时构建一次，之后不再修改，可以被任意多个请求并发读取而无需加锁。
#[derive(Debug)]
pub struct TemplateCache {
    cache: HashMap<String, TemplateSet>,
}

impl TemplateCache {
    /// 扫描目录并构建全部页面。任何一步失败都会中止整个构建，不会返回部分缓存。
    pub fn build(dir: &Path, functions: &TemplateFunctions) -> Result<Self, BuildError> {
        let pages = list_with_suffix(dir, PAGE_SUFFIX)?;
        let layouts = read_all(&list_with_suffix(dir, LAYOUT_SUFFIX)?)?;
        let partials = read_all(&list_with_suffix(dir, PARTIAL_SUFFIX)?)?;
        debug!(
            "模板目录{}：{}个页面，{}个布局，{}个片段",
            dir.display(),
            pages.len(),
            layouts.len(),
            partials.len()
        );
        let shared = SharedTemplates::new(layouts, partials)?;

        let mut cache = HashMap::new();
        for page in &pages {
            let source = TemplateSource::read(page)?;
            let set = TemplateSet::build(&source, &shared, functions)?;
            debug!("页面模板{}构建完成", set.name());
            cache.insert(set.name().to_string(), set);
        }
        info!("模板缓存构建完成，共{}个页面", cache.len());
        Ok(Self { cache })
    }

    // 查询
    pub fn get(&self, page: &str) -> Option<&TemplateSet> {
        self.cache.get(page)
    }

    pub fn contains(&self, page: &str) -> bool {
        self.cache.contains_key(page)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.cache.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// 列出目录下以指定后缀结尾的普通文件，按文件名排序
fn list_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, BuildError> {
    let io_error = |e| BuildError::Io {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(suffix));
        if matches && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn read_all(paths: &[PathBuf]) -> Result<Vec<TemplateSource>, BuildError> {
    paths.iter().map(|p| TemplateSource::read(p)).collect()
}
