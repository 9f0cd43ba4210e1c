//! # 模板单元
//!
//! 一个 `TemplateSet` 对应一个页面文件：页面模板与目录中全部布局（layout）、
//! 片段（partial）模板合并到同一个 minijinja 环境中，构建完成后即可独立渲染，
//! 渲染期间不再访问文件系统。
//!
//! 构建阶段负责静态检查：
//! - 布局与片段之间不得声明同名的 `block`/`macro`；
//! - `extends`/`include`/`import` 引用的模板必须存在于共享集合中；
//! - 继承布局的页面只能覆盖布局中声明过的 `block`。

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use minijinja::{AutoEscape, Environment, Value};
use regex::Regex;
use serde::Serialize;

pub const PAGE_SUFFIX: &str = ".page.tmpl";
pub const LAYOUT_SUFFIX: &str = ".layout.tmpl";
pub const PARTIAL_SUFFIX: &str = ".partial.tmpl";

lazy_static! {
    static ref BLOCK_RE: Regex =
        Regex::new(r"\{%-?\s*block\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref MACRO_RE: Regex =
        Regex::new(r"\{%-?\s*macro\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref REFERENCE_RE: Regex =
        Regex::new(r#"\{%-?\s*(?:extends|include|import|from)\s+["']([^"']+)["']"#).unwrap();
    static ref EXTENDS_RE: Regex = Regex::new(r"\{%-?\s*extends\s").unwrap();
    static ref COMMENT_RE: Regex = Regex::new(r"(?s)\{#.*?#\}").unwrap();
    static ref RAW_RE: Regex =
        Regex::new(r"(?s)\{%-?\s*raw\s*-?%\}.*?\{%-?\s*endraw\s*-?%\}").unwrap();
}

/// 模板缓存构建失败。启动阶段致命，不会在请求期间出现。
#[derive(Debug)]
pub enum BuildError {
    /// 目录或文件无法读取
    Io { path: PathBuf, source: io::Error },
    /// 模板语法错误
    Parse {
        file: PathBuf,
        source: minijinja::Error,
    },
    /// 两个共享模板声明了同名的 block 或 macro
    DuplicateBlock {
        name: String,
        first: String,
        second: String,
    },
    /// 引用了共享集合中不存在的模板
    UndefinedTemplate { file: String, name: String },
    /// 页面覆盖了任何布局都未声明的 block
    UndefinedBlock { file: String, name: String },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Io { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            BuildError::Parse { file, source } => {
                write!(f, "cannot parse {}: {}", file.display(), source)
            }
            BuildError::DuplicateBlock {
                name,
                first,
                second,
            } => write!(
                f,
                "block \"{}\" is defined in both {} and {}",
                name, first, second
            ),
            BuildError::UndefinedTemplate { file, name } => {
                write!(f, "{} references undefined template \"{}\"", file, name)
            }
            BuildError::UndefinedBlock { file, name } => write!(
                f,
                "{} overrides block \"{}\" which no layout declares",
                file, name
            ),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Io { source, .. } => Some(source),
            BuildError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// 将时间格式化为 `02 Jan 2006 at 15:04` 形式（UTC）。Unix 纪元视为未设置，返回空串。
pub fn human_date(t: &DateTime<Utc>) -> String {
    if t.timestamp() == 0 {
        return String::new();
    }
    t.format("%d %b %Y at %H:%M").to_string()
}

/// `human_date` 的模板侧入口：接受 RFC 3339 字符串或 Unix 秒数，其他值一律返回空串。
pub fn human_date_value(value: &Value) -> String {
    if let Some(s) = value.as_str() {
        return match DateTime::parse_from_rfc3339(s) {
            Ok(t) => human_date(&t.with_timezone(&Utc)),
            Err(_) => String::new(),
        };
    }
    match i64::try_from(value.clone()) {
        Ok(secs) => DateTime::from_timestamp(secs, 0)
            .map(|t| human_date(&t))
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

pub type TemplateFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// 注入到每个 `TemplateSet` 的函数表。每一项同时注册为过滤器和全局函数，
/// 因此模板中 `{{ t|human_date }}` 与 `{{ human_date(t) }}` 等价。
#[derive(Clone)]
pub struct TemplateFunctions {
    entries: BTreeMap<String, TemplateFn>,
}

impl TemplateFunctions {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// 生产环境使用的标准函数表
    pub fn standard() -> Self {
        Self::empty().with("human_date", human_date_value)
    }

    /// 添加或替换一项，测试可借此替换为确定性的实现
    pub fn with<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.entries.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(|k| k.as_str()).collect()
    }

    fn register(&self, env: &mut Environment<'static>) {
        for (name, f) in &self.entries {
            let filter = Arc::clone(f);
            env.add_filter(name.clone(), move |value: Value| -> String { filter(&value) });
            let function = Arc::clone(f);
            env.add_function(name.clone(), move |value: Value| -> String {
                function(&value)
            });
        }
    }
}

impl Default for TemplateFunctions {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for TemplateFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateFunctions")
            .field("entries", &self.names())
            .finish()
    }
}

/// 一个模板文件的名称、路径与源码
#[derive(Debug, Clone)]
pub struct TemplateSource {
    name: String,
    path: PathBuf,
    source: String,
    /// 去掉注释与 raw 区段后的源码，只用于静态检查
    scan: String,
}

impl TemplateSource {
    pub fn read(path: &Path) -> Result<Self, BuildError> {
        let source = fs::read_to_string(path).map_err(|e| BuildError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, path.to_path_buf(), source))
    }

    pub fn new(name: String, path: PathBuf, source: String) -> Self {
        let without_comments = COMMENT_RE.replace_all(&source, "");
        let scan = RAW_RE.replace_all(&without_comments, "").into_owned();
        Self {
            name,
            path,
            source,
            scan,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn captures(&self, re: &Regex) -> Vec<String> {
        re.captures_iter(&self.scan)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn blocks(&self) -> Vec<String> {
        self.captures(&BLOCK_RE)
    }

    fn declared_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.blocks().into_iter().collect();
        names.extend(self.captures(&MACRO_RE));
        names
    }

    fn references(&self) -> Vec<String> {
        self.captures(&REFERENCE_RE)
    }

    fn extends(&self) -> bool {
        EXTENDS_RE.is_match(&self.scan)
    }
}

/// 所有页面共享的布局与片段模板，在缓存构建时只读取、检查一次
#[derive(Debug)]
pub struct SharedTemplates {
    layouts: Vec<TemplateSource>,
    partials: Vec<TemplateSource>,
    layout_blocks: BTreeSet<String>,
}

impl SharedTemplates {
    /// 合并布局与片段并做冲突检查。按文件名排序后再检查，
    /// 因此结果与目录枚举顺序无关。
    pub fn new(
        mut layouts: Vec<TemplateSource>,
        mut partials: Vec<TemplateSource>,
    ) -> Result<Self, BuildError> {
        layouts.sort_by(|a, b| a.name.cmp(&b.name));
        partials.sort_by(|a, b| a.name.cmp(&b.name));

        let mut owners: BTreeMap<String, String> = BTreeMap::new();
        for template in layouts.iter().chain(partials.iter()) {
            for name in template.declared_names() {
                if let Some(first) = owners.get(&name) {
                    return Err(BuildError::DuplicateBlock {
                        name,
                        first: first.clone(),
                        second: template.name.clone(),
                    });
                }
                owners.insert(name, template.name.clone());
            }
        }

        let layout_blocks = layouts.iter().flat_map(|l| l.blocks()).collect();
        let shared = Self {
            layouts,
            partials,
            layout_blocks,
        };
        for template in shared.iter() {
            shared.check_references(template)?;
        }
        Ok(shared)
    }

    fn iter(&self) -> impl Iterator<Item = &TemplateSource> {
        self.layouts.iter().chain(self.partials.iter())
    }

    fn contains(&self, name: &str) -> bool {
        self.iter().any(|t| t.name == name)
    }

    fn check_references(&self, template: &TemplateSource) -> Result<(), BuildError> {
        for reference in template.references() {
            if !self.contains(&reference) {
                return Err(BuildError::UndefinedTemplate {
                    file: template.name.clone(),
                    name: reference,
                });
            }
        }
        Ok(())
    }

    fn check_page(&self, page: &TemplateSource) -> Result<(), BuildError> {
        self.check_references(page)?;
        if page.extends() {
            for block in page.blocks() {
                if !self.layout_blocks.contains(&block) {
                    return Err(BuildError::UndefinedBlock {
                        file: page.name.clone(),
                        name: block,
                    });
                }
            }
        }
        Ok(())
    }
}

/// 一个可独立渲染的页面：页面模板加上全部布局与片段
pub struct TemplateSet {
    name: String,
    env: Environment<'static>,
}

impl TemplateSet {
    pub fn build(
        page: &TemplateSource,
        shared: &SharedTemplates,
        functions: &TemplateFunctions,
    ) -> Result<Self, BuildError> {
        shared.check_page(page)?;

        let mut env = Environment::new();
        // 文件后缀不是 .html，需要显式开启 HTML 转义
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        functions.register(&mut env);

        for template in std::iter::once(page).chain(shared.iter()) {
            env.add_template_owned(template.name.clone(), template.source.clone())
                .map_err(|e| BuildError::Parse {
                    file: template.path.clone(),
                    source: e,
                })?;
        }

        Ok(Self {
            name: page.name.clone(),
            env,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 执行页面模板，返回完整输出
    pub fn render<S: Serialize>(&self, context: S) -> Result<String, minijinja::Error> {
        self.env.get_template(&self.name)?.render(context)
    }
}

impl fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateSet").field("name", &self.name).finish()
    }
}
