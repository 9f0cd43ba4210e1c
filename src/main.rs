// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Snippetbox 服务入口
//!
//! 初始化日志、加载配置、构建模板缓存并打开存储，随后启动 Tokio 运行时上的 accept 循环。
//! 启动阶段的任何错误都是致命的：记录日志后以状态码 1 退出。

use std::{path::Path, process, sync::Arc};

use log::{error, info};
use tokio::{net::TcpListener, runtime::Builder};

use snippetbox::{
    config::Config, server, store, Application, Renderer, SessionManager, TemplateCache,
    TemplateFunctions,
};

const DEFAULT_CONFIG: &str = "config/development.toml";

fn main() {
    // 1. 日志系统：由外部 YAML 配置级别与输出目的地
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
        process::exit(1);
    }

    if let Err(e) = start() {
        error!("{}", e);
        process::exit(1);
    }
}

fn start() -> Result<(), Box<dyn std::error::Error>> {
    // 2. 配置：第一个命令行参数可以指定配置文件
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = Config::from_toml(&config_path)?;
    info!("配置文件{}已载入", config_path);

    // 3. 模板缓存：只在启动时构建一次
    let cache = TemplateCache::build(
        Path::new(config.template_dir()),
        &TemplateFunctions::standard(),
    )?;
    info!("模板目录：{}，页面：{:?}", config.template_dir(), cache.names());

    // 4. 存储与会话
    let (snippets, users) = store::open_stores(config.dsn())?;
    let sessions = SessionManager::from_config(&config);
    let app = Arc::new(Application::new(
        sessions,
        Renderer::new(Arc::new(cache)),
        snippets,
        users,
    ));

    // 5. 运行时：工作线程数由配置决定
    let runtime = Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let listener = TcpListener::bind(config.addr()).await?;
        info!("地址{}绑定完成", config.addr());
        server::run(listener, app, config.max_request_bytes()).await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
