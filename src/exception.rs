// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务在请求处理生命周期中可能抛出的各类异常情况。
//!
//! ## 错误分类
//! - **协议错误**：请求报文无法解析、方法或版本不受支持、请求体过大。
//! - **渲染错误**：页面名称不在模板缓存中，或模板执行失败。
//! - **存储错误**：外部持久化协作者返回了非预期的故障。
//!
//! 会话解码失败、登录凭据错误、邮箱重复等情况不属于异常，
//! 它们在各自的模块内被吸收为降级但合法的响应。

use std::fmt;

/// 服务器处理请求过程中发生的异常类型。
///
/// 该枚举通常作为 `Result` 的 `Err` 部分返回，上层据此选择响应状态码。
/// 对客户端只展示通用信息，完整描述写入错误日志。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 客户端使用了服务器暂不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 请求行或标头结构不完整。对应 `400 Bad Request`。
    MalformedRequest,
    /// 请求体超过配置的上限。对应 `413 Content Too Large`。
    PayloadTooLarge,
    /// 渲染时请求的页面不存在于模板缓存中。属于编程错误，对应 `500`。
    TemplateNotFound(String),
    /// 模板执行失败。
    Render(String),
    /// 持久化协作者返回的非预期错误。
    Store(String),
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            MalformedRequest => write!(f, "Malformed request (400)"),
            PayloadTooLarge => write!(f, "Request body too large (413)"),
            TemplateNotFound(page) => write!(f, "The template {} does not exist", page),
            Render(detail) => write!(f, "Template execution failed: {}", detail),
            Store(detail) => write!(f, "Storage backend failure: {}", detail),
        }
    }
}

impl std::error::Error for Exception {}

impl Exception {
    /// 异常对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            RequestIsNotUtf8 | UnSupportedRequestMethod | MalformedRequest => 400,
            UnsupportedHttpVersion => 505,
            PayloadTooLarge => 413,
            TemplateNotFound(_) | Render(_) | Store(_) => 500,
        }
    }
}
