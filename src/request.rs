// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 负责将 TCP 流中读取的原始字节解析为强类型的 `Request` 结构体。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、查询字符串、版本）。
//! 2. HTTP 标头（Headers）的提取，字段名大小写不敏感。
//! 3. `Cookie` 标头的拆分。
//! 4. `application/x-www-form-urlencoded` 请求体的解码。

use std::collections::{BTreeMap, HashMap};

use crate::{exception::Exception, param::*, util::parse_urlencoded};
use log::error;

/// 报文头与报文体之间的分隔符
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 表示一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法（GET, POST 等）
    method: HttpRequestMethod,
    /// 请求的资源路径（不含查询字符串）
    path: String,
    /// 已解码的查询参数
    query: BTreeMap<String, String>,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 客户端标识字符串
    user_agent: String,
    /// 客户端支持的压缩编码列表（按解析顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    /// 全部标头，键为小写字段名
    headers: HashMap<String, String>,
    /// 请求携带的 Cookie
    cookies: HashMap<String, String>,
    /// 原始请求体
    body: Vec<u8>,
}

/// 在缓冲区中定位报文头结束的位置（不含分隔符）。
pub fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

/// 从报文头文本中读取 `Content-Length`，缺失或非法时视为 0。
pub fn content_length_of(head: &str) -> usize {
    head.split(CRLF)
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0)
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 定位报文头与报文体的分界，并确保报文头是合法的 UTF-8。
    /// 2. 解析请求行：提取方法、路径、查询字符串和协议版本。
    /// 3. 迭代解析标头，单独处理 `User-Agent`、`Accept-Encoding`、`Cookie`。
    /// 4. 按 `Content-Length` 截取请求体。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 全局请求 ID，用于在多线程环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let (head_bytes, rest) = match find_head_end(buffer) {
            Some(end) => (&buffer[..end], &buffer[end + HEAD_TERMINATOR.len()..]),
            None => (buffer, &buffer[buffer.len()..]),
        };

        // 1. 将报文头转换为字符串，失败则判定为非法的 HTTP 请求
        let head = match std::str::from_utf8(head_bytes) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let request_lines: Vec<&str> = head.split(CRLF).collect();

        // 2. 解析请求行 (e.g., "GET /snippet/1?x=y HTTP/1.1")
        let first_line_parts: Vec<&str> = request_lines[0].split(' ').collect();

        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_lines[0]);
            return Err(Exception::MalformedRequest);
        }

        let method_str = first_line_parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "POST" => HttpRequestMethod::Post,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 路径中可能包含未编码的空格，虽然不规范但通过 join 尝试恢复
        let target = if first_line_parts.len() == 3 {
            first_line_parts[1].to_string()
        } else {
            first_line_parts[1..first_line_parts.len() - 1].join(" ")
        };
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), parse_urlencoded(q)),
            None => (target, BTreeMap::new()),
        };

        // 3. 迭代各行解析 Headers
        let mut headers = HashMap::new();
        for line in request_lines.iter().skip(1) {
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.insert(name.trim().to_lowercase(), value.trim().to_string());
                }
                None if line.is_empty() => {}
                None => {
                    error!("[ID{}]无法解析的标头行：{}", id, line);
                    return Err(Exception::MalformedRequest);
                }
            }
        }

        let user_agent = headers.get("user-agent").cloned().unwrap_or_default();

        // 这里的逻辑比较简单，只要包含关键词即视为支持
        let mut accept_encoding = vec![];
        if let Some(encoding) = headers.get("accept-encoding") {
            if encoding.contains("gzip") {
                accept_encoding.push(HttpEncoding::Gzip);
            }
            if encoding.contains("deflate") {
                accept_encoding.push(HttpEncoding::Deflate);
            }
        }

        let cookies = match headers.get("cookie") {
            Some(raw) => parse_cookies(raw),
            None => HashMap::new(),
        };

        // 4. 请求体：以 Content-Length 为准，多余的字节丢弃
        let length = content_length_of(head).min(rest.len());
        let body = rest[..length].to_vec();

        Ok(Self {
            method,
            path,
            query,
            version,
            user_agent,
            accept_encoding,
            headers,
            cookies,
            body,
        })
    }
}

/// 拆分 `Cookie: a=1; b=2` 标头。同名 Cookie 保留第一个。
fn parse_cookies(raw: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in raw.split(';') {
        if let Some((name, value)) = pair.split_once('=') {
            let value = value.trim().trim_matches('"');
            cookies
                .entry(name.trim().to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    cookies
}

// --- Getter 访问器实现 ---

impl Request {
    /// 获取 HTTP 协议版本
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 获取请求路径（不含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取查询参数
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// 获取请求方法
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 获取用户代理字符串
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// 获取客户端支持的压缩算法列表
    pub fn accept_encoding(&self) -> &Vec<HttpEncoding> {
        &self.accept_encoding
    }

    /// 按名称（大小写不敏感）获取标头值
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// 按名称获取 Cookie 值
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|s| s.as_str())
    }

    /// 获取原始请求体
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// 将请求体按 url-encoded 表单解码；内容类型不匹配时返回空表单
    pub fn form(&self) -> BTreeMap<String, String> {
        let is_form = self
            .header("content-type")
            .map_or(false, |t| t.starts_with("application/x-www-form-urlencoded"));
        if !is_form {
            return BTreeMap::new();
        }
        parse_urlencoded(&String::from_utf8_lossy(&self.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 验证常规 GET 请求的解析，包括 Path 和 Headers
    #[test]
    fn test_parse_get_request() {
        let request_str = "GET / HTTP/1.1\r\nHost: localhost:4000\r\nUser-Agent: Test-Browser\r\nAccept-Encoding: gzip, deflate, br\r\n\r\n";
        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();

        assert_eq!(request.method(), HttpRequestMethod::Get);
        assert_eq!(request.path(), "/");
        assert_eq!(request.user_agent(), "Test-Browser");
        assert!(request.accept_encoding().contains(&HttpEncoding::Gzip));
        assert!(request.accept_encoding().contains(&HttpEncoding::Deflate));
        assert_eq!(request.header("HOST"), Some("localhost:4000"));
    }

    /// 验证 POST 请求体按 Content-Length 截取并可解码为表单
    #[test]
    fn test_parse_post_form() {
        let request_str = "POST /user/login HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 32\r\n\r\nemail=a%40b.com&password=pa+sswdEXTRA";
        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();

        assert_eq!(request.method(), HttpRequestMethod::Post);
        assert_eq!(request.body().len(), 32);
        let form = request.form();
        assert_eq!(form.get("email").unwrap(), "a@b.com");
        assert_eq!(form.get("password").unwrap(), "pa sswd");
    }

    /// 非表单类型的请求体不会被解码
    #[test]
    fn test_form_requires_content_type() {
        let request_str = "POST /x HTTP/1.1\r\nContent-Length: 3\r\n\r\na=b";
        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();
        assert!(request.form().is_empty());
    }

    #[test]
    fn test_parse_cookies() {
        let request_str =
            "GET / HTTP/1.1\r\nCookie: session=abc.def; theme=\"dark\"; session=second\r\n\r\n";
        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();

        assert_eq!(request.cookie("session"), Some("abc.def"));
        assert_eq!(request.cookie("theme"), Some("dark"));
        assert_eq!(request.cookie("missing"), None);
    }

    /// 确保带查询参数的路径被拆分
    #[test]
    fn test_path_with_query_string() {
        let request_str = "GET /snippet/view?id=123&name=a+b HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();

        assert_eq!(request.path(), "/snippet/view");
        assert_eq!(request.query().get("id").unwrap(), "123");
        assert_eq!(request.query().get("name").unwrap(), "a b");
    }

    /// 确保不支持的 HTTP 方法（如 DELETE）会返回错误
    #[test]
    fn test_unsupported_method() {
        let request_str = "DELETE /resource HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let result = Request::try_from(request_str.as_bytes(), 0);
        assert_eq!(result.unwrap_err(), Exception::UnSupportedRequestMethod);
    }

    /// 确保不支持的版本（如 HTTP/2.0）被正确拒绝
    #[test]
    fn test_unsupported_http_version() {
        let request_str = "GET / HTTP/2.0\r\nHost: localhost\r\n\r\n";
        let result = Request::try_from(request_str.as_bytes(), 0);
        assert_eq!(result.unwrap_err(), Exception::UnsupportedHttpVersion);
    }

    /// 验证 UTF-8 编码检查
    #[test]
    fn test_invalid_utf8() {
        let buffer = vec![0xFF, 0xFE, 0xFD];
        let result = Request::try_from(&buffer, 0);
        assert_eq!(result.unwrap_err(), Exception::RequestIsNotUtf8);
    }

    #[test]
    fn test_truncated_request_line() {
        let result = Request::try_from(b"GET\r\n\r\n", 0);
        assert_eq!(result.unwrap_err(), Exception::MalformedRequest);
    }

    /// 验证请求方法的小写兼容性处理
    #[test]
    fn test_lowercase_method() {
        let request_str = "get / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();
        assert_eq!(request.method(), HttpRequestMethod::Get);
    }

    #[test]
    fn test_content_length_of() {
        assert_eq!(content_length_of("POST / HTTP/1.1\r\ncontent-length: 42"), 42);
        assert_eq!(content_length_of("POST / HTTP/1.1\r\nContent-Length: x"), 0);
        assert_eq!(content_length_of("GET / HTTP/1.1\r\nHost: a"), 0);
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(14));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }
}
