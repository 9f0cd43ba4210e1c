use crate::{
    param::*,
    request::Request,
    util::{format_http_date, HtmlBuilder},
};

use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error};

use std::io::{self, Write};

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: u64,
    date: DateTime<Utc>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    location: Option<String>,
    set_cookies: Vec<String>,
    headers: Vec<(String, String)>,
    content: Option<Bytes>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_length: 0,
            date: Utc::now(),
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            allow: None,
            location: None,
            set_cookies: Vec::new(),
            headers: Vec::new(),
            content: None,
        }
    }

    /// 以渲染完成的 HTML 字节构造响应
    pub fn from_html(code: u16, html: Bytes) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.content_length = html.len() as u64;
        response.content_type = Some("text/html;charset=utf-8".to_string());
        response.content = Some(html);
        response
    }

    /// 纯文本响应，例如健康检查
    pub fn from_text(code: u16, text: &str) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        let bytes = Bytes::copy_from_slice(text.as_bytes());
        response.content_length = bytes.len() as u64;
        response.content_type = Some("text/plain;charset=utf-8".to_string());
        response.content = Some(bytes);
        response
    }

    /// 303 See Other 重定向，POST 之后一律用它跳转
    pub fn redirect(location: &str) -> Self {
        let mut response = Self::new();
        response.set_code(303);
        response.location = Some(location.to_string());
        response
    }

    /// 通用的状态页，只展示状态码与原因短语，不泄露内部细节
    pub fn from_status_code(code: u16) -> Self {
        let note = match code {
            404 => Some(r"<h2>噢！</h2><p>你指定的网页无法找到。</p>"),
            500 => Some(r"<h2>噢！</h2><p>服务器出现了一个内部错误。</p>"),
            _ => None,
        };
        let content = HtmlBuilder::from_status_code(code, note).build();
        Self::from_html(code, Bytes::from(content))
    }

    pub fn response_400() -> Self {
        Self::from_status_code(400)
    }

    pub fn response_404() -> Self {
        Self::from_status_code(404)
    }

    pub fn response_405(allow: Vec<HttpRequestMethod>) -> Self {
        let mut response = Self::from_status_code(405);
        response.allow = Some(allow);
        response
    }

    pub fn response_500() -> Self {
        Self::from_status_code(500)
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown Status".to_string()
            }
        };
        self
    }

    pub fn add_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn add_cookie(&mut self, cookie: String) -> &mut Self {
        self.set_cookies.push(cookie);
        self
    }

    /// 依据请求的 `Accept-Encoding` 压缩响应体，HEAD 请求则丢弃响应体但保留长度。
    /// 状态行使用与请求相同的协议版本。
    pub fn finalize_for(&mut self, request: &Request, id: u128) -> &mut Self {
        self.version = *request.version();
        if request.method() == HttpRequestMethod::Head {
            self.content = None;
            return self;
        }
        let encoding = decide_encoding(request.accept_encoding());
        let content = match (&self.content, encoding) {
            (Some(c), Some(_)) if !c.is_empty() => c.clone(),
            _ => return self,
        };
        match compress(content.to_vec(), encoding) {
            Ok(compressed) => {
                debug!(
                    "[ID{}]压缩完成，原始: {} bytes -> 压缩后: {} bytes",
                    id,
                    content.len(),
                    compressed.len()
                );
                self.content_encoding = encoding;
                self.headers
                    .push(("Vary".to_string(), "Accept-Encoding".to_string()));
                self.content_length = compressed.len() as u64;
                self.content = Some(Bytes::from(compressed));
            }
            Err(e) => {
                error!("[ID{}]压缩响应失败: {}，返回未压缩内容", id, e);
            }
        }
        self
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_0 => "HTTP/1.0",
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let mut header = [
            version,
            " ",
            self.status_code.to_string().as_str(),
            " ",
            self.information.as_str(),
            CRLF,
        ]
        .concat();
        if let Some(t) = &self.content_type {
            header.push_str(&["Content-Type: ", t.as_str(), CRLF].concat());
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&["Content-Encoding: ", e.to_string().as_str(), CRLF].concat());
        }
        header.push_str(&["Content-Length: ", self.content_length.to_string().as_str(), CRLF].concat());
        header.push_str(&["Date: ", format_http_date(&self.date).as_str(), CRLF].concat());
        header.push_str(&["Server: ", self.server_name.as_str(), CRLF].concat());
        if let Some(location) = &self.location {
            header.push_str(&["Location: ", location.as_str(), CRLF].concat());
        }
        if let Some(a) = &self.allow {
            let allow_str = a
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            header.push_str(&["Allow: ", allow_str.as_str(), CRLF].concat());
        }
        for cookie in &self.set_cookies {
            header.push_str(&["Set-Cookie: ", cookie.as_str(), CRLF].concat());
        }
        for (name, value) in &self.headers {
            header.push_str(&[name.as_str(), ": ", value.as_str(), CRLF].concat());
        }
        header.push_str(CRLF);
        let body: &[u8] = match &self.content {
            Some(c) => c.as_ref(),
            None => &[],
        };
        [header.as_bytes(), body].concat()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn set_cookies(&self) -> &[String] {
        &self.set_cookies
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn get_content_length(&self) -> u64 {
        self.content_length
    }
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        None => Ok(data),
    }
}

fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    if accept_encoding.contains(&HttpEncoding::Gzip) {
        Some(HttpEncoding::Gzip)
    } else if accept_encoding.contains(&HttpEncoding::Deflate) {
        Some(HttpEncoding::Deflate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_none() {
        let data = b"hello".to_vec();
        assert_eq!(compress(data.clone(), None).unwrap(), data);
    }

    #[test]
    fn test_compress_large_data() {
        let data = vec![b'A'; 10000];
        let result_gzip = compress(data.clone(), Some(HttpEncoding::Gzip)).unwrap();
        let result_deflate = compress(data.clone(), Some(HttpEncoding::Deflate)).unwrap();

        assert!(result_gzip.len() < data.len());
        assert!(result_deflate.len() < data.len());
    }

    #[test]
    fn test_decide_encoding() {
        assert_eq!(
            decide_encoding(&[HttpEncoding::Deflate, HttpEncoding::Gzip]),
            Some(HttpEncoding::Gzip)
        );
        assert_eq!(
            decide_encoding(&[HttpEncoding::Deflate]),
            Some(HttpEncoding::Deflate)
        );
        assert_eq!(decide_encoding(&[]), None);
    }

    #[test]
    fn test_response_as_bytes_basic() {
        let response = Response::new();
        let bytes = response.as_bytes();
        let response_str = String::from_utf8_lossy(&bytes);

        assert!(response_str.starts_with("HTTP/1.1 200 OK"));
        assert!(response_str.contains("Content-Length: 0"));
        assert!(response_str.contains("Server: snippetbox"));
        assert!(response_str.contains("Date: "));
        assert!(response_str.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_response_html_body() {
        let response = Response::from_html(200, Bytes::from("<p>Hello</p>"));
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();

        assert!(response_str.contains("Content-Type: text/html;charset=utf-8"));
        assert!(response_str.contains("Content-Length: 12"));
        assert!(response_str.ends_with("<p>Hello</p>"));
    }

    #[test]
    fn test_redirect_has_location() {
        let response = Response::redirect("/snippet/1");
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();

        assert_eq!(response.status_code(), 303);
        assert!(response_str.starts_with("HTTP/1.1 303 See Other"));
        assert!(response_str.contains("Location: /snippet/1\r\n"));
    }

    #[test]
    fn test_cookies_and_headers_written() {
        let mut response = Response::new();
        response
            .add_cookie("session=abc; Path=/".to_string())
            .add_header("X-Frame-Options", "deny");
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();

        assert!(response_str.contains("Set-Cookie: session=abc; Path=/\r\n"));
        assert!(response_str.contains("X-Frame-Options: deny\r\n"));
        assert_eq!(response.header("x-frame-options"), Some("deny"));
    }

    #[test]
    fn test_405_lists_allowed_methods() {
        let response = Response::response_405(vec![HttpRequestMethod::Get, HttpRequestMethod::Head]);
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();
        assert!(response_str.contains("Allow: GET, HEAD\r\n"));
    }

    #[test]
    fn test_response_status_code_various() {
        for (code, expected_info) in [
            (200, "OK"),
            (303, "See Other"),
            (400, "Bad Request"),
            (404, "Not Found"),
            (413, "Content Too Large"),
            (500, "Internal Server Error"),
        ] {
            let response = Response::from_status_code(code);
            assert_eq!(response.status_code(), code);
            assert_eq!(response.information(), expected_info);
        }
    }

    #[test]
    fn test_finalize_gzip_and_head() {
        let request = Request::try_from(
            b"GET / HTTP/1.1\r\nAccept-Encoding: gzip\r\n\r\n",
            0,
        )
        .unwrap();
        let mut response = Response::from_html(200, Bytes::from(vec![b'x'; 2048]));
        response.finalize_for(&request, 0);
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();
        assert!(response_str.contains("Content-Encoding: gzip"));
        assert!(response_str.contains("Vary: Accept-Encoding\r\n"));
        assert!(response.get_content_length() < 2048);

        let head = Request::try_from(b"HEAD / HTTP/1.1\r\n\r\n", 0).unwrap();
        let mut response = Response::from_html(200, Bytes::from("<p>hi</p>"));
        response.finalize_for(&head, 0);
        assert!(response.content().is_none());
        assert_eq!(response.get_content_length(), 9);
    }

    #[test]
    fn test_date_header_is_imf_fixdate() {
        let mut response = Response::new();
        response.date = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();
        assert!(response_str.contains("Date: Wed, 01 May 2024 20:00:00 GMT\r\n"));
    }

    #[test]
    fn test_status_line_follows_request_version() {
        let request = Request::try_from(b"GET / HTTP/1.0\r\n\r\n", 0).unwrap();
        let mut response = Response::from_html(200, Bytes::from("<p>hi</p>"));
        response.finalize_for(&request, 0);
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();
        assert!(response_str.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(!response_str.contains("Vary:"));
    }
}
