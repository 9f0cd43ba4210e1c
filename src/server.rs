// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 网络层
//!
//! 基于 Tokio 的 accept 循环：每个 TCP 连接由独立的任务处理，
//! 读取一个完整的请求（报文头加上 `Content-Length` 指定的报文体），
//! 交给 `Application` 处理后写回响应并关闭连接。

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::{
    app::Application,
    exception::Exception,
    request::{content_length_of, find_head_end, Request},
    response::Response,
};

const READ_CHUNK: usize = 4096;

/// 持续接收新连接，直到所在的运行时关闭
pub async fn run(listener: TcpListener, app: Arc<Application>, max_request_bytes: usize) {
    match listener.local_addr() {
        Ok(addr) => info!("服务端开始在{}上监听Socket连接", addr),
        Err(e) => warn!("无法获取监听地址：{}", e),
    }
    let mut id: u128 = 0;
    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("接受TCP连接失败：{}", e);
                continue;
            }
        };
        debug!("[ID{}]TCP连接已建立：{}", id, addr);

        let app = Arc::clone(&app);
        tokio::spawn(async move {
            handle_connection(&mut stream, id, &app, max_request_bytes).await;
        });
        id += 1;
    }
}

/// 读取一个完整的请求。请求体超过上限时返回 `PayloadTooLarge`，
/// 对端在发送任何数据前关闭连接时返回 `Ok(None)`。
async fn read_request(
    stream: &mut TcpStream,
    id: u128,
    max_request_bytes: usize,
) -> Result<Option<Vec<u8>>, Exception> {
    let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    let head_end = loop {
        if let Some(end) = find_head_end(&buffer) {
            break end;
        }
        if buffer.len() > max_request_bytes {
            return Err(Exception::PayloadTooLarge);
        }
        match stream.read(&mut chunk).await {
            Ok(0) if buffer.is_empty() => return Ok(None),
            Ok(0) => return Err(Exception::MalformedRequest),
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) => {
                error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
                return Ok(None);
            }
        }
    };

    let head = std::str::from_utf8(&buffer[..head_end]).map_err(|_| Exception::RequestIsNotUtf8)?;
    let content_length = content_length_of(head);
    if content_length > max_request_bytes {
        warn!("[ID{}]请求体长度{}超过上限{}", id, content_length, max_request_bytes);
        return Err(Exception::PayloadTooLarge);
    }

    let total = head_end + 4 + content_length;
    while buffer.len() < total {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) => {
                error!("[ID{}]读取请求体时遇到错误: {}", id, e);
                return Ok(None);
            }
        }
    }
    Ok(Some(buffer))
}

async fn handle_connection(
    stream: &mut TcpStream,
    id: u128,
    app: &Application,
    max_request_bytes: usize,
) {
    let buffer = match read_request(stream, id, max_request_bytes).await {
        Ok(Some(buffer)) => buffer,
        Ok(None) => return,
        Err(e) => {
            warn!("[ID{}]{}", id, e);
            write_response(stream, id, &Response::from_status_code(e.status_code())).await;
            return;
        }
    };
    debug!("[ID{}]HTTP请求接收完毕，共{}字节", id, buffer.len());

    let request = match Request::try_from(&buffer, id) {
        Ok(request) => request,
        Err(e) => {
            warn!("[ID{}]解析HTTP请求失败: {}", id, e);
            write_response(stream, id, &Response::from_status_code(e.status_code())).await;
            return;
        }
    };

    let mut response = app.serve(&request, id);
    response.finalize_for(&request, id);
    write_response(stream, id, &response).await;
}

async fn write_response(stream: &mut TcpStream, id: u128, response: &Response) {
    let bytes = response.as_bytes();
    debug!("[ID{}]发送响应，长度: {}", id, bytes.len());
    // 此时响应已完整生成，写失败只记录日志，不重试
    if let Err(e) = stream.write_all(&bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    if let Err(e) = stream.flush().await {
        error!("[ID{}]刷新TCPStream失败: {}", id, e);
    }
}
