// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接会话
//!
//! 一个 `Session` 独占一条连接的输入/输出缓冲流、一份请求数据与一份响应数据。
//! 它按顺序执行请求行 → 标头 → 请求体三个解析阶段，并在关闭时负责清理：
//! 刷新并关闭输出、关闭输入、删除溢出的临时文件、释放套接字。
//!
//! 连接上的每一次读写都受空闲时限约束（见 [`crate::idle`]）；
//! 请求行与标头两个阶段另有整体时限，防止客户端逐字节拖延请求头。

use std::{future::Future, io, net::SocketAddr, time::Duration};

use log::{debug, warn};
use tokio::io::{
    split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};

use crate::{
    body::{decode_body, BodyKind},
    chunked::ChunkedEncoder,
    config::Settings,
    exception::{Exception, FormatError},
    headers::{read_headers, read_line_opt},
    idle::{IdleLimit, IdleTimeout},
    param::{IO_BUFFER_SIZE, MAX_HEADER_BLOCK, MAX_REQUEST_LINE},
    request::Request,
    response::Response,
    util::HtmlBuilder,
};

/// 任何可以承载 HTTP 报文的双向字节流，TCP 连接与内存管道都满足。
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;
pub type Input = BufReader<ReadHalf<BoxedStream>>;
pub type Output = BufWriter<WriteHalf<BoxedStream>>;

pub struct Session {
    id: u128,
    peer: Option<SocketAddr>,
    input: Option<Input>,
    output: Option<Output>,
    request: Request,
    response: Response,
    settings: Settings,
    limit: IdleLimit,
    head_sent: bool,
}

impl Session {
    pub fn new<S>(stream: S, id: u128, peer: Option<SocketAddr>) -> Self
    where
        S: AsyncStream + 'static,
    {
        let limit = IdleLimit::default();
        let boxed: BoxedStream = Box::new(IdleTimeout::new(stream, limit.clone()));
        let (reader, writer) = split(boxed);
        Self {
            id,
            peer,
            input: Some(BufReader::with_capacity(IO_BUFFER_SIZE, reader)),
            output: Some(BufWriter::with_capacity(IO_BUFFER_SIZE, writer)),
            request: Request::default(),
            response: Response::new(),
            settings: Settings::default(),
            limit,
            head_sent: false,
        }
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// 本次请求生效的解析参数
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// 设置单次读写的空闲时限，同时也是请求头阶段的整体时限。`None` 表示不限时。
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.limit.set(timeout);
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.limit.get()
    }

    pub fn head_sent(&self) -> bool {
        self.head_sent
    }

    /// 原始输入流。请求体被推迟时，处理器从这里自行读取。
    pub fn input(&mut self) -> Option<&mut Input> {
        self.input.as_mut()
    }

    pub fn output(&mut self) -> Option<&mut Output> {
        self.output.as_mut()
    }

    /// 读取并解析请求行。连接在发送任何字节前就关闭时返回 `false`。
    pub async fn parse_first_line(&mut self) -> Result<bool, Exception> {
        let input = self.input.as_mut().ok_or_else(not_connected)?;
        let line = read_line_opt(input, MAX_REQUEST_LINE, FormatError::RequestLineTooLong).await?;
        let Some(line) = line else {
            debug!("[ID{}]连接在请求行之前关闭", self.id);
            return Ok(false);
        };
        self.request = Request::from_request_line(&line)?;
        debug!(
            "[ID{}]请求行解析完毕：{} {} {}",
            self.id,
            self.request.method(),
            self.request.path(),
            self.request.version()
        );
        Ok(true)
    }

    pub async fn parse_headers(&mut self) -> Result<(), Exception> {
        let input = self.input.as_mut().ok_or_else(not_connected)?;
        let headers = read_headers(input, MAX_HEADER_BLOCK).await?;
        debug!("[ID{}]标头解析完毕，共{}项", self.id, headers.len());
        self.request.set_headers(headers);
        Ok(())
    }

    /// 按处理器给出的 Settings 解码请求体。
    pub async fn parse_body(&mut self, settings: Settings) -> Result<BodyKind, Exception> {
        self.settings = settings;
        let input = self.input.as_mut().ok_or_else(not_connected)?;
        let kind = decode_body(input, &mut self.request, &self.settings, self.id).await?;
        debug!("[ID{}]请求体处理完毕：{:?}", self.id, kind);
        Ok(kind)
    }

    /// 发送状态行与标头，重复调用没有效果。
    pub async fn send_head(&mut self) -> Result<(), Exception> {
        if self.head_sent {
            return Ok(());
        }
        let output = self.output.as_mut().ok_or_else(not_connected)?;
        self.response.write_head(output).await?;
        self.head_sent = true;
        Ok(())
    }

    /// 以 Content-Length 方式发送完整的响应体。
    pub async fn send_body(&mut self, body: &[u8]) -> Result<(), Exception> {
        self.response.set_content_length(body.len() as u64);
        self.send_head().await?;
        let output = self.output.as_mut().ok_or_else(not_connected)?;
        output.write_all(body).await?;
        output.flush().await?;
        Ok(())
    }

    /// 切换到分块传输：发送标头并返回写在连接输出上的编码器。
    pub async fn chunked(&mut self) -> Result<ChunkedEncoder<&mut Output>, Exception> {
        self.response.remove_header("Content-Length");
        self.response.set_header("Transfer-Encoding", "chunked");
        self.send_head().await?;
        let output = self.output.as_mut().ok_or_else(not_connected)?;
        Ok(ChunkedEncoder::new(output))
    }

    /// 发送一个 HTML 错误页面。标头已经发出时无法再改状态码，返回 `false`。
    pub async fn send_error(&mut self, code: u16) -> Result<bool, Exception> {
        if self.head_sent {
            return Ok(false);
        }
        let page = HtmlBuilder::from_status_code(code, None).build();
        let mut response = Response::new();
        response
            .set_status(code)
            .set_date()
            .set_content_type("text/html;charset=utf-8")
            .set_header("Connection", "close");
        self.response = response;
        self.send_body(page.as_bytes()).await?;
        Ok(true)
    }

    /// 关闭连接。每一步都尽力而为，失败只记录日志，不影响后续步骤。
    pub async fn close(&mut self) {
        if let Some(output) = self.output.as_mut() {
            if let Err(e) = output.flush().await {
                warn!("[ID{}]刷新输出失败：{}", self.id, e);
            }
            if let Err(e) = output.shutdown().await {
                warn!("[ID{}]关闭输出失败：{}", self.id, e);
            }
        }
        drop(self.input.take());
        let removed = self.request.remove_parts();
        if removed > 0 {
            debug!("[ID{}]已清理{}个临时文件", self.id, removed);
        }
        drop(self.output.take());
        debug!("[ID{}]连接已关闭", self.id);
    }
}

fn not_connected() -> Exception {
    warn!("会话已关闭，无法继续读写");
    Exception::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "session is closed",
    ))
}

/// 在截止时间内完成整个 `fut`，超时报告为 `Exception::Timeout`。
pub async fn deadline<T, F>(limit: Option<Duration>, fut: F) -> Result<T, Exception>
where
    F: Future<Output = Result<T, Exception>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Exception::Timeout)?,
        None => fut.await,
    }
}
