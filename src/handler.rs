//! 处理器契约。
//!
//! 连接的生命周期：
//! `prepare_request` → 请求行 → `resolve_settings` → `after_first_line` → 标头
//! → `after_headers` → 请求体 → `handle_request`。
//! 解析阶段的异常交给 `handle_decoder_exception`，处理阶段的异常交给 `handle_exception`。
//! 同一个处理器会被多个连接并发调用。

use async_trait::async_trait;
use log::{error, warn};

use crate::{config::Settings, exception::Exception, session::Session};

/// `resolve_settings` 的结果：按给定参数继续解析，或放弃这个请求。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed(Settings),
    Decline,
}

/// `after_headers` 的结果。`Stop` 跳过请求体解析与 `handle_request`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// 连接建立后、读取任何字节之前调用，可以在这里设置截止时间。
    async fn prepare_request(&self, _session: &mut Session) -> Result<(), Exception> {
        Ok(())
    }

    fn resolve_settings(&self, version: &str, path: &str, method: &str) -> Decision;

    async fn after_first_line(&self, _session: &mut Session) -> Result<(), Exception> {
        Ok(())
    }

    async fn after_headers(&self, _session: &mut Session) -> Result<Flow, Exception> {
        Ok(Flow::Continue)
    }

    async fn handle_request(&self, session: &mut Session) -> Result<(), Exception>;

    async fn handle_exception(&self, session: &mut Session, exception: Exception) {
        error!("[ID{}]处理请求时出错：{}", session.id(), exception);
        if let Err(e) = session.send_error(500).await {
            warn!("[ID{}]无法发送错误页面：{}", session.id(), e);
        }
    }

    async fn handle_decoder_exception(&self, session: &mut Session, exception: Exception) {
        warn!("[ID{}]请求解析失败：{}", session.id(), exception);
        if let Err(e) = session.send_error(exception.status_code()).await {
            warn!("[ID{}]无法发送错误页面：{}", session.id(), e);
        }
    }
}
