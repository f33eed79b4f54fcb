// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 监听器与连接分发
//!
//! 单个任务负责 accept，每个连接交给独立的 tokio 任务处理。
//! 并发连接数由信号量限制，连接池满时暂停 accept。
//!
//! 请求行与标头两个阶段有整体时限；之后的请求体与处理阶段只受读写空闲时限约束。
//! 处理器 panic 时连接照常关闭，活跃连接计数照常归还。

use std::{
    any::Any,
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use futures_util::FutureExt;
use log::{debug, error, info, warn};
use tokio::{net::TcpListener, sync::Semaphore};

use crate::{
    config::Config,
    exception::Exception,
    handler::{Decision, Flow, Handler},
    registry::{HandlerRegistry, Handlers},
    session::{deadline, AsyncStream, Session},
};

/// 活跃连接计数的守卫，创建时加一，销毁时减一，任务 panic 展开时也会归还。
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Server {
    registry: Arc<HandlerRegistry>,
    max_connections: usize,
    timeout: Option<Duration>,
    active: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(registry: Arc<HandlerRegistry>, config: &Config) -> Self {
        Self {
            registry,
            max_connections: config.max_connections().max(1),
            timeout: config.timeout(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 按配置绑定监听地址：`local = true` 时只监听回环地址。
    pub async fn bind(config: &Config) -> io::Result<TcpListener> {
        let address = match config.local() {
            true => Ipv4Addr::new(127, 0, 0, 1),
            false => Ipv4Addr::new(0, 0, 0, 0),
        };
        let socket = SocketAddrV4::new(address, config.port());
        let listener = TcpListener::bind(socket).await?;
        info!("已在{}上监听Socket连接", listener.local_addr()?);
        Ok(listener)
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// 当前活跃连接数的计数器。
    pub fn active_connections(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active)
    }

    /// 主循环：持续 accept，直到 `shutdown` 完成。已建立的连接会自行处理完毕。
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let pool = Arc::new(Semaphore::new(self.max_connections));
        tokio::pin!(shutdown);
        let mut id: u128 = 0;

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&pool).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("接受连接失败：{}", e);
                        continue;
                    }
                },
            };
            debug!("[ID{}]TCP连接已建立：{}", id, peer);

            let handlers = self.registry.snapshot();
            let active = Arc::clone(&self.active);
            let timeout = self.timeout;
            tokio::spawn(async move {
                let _active = ActiveGuard::new(active);
                let _permit = permit;
                serve_connection(stream, id, Some(peer), handlers, timeout).await;
            });
            id += 1;
        }

        info!("主循环接收到停机指令，正在退出...");
        Ok(())
    }
}

/// 处理一条连接的完整生命周期，结束后总会关闭会话。
pub async fn serve_connection<S>(
    stream: S,
    id: u128,
    peer: Option<SocketAddr>,
    handlers: Handlers,
    timeout: Option<Duration>,
) where
    S: AsyncStream + 'static,
{
    let start_time = Instant::now();
    let mut session = Session::new(stream, id, peer);
    session.set_timeout(timeout);
    let outcome = AssertUnwindSafe(run_lifecycle(&mut session, &handlers))
        .catch_unwind()
        .await;
    if let Err(panic) = outcome {
        error!("[ID{}]处理器发生panic：{}", id, panic_message(&*panic));
        if let Err(e) = session.send_error(500).await {
            warn!("[ID{}]无法发送错误页面：{}", id, e);
        }
    }
    session.close().await;
    debug!(
        "[ID{}]连接处理完毕，用时{}ms",
        id,
        start_time.elapsed().as_millis()
    );
}

async fn run_lifecycle(session: &mut Session, handlers: &[Arc<dyn Handler>]) {
    let id = session.id();
    let Some(first) = handlers.first() else {
        warn!("[ID{}]没有注册任何处理器，关闭连接", id);
        return;
    };

    for handler in handlers {
        if let Err(e) = handler.prepare_request(session).await {
            report_handling(handler.as_ref(), session, e).await;
            return;
        }
    }

    match deadline(session.timeout(), session.parse_first_line()).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            report_decoding(first.as_ref(), session, e).await;
            return;
        }
    }

    let request = session.request();
    let chosen = handlers.iter().find_map(|handler| {
        match handler.resolve_settings(request.version(), request.path(), request.method()) {
            Decision::Proceed(settings) => Some((handler, settings)),
            Decision::Decline => None,
        }
    });
    let Some((handler, settings)) = chosen else {
        info!(
            "[ID{}]请求被所有处理器拒绝：{} {}",
            id,
            request.method(),
            request.path()
        );
        return;
    };
    let handler = handler.as_ref();

    if let Err(e) = handler.after_first_line(session).await {
        report_handling(handler, session, e).await;
        return;
    }

    if let Err(e) = deadline(session.timeout(), session.parse_headers()).await {
        report_decoding(handler, session, e).await;
        return;
    }

    match handler.after_headers(session).await {
        Ok(Flow::Continue) => {}
        Ok(Flow::Stop) => {
            info!("[ID{}]处理器在标头阶段结束了请求", id);
            return;
        }
        Err(e) => {
            report_handling(handler, session, e).await;
            return;
        }
    }

    if let Err(e) = session.parse_body(settings).await {
        report_decoding(handler, session, e).await;
        return;
    }

    if let Err(e) = handler.handle_request(session).await {
        report_handling(handler, session, e).await;
        return;
    }

    let request = session.request();
    let response = session.response();
    info!(
        "[ID{}] {}, {}, {}, {}, {}, {}",
        id,
        request.version(),
        request.path(),
        request.method(),
        response.status_code(),
        response.information(),
        request.user_agent(),
    );
}

async fn report_decoding(handler: &dyn Handler, session: &mut Session, exception: Exception) {
    handler.handle_decoder_exception(session, exception).await;
}

async fn report_handling(handler: &dyn Handler, session: &mut Session, exception: Exception) {
    handler.handle_exception(session, exception).await;
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    match panic.downcast_ref::<&str>() {
        Some(message) => *message,
        None => panic
            .downcast_ref::<String>()
            .map(String::as_str)
            .unwrap_or("unknown panic"),
    }
}
