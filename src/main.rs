// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # formwire 演示服务器
//!
//! 启动一个回显处理器：把解析得到的请求（路径、查询参数、标头、请求体分段）
//! 以分块传输的纯文本形式返回。
//! 同时提供后台管理控制台（stop / status / help）。

use formwire::{
    util::format_file_size, Config, Decision, Exception, Handler, HandlerRegistry, Server,
    Session, Settings,
};

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
    sync::oneshot,
};

use std::{
    fmt::Write,
    sync::{atomic::Ordering, Arc},
};

/// 对所有请求生效的回显处理器。
struct EchoHandler {
    settings: Settings,
}

#[async_trait]
impl Handler for EchoHandler {
    fn resolve_settings(&self, _version: &str, _path: &str, _method: &str) -> Decision {
        Decision::Proceed(self.settings)
    }

    async fn handle_request(&self, session: &mut Session) -> Result<(), Exception> {
        let request = session.request();
        let mut report = String::new();
        // 写入 String 不会失败
        let _ = writeln!(report, "{} {} {}", request.method(), request.path(), request.version());
        let _ = writeln!(report, "query: {}", request.query());
        for (name, value) in request.headers().iter() {
            let _ = writeln!(report, "header {}: {}", name, value);
        }
        let mut names: Vec<_> = request.parts().keys().collect();
        names.sort();
        for name in names {
            match request.part(name) {
                Some(post) => {
                    let _ = writeln!(
                        report,
                        "part {}: {}{}{}",
                        name,
                        format_file_size(post.size()),
                        post.filename().map(|f| format!(", file {}", f)).unwrap_or_default(),
                        if post.is_spilled() { ", on disk" } else { "" },
                    );
                }
                None => {
                    let _ = writeln!(report, "part {}: (no value)", name);
                }
            }
        }

        session
            .response_mut()
            .set_content_type("text/plain;charset=utf-8")
            .set_date();
        let mut encoder = session.chunked().await?;
        encoder.write(report.as_bytes()).await?;
        encoder.close().await?;
        Ok(())
    }
}

fn main() {
    // 1. 初始化日志系统
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
    }

    // 2. 加载配置，文件缺失时使用默认配置
    let config = match Config::from_toml("config/development.toml") {
        Ok(config) => {
            info!("配置文件已载入");
            config
        }
        Err(e) => {
            warn!("无法读取配置文件，使用默认配置：{}", e);
            Config::new()
        }
    };

    // 3. 根据配置构建多线程运行时
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads().max(1))
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建异步运行时：{}", e);
            return;
        }
    };

    runtime.block_on(run(config));
}

async fn run(config: Config) {
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Arc::new(EchoHandler {
        settings: config.settings(),
    }));

    let listener = match Server::bind(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", config.port(), e);
            return;
        }
    };
    let server = Server::new(registry, &config);

    // 后台管理控制台
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let active = server.active_connections();
    tokio::spawn(async move {
        let mut reader = BufReader::new(tokio::io::stdin());
        let mut input = String::new();
        let mut stop_tx = Some(stop_tx);
        loop {
            input.clear();
            match reader.read_line(&mut input).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            match input.trim() {
                "stop" => {
                    if let Some(tx) = stop_tx.take() {
                        let _ = tx.send(());
                    }
                    println!("停机指令已激活，服务器不再接受新连接...");
                    break;
                }
                "help" => {
                    println!("== formwire Help ==");
                    println!("stop   - 发出停机信号");
                    println!("status - 查看当前服务器运行状态");
                    println!("help   - 显示此帮助信息");
                    println!("===================");
                }
                "status" => {
                    println!("== formwire 状态 ==");
                    println!("当前活跃连接数: {}", active.load(Ordering::SeqCst));
                    println!("===================");
                }
                cmd => println!("无效的命令：{}", cmd),
            }
        }
    });

    let shutdown = async {
        if stop_rx.await.is_err() {
            // 标准输入已关闭，但没有收到停机指令
            std::future::pending::<()>().await;
        }
    };
    if let Err(e) = server.serve(listener, shutdown).await {
        error!("服务器异常退出：{}", e);
    }
}
