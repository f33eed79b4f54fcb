//! 处理器注册表。
//!
//! 列表整体保存在 `ArcSwap` 中，注册时复制一份新列表再原子替换。
//! 每个连接开始时取一次快照，之后注册的处理器对这个连接不可见。

use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;
use log::info;

use crate::handler::Handler;

pub type Handlers = Arc<Vec<Arc<dyn Handler>>>;

pub struct HandlerRegistry {
    handlers: ArcSwap<Vec<Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn register(&self, handler: Arc<dyn Handler>) {
        let previous = self.handlers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&handler));
            next
        });
        info!("已注册处理器，当前共{}个", previous.len() + 1);
    }

    /// 当前处理器列表的不可变快照。
    pub fn snapshot(&self) -> Handlers {
        self.handlers.load_full()
    }

    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}
