//! 事件路由表
//!
//! 房间应用在构造时注册事件处理函数，再与配置中的准入规则合并成最终路由表。
//! 规则与处理函数不匹配属于配置错误，在启动阶段暴露。

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use domain::{Frame, EVENT_CLOSE, EVENT_PING};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::admission::AdmissionCap;
use crate::error::ApplicationError;
use crate::request::Request;

pub type HandlerResult = Result<Value, ApplicationError>;

pub type Handler = Arc<dyn Fn(Arc<Request>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Clone)]
pub struct Route {
    pub cap: AdmissionCap,
    pub handler: Handler,
}

/// 事件名 -> 路由
#[derive(Clone, Default)]
pub struct EventTable {
    routes: HashMap<String, Route>,
}

impl EventTable {
    pub fn builder() -> EventTableBuilder {
        EventTableBuilder::default()
    }

    pub fn route(&self, event: &str) -> Option<&Route> {
        self.routes.get(event)
    }

    pub fn cap(&self, event: &str) -> Option<AdmissionCap> {
        self.routes.get(event).map(|route| route.cap)
    }

    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

#[derive(Default)]
pub struct EventTableBuilder {
    handlers: HashMap<String, Handler>,
}

impl EventTableBuilder {
    pub fn on<F, Fut>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<Request>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |request| handler(request).boxed());
        self.handlers.insert(event.into(), handler);
        self
    }

    /// 按准入规则生成路由表。
    ///
    /// 规则中出现但没有处理函数的事件视为配置错误；
    /// 注册了处理函数但规则中未列出的事件不会被路由（即被禁止）。
    pub fn build(self, rules: &BTreeMap<String, u32>) -> Result<EventTable, ApplicationError> {
        let mut handlers = self.handlers;
        let mut routes = HashMap::with_capacity(rules.len());

        for (event, cap) in rules {
            if event == EVENT_PING || event == EVENT_CLOSE {
                return Err(ApplicationError::config(format!(
                    "event `{event}` is reserved by the protocol"
                )));
            }
            let handler = handlers.remove(event).ok_or_else(|| {
                ApplicationError::config(format!("no handler registered for event `{event}`"))
            })?;
            routes.insert(
                event.clone(),
                Route {
                    cap: AdmissionCap::from(*cap),
                    handler,
                },
            );
        }

        for event in handlers.keys() {
            tracing::debug!(event = %event, "handler has no admission rule, event stays forbidden");
        }

        Ok(EventTable { routes })
    }
}

/// 一个挂载路径上的应用：路由表 + 每次安装传输时自动提交的预请求
#[derive(Clone, Default)]
pub struct Endpoint {
    pub table: EventTable,
    pub pre_requests: Vec<Frame>,
}

impl Endpoint {
    pub fn new(table: EventTable) -> Self {
        Self {
            table,
            pre_requests: Vec::new(),
        }
    }

    pub fn with_pre_request(mut self, frame: Frame) -> Self {
        self.pre_requests.push(frame);
        self
    }
}
