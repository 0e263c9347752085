use crate::{
    error::{FetchError, HandlerError},
    task::{InvocationTask, TaskCompletion},
};
use async_trait::async_trait;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// What a handler sees of one invocation.
pub struct InvocationContext {
    task: InvocationTask,
    client: reqwest::Client,
}

impl InvocationContext {
    pub fn new(task: InvocationTask, client: reqwest::Client) -> Self {
        Self { task, client }
    }

    pub fn task(&self) -> &InvocationTask {
        &self.task
    }

    /// Opens a streamed read of the main object's file `key`.
    pub async fn load_main_file(&self, key: &str) -> Result<reqwest::Response, FetchError> {
        let url = self
            .task
            .main_get_keys
            .get(key)
            .ok_or_else(|| FetchError::MissingKey(key.to_string()))?;

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.clone(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: &InvocationContext) -> Result<Value, HandlerError>;
}

/// Dispatches tasks to handlers by function key. A handler registered without
/// a key catches every task no keyed handler claims.
#[derive(Clone, Default)]
pub struct TaskRouter {
    handlers: HashMap<String, Arc<dyn Handler>>,
    fallback: Option<Arc<dyn Handler>>,
    client: reqwest::Client,
}

impl TaskRouter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: None,
            client,
        }
    }

    pub fn register(&mut self, func_key: Option<&str>, handler: Arc<dyn Handler>) {
        match func_key {
            Some(key) => {
                self.handlers.insert(key.to_string(), handler);
            }
            None => self.fallback = Some(handler),
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len() + usize::from(self.fallback.is_some())
    }

    fn route(&self, task: &InvocationTask) -> Option<Arc<dyn Handler>> {
        task.func_key
            .as_ref()
            .and_then(|key| self.handlers.get(key))
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// Runs the matching handler. `None` when no handler matches.
    pub async fn handle_task(&self, task: InvocationTask) -> Option<TaskCompletion> {
        let handler = self.route(&task)?;
        let ctx = InvocationContext::new(task, self.client.clone());

        let completion = match handler.handle(&ctx).await {
            Ok(body) => TaskCompletion::success(ctx.task().id.clone(), body),
            Err(e) => {
                tracing::error!(task_id = %ctx.task().id, "Invocation failed: {}", error_chain(&e));
                TaskCompletion::failure(ctx.task().id.clone(), error_chain(&e))
            }
        };
        Some(completion)
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}
