//! Shared operand fixture for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use operand_core::{
    ActionResult, ChangeEvent, DynOperand, ObjectReference, Operand, OperandError, OwnerReference,
    ReconcileContext, RequeueStrategy,
};

/// Ordered log of every call made to any operand sharing it.
#[derive(Debug, Default, Clone)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().expect("call log lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("call log lock").clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }

    /// Position of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn clear(&self) {
        self.0.lock().expect("call log lock").clear();
    }
}

/// Configurable operand that logs `ensure:<name>`, `delete:<name>`,
/// `ready_check:<name>` and `post_ready:<name>`.
pub struct FakeOperand {
    name: String,
    requires: Vec<String>,
    strategy: RequeueStrategy,
    fail: bool,
    change: bool,
    ready: bool,
    ready_error: bool,
    delay: Option<Duration>,
    log: CallLog,
}

impl FakeOperand {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            requires: Vec::new(),
            strategy: RequeueStrategy::OnError,
            fail: false,
            change: false,
            ready: true,
            ready_error: false,
            delay: None,
            log: log.clone(),
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.requires = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn always(mut self) -> Self {
        self.strategy = RequeueStrategy::Always;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn changing(mut self) -> Self {
        self.change = true;
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn readiness_error(mut self) -> Self {
        self.ready_error = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn shared(self) -> DynOperand {
        Arc::new(self)
    }

    async fn act(&self, verb: &str) -> ActionResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.record(format!("{verb}:{}", self.name));
        if self.fail {
            return Err(OperandError::execution(format!("{verb} {} failed", self.name)));
        }
        Ok(self
            .change
            .then(|| ChangeEvent::normal("Changed", format!("{verb} {}", self.name))))
    }
}

#[async_trait]
impl Operand for FakeOperand {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> &[String] {
        &self.requires
    }

    fn requeue_strategy(&self) -> RequeueStrategy {
        self.strategy
    }

    async fn ensure(
        &self,
        _ctx: &ReconcileContext,
        _target: &ObjectReference,
        _owner: &OwnerReference,
    ) -> ActionResult {
        self.act("ensure").await
    }

    async fn delete(&self, _ctx: &ReconcileContext, _target: &ObjectReference) -> ActionResult {
        self.act("delete").await
    }

    async fn ready_check(
        &self,
        _ctx: &ReconcileContext,
        _target: &ObjectReference,
    ) -> Result<bool, OperandError> {
        self.log.record(format!("ready_check:{}", self.name));
        if self.ready_error {
            return Err(OperandError::ready_check(format!(
                "{} did not report status",
                self.name
            )));
        }
        Ok(self.ready)
    }

    async fn post_ready(
        &self,
        _ctx: &ReconcileContext,
        _target: &ObjectReference,
    ) -> Result<(), OperandError> {
        self.log.record(format!("post_ready:{}", self.name));
        Ok(())
    }
}

pub fn target() -> ObjectReference {
    ObjectReference::new("apps.example.com/v1", "Cluster", "main")
        .in_namespace("default")
        .with_uid("5d1c-77aa")
}

pub fn owner() -> OwnerReference {
    target()
        .controller_reference()
        .expect("target has a uid")
}
