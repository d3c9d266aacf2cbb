//! Reply port to the page

use web_sys::DedicatedWorkerGlobalScope;
use webdash_hal::{HalError, WorkerPort};
use webdash_ipc::js::{describe_error, encode_reply};
use webdash_ipc::WorkerReply;

/// Posts replies through the worker's global scope.
#[derive(Clone)]
pub struct WorkerScopePort {
    scope: DedicatedWorkerGlobalScope,
}

impl WorkerScopePort {
    pub fn new(scope: DedicatedWorkerGlobalScope) -> Self {
        Self { scope }
    }
}

impl WorkerPort for WorkerScopePort {
    fn post(&self, reply: &WorkerReply) -> Result<(), HalError> {
        let msg = encode_reply(reply).map_err(|e| HalError::PostFailed(describe_error(&e)))?;
        self.scope
            .post_message(&msg)
            .map_err(|e| HalError::PostFailed(describe_error(&e)))
    }
}
