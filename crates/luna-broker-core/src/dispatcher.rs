//! Request dispatcher: parse, gather facts, validate, execute, respond.
//!
//! ```text
//! Received → Parsed → Validated{accepted|rejected} → [accepted] Executed{succeeded|failed} → Responded
//! ```
//!
//! Every path ends in exactly one `BrokerResponse`. Nothing is retried.

use std::path::Path;
use std::sync::Arc;

use luna_platform::Platform;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{BrokerError, Result};
use crate::executor::{OperationExecutor, ResolvedTargets};
use crate::models::{BrokerRequest, BrokerResponse, Operation};
use crate::replay::ReplayGuard;
use crate::security::{
    CallerIdentity, ExecutableResolution, SecurityValidator, ValidationContext, ValidationResult,
    resolve_file_target,
};

pub struct RequestDispatcher {
    validator: Arc<SecurityValidator>,
    executor: Arc<OperationExecutor>,
    replay: Option<ReplayGuard>,
}

impl RequestDispatcher {
    pub fn new(validator: Arc<SecurityValidator>, executor: Arc<OperationExecutor>) -> Self {
        Self {
            validator,
            executor,
            replay: None,
        }
    }

    /// Reject request ids already seen inside the guard's window.
    pub fn with_replay_guard(mut self, guard: ReplayGuard) -> Self {
        self.replay = Some(guard);
        self
    }

    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    /// Handle one wire line. Malformed JSON becomes a protocol failure.
    pub async fn handle_line(&self, line: &str, caller: &CallerIdentity) -> BrokerResponse {
        match serde_json::from_str::<BrokerRequest>(line) {
            Ok(request) => self.dispatch(request, caller).await,
            Err(err) => {
                warn!(caller = %caller, error = %err, "Malformed request line");
                BrokerResponse::from(BrokerError::Protocol(format!("Invalid request: {err}")))
            }
        }
    }

    pub async fn dispatch(&self, request: BrokerRequest, caller: &CallerIdentity) -> BrokerResponse {
        let request_id = request.request_id.clone();
        let operation = request.operation.clone();

        match self.process(request, caller).await {
            Ok(data) => {
                info!(request_id = %request_id, operation = %operation, caller = %caller, "Request succeeded");
                BrokerResponse::success(data)
            }
            Err(err) => {
                match &err {
                    BrokerError::Validation(reason) => {
                        warn!(request_id = %request_id, operation = %operation, caller = %caller, reason = %reason, "Request rejected");
                    }
                    BrokerError::Internal(detail) => {
                        error!(request_id = %request_id, operation = %operation, caller = %caller, error = %detail, "Request failed internally");
                    }
                    other => {
                        warn!(request_id = %request_id, operation = %operation, caller = %caller, kind = other.kind(), error = %other, "Request failed");
                    }
                }
                BrokerResponse::from(err)
            }
        }
    }

    /// Run every check `dispatch` would, without executing or recording the id.
    pub async fn evaluate(&self, request: &BrokerRequest, caller: &CallerIdentity) -> ValidationResult {
        let kind = match self.validator.check_envelope(request) {
            Ok(kind) => kind,
            Err(rejection) => return rejection,
        };
        let operation = match Operation::from_parts(kind, request.parameters.as_ref()) {
            Ok(operation) => operation,
            Err(err) => return ValidationResult::rejected(err.to_string()),
        };
        match self.gather_facts(&operation, caller).await {
            Ok(ctx) => self.validator.validate_operation(&operation, &ctx),
            Err(err) => ValidationResult::rejected(err.to_string()),
        }
    }

    async fn process(&self, request: BrokerRequest, caller: &CallerIdentity) -> Result<Value> {
        // The catalog check comes before any parameter parsing.
        let kind = self.validator.check_envelope(&request).map_err(|rejection| {
            BrokerError::Validation(rejection.reason.unwrap_or_default())
        })?;
        let operation = Operation::from_parts(kind, request.parameters.as_ref())?;
        debug!(request_id = %request.request_id, operation = %kind, parameters = ?request.parameters, "Request parsed");

        if let Some(guard) = &self.replay {
            guard.check(&request.request_id)?;
        }

        let ctx = self.gather_facts(&operation, caller).await?;
        self.validator
            .validate_operation(&operation, &ctx)
            .into_result()?;

        self.executor
            .execute_resolved(operation, ResolvedTargets::from(&ctx))
            .await
    }

    /// Resolve the read-only facts the validator needs, off the async threads.
    async fn gather_facts(
        &self,
        operation: &Operation,
        caller: &CallerIdentity,
    ) -> Result<ValidationContext> {
        let ctx = ValidationContext::new(caller.clone());
        let needs_os = matches!(
            operation,
            Operation::Click(_)
                | Operation::ProcessStart(_)
                | Operation::ProcessTerminate(_)
                | Operation::FileRead(_)
                | Operation::FileWrite(_)
        );
        if !needs_os {
            return Ok(ctx);
        }

        let platform = self.executor.platform().clone();
        let operation = operation.clone();
        let timeout = self.executor.options().request_timeout;
        let task = tokio::task::spawn_blocking(move || collect_facts(&platform, &operation, ctx));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(ctx)) => Ok(ctx),
            Ok(Err(join_err)) => Err(BrokerError::Internal(format!(
                "fact gathering failed: {join_err}"
            ))),
            Err(_) => Err(BrokerError::Timeout(timeout.as_secs_f64().ceil() as u64)),
        }
    }
}

fn collect_facts(
    platform: &Platform,
    operation: &Operation,
    ctx: ValidationContext,
) -> ValidationContext {
    match operation {
        Operation::Click(_) => match platform.screen.primary_display() {
            Ok(display) => ctx.with_display(display),
            Err(err) => {
                warn!(error = %err, "Primary display size unavailable");
                ctx
            }
        },
        Operation::ProcessStart(params) => {
            ctx.with_executable(ExecutableResolution::resolve(&params.file_name))
        }
        Operation::ProcessTerminate(params) => match platform.processes.lookup(params.process_id) {
            Ok(Some(entry)) => ctx.with_target_process(entry),
            Ok(None) => ctx,
            Err(err) => {
                warn!(pid = params.process_id, error = %err, "Process lookup failed");
                ctx
            }
        },
        Operation::FileRead(params) => with_file_target(ctx, &params.file_path),
        Operation::FileWrite(params) => with_file_target(ctx, &params.file_path),
        _ => ctx,
    }
}

fn with_file_target(ctx: ValidationContext, file_path: &str) -> ValidationContext {
    if !Path::new(file_path).is_absolute() {
        return ctx;
    }
    match resolve_file_target(file_path) {
        Some(target) => ctx.with_file_target(target),
        None => ctx,
    }
}
