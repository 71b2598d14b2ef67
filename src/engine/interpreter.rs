// ABOUTME: Action interpreter executing action-tree nodes against an execution context
// ABOUTME: Dispatches plugin calls, conditions, loops, vision actions, waits and variable updates

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::context::ExecutionContext;
use super::error::EngineError;
use super::result::ActionResult;
use super::variables::{self, VariableContext};
use crate::capability::{CapabilityRegistry, MatchResult, OcrEngine, TemplateMatcher};
use crate::script::action::{
    seconds, ActionNode, CompareOperator, ConditionAction, ConditionCheck, LoopAction, OcrAction,
    PluginCallAction, SetVariableAction, TemplateMatchAction,
};

pub struct Interpreter {
    registry: Arc<CapabilityRegistry>,
    matcher: Arc<dyn TemplateMatcher>,
    ocr: Arc<dyn OcrEngine>,
}

impl Interpreter {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        matcher: Arc<dyn TemplateMatcher>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Self {
        Self {
            registry,
            matcher,
            ocr,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Execute one node. Leaf successes and completed loop steps refresh the
    /// context's liveness clock.
    pub fn execute<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        node: &'a ActionNode,
    ) -> BoxFuture<'a, ActionResult> {
        async move {
            if ctx.is_cancelled() {
                return ActionResult::cancelled();
            }

            match node.description() {
                Some(description) => {
                    debug!("[{}] {}: {}", ctx.execution_id, node.kind(), description)
                }
                None => debug!("[{}] {}", ctx.execution_id, node.kind()),
            }

            let result = match node {
                ActionNode::PluginCall(call) => self.plugin_call(ctx, call).await,
                ActionNode::Condition(condition) => self.condition(ctx, condition).await,
                ActionNode::Loop(l) => self.run_loop(ctx, l).await,
                ActionNode::TemplateMatch(action) => self.template_match(ctx, action).await,
                ActionNode::Ocr(action) => self.ocr(ctx, action).await,
                ActionNode::Wait(wait) => self.wait(ctx, seconds(wait.duration)).await,
                ActionNode::SetVariable(set) => set_variable(ctx, set),
                ActionNode::Restart(_) => {
                    info!("[{}] restart requested, cancelling execution", ctx.execution_id);
                    ctx.cancel();
                    ActionResult::ok(json!({ "restart": true }))
                }
                ActionNode::Unsupported { kind } => {
                    ActionResult::from_error(&EngineError::UnsupportedAction { kind: kind.clone() })
                }
            };

            if result.success && node.is_leaf() {
                ctx.touch();
            }
            result
        }
        .boxed()
    }

    /// Execute nodes in order, stopping at the first failure. Cancellation
    /// is checked before every node.
    pub fn execute_sequence<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        nodes: &'a [ActionNode],
    ) -> BoxFuture<'a, ActionResult> {
        async move {
            let mut last = ActionResult::ok(Value::Null);
            for node in nodes {
                if ctx.is_cancelled() {
                    return ActionResult::cancelled();
                }
                let result = self.execute(ctx, node).await;
                if !result.success {
                    return result;
                }
                last = result;
            }
            last
        }
        .boxed()
    }

    async fn plugin_call(
        &self,
        ctx: &mut ExecutionContext,
        call: &PluginCallAction,
    ) -> ActionResult {
        let params = ctx.variables.resolve_map(&call.params);

        match self
            .registry
            .invoke(&call.capability, &call.action, &params)
            .await
        {
            Ok(result) => {
                bind_result(&mut ctx.variables, call.store_result.as_deref(), &result);
                ActionResult::ok(result)
            }
            Err(e) => {
                debug!(
                    "[{}] {}.{} failed: {}",
                    ctx.execution_id, call.capability, call.action, e
                );
                ActionResult::from_error(&EngineError::Capability(e))
            }
        }
    }

    async fn condition(
        &self,
        ctx: &mut ExecutionContext,
        condition: &ConditionAction,
    ) -> ActionResult {
        let outcome = match &condition.check {
            ConditionCheck::TemplateMatch {
                template_path,
                threshold,
                input_image,
            } => {
                let image = input_image
                    .as_deref()
                    .and_then(|r| resolve_image(&ctx.variables, r));
                match image {
                    Some(image) => {
                        match self
                            .matcher
                            .match_template(&image, template_path, *threshold)
                            .await
                        {
                            Ok(found) => {
                                if found.found {
                                    bind_match(&mut ctx.variables, &found);
                                }
                                found.found
                            }
                            Err(e) => {
                                return ActionResult::from_error(&EngineError::Capability(e))
                            }
                        }
                    }
                    None => false,
                }
            }
            ConditionCheck::VariableCompare {
                variable,
                operator,
                value,
            } => {
                let name = VariableContext::reference(variable).unwrap_or(variable.as_str());
                let left = ctx.variables.get(name).cloned().unwrap_or(Value::Null);
                let right = ctx.variables.resolve(value);
                compare(&left, *operator, &right)
            }
        };

        debug!("[{}] condition evaluated {}", ctx.execution_id, outcome);

        let branch = if outcome {
            &condition.on_true
        } else {
            &condition.on_false
        };
        let result = self.execute_sequence(ctx, branch).await;
        if !result.success {
            return result;
        }

        ActionResult::ok(json!({ "condition_result": outcome }))
    }

    async fn run_loop(&self, ctx: &mut ExecutionContext, l: &LoopAction) -> ActionResult {
        let interval = seconds(l.interval);
        let mut iterations: u64 = 0;

        while iterations < l.max_iterations {
            if ctx.is_cancelled() {
                return loop_cancelled(iterations);
            }
            iterations += 1;

            for child in &l.actions {
                if ctx.is_cancelled() {
                    return loop_cancelled(iterations);
                }
                let result = self.execute(ctx, child).await;
                if !result.success {
                    return result;
                }
                // a polling step counts as activity even when no leaf ran
                ctx.touch();
                if breaks_loop(child, &result) {
                    debug!(
                        "[{}] loop ended by condition after {} iteration(s)",
                        ctx.execution_id, iterations
                    );
                    return ActionResult::ok(json!({
                        "iterations": iterations,
                        "break_reason": "condition_true",
                    }));
                }
            }

            if iterations < l.max_iterations && !self.pause(ctx, interval).await {
                return loop_cancelled(iterations);
            }
        }

        ActionResult::ok(json!({ "iterations": iterations }))
    }

    async fn template_match(
        &self,
        ctx: &mut ExecutionContext,
        action: &TemplateMatchAction,
    ) -> ActionResult {
        let image = action
            .input_image
            .as_deref()
            .and_then(|r| resolve_image(&ctx.variables, r));
        let (Some(image), Some(template)) = (image, action.template_path.as_deref()) else {
            return ActionResult::from_error(&EngineError::InvalidParams(
                "template_match requires input_image and template_path".to_string(),
            ));
        };

        match self
            .matcher
            .match_template(&image, template, action.threshold)
            .await
        {
            Ok(found) => {
                let data = serde_json::to_value(&found).unwrap_or(Value::Null);
                if let Some(ref name) = action.store_result {
                    ctx.variables.set(name.clone(), data.clone());
                }
                if found.found {
                    bind_match(&mut ctx.variables, &found);
                }
                ActionResult::ok(data)
            }
            Err(e) => ActionResult::from_error(&EngineError::Capability(e)),
        }
    }

    async fn ocr(&self, ctx: &mut ExecutionContext, action: &OcrAction) -> ActionResult {
        let Some(image) = action
            .input_image
            .as_deref()
            .and_then(|r| resolve_image(&ctx.variables, r))
        else {
            return ActionResult::from_error(&EngineError::InvalidParams(
                "ocr requires input_image".to_string(),
            ));
        };

        match self.ocr.extract_text(&image, action.region).await {
            Ok(text) => {
                if let Some(ref name) = action.store_result {
                    ctx.variables.set(name.clone(), Value::String(text.clone()));
                }
                ActionResult::ok(json!({ "text": text }))
            }
            Err(e) => ActionResult::from_error(&EngineError::Capability(e)),
        }
    }

    async fn wait(&self, ctx: &mut ExecutionContext, duration: Duration) -> ActionResult {
        if self.pause(ctx, duration).await {
            ActionResult::ok(json!({ "waited": duration.as_secs_f64() }))
        } else {
            ActionResult::cancelled()
        }
    }

    /// Sleep for `duration`, waking early on cancellation. Returns false if
    /// the execution was cancelled.
    async fn pause(&self, ctx: &ExecutionContext, duration: Duration) -> bool {
        if duration.is_zero() {
            return !ctx.is_cancelled();
        }
        tokio::select! {
            _ = ctx.cancel_token().cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

fn set_variable(ctx: &mut ExecutionContext, set: &SetVariableAction) -> ActionResult {
    if set.name.trim().is_empty() {
        return ActionResult::from_error(&EngineError::InvalidParams(
            "set_variable requires a name".to_string(),
        ));
    }
    let value = ctx.variables.resolve(&set.value);
    ctx.variables.set(set.name.clone(), value.clone());
    ActionResult::ok(json!({ "name": set.name, "value": value }))
}

fn loop_cancelled(iterations: u64) -> ActionResult {
    ActionResult::cancelled().with_data(json!({
        "iterations": iterations,
        "break_reason": "cancelled",
    }))
}

/// A direct child condition marked `break_on_true` that evaluated true
fn breaks_loop(child: &ActionNode, result: &ActionResult) -> bool {
    match child {
        ActionNode::Condition(c) if c.break_on_true => {
            result.data.get("condition_result") == Some(&Value::Bool(true))
        }
        _ => false,
    }
}

/// Store a capability result and bind the coordinate/screenshot fields it
/// carries to their well-known names.
fn bind_result(vars: &mut VariableContext, store_result: Option<&str>, result: &Value) {
    if let Some(name) = store_result {
        vars.set(name, result.clone());
    }
    if let Value::Object(fields) = result {
        if let (Some(x), Some(y)) = (fields.get("x"), fields.get("y")) {
            vars.set(variables::MATCH_X, x.clone());
            vars.set(variables::MATCH_Y, y.clone());
        }
        if let Some(path) = fields.get("screenshot_path") {
            vars.set(variables::SCREENSHOT, path.clone());
        }
    }
}

fn bind_match(vars: &mut VariableContext, found: &MatchResult) {
    vars.set(variables::MATCH_X, json!(found.x));
    vars.set(variables::MATCH_Y, json!(found.y));
    vars.set(variables::MATCH_CONFIDENCE, json!(found.confidence));
}

/// Resolve an image reference: a path, or a `$name` bound to a path or to
/// an object carrying `screenshot_path`/`path`.
fn resolve_image(vars: &VariableContext, reference: &str) -> Option<String> {
    match vars.lookup_ref(reference)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Object(fields) => fields
            .get("screenshot_path")
            .or_else(|| fields.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Evaluate `left <op> right`. Ordering operators need two non-null numbers
/// or two strings; anything else evaluates false.
pub fn compare(left: &Value, operator: CompareOperator, right: &Value) -> bool {
    match operator {
        CompareOperator::Eq => values_equal(left, right),
        CompareOperator::Ne => !values_equal(left, right),
        _ => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(ord) => match operator {
                    CompareOperator::Gt => ord == Ordering::Greater,
                    CompareOperator::Lt => ord == Ordering::Less,
                    CompareOperator::Ge => ord != Ordering::Less,
                    CompareOperator::Le => ord != Ordering::Greater,
                    CompareOperator::Eq | CompareOperator::Ne => false,
                },
                None => false,
            }
        }
    }
}
