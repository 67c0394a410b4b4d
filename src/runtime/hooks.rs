use anyhow::Result;
use evalexpr::{build_operator_tree, Node as EvalNode, ContextWithMutableVariables, HashMapContext, DefaultNumericTypes};
use serde_json::Value;
use tracing::warn;
use crate::error::{EngineError, EngineResult};
use crate::runtime::case::Variables;

/// View of a case handed to hooks and conditions.
pub struct ExecutionContext<'a> {
    pub case_id: &'a str,
    pub task_id: &'a str,
    pub input: &'a Variables,
    pub variables: &'a mut Variables,
    /// Output reported by `complete_task`, if any.
    pub output: Option<&'a Variables>,
    /// Error reported by `fail_task`, if any.
    pub error: Option<&'a str>,
}

impl ExecutionContext<'_> {
    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn set_var(&mut self, key: &str, value: Value) {
        self.variables.insert(key.to_string(), value);
    }
}

/// Lifecycle callbacks registered per task id.
///
/// A returned error is logged and never aborts the transition.
pub trait TaskHook: Send + Sync {
    fn on_start(&self, _ctx: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_complete(&self, _ctx: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_fail(&self, _ctx: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Guard on a task or a dependency.
pub trait Condition: Send + Sync {
    fn evaluate(&self, ctx: &ExecutionContext<'_>) -> bool;
}

impl<F> Condition for F
where
    F: Fn(&ExecutionContext<'_>) -> bool + Send + Sync,
{
    fn evaluate(&self, ctx: &ExecutionContext<'_>) -> bool {
        self(ctx)
    }
}

/// Condition compiled from an expression over case variables, e.g. `amount > 100`.
#[derive(Debug)]
pub struct ExpressionCondition {
    condition: EvalNode<DefaultNumericTypes>,
    raw: String,
}

impl ExpressionCondition {
    pub fn compile(target: &str, expression: &str) -> EngineResult<Self> {
        let clean = expression.replace("${", "").replace('}', "");
        let condition = build_operator_tree::<DefaultNumericTypes>(&clean).map_err(|e| {
            EngineError::InvalidCondition {
                target: target.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { condition, raw: clean })
    }

    pub fn expression(&self) -> &str {
        &self.raw
    }
}

impl Condition for ExpressionCondition {
    fn evaluate(&self, ctx: &ExecutionContext<'_>) -> bool {
        let mut eval_ctx = HashMapContext::<DefaultNumericTypes>::new();
        for (k, v) in ctx.variables.iter() {
            let eval_val = match v {
                Value::String(s) => Some(evalexpr::Value::String(s.clone())),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() { Some(evalexpr::Value::Int(i)) }
                    else { n.as_f64().map(evalexpr::Value::Float) }
                },
                Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
                _ => None,
            };
            if let Some(ev) = eval_val {
                let _ = eval_ctx.set_value(k.clone(), ev);
            }
        }

        self.condition.eval_boolean_with_context(&eval_ctx)
            .unwrap_or_else(|e| {
                warn!(case_id = ctx.case_id, task_id = ctx.task_id, condition = %self.raw, error = %e, "Condition evaluation failed");
                false
            })
    }
}
