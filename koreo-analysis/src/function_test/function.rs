//! Compiled ValueFunction / ResourceFunction definitions and their dry-run
//! evaluation.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::PrepareError;
use crate::expression::eval::{merge_overlay, values_equal};
use crate::expression::{compile, Bindings, CompiledExpression, EvalError};
use crate::model::{Outcome, ResourceKind};

const DEFAULT_DELAY: u64 = 30;

/// A spec subtree with its expression strings compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Literal(Value),
    Expression(CompiledExpression),
    Object(Vec<(String, Template)>),
    Array(Vec<Template>),
}

impl Template {
    pub fn compile(value: &Value, path: &str) -> Result<Self, PrepareError> {
        Ok(match value {
            Value::String(text) if text.starts_with('=') => {
                Template::Expression(compile(text).map_err(|err| PrepareError::Expression {
                    path: path.to_string(),
                    message: err.to_string(),
                })?)
            }
            Value::Object(map) => Template::Object(
                map.iter()
                    .map(|(key, value)| {
                        Ok((key.clone(), Template::compile(value, &format!("{path}.{key}"))?))
                    })
                    .collect::<Result<_, PrepareError>>()?,
            ),
            Value::Array(items) => Template::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| Template::compile(item, &format!("{path}[{idx}]")))
                    .collect::<Result<_, _>>()?,
            ),
            other => Template::Literal(other.clone()),
        })
    }

    pub fn render(&self, bindings: &Bindings) -> Result<Value, EvalError> {
        Ok(match self {
            Template::Literal(value) => value.clone(),
            Template::Expression(expression) => expression.evaluate(bindings)?,
            Template::Object(entries) => {
                let mut map = Map::new();
                for (key, template) in entries {
                    map.insert(key.clone(), template.render(bindings)?);
                }
                Value::Object(map)
            }
            Template::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.render(bindings))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    fn expressions<'a>(&'a self, found: &mut Vec<&'a CompiledExpression>) {
        match self {
            Template::Literal(_) => {}
            Template::Expression(expression) => found.push(expression),
            Template::Object(entries) => entries.iter().for_each(|(_, t)| t.expressions(found)),
            Template::Array(items) => items.iter().for_each(|t| t.expressions(found)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOutcome {
    Ok,
    DefaultReturn(Template),
    Skip(Template),
    DepSkip(Template),
    Retry { message: Template, delay: u64 },
    PermFail(Template),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub assert: CompiledExpression,
    pub outcome: ConditionOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverlaySource {
    Inline(Template),
    Function(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub source: OverlaySource,
    pub skip_if: Option<CompiledExpression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    Patch { delay: u64 },
    Recreate { delay: u64 },
    Never,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub api_version: String,
    pub kind: String,
    pub name: Template,
    pub namespace: Option<Template>,
    pub readonly: bool,
    pub delete_if_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Materializer {
    pub api_config: ApiConfig,
    pub resource: Option<Template>,
    pub overlays: Vec<Overlay>,
    pub create_enabled: bool,
    pub create_delay: u64,
    pub create_overlay: Option<Template>,
    pub update: UpdatePolicy,
    pub postconditions: Vec<Condition>,
}

/// A function ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFunction {
    pub kind: ResourceKind,
    pub name: String,
    pub preconditions: Vec<Condition>,
    pub locals: Vec<(String, Template)>,
    pub return_value: Option<Template>,
    /// Present for ResourceFunctions only.
    pub materializer: Option<Materializer>,
}

impl PreparedFunction {
    /// First-level `inputs.<key>` names read anywhere in the function.
    pub fn input_keys(&self) -> BTreeSet<String> {
        self.root_keys("inputs")
    }

    /// First-level `parent.<key>` names read anywhere in the function.
    pub fn parent_keys(&self) -> BTreeSet<String> {
        self.root_keys("parent")
    }

    fn root_keys(&self, root: &str) -> BTreeSet<String> {
        let mut expressions = Vec::new();
        for condition in self.preconditions.iter().chain(
            self.materializer
                .iter()
                .flat_map(|materializer| materializer.postconditions.iter()),
        ) {
            expressions.push(&condition.assert);
            condition_templates(&condition.outcome, &mut expressions);
        }
        for (_, local) in &self.locals {
            local.expressions(&mut expressions);
        }
        if let Some(template) = &self.return_value {
            template.expressions(&mut expressions);
        }
        if let Some(materializer) = &self.materializer {
            materializer.api_config.name.expressions(&mut expressions);
            if let Some(namespace) = &materializer.api_config.namespace {
                namespace.expressions(&mut expressions);
            }
            if let Some(resource) = &materializer.resource {
                resource.expressions(&mut expressions);
            }
            for overlay in &materializer.overlays {
                if let OverlaySource::Inline(template) = &overlay.source {
                    template.expressions(&mut expressions);
                }
                if let Some(skip_if) = &overlay.skip_if {
                    expressions.push(skip_if);
                }
            }
            if let Some(template) = &materializer.create_overlay {
                template.expressions(&mut expressions);
            }
        }
        expressions
            .into_iter()
            .flat_map(|expression| expression.ast.root_keys(root))
            .collect()
    }
}

fn condition_templates<'a>(outcome: &'a ConditionOutcome, found: &mut Vec<&'a CompiledExpression>) {
    match outcome {
        ConditionOutcome::Ok => {}
        ConditionOutcome::DefaultReturn(template)
        | ConditionOutcome::Skip(template)
        | ConditionOutcome::DepSkip(template)
        | ConditionOutcome::PermFail(template)
        | ConditionOutcome::Retry {
            message: template, ..
        } => template.expressions(found),
    }
}

fn compile_expression(value: Option<&Value>, path: &str) -> Result<Option<CompiledExpression>, PrepareError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let Some(text) = value.as_str().filter(|text| text.starts_with('=')) else {
        return Err(PrepareError::Structure(format!("`{path}` must be an expression")));
    };
    compile(text)
        .map(Some)
        .map_err(|err| PrepareError::Expression {
            path: path.to_string(),
            message: err.to_string(),
        })
}

fn conditions(value: Option<&Value>, path: &str) -> Result<Vec<Condition>, PrepareError> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let path = format!("{path}[{idx}]");
            let assert = compile_expression(item.get("assert"), &format!("{path}.assert"))?
                .ok_or_else(|| PrepareError::Structure(format!("`{path}` has no assert")))?;
            let message = |key: &str| {
                Template::compile(
                    item.get(key)
                        .and_then(|outcome| outcome.get("message"))
                        .unwrap_or(&Value::String(String::new())),
                    &format!("{path}.{key}.message"),
                )
            };
            let outcome = if item.get("ok").is_some() {
                ConditionOutcome::Ok
            } else if let Some(value) = item.get("defaultReturn") {
                ConditionOutcome::DefaultReturn(Template::compile(value, &format!("{path}.defaultReturn"))?)
            } else if item.get("skip").is_some() {
                ConditionOutcome::Skip(message("skip")?)
            } else if item.get("depSkip").is_some() {
                ConditionOutcome::DepSkip(message("depSkip")?)
            } else if let Some(retry) = item.get("retry") {
                ConditionOutcome::Retry {
                    message: message("retry")?,
                    delay: retry
                        .get("delay")
                        .and_then(Value::as_u64)
                        .unwrap_or(DEFAULT_DELAY),
                }
            } else if item.get("permFail").is_some() {
                ConditionOutcome::PermFail(message("permFail")?)
            } else {
                return Err(PrepareError::Structure(format!("`{path}` has no outcome")));
            };
            Ok(Condition { assert, outcome })
        })
        .collect()
}

fn delay_of(value: Option<&Value>) -> u64 {
    value
        .and_then(|policy| policy.get("delay"))
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_DELAY)
}

/// Compiles a function spec.
pub fn prepare(kind: ResourceKind, name: &str, spec: &Value) -> Result<PreparedFunction, PrepareError> {
    if !kind.is_function() {
        return Err(PrepareError::NotAFunction(kind));
    }
    let locals = match spec.get("locals") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| Ok((key.clone(), Template::compile(value, &format!("locals.{key}"))?)))
            .collect::<Result<Vec<_>, PrepareError>>()?,
        _ => Vec::new(),
    };
    let return_value = spec
        .get("return")
        .filter(|value| !value.is_null())
        .map(|value| Template::compile(value, "return"))
        .transpose()?;

    let materializer = match kind {
        ResourceKind::ResourceFunction => {
            let config = spec
                .get("apiConfig")
                .ok_or_else(|| PrepareError::Structure("`apiConfig` is required".into()))?;
            let text = |key: &str| {
                config
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| PrepareError::Structure(format!("`apiConfig.{key}` is required")))
            };
            let flag = |key: &str| config.get(key).and_then(Value::as_bool).unwrap_or(false);
            let api_config = ApiConfig {
                api_version: text("apiVersion")?,
                kind: text("kind")?,
                name: Template::compile(
                    config
                        .get("name")
                        .ok_or_else(|| PrepareError::Structure("`apiConfig.name` is required".into()))?,
                    "apiConfig.name",
                )?,
                namespace: config
                    .get("namespace")
                    .map(|value| Template::compile(value, "apiConfig.namespace"))
                    .transpose()?,
                readonly: flag("readonly"),
                delete_if_exists: flag("deleteIfExists"),
            };

            let overlays = spec
                .get("overlays")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(idx, item)| {
                    let path = format!("overlays[{idx}]");
                    let source = if let Some(overlay) = item.get("overlay") {
                        OverlaySource::Inline(Template::compile(overlay, &format!("{path}.overlay"))?)
                    } else if let Some(name) = item
                        .get("overlayRef")
                        .and_then(|reference| reference.get("name"))
                        .and_then(Value::as_str)
                    {
                        OverlaySource::Function(name.to_string())
                    } else {
                        return Err(PrepareError::Structure(format!("`{path}` has no overlay")));
                    };
                    Ok(Overlay {
                        source,
                        skip_if: compile_expression(item.get("skipIf"), &format!("{path}.skipIf"))?,
                    })
                })
                .collect::<Result<Vec<_>, PrepareError>>()?;

            let create = spec.get("create");
            let update = match spec.get("update") {
                Some(policy) if policy.get("recreate").is_some() => UpdatePolicy::Recreate {
                    delay: delay_of(policy.get("recreate")),
                },
                Some(policy) if policy.get("never").is_some() => UpdatePolicy::Never,
                Some(policy) => UpdatePolicy::Patch {
                    delay: delay_of(policy.get("patch")),
                },
                None => UpdatePolicy::Patch {
                    delay: DEFAULT_DELAY,
                },
            };

            Some(Materializer {
                api_config,
                resource: spec
                    .get("resource")
                    .map(|value| Template::compile(value, "resource"))
                    .transpose()?,
                overlays,
                create_enabled: create
                    .and_then(|create| create.get("enabled"))
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                create_delay: delay_of(create),
                create_overlay: create
                    .and_then(|create| create.get("overlay"))
                    .map(|value| Template::compile(value, "create.overlay"))
                    .transpose()?,
                update,
                postconditions: conditions(spec.get("postconditions"), "postconditions")?,
            })
        }
        _ => None,
    };

    Ok(PreparedFunction {
        kind,
        name: name.to_string(),
        preconditions: conditions(spec.get("preconditions"), "preconditions")?,
        locals,
        return_value,
        materializer,
    })
}

/// What a ResourceFunction asks the cluster to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationIntent {
    None,
    Create(Value),
    Patch(Value),
    Delete,
}

impl MutationIntent {
    pub fn resource(&self) -> Option<&Value> {
        match self {
            MutationIntent::Create(resource) | MutationIntent::Patch(resource) => Some(resource),
            MutationIntent::None | MutationIntent::Delete => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, MutationIntent::None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    pub outcome: Outcome,
    pub intent: MutationIntent,
    /// Resource state after this evaluation, carried to the next test case.
    pub resource: Option<Value>,
}

impl FunctionResult {
    fn value(outcome: Outcome, resource: Option<Value>) -> Self {
        Self {
            outcome,
            intent: MutationIntent::None,
            resource,
        }
    }
}

/// Resolves functions referenced by other functions (overlay references).
pub trait FunctionLookup {
    fn function(&self, kind: ResourceKind, name: &str) -> Option<Arc<PreparedFunction>>;
}

impl<F> FunctionLookup for F
where
    F: Fn(ResourceKind, &str) -> Option<Arc<PreparedFunction>>,
{
    fn function(&self, kind: ResourceKind, name: &str) -> Option<Arc<PreparedFunction>> {
        self(kind, name)
    }
}

/// Evaluates a function under test for one set of inputs and resource state.
pub trait FunctionEvaluator {
    fn evaluate(
        &self,
        function: &PreparedFunction,
        inputs: &Value,
        resource: Option<&Value>,
    ) -> Result<FunctionResult, EvalError>;
}

/// Side-effect free evaluator: nothing leaves the process.
pub struct DryRunEvaluator<'a> {
    lookup: &'a dyn FunctionLookup,
    parent: Option<Value>,
}

impl<'a> DryRunEvaluator<'a> {
    pub fn new(lookup: &'a dyn FunctionLookup) -> Self {
        Self {
            lookup,
            parent: None,
        }
    }

    /// Binds `parent` for every evaluation.
    pub fn with_parent(mut self, parent: Option<Value>) -> Self {
        self.parent = parent;
        self
    }

    fn check(condition: &Condition, bindings: &Bindings) -> Result<Option<Outcome>, EvalError> {
        let passed = match condition.assert.evaluate(bindings)? {
            Value::Bool(passed) => passed,
            other => {
                return Err(EvalError::Type(format!(
                    "assertion `{}` produced {other}, expected a bool",
                    condition.assert.source
                )))
            }
        };
        if passed {
            return Ok(None);
        }
        let message = |template: &Template| -> Result<String, EvalError> {
            Ok(match template.render(bindings)? {
                Value::String(text) => text,
                Value::Null => String::new(),
                other => other.to_string(),
            })
        };
        Ok(Some(match &condition.outcome {
            ConditionOutcome::Ok => Outcome::Ok(Value::Null),
            ConditionOutcome::DefaultReturn(template) => Outcome::Ok(template.render(bindings)?),
            ConditionOutcome::Skip(template) => Outcome::Skip(message(template)?),
            ConditionOutcome::DepSkip(template) => Outcome::DepSkip(message(template)?),
            ConditionOutcome::Retry { message: template, delay } => Outcome::Retry {
                message: message(template)?,
                delay: *delay,
            },
            ConditionOutcome::PermFail(template) => Outcome::PermFail(message(template)?),
        }))
    }

    fn materialize(
        &self,
        materializer: &Materializer,
        bindings: &mut Bindings,
    ) -> Result<Value, EvalError> {
        let mut resource = match &materializer.resource {
            Some(template) => template.render(bindings)?,
            None => json!({}),
        };
        if !resource.is_object() {
            return Err(EvalError::Type("`resource` must render to a map".into()));
        }
        let config = &materializer.api_config;
        let mut identity = json!({
            "apiVersion": config.api_version,
            "kind": config.kind,
            "metadata": {"name": config.name.render(bindings)?},
        });
        if let Some(namespace) = &config.namespace {
            identity["metadata"]["namespace"] = namespace.render(bindings)?;
        }
        merge_overlay(&mut resource, &identity);

        for overlay in &materializer.overlays {
            bindings.bind("resource", resource.clone());
            if let Some(skip_if) = &overlay.skip_if {
                if skip_if.evaluate(bindings)? == Value::Bool(true) {
                    continue;
                }
            }
            let rendered = match &overlay.source {
                OverlaySource::Inline(template) => template.render(bindings)?,
                OverlaySource::Function(name) => {
                    let function = self
                        .lookup
                        .function(ResourceKind::ValueFunction, name)
                        .ok_or_else(|| {
                            EvalError::Type(format!("overlay ValueFunction `{name}` not found"))
                        })?;
                    let inputs = bindings.get("inputs").cloned().unwrap_or(Value::Null);
                    match self.evaluate(&function, &inputs, Some(&resource))?.outcome {
                        Outcome::Ok(value) => value,
                        other => {
                            return Err(EvalError::Type(format!(
                                "overlay ValueFunction `{name}` returned {other}"
                            )))
                        }
                    }
                }
            };
            merge_overlay(&mut resource, &rendered);
        }
        Ok(resource)
    }
}

/// True when every field of `desired` is present and equal in `actual`.
fn is_subset(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(desired), Value::Object(actual)) => desired.iter().all(|(key, value)| {
            actual
                .get(key)
                .map(|existing| is_subset(value, existing))
                .unwrap_or(false)
        }),
        _ => values_equal(desired, actual),
    }
}

impl FunctionEvaluator for DryRunEvaluator<'_> {
    fn evaluate(
        &self,
        function: &PreparedFunction,
        inputs: &Value,
        resource: Option<&Value>,
    ) -> Result<FunctionResult, EvalError> {
        let mut bindings = Bindings::new().with("inputs", inputs.clone());
        if let Some(parent) = &self.parent {
            bindings.bind("parent", parent.clone());
        }
        if let Some(resource) = resource {
            if function.kind == ResourceKind::ValueFunction {
                bindings.bind("resource", resource.clone());
            }
        }
        let carried = resource.cloned();

        for condition in &function.preconditions {
            if let Some(outcome) = Self::check(condition, &bindings)? {
                return Ok(FunctionResult::value(outcome, carried));
            }
        }

        let mut locals = Map::new();
        for (name, template) in &function.locals {
            bindings.bind("locals", Value::Object(locals.clone()));
            let value = template.render(&bindings)?;
            locals.insert(name.clone(), value);
        }
        bindings.bind("locals", Value::Object(locals));

        let Some(materializer) = &function.materializer else {
            let value = match &function.return_value {
                Some(template) => template.render(&bindings)?,
                None => Value::Null,
            };
            return Ok(FunctionResult::value(Outcome::Ok(value), carried));
        };

        let config = &materializer.api_config;
        let name = config
            .name
            .render(&bindings)
            .ok()
            .and_then(|name| name.as_str().map(str::to_string))
            .unwrap_or_else(|| config.kind.clone());

        if config.delete_if_exists {
            return Ok(match carried {
                Some(_) => FunctionResult {
                    outcome: Outcome::Retry {
                        message: format!("deleting {} `{}`", config.kind, name),
                        delay: DEFAULT_DELAY,
                    },
                    intent: MutationIntent::Delete,
                    resource: None,
                },
                None => FunctionResult::value(Outcome::Ok(Value::Null), None),
            });
        }

        let current = match (carried, config.readonly) {
            (Some(current), true) => current,
            (None, true) => {
                return Ok(FunctionResult::value(
                    Outcome::Retry {
                        message: format!("waiting for readonly {} `{}`", config.kind, name),
                        delay: DEFAULT_DELAY,
                    },
                    None,
                ))
            }
            (None, false) => {
                let mut desired = self.materialize(materializer, &mut bindings)?;
                if !materializer.create_enabled {
                    return Ok(FunctionResult::value(
                        Outcome::Retry {
                            message: format!(
                                "{} `{}` does not exist and creation is disabled",
                                config.kind,
                                name
                            ),
                            delay: materializer.create_delay,
                        },
                        None,
                    ));
                }
                if let Some(template) = &materializer.create_overlay {
                    bindings.bind("resource", desired.clone());
                    merge_overlay(&mut desired, &template.render(&bindings)?);
                }
                return Ok(FunctionResult {
                    outcome: Outcome::Retry {
                        message: format!("creating {} `{}`", config.kind, name),
                        delay: materializer.create_delay,
                    },
                    intent: MutationIntent::Create(desired.clone()),
                    resource: Some(desired),
                });
            }
            (Some(current), false) => {
                let desired = self.materialize(materializer, &mut bindings)?;
                if is_subset(&desired, &current) {
                    current
                } else {
                    match materializer.update {
                        UpdatePolicy::Patch { delay } => {
                            let mut patched = current;
                            merge_overlay(&mut patched, &desired);
                            return Ok(FunctionResult {
                                outcome: Outcome::Retry {
                                    message: format!("patching {} `{}`", config.kind, name),
                                    delay,
                                },
                                intent: MutationIntent::Patch(patched.clone()),
                                resource: Some(patched),
                            });
                        }
                        UpdatePolicy::Recreate { delay } => {
                            return Ok(FunctionResult {
                                outcome: Outcome::Retry {
                                    message: format!(
                                        "recreating {} `{}`",
                                        config.kind,
                                        name
                                    ),
                                    delay,
                                },
                                intent: MutationIntent::Delete,
                                resource: None,
                            });
                        }
                        UpdatePolicy::Never => current,
                    }
                }
            }
        };

        bindings.bind("resource", current.clone());
        for condition in &materializer.postconditions {
            if let Some(outcome) = Self::check(condition, &bindings)? {
                return Ok(FunctionResult::value(outcome, Some(current)));
            }
        }
        let value = match &function.return_value {
            Some(template) => template.render(&bindings)?,
            None => Value::Null,
        };
        Ok(FunctionResult::value(Outcome::Ok(value), Some(current)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_functions(_: ResourceKind, _: &str) -> Option<Arc<PreparedFunction>> {
        None
    }

    fn run(function: &PreparedFunction, inputs: Value, resource: Option<Value>) -> FunctionResult {
        DryRunEvaluator::new(&no_functions)
            .evaluate(function, &inputs, resource.as_ref())
            .unwrap()
    }

    #[test]
    fn value_function_sum_and_average() {
        let spec = json!({
            "locals": {
                "amounts": "=inputs.values.map(v, v.amount)",
                "total": "=sum(locals.amounts)",
                "count": "=size(inputs.values)",
            },
            "return": {"total": "=locals.total", "average": "=locals.total / locals.count"},
        });
        let function = prepare(ResourceKind::ValueFunction, "stats", &spec).unwrap();
        let result = run(
            &function,
            json!({"values": [{"amount": 10}, {"amount": 20}]}),
            None,
        );
        assert_eq!(result.outcome, Outcome::Ok(json!({"total": 30, "average": 15})));
        assert_eq!(result.intent, MutationIntent::None);
        assert_eq!(
            function.input_keys().into_iter().collect::<Vec<_>>(),
            vec!["values".to_string()]
        );
    }

    #[test]
    fn preconditions_short_circuit_in_order() {
        let spec = json!({
            "preconditions": [
                {"assert": "=inputs.n > 0", "permFail": {"message": "n must be positive"}},
                {"assert": "=inputs.n < 10", "retry": {"message": "too big", "delay": 5}},
                {"assert": "=inputs.n != 5", "defaultReturn": {"n": 5}},
            ],
            "return": {"n": "=inputs.n"},
        });
        let function = prepare(ResourceKind::ValueFunction, "gate", &spec).unwrap();
        assert_eq!(
            run(&function, json!({"n": 0}), None).outcome,
            Outcome::PermFail("n must be positive".into())
        );
        assert_eq!(
            run(&function, json!({"n": 12}), None).outcome,
            Outcome::Retry {
                message: "too big".into(),
                delay: 5
            }
        );
        assert_eq!(run(&function, json!({"n": 5}), None).outcome, Outcome::Ok(json!({"n": 5})));
        assert_eq!(run(&function, json!({"n": 3}), None).outcome, Outcome::Ok(json!({"n": 3})));
    }

    #[test]
    fn parent_reads_are_tracked_and_bound() {
        let spec = json!({
            "return": {"owner": "=parent.metadata.name + '/' + inputs.suffix"},
        });
        let function = prepare(ResourceKind::ValueFunction, "owner", &spec).unwrap();
        assert_eq!(
            function.parent_keys().into_iter().collect::<Vec<_>>(),
            vec!["metadata".to_string()]
        );
        assert_eq!(
            function.input_keys().into_iter().collect::<Vec<_>>(),
            vec!["suffix".to_string()]
        );

        let result = DryRunEvaluator::new(&no_functions)
            .with_parent(Some(json!({"metadata": {"name": "app"}})))
            .evaluate(&function, &json!({"suffix": "web"}), None)
            .unwrap();
        assert_eq!(result.outcome, Outcome::Ok(json!({"owner": "app/web"})));
    }

    #[test]
    fn non_boolean_assertions_are_faults() {
        let spec = json!({"preconditions": [{"assert": "=inputs.n", "ok": {}}]});
        let function = prepare(ResourceKind::ValueFunction, "bad", &spec).unwrap();
        let result = DryRunEvaluator::new(&no_functions).evaluate(&function, &json!({"n": 1}), None);
        assert!(matches!(result, Err(EvalError::Type(_))));
    }

    fn bucket() -> PreparedFunction {
        let spec = json!({
            "apiConfig": {"apiVersion": "storage.example.com/v1", "kind": "Bucket", "name": "=inputs.name"},
            "resource": {"spec": {"size": "=inputs.size"}},
            "overlays": [
                {"overlay": {"spec": {"tier": "gold"}}, "skipIf": "=inputs.size < 100"},
            ],
            "create": {"delay": 10},
            "return": {"ready": "=resource.status.ready"},
        });
        prepare(ResourceKind::ResourceFunction, "bucket", &spec).unwrap()
    }

    #[test]
    fn resource_function_creates_then_patches_then_returns() {
        let function = bucket();
        let created = run(&function, json!({"name": "b", "size": 200}), None);
        assert_eq!(created.outcome.variant_name(), "retry");
        let resource = created.intent.resource().unwrap().clone();
        assert_eq!(resource["metadata"]["name"], json!("b"));
        assert_eq!(resource["spec"], json!({"size": 200, "tier": "gold"}));

        let mut current = resource.clone();
        current["status"] = json!({"ready": true});
        let steady = run(&function, json!({"name": "b", "size": 200}), Some(current.clone()));
        assert_eq!(steady.intent, MutationIntent::None);
        assert_eq!(steady.outcome, Outcome::Ok(json!({"ready": true})));

        let patched = run(&function, json!({"name": "b", "size": 300}), Some(current));
        assert!(matches!(patched.intent, MutationIntent::Patch(_)));
        assert_eq!(patched.resource.unwrap()["status"]["ready"], json!(true));
    }

    #[test]
    fn missing_api_config_is_a_prepare_error() {
        let result = prepare(ResourceKind::ResourceFunction, "x", &json!({"resource": {}}));
        assert!(matches!(result, Err(PrepareError::Structure(_))));
        let result = prepare(ResourceKind::ValueFunction, "x", &json!({"return": {"a": "=1 +"}}));
        assert!(matches!(result, Err(PrepareError::Expression { .. })));
    }
}
