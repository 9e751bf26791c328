//! Shared test fixtures
//!
//! The engine's LLM calls are pinned through [`ScriptedCompletion`], a
//! deterministic adapter driven by declarative rules, so every scenario is
//! reproducible. Also provides the arithmetic and ledger tools the
//! scenarios use and a harness that wires an engine over in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use colloquy::error::CompletionResult;
use colloquy::store::{AgentStore, GuidelineStore, SessionStore};
use colloquy::tool::{ParameterSchema, ParameterType, Tool, ToolDescriptor, ToolOutcome};
use colloquy::{
    Agent, AlphaEngine, CompletionRequest, EngineStores, Fragment, Guideline, SchematicCompletion,
    Session, SessionId, ToolId, ToolRegistry,
};
use colloquy::error::ToolError;
use colloquy::types::CustomerId;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Activation rule: a proposer candidate whose text contains
/// `condition_contains` activates with the given priority, optionally only
/// when the request (system + prompt) contains `requires_context`.
struct ActivationRule {
    condition_contains: String,
    priority: u8,
    requires_context: Option<String>,
}

/// Tool rule: when the tool prompt names a tool containing `tool_contains`
/// (and the context matches), the model proposes these argument sets.
struct ToolRule {
    tool_contains: String,
    requires_context: Option<String>,
    argument_sets: Vec<Value>,
}

/// Reply rule: the generator drafts `message` when the request contains
/// `requires_context` (always, when empty).
struct ReplyRule {
    requires_context: String,
    message: String,
}

/// Deterministic completion adapter driven by declarative rules.
///
/// Proposer batches are answered by parsing the candidate lines out of the
/// prompt and applying the activation rules; tool inference and reply
/// drafting are answered from their rule lists, first match wins. Every
/// request is recorded for assertions.
#[derive(Default)]
pub struct ScriptedCompletion {
    activations: Vec<ActivationRule>,
    tool_rules: Vec<ToolRule>,
    replies: Vec<ReplyRule>,
    assembly_reply: Option<Value>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(mut self, condition_contains: &str, priority: u8) -> Self {
        self.activations.push(ActivationRule {
            condition_contains: condition_contains.to_lowercase(),
            priority,
            requires_context: None,
        });
        self
    }

    /// Activation gated on context, e.g. a tool result from a prior
    /// iteration appearing in the request.
    pub fn activate_in_context(
        mut self,
        condition_contains: &str,
        priority: u8,
        requires_context: &str,
    ) -> Self {
        self.activations.push(ActivationRule {
            condition_contains: condition_contains.to_lowercase(),
            priority,
            requires_context: Some(requires_context.to_lowercase()),
        });
        self
    }

    pub fn call_tool(mut self, tool_contains: &str, argument_sets: Vec<Value>) -> Self {
        self.tool_rules.push(ToolRule {
            tool_contains: tool_contains.to_lowercase(),
            requires_context: None,
            argument_sets,
        });
        self
    }

    /// Tool rule gated on context; rules are matched in insertion order.
    pub fn call_tool_in_context(
        mut self,
        tool_contains: &str,
        requires_context: &str,
        argument_sets: Vec<Value>,
    ) -> Self {
        self.tool_rules.push(ToolRule {
            tool_contains: tool_contains.to_lowercase(),
            requires_context: Some(requires_context.to_lowercase()),
            argument_sets,
        });
        self
    }

    pub fn reply(mut self, message: &str) -> Self {
        self.replies.push(ReplyRule {
            requires_context: String::new(),
            message: message.to_string(),
        });
        self
    }

    pub fn reply_in_context(mut self, requires_context: &str, message: &str) -> Self {
        self.replies.push(ReplyRule {
            requires_context: requires_context.to_lowercase(),
            message: message.to_string(),
        });
        self
    }

    /// Raw strict-assembly reply value
    pub fn assemble(mut self, reply: Value) -> Self {
        self.assembly_reply = Some(reply);
        self
    }

    /// All recorded requests for a stage, in call order
    pub fn requests_for(&self, stage: &str) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect()
    }

    fn answer_propose(&self, context: &str, prompt: &str) -> Value {
        let mut evaluations = Vec::new();
        for line in prompt.lines() {
            let Some(rest) = line.strip_prefix("Candidate ") else {
                continue;
            };
            let Some((number, text)) = rest.split_once(':') else {
                continue;
            };
            let Ok(number) = number.trim().parse::<usize>() else {
                continue;
            };
            let text = text.to_lowercase();

            let matched = self.activations.iter().find(|rule| {
                text.contains(&rule.condition_contains)
                    && rule
                        .requires_context
                        .as_ref()
                        .is_none_or(|needle| context.contains(needle))
            });
            match matched {
                Some(rule) => evaluations.push(json!({
                    "candidate_number": number,
                    "condition_holds": true,
                    "priority": rule.priority,
                    "rationale": "scripted activation",
                })),
                None => evaluations.push(json!({
                    "candidate_number": number,
                    "condition_holds": false,
                })),
            }
        }
        json!({ "evaluations": evaluations })
    }

    fn answer_tools(&self, context: &str, prompt: &str) -> Value {
        let matched = self.tool_rules.iter().find(|rule| {
            prompt.to_lowercase().contains(&rule.tool_contains)
                && rule
                    .requires_context
                    .as_ref()
                    .is_none_or(|needle| context.contains(needle))
        });
        match matched {
            Some(rule) => {
                let calls: Vec<Value> = rule
                    .argument_sets
                    .iter()
                    .map(|arguments| {
                        json!({
                            "should_call": true,
                            "arguments": arguments,
                            "rationale": "scripted call",
                        })
                    })
                    .collect();
                json!({ "calls": calls })
            }
            None => json!({ "calls": [{ "should_call": false }] }),
        }
    }

    fn answer_generate(&self, context: &str, prompt: &str) -> Value {
        if prompt.contains("Available fragments:") {
            return self
                .assembly_reply
                .clone()
                .unwrap_or_else(|| json!({ "segments": [] }));
        }
        let matched = self
            .replies
            .iter()
            .find(|rule| rule.requires_context.is_empty() || context.contains(&rule.requires_context));
        match matched {
            Some(rule) => json!({ "should_reply": true, "message": rule.message }),
            None => json!({ "should_reply": false, "abstain_reason": "no scripted reply" }),
        }
    }
}

#[async_trait]
impl SchematicCompletion for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult<Value> {
        self.requests.lock().unwrap().push(request.clone());
        let context = format!("{}\n{}", request.system, request.prompt).to_lowercase();
        Ok(match request.stage.as_str() {
            "propose" => self.answer_propose(&context, &request.prompt),
            "tools" => self.answer_tools(&context, &request.prompt),
            "generate" => self.answer_generate(&context, &request.prompt),
            other => json!({ "error": format!("unscripted stage {other}") }),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// `math:add`: adds two integers
pub struct AddTool {
    descriptor: ToolDescriptor,
}

impl AddTool {
    pub fn new() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "first_number".to_string(),
            ParameterSchema::required(ParameterType::Integer, "left operand"),
        );
        parameters.insert(
            "second_number".to_string(),
            ParameterSchema::required(ParameterType::Integer, "right operand"),
        );
        Self {
            descriptor: ToolDescriptor {
                id: ToolId::new("math", "add"),
                description: "adds two numbers".into(),
                parameters,
            },
        }
    }
}

#[async_trait]
impl Tool for AddTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: BTreeMap<String, Value>) -> Result<ToolOutcome, ToolError> {
        let a = arguments["first_number"].as_i64().unwrap_or(0);
        let b = arguments["second_number"].as_i64().unwrap_or(0);
        Ok(ToolOutcome::data(json!(a + b)))
    }
}

/// `math:multiply`: multiplies two integers
pub struct MultiplyTool {
    descriptor: ToolDescriptor,
}

impl MultiplyTool {
    pub fn new() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "first_number".to_string(),
            ParameterSchema::required(ParameterType::Integer, "left operand"),
        );
        parameters.insert(
            "second_number".to_string(),
            ParameterSchema::required(ParameterType::Integer, "right operand"),
        );
        Self {
            descriptor: ToolDescriptor {
                id: ToolId::new("math", "multiply"),
                description: "multiplies two numbers".into(),
                parameters,
            },
        }
    }
}

#[async_trait]
impl Tool for MultiplyTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: BTreeMap<String, Value>) -> Result<ToolOutcome, ToolError> {
        let a = arguments["first_number"].as_i64().unwrap_or(0);
        let b = arguments["second_number"].as_i64().unwrap_or(0);
        Ok(ToolOutcome::data(json!(a * b)))
    }
}

/// `ledger:get_account_balance`: always reports the sentinel balance -555
pub struct BalanceTool {
    descriptor: ToolDescriptor,
}

impl BalanceTool {
    pub fn new() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "account_holder".to_string(),
            ParameterSchema::required(ParameterType::String, "name on the account"),
        );
        Self {
            descriptor: ToolDescriptor {
                id: ToolId::new("ledger", "get_account_balance"),
                description: "looks up an account balance".into(),
                parameters,
            },
        }
    }
}

#[async_trait]
impl Tool for BalanceTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _arguments: BTreeMap<String, Value>) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::data(json!({ "balance": -555 })))
    }
}

/// `math:count`: returns ten times the requested step; used to keep tool
/// results changing across iterations
pub struct CountTool {
    descriptor: ToolDescriptor,
    invocations: AtomicI64,
}

impl CountTool {
    pub fn new() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "step".to_string(),
            ParameterSchema::optional(ParameterType::Integer, "which step to report"),
        );
        Self {
            descriptor: ToolDescriptor {
                id: ToolId::new("math", "count"),
                description: "reports the next counter value".into(),
                parameters,
            },
            invocations: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl Tool for CountTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: BTreeMap<String, Value>) -> Result<ToolOutcome, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let step = arguments.get("step").and_then(Value::as_i64).unwrap_or(0);
        Ok(ToolOutcome::data(json!(step * 10)))
    }
}

/// `ops:flaky`: always raises
pub struct FailingTool {
    descriptor: ToolDescriptor,
}

impl FailingTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                id: ToolId::new("ops", "flaky"),
                description: "a tool that always fails".into(),
                parameters: BTreeMap::new(),
            },
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _arguments: BTreeMap<String, Value>) -> Result<ToolOutcome, ToolError> {
        Err(ToolError::Execution {
            tool_id: self.descriptor.id.clone(),
            message: "backend connection refused at 10.0.3.7:5432".into(),
        })
    }
}

/// An engine wired over in-memory stores with a scripted adapter
pub struct Harness {
    pub stores: EngineStores,
    pub engine: AlphaEngine,
    pub session_id: SessionId,
}

/// Build a harness for one agent, its guidelines, and a fresh session.
/// Takes the script behind an `Arc` so tests can keep a handle for
/// inspecting recorded requests.
pub async fn harness(
    script: Arc<ScriptedCompletion>,
    agent: Agent,
    guidelines: Vec<Guideline>,
    tools: Vec<Arc<dyn Tool>>,
    fragments: Vec<Fragment>,
) -> Harness {
    let stores = EngineStores::in_memory();
    let agent_id = stores.agents.add_agent(agent).await.unwrap();
    for guideline in guidelines {
        stores
            .guidelines
            .add_guideline(agent_id, guideline)
            .await
            .unwrap();
    }

    let registry = Arc::new(ToolRegistry::new());
    for tool in tools {
        registry.register(tool).await.unwrap();
    }

    let session = Session::new(agent_id, CustomerId::new());
    let session_id = stores.sessions.create_session(session).await.unwrap();

    let engine = AlphaEngine::builder()
        .stores(stores.clone())
        .registry(registry)
        .completion(script)
        .fragments(fragments)
        .build()
        .unwrap();

    Harness {
        stores,
        engine,
        session_id,
    }
}
