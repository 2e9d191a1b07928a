//! Prompt pack builder for stage agents.
//!
//! Templates mark sections with `<!-- section:KEY required|droppable -->`. After rendering,
//! sections are parsed back out and droppable ones are removed until the prompt fits the
//! byte budget.

use std::sync::LazyLock;

use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::context::DecisionContext;
use crate::core::error::{KernelError, KernelResult};
use crate::core::types::{Stage, StageOutput};

const SHARED_TEMPLATE: &str = include_str!("prompts/shared.md");
const IDEA_TEMPLATE: &str = include_str!("prompts/idea_validation.md");
const MARKET_TEMPLATE: &str = include_str!("prompts/market_analysis.md");
const STRATEGY_TEMPLATE: &str = include_str!("prompts/strategy_advice.md");
const REFLECTION_TEMPLATE: &str = include_str!("prompts/reflection.md");

/// Drop order under budget pressure: earlier keys go first.
const DROP_ORDER: [&str; 4] = ["prior", "resources", "state", "constraints"];

/// Prior-stage digests are cut to this many bytes each.
const DIGEST_LIMIT: usize = 600;

/// Digest of one earlier stage, rendered into later prompts.
#[derive(Debug, Clone, Serialize)]
struct PriorDigest {
    stage: &'static str,
    title: &'static str,
    digest: String,
}

/// All inputs needed to render a stage prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    pub scenario: String,
    pub current_state: String,
    pub resources: String,
    pub constraints: Vec<String>,
    /// Compact JSON of earlier stage outputs, in stage order.
    prior: Vec<PriorDigest>,
}

impl PromptInputs {
    /// Collect prompt inputs from the caller input and every committed output.
    pub fn from_context(ctx: &DecisionContext) -> Self {
        let input = ctx.input();
        let prior = ctx
            .stage_outputs()
            .iter()
            .map(|output| {
                let stage = output.stage();
                PriorDigest {
                    stage: stage.as_str(),
                    title: stage.title(),
                    digest: digest(output),
                }
            })
            .collect();
        Self {
            scenario: input.scenario.clone(),
            current_state: input.current_state.clone(),
            resources: input.resources.clone(),
            constraints: input.constraints.clone(),
            prior,
        }
    }
}

fn digest(output: &StageOutput) -> String {
    let body = match output {
        StageOutput::IdeaValidation(idea) => serde_json::to_string(idea),
        StageOutput::MarketAnalysis(market) => serde_json::to_string(market),
        StageOutput::StrategyAdvice(strategy) => serde_json::to_string(strategy),
    };
    let mut text = body.unwrap_or_default();
    if text.len() > DIGEST_LIMIT {
        let mut cut = DIGEST_LIMIT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

fn non_blank(text: &str) -> Option<&str> {
    Some(text.trim()).filter(|t| !t.is_empty())
}

/// Template engine wrapper around minijinja.
#[derive(Debug)]
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> KernelResult<Self> {
        let mut env = Environment::new();
        let templates = [
            ("shared", SHARED_TEMPLATE),
            (Stage::IdeaValidation.as_str(), IDEA_TEMPLATE),
            (Stage::MarketAnalysis.as_str(), MARKET_TEMPLATE),
            (Stage::StrategyAdvice.as_str(), STRATEGY_TEMPLATE),
            (Stage::Reflection.as_str(), REFLECTION_TEMPLATE),
        ];
        for (name, source) in templates {
            env.add_template(name, source).map_err(|err| {
                KernelError::Validation(format!("prompt template {name} is invalid: {err}"))
            })?;
        }
        Ok(Self { env })
    }

    fn render(&self, stage: Stage, input: &PromptInputs) -> KernelResult<String> {
        let rendered = self
            .env
            .get_template(stage.as_str())
            .and_then(|template| {
                template.render(context! {
                    scenario => input.scenario.trim(),
                    current_state => non_blank(&input.current_state),
                    resources => non_blank(&input.resources),
                    constraints => input
                        .constraints
                        .iter()
                        .filter_map(|c| non_blank(c))
                        .collect::<Vec<_>>(),
                    prior => &input.prior,
                })
            })
            .map_err(|err| KernelError::stage(stage, format!("render prompt: {err}")))?;
        Ok(rendered)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    /// Section identifier (e.g., "contract", "scenario").
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    /// Full section content including header.
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section regex is valid")
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let required = kind.as_str() == "required";
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

/// Drop droppable sections in [`DROP_ORDER`] until the total fits; then truncate the last one.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    let Some(last) = sections.last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(other_len);
    if last.content.len() <= allowed {
        return;
    }
    let before_len = last.content.len();
    let mut cut = allowed.saturating_sub(12);
    while !last.content.is_char_boundary(cut) {
        cut -= 1;
    }
    last.content.truncate(cut);
    if allowed > 12 {
        last.content.push_str("\n[truncated]");
    }
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds stage prompts within a byte budget, dropping less critical sections first.
#[derive(Debug)]
pub struct PromptBuilder {
    engine: PromptEngine,
    budget_bytes: usize,
}

impl PromptBuilder {
    /// Create a builder with the given byte budget.
    pub fn new(budget_bytes: usize) -> KernelResult<Self> {
        Ok(Self {
            engine: PromptEngine::new()?,
            budget_bytes,
        })
    }

    /// Build the prompt pack for `stage`.
    pub fn build(&self, stage: Stage, input: &PromptInputs) -> KernelResult<PromptPack> {
        let rendered = self.engine.render(stage, input)?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(PromptPack {
            content: render_sections(&sections),
        })
    }
}

/// A rendered prompt ready to send to a backend.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn as_str(&self) -> &str {
        &self.content
    }
}
