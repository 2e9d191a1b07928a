//! Markdown report derived from a run context.
//!
//! Sections always appear in the same order: input, idea validation, market analysis, strategy
//! advice, reflection, decision index. Sections with no data are left out, and a halted run
//! ends with the failure marker.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::info;

use crate::core::context::DecisionContext;
use crate::core::decision_index::{DecisionIndexResult, SubScores};

const REPORT_TEMPLATE: &str = include_str!("templates/report.md");

#[derive(Debug, Serialize)]
struct IndexView<'a> {
    score: u8,
    grade: String,
    recommendation: &'static str,
    unguarded_recommendation: &'static str,
    gated: bool,
    calm_state: &'static str,
    calm_score: u8,
    sub_scores: SubScores,
    key_uncertainties: &'a [String],
    next_steps: &'a [String],
    prescriptions: &'a [String],
}

impl<'a> From<&'a DecisionIndexResult> for IndexView<'a> {
    fn from(index: &'a DecisionIndexResult) -> Self {
        Self {
            score: index.score,
            grade: index.grade.to_string(),
            recommendation: index.recommendation.label(),
            unguarded_recommendation: index.unguarded_recommendation.label(),
            gated: index.calm_state.is_gating(),
            calm_state: index.calm_state.as_str(),
            calm_score: index.calm_score,
            sub_scores: index.sub_scores,
            key_uncertainties: &index.key_uncertainties,
            next_steps: &index.next_steps,
            prescriptions: &index.prescriptions,
        }
    }
}

/// Render the markdown report for `ctx`.
pub fn render_report(ctx: &DecisionContext) -> Result<String> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);
    env.add_template("report", REPORT_TEMPLATE)
        .context("register report template")?;
    let template = env.get_template("report").context("load report template")?;

    let outputs = ctx.stage_outputs();
    let strategy = outputs.strategy();
    let verdict_label = strategy
        .and_then(|strategy| strategy.verdict)
        .map_or("undecided", |verdict| verdict.label());
    let index = ctx.extra().decision_index.as_ref().map(IndexView::from);

    template
        .render(context! {
            run_id => &ctx.meta().run_id,
            created_at => &ctx.meta().created_at,
            complete => ctx.is_complete(),
            failure => ctx.failure(),
            input => ctx.input(),
            calmness => ctx.extra().calmness.as_ref(),
            idea => outputs.idea(),
            market => outputs.market(),
            strategy => strategy,
            verdict_label => verdict_label,
            reflection => ctx.reflection(),
            index => index,
        })
        .context("render report")
}

/// Render the report for `ctx` and write it to `path`, creating parent directories.
pub fn export_report(ctx: &DecisionContext, path: &Path) -> Result<()> {
    let report = render_report(ctx)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create report dir {}", parent.display()))?;
    }
    fs::write(path, report).with_context(|| format!("write report {}", path.display()))?;
    info!(path = %path.display(), "report exported");
    Ok(())
}
