//! `decider`: staged decision analysis with a calmness guardrail.
//!
//! Runs a decision through idea validation, market analysis, strategy advice and reflection,
//! scores it, and keeps one write-once record per run under the configured sessions directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use decider::core::calmness::CalmnessAnswers;
use decider::core::context::{DecisionContext, DecisionInput};
use decider::core::decision_index::{DecisionIndexResult, score_record};
use decider::core::variants::ScenarioPlan;
use decider::exit_codes;
use decider::expand::{Expansion, expand_and_run};
use decider::io::backend::select_backend;
use decider::io::config::{DEFAULT_CONFIG_FILE, DeciderConfig, load_config, write_config};
use decider::io::report::{export_report, render_report};
use decider::io::session_store::{list_records, load_record, load_record_value, write_record};
use decider::logging;
use decider::pipeline::{DecisionRequest, PipelineOutcome, run_decision};

#[derive(Parser, Debug)]
#[command(
    name = "decider",
    version,
    about = "Staged decision analysis with a calmness guardrail"
)]
struct Cli {
    /// Config file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one decision through all stages and score it.
    Run(DecisionArgs),
    /// Run conservative, current and aggressive variants of a plan and compare them.
    Expand {
        #[command(flatten)]
        decision: DecisionArgs,
        #[command(flatten)]
        plan: PlanArgs,
    },
    /// Recompute the decision index of a saved run record.
    Rescore {
        record: PathBuf,
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Render the markdown report of a saved run record.
    Report {
        record: PathBuf,
        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List saved run records, newest first.
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct DecisionArgs {
    /// The decision being considered.
    #[arg(long)]
    scenario: String,
    /// Where things stand today.
    #[arg(long, default_value = "")]
    state: String,
    /// Money, time and skills available.
    #[arg(long, default_value = "")]
    resources: String,
    /// Hard constraint; repeat for several.
    #[arg(long = "constraint")]
    constraints: Vec<String>,
    /// Calmness answers as `d,i,c,s`, each 0 (calm) to 2.
    #[arg(long)]
    calm: Option<String>,
    /// Also write the markdown report to this path.
    #[arg(long)]
    report: Option<PathBuf>,
    /// Do not write a run record.
    #[arg(long)]
    no_save: bool,
    /// Print the full context as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[arg(long)]
    months: f64,
    /// Monthly budget.
    #[arg(long)]
    budget: f64,
    #[arg(long)]
    validation_weeks: f64,
    #[arg(long)]
    outputs_per_week: f64,
    #[arg(long)]
    max_loss: f64,
    /// Measurable bar that counts as success.
    #[arg(long)]
    success_bar: f64,
    /// Allowed deviation from constraints, in percent.
    #[arg(long)]
    tolerance_pct: f64,
}

impl PlanArgs {
    fn plan(&self) -> ScenarioPlan {
        ScenarioPlan {
            time_horizon_months: self.months,
            monthly_budget: self.budget,
            validation_window_weeks: self.validation_weeks,
            outputs_per_week: self.outputs_per_week,
            max_loss: self.max_loss,
            success_bar: self.success_bar,
            constraint_tolerance_pct: self.tolerance_pct,
        }
    }
}

impl DecisionArgs {
    fn request(&self, plan: Option<ScenarioPlan>) -> Result<DecisionRequest> {
        let input = DecisionInput {
            current_state: self.state.clone(),
            resources: self.resources.clone(),
            constraints: self.constraints.clone(),
            plan,
            ..DecisionInput::new(self.scenario.clone())
        };
        let mut request = DecisionRequest::new(input);
        if let Some(raw) = &self.calm {
            let answers: CalmnessAnswers = raw.parse()?;
            request = request.with_calmness(answers);
        }
        Ok(request)
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    if let Command::InitConfig { force } = cli.command {
        return cmd_init_config(&cli.config, force);
    }
    let cfg = load_config(&cli.config)?
        .with_env_overrides(|name| std::env::var(name).ok())
        .context("apply environment overrides")?;
    match cli.command {
        Command::Run(args) => cmd_run(&cfg, &args),
        Command::Expand { decision, plan } => cmd_expand(&cfg, &decision, &plan),
        Command::Rescore { record, json } => cmd_rescore(&record, json),
        Command::Report { record, out } => cmd_report(&record, out.as_deref()),
        Command::Sessions { limit } => cmd_sessions(&cfg, limit),
        Command::InitConfig { .. } => Ok(exit_codes::OK),
    }
}

fn cmd_run(cfg: &DeciderConfig, args: &DecisionArgs) -> Result<i32> {
    let request = args.request(None)?;
    let backend = select_backend(cfg)?;
    let outcome = run_decision(backend.as_ref(), cfg.prompt_budget_bytes, request)?;
    let record = persist(cfg, args, &outcome.context, args.report.as_deref())?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome.context).context("serialize context")?
        );
    } else {
        print_outcome(&outcome, record.as_deref());
    }
    Ok(outcome_code(&outcome))
}

fn cmd_expand(cfg: &DeciderConfig, args: &DecisionArgs, plan: &PlanArgs) -> Result<i32> {
    let request = args.request(Some(plan.plan()))?;
    let backend = select_backend(cfg)?;
    let expansion = expand_and_run(backend.as_ref(), cfg.prompt_budget_bytes, request)?;

    let mut code = exit_codes::OK;
    for run in &expansion.runs {
        let report = args
            .report
            .as_deref()
            .map(|path| variant_report_path(path, run.kind.as_str()));
        let record = persist(cfg, args, &run.outcome.context, report.as_deref())?;
        if !args.json {
            println!("== {} ==", run.kind);
            print_outcome(&run.outcome, record.as_deref());
        }
        if !run.outcome.is_done() {
            code = exit_codes::FAILED;
        }
    }
    if args.json {
        let contexts: Vec<&DecisionContext> =
            expansion.runs.iter().map(|run| &run.outcome.context).collect();
        let payload = serde_json::json!({
            "runs": contexts,
            "comparison": expansion.comparison,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("serialize expansion")?
        );
    } else {
        print_comparison(&expansion);
    }
    Ok(code)
}

fn cmd_rescore(record: &Path, json: bool) -> Result<i32> {
    let value = load_record_value(record)?;
    let index = score_record(&value).with_context(|| format!("rescore {}", record.display()))?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&index).context("serialize decision index")?
        );
    } else {
        print_index(&index);
    }
    Ok(exit_codes::OK)
}

fn cmd_report(record: &Path, out: Option<&Path>) -> Result<i32> {
    let ctx = load_record(record)?;
    match out {
        Some(path) => export_report(&ctx, path)?,
        None => print!("{}", render_report(&ctx)?),
    }
    Ok(exit_codes::OK)
}

fn cmd_sessions(cfg: &DeciderConfig, limit: usize) -> Result<i32> {
    for entry in list_records(&cfg.sessions_dir, limit)? {
        println!("{}\t{}", entry.display_name, entry.path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &DeciderConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

/// Save the record and optional report for one run. Returns the record path when saved.
fn persist(
    cfg: &DeciderConfig,
    args: &DecisionArgs,
    ctx: &DecisionContext,
    report: Option<&Path>,
) -> Result<Option<PathBuf>> {
    if let Some(path) = report {
        export_report(ctx, path)?;
    }
    if args.no_save {
        return Ok(None);
    }
    write_record(&cfg.sessions_dir, ctx).map(Some)
}

/// `out/report.md` becomes `out/report.conservative.md` for a variant run.
fn variant_report_path(path: &Path, variant: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("report");
    let file_name = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}.{variant}.{ext}"),
        None => format!("{stem}.{variant}"),
    };
    path.with_file_name(file_name)
}

fn outcome_code(outcome: &PipelineOutcome) -> i32 {
    if outcome.is_done() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}

fn print_outcome(outcome: &PipelineOutcome, record: Option<&Path>) {
    let ctx = &outcome.context;
    println!("run {}: {}", ctx.meta().run_id, outcome.state.as_str());
    if let Some(failure) = ctx.failure() {
        println!("halted at {}: {}", failure.stage, failure.message);
    }
    for provenance in &ctx.meta().provenance {
        match &provenance.fallback_reason {
            Some(reason) => println!(
                "  {}: {} (fallback: {reason})",
                provenance.stage,
                provenance.provider.as_str()
            ),
            None => println!("  {}: {}", provenance.stage, provenance.provider.as_str()),
        }
    }
    if let Some(index) = &ctx.extra().decision_index {
        print_index(index);
    }
    if let Some(path) = record {
        println!("record: {}", path.display());
    }
}

fn print_index(index: &DecisionIndexResult) {
    println!(
        "decision index {}/100 (grade {}): {}",
        index.score, index.grade, index.recommendation
    );
    let subs = index.sub_scores;
    println!(
        "  feasibility {} | market {} | risk {} | resources {} | calmness {} ({})",
        subs.feasibility, subs.market, subs.risk, subs.resource, index.calm_score, index.calm_state
    );
    for prescription in &index.prescriptions {
        println!("  ! {prescription}");
    }
    for step in &index.next_steps {
        println!("  - [ ] {step}");
    }
}

fn print_comparison(expansion: &Expansion) {
    let Some(comparison) = &expansion.comparison else {
        println!("no comparison: not every variant completed");
        return;
    };
    println!("== comparison ==");
    for assessment in &comparison.assessments {
        println!(
            "  {}: {} -> {} (grade {}, risk {})",
            assessment.kind,
            assessment.score,
            assessment.adjusted_score,
            assessment.grade,
            assessment.risk_label
        );
    }
    println!(
        "recommended: {} (confidence {:.2})",
        comparison.recommended, comparison.confidence
    );
    for reason in &comparison.reasons {
        println!("  - {reason}");
    }
}
