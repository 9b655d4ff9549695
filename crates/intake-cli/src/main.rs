mod logging;
mod wizard;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use intake_spec::age::Clock;
use intake_spec::visibility::resolve_visibility;
use intake_spec::{
    AnswerSet, Config, FieldKind, IntakeRecord, IntakeSession, SchemaSpec, SystemClock, ValidationResult,
    demo_answers, render_json, render_text,
};
use logging::{LogConfig, LogFormat, init_logging};
use tracing::{debug, info};
use wizard::{PromptContext, WizardPresenter, encode_hex, needs_override, parse_answer, parse_yes_no};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "DKA pathway intake validator",
    long_about = "Validates clinical intake answers for the DKA care pathway, runs a text wizard and builds intake records"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone, Debug)]
struct SourceArgs {
    /// Built-in schema name (msf, regional) or path to a schema JSON file.
    #[arg(long, value_name = "SCHEMA", default_value = "msf")]
    schema: String,
    /// Config JSON file; the built-in default config is used when omitted.
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DocumentKind {
    Config,
    Schema,
    Answers,
    Record,
}

#[derive(Subcommand)]
enum Command {
    /// Validate an answer set and report every step.
    Validate {
        /// Path to the answers JSON file.
        #[arg(long, value_name = "ANSWERS")]
        answers: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
        /// Report only this step.
        #[arg(long, value_name = "N")]
        step: Option<usize>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Build the intake record from a complete answer set.
    Record {
        #[arg(long, value_name = "ANSWERS")]
        answers: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
        /// Print the record as CBOR hex instead of JSON.
        #[arg(long)]
        cbor: bool,
    },
    /// Prompt for every field step by step in a text shell.
    Wizard {
        #[command(flatten)]
        source: SourceArgs,
        /// Optional JSON file with answers to start from.
        #[arg(long, value_name = "ANSWERS")]
        answers: Option<PathBuf>,
        /// Steps of this workflow are prompted.
        #[arg(long, default_value = "new")]
        workflow: String,
        /// Also print the finished record as JSON.
        #[arg(long)]
        record_json: bool,
    },
    /// Print the demo answer set for a schema.
    Demo {
        #[arg(long, value_name = "SCHEMA", default_value = "msf")]
        schema: String,
    },
    /// Print the JSON Schema of one of the documents the tool reads or writes.
    Schema {
        #[arg(long, value_enum)]
        kind: DocumentKind,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    init_logging(&LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format))?;
    match cli.command {
        Command::Validate {
            answers,
            source,
            step,
            format,
        } => run_validate(&answers, &source, step, format),
        Command::Record {
            answers,
            source,
            cbor,
        } => run_record(&answers, &source, cbor),
        Command::Wizard {
            source,
            answers,
            workflow,
            record_json,
        } => run_wizard(&source, answers.as_deref(), &workflow, record_json),
        Command::Demo { schema } => run_demo(&schema),
        Command::Schema { kind } => run_schema(kind),
    }
}

fn load_schema(source: &str) -> CliResult<SchemaSpec> {
    let path = Path::new(source);
    if path.is_file() {
        Ok(SchemaSpec::load(path)?)
    } else {
        Ok(SchemaSpec::builtin(source)?)
    }
}

fn open_session(source: &SourceArgs) -> CliResult<IntakeSession> {
    let schema = load_schema(&source.schema)?;
    let config = match &source.config {
        Some(path) => Config::load(path)?,
        None => Config::builtin()?,
    };
    debug!(schema = %schema.id, version = %schema.version, "session opened");
    Ok(IntakeSession::new(schema, config)?)
}

fn read_answers(path: &Path) -> CliResult<AnswerSet> {
    let contents = fs::read_to_string(path)?;
    Ok(AnswerSet::from_json(&contents)?)
}

fn run_validate(answers_path: &Path, source: &SourceArgs, step: Option<usize>, format: OutputFormat) -> CliResult<()> {
    let answers = read_answers(answers_path)?;
    let mut session = open_session(source)?;
    session.apply(&answers)?;

    let result = match step {
        Some(index) => {
            let report = session.validate_step(index)?;
            ValidationResult {
                schema_id: session.schema().id.clone(),
                schema_title: session.schema().title.clone(),
                valid: report.valid,
                steps: vec![report],
            }
        }
        None => session.report()?,
    };
    match format {
        OutputFormat::Text => {
            println!(
                "Validation result: {}",
                if result.valid { "valid" } else { "invalid" }
            );
            println!("{}", render_text(&result));
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&render_json(&result))?),
    }

    if result.valid {
        Ok(())
    } else {
        Err("validation failed".into())
    }
}

fn run_record(answers_path: &Path, source: &SourceArgs, cbor: bool) -> CliResult<()> {
    let answers = read_answers(answers_path)?;
    let mut session = open_session(source)?;
    session.apply(&answers)?;
    let record = session.record()?;
    info!(schema = %record.schema_id, "record built");
    if cbor {
        let bytes = record.to_cbor()?;
        println!("{}", encode_hex(&bytes));
    } else {
        println!("{}", record.to_json_pretty()?);
    }
    Ok(())
}

fn run_demo(schema: &str) -> CliResult<()> {
    let schema = load_schema(schema)?;
    let answers = demo_answers(&schema.id, SystemClock.now());
    println!("{}", serde_json::to_string_pretty(&answers)?);
    Ok(())
}

fn run_schema(kind: DocumentKind) -> CliResult<()> {
    let schema = match kind {
        DocumentKind::Config => schemars::schema_for!(Config),
        DocumentKind::Schema => schemars::schema_for!(SchemaSpec),
        DocumentKind::Answers => schemars::schema_for!(AnswerSet),
        DocumentKind::Record => schemars::schema_for!(IntakeRecord),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn run_wizard(source: &SourceArgs, answers_path: Option<&Path>, workflow: &str, record_json: bool) -> CliResult<()> {
    let mut session = open_session(source)?;
    if let Some(path) = answers_path {
        session.apply(&read_answers(path)?)?;
    }

    let mut presenter = WizardPresenter::new(record_json);
    presenter.show_header(session.schema());

    let steps: Vec<_> = session
        .schema()
        .steps
        .iter()
        .filter(|step| step.workflow.as_deref().is_none_or(|name| name == workflow))
        .cloned()
        .collect();
    if steps.is_empty() {
        return Err(format!("schema has no steps for workflow '{}'", workflow).into());
    }

    for (position, step) in steps.iter().enumerate() {
        presenter.show_step(step, position + 1, steps.len());
        loop {
            for (path, optional) in step_prompts(session.schema(), step.index) {
                prompt_field(&mut session, &presenter, &path, optional)?;
            }
            if session.step_is_valid(step.index)? {
                break;
            }
            presenter.show_step_errors(&session.validate_step(step.index)?);
        }
    }

    let record = session.record()?;
    presenter.show_completion(&record);
    Ok(())
}

/// Paths to prompt for a step: each field's children (gates and unit pickers) before the field.
fn step_prompts(schema: &SchemaSpec, step: usize) -> Vec<(String, bool)> {
    let mut prompts = Vec::new();
    for field in schema.fields_in_step(step) {
        let optional = field.optional_in_steps.contains(&step);
        for child in &field.children {
            prompts.push((format!("{}.{}", field.id, child.id), optional));
        }
        prompts.push((field.id.clone(), optional));
    }
    prompts
}

fn prompt_field(session: &mut IntakeSession, presenter: &WizardPresenter, path: &str, optional: bool) -> CliResult<()> {
    loop {
        let visibility = resolve_visibility(session.schema(), session.registry());
        if !visibility.get(path).copied().unwrap_or(true) {
            session.validate(path, optional)?;
            return Ok(());
        }

        let prompt = PromptContext::new(session, path)?;
        presenter.show_prompt(&prompt);
        let raw = prompt_line(">", prompt.current.as_deref())?;
        if raw.trim().eq_ignore_ascii_case("exit") {
            return Err("wizard aborted by user".into());
        }
        let value = match parse_answer(&prompt, &raw) {
            Ok(value) => value,
            Err(err) => {
                presenter.show_parse_error(&err);
                continue;
            }
        };

        session.set_value(path, value)?;
        if session.validate(path, optional)? {
            return Ok(());
        }
        presenter.show_errors(session.node(path)?);
        if needs_override(session.node(path)?) && resolve_safety(session, presenter, path)? {
            return Ok(());
        }
    }
}

/// Offers the override workflow for a value outside its safety window.
fn resolve_safety(session: &mut IntakeSession, presenter: &WizardPresenter, path: &str) -> CliResult<bool> {
    let require_confirmation = match session.schema().field(path).map(|field| &field.kind) {
        Some(FieldKind::Number(number)) => number
            .safety
            .as_ref()
            .is_some_and(|safety| safety.require_confirmation),
        _ => false,
    };
    let above_upper = match session.safety(path)?.range {
        Some(range) => session
            .value(path)?
            .as_number()
            .filter(|value| *value > range.upper_2dp())
            .map(|_| range.upper_2dp()),
        None => None,
    };

    if prompt_bool("Keep this value outside the expected range?", false)? {
        session.set_override(path, true)?;
        if require_confirmation {
            let confirmed = prompt_bool("Confirm the override for the audit record?", false)?;
            session.confirm_override(path, confirmed)?;
        }
    } else if let Some(upper) = above_upper
        && prompt_bool(&format!("Use the upper limit ({}) instead?", upper), true)?
    {
        session.adopt_upper_bound(path)?;
    }

    let valid = session.validate(path, false)?;
    if !valid {
        presenter.show_errors(session.node(path)?);
    }
    Ok(valid)
}

fn prompt_line(prompt: &str, default: Option<&str>) -> CliResult<String> {
    if let Some(default_value) = default {
        print!("{} [{}]: ", prompt, default_value);
    } else {
        print!("{} ", prompt);
    }
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Err("input closed before the intake was complete".into());
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Ok(default.map(str::to_string).unwrap_or_default())
    } else {
        Ok(trimmed.to_string())
    }
}

fn prompt_bool(prompt: &str, default: bool) -> CliResult<bool> {
    let prompt_text = format!("{} (y/n)", prompt.trim());
    let default_hint = if default { "Y" } else { "N" };
    loop {
        let line = prompt_line(&prompt_text, Some(default_hint))?;
        match parse_yes_no(&line) {
            Some(answer) => return Ok(answer),
            None => println!("Invalid answer '{}'. Expected yes or no.", line),
        }
    }
}
