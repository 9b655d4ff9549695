use std::fmt::Write;

use intake_spec::{
    ErrorKind, FieldKind, FieldNode, FieldValue, IntakeRecord, IntakeSession, SchemaSpec, StepReport,
    StepSpec,
};

/// Prints prompts, step banners and results while the wizard walks the steps.
pub struct WizardPresenter {
    header_printed: bool,
    show_record_json: bool,
}

impl WizardPresenter {
    pub fn new(show_record_json: bool) -> Self {
        Self {
            header_printed: false,
            show_record_json,
        }
    }

    pub fn show_header(&mut self, schema: &SchemaSpec) {
        if self.header_printed {
            return;
        }
        println!("Intake: {} (v{})", schema.title, schema.version);
        if let Some(description) = &schema.description {
            println!("{}", description);
        }
        println!("Type 'exit' to abort. Press enter to keep the value in brackets.");
        self.header_printed = true;
    }

    pub fn show_step(&self, step: &StepSpec, position: usize, total: usize) {
        println!();
        println!("Step {}/{}: {}", position, total, step.title);
    }

    pub fn show_prompt(&self, prompt: &PromptContext) {
        let mut line = prompt.title.clone();
        if prompt.required {
            line.push_str(" *");
        }
        if let Some(hint) = &prompt.hint {
            line.push(' ');
            line.push_str(hint);
        }
        println!("{}", line);
        if let Some(description) = &prompt.description {
            println!("{}", description);
        }
    }

    pub fn show_errors(&self, node: &FieldNode) {
        for error in &node.errors {
            eprintln!("  {}", error.message);
        }
    }

    pub fn show_step_errors(&self, report: &StepReport) {
        println!("Step '{}' still has invalid answers:", report.title);
        for field in report.fields.iter().filter(|field| !field.valid) {
            for error in &field.errors {
                println!("  {} - {}", field.path, error.message);
            }
        }
    }

    pub fn show_parse_error(&self, error: &AnswerParseError) {
        eprintln!("Invalid answer: {}", error.user_message);
        if let Some(debug) = &error.debug_message {
            eprintln!("  Expected: {}", debug);
        }
    }

    pub fn show_completion(&self, record: &IntakeRecord) {
        println!("Done ✅");
        match record.to_cbor() {
            Ok(bytes) => {
                println!("Record (CBOR hex): {}", encode_hex(&bytes));
            }
            Err(err) => {
                eprintln!("Failed to serialize record to CBOR: {}", err);
            }
        }
        if self.show_record_json {
            match record.to_json_pretty() {
                Ok(pretty) => println!("{}", pretty),
                Err(err) => {
                    eprintln!("Failed to serialize record to JSON: {}", err);
                }
            }
        }
    }
}

/// Context used to format a single prompt.
pub struct PromptContext {
    pub path: String,
    pub title: String,
    pub description: Option<String>,
    pub required: bool,
    pub hint: Option<String>,
    pub kind: PromptKind,
    pub choices: Vec<String>,
    /// Current value, offered as the default answer.
    pub current: Option<String>,
}

impl PromptContext {
    pub fn new(session: &IntakeSession, path: &str) -> Result<Self, intake_spec::EngineError> {
        let spec = session
            .schema()
            .field(path)
            .ok_or_else(|| intake_spec::EngineError::UnknownField(path.to_string()))?;
        let node = session.node(path)?;
        let kind = PromptKind::from_field(&spec.kind);
        let bounds = session.bounds_for(path).unwrap_or_default();
        let hint = match &spec.kind {
            FieldKind::Number(number) => match (&bounds.min, &bounds.max) {
                (Some(min), Some(max)) => Some(format!("(number, {}–{}{})", min, max, number.units)),
                _ => Some("(number)".to_string()),
            },
            FieldKind::DateOfBirth(_) => Some("(YYYY-MM-DD)".to_string()),
            FieldKind::DateWindow(_) => match (&bounds.min, &bounds.max) {
                (Some(min), Some(max)) => Some(format!("(YYYY-MM-DDTHH:MM, {} to {})", min, max)),
                _ => Some("(YYYY-MM-DDTHH:MM)".to_string()),
            },
            FieldKind::Consent => Some("(yes/no)".to_string()),
            FieldKind::Select(_) if !node.options.is_empty() => Some(format!("({})", node.options.join("/"))),
            FieldKind::MultiSelect(_) if !node.options.is_empty() => {
                Some(format!("(comma-separated: {})", node.options.join("/")))
            }
            _ => None,
        };
        let current = match &node.value {
            FieldValue::List(items) if !items.is_empty() => Some(items.join(", ")),
            other => other.as_text().map(|text| text.into_owned()),
        };
        Ok(Self {
            path: path.to_string(),
            title: node.label.clone(),
            description: spec.info.clone(),
            required: spec.required,
            hint,
            kind,
            choices: node.options.clone(),
            current,
        })
    }
}

/// Input parsing strategy for a prompt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PromptKind {
    Number,
    Text,
    Choice,
    Choices,
    Consent,
}

impl PromptKind {
    fn from_field(kind: &FieldKind) -> Self {
        match kind {
            FieldKind::Number(_) => PromptKind::Number,
            FieldKind::Select(_) => PromptKind::Choice,
            FieldKind::MultiSelect(_) => PromptKind::Choices,
            FieldKind::Consent => PromptKind::Consent,
            FieldKind::Text(_) | FieldKind::DateOfBirth(_) | FieldKind::DateWindow(_) => PromptKind::Text,
        }
    }
}

/// Error produced when parsing answers from the user.
#[derive(Debug)]
pub struct AnswerParseError {
    pub user_message: String,
    pub debug_message: Option<String>,
}

impl AnswerParseError {
    pub fn new(user_message: impl Into<String>, debug_message: Option<String>) -> Self {
        Self {
            user_message: user_message.into(),
            debug_message,
        }
    }
}

/// Turns a typed line into a field value. Anything the engine can judge
/// (bad numbers, unknown options) is passed through for it to report.
pub fn parse_answer(prompt: &PromptContext, raw: &str) -> Result<FieldValue, AnswerParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(FieldValue::Null);
    }
    match prompt.kind {
        PromptKind::Number => Ok(trimmed
            .parse::<f64>()
            .map(FieldValue::Number)
            .unwrap_or_else(|_| FieldValue::Text(trimmed.to_string()))),
        PromptKind::Consent => parse_yes_no(trimmed).map(FieldValue::Bool).ok_or_else(|| {
            AnswerParseError::new(
                format!("'{}' is not a yes/no answer", trimmed),
                Some("yes/no, y/n, true/false".to_string()),
            )
        }),
        PromptKind::Choice => Ok(FieldValue::Text(match_choice(&prompt.choices, trimmed))),
        PromptKind::Choices => Ok(FieldValue::List(
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| match_choice(&prompt.choices, item))
                .collect(),
        )),
        PromptKind::Text => Ok(FieldValue::Text(trimmed.to_string())),
    }
}

/// Case-insensitive match against the offered options; `y`/`n` pick
/// `true`/`false` on availability questions.
fn match_choice(choices: &[String], raw: &str) -> String {
    if let Some(choice) = choices.iter().find(|choice| choice.eq_ignore_ascii_case(raw)) {
        return choice.clone();
    }
    let has_flags = choices.iter().any(|choice| choice == "true") && choices.iter().any(|choice| choice == "false");
    match parse_yes_no(raw) {
        Some(flag) if has_flags => flag.to_string(),
        _ => raw.to_string(),
    }
}

pub fn parse_yes_no(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "y" | "yes" | "true" => Some(true),
        "n" | "no" | "false" => Some(false),
        _ => None,
    }
}

/// True when the node failed only because of its safety window.
pub fn needs_override(node: &FieldNode) -> bool {
    !node.errors.is_empty() && node.errors.iter().all(|error| error.kind == ErrorKind::SafetyRange)
}

pub fn encode_hex(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut encoded, "{:02x}", byte);
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(kind: PromptKind, choices: &[&str]) -> PromptContext {
        PromptContext {
            path: "field".into(),
            title: "Field".into(),
            description: None,
            required: true,
            hint: None,
            kind,
            choices: choices.iter().map(|choice| choice.to_string()).collect(),
            current: None,
        }
    }

    #[test]
    fn numbers_parse_and_garbage_passes_through() {
        let number = prompt(PromptKind::Number, &[]);
        assert_eq!(parse_answer(&number, " 7.35 ").unwrap(), FieldValue::Number(7.35));
        assert_eq!(parse_answer(&number, "abc").unwrap(), FieldValue::from("abc"));
        assert_eq!(parse_answer(&number, "").unwrap(), FieldValue::Null);
    }

    #[test]
    fn availability_questions_accept_yes_no() {
        let gate = prompt(PromptKind::Choice, &["true", "false"]);
        assert_eq!(parse_answer(&gate, "y").unwrap(), FieldValue::from("true"));
        assert_eq!(parse_answer(&gate, "No").unwrap(), FieldValue::from("false"));

        let sex = prompt(PromptKind::Choice, &["male", "female"]);
        assert_eq!(parse_answer(&sex, "Female").unwrap(), FieldValue::from("female"));
        assert_eq!(parse_answer(&sex, "y").unwrap(), FieldValue::from("y"));
    }

    #[test]
    fn consent_rejects_unclear_answers() {
        let consent = prompt(PromptKind::Consent, &[]);
        assert_eq!(parse_answer(&consent, "yes").unwrap(), FieldValue::Bool(true));
        let err = parse_answer(&consent, "maybe").unwrap_err();
        assert!(err.user_message.contains("maybe"));
    }

    #[test]
    fn multi_select_splits_on_commas() {
        let factors = prompt(PromptKind::Choices, &["Missed insulin doses", "Intercurrent illness"]);
        assert_eq!(
            parse_answer(&factors, "missed insulin doses, Intercurrent illness,").unwrap(),
            FieldValue::List(vec!["Missed insulin doses".into(), "Intercurrent illness".into()])
        );
    }

    #[test]
    fn hex_encoding_is_lowercase() {
        assert_eq!(encode_hex(&[0x0a, 0xff]), "0aff");
    }
}
