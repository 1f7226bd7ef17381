//! CLI output formatting

use console::Emoji;
use indexmap::IndexMap;

use crate::core::class::StepClass;
use crate::core::state::RunPhase;
use crate::core::value::Value;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

const RULE_WIDTH: usize = 70;

/// A header and message framed by horizontal rules, message indented
pub fn format_important_message(header: &str, message: &str) -> String {
    let rule = "-".repeat(RULE_WIDTH);
    let body: Vec<String> = message.lines().map(|line| format!("    {}", line)).collect();
    format!("{}\n{}\n{}\n{}", rule, style(header).bold(), body.join("\n"), rule)
}

pub fn print_important_message(header: &str, message: &str) {
    eprintln!("{}", format_important_message(header, message));
}

/// Format a run phase for display
pub fn format_phase(phase: RunPhase) -> String {
    let name = phase.to_string();
    match phase {
        RunPhase::Done => style(name).green().to_string(),
        RunPhase::Failed => style(name).red().to_string(),
        RunPhase::Skipped => style(name).dim().to_string(),
        RunPhase::Created => style(name).dim().to_string(),
        _ => style(name).yellow().to_string(),
    }
}

/// One line describing a registered class
pub fn format_class_line(class: &StepClass) -> String {
    let mut line = format!("{}", style(class.name).bold());
    if let Some(base) = class.base {
        line.push_str(&format!(" ({})", style(base.name).dim()));
    }
    if let Some(alias) = class.class_alias {
        line.push_str(&format!(" alias {}", style(alias).cyan()));
    }
    if !class.step_defs.is_empty() {
        let names: Vec<&str> = class.step_defs.iter().map(|def| def.name).collect();
        line.push_str(&format!(" steps: {}", names.join(", ")));
    }
    line
}

/// Parameters as YAML, with Python-style literals
pub fn format_pars_yaml(pars: &IndexMap<String, Value>) -> String {
    let text = serde_yaml::to_string(&Value::Map(pars.clone()).to_yaml()).unwrap_or_default();
    text.lines()
        .map(|line| {
            line.replace(": false", ": False")
                .replace(": true", ": True")
                .replace(": null", ": None")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
