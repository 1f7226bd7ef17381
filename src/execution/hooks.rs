//! Pre- and post-processing hooks
//!
//! Each entry of `pre_hooks`/`post_hooks` names either a registered step
//! class or a shell command. Commands are wrapped in a [`SYSTEM_CALL`] step.

use std::fmt;
use std::process::Command;
use tracing::{info, warn};

use crate::core::class::{StepBehavior, StepClass};
use crate::core::config::{validate, ConfigFragment};
use crate::core::context::StepContext;
use crate::core::data::StepData;
use crate::core::error::{ConfigError, StepError};
use crate::core::schema::{self, PathContext};
use crate::core::step::{Step, StepCore, STEP};
use crate::core::value::{Origin, Tagged, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Pre,
    Post,
}

impl HookKind {
    fn parameter(&self) -> &'static str {
        match self {
            HookKind::Pre => "pre_hooks",
            HookKind::Post => "post_hooks",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Pre => f.write_str("pre"),
            HookKind::Post => f.write_str("post"),
        }
    }
}

/// Build the hook steps declared on `core`, named `<kind>_hook<i>`
pub fn build_hooks(core: &StepCore, kind: HookKind) -> Result<Vec<Step>, ConfigError> {
    let entries = match kind {
        HookKind::Pre => core.pre_hooks(),
        HookKind::Post => core.post_hooks(),
    };

    let mut hooks = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let name = format!("{}_hook{}", kind, i);
        let class = resolve_hook_class(core, entry);

        let mut config = ConfigFragment::new();
        if std::ptr::eq(class, &SYSTEM_CALL) {
            config.insert_value("command", Tagged::new(Origin::Keyword, entry.as_str()));
        }
        let schema = schema::resolve(class)?;
        let validated = validate(&config, &schema, &PathContext::new(""))?;

        info!(
            step = %core.qualified_name(),
            "Adding {} hook {} for {}",
            kind,
            entry,
            kind.parameter()
        );
        hooks.push(Step::build(
            class,
            &name,
            Some(core.qualified_name()),
            None,
            &validated,
            core.services().clone(),
        )?);
    }
    Ok(hooks)
}

fn resolve_hook_class(core: &StepCore, entry: &str) -> &'static StepClass {
    let looks_like_class = !entry.trim().is_empty() && !entry.contains(char::is_whitespace);
    looks_like_class
        .then(|| core.services().registry.resolve(entry))
        .flatten()
        .unwrap_or(&SYSTEM_CALL)
}

const SYSTEM_CALL_SPEC: &str = r#"
    # SystemCall: runs a shell command
    command = string()  # Command to execute, `{0}` is replaced by the first argument
    env = string_list(default=list())  # Extra environment variables, as KEY=VALUE
    log_stdout = boolean(default=True)  # Log the command's standard output
    log_stderr = boolean(default=True)  # Log the command's standard error
    exit_status = integer(default=0)  # Expected exit status
    failure_as_exception = boolean(default=True)  # Fail when the exit status differs
"#;

/// Runs a shell command with the step arguments formatted into it
#[derive(Debug, Default)]
pub struct SystemCall;

fn system_call() -> Box<dyn StepBehavior> {
    Box::new(SystemCall)
}

pub static SYSTEM_CALL: StepClass =
    StepClass::new("SystemCall", Some(&STEP), system_call).with_spec(SYSTEM_CALL_SPEC);

/// Replace `{0}`, `{1}`, ... with the matching argument
pub fn format_command(template: &str, args: &[String]) -> String {
    let mut command = template.to_string();
    for (i, arg) in args.iter().enumerate() {
        command = command.replace(&format!("{{{}}}", i), arg);
    }
    command
}

impl StepBehavior for SystemCall {
    fn process(
        &mut self,
        cx: &mut StepContext<'_>,
        args: Vec<StepData>,
    ) -> Result<Option<StepData>, StepError> {
        let template = cx.param("command").and_then(Value::as_str).unwrap_or("").to_string();
        let output_ext = cx.core().output_ext().unwrap_or("").to_string();

        let mut arg_strings = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let rendered = match arg {
                StepData::Model(model) => {
                    let filename = format!("{}.{:04}{}", cx.qualified_name(), i, output_ext);
                    model.save(std::path::Path::new(&filename), true)?;
                    filename
                }
                StepData::Path(path) => path.display().to_string(),
                StepData::Value(value) => value.to_string(),
                other => other.filename().unwrap_or_default(),
            };
            arg_strings.push(rendered);
        }
        let command = format_command(&template, &arg_strings);

        let mut env = Vec::new();
        if let Some(entries) = cx.param("env").and_then(Value::as_list) {
            for entry in entries {
                let entry = entry.to_string();
                match entry.split_once('=') {
                    Some((key, value)) => env.push((key.to_string(), value.to_string())),
                    None => warn!(step = %cx.qualified_name(), "Ignoring environment entry {}", entry),
                }
            }
        }

        info!(step = %cx.qualified_name(), "Spawning '{}'", command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .envs(env)
            .output()
            .map_err(|source| StepError::CommandSpawn {
                command: command.clone(),
                source,
            })?;

        let flag = |key: &str| cx.param(key).and_then(Value::as_bool).unwrap_or(true);
        if flag("log_stdout") {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                info!(step = %cx.qualified_name(), "{}", line);
            }
        }
        if flag("log_stderr") {
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                warn!(step = %cx.qualified_name(), "{}", line);
            }
        }

        let status = output.status.code().unwrap_or(-1);
        let expected = cx.param("exit_status").and_then(Value::as_int).unwrap_or(0);
        info!(step = %cx.qualified_name(), "Command exited with status {}", status);
        if flag("failure_as_exception") && i64::from(status) != expected {
            return Err(StepError::CommandFailed {
                command,
                status,
                expected,
            });
        }
        Ok(None)
    }
}
