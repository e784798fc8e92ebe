use clap::Args;
use reqjob_core::{Context, Format};

use crate::output::OutputFormat;

#[derive(Debug, Args, Clone)]
pub struct OutputArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FormatHint {
    Yaml,
    Yml,
    Json,
}

impl From<FormatHint> for Format {
    fn from(hint: FormatHint) -> Self {
        match hint {
            FormatHint::Yaml | FormatHint::Yml => Format::Yaml,
            FormatHint::Json => Format::Json,
        }
    }
}

/// Where the profile comes from and what the expressions in it can see.
#[derive(Debug, Args, Clone)]
pub struct SourceArgs {
    /// Parse the profile as this format instead of guessing from the extension.
    #[arg(long, value_enum)]
    pub format_hint: Option<FormatHint>,
    /// Overrides an `env` entry of the profile and the process environment.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,
}

impl SourceArgs {
    pub fn format(&self) -> Option<Format> {
        self.format_hint.map(Format::from)
    }

    pub fn context(&self) -> Context {
        self.env
            .iter()
            .fold(Context::new(), |ctx, (k, v)| ctx.with_env(k.clone(), v.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EventsTarget {
    #[default]
    None,
    Stdout,
    Log,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
