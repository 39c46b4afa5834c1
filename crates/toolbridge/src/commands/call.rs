//! Call command - invokes one tool and prints its output.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::Style;
use serde_json::Value;
use toolbridge_mcp::ToolCallOutcome;

use super::Context;

/// Arguments for the call command.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Tool name
    pub tool: String,

    /// Arguments as a JSON object (default: {})
    #[arg(value_name = "ARGS_JSON")]
    pub args: Option<String>,
}

/// Parse the arguments string. Absent means an empty object.
fn parse_arguments(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value = serde_json::from_str(raw).context("tool arguments are not valid JSON")?;
    if !value.is_object() {
        bail!("tool arguments must be a JSON object, got: {}", raw);
    }
    Ok(value)
}

/// Run the call command.
///
/// A failed call prints the failure and returns an error so the process
/// exits non-zero.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(args.args.as_deref())?;
    let mut session = ctx.connect().await?;

    if session.tool(&args.tool).is_none() {
        tracing::warn!(tool = %args.tool, "tool not in the server's catalog");
    }

    let outcome = session.call_tool(&args.tool, arguments).await;
    if let Err(e) = session.close().await {
        tracing::debug!(error = %e, "error closing session");
    }

    match outcome {
        ToolCallOutcome::Completed(output) => {
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", output.render());
            }
            Ok(())
        }
        ToolCallOutcome::Failed(failure) => {
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&failure)?);
            } else {
                let red = Style::new().red();
                eprintln!("{} {}", red.apply_to("✗"), failure);
                if ctx.verbose
                    && let Some(content) = &failure.content
                {
                    eprintln!("{}", serde_json::to_string_pretty(content)?);
                }
            }
            bail!("tool call '{}' failed ({})", failure.tool, failure.kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(None).unwrap(), json!({}));
        assert_eq!(parse_arguments(Some("  ")).unwrap(), json!({}));
        assert_eq!(
            parse_arguments(Some(r#"{"name_pattern": "ORD%"}"#)).unwrap(),
            json!({"name_pattern": "ORD%"})
        );
    }

    #[test]
    fn test_parse_arguments_rejects_non_objects() {
        assert!(parse_arguments(Some("[1, 2]")).is_err());
        assert!(parse_arguments(Some("{not json")).is_err());
    }
}
