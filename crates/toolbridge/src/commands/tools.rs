//! Tools command - lists the tools a server offers.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;
use toolbridge_mcp::ToolDescriptor;

use super::Context;

/// Arguments for the tools command.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Include each tool's full input schema
    #[arg(long)]
    pub full: bool,
}

/// Compact tool listing for JSON output.
#[derive(Debug, Serialize)]
struct ToolSummary<'a> {
    name: &'a str,
    description: &'a str,
    parameters: Vec<Parameter>,
}

#[derive(Debug, Serialize)]
struct Parameter {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

impl<'a> From<&'a ToolDescriptor> for ToolSummary<'a> {
    fn from(tool: &'a ToolDescriptor) -> Self {
        Self {
            name: &tool.name,
            description: &tool.description,
            parameters: tool
                .parameters()
                .into_iter()
                .map(|(name, ty)| Parameter { name, ty })
                .collect(),
        }
    }
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let mut session = ctx.connect().await?;
    let tools = session.tools().to_vec();
    let server = session.server_info().cloned();
    session.close().await?;

    if ctx.json_output {
        let output = if args.full {
            serde_json::to_string_pretty(&tools)?
        } else {
            let summaries: Vec<ToolSummary<'_>> = tools.iter().map(ToolSummary::from).collect();
            serde_json::to_string_pretty(&summaries)?
        };
        println!("{}", output);
        return Ok(());
    }

    let dim = Style::new().dim();
    let cyan = Style::new().cyan();

    println!();
    match &server {
        Some(info) => println!(
            "{} {}",
            style(&info.name).bold(),
            dim.apply_to(format!("v{}", info.version))
        ),
        None => println!("{}", style("Tool server").bold()),
    }
    println!("{}", dim.apply_to("─".repeat(40)));

    if tools.is_empty() {
        println!();
        println!("  {}", dim.apply_to("(no tools)"));
    }

    for tool in &tools {
        println!();
        println!("  {}", cyan.apply_to(&tool.name));
        if !tool.description.is_empty() {
            println!("    {}", tool.description);
        }
        for (name, ty) in tool.parameters() {
            println!("    {} {}", dim.apply_to(format!("{name}:")), ty);
        }
        if args.full {
            let schema = serde_json::to_string_pretty(&tool.input_schema)?;
            for line in schema.lines() {
                println!("    {}", dim.apply_to(line));
            }
        }
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_lists_parameters() {
        let tool = ToolDescriptor {
            name: "search_tables_by_name".to_string(),
            description: "Find tables".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"name_pattern": {"type": "string"}}
            }),
        };
        let summary = serde_json::to_value(ToolSummary::from(&tool)).unwrap();
        assert_eq!(
            summary,
            json!({
                "name": "search_tables_by_name",
                "description": "Find tables",
                "parameters": [{"name": "name_pattern", "type": "string"}]
            })
        );
    }
}
