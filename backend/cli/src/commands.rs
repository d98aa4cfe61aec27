//! Subcommand implementations.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parley_config::ParleyConfig;
use parley_core::{ChatMessage, ConversationContext, ScriptedGateway, StreamChunk, ToolParameters};
use parley_plugins::{PluginManager, TurnOutcome, TurnRunner};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::terminal_output::{note_warn, paint, render_table, state_badge, stream_write, Column, DIM};

/// `parley plugins`
pub async fn list_plugins(manager: &PluginManager) -> Result<()> {
    let mut plugins = manager.get_loaded_plugins().await;
    plugins.extend(manager.failed_plugins().await);

    let columns = [
        Column::left("Plugin"),
        Column::left("Version"),
        Column::left("State"),
        Column::right("Tools"),
        Column::left("Notes"),
    ];
    let rows: Vec<Vec<String>> = plugins
        .iter()
        .map(|p| {
            vec![
                p.id.clone(),
                p.version.clone(),
                state_badge(p.state),
                p.tools.len().to_string(),
                p.error.clone().unwrap_or_else(|| p.description.clone()),
            ]
        })
        .collect();
    print!("{}", render_table(&columns, &rows));

    let tools = manager.list_tools().await;
    if !tools.is_empty() {
        println!();
        for tool in tools {
            println!(
                "  {}.{}  {}",
                tool.plugin_id,
                tool.definition.name,
                paint(DIM, &tool.definition.description)
            );
        }
    }
    Ok(())
}

/// `parley chat <text>`: one turn through the echo gateway.
pub async fn chat(manager: Arc<PluginManager>, config: &ParleyConfig, text: String) -> Result<()> {
    let runner = TurnRunner::new(manager.clone(), Arc::new(ScriptedGateway::echo()), config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel::<StreamChunk>(config.relay.buffer_chunks.max(1));
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(chunk) = rx.recv().await {
            if stream_write(&mut stdout, &chunk.delta).is_err() {
                break;
            }
        }
    });

    let mut ctx = ConversationContext::new(Uuid::new_v4()).with_cancellation(cancel);
    let outcome = runner.run(ChatMessage::user(text), &mut ctx, &tx).await;
    drop(tx);
    printer.await.context("stream printer task failed")?;
    println!();

    match outcome? {
        TurnOutcome::Completed { reply, metadata } => {
            if reply.content.is_empty() {
                note_warn("empty reply");
            }
            info!(keys = metadata.len(), "Turn metadata collected");
            let actions = manager.get_message_actions(&reply).await;
            for action in actions.iter().filter(|a| !a.label.is_empty()) {
                println!("  [{}] {}", action.plugin_id, action.label);
            }
        }
        TurnOutcome::Cancelled { partial } => {
            note_warn(&format!("turn cancelled after {} characters", partial.chars().count()));
        }
    }
    std::io::stdout().flush()?;
    Ok(())
}

/// `parley tool <plugin> <tool> -p key=value ...`
pub async fn run_tool(manager: &PluginManager, plugin: &str, tool: &str, raw_params: &[String]) -> Result<()> {
    let params = parse_params(raw_params)?;
    let result = manager
        .execute_tool(plugin, tool, &params, &CancellationToken::new())
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        bail!("tool {plugin}.{tool} failed");
    }
    Ok(())
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type;
/// anything else is taken as a string.
pub fn parse_params(raw: &[String]) -> Result<ToolParameters> {
    let mut params = ToolParameters::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("parameter '{pair}' is not in key=value form");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("parameter '{pair}' has an empty key");
        }
        let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_typed_params() {
        let params = parse_params(&[
            "text=hello world".to_string(),
            "limit=5".to_string(),
            "exact=true".to_string(),
            "case=\"title\"".to_string(),
        ])
        .unwrap();
        assert_eq!(params["text"], json!("hello world"));
        assert_eq!(params["limit"], json!(5));
        assert_eq!(params["exact"], json!(true));
        assert_eq!(params["case"], json!("title"));
    }

    #[test]
    fn rejects_malformed_params() {
        assert!(parse_params(&["novalue".to_string()]).is_err());
        assert!(parse_params(&["=x".to_string()]).is_err());
    }
}
