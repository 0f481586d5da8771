//! `grimoire tools` — Detect and execute tool calls for one message.

use grimoire_agent::{
    ConfirmationChannel, Outcome, TerminalConfirmation, Termination, ToolCallsResult,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{CmdResult, build_agent, build_catalog, event_logger, load_config, provider};

pub struct ToolsOptions {
    pub agent: Option<String>,
    pub confirm: bool,
    pub remote: Option<String>,
    pub json: bool,
    pub instructions: Option<PathBuf>,
    pub verbose: bool,
}

/// Where confirmation prompts are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptStream {
    Stdout,
    Stderr,
}

impl PromptStream {
    /// JSON output owns stdout.
    fn for_output(json: bool) -> Self {
        if json { Self::Stderr } else { Self::Stdout }
    }

    fn channel(self) -> Arc<dyn ConfirmationChannel> {
        match self {
            Self::Stdout => Arc::new(TerminalConfirmation::stdio()),
            Self::Stderr => Arc::new(TerminalConfirmation::stderr()),
        }
    }
}

pub async fn run(config: Option<&Path>, message: &str, options: ToolsOptions) -> CmdResult {
    let config = load_config(config)?;
    let catalog = build_catalog(&config, options.remote.as_deref()).await?;
    let mut npc = build_agent(&config, provider(&config), options.agent.as_deref(), false).await?;
    if let Some(path) = &options.instructions {
        npc.set_tools_system_instructions_from_file(path).await?;
    }
    if options.verbose {
        npc = npc.with_event_bus(event_logger());
    }

    let confirm = options.confirm || npc.profile().confirm_tools;
    let outcome = if confirm {
        let channel = PromptStream::for_output(options.json).channel();
        npc.detect_and_execute_tool_calls_with_confirmation(message, &catalog, channel)
            .await
    } else {
        npc.detect_and_execute_tool_calls(message, &catalog).await
    };

    let mut out = std::io::stdout().lock();
    match outcome {
        Ok(result) => report(&mut out, &result, options.json),
        Err(e) => {
            report(&mut out, e.partial(), options.json)?;
            Err(e.into())
        }
    }
}

fn report(out: &mut impl Write, result: &ToolCallsResult, json: bool) -> CmdResult {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(result)?)?;
        return Ok(());
    }

    writeln!(out)?;
    writeln!(out, "  Total calls: {}", result.total_calls)?;
    if result.unresolved() > 0 {
        writeln!(out, "  Unknown tools: {}", result.unresolved())?;
    }
    for (i, record) in result.records.iter().enumerate() {
        match &record.outcome {
            Outcome::Executed(output) => {
                writeln!(out, "  {}. {} executed: {output}", i + 1, record.tool_name)?
            }
            Outcome::Cancelled(reason) => {
                writeln!(out, "  {}. {} cancelled: {reason}", i + 1, record.tool_name)?
            }
        }
    }

    match result.termination {
        Termination::Answered => {
            writeln!(out, "  Final answer: {}", result.final_message.trim())?
        }
        Termination::Aborted => writeln!(out, "  Stopped without an answer.")?,
        Termination::Exhausted => writeln!(
            out,
            "  Gave up after {} rounds without an answer.",
            result.rounds
        )?,
    }
    writeln!(out)?;
    Ok(())
}
