//! CLI commands: `chat` against a live server, `decode` for captured bodies

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use futures::StreamExt;

use crate::config::Config;
use crate::llm::{
    self, collect_turn, detect_mode, DecodeOptions, LlmResponse, Message, MessageFragment,
    ResponseMode, ResponseStream, SessionUsage, ThinkingEffort, TokenUsage,
};

/// Overrides for `loam chat`, applied on top of the config file
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub no_stream: bool,
    pub thinking: Option<ThinkingEffort>,
    pub no_tags: bool,
}

impl ChatOptions {
    pub fn apply(&self, config: &mut Config) {
        let provider = &mut config.provider;
        if let Some(model) = &self.model {
            provider.model = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            provider.base_url = base_url.clone();
        }
        if self.no_stream {
            provider.stream = false;
        }
        if let Some(effort) = self.thinking {
            provider.thinking = Some(effort);
        }
        if self.no_tags {
            provider.embedded_tags = false;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Thinking,
    Text,
    Tool,
}

/// Writes a fragment sequence as a human-readable transcript
///
/// Thinking is dimmed, tool calls get their own line, argument fragments are
/// appended where they arrive.
pub struct TranscriptRenderer<W: Write> {
    out: W,
    section: Option<Section>,
}

impl<W: Write> TranscriptRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, section: None }
    }

    pub fn render(&mut self, fragment: &MessageFragment) -> io::Result<()> {
        match fragment {
            MessageFragment::Think { think } => {
                self.enter(Section::Thinking)?;
                write!(self.out, "{}", think.dimmed())?;
            }
            MessageFragment::Text { text } => {
                self.enter(Section::Text)?;
                write!(self.out, "{}", text)?;
            }
            MessageFragment::ToolCall {
                name, arguments, ..
            } => {
                if self.section == Some(Section::Tool) {
                    writeln!(self.out)?;
                }
                self.enter(Section::Tool)?;
                write!(
                    self.out,
                    "{} {} {}",
                    "tool".cyan().bold(),
                    name.bold(),
                    arguments
                )?;
            }
            MessageFragment::ToolCallArguments { delta, .. } => {
                write!(self.out, "{}", delta)?;
            }
        }
        self.out.flush()
    }

    fn enter(&mut self, section: Section) -> io::Result<()> {
        if self.section == Some(section) {
            return Ok(());
        }
        if self.section.is_some() {
            writeln!(self.out)?;
        }
        if section == Section::Thinking {
            writeln!(self.out, "{}", "[thinking]".dimmed().italic())?;
        }
        self.section = Some(section);
        Ok(())
    }

    /// Terminate the last line
    pub fn finish(&mut self) -> io::Result<()> {
        if self.section.take().is_some() {
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn format_usage(usage: Option<&TokenUsage>, session: &SessionUsage) -> String {
    let turn = match usage {
        Some(u) => format!("{} in / {} out", u.input_tokens, u.output_tokens),
        None => "no usage reported".to_string(),
    };
    format!(
        "tokens: {} (session: {} turns, {} total)",
        turn,
        session.turns,
        session.total_tokens()
    )
}

/// Run chat: one-shot when `message` is given, interactive otherwise
pub async fn run_chat(message: Option<String>, options: ChatOptions) -> Result<()> {
    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable config: {:#}", e);
        Config::default()
    });
    options.apply(&mut config);

    let provider = llm::create_provider(&config)?;
    tracing::debug!(params = %provider.model_parameters(), "Provider ready");

    let system_prompt = config.agent.system_prompt.clone();
    let mut history: Vec<Message> = Vec::new();
    let mut session = SessionUsage::new();

    if let Some(msg) = message {
        history.push(Message::user(msg));
        chat_turn(provider.as_ref(), &system_prompt, &mut history, &mut session).await?;
        return Ok(());
    }

    println!("loam chat ({} via {})", provider.model_name(), provider.name());
    println!("Type 'exit' or 'quit' to exit, 'clear' to clear history\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "exit" | "quit" => {
                println!("Goodbye!");
                break;
            }
            "clear" => {
                history.clear();
                println!("Conversation cleared.\n");
                continue;
            }
            _ => {}
        }

        history.push(Message::user(input));
        if let Err(e) = chat_turn(provider.as_ref(), &system_prompt, &mut history, &mut session).await
        {
            eprintln!("{} {:#}\n", "Error:".red().bold(), e);
            history.pop();
        }
    }

    Ok(())
}

async fn chat_turn(
    provider: &dyn llm::ChatProvider,
    system_prompt: &str,
    history: &mut Vec<Message>,
    session: &mut SessionUsage,
) -> Result<()> {
    let stream = provider.generate(system_prompt, &[], history).await?;

    let mut renderer = TranscriptRenderer::new(io::stdout());
    let mut render_error = None;
    let result = collect_turn(stream, |fragment| {
        if let Err(e) = renderer.render(fragment) {
            render_error.get_or_insert(e);
        }
    })
    .await;
    renderer.finish()?;
    if let Some(e) = render_error {
        return Err(e).context("Failed to write transcript");
    }

    let (response, _thinking) = result?;
    session.record(response.usage());
    println!(
        "{}",
        format_usage(response.usage(), session).dimmed()
    );

    if let Some(text) = response.text().filter(|t| !t.trim().is_empty()) {
        history.push(Message::assistant(text));
    }
    report_tool_calls(&response);
    Ok(())
}

fn report_tool_calls(response: &LlmResponse) {
    for call in response.tool_calls() {
        if call.parsed_arguments().is_none() {
            tracing::warn!(
                "Tool call {} ({}) has arguments that are not valid JSON",
                call.name,
                call.id
            );
        }
    }
}

/// Options for `loam decode`
#[derive(Debug, Clone)]
pub struct DecodeArgs {
    pub file: PathBuf,
    /// Treat the file as one complete JSON body even if it looks like SSE
    pub complete: bool,
    pub no_tags: bool,
    /// Print fragments as JSON lines instead of a transcript
    pub json: bool,
}

/// Decode a captured response body offline
pub async fn run_decode(args: DecodeArgs) -> Result<()> {
    let body = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let mode = if args.complete {
        ResponseMode::Complete
    } else {
        detect_mode(&body)
    };
    tracing::debug!(bytes = body.len(), mode = ?mode, "Decoding captured response");

    let options = DecodeOptions {
        embedded_tags: !args.no_tags,
    };
    let stream = ResponseStream::from_body(body, mode, options);
    let stdout = io::stdout();
    decode_to(stream, args.json, stdout.lock()).await
}

/// Drain `stream` into `out`, as a transcript or as JSON lines
pub async fn decode_to<W: Write>(mut stream: ResponseStream, json: bool, out: W) -> Result<()> {
    let mut renderer = TranscriptRenderer::new(out);

    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        if json {
            writeln!(renderer.out, "{}", serde_json::to_string(&fragment)?)?;
        } else {
            renderer.render(&fragment)?;
        }
    }
    renderer.finish()?;

    let mut out = renderer.into_inner();
    let summary = serde_json::json!({
        "id": stream.id(),
        "usage": stream.usage(),
    });
    if json {
        writeln!(out, "{}", summary)?;
    } else {
        let mut session = SessionUsage::new();
        session.record(stream.usage());
        writeln!(
            out,
            "{}",
            format!(
                "id: {} | {}",
                stream.id().unwrap_or("-"),
                format_usage(stream.usage(), &session)
            )
            .dimmed()
        )?;
    }
    Ok(())
}
