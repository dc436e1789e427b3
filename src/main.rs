use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use healthtranslate::auth::StaticAuthenticator;
use healthtranslate::chat::{
    Capabilities, ChatSession, LifecycleEvent, Message, MessageId, MessageOrigin, NoticeLevel,
    SendOutcome, Sender, SessionEvent, TranslationGate, TranslationOutcome,
};
use healthtranslate::config::Config;
use healthtranslate::language::LanguageCode;
use healthtranslate::remote::HttpBackend;
use healthtranslate::speech::{PlaybackStatus, TerminalSynthesizer, Variant};

#[derive(Parser)]
#[command(name = "healthtranslate", version)]
#[command(about = "Cross-language chat with a care provider", long_about = None)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Translation service base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Language you write in (en, es, fr, ar, ur, zh, hi, pt)
    #[arg(long, global = true)]
    lang: Option<LanguageCode>,

    /// Signed-in username
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive chat session (default)
    Chat,
    /// List supported languages
    Languages,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if let Some(lang) = cli.lang {
        config.my_language = lang;
    }
    if let Some(user) = cli.user {
        config.username = Some(user);
    }
    init_logging(&config.log_filter);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => chat(config).await,
        Commands::Languages => {
            for lang in LanguageCode::all() {
                println!("{:<4} {}", lang.as_str(), lang.display_name());
            }
            Ok(())
        }
        Commands::Config => {
            if let Some(path) = cli.config.or_else(Config::default_path) {
                println!("# {}", path.display());
            }
            print!("{}", config.to_toml_masked()?);
            Ok(())
        }
    }
}

fn init_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

// ── REPL commands ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Say(String),
    Translate { id: MessageId, lang: LanguageCode },
    Play { id: MessageId, variant: Variant },
    Pause,
    Resume,
    Stop,
    Lang(LanguageCode),
    Mic,
    MicOff,
    History,
    Help,
    SignOut,
    Quit,
}

const HELP: &str = "\
  <text>                    send a message
  /translate <id> <lang>    translate message <id>
  /play <id> [lang]         read a message (or its translation) aloud; again to stop
  /pause  /resume  /stop    control playback
  /lang <lang>              change the language you write in
  /mic  /mic off            voice input
  /history                  show the thread with translations
  /signout  /quit";

fn parse_message_id(arg: Option<&str>) -> Result<MessageId, String> {
    let arg = arg.ok_or("missing message id")?;
    arg.trim_start_matches('#')
        .parse::<u64>()
        .map(MessageId)
        .map_err(|_| format!("not a message id: {arg}"))
}

fn parse_language(arg: Option<&str>) -> Result<LanguageCode, String> {
    let arg = arg.ok_or("missing language code")?;
    LanguageCode::from_str_code(arg).ok_or_else(|| format!("unsupported language: {arg}"))
}

fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let line = line.trim();
    if !line.starts_with('/') {
        return Ok(ReplCommand::Say(line.to_string()));
    }

    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let command = match command {
        "/translate" | "/t" => ReplCommand::Translate {
            id: parse_message_id(parts.next())?,
            lang: parse_language(parts.next())?,
        },
        "/play" | "/p" => {
            let id = parse_message_id(parts.next())?;
            let variant = match parts.next() {
                Some(code) => Variant::Translation(parse_language(Some(code))?),
                None => Variant::Original,
            };
            ReplCommand::Play { id, variant }
        }
        "/pause" => ReplCommand::Pause,
        "/resume" => ReplCommand::Resume,
        "/stop" => ReplCommand::Stop,
        "/lang" => ReplCommand::Lang(parse_language(parts.next())?),
        "/mic" => match parts.next() {
            Some("off") => ReplCommand::MicOff,
            _ => ReplCommand::Mic,
        },
        "/history" => ReplCommand::History,
        "/help" | "/?" => ReplCommand::Help,
        "/signout" => ReplCommand::SignOut,
        "/quit" | "/exit" => ReplCommand::Quit,
        other => return Err(format!("unknown command {other}; try /help")),
    };
    Ok(command)
}

// ── Rendering ─────────────────────────────────────────────────────

fn render_message(message: &Message) -> String {
    let tag = style(format!("#{}", message.id)).dim();
    let who = match message.sender {
        Sender::Me => style(message.author.clone()).green().bold(),
        Sender::Provider => style(message.author.clone()).blue().bold(),
        Sender::System if message.is_error => style(message.author.clone()).red().bold(),
        Sender::System => style(message.author.clone()).yellow().bold(),
    };
    let voice = if message.origin == MessageOrigin::Voice {
        " 🎤"
    } else {
        ""
    };
    format!(
        "{tag} {who} {}{voice}: {}",
        style(format!("[{}]", message.lang)).dim(),
        message.text
    )
}

fn render_translation(id: MessageId, lang: LanguageCode, text: &str) -> String {
    format!(
        "{} {} {}",
        style(format!("#{id}")).dim(),
        style(format!("→ {}", lang.display_name())).magenta(),
        text
    )
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            // Typed input is already on screen.
            SessionEvent::MessageAppended { message }
                if message.sender == Sender::Me && message.origin == MessageOrigin::Typed => {}
            SessionEvent::MessageAppended { message } => println!("{}", render_message(&message)),
            SessionEvent::TranslationAdded {
                message_id,
                lang,
                text,
            } => println!("{}", render_translation(message_id, lang, &text)),
            SessionEvent::PlaybackChanged { state } => {
                if state.status == PlaybackStatus::Paused {
                    println!("{}", style("⏸ paused").dim());
                }
            }
            SessionEvent::CaptureChanged { .. } => {}
            SessionEvent::Notice { level, text } => {
                let text = match level {
                    NoticeLevel::Info => style(text).cyan(),
                    NoticeLevel::Warning => style(text).yellow(),
                    NoticeLevel::Error => style(text).red(),
                };
                println!("{text}");
            }
            SessionEvent::Closed { .. } => break,
        }
    }
}

// ── Interactive session ───────────────────────────────────────────

enum Input {
    Line(String),
    Interrupted,
    Eof,
}

/// Read lines on a dedicated thread; rustyline blocks.
fn spawn_reader() -> Result<mpsc::UnboundedReceiver<Input>> {
    let mut editor = rustyline::DefaultEditor::new().context("Failed to open line editor")?;
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || loop {
        let input = match editor.readline("› ") {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(line.as_str());
                }
                Input::Line(line)
            }
            Err(ReadlineError::Interrupted) => Input::Interrupted,
            Err(ReadlineError::Eof) => Input::Eof,
            Err(e) => {
                tracing::error!(error = %e, "Line editor failed");
                Input::Eof
            }
        };
        let done = matches!(input, Input::Eof);
        if tx.send(input).is_err() || done {
            break;
        }
    });
    Ok(rx)
}

async fn chat(config: Config) -> Result<()> {
    let auth = StaticAuthenticator::new(config.username.as_deref());
    let backend = Arc::new(HttpBackend::new(&config).context("Failed to build HTTP client")?);
    let capabilities = Capabilities {
        recognizer: None,
        synthesizer: Some(Box::new(TerminalSynthesizer::new())),
    };
    let (session, channels) = ChatSession::open(&auth, backend, capabilities, config.my_language)
        .context("Set `username` in the config file, HEALTHTRANSLATE_USER, or --user")?;

    let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
    let pump = tokio::spawn(Arc::clone(&session).run(channels, lifecycle_rx));
    let printer = tokio::spawn(print_events(session.subscribe()));

    println!(
        "{} {} · writing in {} · {}",
        style("Healthcare Chat").bold(),
        style(&session.user().username).green(),
        session.my_language().display_name(),
        style(&config.api_url).dim()
    );
    println!("{}", style("Type /help for commands.").dim());
    for message in session.messages() {
        println!("{}", render_message(&message));
    }

    let mut lines = spawn_reader()?;
    let mut reason = LifecycleEvent::Disposed;
    while let Some(input) = lines.recv().await {
        let line = match input {
            Input::Line(line) => line,
            Input::Interrupted => {
                println!("{}", style("Interrupted. Type /quit to leave.").dim());
                continue;
            }
            Input::Eof => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", style(e).yellow());
                continue;
            }
        };
        match command {
            ReplCommand::SignOut => {
                reason = LifecycleEvent::SignOut;
                break;
            }
            ReplCommand::Quit => break,
            other => dispatch(&session, other),
        }
    }

    let _ = lifecycle_tx.send(reason);
    if let Err(e) = pump.await {
        tracing::warn!(error = %e, "Session event pump panicked");
    }
    let _ = printer.await;
    println!("{}", style("Session closed.").dim());
    Ok(())
}

/// Run one command. Remote work is spawned so the prompt stays responsive;
/// failures surface as session notices.
fn dispatch(session: &Arc<ChatSession>, command: ReplCommand) {
    match command {
        ReplCommand::Say(text) => {
            let session = Arc::clone(session);
            tokio::spawn(async move {
                match session.send_message(&text, MessageOrigin::Typed).await {
                    Ok(SendOutcome::Discarded { sent }) => {
                        tracing::debug!(message_id = %sent, "Reply discarded");
                    }
                    Ok(_) => {}
                    Err(e) => println!("{}", style(e).red()),
                }
            });
        }
        ReplCommand::Translate { id, lang } => {
            let session = Arc::clone(session);
            tokio::spawn(async move {
                match session.translate(id, lang).await {
                    Ok(TranslationOutcome::Skipped) => {
                        println!("{}", style(format!("No message #{id}")).yellow());
                    }
                    Ok(TranslationOutcome::NotRequested(TranslationGate::SameLanguage)) => {
                        println!(
                            "{}",
                            style(format!("#{id} is already in {}", lang.display_name())).dim()
                        );
                    }
                    Ok(TranslationOutcome::NotRequested(TranslationGate::Cached)) => {
                        if let Some(text) = session
                            .message(id)
                            .and_then(|m| m.translations.get(lang).map(str::to_string))
                        {
                            println!("{}", render_translation(id, lang, &text));
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(message_id = %id, error = %e, "Translation failed"),
                }
            });
        }
        ReplCommand::Play { id, variant } => {
            let session = Arc::clone(session);
            tokio::spawn(async move {
                if let Err(e) = session.play(id, variant).await {
                    tracing::debug!(message_id = %id, error = %e, "Playback request failed");
                }
            });
        }
        ReplCommand::Pause => {
            if !session.pause_playback() {
                println!("{}", style("Nothing is playing.").dim());
            }
        }
        ReplCommand::Resume => {
            if !session.resume_playback() {
                println!("{}", style("Nothing is paused.").dim());
            }
        }
        ReplCommand::Stop => session.stop_playback(),
        ReplCommand::Lang(lang) => {
            session.set_my_language(lang);
            println!("Writing in {}.", lang.display_name());
        }
        ReplCommand::Mic => {
            if let Err(e) = session.start_capture() {
                println!("{}", style(e).yellow());
            }
        }
        ReplCommand::MicOff => session.stop_capture(),
        ReplCommand::History => {
            for message in session.messages() {
                println!("{}", render_message(&message));
                for (lang, text) in message.translations.iter() {
                    println!("   {}", render_translation(message.id, lang, text));
                }
            }
        }
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::SignOut | ReplCommand::Quit => {}
    }
}
