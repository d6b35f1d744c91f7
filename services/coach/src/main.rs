use anyhow::{Context, Result};
use clap::Parser;
use jobmate_coach::archive::FileArchiver;
use jobmate_coach::config::Config;
use jobmate_coach::console::{self, ConsoleSpeechOutput, ConsoleView, UnavailableSpeechInput};
use jobmate_coach::prompt_loader::PromptSet;
use jobmate_coach::providers::Providers;
use jobmate_core::conversation::ConversationConfig;
use jobmate_core::driver::{Collaborators, SessionDriver, SessionHandle, SessionUpdate};
use jobmate_core::generator::Persona;
use jobmate_core::speech::VoiceSettings;
use std::io::BufRead;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Practice interviews and career coaching, one spoken turn at a time")]
struct Cli {
    /// Interviewer or coach style: behavioral, technical, pressure or open
    #[arg(long, default_value = "behavioral")]
    persona: Persona,

    /// Show answer hints while you think
    #[arg(long)]
    practice: bool,

    /// Print agent lines at once instead of typing them out
    #[arg(long)]
    no_auto_play: bool,

    /// Language hint for speech capture
    #[arg(long, default_value = "zh-CN")]
    language: String,
}

/// Forwards stdin lines to the session until EOF, then ends it. Runs on a
/// plain thread so a pending read never holds up shutdown.
fn spawn_stdin_reader(handle: SessionHandle) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Failed to read from stdin: {e}");
                    break;
                }
            };
            match console::parse_line(&line) {
                Ok(Some(input)) => {
                    if !handle.send(input) {
                        return;
                    }
                }
                Ok(None) => {}
                Err(message) => eprintln!("{message}"),
            }
        }
        handle.end();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Configuration loaded successfully. Starting JobMate coach...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();

    // --- 4. Load Prompts ---
    let prompts = PromptSet::load(&config.prompts_dir).context("Failed to load LLM prompts")?;
    tracing::info!("Loaded {} prompts successfully.", prompts.len());

    // --- 5. Initialize API Clients ---
    let providers = Providers::from_config(&config, prompts);
    let archiver = FileArchiver::new(&config.archive_dir).with_titles(providers.titles.clone());

    // --- 6. Session Setup ---
    let session_config = ConversationConfig::new(args.persona)
        .with_practice(args.practice)
        .with_auto_play(!args.no_auto_play)
        .with_language(args.language);

    let (driver, handle, mut updates) = SessionDriver::new(
        session_config,
        VoiceSettings::default(),
        Collaborators {
            speech_input: Box::new(UnavailableSpeechInput),
            speech_output: Box::new(ConsoleSpeechOutput::stdout().with_prefix(format!(
                "{}：",
                console::agent_label(args.persona)
            ))),
            generator: providers.generator,
            hints: providers.hints,
            archiver: Arc::new(archiver),
        },
    );

    println!("{}", console::HELP);

    let view_task = tokio::spawn(async move {
        let mut view = ConsoleView::new(args.persona);
        while let Some(update) = updates.recv().await {
            if let Some(text) = view.render(&update) {
                println!("{text}");
            }
            if update == SessionUpdate::Ended {
                break;
            }
        }
    });

    spawn_stdin_reader(handle.clone());
    let mut session = tokio::spawn(driver.run());

    let transcript = tokio::select! {
        result = &mut session => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received. Ending session...");
            handle.end();
            session.await?
        }
    };

    if let Err(e) = view_task.await {
        tracing::warn!("Console view task failed: {e:?}");
    }
    tracing::info!("Session finished with {} utterances.", transcript.len());
    Ok(())
}
