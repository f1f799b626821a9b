use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Args, Parser, Subcommand};

use crate::app::AppController;
use crate::domain::{AppConfig, ChatMessage, DesignResource, DomainError, QuizLevel, QuizMode, UserFeedback};

/// Refyna - AI design review from the terminal
#[derive(Parser, Debug)]
#[command(name = "refyna")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    GEMINI_API_KEY       Generative model and realtime voice access (required)
    GROQ_API_KEY         Quiz fallback via Groq
    OPENAI_API_KEY       Quiz fallback via OpenAI
    ANTHROPIC_API_KEY    Quiz fallback via Anthropic
    RUST_LOG             Console log filter (overrides the configured level)
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Critique a design token or code snippet
    ReviewToken {
        /// Snippet to review
        #[arg(required_unless_present = "file")]
        code: Option<String>,
        /// Read the snippet from a file instead
        #[arg(long, conflicts_with = "code")]
        file: Option<PathBuf>,
    },
    /// Review a UI screenshot and list located issues
    ReviewImage {
        path: PathBuf,
        /// JSON array of earlier feedback ratings
        #[arg(long)]
        feedback: Option<PathBuf>,
    },
    /// One short design tip
    Tip {
        #[arg(default_value = "General UI design")]
        context: String,
    },
    /// Ask a question about a design
    Chat {
        message: String,
        /// Description of the design under review
        #[arg(long, default_value = "Continuing previous session...")]
        context: String,
        /// JSON array of earlier chat messages
        #[arg(long)]
        history: Option<PathBuf>,
        /// JSON array of earlier feedback ratings
        #[arg(long)]
        feedback: Option<PathBuf>,
    },
    /// Render a new design from a description
    Variant {
        prompt: String,
        /// 1K, 2K or 4K
        #[arg(long, default_value = "1K")]
        size: String,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Redesign an existing screenshot
    Improve {
        image: PathBuf,
        /// Area to focus on (repeatable)
        #[arg(long = "focus")]
        improvements: Vec<String>,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Summarize a guideline PDF and add it to the design resources
    Summarize {
        pdf: PathBuf,
        /// Tag for the stored resource (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Print the summary without storing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate a design quiz
    Quiz {
        #[arg(long, default_value = "fundamentals")]
        topic: String,
        #[arg(long, default_value = "beginner")]
        level: QuizLevel,
        #[arg(long, default_value = "blitz")]
        mode: QuizMode,
        #[arg(long, default_value_t = 5)]
        count: usize,
        /// Print questions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Talk to the design assistant with your microphone
    Voice {
        /// Prebuilt voice name
        #[arg(long)]
        voice: Option<String>,
        /// Screenshot to share once the session opens
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Show the stored configuration, or change it with flags
    Config {
        #[command(flatten)]
        changes: ConfigChanges,
    },
    /// Show configuration paths and the active model
    Paths,
}

/// Settings the `config` subcommand can change.
#[derive(Args, Debug, Default)]
pub struct ConfigChanges {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Default voice for live sessions
    #[arg(long)]
    pub voice: Option<String>,
    /// Model tried first before any call has succeeded
    #[arg(long)]
    pub default_model: Option<String>,
    /// Allow requests to this host (repeatable)
    #[arg(long = "allow-domain")]
    pub allow_domains: Vec<String>,
}

impl ConfigChanges {
    pub fn is_empty(&self) -> bool {
        self.log_level.is_none()
            && self.voice.is_none()
            && self.default_model.is_none()
            && self.allow_domains.is_empty()
    }

    /// Write the requested values into `config`.
    pub fn apply(self, config: &mut AppConfig) {
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(voice) = self.voice {
            config.realtime.voice = voice;
        }
        if let Some(model) = self.default_model {
            config.router.default_model = model;
        }
        for domain in self.allow_domains {
            if !config.network.allowed_domains.contains(&domain) {
                config.network.allowed_domains.push(domain);
            }
        }
    }
}

/// Execute one CLI command against the controller.
pub async fn run(controller: &AppController, command: Commands) -> Result<(), DomainError> {
    match command {
        Commands::ReviewToken { code, file } => {
            let code = match (code, file) {
                (Some(code), _) => code,
                (None, Some(path)) => fs::read_to_string(path)?,
                (None, None) => return Err(DomainError::InvalidRequest("nothing to review".to_string())),
            };
            println!("{}", controller.review().analyze_token(&code).await?);
        }
        Commands::ReviewImage { path, feedback } => {
            let feedback: Vec<UserFeedback> = read_json_or_default(feedback.as_deref())?;
            let analysis = controller
                .review()
                .analyze_image(mime_for(&path), &read_base64(&path)?, &feedback)
                .await?;
            println!("{}\n", analysis.text);
            for (idx, a) in analysis.annotations.iter().enumerate() {
                println!(
                    "{}. {} ({:.0}%)\n   {}\n   box: {:?}",
                    idx + 1,
                    a.label,
                    a.confidence_score,
                    a.suggestion,
                    a.box_2d
                );
            }
        }
        Commands::Tip { context } => {
            println!("💡 Quick Tip: {}", controller.review().quick_suggestion(&context).await?);
        }
        Commands::Chat {
            message,
            context,
            history,
            feedback,
        } => {
            let history: Vec<ChatMessage> = read_json_or_default(history.as_deref())?;
            let feedback: Vec<UserFeedback> = read_json_or_default(feedback.as_deref())?;
            let reply = controller
                .review()
                .chat(&history, &context, &feedback, &message)
                .await?;
            println!("{reply}");
        }
        Commands::Variant { prompt, size, out } => {
            let image = controller.review().generate_variant(&prompt, &size).await?;
            write_image(image, &out)?;
        }
        Commands::Improve {
            image,
            improvements,
            out,
        } => {
            let generated = controller
                .review()
                .improve_design(&read_base64(&image)?, &improvements)
                .await?;
            write_image(generated, &out)?;
        }
        Commands::Summarize { pdf, tags, dry_run } => {
            let name = pdf
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "resource.pdf".to_string());
            let summary = controller.review().analyze_resource(&read_base64(&pdf)?, &name).await?;
            println!("{summary}");
            if !dry_run {
                let mut resources = controller.review().resources();
                resources.retain(|r| r.name != name);
                resources.push(DesignResource {
                    name,
                    kind: "pdf".to_string(),
                    tags,
                    content: String::new(),
                    ai_analysis: Some(summary),
                });
                controller.save_resources(resources)?;
            }
        }
        Commands::Quiz {
            topic,
            level,
            mode,
            count,
            json,
        } => {
            let questions = controller.quiz().generate_quiz(&topic, level, mode, count).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&questions)?);
            } else {
                for (idx, q) in questions.iter().enumerate() {
                    println!("{}. {}", idx + 1, q.question);
                    for (opt, option) in q.options.iter().enumerate() {
                        let marker = if opt == q.correct_index { '*' } else { ' ' };
                        println!("   {marker} {}) {option}", (b'a' + opt as u8) as char);
                    }
                    println!("   {}\n", q.explanation);
                }
            }
        }
        Commands::Voice { voice, image } => voice_session(controller, voice, image).await?,
        Commands::Config { changes } => {
            let mut config = controller.config();
            if !changes.is_empty() {
                changes.apply(&mut config);
                controller.update_config(config.clone())?;
                println!("Saved {}", controller.config_path().display());
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Paths => {
            println!("config: {}", controller.config_path().display());
            println!("data:   {}", controller.data_dir().display());
            println!("logs:   {}", controller.logs_dir().display());
            println!("model:  {}", controller.router().sticky_model());
        }
    }
    Ok(())
}

fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(path: Option<&Path>) -> Result<T, DomainError> {
    match path {
        Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => Ok(T::default()),
    }
}

fn read_base64(path: &Path) -> Result<String, DomainError> {
    Ok(BASE64.encode(fs::read(path)?))
}

/// MIME type by file extension, JPEG when unknown.
pub fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => "image/jpeg",
    }
}

fn write_image(image: Option<crate::domain::InlineData>, out: &Path) -> Result<(), DomainError> {
    let Some(image) = image else {
        println!("The model did not return an image. Try again in a moment.");
        return Ok(());
    };
    fs::write(out, BASE64.decode(image.data.as_bytes())?)?;
    println!("Saved {} ({})", out.display(), image.mime_type);
    Ok(())
}

#[cfg(feature = "native-audio")]
async fn voice_session(
    controller: &AppController,
    voice: Option<String>,
    image: Option<PathBuf>,
) -> Result<(), DomainError> {
    use std::sync::Arc;

    use crate::adapters::{CpalCapture, CpalPlayback};
    use crate::app::{MessageCallback, StatusCallback};

    let session = controller.realtime_session(Arc::new(CpalCapture::new()?), Arc::new(CpalPlayback::new()?));
    let (closed_tx, mut closed_rx) = tokio::sync::mpsc::unbounded_channel();

    let on_message: MessageCallback = Arc::new(|text: &str, is_user: bool| {
        println!("{} {text}", if is_user { "you:" } else { "refyna:" });
    });
    let on_status: StatusCallback = Arc::new(move |open: bool| {
        if !open {
            let _ = closed_tx.send(());
        }
    });

    session.connect(on_message, on_status, voice.as_deref()).await?;
    if !session.state().is_open() {
        return Err(DomainError::Realtime("could not open the voice session".to_string()));
    }
    if let Some(path) = image {
        let data_url = format!("data:{};base64,{}", mime_for(&path), read_base64(&path)?);
        session.send_image(&data_url).await;
    }

    println!("Listening. Press Ctrl+C to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = closed_rx.recv() => println!("Session closed by the provider."),
    }
    session.disconnect().await;
    Ok(())
}

#[cfg(not(feature = "native-audio"))]
async fn voice_session(
    _controller: &AppController,
    _voice: Option<String>,
    _image: Option<PathBuf>,
) -> Result<(), DomainError> {
    Err(DomainError::AudioDevice {
        message: "this build has no audio support; rebuild with --features native-audio".to_string(),
    })
}
