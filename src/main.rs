use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use finguide::daemon::build_synthesizer;
use finguide::voice::{AudioSource, MicrophoneCapture, calculate_energy, play_mp3_blocking};
use finguide::{Config, Daemon};

/// `FinGuide` - financial advice assistant with memory and voice
#[derive(Parser)]
#[command(name = "finguide", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "FINGUIDE_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable the live voice loop (for headless servers without audio hardware)
    #[arg(long, global = true)]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Answer one prompt and print the reply
    Ask {
        /// The question
        prompt: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,finguide=info",
        1 => "info,finguide=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.disable_voice)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Ask { prompt } => ask(config, &prompt).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        port = config.server.port,
        voice = config.voice.enabled,
        model = %config.llm.model,
        "starting finguide"
    );

    let daemon = Daemon::new(config)?;
    if daemon.speech().is_none() {
        tracing::info!("finguide ready (text-only mode)");
    } else if daemon.config().voice.enabled {
        tracing::info!("finguide ready");
    } else {
        tracing::info!("finguide ready (live voice disabled)");
    }

    daemon.run().await?;
    Ok(())
}

/// Run a single text turn
async fn ask(config: Config, prompt: &str) -> anyhow::Result<()> {
    let daemon = Daemon::new(config)?;
    let answer = daemon.advisor().answer_text(prompt, None).await?;
    println!("{}", answer.response);
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = tokio::task::spawn_blocking(MicrophoneCapture::open).await??;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        let mut samples = Vec::new();
        let window = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(window);
        loop {
            tokio::select! {
                () = &mut window => break,
                frame = capture.next_frame() => match frame {
                    Some(frame) => samples.extend(frame),
                    None => anyhow::bail!("microphone stream ended"),
                },
            }
        }

        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    let dropped = capture.dropped_frames();
    drop(capture);

    println!("\n---");
    if dropped > 0 {
        println!("{dropped} frames were dropped while the meter was printing");
    }
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Synthesize `text` and play it locally
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = build_synthesizer(&config.voice, &config.api_keys)?;

    println!("Synthesizing speech...");
    let mp3_data = synthesizer.synthesize(text, &config.voice.language).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    println!("Playing audio...");
    tokio::task::spawn_blocking(move || play_mp3_blocking(&mp3_data)).await??;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
