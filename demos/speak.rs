//! Basic unitspeech example — opens a voice directory and renders text
//! to a WAV file.
//!
//! Usage:
//!   cargo run --example speak -- --voice voices/shan
//!   cargo run --example speak -- --voice voices/shan --text "မႂ်ႇသုင်" --speed 1.2

use std::path::Path;

use unitspeech::{SynthesisStatus, Voice, WavFileSink};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unitspeech=info".into()),
        )
        .init();

    // ── Parse simple CLI arguments ───────────────────────────────────────────
    let mut args = std::env::args().skip(1);

    let mut voice_dir = "voice".to_string();
    let mut text      = "မႂ်ႇသုင်ၶႃႈ".to_string();
    let mut output    = "output.wav".to_string();
    let mut speed     = 1.0f32;
    let mut pitch     = 1.0f32;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--voice"  => { if let Some(v) = args.next() { voice_dir = v; } }
            "--text"   => { if let Some(v) = args.next() { text      = v; } }
            "--output" => { if let Some(v) = args.next() { output    = v; } }
            "--speed"  => { if let Some(v) = args.next() { speed     = v.parse().unwrap_or(1.0); } }
            "--pitch"  => { if let Some(v) = args.next() { pitch     = v.parse().unwrap_or(1.0); } }
            "--help"   => {
                println!(
                    "Usage: speak [--voice DIR] [--text TEXT] \
                     [--output FILE] [--speed FLOAT] [--pitch FLOAT]"
                );
                return Ok(());
            }
            _ => {}
        }
    }

    println!("Voice  : {}", voice_dir);
    println!("Text   : {:?}", text);
    println!("Speed  : {}", speed);
    println!("Pitch  : {}", pitch);
    println!("Output : {}", output);
    println!();

    let voice = Voice::open(Path::new(&voice_dir))?;
    println!("Opened voice {:?}", voice.name);

    // ── Render ───────────────────────────────────────────────────────────────
    println!("\nSynthesising speech…");
    let pipeline = voice.pipeline();
    let session = pipeline.new_session(speed, pitch);
    let mut sink = WavFileSink::new(Path::new(&output));

    match pipeline.synthesize(&text, &session, &mut sink) {
        SynthesisStatus::Completed => println!("Done!"),
        SynthesisStatus::Cancelled => println!("Cancelled."),
        SynthesisStatus::Failed(reason) => anyhow::bail!("synthesis failed: {reason}"),
    }
    Ok(())
}
