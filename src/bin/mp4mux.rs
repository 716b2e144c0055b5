use anyhow::Context;
use clap::{ArgAction, Parser};
use mp4atom::{
    mux::{MuxConfig, Muxer, VecFrameSource, open_seekable_output},
    verify::verify_output,
};
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, disable_version_flag = true, about = "Wrap an Annex-B H.264 stream in an MP4 file")]
struct Args {
    /// Annex-B input (standard input when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// MP4 output (standard output when omitted; must be seekable)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Frame rate of the input stream
    #[arg(short = 'r', long = "fps", default_value_t = 30.0)]
    fps: f64,

    /// Movie and media timescale, in ticks per second
    #[arg(long, default_value_t = 1000)]
    timescale: u32,

    /// Text stored in udta/auth
    #[arg(long)]
    author: Option<String>,

    /// Override the picture width read from the SPS
    #[arg(long)]
    width: Option<u32>,

    /// Override the picture height read from the SPS
    #[arg(long)]
    height: Option<u32>,

    /// Print the mux report as JSON on standard error
    #[arg(long, action = ArgAction::SetTrue)]
    report: bool,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: (),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("mp4mux: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let mut stream = Vec::new();
    match &args.input {
        Some(path) => {
            File::open(path)
                .with_context(|| format!("opening {}", path.display()))?
                .read_to_end(&mut stream)?;
        }
        None => {
            io::stdin().lock().read_to_end(&mut stream)?;
        }
    }

    let mut config = MuxConfig {
        timescale: args.timescale,
        frame_rate: args.fps,
        width: args.width,
        height: args.height,
        ..MuxConfig::default()
    };
    if let Some(author) = &args.author {
        config.author = author.clone();
    }

    let out = open_seekable_output(args.output.as_deref()).context("opening output")?;
    let mut source = VecFrameSource::from_annexb(&stream, Some(args.fps));
    log::debug!("{} frames in {} input bytes", source.len(), stream.len());

    let (report, out) = Muxer::new(config).mux(&mut source, out)?;
    out.sync_all().context("syncing output")?;
    drop(out);

    let verified = verify_output(args.output.as_deref(), &report).context("verifying output")?;
    log::info!(
        "verified {} samples, first at {:#x}",
        verified.samples_checked,
        verified.chunk_offset
    );
    if args.report {
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
