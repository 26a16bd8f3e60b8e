use std::env;
use std::fs;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use sidplay::psid::FrameTiming;
use sidplay::sid::VOICE_COUNT;
use sidplay::{PlayerConfig, SidPlayer};

const DEFAULT_SECONDS: f32 = 10.0;
const DEFAULT_RATE: u32 = 44_100;

#[derive(Debug, Default)]
struct Options {
    file: Option<String>,
    subsong: Option<u8>,
    seconds: Option<f32>,
    rate: Option<u32>,
    wav: Option<String>,
    mute: Vec<usize>,
    boost: Option<f32>,
    timing: Option<FrameTiming>,
    config: Option<String>,
    trace: bool,
    dump: bool,
    help: bool,
}

fn usage() -> String {
    format!(
        "Usage:\n  sidplay <file.sid> [options]\n\nOptions:\n  --subsong N     Subsong to play (1-based, default: file's start song)\n  --seconds S     Length to render (default {DEFAULT_SECONDS})\n  --rate HZ       Sample rate (default {DEFAULT_RATE})\n{}  --mute V        Mute voice V (1-3), may be repeated\n  --boost X       Output gain\n  --pal | --ntsc  Force frame timing\n  --config FILE   JSON player configuration\n  --trace         Log SID register writes (RUST_LOG=debug)\n  --dump          Print register state after rendering\n  -h, --help      Show this help\n",
        if cfg!(feature = "export-wav") {
            "  --wav OUT       Write a 16-bit stereo WAV file\n"
        } else {
            ""
        }
    )
}

fn value<T: std::str::FromStr>(flag: &str, arg: Option<String>) -> Result<T> {
    let Some(raw) = arg else {
        bail!("{} requires an argument", flag);
    };
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid value for {}: {}", flag, raw))
}

fn parse_args() -> Result<Options> {
    let mut options = Options::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--subsong" => {
                let n: u16 = value("--subsong", args.next())?;
                if n == 0 || n > 256 {
                    bail!("--subsong must be between 1 and 256");
                }
                options.subsong = Some((n - 1) as u8);
            }
            "--seconds" => options.seconds = Some(value("--seconds", args.next())?),
            "--rate" => options.rate = Some(value("--rate", args.next())?),
            "--wav" => options.wav = Some(value("--wav", args.next())?),
            "--mute" => {
                let v: usize = value("--mute", args.next())?;
                if v == 0 || v > VOICE_COUNT {
                    bail!("--mute expects a voice between 1 and {}", VOICE_COUNT);
                }
                options.mute.push(v - 1);
            }
            "--boost" => options.boost = Some(value("--boost", args.next())?),
            "--pal" => options.timing = Some(FrameTiming::Pal),
            "--ntsc" => options.timing = Some(FrameTiming::Ntsc),
            "--config" => options.config = Some(value("--config", args.next())?),
            "--trace" => options.trace = true,
            "--dump" => options.dump = true,
            "--help" | "-h" => options.help = true,
            _ if arg.starts_with('-') => bail!("unknown flag: {}", arg),
            _ => options.file = Some(arg),
        }
    }
    Ok(options)
}

fn run() -> Result<()> {
    let options = parse_args()?;
    let Some(file) = options.file.as_deref().filter(|_| !options.help) else {
        eprint!("{}", usage());
        return Ok(());
    };

    let config = match &options.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("failed to load config '{}'", path))?
            .with_env_overrides(),
        None => PlayerConfig::from_env(),
    };

    let data = fs::read(file).with_context(|| format!("failed to read '{}'", file))?;
    let mut player = SidPlayer::with_config(config);
    player
        .load(&data)
        .with_context(|| format!("failed to load '{}'", file))?;

    if let Some(timing) = options.timing {
        player.set_timing(timing);
    }
    if let Some(boost) = options.boost {
        player.set_boost(boost);
    }
    for &voice in &options.mute {
        player.set_voice_mute(voice, true);
    }
    player.set_trace_writes(options.trace);

    if let Some(info) = player.song_info() {
        println!("Title:    {}", info.title);
        println!("Author:   {}", info.author);
        println!("Released: {}", info.released);
        println!(
            "Format:   {} v{}, load ${:04X}-${:04X}, init ${:04X}, play ${:04X}",
            info.format,
            info.version,
            info.load_address,
            info.load_end.saturating_sub(1),
            info.init_address,
            info.play_address
        );
        println!(
            "Songs:    {} (default {})",
            info.songs,
            info.default_subsong as u16 + 1
        );
    }

    let subsong = options.subsong.unwrap_or(player.current_subsong());
    let seconds = options.seconds.unwrap_or(DEFAULT_SECONDS);
    let rate = options.rate.unwrap_or(DEFAULT_RATE);
    if rate == 0 {
        bail!("--rate must be positive");
    }

    let frames = match options.wav.as_deref() {
        #[cfg(feature = "export-wav")]
        Some(path) => sidplay::export::render_wav(&mut player, subsong, seconds, rate, path)
            .with_context(|| format!("failed to write '{}'", path))?,
        #[cfg(not(feature = "export-wav"))]
        Some(_) => bail!("WAV output requires the \"export-wav\" feature"),
        None => render_silently(&mut player, subsong, seconds, rate)?,
    };

    println!(
        "Rendered: subsong {} at {}, {} frames, {:.1}s, {}",
        subsong as u16 + 1,
        rate,
        frames,
        player.elapsed_ms() as f32 / 1000.0,
        player.timing()
    );

    if options.dump {
        println!("\n{}", player.state_dump());
    }
    Ok(())
}

/// Drive the player without writing audio anywhere.
fn render_silently(player: &mut SidPlayer, subsong: u8, seconds: f32, rate: u32) -> Result<usize> {
    player.select_subsong(subsong)?;
    player.start()?;
    let total = (seconds.max(0.0) as f64 * rate as f64).round() as usize;
    let mut buffer = vec![0.0f32; 2 * 1024];
    let mut rendered = 0;
    while rendered < total {
        let frames = (total - rendered).min(1024);
        player.render_interleaved(&mut buffer[..frames * 2], rate);
        rendered += frames;
    }
    Ok(rendered)
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
