use std::sync::{Arc, Mutex};

use approx::assert_abs_diff_eq;
use sidplay::memory::ControlFlags;
use sidplay::psid::FrameTiming;
use sidplay::replayer::RoutineExit;
use sidplay::sid::EnvelopeStage;
use sidplay::{PlaybackState, PlayerConfig, SidError, SidPlayer};

const RATE: u32 = 44_100;
const PAL_FRAME: usize = 882;
const NTSC_FRAME: usize = 735;
const COUNTER: u16 = 0xC000;

/// Builds PSID v2 images around hand-assembled 6502 code.
struct PsidBuilder {
    load: u16,
    init: u16,
    play: u16,
    songs: u16,
    start: u16,
    speed: u32,
    title: &'static str,
    code: Vec<u8>,
}

impl PsidBuilder {
    fn new(code: &[u8]) -> Self {
        PsidBuilder {
            load: 0x1000,
            init: 0x1000,
            play: 0,
            songs: 1,
            start: 1,
            speed: 0,
            title: "Test Tune",
            code: code.to_vec(),
        }
    }

    fn play(mut self, play: u16) -> Self {
        self.play = play;
        self
    }

    fn songs(mut self, songs: u16) -> Self {
        self.songs = songs;
        self
    }

    fn speed(mut self, speed: u32) -> Self {
        self.speed = speed;
        self
    }

    fn title(mut self, title: &'static str) -> Self {
        self.title = title;
        self
    }

    fn build(&self) -> Vec<u8> {
        let mut data = vec![0u8; 0x7C];
        data[0..4].copy_from_slice(b"PSID");
        data[0x04..0x06].copy_from_slice(&2u16.to_be_bytes());
        data[0x06..0x08].copy_from_slice(&0x7Cu16.to_be_bytes());
        data[0x08..0x0A].copy_from_slice(&self.load.to_be_bytes());
        data[0x0A..0x0C].copy_from_slice(&self.init.to_be_bytes());
        data[0x0C..0x0E].copy_from_slice(&self.play.to_be_bytes());
        data[0x0E..0x10].copy_from_slice(&self.songs.to_be_bytes());
        data[0x10..0x12].copy_from_slice(&self.start.to_be_bytes());
        data[0x12..0x16].copy_from_slice(&self.speed.to_be_bytes());
        data[0x16..0x16 + self.title.len()].copy_from_slice(self.title.as_bytes());
        data[0x36..0x36 + 6].copy_from_slice(b"Tester");
        data[0x56..0x56 + 4].copy_from_slice(b"2024");
        data.extend_from_slice(&self.code);
        data
    }
}

/// init: RTS   play ($1001): INC $C000 ; RTS
fn counting_song() -> PsidBuilder {
    PsidBuilder::new(&[0x60, 0xEE, 0x00, 0xC0, 0x60]).play(0x1001)
}

/// init: volume 15, voice 1 sawtooth at A-4 with full sustain, gate on.
/// play ($101A): RTS
fn tone_song() -> PsidBuilder {
    let code = [
        0xA9, 0x0F, 0x8D, 0x18, 0xD4, // LDA #$0F ; STA $D418
        0xA9, 0xF0, 0x8D, 0x06, 0xD4, // LDA #$F0 ; STA $D406
        0xA9, 0xD7, 0x8D, 0x00, 0xD4, // LDA #$D7 ; STA $D400
        0xA9, 0x1C, 0x8D, 0x01, 0xD4, // LDA #$1C ; STA $D401
        0xA9, 0x21, 0x8D, 0x04, 0xD4, // LDA #$21 ; STA $D404
        0x60, // RTS
        0x60, // play: RTS
    ];
    PsidBuilder::new(&code).play(0x101A)
}

fn loaded(builder: &PsidBuilder) -> SidPlayer {
    let mut player = SidPlayer::new();
    player.load(&builder.build()).expect("load");
    player
}

fn render(player: &mut SidPlayer, frames: usize) -> Vec<f32> {
    let mut buffer = vec![0.0f32; frames * 2];
    player.render_interleaved(&mut buffer, RATE);
    buffer
}

#[test]
fn play_routine_runs_once_per_pal_frame() {
    let mut player = loaded(&counting_song());
    player.start().expect("start");
    assert_eq!(player.timing(), FrameTiming::Pal);

    render(&mut player, PAL_FRAME * 5 - 1);
    assert_eq!(player.memory().peek(COUNTER), 4);
    render(&mut player, 1);
    assert_eq!(player.memory().peek(COUNTER), 5);
    assert_eq!(player.frame_count(), 5);
    assert_eq!(player.elapsed_ms(), 100);
}

#[test]
fn play_routine_runs_once_per_ntsc_frame() {
    // Bit 0 clear with a non-zero mask: subsong 0 is NTSC
    let mut player = loaded(&counting_song().speed(0b10).songs(2));
    player.start().expect("start");
    assert_eq!(player.timing(), FrameTiming::Ntsc);

    render(&mut player, NTSC_FRAME * 4);
    assert_eq!(player.memory().peek(COUNTER), 4);
}

#[test]
fn split_channel_processing_counts_frames_too() {
    let mut player = loaded(&counting_song());
    player.start().expect("start");
    let mut left = vec![0.0f32; PAL_FRAME * 3];
    let mut right = vec![0.0f32; PAL_FRAME * 3];
    player.process(&mut left, &mut right, RATE);
    assert_eq!(player.memory().peek(COUNTER), 3);
}

#[test]
fn config_default_timing_applies_to_zero_speed_mask() {
    let config = PlayerConfig {
        default_timing: FrameTiming::Ntsc,
        ..PlayerConfig::default()
    };
    let mut player = SidPlayer::with_config(config);
    player.load(&counting_song().build()).expect("load");
    assert_eq!(player.timing(), FrameTiming::Ntsc);
}

#[test]
fn stopped_player_outputs_silence() {
    let mut player = loaded(&tone_song());
    let mut buffer = vec![1.0f32; 512];
    player.render_interleaved(&mut buffer, RATE);
    assert!(buffer.iter().all(|&s| s == 0.0));

    let mut left = vec![1.0f32; 64];
    let mut right = vec![1.0f32; 64];
    player.process(&mut left, &mut right, RATE);
    assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
}

#[test]
fn tone_is_audible_and_mute_silences_it() {
    let mut player = loaded(&tone_song());
    player.start().expect("start");
    let buffer = render(&mut player, 4_410);
    assert!(buffer.iter().any(|&s| s.abs() > 0.01));
    assert!(buffer.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    for frame in buffer.chunks_exact(2) {
        assert_eq!(frame[0], frame[1]);
    }

    player.set_voice_mute(0, true);
    assert!(player.is_voice_muted(0));
    let buffer = render(&mut player, 1_024);
    assert!(buffer.iter().all(|&s| s == 0.0));
}

#[test]
fn boost_scales_output() {
    let mut normal = loaded(&tone_song());
    let mut boosted = loaded(&tone_song());
    normal.start().expect("start");
    boosted.start().expect("start");
    boosted.set_boost(2.0);
    assert_eq!(boosted.boost(), 2.0);

    let a = render(&mut normal, 2_000);
    let b = render(&mut boosted, 2_000);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(x * 2.0, *y, epsilon = 1e-6);
    }
}

#[test]
fn voice_taps_follow_the_voice() {
    let mut player = loaded(&tone_song());
    player.start().expect("start");
    let mut left = vec![0.0f32; 2_000];
    let mut right = vec![0.0f32; 2_000];
    let mut v1 = vec![0.0f32; 2_000];
    let mut v2 = vec![0.0f32; 2_000];
    let mut v3 = vec![0.0f32; 2_000];
    player.process_voices(&mut left, &mut right, [&mut v1[..], &mut v2[..], &mut v3[..]], RATE);
    assert!(v1.iter().any(|&s| s.abs() > 0.01));
    assert!(v2.iter().all(|&s| s == 0.0));
    assert!(v3.iter().all(|&s| s == 0.0));
}

#[test]
fn stop_releases_voices_through_the_registers() {
    let mut player = loaded(&tone_song());
    player.start().expect("start");
    render(&mut player, 100);
    let voice = player.memory().sid().engine().voice(0).map(|v| v.envelope().stage());
    assert!(matches!(
        voice,
        Some(EnvelopeStage::Attack) | Some(EnvelopeStage::Decay) | Some(EnvelopeStage::Sustain)
    ));

    player.stop();
    assert_eq!(player.state(), PlaybackState::Stopped);
    let cache = player.memory().sid().cache();
    assert_eq!(cache.control(0), ControlFlags::SAWTOOTH);
    assert!(!cache.gate(0));
    let stage = player.memory().sid().engine().voice(0).map(|v| v.envelope().stage());
    assert_eq!(stage, Some(EnvelopeStage::Release));
    // Frequency survives; nothing else was reset
    assert_eq!(cache.frequency(0), 0x1CD7);
}

#[test]
fn irq_vector_play_routine_is_discovered() {
    // init: install $100B into $0314/$0315 ; RTS
    // play ($100B): INC $C000 ; JMP $EA31
    let code = [
        0xA9, 0x0B, 0x8D, 0x14, 0x03, // LDA #$0B ; STA $0314
        0xA9, 0x10, 0x8D, 0x15, 0x03, // LDA #$10 ; STA $0315
        0x60, // RTS
        0xEE, 0x00, 0xC0, // INC $C000
        0x4C, 0x31, 0xEA, // JMP $EA31
    ];
    let mut player = loaded(&PsidBuilder::new(&code));
    player.start().expect("start");
    assert_eq!(player.play_address(), 0x100B);

    render(&mut player, PAL_FRAME * 3);
    assert_eq!(player.memory().peek(COUNTER), 3);
    assert_eq!(player.last_exit(), Some(RoutineExit::KernalReturn(0xEA31)));
    assert_eq!(player.cpu().sp, 0xFF);
}

#[test]
fn hardware_vector_play_routine_returns_with_rti() {
    // init: install $100B into $FFFE/$FFFF ; RTS
    // play ($100B): INC $C000 ; RTI
    let code = [
        0xA9, 0x0B, 0x8D, 0xFE, 0xFF, // LDA #$0B ; STA $FFFE
        0xA9, 0x10, 0x8D, 0xFF, 0xFF, // LDA #$10 ; STA $FFFF
        0x60, // RTS
        0xEE, 0x00, 0xC0, // INC $C000
        0x40, // RTI
    ];
    let mut player = loaded(&PsidBuilder::new(&code));
    player.start().expect("start");
    assert_eq!(player.play_address(), 0x100B);

    render(&mut player, PAL_FRAME * 2);
    assert_eq!(player.memory().peek(COUNTER), 2);
    assert_eq!(player.last_exit(), Some(RoutineExit::Returned));
}

#[test]
fn missing_play_routine_plays_silently() {
    let mut player = loaded(&PsidBuilder::new(&[0x60]));
    player.start().expect("start");
    assert_eq!(player.state(), PlaybackState::Playing);
    assert_eq!(player.play_address(), 0);
    let buffer = render(&mut player, PAL_FRAME * 2);
    assert!(buffer.iter().all(|&s| s == 0.0));
    assert_eq!(player.frame_count(), 2);
}

#[test]
fn runaway_play_routine_is_bounded() {
    // play ($1001): JMP $1001
    let song = PsidBuilder::new(&[0x60, 0x4C, 0x01, 0x10]).play(0x1001);
    let mut player = loaded(&song);
    player.start().expect("start");
    render(&mut player, PAL_FRAME * 2);
    assert_eq!(player.last_exit(), Some(RoutineExit::Stalled(0x1001)));

    let config = PlayerConfig {
        max_cycles_per_call: 5_000,
        ..PlayerConfig::default()
    };
    let mut player = SidPlayer::with_config(config);
    player.load(&song.build()).expect("load");
    player.set_loop_detection(false);
    assert!(!player.loop_detection());
    player.start().expect("start");
    let before = player.cpu().total_cycles();
    render(&mut player, PAL_FRAME * 4);
    assert_eq!(player.last_exit(), Some(RoutineExit::BudgetExhausted));
    let spent = player.cpu().total_cycles() - before;
    assert!(spent <= 4 * 5_002, "spent {} cycles", spent);
    assert!(spent >= 4 * 5_000);
}

#[test]
fn tiny_cycle_budget_still_returns() {
    let config = PlayerConfig {
        max_cycles_per_call: 1,
        ..PlayerConfig::default()
    };
    let mut player = SidPlayer::with_config(config);
    player.load(&counting_song().build()).expect("load");
    player.start().expect("start");
    render(&mut player, PAL_FRAME * 6);
    // One instruction per call: the INC still lands every frame
    assert_eq!(player.memory().peek(COUNTER), 6);
    assert_eq!(player.last_exit(), Some(RoutineExit::BudgetExhausted));
    assert_eq!(player.cpu().sp, 0xFF);
}

#[test]
fn short_gate_pulse_decays_to_silence() {
    let code = [
        0xA9, 0x0F, 0x8D, 0x18, 0xD4, // LDA #$0F ; STA $D418
        0xA9, 0xF0, 0x8D, 0x06, 0xD4, // LDA #$F0 ; STA $D406
        0xA9, 0xD7, 0x8D, 0x00, 0xD4, // LDA #$D7 ; STA $D400
        0xA9, 0x1C, 0x8D, 0x01, 0xD4, // LDA #$1C ; STA $D401
        0xA9, 0x21, 0x8D, 0x04, 0xD4, // LDA #$21 ; STA $D404
        0xA9, 0x20, 0x8D, 0x04, 0xD4, // LDA #$20 ; STA $D404
        0x60, // RTS
        0x60, // play: RTS
    ];
    let mut player = loaded(&PsidBuilder::new(&code).play(0x101F));
    player.start().expect("start");
    let buffer = render(&mut player, RATE as usize / 2);
    let tail = &buffer[buffer.len() - 2_000..];
    assert!(tail.iter().all(|&s| s == 0.0));
    let stage = player.memory().sid().engine().voice(0).map(|v| v.envelope().stage());
    assert_eq!(stage, Some(EnvelopeStage::Idle));
}

#[test]
fn unknown_opcode_is_skipped() {
    // init: JAM ; $8B #$00 ; $9C $0000 ; RTS (none of them decoded)
    let code = [0x02, 0x8B, 0x00, 0x9C, 0x00, 0x00, 0x60];
    let mut player = loaded(&PsidBuilder::new(&code));
    player.start().expect("start");
    assert_eq!(player.last_exit(), Some(RoutineExit::Returned));
    assert_eq!(player.cpu().unknown_opcode_count(), 3);
}

#[test]
fn failed_load_leaves_player_untouched() {
    let mut player = loaded(&counting_song().title("Keeper"));
    player.start().expect("start");
    render(&mut player, PAL_FRAME);

    let short = vec![0u8; 0x40];
    assert!(matches!(
        player.load(&short),
        Err(SidError::DataTooShort { .. })
    ));
    let mut bad = counting_song().build();
    bad[0..4].copy_from_slice(b"MUS!");
    assert!(matches!(player.load(&bad), Err(SidError::InvalidMagic(_))));

    assert_eq!(player.title(), "Keeper");
    assert_eq!(player.state(), PlaybackState::Playing);
    render(&mut player, PAL_FRAME);
    assert_eq!(player.memory().peek(COUNTER), 2);
}

#[test]
fn load_replaces_previous_song() {
    let mut player = loaded(&counting_song());
    player.start().expect("start");
    render(&mut player, PAL_FRAME * 2);

    player.load(&tone_song().title("Second").build()).expect("load");
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(player.title(), "Second");
    assert_eq!(player.author(), "Tester");
    assert_eq!(player.released(), "2024");
    assert_eq!(player.memory().peek(COUNTER), 0);
    assert_eq!(player.memory().sid().cache().get(0x18), 0);
    assert_eq!(player.elapsed_ms(), 0);
}

#[test]
fn subsong_selection_is_bounded() {
    let mut player = loaded(&counting_song().songs(3));
    assert_eq!(player.subsong_count(), 3);
    assert!(player.select_subsong(2).is_ok());
    assert_eq!(player.current_subsong(), 2);
    assert!(matches!(
        player.select_subsong(3),
        Err(SidError::InvalidSubsong {
            index: 3,
            available: 3
        })
    ));
    assert_eq!(player.current_subsong(), 2);

    let mut empty = SidPlayer::new();
    assert!(matches!(
        empty.select_subsong(0),
        Err(SidError::NoSongLoaded)
    ));
}

#[test]
fn subsong_change_restores_image_and_restarts() {
    // init: RTS ; play ($1001): INC $1005 ; RTS ; counter byte at $1005
    let song = PsidBuilder::new(&[0x60, 0xEE, 0x05, 0x10, 0x60, 0x00])
        .play(0x1001)
        .songs(2)
        .speed(0b01);
    let mut player = loaded(&song);
    player.start().expect("start");
    render(&mut player, PAL_FRAME * 3);
    assert_eq!(player.memory().peek(0x1005), 3);

    player.select_subsong(1).expect("subsong");
    assert_eq!(player.memory().peek(0x1005), 0);
    assert!(player.is_playing());
    assert_eq!(player.timing(), FrameTiming::Ntsc);
    assert_eq!(player.elapsed_ms(), 0);

    render(&mut player, NTSC_FRAME);
    assert_eq!(player.memory().peek(0x1005), 1);
}

#[test]
fn position_callback_reports_each_frame() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut player = loaded(&counting_song().songs(2));
    player.set_position_callback(move |subsong, ms| {
        if let Ok(mut log) = sink.lock() {
            log.push((subsong, ms));
        }
    });
    player.select_subsong(1).expect("subsong");
    player.start().expect("start");
    render(&mut player, PAL_FRAME * 3);

    let seen = seen.lock().expect("lock").clone();
    assert_eq!(seen, vec![(1, 20), (1, 40), (1, 60)]);
}

#[test]
fn embedded_load_address_is_honoured() {
    let mut builder = PsidBuilder::new(&[0x00, 0x20, 0x60, 0xEE, 0x00, 0xC0, 0x60]);
    builder.load = 0;
    builder.init = 0x2000;
    builder.play = 0x2001;
    let mut player = loaded(&builder);
    let info = player.song_info().cloned().expect("info");
    assert_eq!(info.load_address, 0x2000);
    assert_eq!(info.load_end, 0x2005);
    assert_eq!(player.memory().peek(0x2000), 0x60);

    player.start().expect("start");
    render(&mut player, PAL_FRAME);
    assert_eq!(player.memory().peek(COUNTER), 1);
}

#[test]
fn state_dump_shows_registers() {
    let mut player = loaded(&tone_song());
    player.start().expect("start");
    render(&mut player, PAL_FRAME);
    let text = player.state_dump().to_string();
    assert!(text.contains("V1  freq $1CD7"));
    assert!(text.contains("[SAW GATE]"));
    assert!(text.contains("vol 15"));
}

#[cfg(feature = "export-wav")]
#[test]
fn wav_export_writes_stereo_pcm() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tone.wav");
    let mut player = loaded(&tone_song());
    let frames = sidplay::export::render_wav(&mut player, 0, 0.1, RATE, &path).expect("export");
    assert_eq!(frames, 4_410);

    let reader = hound::WavReader::open(&path).expect("open wav");
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, RATE);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len(), 4_410 * 2);
}
