use crate::config::{PlayerConfig, app_name, app_version};
use crate::decoder::open_source;
use crate::display::{AudioOutput, HeadlessPresenter};
use crate::pipeline::{Player, PlayerEvent};
use clap::{Arg, ArgAction, Command, value_parser};
use log::{error, info};
use std::{panic, process};

pub mod config;
pub mod decoder;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;
pub mod workers;

fn audio_output() -> Box<dyn AudioOutput> {
    #[cfg(feature = "audio-device")]
    {
        Box::new(display::cpal_output::CpalAudioOutput::new())
    }
    #[cfg(not(feature = "audio-device"))]
    {
        Box::new(display::NullAudioOutput::new())
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("source")
                .value_name("SOURCE")
                .help("Media file to play, or synthetic:key=value,... for a generated one.")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON file with player settings.")
                .required(false),
        )
        .arg(
            Arg::new("no-audio")
                .long("no-audio")
                .help("Ignore the audio stream.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-video")
                .long("no-video")
                .help("Ignore the video stream.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("queue-size")
                .long("queue-size")
                .value_name("BYTES")
                .help("Combined byte limit of the packet queues.")
                .value_parser(value_parser!(usize))
                .required(false),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => match PlayerConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Invalid configuration {}: {}", path, e);
                process::exit(1);
            }
        },
        None => PlayerConfig::default(),
    };
    if matches.get_flag("no-audio") {
        config.audio_enabled = false;
    }
    if matches.get_flag("no-video") {
        config.video_enabled = false;
    }
    if let Some(bytes) = matches.get_one::<usize>("queue-size") {
        config.max_queue_bytes = *bytes;
    }

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let Some(source_name) = matches.get_one::<String>("source") else {
        process::exit(1);
    };
    let source = match open_source(source_name) {
        Ok(source) => source,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let player = Player::new(config, Box::new(HeadlessPresenter::new()), audio_output());

    // gracefully stop playback on SIGINT, SIGTERM, or SIGHUP
    let quit = player.event_sender();
    if let Err(e) = ctrlc::set_handler(move || {
        if quit.send(PlayerEvent::Quit).is_err() {
            process::exit(130);
        }
    }) {
        error!("Error setting Ctrl-C handler: {}", e);
    }

    if let Err(e) = workers::controls::spawn_key_listener(player.event_sender()) {
        error!("Controls unavailable: {}", e);
    }

    match player.play(source) {
        Ok(report) => {
            info!("{}: {}", source_name, report.health);
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
