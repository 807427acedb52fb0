use crate::pipeline::playback::PlayerEvent;
use log::{debug, warn};
use std::io::BufRead;
use std::sync::mpsc::Sender;

/// Map a line typed on the terminal to a playback command
pub fn key_command(line: &str) -> Option<PlayerEvent> {
    match line.trim().to_lowercase().as_str() {
        "p" | "pause" | "" => Some(PlayerEvent::TogglePause),
        "q" | "quit" | "exit" => Some(PlayerEvent::Quit),
        _ => None,
    }
}

/// Forward terminal commands to the player
///
/// The reader blocks on stdin for the whole process lifetime, so the thread
/// is detached: it ends with the process or when the player hangs up.
pub fn spawn_key_listener(events: Sender<PlayerEvent>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("key-listener".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Controls: stdin closed: {}", e);
                        break;
                    }
                };
                match key_command(&line) {
                    Some(event) => {
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    None => debug!("Controls: ignoring {:?}", line),
                }
            }
        })?;
    Ok(())
}
