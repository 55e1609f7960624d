//! Line-oriented front end for the recorder
//!
//! Stdin is read on its own thread and multiplexed with a display tick that
//! pumps the controller's engine events.

use crossbeam_channel::{select, tick, unbounded, Receiver};
use log::{debug, warn};
use std::io::{self, BufRead};
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tapeloop::audio::dsp::DspSettings;
use tapeloop::audio::sample::Sample;
use tapeloop::settings::Settings;
use tapeloop::{ControllerEvent, PlaybackController, PlaybackTimer};

/// Roughly one display frame.
const TICK_INTERVAL: Duration = Duration::from_millis(16);

const HELP: &str = "\
commands:
  rec              record from the cursor
  stop             stop recording or playback
  play             play from the cursor
  pause            pause playback
  rewind           move the cursor to the start
  seek <chunk>     move the cursor
  loop on|off      toggle looping
  gain <db>|off    set or disable playback gain
  lpf <hz>|off     set or disable the low-pass filter
  status           show state, cursor and settings
  help             show this text
  quit             exit and save settings";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Record,
    Stop,
    Play,
    Pause,
    Rewind,
    Seek(usize),
    Loop(bool),
    Gain(Option<f32>),
    LowPass(Option<f32>),
    Status,
    Help,
    Quit,
}

fn parse_switch(arg: Option<&str>) -> Result<bool, String> {
    match arg {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err("expected on or off".to_string()),
    }
}

/// `off` disables, a number enables with that value.
fn parse_optional_value(arg: Option<&str>, what: &str) -> Result<Option<f32>, String> {
    match arg {
        Some("off") => Ok(None),
        Some(value) => value
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| format!("invalid {}: {}", what, value)),
        None => Err(format!("expected {} or off", what)),
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or_else(|| "empty command".to_string())?;
        let arg = words.next();

        let command = match name {
            "rec" | "record" => Command::Record,
            "stop" => Command::Stop,
            "play" => Command::Play,
            "pause" => Command::Pause,
            "rewind" => Command::Rewind,
            "seek" => {
                let chunk = arg
                    .and_then(|a| a.parse().ok())
                    .ok_or_else(|| "usage: seek <chunk>".to_string())?;
                Command::Seek(chunk)
            }
            "loop" => Command::Loop(parse_switch(arg)?),
            "gain" => Command::Gain(parse_optional_value(arg, "gain in dB")?),
            "lpf" => {
                let cutoff = parse_optional_value(arg, "cutoff in Hz")?;
                if cutoff.is_some_and(|hz| hz <= 0.0) {
                    return Err("cutoff must be positive".to_string());
                }
                Command::LowPass(cutoff)
            }
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(format!("unknown command '{}', try help", other)),
        };

        if words.next().is_some() {
            return Err(format!("too many arguments for {}", name));
        }
        Ok(command)
    }
}

/// Read stdin lines on a background thread.
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("tapeloop-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
            debug!("Stdin closed");
        });
    if let Err(e) = spawned {
        warn!("Failed to spawn stdin reader: {}", e);
    }
    rx
}

fn format_time(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn format_timer(timer: PlaybackTimer) -> String {
    format!(
        "{} / {}",
        format_time(timer.elapsed_secs),
        format_time(timer.total_secs)
    )
}

pub struct Shell<S: Sample> {
    controller: PlaybackController<S>,
    settings: Settings,
    last_timer: Option<PlaybackTimer>,
}

impl<S: Sample> Shell<S> {
    pub fn new(controller: PlaybackController<S>, settings: Settings) -> Self {
        Self {
            controller,
            settings,
            last_timer: None,
        }
    }

    /// Run until `quit` or end of input, returning the settings to persist.
    pub fn run(mut self, lines: Receiver<String>) -> Settings {
        let events = self.controller.events();
        let ticker = tick(TICK_INTERVAL);
        println!("tapeloop ready, type help for commands");

        loop {
            select! {
                recv(lines) -> line => match line {
                    Ok(line) => {
                        if !self.handle_line(&line) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(ticker) -> _ => {
                    self.controller.process_events();
                    for event in events.try_iter() {
                        if let Some(text) = self.describe(event) {
                            println!("{}", text);
                        }
                    }
                }
            }
        }

        self.controller.shutdown();
        self.settings
    }

    /// Returns false when the shell should exit.
    pub fn handle_line(&mut self, line: &str) -> bool {
        if line.trim().is_empty() {
            return true;
        }
        match line.parse::<Command>() {
            Ok(command) => self.execute(command),
            Err(e) => {
                println!("{}", e);
                true
            }
        }
    }

    pub fn execute(&mut self, command: Command) -> bool {
        debug!("Executing {:?}", command);
        match command {
            Command::Record => self.controller.start_recording(),
            Command::Stop => {
                self.controller.stop_recording();
                self.controller.pause();
            }
            Command::Play => self.controller.play(),
            Command::Pause => self.controller.pause(),
            Command::Rewind => self.controller.rewind(),
            Command::Seek(chunk) => self.controller.set_cursor_position(chunk),
            Command::Loop(looped) => {
                self.settings.looped = looped;
                self.controller.set_looped(looped);
            }
            Command::Gain(gain_db) => {
                let dsp = DspSettings {
                    gain_enabled: gain_db.is_some(),
                    gain_db: gain_db.unwrap_or(self.settings.dsp.gain_db),
                    ..self.settings.dsp
                };
                self.update_dsp(dsp);
            }
            Command::LowPass(cutoff) => {
                let dsp = DspSettings {
                    low_pass_enabled: cutoff.is_some(),
                    low_pass_cutoff_hz: cutoff.unwrap_or(self.settings.dsp.low_pass_cutoff_hz),
                    ..self.settings.dsp
                };
                self.update_dsp(dsp);
            }
            Command::Status => println!("{}", self.status()),
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
        }
        true
    }

    fn update_dsp(&mut self, dsp: DspSettings) {
        self.settings.dsp = dsp;
        self.controller.set_settings(dsp);
    }

    pub fn status(&self) -> String {
        let dsp = self.settings.dsp;
        let gain = if dsp.gain_enabled {
            format!("{:+.1} dB", dsp.gain_db)
        } else {
            "off".to_string()
        };
        let lpf = if dsp.low_pass_enabled {
            format!("{:.0} Hz", dsp.low_pass_cutoff_hz)
        } else {
            "off".to_string()
        };
        format!(
            "{:?}  chunk {}/{}  {}  loop {}  gain {}  lpf {}",
            self.controller.state(),
            self.controller.cursor_position(),
            self.controller.buffer_len(),
            format_timer(self.controller.timer()),
            if self.controller.is_loop_enabled() { "on" } else { "off" },
            gain,
            lpf,
        )
    }

    fn describe(&mut self, event: ControllerEvent) -> Option<String> {
        match event {
            ControllerEvent::StateChanged(state) => Some(format!("[{:?}]", state)),
            ControllerEvent::Timer(timer) => {
                if self.last_timer == Some(timer) {
                    return None;
                }
                self.last_timer = Some(timer);
                Some(format_timer(timer))
            }
            ControllerEvent::Position(_) | ControllerEvent::Chunk(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tapeloop::audio::backend::memory::{MemoryCapture, MemorySink};
    use tapeloop::audio::{AudioCaptureEngine, AudioPlaybackEngine};

    fn shell() -> Shell<f32> {
        let (_source, source_rx) = unbounded();
        let (sink_tx, _played) = unbounded();
        let capture = AudioCaptureEngine::new(Arc::new(MemoryCapture::new(source_rx, 1000, 100)));
        let playback = AudioPlaybackEngine::new(Arc::new(MemorySink::new(sink_tx, 1000)), 100);
        Shell::new(PlaybackController::new(capture, playback), Settings::default())
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("rec".parse::<Command>(), Ok(Command::Record));
        assert_eq!("  seek 12 ".parse::<Command>(), Ok(Command::Seek(12)));
        assert_eq!("loop on".parse::<Command>(), Ok(Command::Loop(true)));
        assert_eq!("gain -6.5".parse::<Command>(), Ok(Command::Gain(Some(-6.5))));
        assert_eq!("gain off".parse::<Command>(), Ok(Command::Gain(None)));
        assert_eq!("lpf 800".parse::<Command>(), Ok(Command::LowPass(Some(800.0))));
        assert_eq!("quit".parse::<Command>(), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("seek".parse::<Command>().is_err());
        assert!("seek -1".parse::<Command>().is_err());
        assert!("loop maybe".parse::<Command>().is_err());
        assert!("gain loud".parse::<Command>().is_err());
        assert!("lpf 0".parse::<Command>().is_err());
        assert!("play now".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }

    #[test]
    fn test_settings_follow_commands() {
        let mut shell = shell();
        assert!(shell.execute(Command::Loop(true)));
        assert!(shell.execute(Command::Gain(Some(3.0))));
        assert!(shell.execute(Command::LowPass(Some(1200.0))));

        let dsp = shell.settings.dsp;
        assert!(shell.settings.looped);
        assert!(dsp.gain_enabled && dsp.gain_db == 3.0);
        assert!(dsp.low_pass_enabled && dsp.low_pass_cutoff_hz == 1200.0);
        assert_eq!(shell.controller.settings(), dsp);

        shell.execute(Command::Gain(None));
        assert!(!shell.settings.dsp.gain_enabled);
        assert_eq!(shell.settings.dsp.gain_db, 3.0);
    }

    #[test]
    fn test_quit_ends_the_shell() {
        let mut shell = shell();
        assert!(shell.handle_line(""));
        assert!(shell.handle_line("bogus"));
        assert!(!shell.handle_line("quit"));
    }

    #[test]
    fn test_timer_format() {
        let timer = PlaybackTimer {
            elapsed_secs: 65,
            total_secs: 3600,
        };
        assert_eq!(format_timer(timer), "01:05 / 60:00");
    }
}
