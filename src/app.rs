//! Main application logic and state management.
//!
//! This module contains the core kiosk logic: the screen stack, keyboard
//! event handling, the voice-search flow from captured audio to a matched
//! catalog item, and routing the guide robot to the item's aisle.

use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
use rdev::{EventType, Key, listen};
use std::collections::HashSet;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::sync::watch;

use crate::asr::{Asr, download_model, prompt_with_vocabulary};
use crate::audio::{Audio, AudioRecorder};
use crate::config::{Config, PromptType, Trigger};
use crate::map::{Cell, StoreMap};
use crate::pose::{self, Pose};
use crate::store::{Item, StoreDb, search};

/// A kiosk screen. Mirrors what a renderer would show; the engine only
/// tracks which one is active.
#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    MainMenu,
    Search,
    Result { item: String, aisle: String },
    Map { aisle: u32 },
}

/// Recorder transition requested by the activation chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordAction {
    Start,
    Stop,
}

/// The kiosk state machine: screen stack, fullscreen flag and capture
/// state. Kept separate from [`App`] so it can be driven without audio
/// hardware.
#[derive(Debug)]
pub struct KioskState {
    pressed_keys: HashSet<Key>,
    recording: bool,
    chord_held: bool,
    fullscreen: bool,
    fullscreen_held: bool,
    screens: Vec<Screen>,
}

impl Default for KioskState {
    fn default() -> Self {
        Self {
            pressed_keys: HashSet::new(),
            recording: false,
            chord_held: false,
            fullscreen: false,
            fullscreen_held: false,
            screens: vec![Screen::MainMenu],
        }
    }
}

impl KioskState {
    pub fn screen(&self) -> &Screen {
        self.screens.last().expect("screen stack never empties")
    }

    pub fn fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn recording(&self) -> bool {
        self.recording
    }

    pub fn navigate_to(&mut self, screen: Screen) {
        debug!("Navigating to {screen:?}");
        self.screens.push(screen);
    }

    /// Pops back to the previous screen. A no-op on the root screen.
    pub fn go_back(&mut self) -> bool {
        if self.screens.len() > 1 {
            self.screens.pop();
            debug!("Back to {:?}", self.screen());
            true
        } else {
            false
        }
    }

    /// Flips the fullscreen flag, returning the new state. Key repeat is
    /// filtered by the caller through `fullscreen_held`.
    pub fn toggle_fullscreen(&mut self) -> bool {
        self.fullscreen = !self.fullscreen;
        self.fullscreen
    }

    /// Chord key press in toggle mode. Held keys repeat, so only the first
    /// press after the chord was broken flips the listening state.
    pub fn chord_press_toggle(&mut self, keys: &HashSet<Key>, key: Key) -> Option<ChordAction> {
        if keys.contains(&key) {
            self.pressed_keys.insert(key);
        }
        if &self.pressed_keys != keys || self.chord_held {
            return None;
        }
        self.chord_held = true;
        self.recording = !self.recording;
        Some(if self.recording {
            ChordAction::Start
        } else {
            ChordAction::Stop
        })
    }

    /// Chord key release in toggle mode. Re-arms the toggle once the chord
    /// is broken.
    pub fn chord_release_toggle(&mut self, keys: &HashSet<Key>, key: Key) {
        self.pressed_keys.retain(|&k| k != key);
        if &self.pressed_keys != keys {
            self.chord_held = false;
        }
    }

    /// Chord key press in push-to-talk mode. Repeats while already
    /// recording are ignored.
    pub fn chord_press_hold(&mut self, keys: &HashSet<Key>, key: Key) -> Option<ChordAction> {
        if keys.contains(&key) {
            self.pressed_keys.insert(key);
        }
        if &self.pressed_keys == keys && !self.recording {
            self.recording = true;
            Some(ChordAction::Start)
        } else {
            None
        }
    }

    /// Chord key release in push-to-talk mode. Breaking the chord stops a
    /// running recording.
    pub fn chord_release_hold(&mut self, keys: &HashSet<Key>, key: Key) -> Option<ChordAction> {
        self.pressed_keys.retain(|&k| k != key);
        if self.recording && &self.pressed_keys != keys {
            self.recording = false;
            Some(ChordAction::Stop)
        } else {
            None
        }
    }
}

/// Result of matching one utterance against the catalog.
#[derive(Debug)]
pub struct SearchOutcome {
    pub transcript: String,
    pub matched: Option<Item>,
}

/// Main application struct that coordinates all components.
///
/// This struct manages the kiosk state, audio capture, transcription and
/// catalog matching, and robot routing.
pub struct App {
    state: KioskState,
    recorder: AudioRecorder,
    config: Config,
    map: StoreMap,
    robot: Pose,
    route: Vec<Cell>,
    rx_outcome: tokio::sync::mpsc::UnboundedReceiver<SearchOutcome>,
    pose_rx: watch::Receiver<Pose>,
    pose_active: bool,
    // Keeps the watch channel open when the listener is disabled
    _pose_tx: Option<watch::Sender<Pose>>,
}

async fn handle_audio(
    asr: &mut Asr,
    config: &Config,
    prompt: &PromptType,
    catalog: &[Item],
    audio: Audio,
    tx_outcome: &UnboundedSender<SearchOutcome>,
) -> Result<()> {
    let samples: Option<Vec<f32>> = match audio {
        Audio::Warm => {
            asr.load().context("Loading model")?;
            None
        }
        Audio::Sample(samples) => Some(samples),
        Audio::Path(wav_path) => {
            let samples = asr.samples_from_file(&wav_path).context("Reading wav")?;
            Some(samples)
        }
    };
    if let Some(samples) = samples {
        info!("Transcribing audio...");
        let transcript = asr
            .run(samples, config, prompt)
            .context("Error running ASR")?;
        info!("Transcribed: {transcript}");

        let matched = search::best_match(catalog, &transcript).map(|m| {
            debug!("Matched {:?} with score {}", m.item.name, m.score);
            m.item.clone()
        });
        tx_outcome.send(SearchOutcome {
            transcript,
            matched,
        })?;
    }
    Ok(())
}

impl App {
    /// Creates a new App instance.
    ///
    /// This function initializes the kiosk by:
    /// 1. Opening the store catalog and generating the map from its aisles
    /// 2. Setting up the audio recorder
    /// 3. Spawning the transcription task and the pose listener
    pub async fn new(config: Config) -> Result<Self> {
        let store = StoreDb::open(&config.paths.store_db).context("Opening store catalog")?;
        let catalog = store.all_items()?;
        let vocabulary = store.item_names()?;
        info!("Catalog has {} items", catalog.len());

        let max_aisle = store.max_aisle(config.map.default_max_aisle)?;
        let map = StoreMap::generate(max_aisle, config.map.aisle_rows);
        info!(
            "Generated {}x{} map for {max_aisle} aisles",
            map.width(),
            map.height()
        );

        // Initialize audio recorder
        let (tx_audio, mut rx_audio) = unbounded_channel();
        let recorder = AudioRecorder::new(&config, tx_audio)
            .await
            .context("Failed to create audio recorder")?;

        // Create cache directory if it doesn't exist
        std::fs::create_dir_all(&config.paths.cache_dir)?;

        // Download model if it doesn't exist
        let model_path = download_model(&config)
            .await
            .context("Failed to download model")?;

        let asr = Asr::new(&model_path)?;
        let prompt = prompt_with_vocabulary(&config, &vocabulary);
        let (tx_outcome, rx_outcome) = unbounded_channel();
        let asr_config = config.clone();
        tokio::task::spawn(async move {
            let mut asr = asr;
            while let Some(audio) = rx_audio.recv().await {
                if let Err(err) =
                    handle_audio(&mut asr, &asr_config, &prompt, &catalog, audio, &tx_outcome)
                        .await
                {
                    error!("Error handling audio {err:?}");
                }
            }
        });

        let (pose_tx, pose_rx) = watch::channel(Pose::default());
        let pose_tx = if config.pose.enabled {
            let bind = config.pose.bind.clone();
            tokio::task::spawn(async move {
                if let Err(err) = pose::listen(&bind, pose_tx).await {
                    error!("Pose listener stopped: {err:?}");
                }
            });
            None
        } else {
            Some(pose_tx)
        };

        Ok(Self {
            state: KioskState::default(),
            recorder,
            config,
            map,
            robot: Pose::default(),
            route: Vec::new(),
            rx_outcome,
            pose_active: true,
            pose_rx,
            _pose_tx: pose_tx,
        })
    }

    /// Runs the main application loop.
    ///
    /// This function sets up the keyboard event listener and processes
    /// keyboard events, search outcomes and pose updates until Escape is
    /// pressed.
    pub async fn run(&mut self) -> Result<()> {
        let (schan, mut rchan) = unbounded_channel();
        let _listener = tokio::task::spawn_blocking(move || {
            if let Err(e) = listen(move |event| {
                if let Err(e) = schan.send(event.clone()) {
                    error!("Could not send event {event:?}: {:#?}", e);
                }
            }) {
                error!("Could not listen for events: {:#?}", e);
                return Err(anyhow!("Failed to listen for events: {:#?}", e));
            }
            Ok(())
        });

        let keys = &self.config.activation.keys;
        info!(
            "Press {:?} to talk, {:?} to toggle fullscreen, Escape to quit",
            keys, self.config.activation.fullscreen_key
        );

        loop {
            tokio::select! {
                event = rchan.recv() => {
                    let Some(event) = event else { break };
                    match self.handle_event(event) {
                        Ok(true) => break,
                        Ok(false) => (),
                        Err(err) => error!("error handling event: {err}"),
                    }
                }
                outcome = self.rx_outcome.recv() => {
                    let Some(outcome) = outcome else { break };
                    self.handle_outcome(outcome);
                }
                changed = self.pose_rx.changed(), if self.pose_active => {
                    match changed {
                        Ok(()) => {
                            let pose = *self.pose_rx.borrow_and_update();
                            self.handle_pose(pose);
                        }
                        Err(_) => self.pose_active = false,
                    }
                }
            }
        }

        info!("Done exiting");
        Ok(())
    }

    /// Handles keyboard events.
    ///
    /// Escape exits, the fullscreen key flips the display state, Backspace
    /// goes back a screen, and the activation chord drives the microphone
    /// according to the configured trigger.
    fn handle_event(&mut self, event: rdev::Event) -> Result<bool> {
        match event.event_type {
            EventType::KeyPress(Key::Escape) => return Ok(true),
            EventType::KeyPress(key) if key == self.config.activation.fullscreen_key => {
                // Held keys repeat; only the first press toggles
                if !self.state.fullscreen_held {
                    self.state.fullscreen_held = true;
                    let fullscreen = self.state.toggle_fullscreen();
                    info!("Fullscreen: {fullscreen}");
                    self.config.notify(
                        if fullscreen { "Fullscreen on" } else { "Fullscreen off" },
                        "",
                    );
                }
                return Ok(false);
            }
            EventType::KeyRelease(key) if key == self.config.activation.fullscreen_key => {
                self.state.fullscreen_held = false;
                return Ok(false);
            }
            EventType::KeyPress(Key::Backspace) => {
                self.state.go_back();
                return Ok(false);
            }
            _ => (),
        }

        match &self.config.activation.trigger {
            Trigger::PushToTalk => self.handle_event_push_to_talk(event)?,
            Trigger::ToggleVad { .. } => self.handle_event_vad(event)?,
        }
        Ok(false)
    }

    fn handle_event_vad(&mut self, event: rdev::Event) -> Result<()> {
        match event.event_type {
            EventType::KeyPress(key) => {
                match self
                    .state
                    .chord_press_toggle(&self.config.activation.keys, key)
                {
                    Some(ChordAction::Start) => {
                        info!("Starting listening...");
                        self.config.notify("Start listening..", "");
                        self.state.navigate_to(Screen::Search);
                        self.recorder.start_recording()?;
                    }
                    Some(ChordAction::Stop) => {
                        info!("Stopped listening");
                        self.config.notify("Stop listening.", "");
                        self.recorder.stop_recording()?;
                    }
                    None => (),
                }
            }
            EventType::KeyRelease(key) => {
                self.state
                    .chord_release_toggle(&self.config.activation.keys, key);
            }
            _ => (),
        }
        Ok(())
    }

    fn handle_event_push_to_talk(&mut self, event: rdev::Event) -> Result<()> {
        match event.event_type {
            EventType::KeyPress(key) => {
                if self
                    .state
                    .chord_press_hold(&self.config.activation.keys, key)
                    == Some(ChordAction::Start)
                {
                    info!("Starting recording...");
                    self.state.navigate_to(Screen::Search);
                    self.recorder.start_recording()?;
                }
            }
            EventType::KeyRelease(key) => {
                if self
                    .state
                    .chord_release_hold(&self.config.activation.keys, key)
                    == Some(ChordAction::Stop)
                {
                    info!("Stopping recording...");
                    self.recorder.stop_recording()?;
                }
            }
            _ => (),
        }
        Ok(())
    }

    /// Applies a search outcome to the kiosk state.
    ///
    /// A match shows the result and starts routing the robot towards the
    /// aisle; a miss stays on the search screen.
    fn handle_outcome(&mut self, outcome: SearchOutcome) {
        let Some(item) = outcome.matched else {
            info!("No catalog match for {:?}", outcome.transcript);
            self.config.notify("No match", &outcome.transcript);
            return;
        };

        info!("Found {} in aisle {}", item.name, item.aisle);
        self.config
            .notify(&item.name, &format!("Aisle {}", item.aisle));
        self.state.navigate_to(Screen::Result {
            item: item.name.clone(),
            aisle: item.aisle.clone(),
        });

        let Ok(aisle) = item.aisle.trim().parse::<u32>() else {
            warn!("Aisle {:?} is not on the map, no routing", item.aisle);
            return;
        };
        match self.map.route_to_aisle(self.robot_cell(), aisle) {
            Ok(route) => {
                debug!("Route to aisle {aisle}: {} cells", route.len());
                self.route = route;
                self.state.navigate_to(Screen::Map { aisle });
            }
            Err(err) => {
                warn!("Cannot route to aisle {aisle}: {err}");
            }
        }
    }

    /// Applies a pose update: when the map screen is active, the route is
    /// recomputed from the robot's new cell.
    fn handle_pose(&mut self, pose: Pose) {
        self.robot = pose;
        let Screen::Map { aisle } = *self.state.screen() else {
            return;
        };
        match self.map.route_to_aisle(self.robot_cell(), aisle) {
            Ok(route) => {
                debug!("Robot at {:?}, {} cells to aisle {aisle}", self.robot_cell(), route.len());
                self.route = route;
            }
            Err(err) => debug!("No route from {:?}: {err}", self.robot_cell()),
        }
    }

    fn robot_cell(&self) -> Cell {
        self.map.clamp(self.robot.cell())
    }

    /// Remaining route for the current navigation, start cell first.
    pub fn route(&self) -> &[Cell] {
        &self.route
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = KioskState::default();
        assert_eq!(state.screen(), &Screen::MainMenu);
        assert!(!state.fullscreen());
        assert!(!state.recording());
    }

    #[test]
    fn test_navigation_stack() {
        let mut state = KioskState::default();
        state.navigate_to(Screen::Search);
        state.navigate_to(Screen::Result {
            item: "Milk".to_string(),
            aisle: "3".to_string(),
        });
        assert!(matches!(state.screen(), Screen::Result { .. }));

        assert!(state.go_back());
        assert_eq!(state.screen(), &Screen::Search);
        assert!(state.go_back());
        assert_eq!(state.screen(), &Screen::MainMenu);
    }

    #[test]
    fn test_go_back_on_root_is_noop() {
        let mut state = KioskState::default();
        assert!(!state.go_back());
        assert_eq!(state.screen(), &Screen::MainMenu);
    }

    fn chord() -> HashSet<Key> {
        [Key::ControlLeft, Key::Space].into_iter().collect()
    }

    #[test]
    fn test_toggle_chord_ignores_key_repeat() {
        let mut state = KioskState::default();
        let keys = chord();

        assert_eq!(state.chord_press_toggle(&keys, Key::ControlLeft), None);
        assert_eq!(
            state.chord_press_toggle(&keys, Key::Space),
            Some(ChordAction::Start)
        );
        assert!(state.recording());

        // Holding the chord makes the OS repeat the last key; the listening
        // state must not flip again until the chord is released
        for _ in 0..5 {
            assert_eq!(state.chord_press_toggle(&keys, Key::Space), None);
        }
        assert!(state.recording());

        state.chord_release_toggle(&keys, Key::Space);
        assert_eq!(
            state.chord_press_toggle(&keys, Key::Space),
            Some(ChordAction::Stop)
        );
        assert!(!state.recording());
    }

    #[test]
    fn test_toggle_chord_ignores_unrelated_keys() {
        let mut state = KioskState::default();
        let keys = chord();

        assert_eq!(state.chord_press_toggle(&keys, Key::KeyA), None);
        assert_eq!(state.chord_press_toggle(&keys, Key::ControlLeft), None);
        assert!(!state.recording());
    }

    #[test]
    fn test_push_to_talk_chord_records_while_held() {
        let mut state = KioskState::default();
        let keys = chord();

        assert_eq!(state.chord_press_hold(&keys, Key::ControlLeft), None);
        assert_eq!(
            state.chord_press_hold(&keys, Key::Space),
            Some(ChordAction::Start)
        );
        assert!(state.recording());

        // Key repeat while held must not restart the recording
        assert_eq!(state.chord_press_hold(&keys, Key::Space), None);

        assert_eq!(
            state.chord_release_hold(&keys, Key::Space),
            Some(ChordAction::Stop)
        );
        assert!(!state.recording());
        assert_eq!(state.chord_release_hold(&keys, Key::ControlLeft), None);
    }

    #[test]
    fn test_fullscreen_double_toggle_restores() {
        let mut state = KioskState::default();
        assert!(state.toggle_fullscreen());
        assert!(state.fullscreen());
        assert!(!state.toggle_fullscreen());
        assert!(!state.fullscreen());
    }
}
