//! Interactive camera loop: enroll faces and greet recognised investors.

use std::collections::HashMap;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use facegate_core::{
    BoundingBox, Config, ExtractError, FaceEncoder, FaceStore, GrayImage, MatchOutcome,
    OnnxFaceEncoder,
};
use facegate_hw::Camera;

use crate::investor::{self, InvestorType};

/// Label announced for faces that match nobody.
const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Enroll,
    ToggleValidate,
    Quit,
}

pub fn key_action(key: &KeyEvent) -> Option<KeyAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(KeyAction::Quit),
        KeyCode::Char('e') | KeyCode::Char('E') => Some(KeyAction::Enroll),
        KeyCode::Char('v') | KeyCode::Char('V') => Some(KeyAction::ToggleValidate),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

/// Per-label rate limit for announcements.
pub struct Cooldown {
    period: Duration,
    last: HashMap<String, Instant>,
}

impl Cooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: HashMap::new(),
        }
    }

    /// True (and the timer restarts) if `label` was not announced within the period.
    pub fn ready(&mut self, label: &str, now: Instant) -> bool {
        match self.last.get(label) {
            Some(&at) if now.saturating_duration_since(at) < self.period => false,
            _ => {
                self.last.insert(label.to_string(), now);
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Announcement {
    Recognized {
        identity: String,
        distance: f32,
        greeting: Option<&'static str>,
    },
    Unknown,
}

impl std::fmt::Display for Announcement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Announcement::Recognized {
                identity,
                distance,
                greeting: Some(greeting),
            } => write!(f, "{identity} ({distance:.3}): {greeting}"),
            Announcement::Recognized {
                identity, distance, ..
            } => write!(f, "{identity} ({distance:.3}): (no profile)"),
            Announcement::Unknown => f.write_str(UNKNOWN),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    Saved { name: String, investor: InvestorType },
    /// Enrollment needs exactly one face in view.
    NeedsSingleFace(usize),
    /// An empty name was entered.
    Cancelled,
}

/// Loop state independent of the camera and terminal.
pub struct Session<E> {
    encoder: E,
    store: FaceStore,
    threshold: f32,
    cooldown: Cooldown,
    validating: bool,
}

impl<E: FaceEncoder> Session<E> {
    pub fn new(encoder: E, store: FaceStore, threshold: f32, cooldown: Duration) -> Self {
        Self {
            encoder,
            store,
            threshold,
            cooldown: Cooldown::new(cooldown),
            validating: false,
        }
    }

    pub fn toggle_validation(&mut self) -> bool {
        self.validating = !self.validating;
        self.validating
    }

    pub fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ExtractError> {
        self.encoder.detect(image)
    }

    /// Match every face while validation is on. Returns only announcements
    /// whose cooldown has elapsed.
    pub fn validate(
        &mut self,
        image: &GrayImage,
        faces: &[BoundingBox],
        now: Instant,
    ) -> Result<Vec<Announcement>, ExtractError> {
        if !self.validating || self.store.is_empty() {
            return Ok(Vec::new());
        }

        let mut announcements = Vec::new();
        for face in faces {
            let probe = self.encoder.embed_face(image, face)?;
            let announcement = match self.store.authenticate(&probe, self.threshold) {
                MatchOutcome::Recognized {
                    identity, distance, ..
                } => {
                    let greeting = investor::greeting_for(self.store.profile(&identity));
                    Announcement::Recognized {
                        identity,
                        distance,
                        greeting,
                    }
                }
                MatchOutcome::Unrecognized { .. } => Announcement::Unknown,
            };
            let label = match &announcement {
                Announcement::Recognized { identity, .. } => identity.as_str(),
                Announcement::Unknown => UNKNOWN,
            };
            if self.cooldown.ready(label, now) {
                announcements.push(announcement);
            }
        }
        Ok(announcements)
    }

    /// Enroll the single face in `image`, asking `prompt` for the name and
    /// investor type.
    pub fn enroll(
        &mut self,
        image: &GrayImage,
        faces: &[BoundingBox],
        mut prompt: impl FnMut(&str) -> io::Result<String>,
    ) -> Result<EnrollOutcome> {
        let [face] = faces else {
            return Ok(EnrollOutcome::NeedsSingleFace(faces.len()));
        };
        let embedding = self.encoder.embed_face(image, face)?;

        let name = prompt("Name: ")?;
        let name = name.trim();
        if name.is_empty() {
            return Ok(EnrollOutcome::Cancelled);
        }

        println!("{}", investor::MENU);
        let investor = InvestorType::parse_or_default(&prompt("Type (1/2/3 or name): ")?);

        self.store
            .register(name, embedding, Some(investor.profile()))
            .with_context(|| format!("saving {name}"))?;
        tracing::info!(name, investor = investor.as_str(), "face enrolled");

        Ok(EnrollOutcome::Saved {
            name: name.to_string(),
            investor,
        })
    }
}

/// Raw terminal mode for the lifetime of the guard.
struct RawMode {
    active: bool,
}

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self { active: true })
    }

    fn suspend(&mut self) -> io::Result<()> {
        if self.active {
            terminal::disable_raw_mode()?;
            self.active = false;
        }
        Ok(())
    }

    fn resume(&mut self) -> io::Result<()> {
        if !self.active {
            terminal::enable_raw_mode()?;
            self.active = true;
        }
        Ok(())
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if self.active {
            let _ = terminal::disable_raw_mode();
        }
    }
}

/// Print a line that renders correctly in raw mode.
fn say(line: impl std::fmt::Display) {
    let mut out = io::stdout();
    let _ = write!(out, "{line}\r\n");
    let _ = out.flush();
}

fn prompt_line(label: &str) -> io::Result<String> {
    let mut out = io::stdout();
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Most recent pending key action, without blocking.
fn poll_key() -> io::Result<Option<KeyAction>> {
    let mut action = None;
    while event::poll(Duration::ZERO)? {
        if let Event::Key(key) = event::read()? {
            if let Some(next) = key_action(&key) {
                action = Some(next);
                if next == KeyAction::Quit {
                    break;
                }
            }
        }
    }
    Ok(action)
}

/// One-line report of an enroll attempt. Failures are logged and the loop
/// keeps running.
fn enroll_report(outcome: Result<EnrollOutcome>) -> String {
    match outcome {
        Ok(EnrollOutcome::Saved { name, investor }) => format!("saved {name}: {}", investor.as_str()),
        Ok(EnrollOutcome::NeedsSingleFace(found)) => {
            format!("enroll needs exactly one face (found {found})")
        }
        Ok(EnrollOutcome::Cancelled) => "enroll cancelled".to_string(),
        Err(e) => {
            let detail = format!("{e:#}");
            tracing::warn!(error = %detail, "enroll failed");
            format!("enroll failed: {detail}")
        }
    }
}

/// Run the interactive loop until the user quits.
pub fn run(config: &Config, device: &str) -> Result<()> {
    let encoder = OnnxFaceEncoder::load(&config.model_dir).context("loading face models")?;
    let store = FaceStore::open(&config.data_dir).context("opening face store")?;
    let camera = Camera::open(device)?;
    let mut stream = camera.stream()?;
    stream.warm_up(config.warmup_frames)?;

    let mut session = Session::new(
        encoder,
        store,
        config.match_threshold,
        Duration::from_secs(config.cooldown_secs),
    );

    println!("[E] enroll  [V] validate on/off  [Q] quit");
    let mut raw = RawMode::enable()?;

    loop {
        let frame = stream.next_frame()?;
        let action = poll_key()?;

        match action {
            Some(KeyAction::Quit) => break,
            Some(KeyAction::ToggleValidate) => {
                let on = session.toggle_validation();
                say(format_args!("validation {}", if on { "on" } else { "off" }));
            }
            _ => {}
        }

        if frame.is_dark {
            tracing::trace!(sequence = frame.sequence, "dark frame skipped");
            if action == Some(KeyAction::Enroll) {
                say("frame too dark to enroll");
            }
            continue;
        }

        let image = GrayImage::from_raw(frame.width, frame.height, frame.data)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;

        let faces = match session.detect(&image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "detection failed");
                continue;
            }
        };

        match session.validate(&image, &faces, Instant::now()) {
            Ok(announcements) => announcements.into_iter().for_each(say),
            Err(e) => tracing::warn!(error = %e, "validation failed"),
        }

        if action == Some(KeyAction::Enroll) {
            raw.suspend()?;
            let outcome = session.enroll(&image, &faces, prompt_line);
            raw.resume()?;
            say(enroll_report(outcome));
        }
    }

    drop(raw);
    tracing::info!("capture loop finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::Embedding;

    /// Row 0 holds one 255 marker per face; row 1 holds the embedding.
    struct MarkerEncoder;

    impl FaceEncoder for MarkerEncoder {
        fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ExtractError> {
            Ok((0..image.width())
                .filter(|&x| image.get_pixel(x, 0).0[0] == 255)
                .map(|x| BoundingBox {
                    x: x as f32,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                    confidence: 0.9,
                    landmarks: None,
                })
                .collect())
        }

        fn embed_face(&mut self, image: &GrayImage, _face: &BoundingBox) -> Result<Embedding, ExtractError> {
            Ok(Embedding::new(
                (0..image.width())
                    .map(|x| image.get_pixel(x, 1).0[0] as f32 / 255.0)
                    .collect(),
            ))
        }
    }

    /// Fails the first `failures` embeddings, then behaves like [`MarkerEncoder`].
    struct FlakyEncoder {
        failures: usize,
    }

    impl FaceEncoder for FlakyEncoder {
        fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ExtractError> {
            MarkerEncoder.detect(image)
        }

        fn embed_face(&mut self, image: &GrayImage, face: &BoundingBox) -> Result<Embedding, ExtractError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(ExtractError::NoFace);
            }
            MarkerEncoder.embed_face(image, face)
        }
    }

    fn frame(markers: [u8; 2], embedding: [u8; 2]) -> GrayImage {
        GrayImage::from_raw(2, 2, vec![markers[0], markers[1], embedding[0], embedding[1]]).unwrap()
    }

    fn session(dir: &tempfile::TempDir) -> Session<MarkerEncoder> {
        let store = FaceStore::open(dir.path()).unwrap();
        Session::new(MarkerEncoder, store, 0.6, Duration::from_secs(3))
    }

    fn answers(lines: &'static [&'static str]) -> impl FnMut(&str) -> io::Result<String> {
        let mut lines = lines.iter();
        move |_: &str| Ok(lines.next().copied().unwrap_or_default().to_string())
    }

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_key_bindings() {
        assert_eq!(key_action(&press(KeyCode::Char('e'), KeyModifiers::NONE)), Some(KeyAction::Enroll));
        assert_eq!(
            key_action(&press(KeyCode::Char('v'), KeyModifiers::NONE)),
            Some(KeyAction::ToggleValidate)
        );
        assert_eq!(key_action(&press(KeyCode::Char('q'), KeyModifiers::NONE)), Some(KeyAction::Quit));
        assert_eq!(key_action(&press(KeyCode::Esc, KeyModifiers::NONE)), Some(KeyAction::Quit));
        assert_eq!(key_action(&press(KeyCode::Char('c'), KeyModifiers::CONTROL)), Some(KeyAction::Quit));
        assert_eq!(key_action(&press(KeyCode::Char('x'), KeyModifiers::NONE)), None);
    }

    #[test]
    fn test_key_release_ignored() {
        let mut key = press(KeyCode::Char('q'), KeyModifiers::NONE);
        key.kind = KeyEventKind::Release;
        assert_eq!(key_action(&key), None);
    }

    #[test]
    fn test_cooldown_per_label() {
        let mut cooldown = Cooldown::new(Duration::from_secs(3));
        let t0 = Instant::now();
        assert!(cooldown.ready("alice", t0));
        assert!(!cooldown.ready("alice", t0 + Duration::from_secs(2)));
        assert!(cooldown.ready("bob", t0 + Duration::from_secs(2)));
        assert!(cooldown.ready("alice", t0 + Duration::from_secs(3)));
    }

    #[test]
    fn test_enroll_requires_single_face() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);

        for (markers, expected) in [([0, 0], 0), ([255, 255], 2)] {
            let image = frame(markers, [10, 20]);
            let faces = session.detect(&image).unwrap();
            let outcome = session.enroll(&image, &faces, answers(&["alice", "1"])).unwrap();
            assert_eq!(outcome, EnrollOutcome::NeedsSingleFace(expected));
        }
        assert!(session.store.is_empty());
    }

    #[test]
    fn test_enroll_saves_embedding_and_investor_type() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        let image = frame([255, 0], [10, 20]);
        let faces = session.detect(&image).unwrap();

        let outcome = session.enroll(&image, &faces, answers(&["  alice ", "moderate"])).unwrap();
        assert_eq!(
            outcome,
            EnrollOutcome::Saved {
                name: "alice".into(),
                investor: InvestorType::Moderate,
            }
        );
        assert!(session.store.is_registered("alice"));
        assert_eq!(session.store.profile("alice").and_then(|p| p.category()), Some("Moderate"));
    }

    #[test]
    fn test_enroll_unrecognised_type_defaults_to_conservative() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        let image = frame([255, 0], [10, 20]);
        let faces = session.detect(&image).unwrap();

        session.enroll(&image, &faces, answers(&["bob", "9"])).unwrap();
        assert_eq!(session.store.profile("bob").and_then(|p| p.category()), Some("Conservative"));
    }

    #[test]
    fn test_enroll_empty_name_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        let image = frame([255, 0], [10, 20]);
        let faces = session.detect(&image).unwrap();

        let outcome = session.enroll(&image, &faces, answers(&["   "])).unwrap();
        assert_eq!(outcome, EnrollOutcome::Cancelled);
        assert!(session.store.is_empty());
    }

    #[test]
    fn test_validate_greets_with_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        let image = frame([255, 0], [200, 10]);
        let faces = session.detect(&image).unwrap();
        session.enroll(&image, &faces, answers(&["carol", "3"])).unwrap();

        let t0 = Instant::now();
        assert!(session.validate(&image, &faces, t0).unwrap().is_empty(), "validation starts off");

        assert!(session.toggle_validation());
        let announced = session.validate(&image, &faces, t0).unwrap();
        assert_eq!(announced.len(), 1);
        match &announced[0] {
            Announcement::Recognized {
                identity, greeting, ..
            } => {
                assert_eq!(identity, "carol");
                assert_eq!(*greeting, Some(InvestorType::Aggressive.greeting()));
            }
            other => panic!("expected recognition, got {other:?}"),
        }

        assert!(session.validate(&image, &faces, t0 + Duration::from_secs(1)).unwrap().is_empty());
        assert_eq!(session.validate(&image, &faces, t0 + Duration::from_secs(3)).unwrap().len(), 1);
    }

    #[test]
    fn test_validate_reports_unknown_face() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        let enrolled = frame([255, 0], [255, 0]);
        let faces = session.detect(&enrolled).unwrap();
        session.enroll(&enrolled, &faces, answers(&["dave", "1"])).unwrap();
        session.toggle_validation();

        let stranger = frame([255, 0], [0, 255]);
        let faces = session.detect(&stranger).unwrap();
        let announced = session.validate(&stranger, &faces, Instant::now()).unwrap();
        assert_eq!(announced, vec![Announcement::Unknown]);
        assert_eq!(announced[0].to_string(), "unknown");
    }

    #[test]
    fn test_validate_with_empty_store_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        session.toggle_validation();
        let image = frame([255, 0], [1, 2]);
        let faces = session.detect(&image).unwrap();
        assert!(session.validate(&image, &faces, Instant::now()).unwrap().is_empty());
    }

    #[test]
    fn test_enroll_failure_does_not_end_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::open(dir.path()).unwrap();
        let mut session = Session::new(FlakyEncoder { failures: 1 }, store, 0.6, Duration::from_secs(3));
        let image = frame([255, 0], [10, 20]);
        let faces = session.detect(&image).unwrap();

        let failed = session.enroll(&image, &faces, answers(&["ivy", "2"]));
        assert!(failed.is_err());
        assert!(enroll_report(failed).starts_with("enroll failed: "));
        assert!(session.store.is_empty());

        let retried = session.enroll(&image, &faces, answers(&["ivy", "2"]));
        assert_eq!(enroll_report(retried), "saved ivy: Moderate");
        assert!(session.store.is_registered("ivy"));
    }

    #[test]
    fn test_enroll_store_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(&dir);
        std::fs::create_dir(dir.path().join("faces.json.tmp")).unwrap();
        let image = frame([255, 0], [10, 20]);
        let faces = session.detect(&image).unwrap();

        let outcome = session.enroll(&image, &faces, answers(&["jack", "1"]));
        let report = enroll_report(outcome);
        assert!(report.starts_with("enroll failed: saving jack"), "{report}");
        assert!(!session.store.is_registered("jack"));
    }
}
