//! Daemon lifecycle and event loop.
//!
//! Every backend callback (hotkey press, settings-file change, mixer stream
//! notification) reduces to an [`Event`] on one unbounded channel. The
//! daemon consumes that channel on a current-thread loop, so registry
//! mutation, volume math and the write-and-push all complete within one
//! `handle_event` call with nothing running in parallel.
//!
//! Lifecycle: [`Daemon::bootstrap`] connects the backends,
//! [`Daemon::enable`] performs the initial hotkey registration,
//! [`Daemon::run`] dispatches until SIGINT and then runs
//! [`Daemon::disable`], which releases the settings binding. Everything
//! else is released when the process drops its handles on exit.

use anyhow::Context;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::config::{FileSettings, SettingsStore};
use crate::hotkeys::{GlobalHotkeys, HotkeyError, HotkeyManager};
use crate::mixer::{Mixer, MixerEvent, PulseMixer, StreamMonitor};
use crate::osd::{NotificationOsd, OsdDisplay};
use crate::streams::StreamRegistry;
use crate::volume::VolumeController;

const HOTKEY_UP: &str = "finevol-volume-up";
const HOTKEY_DOWN: &str = "finevol-volume-down";

/// Bus payload every backend callback reduces to.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    Hotkey(HotkeyAction),
    SettingsChanged,
    Stream(MixerEvent),
}

/// A volume key press. The step is the one captured when the binding was
/// registered, which is why settings changes must re-register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    VolumeUp { step: u8 },
    VolumeDown { step: u8 },
}

/// The one value owning all daemon state: settings, hotkey bindings, the
/// mixer-backed controller and the stream registry.
pub struct Daemon<S, H, M, O> {
    settings: S,
    hotkeys: H,
    controller: VolumeController<M, O>,
    registry: StreamRegistry,
    tx: UnboundedSender<Event>,
    events: UnboundedReceiver<Event>,
}

impl Daemon<FileSettings, GlobalHotkeys, PulseMixer, NotificationOsd> {
    /// Connects all production backends and wires their callbacks onto the
    /// event bus.
    ///
    /// The returned [`StreamMonitor`] must be kept alive for stream
    /// notifications to keep flowing; dropping it disconnects the monitor.
    pub async fn bootstrap() -> anyhow::Result<(Self, StreamMonitor)> {
        let (tx, events) = mpsc::unbounded_channel();

        let mut settings = FileSettings::load();
        let watch_tx = tx.clone();
        settings
            .watch(Box::new(move || {
                let _ = watch_tx.send(Event::SettingsChanged);
            }))
            .context("Starting the settings watcher")?;

        let hotkeys = GlobalHotkeys::new().context("Connecting the hotkey backend")?;

        let mixer = PulseMixer::connect().context("Connecting to the audio server")?;
        let monitor_tx = tx.clone();
        let monitor = StreamMonitor::spawn(move |event| {
            let _ = monitor_tx.send(Event::Stream(event));
        })
        .context("Starting the stream monitor")?;

        let osd = NotificationOsd::connect()
            .await
            .context("Connecting the notification service")?;

        info!("Backends connected");
        Ok((Self::new(settings, hotkeys, mixer, osd, tx, events), monitor))
    }
}

impl<S, H, M, O> Daemon<S, H, M, O>
where
    S: SettingsStore,
    H: HotkeyManager,
    M: Mixer,
    O: OsdDisplay,
{
    pub fn new(
        settings: S,
        hotkeys: H,
        mixer: M,
        osd: O,
        tx: UnboundedSender<Event>,
        events: UnboundedReceiver<Event>,
    ) -> Self {
        Self {
            settings,
            hotkeys,
            controller: VolumeController::new(mixer, osd),
            registry: StreamRegistry::new(),
            tx,
            events,
        }
    }

    /// Performs the initial hotkey registration from the current settings.
    pub fn enable(&mut self) -> anyhow::Result<()> {
        self.rebind_hotkeys().context("Registering volume hotkeys")
    }

    /// Dispatches events until SIGINT or bus closure, then disables.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let result = self.dispatch_loop().await;
        self.disable();
        result
    }

    /// Releases the settings binding. No hotkey or mixer calls happen after
    /// this; their resources are released on drop.
    pub fn disable(&mut self) {
        self.settings.close();
        debug!("Settings binding released");
    }

    async fn dispatch_loop(&mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                maybe_event = self.events.recv() => match maybe_event {
                    Some(event) => self.handle_event(event)?,
                    None => {
                        warn!("Event bus closed");
                        return Ok(());
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) -> anyhow::Result<()> {
        match event {
            Event::Hotkey(HotkeyAction::VolumeUp { step }) => {
                if let Err(err) = self.controller.volume_up(step) {
                    warn!("Volume step failed: {}", err);
                }
            }
            Event::Hotkey(HotkeyAction::VolumeDown { step }) => {
                if let Err(err) = self.controller.volume_down(step) {
                    warn!("Volume step failed: {}", err);
                }
            }
            Event::SettingsChanged => {
                info!("Settings changed, rebinding hotkeys");
                self.settings.reload();
                self.rebind_hotkeys()
                    .context("Rebinding hotkeys after settings change")?;
            }
            Event::Stream(MixerEvent::StreamAdded(info)) => {
                self.registry.on_stream_added(&info);
            }
            Event::Stream(MixerEvent::StreamRemoved { id }) => {
                self.registry.on_stream_removed(id);
            }
        }
        Ok(())
    }

    /// Replaces both bindings from the current settings, never diffing
    /// against the old values.
    fn rebind_hotkeys(&mut self) -> Result<(), HotkeyError> {
        let config = self.settings.current().clone();
        let step = config.step();

        // Both old bindings go before either new one, so one combo can never
        // have two live handlers.
        self.hotkeys.unregister(HOTKEY_UP);
        self.hotkeys.unregister(HOTKEY_DOWN);

        let tx = self.tx.clone();
        self.hotkeys.register(
            HOTKEY_UP,
            &config.volume_up,
            Box::new(move || {
                let _ = tx.send(Event::Hotkey(HotkeyAction::VolumeUp { step }));
            }),
        )?;
        let tx = self.tx.clone();
        self.hotkeys.register(
            HOTKEY_DOWN,
            &config.volume_down,
            Box::new(move || {
                let _ = tx.send(Event::Hotkey(HotkeyAction::VolumeDown { step }));
            }),
        )?;

        info!(
            up = %config.volume_up,
            down = %config.volume_down,
            step,
            "Volume hotkeys active"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use crate::config::{Config, ConfigError};
    use crate::hotkeys::PressAction;
    use crate::mixer::{MixerError, SinkSnapshot, StreamInfo, StreamKind};
    use crate::volume::IconTier;

    #[derive(Default)]
    struct HotkeyLog {
        calls: Vec<String>,
        actions: HashMap<String, PressAction>,
    }

    struct FakeHotkeys {
        log: Rc<RefCell<HotkeyLog>>,
        reject_combo: Option<String>,
    }

    impl HotkeyManager for FakeHotkeys {
        fn register(
            &mut self,
            name: &str,
            combo: &str,
            action: PressAction,
        ) -> Result<(), HotkeyError> {
            if self.reject_combo.as_deref() == Some(combo) {
                return Err(HotkeyError::Register {
                    combo: combo.into(),
                    reason: "rejected by fake".into(),
                });
            }
            let mut log = self.log.borrow_mut();
            log.calls.push(format!("register {name} {combo}"));
            log.actions.insert(name.to_string(), action);
            Ok(())
        }

        fn unregister(&mut self, name: &str) {
            let mut log = self.log.borrow_mut();
            log.calls.push(format!("unregister {name}"));
            log.actions.remove(name);
        }
    }

    struct FakeSettings {
        config: Config,
        pending: Option<Config>,
        closed: Rc<RefCell<bool>>,
    }

    impl SettingsStore for FakeSettings {
        fn current(&self) -> &Config {
            &self.config
        }

        fn reload(&mut self) {
            if let Some(next) = self.pending.take() {
                self.config = next;
            }
        }

        fn watch(&mut self, _on_change: Box<dyn Fn() + Send>) -> Result<(), ConfigError> {
            Ok(())
        }

        fn close(&mut self) {
            *self.closed.borrow_mut() = true;
        }
    }

    struct NullMixer;

    impl Mixer for NullMixer {
        fn vol_max_norm(&self) -> u32 {
            0x10000
        }

        fn default_sink(&mut self) -> Option<SinkSnapshot> {
            None
        }

        fn set_sink_volume(&mut self, _sink: &SinkSnapshot, _raw: u32) -> Result<(), MixerError> {
            Ok(())
        }
    }

    struct WriteCapture {
        ceiling: u32,
        writes: Rc<RefCell<Vec<u32>>>,
    }

    impl Mixer for WriteCapture {
        fn vol_max_norm(&self) -> u32 {
            self.ceiling
        }

        fn default_sink(&mut self) -> Option<SinkSnapshot> {
            Some(SinkSnapshot {
                index: 1,
                channels: 2,
                raw_volume: 0x8000,
            })
        }

        fn set_sink_volume(&mut self, _sink: &SinkSnapshot, raw: u32) -> Result<(), MixerError> {
            self.writes.borrow_mut().push(raw);
            Ok(())
        }
    }

    struct NullOsd;

    impl OsdDisplay for NullOsd {
        fn show(&mut self, _timeout_ms: i32, _tier: IconTier, _percent: u8) {}
    }

    fn settings_with(config: Config, pending: Option<Config>) -> (FakeSettings, Rc<RefCell<bool>>) {
        let closed = Rc::new(RefCell::new(false));
        (
            FakeSettings {
                config,
                pending,
                closed: closed.clone(),
            },
            closed,
        )
    }

    fn hotkeys_with_log() -> (FakeHotkeys, Rc<RefCell<HotkeyLog>>) {
        let log = Rc::new(RefCell::new(HotkeyLog::default()));
        (
            FakeHotkeys {
                log: log.clone(),
                reject_combo: None,
            },
            log,
        )
    }

    fn daemon_of<M: Mixer>(
        settings: FakeSettings,
        hotkeys: FakeHotkeys,
        mixer: M,
    ) -> Daemon<FakeSettings, FakeHotkeys, M, NullOsd> {
        let (tx, events) = mpsc::unbounded_channel();
        Daemon::new(settings, hotkeys, mixer, NullOsd, tx, events)
    }

    #[test]
    fn enable_registers_both_hotkeys_in_order() {
        let (settings, _) = settings_with(Config::default(), None);
        let (hotkeys, log) = hotkeys_with_log();
        let mut daemon = daemon_of(settings, hotkeys, NullMixer);

        daemon.enable().unwrap();

        assert_eq!(
            log.borrow().calls,
            vec![
                "unregister finevol-volume-up",
                "unregister finevol-volume-down",
                "register finevol-volume-up AudioVolumeUp",
                "register finevol-volume-down AudioVolumeDown",
            ]
        );
    }

    #[test]
    fn settings_change_rebinds_with_the_new_step() {
        let next = Config {
            volume_steps: 2,
            volume_up: "ctrl+F1".to_string(),
            volume_down: "ctrl+F2".to_string(),
        };
        let (settings, _) = settings_with(Config::default(), Some(next));
        let (hotkeys, log) = hotkeys_with_log();
        let mut daemon = daemon_of(settings, hotkeys, NullMixer);
        daemon.enable().unwrap();

        daemon.handle_event(Event::SettingsChanged).unwrap();

        let log = log.borrow();
        assert!(log
            .calls
            .contains(&"register finevol-volume-up ctrl+F1".to_string()));

        // The re-registered action carries the new step.
        log.actions["finevol-volume-up"]();
        drop(log);
        assert_eq!(
            daemon.events.try_recv().unwrap(),
            Event::Hotkey(HotkeyAction::VolumeUp { step: 2 })
        );
    }

    #[test]
    fn registration_failure_surfaces_from_handle_event() {
        let next = Config {
            volume_down: "bad+key".to_string(),
            ..Config::default()
        };
        let (settings, _) = settings_with(Config::default(), Some(next));
        let (mut hotkeys, _log) = hotkeys_with_log();
        hotkeys.reject_combo = Some("bad+key".to_string());
        let mut daemon = daemon_of(settings, hotkeys, NullMixer);
        daemon.enable().unwrap();

        assert!(daemon.handle_event(Event::SettingsChanged).is_err());
    }

    #[test]
    fn disable_closes_the_settings_store() {
        let (settings, closed) = settings_with(Config::default(), None);
        let (hotkeys, _) = hotkeys_with_log();
        let mut daemon = daemon_of(settings, hotkeys, NullMixer);

        daemon.disable();

        assert!(*closed.borrow());
    }

    #[test]
    fn stream_events_maintain_the_registry() {
        let (settings, _) = settings_with(Config::default(), None);
        let (hotkeys, _) = hotkeys_with_log();
        let mut daemon = daemon_of(settings, hotkeys, NullMixer);

        let info = StreamInfo {
            id: 5,
            kind: StreamKind::SinkInput,
            is_virtual: false,
            application_id: Some("org.example.player".to_string()),
        };
        daemon
            .handle_event(Event::Stream(MixerEvent::StreamAdded(info)))
            .unwrap();
        assert!(daemon.registry.contains(5));

        daemon
            .handle_event(Event::Stream(MixerEvent::StreamRemoved { id: 5 }))
            .unwrap();
        assert!(!daemon.registry.contains(5));
    }

    #[test]
    fn hotkey_events_drive_the_controller() {
        let writes = Rc::new(RefCell::new(Vec::new()));
        let mixer = WriteCapture {
            ceiling: 0x10000,
            writes: writes.clone(),
        };
        let (settings, _) = settings_with(Config::default(), None);
        let (hotkeys, _) = hotkeys_with_log();
        let mut daemon = daemon_of(settings, hotkeys, mixer);

        daemon
            .handle_event(Event::Hotkey(HotkeyAction::VolumeUp { step: 5 }))
            .unwrap();

        // 50% stepped to 55%, denormalized against the 0x10000 ceiling.
        assert_eq!(*writes.borrow(), vec![36045]);
    }

    #[test]
    fn scale_errors_do_not_stop_the_loop() {
        let writes = Rc::new(RefCell::new(Vec::new()));
        let mixer = WriteCapture {
            ceiling: 0,
            writes: writes.clone(),
        };
        let (settings, _) = settings_with(Config::default(), None);
        let (hotkeys, _) = hotkeys_with_log();
        let mut daemon = daemon_of(settings, hotkeys, mixer);

        daemon
            .handle_event(Event::Hotkey(HotkeyAction::VolumeUp { step: 5 }))
            .unwrap();

        assert!(writes.borrow().is_empty());
    }
}
