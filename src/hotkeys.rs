//! Global hotkey registration.
//!
//! [`HotkeyManager`] is the capability the daemon binds volume keys through;
//! bindings are keyed by name so a rebind can release exactly the pair it
//! owns. [`GlobalHotkeys`] is the production implementation over the X11
//! global-hotkey service. Presses arrive on the service's listener thread
//! and are handed to the action registered for the combo.
//!
//! Wayland sessions have no equivalent global-grab protocol, so this backend
//! is X11 only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HotkeyError {
    #[error("Hotkey combo '{combo}' is not valid: {reason}")]
    Parse { combo: String, reason: String },
    #[error("Hotkey backend unavailable: {0}")]
    Backend(String),
    #[error("Hotkey '{combo}' could not be registered: {reason}")]
    Register { combo: String, reason: String },
}

/// Callback run on the listener thread when a bound combo is pressed.
pub type PressAction = Box<dyn Fn() + Send + Sync + 'static>;

/// Host hotkey service.
pub trait HotkeyManager {
    /// Binds `combo` under `name`, replacing any prior binding of that name.
    fn register(&mut self, name: &str, combo: &str, action: PressAction)
        -> Result<(), HotkeyError>;

    /// Releases the named binding. Unknown names are a no-op.
    fn unregister(&mut self, name: &str);
}

type ActionMap = Arc<Mutex<HashMap<u32, PressAction>>>;

/// System-wide hotkeys grabbed through the X11 global-hotkey service.
pub struct GlobalHotkeys {
    manager: GlobalHotKeyManager,
    actions: ActionMap,
    names: HashMap<String, HotKey>,
}

impl GlobalHotkeys {
    /// Connects the backend and installs the press handler.
    ///
    /// Nothing is bound yet; bindings go in through
    /// [`register`](HotkeyManager::register).
    pub fn new() -> Result<Self, HotkeyError> {
        let manager =
            GlobalHotKeyManager::new().map_err(|err| HotkeyError::Backend(err.to_string()))?;

        let actions: ActionMap = Arc::new(Mutex::new(HashMap::new()));
        let handler_actions = actions.clone();
        GlobalHotKeyEvent::set_event_handler(Some(move |event: GlobalHotKeyEvent| {
            if event.state != HotKeyState::Pressed {
                return;
            }
            // A press racing a rebind resolves to nothing rather than to a
            // stale action.
            if let Some(action) = handler_actions.lock().unwrap().get(&event.id) {
                action();
            }
        }));

        Ok(Self {
            manager,
            actions,
            names: HashMap::new(),
        })
    }
}

impl HotkeyManager for GlobalHotkeys {
    fn register(
        &mut self,
        name: &str,
        combo: &str,
        action: PressAction,
    ) -> Result<(), HotkeyError> {
        let hotkey = parse_combo(combo)?;
        self.unregister(name);

        // The action goes into the map before the grab so no press can land
        // on an unknown id.
        self.actions.lock().unwrap().insert(hotkey.id(), action);
        if let Err(err) = self.manager.register(hotkey) {
            self.actions.lock().unwrap().remove(&hotkey.id());
            return Err(HotkeyError::Register {
                combo: combo.into(),
                reason: err.to_string(),
            });
        }

        self.names.insert(name.to_string(), hotkey);
        debug!(name, combo, "Hotkey bound");
        Ok(())
    }

    fn unregister(&mut self, name: &str) {
        if let Some(hotkey) = self.names.remove(name) {
            if let Err(err) = self.manager.unregister(hotkey) {
                warn!("Hotkey '{}' was not released: {}", name, err);
            }
            self.actions.lock().unwrap().remove(&hotkey.id());
            debug!(name, "Hotkey released");
        }
    }
}

impl Drop for GlobalHotkeys {
    fn drop(&mut self) {
        let names: Vec<String> = self.names.keys().cloned().collect();
        for name in names {
            self.unregister(&name);
        }
    }
}

fn parse_combo(combo: &str) -> Result<HotKey, HotkeyError> {
    combo.parse::<HotKey>().map_err(|err| HotkeyError::Parse {
        combo: combo.into(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_key_combos_parse() {
        assert!(parse_combo("AudioVolumeUp").is_ok());
        assert!(parse_combo("AudioVolumeDown").is_ok());
        assert!(parse_combo("ctrl+alt+Equal").is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected_with_the_combo_named() {
        let err = parse_combo("AudioVolumeSideways").unwrap_err();
        assert!(err.to_string().contains("AudioVolumeSideways"));
    }
}
