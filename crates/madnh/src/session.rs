//! Scripted dialog session.
//!
//! Wires emitters the way a dialog UI does: every button is followed by the
//! dialog, the dialog is followed by the application. Button clicks travel
//! through the waiter as opaque callback keys, the dialog reacts to the
//! `close` button by closing itself, and the application watches the dialog
//! lifecycle through notices, mimicking the dialog's `close` as its own.

use crate::config::{AppConfig, SessionSettings};
use compact_str::{format_compact, CompactString};
use madnh_event_system::{
    AttachOptions, Callback, EmitterConfig, EventEmitter, ListenerOptions, Result, Waiter,
    NOTICED, PRIORITY_HIGHEST,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the button that closes the dialog.
pub const CLOSE_BUTTON: &str = "close";

/// How long to wait for async notices to settle.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// What a session observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub buttons: usize,
    /// Clicks the dialog noticed from its buttons
    pub clicks: usize,
    /// Dialog lifecycle events the application noticed
    pub lifecycle: usize,
    /// Notices of any kind the application received
    pub app_notices: usize,
    pub dialog_closed: bool,
    /// Waiter keys still registered after cleanup
    pub leftover_waiters: usize,
}

struct DialogButton {
    name: CompactString,
    emitter: Arc<EventEmitter>,
    /// Waiter key standing in for an inline `onclick` handler
    onclick: CompactString,
}

#[derive(Default)]
struct Counters {
    clicks: AtomicUsize,
    lifecycle: AtomicUsize,
    app_notices: AtomicUsize,
    closed: AtomicBool,
}

/// One dialog with its buttons, followed by an application emitter.
pub struct Session {
    settings: SessionSettings,
    emitter_config: EmitterConfig,
    waiter: Waiter,
    app: Arc<EventEmitter>,
    dialog: Arc<EventEmitter>,
    buttons: Vec<DialogButton>,
    counters: Arc<Counters>,
}

impl Session {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let emitter_config = config.emitter.clone();
        let settings = config.session.clone();
        let counters = Arc::new(Counters::default());
        let waiter = Waiter::new();

        let app = EventEmitter::builder("app")
            .id("app")
            .config(emitter_config.clone())
            .build();
        let dialog = EventEmitter::builder("dialog")
            .config(emitter_config.clone())
            .build();

        let attach_options = if settings.hard_attach {
            AttachOptions::new().hard()
        } else {
            AttachOptions::new()
        };

        dialog.attach(&app, attach_options.clone().excepts(["shown"]))?;
        dialog.private_events(["render"]);

        let mut buttons = Vec::with_capacity(settings.buttons);
        for index in 0..settings.buttons {
            let name = if index + 1 == settings.buttons {
                CompactString::new(CLOSE_BUTTON)
            } else {
                format_compact!("button_{}", index)
            };
            let emitter = EventEmitter::builder("button")
                .id(format_compact!("{}_{}", dialog.id(), name))
                .config(emitter_config.clone())
                .build();
            emitter.attach(&dialog, attach_options.clone().only(["click"]))?;

            let target = Arc::downgrade(&emitter);
            let button_name = name.clone();
            let onclick = waiter.create_func(
                move |args: &[Value]| match target.upgrade() {
                    Some(button) => {
                        button.emit("click", &json!({ "button": button_name.as_str(), "args": args }));
                        Value::Bool(true)
                    }
                    None => Value::Bool(false),
                },
                false,
                &format!("{name} click"),
            );

            buttons.push(DialogButton {
                name,
                emitter,
                onclick,
            });
        }

        let session = Self {
            settings,
            emitter_config,
            waiter,
            app,
            dialog,
            buttons,
            counters,
        };
        session.register_listeners();
        Ok(session)
    }

    fn register_listeners(&self) {
        let counters = self.counters.clone();
        let dialog = Arc::downgrade(&self.dialog);
        self.dialog.on("button.click", move |notice: &Value| {
            counters.clicks.fetch_add(1, Ordering::SeqCst);
            let button = notice["data"]["button"].as_str().unwrap_or_default();
            debug!("🖱️ Dialog noticed click on {}", button);
            if button == CLOSE_BUTTON {
                if let Some(dialog) = dialog.upgrade() {
                    dialog.emit("close", &json!({ "reason": "button" }));
                }
            }
        });

        let counters = self.counters.clone();
        self.app.on_with(
            "dialog.open",
            move |notice: &Value| {
                counters.lifecycle.fetch_add(1, Ordering::SeqCst);
                info!("🪟 Dialog {} opened: {}", notice["id"], notice["data"]["title"]);
            },
            ListenerOptions::new().priority(PRIORITY_HIGHEST),
        );

        // The app re-emits the dialog's close as its own event.
        self.app.mimic(["dialog.close"]);
        let counters = self.counters.clone();
        self.app.once("close", move |data: &Value| {
            counters.lifecycle.fetch_add(1, Ordering::SeqCst);
            counters.closed.store(true, Ordering::SeqCst);
            info!("🪟 Dialog closed ({})", data["reason"]);
        });

        let counters = self.counters.clone();
        self.app.on(NOTICED, move |_: &Value| {
            counters.app_notices.fetch_add(1, Ordering::SeqCst);
        });
    }

    /// Opens the dialog, clicks every button in order and waits until the
    /// application has seen the dialog close.
    pub async fn run(&self) -> Result<SessionReport> {
        info!(
            "🎬 Running session with {} button(s), {} notices",
            self.buttons.len(),
            if self.settings.hard_attach { "hard" } else { "async" }
        );

        self.dialog
            .emit("render", &json!({ "buttons": self.buttons.len() }));
        self.dialog.emit_event_then(
            ["open", "shown"],
            &json!({ "title": self.settings.title }),
            |names| debug!("Dialog emitted {:?}", names),
        );

        for button in &self.buttons {
            let clicked = self
                .waiter
                .call_func(&Callback::name(&button.onclick), &[json!(button.name.as_str())])?;
            debug!("👆 {} handled: {}", button.emitter.id(), clicked);
        }

        self.settle().await;

        let leftover_waiters = self.cleanup();
        Ok(SessionReport {
            buttons: self.buttons.len(),
            clicks: self.counters.clicks.load(Ordering::SeqCst),
            lifecycle: self.counters.lifecycle.load(Ordering::SeqCst),
            app_notices: self.counters.app_notices.load(Ordering::SeqCst),
            dialog_closed: self.counters.closed.load(Ordering::SeqCst),
            leftover_waiters,
        })
    }

    /// Waits for async notices to reach the application.
    async fn settle(&self) {
        let step = self.emitter_config.async_delay().max(Duration::from_millis(1));
        let closed = async {
            while !self.counters.closed.load(Ordering::SeqCst) {
                tokio::time::sleep(step).await;
            }
        };
        if tokio::time::timeout(SETTLE_TIMEOUT, closed).await.is_err() {
            warn!("⏰ Dialog close was not noticed within {:?}", SETTLE_TIMEOUT);
        }
    }

    /// Detaches the buttons and drops their waiter keys.
    fn cleanup(&self) -> usize {
        for button in &self.buttons {
            if let Err(e) = button.emitter.detach(&self.dialog) {
                warn!("❌ Failed to detach {}: {}", button.emitter.id(), e);
            }
        }
        let removed = self
            .waiter
            .remove(self.buttons.iter().map(|button| button.onclick.as_str()));
        debug!("🧹 Removed {} waiter key(s)", removed);
        self.waiter.len()
    }

    pub fn app(&self) -> &Arc<EventEmitter> {
        &self.app
    }

    pub fn dialog(&self) -> &Arc<EventEmitter> {
        &self.dialog
    }
}
