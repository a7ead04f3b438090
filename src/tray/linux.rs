//! Linux system tray implementation using ksni (D-Bus StatusNotifierItem).

use super::{icon_name, TrayError, TrayStatus};
use crate::daemon::StatusSurface;
use crate::events::StatusEvent;
use crate::input::{Action, ActionDispatcher};
use ksni::menu::*;
use ksni::{Handle, ToolTip, Tray, TrayMethods};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

struct OclipTray {
    dispatcher: Arc<ActionDispatcher>,
    quit: Arc<Notify>,
    status: TrayStatus,
}

impl OclipTray {
    fn toggle_item(label: &str, checked: bool, action: Action) -> MenuItem<Self> {
        CheckmarkItem {
            label: label.into(),
            checked,
            activate: Box::new(move |tray: &mut Self| {
                debug!("Tray: {:?}", action);
                tray.dispatcher.dispatch(action);
            }),
            ..Default::default()
        }
        .into()
    }
}

impl Tray for OclipTray {
    fn id(&self) -> String {
        "oclip".into()
    }

    fn icon_name(&self) -> String {
        icon_name(self.status.lifecycle, self.dispatcher.flags().monitoring()).into()
    }

    fn title(&self) -> String {
        "oclip".into()
    }

    fn tool_tip(&self) -> ToolTip {
        ToolTip {
            title: "oclip - Clipboard Improver".into(),
            description: self.status.line(),
            icon_name: self.icon_name(),
            icon_pixmap: Vec::new(),
        }
    }

    fn menu(&self) -> Vec<MenuItem<Self>> {
        let flags = self.dispatcher.flags();

        vec![
            StandardItem {
                label: self.status.line(),
                enabled: false,
                ..Default::default()
            }
            .into(),
            MenuItem::Separator,
            Self::toggle_item("Monitoring", flags.monitoring(), Action::ToggleMonitor),
            Self::toggle_item(
                "Notifications",
                flags.notifications(),
                Action::ToggleNotifications,
            ),
            Self::toggle_item("Auto-paste", flags.auto_paste(), Action::ToggleAutoPaste),
            MenuItem::Separator,
            StandardItem {
                label: "Quit".into(),
                activate: Box::new(|tray: &mut Self| {
                    debug!("Tray: Quit clicked");
                    tray.quit.notify_one();
                }),
                ..Default::default()
            }
            .into(),
        ]
    }
}

/// Manages the system tray icon and menu
pub struct TrayManager {
    handle: Handle<OclipTray>,
}

impl TrayManager {
    /// Register the tray on the session bus. "Quit" fires `quit`.
    pub async fn new(dispatcher: Arc<ActionDispatcher>, quit: Arc<Notify>) -> Result<Self, TrayError> {
        if !super::is_tray_supported() {
            return Err(TrayError::NotSupported);
        }

        let tray = OclipTray {
            dispatcher,
            quit,
            status: TrayStatus::default(),
        };

        let handle = tray
            .spawn()
            .await
            .map_err(|e: ksni::Error| TrayError::DBus(e.to_string()))?;

        info!("System tray initialized (D-Bus StatusNotifierItem)");
        Ok(Self { handle })
    }

    /// Fold a status event into the tray and re-render. Flag toggles only
    /// re-render, the checkmarks read the flags directly.
    pub async fn handle_event(&self, event: StatusEvent) {
        if !TrayStatus::affects(&event) {
            return;
        }
        self.handle
            .update(move |tray| tray.status.apply(&event))
            .await;
    }
}

impl StatusSurface for TrayManager {
    fn stop(&self) {
        info!("Removing tray icon");
        // Shutdown is requested immediately; completion is not awaited
        let _ = self.handle.shutdown();
    }
}
