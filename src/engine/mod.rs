//! Theater state reconciliation engine
//!
//! One engine per theater. The engine subscribes the telemetry topics its
//! catalog implies, folds inbound messages into the observed device state,
//! re-derives the current activity after every message, and persists the
//! selection whenever it changes. User selections from the view layer enter
//! through `select_activity`/`select_device` and bypass matching entirely.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusMessage, SharedBus};
use crate::catalog::{Activity, Device, TheaterCatalog};
use crate::commands::DeviceCommand;
use crate::persist::{storage_key, SelectionRecord, SelectionStore};
use crate::telemetry::{routes_for, ObservedState, PowerState, Signal};

/// Snapshot served to the view layer.
#[derive(Debug, Clone, Serialize)]
pub struct TheaterState {
    #[serde(rename = "currentActivity")]
    pub current_activity: String,

    #[serde(rename = "currentDevice")]
    pub current_device: String,

    pub observed: ObservedState,
}

/// Engine-owned mutable state. Only the named methods below touch it; every
/// mutation is serialized through the engine's lock.
#[derive(Debug, Default)]
struct EngineState {
    observed: ObservedState,
    selection: SelectionRecord,
}

pub struct TheaterEngine {
    title: String,
    catalog: TheaterCatalog,
    /// Topic → signal table built once at construction. Doubles as the
    /// subscription set, so mount and unmount operate on the identical topics.
    routes: HashMap<String, Signal>,
    bus: SharedBus,
    store: Arc<dyn SelectionStore>,
    command_namespace: String,
    state: RwLock<EngineState>,
    shutdown: CancellationToken,
}

impl TheaterEngine {
    pub fn new(
        title: impl Into<String>,
        catalog: TheaterCatalog,
        bus: SharedBus,
        store: Arc<dyn SelectionStore>,
        command_namespace: impl Into<String>,
    ) -> Self {
        let routes = routes_for(catalog.devices());
        Self {
            title: title.into(),
            catalog,
            routes,
            bus,
            store,
            command_namespace: command_namespace.into(),
            state: RwLock::new(EngineState::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn catalog(&self) -> &TheaterCatalog {
        &self.catalog
    }

    fn storage_key(&self) -> String {
        storage_key(&self.title)
    }

    /// Restore the persisted selection, subscribe telemetry topics and start
    /// the message loop.
    pub async fn mount(self: &Arc<Self>) -> Result<()> {
        self.restore_selection().await;

        for topic in self.routes.keys() {
            self.bus.subscribe(topic).await?;
        }
        info!(
            theater = %self.title,
            topics = self.routes.len(),
            "engine mounted"
        );

        // Take the receiver before spawning so nothing delivered after mount
        // returns can slip past the loop.
        let rx = self.bus.messages();
        let engine = self.clone();
        tokio::spawn(async move { engine.run(rx).await });

        Ok(())
    }

    /// Stop the message loop and unsubscribe every topic registered at mount.
    pub async fn unmount(&self) {
        self.shutdown.cancel();

        for topic in self.routes.keys() {
            if let Err(e) = self.bus.unsubscribe(topic).await {
                warn!(theater = %self.title, %topic, error = %e, "unsubscribe failed");
            }
        }
        info!(theater = %self.title, "engine unmounted");
    }

    async fn run(&self, mut rx: broadcast::Receiver<BusMessage>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = rx.recv() => match result {
                    Ok(message) => self.handle_message(&message).await,
                    Err(RecvError::Lagged(skipped)) => {
                        // Telemetry is state-bearing, not event-bearing: the
                        // next message per signal restores a correct view.
                        warn!(theater = %self.title, skipped, "message loop lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        debug!(theater = %self.title, "engine loop exited");
    }

    /// Fold one inbound message into the observed state and re-derive the
    /// activity. Messages on topics outside the route table are not ours.
    async fn handle_message(&self, message: &BusMessage) {
        let Some(&signal) = self.routes.get(&message.topic) else {
            return;
        };

        let mut state = self.state.write().await;
        state.observed.apply(signal, &message.payload);
        self.rederive(&mut state).await;
    }

    /// Match the observed state against the activity catalog. Gated on TV
    /// power: while the TV is off the resolved input is stale and any match
    /// would be meaningless. An unmatched state changes nothing.
    async fn rederive(&self, state: &mut EngineState) {
        if state.observed.power != PowerState::On {
            return;
        }

        let matched = self.catalog.matching_activity(
            state.observed.tv_input.as_deref(),
            state.observed.avr_input.as_deref(),
        );

        if let Some(activity) = matched {
            if state.selection.current_activity != activity.name {
                info!(
                    theater = %self.title,
                    activity = %activity.name,
                    "activity matched from telemetry"
                );
                state.selection.current_activity = activity.name.clone();
                state.selection.current_device = activity.default_device.clone();
                self.persist(&state.selection).await;
            }
        }
    }

    /// User command: focus a device without changing the activity.
    pub async fn select_device(&self, device: &Device) {
        let mut state = self.state.write().await;
        state.selection.current_device = device.display_name.clone();
        self.persist(&state.selection).await;
    }

    /// User command: start an activity; the device follows its default.
    pub async fn select_activity(&self, activity: &Activity) {
        let mut state = self.state.write().await;
        state.selection.current_activity = activity.name.clone();
        state.selection.current_device = activity.default_device.clone();
        self.persist(&state.selection).await;
    }

    /// Forward a remote-control button press to the device bridge.
    pub async fn send_command(&self, command: &DeviceCommand) -> Result<()> {
        let topic = command.topic(&self.command_namespace);
        debug!(theater = %self.title, %topic, name = %command.name, "sending device command");
        self.bus.publish(&topic, &command.name).await
    }

    /// Current selection and observed state, for the view layer.
    pub async fn state(&self) -> TheaterState {
        let state = self.state.read().await;
        TheaterState {
            current_activity: state.selection.current_activity.clone(),
            current_device: state.selection.current_device.clone(),
            observed: state.observed.clone(),
        }
    }

    /// Load the persisted selection. Any failure resets to sentinel defaults
    /// and immediately re-persists them so a corrupt record never survives.
    async fn restore_selection(&self) {
        let key = self.storage_key();
        match self.store.load(&key).await {
            Ok(record) => {
                debug!(theater = %self.title, ?record, "restored persisted selection");
                self.state.write().await.selection = record;
            }
            Err(e) => {
                warn!(
                    theater = %self.title,
                    error = %e,
                    "persisted selection unreadable, resetting to defaults"
                );
                let sentinel = SelectionRecord::default();
                self.state.write().await.selection = sentinel.clone();
                self.persist(&sentinel).await;
            }
        }
    }

    /// Best-effort write-through; the in-memory selection stays authoritative
    /// when the store is unavailable.
    async fn persist(&self, record: &SelectionRecord) {
        if let Err(e) = self.store.save(&self.storage_key(), record).await {
            warn!(theater = %self.title, error = %e, "failed to persist selection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::catalog::ActivityInputs;
    use crate::persist::MemoryStore;

    fn tv() -> Device {
        Device {
            type_name: "lgtv".to_string(),
            physical_id: "aa:bb:cc".to_string(),
            display_name: "TV".to_string(),
        }
    }

    fn avr() -> Device {
        Device {
            type_name: "denon".to_string(),
            physical_id: "avr1".to_string(),
            display_name: "AVR".to_string(),
        }
    }

    fn catalog() -> TheaterCatalog {
        TheaterCatalog::new(
            vec![tv(), avr()],
            vec![
                Activity {
                    name: "Watch TV".to_string(),
                    default_device: "TV".to_string(),
                    inputs: ActivityInputs {
                        tv: Some("hdmi1".to_string()),
                        avr: None,
                    },
                },
                Activity {
                    name: "Listen to Music".to_string(),
                    default_device: "AVR".to_string(),
                    inputs: ActivityInputs {
                        tv: None,
                        avr: Some("CD".to_string()),
                    },
                },
            ],
        )
    }

    struct Fixture {
        engine: Arc<TheaterEngine>,
        bus: Arc<MemoryBus>,
        store: Arc<MemoryStore>,
    }

    /// Engine over a memory bus/store, with a valid persisted record seeded
    /// so mount itself performs no store write.
    async fn fixture() -> Fixture {
        let bus = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryStore::new());
        store.seed_raw(
            "theater-Den",
            r#"{"currentActivity":"All Off","currentDevice":"None"}"#,
        );

        let engine = Arc::new(TheaterEngine::new(
            "Den",
            catalog(),
            bus.clone(),
            store.clone(),
            "harmony",
        ));
        engine.restore_selection().await;

        Fixture { engine, bus, store }
    }

    fn message(topic: &str, payload: &str) -> BusMessage {
        BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        }
    }

    async fn power_on_hdmi1(engine: &TheaterEngine) {
        engine
            .handle_message(&message("lgtv/aa:bb:cc/status/power", "on"))
            .await;
        engine
            .handle_message(&message(
                "lgtv/aa:bb:cc/status/foregroundApp",
                r#"{"appId":"com.webos.app.hdmi1"}"#,
            ))
            .await;
        engine
            .handle_message(&message(
                "lgtv/aa:bb:cc/status/launchPoints",
                r#"{"com.webos.app.hdmi1":{"title":"HDMI 1"}}"#,
            ))
            .await;
    }

    #[tokio::test]
    async fn test_telemetry_match_selects_activity_with_one_write() {
        let f = fixture().await;
        power_on_hdmi1(&f.engine).await;

        let state = f.engine.state().await;
        assert_eq!(state.current_activity, "Watch TV");
        assert_eq!(state.current_device, "TV");
        assert_eq!(state.observed.tv_input.as_deref(), Some("hdmi1"));
        // The whole transition persists exactly once.
        assert_eq!(f.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_message_is_idempotent() {
        let f = fixture().await;
        power_on_hdmi1(&f.engine).await;

        let launch_points = message(
            "lgtv/aa:bb:cc/status/launchPoints",
            r#"{"com.webos.app.hdmi1":{"title":"HDMI 1"}}"#,
        );
        f.engine.handle_message(&launch_points).await;
        f.engine.handle_message(&launch_points).await;

        let state = f.engine.state().await;
        assert_eq!(state.current_activity, "Watch TV");
        assert_eq!(f.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_no_match_leaves_selection_unchanged() {
        let f = fixture().await;
        f.engine
            .handle_message(&message("lgtv/aa:bb:cc/status/power", "on"))
            .await;
        f.engine
            .handle_message(&message("denon/avr1/status/SI", "SAT/CBL"))
            .await;

        let state = f.engine.state().await;
        assert_eq!(state.current_activity, "All Off");
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_power_gate_blocks_matching_on_stale_input() {
        let f = fixture().await;
        power_on_hdmi1(&f.engine).await;

        // User switches away, then the TV goes off. The resolved "hdmi1"
        // label is now stale.
        let music = f.engine.catalog().activity("Listen to Music").unwrap().clone();
        f.engine.select_activity(&music).await;
        f.engine
            .handle_message(&message("lgtv/aa:bb:cc/status/power", "off"))
            .await;

        // An unrelated message must not re-match "Watch TV" through the
        // stale input while power is off.
        f.engine
            .handle_message(&message("denon/avr1/status/SI", "TUNER"))
            .await;

        let state = f.engine.state().await;
        assert_eq!(state.current_activity, "Listen to Music");
        assert_eq!(state.current_device, "AVR");
    }

    #[tokio::test]
    async fn test_user_selection_overrides_telemetry_match() {
        let f = fixture().await;
        power_on_hdmi1(&f.engine).await;
        assert_eq!(f.engine.state().await.current_activity, "Watch TV");

        let music = f.engine.catalog().activity("Listen to Music").unwrap().clone();
        f.engine.select_activity(&music).await;

        let state = f.engine.state().await;
        assert_eq!(state.current_activity, "Listen to Music");
        assert_eq!(state.current_device, "AVR");
        assert_eq!(f.store.write_count(), 2);
        // The override is persisted immediately.
        assert!(f
            .store
            .raw("theater-Den")
            .unwrap()
            .contains("Listen to Music"));
    }

    #[tokio::test]
    async fn test_select_device_keeps_activity() {
        let f = fixture().await;
        f.engine.select_device(&avr()).await;

        let state = f.engine.state().await;
        assert_eq!(state.current_device, "AVR");
        assert_eq!(state.current_activity, "All Off");
    }

    #[tokio::test]
    async fn test_corrupt_record_resets_and_repersists_sentinels() {
        let bus = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryStore::new());
        store.seed_raw("theater-Den", "{garbage");

        let engine = Arc::new(TheaterEngine::new(
            "Den",
            catalog(),
            bus,
            store.clone(),
            "harmony",
        ));
        engine.restore_selection().await;

        let state = engine.state().await;
        assert_eq!(state.current_activity, "All Off");
        assert_eq!(state.current_device, "None");
        // Self-healing: the sentinels replaced the corrupt record on disk.
        assert_eq!(store.write_count(), 1);
        assert!(store.raw("theater-Den").unwrap().contains("All Off"));
    }

    #[tokio::test]
    async fn test_legacy_record_restores_like_canonical() {
        let bus = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryStore::new());
        store.seed_raw(
            "theater-Den",
            r#"{"activeActivity":"Watch TV","activeDevice":"TV"}"#,
        );

        let engine = Arc::new(TheaterEngine::new(
            "Den",
            catalog(),
            bus,
            store.clone(),
            "harmony",
        ));
        engine.restore_selection().await;

        let state = engine.state().await;
        assert_eq!(state.current_activity, "Watch TV");
        assert_eq!(state.current_device, "TV");
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_store_write_failure_keeps_memory_state() {
        let f = fixture().await;
        f.store.set_fail_writes(true);

        power_on_hdmi1(&f.engine).await;

        // The write failed but the in-memory selection is correct.
        let state = f.engine.state().await;
        assert_eq!(state.current_activity, "Watch TV");
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_send_command_publishes_to_namespace() {
        let f = fixture().await;
        let command = DeviceCommand {
            device_id: "53916966".to_string(),
            action_id: "Yellow".to_string(),
            name: "Yellow".to_string(),
        };
        f.engine.send_command(&command).await.unwrap();

        let published = f.bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "harmony/53916966/set/device/Yellow");
        assert_eq!(published[0].payload, "Yellow");
    }

    #[tokio::test]
    async fn test_mount_subscribes_catalog_topics_and_unmount_removes_them() {
        let f = fixture().await;
        f.engine.mount().await.unwrap();

        assert_eq!(
            f.bus.subscribed_topics().await,
            vec![
                "denon/avr1/status/SI".to_string(),
                "lgtv/aa:bb:cc/status/foregroundApp".to_string(),
                "lgtv/aa:bb:cc/status/launchPoints".to_string(),
                "lgtv/aa:bb:cc/status/power".to_string(),
            ]
        );

        f.engine.unmount().await;
        assert!(f.bus.subscribed_topics().await.is_empty());
    }
}
