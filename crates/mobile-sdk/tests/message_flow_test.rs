//! End-to-end flows through the public SDK surface: triggering, delaying and dismissing
//! messages with lifecycle events, and identity state persisted across restarts.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use campaign_core::config::QueueConfig;
    use campaign_core::event_bus::CaptureSink;
    use campaign_core::types::MessagingEventType;
    use campaign_mobile_sdk::display::MessageDisplayController;
    use campaign_mobile_sdk::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Delays every message the first time it is seen.
    #[derive(Default)]
    struct DelayOnce {
        seen: Mutex<Vec<String>>,
        seconds: u32,
    }

    impl MessageDisplayController for DelayOnce {
        fn should_display_message(&self, context: &ActionContext) -> Option<MessageDisplayChoice> {
            let mut seen = self.seen.lock();
            if seen.iter().any(|id| id == context.message_id()) {
                return None;
            }
            seen.push(context.message_id().to_string());
            Some(MessageDisplayChoice::delay(self.seconds))
        }
    }

    fn alert_definition(shown: Arc<Mutex<Vec<Presentation>>>) -> ActionDefinition {
        ActionDefinition::new("Alert", ActionKind::MESSAGE)
            .with_args(vec![
                ActionArg::arg_named("Title", "Hello"),
                ActionArg::arg_named("Accept button.Text", "OK"),
                ActionArg::action_arg_named("Accept action", ""),
            ])
            .on_present(move |p| {
                shown.lock().push(p.clone());
                Ok(true)
            })
            .on_dismiss(|p| {
                p.dismiss();
                Ok(())
            })
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        true
    }

    #[test]
    fn test_lifecycle_events_reach_sink() {
        let sink = Arc::new(CaptureSink::new());
        let impressions = Arc::new(ImpressionLog::new());
        let manager = ActionManager::builder(Arc::new(ManualScheduler::new()))
            .display_listener(Arc::new(EventSinkListener::new(sink.clone())))
            .impression_recorder(impressions.clone())
            .build();
        let shown = Arc::new(Mutex::new(Vec::new()));
        manager.define_action(alert_definition(shown.clone())).unwrap();

        manager.trigger_one(ActionContext::new("Alert", "100"), Priority::Default);
        manager.trigger_one(ActionContext::new("Alert", "101"), Priority::Default);

        let presentation = manager.current_presentation().unwrap();
        presentation.execute(
            &ActionContext::new("Open URL", "100").with_parent(presentation.context().clone()),
        );
        presentation.dismiss();
        manager.current_presentation().unwrap().dismiss();

        let types: Vec<_> = sink.events().iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                MessagingEventType::MessageDisplayed,
                MessagingEventType::ActionExecuted,
                MessagingEventType::MessageDismissed,
                MessagingEventType::MessageDisplayed,
                MessagingEventType::MessageDismissed,
            ]
        );
        assert_eq!(impressions.message_impressions("100"), 1);
        assert_eq!(impressions.message_impressions("101"), 1);
        assert!(manager.current_action().is_none());
    }

    #[test]
    fn test_manual_delay_releases_in_order() {
        let scheduler = Arc::new(ManualScheduler::new());
        let manager = ActionManager::builder(scheduler.clone())
            .display_controller(Arc::new(DelayOnce {
                seconds: 30,
                ..DelayOnce::default()
            }))
            .build();
        let shown = Arc::new(Mutex::new(Vec::new()));
        manager.define_action(alert_definition(shown.clone())).unwrap();

        manager.trigger_one(ActionContext::new("Alert", "a"), Priority::Default);
        manager.trigger_one(ActionContext::new("Alert", "b"), Priority::Default);
        assert!(shown.lock().is_empty());
        assert_eq!(scheduler.pending(), 2);

        assert_eq!(scheduler.advance(30), 2);
        assert_eq!(shown.lock().len(), 1);
        manager.dismiss_current_action();

        let ids: Vec<_> = shown
            .lock()
            .iter()
            .map(|p| p.context().message_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_tokio_scheduler_redelivers() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let scheduler = Arc::new(TokioScheduler::new(runtime.handle().clone()));
        let config = QueueConfig {
            use_worker_for_decisions: true,
            ..QueueConfig::default()
        };
        let manager = ActionManager::builder(scheduler)
            .config(config)
            .runtime(runtime.handle().clone())
            .display_controller(Arc::new(DelayOnce {
                seconds: 1,
                ..DelayOnce::default()
            }))
            .build();
        let shown = Arc::new(Mutex::new(Vec::new()));
        manager.define_action(alert_definition(shown.clone())).unwrap();

        let started = Instant::now();
        manager.trigger_one(ActionContext::new("Alert", "late"), Priority::Default);

        assert!(wait_until(|| !shown.lock().is_empty()));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(manager.current_action().unwrap().context().message_id(), "late");
    }

    #[test]
    fn test_definition_drift_check() {
        let manager = ActionManager::builder(Arc::new(ManualScheduler::new())).build();
        let shown = Arc::new(Mutex::new(Vec::new()));
        manager.define_action(alert_definition(shown)).unwrap();

        let definitions = manager.definitions();
        let local = definitions.action_definition_maps();
        assert_eq!(local["Alert"]["values"]["Accept button"]["Text"], json!("OK"));

        definitions.set_server_definitions(Some(local.clone()));
        assert!(definitions.are_local_and_server_definitions_equal());

        let mut drifted = local;
        drifted["Alert"]["values"]["Title"] = json!("Changed");
        definitions.set_server_definitions(Some(drifted));
        assert!(!definitions.are_local_and_server_definitions_equal());
    }

    #[test]
    fn test_identity_persists_across_restarts() {
        let path = std::env::temp_dir().join(format!(
            "campaign-identity-{}.json",
            uuid::Uuid::new_v4()
        ));

        {
            let store = Arc::new(JsonFileStore::open(&path));
            let mut manager = IdentityManager::new("deviceId", "deviceId", store);
            assert_eq!(manager.identifier(), "deviceId");
            assert!(manager.is_first_time_start());
            manager.set_user_id("userId");
            assert_eq!(manager.identifier(), "deviceId");
        }

        let store = Arc::new(JsonFileStore::open(&path));
        let mut manager = IdentityManager::new("deviceId", "userId", store);
        assert!(!manager.is_first_time_start());
        assert_eq!(manager.login_state(), LoginState::Identified);
        assert_eq!(manager.identifier(), "deviceId");

        manager.set_user_id("userId2");
        assert_eq!(manager.identifier(), "deviceId_c9430313f8");
        assert!(manager.identifier().len() <= 61);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_merged_identity_survives_interrupted_write() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        {
            let store = Arc::new(JsonFileStore::open(&path));
            let mut manager = IdentityManager::new("deviceId", "deviceId", store);
            manager.set_user_id("userId");
            assert_eq!(manager.identifier(), "deviceId");
        }

        // A crash during the next save leaves a partial temp file beside the state file.
        let saved = std::fs::read(&path).unwrap();
        let mut partial = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        partial.write_all(&saved[..saved.len() / 2]).unwrap();
        partial.into_temp_path().keep().unwrap();

        let store = Arc::new(JsonFileStore::open(&path));
        let manager = IdentityManager::new("deviceId", "userId", store);
        assert_eq!(manager.login_state(), LoginState::Identified);
        assert_eq!(manager.identifier(), "deviceId");
    }
}
