//! Alarm engine: rule evaluation, debounce and cooldown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use vigil_models::{AlarmEvent, AlarmRule, DetectionResult, NotifyTarget, Severity};

use crate::dispatcher::NotificationTask;
use crate::error::{AlarmError, AlarmResult};

/// Receives tasks for alarms that passed all checks. Implemented by the
/// notification dispatcher; tests substitute a recording sink.
pub trait AlarmSink: Send + Sync {
    fn submit(&self, task: NotificationTask);
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmEngineStats {
    pub results_evaluated: u64,
    pub alarms_triggered: u64,
    pub suppressed_by_cooldown: u64,
}

/// Per-session debounce state, dropped when the session is removed.
#[derive(Default)]
struct SessionDebounce {
    /// Consecutive qualifying frames per (rule id, class name)
    counts: HashMap<(String, String), u32>,
    /// Last trigger instant per rule id
    last_trigger: HashMap<String, DateTime<Utc>>,
}

/// Evaluates every detection result against the registered rules.
///
/// Rules are evaluated in registration order. A rule triggers once its
/// class has qualified on `consecutive_frames` consecutive results for
/// the session; a frame without the class resets the run. Triggers are
/// then rate-limited per (session, rule) by the rule's cooldown. All
/// time checks use the result's own timestamp.
pub struct AlarmEngine {
    rules: RwLock<Vec<AlarmRule>>,
    state: Mutex<HashMap<String, SessionDebounce>>,
    sink: Arc<dyn AlarmSink>,
    results_evaluated: AtomicU64,
    alarms_triggered: AtomicU64,
    suppressed_by_cooldown: AtomicU64,
}

impl AlarmEngine {
    pub fn new(sink: Arc<dyn AlarmSink>) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            state: Mutex::new(HashMap::new()),
            sink,
            results_evaluated: AtomicU64::new(0),
            alarms_triggered: AtomicU64::new(0),
            suppressed_by_cooldown: AtomicU64::new(0),
        }
    }

    /// Register a rule. Fails on a duplicate id.
    pub fn add_rule(&self, rule: AlarmRule) -> AlarmResult<()> {
        let mut rules = self.rules.write().expect("alarm rules lock poisoned");
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(AlarmError::DuplicateRule(rule.id));
        }
        info!(rule_id = %rule.id, name = %rule.name, "Alarm rule registered");
        rules.push(rule);
        Ok(())
    }

    /// Remove a rule and its debounce state across all sessions.
    pub fn remove_rule(&self, rule_id: &str) -> AlarmResult<()> {
        let mut rules = self.rules.write().expect("alarm rules lock poisoned");
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        if rules.len() == before {
            return Err(AlarmError::RuleNotFound(rule_id.to_string()));
        }
        drop(rules);

        let mut state = self.state.lock().expect("alarm state lock poisoned");
        for debounce in state.values_mut() {
            debounce.counts.retain(|(rid, _), _| rid != rule_id);
            debounce.last_trigger.remove(rule_id);
        }
        info!(rule_id, "Alarm rule removed");
        Ok(())
    }

    /// Replace a rule in place, keeping its evaluation position.
    pub fn update_rule(&self, rule: AlarmRule) -> AlarmResult<()> {
        let mut rules = self.rules.write().expect("alarm rules lock poisoned");
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => {
                *existing = rule;
                Ok(())
            }
            None => Err(AlarmError::RuleNotFound(rule.id)),
        }
    }

    pub fn rules(&self) -> Vec<AlarmRule> {
        self.rules.read().expect("alarm rules lock poisoned").clone()
    }

    /// Evaluate a detection result against all rules. Returns the
    /// number of alarms submitted to the sink.
    pub fn evaluate(&self, result: &DetectionResult, notify: Option<&NotifyTarget>) -> usize {
        self.results_evaluated.fetch_add(1, Ordering::Relaxed);

        let rules = self.rules.read().expect("alarm rules lock poisoned");
        let mut tasks = Vec::new();
        {
            let mut state = self.state.lock().expect("alarm state lock poisoned");
            let debounce = state.entry(result.session_id.clone()).or_default();

            for rule in rules.iter() {
                if !rule.enabled
                    || !rule.applies_to_session(&result.session_id)
                    || !rule.in_time_range(result.timestamp)
                {
                    continue;
                }
                if let Some(task) = self.evaluate_rule(rule, result, notify, debounce) {
                    tasks.push(task);
                }
            }
        }
        drop(rules);

        let triggered = tasks.len();
        self.alarms_triggered
            .fetch_add(triggered as u64, Ordering::Relaxed);
        for task in tasks {
            info!(
                session_id = %task.event.session_id,
                rule_id = %task.rule_id,
                class = %task.event.class_name,
                severity = task.event.severity.as_str(),
                confidence = task.event.confidence,
                "Alarm triggered"
            );
            self.sink.submit(task);
        }
        triggered
    }

    fn evaluate_rule(
        &self,
        rule: &AlarmRule,
        result: &DetectionResult,
        notify: Option<&NotifyTarget>,
        debounce: &mut SessionDebounce,
    ) -> Option<NotificationTask> {
        // Best qualifying detection per class this frame.
        let mut best: HashMap<&str, &vigil_models::Detection> = HashMap::new();
        for d in &result.detections {
            if d.confidence >= rule.min_confidence && rule.applies_to_class(&d.class_name) {
                match best.get(d.class_name.as_str()) {
                    Some(prev) if prev.confidence >= d.confidence => {}
                    _ => {
                        best.insert(&d.class_name, d);
                    }
                }
            }
        }

        // Classes tracked for this rule but absent this frame lose
        // their consecutive run.
        debounce
            .counts
            .retain(|(rid, class), _| rid != &rule.id || best.contains_key(class.as_str()));

        let mut fired: Option<&vigil_models::Detection> = None;
        let mut fired_count = 0;
        for (class, detection) in &best {
            let count = debounce
                .counts
                .entry((rule.id.clone(), (*class).to_string()))
                .or_insert(0);
            *count += 1;
            debug!(
                session_id = %result.session_id,
                rule_id = %rule.id,
                class = %class,
                consecutive = *count,
                required = rule.consecutive_frames,
                "Qualifying detection"
            );
            if *count >= rule.consecutive_frames {
                // One event per rule per frame; the highest-confidence
                // class that completed its run wins.
                match fired {
                    Some(prev) if prev.confidence >= detection.confidence => {}
                    _ => {
                        fired = Some(*detection);
                        fired_count = *count;
                    }
                }
            }
        }

        let detection = fired?;

        if let Some(last) = debounce.last_trigger.get(&rule.id) {
            let elapsed = (result.timestamp - *last)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            if elapsed < rule.cooldown {
                self.suppressed_by_cooldown.fetch_add(1, Ordering::Relaxed);
                debug!(
                    session_id = %result.session_id,
                    rule_id = %rule.id,
                    elapsed_secs = elapsed.as_secs(),
                    "Alarm suppressed by cooldown"
                );
                return None;
            }
        }

        debounce
            .last_trigger
            .insert(rule.id.clone(), result.timestamp);
        debounce
            .counts
            .remove(&(rule.id.clone(), detection.class_name.clone()));

        let event = AlarmEvent {
            session_id: result.session_id.clone(),
            timestamp: result.timestamp,
            severity: Severity::from_confidence(detection.confidence),
            confidence: detection.confidence,
            class_name: detection.class_name.clone(),
            bbox: detection.bbox,
            consecutive_count: fired_count,
            media_ref: result.media_ref.clone(),
        };
        Some(NotificationTask {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            channels: rule.channels.clone(),
            event,
            notify: notify.cloned(),
        })
    }

    /// Drop all debounce state for a session.
    pub fn clear_session(&self, session_id: &str) {
        self.state
            .lock()
            .expect("alarm state lock poisoned")
            .remove(session_id);
    }

    pub fn stats(&self) -> AlarmEngineStats {
        AlarmEngineStats {
            results_evaluated: self.results_evaluated.load(Ordering::Relaxed),
            alarms_triggered: self.alarms_triggered.load(Ordering::Relaxed),
            suppressed_by_cooldown: self.suppressed_by_cooldown.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;
    use vigil_models::{BBox, Detection, NotificationChannel, TimeOfDayRange};

    #[derive(Default)]
    struct RecordingSink {
        tasks: Mutex<Vec<NotificationTask>>,
    }

    impl AlarmSink for RecordingSink {
        fn submit(&self, task: NotificationTask) {
            self.tasks.lock().unwrap().push(task);
        }
    }

    fn engine() -> (AlarmEngine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (AlarmEngine::new(sink.clone()), sink)
    }

    fn rule(id: &str, consecutive: u32, cooldown_secs: u64) -> AlarmRule {
        let mut r = AlarmRule::new(id, id);
        r.class_names = vec!["fire".to_string()];
        r.min_confidence = 0.5;
        r.consecutive_frames = consecutive;
        r.cooldown = Duration::from_secs(cooldown_secs);
        r.channels = vec![NotificationChannel::Log];
        r
    }

    fn result_at(secs: i64, classes: &[(&str, f32)]) -> DetectionResult {
        let detections = classes
            .iter()
            .map(|(c, conf)| Detection::new(*c, 0, *conf, BBox::new(0.0, 0.0, 10.0, 10.0)))
            .collect();
        let mut r = DetectionResult::new("cam-1", secs as u64, detections);
        r.timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        r
    }

    #[test]
    fn test_triggers_after_consecutive_frames() {
        let (engine, sink) = engine();
        engine.add_rule(rule("r1", 3, 0)).unwrap();

        assert_eq!(engine.evaluate(&result_at(0, &[("fire", 0.8)]), None), 0);
        assert_eq!(engine.evaluate(&result_at(1, &[("fire", 0.8)]), None), 0);
        assert_eq!(engine.evaluate(&result_at(2, &[("fire", 0.8)]), None), 1);

        let tasks = sink.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].event.consecutive_count, 3);
        assert_eq!(tasks[0].event.severity, Severity::High);
    }

    #[test]
    fn test_absence_resets_consecutive_run() {
        let (engine, sink) = engine();
        engine.add_rule(rule("r1", 3, 0)).unwrap();

        engine.evaluate(&result_at(0, &[("fire", 0.8)]), None);
        engine.evaluate(&result_at(1, &[("fire", 0.8)]), None);
        // Class absent: run resets.
        engine.evaluate(&result_at(2, &[]), None);
        engine.evaluate(&result_at(3, &[("fire", 0.8)]), None);
        engine.evaluate(&result_at(4, &[("fire", 0.8)]), None);
        assert!(sink.tasks.lock().unwrap().is_empty());

        assert_eq!(engine.evaluate(&result_at(5, &[("fire", 0.8)]), None), 1);
    }

    #[test]
    fn test_low_confidence_does_not_qualify() {
        let (engine, sink) = engine();
        engine.add_rule(rule("r1", 1, 0)).unwrap();

        engine.evaluate(&result_at(0, &[("fire", 0.4)]), None);
        assert!(sink.tasks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cooldown_suppresses_retrigger() {
        let (engine, sink) = engine();
        engine.add_rule(rule("r1", 1, 30)).unwrap();

        assert_eq!(engine.evaluate(&result_at(0, &[("fire", 0.8)]), None), 1);
        // 10s later: inside cooldown.
        assert_eq!(engine.evaluate(&result_at(10, &[("fire", 0.8)]), None), 0);
        // 31s after first trigger: cooldown elapsed.
        assert_eq!(engine.evaluate(&result_at(31, &[("fire", 0.8)]), None), 1);
        assert_eq!(sink.tasks.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_time_gate_blocks_outside_window() {
        let (engine, sink) = engine();
        let mut r = rule("r1", 1, 0);
        r.time_range = Some(TimeOfDayRange::new(
            chrono::NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        ));
        engine.add_rule(r).unwrap();

        let mut noon = result_at(0, &[("fire", 0.8)]);
        noon.timestamp = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
        assert_eq!(engine.evaluate(&noon, None), 0);

        let mut night = result_at(1, &[("fire", 0.8)]);
        night.timestamp = Utc.with_ymd_and_hms(2025, 6, 10, 23, 0, 0).unwrap();
        assert_eq!(engine.evaluate(&night, None), 1);
        assert_eq!(sink.tasks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let (engine, sink) = engine();
        engine.add_rule(rule("r1", 2, 0)).unwrap();

        let mut other = result_at(0, &[("fire", 0.8)]);
        other.session_id = "cam-2".to_string();

        engine.evaluate(&result_at(0, &[("fire", 0.8)]), None);
        engine.evaluate(&other, None);
        // Neither session has two consecutive frames yet.
        assert!(sink.tasks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clear_session_resets_state() {
        let (engine, sink) = engine();
        engine.add_rule(rule("r1", 2, 0)).unwrap();

        engine.evaluate(&result_at(0, &[("fire", 0.8)]), None);
        engine.clear_session("cam-1");
        engine.evaluate(&result_at(1, &[("fire", 0.8)]), None);
        assert!(sink.tasks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rule_admin() {
        let (engine, _) = engine();
        engine.add_rule(rule("r1", 3, 0)).unwrap();
        assert!(matches!(
            engine.add_rule(rule("r1", 3, 0)),
            Err(AlarmError::DuplicateRule(_))
        ));

        let mut updated = rule("r1", 5, 0);
        updated.enabled = false;
        engine.update_rule(updated).unwrap();
        assert!(!engine.rules()[0].enabled);

        engine.remove_rule("r1").unwrap();
        assert!(matches!(
            engine.remove_rule("r1"),
            Err(AlarmError::RuleNotFound(_))
        ));
    }

    #[test]
    fn test_disabled_rule_is_skipped() {
        let (engine, sink) = engine();
        let mut r = rule("r1", 1, 0);
        r.enabled = false;
        engine.add_rule(r).unwrap();

        engine.evaluate(&result_at(0, &[("fire", 0.9)]), None);
        assert!(sink.tasks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_notify_target_rides_on_task() {
        let (engine, sink) = engine();
        engine.add_rule(rule("r1", 1, 0)).unwrap();

        let notify = NotifyTarget {
            callback_url: Some("http://example/cb".to_string()),
            scene: Some("warehouse".to_string()),
            device_id: Some("gb-001".to_string()),
        };
        engine.evaluate(&result_at(0, &[("fire", 0.8)]), Some(&notify));

        let tasks = sink.tasks.lock().unwrap();
        assert_eq!(tasks[0].notify.as_ref().unwrap().scene.as_deref(), Some("warehouse"));
    }
}
