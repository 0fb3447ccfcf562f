//! Session scheduler: turns active class schedules into window open/close events.
//!
//! The [`Scheduler`] owns one armed trigger per class id. Each trigger is a
//! tokio task that sleeps until the next window opens, emits
//! [`WindowEvent::Opened`], sleeps for the class duration, emits
//! [`WindowEvent::Closed`] and re-arms for the following occurrence.

use chrono::{Local, NaiveDateTime};
use classwatch_core::schedule::{active_window, next_occurrence, Timing};
use classwatch_core::{ClassSchedule, Window};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::store::Store;

/// Source of local wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    Opened { schedule: ClassSchedule, window: Window },
    Closed { schedule: ClassSchedule, window: Window },
    /// The trigger was disarmed; any window it opened should be closed now.
    Cancelled { class_id: String },
}

struct ArmedTrigger {
    timing: Timing,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    events: mpsc::Sender<WindowEvent>,
    triggers: HashMap<String, ArmedTrigger>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, events: mpsc::Sender<WindowEvent>) -> Self {
        Self {
            clock,
            events,
            triggers: HashMap::new(),
        }
    }

    /// Bring the registry in line with `schedules`: arm new or changed
    /// classes, disarm anything inactive or no longer listed.
    pub async fn reconcile(&mut self, schedules: &[ClassSchedule]) {
        for schedule in schedules {
            self.reschedule(schedule).await;
        }

        let stale: Vec<String> = self
            .triggers
            .keys()
            .filter(|id| !schedules.iter().any(|s| s.is_active && &s.id == *id))
            .cloned()
            .collect();
        for class_id in stale {
            self.cancel(&class_id).await;
        }
    }

    /// Arm, re-arm or disarm the trigger for one class. Returns true if a
    /// trigger is armed for it afterwards.
    pub async fn reschedule(&mut self, schedule: &ClassSchedule) -> bool {
        if !schedule.is_active {
            self.cancel(&schedule.id).await;
            return false;
        }

        let timing = schedule.timing();
        if let Some(armed) = self.triggers.get(&schedule.id) {
            if armed.timing == timing && !armed.handle.is_finished() {
                return true;
            }
            self.cancel(&schedule.id).await;
        }

        // A bad schedule only affects itself.
        if let Err(err) = next_occurrence(self.clock.now(), schedule) {
            tracing::warn!(
                class_id = %schedule.id,
                class_name = %schedule.class_name,
                error = %err,
                "skipping unschedulable class"
            );
            return false;
        }

        let handle = tokio::spawn(run_trigger(
            schedule.clone(),
            Arc::clone(&self.clock),
            self.events.clone(),
        ));
        tracing::debug!(class_id = %schedule.id, class_name = %schedule.class_name, "trigger armed");
        self.triggers
            .insert(schedule.id.clone(), ArmedTrigger { timing, handle });
        true
    }

    /// Disarm a class's trigger. Returns false if none was armed.
    ///
    /// Waits for room on the event channel, so the `Cancelled` event is
    /// never dropped and always precedes events from a re-armed trigger.
    pub async fn cancel(&mut self, class_id: &str) -> bool {
        let Some(armed) = self.triggers.remove(class_id) else {
            return false;
        };
        armed.handle.abort();
        if self
            .events
            .send(WindowEvent::Cancelled {
                class_id: class_id.to_string(),
            })
            .await
            .is_err()
        {
            tracing::warn!(class_id, "event channel closed; cancelled trigger not reported");
        }
        tracing::debug!(class_id, "trigger cancelled");
        true
    }

    /// Class ids with an armed trigger, sorted.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.triggers.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Poll the store every `interval`, or sooner when `nudge` fires, and reconcile.
    pub async fn run(mut self, store: Store, interval: Duration, nudge: Arc<Notify>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = nudge.notified() => {
                    tracing::debug!("schedule change signalled");
                }
            }

            match store.list_classes(false).await {
                Ok(classes) => {
                    self.reconcile(&classes).await;
                    tracing::debug!(armed = ?self.active_keys(), "schedules reconciled");
                }
                Err(err) => tracing::error!(error = %err, "failed to load class schedules"),
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for armed in self.triggers.values() {
            armed.handle.abort();
        }
    }
}

fn until(clock: &dyn Clock, at: NaiveDateTime) -> Duration {
    (at - clock.now()).to_std().unwrap_or(Duration::ZERO)
}

async fn run_trigger(schedule: ClassSchedule, clock: Arc<dyn Clock>, events: mpsc::Sender<WindowEvent>) {
    let now = clock.now();
    // Started mid-class: open straight away.
    let first = match active_window(now, &schedule) {
        Ok(Some(window)) => Ok(window),
        Ok(None) => next_occurrence(now, &schedule),
        Err(err) => Err(err),
    };
    let mut window = match first {
        Ok(window) => window,
        Err(err) => {
            tracing::warn!(class_id = %schedule.id, error = %err, "trigger not armed");
            return;
        }
    };

    loop {
        tracing::debug!(class_id = %schedule.id, open_at = %window.open_at, "waiting for window");
        tokio::time::sleep(until(clock.as_ref(), window.open_at)).await;
        if events
            .send(WindowEvent::Opened { schedule: schedule.clone(), window })
            .await
            .is_err()
        {
            return;
        }

        tokio::time::sleep(until(clock.as_ref(), window.close_at)).await;
        if events
            .send(WindowEvent::Closed { schedule: schedule.clone(), window })
            .await
            .is_err()
        {
            return;
        }

        window = match next_occurrence(window.open_at + chrono::Duration::seconds(1), &schedule) {
            Ok(next) => next,
            Err(err) => {
                tracing::warn!(class_id = %schedule.id, error = %err, "trigger stopped");
                return;
            }
        };
    }
}
