//! Quota usage notifications
//!
//! A quota carries notification rules such as "call this URL at 80%". A
//! rule fires at most once per threshold and period. Repeating rules fire at
//! every multiple of their percentage.

use chrono::{DateTime, Utc};
use sigil_core::{
    EntityType, Event, EventFilter, EventLog, NewEvent, Payload, QuotaNotificationSpec, Result,
    SigilError, TenantId,
};
use std::collections::HashMap;
use std::sync::Arc;

pub type QuotaNotification = QuotaNotificationSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub id: String,
    pub unit: String,
    pub amount: u64,
    pub notifications: Vec<QuotaNotification>,
}

impl Quota {
    pub fn from_event(event: &Event) -> Option<Self> {
        match &event.payload {
            Payload::QuotaAdded {
                unit,
                amount,
                notifications,
            } => Some(Self {
                id: event.entity_id.clone(),
                unit: unit.clone(),
                amount: *amount,
                notifications: notifications.clone(),
            }),
            _ => None,
        }
    }
}

/// Highest threshold already notified per rule, for one period
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifiedThresholds {
    latest: HashMap<String, u32>,
}

impl NotifiedThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `quota.notified` events of `period_start` for quota `quota_id`
    pub fn fold<'a>(
        events: impl IntoIterator<Item = &'a Event>,
        quota_id: &str,
        period_start: DateTime<Utc>,
    ) -> Self {
        let mut notified = Self::new();
        for event in events {
            if event.entity_id != quota_id {
                continue;
            }
            if let Payload::QuotaNotified {
                notification_id,
                threshold,
                period_start: start,
                ..
            } = &event.payload
            {
                if *start == period_start {
                    notified.record(notification_id, *threshold);
                }
            }
        }
        notified
    }

    pub fn record(&mut self, notification_id: &str, threshold: u32) {
        let latest = self.latest.entry(notification_id.to_string()).or_insert(0);
        *latest = (*latest).max(threshold);
    }

    pub fn latest(&self, notification_id: &str) -> u32 {
        self.latest.get(notification_id).copied().unwrap_or(0)
    }
}

/// A notification that should be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueNotification {
    pub notification_id: String,
    pub call_url: String,
    pub threshold: u32,
    pub used: u64,
    pub period_start: DateTime<Utc>,
}

impl DueNotification {
    /// Event recording that this notification went out
    pub fn into_event(self, tenant: TenantId, quota_id: &str) -> NewEvent {
        NewEvent::new(
            tenant,
            quota_id,
            Payload::QuotaNotified {
                notification_id: self.notification_id,
                threshold: self.threshold,
                period_start: self.period_start,
                used: self.used,
            },
        )
    }
}

/// Notifications due at absolute usage `used`
///
/// Usage is compared in whole percent of the quota amount, rounded down.
/// A repeating rule fires again at every multiple of its percent reached
/// (80, 160, ...) within one period. Its threshold is deliberately not capped
/// at the first multiple, which would make it fire only once.
pub fn due_notifications(
    quota: &Quota,
    notified: &NotifiedThresholds,
    used: u64,
    period_start: DateTime<Utc>,
) -> Vec<DueNotification> {
    if quota.amount == 0 {
        return Vec::new();
    }
    let used_rel = used.saturating_mul(100) / quota.amount;

    quota
        .notifications
        .iter()
        .filter(|n| n.percent > 0 && u64::from(n.percent) <= used_rel)
        .filter_map(|n| {
            let threshold = if n.repeat {
                let percent = u64::from(n.percent);
                u32::try_from(used_rel / percent * percent).unwrap_or(u32::MAX)
            } else {
                n.percent
            };
            (notified.latest(&n.id) < threshold).then(|| DueNotification {
                notification_id: n.id.clone(),
                call_url: n.call_url.clone(),
                threshold,
                used,
                period_start,
            })
        })
        .collect()
}

/// Quota notification evaluation against an event log
pub struct QuotaNotifier {
    log: Arc<dyn EventLog>,
}

impl QuotaNotifier {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    fn quota_events(&self, tenant: &TenantId, quota_id: &str) -> Result<Vec<Event>> {
        let events = self
            .log
            .read(&EventFilter::new(tenant.clone()).entity_types(&[EntityType::Quota]))?;
        Ok(events
            .into_iter()
            .filter(|e| e.entity_id == quota_id)
            .collect())
    }

    /// Notifications due for quota `quota_id` in the period starting at
    /// `period_start`
    pub fn due(
        &self,
        tenant: &TenantId,
        quota_id: &str,
        period_start: DateTime<Utc>,
        used: u64,
    ) -> Result<Vec<DueNotification>> {
        let events = self.quota_events(tenant, quota_id)?;
        let quota = events
            .iter()
            .rev()
            .find_map(Quota::from_event)
            .ok_or_else(|| SigilError::NotFound(format!("quota {} for tenant {}", quota_id, tenant)))?;
        if quota.notifications.is_empty() {
            return Ok(Vec::new());
        }
        let notified = NotifiedThresholds::fold(&events, quota_id, period_start);
        Ok(due_notifications(&quota, &notified, used, period_start))
    }

    /// Record that `due` was sent
    pub fn mark_notified(
        &self,
        tenant: &TenantId,
        quota_id: &str,
        due: DueNotification,
    ) -> Result<Event> {
        let threshold = due.threshold;
        let event = self.log.append(due.into_event(tenant.clone(), quota_id))?;
        tracing::debug!(
            "quota {} notified at {}% for tenant {}",
            quota_id,
            threshold,
            tenant
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, percent: u32, repeat: bool) -> QuotaNotification {
        QuotaNotification {
            id: id.into(),
            percent,
            repeat,
            call_url: format!("https://hooks.example.com/{}", id),
        }
    }

    fn quota(notifications: Vec<QuotaNotification>) -> Quota {
        Quota {
            id: "q1".into(),
            unit: "requests".into(),
            amount: 1000,
            notifications,
        }
    }

    #[test]
    fn test_only_crossed_unnotified_thresholds_are_due() {
        let q = quota(vec![
            rule("fifty", 50, false),
            rule("eighty", 80, false),
            rule("ninety", 90, true),
        ]);
        let mut notified = NotifiedThresholds::new();
        notified.record("fifty", 50);

        let due = due_notifications(&q, &notified, 850, Utc::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].notification_id, "eighty");
        assert_eq!(due[0].threshold, 80);
    }

    #[test]
    fn test_repeat_rounds_down_to_multiple() {
        let q = quota(vec![rule("every-ten", 10, true)]);
        let mut notified = NotifiedThresholds::new();

        let due = due_notifications(&q, &notified, 850, Utc::now());
        assert_eq!(due[0].threshold, 80);

        notified.record("every-ten", 80);
        assert!(due_notifications(&q, &notified, 899, Utc::now()).is_empty());
        assert_eq!(
            due_notifications(&q, &notified, 900, Utc::now())[0].threshold,
            90
        );
    }

    #[test]
    fn test_zero_amount_never_notifies() {
        let mut q = quota(vec![rule("fifty", 50, false)]);
        q.amount = 0;
        assert!(due_notifications(&q, &NotifiedThresholds::new(), 10, Utc::now()).is_empty());
    }

    #[test]
    fn test_usage_is_floored() {
        let q = quota(vec![rule("eighty", 80, false)]);
        // 79.9%
        assert!(due_notifications(&q, &NotifiedThresholds::new(), 799, Utc::now()).is_empty());
    }
}
