use crate::config::QuietHours;
use crate::domain::alerts::{AlertTriggerEvent, RiskAlertConfig};
use crate::domain::audit::{AuditAction, AuditEntry, AuditSeverity, new_correlation_id};
use crate::domain::ports::ChatApiService;
use crate::domain::repositories::AuditRepository;
use crate::domain::trading::types::{ExecutionReport, Trade};
use crate::domain::user::User;
use chrono::{Timelike, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Delivery retry delays. The last failure is recorded in audit.
const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(30),
];

struct RateWindow {
    started: Instant,
    sent: u32,
    suppressed: u32,
}

/// Formats and delivers chat messages: DM-primary routing, quiet-hours
/// suppression for non-critical traffic, bounded retries, and a
/// per-user rate cap that coalesces overflow into a digest.
pub struct Notifier {
    chat: Arc<dyn ChatApiService>,
    audit: Arc<dyn AuditRepository>,
    quiet_hours: Option<QuietHours>,
    rate_per_min: u32,
    rate_window: Duration,
    retry_delays: Vec<Duration>,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl Notifier {
    pub fn new(
        chat: Arc<dyn ChatApiService>,
        audit: Arc<dyn AuditRepository>,
        quiet_hours: Option<QuietHours>,
        rate_per_min: u32,
    ) -> Self {
        Self {
            chat,
            audit,
            quiet_hours,
            rate_per_min,
            rate_window: Duration::from_secs(60),
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_timings(mut self, rate_window: Duration, retry_delays: Vec<Duration>) -> Self {
        self.rate_window = rate_window;
        self.retry_delays = retry_delays;
        self
    }

    fn in_quiet_hours(&self) -> bool {
        self.quiet_hours
            .map(|qh| qh.contains(Utc::now().hour()))
            .unwrap_or(false)
    }

    /// Take one delivery slot for the user. Returns false when the
    /// per-minute cap is hit; the overflow is counted for the digest.
    async fn take_slot(&self, user_id: &str) -> bool {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(user_id.to_string()).or_insert(RateWindow {
            started: Instant::now(),
            sent: 0,
            suppressed: 0,
        });
        if window.started.elapsed() >= self.rate_window {
            window.started = Instant::now();
            window.sent = 0;
            window.suppressed = 0;
        }
        if window.sent >= self.rate_per_min {
            window.suppressed += 1;
            false
        } else {
            window.sent += 1;
            true
        }
    }

    /// Deliver with retries; persistent failure lands in audit.
    async fn deliver(&self, user: &User, text: &str, blocks: Option<&Value>) {
        let channel = match self.chat.open_dm(&user.chat_id).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("No DM channel for {}: {}", user.chat_id, e);
                self.audit_failure(user, &format!("dm open failed: {}", e))
                    .await;
                return;
            }
        };

        let mut last_error = None;
        for (attempt, delay) in std::iter::once(Duration::ZERO)
            .chain(self.retry_delays.iter().copied())
            .enumerate()
        {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.chat.post_message(&channel, text, blocks).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(
                        "Delivery attempt {} to {} failed: {}",
                        attempt + 1,
                        user.chat_id,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            self.audit_failure(user, &e.to_string()).await;
        }
    }

    async fn audit_failure(&self, user: &User, reason: &str) {
        let entry = AuditEntry::new(
            None,
            AuditAction::NotificationFailed,
            "user",
            user.user_id.clone(),
            new_correlation_id(),
        )
        .with_severity(AuditSeverity::Warn)
        .with_after(json!({"reason": reason}));
        if let Err(e) = self.audit.append(&entry).await {
            error!("Failed to audit notification failure: {}", e);
        }
    }

    /// Trade confirmation. Non-critical: suppressed inside quiet hours.
    pub async fn send_confirmation(&self, user: &User, trade: &Trade, report: &ExecutionReport) {
        if self.in_quiet_hours() {
            info!(
                "Confirmation for {} suppressed by quiet hours",
                trade.trade_id
            );
            return;
        }
        if !self.take_slot(&user.user_id).await {
            return;
        }

        let fill = report
            .fill_price
            .map(|p| format!("${}", p))
            .unwrap_or_else(|| "pending".to_string());
        let text = format!(
            "Trade confirmed: {} {} x{} @ {} via {}",
            trade.side, trade.symbol, report.filled_quantity, fill, report.venue
        );
        let blocks = json!([
            {"type": "section", "text": {"type": "mrkdwn", "text": format!(
                "*Trade confirmed*\n{} *{}* × {} @ {}",
                trade.side, trade.symbol, report.filled_quantity, fill
            )}},
            {"type": "context", "elements": [{"type": "mrkdwn", "text": format!(
                "venue: {} · status: {}", report.venue, report.status
            )}]}
        ]);
        self.deliver(user, &text, Some(&blocks)).await;
    }

    /// Risk-alert notification. Critical: bypasses quiet hours but not
    /// the rate cap.
    pub async fn send_alert(
        &self,
        owner: &User,
        alert: &RiskAlertConfig,
        trade: &Trade,
        event: &AlertTriggerEvent,
    ) {
        if !self.take_slot(&owner.user_id).await {
            return;
        }

        let text = format!(
            "Risk alert '{}' triggered by {} {} (size ${}, loss {}%, VIX {})",
            alert.name, trade.side, trade.symbol, event.trade_size, event.loss_pct, event.vix_level
        );
        let blocks = json!([
            {"type": "section", "text": {"type": "mrkdwn", "text": format!(
                ":rotating_light: *{}*\nTriggered by {} *{}* × {}",
                alert.name, trade.side, trade.symbol,
                trade.filled_quantity.unwrap_or(trade.quantity)
            )}},
            {"type": "section", "text": {"type": "mrkdwn", "text": format!(
                "Trade size: ${}\nLoss: {}%\nVIX: {}",
                event.trade_size, event.loss_pct, event.vix_level
            )}}
        ]);
        self.deliver(owner, &text, Some(&blocks)).await;
    }

    /// Batch-scan summary: one message listing up to 20 matches.
    pub async fn send_summary(
        &self,
        owner: &User,
        alert: &RiskAlertConfig,
        matches: &[AlertTriggerEvent],
    ) {
        if matches.is_empty() {
            return;
        }
        if !self.take_slot(&owner.user_id).await {
            return;
        }

        let listed: Vec<String> = matches
            .iter()
            .take(20)
            .map(|m| {
                format!(
                    "• {} {} — size ${}, loss {}%",
                    m.side, m.symbol, m.trade_size, m.loss_pct
                )
            })
            .collect();
        let mut text = format!(
            "Scan for '{}' matched {} historical trade(s):\n{}",
            alert.name,
            matches.len(),
            listed.join("\n")
        );
        if matches.len() > 20 {
            text.push_str(&format!("\n…and {} more", matches.len() - 20));
        }
        self.deliver(owner, &text, None).await;
    }

    /// Update an open modal in place.
    pub async fn update_modal(&self, view_id: &str, view: &Value) -> anyhow::Result<()> {
        self.chat.update_view(view_id, view).await
    }

    /// Collect users whose cap overflowed in a now-expired window,
    /// with the suppressed count. Run from a periodic task; pair with
    /// `send_digest`.
    pub async fn drain_expired_digests(&self) -> Vec<(String, u32)> {
        let mut windows = self.windows.lock().await;
        let mut expired = Vec::new();
        windows.retain(|user_id, window| {
            if window.started.elapsed() >= self.rate_window {
                if window.suppressed > 0 {
                    expired.push((user_id.clone(), window.suppressed));
                }
                false
            } else {
                true
            }
        });
        expired
    }

    /// Coalesced "N alerts in the last minute" message.
    pub async fn send_digest(&self, user: &User, count: u32) {
        let text = format!("{} alerts in the last minute", count);
        self.deliver(user, &text, None).await;
    }
}
