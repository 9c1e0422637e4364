use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;
use procwarden_core::{Error, Result};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cron trigger for a unit's graceful restart.
#[derive(Debug, Clone)]
pub struct RestartSchedule {
    expr: String,
    schedule: Schedule,
}

/// Classic 5-field expressions get a leading seconds field.
fn normalize(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

impl RestartSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let schedule = Schedule::from_str(&normalize(expr))
            .map_err(|e| Error::Config(format!("invalid restart schedule '{}': {}", expr, e)))?;
        Ok(Self {
            expr: expr.trim().to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(now).next()
    }

    pub fn delay_from<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<Duration> {
        let next = self.next_after(now)?;
        Some(
            next.signed_duration_since(now.clone())
                .to_std()
                .unwrap_or(Duration::ZERO),
        )
    }

    /// Runs `trigger` at every upcoming occurrence until the task is aborted.
    pub fn spawn<F, Fut>(self, name: String, mut trigger: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                let Some(delay) = self.delay_from(&Local::now()) else {
                    warn!(unit = %name, "Restart schedule '{}' has no upcoming time", self.expr);
                    return;
                };
                tokio::time::sleep(delay).await;
                debug!(unit = %name, "Restart schedule '{}' fired", self.expr);
                trigger().await;
                // Step past the occurrence that just fired.
                tokio::time::sleep(Duration::from_millis(1000)).await;
            }
        })
    }
}
