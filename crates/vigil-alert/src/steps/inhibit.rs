use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use vigil_common::types::{AlertStatus, Label};
use vigil_state::StateStore;

use crate::context::EvaluationContext;
use crate::{AlertError, EvaluationStep};

/// Withholds repeated paging while a series keeps alerting.
///
/// For each ALERTING label the step arms a silence flag in the state store.
/// The first successful entry leaves the status at ALERTING so the fire
/// notification still goes out this cycle; from the next cycle on, the
/// active silence downgrades the series to SUPPRESSING until the flag
/// expires.
pub struct InhibitionStep;

impl InhibitionStep {
    /// Silence TTL: the configured duration plus the time remaining until
    /// the end of the current wall-clock minute, so a silence started
    /// mid-minute still fully covers one whole additional minute of
    /// evaluation-cycle scheduling slop.
    fn silence_ttl(silence_secs: u64, now: DateTime<Utc>) -> Duration {
        let to_minute_end = 60 - (now.timestamp().rem_euclid(60)) as u64;
        Duration::from_secs(silence_secs + to_minute_end)
    }
}

#[async_trait]
impl EvaluationStep for InhibitionStep {
    fn name(&self) -> &str {
        "inhibition"
    }

    async fn evaluate(
        &self,
        store: &dyn StateStore,
        ctx: &mut EvaluationContext,
    ) -> Result<(), AlertError> {
        let alerting: Vec<Label> = ctx
            .series_status
            .iter()
            .filter(|(_, status)| **status == AlertStatus::Alerting)
            .map(|(label, _)| label.clone())
            .collect();
        if alerting.is_empty() {
            return Ok(());
        }

        let ttl = Self::silence_ttl(ctx.rule.silence_secs, ctx.now);
        for label in alerting {
            if store.try_enter_silence(&ctx.rule.id, &label, ttl).await? {
                ctx.log(format!(
                    "label {label}: silence armed for {}s, notifying this cycle",
                    ttl.as_secs()
                ));
            } else {
                let remaining = store
                    .silence_remaining(&ctx.rule.id, &label)
                    .await?
                    .unwrap_or_default();
                ctx.series_status
                    .insert(label.clone(), AlertStatus::Suppressing);
                ctx.log(format!(
                    "label {label}: silence active, {}s remaining -> SUPPRESSING",
                    remaining.as_secs()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_ttl_covers_the_rest_of_the_minute() {
        // :15 into the minute leaves 45s of margin
        let mid_minute = DateTime::from_timestamp(1_699_999_995, 0).unwrap();
        assert_eq!(mid_minute.timestamp() % 60, 15);
        assert_eq!(
            InhibitionStep::silence_ttl(300, mid_minute),
            Duration::from_secs(300 + 45)
        );

        // exactly on the minute boundary still gets one full minute
        let on_minute = DateTime::from_timestamp(1_699_999_980, 0).unwrap();
        assert_eq!(on_minute.timestamp() % 60, 0);
        assert_eq!(
            InhibitionStep::silence_ttl(300, on_minute),
            Duration::from_secs(300 + 60)
        );
    }
}
