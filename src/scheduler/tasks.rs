use std::sync::Arc;

use tracing::info;

use crate::config::ScheduledConfig;
use crate::delivery::Delivery;
use crate::generator::{GenerationMode, Generator};
use crate::scheduler::Scheduler;

/// Generate one unsolicited message and deliver it.
///
/// Scheduled messages neither read nor write the response cache.
pub async fn send_scheduled_message(
    generator: &Generator,
    delivery: &Delivery,
    config: &ScheduledConfig,
) -> bool {
    let response = generator
        .generate(GenerationMode::Scheduled, &[], &config.prompt)
        .await;
    info!("Scheduled message for [{}]: {}", config.identity, response.text);
    delivery
        .send(&config.identity, &response.text)
        .await
        .succeeded()
}

/// Register the scheduled message job from `[scheduled]`.
pub async fn register_scheduled_message(
    scheduler: &mut Scheduler,
    config: ScheduledConfig,
    generator: Arc<Generator>,
    delivery: Delivery,
) -> anyhow::Result<()> {
    let cron = config.cron.clone();
    let config = Arc::new(config);
    scheduler
        .add_cron_job(&cron, "scheduled-message", move || {
            let config = Arc::clone(&config);
            let generator = Arc::clone(&generator);
            let delivery = delivery.clone();
            Box::pin(async move {
                send_scheduled_message(&generator, &delivery, &config).await;
            })
        })
        .await?;

    Ok(())
}
