//! Broker plumbing: queue declaration and a generic manual-ack consumer
//! loop shared by the payment-result consumer.

use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tracing::{error, warn};

/// Declares `queue` durable, then runs forever, handing each delivery's
/// body to `handler`. Acks on `Ok`, nacks-with-requeue on `Err` so a
/// transient failure gets redelivered rather than dropped.
pub async fn run_consumer<F, Fut>(
    channel: Channel,
    queue: &str,
    consumer_tag: &str,
    handler: F,
) -> Result<(), lapin::Error>
where
    F: Fn(Vec<u8>) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    let mut consumer = channel
        .clone()
        .basic_consume(queue, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
        .await?;

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(d) => d,
            Err(err) => {
                error!(error = %err, queue, "broker delivery error");
                continue;
            }
        };

        match handler(delivery.data.clone()).await {
            Ok(()) => {
                if let Err(err) = channel.basic_ack(delivery.delivery_tag, BasicAckOptions::default()).await {
                    error!(error = %err, queue, "failed to ack delivery");
                }
            }
            Err(err) => {
                warn!(error = %err, queue, "message handler failed, nacking for redelivery");
                if let Err(err) = channel
                    .basic_nack(delivery.delivery_tag, BasicNackOptions { requeue: true, ..Default::default() })
                    .await
                {
                    error!(error = %err, queue, "failed to nack delivery");
                }
            }
        }
    }

    Ok(())
}
