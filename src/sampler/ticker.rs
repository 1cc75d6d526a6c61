use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::broadcast::SharedBroadcaster;
use crate::sampler::source::{MetricFamily, MetricSource};

/// Pulls from the source on a fixed period and hands each node's values to
/// the broadcaster, one envelope per node with `node_id` stamped into the
/// payload so clients can key their latest-value maps.
///
/// A failed sample is a transient fault: it is logged and that tick's
/// publish is skipped; the loop itself never exits.
pub async fn run_sampler(
    broadcaster: SharedBroadcaster,
    source: Arc<dyn MetricSource>,
    family: MetricFamily,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match source.sample(family) {
            Ok(samples) => {
                let mut broadcaster = broadcaster.lock().unwrap();
                for sample in samples {
                    let mut data = sample.values;
                    if let Some(obj) = data.as_object_mut() {
                        obj.insert("node_id".to_string(), json!(sample.node_id));
                    }
                    broadcaster.publish(family.topic(), Some(&sample.node_id), data);
                }
            }
            Err(e) => warn!("{family} sampler: {e}, skipping tick"),
        }
    }
}
