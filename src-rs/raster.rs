use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bridge::BinaryRenderedNode;
use crate::error::HostError;
use crate::scene::{ExportFormat, Exporter, NodeId, SceneGraph};

/// Edge of the square canvas every raster is framed into.
pub const CANVAS_SIZE: f64 = 224.0;

/// Cooperative cancellation for one predict request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedNode {
    pub node_id: NodeId,
    pub reason: String,
}

/// Outcome of a best-effort batch: rendered nodes in input order plus the ones left out.
#[derive(Debug, Default)]
pub struct RasterBatch {
    pub rendered: Vec<BinaryRenderedNode>,
    pub skipped: Vec<SkippedNode>,
    pub cancelled: bool,
}

/// Scale applied to nodes larger than the canvas, rounded to two decimals.
pub fn fit_ratio(largest_measure: f64) -> Option<f64> {
    if largest_measure > CANVAS_SIZE {
        Some(((CANVAS_SIZE / largest_measure) * 100.0).round() / 100.0)
    } else {
        None
    }
}

/// Renders each node into a centered 224x224 image, one at a time.
///
/// The document is left as it was found: every clone and wrapping frame is
/// removed before moving on, whether the export succeeded or not. A failed
/// node is recorded in [`RasterBatch::skipped`] and the batch continues.
pub async fn rasterize<H>(
    host: &H,
    nodes: &[NodeId],
    format: ExportFormat,
    cancel: &CancelToken,
) -> RasterBatch
where
    H: SceneGraph + Exporter,
{
    let mut batch = RasterBatch::default();
    for id in nodes {
        if cancel.is_cancelled() {
            let done = batch.rendered.len() + batch.skipped.len();
            warn!(remaining = nodes.len() - done, "rasterization cancelled");
            batch.cancelled = true;
            break;
        }
        match render_node(host, id, format).await {
            Ok(bytes) => {
                debug!(node = %id, bytes = bytes.len(), "rendered node");
                batch.rendered.push(BinaryRenderedNode {
                    node_id: id.clone(),
                    image_data_bytes: bytes,
                });
            }
            Err(err) => {
                warn!(node = %id, error = %err, "skipping node that failed to render");
                batch.skipped.push(SkippedNode {
                    node_id: id.clone(),
                    reason: err.to_string(),
                });
            }
        }
        tokio::task::yield_now().await;
    }
    batch
}

async fn render_node<H>(host: &H, id: &NodeId, format: ExportFormat) -> Result<Vec<u8>, HostError>
where
    H: SceneGraph + Exporter,
{
    let node = host
        .node(id)
        .ok_or_else(|| HostError::MissingNode(id.clone()))?;
    let mut transient: Vec<NodeId> = Vec::new();

    let result = async {
        let content = host.clone_node(id)?;
        transient.push(content.clone());
        if let Some(ratio) = fit_ratio(node.largest_measure()) {
            host.rescale(&content, ratio)?;
        }
        let frame = host.create_centered_frame(CANVAS_SIZE)?;
        transient.push(frame.clone());
        host.insert_child(&frame, 0, &content)?;
        let bytes = host.export(&frame, format).await?;
        Ok::<_, HostError>(bytes)
    }
    .await;

    // Frame first; it takes the content clone with it.
    for created in transient.iter().rev() {
        host.remove(created);
    }
    result
}
