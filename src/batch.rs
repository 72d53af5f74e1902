use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bevy::prelude::*;

use crate::{
    asset::ImposterAsset,
    backend::Backend,
    capture::{BakeRequest, CaptureController, CaptureProgress},
    config::ImposterConfig,
    error::BakeError,
};

#[derive(Clone, Debug, PartialEq)]
pub enum BakeProgress {
    /// Target `index` of `total` is about to be baked.
    Started { index: usize, total: usize },
    Snapshot {
        index: usize,
        progress: CaptureProgress,
    },
    Finished {
        index: usize,
        success: bool,
    },
}

/// Bakes `targets` one after another with the same config.
///
/// Every target gets its own result, in order; a failing target does not stop
/// the ones after it. Setting `cancel` aborts the running bake at the next
/// snapshot and every target after it reports `Cancelled` without rendering.
pub fn bake_batch<B: Backend>(
    world: &mut World,
    backend: &mut B,
    targets: &[BakeRequest],
    config: &ImposterConfig,
    progress: &crossbeam_channel::Sender<BakeProgress>,
    cancel: &Arc<AtomicBool>,
) -> Vec<Result<ImposterAsset, BakeError>> {
    let controller = CaptureController::new(config);
    let total = targets.len();
    let snapshot_count = controller.frame_count();

    let mut results = Vec::with_capacity(total);
    for (index, request) in targets.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            results.push(Err(BakeError::Cancelled {
                completed: 0,
                total: snapshot_count,
            }));
            continue;
        }

        info!("baking target {}/{}", index + 1, total);
        send(progress, BakeProgress::Started { index, total });

        let result = controller.bake_with_progress(world, backend, *request, |snapshot| {
            send(
                progress,
                BakeProgress::Snapshot {
                    index,
                    progress: snapshot,
                },
            );
            if cancel.load(Ordering::Relaxed) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        if let Err(e) = &result {
            warn!("target {}/{} failed: {e}", index + 1, total);
        }
        send(
            progress,
            BakeProgress::Finished {
                index,
                success: result.is_ok(),
            },
        );
        results.push(result);
    }
    results
}

fn send(sender: &crossbeam_channel::Sender<BakeProgress>, message: BakeProgress) {
    if sender.send(message).is_err() {
        debug!("progress receiver dropped");
    }
}
