//! [`BalloonController`] – applies per-guest balloon targets.
//!
//! For every guest carrying a `balloon_target` control that differs from its
//! observed `balloon_cur` stat, the controller asks the [`Hypervisor`] to move
//! the balloon.  A failure for one guest does not stop the others; the first
//! error is returned once every guest has been attempted.

use std::sync::Arc;

use hostvisor_types::{GuestSample, HostSample, HostvisorError};
use tracing::{info, warn};

use crate::controller::{Controller, ControllerContext};
use crate::hypervisor::Hypervisor;

/// Registry name of the balloon controller.
pub const NAME: &str = "balloon";

pub struct BalloonController {
    hypervisor: Arc<dyn Hypervisor>,
}

impl BalloonController {
    pub fn new(hypervisor: Arc<dyn Hypervisor>) -> Self {
        Self { hypervisor }
    }

    /// Factory used by the plugin registry.
    pub fn instance(ctx: &ControllerContext) -> Result<Box<dyn Controller>, HostvisorError> {
        Ok(Box::new(Self::new(Arc::clone(&ctx.hypervisor))))
    }

    fn target_for(guest: &GuestSample) -> Result<Option<u64>, HostvisorError> {
        let Some(target) = guest.control("balloon_target") else {
            return Ok(None);
        };
        if !target.is_finite() || target < 0.0 {
            return Err(HostvisorError::ControllerFailed {
                controller: NAME.to_string(),
                details: format!("guest {} has invalid balloon_target {target}", guest.name),
            });
        }
        let target = target.round() as u64;
        let current = guest.stat("balloon_cur").map(|cur| cur.round() as u64);
        Ok((current != Some(target)).then_some(target))
    }
}

impl Controller for BalloonController {
    fn name(&self) -> &str {
        NAME
    }

    fn process(&mut self, _host: &HostSample, guests: &[GuestSample]) -> Result<(), HostvisorError> {
        let mut first_error = None;
        for guest in guests {
            let outcome = Self::target_for(guest).and_then(|target| match target {
                Some(kib) => {
                    self.hypervisor.set_balloon_target(guest, kib)?;
                    info!(guest = %guest.name, target_kib = kib, "balloon target set");
                    Ok(())
                }
                None => Ok(()),
            });
            if let Err(e) = outcome {
                warn!(guest = %guest.name, error = %e, "balloon adjustment failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
