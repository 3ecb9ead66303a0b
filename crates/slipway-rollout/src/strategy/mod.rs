//! Strategy executors.

mod blue_green;
mod canary;
mod rolling;

use async_trait::async_trait;

use slipway_core::{DeploymentConfig, SlipwayResult, Strategy};

use crate::context::{RolloutContext, RolloutOutcome};

pub use blue_green::BlueGreenExecutor;
pub use canary::CanaryExecutor;
pub use rolling::{RecreateExecutor, RollingExecutor};

/// One way of rolling a version out.
///
/// Executors move the deployment's phase forward through
/// [`RolloutContext::enter`] and undo any traffic change they made before
/// returning an error.
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    async fn execute(
        &self,
        config: &DeploymentConfig,
        ctx: &RolloutContext,
    ) -> SlipwayResult<RolloutOutcome>;

    /// Strategy name for logging.
    fn name(&self) -> &str;
}

pub fn executor_for(strategy: Strategy) -> Box<dyn StrategyExecutor> {
    match strategy {
        Strategy::BlueGreen => Box::new(BlueGreenExecutor),
        Strategy::Canary => Box::new(CanaryExecutor),
        Strategy::Rolling => Box::new(RollingExecutor),
        Strategy::Recreate => Box::new(RecreateExecutor),
    }
}
