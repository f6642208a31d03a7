use std::sync::Arc;

use crate::engine::authz::AuthorizationOracle;
use crate::engine::events::EventBus;
use crate::engine::expr::FormulaCache;
use crate::engine::repository::ReductionRepository;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn ReductionRepository>,
    pub oracle: Arc<dyn AuthorizationOracle>,
    pub cache: Arc<FormulaCache>,
    pub bus: Arc<EventBus>,
}
