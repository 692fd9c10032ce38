//! Handler registry: `JobType -> handler`, built once and read-only after.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use invoq_core::JobType;

use crate::handler::JobHandler;

/// Immutable map from job type to its handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Registered job types in declaration order.
    pub fn job_types(&self) -> Vec<JobType> {
        JobType::ALL
            .iter()
            .copied()
            .filter(|t| self.contains(*t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Builder for [`HandlerRegistry`]. A later registration for the same job
/// type replaces the earlier one.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn with_handler<H: JobHandler + 'static>(self, handler: H) -> Self {
        self.with_shared_handler(Arc::new(handler))
    }

    pub fn with_shared_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        let job_type = handler.job_type();
        debug!(job_type = %job_type, "Registered job handler");
        self.handlers.insert(job_type, handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
