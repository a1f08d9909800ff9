use std::sync::Arc;

use super::ResultCode;
use crate::backend::BackendRegistry;
use crate::codegen::{compile, BackendPolicy, Plan};
use crate::error::ForgeError;
use crate::graph::Model;

/// A model waiting to be compiled, then the compiled plan.
#[derive(Debug)]
pub struct Compilation {
    model: Option<Model>,
    plan: Option<Arc<Plan>>,
    error: Option<ForgeError>,
}

impl Compilation {
    pub fn new(model: Model) -> Self {
        Self {
            model: Some(model),
            plan: None,
            error: None,
        }
    }

    /// Compile once. A second call is a state error.
    pub fn finish(&mut self, registry: &BackendRegistry, policy: &BackendPolicy) -> ResultCode {
        let model = match self.model.take() {
            Some(model) => model,
            None => return ResultCode::BadState,
        };
        match compile(model, registry, policy) {
            Ok(plan) => {
                self.plan = Some(Arc::new(plan));
                ResultCode::NoError
            }
            Err(err) => {
                tracing::warn!(error = %err, category = %err.category(), "compilation failed");
                let code = ResultCode::from(&err);
                self.error = Some(err);
                code
            }
        }
    }

    pub fn plan(&self) -> Option<Arc<Plan>> {
        self.plan.clone()
    }

    /// Why the last `finish` failed.
    pub fn error(&self) -> Option<&ForgeError> {
        self.error.as_ref()
    }
}
