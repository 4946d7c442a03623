//! Linear pipeline runner: configured step names → handlers → results.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use contentflow_shared::{ContentFlowError, Result, StepResult};
use tracing::{error, info, instrument};

use crate::context::MessageContext;
use crate::extract::ExtractHandler;
use crate::map::MapHandler;
use crate::step::{AppContext, Handler};

/// Builds a handler for a given step name.
pub type HandlerFactory = fn(AppContext, &str) -> Box<dyn Handler>;

/// Step name → handler constructor.
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, step_name: &str, factory: HandlerFactory) {
        self.factories.insert(step_name.to_string(), factory);
    }

    pub fn contains(&self, step_name: &str) -> bool {
        self.factories.contains_key(step_name)
    }

    fn build(&self, app: &AppContext, step_name: &str) -> Result<Box<dyn Handler>> {
        let factory = self.factories.get(step_name).ok_or_else(|| {
            ContentFlowError::config(format!("no handler registered for step '{step_name}'"))
        })?;
        Ok(factory(app.clone(), step_name))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("extract", extract_handler);
        registry.register("map", map_handler);
        registry
    }
}

fn extract_handler(app: AppContext, name: &str) -> Box<dyn Handler> {
    Box::new(ExtractHandler::new(app, name))
}

fn map_handler(app: AppContext, name: &str) -> Box<dyn Handler> {
    Box::new(MapHandler::new(app, name))
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called before a step executes.
    fn step_started(&self, name: &str, index: usize, total: usize);
    /// Called after a step's result is recorded.
    fn step_finished(&self, result: &StepResult);
    /// Called when every step has completed.
    fn done(&self, ctx: &MessageContext);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn step_started(&self, _name: &str, _index: usize, _total: usize) {}
    fn step_finished(&self, _result: &StepResult) {}
    fn done(&self, _ctx: &MessageContext) {}
}

/// Handlers in configured order.
pub struct Pipeline {
    handlers: Vec<Box<dyn Handler>>,
}

impl Pipeline {
    /// Instantiate one handler per configured step.
    ///
    /// Unknown or repeated step names are a config error.
    pub fn from_config(
        app: &AppContext,
        steps: &[String],
        registry: &HandlerRegistry,
    ) -> Result<Self> {
        if steps.is_empty() {
            return Err(ContentFlowError::config("pipeline has no steps"));
        }
        let mut seen = HashSet::new();
        if let Some(repeated) = steps.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(ContentFlowError::config(format!(
                "step '{repeated}' is configured more than once"
            )));
        }
        let handlers = steps
            .iter()
            .map(|name| registry.build(app, name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { handlers })
    }

    pub fn from_handlers(handlers: Vec<Box<dyn Handler>>) -> Self {
        Self { handlers }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// Results and artifacts from steps that already finished stay on `ctx`.
    /// Steps that already have a result are skipped, so a redelivered
    /// context resumes where it stopped.
    #[instrument(skip_all, fields(process_id = %ctx.process_id(), steps = self.handlers.len()))]
    pub async fn run(
        &self,
        ctx: &mut MessageContext,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let start = Instant::now();
        let total = self.handlers.len();

        for (index, handler) in self.handlers.iter().enumerate() {
            let name = handler.name();
            if let Some(done) = ctx.get_previous_step_result(name) {
                info!(step = name, "step already has a result, skipping");
                progress.step_finished(done);
                continue;
            }
            progress.step_started(name, index, total);
            ctx.begin_step(name);

            let result = match handler.execute(ctx).await {
                Ok(result) => result,
                Err(e) => {
                    error!(step = name, error = %e, "step failed");
                    return Err(e);
                }
            };

            progress.step_finished(&result);
            ctx.complete_step(result)?;
        }

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "pipeline complete"
        );
        progress.done(ctx);
        Ok(())
    }
}
