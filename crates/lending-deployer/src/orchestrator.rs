use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use deployment_ledger::{Ledger, LedgerKey};
use ethers::types::Address;
use futures::future::join_all;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, info};

use crate::{
    config::ExecutionOptions,
    errors::DeployError,
    executor::{DeployWarning, DeployedComponent, ExecutionContext, StepExecutor},
    gateway::ChainGateway,
    verifier::Verifier,
};

/// One logical deployment or configuration action.
///
/// A step is skipped when every key it produces is already recorded, and
/// refused when any key it depends on is not.
#[async_trait]
pub trait Step: Send + Sync {
    fn id(&self) -> String;

    fn depends_on(&self) -> Vec<LedgerKey>;

    fn produces(&self) -> Vec<LedgerKey>;

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError>;
}

pub enum Stage {
    Single(Box<dyn Step>),
    /// Independent steps that run concurrently. The stage completes once
    /// every branch has finished, and fails if any branch failed.
    Parallel(Vec<Box<dyn Step>>),
}

impl Stage {
    fn steps(&self) -> Vec<&dyn Step> {
        match self {
            Stage::Single(step) => vec![step.as_ref()],
            Stage::Parallel(steps) => steps.iter().map(|s| s.as_ref()).collect(),
        }
    }
}

/// An ordered list of stages.
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: vec![],
        }
    }

    pub fn then(mut self, step: impl Step + 'static) -> Self {
        self.stages.push(Stage::Single(Box::new(step)));
        self
    }

    pub fn fan_out(mut self, mut steps: Vec<Box<dyn Step>>) -> Self {
        match steps.len() {
            0 => {}
            1 => self.stages.push(Stage::Single(steps.remove(0))),
            _ => self.stages.push(Stage::Parallel(steps)),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|stage| stage.steps())
            .map(|step| step.id())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running { stage: usize },
    Completed,
    Failed {
        stage: usize,
        step: String,
        cause: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepStatus {
    /// Everything the step produces was already recorded.
    Skipped,
    Completed,
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct StepReport {
    pub id: String,
    pub status: StepStatus,
    pub components: Vec<DeployedComponent>,
    /// Produced keys that are recorded in the ledger, with their addresses.
    pub committed: Vec<(LedgerKey, Address)>,
    pub uncommitted: Vec<LedgerKey>,
}

#[derive(Debug)]
pub struct RunReport {
    pub pipeline: String,
    pub state: RunState,
    pub steps: Vec<StepReport>,
    pub warnings: Vec<DeployWarning>,
    pub error: Option<DeployError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn step(&self, id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    pub fn components(&self) -> impl Iterator<Item = &DeployedComponent> {
        self.steps.iter().flat_map(|s| s.components.iter())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pipeline {}: {:?}", self.pipeline, self.state)?;
        for step in &self.steps {
            let status = match &step.status {
                StepStatus::Skipped => "skipped".to_string(),
                StepStatus::Completed => "ok".to_string(),
                StepStatus::Failed(cause) => format!("FAILED: {cause}"),
            };
            writeln!(f, "  {:<40} {}", step.id, status)?;
            for (key, address) in &step.committed {
                writeln!(f, "      {key} = {address:#x}")?;
            }
            for key in &step.uncommitted {
                writeln!(f, "      {key} (not committed)")?;
            }
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        Ok(())
    }
}

/// Runs pipelines against a ledger, one stage at a time.
pub struct Orchestrator {
    ctx: ExecutionContext,
    state: Mutex<RunState>,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn ChainGateway>, ledger: Arc<Ledger>, options: ExecutionOptions) -> Self {
        Self {
            ctx: ExecutionContext {
                gateway,
                verifier: None,
                ledger,
                options,
            },
            state: Mutex::new(RunState::NotStarted),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.ctx.verifier = Some(verifier);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ctx.ledger
    }

    pub fn state(&self) -> RunState {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or(RunState::NotStarted)
    }

    fn set_state(&self, state: RunState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    /// Runs every stage in order, stopping at the first failure.
    pub async fn run(&self, pipeline: &Pipeline) -> RunReport {
        let (tx, mut rx) = unbounded_channel();
        let mut report = RunReport {
            pipeline: pipeline.name.clone(),
            state: RunState::NotStarted,
            steps: vec![],
            warnings: vec![],
            error: None,
        };
        info!(pipeline = %pipeline.name, stages = pipeline.stages.len(), "starting run");

        for (i, stage) in pipeline.stages.iter().enumerate() {
            self.set_state(RunState::Running { stage: i });
            let results = match stage {
                Stage::Single(step) => vec![self.run_step(step.as_ref(), tx.clone()).await],
                Stage::Parallel(steps) => {
                    join_all(steps.iter().map(|step| self.run_step(step.as_ref(), tx.clone())))
                        .await
                }
            };
            drain(&mut rx, &mut report.warnings);

            let mut failure = None;
            for (step_report, result) in results {
                if let Err(err) = result {
                    if failure.is_none() {
                        failure = Some((step_report.id.clone(), err));
                    }
                }
                report.steps.push(step_report);
            }
            if let Some((step, cause)) = failure {
                error!(pipeline = %pipeline.name, %step, %cause, "run failed");
                let state = RunState::Failed {
                    stage: i,
                    step,
                    cause: cause.to_string(),
                };
                self.set_state(state.clone());
                report.state = state;
                report.error = Some(cause);
                return report;
            }
        }

        info!(pipeline = %pipeline.name, "run completed");
        self.set_state(RunState::Completed);
        report.state = RunState::Completed;
        report
    }

    async fn run_step(
        &self,
        step: &dyn Step,
        warnings: UnboundedSender<DeployWarning>,
    ) -> (StepReport, Result<(), DeployError>) {
        let id = step.id();
        let ledger = &self.ctx.ledger;
        let produces = step.produces();

        let (status, components, result) =
            if !produces.is_empty() && produces.iter().all(|key| ledger.contains(key)) {
                info!(step = %id, "outputs already recorded, skipping");
                (StepStatus::Skipped, vec![], Ok(()))
            } else if let Some(missing) = step.depends_on().into_iter().find(|key| !ledger.contains(key)) {
                let err = DeployError::MissingDependency(missing);
                (StepStatus::Failed(err.to_string()), vec![], Err(err))
            } else {
                info!(step = %id, "running");
                let executor = StepExecutor::new(id.clone(), self.ctx.clone(), warnings);
                let result = step.run(&executor).await;
                let status = match &result {
                    Ok(()) => StepStatus::Completed,
                    Err(err) => StepStatus::Failed(err.to_string()),
                };
                (status, executor.into_components(), result)
            };

        let mut committed = vec![];
        let mut uncommitted = vec![];
        for key in produces {
            match ledger.try_get(&key) {
                Ok(Some(address)) => committed.push((key, address)),
                _ => uncommitted.push(key),
            }
        }

        let report = StepReport {
            id,
            status,
            components,
            committed,
            uncommitted,
        };
        (report, result)
    }
}

fn drain(rx: &mut UnboundedReceiver<DeployWarning>, warnings: &mut Vec<DeployWarning>) {
    while let Ok(warning) = rx.try_recv() {
        warnings.push(warning);
    }
}
