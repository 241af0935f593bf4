use crate::{
    catalog::PackageSummary,
    download::{CancelToken, Progress},
    error::WorkflowError,
    workflow::{
        DependencySelection, InstallKind, InstallOutcome, InstallReport, InstallWorkflow,
        ModInstallationState, CORE_RUNTIME_PACKAGE,
    },
};
use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, error};

pub type JobId = u64;

pub enum Job {
    Install {
        package: PackageSummary,
        kind: InstallKind,
    },
    InstallWithDependencies {
        package: PackageSummary,
        selection: DependencySelection,
    },
    InstallCoreRuntime,
    Toggle {
        name: String,
    },
    Uninstall {
        name: String,
    },
}

impl Job {
    pub fn package(&self) -> &str {
        match self {
            Job::Install { package, .. } | Job::InstallWithDependencies { package, .. } => &package.name,
            Job::InstallCoreRuntime => CORE_RUNTIME_PACKAGE,
            Job::Toggle { name } | Job::Uninstall { name } => name,
        }
    }
}

#[derive(Debug)]
pub enum JobOutput {
    Installed(InstallOutcome),
    InstalledWithDependencies(InstallReport),
    Toggled(ModInstallationState),
    Uninstalled,
}

#[derive(Debug)]
pub enum WorkerMessage {
    Started {
        id: JobId,
        package: String,
    },
    Progress {
        id: JobId,
        package: String,
        progress: Progress,
    },
    Completed {
        id: JobId,
        package: String,
        output: JobOutput,
    },
    Failed {
        id: JobId,
        package: String,
        error: WorkflowError,
    },
}

/// Caller's handle on a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: JobId,
    cancel: CancelToken,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

struct Envelope {
    id: JobId,
    job: Job,
    cancel: CancelToken,
}

/// Fixed set of threads running workflow jobs. Results arrive on the
/// receiver returned by [`WorkerPool::new`].
pub struct WorkerPool {
    sender: Option<Sender<Envelope>>,
    threads: Vec<JoinHandle<()>>,
    next_id: JobId,
}

impl WorkerPool {
    pub fn new(workflow: Arc<InstallWorkflow>, size: usize) -> (Self, Receiver<WorkerMessage>) {
        let (job_tx, job_rx) = mpsc::channel::<Envelope>();
        let (message_tx, message_rx) = mpsc::channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let threads = (0..size.max(1))
            .map(|index| {
                let workflow = workflow.clone();
                let job_rx = job_rx.clone();
                let message_tx = message_tx.clone();
                thread::Builder::new()
                    .name(format!("repohub-worker-{index}"))
                    .spawn(move || worker_loop(&workflow, &job_rx, &message_tx))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    error!("failed to spawn worker: {err}");
                    None
                }
            })
            .collect();

        (
            WorkerPool {
                sender: Some(job_tx),
                threads,
                next_id: 0,
            },
            message_rx,
        )
    }

    pub fn size(&self) -> usize {
        self.threads.len()
    }

    pub fn submit(&mut self, job: Job) -> JobHandle {
        self.next_id += 1;
        let id = self.next_id;
        let cancel = CancelToken::new();
        let envelope = Envelope {
            id,
            job,
            cancel: cancel.clone(),
        };
        if let Some(sender) = &self.sender {
            if sender.send(envelope).is_err() {
                error!(id, "worker pool is gone; job dropped");
            }
        }
        JobHandle { id, cancel }
    }

    /// Stops accepting jobs, lets queued ones finish, and joins every thread.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    workflow: &InstallWorkflow,
    jobs: &Mutex<Receiver<Envelope>>,
    messages: &Sender<WorkerMessage>,
) {
    loop {
        let next = {
            let receiver = jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            receiver.recv()
        };
        let Ok(Envelope { id, job, cancel }) = next else {
            debug!("worker exiting");
            return;
        };

        let package = job.package().to_string();
        let _ = messages.send(WorkerMessage::Started {
            id,
            package: package.clone(),
        });
        let result = run_job(workflow, id, job, &cancel, messages);
        let message = match result {
            Ok(output) => WorkerMessage::Completed {
                id,
                package,
                output,
            },
            Err(error) => WorkerMessage::Failed { id, package, error },
        };
        let _ = messages.send(message);
    }
}

fn run_job(
    workflow: &InstallWorkflow,
    id: JobId,
    job: Job,
    cancel: &CancelToken,
    messages: &Sender<WorkerMessage>,
) -> Result<JobOutput, WorkflowError> {
    let mut report = |package: &str, progress: Progress| {
        let _ = messages.send(WorkerMessage::Progress {
            id,
            package: package.to_string(),
            progress,
        });
    };

    match job {
        Job::Install { package, kind } => {
            let name = package.name.clone();
            workflow
                .install(&package, kind, &mut |progress| report(&name, progress), cancel)
                .map(JobOutput::Installed)
        }
        Job::InstallWithDependencies { package, selection } => workflow
            .install_with_dependencies(&package, selection, &mut report, cancel)
            .map(JobOutput::InstalledWithDependencies),
        Job::InstallCoreRuntime => workflow
            .install_core_runtime(&mut |progress| report(CORE_RUNTIME_PACKAGE, progress), cancel)
            .map(JobOutput::Installed),
        Job::Toggle { name } => workflow.toggle(&name).map(JobOutput::Toggled),
        Job::Uninstall { name } => workflow.uninstall(&name).map(|_| JobOutput::Uninstalled),
    }
}
