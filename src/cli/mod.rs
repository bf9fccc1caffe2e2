//! CLI argument parsing and command dispatch

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nix::sys::signal::Signal;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use stress_herd_core::config::{parse_cpu_list, parse_timeout};
use stress_herd_core::{
    parse_classes, plan, Catalog, ExitStatus, IoClass, IoNice, OomPolicy, OrchestratorBuilder,
    RunConfig, SchedPolicy, ScheduleRequest, StressClass, WorkloadRequest,
};
use stress_herd_report::{
    log_metrics, log_times, CsvExporter, JsonExporter, ReportOptions, SystemInfo, YamlExporter,
};

/// stress-herd - fork, supervise and report on OS stress workloads
#[derive(Parser, Debug)]
#[command(name = "stress-herd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write the log to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Commands other than running workloads
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the available workloads
    List {
        /// Only workloads in these classes
        #[arg(long, value_name = "CLASS[,CLASS...]")]
        class: Option<String>,
    },
    /// List the workload classes
    Classes,
}

/// Workload selection, supervisor policy and reporting
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run a workload: NAME[:INSTANCES[:OPS]], repeatable
    #[arg(short, long = "workload", value_name = "SPEC")]
    pub workloads: Vec<String>,

    /// Run every workload one after another with N instances each
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub sequential: Option<i32>,

    /// Run every workload at once with N instances each
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub all: Option<i32>,

    /// Restrict --sequential/--all to these classes
    #[arg(long, value_name = "CLASS[,CLASS...]")]
    pub class: Option<String>,

    /// Spread N instances over randomly chosen workloads
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub random: Option<i32>,

    /// Remove these workloads from the selection
    #[arg(short = 'x', long, value_name = "NAME[,NAME...]", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Allow workloads that may hang or crash the host
    #[arg(long)]
    pub pathological: bool,

    /// Total bogo-ops per workload, split over its instances
    #[arg(long, value_name = "N")]
    pub ops: Option<u64>,

    /// Stop after T: N[s|m|h|d|w|y], 0 for no limit
    #[arg(short, long, value_name = "T", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Stop the whole run when any worker fails
    #[arg(long)]
    pub abort: bool,

    /// Keep migrating workers between CPUs
    #[arg(long)]
    pub aggressive: bool,

    /// Count OOM kills as failures instead of restarting the worker
    #[arg(long)]
    pub oom_fatal: bool,

    /// Do not make workers preferred OOM-killer victims
    #[arg(long)]
    pub oom_avoid: bool,

    /// Worker scheduling policy: other, batch, idle, fifo, rr
    #[arg(long, value_name = "POLICY", value_parser = parse_sched)]
    pub sched: Option<SchedPolicy>,

    /// Static priority for the scheduling policy
    #[arg(long, value_name = "PRIO")]
    pub sched_prio: Option<i32>,

    /// Worker nice value
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub nice: Option<i32>,

    /// Worker I/O class: realtime, besteffort, idle
    #[arg(long, value_name = "CLASS", value_parser = parse_io_class)]
    pub ionice_class: Option<IoClass>,

    /// Worker I/O priority level, 0 (highest) to 7
    #[arg(long, value_name = "LEVEL", default_value_t = 4)]
    pub ionice_level: u8,

    /// Restrict workers to these CPUs, e.g. 0,2,4-7
    #[arg(long, value_name = "LIST", value_parser = parse_taskset)]
    pub taskset: Option<CpuList>,

    /// Microseconds each worker waits per sibling started before it
    #[arg(long, value_name = "USECS", default_value_t = 0)]
    pub backoff: u64,

    /// Spawn and reap workers without running the workloads
    #[arg(long)]
    pub dry_run: bool,

    /// Signal used to stop workers before escalating to SIGKILL
    #[arg(long, value_name = "SIGNAL", value_parser = parse_signal)]
    pub kill_signal: Option<Signal>,

    /// Seed for random workload selection and CPU migration
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log per-workload metrics at the end of the run
    #[arg(long)]
    pub metrics: bool,

    /// Like --metrics, skipping workloads that did nothing
    #[arg(long)]
    pub metrics_brief: bool,

    /// Log run-wide CPU time usage
    #[arg(long)]
    pub times: bool,

    /// Write a YAML report
    #[arg(short = 'Y', long, value_name = "FILE")]
    pub yaml: Option<PathBuf>,

    /// Write a JSON report
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Write per-workload metrics as CSV
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,
}

/// Parsed `--taskset` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuList(pub Vec<usize>);

fn parse_taskset(s: &str) -> Result<CpuList, String> {
    parse_cpu_list(s).map(CpuList).map_err(|e| e.to_string())
}

fn parse_sched(s: &str) -> Result<SchedPolicy, String> {
    SchedPolicy::from_name(&s.to_ascii_lowercase())
        .ok_or_else(|| format!("unknown scheduling policy '{s}'"))
}

fn parse_io_class(s: &str) -> Result<IoClass, String> {
    IoClass::from_name(&s.to_ascii_lowercase()).ok_or_else(|| format!("unknown I/O class '{s}'"))
}

fn parse_signal(s: &str) -> Result<Signal, String> {
    let upper = s.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| format!("unknown signal '{s}'"))
}

impl RunArgs {
    /// Selection intent from the command line
    pub fn schedule_request(&self) -> Result<ScheduleRequest> {
        let workloads = self
            .workloads
            .iter()
            .map(String::as_str)
            .map(WorkloadRequest::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let class = self.class.as_deref().map(parse_classes).transpose()?;

        Ok(ScheduleRequest {
            workloads,
            sequential: self.sequential,
            all: self.all,
            class,
            random: self.random,
            exclude: self.exclude.clone(),
            pathological: self.pathological,
            workload_ops: self.ops,
        })
    }

    /// Supervisor configuration from the command line
    pub fn run_config(&self) -> RunConfig {
        let mut config = RunConfig {
            timeout: self.timeout,
            abort: self.abort,
            aggressive: self.aggressive,
            oom_policy: if self.oom_fatal {
                OomPolicy::Fatal
            } else {
                OomPolicy::Restart
            },
            oom_avoid: self.oom_avoid,
            sched: self.sched,
            sched_prio: self.sched_prio,
            nice: self.nice,
            ionice: self.ionice_class.map(|class| IoNice {
                class,
                level: self.ionice_level,
            }),
            cpu_affinity: self.taskset.as_ref().map(|cpus| cpus.0.clone()),
            backoff_us: self.backoff,
            dry_run: self.dry_run,
            ..Default::default()
        };
        if let Some(signal) = self.kill_signal {
            config.kill_signal = signal as i32;
        }
        config
    }

    fn report_options(&self) -> ReportOptions {
        ReportOptions {
            brief: self.metrics_brief,
            times: self.times,
        }
    }

    /// Run the selected workloads and write the requested reports
    pub fn run(&self, catalog: &Catalog) -> Result<ExitStatus> {
        let request = self.schedule_request()?;
        let config = self.run_config();

        let mut rng = match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let schedule = plan(&request, catalog, &mut rng)?;

        let mut builder = OrchestratorBuilder::new().config(config).schedule(schedule);
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }
        let mut orchestrator = builder.build()?;
        let report = orchestrator.run()?;

        let options = self.report_options();
        if self.metrics || self.metrics_brief {
            log_metrics(&report, options.brief);
        }
        if self.times {
            log_times(&report.times);
        }

        if self.yaml.is_some() || self.json.is_some() {
            let info = SystemInfo::collect(env!("CARGO_PKG_VERSION"));
            if let Some(path) = &self.yaml {
                if let Err(e) = YamlExporter::export(&report, info.clone(), options, path) {
                    tracing::error!(path = %path.display(), error = %e, "Cannot write YAML report");
                }
            }
            if let Some(path) = &self.json {
                if let Err(e) = JsonExporter::export(&report, &info, options, path) {
                    tracing::error!(path = %path.display(), error = %e, "Cannot write JSON report");
                }
            }
        }
        if let Some(path) = &self.csv {
            if let Err(e) = CsvExporter::export(&report, options.brief, path) {
                tracing::error!(path = %path.display(), error = %e, "Cannot write CSV report");
            }
        }

        Ok(report.exit_status())
    }
}

/// Print the workloads, optionally filtered by class
pub fn list_workloads(catalog: &Catalog, class: Option<&str>) -> Result<()> {
    let filter = class
        .map(parse_classes)
        .transpose()
        .context("bad --class")?
        .unwrap_or(StressClass::all());

    for stressor in catalog.by_class(filter) {
        let mut classes = stressor.class().names().join(",");
        if stressor.class().contains(StressClass::PATHOLOGICAL) {
            classes.push_str(" (pathological)");
        }
        let note = match stressor.supported() {
            Ok(()) => String::new(),
            Err(reason) => format!(" [unsupported: {reason}]"),
        };
        println!("{:<13} {classes}{note}", stressor.name());
    }
    Ok(())
}

/// Print the class names
pub fn list_classes() {
    let names: Vec<&str> = stress_herd_core::traits::CLASS_NAMES
        .iter()
        .map(|(name, _)| *name)
        .collect();
    println!("{}", names.join(" "));
}
