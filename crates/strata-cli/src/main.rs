//! Strata - environment-isolated warehouse builds
//!
//! The `strata` command drives builds and deployments of a warehouse project.
//!
//! ## Commands
//!
//! - `build`: state-diffed build into the context's namespaces
//! - `plan`: what a build would do, without touching the warehouse
//! - `clone`: populate a change request's isolated namespace
//! - `teardown`: drop a change request's isolated namespace
//! - `deploy`: apply changed infrastructure definitions in kind order
//! - `init`: rewrite template values across a new project

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use strata_core::metrics::METRICS;
use strata_core::{
    apply_rewrite, clone_namespace, deploy_changed, plan_rewrite, sort_for_apply, teardown,
    BuildOptions, BuildRequest, CancelToken, CloneSection, CloneSelection, CloneSpec,
    ExecutionContext, InfraSelection, IsolatedNamespace, NamespaceRouter, Pipeline,
    PlannedAction, Project, SchemaRef, TemplateValues, Timeout, Warehouse,
};
use strata_state::{FsManifestStore, FsTargetLocks, ManifestStore, SurrealManifestStore};
use strata_warehouse::{ClientConfig, CommandWarehouse, DryRunWarehouse};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "strata")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Environment-isolated warehouse builds and deployments", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding strata.toml
    #[arg(long, global = true, env = "STRATA_PROJECT_DIR", default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every changed artifact; defer the rest to their last location
    Build {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        state: StateArgs,

        #[command(flatten)]
        diff: DiffArgs,

        /// Concurrent materializations within one dependency level
        #[arg(long, default_value_t = 1)]
        threads: usize,

        /// Limit for one artifact's materialization (0 disables)
        #[arg(long, default_value_t = 900)]
        artifact_timeout_secs: u64,

        /// Limit for the whole CI clone (0 disables)
        #[arg(long, default_value_t = 1800)]
        clone_timeout_secs: u64,

        /// Skip the CI clone even when the project declares one
        #[arg(long)]
        no_clone: bool,
    },

    /// Show where each artifact goes and whether it would be rebuilt
    Plan {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        state: StateArgs,

        #[command(flatten)]
        diff: DiffArgs,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Clone production data into a change request's isolated namespace
    Clone {
        #[command(flatten)]
        target: TargetArgs,

        /// Source database (default: the project's [clone] section)
        #[arg(long)]
        source_database: Option<String>,

        /// Schemas to clone in full
        #[arg(long, value_delimiter = ',')]
        schemas: Vec<String>,

        /// Explicit SCHEMA.TABLE list; selects slim mode
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Keep a random percentage of rows (0 = zero-copy clone)
        #[arg(long)]
        sample_percent: Option<u8>,

        /// Role used for every source read
        #[arg(long)]
        access_role: Option<String>,

        #[arg(long, default_value_t = 1800)]
        clone_timeout_secs: u64,
    },

    /// Drop a change request's isolated namespace
    Teardown {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Apply changed infrastructure definitions in kind order
    Deploy {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        state: StateArgs,

        /// Apply exactly these definitions, changed or not
        #[arg(long, value_delimiter = ',', conflicts_with = "all")]
        only: Vec<String>,

        /// Apply every definition, ignoring stored hashes
        #[arg(long)]
        all: bool,

        /// Limit for each definition (0 disables)
        #[arg(long, default_value_t = 600)]
        statement_timeout_secs: u64,
    },

    /// Replace template values across a project tree
    Init {
        #[command(flatten)]
        values: TemplateArgs,

        /// Apply the changes (default: print what would change)
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Where a command runs and how the warehouse is reached.
#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// Execution context: local, ci, staging or production
    #[arg(long, env = "STRATA_CONTEXT", default_value = "local")]
    context: String,

    /// Target database for local, staging and production
    #[arg(long, env = "STRATA_DATABASE")]
    database: Option<String>,

    /// Database hosting isolated namespaces
    #[arg(long, env = "STRATA_CI_DATABASE", default_value = "_DB_UTILS")]
    ci_database: String,

    /// Compute warehouse selected for every statement
    #[arg(long, env = "STRATA_WAREHOUSE")]
    warehouse: Option<String>,

    /// Change request number (ci)
    #[arg(long, env = "STRATA_PR_NUMBER")]
    pr_number: Option<u64>,

    /// Source revision (ci)
    #[arg(long, env = "STRATA_REVISION")]
    revision: Option<String>,

    /// Command that executes SQL read from stdin
    #[arg(long, env = "STRATA_SQL_CLIENT")]
    sql_client: Option<String>,

    /// Role the session starts in
    #[arg(long, env = "STRATA_ROLE")]
    role: Option<String>,

    /// Limit for each client invocation (0 disables)
    #[arg(long, env = "STRATA_CLIENT_TIMEOUT_SECS", default_value_t = 0)]
    client_timeout_secs: u64,

    /// Print statements instead of executing them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug, Clone)]
struct StateArgs {
    /// Artifact store root
    #[arg(long, env = "STRATA_STATE_DIR", default_value = ".strata/state")]
    state_dir: PathBuf,

    /// SurrealDB endpoint for manifests (mem://, surrealkv://path, ws://host)
    #[arg(long, env = "STRATA_STATE_URL")]
    state_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct DiffArgs {
    /// Rebuild these artifacts (and their dependents) regardless of hash
    #[arg(long, value_delimiter = ',')]
    force: Vec<String>,

    /// Diff against the manifest stored under this key
    #[arg(long)]
    state_from: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct TemplateArgs {
    #[arg(long)]
    project_name: Option<String>,
    #[arg(long)]
    author_name: Option<String>,
    #[arg(long)]
    organization: Option<String>,
    #[arg(long)]
    app_database: Option<String>,
    #[arg(long)]
    ci_database: Option<String>,
    #[arg(long)]
    warehouse_name: Option<String>,
}

impl TemplateArgs {
    fn values(&self) -> TemplateValues {
        let defaults = TemplateValues::default();
        let pick = |v: &Option<String>, d: String| v.clone().unwrap_or(d);
        TemplateValues {
            project_name: pick(&self.project_name, defaults.project_name),
            author_name: pick(&self.author_name, defaults.author_name),
            organization: pick(&self.organization, defaults.organization),
            app_database: pick(&self.app_database, defaults.app_database),
            ci_database: pick(&self.ci_database, defaults.ci_database),
            warehouse_name: pick(&self.warehouse_name, defaults.warehouse_name),
        }
    }
}

/// The warehouse a command talks to.
enum Session {
    Live(CommandWarehouse),
    DryRun(DryRunWarehouse),
}

impl Session {
    fn warehouse(&self) -> &dyn Warehouse {
        match self {
            Session::Live(wh) => wh,
            Session::DryRun(wh) => wh,
        }
    }

    fn print_statements(&self) {
        if let Session::DryRun(wh) = self {
            for statement in wh.statements() {
                println!("{statement};");
            }
        }
    }
}

impl TargetArgs {
    fn context(&self) -> Result<ExecutionContext> {
        Ok(self.context.parse()?)
    }

    fn isolated(&self) -> Result<Option<IsolatedNamespace>> {
        match (self.pr_number, self.revision.as_deref()) {
            (Some(pr), Some(revision)) => Ok(Some(IsolatedNamespace::derive(pr, revision)?)),
            (None, None) => Ok(None),
            _ => bail!("STRATA_PR_NUMBER and STRATA_REVISION must be set together"),
        }
    }

    fn require_isolated(&self) -> Result<IsolatedNamespace> {
        self.isolated()?
            .context("a change request number and revision are required (STRATA_PR_NUMBER, STRATA_REVISION)")
    }

    /// CI builds land in the CI database; every other context in the target database.
    fn router(&self, default_namespace: &str) -> Result<NamespaceRouter> {
        let context = self.context()?;
        let database = if context.is_ci() {
            self.ci_database.clone()
        } else {
            self.database
                .clone()
                .context("STRATA_DATABASE is required outside the ci context")?
        };
        Ok(NamespaceRouter::new(
            context,
            database,
            default_namespace,
            self.isolated()?,
        )?)
    }

    fn isolated_schema(&self) -> Result<SchemaRef> {
        let isolated = self.require_isolated()?;
        Ok(SchemaRef::new(self.ci_database.clone(), isolated.id()))
    }

    fn open_session(&self) -> Result<Session> {
        if self.dry_run {
            let role = self.role.clone().unwrap_or_else(|| "SYSADMIN".to_string());
            return Ok(Session::DryRun(DryRunWarehouse::new(role)));
        }
        let command = self
            .sql_client
            .as_deref()
            .context("no SQL client configured; set STRATA_SQL_CLIENT or pass --dry-run")?;
        let mut config = ClientConfig::parse(command)?
            .with_statement_timeout(Timeout::from_secs(self.client_timeout_secs));
        if let Some(role) = &self.role {
            config = config.with_initial_role(role.clone());
        }
        if let Some(warehouse) = &self.warehouse {
            config = config.with_compute_warehouse(warehouse.clone());
        }
        Ok(Session::Live(CommandWarehouse::new(config)?))
    }
}

impl StateArgs {
    async fn open(&self) -> Result<(Box<dyn ManifestStore>, FsTargetLocks)> {
        let locks = FsTargetLocks::new(&self.state_dir)
            .with_context(|| format!("failed to open state dir {}", self.state_dir.display()))?;
        let store: Box<dyn ManifestStore> = match &self.state_url {
            Some(url) => Box::new(
                SurrealManifestStore::connect(url)
                    .await
                    .context("failed to connect to manifest store")?,
            ),
            None => Box::new(FsManifestStore::new(&self.state_dir).with_context(|| {
                format!("failed to open state dir {}", self.state_dir.display())
            })?),
        };
        Ok((store, locks))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    strata_core::init_tracing(cli.json, level);

    let result = run(cli).await;
    METRICS.flush();
    result
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let project_dir = cli.project_dir;
    match cli.command {
        Commands::Build {
            target,
            state,
            diff,
            threads,
            artifact_timeout_secs,
            clone_timeout_secs,
            no_clone,
        } => {
            let options = BuildSettings {
                threads,
                artifact_timeout: Timeout::from_secs(artifact_timeout_secs),
                clone_timeout: Timeout::from_secs(clone_timeout_secs),
                no_clone,
            };
            cmd_build(&project_dir, &target, &state, &diff, options).await
        }
        Commands::Plan {
            target,
            state,
            diff,
            output,
        } => cmd_plan(&project_dir, &target, &state, &diff, output).await,
        Commands::Clone {
            target,
            source_database,
            schemas,
            tables,
            sample_percent,
            access_role,
            clone_timeout_secs,
        } => {
            let overrides = CloneOverrides {
                source_database,
                schemas,
                tables,
                sample_percent,
                access_role,
            };
            cmd_clone(
                &project_dir,
                &target,
                overrides,
                Timeout::from_secs(clone_timeout_secs),
            )
            .await
        }
        Commands::Teardown { target } => cmd_teardown(&target).await,
        Commands::Deploy {
            target,
            state,
            only,
            all,
            statement_timeout_secs,
        } => {
            let selection = if all {
                InfraSelection::All
            } else if only.is_empty() {
                InfraSelection::Changed
            } else {
                InfraSelection::Only(only.into_iter().collect())
            };
            cmd_deploy(
                &project_dir,
                &target,
                &state,
                &selection,
                Timeout::from_secs(statement_timeout_secs),
            )
            .await
        }
        Commands::Init { values, yes } => cmd_init(&project_dir, &values.values(), yes),
    }
}

struct BuildSettings {
    threads: usize,
    artifact_timeout: Timeout,
    clone_timeout: Timeout,
    no_clone: bool,
}

/// Cancel token set on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight artifacts and skipping the rest");
            token.cancel();
        }
    });
    cancel
}

fn load_project(project_dir: &Path) -> Result<Project> {
    Project::load(project_dir)
        .with_context(|| format!("failed to load project in {}", project_dir.display()))
}

/// Run a state-diffed build
async fn cmd_build(
    project_dir: &Path,
    target: &TargetArgs,
    state: &StateArgs,
    diff: &DiffArgs,
    settings: BuildSettings,
) -> Result<ExitCode> {
    let project = load_project(project_dir)?;
    let graph = project.graph()?;
    let router = target.router(&project.default_namespace)?;
    let session = target.open_session()?;
    let (store, locks) = state.open().await?;

    let clone = match (&project.clone, router.context().is_ci() && !settings.no_clone) {
        (Some(section), true) => Some(section.to_spec(router.schema_for(""))?),
        _ => None,
    };
    let request = BuildRequest {
        forced: diff.force.clone(),
        state_from: diff.state_from.clone(),
        clone,
    };
    let options = BuildOptions {
        threads: settings.threads,
        artifact_timeout: settings.artifact_timeout,
        cancel: cancel_on_ctrl_c(),
    };

    let pipeline = Pipeline::new(session.warehouse(), store.as_ref(), &locks, router)
        .with_options(options)
        .with_clone_timeout(settings.clone_timeout);
    info!(project = %project.name, key = %pipeline.manifest_key(), "starting build");
    let outcome = pipeline.run(&graph, &request).await?;

    session.print_statements();
    for line in outcome.summary_lines() {
        println!("{line}");
    }
    outcome.ensure_not_cancelled()?;
    Ok(ExitCode::from(outcome.exit_code() as u8))
}

/// Print the build plan
async fn cmd_plan(
    project_dir: &Path,
    target: &TargetArgs,
    state: &StateArgs,
    diff: &DiffArgs,
    output: OutputFormat,
) -> Result<ExitCode> {
    let project = load_project(project_dir)?;
    let graph = project.graph()?;
    let router = target.router(&project.default_namespace)?;
    let session = DryRunWarehouse::new("PLAN");
    let (store, locks) = state.open().await?;

    let request = BuildRequest {
        forced: diff.force.clone(),
        state_from: diff.state_from.clone(),
        clone: None,
    };
    let pipeline = Pipeline::new(&session, store.as_ref(), &locks, router);
    let plan = pipeline.plan(&graph, &request).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Text => {
            match &plan.baseline {
                Some(build_id) => println!("baseline: build {build_id}"),
                None => println!("baseline: none (full build)"),
            }
            for artifact in &plan.artifacts {
                let reason = artifact
                    .reason
                    .as_ref()
                    .map(|r| r.label())
                    .unwrap_or_else(|| "unchanged".to_string());
                match &artifact.action {
                    PlannedAction::Build => {
                        println!("build   {} -> {} ({reason})", artifact.id, artifact.location)
                    }
                    PlannedAction::Defer { from } => {
                        println!("defer   {} -> {from} ({reason})", artifact.id)
                    }
                }
            }
            println!(
                "{} to build, {} deferred",
                plan.to_build(),
                plan.artifacts.len() - plan.to_build()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Command-line values that override the project's [clone] section.
#[derive(Debug, Default)]
struct CloneOverrides {
    source_database: Option<String>,
    schemas: Vec<String>,
    tables: Vec<String>,
    sample_percent: Option<u8>,
    access_role: Option<String>,
}

impl CloneOverrides {
    fn resolve(self, section: Option<&CloneSection>, target: SchemaRef) -> Result<CloneSpec> {
        let source_database = self
            .source_database
            .or_else(|| section.map(|s| s.source_database.clone()))
            .context("no source database; pass --source-database or add a [clone] section")?;
        let access_role = self
            .access_role
            .or_else(|| section.map(|s| s.access_role.clone()))
            .context("no access role; pass --access-role or add a [clone] section")?;
        let (schemas, tables) = if self.schemas.is_empty() && self.tables.is_empty() {
            section
                .map(|s| (s.schemas.clone(), s.tables.clone()))
                .unwrap_or_default()
        } else {
            (self.schemas, self.tables)
        };
        let sample_percent = self
            .sample_percent
            .or_else(|| section.map(|s| s.sample_percent))
            .unwrap_or(0);
        let selection = CloneSelection::from_lists(&schemas, &tables)?;
        Ok(CloneSpec::new(
            source_database,
            selection,
            target,
            sample_percent,
            access_role,
        )?)
    }
}

/// Populate an isolated namespace
async fn cmd_clone(
    project_dir: &Path,
    target: &TargetArgs,
    overrides: CloneOverrides,
    timeout: Timeout,
) -> Result<ExitCode> {
    let section = if project_dir.join(strata_core::PROJECT_FILE).exists() {
        load_project(project_dir)?.clone
    } else {
        None
    };
    let spec = overrides.resolve(section.as_ref(), target.isolated_schema()?)?;
    let session = target.open_session()?;

    let report = clone_namespace(session.warehouse(), &spec, timeout).await?;
    session.print_statements();
    println!(
        "cloned {} tables into {} ({:?})",
        report.tables_cloned, spec.target, report.mode
    );
    for object in &report.objects {
        println!("  {object}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Drop an isolated namespace
async fn cmd_teardown(target: &TargetArgs) -> Result<ExitCode> {
    let isolated = target.require_isolated()?;
    let session = target.open_session()?;
    let dropped = teardown(
        session.warehouse(),
        &target.ci_database,
        isolated.change_request(),
        isolated.revision(),
    )
    .await?;
    session.print_statements();
    println!("dropped {dropped}");
    Ok(ExitCode::SUCCESS)
}

/// Apply the selected infrastructure definitions
async fn cmd_deploy(
    project_dir: &Path,
    target: &TargetArgs,
    state: &StateArgs,
    selection: &InfraSelection,
    timeout: Timeout,
) -> Result<ExitCode> {
    let project = load_project(project_dir)?;
    let objects = sort_for_apply(project.infra.clone())?;
    if objects.is_empty() {
        println!("no infrastructure definitions");
        return Ok(ExitCode::SUCCESS);
    }
    let key = format!("infra.{}", target.context()?.as_str());
    let session = target.open_session()?;
    let (store, _locks) = state.open().await?;
    let report = deploy_changed(
        session.warehouse(),
        store.as_ref(),
        &key,
        objects,
        selection,
        timeout,
    )
    .await?;
    session.print_statements();
    for (position, name) in report.applied.iter().enumerate() {
        println!("{:>3}. {name}", position + 1);
    }
    println!(
        "applied {}, unchanged {}",
        report.applied.len(),
        report.unchanged.len()
    );
    Ok(ExitCode::SUCCESS)
}

/// Rewrite template values (dry run unless `apply`)
fn cmd_init(root: &Path, values: &TemplateValues, apply: bool) -> Result<ExitCode> {
    let plan = plan_rewrite(root, values)
        .with_context(|| format!("failed to scan {}", root.display()))?;
    if plan.is_empty() {
        println!("all values match the template; nothing to change");
        return Ok(ExitCode::SUCCESS);
    }
    for line in plan.summary_lines() {
        println!("{line}");
    }
    if !apply {
        println!("dry run; re-run with --yes to apply");
        return Ok(ExitCode::SUCCESS);
    }
    let total = apply_rewrite(&plan)?;
    println!("initialized: {total} replacements, {} renames", plan.renames.len());
    Ok(ExitCode::SUCCESS)
}
