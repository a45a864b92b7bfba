// src/installer/mod.rs

//! Installer orchestration
//!
//! Turns a requested change-set into executed work against a target
//! system. Every operation walks the same phases:
//!
//! Planning (solver + orderer) → Matching (artifact lookup by repository
//! priority) → Fetching (bounded worker pool, parallel download/verify/
//! unpack) → Finalizing (sequential hooks in dependency order) →
//! Committing (database records, single-threaded).
//!
//! A package is only recorded installed after its finalizer succeeds; a
//! dependency's record always exists before a dependent's finalizer
//! runs. Filesystem state is never rolled back automatically - failures
//! past Fetching surface for operator intervention.

use crate::artifact::{Artifact, ConfigProtect};
use crate::db::{Database, System};
use crate::error::{Error, Result};
use crate::finalizer::{FinalizerRunner, HookPhase};
use crate::pkg::{self, Package, PackageRef};
use crate::repository::{
    self, ArtifactClient, HttpClient, LocalClient, Repository, is_remote_location,
};
use crate::solver::{self, PackagesAssertions, SolverOptions, ensure_order};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Explicit installer configuration, passed by value
#[derive(Debug, Clone)]
pub struct InstallerOptions {
    /// Fetch worker count; defaults to the host CPU count
    pub concurrency: usize,
    /// Skip the solver and treat the requested set as the literal plan
    pub no_deps: bool,
    /// Plan only the dependency closure, excluding the requested
    /// packages themselves
    pub only_deps: bool,
    /// Downgrade matching/fetching failures to skip-and-continue
    pub force: bool,
    /// Refuse to remove packages other installed packages require
    pub check_conflicts: bool,
    /// Cascade removal to installed reverse dependencies
    pub full_uninstall: bool,
    /// Additionally drop dependencies nothing else requires
    pub full_clean_uninstall: bool,
    /// Stop after artifacts are downloaded and verified
    pub download_only: bool,
    /// Keep downloads here instead of a temporary directory
    pub download_dir: Option<PathBuf>,
    pub solver: SolverOptions,
}

impl Default for InstallerOptions {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            no_deps: false,
            only_deps: false,
            force: false,
            check_conflicts: true,
            full_uninstall: false,
            full_clean_uninstall: false,
            download_only: false,
            download_dir: None,
            solver: SolverOptions::default(),
        }
    }
}

/// A planned install bound to a concrete artifact and its source
#[derive(Debug, Clone)]
pub struct ArtifactMatch {
    pub package: Package,
    pub artifact: Artifact,
    pub repository: String,
}

/// Result of one fetch worker: the package plus the paths its artifact
/// actually put on disk
struct FetchedPackage {
    package: Package,
    files: Vec<String>,
}

/// Orchestrates operations against a target system
pub struct Installer {
    repositories: Vec<Box<dyn Repository>>,
    options: InstallerOptions,
    http: HttpClient,
    local: LocalClient,
}

impl Installer {
    pub fn new(repositories: Vec<Box<dyn Repository>>, options: InstallerOptions) -> Result<Self> {
        Ok(Self {
            repositories,
            options,
            http: HttpClient::new()?,
            local: LocalClient::new(),
        })
    }

    /// Repositories in matching order: descending priority, then name
    fn sorted_repositories(&self) -> Vec<&dyn Repository> {
        let mut sorted: Vec<&dyn Repository> =
            self.repositories.iter().map(|r| r.as_ref()).collect();
        sorted.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        sorted
    }

    /// Install the requested packages plus whatever the plan pulls in
    pub fn install(&self, references: &[PackageRef], system: &mut System) -> Result<()> {
        let installed = system.database.world()?;
        let available = repository::compile_universe(&self.repositories)?;

        let mut wanted = Vec::new();
        for reference in references {
            let best = pkg::find_best(&available, reference).ok_or_else(|| {
                Error::NotFound(format!("no repository provides {}", reference))
            })?;
            wanted.push(best.clone());
        }

        self.install_packages(wanted, &installed, &available, system)
    }

    fn install_packages(
        &self,
        wanted: Vec<Package>,
        installed: &[Package],
        available: &[Package],
        system: &mut System,
    ) -> Result<()> {
        let installed_fingerprints: HashSet<String> =
            installed.iter().map(Package::fingerprint).collect();

        // Idempotence: an already-installed request needs no work
        let wanted: Vec<Package> = wanted
            .into_iter()
            .filter(|p| {
                let present = installed_fingerprints.contains(&p.fingerprint());
                if present {
                    info!("{} is already installed", p);
                }
                !present
            })
            .collect();
        if wanted.is_empty() {
            info!("nothing to install");
            return Ok(());
        }

        // Planning
        let assertions = if self.options.no_deps {
            let mut literal = PackagesAssertions::new();
            for package in &wanted {
                literal.insert(package.clone(), true)?;
            }
            literal
        } else {
            solver::solve(installed, available, &wanted, &self.options.solver)?.assertions
        };

        let wanted_fingerprints: HashSet<String> =
            wanted.iter().map(Package::fingerprint).collect();
        let plan: Vec<Package> = ensure_order(&assertions)
            .into_iter()
            .filter(|a| a.value)
            .map(|a| a.package)
            .filter(|p| !installed_fingerprints.contains(&p.fingerprint()))
            .filter(|p| {
                !(self.options.only_deps && wanted_fingerprints.contains(&p.fingerprint()))
            })
            .collect();

        if plan.is_empty() {
            info!("nothing to install");
            return Ok(());
        }
        info!("planning to install {} package(s)", plan.len());

        // Matching
        let matches = self.match_artifacts(&plan)?;

        // Fetching
        let fetched = self.fetch_all(&matches, &system.target)?;
        if self.options.download_only {
            info!("download-only requested, stopping after fetch");
            return Ok(());
        }

        // Finalizing + Committing, strictly sequential in dependency
        // order: a dependency is finalized and recorded before any of
        // its dependents
        let runner = FinalizerRunner::new(&system.target);
        for item in fetched {
            runner.run(&item.package, HookPhase::Install)?;
            let fingerprint = system.database.create_package(&item.package)?;
            system.database.set_package_files(&fingerprint, &item.files)?;
            info!("installed {}", item.package);
        }

        Ok(())
    }

    /// Bind every planned package to the highest-priority repository
    /// indexing its fingerprint; first match wins
    fn match_artifacts(&self, plan: &[Package]) -> Result<Vec<ArtifactMatch>> {
        let sorted = self.sorted_repositories();
        let mut matches = Vec::new();

        for package in plan {
            let found = sorted.iter().find_map(|repository| {
                repository
                    .search_artifact(package)
                    .ok()
                    .map(|artifact| (artifact, repository.name().to_string()))
            });

            match found {
                Some((artifact, repository)) => {
                    debug!("matched {} from repository '{}'", package, repository);
                    matches.push(ArtifactMatch {
                        package: package.clone(),
                        artifact,
                        repository,
                    });
                }
                None if self.options.force => {
                    warn!("no artifact for {}, skipping (force)", package);
                }
                None => return Err(Error::MatchNotFound(package.to_string())),
            }
        }

        Ok(matches)
    }

    /// Fetch all matched artifacts through a bounded worker pool. The
    /// pool drains completely before this returns; one worker's failure
    /// never interrupts workers already in flight.
    fn fetch_all(&self, matches: &[ArtifactMatch], root: &Path) -> Result<Vec<FetchedPackage>> {
        if matches.is_empty() {
            return Ok(Vec::new());
        }
        fs::create_dir_all(root)?;

        let scratch;
        let download_dir: &Path = match &self.options.download_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                dir
            }
            None => {
                scratch = TempDir::new()?;
                scratch.path()
            }
        };

        let workers = self.options.concurrency.max(1);
        info!("fetching {} artifact(s) with {} worker(s)", matches.len(), workers);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::Init(format!("failed to build worker pool: {}", e)))?;

        let results: Vec<Result<FetchedPackage>> = pool.install(|| {
            matches
                .par_iter()
                .map(|matched| self.fetch_one(matched, download_dir, root))
                .collect()
        });

        let mut fetched = Vec::new();
        for (matched, result) in matches.iter().zip(results) {
            match result {
                Ok(item) => fetched.push(item),
                Err(e) if self.options.force => {
                    warn!("skipping {}: {} (force)", matched.package, e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(fetched)
    }

    /// One worker's job: download, verify, unpack
    fn fetch_one(
        &self,
        matched: &ArtifactMatch,
        download_dir: &Path,
        root: &Path,
    ) -> Result<FetchedPackage> {
        let client: &dyn ArtifactClient = if is_remote_location(&matched.artifact.location) {
            &self.http
        } else {
            &self.local
        };

        let fetch_error = |e: Error| Error::Fetch {
            artifact: matched.artifact.file_name.clone(),
            reason: e.to_string(),
        };

        let local_path = client
            .download_artifact(&matched.artifact, download_dir)
            .map_err(fetch_error)?;
        matched.artifact.verify(&local_path).map_err(fetch_error)?;

        if self.options.download_only {
            return Ok(FetchedPackage {
                package: matched.package.clone(),
                files: matched.artifact.files.clone(),
            });
        }

        let protect = ConfigProtect::for_package(&matched.package);
        let files = matched
            .artifact
            .unpack(&local_path, root, &protect)
            .map_err(fetch_error)?;

        Ok(FetchedPackage {
            package: matched.package.clone(),
            files,
        })
    }

    /// Remove installed packages
    pub fn uninstall(&self, system: &mut System, references: &[PackageRef]) -> Result<()> {
        self.uninstall_packages(system, references, self.options.check_conflicts)
    }

    fn uninstall_packages(
        &self,
        system: &mut System,
        references: &[PackageRef],
        check_conflicts: bool,
    ) -> Result<()> {
        let installed = system.database.world()?;

        let mut targets: Vec<Package> = Vec::new();
        let mut requested: HashSet<String> = HashSet::new();
        for reference in references {
            let matched: Vec<&Package> =
                installed.iter().filter(|p| p.satisfies(reference)).collect();
            if matched.is_empty() {
                return Err(Error::NotFound(format!("{} is not installed", reference)));
            }
            for package in matched {
                if requested.insert(package.fingerprint()) {
                    targets.push(package.clone());
                }
            }
        }

        let cascade = self.options.full_uninstall || self.options.full_clean_uninstall;

        // Conflict-on-removal: block when an installed, non-requested
        // package still needs a target
        if check_conflicts && !cascade {
            for target in &targets {
                let blockers: Vec<String> = transitive_dependents(target, &installed)
                    .into_iter()
                    .filter(|p| !requested.contains(&p.fingerprint()))
                    .map(|p| p.to_string())
                    .collect();
                if !blockers.is_empty() {
                    return Err(Error::RequiredByOthers {
                        package: target.to_string(),
                        blockers,
                    });
                }
            }
        }

        let mut removal = targets.clone();
        let mut removal_fingerprints: HashSet<String> = requested.clone();

        if cascade {
            for target in &targets {
                for dependent in transitive_dependents(target, &installed) {
                    if removal_fingerprints.insert(dependent.fingerprint()) {
                        info!("cascading removal to dependent {}", dependent);
                        removal.push(dependent);
                    }
                }
            }
        }

        if self.options.full_clean_uninstall {
            // Keep dropping dependencies of the removed set that no
            // surviving package requires, until nothing changes
            loop {
                let remaining: Vec<&Package> = installed
                    .iter()
                    .filter(|p| !removal_fingerprints.contains(&p.fingerprint()))
                    .collect();

                let orphan = remaining.iter().find(|candidate| {
                    let needed_by_removed = removal.iter().any(|removed| {
                        removed
                            .requires
                            .iter()
                            .any(|required| candidate.satisfies(required))
                    });
                    let needed_by_remaining = remaining.iter().any(|keeper| {
                        keeper.fingerprint() != candidate.fingerprint()
                            && keeper
                                .requires
                                .iter()
                                .any(|required| candidate.satisfies(required))
                    });
                    needed_by_removed && !needed_by_remaining
                });

                match orphan {
                    Some(&package) => {
                        info!("removing no-longer-needed dependency {}", package);
                        removal_fingerprints.insert(package.fingerprint());
                        removal.push(package.clone());
                    }
                    None => break,
                }
            }
        }

        // Dependents must go before their dependencies: order the set
        // dependencies-first, then walk it backwards
        let mut assertions = PackagesAssertions::new();
        for package in &removal {
            assertions.insert(package.clone(), false)?;
        }
        let mut ordered = ensure_order(&assertions);
        ordered.reverse();

        // Paths owned by surviving packages must stay on disk even when
        // a removed package also recorded them
        let mut keep_paths: HashSet<String> = HashSet::new();
        for package in &installed {
            if !removal_fingerprints.contains(&package.fingerprint()) {
                keep_paths.extend(system.database.get_package_files(&package.fingerprint())?);
            }
        }

        let runner = FinalizerRunner::new(&system.target);
        for assertion in ordered {
            let package = assertion.package;
            runner.run(&package, HookPhase::Uninstall)?;

            let fingerprint = package.fingerprint();
            let protect = ConfigProtect::for_package(&package);
            for file in system.database.get_package_files(&fingerprint)? {
                if keep_paths.contains(&file) {
                    debug!("keeping shared path {}", file);
                    continue;
                }
                // Protected paths may carry local edits; they stay on
                // disk when their owner goes away
                if protect.is_protected(&file) {
                    debug!("keeping config-protected path {}", file);
                    continue;
                }
                let on_disk = system.target.join(file.trim_start_matches('/'));
                match fs::remove_file(&on_disk) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        debug!("{} already absent", file);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            system.database.remove_package(&fingerprint)?;
            info!("removed {}", package);
        }

        Ok(())
    }

    /// Upgrade every installed package to the newest available version
    pub fn upgrade(&self, system: &mut System) -> Result<()> {
        let installed = system.database.world()?;
        let available = repository::compile_universe(&self.repositories)?;

        let mut to_remove = Vec::new();
        let mut to_add = Vec::new();
        for current in &installed {
            let newest = available
                .iter()
                .filter(|p| p.category == current.category && p.name == current.name)
                .max_by(|a, b| a.version.cmp(&b.version));

            if let Some(newer) = newest {
                if newer.version > current.version {
                    info!("upgrading {} to {}", current, newer.version);
                    to_remove.push(current.to_ref());
                    to_add.push(newer.to_ref());
                }
            }
        }

        if to_add.is_empty() {
            info!("everything is up to date");
            return Ok(());
        }

        self.swap(&to_remove, &to_add, system)
    }

    /// Replace one set of packages with another in a single operation
    ///
    /// The removal side skips the reverse-dependency check since the
    /// replacements land in the same operation.
    pub fn swap(
        &self,
        remove: &[PackageRef],
        add: &[PackageRef],
        system: &mut System,
    ) -> Result<()> {
        self.uninstall_packages(system, remove, false)?;
        self.install(add, system)
    }

    /// Adopt pre-existing on-disk files into the database by matching
    /// them against repository file indices. Returns how many packages
    /// were adopted.
    pub fn reclaim(&self, system: &mut System) -> Result<usize> {
        let mut seen: HashSet<String> = system
            .database
            .world()?
            .iter()
            .map(Package::fingerprint)
            .collect();

        let mut adopted = 0;
        for repository in self.sorted_repositories() {
            for package in repository.index()? {
                if !seen.insert(package.fingerprint()) {
                    continue;
                }

                let artifact = repository.search_artifact(&package)?;
                if artifact.files.is_empty() {
                    continue;
                }

                let all_present = artifact.files.iter().all(|file| {
                    system.target.join(file.trim_start_matches('/')).exists()
                });
                if !all_present {
                    debug!("{} not fully present on disk, not adopting", package);
                    continue;
                }

                let fingerprint = system.database.create_package(&package)?;
                system
                    .database
                    .set_package_files(&fingerprint, &artifact.files)?;
                info!("reclaimed {}", package);
                adopted += 1;
            }
        }

        Ok(adopted)
    }

    /// Installed packages whose recorded files are missing from the
    /// target root
    pub fn oscheck(&self, system: &System) -> Result<Vec<PackageRef>> {
        let mut damaged = Vec::new();
        for package in system.database.world()? {
            let files = system.database.get_package_files(&package.fingerprint())?;
            let broken = files
                .iter()
                .any(|file| !system.target.join(file.trim_start_matches('/')).exists());
            if broken {
                warn!("{} has missing files", package);
                damaged.push(package.to_ref());
            }
        }
        Ok(damaged)
    }
}

/// Every installed package that (transitively) requires `target`
fn transitive_dependents(target: &Package, installed: &[Package]) -> Vec<Package> {
    let mut dependents: Vec<Package> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(target.fingerprint());

    let mut frontier = vec![target.clone()];
    while let Some(current) = frontier.pop() {
        for candidate in installed {
            if seen.contains(&candidate.fingerprint()) {
                continue;
            }
            let depends = candidate
                .requires
                .iter()
                .any(|required| current.satisfies(required));
            if depends {
                seen.insert(candidate.fingerprint());
                dependents.push(candidate.clone());
                frontier.push(candidate.clone());
            }
        }
    }

    dependents
}
