use crate::cli_args::SessionOpts;
use crate::confirm::confirm;
use crate::output::{self, Summary};
use crate::relay::Relay;
use anyhow::{Context, Result, bail};
use colored::*;
use log;
use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead};
use std::path::PathBuf;
use xask_core::{
    self as core, AnthropicClient, AppError, Config, FileLayout, FileRecord, MATCH_ALL,
    MatchOptions, PromptInputs, PromptPayload, RequestConfig, TokenEstimator, TreeNode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Validating,
    Reading,
    Summarizing,
    Confirming,
    Streaming,
    Finalizing,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
    DryRun,
}

struct Gathered {
    tree_paths: Vec<String>,
    files: Vec<FileRecord>,
    rules: Vec<FileRecord>,
}

pub struct Session {
    project_root: PathBuf,
    config: Config,
    opts: SessionOpts,
    request_path: Option<PathBuf>,
    quiet: bool,
    phase: Phase,
}

impl Session {
    pub fn new(
        project_root: PathBuf,
        config: Config,
        opts: SessionOpts,
        request_path: Option<PathBuf>,
        quiet: bool,
    ) -> Self {
        Self {
            project_root,
            config,
            opts,
            request_path,
            quiet,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, next: Phase) {
        log::debug!("Session phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Runs a whole session, reading the confirmation answer from `input`.
    pub fn run<R: BufRead>(&mut self, input: R) -> Result<Outcome> {
        let result = self.run_phases(input);
        match &result {
            Ok(Outcome::Completed) | Ok(Outcome::DryRun) => self.enter(Phase::Done),
            Ok(Outcome::Cancelled) | Err(_) => self.enter(Phase::Aborted),
        }
        result
    }

    fn run_phases<R: BufRead>(&mut self, input: R) -> Result<Outcome> {
        self.enter(Phase::Validating);
        let client = self.validate_credentials()?;
        let request = self.validate_request()?;

        self.enter(Phase::Reading);
        let estimator = TokenEstimator::new(self.config.summary.token_correction)
            .context("Failed to initialise token estimator")?;
        let gathered = self.read(&request, &estimator)?;

        self.enter(Phase::Summarizing);
        let payload = self.assemble(&request, &gathered);
        let estimated = estimate_payload(&payload, &estimator);
        if !self.quiet {
            self.print_summary(&gathered, estimated, estimator.correction());
        }
        if estimated > self.config.api.context_limit {
            log::warn!(
                "Estimated {} tokens exceeds the context limit of {}; the estimate runs high, use --count for an exact figure.",
                estimated,
                self.config.api.context_limit
            );
        }

        if self.opts.dry_run {
            log::info!("Dry run requested; not calling the API.");
            return Ok(Outcome::DryRun);
        }

        let thinking_budget = self.opts.think.then_some(self.config.api.thinking_budget);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;

        // Nothing is sent to the API before the user has confirmed.
        if self.config.session.confirm && !self.opts.yes {
            self.enter(Phase::Confirming);
            let stdout = io::stdout();
            if !confirm(input, stdout.lock())? {
                if !self.quiet {
                    println!("{}", "Cancelled.".yellow());
                }
                return Ok(Outcome::Cancelled);
            }
        }

        if self.opts.count || self.config.api.remote_token_count {
            let counted = runtime
                .block_on(client.count_tokens(&payload, thinking_budget))
                .context("Failed to count tokens with the API")?;
            if !self.quiet {
                output::print_remote_count(counted, self.config.api.context_limit);
            }
            if counted > self.config.api.context_limit {
                return Err(AppError::ContextLimit {
                    tokens: counted,
                    limit: self.config.api.context_limit,
                }
                .into());
            }
        }

        self.enter(Phase::Streaming);
        if !self.quiet {
            println!(
                "{} {}\n",
                "Asking".green().bold(),
                client.model().to_string().cyan()
            );
        }
        let stdout = io::stdout();
        let mut relay = Relay::new(stdout.lock());
        let usage = runtime
            .block_on(client.stream_message(&payload, thinking_budget, |event| {
                relay.handle(event)?;
                Ok(())
            }))
            .context("Streaming request failed")?;
        let answer = relay.final_text();
        drop(relay);

        self.enter(Phase::Finalizing);
        let breakdown = core::cost(&usage, &self.config.pricing);
        if !self.quiet {
            output::print_cost(&usage, &breakdown);
        }
        if self.opts.out || self.config.session.write_output {
            let output_path = self.config.output_path(&self.project_root);
            output::write_to_file(&output_path, &answer)?;
            if !self.quiet {
                println!(
                    "{} Response saved to: {}",
                    "✅".green(),
                    output_path.display().to_string().blue()
                );
            }
        }
        Ok(Outcome::Completed)
    }

    fn validate_credentials(&self) -> Result<AnthropicClient> {
        AnthropicClient::from_config(&self.config.api).with_context(|| {
            format!(
                "Set {} in your environment or in a .env file in the project root",
                self.config.api.key_env
            )
        })
    }

    fn resolve_request_path(&self) -> Result<PathBuf> {
        match &self.request_path {
            Some(path) => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    self.project_root.join(path)
                };
                if !path.is_file() {
                    bail!("Request document not found: {}", path.display());
                }
                Ok(path)
            }
            None => self.config.find_request_file(&self.project_root).with_context(|| {
                let names: Vec<String> = self
                    .config
                    .general
                    .request_files
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                format!(
                    "No request document found in {}. Create one of: {}",
                    self.project_root.display(),
                    names.join(", ")
                )
            }),
        }
    }

    fn validate_request(&self) -> Result<RequestConfig> {
        let path = self.resolve_request_path()?;
        let request = core::load_request_document(&path)
            .with_context(|| format!("Failed to parse request document {}", path.display()))?;
        if request.include.is_empty() {
            bail!(
                "{} has no `include` patterns. Add front matter such as:\n---\ninclude:\n  - \"src/**/*.rs\"\n---",
                path.display()
            );
        }
        log::info!(
            "Request: {} include, {} ignore pattern(s)",
            request.include.len(),
            request.ignore.len()
        );
        Ok(request)
    }

    fn match_options(&self) -> MatchOptions {
        MatchOptions {
            use_gitignore: self.config.general.use_gitignore,
            use_builtin_ignore: self.config.general.enable_builtin_ignore,
        }
    }

    fn read(&self, request: &RequestConfig, estimator: &TokenEstimator) -> Result<Gathered> {
        let root = self.project_root.as_path();
        let options = self.match_options();
        let rule_patterns = &self.config.prompt.rules;

        let (tree_paths, (files, rules)) = rayon::join(
            || core::match_paths(root, &[MATCH_ALL.to_string()], &[], options),
            || {
                rayon::join(
                    || {
                        let paths =
                            core::match_paths(root, &request.include, &request.ignore, options)?;
                        core::load_files(root, &paths, estimator)
                    },
                    || {
                        let paths = core::match_paths(root, rule_patterns, &[], options)?;
                        core::load_files(root, &paths, estimator)
                    },
                )
            },
        );

        let tree_paths = tree_paths.context("Failed to list project files")?;
        let files = files.context("Failed to read included files")?;
        let rules = rules.context("Failed to read rule files")?;

        // A rule file that is also included would otherwise appear twice.
        let included: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
        let rules: Vec<FileRecord> = rules
            .into_iter()
            .filter(|r| !included.contains(r.path.as_str()))
            .collect();

        if files.is_empty() {
            log::warn!("No files matched the include patterns.");
        }
        log::info!(
            "Read {} project paths, {} included files, {} rule files",
            tree_paths.len(),
            files.len(),
            rules.len()
        );
        Ok(Gathered {
            tree_paths,
            files,
            rules,
        })
    }

    fn assemble(&self, request: &RequestConfig, gathered: &Gathered) -> PromptPayload {
        let tree = core::render_plain(&TreeNode::from_paths(&gathered.tree_paths));
        let layout = if self.config.prompt.split_by_recency {
            let now_ms = chrono::Utc::now().timestamp_millis();
            FileLayout::ByRecency(core::partition(gathered.files.clone(), now_ms))
        } else {
            FileLayout::Combined(gathered.files.clone())
        };
        core::assemble(&PromptInputs {
            system: self.config.system_prompt(),
            rules: &gathered.rules,
            tree: &tree,
            files: &layout,
            request: &request.body,
        })
    }

    fn print_summary(&self, gathered: &Gathered, estimated: usize, correction: f64) {
        let counts: HashMap<String, usize> = gathered
            .files
            .iter()
            .map(|f| (f.path.clone(), f.estimated_tokens))
            .collect();
        let included = TreeNode::from_paths(gathered.files.iter().map(|f| f.path.as_str()));
        let annotated = core::render_annotated(&included, &counts);
        output::print_summary(&Summary {
            annotated_tree: &annotated,
            files: &gathered.files,
            rules: &gathered.rules,
            estimated_tokens: estimated,
            correction,
            top_files: self.config.summary.top_files,
        });
    }
}

fn estimate_payload(payload: &PromptPayload, estimator: &TokenEstimator) -> usize {
    estimator.estimate(&payload.system)
        + payload
            .segments
            .iter()
            .map(|s| estimator.estimate(&s.text))
            .sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;

    fn session_in(root: &Path, configure: impl FnOnce(&mut Config)) -> Session {
        let mut config = Config::default();
        config.api.key_env = "XASK_SESSION_TEST_KEY_NEVER_SET".to_string();
        configure(&mut config);
        Session::new(
            root.to_path_buf(),
            config,
            SessionOpts::default(),
            None,
            true,
        )
    }

    #[test]
    fn failed_validation_leaves_previous_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("response.md");
        fs::write(&output, "previous answer").unwrap();
        fs::write(dir.path().join("prompt.md"), "---\ninclude: [\"a.md\"]\n---\nq").unwrap();

        let mut session = session_in(dir.path(), |_| {});
        let err = session.run(Cursor::new(Vec::new())).unwrap_err();

        assert!(format!("{:#}", err).contains("XASK_SESSION_TEST_KEY_NEVER_SET"));
        assert_eq!(session.phase(), Phase::Aborted);
        assert_eq!(fs::read_to_string(&output).unwrap(), "previous answer");
    }

    #[test]
    fn missing_request_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path(), |_| {});
        let err = session.validate_request().unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("prompt.md"));
        assert!(message.contains("query.md"));
    }

    #[test]
    fn query_md_is_used_when_prompt_md_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("query.md"), "---\ninclude: [\"*.rs\"]\n---\nwhy?").unwrap();
        let session = session_in(dir.path(), |_| {});
        let request = session.validate_request().unwrap();
        assert_eq!(request.include, vec!["*.rs"]);
        assert_eq!(request.body, "why?");
    }

    #[test]
    fn empty_include_list_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("prompt.md"), "just a question").unwrap();
        let session = session_in(dir.path(), |_| {});
        let err = session.validate_request().unwrap_err();
        assert!(format!("{:#}", err).contains("include"));
    }

    #[test]
    fn reading_gathers_tree_files_and_rules() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn lib() {}").unwrap();
        fs::write(root.join("README.md"), "# readme").unwrap();
        fs::write(root.join("CLAUDE.md"), "be brief").unwrap();

        let session = session_in(root, |_| {});
        let request = RequestConfig {
            include: vec!["src/**/*.rs".to_string()],
            ignore: vec!["src/lib.rs".to_string()],
            body: "q".to_string(),
            ..RequestConfig::default()
        };
        let estimator = TokenEstimator::new(1.2).unwrap();
        let gathered = session.read(&request, &estimator).unwrap();

        assert_eq!(
            gathered.tree_paths,
            vec!["CLAUDE.md", "README.md", "src/lib.rs", "src/main.rs"]
        );
        let files: Vec<&str> = gathered.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(files, vec!["src/main.rs"]);
        let rules: Vec<&str> = gathered.rules.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(rules, vec!["CLAUDE.md"]);

        let payload = session.assemble(&request, &gathered);
        let labels: Vec<&str> = payload.segments.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec!["rules", "tree", "files:today", "request"]);
        assert!(estimate_payload(&payload, &estimator) > 0);
    }

    #[test]
    fn declining_cancels_before_the_token_count_request() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "hello").unwrap();
        fs::write(dir.path().join("prompt.md"), "---\ninclude: [\"a.md\"]\n---\nq").unwrap();
        // Nothing listens on port 9; any request sent would fail the run.
        let mut session = session_in(dir.path(), |c| {
            c.api.key_env = "PATH".to_string();
            c.api.base_url = "http://127.0.0.1:9".to_string();
            c.session.confirm = true;
        });
        session.opts.count = true;
        let outcome = session.run(Cursor::new(b"n\n".to_vec())).unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(session.phase(), Phase::Aborted);
    }

    #[test]
    fn dry_run_stops_before_any_remote_call() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "hello").unwrap();
        fs::write(dir.path().join("prompt.md"), "---\ninclude: [\"a.md\"]\n---\nq").unwrap();
        // PATH is always set, so the credential check passes without a real key.
        let mut session = session_in(dir.path(), |c| c.api.key_env = "PATH".to_string());
        session.opts.dry_run = true;
        let outcome = session.run(Cursor::new(Vec::new())).unwrap();
        assert_eq!(outcome, Outcome::DryRun);
        assert!(!dir.path().join("response.md").exists());
    }
}
