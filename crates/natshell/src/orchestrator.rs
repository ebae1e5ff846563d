//! Wiring: config to engines, engines to the agent loop, slash commands
//! to all of it. One orchestrator value owns the whole core; nothing here
//! is a global.

use crate::agent::plan::parse_plan_file;
use crate::agent::system_prompt::build_system_prompt;
use crate::agent::{AgentLoop, EventSink, Platform, SystemContext};
use crate::backup::BackupManager;
use crate::commands::{self, ModelAction, SlashCommand};
use crate::config::{
    save_engine_preference, save_remote_model, EnginePreference, ModelConfig, NatShellConfig,
};
use crate::model_manager::default_model_path;
use crate::session::SessionManager;
use crate::tools::ToolRegistry;
use anyhow::{bail, Context, Result};
use command_executor::DefaultCommandExecutor;
use llm::local::ModelRuntime;
use llm::{InferenceEngine, LocalEngine, RemoteEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Loads the concrete model runtime for a model file. The binding itself
/// ships as a plugin; the core only knows this seam.
pub type RuntimeLoader =
    Box<dyn Fn(&ModelConfig, &Path) -> Result<Arc<dyn ModelRuntime>> + Send + Sync>;

/// Remote model listing is provided by the front-end integration.
#[async_trait::async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>>;
}

pub struct Orchestrator {
    pub config: NatShellConfig,
    config_path: PathBuf,
    pub agent: AgentLoop,
    sessions: SessionManager,
    catalog: Option<Box<dyn ModelCatalog>>,
    runtime_loader: Option<RuntimeLoader>,
    platform: Platform,
    system_context: SystemContext,
}

impl Orchestrator {
    pub async fn build(
        config: NatShellConfig,
        config_path: PathBuf,
        runtime_loader: Option<RuntimeLoader>,
        catalog: Option<Box<dyn ModelCatalog>>,
        system_context: SystemContext,
    ) -> Result<Self> {
        let platform = Platform::detect();
        let (primary, fallback) = select_engines(&config, runtime_loader.as_ref()).await?;

        let registry = ToolRegistry::with_default_tools();
        let backup_dir = config
            .backup
            .dir
            .clone()
            .unwrap_or_else(BackupManager::default_dir);
        let backups = BackupManager::new(backup_dir, config.backup.max_per_file);

        let mut agent = AgentLoop::new(
            primary,
            fallback,
            registry,
            config.safety.clone(),
            &config.agent,
            backups,
            Box::new(DefaultCommandExecutor),
            config_path.clone(),
        )?;

        let prompt = build_system_prompt(platform, &system_context, &agent.tool_schemas(), None);
        agent.initialize(prompt);

        Ok(Self {
            config,
            config_path,
            agent,
            sessions: SessionManager::new(SessionManager::default_dir()),
            catalog,
            runtime_loader,
            platform,
            system_context,
        })
    }

    /// Route one line of user input: slash commands are handled here and
    /// return display text; anything else runs through the agent loop and
    /// reports via the event sink.
    pub async fn handle_input(
        &mut self,
        input: &str,
        sink: &dyn EventSink,
    ) -> Result<Option<String>> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if trimmed.starts_with('/') {
            let command = match commands::parse(trimmed) {
                Ok(command) => command,
                // Invalid usage: report and abort the turn.
                Err(usage) => {
                    sink.event(crate::agent::AgentEvent::Error {
                        kind: crate::agent::ErrorKind::UserInput,
                        message: usage,
                    })
                    .await;
                    return Ok(None);
                }
            };
            return self.run_slash(command, sink).await;
        }
        self.agent.handle_user_message(trimmed, sink).await?;
        Ok(None)
    }

    async fn run_slash(
        &mut self,
        command: SlashCommand,
        sink: &dyn EventSink,
    ) -> Result<Option<String>> {
        match command {
            SlashCommand::Help => Ok(Some(commands::HELP_TEXT.to_string())),
            SlashCommand::Keys => Ok(Some(commands::KEYS_TEXT.to_string())),
            SlashCommand::Clear => {
                self.agent.clear();
                Ok(Some("Chat cleared. Type a new request.".to_string()))
            }
            SlashCommand::Cmd(command) => {
                self.agent.run_direct_command(&command, sink).await?;
                Ok(None)
            }
            SlashCommand::Compact => {
                match self.agent.compact_now().await {
                    Some(stats) => Ok(Some(format!(
                        "Context compacted.\n  Messages: {} -> {}\n  Tokens:   ~{} -> ~{}\nPreserved facts:\n{}",
                        stats.before_messages,
                        stats.after_messages,
                        stats.before_tokens,
                        stats.after_tokens,
                        stats.summary
                    ))),
                    None => Ok(Some(
                        "Nothing to compact — conversation is too short.".to_string(),
                    )),
                }
            }
            SlashCommand::History => {
                let (messages, tokens, window) = self.agent.context_usage();
                let percent = if window > 0 {
                    ((tokens as u64 * 100) / window as u64).min(100)
                } else {
                    0
                };
                Ok(Some(format!(
                    "Conversation: {messages} messages, ~{tokens} tokens ({percent}% of a {window}-token window)"
                )))
            }
            SlashCommand::Undo(path) => {
                let outcome = match path {
                    Some(path) => self.agent.undo_backup_for(Path::new(&path)),
                    None => self.agent.undo_last_backup(),
                };
                match outcome {
                    Ok(message) => Ok(Some(message)),
                    Err(err) => Ok(Some(format!("Undo failed: {err}"))),
                }
            }
            SlashCommand::Save(name) => {
                let record = self.sessions.save(
                    &self.agent.session_id.clone(),
                    name.as_deref(),
                    Some(self.agent.engine_info()),
                    &self.agent.messages,
                )?;
                Ok(Some(format!(
                    "Session saved: {} ({})",
                    record.id, record.name
                )))
            }
            SlashCommand::Load(id) => match self.sessions.load(&id) {
                Ok(Some(record)) => {
                    let count = record.messages.len();
                    self.agent.load_history(record.id.clone(), record.messages);
                    Ok(Some(format!(
                        "Loaded session {} ({}): {count} messages",
                        record.id, record.name
                    )))
                }
                Ok(None) => Ok(Some(format!("No session with id {id}"))),
                // A malformed id is refused before any I/O happens.
                Err(err) => {
                    sink.event(crate::agent::AgentEvent::Error {
                        kind: crate::agent::ErrorKind::Security,
                        message: err.to_string(),
                    })
                    .await;
                    Ok(None)
                }
            },
            SlashCommand::Sessions => {
                let listed = self.sessions.list()?;
                if listed.is_empty() {
                    return Ok(Some("No saved sessions.".to_string()));
                }
                let mut lines = vec!["Saved sessions (newest first):".to_string()];
                for summary in listed {
                    lines.push(format!(
                        "  {}  {}  ({} messages, updated {})",
                        summary.id,
                        summary.name,
                        summary.message_count,
                        summary.updated.format("%Y-%m-%d %H:%M")
                    ));
                }
                Ok(Some(lines.join("\n")))
            }
            SlashCommand::Model(action) => self.run_model_action(action).await,
            SlashCommand::Plan(description) => {
                let prompt = format!(
                    "Create a step-by-step plan for the following task. Do NOT execute \
                     anything yet — only plan. Answer in markdown: a # title, a short \
                     preamble describing the tech stack and conventions involved, then one \
                     `## Step N: <title>` section per step with the commands or edits it \
                     needs.\n\nTask: {description}"
                );
                self.agent.handle_user_message(&prompt, sink).await?;
                Ok(None)
            }
            SlashCommand::ExePlan { run, file } => self.run_exeplan(run, &file, sink).await,
        }
    }

    async fn run_model_action(&mut self, action: ModelAction) -> Result<Option<String>> {
        match action {
            ModelAction::Info => {
                let info = self.agent.engine_info();
                let location = match info.kind {
                    llm::EngineKind::Remote => format!(" at {}", info.base_url),
                    llm::EngineKind::Local => String::new(),
                };
                Ok(Some(format!(
                    "Engine: {:?}\nModel: {}{}\nContext window: {} tokens\nNative tool calls: {}",
                    info.kind,
                    info.model,
                    location,
                    info.context_window,
                    if info.supports_tool_calls { "yes" } else { "no" }
                )))
            }
            ModelAction::List => match &self.catalog {
                Some(catalog) => match catalog.list_models().await {
                    Ok(models) if models.is_empty() => {
                        Ok(Some("No models reported by the server.".to_string()))
                    }
                    Ok(models) => Ok(Some(format!("Available models:\n  {}", models.join("\n  ")))),
                    Err(err) => Ok(Some(format!("Could not list models: {err}"))),
                },
                None => Ok(Some(
                    "Model listing is not available without a remote server.".to_string(),
                )),
            },
            ModelAction::Use(name) => {
                let url = match &self.config.remote.url {
                    Some(url) => url.clone(),
                    None => {
                        return Ok(Some(
                            "No remote server configured. Set [remote] url or use --remote."
                                .to_string(),
                        ))
                    }
                };
                let engine = RemoteEngine::new(
                    &url,
                    &name,
                    &self.config.remote.api_key,
                    self.config.remote.n_ctx,
                );
                if !engine.healthy().await {
                    return Ok(Some(format!("Remote server unreachable at {url}.")));
                }
                self.agent.set_engine(Arc::new(engine));
                // A remote engine gets the local model as its safety net.
                self.agent.set_fallback(self.build_local_engine(None).ok());
                save_engine_preference(&self.config_path, EnginePreference::Remote)?;
                self.reinstall_system_prompt();
                Ok(Some(format!("Switched to remote model {name} at {url}.")))
            }
            ModelAction::Local => {
                let engine = self.build_local_engine(None)?;
                self.agent.set_engine(engine);
                self.agent.set_fallback(None);
                save_engine_preference(&self.config_path, EnginePreference::Local)?;
                self.reinstall_system_prompt();
                Ok(Some("Switched to the local model.".to_string()))
            }
            ModelAction::Switch(path) => {
                let engine = self.build_local_engine(Some(PathBuf::from(&path)))?;
                self.agent.set_engine(engine);
                self.agent.set_fallback(None);
                self.reinstall_system_prompt();
                Ok(Some(format!("Switched to local model {path}.")))
            }
            ModelAction::Default(name) => {
                save_remote_model(&self.config_path, &name)?;
                self.config.remote.model = name.clone();
                Ok(Some(format!(
                    "Saved {name} as the default remote model in {}.",
                    self.config_path.display()
                )))
            }
        }
    }

    async fn run_exeplan(
        &mut self,
        run: bool,
        file: &str,
        sink: &dyn EventSink,
    ) -> Result<Option<String>> {
        let plan = match parse_plan_file(Path::new(file)) {
            Ok(plan) => plan,
            Err(err) => return Ok(Some(format!("Cannot read plan: {err}"))),
        };

        if !run {
            let mut lines = vec![format!("Plan: {} ({} steps)", plan.title, plan.steps.len())];
            if !plan.preamble.is_empty() {
                lines.push(plan.preamble.clone());
            }
            for step in &plan.steps {
                lines.push(format!("  {}. {}", step.number, step.title));
            }
            lines.push(format!("Run it with: /exeplan run {file}"));
            return Ok(Some(lines.join("\n")));
        }

        let total = plan.steps.len();
        let budget = self.config.agent.plan_max_steps.max(1);
        info!("executing plan '{}' with {total} steps", plan.title);
        for step in &plan.steps {
            let mut message = format!(
                "[Executing plan \"{}\" — step {}/{total}: {}]\n",
                plan.title, step.number, step.title
            );
            if step.number == 1 && !plan.preamble.is_empty() {
                message.push_str(&format!(
                    "Plan context (tech stack and conventions):\n{}\n\n",
                    plan.preamble
                ));
            }
            message.push_str(&step.body);
            self.agent
                .handle_message_with_budget(&message, sink, Some(budget))
                .await?;
        }
        Ok(Some(format!(
            "Plan \"{}\" finished: {total} steps executed.",
            plan.title
        )))
    }

    fn build_local_engine(
        &self,
        explicit_path: Option<PathBuf>,
    ) -> Result<Arc<dyn InferenceEngine>> {
        let loader = self
            .runtime_loader
            .as_ref()
            .context("no local model runtime is available in this build")?;
        let model_path = match explicit_path {
            Some(path) => path,
            None => resolve_model_path(&self.config.model)?,
        };
        let runtime = loader(&self.config.model, &model_path)?;
        Ok(Arc::new(LocalEngine::new(
            runtime,
            &model_path,
            self.config.model.n_ctx,
            self.config.model.n_gpu_layers,
        )))
    }

    /// Engine swaps change the tool limits in the prompt's assumptions;
    /// rebuild the system message for the next `/clear`ed conversation.
    fn reinstall_system_prompt(&mut self) {
        let prompt = build_system_prompt(
            self.platform,
            &self.system_context,
            &self.agent.tool_schemas(),
            None,
        );
        if self.agent.messages.len() <= 1 {
            self.agent.initialize(prompt);
        } else if let Some(first) = self.agent.messages.first_mut() {
            if first.is_system() {
                *first = llm::ChatMessage::system(prompt);
            }
        }
    }
}

/// Pick the primary engine (and local fallback) from configuration.
async fn select_engines(
    config: &NatShellConfig,
    runtime_loader: Option<&RuntimeLoader>,
) -> Result<(Arc<dyn InferenceEngine>, Option<Arc<dyn InferenceEngine>>)> {
    let build_local = |explicit: Option<&str>| -> Result<Arc<dyn InferenceEngine>> {
        let loader = runtime_loader
            .context("no local model runtime is available in this build; configure [remote] or install a runtime plugin")?;
        let model_path = match explicit {
            Some(path) => PathBuf::from(path),
            None => resolve_model_path(&config.model)?,
        };
        let runtime = loader(&config.model, &model_path)?;
        Ok(Arc::new(LocalEngine::new(
            runtime,
            &model_path,
            config.model.n_ctx,
            config.model.n_gpu_layers,
        )))
    };

    let want_remote = config.remote.url.is_some()
        && config.engine.preferred != EnginePreference::Local;

    if want_remote {
        let url = config.remote.url.as_deref().unwrap_or_default();
        let model = if config.remote.model.is_empty() {
            "qwen3:4b"
        } else {
            &config.remote.model
        };
        let remote = RemoteEngine::new(url, model, &config.remote.api_key, config.remote.n_ctx);
        if remote.healthy().await {
            info!("using remote model {model} at {url}");
            // The fallback is best-effort: a machine without a local
            // runtime still works until the remote goes away.
            let fallback = match build_local(None) {
                Ok(engine) => Some(engine),
                Err(err) => {
                    warn!("local fallback unavailable: {err}");
                    None
                }
            };
            return Ok((Arc::new(remote), fallback));
        }
        warn!("remote server unreachable at {url}; falling back to the local model");
    }

    let local = build_local(None)?;
    info!("using local model");
    Ok((local, None))
}

fn resolve_model_path(model: &ModelConfig) -> Result<PathBuf> {
    if model.path == "auto" {
        let path = default_model_path(model);
        if !path.exists() {
            bail!(
                "no local model found at {}. Run `natshell --download` to fetch the default model.",
                path.display()
            );
        }
        return Ok(path);
    }
    let path = PathBuf::from(&model.path);
    if !path.exists() {
        bail!("model file not found: {}", path.display());
    }
    Ok(path)
}
