use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;
use tac_config::{Config, LlmRole};
use tac_provider::{strip_code_fences, LlmClient, Message};

use crate::codebase;
use crate::interact;
use crate::processor::Processor;
use crate::protoblock::namespaced_branch_name;
use crate::trust::TrustRegistry;

/// One step of a decomposed task; produces one protoblock when executed.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub title: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub branch_name: String,
}

impl Recipe {
    pub fn commit_message(&self) -> String {
        format!("tac: {}", self.title)
    }

    /// The task text handed to the processor for this recipe.
    pub fn task_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.description)
    }
}

/// The splitter's full answer: a strategy note, one shared branch, the
/// ordered recipes, and the existing tests the plan may invalidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeSet {
    pub branch_name: String,
    pub strategy: String,
    pub recipes: Vec<Recipe>,
    pub invalidated_tests: Vec<String>,
}

/// Splits a task too large for a single protoblock into a dependency-
/// ordered recipe sequence and drives the processor through it.
pub struct Orchestrator {
    config: Config,
    project_root: PathBuf,
    llm: LlmClient,
    pub(crate) processor: Processor,
}

impl Orchestrator {
    pub fn from_config(
        config: &Config,
        project_root: PathBuf,
        processor: Processor,
    ) -> Result<Self> {
        Ok(Self {
            llm: LlmClient::new(LlmRole::Strong, config)?,
            config: config.clone(),
            project_root,
            processor,
        })
    }

    pub fn new(config: Config, project_root: PathBuf, llm: LlmClient, processor: Processor) -> Self {
        Self {
            config,
            project_root,
            llm,
            processor,
        }
    }

    fn splitter_prompt(&self, task_instructions: &str, codebase: &str) -> String {
        format!(
            "<purpose>\nYou are a senior software engineer decomposing a large coding task \
             into a sequence of smaller, independently verifiable steps. Each step will be \
             implemented and tested on its own before the next one starts.\n</purpose>\n\n\
             <codebase>\n{codebase}\n</codebase>\n\n\
             <task_instructions>\n{task_instructions}\n</task_instructions>\n\n\
             <planning_rules>\n\
             - Order the steps so each one only depends on earlier steps.\n\
             - Each step must leave the codebase in a working state.\n\
             - Name existing tests that this plan will probably invalidate.\n\
             - Choose one shared git branch for the whole task, starting with tac/.\n\
             </planning_rules>\n\n\
             <output_format>\n\
             {{\n\
                 \"strategy\": \"why this decomposition\",\n\
                 \"branch_name\": \"tac/feature/...\",\n\
                 \"invalidated_tests\": [\"...\"],\n\
                 \"recipes\": [\n\
                     {{\"title\": \"...\", \"description\": \"...\", \"dependencies\": [\"title of an earlier recipe\"]}}\n\
                 ]\n\
             }}\n\
             </output_format>"
        )
    }

    pub async fn split_task(&self, task_instructions: &str, codebase: &str) -> Result<RecipeSet> {
        let messages = vec![
            Message::system(
                "You are a planning assistant. Output a single valid JSON object, no \
                 markdown, no code fences.",
            ),
            Message::user(self.splitter_prompt(task_instructions, codebase)),
        ];

        let max_retries = self.config.general.max_retries_protoblock_creation;
        let mut last_error = String::new();
        for attempt in 1..=max_retries {
            let outcome = async {
                let response = self.llm.chat_completion(messages.clone()).await?;
                let data: Value = serde_json::from_str(response.trim())
                    .or_else(|_| serde_json::from_str(strip_code_fences(&response)))?;
                validate_recipe_set(&data, task_instructions)
            }
            .await;

            match outcome {
                Ok(set) => return Ok(set),
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(attempt, error = %last_error, "Task splitting failed");
                }
            }
        }
        anyhow::bail!("Failed to split the task after {max_retries} attempts: {last_error}")
    }

    pub async fn execute(&mut self, task_instructions: &str, registry: &TrustRegistry) -> Result<bool> {
        let codebase = self.build_codebase_view()?;
        let recipe_set = self.split_task(task_instructions, &codebase).await?;

        tracing::info!(strategy = %recipe_set.strategy, "Task decomposition strategy");
        tracing::info!(branch = %recipe_set.branch_name, "Shared git branch");
        if !recipe_set.invalidated_tests.is_empty() {
            tracing::warn!(tests = ?recipe_set.invalidated_tests, "Tests this plan may invalidate");
        }
        for (i, recipe) in recipe_set.recipes.iter().enumerate() {
            tracing::info!(step = i + 1, title = %recipe.title, commit = %recipe.commit_message(), "Planned step");
        }

        if self.config.general.confirm_multiblock_execution
            && !interact::confirm("Proceed with this multi-step plan?")
        {
            tracing::info!("Execution cancelled by user");
            return Ok(false);
        }

        if self.config.git.enabled
            && !self
                .processor
                .source_tree_mut()
                .checkout_branch(&recipe_set.branch_name, true)
        {
            tracing::warn!(
                branch = %recipe_set.branch_name,
                "Failed to switch to the shared branch, continuing on the current branch"
            );
        }

        // Commits accumulate on the feature branch; pushes, if ever, happen
        // at the very end outside this loop.
        self.processor.set_auto_push(false);

        for (i, recipe) in recipe_set.recipes.iter().enumerate() {
            tracing::info!(step = i + 1, total = recipe_set.recipes.len(), title = %recipe.title, "Executing step");

            let codebase = self.build_codebase_view()?;
            let ok = self
                .processor
                .run(&recipe.task_text(), &codebase, None, registry)
                .await?;

            if !ok {
                tracing::error!(step = i + 1, title = %recipe.title, "Step failed, stopping the plan");
                tracing::info!(
                    branch = %recipe_set.branch_name,
                    "Completed steps remain committed on the feature branch"
                );
                return Ok(false);
            }

            if self.config.git.enabled {
                let message = recipe.commit_message();
                if !self.processor.source_tree_mut().commit(&message) {
                    tracing::warn!(message = %message, "Step commit failed");
                }
            }
        }

        tracing::info!(
            branch = %recipe_set.branch_name,
            "All steps completed; review and merge the feature branch when ready"
        );
        Ok(true)
    }

    fn build_codebase_view(&self) -> Result<String> {
        codebase::gather_digest(&self.project_root)
    }
}

/// Validate the splitter's JSON: recipes present, dependencies only
/// reference earlier titles, branch namespaced.
pub fn validate_recipe_set(data: &Value, task_instructions: &str) -> Result<RecipeSet> {
    let obj = data
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("Recipe JSON must be an object"))?;

    let strategy = obj
        .get("strategy")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let branch_name = namespaced_branch_name(
        obj.get("branch_name").and_then(Value::as_str),
        task_instructions,
    );

    let invalidated_tests = obj
        .get("invalidated_tests")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let raw_recipes = obj
        .get("recipes")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("Missing required key: recipes"))?;
    anyhow::ensure!(!raw_recipes.is_empty(), "recipes must not be empty");

    let mut seen_titles: Vec<String> = Vec::new();
    let mut recipes = Vec::new();
    for (i, raw) in raw_recipes.iter().enumerate() {
        let title = raw
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Recipe {} is missing a title", i + 1))?
            .to_string();
        let description = raw
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let dependencies: Vec<String> = raw
            .get("dependencies")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        for dep in &dependencies {
            anyhow::ensure!(
                seen_titles.contains(dep),
                "Recipe '{title}' depends on '{dep}', which is not an earlier recipe"
            );
        }

        seen_titles.push(title.clone());
        recipes.push(Recipe {
            title,
            description,
            dependencies,
            branch_name: branch_name.clone(),
        });
    }

    Ok(RecipeSet {
        branch_name,
        strategy,
        recipes,
        invalidated_tests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    use crate::analyzer::ErrorAnalyzer;
    use crate::executor::test_support::ScriptedCoder;
    use crate::executor::Executor;
    use crate::planner::Planner;
    use crate::source_tree::ShadowTree;
    use crate::trust::registry::test_support::ScriptedAgent;
    use crate::trust::{AgentSpec, PromptTarget};
    use tac_provider::{ChatRequest, ChatResponse, Provider};

    fn good_recipe_json() -> Value {
        json!({
            "strategy": "auth first, then logging on top",
            "branch_name": "tac/feature/add-auth-and-logging",
            "invalidated_tests": ["tests/test_login.py"],
            "recipes": [
                {"title": "Add auth", "description": "add the auth module", "dependencies": []},
                {"title": "Log auth events", "description": "wire logging into auth", "dependencies": ["Add auth"]}
            ]
        })
    }

    #[test]
    fn valid_set_parses() {
        let set = validate_recipe_set(&good_recipe_json(), "add auth and log it").unwrap();
        assert_eq!(set.branch_name, "tac/feature/add-auth-and-logging");
        assert_eq!(set.recipes.len(), 2);
        assert_eq!(set.recipes[1].dependencies, vec!["Add auth"]);
        assert_eq!(set.recipes[0].commit_message(), "tac: Add auth");
        assert_eq!(set.invalidated_tests, vec!["tests/test_login.py"]);
    }

    #[test]
    fn forward_dependency_rejected() {
        let mut data = good_recipe_json();
        data["recipes"][0]["dependencies"] = json!(["Log auth events"]);
        let err = validate_recipe_set(&data, "task").unwrap_err();
        assert!(err.to_string().contains("not an earlier recipe"));
    }

    #[test]
    fn empty_recipes_rejected() {
        let mut data = good_recipe_json();
        data["recipes"] = json!([]);
        assert!(validate_recipe_set(&data, "task").is_err());
    }

    #[test]
    fn branch_is_namespaced_when_missing() {
        let mut data = good_recipe_json();
        data.as_object_mut().unwrap().remove("branch_name");
        let set = validate_recipe_set(&data, "add auth and log it").unwrap();
        assert!(set.branch_name.starts_with("tac/"));
        assert!(set.recipes.iter().all(|r| r.branch_name == set.branch_name));
    }

    // --- execute() wiring ---

    struct SplitterProvider;

    #[async_trait::async_trait]
    impl Provider for SplitterProvider {
        fn name(&self) -> &str {
            "splitter"
        }
        async fn chat(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
            let text = request
                .messages
                .iter()
                .map(|m| m.content.as_text())
                .collect::<String>();
            // The same strong client is used by the splitter and the
            // per-recipe planner; answer by prompt shape.
            let content = if text.contains("decomposing a large coding task") {
                good_recipe_json().to_string()
            } else {
                json!({
                    "task": "one step",
                    "write_files": ["lib/a.py", "tests/test_a.py"],
                    "context_files": [],
                    "commit_message": "step",
                    "branch_name": "tac/feature/step",
                    "trusty_agents": ["pytest"]
                })
                .to_string()
            };
            Ok(ChatResponse {
                content,
                usage: None,
                finish_reason: None,
            })
        }
    }

    fn spec_named(name: &'static str) -> AgentSpec {
        AgentSpec {
            name,
            description: "test double",
            protoblock_prompt: "n/a",
            prompt_target: PromptTarget::TrustyAgent,
            mandatory: false,
        }
    }

    /// pytest passes for the first `pass_count` constructions, then fails.
    fn registry_passing_first(pass_count: u32, runs: Arc<Mutex<Vec<String>>>) -> TrustRegistry {
        let constructions = Arc::new(AtomicU32::new(0));
        let mut registry = TrustRegistry::new();
        registry.register(spec_named("pytest"), move |_| {
            let n = constructions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedAgent::new(
                "pytest",
                n < pass_count,
                runs.clone(),
            )))
        });
        let plaus_runs = Arc::new(Mutex::new(Vec::new()));
        registry.register(spec_named("plausibility"), move |_| {
            Ok(Box::new(ScriptedAgent::new(
                "plausibility",
                true,
                plaus_runs.clone(),
            )))
        });
        registry
    }

    fn orchestrator(dir: &TempDir) -> Orchestrator {
        let mut config = tac_config::Config::default();
        config.git.enabled = false;
        config.general.max_retries_block_creation = 1;
        config.git.auto_push_if_success = true;

        let planner = Planner::new(
            LlmClient::from_provider(Box::new(SplitterProvider), "m"),
            config.general.clone(),
        );
        let coder_runs = Arc::new(Mutex::new(Vec::new()));
        let executor = Executor::new(
            config.clone(),
            dir.path().to_path_buf(),
            Box::new(ScriptedCoder::succeeding(coder_runs)),
            ErrorAnalyzer::disabled(),
        );
        let tree = Box::new(ShadowTree::new(dir.path()));
        let processor = Processor::new(
            config.clone(),
            dir.path().to_path_buf(),
            planner,
            executor,
            tree,
        );
        Orchestrator::new(
            config,
            dir.path().to_path_buf(),
            LlmClient::from_provider(Box::new(SplitterProvider), "m"),
            processor,
        )
    }

    #[tokio::test]
    async fn all_recipes_succeed() {
        let dir = TempDir::new().unwrap();
        let mut orchestrator = orchestrator(&dir);
        let runs = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_passing_first(u32::MAX, runs.clone());

        let ok = orchestrator
            .execute("add auth and log it", &registry)
            .await
            .unwrap();
        assert!(ok);
        // One pytest check per recipe.
        assert_eq!(runs.lock().unwrap().len(), 2);
        // Invariant: the orchestrator forced auto-push off.
        assert!(!orchestrator.processor.auto_push_enabled());
    }

    #[tokio::test]
    async fn failing_recipe_stops_the_plan() {
        let dir = TempDir::new().unwrap();
        let mut orchestrator = orchestrator(&dir);
        let runs = Arc::new(Mutex::new(Vec::new()));
        // Recipe 1 passes, recipe 2 fails permanently.
        let registry = registry_passing_first(1, runs.clone());

        let ok = orchestrator
            .execute("add auth and log it", &registry)
            .await
            .unwrap();
        assert!(!ok);
        // Recipe 2 got exactly its single attempt, then the plan stopped.
        assert_eq!(runs.lock().unwrap().len(), 2);
    }
}
