//! End-to-end runs of the orchestrator against the in-memory service

mod common;

use common::{artifact, notebook, pipeline, MockFabric};
use serde_json::json;

use fabdeploy::config::{DeploymentProfile, DeploymentTarget, ResolvedConfig};
use fabdeploy::core::rewrite::ConnectionMapping;
use fabdeploy::core::{DeployError, Orchestrator, RecordLog};
use fabdeploy::domain::{ArtifactType, LocalArtifact, Strategy};

const WORKSPACE: &str = "sales-dev-ops";

const NOTEBOOK_SOURCE: &str = "# Fabric notebook source\n\n# METADATA ********************\n\n# META {\n# META   \"dependencies\": {\n# META     \"lakehouse\": {\n# META       \"default_lakehouse\": \"old-id\",\n# META       \"default_lakehouse_name\": \"Silver\",\n# META       \"default_lakehouse_workspace_id\": \"old-ws\"\n# META     }\n# META   }\n# META }\n\n# CELL ********************\n\nprint('hi')\n";

fn target(folder: &str) -> DeploymentTarget {
    DeploymentTarget {
        deployment_env: "dev".to_string(),
        environment_type: "internal".to_string(),
        transformation_layer: "Operations".to_string(),
        workspace_name: WORKSPACE.to_string(),
        capacity_id: "cap-1".to_string(),
        default_groups: vec!["g-1".to_string()],
        notebooks_to_deploy: Vec::new(),
        target_folder: folder.to_string(),
    }
}

/// Lakehouse, eventhouse, one notebook, and Parent invoking Child
fn repository() -> Vec<LocalArtifact> {
    vec![
        artifact(ArtifactType::Lakehouse, "Bronze", "lid-lh", &[]),
        artifact(ArtifactType::Eventhouse, "Events", "lid-eh", &[]),
        notebook("Notebook_1", "print(1)"),
        pipeline("Parent", "lid-parent", &["lid-child"]),
        pipeline("Child", "lid-child", &[]),
    ]
}

/// Existing workspace holding an earlier deployment of `repository()`
fn deployed_workspace() -> MockFabric {
    MockFabric::new()
        .with_workspace("ws-1", WORKSPACE)
        .with_item("ws-1", "lh-1", "Bronze", ArtifactType::Lakehouse)
        .with_item("ws-1", "eh-1", "Events", ArtifactType::Eventhouse)
        .with_item("ws-1", "nb-1", "Notebook_1", ArtifactType::Notebook)
        .with_item("ws-1", "p-parent", "Parent", ArtifactType::DataPipeline)
        .with_item("ws-1", "p-child", "Child", ArtifactType::DataPipeline)
        .with_item("ws-1", "env-0", "Spark_Environment", ArtifactType::Environment)
}

fn messages(result: Result<fabdeploy::DeploymentRun, DeployError>) -> Vec<String> {
    match result {
        Err(DeployError::Aggregated(messages)) => messages,
        other => panic!("expected aggregated error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fresh_deploy_creates_dependencies_first() {
    let api = MockFabric::new();
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let run = orchestrator
        .deploy_workspace(&target("ARM/Operations"), &repository())
        .await
        .unwrap();

    assert_eq!(run.strategy, Strategy::Fresh);
    assert_eq!(run.records[0].artifact_type, ArtifactType::Workspace);
    assert_eq!(run.records[0].artifact_name, WORKSPACE);
    assert!(!run.has_errors());

    let child = api.call_index("create Child").unwrap();
    let parent = api.call_index("create Parent").unwrap();
    assert!(child < parent);
    assert!(api.call_index("create Bronze").unwrap() < api.call_index("create Notebook_1").unwrap());

    let child_id = run
        .records_of(ArtifactType::DataPipeline)
        .find(|r| r.artifact_name == "Child")
        .map(|r| r.live_id.clone())
        .unwrap();
    let parent_content = api.pushed_part("Parent", "pipeline-content.json").unwrap();
    assert!(parent_content.contains(&child_id));
    assert!(!parent_content.contains("lid-child"));

    let state = api.state();
    assert_eq!(state.groups.len(), 1);
    assert_eq!(state.groups[0].1, "g-1");
    assert_eq!(
        state.default_environment,
        Some(("Spark_Environment".to_string(), "1.3".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_notebook_upload_includes_platform_file() {
    let api = MockFabric::new();
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    orchestrator
        .deploy_workspace(&target("ARM/Operations"), &repository())
        .await
        .unwrap();

    assert_eq!(api.pushed_part("Notebook_1", "notebook-content.py").as_deref(), Some("print(1)"));
    let platform = api.pushed_part("Notebook_1", ".platform").unwrap();
    assert!(platform.contains("lid-Notebook_1"));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_replaces_pipelines_and_reuses_storage() {
    let api = deployed_workspace();
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let run = orchestrator
        .deploy_workspace(&target("ARM/Operations"), &repository())
        .await
        .unwrap();
    assert_eq!(run.strategy, Strategy::Refresh);

    let calls = api.calls();
    assert!(calls.contains(&"rename p-parent Parent_Old".to_string()));
    assert!(calls.contains(&"rename nb-1 Notebook_1_Old".to_string()));
    assert!(calls.contains(&"delete env-0".to_string()));

    // dependents are deleted before what they invoke
    assert!(api.call_index("delete p-parent").unwrap() < api.call_index("delete p-child").unwrap());
    assert!(api.call_index("delete nb-1").is_some());

    assert!(api.call_index("create Bronze").is_none());
    let bronze = run
        .records_of(ArtifactType::Lakehouse)
        .next()
        .unwrap();
    assert_eq!(bronze.live_id, "lh-1");

    assert_eq!(api.names_of("ws-1", ArtifactType::DataPipeline), vec!["Child", "Parent"]);
    assert_eq!(api.names_of("ws-1", ArtifactType::Notebook), vec!["Notebook_1"]);
    assert_eq!(api.names_of("ws-1", ArtifactType::Environment), vec!["Spark_Environment"]);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_failure_is_deferred() {
    let api = deployed_workspace();
    api.state().fail_delete.insert("env-0".to_string());
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let result = orchestrator
        .deploy_workspace(&target("ARM/Operations"), &repository())
        .await;

    let messages = messages(result);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Error during delete old items:"));

    // later phases still ran
    assert!(api.call_index("create Parent").is_some());
    assert!(api.call_index("create Notebook_1").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stale_notebooks_are_removed() {
    let api = deployed_workspace().with_item("ws-1", "nb-9", "Legacy", ArtifactType::Notebook);
    // old items survive cleanup, so the notebook phase sees them
    api.state().fail_delete.insert("env-0".to_string());
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let _ = orchestrator
        .deploy_workspace(&target("ARM/Operations"), &repository())
        .await;

    assert!(api.call_index("delete nb-9").is_some());
    assert_eq!(api.names_of("ws-1", ArtifactType::Notebook), vec!["Notebook_1"]);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_phase_stops_run_and_removes_fresh_workspace() {
    let api = MockFabric::new();
    api.state().fail_create.insert("Notebook_1".to_string());
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let result = orchestrator
        .deploy_workspace(&target("ARM/Operations"), &repository())
        .await;

    let messages = messages(result);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Error during notebook deployment:"));

    assert!(api.call_index("create Child").is_none());
    assert!(api.call_index("create Spark_Environment").is_none());
    assert_eq!(api.state().deleted_workspaces.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_workspace_cleanup_keeps_first_error() {
    let api = MockFabric::new();
    {
        let mut state = api.state();
        state.fail_create.insert("Bronze".to_string());
        state.fail_workspace_delete = true;
    }
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let result = orchestrator
        .deploy_workspace(&target("ARM/Operations"), &repository())
        .await;

    let messages = messages(result);
    assert!(messages[0].starts_with("Error during lakehouse deployment:"));
    assert!(api.state().deleted_workspaces.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_notebook_allow_list() {
    let api = MockFabric::new();
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let mut artifacts = repository();
    artifacts.push(notebook("Notebook_2", "print(2)"));
    let mut target = target("ARM/Operations");
    target.notebooks_to_deploy = vec!["Notebook_1".to_string()];

    let run = orchestrator.deploy_workspace(&target, &artifacts).await.unwrap();

    assert_eq!(run.notebooks_deployed, 1);
    assert_eq!(run.notebooks_skipped, 1);
    assert!(api.call_index("create Notebook_2").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_keeps_notebooks_outside_allow_list() {
    let api = deployed_workspace().with_item("ws-1", "nb-2", "Notebook_2", ArtifactType::Notebook);
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let mut artifacts = repository();
    artifacts.push(notebook("Notebook_2", "print(2)"));
    let mut target = target("ARM/Operations");
    target.notebooks_to_deploy = vec!["Notebook_1".to_string()];

    let run = orchestrator.deploy_workspace(&target, &artifacts).await.unwrap();
    assert_eq!(run.notebooks_skipped, 1);

    let calls = api.calls();
    assert!(calls.contains(&"rename nb-1 Notebook_1_Old".to_string()));
    assert!(!calls.iter().any(|c| c.starts_with("rename nb-2")));
    assert!(api.call_index("delete nb-2").is_none());
    assert!(api.call_index("create Notebook_2").is_none());

    assert_eq!(
        api.names_of("ws-1", ArtifactType::Notebook),
        vec!["Notebook_1", "Notebook_2"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_deferred_failure_still_reaches_record_log() {
    let api = deployed_workspace();
    api.state().fail_delete.insert("env-0".to_string());
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let report = orchestrator
        .deploy_workspace_report(&target("ARM/Operations"), &repository())
        .await
        .unwrap();
    assert!(!report.is_success());
    assert_eq!(report.run.errors.len(), 1);

    let temp = tempfile::TempDir::new().unwrap();
    let log = RecordLog::open(temp.path().join("records.jsonl")).unwrap();
    let written = log.append_run(&report.run).unwrap();
    assert_eq!(written, report.run.records.len());

    let entries = log.run_entries(report.run.id).unwrap();
    assert!(entries.iter().any(|e| e.record.artifact_name == "Parent"));
    assert!(entries.iter().any(|e| e.record.artifact_name == "Notebook_1"));

    assert!(matches!(report.into_result(), Err(DeployError::Aggregated(_))));
}

#[tokio::test(start_paused = true)]
async fn test_environment_publish_failure_is_fatal() {
    let api = MockFabric::new();
    api.state().publish_states.extend(["Running".to_string(), "Failed".to_string()]);
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let result = orchestrator
        .deploy_workspace(&target("ARM/Operations"), &repository())
        .await;

    let messages = messages(result);
    assert!(messages[0].starts_with("Error during environment deployment:"));
    assert!(messages[0].contains("'Failed'"));
    assert!(api.state().default_environment.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_environment_publish_timeout_is_a_warning() {
    let api = MockFabric::new();
    api.state()
        .publish_states
        .extend(std::iter::repeat("Running".to_string()).take(50));
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let run = orchestrator
        .deploy_workspace(&target("ARM/Operations"), &repository())
        .await
        .unwrap();

    assert!(run.records_of(ArtifactType::Environment).next().is_some());
    assert!(api.state().default_environment.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_connections_are_rewritten() {
    let api = MockFabric::new();
    {
        let mut state = api.state();
        state.connections.insert("sql-dev".to_string(), "conn-sql".to_string());
        state.eventhouse_uri = Some("https://events.kusto.example".to_string());
    }
    let config = ResolvedConfig {
        connections: vec![ConnectionMapping {
            category: "SQL Server".to_string(),
            connection_name: "sql-dev".to_string(),
        }],
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(api.clone(), config);

    let content = json!({
        "properties": {
            "activities": [
                {
                    "name": "Copy",
                    "type": "Copy",
                    "typeProperties": {
                        "source": {
                            "datasetSettings": {
                                "type": "SqlServerTable",
                                "typeProperties": {},
                                "externalReferences": { "connection": "old-conn" }
                            }
                        },
                        "sink": {
                            "datasetSettings": {
                                "linkedService": {
                                    "properties": { "type": "KustoDatabase", "typeProperties": {} }
                                }
                            }
                        }
                    }
                }
            ]
        }
    })
    .to_string();

    let artifacts = vec![
        artifact(ArtifactType::Eventhouse, "Events", "lid-eh", &[]),
        artifact(
            ArtifactType::DataPipeline,
            "Load",
            "lid-load",
            &[("pipeline-content.json", content.as_str())],
        ),
    ];

    orchestrator
        .deploy_workspace(&target("ARM/Operations"), &artifacts)
        .await
        .unwrap();

    let pushed: serde_json::Value =
        serde_json::from_str(&api.pushed_part("Load", "pipeline-content.json").unwrap()).unwrap();
    let copy = &pushed["properties"]["activities"][0]["typeProperties"];
    assert_eq!(copy["source"]["datasetSettings"]["externalReferences"]["connection"], "conn-sql");

    let kusto = &copy["sink"]["datasetSettings"]["linkedService"]["properties"]["typeProperties"];
    assert_eq!(kusto["endpoint"], "https://events.kusto.example");
    assert!(kusto["database"].as_str().unwrap().starts_with("kql-"));
    assert!(kusto["workspaceId"].as_str().unwrap().starts_with("ws-"));
}

#[tokio::test(start_paused = true)]
async fn test_borrowed_folder_binds_other_workspace_lakehouse() {
    let api = MockFabric::new()
        .with_workspace("ws-1", WORKSPACE)
        .with_workspace("ws-b", "sales-dev-bronze")
        .with_item("ws-b", "lh-b", "Bronze", ArtifactType::Lakehouse);
    let config = ResolvedConfig {
        profiles: vec![DeploymentProfile {
            deployment_env: "dev".to_string(),
            environment_type: "internal".to_string(),
            transformation_layer: "Data_Ingestion".to_string(),
            to_be_onboarded: true,
            capacity_id: "cap-1".to_string(),
            workspace_prefix: "sales-dev-bronze".to_string(),
            workspace_default_groups: Vec::new(),
            notebooks_to_deploy: None,
        }],
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(api.clone(), config);

    let artifacts = vec![
        artifact(ArtifactType::Lakehouse, "Bronze", "lid-lh", &[]),
        notebook("Transform", NOTEBOOK_SOURCE),
    ];
    orchestrator
        .deploy_workspace(&target("ARM/Data_Non_Security"), &artifacts)
        .await
        .unwrap();

    let content = api.pushed_part("Transform", "notebook-content.py").unwrap();
    assert!(content.contains("\"default_lakehouse\": \"lh-b\""));
    assert!(content.contains("\"default_lakehouse_workspace_id\": \"ws-b\""));
    assert!(!content.contains("old-id"));
}

#[tokio::test(start_paused = true)]
async fn test_dedicated_folder_binds_default_lakehouse() {
    let api = MockFabric::new();
    let orchestrator = Orchestrator::new(api.clone(), ResolvedConfig::default());

    let artifacts = vec![
        artifact(ArtifactType::Lakehouse, "Bronze", "lid-lh", &[]),
        notebook("Ingest", NOTEBOOK_SOURCE),
    ];
    let run = orchestrator
        .deploy_workspace(&target("ARM/Data_Ingestion"), &artifacts)
        .await
        .unwrap();

    let bronze_id = run
        .records_of(ArtifactType::Lakehouse)
        .next()
        .map(|r| r.live_id.clone())
        .unwrap();
    let content = api.pushed_part("Ingest", "notebook-content.py").unwrap();
    assert!(content.contains(&format!("\"default_lakehouse\": \"{}\"", bronze_id)));
    assert!(content.contains(&format!("\"default_lakehouse_workspace_id\": \"{}\"", run.workspace_id)));
}
