//! Integration tests for the `drakeward project` CLI commands.
//!
//! These tests exercise project/specification creation, task decomposition,
//! and project approval against a real PostgreSQL instance. Each test
//! creates an isolated temporary database and drops it on completion.

use sqlx::PgPool;
use uuid::Uuid;

use drakeward_core::plan::service::create_tasks_from_wyvern_output;
use drakeward_core::plan::toml_format::{TaskToml, WyvernPlanMeta, WyvernPlanToml};
use drakeward_db::models::ProjectStatus;
use drakeward_db::queries::{
    features, invariants, projects as project_db, specifications as spec_db, tasks,
};
use drakeward_test_utils::{create_test_db, drop_test_db};

async fn create_test_project(pool: &PgPool, name: &str) -> drakeward_db::models::Project {
    project_db::insert_project(pool, name, "/tmp/test-project", "main", "claude-code", "worktree")
        .await
        .expect("insert_project should succeed")
}

async fn insert_test_invariant(pool: &PgPool, name: &str) -> drakeward_db::models::Invariant {
    let new = invariants::NewInvariant {
        name,
        description: Some("test invariant"),
        kind: drakeward_db::models::InvariantKind::Custom,
        command: "true",
        args: &[],
        expected_exit_code: 0,
        threshold: None,
        scope: drakeward_db::models::InvariantScope::Project,
        timeout_secs: 300,
    };
    invariants::insert_invariant(pool, &new)
        .await
        .expect("insert_invariant should succeed")
}

fn task(name: &str, scope: &str, gate: &str, depends_on: &[&str]) -> TaskToml {
    TaskToml {
        name: name.to_string(),
        description: format!("{name} description"),
        scope: scope.to_string(),
        gate: gate.to_string(),
        retry_max: 3,
        priority: 0,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        invariants: Vec::new(),
        harness: None,
        steps: Vec::new(),
    }
}

// -----------------------------------------------------------------------
// Tests: project create
// -----------------------------------------------------------------------

#[tokio::test]
async fn create_project_and_specification() {
    let (pool, db_name) = create_test_db().await;

    let project = create_test_project(&pool, "Test project").await;
    assert_eq!(project.status, ProjectStatus::Prototype);
    assert!(project.approved_at.is_none());

    let spec = spec_db::insert_specification(&pool, project.id, "Build a thing.")
        .await
        .expect("insert_specification should succeed");
    assert_eq!(spec.version, 1);
    assert_eq!(spec.project_id, project.id);

    let fetched = spec_db::get_specification(&pool, project.id)
        .await
        .expect("get_specification should succeed")
        .expect("specification should exist");
    assert_eq!(fetched.content, "Build a thing.");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn create_project_with_features() {
    let (pool, db_name) = create_test_db().await;

    let project = create_test_project(&pool, "Featured project").await;
    let spec = spec_db::insert_specification(&pool, project.id, "Spec text")
        .await
        .expect("insert_specification should succeed");

    features::insert_feature(&pool, spec.id, "auth", "user authentication")
        .await
        .expect("insert_feature should succeed");
    features::insert_feature(&pool, spec.id, "billing", "billing flows")
        .await
        .expect("insert_feature should succeed");

    let found = features::list_features_for_specification(&pool, spec.id)
        .await
        .expect("list_features_for_specification should succeed");
    assert_eq!(found.len(), 2);

    let unassigned = features::list_unassigned_features(&pool)
        .await
        .expect("list_unassigned_features should succeed");
    assert!(unassigned.iter().any(|f| f.name == "auth"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Tests: task decomposition (what Wyvern's output becomes)
// -----------------------------------------------------------------------

#[tokio::test]
async fn decompose_work_area_creates_tasks_and_dependencies() {
    let (pool, db_name) = create_test_db().await;
    let project = create_test_project(&pool, "Decomposed project").await;

    let plan = WyvernPlanToml {
        plan: WyvernPlanMeta {
            work_area: "auth".to_string(),
            feature_name: None,
        },
        tasks: vec![
            task("task-a", "narrow", "auto", &[]),
            task("task-b", "medium", "human_review", &["task-a"]),
        ],
    };

    let created = create_tasks_from_wyvern_output(&pool, project.id, None, &plan)
        .await
        .expect("create_tasks_from_wyvern_output should succeed");
    assert_eq!(created.len(), 2);

    let found_tasks = tasks::list_tasks_for_project(&pool, project.id)
        .await
        .expect("list_tasks_for_project should succeed");
    assert_eq!(found_tasks.len(), 2);

    let dep_edges = tasks::count_dependency_edges(&pool, project.id)
        .await
        .expect("count_dependency_edges should succeed");
    assert_eq!(dep_edges, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn decompose_rejects_missing_invariants() {
    let (pool, db_name) = create_test_db().await;
    let project = create_test_project(&pool, "Invariant-gated project").await;

    let mut bad_task = task("task-a", "narrow", "auto", &[]);
    bad_task.invariants = vec!["nonexistent_invariant".to_string()];

    let plan = WyvernPlanToml {
        plan: WyvernPlanMeta {
            work_area: "auth".to_string(),
            feature_name: None,
        },
        tasks: vec![bad_task],
    };

    let result = create_tasks_from_wyvern_output(&pool, project.id, None, &plan).await;
    assert!(result.is_err(), "should fail with missing invariant");
    let err_msg = result.unwrap_err().to_string();
    assert!(
        err_msg.contains("nonexistent_invariant"),
        "error should mention the missing invariant: {err_msg}"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn decompose_links_existing_invariants() {
    let (pool, db_name) = create_test_db().await;
    let project = create_test_project(&pool, "Linked invariants project").await;
    let inv = insert_test_invariant(&pool, "my_check").await;

    let mut linked_task = task("task-a", "narrow", "auto", &[]);
    linked_task.invariants = vec!["my_check".to_string()];

    let plan = WyvernPlanToml {
        plan: WyvernPlanMeta {
            work_area: "auth".to_string(),
            feature_name: None,
        },
        tasks: vec![linked_task],
    };

    create_tasks_from_wyvern_output(&pool, project.id, None, &plan)
        .await
        .expect("create should succeed");

    let found_tasks = tasks::list_tasks_for_project(&pool, project.id)
        .await
        .expect("list_tasks_for_project should succeed");
    let task_a = &found_tasks[0];
    let task_invs = invariants::get_invariants_for_task(&pool, task_a.id)
        .await
        .expect("get_invariants_for_task should succeed");
    assert_eq!(task_invs.len(), 1);
    assert_eq!(task_invs[0].id, inv.id);

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Tests: project approve
// -----------------------------------------------------------------------

#[tokio::test]
async fn approve_project_succeeds_from_prototype() {
    let (pool, db_name) = create_test_db().await;
    let project = create_test_project(&pool, "Approvable project").await;

    let approved = project_db::approve_project(&pool, project.id)
        .await
        .expect("approve_project should succeed");

    assert_eq!(approved.status, ProjectStatus::New);
    assert!(approved.approved_at.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn approve_project_fails_for_non_prototype_project() {
    let (pool, db_name) = create_test_db().await;
    let project = create_test_project(&pool, "Already approved project").await;

    project_db::approve_project(&pool, project.id)
        .await
        .expect("first approve should succeed");

    let result = project_db::approve_project(&pool, project.id).await;
    assert!(result.is_err());
    let err_msg = result.unwrap_err().to_string();
    assert!(
        err_msg.contains("cannot be approved"),
        "expected status error, got: {err_msg}"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn approve_project_fails_for_nonexistent_project() {
    let (pool, db_name) = create_test_db().await;

    let fake_id = Uuid::new_v4();
    let result = project_db::approve_project(&pool, fake_id).await;
    assert!(result.is_err());
    let err_msg = result.unwrap_err().to_string();
    assert!(
        err_msg.contains("not found"),
        "expected not found error, got: {err_msg}"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Tests: full create -> decompose -> approve workflow
// -----------------------------------------------------------------------

#[tokio::test]
async fn full_create_decompose_approve_workflow() {
    let (pool, db_name) = create_test_db().await;

    let _inv = insert_test_invariant(&pool, "workflow_check").await;

    let project = create_test_project(&pool, "Workflow test").await;
    spec_db::insert_specification(&pool, project.id, "Workflow spec")
        .await
        .expect("insert_specification should succeed");

    let mut step_one = task("step-one", "narrow", "auto", &[]);
    step_one.invariants = vec!["workflow_check".to_string()];
    let mut step_two = task("step-two", "medium", "human_review", &["step-one"]);
    step_two.invariants = vec!["workflow_check".to_string()];

    let plan = WyvernPlanToml {
        plan: WyvernPlanMeta {
            work_area: "core".to_string(),
            feature_name: None,
        },
        tasks: vec![step_one, step_two],
    };

    create_tasks_from_wyvern_output(&pool, project.id, None, &plan)
        .await
        .expect("create should succeed");

    let all_projects = project_db::list_projects(&pool)
        .await
        .expect("list_projects should succeed");
    assert_eq!(all_projects.len(), 1);
    assert_eq!(all_projects[0].id, project.id);

    let found_tasks = tasks::list_tasks_for_project(&pool, project.id)
        .await
        .expect("list_tasks_for_project should succeed");
    assert_eq!(found_tasks.len(), 2);

    let step_two = found_tasks.iter().find(|t| t.name == "step-two").unwrap();
    let deps = tasks::get_task_dependency_names(&pool, step_two.id)
        .await
        .expect("get deps should succeed");
    assert_eq!(deps, vec!["step-one"]);

    let approved = project_db::approve_project(&pool, project.id)
        .await
        .expect("approve should succeed");
    assert_eq!(approved.status, ProjectStatus::New);
    assert!(approved.approved_at.is_some());

    let reread = project_db::get_project(&pool, project.id)
        .await
        .expect("re-read should succeed")
        .expect("project should exist");
    assert_eq!(reread.status, ProjectStatus::New);

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Tests: dependency edge counting
// -----------------------------------------------------------------------

#[tokio::test]
async fn count_dependency_edges_correct() {
    let (pool, db_name) = create_test_db().await;
    let project = create_test_project(&pool, "Diamond project").await;

    // Diamond: a -> b, a -> c, b -> d, c -> d  (4 edges)
    let plan = WyvernPlanToml {
        plan: WyvernPlanMeta {
            work_area: "core".to_string(),
            feature_name: None,
        },
        tasks: vec![
            task("a", "narrow", "auto", &[]),
            task("b", "narrow", "auto", &["a"]),
            task("c", "narrow", "auto", &["a"]),
            task("d", "narrow", "auto", &["b", "c"]),
        ],
    };

    create_tasks_from_wyvern_output(&pool, project.id, None, &plan)
        .await
        .expect("create should succeed");

    let edges = tasks::count_dependency_edges(&pool, project.id)
        .await
        .expect("count should succeed");
    assert_eq!(edges, 4);

    pool.close().await;
    drop_test_db(&db_name).await;
}
