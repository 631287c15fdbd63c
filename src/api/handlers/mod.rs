use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::due_date::QuickDate;
use crate::error::TreeError;
use crate::models::{NodeId, Task, TreeId};
use crate::sync::SyncStats;
use crate::tree::{DocumentTree, MapTree, TreeSnapshot};
use crate::workspace::{summarize, BucketCounts, MapSummary, TaskView, Workspace};

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ============================================================
// Request / response bodies
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMapInput {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeInput {
    /// Parent node. `None` attaches the node under the root.
    pub parent_id: Option<NodeId>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDueDateInput {
    /// `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD HH:MM` or a
    /// bare `YYYY-MM-DD`.
    pub due_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickDateInput {
    pub when: QuickDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSubTaskInput {
    pub text: String,
    pub start_date: String,
    pub end_date: String,
}

// ============================================================
// Error Handling
// ============================================================

/// Maps tree errors onto status codes. Internal faults are logged and
/// returned without detail.
fn tree_error(e: TreeError) -> (StatusCode, String) {
    let status = match e {
        TreeError::TreeNotFound(_) | TreeError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        TreeError::RootNode => StatusCode::BAD_REQUEST,
        TreeError::UnknownAttribute(_) => {
            tracing::error!("Internal error: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };
    tracing::warn!("Request failed: {}", e);
    (status, e.to_string())
}

fn bad_request(msg: impl std::fmt::Display) -> (StatusCode, String) {
    let msg = msg.to_string();
    tracing::warn!("Validation error: {}", msg);
    (StatusCode::BAD_REQUEST, msg)
}

fn parse_date(workspace: &Workspace, value: &str) -> ApiResult<NaiveDateTime> {
    workspace
        .engine()
        .calculator()
        .parse(value)
        .map_err(bad_request)
}

fn lookup(workspace: &Workspace, tree: Uuid, node: Uuid) -> ApiResult<(Arc<MapTree>, NodeId)> {
    let map = workspace.map(TreeId(tree)).map_err(tree_error)?;
    let node = NodeId(node);
    if !map.node_exists(node) {
        return Err(tree_error(TreeError::NodeNotFound(node)));
    }
    Ok((map, node))
}

/// The task now held for `node`, as the registry reports it after the
/// attribute write has been synchronized.
fn current_task(workspace: &Workspace, tree: TreeId, node: NodeId) -> ApiResult<Json<TaskView>> {
    workspace
        .task_for(tree, node)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Node {} has no task", node)))
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Tasks
// ============================================================

pub async fn list_tasks(State(workspace): State<Workspace>) -> Json<Vec<TaskView>> {
    Json(workspace.all_tasks())
}

pub async fn list_pending_tasks(State(workspace): State<Workspace>) -> Json<Vec<TaskView>> {
    Json(workspace.pending_tasks())
}

pub async fn list_completed_tasks(State(workspace): State<Workspace>) -> Json<Vec<TaskView>> {
    Json(workspace.completed_tasks())
}

pub async fn bucket_counts(State(workspace): State<Workspace>) -> Json<BucketCounts> {
    Json(workspace.bucket_counts())
}

// ============================================================
// Maps
// ============================================================

pub async fn list_trees(State(workspace): State<Workspace>) -> Json<Vec<MapSummary>> {
    Json(workspace.summaries())
}

pub async fn create_tree(
    State(workspace): State<Workspace>,
    Json(input): Json<CreateMapInput>,
) -> ApiResult<(StatusCode, Json<MapSummary>)> {
    if input.name.trim().is_empty() {
        return Err(bad_request("Map name must not be empty"));
    }
    let map = workspace.create_map(input.name);
    Ok((StatusCode::CREATED, Json(summarize(&map))))
}

pub async fn get_tree(
    State(workspace): State<Workspace>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TreeSnapshot>> {
    let map = workspace.map(TreeId(id)).map_err(tree_error)?;
    Ok(Json(map.snapshot()))
}

pub async fn delete_tree(
    State(workspace): State<Workspace>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    workspace.close_map(TreeId(id)).map_err(tree_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_sync_stats(
    State(workspace): State<Workspace>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SyncStats>> {
    workspace
        .engine()
        .sync_stats(TreeId(id))
        .map(Json)
        .ok_or_else(|| tree_error(TreeError::TreeNotFound(TreeId(id))))
}

// ============================================================
// Nodes
// ============================================================

pub async fn create_node(
    State(workspace): State<Workspace>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateNodeInput>,
) -> ApiResult<(StatusCode, Json<NodeInfo>)> {
    let map = workspace.map(TreeId(id)).map_err(tree_error)?;
    let parent = input.parent_id.unwrap_or_else(|| map.root());
    let node = map.add_node(parent, input.text.clone()).map_err(tree_error)?;
    Ok((
        StatusCode::CREATED,
        Json(NodeInfo {
            id: node,
            parent_id: Some(parent),
            text: input.text,
        }),
    ))
}

pub async fn delete_node(
    State(workspace): State<Workspace>,
    Path((id, node)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let (map, node) = lookup(&workspace, id, node)?;
    map.delete_node(node).map_err(tree_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_sub_task(
    State(workspace): State<Workspace>,
    Path((id, node)): Path<(Uuid, Uuid)>,
    Json(input): Json<AddSubTaskInput>,
) -> ApiResult<(StatusCode, Json<NodeInfo>)> {
    let (map, parent) = lookup(&workspace, id, node)?;
    let start = parse_date(&workspace, &input.start_date)?;
    let end = parse_date(&workspace, &input.end_date)?;
    if end < start {
        return Err(bad_request("Sub-task end date is before its start date"));
    }
    let child = map
        .add_sub_task(parent, input.text.clone(), start, end)
        .map_err(tree_error)?;
    Ok((
        StatusCode::CREATED,
        Json(NodeInfo {
            id: child,
            parent_id: Some(parent),
            text: input.text,
        }),
    ))
}

// ============================================================
// Due dates and completion
// ============================================================

pub async fn set_due_date(
    State(workspace): State<Workspace>,
    Path((id, node)): Path<(Uuid, Uuid)>,
    Json(input): Json<SetDueDateInput>,
) -> ApiResult<Json<TaskView>> {
    let (map, node) = lookup(&workspace, id, node)?;
    let due_date = parse_date(&workspace, &input.due_date)?;
    Task::set_due_date(map.as_ref(), node, &workspace.engine().attributes(), due_date)
        .map_err(tree_error)?;
    current_task(&workspace, map.id(), node)
}

pub async fn clear_due_date(
    State(workspace): State<Workspace>,
    Path((id, node)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let (map, node) = lookup(&workspace, id, node)?;
    let removed = Task::clear_due_date(map.as_ref(), node, &workspace.engine().attributes())
        .map_err(tree_error)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("Node {} has no due date", node)))
    }
}

pub async fn quick_due_date(
    State(workspace): State<Workspace>,
    Path((id, node)): Path<(Uuid, Uuid)>,
    Json(input): Json<QuickDateInput>,
) -> ApiResult<Json<TaskView>> {
    let (map, node) = lookup(&workspace, id, node)?;
    let engine = workspace.engine();
    Task::apply_quick_date(
        map.as_ref(),
        node,
        &engine.attributes(),
        &engine.calculator(),
        input.when,
        workspace.now(),
    )
    .map_err(tree_error)?;
    current_task(&workspace, map.id(), node)
}

pub async fn complete_task(
    State(workspace): State<Workspace>,
    Path((id, node)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<TaskView>> {
    let (map, node) = lookup(&workspace, id, node)?;
    current_task(&workspace, map.id(), node)?;
    Task::complete(
        map.as_ref(),
        node,
        &workspace.engine().attributes(),
        workspace.now(),
    )
    .map_err(tree_error)?;
    current_task(&workspace, map.id(), node)
}

pub async fn reopen_task(
    State(workspace): State<Workspace>,
    Path((id, node)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<TaskView>> {
    let (map, node) = lookup(&workspace, id, node)?;
    current_task(&workspace, map.id(), node)?;
    Task::reopen(map.as_ref(), node, &workspace.engine().attributes()).map_err(tree_error)?;
    current_task(&workspace, map.id(), node)
}
