async fn create_group(
    State(state): State<AppState>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>), HttpApiError> {
    let mut service = state.service.lock().await;
    let group = service.create_group(request)?;
    info!(group_id = %group.group_id, code = %group.group_code, "group created");

    Ok((StatusCode::CREATED, Json(group)))
}

async fn get_group(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Group>, HttpApiError> {
    let mut service = state.service.lock().await;
    let group = service.get_group(&group_id)?;

    Ok(Json(group))
}

async fn join_group(
    State(state): State<AppState>,
    Json(request): Json<JoinGroupRequest>,
) -> Result<Json<Group>, HttpApiError> {
    let mut service = state.service.lock().await;
    let group = service.join_group(request)?;

    Ok(Json(group))
}

async fn complete_goal(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<CompleteGoalRequest>,
) -> Result<Json<Group>, HttpApiError> {
    let mut service = state.service.lock().await;
    let group = service.complete_goal(&group_id, request)?;

    Ok(Json(group))
}

async fn select_build(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<SelectBuildRequest>,
) -> Result<Json<Group>, HttpApiError> {
    let mut service = state.service.lock().await;
    let group = service.select_build(&group_id, request)?;

    Ok(Json(group))
}

async fn delete_group(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let mut service = state.service.lock().await;
    service.delete_group(&group_id)?;
    info!(group_id = %group_id, "group deleted");

    Ok(Json(json!({ "deleted": true, "group_id": group_id })))
}
