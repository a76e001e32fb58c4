async fn force_asteroid(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Group>, HttpApiError> {
    let mut service = state.service.lock().await;
    let group = service.force_asteroid(&group_id)?;
    info!(group_id = %group_id, "asteroid forced");

    Ok(Json(group))
}

async fn fill_city(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<FillCityRequest>,
) -> Result<Json<Group>, HttpApiError> {
    let mut service = state.service.lock().await;
    let group = service.fill_city(&group_id, request)?;

    Ok(Json(group))
}
