#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<GroupService>>,
}

impl AppState {
    fn open(sqlite_path: impl AsRef<std::path::Path>) -> Result<Self, ServiceError> {
        let service = GroupService::open(sqlite_path)?;
        Ok(Self {
            service: Arc::new(Mutex::new(service)),
        })
    }
}
