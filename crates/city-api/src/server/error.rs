#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
    Service(ServiceError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "server io error: {err}"),
            Self::Service(err) => write!(f, "server startup error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ServiceError> for ServerError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl From<ServiceError> for HttpApiError {
    fn from(err: ServiceError) -> Self {
        let (status, error_code) = match &err {
            ServiceError::GroupNotFound | ServiceError::InvalidGroupCode => {
                (StatusCode::NOT_FOUND, ErrorCode::GroupNotFound)
            }
            ServiceError::GroupFull => (StatusCode::BAD_REQUEST, ErrorCode::GroupFull),
            ServiceError::NotAMember => (StatusCode::BAD_REQUEST, ErrorCode::NotAMember),
            ServiceError::BuildInProgress => {
                (StatusCode::BAD_REQUEST, ErrorCode::BuildInProgress)
            }
            ServiceError::InvalidBuilding => (StatusCode::BAD_REQUEST, ErrorCode::InvalidBuilding),
            ServiceError::CityFull => (StatusCode::BAD_REQUEST, ErrorCode::CityFull),
            ServiceError::NoBuildings => (StatusCode::BAD_REQUEST, ErrorCode::NoBuildings),
            ServiceError::InvalidResetTime => {
                (StatusCode::BAD_REQUEST, ErrorCode::InvalidResetTime)
            }
            ServiceError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest),
            ServiceError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError)
            }
        };

        // Storage failures get a generic message; the cause goes in details.
        let (message, details) = match &err {
            ServiceError::Persistence(inner) => {
                ("storage operation failed".to_string(), Some(inner.to_string()))
            }
            other => (other.to_string(), None),
        };

        Self {
            status,
            error: ApiError::new(error_code, message, details),
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}
