//! REST surface, mounted under `/api`.

use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::config::Config;
use crate::monitor::MonitorError;
use crate::service::{AttendanceService, ServiceError};
use crate::store::{Store, StoreError};

mod handlers;
pub mod models;

use models::ErrorBody;

/// Largest accepted request body; registration carries a base64 photo.
const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{context}: {detail}")]
    Internal { context: String, detail: String },
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            ApiError::Validation(msg) | ApiError::NotFound(msg) => ErrorBody {
                error: msg.clone(),
                message: None,
            },
            ApiError::Internal { context, detail } => ErrorBody {
                error: context.clone(),
                message: Some(detail.clone()),
            },
        }
    }
}

impl warp::reject::Reject for ApiError {}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateRollNumber(_) => ApiError::Validation(err.to_string()),
            other => ApiError::Internal {
                context: "Database error".into(),
                detail: other.to_string(),
            },
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::ClassNotFound(_) | ServiceError::StudentNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            ServiceError::Monitor(MonitorError::NoOpenWindow(_)) => ApiError::NotFound(err.to_string()),
            ServiceError::Store(store) => store.into(),
            ServiceError::Monitor(other) => ApiError::Internal {
                context: "Monitor unavailable".into(),
                detail: other.to_string(),
            },
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        ServiceError::from(err).into()
    }
}

impl From<StoreError> for Rejection {
    fn from(err: StoreError) -> Self {
        ApiError::from(err).into()
    }
}

impl From<ServiceError> for Rejection {
    fn from(err: ServiceError) -> Self {
        ApiError::from(err).into()
    }
}

impl From<MonitorError> for Rejection {
    fn from(err: MonitorError) -> Self {
        ApiError::from(err).into()
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: AttendanceService,
    pub config: Arc<Config>,
    /// Wakes the scheduler after a class schedule changes.
    pub schedule_changed: Arc<Notify>,
}

impl AppState {
    pub fn store(&self) -> &Store {
        self.service.store()
    }
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Percent-decodes a path parameter, so `Math%20101` matches `Math 101`.
async fn decode_segment(raw: String) -> Result<String, Rejection> {
    match percent_decode_str(&raw).decode_utf8() {
        Ok(decoded) => Ok(decoded.into_owned()),
        Err(_) => Err(ApiError::validation(format!("Path parameter is not valid UTF-8: {raw}")).into()),
    }
}

/// The complete filter tree, including error recovery.
pub fn routes(state: AppState) -> BoxedFilter<(Response,)> {
    let health = warp::path!("health")
        .and(warp::get())
        .and_then(handlers::health);

    let api = student_routes(state.clone())
        .or(class_routes(state.clone()))
        .unify()
        .or(attendance_routes(state.clone()))
        .unify()
        .or(efficiency_routes(state.clone()))
        .unify()
        .or(monitor_routes(state))
        .unify();

    health
        .or(api)
        .unify()
        .recover(handle_rejection)
        .unify()
        .boxed()
}

fn student_routes(state: AppState) -> BoxedFilter<(Response,)> {
    let register = warp::path!("api" / "students" / "register")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(handlers::register_student);

    let list = warp::path!("api" / "students")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::query())
        .and_then(handlers::list_students);

    let get = warp::path!("api" / "students" / String)
        .and(warp::get())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and_then(handlers::get_student);

    let descriptor = warp::path!("api" / "students" / String / "descriptor")
        .and(warp::post())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(handlers::set_descriptor);

    let reference = warp::path!("api" / "students" / String / "reference")
        .and(warp::get())
        .and_then(decode_segment)
        .and(with_state(state))
        .and_then(handlers::get_reference);

    register
        .or(list)
        .unify()
        .or(get)
        .unify()
        .or(descriptor)
        .unify()
        .or(reference)
        .unify()
        .boxed()
}

fn class_routes(state: AppState) -> BoxedFilter<(Response,)> {
    let add = warp::path!("api" / "classes" / "add")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(handlers::add_class);

    let list = warp::path!("api" / "classes")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::list_classes);

    let get = warp::path!("api" / "classes" / String)
        .and(warp::get())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and_then(handlers::get_class);

    let update = warp::path!("api" / "classes" / String)
        .and(warp::put())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(handlers::update_class);

    let delete = warp::path!("api" / "classes" / String)
        .and(warp::delete())
        .and_then(decode_segment)
        .and(with_state(state))
        .and_then(handlers::delete_class);

    add.or(list)
        .unify()
        .or(get)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .boxed()
}

fn attendance_routes(state: AppState) -> BoxedFilter<(Response,)> {
    let mark = warp::path!("api" / "attendance" / "mark")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(handlers::mark_attendance);

    let query = warp::path!("api" / "attendance")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::query())
        .and_then(handlers::query_attendance);

    let today = warp::path!("api" / "attendance" / "today" / String)
        .and(warp::get())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and_then(handlers::today_roster);

    let stats = warp::path!("api" / "attendance" / "stats")
        .and(warp::get())
        .and(with_state(state))
        .and(warp::query())
        .and_then(handlers::attendance_stats);

    mark.or(query)
        .unify()
        .or(today)
        .unify()
        .or(stats)
        .unify()
        .boxed()
}

fn efficiency_routes(state: AppState) -> BoxedFilter<(Response,)> {
    let by_roll = warp::path!("api" / "efficiency" / "roll" / String)
        .and(warp::get())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and(warp::query())
        .and_then(handlers::efficiency_by_roll);

    let by_student = warp::path!("api" / "efficiency" / String)
        .and(warp::get())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and(warp::query())
        .and_then(handlers::efficiency_by_student);

    let bulk = warp::path!("api" / "efficiency")
        .and(warp::get())
        .and(with_state(state))
        .and(warp::query())
        .and_then(handlers::efficiency_report);

    by_roll
        .or(by_student)
        .unify()
        .or(bulk)
        .unify()
        .boxed()
}

fn monitor_routes(state: AppState) -> BoxedFilter<(Response,)> {
    let active = warp::path!("api" / "monitor")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::active_windows);

    let start = warp::path!("api" / "monitor" / String / "start")
        .and(warp::post())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and_then(handlers::start_monitoring);

    let frames = warp::path!("api" / "monitor" / String / "frames")
        .and(warp::post())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(handlers::submit_frame);

    let snapshot = warp::path!("api" / "monitor" / String)
        .and(warp::get())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and_then(handlers::window_snapshot);

    let flush = warp::path!("api" / "monitor" / String / "flush")
        .and(warp::post())
        .and_then(decode_segment)
        .and(with_state(state.clone()))
        .and_then(handlers::flush_window);

    let stop = warp::path!("api" / "monitor" / String / "stop")
        .and(warp::post())
        .and_then(decode_segment)
        .and(with_state(state))
        .and_then(handlers::stop_monitoring);

    active
        .or(start)
        .unify()
        .or(frames)
        .unify()
        .or(snapshot)
        .unify()
        .or(flush)
        .unify()
        .or(stop)
        .unify()
        .boxed()
}

fn error_reply(status: StatusCode, body: &ErrorBody) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if let Some(api) = err.find::<ApiError>() {
        if let ApiError::Internal { .. } = api {
            tracing::error!(error = %api, "request failed");
        }
        return Ok(error_reply(api.status(), &api.body()));
    }

    let (status, error, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found", None)
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "Invalid request body", Some(e.to_string()))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, "Invalid query string", Some(e.to_string()))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large", None)
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected a JSON body", None)
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required", None)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", None)
    } else {
        tracing::error!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
    };

    Ok(error_reply(
        status,
        &ErrorBody {
            error: error.to_string(),
            message,
        },
    ))
}

#[cfg(test)]
mod tests;
