use actix_cors::Cors;
use actix_web::{
    delete, get, http::StatusCode, post, put, web, App, HttpResponse, HttpServer, Responder, ResponseError,
};
use actix_ws::Message;
use anyhow::Context;
use flowcore::events::{IggyEventBus, IggyEventBusConfig};
use flowcore::{ErrorKind, ExportResolution, FlowError, IterationId, LinkId, PortId, ProjectRecord, RunMode, StepId, TemplateId};
use flowruntime::{FlowHost, HostConfig, PluginRegistry};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
struct AppState {
    host: Arc<FlowHost>,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    kind: String,
}

/// Maps runtime errors to HTTP responses by kind
#[derive(Debug)]
struct ApiError(FlowError);

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        ApiError(e)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conversion => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Lifecycle => StatusCode::CONFLICT,
            ErrorKind::Notification => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.0.to_string(),
            kind: format!("{:?}", self.0.kind()),
        })
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

#[derive(Debug, Deserialize)]
struct IterationQuery {
    iteration: Option<IterationId>,
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    iteration: Option<IterationId>,
    #[serde(default)]
    resolution: ExportResolution,
}

#[derive(Debug, Deserialize)]
struct AddStepRequest {
    template_id: TemplateId,
    x: f32,
    y: f32,
}

#[derive(Debug, Deserialize)]
struct MoveStepRequest {
    x: f32,
    y: f32,
}

#[derive(Debug, Deserialize)]
struct LinkRequest {
    source: PortId,
    target: PortId,
}

#[derive(Debug, Deserialize)]
struct PortValueRequest {
    value: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct StartRunRequest {
    #[serde(default)]
    mode: RunMode,
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "flowengine"
    }))
}

#[get("/api/templates")]
async fn list_templates(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.host.registry().list_templates())
}

/// Device providers with the devices each currently exposes
#[get("/api/devices")]
async fn list_devices(data: web::Data<AppState>) -> ApiResult {
    let registry = data.host.registry();
    let mut providers = Vec::new();
    for info in registry.list_device_providers() {
        let provider = registry.create_device_provider(info.id)?;
        providers.push(serde_json::json!({
            "provider": info,
            "devices": provider.devices(),
        }));
    }
    Ok(HttpResponse::Ok().json(providers))
}

#[get("/api/project")]
async fn get_project(data: web::Data<AppState>) -> ApiResult {
    let project = data.host.project().await.ok_or(FlowError::NoActiveProject)?;
    Ok(HttpResponse::Ok().json(project))
}

/// Activate a persisted project, replacing the current one
#[put("/api/project")]
async fn activate_project(data: web::Data<AppState>, record: web::Json<ProjectRecord>) -> ApiResult {
    let record = record.into_inner();
    info!("Activating project: {} ({})", record.name, record.id);

    let report = data.host.activate_project(&record).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[delete("/api/project")]
async fn deactivate_project(data: web::Data<AppState>) -> ApiResult {
    data.host.deactivate_project().await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/api/steps")]
async fn list_steps(data: web::Data<AppState>) -> ApiResult {
    let inspector = data.host.inspector().await?;
    Ok(HttpResponse::Ok().json(inspector.list_steps().await))
}

#[post("/api/steps")]
async fn add_step(data: web::Data<AppState>, req: web::Json<AddStepRequest>) -> ApiResult {
    let editor = data.host.editor().await?;
    let view = editor.add_step(req.template_id, req.x, req.y).await?;
    Ok(HttpResponse::Created().json(view))
}

#[get("/api/steps/{id}")]
async fn get_step(data: web::Data<AppState>, path: web::Path<StepId>, query: web::Query<IterationQuery>) -> ApiResult {
    let inspector = data.host.inspector().await?;
    let view = inspector.get_step(path.into_inner(), query.iteration).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[get("/api/steps/{id}/ports")]
async fn get_step_ports(
    data: web::Data<AppState>,
    path: web::Path<StepId>,
    query: web::Query<IterationQuery>,
) -> ApiResult {
    let inspector = data.host.inspector().await?;
    let ports = inspector.get_ports(path.into_inner(), query.iteration).await?;
    Ok(HttpResponse::Ok().json(ports))
}

#[put("/api/steps/{id}/position")]
async fn move_step(data: web::Data<AppState>, path: web::Path<StepId>, req: web::Json<MoveStepRequest>) -> ApiResult {
    let editor = data.host.editor().await?;
    editor.move_step(path.into_inner(), req.x, req.y).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[delete("/api/steps/{id}")]
async fn remove_step(data: web::Data<AppState>, path: web::Path<StepId>) -> ApiResult {
    let editor = data.host.editor().await?;
    let removed = editor.remove_step(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed_links": removed })))
}

#[get("/api/links")]
async fn list_links(data: web::Data<AppState>) -> ApiResult {
    let inspector = data.host.inspector().await?;
    Ok(HttpResponse::Ok().json(inspector.list_links().await))
}

#[post("/api/links")]
async fn link_ports(data: web::Data<AppState>, req: web::Json<LinkRequest>) -> ApiResult {
    let editor = data.host.editor().await?;
    let link = editor.link_ports(req.source, req.target).await?;
    Ok(HttpResponse::Created().json(link))
}

#[delete("/api/links/{id}")]
async fn unlink_ports(data: web::Data<AppState>, path: web::Path<LinkId>) -> ApiResult {
    let editor = data.host.editor().await?;
    let removed = editor.unlink_ports(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed": removed.is_some() })))
}

#[get("/api/ports/{id}")]
async fn get_port(data: web::Data<AppState>, path: web::Path<PortId>, query: web::Query<IterationQuery>) -> ApiResult {
    let inspector = data.host.inspector().await?;
    let port = inspector.get_port(path.into_inner(), query.iteration).await?;
    Ok(HttpResponse::Ok().json(port))
}

#[put("/api/ports/{id}/value")]
async fn update_port_value(
    data: web::Data<AppState>,
    path: web::Path<PortId>,
    req: web::Json<PortValueRequest>,
) -> ApiResult {
    let editor = data.host.editor().await?;
    editor.update_port_value(path.into_inner(), req.into_inner().value).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Stream an image port as raw pixel chunks
#[get("/api/ports/{id}/image")]
async fn export_image(data: web::Data<AppState>, path: web::Path<PortId>, query: web::Query<ExportQuery>) -> ApiResult {
    let inspector = data.host.inspector().await?;
    let export = inspector
        .export_image(path.into_inner(), query.iteration, query.resolution)
        .await?;

    let body = export
        .chunks
        .map(|chunk| Ok::<_, std::io::Error>(web::Bytes::from(chunk.data)));

    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .insert_header(("X-Image-Length", export.total_len.to_string()))
        .insert_header(("X-Image-Width", export.width.to_string()))
        .insert_header(("X-Image-Height", export.height.to_string()))
        .insert_header(("X-Image-Channels", export.channels.to_string()))
        .streaming(body))
}

#[post("/api/run/start")]
async fn start_run(data: web::Data<AppState>, req: Option<web::Json<StartRunRequest>>) -> ApiResult {
    let mode = req.map(|r| r.into_inner().mode).unwrap_or_default();
    let status = data.host.start_run(mode).await?;
    Ok(HttpResponse::Accepted().json(status))
}

#[post("/api/run/stop")]
async fn stop_run(data: web::Data<AppState>) -> ApiResult {
    data.host.stop_run().await?;
    Ok(HttpResponse::Accepted().finish())
}

#[post("/api/run/abort")]
async fn abort_run(data: web::Data<AppState>) -> ApiResult {
    data.host.abort_run().await?;
    Ok(HttpResponse::Accepted().finish())
}

#[get("/api/run/status")]
async fn run_status(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.host.get_status().await)
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.host.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!("WebSocket client lagged, dropped {} events", missed);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

async fn connect_iggy(connection_string: String) -> Option<Arc<IggyEventBus>> {
    let config = IggyEventBusConfig {
        connection_string,
        ..Default::default()
    };
    match IggyEventBus::new(config).await {
        Ok(bus) => Some(Arc::new(bus)),
        Err(e) => {
            error!("Iggy notifier disabled: {}", e);
            None
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting flow engine server");

    let config = match std::env::var("FLOW_CONFIG") {
        Ok(path) => HostConfig::from_file(&path).with_context(|| format!("loading host config from {}", path))?,
        Err(_) => HostConfig::default(),
    };

    let mut registry = PluginRegistry::new();
    flownodes::register_all(&mut registry);

    let mut host = FlowHost::new(Arc::new(registry), config);
    if let Ok(connection) = std::env::var("IGGY_CONNECTION") {
        if let Some(iggy) = connect_iggy(connection).await {
            info!("Publishing run notices to Iggy");
            host = host.with_notifier(iggy);
        }
    }

    info!("Host initialized with standard templates");

    let app_state = web::Data::new(AppState { host: Arc::new(host) });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_templates)
            .service(list_devices)
            .service(get_project)
            .service(activate_project)
            .service(deactivate_project)
            .service(list_steps)
            .service(add_step)
            .service(get_step)
            .service(get_step_ports)
            .service(move_step)
            .service(remove_step)
            .service(list_links)
            .service(link_ports)
            .service(unlink_ports)
            .service(get_port)
            .service(update_port_value)
            .service(export_image)
            .service(start_run)
            .service(stop_run)
            .service(abort_run)
            .service(run_status)
            .service(websocket_events)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
