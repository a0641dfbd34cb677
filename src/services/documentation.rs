use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document of the HTTP surface.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::api::run_request,
        crate::routes::files::upload,
        crate::routes::files::download,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::http::UploadResponse,
            crate::dto::packet::Packet,
            crate::dto::request::Request,
            crate::dto::response::Response,
            crate::dto::event::Event,
            crate::dto::push::Push,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "packets", description = "Packet websocket used by clients and peer servers"),
        (name = "requests", description = "REST mirror of the request packets"),
        (name = "files", description = "Image uploads"),
    )
)]
pub struct ApiDoc;
