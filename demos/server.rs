//! Example server guarded by basic authentication.
//!
//! Run with: `cargo run --example server`
//!
//! Test with:
//! ```sh
//! # Public endpoint (anyone can access)
//! curl http://localhost:3000/public/info
//!
//! # Protected endpoint without credentials (401 with a challenge)
//! curl -i http://localhost:3000/protected/me
//!
//! # Protected endpoint as a user (allowed)
//! curl -u alice:secret http://localhost:3000/protected/me
//!
//! # POST as a user (403, the ADMIN rule matches first)
//! curl -u alice:secret -X POST http://localhost:3000/protected/me
//!
//! # A handler failure rendered as XML
//! curl -u alice:secret -H 'Accept: application/xml' http://localhost:3000/protected/orders/42
//!
//! # ... or as plain text with X-ERROR-* headers
//! curl -i -u alice:secret -H 'Accept: text/plain' http://localhost:3000/protected/orders/42
//! ```

use axum::extract::Path;
use axum::{routing::get, Router};
use axum_guard::{ApiFailure, FailureResponse, Guard, Principal, SecurityConfig};
use std::fmt;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG: &str = r#"
[auth]
default_mode = "deny_all"
realm = "demo"

[[auth.rules]]
pattern = "/public/**"
mode = "permit_all"
description = "Public endpoints accessible to all"

[[auth.rules]]
pattern = "/protected/**"
method = "POST"
roles = ["ADMIN"]
description = "Only admins may write"

[[auth.rules]]
pattern = "/protected/**"
roles = ["USER"]
description = "Users may read"

[[auth.basic_users]]
name = "alice"
password = "{noop}secret"
roles = ["USER"]

[[auth.basic_users]]
name = "root"
password = "{noop}toor"
roles = ["USER", "ADMIN"]

[errors]
api_paths = ["/protected/**"]

[[errors.mappings]]
class_name = "OrderMissing"
status = 404
error_code = "ORDER_NOT_FOUND"
"#;

#[derive(Debug)]
struct OrderMissing(u64);

impl fmt::Display for OrderMissing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Order {} not found", self.0)
    }
}

impl std::error::Error for OrderMissing {}

impl ApiFailure for OrderMissing {}

async fn public_info() -> &'static str {
    "Public information - accessible to everyone"
}

async fn me(principal: Principal) -> String {
    format!(
        "{} with roles {:?}",
        principal.name().unwrap_or("anonymous"),
        principal.roles()
    )
}

async fn order(Path(id): Path<u64>) -> Result<String, FailureResponse> {
    Err(OrderMissing(id).into())
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axum_guard=debug,server=debug".into()),
        )
        .init();

    let config = match SecurityConfig::from_toml(CONFIG) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let guard = match Guard::from_config(config) {
        Ok(guard) => guard,
        Err(e) => {
            tracing::error!("Failed to build guard: {}", e);
            std::process::exit(1);
        }
    };

    let app = Router::new()
        .route("/public/info", get(public_info))
        .route("/protected/me", get(me).post(me))
        .route("/protected/orders/{id}", get(order))
        .layer(guard.layer());

    // Start the server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    // Important: Use into_make_service_with_connect_info for IP grants
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
