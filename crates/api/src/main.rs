use std::sync::Arc;

use atrium_infra::store::{AccessStore, InMemoryAccessStore};

#[tokio::main]
async fn main() {
    atrium_observability::init();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let store = build_store().await;
    let app = atrium_api::app::build_app(store, jwt_secret);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("failed to bind listen port");

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

#[cfg(feature = "postgres")]
async fn build_store() -> Arc<dyn AccessStore> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = sqlx::PgPool::connect(&url)
                .await
                .expect("failed to connect to DATABASE_URL");
            let store = atrium_infra::store::schema::ensure_schema(pool)
                .await
                .expect("schema bootstrap failed");
            tracing::info!("using postgres store");
            Arc::new(store)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            Arc::new(InMemoryAccessStore::new())
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_store() -> Arc<dyn AccessStore> {
    Arc::new(InMemoryAccessStore::new())
}
