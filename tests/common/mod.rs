use axum::Router;

pub async fn create_test_app() -> Router {
    std::env::set_var("DATABASE_URL", "");

    quizdeck_backend_rust::create_app().await
}
