use std::sync::Arc;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method, Uri,
    },
    middleware, Router,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};

use crate::{error::AppError, receipt::ReceiptScanner};

pub mod analytics;
pub mod auth;
pub mod report;
pub mod tx;
pub mod user;
pub mod utils;

use analytics::AnalyticsService;
use auth::AuthService;
use report::ReportService;
use tx::TransactionService;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Everything the HTTP layer needs, shared across requests.
pub struct Services {
    pub auth: Arc<AuthService>,
    pub transactions: Arc<TransactionService>,
    pub reports: Arc<ReportService>,
    pub analytics: Arc<AnalyticsService>,
    pub scanner: Option<Arc<dyn ReceiptScanner>>,
}

async fn route_not_found(uri: Uri) -> AppError {
    AppError::not_found(format!("Route {} not found", uri.path()))
}

/// Builds the full API under `base_path`. Every route except `/auth/*` requires
/// a bearer token.
pub fn api_router(services: Services, base_path: &str, frontend_origin: Option<&str>) -> Result<Router, String> {
    let guard = middleware::from_fn_with_state(services.auth.clone(), utils::require_auth);

    let protected = Router::new()
        .merge(user::user_routes(services.auth.clone()))
        .merge(tx::tx_routes(services.transactions, services.scanner))
        .merge(report::report_routes(services.reports))
        .merge(analytics::analytics_routes(services.analytics))
        .route_layer(guard);

    let api = Router::new()
        .merge(auth::auth_routes(services.auth))
        .merge(protected);

    let mut router = Router::new()
        .nest(base_path, api)
        .fallback(route_not_found)
        .layer(middleware::from_fn(utils::log_request))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    if let Some(origin) = frontend_origin {
        let origin = HeaderValue::from_str(origin).map_err(|err| format!("invalid frontend origin {origin}: {err}"))?;
        router = router.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_credentials(true)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
        );
    }

    Ok(router.layer(CompressionLayer::new().gzip(true)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::db::{
        memory::{MemoryAuthRepository, MemoryReportRepository, MemoryTransactionRepository},
        utils::RecordId,
    };

    struct TestApp {
        router: Router,
        auth: Arc<AuthService>,
    }

    fn app() -> TestApp {
        let users = Arc::new(MemoryAuthRepository::default());
        let reports = Arc::new(MemoryReportRepository::new(users.clone()));
        let transactions = Arc::new(MemoryTransactionRepository::default());

        let auth = Arc::new(AuthService::new(
            users,
            reports.clone(),
            "router-secret".to_string(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let services = Services {
            auth: auth.clone(),
            transactions: Arc::new(TransactionService::new(transactions.clone())),
            reports: Arc::new(ReportService::new(reports)),
            analytics: Arc::new(AnalyticsService::new(transactions)),
            scanner: None,
        };

        TestApp {
            router: api_router(services, "/api", None).unwrap(),
            auth,
        }
    }

    impl TestApp {
        fn token(&self, user_id: &RecordId) -> String {
            self.auth.access_token(user_id).unwrap().0
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response: Response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    /// Multipart request to the receipt endpoint with `(field, content type, bytes)` parts.
    fn multipart_parts(token: &str, parts: &[(&str, &str, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (field, content_type, bytes) in parts {
            body.extend_from_slice(
                format!(
                    "--BOUNDARY\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"receipt\"\r\n\
                     Content-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"--BOUNDARY--\r\n");

        Request::builder()
            .method("POST")
            .uri("/api/transaction/scan-receipt")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    fn multipart(token: &str, field: &str, content_type: &str) -> Request<Body> {
        multipart_parts(token, &[(field, content_type, &b"not-really-an-image"[..])])
    }

    fn coffee() -> Value {
        json!({
            "title": "Coffee",
            "type": "EXPENSE",
            "amount": 50000,
            "category": "Food",
            "date": "2025-05-08",
        })
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let app = app();
        let request = Request::builder().uri("/api/user/me").body(Body::empty()).unwrap();
        let (status, body) = app.send(request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["errorCode"], "ACCESS_UNAUTHORIZED");

        let (status, _) = app.send(get("/api/transaction/all", "not-a-jwt")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_login_and_fetch_profile() {
        let app = app();
        let credentials = json!({ "email": "Ada@Example.com ", "password": "secret1" });

        let mut register = credentials.clone();
        register["name"] = json!("Ada");
        let (status, body) = app.send(json_request("POST", "/api/auth/register", None, register)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "User registered successfully");

        let (status, body) = app.send(json_request("POST", "/api/auth/login", None, credentials)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reportSetting"]["frequency"], "MONTHLY");
        assert!(body["user"].get("passwordHash").is_none());
        let token = body["accessToken"].as_str().unwrap().to_string();

        let (status, body) = app.send(get("/api/user/me", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn created_transaction_gets_defaults() {
        let app = app();
        let token = app.token(&RecordId::generate());

        let (status, body) = app
            .send(json_request("POST", "/api/transaction/create", Some(&token), coffee()))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let transaction = &body["transaction"];
        assert_eq!(transaction["status"], "COMPLETED");
        assert_eq!(transaction["paymentMethod"], "CASH");
        assert_eq!(transaction["isRecurring"], false);
        assert_eq!(transaction["id"].as_str().unwrap().len(), 24);

        let id = transaction["id"].as_str().unwrap();
        let (status, body) = app.send(get(&format!("/api/transaction/{id}"), &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transaction"]["title"], "Coffee");

        let stranger = app.token(&RecordId::generate());
        let (status, body) = app.send(get(&format!("/api/transaction/{id}"), &stranger)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], "RESOURCE_NOT_FOUND");
    }

    #[tokio::test]
    async fn invalid_bulk_create_inserts_nothing() {
        let app = app();
        let token = app.token(&RecordId::generate());
        let mut broken = coffee();
        broken["amount"] = json!(0);

        let (status, body) = app
            .send(json_request(
                "POST",
                "/api/transaction/bulk-transaction",
                Some(&token),
                json!({ "transactions": [coffee(), broken] }),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorCode"], "VALIDATION_ERROR");
        assert_eq!(body["errors"][0]["field"], "transactions.1.amount");

        let (_, body) = app.send(get("/api/transaction/all", &token)).await;
        assert_eq!(body["transactions"]["totalCount"], 0);
        assert_eq!(body["transactions"]["pageSize"], 20);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let app = app();
        let token = app.token(&RecordId::generate());
        let request = Request::builder()
            .method("POST")
            .uri("/api/transaction/create")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{\"title\":"))
            .unwrap();

        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorCode"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn receipt_uploads_are_checked() {
        let app = app();
        let token = app.token(&RecordId::generate());

        let (status, body) = app.send(multipart(&token, "image", "image/png")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorCode"], "FILE_UPLOAD_ERROR");
        assert_eq!(body["message"], "Unexpected file field");

        let (_, body) = app.send(multipart(&token, "receipt", "application/pdf")).await;
        assert_eq!(body["message"], "Invalid file type. Only JPEG and PNG images are allowed");
    }

    #[tokio::test]
    async fn receipt_upload_count_and_presence_are_checked() {
        let app = app();
        let token = app.token(&RecordId::generate());

        let image: &[u8] = b"png-bytes";
        let (status, body) = app
            .send(multipart_parts(
                &token,
                &[("receipt", "image/png", image), ("receipt", "image/png", image)],
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorCode"], "FILE_UPLOAD_ERROR");
        assert_eq!(body["message"], "Too many files uploaded");

        let (status, body) = app.send(multipart_parts(&token, &[])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorCode"], "FILE_UPLOAD_ERROR");
        assert_eq!(body["message"], "Missing receipt file");
    }

    #[tokio::test]
    async fn oversized_receipts_are_rejected() {
        let app = app();
        let token = app.token(&RecordId::generate());

        // just over the image limit, still under the request body limit
        let slightly_large = vec![0u8; crate::receipt::MAX_RECEIPT_BYTES + 1];
        let (status, body) = app
            .send(multipart_parts(&token, &[("receipt", "image/jpeg", slightly_large.as_slice())]))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorCode"], "FILE_UPLOAD_ERROR");
        assert_eq!(body["message"], "File size exceeds the limit");

        // past the request body limit of the route
        let far_too_large = vec![0u8; crate::receipt::MAX_RECEIPT_BYTES + 128 * 1024];
        let (status, body) = app
            .send(multipart_parts(&token, &[("receipt", "image/jpeg", far_too_large.as_slice())]))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorCode"], "FILE_UPLOAD_ERROR");
        assert_eq!(body["message"], "File size exceeds the limit");
    }

    #[tokio::test]
    async fn extreme_page_numbers_return_an_empty_page() {
        let app = app();
        let token = app.token(&RecordId::generate());
        for _ in 0..2 {
            app.send(json_request("POST", "/api/transaction/create", Some(&token), coffee()))
                .await;
        }

        let (status, body) = app
            .send(get(
                "/api/transaction/all?pageNumber=9223372036854775807&pageSize=9223372036854775807",
                &token,
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transactions"]["items"], json!([]));
        assert_eq!(body["transactions"]["totalCount"], 2);
        assert_eq!(body["transactions"]["pageSize"], 100);
        assert_eq!(body["transactions"]["totalPages"], 1);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let app = app();
        let (status, body) = app.send(get("/api/nothing-here", "irrelevant")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], "RESOURCE_NOT_FOUND");
    }
}
