use apiforge::api::routes::create_router;
use apiforge::logic::Services;
use apiforge::{
    load_service_spec, parse_service_spec, AuthKind, AuthSpec, CompileOptions, Compiler,
    DefinitionFormat, EndpointSpec, EventHandlerSpec, EventSpec, ExecutionContext, LogicError,
    LogicStep, MemoryPersistence, MiddlewareSpec, RequestSource, ServiceSpec, StepExecutor,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SECRET: &[u8] = b"end-to-end-secret";

struct Reply {
    status: StatusCode,
    body: Value,
}

async fn send(router: &Router, request: Request<Body>) -> Reply {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply { status, body }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn token(claims: Value) -> String {
    let mut claims = claims;
    claims["exp"] = json!(chrono::Utc::now().timestamp() + 3600);
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

fn with_bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );
    request
}

fn users_service() -> ServiceSpec {
    ServiceSpec::new("users")
        .with_auth(AuthSpec::new("jwt", AuthKind::Jwt).with_secret("end-to-end-secret"))
        .with_middleware(MiddlewareSpec::new("auth", "authentication"))
        .with_middleware(
            MiddlewareSpec::new("maybe-auth", "authentication")
                .with_config("required", json!(false))
                .with_config("provider", json!("jwt")),
        )
        .with_event(EventSpec::new("UserCreated"))
        .with_endpoint(
            EndpointSpec::new("GET", "/users/:id")
                .with_step(LogicStep::new("findOne", ["users", "request.id"])),
        )
        .with_endpoint(
            EndpointSpec::new("POST", "/users")
                .with_request("NewUser", RequestSource::Body)
                .with_response("User", 201)
                .with_step(LogicStep::new("validate", ["request"]))
                .with_step(LogicStep::new("insert", ["users", "request"])),
        )
        .with_endpoint(
            EndpointSpec::new("GET", "/me")
                .with_middleware("maybe-auth")
                .with_step(LogicStep::new("transform", ["toJSON", "request"]).into_target("seen"))
                .with_step(LogicStep::new("find", ["users"])),
        )
        .with_endpoint(
            EndpointSpec::new("GET", "/private")
                .with_middleware("auth")
                .with_step(LogicStep::new("find", ["users"])),
        )
        .with_endpoint(
            EndpointSpec::new("DELETE", "/users/:id")
                .with_middleware("auth")
                .with_annotation("role", Some("admin"))
                .with_step(LogicStep::new("delete", ["users", "request.id"])),
        )
}

fn compile_with(spec: &ServiceSpec, store: Arc<MemoryPersistence>) -> Router {
    let runtime = Compiler::new()
        .with_persistence(store)
        .compile(spec)
        .unwrap();
    create_router(&runtime)
}

#[tokio::test]
async fn test_find_one_miss_is_not_found() {
    let router = compile_with(&users_service(), Arc::new(MemoryPersistence::new()));

    let reply = send(&router, get("/users/42")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(
        reply.body,
        json!({"error": "Not Found", "message": "users not found: 42"})
    );
}

#[tokio::test]
async fn test_create_then_read_back() {
    let store = Arc::new(MemoryPersistence::new());
    let router = compile_with(&users_service(), store.clone());

    let reply = send(&router, post("/users", json!({"name": "Ada"}))).await;
    assert_eq!(reply.status, StatusCode::CREATED);
    let id = reply.body["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(store.count("users"), 1);

    let reply = send(&router, get(&format!("/users/{}", id))).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["name"], json!("Ada"));
}

#[tokio::test]
async fn test_optional_auth_runs_without_credentials() {
    let router = compile_with(&users_service(), Arc::new(MemoryPersistence::new()));

    let reply = send(&router, get("/me")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!([]));

    let reply = send(&router, with_bearer(get("/me"), "not-a-jwt")).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_required_auth_rejects_before_steps_run() {
    let router = compile_with(&users_service(), Arc::new(MemoryPersistence::new()));

    let reply = send(&router, get("/private")).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], json!("Unauthorized"));
    assert_eq!(reply.body["message"], json!("missing credentials"));

    let valid = token(json!({"sub": "u-1"}));
    let reply = send(&router, with_bearer(get("/private"), &valid)).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn test_role_annotation_enforced() {
    let store = Arc::new(MemoryPersistence::new());
    let router = compile_with(&users_service(), store.clone());

    let created = send(&router, post("/users", json!({"name": "Grace"}))).await;
    let id = created.body["id"].as_str().unwrap().to_string();
    let uri = format!("/users/{}", id);
    let delete = |token: &str| {
        with_bearer(
            Request::builder()
                .method("DELETE")
                .uri(&uri)
                .body(Body::empty())
                .unwrap(),
            token,
        )
    };

    let member = token(json!({"sub": "u-2", "role": "member"}));
    let reply = send(&router, delete(&member)).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(store.count("users"), 1);

    let admin = token(json!({"sub": "u-3", "roles": ["member", "admin"]}));
    let reply = send(&router, delete(&admin)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"deleted": true}));
    assert_eq!(store.count("users"), 0);
}

#[tokio::test]
async fn test_validation_failure_is_bad_request() {
    let router = compile_with(&users_service(), Arc::new(MemoryPersistence::new()));

    let reply = send(
        &router,
        Request::builder()
            .method("POST")
            .uri("/users")
            .body(Body::from("{\"name\": "))
            .unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_isolated() {
    let spec = ServiceSpec::new("echo").with_endpoint(
        EndpointSpec::new("POST", "/echo/:slot")
            .with_step(LogicStep::new("transform", ["toJSON", "request.n"]).into_target("n"))
            .with_step(LogicStep::new("transform", ["fromJSON", "n"]).into_target("parsed"))
            .with_step(LogicStep::new("transform", ["identity", "request"])),
    );
    let router = compile_with(&spec, Arc::new(MemoryPersistence::new()));

    let tasks: Vec<_> = (0..32)
        .map(|n| {
            let router = router.clone();
            tokio::spawn(async move {
                let reply = send(&router, post(&format!("/echo/{}", n), json!({"n": n}))).await;
                (n, reply)
            })
        })
        .collect();

    for task in tasks {
        let (n, reply) = task.await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, json!({"n": n, "slot": n.to_string()}));
    }
}

#[tokio::test]
async fn test_event_handlers_run_on_emit() {
    let mut spec = users_service();
    spec.endpoints.push(
        EndpointSpec::new("POST", "/signup")
            .with_step(LogicStep::new("insert", ["users", "request"]).into_target("created"))
            .with_step(LogicStep::new("emit", ["UserCreated", "created"]))
            .with_step(LogicStep::new("transform", ["identity", "created"])),
    );
    spec.event_handlers.push(EventHandlerSpec {
        name: Some("audit".into()),
        event: "UserCreated".into(),
        steps: vec![LogicStep::new("insert", ["audit", "request"])],
    });
    let store = Arc::new(MemoryPersistence::new());
    let router = compile_with(&spec, store.clone());

    let reply = send(&router, post("/signup", json!({"name": "Linus"}))).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body["id"].is_string());
    assert_eq!(store.count("users"), 1);
    assert_eq!(store.count("audit"), 1);
}

#[tokio::test]
async fn test_self_emitting_handler_terminates() {
    let mut spec = ServiceSpec::new("loops")
        .with_event(EventSpec::new("Ping"))
        .with_endpoint(
            EndpointSpec::new("POST", "/ping")
                .with_step(LogicStep::new("emit", ["Ping", "request"]))
                .with_step(LogicStep::new("transform", ["identity", "request"])),
        );
    spec.event_handlers.push(EventHandlerSpec {
        name: Some("echo".into()),
        event: "Ping".into(),
        steps: vec![
            LogicStep::new("insert", ["audit", "request"]),
            LogicStep::new("emit", ["Ping", "request"]),
        ],
    });
    let store = Arc::new(MemoryPersistence::new());
    let router = compile_with(&spec, store.clone());

    let reply = tokio::time::timeout(
        Duration::from_secs(5),
        send(&router, post("/ping", json!({"n": 1}))),
    )
    .await
    .unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"n": 1}));
    assert_eq!(store.count("audit"), apiforge::registry::MAX_EVENT_DEPTH);
}

#[tokio::test]
async fn test_unknown_action_and_middleware_are_skipped() {
    let spec = ServiceSpec::new("lenient").with_endpoint(
        EndpointSpec::new("GET", "/ping")
            .with_middleware("compression")
            .with_step(LogicStep::new("teleport", ["somewhere"]))
            .with_step(LogicStep::new("transform", ["toJSON", "'pong'"])),
    );
    let router = compile_with(&spec, Arc::new(MemoryPersistence::new()));

    let reply = send(&router, get("/ping")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!("\"pong\""));
}

struct Stall;

#[async_trait::async_trait]
impl StepExecutor for Stall {
    async fn execute(
        &self,
        _step: &LogicStep,
        _ctx: &ExecutionContext,
        _services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }
}

#[tokio::test]
async fn test_request_timeout() {
    let spec = ServiceSpec::new("slow")
        .with_endpoint(EndpointSpec::new("GET", "/slow").with_step(LogicStep::new("stall", Vec::<String>::new())));
    let runtime = Compiler::new()
        .with_options(CompileOptions {
            request_timeout: Some(Duration::from_millis(50)),
            ..CompileOptions::default()
        })
        .with_action("stall", Arc::new(Stall))
        .compile(&spec)
        .unwrap();

    let reply = send(&create_router(&runtime), get("/slow")).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.body["message"], json!("request deadline exceeded"));
}

#[tokio::test]
async fn test_cors_preflight_skips_auth() {
    let spec = ServiceSpec::new("web")
        .with_auth(AuthSpec::new("jwt", AuthKind::Jwt).with_secret("end-to-end-secret"))
        .with_middleware(MiddlewareSpec::new("web", "cors").with_config("origin", json!("https://app.example")))
        .with_middleware(MiddlewareSpec::new("auth", "authentication"))
        .with_endpoint(
            EndpointSpec::new("POST", "/items")
                .with_middleware("web")
                .with_middleware("auth")
                .with_step(LogicStep::new("insert", ["items", "request"])),
        );
    let router = compile_with(&spec, Arc::new(MemoryPersistence::new()));

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/items")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://app.example"
    );

    let reply = send(&router, post("/items", json!({"sku": "A-1"}))).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_yaml_definition_compiles_and_serves() {
    let yaml = r#"
name: notes
models:
  - name: notes
    fields:
      - { name: title, type: string, required: true }
endpoints:
  - method: POST
    path: /notes
    response: { status: 201 }
    steps:
      - { action: validate, args: [request, notes] }
      - { action: insert, args: [notes, request] }
  - method: GET
    path: /notes
    request: { name: NoteQuery, source: query }
    steps:
      - { action: find, args: [notes, "title = request.title"] }
"#;
    let spec = parse_service_spec(yaml, DefinitionFormat::Yaml).unwrap();
    let router = compile_with(&spec, Arc::new(MemoryPersistence::new()));

    let reply = send(&router, post("/notes", json!({"body": "untitled"}))).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = send(&router, post("/notes", json!({"title": "groceries"}))).await;
    assert_eq!(reply.status, StatusCode::CREATED);

    let reply = send(&router, get("/notes?title=groceries")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body.as_array().unwrap().len(), 1);

    let reply = send(&router, get("/notes?title=chores")).await;
    assert_eq!(reply.body, json!([]));
}

#[test]
fn test_demo_definition_compiles() {
    let spec = load_service_spec(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/users.yaml")).unwrap();
    let runtime = apiforge::compile(&spec).unwrap();

    assert_eq!(runtime.routes().len(), spec.endpoints.len());
    assert!(runtime.events().is_declared("UserCreated"));
    assert_eq!(runtime.middleware().len(), 5);
}
