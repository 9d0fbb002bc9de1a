mod support;

use std::time::Duration;

use axum::http::StatusCode;
use kp_loader::{
    api::ApiHandler,
    catalog::{Catalog, Movie},
    runner::{worker_dispatcher, PollingLoop},
    settings::{ProbabilitySettings, SearchSettings},
    CancellationToken, ClientOptions, ConnectionPool, Database, DispatcherBuilder, LoaderError,
    ResilientClient, RetryPolicy,
};
use rand::{rngs::StdRng, SeedableRng};
use serde_json::json;

use support::{images_body, movie_body, spawn_server, MockResponse, TestServer};

struct Harness {
    _dir: tempfile::TempDir,
    catalog: Catalog,
    api: ApiHandler,
    cancel: CancellationToken,
}

impl Harness {
    fn new(server: &TestServer) -> Self {
        let dir = tempfile::tempdir().expect("must create temp dir");
        let db = Database::open(dir.path().join("kp.db")).expect("must open database");
        let catalog = Catalog::new(db).expect("must build catalog");
        catalog.initialize().expect("must initialize");

        let cancel = CancellationToken::new();
        let options = ClientOptions::new(server.base_url.as_str())
            .with_api_key("test-key")
            .with_retry(RetryPolicy::new(Duration::from_secs(2), 2, Duration::from_millis(1)));
        let client = ResilientClient::new(&ConnectionPool::new(), &options, cancel.clone())
            .expect("must build client");

        Self {
            _dir: dir,
            catalog,
            api: ApiHandler::new(client),
            cancel,
        }
    }

    fn only(&self, load_movie: f64, update_movie: f64, update_images: f64) -> PollingLoop {
        let probabilities = ProbabilitySettings {
            load_movie,
            update_movie,
            update_images,
        };
        let dispatcher = worker_dispatcher(
            DispatcherBuilder::with_rng(StdRng::seed_from_u64(7)),
            &self.api,
            &self.catalog,
            &probabilities,
            &SearchSettings {
                min_year: Some(1990),
                max_year: Some(2000),
                ..SearchSettings::default()
            },
        )
        .expect("weights must be valid");
        PollingLoop::new(dispatcher)
    }
}

#[tokio::test]
async fn load_cycle_inserts_then_refreshes_the_same_movie() {
    let server = spawn_server(vec![
        MockResponse::ok(movie_body(326, "Побег")),
        MockResponse::ok(movie_body(326, "Побег из Шоушенка")),
    ])
    .await;
    let harness = Harness::new(&server);
    let mut cycle = harness.only(1.0, 0.0, 0.0);

    assert!(cycle.run_once(&harness.cancel).await.expect("first cycle"));
    assert!(cycle.run_once(&harness.cancel).await.expect("second cycle"));

    let movies = harness.catalog.movies().expect("must list");
    assert_eq!(movies.len(), 1);
    assert_eq!(movies[0].kp_id, 326);
    assert_eq!(movies[0].name_ru.as_deref(), Some("Побег из Шоушенка"));
    assert_eq!(movies[0].rating_imdb, Some(8.7));

    let requests = server.requests();
    assert_eq!(requests[0].path, "/v1.4/movie/random");
    assert_eq!(
        requests[0].query.as_deref(),
        Some("status=completed&year=1990-2000")
    );
    assert_eq!(requests[0].api_key.as_deref(), Some("test-key"));
}

#[tokio::test]
async fn update_cycle_refreshes_the_stalest_movie() {
    let server = spawn_server(vec![MockResponse::ok(movie_body(77, "Новое имя"))]).await;
    let harness = Harness::new(&server);
    harness
        .catalog
        .add_movie(Movie {
            kp_id: 77,
            name_ru: Some("Старое имя".to_owned()),
            ..Movie::default()
        })
        .expect("must add");
    let mut cycle = harness.only(0.0, 1.0, 0.0);

    assert!(cycle.run_once(&harness.cancel).await.expect("cycle must run"));

    let movie = harness
        .catalog
        .movie_by_kp_id(77)
        .expect("must query")
        .expect("movie must exist");
    assert_eq!(movie.name_ru.as_deref(), Some("Новое имя"));
    assert_eq!(server.requests()[0].query.as_deref(), Some("id=77"));
}

#[tokio::test]
async fn image_cycle_replaces_frames() {
    let server = spawn_server(vec![MockResponse::ok(images_body(&[
        "https://img.example/1.jpg",
        "https://img.example/2.jpg",
    ]))])
    .await;
    let harness = Harness::new(&server);
    let movie = harness
        .catalog
        .add_movie(Movie {
            kp_id: 326,
            ..Movie::default()
        })
        .expect("must add");
    let mut cycle = harness.only(0.0, 0.0, 1.0);

    assert!(cycle.run_once(&harness.cancel).await.expect("cycle must run"));

    let uris: Vec<_> = harness
        .catalog
        .movie_images(movie.id)
        .expect("must list")
        .into_iter()
        .map(|image| image.uri)
        .collect();
    assert_eq!(uris, ["https://img.example/1.jpg", "https://img.example/2.jpg"]);
    assert_eq!(
        server.requests()[0].query.as_deref(),
        Some("page=1&limit=10&movieId=326&type=frame")
    );
}

#[tokio::test]
async fn empty_catalog_makes_update_cycles_no_ops() {
    let server = spawn_server(Vec::new()).await;
    let harness = Harness::new(&server);

    let mut update = harness.only(0.0, 1.0, 0.0);
    assert!(!update.run_once(&harness.cancel).await.expect("cycle must run"));
    let mut images = harness.only(0.0, 0.0, 1.0);
    assert!(!images.run_once(&harness.cancel).await.expect("cycle must run"));

    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn api_failure_is_a_no_op() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::FORBIDDEN,
        json!({"statusCode": 403, "message": "Daily limit exceeded", "error": "Forbidden"}),
    )])
    .await;
    let harness = Harness::new(&server);
    let mut cycle = harness.only(1.0, 0.0, 0.0);

    assert!(!cycle.run_once(&harness.cancel).await.expect("cycle must run"));
    assert_eq!(harness.catalog.movie_count().expect("must count"), 0);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn cancelled_token_stops_before_dispatch() {
    let server = spawn_server(vec![MockResponse::ok(movie_body(1, "x"))]).await;
    let harness = Harness::new(&server);
    let mut cycle = harness.only(1.0, 0.0, 0.0);
    harness.cancel.cancel();

    let err = cycle
        .run_once(&harness.cancel)
        .await
        .expect_err("must be cancelled");

    assert!(matches!(err, LoaderError::Cancelled));
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn invalid_weights_fail_before_any_dispatch() {
    let server = spawn_server(Vec::new()).await;
    let harness = Harness::new(&server);

    let err = worker_dispatcher(
        DispatcherBuilder::new(),
        &harness.api,
        &harness.catalog,
        &ProbabilitySettings {
            load_movie: 0.5,
            update_movie: 0.3,
            update_images: 0.1,
        },
        &SearchSettings::default(),
    )
    .expect_err("0.9 total must be rejected");

    assert!(matches!(err, LoaderError::Config(_)));
    assert_eq!(server.hits(), 0);
}
